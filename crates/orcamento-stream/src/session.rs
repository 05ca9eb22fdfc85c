//! Ingestion session controller.
//!
//! Drives one consultation from request to a terminal state:
//!
//! ```text
//! Idle → Requesting → Streaming → Completed | Failed | Cancelled
//! ```
//!
//! The read loop is the only suspension point. Every chunk is pushed through
//! line reassembly, frame assembly, message decoding and accumulation before
//! the next read, so a slow observer throttles the transport.
//!
//! Each call to [`IngestionController::start`] builds fresh line and frame
//! buffers and clears the accumulator; nothing is shared between sessions.

use std::sync::Arc;

use orcamento_core::CanonicalRecord;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::accumulator::Accumulator;
use crate::error::StreamError;
use crate::frames::{FrameAssembler, ProtocolFrame};
use crate::lines::LineReassembler;
use crate::message::{CompletionReport, PartialChunk, ProtocolMessage, decode_message};
use crate::transport::{ChunkSource, ConsultaRequest, Transport};

/// Longest payload excerpt attached to a decode-failure event.
const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// What to do with a frame that does not decode into a protocol message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Log it, report a [`SessionEvent::DecodeFailed`], keep reading.
    #[default]
    Skip,
    /// End the session as failed.
    Fail,
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub decode_policy: DecodePolicy,
}

/// Outcome of a successful stream as reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSummary {
    /// Row count claimed by the server.
    pub total_records: u64,
    pub total_unprocessed: u64,
    pub unprocessed: Vec<Value>,
    pub reference_period: String,
    pub correction_kind: String,
    /// Rows actually accumulated by this client.
    pub received_records: usize,
}

impl CompletionSummary {
    fn from_report(report: CompletionReport, received_records: usize) -> Self {
        Self {
            total_records: report.total_records,
            total_unprocessed: report.total_unprocessed,
            unprocessed: report.unprocessed,
            reference_period: report.base_correction_period.unwrap_or_default(),
            correction_kind: report.correction_kind.unwrap_or_default(),
            received_records,
        }
    }

    /// True when the server could not process some rows.
    pub fn has_warnings(&self) -> bool {
        self.total_unprocessed > 0 || !self.unprocessed.is_empty()
    }
}

/// Non-fatal diagnostics raised while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A frame was skipped because it did not decode.
    DecodeFailed { error: String, preview: String },
    /// The body ended without a final `\n`; the tail was treated as a line.
    UnterminatedLine { len: usize },
    /// A frame with no closing blank line was flushed at end of stream.
    TrailingFrame,
}

/// Receives session progress. Callbacks run on the read loop.
pub trait SessionObserver {
    /// After every decoded `parcial` frame.
    fn on_progress(&mut self, snapshot: &[CanonicalRecord], message: &str);

    fn on_complete(&mut self, snapshot: &[CanonicalRecord], summary: &CompletionSummary);

    fn on_error(&mut self, message: &str);

    fn on_event(&mut self, _event: &SessionEvent) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(CompletionSummary),
    Failed(String),
    Cancelled,
}

/// Requests cooperative cancellation of the controller's current session.
///
/// Cancellation only takes effect while streaming; a request made before
/// `start` is cleared when the next session begins.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn reset(&self) -> watch::Receiver<bool> {
        self.tx.send_replace(false);
        self.tx.subscribe()
    }
}

/// Per-session parser state. Dropped when the session ends.
#[derive(Default)]
struct Pipeline {
    lines: LineReassembler,
    frames: FrameAssembler,
}

/// Owns the transport and the accumulated snapshot; runs one session at a time.
pub struct IngestionController<T> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    accumulator: Accumulator,
    cancel: CancelHandle,
}

impl<T: Transport> IngestionController<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Idle,
            accumulator: Accumulator::new(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Records accumulated so far. Still valid after failure or cancellation.
    pub fn snapshot(&self) -> &[CanonicalRecord] {
        self.accumulator.snapshot()
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run a whole session: open the stream, read it to a terminal message,
    /// and close the transport.
    ///
    /// Any previous session's records are discarded first.
    pub async fn start<O>(&mut self, request: &ConsultaRequest, observer: &mut O) -> SessionOutcome
    where
        O: SessionObserver + ?Sized,
    {
        self.state = SessionState::Idle;
        self.accumulator.clear();
        let mut cancel_rx = self.cancel.reset();

        self.state = SessionState::Requesting;
        info!(
            start = %request.start,
            end = %request.end,
            correction = request.correction.as_str(),
            reference = %request.reference_period,
            "requesting consultation stream"
        );
        let mut source = match self.transport.open(request).await {
            Ok(source) => source,
            Err(e) => return self.fail(observer, e.to_string()),
        };

        self.state = SessionState::Streaming;
        let outcome = self
            .read_loop(source.as_mut(), &mut cancel_rx, observer)
            .await;
        source.close().await;
        debug!(state = self.state.as_str(), "transport closed");
        outcome
    }

    async fn read_loop<O>(
        &mut self,
        source: &mut dyn ChunkSource,
        cancel_rx: &mut watch::Receiver<bool>,
        observer: &mut O,
    ) -> SessionOutcome
    where
        O: SessionObserver + ?Sized,
    {
        let mut pipeline = Pipeline::default();

        loop {
            if *cancel_rx.borrow_and_update() {
                return self.cancelled();
            }

            let next = tokio::select! {
                biased;
                _ = cancel_rx.changed() => continue,
                chunk = source.next_chunk() => chunk,
            };

            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return self.end_of_stream(&mut pipeline, observer),
                Err(e) => return self.fail(observer, e.to_string()),
            };

            for line in pipeline.lines.push(&chunk) {
                let Some(frame) = pipeline.frames.push_line(&line) else {
                    continue;
                };
                if let Some(outcome) = self.handle_frame(frame, observer) {
                    return outcome;
                }
                if *cancel_rx.borrow() {
                    return self.cancelled();
                }
            }
        }
    }

    /// Body exhausted without a terminal message: flush what is buffered,
    /// then fail as truncated unless the flush itself finished the session.
    fn end_of_stream<O>(&mut self, pipeline: &mut Pipeline, observer: &mut O) -> SessionOutcome
    where
        O: SessionObserver + ?Sized,
    {
        if let Some(line) = pipeline.lines.finish() {
            warn!(len = line.len(), "stream ended mid-line");
            observer.on_event(&SessionEvent::UnterminatedLine { len: line.len() });
            if let Some(frame) = pipeline.frames.push_line(&line)
                && let Some(outcome) = self.handle_frame(frame, observer)
            {
                return outcome;
            }
        }

        if let Some(frame) = pipeline.frames.finish() {
            warn!(
                len = frame.payload.len(),
                "flushing trailing frame without terminator"
            );
            observer.on_event(&SessionEvent::TrailingFrame);
            if let Some(outcome) = self.handle_frame(frame, observer) {
                return outcome;
            }
        }

        self.fail(observer, StreamError::Truncated.to_string())
    }

    /// Returns `Some` when the frame ends the session.
    fn handle_frame<O>(&mut self, frame: ProtocolFrame, observer: &mut O) -> Option<SessionOutcome>
    where
        O: SessionObserver + ?Sized,
    {
        match decode_message(&frame.payload) {
            Ok(ProtocolMessage::Partial(chunk)) => {
                let snapshot = self.accumulator.merge(&chunk.records, chunk.year);
                let message = progress_message(&chunk, snapshot.len());
                info!(
                    year = chunk.year,
                    records = chunk.records.len(),
                    total = snapshot.len(),
                    "fiscal year received"
                );
                observer.on_progress(snapshot, &message);
                None
            }
            Ok(ProtocolMessage::Complete(report)) => {
                let summary = CompletionSummary::from_report(report, self.accumulator.len());
                if summary.total_records != summary.received_records as u64 {
                    warn!(
                        reported = summary.total_records,
                        received = summary.received_records,
                        "server total differs from received rows"
                    );
                }
                if summary.has_warnings() {
                    warn!(
                        unprocessed = summary.total_unprocessed,
                        "server could not process some rows"
                    );
                }
                info!(total = summary.received_records, "consultation complete");
                self.state = SessionState::Completed;
                observer.on_complete(self.accumulator.snapshot(), &summary);
                Some(SessionOutcome::Completed(summary))
            }
            Ok(ProtocolMessage::Error { message }) => Some(self.fail(observer, message)),
            Err(e) => {
                let preview: String = frame.payload.chars().take(PREVIEW_CHARS).collect();
                warn!(error = %e, preview = %preview, "skipping undecodable frame");
                observer.on_event(&SessionEvent::DecodeFailed {
                    error: e.to_string(),
                    preview,
                });
                match self.config.decode_policy {
                    DecodePolicy::Skip => None,
                    DecodePolicy::Fail => {
                        Some(self.fail(observer, format!("could not decode frame: {e}")))
                    }
                }
            }
        }
    }

    fn fail<O>(&mut self, observer: &mut O, message: String) -> SessionOutcome
    where
        O: SessionObserver + ?Sized,
    {
        warn!(
            error = %message,
            records = self.accumulator.len(),
            from = self.state.as_str(),
            "consultation failed"
        );
        self.state = SessionState::Failed;
        observer.on_error(&message);
        SessionOutcome::Failed(message)
    }

    fn cancelled(&mut self) -> SessionOutcome {
        info!(records = self.accumulator.len(), "consultation cancelled");
        self.state = SessionState::Cancelled;
        SessionOutcome::Cancelled
    }
}

fn progress_message(chunk: &PartialChunk, total: usize) -> String {
    format!(
        "fiscal year {} processed: {} records ({} accumulated)",
        chunk.year,
        chunk.records.len(),
        total
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::transport::CorrectionBasis;

    /// What a scripted source does once its chunks run out.
    #[derive(Clone, Copy)]
    enum Tail {
        End,
        Hang,
        Fail,
    }

    struct ScriptedSource {
        chunks: VecDeque<Vec<u8>>,
        tail: Tail,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(chunk) = self.chunks.pop_front() {
                return Ok(Some(chunk));
            }
            match self.tail {
                Tail::End => Ok(None),
                Tail::Hang => std::future::pending().await,
                Tail::Fail => Err(StreamError::Read("connection reset".into())),
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedTransport {
        chunks: Mutex<Option<Vec<Vec<u8>>>>,
        tail: Tail,
        status: Option<u16>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new(chunks: Vec<Vec<u8>>, tail: Tail) -> Self {
            Self {
                chunks: Mutex::new(Some(chunks)),
                tail,
                status: None,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn body(body: &str) -> Self {
            Self::new(vec![body.as_bytes().to_vec()], Tail::End)
        }

        fn rejecting(status: u16) -> Self {
            Self {
                status: Some(status),
                ..Self::new(vec![], Tail::End)
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(
            &self,
            _request: &ConsultaRequest,
        ) -> Result<Box<dyn ChunkSource>, StreamError> {
            if let Some(status) = self.status {
                return Err(StreamError::Server {
                    status,
                    body: "indisponível".into(),
                });
            }
            self.closed.store(false, Ordering::SeqCst);
            let chunks = self.chunks.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedSource {
                chunks: chunks.into(),
                tail: self.tail,
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    #[derive(Default)]
    struct Recorder {
        progress: Vec<(usize, String)>,
        completed: Vec<(usize, CompletionSummary)>,
        errors: Vec<String>,
        events: Vec<SessionEvent>,
        cancel_after_progress: Option<CancelHandle>,
    }

    impl SessionObserver for Recorder {
        fn on_progress(&mut self, snapshot: &[CanonicalRecord], message: &str) {
            self.progress.push((snapshot.len(), message.to_string()));
            if let Some(handle) = &self.cancel_after_progress {
                handle.cancel();
            }
        }

        fn on_complete(&mut self, snapshot: &[CanonicalRecord], summary: &CompletionSummary) {
            self.completed.push((snapshot.len(), summary.clone()));
        }

        fn on_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }

        fn on_event(&mut self, event: &SessionEvent) {
            self.events.push(event.clone());
        }
    }

    fn request() -> ConsultaRequest {
        ConsultaRequest {
            start: "01/2020".into(),
            end: "12/2021".into(),
            correction: CorrectionBasis::Monthly,
            reference_period: "12/2023".into(),
        }
    }

    fn frame(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    const PARTIAL_2020: &str = r#"{"status":"parcial","ano_processado":2020,"total_registros_ano":1,"dados":[{"UNIDADE_ORCAMENTARIA":"UEL","MES":"12","PAGO_NO_MES":"1.000,00"}]}"#;
    const PARTIAL_2021: &str = r#"{"status":"parcial","ano_processado":2021,"total_registros_ano":1,"dados":[{"UNIDADE_ORCAMENTARIA":"UEM","MES":"06","PAGO_NO_MES":"2.500,50"}]}"#;
    const COMPLETE: &str = r#"{"status":"completo","total_registros":2,"total_nao_processados":0,"dados_nao_processados":[],"periodo_base_ipca":"12/2023","tipo_correcao":"mensal"}"#;

    fn two_year_body() -> String {
        [frame(PARTIAL_2020), frame(PARTIAL_2021), frame(COMPLETE)].concat()
    }

    #[tokio::test]
    async fn end_to_end_two_years() {
        let mut controller = IngestionController::new(ScriptedTransport::body(&two_year_body()));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert_eq!(rec.progress.len(), 2);
        assert_eq!(rec.progress[0].0, 1);
        assert_eq!(rec.progress[1].0, 2);
        assert!(rec.progress[1].1.contains("2021"));
        assert_eq!(rec.completed.len(), 1);
        assert_eq!(rec.completed[0].1.total_records, 2);
        assert_eq!(rec.completed[0].1.reference_period, "12/2023");
        assert!(!rec.completed[0].1.has_warnings());
        assert!(rec.errors.is_empty());
        assert!(matches!(outcome, SessionOutcome::Completed(ref s) if s.total_records == 2));
        assert_eq!(controller.state(), SessionState::Completed);

        let second = &controller.snapshot()[1];
        assert_eq!(second.id, 2);
        assert_eq!(second.year, 2021);
        assert_eq!(second.month, 6);
        assert_eq!(second.paid_in_month, 2500.50);
        assert!(controller.transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn result_is_independent_of_chunking() {
        let body = two_year_body().into_bytes();
        for size in [1, 2, 3, 5, 17, 64] {
            let chunks = body.chunks(size).map(<[u8]>::to_vec).collect();
            let mut controller =
                IngestionController::new(ScriptedTransport::new(chunks, Tail::End));
            let mut rec = Recorder::default();
            controller.start(&request(), &mut rec).await;

            assert_eq!(rec.progress.len(), 2, "chunk size {size}");
            assert_eq!(rec.completed.len(), 1, "chunk size {size}");
            assert_eq!(controller.snapshot()[1].paid_in_month, 2500.50);
        }
    }

    #[tokio::test]
    async fn malformed_frame_between_partials_is_skipped() {
        let body = [
            frame(PARTIAL_2020),
            frame("{this is not json"),
            frame(PARTIAL_2021),
            frame(COMPLETE),
        ]
        .concat();
        let mut controller = IngestionController::new(ScriptedTransport::body(&body));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert!(matches!(outcome, SessionOutcome::Completed(_)));
        let institutions: Vec<&str> = controller
            .snapshot()
            .iter()
            .map(|r| r.institution.as_str())
            .collect();
        assert_eq!(institutions, vec!["UEL", "UEM"]);
        assert_eq!(rec.events.len(), 1);
        assert!(matches!(
            &rec.events[0],
            SessionEvent::DecodeFailed { preview, .. } if preview.starts_with("{this")
        ));
    }

    #[tokio::test]
    async fn unknown_status_is_skipped() {
        let body = [
            frame(r#"{"status":"aguardando"}"#),
            frame(PARTIAL_2020),
            frame(COMPLETE),
        ]
        .concat();
        let mut controller = IngestionController::new(ScriptedTransport::body(&body));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert!(matches!(outcome, SessionOutcome::Completed(_)));
        assert_eq!(controller.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn strict_policy_fails_on_malformed_frame() {
        let body = [frame(PARTIAL_2020), frame("[]"), frame(PARTIAL_2021)].concat();
        let config = SessionConfig {
            decode_policy: DecodePolicy::Fail,
        };
        let mut controller =
            IngestionController::with_config(ScriptedTransport::body(&body), config);
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert!(matches!(outcome, SessionOutcome::Failed(_)));
        assert_eq!(controller.state(), SessionState::Failed);
        assert_eq!(controller.snapshot().len(), 1);
        assert_eq!(rec.errors.len(), 1);
    }

    #[tokio::test]
    async fn comment_frames_do_not_break_stream() {
        let body = format!(
            ": keep-alive\n\n{}: ping\n\n{}",
            frame(PARTIAL_2020),
            frame(COMPLETE)
        );
        let mut controller = IngestionController::new(ScriptedTransport::body(&body));
        let mut rec = Recorder::default();

        controller.start(&request(), &mut rec).await;

        assert_eq!(controller.state(), SessionState::Completed);
        assert!(rec.events.is_empty());
    }

    #[tokio::test]
    async fn server_error_fails_with_verbatim_message_and_keeps_data() {
        let body = [
            frame(PARTIAL_2020),
            frame(r#"{"status":"erro","erro":"Timeout ao consultar 2021"}"#),
            frame(PARTIAL_2021),
        ]
        .concat();
        let mut controller = IngestionController::new(ScriptedTransport::body(&body));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert_eq!(outcome, SessionOutcome::Failed("Timeout ao consultar 2021".into()));
        assert_eq!(rec.errors, vec!["Timeout ao consultar 2021".to_string()]);
        assert!(rec.completed.is_empty());
        assert_eq!(controller.snapshot().len(), 1);
        assert!(controller.transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn non_ok_response_fails_before_streaming() {
        let mut controller = IngestionController::new(ScriptedTransport::rejecting(503));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert!(matches!(outcome, SessionOutcome::Failed(ref m) if m.contains("503")));
        assert_eq!(controller.state(), SessionState::Failed);
        assert!(rec.progress.is_empty());
        assert_eq!(rec.errors.len(), 1);
    }

    #[tokio::test]
    async fn read_error_fails_and_keeps_partial_snapshot() {
        let chunks = vec![frame(PARTIAL_2020).into_bytes()];
        let mut controller = IngestionController::new(ScriptedTransport::new(chunks, Tail::Fail));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert!(matches!(outcome, SessionOutcome::Failed(ref m) if m.contains("connection reset")));
        assert_eq!(controller.snapshot().len(), 1);
        assert_eq!(rec.progress.len(), 1);
    }

    #[tokio::test]
    async fn stream_without_terminal_message_is_truncated() {
        let body = frame(PARTIAL_2020);
        let mut controller = IngestionController::new(ScriptedTransport::body(&body));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert_eq!(
            outcome,
            SessionOutcome::Failed(StreamError::Truncated.to_string())
        );
        assert_eq!(controller.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn unterminated_final_frame_is_still_decoded() {
        let body = format!("{}data: {COMPLETE}", frame(PARTIAL_2020));
        let mut controller = IngestionController::new(ScriptedTransport::body(&body));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert!(matches!(outcome, SessionOutcome::Completed(_)));
        assert_eq!(
            rec.events,
            vec![
                SessionEvent::UnterminatedLine {
                    len: "data: ".len() + COMPLETE.len()
                },
                SessionEvent::TrailingFrame,
            ]
        );
    }

    #[tokio::test]
    async fn truncated_trailing_frame_is_logged_and_dropped() {
        let body = format!("{}data: {{\"status\":\"completo\",\"total_", frame(PARTIAL_2020));
        let mut controller = IngestionController::new(ScriptedTransport::body(&body));
        let mut rec = Recorder::default();

        let outcome = controller.start(&request(), &mut rec).await;

        assert_eq!(
            outcome,
            SessionOutcome::Failed(StreamError::Truncated.to_string())
        );
        assert!(rec.events.contains(&SessionEvent::TrailingFrame));
        assert!(
            rec.events
                .iter()
                .any(|e| matches!(e, SessionEvent::DecodeFailed { .. }))
        );
        assert_eq!(controller.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn cancel_after_first_partial() {
        let chunks = vec![frame(PARTIAL_2020).into_bytes()];
        let mut controller = IngestionController::new(ScriptedTransport::new(chunks, Tail::Hang));
        let mut rec = Recorder {
            cancel_after_progress: Some(controller.cancel_handle()),
            ..Default::default()
        };

        let outcome = controller.start(&request(), &mut rec).await;

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(controller.state(), SessionState::Cancelled);
        assert_eq!(controller.snapshot().len(), 1);
        assert!(rec.completed.is_empty());
        assert!(rec.errors.is_empty());
        assert!(controller.transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_stops_parsing_within_a_chunk() {
        // Both partials and the completion arrive in one read.
        let mut controller = IngestionController::new(ScriptedTransport::body(&two_year_body()));
        let mut rec = Recorder {
            cancel_after_progress: Some(controller.cancel_handle()),
            ..Default::default()
        };

        let outcome = controller.start(&request(), &mut rec).await;

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(rec.progress.len(), 1);
        assert_eq!(controller.snapshot().len(), 1);
        assert!(rec.completed.is_empty());
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_read() {
        let mut controller = IngestionController::new(ScriptedTransport::new(vec![], Tail::Hang));
        let handle = controller.cancel_handle();
        let mut rec = Recorder::default();

        let canceller = async {
            tokio::task::yield_now().await;
            handle.cancel();
        };
        let req = request();
        let (outcome, ()) = tokio::join!(controller.start(&req, &mut rec), canceller);

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert!(rec.errors.is_empty());
    }

    #[tokio::test]
    async fn restart_resets_previous_session() {
        let mut controller = IngestionController::new(ScriptedTransport::body(&two_year_body()));
        let handle = controller.cancel_handle();
        let mut rec = Recorder::default();
        controller.start(&request(), &mut rec).await;
        assert_eq!(controller.snapshot().len(), 2);

        // A stale cancel request does not leak into the next session, and the
        // exhausted script now yields an empty body.
        handle.cancel();
        let outcome = controller.start(&request(), &mut rec).await;

        assert_eq!(
            outcome,
            SessionOutcome::Failed(StreamError::Truncated.to_string())
        );
        assert!(controller.snapshot().is_empty());
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }

    #[test]
    fn completion_warnings() {
        let report = CompletionReport {
            total_records: 10,
            total_unprocessed: 2,
            ..Default::default()
        };
        let summary = CompletionSummary::from_report(report, 8);
        assert!(summary.has_warnings());
        assert_eq!(summary.received_records, 8);
        assert_eq!(summary.correction_kind, "");
    }
}
