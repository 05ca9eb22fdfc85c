mod display;

use std::io::{self, Write};

use anyhow::Context;
use chrono::{Datelike, Utc};
use clap::{Parser, ValueEnum};
use orcamento_core::CanonicalRecord;
use orcamento_stream::{
    CompletionSummary, ConsultaRequest, CorrectionBasis, DecodePolicy, HttpTransport,
    IngestionController, SessionConfig, SessionEvent, SessionObserver, SessionOutcome,
};

/// Stream a multi-year spending consultation and print the accumulated result.
#[derive(Parser, Debug)]
#[command(name = "orcamento", version, about)]
struct Cli {
    /// Base URL of the consultation server.
    #[arg(long, env = "ORCAMENTO_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// First month of the range, `MM/YYYY`.
    #[arg(long)]
    start: String,

    /// Last month of the range, `MM/YYYY`.
    #[arg(long)]
    end: String,

    /// Inflation correction basis.
    #[arg(long, value_enum, default_value_t = Correction::Mensal)]
    correction: Correction,

    /// Reference period for the correction, `MM/YYYY`. Defaults to the current month.
    #[arg(long)]
    reference: Option<String>,

    /// Fail on the first undecodable frame instead of skipping it.
    #[arg(long)]
    strict: bool,

    /// Print per-year and per-institution totals after the stream ends.
    #[arg(long)]
    summary: bool,

    /// Print the final snapshot as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Correction {
    Mensal,
    Anual,
}

impl From<Correction> for CorrectionBasis {
    fn from(c: Correction) -> Self {
        match c {
            Correction::Mensal => CorrectionBasis::Monthly,
            Correction::Anual => CorrectionBasis::Annual,
        }
    }
}

impl Cli {
    fn request(&self) -> ConsultaRequest {
        ConsultaRequest {
            start: self.start.clone(),
            end: self.end.clone(),
            correction: self.correction.into(),
            reference_period: self
                .reference
                .clone()
                .unwrap_or_else(current_reference_period),
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            decode_policy: if self.strict {
                DecodePolicy::Fail
            } else {
                DecodePolicy::Skip
            },
        }
    }
}

fn current_reference_period() -> String {
    let now = Utc::now();
    format!("{:02}/{}", now.month(), now.year())
}

/// Where human-readable output goes: stdout normally, stderr when stdout
/// carries the JSON snapshot.
fn human_output(json: bool) -> Box<dyn Write> {
    if json {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    }
}

/// Reports progress on stderr and the completion card on `out`. Fatal
/// errors are left to `main` so they print once.
struct ConsoleObserver<W> {
    out: W,
}

impl<W: Write> SessionObserver for ConsoleObserver<W> {
    fn on_progress(&mut self, _snapshot: &[CanonicalRecord], message: &str) {
        eprintln!("  {message}");
    }

    fn on_complete(&mut self, _snapshot: &[CanonicalRecord], summary: &CompletionSummary) {
        if let Err(e) = display::print_completion(&mut self.out, summary) {
            tracing::warn!(error = %e, "could not write completion report");
        }
    }

    fn on_error(&mut self, _message: &str) {}

    fn on_event(&mut self, event: &SessionEvent) {
        if let SessionEvent::DecodeFailed { error, .. } = event {
            eprintln!("  skipped a malformed frame: {error}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();
    tracing::info!("orcamento v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let request = cli.request();

    let transport = HttpTransport::new(cli.api_url.clone());
    let mut controller = IngestionController::with_config(transport, cli.session_config());

    let cancel = controller.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            cancel.cancel();
        }
    });

    eprintln!(
        "Consulting {} to {} ({} correction, reference {})",
        request.start,
        request.end,
        request.correction.as_str(),
        request.reference_period
    );
    let mut observer = ConsoleObserver {
        out: human_output(cli.json),
    };
    let outcome = controller.start(&request, &mut observer).await;

    if let SessionOutcome::Cancelled = outcome {
        eprintln!(
            "cancelled with {} records received",
            controller.snapshot().len()
        );
    }

    if cli.summary && !controller.snapshot().is_empty() {
        display::print_summary(
            &mut human_output(cli.json),
            controller.snapshot(),
            &controller.accumulator().year_totals(),
        )?;
    }
    if cli.json {
        let json = serde_json::to_string_pretty(controller.snapshot())
            .context("serialising snapshot")?;
        println!("{json}");
    }

    match outcome {
        SessionOutcome::Failed(message) => anyhow::bail!("consultation failed: {message}"),
        SessionOutcome::Completed(_) | SessionOutcome::Cancelled => Ok(()),
    }
}
