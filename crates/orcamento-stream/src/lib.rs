//! Streaming consultation ingestion: chunked SSE body → canonical records.

pub mod accumulator;
pub mod error;
pub mod frames;
pub mod lines;
pub mod message;
pub mod session;
pub mod transport;

#[cfg(feature = "http")]
pub mod http;

pub use accumulator::{Accumulator, YearTotal};
pub use error::{DecodeError, StreamError};
pub use frames::{FrameAssembler, ProtocolFrame};
pub use lines::{LineReassembler, Utf8Decoder};
pub use message::{CompletionReport, PartialChunk, ProtocolMessage, decode_message};
pub use session::{
    CancelHandle, CompletionSummary, DecodePolicy, IngestionController, SessionConfig,
    SessionEvent, SessionObserver, SessionOutcome, SessionState,
};
pub use transport::{ChunkSource, ConsultaRequest, CorrectionBasis, StreamChunks, Transport};

#[cfg(feature = "http")]
pub use http::HttpTransport;
