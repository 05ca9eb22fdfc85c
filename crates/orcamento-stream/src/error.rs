use thiserror::Error;

/// Transport-level failures. All of them end the session.
#[derive(Error, Debug)]
pub enum StreamError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("transport read failed: {0}")]
    Read(String),
    #[error("stream ended before a completion message")]
    Truncated,
}

/// A frame whose payload could not be turned into a protocol message.
///
/// Skipped by default; see [`DecodePolicy`](crate::DecodePolicy).
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no status field")]
    MissingStatus,
    #[error("unrecognised status {0:?}")]
    UnknownStatus(String),
    #[error("malformed {status} payload: {source}")]
    Payload {
        status: String,
        source: serde_json::Error,
    },
}
