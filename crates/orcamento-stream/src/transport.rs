//! Transport boundary: how a session opens the stream and reads its bytes.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// How the server applies inflation correction to monetary values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionBasis {
    #[default]
    #[serde(rename = "mensal")]
    Monthly,
    #[serde(rename = "anual")]
    Annual,
}

impl CorrectionBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "mensal",
            Self::Annual => "anual",
        }
    }
}

/// Query parameters for one consultation. Forwarded verbatim in the request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultaRequest {
    /// `MM/YYYY`
    #[serde(rename = "data_inicio")]
    pub start: String,
    /// `MM/YYYY`
    #[serde(rename = "data_fim")]
    pub end: String,
    #[serde(rename = "tipo_correcao")]
    pub correction: CorrectionBasis,
    #[serde(rename = "periodo_referencia")]
    pub reference_period: String,
}

/// A readable response body, consumed one chunk at a time.
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk of bytes, or `None` once the body is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError>;

    /// Release the underlying connection. Later reads return `None`.
    async fn close(&mut self);
}

/// Opens a consultation stream. A non-OK response must surface as an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &ConsultaRequest) -> Result<Box<dyn ChunkSource>, StreamError>;
}

/// Adapts any byte-chunk [`Stream`] into a [`ChunkSource`].
pub struct StreamChunks<S> {
    inner: Option<S>,
}

impl<S> StreamChunks<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Some(stream),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

#[async_trait]
impl<S, B, E> ChunkSource for StreamChunks<S>
where
    S: Stream<Item = Result<B, E>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
    E: Into<StreamError> + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        match inner.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes.as_ref().to_vec())),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.inner = None;
    }
}
