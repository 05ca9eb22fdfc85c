//! HTTP transport for the consultation streaming endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use tracing::info;

use crate::error::StreamError;
use crate::transport::{ChunkSource, ConsultaRequest, StreamChunks, Transport};

pub const DEFAULT_ENDPOINT: &str = "/api/consulta/stream";

/// POSTs a [`ConsultaRequest`] and exposes the chunked SSE response body.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport for the given server base URL.
    ///
    /// `base_url` should be like `http://localhost:8000` (no trailing slash).
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Override the streaming endpoint path.
    pub fn with_endpoint(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.endpoint = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.endpoint)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &ConsultaRequest) -> Result<Box<dyn ChunkSource>, StreamError> {
        let url = self.url();

        info!(url = %url, "opening consultation stream");
        let resp = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StreamError::Server {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::new(StreamChunks::new(resp.bytes_stream().boxed())))
    }
}
