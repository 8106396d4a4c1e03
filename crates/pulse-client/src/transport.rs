use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};

use crate::error::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Seam between the reconnection state machine and the wire. The mock
/// implementation lives in `crate::mock`.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<ByteStream, ClientError>;
}

/// HTTP transport over a long-lived streaming GET.
pub struct HttpTransport {
    client: reqwest::Client,
    origin: String,
}

impl HttpTransport {
    /// `origin` is scheme + host (+ port), e.g. `http://127.0.0.1:9300`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            origin: origin.into(),
        }
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.origin.trim_end_matches('/'), url)
        }
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, url: &str) -> Result<ByteStream, ClientError> {
        let resp = self
            .client
            .get(self.absolute(url))
            .send()
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }

        let stream = resp
            .bytes_stream()
            .map_err(|e| ClientError::Interrupted(e.to_string()));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_are_joined_to_the_origin() {
        let transport = HttpTransport::new("http://127.0.0.1:9300/");
        assert_eq!(
            transport.absolute("/sse/?browserId=b1"),
            "http://127.0.0.1:9300/sse/?browserId=b1"
        );
        assert_eq!(
            transport.absolute("http://other/sse/"),
            "http://other/sse/"
        );
    }
}
