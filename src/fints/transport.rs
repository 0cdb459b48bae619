use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use super::error::{FintsError, FintsResult};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Moves one encoded FinTS message to the bank and returns the raw answer
pub trait Transport {
    fn send(&self, message: &[u8]) -> FintsResult<Vec<u8>>;
}

/// FinTS PIN/TAN over HTTPS: base64 body in, base64 body out
pub struct HttpsTransport {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpsTransport {
    pub fn new(endpoint: &str) -> FintsResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(HttpsTransport {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

impl Transport for HttpsTransport {
    fn send(&self, message: &[u8]) -> FintsResult<Vec<u8>> {
        debug!(endpoint = %self.endpoint, bytes = message.len(), "sending FinTS message");

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(STANDARD.encode(message))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(FintsError::Transport(format!(
                "bank endpoint answered HTTP {}",
                status
            )));
        }

        let body = response.text()?;
        // Some servers wrap the base64 payload in line breaks
        let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        Ok(STANDARD.decode(compact)?)
    }
}
