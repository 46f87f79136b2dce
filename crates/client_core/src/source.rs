use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use shared::{domain::Quote, protocol::decode_first_quote};
use tracing::debug;

use crate::error::FetchError;

pub const DEFAULT_QUOTE_URL: &str = "https://zenquotes.io/api/random";

/// One random quote per call. Implementations never retry.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch(&self) -> Result<Quote, FetchError>;
}

pub struct HttpQuoteSource {
    http: Client,
    endpoint: String,
}

impl HttpQuoteSource {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch(&self) -> Result<Quote, FetchError> {
        let response = self
            .http
            .get(&self.endpoint)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let payload = decode_first_quote(&body)?;
        debug!(endpoint = %self.endpoint, author = ?payload.author, "fetched quote");
        Ok(payload.into())
    }
}

#[cfg(test)]
#[path = "tests/source_tests.rs"]
mod tests;
