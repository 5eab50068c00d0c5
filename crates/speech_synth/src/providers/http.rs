//! HTTP synthesis backend
//!
//! POSTs the form-encoded request to the instruct endpoint and hands the
//! body back as a byte stream, so compressed audio can be decoded while it
//! is still arriving.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::ports::{SynthesisClient, SynthesisResponse};
use crate::request::SynthesisRequest;

/// Longest error body kept in `HttpStatus`
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed synthesis client
#[derive(Debug, Clone)]
pub struct HttpSynthesisClient {
    client: Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpSynthesisClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Configuration` if the configuration is
    /// invalid or the HTTP client cannot be built.
    pub fn new(config: &SynthesisConfig) -> Result<Self, SynthesisError> {
        config.validate().map_err(SynthesisError::Configuration)?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                SynthesisError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    /// Endpoint receiving synthesis requests
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every reqwest failure goes through here so timeouts carry the
    /// configured limit
    fn map_error(timeout_ms: u64, err: reqwest::Error) -> SynthesisError {
        if err.is_timeout() {
            SynthesisError::Timeout(timeout_ms)
        } else if err.is_connect() {
            SynthesisError::Network(format!("connection failed: {err}"))
        } else {
            SynthesisError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesisClient {
    #[instrument(skip(self, request), fields(url = %self.base_url, text_len = request.text().len()))]
    async fn send(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, SynthesisError> {
        let timeout_ms = self.timeout_ms;

        let response = self
            .client
            .post(&self.base_url)
            .form(&request.form_fields())
            .send()
            .await
            .map_err(|e| Self::map_error(timeout_ms, e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(SynthesisError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let format_tag = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        debug!(
            %status,
            format_tag = %format_tag,
            content_length = ?response.content_length(),
            "Synthesis response received"
        );

        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| Self::map_error(timeout_ms, e)))
            .boxed();

        Ok(SynthesisResponse::from_stream(format_tag, body))
    }
}
