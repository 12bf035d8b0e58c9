use crate::error::TransportError;
use reqwest::header::ACCEPT;
use reqwest::{Client as HttpClient, Response, Url};
use std::time::Duration;

pub struct ClientConfig {
    pub base_url: String,
    /// Upper bound on a whole exchange, including the streamed body.
    pub timeout: Option<Duration>,
}

/// HTTP side of an exchange: one `POST /get_data` per prompt, answered with
/// an event stream.
#[derive(Clone)]
pub struct AgUiClient {
    base_url: String,
    http: HttpClient,
}

impl AgUiClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let mut builder = HttpClient::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(TransportError::Request)?;

        Ok(Self {
            base_url: normalize_base_url(&config.base_url),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends the prompt and returns the response once its status is known to
    /// be successful. The body has not been read yet.
    pub async fn open_stream(&self, prompt: &str) -> Result<Response, TransportError> {
        let url = stream_url(&self.base_url, prompt)?;
        tracing::debug!(%url, "opening event stream");

        let response = self
            .http
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(TransportError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        Ok(response)
    }
}

fn stream_url(base_url: &str, prompt: &str) -> Result<Url, TransportError> {
    Url::parse_with_params(&format!("{}/get_data", base_url), &[("userprompt", prompt)])
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
