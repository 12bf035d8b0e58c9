use reqwest::StatusCode;
use thiserror::Error;

/// A single `data:` frame whose payload could not be turned into an event.
#[derive(Debug, Error)]
#[error("malformed event payload: {source}")]
pub struct DecodeError {
    #[from]
    source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("server responded with {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("stream interrupted: {0}")]
    Stream(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("an exchange is already in progress")]
    Busy,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
