use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised by external collaborators
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AdapterError {
    /// True when the remote side may have acted on the request even
    /// though we saw an error (timeouts, 5xx, unreadable success bodies).
    pub fn is_ambiguous(&self) -> bool {
        match self {
            AdapterError::Network(_) | AdapterError::Decode(_) => true,
            AdapterError::Http { status, .. } => *status >= 500,
            AdapterError::Rejected(_) | AdapterError::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            AdapterError::Decode(e.to_string())
        } else {
            AdapterError::Network(e.to_string())
        }
    }
}

/// Turn a non-2xx response into `AdapterError::Http`, otherwise decode JSON.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AdapterError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AdapterError::Decode(e.to_string()))
}
