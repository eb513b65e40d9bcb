use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected on the client before any request was sent.
    #[error("{0}")]
    Validation(String),

    /// The server answered 401. The session has already been torn down.
    #[error("Unauthorized")]
    Unauthorized { body: Option<Value> },

    #[error("request failed with status {status}")]
    Status {
        status: StatusCode,
        body: Option<Value>,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("token storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Network(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }

    /// The `error` field of the response body, else its `message` field.
    pub fn server_message(&self) -> Option<String> {
        let body = match self {
            ClientError::Unauthorized { body } | ClientError::Status { body, .. } => body.as_ref(),
            _ => None,
        }?;

        ["error", "message"]
            .iter()
            .filter_map(|field| body.get(field).and_then(Value::as_str))
            .find(|msg| !msg.trim().is_empty())
            .map(str::to_string)
    }

    /// Message to show the user: the server's own wording when there is one,
    /// validation text as-is, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ClientError::Validation(msg) => msg.clone(),
            _ => self
                .server_message()
                .unwrap_or_else(|| fallback.to_string()),
        }
    }
}
