//! Error taxonomy for a deployment run.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or contradictory inputs. Raised before any remote call.
    #[error("{0}")]
    Configuration(String),

    #[error("invalid size '{input}': {reason}")]
    Parse { input: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A long-running operation finished with an error status.
    #[error("operation failed with code {code}: {message}")]
    RemoteOperation {
        code: i32,
        message: String,
        details: Vec<serde_json::Value>,
    },

    /// Non-2xx response from a REST endpoint.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        request_id: Option<String>,
        server_trace_id: Option<String>,
    },

    #[error("invalid service account credentials: {0}")]
    Credentials(String),

    #[error("operation {operation_id} did not finish within {waited_secs}s")]
    OperationTimeout { operation_id: String, waited_secs: u64 },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    /// Unbalanced section tags in a template.
    #[error("invalid template: {0}")]
    Template(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Support identifiers attached to API errors, formatted for the log.
    pub fn support_ids(&self) -> Option<String> {
        match self {
            Error::Api {
                request_id,
                server_trace_id,
                ..
            } => Some(format!(
                "x-request-id: {}\nx-server-trace-id: {}",
                request_id.as_deref().unwrap_or("-"),
                server_trace_id.as_deref().unwrap_or("-")
            )),
            _ => None,
        }
    }
}
