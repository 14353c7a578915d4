use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Request errors
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // Endpoint errors
    #[error("No endpoints available")]
    NoEndpointsAvailable,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // Upstream errors
    #[error("Upstream timed out")]
    UpstreamTimeout,

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    // Tunnel errors
    #[error("CONNECT failed: {0}")]
    ConnectFailed(String),

    // Lifecycle errors
    #[error("Relay is not running")]
    NotRunning,

    #[error("Relay already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Corrupt server handle at {path}: {reason}")]
    CorruptHandle { path: String, reason: String },

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RelayError::InvalidTarget(_) | RelayError::ConnectFailed(_) => StatusCode::BAD_REQUEST,

            // 413 Payload Too Large
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 502 Bad Gateway
            RelayError::NoEndpointsAvailable | RelayError::UpstreamUnreachable(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 504 Gateway Timeout
            RelayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            RelayError::InvalidEndpoint(_)
            | RelayError::NotRunning
            | RelayError::AlreadyRunning { .. }
            | RelayError::CorruptHandle { .. }
            | RelayError::Lifecycle(_)
            | RelayError::InvalidConfig(_)
            | RelayError::Io(_)
            | RelayError::Json(_)
            | RelayError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Convert from hyper errors
impl From<hyper::Error> for RelayError {
    fn from(err: hyper::Error) -> Self {
        RelayError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::InvalidEndpoint(err.to_string())
    }
}
