use std::fmt;
use std::time::Duration;

/// Errors returned by the base request/response layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (identifiers, URLs).
    #[error("validation error: {0}")]
    Validation(String),
    /// Network or stream I/O failed before a response was read.
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },
    /// Server answered with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// Response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// The caller's cancellation token fired before the request finished.
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Api {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        Self::Transport {
            message: err.to_string(),
            retryable: err.is_timeout() || err.is_connect() || err.is_body() || err.is_request(),
        }
    }

    /// Whether retrying the same request may plausibly succeed.
    ///
    /// Network blips, timeouts and `408`/`429`/`5xx` answers are transient;
    /// everything else (bad input, auth, not found, decode) is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Api { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Config(_) | Self::Validation(_) | Self::Decode(_) | Self::Cancelled => false,
        }
    }

    /// Short stable label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Transport { .. } => "transport",
            Self::Api { .. } => "api",
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors raised while opening or closing an event subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventStreamError {
    /// Subscription identifier was rejected before dialing.
    #[error("validation error: {0}")]
    Validation(String),
    /// The event endpoint could not be derived or was not accepted by the handshake layer.
    #[error("invalid event endpoint: {0}")]
    InvalidEndpoint(String),
    /// Dial or handshake failed (refused connection, rejected upgrade, TLS).
    #[error("event stream connection failed: {0}")]
    Connect(String),
    /// Handshake did not finish within the configured connect timeout.
    #[error("event stream handshake timed out after {0:?}")]
    Timeout(Duration),
    /// Sending the close frame failed.
    #[error("event stream close failed: {0}")]
    Close(String),
}

impl EventStreamError {
    /// Short stable label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::Connect(_) => "connect",
            Self::Timeout(_) => "timeout",
            Self::Close(_) => "close",
        }
    }
}

/// What went wrong on an open subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFailureKind {
    /// Reading the next frame from the socket failed.
    Read,
    /// A frame arrived but was not a valid event.
    Decode,
    /// The server closed the connection.
    ClosedByServer,
}

impl fmt::Display for StreamFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Decode => "decode",
            Self::ClosedByServer => "closed_by_server",
        })
    }
}

/// Payload of the single synthetic `error` event that ends a subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("event stream {kind} failure: {message}")]
pub struct StreamFailure {
    pub kind: StreamFailureKind,
    pub message: String,
}

impl StreamFailure {
    pub(crate) fn new(kind: StreamFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Terminal results of [`LogReader::read_chunk`](crate::LogReader::read_chunk).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogReadError {
    /// Fetch failed with a non-transient error; not retried.
    #[error("log fetch failed: {0}")]
    Fetch(ClientError),
    /// Transient fetch failures exceeded the retry budget.
    #[error("log fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ClientError },
    /// The completion predicate could not determine the job status.
    #[error("job status check failed: {0}")]
    Status(ClientError),
    /// The caller's cancellation token fired.
    #[error("log read cancelled")]
    Cancelled,
}

impl LogReadError {
    /// Short stable label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Status(_) => "status",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<LogReadError> for std::io::Error {
    fn from(value: LogReadError) -> Self {
        let kind = match &value {
            LogReadError::Fetch(ClientError::Api { status: 404, .. }) => {
                std::io::ErrorKind::NotFound
            }
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, value)
    }
}
