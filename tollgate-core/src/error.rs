//! Error types for Tollgate operations

/// Result type for Tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;

/// HTTP status codes that are worth another attempt
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Error types for the Tollgate runtime
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    /// Missing or invalid setup, e.g. no model provider configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model backend transport or parse failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Unknown tool, tool failure, tool timeout or missing argument
    #[error("Tool error: {0}")]
    Tool(String),

    /// Content filter violation
    #[error("Safety error: {0}")]
    Safety(String),

    /// Schema validation failure or no conforming structured output
    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    /// Session repository consistency violation
    #[error("Session error: {0}")]
    Session(String),

    /// No matching agent in a multi-agent composition
    #[error("Routing error: {0}")]
    Routing(String),

    /// Malformed JSON-RPC traffic
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// HTTP-backed operation returned a failure status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (connection reset, DNS, broken pipe)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failure the operation itself marked as transient
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Circuit breaker refused the request
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Conversation store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl TollgateError {
    /// Whether a retry policy should attempt the operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            TollgateError::Retryable(_) | TollgateError::Transport(_) => true,
            TollgateError::Http { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    /// Surface a model-call failure as a provider error.
    ///
    /// Errors that already carry a caller-facing category (tool, safety,
    /// structured output, configuration) pass through untouched.
    pub fn into_provider(self) -> Self {
        match self {
            e @ (TollgateError::Provider(_)
            | TollgateError::Tool(_)
            | TollgateError::Safety(_)
            | TollgateError::StructuredOutput(_)
            | TollgateError::Configuration(_)) => e,
            other => TollgateError::Provider(other.to_string()),
        }
    }

    /// Wrap any failure raised while invoking a tool, keeping its message
    pub fn into_tool(self) -> Self {
        match self {
            e @ (TollgateError::Tool(_) | TollgateError::StructuredOutput(_)) => e,
            other => TollgateError::Tool(other.to_string()),
        }
    }
}

impl From<String> for TollgateError {
    fn from(s: String) -> Self {
        TollgateError::Other(s)
    }
}

impl From<&str> for TollgateError {
    fn from(s: &str) -> Self {
        TollgateError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for TollgateError {
    fn from(err: anyhow::Error) -> Self {
        TollgateError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TollgateError::Retryable("flaky".into()).is_retryable());
        assert!(TollgateError::Transport("reset".into()).is_retryable());
        for status in RETRYABLE_STATUS_CODES {
            let err = TollgateError::Http {
                status,
                message: "x".into(),
            };
            assert!(err.is_retryable(), "{status} should retry");
        }
        let bad_request = TollgateError::Http {
            status: 400,
            message: "bad".into(),
        };
        assert!(!bad_request.is_retryable());
        assert!(!TollgateError::Provider("nope".into()).is_retryable());
        assert!(!TollgateError::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_into_provider_keeps_message() {
        let err = TollgateError::Transport("connection reset".into()).into_provider();
        match err {
            TollgateError::Provider(msg) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected {other:?}"),
        }

        let open = TollgateError::CircuitOpen.into_provider();
        assert!(matches!(open, TollgateError::Provider(ref m) if m.contains("open")));
    }

    #[test]
    fn test_into_tool_wraps_once() {
        let wrapped = TollgateError::Other("boom".into()).into_tool();
        assert_eq!(wrapped.to_string(), "Tool error: boom");

        let already = TollgateError::Tool("boom".into()).into_tool();
        assert_eq!(already.to_string(), "Tool error: boom");
    }
}
