use thiserror::Error;

/// Error type for every upstream call (JSON-RPC, REST, quote)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UpstreamError {
    /// Upstream signalled rate limiting (HTTP 429 or a rate-limit marker)
    #[error("Rate limit exceeded (endpoint: {endpoint}): {message}")]
    RateLimited { endpoint: String, message: String },

    /// Non-2xx HTTP status other than 429
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// JSON-RPC `error` object in an otherwise successful response
    #[error("RPC error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// Connection, DNS, TLS or timeout failure
    #[error("Transport error (endpoint: {endpoint}): {message}")]
    Transport { endpoint: String, message: String },

    /// Response arrived but did not have the expected shape
    #[error("Malformed response from {context}: {message}")]
    Malformed { context: String, message: String },

    /// Caller supplied an address that is not a valid public key
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The queued call was dropped before it produced a result
    #[error("Call cancelled before completion")]
    Cancelled,
}

impl UpstreamError {
    /// Classify a JSON-RPC error object. Some providers report throttling as
    /// an RPC error instead of a 429 status.
    pub fn from_rpc_error(method: &str, code: i64, message: &str) -> Self {
        if code == 429 || is_rate_limit_message(message) {
            UpstreamError::RateLimited {
                endpoint: method.to_string(),
                message: message.to_string(),
            }
        } else {
            UpstreamError::Rpc {
                method: method.to_string(),
                code,
                message: message.to_string(),
            }
        }
    }

    /// Classify a non-2xx HTTP response
    pub fn from_status(endpoint: &str, status: u16, body: String) -> Self {
        if status == 429 || is_rate_limit_message(&body) {
            UpstreamError::RateLimited {
                endpoint: endpoint.to_string(),
                message: body,
            }
        } else {
            UpstreamError::Http {
                endpoint: endpoint.to_string(),
                status,
                body,
            }
        }
    }

    pub fn malformed(context: &str, message: impl Into<String>) -> Self {
        UpstreamError::Malformed {
            context: context.to_string(),
            message: message.into(),
        }
    }

    /// Default rate-limit detector used by the retry policy
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }

    /// Whether re-executing the same call can plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::RateLimited { .. } => true,
            UpstreamError::Http { .. } => true,
            UpstreamError::Rpc { .. } => true,
            UpstreamError::Transport { .. } => true,

            UpstreamError::Malformed { .. } => false,
            UpstreamError::InvalidAddress(_) => false,
            UpstreamError::Cancelled => false,
        }
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests")
}
