use serde::{Deserialize, Serialize};

/// Coarse category of a failure, when the caller knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    Authentication,
    Validation,
    Other,
}

/// Failure as seen by the recovery classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescription {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDescription {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }
}

impl From<&anyhow::Error> for ErrorDescription {
    fn from(err: &anyhow::Error) -> Self {
        // `{:#}` includes the whole context chain.
        Self::other(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recoverability {
    Recoverable,
    Fatal,
}

impl Recoverability {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Recoverability::Recoverable)
    }
}

/// Case-insensitive substrings that mark a transient failure.
const TRANSIENT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "429",
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "econnrefused",
    "connection reset",
    "connection refused",
    "socket hang up",
    "enotfound",
    "eai_again",
    "getaddrinfo",
    "dns",
    "503",
    "502",
    "service unavailable",
    "temporarily unavailable",
    "overloaded",
];

/// Decide whether a failed operation is worth retrying.
///
/// Authentication and validation failures are always fatal. Known transient
/// kinds are recoverable. Anything else is recoverable only if its message
/// matches a transient pattern.
pub fn classify(err: &ErrorDescription) -> Recoverability {
    match err.kind {
        ErrorKind::Authentication | ErrorKind::Validation => Recoverability::Fatal,
        ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited => {
            Recoverability::Recoverable
        }
        ErrorKind::Other => {
            let message = err.message.to_lowercase();
            if TRANSIENT_PATTERNS.iter().any(|p| message.contains(p)) {
                Recoverability::Recoverable
            } else {
                Recoverability::Fatal
            }
        }
    }
}
