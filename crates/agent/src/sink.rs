use thiserror::Error;

/// Failure of an observer-side collaborator (progress store, live channel,
/// audit log).
///
/// Hooks log these and keep going; they are never surfaced to the agent runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{sink} failed: {message}")]
pub struct SinkError {
    pub sink: &'static str,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: &'static str, message: impl Into<String>) -> Self {
        Self {
            sink,
            message: message.into(),
        }
    }
}
