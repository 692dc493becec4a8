use thiserror::Error;

/// Failure taxonomy of the signal engine.
///
/// `InsufficientData` and `NoMatch` are steady-state conditions: callers turn
/// them into a `wait` status instead of aborting. `UpstreamUnavailable` is
/// isolated per instrument by the orchestrator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SignalError {
    /// Malformed, unsorted or otherwise unusable input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Fewer bars than the indicator warm-up needs.
    #[error("Insufficient data: need {required} bars, have {available}")]
    InsufficientData { required: usize, available: usize },

    /// Strike selection found nothing that passes the filters.
    #[error("No matching strike: {0}")]
    NoMatch(String),

    /// A market data call failed (network, auth, bad payload).
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl SignalError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SignalError::InvalidInput(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        SignalError::UpstreamUnavailable(msg.into())
    }

    /// True for conditions that degrade to `wait` rather than fail the caller.
    pub fn is_steady_state(&self) -> bool {
        matches!(
            self,
            SignalError::InsufficientData { .. } | SignalError::NoMatch(_)
        )
    }
}

impl From<anyhow::Error> for SignalError {
    fn from(err: anyhow::Error) -> Self {
        SignalError::UpstreamUnavailable(format!("{:#}", err))
    }
}

pub type SignalResult<T> = std::result::Result<T, SignalError>;
