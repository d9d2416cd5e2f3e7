//! Error types for the negotiation handshake.

/// Errors that can end a handshake.
///
/// The type is `Clone` because one handshake outcome is shared by every
/// caller waiting on the same asset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// The remote explicitly rejected the handshake, or the asset is not
    /// offered. Not retried within the same call.
    #[error("negotiation failed: {0}")]
    Failed(String),

    /// A polling phase exhausted its attempt budget.
    #[error("negotiation timed out: {phase} did not settle after {attempts} polls")]
    Timeout { phase: &'static str, attempts: u32 },

    /// The control plane answered with an unexpected status or body shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The control plane could not be reached.
    #[error("control plane unreachable: {0}")]
    Transport(String),

    /// The task driving the handshake panicked or was cancelled.
    #[error("handshake task aborted: {0}")]
    Aborted(String),
}

impl From<reqwest::Error> for NegotiationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Protocol(format!("malformed response body: {e}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}
