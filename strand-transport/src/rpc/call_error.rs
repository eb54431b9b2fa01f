//! Error type for [`super::Correlator::call`].

use super::CorrelationError;

/// Failure of a correlated call: either the request never went out, or the
/// reply did not come back.
#[derive(Debug)]
pub enum CallError<E> {
    /// Sending the request failed; the pending entry was discarded.
    Send(E),

    /// The request went out but no reply was delivered.
    Reply(CorrelationError),
}

impl<E: std::fmt::Display> std::fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Send(e) => write!(f, "send error: {}", e),
            CallError::Reply(e) => write!(f, "reply error: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CallError::Send(e) => Some(e),
            CallError::Reply(e) => Some(e),
        }
    }
}

impl<E> From<CorrelationError> for CallError<E> {
    fn from(err: CorrelationError) -> Self {
        CallError::Reply(err)
    }
}
