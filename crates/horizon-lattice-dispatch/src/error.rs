//! Error types for Horizon Lattice dispatch.
//!
//! Most operations in this crate are infallible by construction: removing an
//! unknown handle simply reports `false`, and waiting on a queue reports
//! whether events became available. The `try_*` variants surface those
//! outcomes as [`DispatchError`] for callers that prefer `?` propagation.

use std::time::Duration;

/// Errors reported by callback lists, dispatchers and queues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The handle does not name a live callback in this list.
    ///
    /// Either it was already removed, or it was never issued by this list.
    #[error("handle does not refer to a live callback")]
    StaleHandle,

    /// No listener list has ever been created for the requested event.
    #[error("no listeners have been registered for this event")]
    UnknownEvent,

    /// Waiting for queued events gave up before any became available.
    #[error("timed out after {0:?} waiting for queued events")]
    Timeout(Duration),
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DispatchError::StaleHandle.to_string(),
            "handle does not refer to a live callback"
        );
        assert_eq!(
            DispatchError::UnknownEvent.to_string(),
            "no listeners have been registered for this event"
        );
        assert_eq!(
            DispatchError::Timeout(Duration::from_millis(5)).to_string(),
            "timed out after 5ms waiting for queued events"
        );
    }

    #[test]
    fn test_error_is_std_error() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<DispatchError>();
    }
}
