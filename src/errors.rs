// Error taxonomy for the feed core
// Transport-level errors cross the FeedTransport seam; settlement failures are
// what the post lifecycle actually acts on once stale completions are filtered.

use thiserror::Error;

/// Errors surfaced by the external transport collaborators.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request was aborted at the transport level (user cancel or retry).
    #[error("request aborted")]
    Aborted,

    /// The transport's own timeout elapsed. The local settlement timer is the
    /// single authority for timeout failure, so this is never user-visible.
    #[error("request timed out")]
    Timeout,

    /// Non-2xx response from the server.
    #[error("server returned status {status}")]
    Server { status: u16 },

    /// Connection-level failure before any response arrived.
    #[error("network error: {0}")]
    Network(String),
}

/// How a pending post's submission failed to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleFailure {
    /// User canceled the post; the in-flight request was aborted.
    TransportAbort,
    /// The 10 second settlement window elapsed with no response.
    TransportTimeoutLocal,
    /// The transport reported its own timeout; the settlement timer owns
    /// timeout handling, so this one is ignored.
    TimeoutSuperseded,
    /// Server or network failure.
    ServerError,
    /// An older submission's completion arrived after a retry replaced it.
    SupersededByRetry,
}

impl SettleFailure {
    /// Suppressed failures never reach the user: the post stays as it is and
    /// no retry/cancel affordance is shown.
    pub fn suppressed(self) -> bool {
        matches!(
            self,
            SettleFailure::TransportAbort
                | SettleFailure::TimeoutSuperseded
                | SettleFailure::SupersededByRetry
        )
    }
}

impl From<&TransportError> for SettleFailure {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Aborted => SettleFailure::TransportAbort,
            TransportError::Timeout => SettleFailure::TimeoutSuperseded,
            TransportError::Server { .. } | TransportError::Network(_) => {
                SettleFailure::ServerError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborts_and_stale_timeouts_are_suppressed() {
        assert!(SettleFailure::TransportAbort.suppressed());
        assert!(SettleFailure::TimeoutSuperseded.suppressed());
        assert!(SettleFailure::SupersededByRetry.suppressed());
        assert!(!SettleFailure::TransportTimeoutLocal.suppressed());
        assert!(!SettleFailure::ServerError.suppressed());
    }

    #[test]
    fn transport_errors_map_to_settlement_kinds() {
        assert_eq!(
            SettleFailure::from(&TransportError::Aborted),
            SettleFailure::TransportAbort
        );
        assert_eq!(
            SettleFailure::from(&TransportError::Timeout),
            SettleFailure::TimeoutSuperseded
        );
        assert_eq!(
            SettleFailure::from(&TransportError::Server { status: 500 }),
            SettleFailure::ServerError
        );
        assert_eq!(
            SettleFailure::from(&TransportError::Network("connection reset".into())),
            SettleFailure::ServerError
        );
    }
}
