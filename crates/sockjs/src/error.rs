use thiserror::Error;

/// Errors surfaced by [`Session`](crate::Session) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The session is `Closing` or `Closed` and no longer moves messages
    /// in either direction.
    #[error("session not in open state")]
    SessionNotOpen,
    /// Another receiver is currently attached to the session.
    #[error("another receiver already attached to this session")]
    ReceiverAttached,
}

/// Failure to decode an inbound send-side payload.
///
/// The two variants map to the two fixed HTTP error bodies of the send
/// endpoints: an absent payload and a payload that is not a JSON array of
/// strings (or a bare JSON string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload expected")]
    Empty,
    #[error("broken JSON encoding")]
    Broken,
}

/// Returned by receiver send operations once the receiver has finished and
/// can no longer accept frames. The session treats this as "receiver is
/// dead": it detaches and keeps undelivered messages buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("receiver no longer accepts frames")]
pub struct ReceiverClosed;
