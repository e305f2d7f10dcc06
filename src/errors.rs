// Error taxonomy for AMQP client operations
//
// Covers local failures (negotiation, validation, state machine misuse),
// the AMQ soft channel error codes (the server closes the channel; the
// connection survives), and the AMQ hard error codes (the server closes
// the whole connection). Reply codes map through `Error::from_reply`.
//
// The enum is `Clone`: errors are latched by the state machinery and may
// be fanned out to several waiters, so `io::Error` is wrapped in an `Arc`.

use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::codec::CodecError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all client operations.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The client failed to negotiate a connection, usually a protocol
    /// version mismatch or a missing server capability.
    #[error("connection negotiation failed: {0}")]
    ClientNegotiation(String),

    /// The remote server closed the connection, the socket was severed,
    /// or heartbeats stopped arriving. `code` 0 means locally observed.
    #[error("connection closed: {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// The client's strict state machine was violated. Seeing this means
    /// the server misbehaved or there is a bug in this crate.
    #[error("invalid state transition: {0}")]
    StateTransition(String),

    /// tx.commit or tx.rollback invoked without a prior tx.select.
    #[error("commit or rollback invoked without a transaction")]
    NoTransaction,

    /// The connected server does not advertise the required capability.
    #[error("not supported by the server: {0}")]
    NotSupported(String),

    /// The requested behaviour is intentionally not wired up.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// An argument failed validation before anything hit the wire. The
    /// channel is unchanged.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 311: the server cannot accept content this large right now.
    #[error("content too large: {0}")]
    ContentTooLarge(String),

    /// 313: immediate delivery was requested but no consumer exists.
    #[error("no consumers: {0}")]
    NoConsumers(String),

    /// 403: authentication or authorization failure.
    #[error("access refused: {0}")]
    AccessRefused(String),

    /// 404: the named exchange or queue does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// 405: another client holds an exclusive lock on the entity.
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// 406: a precondition for the request was not met.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// 320: an operator closed the connection.
    #[error("connection forced: {0}")]
    ConnectionForced(String),

    /// 402: the virtual host is unknown.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// 501: a peer sent a frame the other could not decode.
    #[error("frame error: {0}")]
    FrameError(String),

    /// 502: a frame contained illegal values.
    #[error("syntax error: {0}")]
    SyntaxError(String),

    /// 503: an invalid sequence of frames for the current state.
    #[error("command invalid: {0}")]
    CommandInvalid(String),

    /// 504: a channel was used before being correctly opened.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// 505: an unexpected frame arrived, usually mid content group.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// 506: the server ran out of a resource.
    #[error("resource error: {0}")]
    ResourceError(String),

    /// 530: the server prohibits the attempted operation.
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// 540: the server does not implement the requested functionality.
    #[error("not implemented by the server: {0}")]
    ServerNotImplemented(String),

    /// 541: the server hit an internal error.
    #[error("internal server error: {0}")]
    InternalError(String),

    /// A frame failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An I/O error on the underlying transport.
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),

    /// The operation's deadline elapsed.
    #[error("operation timed out")]
    Timeout,
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

impl Error {
    /// Map an AMQ reply code and text to the corresponding error kind.
    ///
    /// Codes outside the specification (599 in particular, which this
    /// client synthesises for heartbeat death) fold into
    /// [`Error::ConnectionClosed`].
    pub fn from_reply(code: u16, text: &str) -> Self {
        let text = text.to_owned();
        match code {
            311 => Error::ContentTooLarge(text),
            313 => Error::NoConsumers(text),
            320 => Error::ConnectionForced(text),
            402 => Error::InvalidPath(text),
            403 => Error::AccessRefused(text),
            404 => Error::NotFound(text),
            405 => Error::ResourceLocked(text),
            406 => Error::PreconditionFailed(text),
            501 => Error::FrameError(text),
            502 => Error::SyntaxError(text),
            503 => Error::CommandInvalid(text),
            504 => Error::ChannelError(text),
            505 => Error::UnexpectedFrame(text),
            506 => Error::ResourceError(text),
            530 => Error::NotAllowed(text),
            540 => Error::ServerNotImplemented(text),
            541 => Error::InternalError(text),
            _ => Error::ConnectionClosed { code, reason: text },
        }
    }

    /// Whether a reply code names a soft (channel-scoped) error.
    pub fn is_soft_reply(code: u16) -> bool {
        matches!(code, 311 | 313 | 403 | 404 | 405 | 406)
    }

    pub(crate) fn not_connected() -> Self {
        Error::ConnectionClosed {
            code: 0,
            reason: "client is not connected".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_codes_map_to_kinds() {
        assert!(matches!(
            Error::from_reply(404, "NOT_FOUND - no queue 'q'"),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from_reply(503, "COMMAND_INVALID"),
            Error::CommandInvalid(_)
        ));
        assert!(matches!(
            Error::from_reply(599, "Too many missed heartbeats"),
            Error::ConnectionClosed { code: 599, .. }
        ));
    }

    #[test]
    fn soft_reply_classification() {
        for code in [311, 313, 403, 404, 405, 406] {
            assert!(Error::is_soft_reply(code), "{code} should be soft");
        }
        for code in [320, 402, 501, 502, 503, 504, 505, 506, 530, 540, 541] {
            assert!(!Error::is_soft_reply(code), "{code} should be hard");
        }
    }
}
