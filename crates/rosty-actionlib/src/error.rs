use rosty_message::MessageError;
use rosty_tcpros::TransportError;
use thiserror::Error;

/// Errors from the action layer.
///
/// State machines return errors and never log; the client and server
/// loops log transition failures and carry on with state unchanged.
#[derive(Debug, Error)]
pub enum ActionError {
    /// A prohibited (state, input) pair; the state is left unchanged.
    #[error("invalid transition: {from} does not accept {input}")]
    InvalidTransition { from: String, input: String },
    #[error("invalid goal status code {0}")]
    InvalidGoalStatus(u8),
    /// An action message missing a required sub-field or carrying the
    /// wrong shape.
    #[error("malformed action message: {0}")]
    MalformedMessage(String),
    /// Caller misuse, e.g. cancelling a goal that is already done.
    #[error("usage: {0}")]
    Usage(String),
    /// The tracked goal disappeared from the server's status stream.
    #[error("goal lost")]
    GoalLost,
    #[error("timed out")]
    Timeout,
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
