use thiserror::Error;

/// Errors raised by the bus and the agents.
///
/// Protocol outcomes (no provider, insufficient space, corruption, ...) are not
/// errors, they travel as [`crate::contract::FailureReason`] inside responses.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("{agent} cannot handle {kind} messages")]
    UnexpectedMessage { agent: String, kind: &'static str },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, MarketError>;
