//! Protocol error types.

use thiserror::Error;

/// Errors surfaced by the transport and parsing layers.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A line exceeded the wire maximum.
    #[error("line too long: {actual} bytes (limit {limit})")]
    LineTooLong {
        /// Observed length.
        actual: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A line was not valid UTF-8.
    #[error("invalid utf-8 at byte {0}")]
    InvalidUtf8(usize),

    /// A line could not be parsed as a message.
    #[error("invalid message {string:?}: {cause}")]
    InvalidMessage {
        /// The offending line.
        string: String,
        /// Parse failure detail.
        cause: MessageParseError,
    },
}

/// Detail for message parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageParseError {
    /// The line was empty after trimming.
    #[error("empty message")]
    EmptyMessage,

    /// The command word was missing.
    #[error("missing command")]
    MissingCommand,

    /// A command was given too few parameters.
    #[error("{command} needs at least {min} parameters, got {got}")]
    NeedMoreParams {
        /// Command name.
        command: &'static str,
        /// Minimum required.
        min: usize,
        /// Received count.
        got: usize,
    },

    /// A numeric parameter did not parse.
    #[error("invalid numeric field: {0:?}")]
    InvalidNumber(String),

    /// A mode string referenced an argument that was not supplied.
    #[error("mode string exhausted its arguments")]
    ModeArgsExhausted,
}
