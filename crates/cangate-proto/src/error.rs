//! Protocol errors

use thiserror::Error;

/// A wire frame that could not be turned into a command
///
/// Always recoverable: the frame is dropped and the connection continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("Frame is not delimited by '<' and '>'")]
    Unframed,

    #[error("Frame is not valid ASCII")]
    NotAscii,

    #[error("Frame has no command")]
    MissingCommand,

    #[error("Bus name '{0}' is longer than 6 characters")]
    BusNameTooLong(String),

    #[error("Invalid command token '{0}'")]
    InvalidCommand(String),

    #[error("Unknown command '{0}'")]
    UnknownCommand(char),

    #[error("Invalid {field} '{value}' in '{command}' command")]
    InvalidField {
        command: char,
        field: &'static str,
        value: String,
    },

    #[error("DLC {0} out of range (0..=8)")]
    DlcOutOfRange(u8),

    #[error("'{command}' command expects {expected} fields, got {found}")]
    FieldCount {
        command: char,
        expected: usize,
        found: usize,
    },
}

/// A delivery that must not be forwarded to the client
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Error frame has a wrong DLC: {0}")]
    ErrorFrameDlc(u8),

    #[error("DLC {0} out of range (0..=8)")]
    DlcOutOfRange(u8),
}
