//! Error types for the relay core.
use std::error::Error as StdError;
use std::fmt;

/// Top-level relay error. Mirrors the error shape used across the workspace:
/// a kind that callers map to responses, plus an optional source.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The broadcaster identifier in a subscribe request is unusable.
    InvalidKey(InvalidKeyKind),
    /// The pool has been shut down and accepts no new subscribers.
    ShuttingDown,
}

#[derive(Debug, PartialEq)]
pub enum InvalidKeyKind {
    Empty,
    /// Holds the identifier as it was supplied.
    Malformed(String),
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::InvalidKey(InvalidKeyKind::Empty) => write!(f, "missing broadcaster"),
            ErrorKind::InvalidKey(InvalidKeyKind::Malformed(raw)) => {
                write!(f, "invalid broadcaster {raw:?}")
            }
            ErrorKind::ShuttingDown => write!(f, "relay is shutting down"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
