//! Error types for upstream sessions.
//!
//! Follows the same pattern as the other crates in the workspace: a root
//! `Error` struct holding an error kind and an optional source for chaining.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: UpstreamErrorKind,
}

/// Categories of upstream failures. None of them are fatal to the relay.
#[derive(Debug, PartialEq)]
pub enum UpstreamErrorKind {
    /// The handshake was refused or the upstream could not be reached.
    Connect,
    /// The handshake did not complete in time.
    Timeout,
    /// The upstream sent something that could not be decoded.
    Decode,
    Other(String),
}

impl Error {
    pub fn new(error_kind: UpstreamErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn with_source<E>(error_kind: UpstreamErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            source: Some(source.into()),
            error_kind,
        }
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpstreamErrorKind::Connect => write!(f, "connect failed"),
            UpstreamErrorKind::Timeout => write!(f, "connect timed out"),
            UpstreamErrorKind::Decode => write!(f, "undecodable upstream payload"),
            UpstreamErrorKind::Other(reason) => write!(f, "{reason}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.error_kind),
            None => write!(f, "{}", self.error_kind),
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
