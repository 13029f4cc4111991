// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fmt;

/// Errors that can be returned by volume index operations.
#[derive(Debug)]
pub enum Error {
    /// A configuration value or call argument was out of range or inconsistent.
    InvalidArgument(String),

    /// A [`crate::record::Record`] was used in a way its state does not allow
    /// (stale magic, mutation of a record that was never found, restore into
    /// an index that was never initialized).
    BadState(String),

    /// A saved stream failed a structural check on restore.
    CorruptData(String),

    /// A zone ran out of delta-list bit budget while inserting. The entry
    /// was silently dropped; the index remains usable.
    Overflow,

    /// Propagated unchanged from the underlying reader/writer.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::BadState(msg) => write!(f, "bad state: {msg}"),
            Self::CorruptData(msg) => write!(f, "corrupt data: {msg}"),
            Self::Overflow => write!(f, "zone bit budget exhausted, entry dropped"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
