//! Error handling for picopdf
//!
//! Every fallible operation returns [`Error`], which pairs a typed
//! [`ErrorKind`] with a chain of context frames pushed by each layer the
//! error propagated through.

use std::fmt;
use std::io;
use std::panic::Location;
use thiserror::Error;

/// The kind of a parse or store error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("not a PDF file")]
    InvalidPdf,
    #[error("invalid cross-reference section")]
    InvalidXref,
    #[error("invalid trailer")]
    InvalidTrailer,
    #[error("invalid or missing end-of-file marker")]
    InvalidEofToken,
    #[error("invalid number")]
    InvalidNumber,
    #[error("invalid name")]
    InvalidName,
    #[error("invalid data type")]
    InvalidDataType,
    #[error("invalid object")]
    InvalidObject,
    #[error("invalid encryption dictionary")]
    InvalidEncryptionDict,
    #[error("invalid password")]
    InvalidPassword,
    #[error("unsupported font format")]
    UnsupportedFontFormat,
    #[error("object not found")]
    ObjectNotFound,
    #[error("recursion limit reached")]
    RecursionLimit,
    #[error("value out of range")]
    ValueOutOfRange,
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("internal logic error")]
    InternalLogic,
}

/// One context frame pushed while an error propagated upward
#[derive(Debug, Clone)]
pub struct Frame {
    /// Human-readable context message
    pub message: String,
    /// Source file of the layer that pushed this frame
    pub file: &'static str,
    /// Source line of the layer that pushed this frame
    pub line: u32,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.message, self.file, self.line)
    }
}

/// Error type carrying a kind plus the propagation stack
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    frames: Vec<Frame>,
}

impl Error {
    /// Create an error with no message beyond the kind itself
    #[track_caller]
    pub fn new(kind: ErrorKind) -> Self {
        let loc = Location::caller();
        Self {
            kind,
            frames: vec![Frame {
                message: kind.to_string(),
                file: loc.file(),
                line: loc.line(),
            }],
        }
    }

    /// Create an error with an initial context message
    #[track_caller]
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        let loc = Location::caller();
        Self {
            kind,
            frames: vec![Frame {
                message: message.into(),
                file: loc.file(),
                line: loc.line(),
            }],
        }
    }

    /// Push a context frame and return the error for rethrowing
    #[track_caller]
    pub fn context(mut self, message: impl Into<String>) -> Self {
        let loc = Location::caller();
        self.frames.push(Frame {
            message: message.into(),
            file: loc.file(),
            line: loc.line(),
        });
        self
    }

    /// The typed kind of this error
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The propagation stack, oldest frame first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Check the kind in one call
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frames.first() {
            Some(frame) if frame.message != self.kind.to_string() => {
                write!(f, "{}: {}", self.kind, frame.message)
            }
            _ => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    #[track_caller]
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<io::Error> for Error {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        let kind = if err.kind() == io::ErrorKind::UnexpectedEof {
            ErrorKind::UnexpectedEof
        } else {
            ErrorKind::InternalLogic
        };
        Error::with_message(kind, err.to_string())
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
