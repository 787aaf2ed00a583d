use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{OpCode, SessionState};

/// Failures of the byte-stream layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("peer closed the connection during {op} ({transferred} of {expected} bytes)")]
    Closed {
        op: &'static str,
        transferred: usize,
        expected: usize,
    },

    #[error("connection is not open")]
    NotConnected,

    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Failures decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("checksum mismatch: frame carries {received:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { received: u32, computed: u32 },

    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    #[error("body is {actual} bytes, opcode requires {expected}")]
    BodySize { expected: usize, actual: usize },

    #[error("obfuscation key must not be empty")]
    EmptyKey,
}

/// Everything that can end a session step.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("expected {expected}, got opcode {actual:#06x}")]
    UnexpectedOpcode { expected: &'static str, actual: u16 },

    #[error("{op} rejected by server: {message}")]
    Rejected { op: OpCode, message: String },

    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: SessionState },
}

/// Coarse error classes used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect,
    Io,
    Timeout,
    ChecksumMismatch,
    Protocol,
    ApplicationFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Io => "io",
            Self::Timeout => "timeout",
            Self::ChecksumMismatch => "checksum",
            Self::Protocol => "protocol",
            Self::ApplicationFailure => "rejected",
        };
        write!(f, "{name}")
    }
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(TransportError::Connect { .. })
            | Self::Transport(TransportError::ConnectTimeout { .. }) => ErrorKind::Connect,
            Self::Transport(TransportError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Io,
            Self::Codec(CodecError::ChecksumMismatch { .. }) => ErrorKind::ChecksumMismatch,
            Self::Codec(_) | Self::UnexpectedOpcode { .. } | Self::InvalidState { .. } => {
                ErrorKind::Protocol
            }
            Self::Rejected { .. } => ErrorKind::ApplicationFailure,
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
