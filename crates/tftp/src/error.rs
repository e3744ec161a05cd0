//! Error types for the TFTP protocol engine.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::{TftpError, TftpErrorCode};

/// Wire-level decoding errors
///
/// A datagram that fails to decode is logged and dropped; no reply is sent
/// because its origin may be spoofed or garbled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Buffer shorter than the minimum header for its opcode
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Opcode outside 1..=5
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// A NUL-terminated field ran off the end of the packet
    #[error("{0} not terminated")]
    MissingTerminator(&'static str),

    /// A string field is not valid UTF-8
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// DATA payload larger than one block
    #[error("data payload of {0} bytes exceeds block size")]
    PayloadTooLarge(usize),
}

/// Errors that end a single transfer (or refuse to start one)
///
/// Every variant maps onto an ERROR packet through [`TransferError::to_packet`].
/// None of them is fatal to the server.
#[derive(Debug, Error)]
pub enum TransferError {
    /// RRQ target does not exist
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Filename rejected by the path policy
    #[error("access violation: {0}")]
    AccessViolation(String),

    /// WRQ target exists and overwriting is disabled
    #[error("file already exists: {0}")]
    FileExists(String),

    /// Same peer already has a transfer running in this direction
    #[error("transfer already in progress for {0}")]
    AlreadyInProgress(SocketAddr),

    /// ACK or DATA for a peer with no matching job
    #[error("unknown transfer ID {0}")]
    UnknownTransfer(SocketAddr),

    /// Retry budget spent without hearing from the peer
    #[error("peer {0} unresponsive")]
    RetriesExhausted(SocketAddr),

    /// Server is stopping and accepts no new transfers
    #[error("server shutting down")]
    ShuttingDown,

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Wire error code for this failure
    pub fn code(&self) -> TftpErrorCode {
        match self {
            Self::FileNotFound(_) => TftpErrorCode::FileNotFound,
            Self::AccessViolation(_) => TftpErrorCode::AccessViolation,
            Self::FileExists(_) => TftpErrorCode::FileAlreadyExists,
            Self::AlreadyInProgress(_) => TftpErrorCode::IllegalOperation,
            Self::UnknownTransfer(_) => TftpErrorCode::UnknownTransferId,
            Self::RetriesExhausted(_) | Self::ShuttingDown => TftpErrorCode::NotDefined,
            Self::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => TftpErrorCode::FileNotFound,
                io::ErrorKind::PermissionDenied => TftpErrorCode::AccessViolation,
                io::ErrorKind::StorageFull => TftpErrorCode::DiskFull,
                io::ErrorKind::AlreadyExists => TftpErrorCode::FileAlreadyExists,
                _ => TftpErrorCode::NotDefined,
            },
        }
    }

    /// Build the ERROR packet sent to the peer
    ///
    /// Filesystem details stay in the server log; the peer only sees the
    /// standard text for the code.
    pub fn to_packet(&self) -> TftpError {
        match self {
            Self::AlreadyInProgress(_) => TftpError::new(self.code(), "Transfer already in progress."),
            Self::UnknownTransfer(_) => TftpError::new(self.code(), "Unknown transfer ID."),
            Self::RetriesExhausted(_) => TftpError::new(self.code(), "Peer unresponsive."),
            Self::ShuttingDown => TftpError::new(self.code(), "Server shutting down."),
            _ => TftpError::with_default_message(self.code()),
        }
    }
}
