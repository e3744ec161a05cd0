//! TFTP Protocol Implementation
//!
//! This module contains the wire format of RFC 1350: opcodes, error codes,
//! the five packet kinds, and their encoding and decoding.
//!
//! # Packet Layout
//!
//! All integers are big-endian. Strings are NUL terminated.
//!
//! ```text
//! RRQ/WRQ: | 01/02 | Filename | 0 | Mode | 0 |
//! DATA:    | 03    | Block#   | Data (0..512)  |
//! ACK:     | 04    | Block#   |
//! ERROR:   | 05    | ErrorCode | ErrMsg | 0 |
//! ```
//!
//! A DATA payload shorter than [`BLOCK_SIZE`] is the only end-of-transfer
//! signal the protocol defines.

use std::fmt;

use crate::error::ParseError;

/// Fixed TFTP block size in bytes
pub const BLOCK_SIZE: usize = 512;

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Client requests to read a file from the server.
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Client requests to write a file to the server. The server answers
    /// with ACK(0) before the first DATA block.
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 |
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// Contains a 2-byte block number and up to 512 bytes of data.
    /// The last packet of a transfer contains less than 512 bytes.
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Acknowledges receipt of a data packet. Block number 0 acknowledges
    /// a write request.
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Reports an error condition and terminates the current transfer.
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(6), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert the opcode to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl From<TftpOpcode> for u16 {
    fn from(opcode: TftpOpcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined
    ///
    /// Generic error condition; also used when a peer stops responding.
    NotDefined = 0,

    /// Error code 1: File not found
    FileNotFound = 1,

    /// Error code 2: Access violation
    ///
    /// Includes filenames that resolve outside the server root.
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    ///
    /// ACK or DATA from a peer that has no transfer in progress.
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(5), Some(TftpErrorCode::UnknownTransferId));
    /// assert_eq!(TftpErrorCode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    /// Convert the error code to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl From<TftpErrorCode> for u16 {
    fn from(error_code: TftpErrorCode) -> Self {
        error_code.as_u16()
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Request (RRQ/WRQ) body
///
/// The mode string is carried as received; this server does no
/// mode-dependent translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpRequest {
    /// Requested filename
    pub filename: String,
    /// Transfer mode, e.g. "octet" or "netascii"
    pub mode: String,
}

impl TftpRequest {
    /// Create a new request body
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpRequest;
    ///
    /// let request = TftpRequest::new("boot.img", "octet");
    /// assert_eq!(request.filename, "boot.img");
    /// assert_eq!(request.mode, "octet");
    /// ```
    pub fn new(filename: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            mode: mode.into(),
        }
    }
}

/// TFTP Data packet representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpData {
    /// Block number (1-indexed, wraps at 65535)
    pub block: u16,
    /// Data payload, owned
    pub data: Vec<u8>,
}

impl TftpData {
    /// Create a new data packet
    pub fn new(block: u16, data: impl Into<Vec<u8>>) -> Self {
        Self {
            block,
            data: data.into(),
        }
    }

    /// Check if this is the last block of a transfer
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpData;
    ///
    /// assert!(TftpData::new(1, vec![0; 100]).is_last_block());
    /// assert!(TftpData::new(1, Vec::new()).is_last_block());
    /// assert!(!TftpData::new(1, vec![0; 512]).is_last_block());
    /// ```
    pub fn is_last_block(&self) -> bool {
        self.data.len() < BLOCK_SIZE
    }
}

/// TFTP ACK packet representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TftpAck {
    /// Block number being acknowledged
    pub block: u16,
}

impl TftpAck {
    /// Create a new ACK packet
    pub fn new(block: u16) -> Self {
        Self { block }
    }

    /// The ACK(0) that accepts a write request
    pub fn write_request_ack() -> Self {
        Self::new(0)
    }
}

/// TFTP Error packet representation
///
/// The code is kept as a raw u16 so that codes outside RFC 1350 sent by a
/// peer survive decoding; use [`TftpError::kind`] for the typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TftpError {
    /// Error code
    pub code: u16,
    /// Human-readable error message
    pub message: String,
}

impl TftpError {
    /// Create a new error packet with a custom message
    ///
    /// # Examples
    /// ```
    /// use tftp::{TftpError, TftpErrorCode};
    ///
    /// let error = TftpError::new(TftpErrorCode::FileNotFound, "boot.img not found");
    /// assert_eq!(error.code, 1);
    /// assert_eq!(error.kind(), Some(TftpErrorCode::FileNotFound));
    /// ```
    pub fn new(code: impl Into<u16>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a new error packet with the default message for the error code
    pub fn with_default_message(code: TftpErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Typed error code, if it is one RFC 1350 defines
    pub fn kind(&self) -> Option<TftpErrorCode> {
        TftpErrorCode::from_u16(self.code)
    }
}

impl fmt::Display for TftpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

/// A decoded TFTP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ReadRequest(TftpRequest),
    WriteRequest(TftpRequest),
    Data(TftpData),
    Ack(TftpAck),
    Error(TftpError),
}

impl Message {
    /// Opcode of this message
    pub fn opcode(&self) -> TftpOpcode {
        match self {
            Self::ReadRequest(_) => TftpOpcode::ReadRequest,
            Self::WriteRequest(_) => TftpOpcode::WriteRequest,
            Self::Data(_) => TftpOpcode::Data,
            Self::Ack(_) => TftpOpcode::Acknowledgment,
            Self::Error(_) => TftpOpcode::Error,
        }
    }

    /// Decode one datagram
    ///
    /// Bytes following the mode terminator of a request (RFC 2347 option
    /// pairs) are ignored, so clients offering options fall back to plain
    /// RFC 1350 behavior.
    ///
    /// # Examples
    /// ```
    /// use tftp::{Message, TftpAck};
    ///
    /// let message = Message::decode(&[0, 4, 0, 7]).unwrap();
    /// assert_eq!(message, Message::Ack(TftpAck::new(7)));
    ///
    /// // RRQ whose mode is missing its terminator
    /// assert!(Message::decode(b"\x00\x01file\x00octet").is_err());
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let opcode = get_opcode(buf).ok_or(ParseError::TooShort {
            expected: 2,
            actual: buf.len(),
        })?;
        let opcode = TftpOpcode::from_u16(opcode).ok_or(ParseError::UnknownOpcode(opcode))?;

        match opcode {
            TftpOpcode::ReadRequest => parse_request(buf).map(Self::ReadRequest),
            TftpOpcode::WriteRequest => parse_request(buf).map(Self::WriteRequest),
            TftpOpcode::Data => parse_data(buf).map(Self::Data),
            TftpOpcode::Acknowledgment => parse_ack(buf).map(|block| Self::Ack(TftpAck::new(block))),
            TftpOpcode::Error => parse_error(buf).map(Self::Error),
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::ReadRequest(req) => build_request(TftpOpcode::ReadRequest, &req.filename, &req.mode),
            Self::WriteRequest(req) => build_request(TftpOpcode::WriteRequest, &req.filename, &req.mode),
            Self::Data(data) => build_data(data.block, &data.data),
            Self::Ack(ack) => build_ack(ack.block),
            Self::Error(err) => build_error(err.code, &err.message),
        }
    }
}

impl From<TftpError> for Message {
    fn from(error: TftpError) -> Self {
        Self::Error(error)
    }
}

/// Find the next null byte in a buffer starting from a given position
pub fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?.iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Read a NUL-terminated string field, returning it and the index after its terminator
fn read_string(buf: &[u8], start: usize, field: &'static str) -> Result<(String, usize), ParseError> {
    let end = find_zero(buf, start).ok_or(ParseError::MissingTerminator(field))?;
    let value = std::str::from_utf8(&buf[start..end]).map_err(|_| ParseError::InvalidUtf8(field))?;
    Ok((value.to_string(), end + 1))
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), ParseError> {
    if buf.len() < expected {
        return Err(ParseError::TooShort {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Parse the body of a TFTP RRQ or WRQ packet
pub fn parse_request(buf: &[u8]) -> Result<TftpRequest, ParseError> {
    // Opcode plus two terminators
    check_len(buf, 4)?;

    let (filename, i) = read_string(buf, 2, "filename")?;
    let (mode, _) = read_string(buf, i, "mode")?;

    Ok(TftpRequest { filename, mode })
}

/// Parse a TFTP DATA packet
///
/// The payload is copied out of `buf`, so the receive buffer can be reused.
pub fn parse_data(buf: &[u8]) -> Result<TftpData, ParseError> {
    check_len(buf, 4)?;

    let payload = &buf[4..];
    if payload.len() > BLOCK_SIZE {
        return Err(ParseError::PayloadTooLarge(payload.len()));
    }

    Ok(TftpData::new(u16::from_be_bytes([buf[2], buf[3]]), payload))
}

/// Parse a TFTP ACK packet
pub fn parse_ack(buf: &[u8]) -> Result<u16, ParseError> {
    check_len(buf, 4)?;
    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}

/// Parse a TFTP Error packet
pub fn parse_error(buf: &[u8]) -> Result<TftpError, ParseError> {
    check_len(buf, 5)?;

    let code = u16::from_be_bytes([buf[2], buf[3]]);
    let (message, _) = read_string(buf, 4, "message")?;

    Ok(TftpError { code, message })
}

/// Build a TFTP RRQ/WRQ packet
pub fn build_request(opcode: TftpOpcode, filename: &str, mode: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + filename.len() + mode.len());
    v.extend_from_slice(&opcode.as_u16().to_be_bytes());
    v.extend_from_slice(filename.as_bytes());
    v.push(0);
    v.extend_from_slice(mode.as_bytes());
    v.push(0);
    v
}

/// Build a TFTP Data packet
pub fn build_data(block: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + data.len());
    v.extend_from_slice(&TftpOpcode::Data.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v.extend_from_slice(data);
    v
}

/// Build a TFTP ACK packet
pub fn build_ack(block: u16) -> Vec<u8> {
    let mut v = Vec::with_capacity(4);
    v.extend_from_slice(&TftpOpcode::Acknowledgment.as_u16().to_be_bytes());
    v.extend_from_slice(&block.to_be_bytes());
    v
}

/// Build a TFTP Error packet
pub fn build_error(code: u16, msg: &str) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + msg.len() + 1);
    v.extend_from_slice(&TftpOpcode::Error.as_u16().to_be_bytes());
    v.extend_from_slice(&code.to_be_bytes());
    v.extend_from_slice(msg.as_bytes());
    v.push(0);
    v
}

/// Get the opcode from a TFTP packet
pub fn get_opcode(buf: &[u8]) -> Option<u16> {
    if buf.len() >= 2 {
        Some(u16::from_be_bytes([buf[0], buf[1]]))
    } else {
        None
    }
}

/// Get the TFTP opcode enum from a packet buffer
pub fn get_tftp_opcode(buf: &[u8]) -> Option<TftpOpcode> {
    get_opcode(buf).and_then(TftpOpcode::from_u16)
}
