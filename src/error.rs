//! # Error Types
//!
//! Error handling for the identity directory.
//!
//! Two layers of errors exist:
//! - [`ProtocolError`]: everything that can go wrong while decoding, encoding,
//!   configuring or serving requests.
//! - [`StorageError`]: failures reported by a persistence backend. These never
//!   abort a request cycle; the dispatcher turns them into a [`ResultCode`]
//!   carried inside a well-formed response.
//!
//! ## Example Usage
//! ```rust
//! use lorawan_storage::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn parse_port(value: &str) -> Result<u16> {
//!     value
//!         .parse::<u16>()
//!         .map_err(|e| ProtocolError::ConfigError(format!("invalid port: {e}")))
//! }
//!
//! match parse_port("4244") {
//!     Ok(port) => info!(port, "Parsed port"),
//!     Err(e) => error!(error = %e, "Bad port"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_EMPTY_PACKET: &str = "Empty packet";
    pub const ERR_BUFFER_TOO_SMALL: &str = "Destination buffer too small";
    pub const ERR_INVALID_ACTIVATION: &str = "Invalid activation type";
    pub const ERR_INVALID_DEVICE_CLASS: &str = "Invalid device class";
    pub const ERR_INVALID_ADDRESS_FAMILY: &str = "Invalid address family";

    /// Storage errors
    pub const ERR_STORE_LOCK_POISONED: &str = "Storage lock poisoned";
    pub const ERR_STORE_CLOSED: &str = "Storage closed";

    /// Transport errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_LISTENER_STOPPED: &str = "Listener stopped";
    pub const ERR_NO_RESPONSE: &str = "No response received";
}

/// Numeric result codes carried inside responses.
///
/// On the wire they are signed 32-bit integers (the `result` field of an
/// operation response stores the same bits as an unsigned value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    NotFound = -2,
    Duplicate = -3,
    Unavailable = -4,
    AccessDenied = -5,
    AddressOutOfRange = -6,
    StorageError = -7,
}

impl ResultCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Bit pattern used by the unsigned `result` field of operation responses.
    pub fn as_wire(self) -> u32 {
        self.as_i32() as u32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ResultCode::Ok),
            -2 => Some(ResultCode::NotFound),
            -3 => Some(ResultCode::Duplicate),
            -4 => Some(ResultCode::Unavailable),
            -5 => Some(ResultCode::AccessDenied),
            -6 => Some(ResultCode::AddressOutOfRange),
            -7 => Some(ResultCode::StorageError),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

/// Failure reported by an identity or gateway store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found")]
    NotFound,

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Address {addr} is outside the range of network {net_id}")]
    AddressOutOfRange { addr: String, net_id: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Result code reported to the requester.
    pub fn code(&self) -> ResultCode {
        match self {
            StorageError::NotFound => ResultCode::NotFound,
            StorageError::Duplicate(_) => ResultCode::Duplicate,
            StorageError::AddressOutOfRange { .. } => ResultCode::AddressOutOfRange,
            StorageError::Unavailable(_) => ResultCode::Unavailable,
            StorageError::Io(_) | StorageError::Serialization(_) => ResultCode::StorageError,
        }
    }
}

/// Result type used by store implementations.
pub type StoreResult<T> = std::result::Result<T, StorageError>;

// ProtocolError is the primary error type for all directory operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Empty packet")]
    EmptyPacket,

    #[error("Unknown tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("Truncated '{tag}' message: {actual} bytes, need {needed}")]
    Truncated {
        tag: char,
        needed: usize,
        actual: usize,
    },

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid URN: {0}")]
    InvalidUrn(String),

    #[error("Buffer too small: need {needed} bytes, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Timeout occurred")]
    Timeout,

    /// The server answered with a non-zero result code.
    #[error("Request rejected with result code {0}")]
    Rejected(i32),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
