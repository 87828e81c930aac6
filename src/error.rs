//! Error types for mtd-shuffler
//!
//! Errors are grouped by subsystem. Every enum carries an `is_recoverable()`
//! classifier so callers on the shuffling and rewriting paths can decide
//! between retrying, skipping, and aborting.

use std::io;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use thiserror::Error;

/// Top-level error type for mtd-shuffler
#[derive(Debug, Error)]
pub enum MtdError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Address mapping table errors
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Virtual address pool errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Packet parsing and rewriting errors
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MtdError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Mapping(e) => e.is_recoverable(),
            Self::Pool(e) => e.is_recoverable(),
            Self::Packet(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are never recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Address mapping table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// The virtual address is already assigned to another host
    #[error("Virtual address {address} is already assigned to host {owner}")]
    Collision { address: Ipv4Addr, owner: Ipv4Addr },

    /// The virtual address equals a real address in the table
    #[error("Virtual address {address} collides with a real host address")]
    RealAddressCollision { address: Ipv4Addr },

    /// No host record exists for the real address
    #[error("Unknown host: no record for real address {address}")]
    UnknownHost { address: Ipv4Addr },

    /// No host currently owns the virtual address
    #[error("Unknown virtual address: {address}")]
    UnknownVirtual { address: Ipv4Addr },

    /// A record for the real address already exists
    #[error("Duplicate host record for real address {address}")]
    DuplicateHost { address: Ipv4Addr },
}

impl MappingError {
    /// Collisions are retried with a fresh draw; lookups misses are not
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Collision { .. } | Self::RealAddressCollision { .. }
        )
    }

    /// Check if this is either kind of collision
    #[must_use]
    pub const fn is_collision(&self) -> bool {
        self.is_recoverable()
    }
}

/// Virtual address pool errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No free address was found within the retry budget
    #[error("Address pool {range} exhausted: {requested} address(es) requested, {available} free")]
    Exhausted {
        range: Ipv4Net,
        requested: usize,
        available: usize,
    },
}

impl PoolError {
    /// Exhaustion can clear up once other hosts move
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Malformed or unsupported packet errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// A read would run past the end of the buffer
    #[error("Truncated {context}: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        context: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The frame does not carry IPv4
    #[error("Not an IPv4 frame (ethertype 0x{ethertype:04x})")]
    NotIpv4 { ethertype: u16 },

    /// The IPv4 payload is not UDP
    #[error("Not a UDP packet (protocol {protocol})")]
    NotUdp { protocol: u8 },

    /// Header field carries an impossible value
    #[error("Invalid {header} header: {reason}")]
    InvalidHeader {
        header: &'static str,
        reason: String,
    },

    /// DNS message has the QR bit clear
    #[error("DNS message is a query, not a response")]
    NotResponse,

    /// Label length byte uses a reserved encoding
    #[error("Invalid DNS label byte 0x{byte:02x} at offset {offset}")]
    BadLabel { byte: u8, offset: usize },

    /// Name exceeds the label budget
    #[error("DNS name at offset {offset} exceeds {max} labels")]
    NameTooLong { offset: usize, max: usize },

    /// Resource data length does not fit the record type
    #[error("Invalid rdata length {length} for record type {rtype}")]
    BadRdata { rtype: u16, length: u16 },
}

impl PacketError {
    /// A malformed packet is dropped; retrying the same bytes cannot help
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create a truncation error
    pub const fn truncated(
        context: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    ) -> Self {
        Self::Truncated {
            context,
            offset,
            needed,
            available,
        }
    }

    /// Create an invalid header error
    pub fn invalid_header(header: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            header,
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with MtdError
pub type Result<T> = std::result::Result<T, MtdError>;
