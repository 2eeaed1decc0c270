//! Error types for STUN encoding, decoding and queries.

use std::time::Duration;
use thiserror::Error;

/// STUN error types
#[derive(Debug, Error)]
pub enum StunError {
    /// Header or attribute is structurally invalid
    #[error("Malformed STUN response: {0}")]
    MalformedResponse(&'static str),

    /// Response transaction ID differs from the outstanding request
    #[error("Transaction ID mismatch")]
    TransactionMismatch,

    /// Address family other than IPv4
    #[error("Unsupported address family: {0:#04x}")]
    UnsupportedAddressFamily(u8),

    /// Neither MAPPED-ADDRESS nor XOR-MAPPED-ADDRESS present
    #[error("Missing MAPPED-ADDRESS / XOR-MAPPED-ADDRESS attribute")]
    AttributeNotFound,

    /// No response within the query timeout
    #[error("STUN query timeout after {0:?}")]
    Timeout(Duration),

    /// Server host name did not resolve to an IPv4 address
    #[error("Cannot resolve STUN server {0} to an IPv4 address")]
    Resolve(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StunError {
    /// Whether the error came from the wire format rather than the network
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse(_)
                | Self::TransactionMismatch
                | Self::UnsupportedAddressFamily(_)
                | Self::AttributeNotFound
        )
    }
}

/// A STUN server string that is not `host:port`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid STUN server address '{0}' (expected host:port)")]
pub struct InvalidServerAddress(pub String);
