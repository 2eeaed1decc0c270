//! # natlink STUN
//!
//! Wire layer for natlink's NAT traversal.
//!
//! This crate provides:
//! - Bit-exact encoding of STUN Binding Requests (RFC 5389 subset)
//! - Decoding of Binding Success Responses into a mapped IPv4 address
//! - A UDP client that performs one Binding exchange per query
//!
//! Only MAPPED-ADDRESS and XOR-MAPPED-ADDRESS are interpreted. MESSAGE-INTEGRITY,
//! FINGERPRINT and IPv6 are out of scope.
//!
//! ## Example
//!
//! ```rust,no_run
//! use natlink_stun::{StunClient, StunServerAddress, DEFAULT_TIMEOUT};
//!
//! # async fn demo() -> Result<(), natlink_stun::StunError> {
//! let client = StunClient::bind_port(0).await?;
//! let server: StunServerAddress = "stun.l.google.com:19302".parse().unwrap();
//! let mapped = client.query(&server, DEFAULT_TIMEOUT).await?;
//! println!("public endpoint: {mapped}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod codec;
pub mod error;

pub use client::{DEFAULT_TIMEOUT, StunClient, StunServerAddress};
pub use codec::{
    ATTR_MAPPED_ADDRESS, ATTR_XOR_MAPPED_ADDRESS, AddressAttribute, AddressFamily,
    BINDING_ERROR, BINDING_REQUEST, BINDING_SUCCESS, HEADER_SIZE, MAGIC_COOKIE, MappedAddress,
    MessageType, RawAttribute, StunMessage, TransactionId, decode_binding_response,
    encode_binding_request, encode_binding_success,
};
pub use error::{InvalidServerAddress, StunError};
