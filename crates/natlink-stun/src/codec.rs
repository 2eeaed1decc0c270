//! STUN Binding codec (RFC 5389 subset)
//!
//! Pure encoding and decoding of the two messages natlink exchanges with a STUN
//! server: the fixed 20-byte Binding Request and the Binding Success Response.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0 0|     STUN Message Type     |         Message Length        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Magic Cookie                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Transaction ID (96 bits)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Only IPv4 mapped addresses are supported. Outgoing requests never carry
//! attributes.

use crate::error::StunError;
use rand::RngCore;
use serde::Serialize;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// STUN magic cookie (0x2112A442)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Binding Request message type
pub const BINDING_REQUEST: u16 = 0x0001;
/// Binding Success Response message type
pub const BINDING_SUCCESS: u16 = 0x0101;
/// Binding Error Response message type
pub const BINDING_ERROR: u16 = 0x0111;

/// MAPPED-ADDRESS attribute type
pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
/// XOR-MAPPED-ADDRESS attribute type
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_IPV4: u8 = 0x01;

/// 96-bit STUN transaction ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate a fresh random transaction ID
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// STUN message type (Binding method only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Binding request
    BindingRequest,
    /// Binding success response
    BindingSuccess,
    /// Binding error response
    BindingError,
}

impl MessageType {
    /// 16-bit wire value
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::BindingRequest => BINDING_REQUEST,
            Self::BindingSuccess => BINDING_SUCCESS,
            Self::BindingError => BINDING_ERROR,
        }
    }

    /// Parse a 16-bit wire value
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            BINDING_REQUEST => Some(Self::BindingRequest),
            BINDING_SUCCESS => Some(Self::BindingSuccess),
            BINDING_ERROR => Some(Self::BindingError),
            _ => None,
        }
    }
}

/// Address family of a mapped address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressFamily {
    /// IPv4 (family byte 0x01), the only supported value
    Ipv4,
}

/// Server reflexive address reported by a STUN server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MappedAddress {
    /// Public IPv4 address
    pub ip: Ipv4Addr,
    /// Public port
    pub port: u16,
}

impl MappedAddress {
    /// Create a mapped address
    #[must_use]
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Address family (always IPv4)
    #[must_use]
    pub const fn family(&self) -> AddressFamily {
        AddressFamily::Ipv4
    }

    /// As a V4 socket address
    #[must_use]
    pub const fn socket_addr_v4(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }

    /// As a generic socket address
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.socket_addr_v4())
    }
}

impl From<SocketAddrV4> for MappedAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl fmt::Display for MappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Which address attribute a success response carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressAttribute {
    /// XOR-MAPPED-ADDRESS (0x0020)
    XorMapped,
    /// MAPPED-ADDRESS (0x0001)
    Mapped,
}

/// Raw TLV attribute, value without padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Attribute type
    pub attr_type: u16,
    /// Attribute value
    pub value: Vec<u8>,
}

/// Parsed STUN message: header plus ordered raw attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type
    pub message_type: MessageType,
    /// Transaction ID
    pub transaction_id: TransactionId,
    /// Attributes in wire order
    pub attributes: Vec<RawAttribute>,
}

impl StunMessage {
    /// Parse any Binding message
    ///
    /// # Errors
    ///
    /// Returns `MalformedResponse` if the header is short, the cookie is wrong,
    /// the message type is not a Binding type, or an attribute overruns the buffer.
    pub fn parse(bytes: &[u8]) -> Result<Self, StunError> {
        let header = Header::read(bytes)?;
        if header.magic_cookie != MAGIC_COOKIE {
            return Err(StunError::MalformedResponse("bad magic cookie"));
        }
        let message_type = MessageType::from_code(header.message_type)
            .ok_or(StunError::MalformedResponse("unknown message type"))?;

        let attributes = Attributes::new(bytes)
            .map(|attr| {
                attr.map(|(attr_type, value)| RawAttribute {
                    attr_type,
                    value: value.to_vec(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            message_type,
            transaction_id: header.transaction_id,
            attributes,
        })
    }

    /// First attribute of the given type
    #[must_use]
    pub fn attribute(&self, attr_type: u16) -> Option<&RawAttribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }
}

/// Encode a Binding Request: type 0x0001, length 0, cookie, transaction ID
#[must_use]
pub fn encode_binding_request(transaction_id: &TransactionId) -> [u8; HEADER_SIZE] {
    let mut bytes = [0u8; HEADER_SIZE];
    bytes[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // bytes[2..4]: message length stays zero, no attributes
    bytes[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    bytes[8..20].copy_from_slice(transaction_id.as_bytes());
    bytes
}

/// Encode a Binding Success Response carrying one address attribute
///
/// This is the server side of the exchange; natlink uses it for loopback
/// responders and tests.
#[must_use]
pub fn encode_binding_success(
    transaction_id: &TransactionId,
    mapped: MappedAddress,
    attribute: AddressAttribute,
) -> Vec<u8> {
    let (attr_type, port, ip) = match attribute {
        AddressAttribute::XorMapped => {
            let cookie = MAGIC_COOKIE.to_be_bytes();
            let mut ip = mapped.ip.octets();
            for (octet, key) in ip.iter_mut().zip(cookie) {
                *octet ^= key;
            }
            (
                ATTR_XOR_MAPPED_ADDRESS,
                mapped.port ^ (MAGIC_COOKIE >> 16) as u16,
                ip,
            )
        }
        AddressAttribute::Mapped => (ATTR_MAPPED_ADDRESS, mapped.port, mapped.ip.octets()),
    };

    let mut bytes = Vec::with_capacity(HEADER_SIZE + 12);
    bytes.extend_from_slice(&BINDING_SUCCESS.to_be_bytes());
    bytes.extend_from_slice(&12u16.to_be_bytes());
    bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    bytes.extend_from_slice(transaction_id.as_bytes());

    bytes.extend_from_slice(&attr_type.to_be_bytes());
    bytes.extend_from_slice(&8u16.to_be_bytes());
    bytes.push(0); // Reserved
    bytes.push(FAMILY_IPV4);
    bytes.extend_from_slice(&port.to_be_bytes());
    bytes.extend_from_slice(&ip);
    bytes
}

/// Decode a Binding Success Response into the mapped address
///
/// XOR-MAPPED-ADDRESS is preferred when both address attributes are present.
///
/// # Errors
///
/// - `MalformedResponse`: fewer than 20 bytes, not a Binding Success, bad magic
///   cookie, or an attribute that overruns the message
/// - `TransactionMismatch`: transaction ID differs from `expected`
/// - `UnsupportedAddressFamily`: the address attribute is not IPv4
/// - `AttributeNotFound`: no address attribute present
pub fn decode_binding_response(
    bytes: &[u8],
    expected: &TransactionId,
) -> Result<MappedAddress, StunError> {
    let header = Header::read(bytes)?;

    if header.message_type != BINDING_SUCCESS {
        return Err(StunError::MalformedResponse("not a binding success response"));
    }
    if header.magic_cookie != MAGIC_COOKIE {
        return Err(StunError::MalformedResponse("bad magic cookie"));
    }
    if header.transaction_id != *expected {
        return Err(StunError::TransactionMismatch);
    }

    let mut mapped = None;
    for attr in Attributes::new(bytes) {
        let (attr_type, value) = attr?;
        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => return decode_address(value, true),
            ATTR_MAPPED_ADDRESS if mapped.is_none() => mapped = Some(value),
            _ => {}
        }
    }

    match mapped {
        Some(value) => decode_address(value, false),
        None => Err(StunError::AttributeNotFound),
    }
}

/// Decode the value of a (XOR-)MAPPED-ADDRESS attribute
fn decode_address(value: &[u8], xor: bool) -> Result<MappedAddress, StunError> {
    if value.len() < 4 {
        return Err(StunError::MalformedResponse("address attribute too short"));
    }

    let family = value[1];
    if family != FAMILY_IPV4 {
        return Err(StunError::UnsupportedAddressFamily(family));
    }
    if value.len() < 8 {
        return Err(StunError::MalformedResponse("IPv4 address attribute too short"));
    }

    let mut port = u16::from_be_bytes([value[2], value[3]]);
    let mut ip = [value[4], value[5], value[6], value[7]];

    if xor {
        port ^= (MAGIC_COOKIE >> 16) as u16;
        for (octet, key) in ip.iter_mut().zip(MAGIC_COOKIE.to_be_bytes()) {
            *octet ^= key;
        }
    }

    Ok(MappedAddress::new(Ipv4Addr::from(ip), port))
}

/// Fixed 20-byte header
struct Header {
    message_type: u16,
    magic_cookie: u32,
    transaction_id: TransactionId,
}

impl Header {
    /// Only the length is checked here; callers validate fields in their own order
    fn read(bytes: &[u8]) -> Result<Self, StunError> {
        if bytes.len() < HEADER_SIZE {
            return Err(StunError::MalformedResponse("message shorter than 20-byte header"));
        }

        let message_type = u16::from_be_bytes([bytes[0], bytes[1]]);
        let magic_cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&bytes[8..20]);

        Ok(Self {
            message_type,
            magic_cookie,
            transaction_id: TransactionId::from_bytes(transaction_id),
        })
    }
}

/// Iterator over `(type, value)` pairs starting at offset 20
///
/// The walk is bounded by the datagram, not the header length field. Fewer
/// than four trailing bytes end the walk; a declared length running past the
/// datagram is malformed.
struct Attributes<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Attributes<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: HEADER_SIZE,
            done: false,
        }
    }
}

impl<'a> Iterator for Attributes<'a> {
    type Item = Result<(u16, &'a [u8]), StunError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + 4 > self.bytes.len() {
            return None;
        }

        let at = self.offset;
        let attr_type = u16::from_be_bytes([self.bytes[at], self.bytes[at + 1]]);
        let attr_length = u16::from_be_bytes([self.bytes[at + 2], self.bytes[at + 3]]) as usize;

        let start = at + 4;
        let end = start + attr_length;
        if end > self.bytes.len() {
            self.done = true;
            return Some(Err(StunError::MalformedResponse(
                "attribute length overruns message",
            )));
        }

        // Skip padding to 4-byte boundary
        let padding = (4 - (attr_length % 4)) % 4;
        self.offset = end + padding;

        Some(Ok((attr_type, &self.bytes[start..end])))
    }
}
