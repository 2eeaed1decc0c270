//! UDP Hole Punching
//!
//! [`PunchMachine`] is a pure state machine driven by probe ticks, received
//! datagrams, ceiling expiry and cancellation. [`HolePunchSession`] owns the UDP
//! socket and feeds the machine from real timers and I/O.
//!
//! Wire format: a probe is `NLPUNCH` followed by a big-endian `u32` sequence
//! number; the answer to a probe is `NLPUNCH_ACK` with the same sequence.

mod machine;
mod session;

pub use machine::{PunchEvent, PunchMachine, PunchState, Step, candidate_ports};
pub use session::{HolePunchOutcome, HolePunchSession, PunchCanceller};

use crate::advisor::ConnectionMethod;
use crate::behavior::NatType;
use std::fmt;

/// Probe packet marker
const PROBE_MARKER: &[u8] = b"NLPUNCH";
/// Acknowledgement packet marker
const ACK_MARKER: &[u8] = b"NLPUNCH_ACK";

/// How a session probes the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchStrategy {
    /// One handshake probe to the exact peer endpoint
    Direct,
    /// Repeated probes to the exact peer endpoint (cone-compatible peer)
    Cone,
    /// Probes across candidate ports around the peer's reported port
    SymmetricGuess,
}

impl PunchStrategy {
    /// Strategy realizing `method` against a peer of `peer_nat`
    ///
    /// A relay recommendation still yields a best-effort punching strategy;
    /// callers that do not want to try can skip the session.
    #[must_use]
    pub fn for_method(method: ConnectionMethod, peer_nat: Option<NatType>) -> Self {
        let symmetric_peer = peer_nat.is_some_and(|nat| nat == NatType::Symmetric);
        match method {
            ConnectionMethod::Direct => Self::Direct,
            ConnectionMethod::DirectWithHolePunching | ConnectionMethod::Relay => {
                if symmetric_peer {
                    Self::SymmetricGuess
                } else {
                    Self::Cone
                }
            }
        }
    }
}

impl fmt::Display for PunchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Cone => write!(f, "cone punching"),
            Self::SymmetricGuess => write!(f, "symmetric port guessing"),
        }
    }
}

/// Kind of punch datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Packet {
    Probe(u32),
    Ack(u32),
}

impl Packet {
    fn encode(self) -> Vec<u8> {
        let (marker, seq) = match self {
            Self::Probe(seq) => (PROBE_MARKER, seq),
            Self::Ack(seq) => (ACK_MARKER, seq),
        };
        let mut bytes = Vec::with_capacity(marker.len() + 4);
        bytes.extend_from_slice(marker);
        bytes.extend_from_slice(&seq.to_be_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        // ACK marker shares the probe prefix, so test it first
        if let Some(rest) = bytes.strip_prefix(ACK_MARKER) {
            return Some(Self::Ack(u32::from_be_bytes(rest.try_into().ok()?)));
        }
        let rest = bytes.strip_prefix(PROBE_MARKER)?;
        Some(Self::Probe(u32::from_be_bytes(rest.try_into().ok()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_encoding() {
        assert_eq!(Packet::Probe(7).encode(), b"NLPUNCH\x00\x00\x00\x07");
        assert_eq!(Packet::decode(&Packet::Probe(7).encode()), Some(Packet::Probe(7)));
        assert_eq!(Packet::decode(&Packet::Ack(9).encode()), Some(Packet::Ack(9)));
        assert_eq!(Packet::decode(b"NLPUNCH"), None);
        assert_eq!(Packet::decode(b"hello world"), None);
    }

    #[test]
    fn test_strategy_for_method() {
        assert_eq!(
            PunchStrategy::for_method(ConnectionMethod::Direct, Some(NatType::Symmetric)),
            PunchStrategy::Direct
        );
        assert_eq!(
            PunchStrategy::for_method(ConnectionMethod::DirectWithHolePunching, None),
            PunchStrategy::Cone
        );
        assert_eq!(
            PunchStrategy::for_method(
                ConnectionMethod::DirectWithHolePunching,
                Some(NatType::Symmetric)
            ),
            PunchStrategy::SymmetricGuess
        );
        assert_eq!(
            PunchStrategy::for_method(ConnectionMethod::Relay, Some(NatType::Symmetric)),
            PunchStrategy::SymmetricGuess
        );
        assert_eq!(
            PunchStrategy::for_method(ConnectionMethod::Relay, Some(NatType::PortRestricted)),
            PunchStrategy::Cone
        );
    }
}
