//! Connectivity advice: pure mapping from NAT behaviors to a connection method.

use crate::behavior::{DetectionResult, NatBehavior, NatType};
use serde::Serialize;
use std::fmt;

/// How to reach a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionMethod {
    /// Plain connection, no punching
    Direct,
    /// Simultaneous outbound probing
    DirectWithHolePunching,
    /// TURN relay
    Relay,
}

impl fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::DirectWithHolePunching => write!(f, "direct with hole punching"),
            Self::Relay => write!(f, "relay"),
        }
    }
}

/// Advice for one local/peer pairing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilityReport {
    /// Whether a direct path is expected to be possible
    pub compatible: bool,
    /// Method to try
    pub recommended_method: ConnectionMethod,
    /// Estimated success probability; `None` when the peer is unknown
    pub success_probability: Option<f64>,
    /// Human-readable explanation
    pub notes: String,
}

/// Method for the local side alone
#[must_use]
pub fn recommend_for_local(nat_type: NatType) -> ConnectionMethod {
    match nat_type {
        NatType::Open | NatType::FullCone => ConnectionMethod::Direct,
        NatType::Restricted | NatType::PortRestricted => ConnectionMethod::DirectWithHolePunching,
        NatType::Symmetric | NatType::Unknown | NatType::Blocked => ConnectionMethod::Relay,
    }
}

/// Recommend a method for a local/peer pairing
///
/// Rules apply in order, first match wins. `Unknown` and `Blocked` count as
/// symmetric.
///
/// | condition | method | probability |
/// |---|---|---|
/// | both Open | Direct | 0.95 |
/// | either Open | Direct | 0.90 |
/// | either FullCone | DirectWithHolePunching | 0.85 |
/// | both symmetric | Relay | 0.10 |
/// | one symmetric | Relay | 0.30 |
/// | otherwise | DirectWithHolePunching | 0.75 |
#[must_use]
pub fn recommend(local: &NatBehavior, peer: Option<&NatBehavior>) -> CompatibilityReport {
    let Some(peer) = peer else {
        let method = recommend_for_local(local.nat_type);
        return CompatibilityReport {
            compatible: method != ConnectionMethod::Relay,
            recommended_method: method,
            success_probability: None,
            notes: format!("peer NAT unknown; local {} suggests {}", local.nat_type, method),
        };
    };

    let (l, p) = (local.nat_type, peer.nat_type);
    let either = |t: NatType| l == t || p == t;

    let (method, probability, notes) = if l == NatType::Open && p == NatType::Open {
        (ConnectionMethod::Direct, 0.95, "both sides have public addresses")
    } else if either(NatType::Open) {
        (ConnectionMethod::Direct, 0.90, "one side has a public address")
    } else if either(NatType::FullCone) {
        (
            ConnectionMethod::DirectWithHolePunching,
            0.85,
            "full cone NAT accepts inbound probes",
        )
    } else if l.is_symmetric_like() && p.is_symmetric_like() {
        (ConnectionMethod::Relay, 0.10, "both sides symmetric; port prediction unlikely")
    } else if l.is_symmetric_like() || p.is_symmetric_like() {
        (ConnectionMethod::Relay, 0.30, "one side symmetric; port guessing is best effort")
    } else {
        (
            ConnectionMethod::DirectWithHolePunching,
            0.75,
            "restricted cone pairing needs simultaneous open",
        )
    };

    CompatibilityReport {
        compatible: method != ConnectionMethod::Relay,
        recommended_method: method,
        success_probability: Some(probability),
        notes: format!("{notes} (local {l}, peer {p})"),
    }
}

/// Whether the caller should set up a TURN relay
#[must_use]
pub fn should_use_turn(detection: &DetectionResult) -> bool {
    detection.public_endpoint.is_none()
        || matches!(
            detection.behavior.nat_type,
            NatType::Symmetric | NatType::PortRestricted | NatType::Unknown | NatType::Blocked
        )
}
