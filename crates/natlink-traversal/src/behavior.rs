//! NAT behavior data model
//!
//! Mapping and filtering follow RFC 4787/5780 terminology; the resulting
//! [`NatType`] uses the classic RFC 3489 names callers reason about.

use natlink_stun::MappedAddress;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::time::Instant;

/// Mapping or filtering behavior of a NAT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Behavior {
    /// No translation at all
    Direct,
    /// Same mapping/filter regardless of remote endpoint
    EndpointIndependent,
    /// Depends on the remote IP address
    AddressDependent,
    /// Depends on the remote IP address and port
    AddressAndPortDependent,
    /// Not determined
    Unknown,
}

/// Mapping behavior (how external ports are assigned)
pub type MappingBehavior = Behavior;

/// Filtering behavior (which inbound packets are let through)
pub type FilteringBehavior = Behavior;

/// NAT type classification
///
/// Different NAT types require different traversal strategies:
/// - Open: No NAT, direct connection possible
/// - Full Cone: Easy to traverse, any external host can send
/// - Restricted: Requires simultaneous open from the contacted IP
/// - Port Restricted: Requires simultaneous open from the contacted IP:port
/// - Symmetric: Port guessing or relay
/// - Blocked: No STUN server reachable, UDP is likely filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NatType {
    /// No NAT detected, public IP address
    Open,
    /// Full Cone NAT
    FullCone,
    /// Restricted Cone NAT
    Restricted,
    /// Port Restricted Cone NAT
    PortRestricted,
    /// Symmetric NAT
    Symmetric,
    /// No STUN server answered
    Blocked,
    /// Evidence was insufficient
    Unknown,
}

impl NatType {
    /// Every variant, in order of increasing traversal difficulty
    pub const ALL: [Self; 7] = [
        Self::Open,
        Self::FullCone,
        Self::Restricted,
        Self::PortRestricted,
        Self::Symmetric,
        Self::Unknown,
        Self::Blocked,
    ];

    /// Symmetric, or a type that must be treated like one
    #[must_use]
    pub const fn is_symmetric_like(self) -> bool {
        matches!(self, Self::Symmetric | Self::Unknown | Self::Blocked)
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Open (No NAT)"),
            Self::FullCone => write!(f, "Full Cone NAT"),
            Self::Restricted => write!(f, "Restricted Cone NAT"),
            Self::PortRestricted => write!(f, "Port Restricted Cone NAT"),
            Self::Symmetric => write!(f, "Symmetric NAT"),
            Self::Blocked => write!(f, "Blocked (UDP unavailable)"),
            Self::Unknown => write!(f, "Unknown NAT Type"),
        }
    }
}

/// Unrecognized NAT type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown NAT type '{0}' (expected open, full-cone, restricted, port-restricted, symmetric, blocked or unknown)")]
pub struct ParseNatTypeError(String);

impl FromStr for NatType {
    type Err = ParseNatTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "open" => Ok(Self::Open),
            "full-cone" | "fullcone" => Ok(Self::FullCone),
            "restricted" | "restricted-cone" => Ok(Self::Restricted),
            "port-restricted" | "portrestricted" | "port-restricted-cone" => {
                Ok(Self::PortRestricted)
            }
            "symmetric" => Ok(Self::Symmetric),
            "blocked" => Ok(Self::Blocked),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseNatTypeError(s.to_string())),
        }
    }
}

/// Full NAT behavior: mapping, filtering and the derived type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NatBehavior {
    /// How external ports are assigned
    pub mapping: MappingBehavior,
    /// Which inbound packets pass
    pub filtering: FilteringBehavior,
    /// Derived classification
    pub nat_type: NatType,
}

impl NatBehavior {
    /// Behavior for a host with a public address
    #[must_use]
    pub const fn open() -> Self {
        Self {
            mapping: Behavior::Direct,
            filtering: Behavior::EndpointIndependent,
            nat_type: NatType::Open,
        }
    }

    /// Behavior when no STUN server answered
    #[must_use]
    pub const fn blocked() -> Self {
        Self {
            mapping: Behavior::Unknown,
            filtering: Behavior::Unknown,
            nat_type: NatType::Blocked,
        }
    }

    /// Behavior known only by type, as reported out of band by a peer
    #[must_use]
    pub const fn from_nat_type(nat_type: NatType) -> Self {
        let (mapping, filtering) = match nat_type {
            NatType::Open => (Behavior::Direct, Behavior::EndpointIndependent),
            NatType::FullCone => (Behavior::EndpointIndependent, Behavior::EndpointIndependent),
            NatType::Restricted => (Behavior::AddressDependent, Behavior::AddressDependent),
            NatType::PortRestricted => (
                Behavior::AddressAndPortDependent,
                Behavior::AddressAndPortDependent,
            ),
            NatType::Symmetric => (Behavior::AddressAndPortDependent, Behavior::Unknown),
            NatType::Blocked | NatType::Unknown => (Behavior::Unknown, Behavior::Unknown),
        };
        Self {
            mapping,
            filtering,
            nat_type,
        }
    }
}

/// Remote peer NAT behavior, received out of band
pub type PeerNatInfo = NatBehavior;

/// How the filtering value was arrived at
///
/// No cooperating RFC 5780 server is assumed, so filtering is never measured
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilteringBasis {
    /// Inferred from mapping probes that agreed across servers
    Inferred,
    /// No inference possible, conservative default applied
    ConservativeDefault,
    /// Destination-dependent mapping hides filtering entirely
    Unobservable,
}

/// Local socket choice for a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocalBinding {
    /// Fresh ephemeral port
    Ephemeral,
    /// Specific local port
    Port(u16),
}

/// Which classification step issued a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeStep {
    /// Baseline probe walking the server list
    Reachability,
    /// Same server, different local port
    SameServerNewPort,
    /// Different server, baseline local port
    AlternateServer,
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProbeOutcome {
    /// Server reported this mapping
    Mapped(MappedAddress),
    /// Query failed
    Failed(String),
}

/// One probe in the evidence trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeRecord {
    /// Issuing step
    pub step: ProbeStep,
    /// Server queried (`host:port`)
    pub server: String,
    /// Local socket choice
    pub binding: LocalBinding,
    /// What happened
    pub outcome: ProbeOutcome,
}

/// Diagnostic record attached to every classification
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evidence {
    /// Every probe, in issue order
    pub probes: Vec<ProbeRecord>,
    /// Local address of the baseline probe
    pub local: Option<SocketAddr>,
    /// Server that answered the baseline probe
    pub responding_server: Option<String>,
    /// No configured server was reachable
    pub network_unavailable: bool,
    /// How filtering was decided
    pub filtering_basis: Option<FilteringBasis>,
    /// Free-form notes
    pub notes: Vec<String>,
}

impl Evidence {
    pub(crate) fn record(
        &mut self,
        step: ProbeStep,
        server: &impl fmt::Display,
        binding: LocalBinding,
        outcome: ProbeOutcome,
    ) {
        self.probes.push(ProbeRecord {
            step,
            server: server.to_string(),
            binding,
            outcome,
        });
    }

    pub(crate) fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Outcome of one classification pass
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    /// Classified behavior
    pub behavior: NatBehavior,
    /// Public endpoint from the baseline probe
    pub public_endpoint: Option<MappedAddress>,
    /// When the classification finished
    #[serde(skip)]
    pub determined_at: Instant,
    /// How the classification was reached
    pub evidence: Evidence,
}

impl DetectionResult {
    /// NAT type shortcut
    #[must_use]
    pub fn nat_type(&self) -> NatType {
        self.behavior.nat_type
    }

    /// Whether the result is younger than `ttl`
    #[must_use]
    pub fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        self.determined_at.elapsed() < ttl
    }
}
