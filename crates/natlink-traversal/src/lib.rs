//! # natlink Traversal
//!
//! NAT classification and peer-to-peer path establishment for natlink nodes.
//!
//! This crate provides:
//! - NAT classification from ordered STUN probes, with a TTL cache
//! - Repeated-probe symmetric NAT detection
//! - Pure connectivity advice for a local/peer NAT pairing
//! - A hole-punching state machine and its socket-owning driver
//! - An ordered chain of endpoint discovery strategies
//!
//! ## Classification
//!
//! Classification never returns an error. When evidence is missing the result
//! degrades toward `Unknown`, and when no STUN server answers it is `Blocked`.
//! Filtering behavior is inferred, not measured, and the evidence records how.
//!
//! ## Hole punching
//!
//! Punching against symmetric NATs guesses ports around the peer's reported
//! port. It is best effort: a failure is the expected signal to relay.
//!
//! ## Example
//!
//! ```rust,no_run
//! use natlink_traversal::{NatTraversal, TraversalConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let traversal = NatTraversal::new(TraversalConfig::default())?;
//!
//! let detection = traversal.detect_nat_type(false).await;
//! println!("NAT type: {}", detection.nat_type());
//!
//! if traversal.should_use_turn().await {
//!     println!("relay via {:?}", traversal.turn_servers());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod advisor;
pub mod behavior;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod discovery;
pub mod error;
pub mod probe;
pub mod punch;
pub mod service;
pub mod symmetric;

// Re-export commonly used types
pub use advisor::{CompatibilityReport, ConnectionMethod, recommend, recommend_for_local, should_use_turn};
pub use behavior::{
    Behavior, DetectionResult, Evidence, FilteringBasis, FilteringBehavior, LocalBinding,
    MappingBehavior, NatBehavior, NatType, PeerNatInfo,
};
pub use cache::DetectionCache;
pub use classifier::{NatClassifier, ServerProbe};
pub use config::{SymmetricProbeConfig, TraversalConfig};
pub use discovery::{
    DiscoveredEndpoint, DiscoveryChain, EndpointDiscovery, LocalAddressDiscovery, StunDiscovery,
};
pub use error::{ConfigError, HolePunchError, PunchFailure};
pub use probe::{BindingProbe, BoundProbe, ProbeReply, UdpProbe};
pub use punch::{
    HolePunchOutcome, HolePunchSession, PunchCanceller, PunchEvent, PunchMachine, PunchState,
    PunchStrategy,
};
pub use service::NatTraversal;
pub use symmetric::{SymmetricDetector, SymmetricSignal, VarianceReport};
