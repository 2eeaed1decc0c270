//! `NatTraversal`: the API surface exposed to the rest of a node.

use crate::advisor::{self, CompatibilityReport};
use crate::behavior::{DetectionResult, NatBehavior, NatType};
use crate::classifier::{NatClassifier, ServerProbe};
use crate::config::TraversalConfig;
use crate::error::{ConfigError, HolePunchError};
use crate::probe::{BindingProbe, UdpProbe};
use crate::punch::{HolePunchOutcome, HolePunchSession, PunchStrategy};
use crate::symmetric::{SymmetricDetector, VarianceReport};
use natlink_stun::{MappedAddress, StunServerAddress};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

/// NAT traversal facade
///
/// Owns one classifier (and therefore one cache). Share it behind an `Arc`.
pub struct NatTraversal {
    config: TraversalConfig,
    classifier: Arc<NatClassifier>,
    symmetric: SymmetricDetector,
}

impl NatTraversal {
    /// Create a facade over real UDP sockets
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration does not validate.
    pub fn new(config: TraversalConfig) -> Result<Self, ConfigError> {
        Self::with_probe(config, Arc::new(UdpProbe::new()))
    }

    /// Create a facade with a custom probe
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration does not validate.
    pub fn with_probe(
        config: TraversalConfig,
        probe: Arc<dyn BindingProbe>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let classifier = Arc::new(NatClassifier::from_config(&config, Arc::clone(&probe))?);
        let symmetric =
            SymmetricDetector::new(probe, &config.symmetric_probe, config.query_timeout());

        Ok(Self {
            config,
            classifier,
            symmetric,
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    /// Shared classifier
    #[must_use]
    pub fn classifier(&self) -> Arc<NatClassifier> {
        Arc::clone(&self.classifier)
    }

    /// Classify the local NAT, from cache unless `force_refresh`
    pub async fn detect_nat_type(&self, force_refresh: bool) -> Arc<DetectionResult> {
        self.classifier.detect(force_refresh).await
    }

    /// Classify again, bypassing the cache
    ///
    /// The previous snapshot stays readable until the new one is stored.
    pub async fn refresh(&self) -> Arc<DetectionResult> {
        self.classifier.detect(true).await
    }

    /// Public endpoint from the current classification
    pub async fn public_endpoint(&self) -> Option<MappedAddress> {
        self.detect_nat_type(false).await.public_endpoint
    }

    /// Whether a TURN relay should be prepared
    pub async fn should_use_turn(&self) -> bool {
        advisor::should_use_turn(self.detect_nat_type(false).await.as_ref())
    }

    /// Last known behavior without touching the network
    pub async fn nat_behavior(&self) -> Option<NatBehavior> {
        self.classifier
            .cache()
            .latest()
            .await
            .map(|result| result.behavior)
    }

    /// Advice for connecting to a peer with `peer` behavior (if known)
    pub async fn recommend(&self, peer: Option<&NatBehavior>) -> CompatibilityReport {
        let local = self.detect_nat_type(false).await;
        advisor::recommend(&local.behavior, peer)
    }

    /// Try to punch a path to `peer`
    ///
    /// # Errors
    ///
    /// - `RelayRequired` when the local NAT is blocked or unclassified, or
    ///   the peer reports a blocked network
    /// - any error from [`HolePunchSession::establish`]
    pub async fn establish_hole_punch(
        &self,
        peer: SocketAddrV4,
        peer_nat: Option<&NatBehavior>,
    ) -> Result<HolePunchOutcome, HolePunchError> {
        let local = self.detect_nat_type(false).await;
        let local_type = local.nat_type();

        if matches!(local_type, NatType::Blocked | NatType::Unknown) {
            return Err(HolePunchError::RelayRequired(format!(
                "local NAT is {local_type}"
            )));
        }
        if peer_nat.is_some_and(|nat| nat.nat_type == NatType::Blocked) {
            return Err(HolePunchError::RelayRequired("peer network is blocked".to_string()));
        }

        let report = advisor::recommend(&local.behavior, peer_nat);
        let strategy =
            PunchStrategy::for_method(report.recommended_method, peer_nat.map(|n| n.nat_type));
        tracing::info!(
            "Punching to {} with {} ({})",
            peer,
            strategy,
            report.notes
        );

        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        HolePunchSession::bind(bind, peer, strategy, &self.config)
            .await?
            .establish()
            .await
    }

    /// Health check of every configured STUN server
    pub async fn probe_servers(&self) -> Vec<ServerProbe> {
        self.classifier.probe_servers().await
    }

    /// Repeated-probe symmetric check against the last responding server
    ///
    /// Returns `None` when no server is configured.
    pub async fn detect_symmetric(&self) -> Option<VarianceReport> {
        let server = self.symmetric_target().await?;
        Some(self.symmetric.probe_variance(&server).await)
    }

    /// Configured TURN relays
    #[must_use]
    pub fn turn_servers(&self) -> &[String] {
        &self.config.turn_servers
    }

    async fn symmetric_target(&self) -> Option<StunServerAddress> {
        let responding = self
            .classifier
            .cache()
            .latest()
            .await
            .and_then(|result| result.evidence.responding_server.clone())
            .and_then(|server| server.parse().ok());

        responding.or_else(|| self.classifier.servers().first().cloned())
    }
}
