//! Endpoint discovery strategies
//!
//! Router-cooperative protocols (UPnP, NAT-PMP), STUN and a local-address
//! fallback all answer the same question: which endpoint should peers use to
//! reach this node. Each is an [`EndpointDiscovery`]; a [`DiscoveryChain`] tries
//! them in order.

use crate::classifier::NatClassifier;
use crate::probe::route_ip;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

/// One way of learning the externally reachable endpoint
#[async_trait]
pub trait EndpointDiscovery: Send + Sync {
    /// Short strategy name for logs
    fn name(&self) -> &str;

    /// Discover an endpoint, `None` if this strategy does not apply
    async fn try_discover(&self) -> Option<SocketAddrV4>;
}

/// Endpoint and the strategy that found it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    /// Strategy name
    pub source: String,
    /// Endpoint
    pub endpoint: SocketAddrV4,
}

/// Ordered list of discovery strategies
#[derive(Default)]
pub struct DiscoveryChain {
    strategies: Vec<Box<dyn EndpointDiscovery>>,
}

impl DiscoveryChain {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy
    #[must_use]
    pub fn with(mut self, strategy: impl EndpointDiscovery + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Append a boxed strategy
    pub fn push(&mut self, strategy: Box<dyn EndpointDiscovery>) {
        self.strategies.push(strategy);
    }

    /// Number of strategies
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try strategies in order until one yields an endpoint
    pub async fn discover(&self) -> Option<DiscoveredEndpoint> {
        for strategy in &self.strategies {
            match strategy.try_discover().await {
                Some(endpoint) => {
                    tracing::info!("Endpoint {} discovered via {}", endpoint, strategy.name());
                    return Some(DiscoveredEndpoint {
                        source: strategy.name().to_string(),
                        endpoint,
                    });
                }
                None => tracing::debug!("Discovery strategy {} found nothing", strategy.name()),
            }
        }
        None
    }
}

/// Public endpoint from the cached STUN classification
pub struct StunDiscovery {
    classifier: Arc<NatClassifier>,
}

impl StunDiscovery {
    /// Use `classifier` (and its cache)
    #[must_use]
    pub fn new(classifier: Arc<NatClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl EndpointDiscovery for StunDiscovery {
    fn name(&self) -> &str {
        "stun"
    }

    async fn try_discover(&self) -> Option<SocketAddrV4> {
        self.classifier
            .detect(false)
            .await
            .public_endpoint
            .map(|mapped| mapped.socket_addr_v4())
    }
}

/// Local interface address with a fixed port
///
/// Last resort: only reachable on the same network or without a NAT.
pub struct LocalAddressDiscovery {
    port: u16,
    probe_target: SocketAddrV4,
}

impl LocalAddressDiscovery {
    /// Report the default-route interface address with `port`
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            probe_target: SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80),
        }
    }

    /// Choose the interface routing toward `target` instead of the default route
    #[must_use]
    pub fn toward(mut self, target: SocketAddrV4) -> Self {
        self.probe_target = target;
        self
    }
}

#[async_trait]
impl EndpointDiscovery for LocalAddressDiscovery {
    fn name(&self) -> &str {
        "local-address"
    }

    async fn try_discover(&self) -> Option<SocketAddrV4> {
        route_ip(self.probe_target)
            .await
            .map(|ip| SocketAddrV4::new(ip, self.port))
    }
}
