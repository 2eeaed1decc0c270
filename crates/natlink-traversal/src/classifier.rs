//! NAT Type Classification
//!
//! Runs an ordered pipeline of binding probes and interprets each answer
//! against the baseline from the first responding server:
//!
//! 1. Cache check (skipped on forced refresh)
//! 2. Reachability: first server in order that answers becomes the baseline
//! 3. Open check: mapped address equals the local address
//! 4. Mapping: same server from a new local port, then a different server
//!    from the baseline port, which stays bound for the whole pass
//! 5. Filtering: inferred from the mapping probes, otherwise a conservative
//!    default (no RFC 5780 cooperating server is assumed)
//! 6. Table lookup `(mapping, filtering) -> NatType`
//!
//! Classification never fails. Missing evidence degrades toward `Unknown`,
//! and an unreachable server list yields `Blocked`.

use crate::behavior::{
    Behavior, DetectionResult, Evidence, FilteringBasis, LocalBinding, NatBehavior, NatType,
    ProbeOutcome, ProbeStep,
};
use crate::cache::DetectionCache;
use crate::config::TraversalConfig;
use crate::error::ConfigError;
use crate::probe::{BindingProbe, BoundProbe, ProbeReply, UdpProbe};
use natlink_stun::{MappedAddress, StunError, StunServerAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Health check result for one configured server
#[derive(Debug)]
pub struct ServerProbe {
    /// Server queried
    pub server: StunServerAddress,
    /// Reply or failure
    pub result: Result<ProbeReply, StunError>,
    /// Time until the reply or failure
    pub elapsed: Duration,
}

/// NAT classifier
///
/// Owns the [`DetectionCache`]; it is the only writer.
pub struct NatClassifier {
    probe: Arc<dyn BindingProbe>,
    servers: Vec<StunServerAddress>,
    query_timeout: Duration,
    cache: Arc<DetectionCache>,
}

impl NatClassifier {
    /// Create a classifier over real UDP sockets
    #[must_use]
    pub fn new(servers: Vec<StunServerAddress>, query_timeout: Duration, cache_ttl: Duration) -> Self {
        Self::with_probe(Arc::new(UdpProbe::new()), servers, query_timeout, cache_ttl)
    }

    /// Create a classifier with a custom probe
    #[must_use]
    pub fn with_probe(
        probe: Arc<dyn BindingProbe>,
        servers: Vec<StunServerAddress>,
        query_timeout: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            probe,
            servers,
            query_timeout,
            cache: Arc::new(DetectionCache::new(cache_ttl)),
        }
    }

    /// Create a classifier from configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a server entry is malformed.
    pub fn from_config(
        config: &TraversalConfig,
        probe: Arc<dyn BindingProbe>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::with_probe(
            probe,
            config.servers()?,
            config.query_timeout(),
            config.cache_ttl(),
        ))
    }

    /// Configured servers, in probe order
    #[must_use]
    pub fn servers(&self) -> &[StunServerAddress] {
        &self.servers
    }

    /// Probe used for every query
    #[must_use]
    pub fn probe(&self) -> Arc<dyn BindingProbe> {
        Arc::clone(&self.probe)
    }

    /// Per-query timeout
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Handle to the detection cache
    #[must_use]
    pub fn cache(&self) -> Arc<DetectionCache> {
        Arc::clone(&self.cache)
    }

    /// Classify using the configured servers
    pub async fn detect(&self, force_refresh: bool) -> Arc<DetectionResult> {
        self.detect_with_servers(&self.servers, force_refresh).await
    }

    /// Classify using an explicit ordered server list
    ///
    /// A fresh cached result is returned without touching the network unless
    /// `force_refresh` is set.
    pub async fn detect_with_servers(
        &self,
        servers: &[StunServerAddress],
        force_refresh: bool,
    ) -> Arc<DetectionResult> {
        if !force_refresh {
            if let Some(cached) = self.cache.get_fresh().await {
                tracing::debug!("Using cached NAT classification: {}", cached.nat_type());
                return cached;
            }
        }

        let result = self.classify(servers).await;
        tracing::info!(
            "NAT classified as {} (mapping {:?}, filtering {:?}, public {:?})",
            result.behavior.nat_type,
            result.behavior.mapping,
            result.behavior.filtering,
            result.public_endpoint.map(|e| e.to_string())
        );
        self.cache.store(result).await
    }

    /// Query every configured server concurrently
    ///
    /// Results come back in configured order.
    pub async fn probe_servers(&self) -> Vec<ServerProbe> {
        let mut tasks = JoinSet::new();
        for (index, server) in self.servers.iter().cloned().enumerate() {
            let probe = Arc::clone(&self.probe);
            let timeout = self.query_timeout;
            tasks.spawn(async move {
                let started = Instant::now();
                let result = probe.probe(LocalBinding::Ephemeral, &server, timeout).await;
                (
                    index,
                    ServerProbe {
                        server,
                        result,
                        elapsed: started.elapsed(),
                    },
                )
            });
        }

        let mut results = Vec::with_capacity(self.servers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => tracing::warn!("Server probe task failed: {}", e),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, probe)| probe).collect()
    }

    async fn classify(&self, servers: &[StunServerAddress]) -> DetectionResult {
        let mut evidence = Evidence::default();

        // Reachability
        let Some((index, held, baseline)) = self.find_baseline(servers, &mut evidence).await else {
            tracing::warn!("No STUN server reachable ({} configured)", servers.len());
            evidence.network_unavailable = true;
            evidence.note("NetworkUnavailable: no configured STUN server answered");
            return finish(NatBehavior::blocked(), None, evidence);
        };

        let server = &servers[index];
        evidence.local = Some(baseline.local);
        evidence.responding_server = Some(server.to_string());

        if baseline.mapped.socket_addr() == baseline.local {
            return finish(NatBehavior::open(), Some(baseline.mapped), evidence);
        }

        // Mapping: same server, new local port. The baseline port is still
        // held, so a reply from it means the comparison is unusable.
        let same_server = match self
            .fresh_step(ProbeStep::SameServerNewPort, server, &mut evidence)
            .await
        {
            Some(reply) if reply.local.port() == baseline.local.port() => {
                evidence.note("same-server probe reused the baseline port; comparison discarded");
                None
            }
            reply => reply.map(|reply| reply.mapped == baseline.mapped),
        };

        // Mapping: different server, from the held baseline port
        let mut alternate = None;
        for (_, other) in servers.iter().enumerate().filter(|(i, _)| *i != index) {
            if let Some(reply) = self
                .probe_step(ProbeStep::AlternateServer, held.as_ref(), other, &mut evidence)
                .await
            {
                alternate = Some(reply.mapped == baseline.mapped);
                break;
            }
        }
        drop(held);

        let (mapping, filtering, basis) = infer_behavior(same_server, alternate, &mut evidence);
        evidence.filtering_basis = Some(basis);

        let behavior = NatBehavior {
            mapping,
            filtering,
            nat_type: classify(mapping, filtering),
        };
        finish(behavior, Some(baseline.mapped), evidence)
    }

    /// First server in order that answers, with the port it was reached from
    async fn find_baseline(
        &self,
        servers: &[StunServerAddress],
        evidence: &mut Evidence,
    ) -> Option<(usize, Box<dyn BoundProbe>, ProbeReply)> {
        for (index, server) in servers.iter().enumerate() {
            let held = match self.probe.bind(LocalBinding::Ephemeral).await {
                Ok(held) => held,
                Err(e) => {
                    tracing::debug!("Could not bind a baseline port: {}", e);
                    evidence.record(
                        ProbeStep::Reachability,
                        server,
                        LocalBinding::Ephemeral,
                        ProbeOutcome::Failed(e.to_string()),
                    );
                    continue;
                }
            };

            let result = held.query(server, self.query_timeout).await;
            match result {
                Ok(reply) => {
                    evidence.record(
                        ProbeStep::Reachability,
                        server,
                        LocalBinding::Ephemeral,
                        ProbeOutcome::Mapped(reply.mapped),
                    );
                    return Some((index, held, reply));
                }
                Err(e) => {
                    tracing::debug!("STUN server {} unreachable: {}", server, e);
                    evidence.record(
                        ProbeStep::Reachability,
                        server,
                        LocalBinding::Ephemeral,
                        ProbeOutcome::Failed(e.to_string()),
                    );
                }
            }
        }
        None
    }

    async fn fresh_step(
        &self,
        step: ProbeStep,
        server: &StunServerAddress,
        evidence: &mut Evidence,
    ) -> Option<ProbeReply> {
        match self.probe.bind(LocalBinding::Ephemeral).await {
            Ok(fresh) => self.probe_step(step, fresh.as_ref(), server, evidence).await,
            Err(e) => {
                tracing::debug!("{:?} probe could not bind: {}", step, e);
                evidence.record(
                    step,
                    server,
                    LocalBinding::Ephemeral,
                    ProbeOutcome::Failed(e.to_string()),
                );
                None
            }
        }
    }

    async fn probe_step(
        &self,
        step: ProbeStep,
        bound: &dyn BoundProbe,
        server: &StunServerAddress,
        evidence: &mut Evidence,
    ) -> Option<ProbeReply> {
        let binding = match step {
            ProbeStep::AlternateServer => LocalBinding::Port(bound.local_port()),
            _ => LocalBinding::Ephemeral,
        };

        match bound.query(server, self.query_timeout).await {
            Ok(reply) => {
                tracing::debug!("{:?} probe to {}: mapped {}", step, server, reply.mapped);
                evidence.record(step, server, binding, ProbeOutcome::Mapped(reply.mapped));
                Some(reply)
            }
            Err(e) => {
                tracing::debug!("{:?} probe to {} failed: {}", step, server, e);
                evidence.record(step, server, binding, ProbeOutcome::Failed(e.to_string()));
                None
            }
        }
    }
}

/// Derive mapping and filtering from the two comparison probes
///
/// Each argument is `Some(matches_baseline)` or `None` when the probe got no
/// answer.
fn infer_behavior(
    same_server: Option<bool>,
    alternate: Option<bool>,
    evidence: &mut Evidence,
) -> (Behavior, Behavior, FilteringBasis) {
    use Behavior::{AddressAndPortDependent, AddressDependent, EndpointIndependent, Unknown};

    match (same_server, alternate) {
        (Some(true), Some(true)) => (EndpointIndependent, EndpointIndependent, FilteringBasis::Inferred),
        (Some(true), Some(false)) => {
            evidence.note("alternate server observed a different mapping from the baseline port");
            (AddressAndPortDependent, Unknown, FilteringBasis::Unobservable)
        }
        (Some(true), None) => {
            evidence.note("no alternate server answered; filtering defaulted");
            (EndpointIndependent, AddressAndPortDependent, FilteringBasis::ConservativeDefault)
        }
        (_, Some(true)) => (AddressDependent, AddressDependent, FilteringBasis::Inferred),
        (_, Some(false)) => (AddressAndPortDependent, Unknown, FilteringBasis::Unobservable),
        (Some(false), None) => {
            evidence.note("no alternate server answered; filtering defaulted");
            (AddressAndPortDependent, AddressAndPortDependent, FilteringBasis::ConservativeDefault)
        }
        (None, None) => {
            evidence.note("no mapping probe answered after the baseline");
            (Unknown, AddressAndPortDependent, FilteringBasis::ConservativeDefault)
        }
    }
}

/// Classification table
///
/// Combinations that do not match a cone type resolve to `Symmetric`, never
/// to an easier type.
#[must_use]
pub fn classify(mapping: Behavior, filtering: Behavior) -> NatType {
    use Behavior::{AddressAndPortDependent, AddressDependent, Direct, EndpointIndependent};

    match (mapping, filtering) {
        (Direct, _) => NatType::Open,
        (EndpointIndependent, EndpointIndependent) => NatType::FullCone,
        (AddressDependent, AddressDependent) => NatType::Restricted,
        (AddressAndPortDependent, AddressAndPortDependent) => NatType::PortRestricted,
        (AddressAndPortDependent, _) => NatType::Symmetric,
        (Behavior::Unknown, _) => NatType::Unknown,
        _ => NatType::Symmetric,
    }
}

fn finish(
    behavior: NatBehavior,
    public_endpoint: Option<MappedAddress>,
    evidence: Evidence,
) -> DetectionResult {
    DetectionResult {
        behavior,
        public_endpoint,
        determined_at: Instant::now(),
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::scripted::ScriptedProbe;
    use std::net::{Ipv4Addr, SocketAddr};

    const TTL: Duration = Duration::from_secs(300);

    fn local() -> SocketAddr {
        "192.168.1.10:40000".parse().unwrap()
    }

    fn public(port: u16) -> MappedAddress {
        MappedAddress::new(Ipv4Addr::new(203, 0, 113, 5), port)
    }

    fn servers(count: usize) -> Vec<StunServerAddress> {
        (1..=count)
            .map(|i| StunServerAddress::new(format!("stun{i}.test"), 3478))
            .collect()
    }

    fn classifier(
        answers: Vec<Result<MappedAddress, ()>>,
        server_count: usize,
    ) -> (NatClassifier, Arc<ScriptedProbe>) {
        let probe = Arc::new(ScriptedProbe::new(local(), answers));
        let classifier = NatClassifier::with_probe(
            probe.clone(),
            servers(server_count),
            Duration::from_secs(5),
            TTL,
        );
        (classifier, probe)
    }

    #[tokio::test]
    async fn test_full_cone() {
        let p = public(50000);
        let (classifier, probe) = classifier(vec![Ok(p), Ok(p), Ok(p)], 2);

        let result = classifier.detect(false).await;

        assert_eq!(result.nat_type(), NatType::FullCone);
        assert_eq!(result.behavior.mapping, Behavior::EndpointIndependent);
        assert_eq!(result.behavior.filtering, Behavior::EndpointIndependent);
        assert_eq!(result.public_endpoint, Some(p));
        assert_eq!(result.evidence.filtering_basis, Some(FilteringBasis::Inferred));
        assert_eq!(probe.calls(), 3);

        // Alternate server probed from the baseline port
        let queries = probe.queries();
        assert_eq!(queries[1], (40001, "stun1.test:3478".to_string()));
        assert_eq!(queries[2], (40000, "stun2.test:3478".to_string()));
    }

    #[tokio::test]
    async fn test_baseline_port_held_for_alternate_server() {
        let p = public(50000);
        let (classifier, scripted) = classifier(vec![Ok(p), Ok(p), Ok(p)], 2);

        let result = classifier.detect(false).await;

        // Baseline and same-server ports only; the alternate query is not a rebind
        assert_eq!(scripted.binds(), 2);
        let alternate = &result.evidence.probes[2];
        assert_eq!(alternate.step, ProbeStep::AlternateServer);
        assert_eq!(alternate.binding, LocalBinding::Port(40000));
        assert_eq!(alternate.outcome, ProbeOutcome::Mapped(p));
    }

    #[tokio::test]
    async fn test_same_server_reply_on_baseline_port_is_discarded() {
        let p = public(50000);
        let scripted = Arc::new(ScriptedProbe::new(local(), vec![Ok(p), Ok(p), Ok(p)]).same_port());
        let classifier =
            NatClassifier::with_probe(scripted.clone(), servers(2), Duration::from_secs(5), TTL);

        let result = classifier.detect(false).await;

        // Only the alternate server comparison counts
        assert_eq!(result.behavior.mapping, Behavior::AddressDependent);
        assert_eq!(result.nat_type(), NatType::Restricted);
        assert!(result
            .evidence
            .notes
            .iter()
            .any(|note| note.contains("reused the baseline port")));
    }

    #[tokio::test]
    async fn test_symmetric_when_second_server_differs() {
        let p = public(50000);
        let (classifier, _) = classifier(vec![Ok(p), Ok(p), Ok(public(50001))], 2);

        let result = classifier.detect(false).await;

        assert_eq!(result.nat_type(), NatType::Symmetric);
        assert_eq!(result.behavior.mapping, Behavior::AddressAndPortDependent);
        assert_eq!(
            result.evidence.filtering_basis,
            Some(FilteringBasis::Unobservable)
        );
    }

    #[tokio::test]
    async fn test_symmetric_when_every_probe_differs() {
        let (classifier, _) =
            classifier(vec![Ok(public(50000)), Ok(public(50100)), Ok(public(50200))], 3);

        let result = classifier.detect(false).await;
        assert_eq!(result.nat_type(), NatType::Symmetric);
    }

    #[tokio::test]
    async fn test_restricted() {
        let p = public(50000);
        let (classifier, _) = classifier(vec![Ok(p), Ok(public(50007)), Ok(p)], 2);

        let result = classifier.detect(false).await;

        assert_eq!(result.nat_type(), NatType::Restricted);
        assert_eq!(result.behavior.mapping, Behavior::AddressDependent);
    }

    #[tokio::test]
    async fn test_port_restricted_with_single_server() {
        let (classifier, _) = classifier(vec![Ok(public(50000)), Ok(public(50002))], 1);

        let result = classifier.detect(false).await;

        assert_eq!(result.nat_type(), NatType::PortRestricted);
        assert_eq!(
            result.evidence.filtering_basis,
            Some(FilteringBasis::ConservativeDefault)
        );
    }

    #[tokio::test]
    async fn test_single_server_never_assumes_full_cone() {
        let p = public(50000);
        let (classifier, _) = classifier(vec![Ok(p), Ok(p)], 1);

        let result = classifier.detect(false).await;
        assert_eq!(result.behavior.mapping, Behavior::EndpointIndependent);
        assert_eq!(result.nat_type(), NatType::Symmetric);
    }

    #[tokio::test]
    async fn test_open_internet() {
        let mapped = MappedAddress::new(Ipv4Addr::new(192, 168, 1, 10), 40000);
        let (classifier, probe) = classifier(vec![Ok(mapped)], 2);

        let result = classifier.detect(false).await;

        assert_eq!(result.behavior, NatBehavior::open());
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_blocked_when_no_server_answers() {
        let (classifier, probe) = classifier(vec![Err(()), Err(()), Err(())], 3);

        let result = classifier.detect(false).await;

        assert_eq!(result.nat_type(), NatType::Blocked);
        assert!(result.public_endpoint.is_none());
        assert!(result.evidence.network_unavailable);
        assert_eq!(result.evidence.probes.len(), 3);
        assert_eq!(probe.calls(), 3);

        // Blocked is cached too
        classifier.detect(false).await;
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_blocked_with_empty_server_list() {
        let (classifier, _) = classifier(vec![], 0);
        assert_eq!(classifier.detect(false).await.nat_type(), NatType::Blocked);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_server() {
        let p = public(50000);
        let (classifier, probe) = classifier(vec![Err(()), Ok(p), Ok(p), Ok(p)], 3);

        let result = classifier.detect(false).await;

        assert_eq!(
            result.evidence.responding_server.as_deref(),
            Some("stun2.test:3478")
        );
        assert_eq!(result.nat_type(), NatType::FullCone);

        // Alternate probe goes to the first server that is not the baseline
        let queries = probe.queries();
        assert_eq!(queries[3], (40001, "stun1.test:3478".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_when_mapping_probes_fail() {
        let (classifier, _) = classifier(vec![Ok(public(50000)), Err(()), Err(())], 2);

        let result = classifier.detect(false).await;

        assert_eq!(result.nat_type(), NatType::Unknown);
        assert_eq!(result.public_endpoint, Some(public(50000)));
    }

    #[tokio::test]
    async fn test_cache_hit_issues_no_probes() {
        let p = public(50000);
        let (classifier, probe) = classifier(vec![Ok(p), Ok(p), Ok(p)], 2);

        let first = classifier.detect(false).await;
        let second = classifier.detect(false).await;

        assert_eq!(probe.calls(), 3);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_force_refresh_always_probes() {
        let p = public(50000);
        let (classifier, probe) = classifier(vec![Ok(p), Ok(p), Ok(p)], 2);
        classifier.detect(false).await;

        for _ in 0..3 {
            probe.push(Ok(p));
        }
        let refreshed = classifier.detect(true).await;

        assert_eq!(probe.calls(), 6);
        assert_eq!(refreshed.nat_type(), NatType::FullCone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_ttl() {
        let p = public(50000);
        let (classifier, probe) = classifier(vec![Ok(p), Ok(p), Ok(p)], 2);
        classifier.detect(false).await;

        tokio::time::advance(TTL).await;
        for _ in 0..3 {
            probe.push(Ok(p));
        }
        classifier.detect(false).await;

        assert_eq!(probe.calls(), 6);
    }

    #[tokio::test]
    async fn test_probe_servers_in_configured_order() {
        let p = public(50000);
        let (classifier, probe) = classifier(vec![Ok(p), Ok(p), Ok(p)], 3);

        let report = classifier.probe_servers().await;

        assert_eq!(probe.calls(), 3);
        let names: Vec<String> = report.iter().map(|r| r.server.to_string()).collect();
        assert_eq!(names, ["stun1.test:3478", "stun2.test:3478", "stun3.test:3478"]);
        assert!(report.iter().all(|r| r.result.is_ok()));
    }

    #[test]
    fn test_classification_table() {
        use Behavior::*;

        assert_eq!(classify(Direct, EndpointIndependent), NatType::Open);
        assert_eq!(classify(EndpointIndependent, EndpointIndependent), NatType::FullCone);
        assert_eq!(classify(AddressDependent, AddressDependent), NatType::Restricted);
        assert_eq!(
            classify(AddressAndPortDependent, AddressAndPortDependent),
            NatType::PortRestricted
        );
        assert_eq!(classify(AddressAndPortDependent, EndpointIndependent), NatType::Symmetric);
        assert_eq!(classify(AddressAndPortDependent, Unknown), NatType::Symmetric);
        assert_eq!(classify(EndpointIndependent, AddressAndPortDependent), NatType::Symmetric);
        assert_eq!(classify(AddressDependent, EndpointIndependent), NatType::Symmetric);
        assert_eq!(classify(Unknown, AddressAndPortDependent), NatType::Unknown);
    }
}
