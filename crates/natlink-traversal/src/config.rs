//! Traversal configuration consumed from the host application.

use crate::error::ConfigError;
use natlink_stun::StunServerAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// NAT traversal configuration
///
/// Every field has a default, so a partial TOML table is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalConfig {
    /// Ordered STUN servers (`host:port`)
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// Per-query STUN timeout
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// How long a classification stays valid
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Probe interval for cone punching
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Overall ceiling for cone punching
    #[serde(default = "default_cone_ceiling_ms")]
    pub cone_ceiling_ms: u64,
    /// Overall ceiling for symmetric port guessing
    #[serde(default = "default_symmetric_ceiling_ms")]
    pub symmetric_ceiling_ms: u64,
    /// Spacing between candidate probes when guessing ports
    #[serde(default = "default_per_candidate_delay_ms")]
    pub per_candidate_delay_ms: u64,
    /// Offsets applied to the peer's reported port
    #[serde(default = "default_candidate_offsets")]
    pub candidate_offsets: Vec<i32>,
    /// Wait for a single direct handshake
    #[serde(default = "default_direct_timeout_ms")]
    pub direct_timeout_ms: u64,
    /// Repeated-probe symmetric detection
    #[serde(default)]
    pub symmetric_probe: SymmetricProbeConfig,
    /// TURN relays handed to callers that decide to relay
    #[serde(default)]
    pub turn_servers: Vec<String>,
}

/// Symmetric NAT detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetricProbeConfig {
    /// Number of sequential probes
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Spacing between probes
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,
    /// Inter-arrival variance above which timing flags a symmetric NAT
    #[serde(default = "default_variance_threshold")]
    pub timing_variance_threshold_ms2: f64,
}

// Default values

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun.l.google.com:19302".to_string(),
        "stun1.l.google.com:19302".to_string(),
        "stun.cloudflare.com:3478".to_string(),
        "stun.syncthing.net:3478".to_string(),
    ]
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_cache_ttl_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_probe_interval_ms() -> u64 {
    100
}

fn default_cone_ceiling_ms() -> u64 {
    10_000
}

fn default_symmetric_ceiling_ms() -> u64 {
    15_000
}

fn default_per_candidate_delay_ms() -> u64 {
    500
}

fn default_candidate_offsets() -> Vec<i32> {
    vec![0, 1, -1, 2, -2]
}

fn default_direct_timeout_ms() -> u64 {
    3_000
}

fn default_attempts() -> u32 {
    5
}

fn default_variance_threshold() -> f64 {
    1_000_000.0 // ~1 s standard deviation
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            query_timeout_ms: default_query_timeout_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            cone_ceiling_ms: default_cone_ceiling_ms(),
            symmetric_ceiling_ms: default_symmetric_ceiling_ms(),
            per_candidate_delay_ms: default_per_candidate_delay_ms(),
            candidate_offsets: default_candidate_offsets(),
            direct_timeout_ms: default_direct_timeout_ms(),
            symmetric_probe: SymmetricProbeConfig::default(),
            turn_servers: Vec::new(),
        }
    }
}

impl Default for SymmetricProbeConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            interval_ms: default_probe_interval_ms(),
            timing_variance_threshold_ms2: default_variance_threshold(),
        }
    }
}

impl TraversalConfig {
    /// Parse the configured STUN servers in order
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidServer` for the first entry that is not `host:port`.
    pub fn servers(&self) -> Result<Vec<StunServerAddress>, ConfigError> {
        self.stun_servers
            .iter()
            .map(|s| s.parse().map_err(ConfigError::from))
            .collect()
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a server string is malformed, a duration is zero,
    /// or the symmetric settings are unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.servers()?;

        let durations = [
            ("query_timeout_ms", self.query_timeout_ms),
            ("cache_ttl_ms", self.cache_ttl_ms),
            ("probe_interval_ms", self.probe_interval_ms),
            ("cone_ceiling_ms", self.cone_ceiling_ms),
            ("symmetric_ceiling_ms", self.symmetric_ceiling_ms),
            ("per_candidate_delay_ms", self.per_candidate_delay_ms),
            ("direct_timeout_ms", self.direct_timeout_ms),
            ("symmetric_probe.interval_ms", self.symmetric_probe.interval_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::ZeroDuration(*name));
        }

        if self.candidate_offsets.is_empty() {
            return Err(ConfigError::EmptyOffsets);
        }

        if self.symmetric_probe.attempts < 2 {
            return Err(ConfigError::TooFewAttempts(self.symmetric_probe.attempts));
        }

        let threshold = self.symmetric_probe.timing_variance_threshold_ms2;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold);
        }

        Ok(())
    }

    /// Per-query STUN timeout
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Classification cache TTL
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Cone probe interval
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Cone ceiling
    #[must_use]
    pub fn cone_ceiling(&self) -> Duration {
        Duration::from_millis(self.cone_ceiling_ms)
    }

    /// Symmetric ceiling
    #[must_use]
    pub fn symmetric_ceiling(&self) -> Duration {
        Duration::from_millis(self.symmetric_ceiling_ms)
    }

    /// Candidate stagger
    #[must_use]
    pub fn per_candidate_delay(&self) -> Duration {
        Duration::from_millis(self.per_candidate_delay_ms)
    }

    /// Direct handshake wait
    #[must_use]
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }
}
