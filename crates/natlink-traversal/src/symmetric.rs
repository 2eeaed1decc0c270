//! Symmetric NAT detection by repeated probing.
//!
//! A secondary signal next to the classifier. Differing mapped ports across
//! probes from one local port are conclusive; timing variance is only a weak
//! heuristic and is reported as such.

use crate::behavior::LocalBinding;
use crate::config::SymmetricProbeConfig;
use crate::probe::BindingProbe;
use natlink_stun::StunServerAddress;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What flagged the NAT as likely symmetric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymmetricSignal {
    /// Mapped port changed between probes (conclusive)
    PortVariation,
    /// Inter-arrival timing variance exceeded the threshold (heuristic, may
    /// false-positive)
    TimingHeuristic,
}

/// One successful probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeSample {
    /// Mapped port reported by the server
    pub mapped_port: u16,
    /// Milliseconds since the first probe was issued
    pub at_ms: f64,
}

/// Result of a variance probe run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarianceReport {
    /// Whether the NAT looks symmetric
    pub likely_symmetric: bool,
    /// Which signal decided it, if any
    pub signal: Option<SymmetricSignal>,
    /// Successful probes in order
    pub samples: Vec<ProbeSample>,
    /// Probes that got no answer
    pub failures: u32,
    /// Population variance of inter-arrival deltas (ms²), when computable
    pub timing_variance_ms2: Option<f64>,
}

impl VarianceReport {
    /// Whether the verdict rests only on the timing heuristic
    #[must_use]
    pub fn is_heuristic(&self) -> bool {
        self.signal == Some(SymmetricSignal::TimingHeuristic)
    }
}

/// Repeated-probe symmetric NAT detector
pub struct SymmetricDetector {
    probe: Arc<dyn BindingProbe>,
    attempts: u32,
    interval: Duration,
    variance_threshold_ms2: f64,
    query_timeout: Duration,
}

impl SymmetricDetector {
    /// Create a detector
    #[must_use]
    pub fn new(probe: Arc<dyn BindingProbe>, config: &SymmetricProbeConfig, query_timeout: Duration) -> Self {
        Self {
            probe,
            attempts: config.attempts,
            interval: Duration::from_millis(config.interval_ms),
            variance_threshold_ms2: config.timing_variance_threshold_ms2,
            query_timeout,
        }
    }

    /// Issue sequential probes to `server` from one local port
    ///
    /// The port is bound once and held for every attempt, so only the NAT can
    /// change the mapped port.
    pub async fn probe_variance(&self, server: &StunServerAddress) -> VarianceReport {
        let held = match self.probe.bind(LocalBinding::Ephemeral).await {
            Ok(held) => held,
            Err(e) => {
                tracing::debug!("Symmetric probe could not bind a local port: {}", e);
                return evaluate(Vec::new(), self.attempts, self.variance_threshold_ms2);
            }
        };

        let started = Instant::now();
        let mut samples = Vec::new();
        let mut failures = 0;

        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.interval).await;
            }

            match held.query(server, self.query_timeout).await {
                Ok(reply) => {
                    samples.push(ProbeSample {
                        mapped_port: reply.mapped.port,
                        at_ms: started.elapsed().as_secs_f64() * 1000.0,
                    });
                }
                Err(e) => {
                    tracing::debug!("Symmetric probe {} to {} failed: {}", attempt + 1, server, e);
                    failures += 1;
                }
            }
        }

        let report = evaluate(samples, failures, self.variance_threshold_ms2);
        tracing::debug!(
            "Symmetric detection: likely={} signal={:?} variance={:?}",
            report.likely_symmetric,
            report.signal,
            report.timing_variance_ms2
        );
        report
    }
}

/// Decide from collected samples
///
/// Port variation is checked first and always wins over timing.
#[must_use]
pub fn evaluate(samples: Vec<ProbeSample>, failures: u32, threshold_ms2: f64) -> VarianceReport {
    let port_varies = samples
        .windows(2)
        .any(|pair| pair[0].mapped_port != pair[1].mapped_port);

    let timing_variance_ms2 = timing_variance(&samples);

    let signal = if port_varies {
        Some(SymmetricSignal::PortVariation)
    } else if timing_variance_ms2.is_some_and(|v| v > threshold_ms2) {
        Some(SymmetricSignal::TimingHeuristic)
    } else {
        None
    };

    VarianceReport {
        likely_symmetric: signal.is_some(),
        signal,
        samples,
        failures,
        timing_variance_ms2,
    }
}

/// Population variance of deltas between consecutive samples
fn timing_variance(samples: &[ProbeSample]) -> Option<f64> {
    let deltas: Vec<f64> = samples
        .windows(2)
        .map(|pair| pair[1].at_ms - pair[0].at_ms)
        .collect();

    if deltas.len() < 2 {
        return None;
    }

    let n = deltas.len() as f64;
    let mean = deltas.iter().sum::<f64>() / n;
    Some(deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n)
}
