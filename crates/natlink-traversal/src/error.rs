//! Error types for traversal configuration and hole punching.
//!
//! Classification has no error type: every probe failure degrades the result
//! toward `Unknown` or `Blocked` instead of surfacing to the caller.

use natlink_stun::InvalidServerAddress;
use thiserror::Error;

/// Why a hole-punch attempt ended without a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchFailure {
    /// Ceiling expired while probing
    Timeout,
    /// No usable candidate port could be derived for the peer
    NoCandidateResponded,
    /// Single-shot direct handshake got no answer
    DirectUnreachable,
}

impl std::fmt::Display for PunchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::NoCandidateResponded => write!(f, "no candidate responded"),
            Self::DirectUnreachable => write!(f, "direct handshake unanswered"),
        }
    }
}

/// Hole-punch errors
///
/// Every variant means the caller should fall back to a relay.
#[derive(Debug, Error)]
pub enum HolePunchError {
    /// Punching ran and failed
    #[error("Hole punch failed: {0}")]
    Failed(PunchFailure),

    /// Caller cancelled the session
    #[error("Hole punch cancelled")]
    Cancelled,

    /// Punching was not attempted because the pairing cannot succeed
    #[error("Relay required: {0}")]
    RelayRequired(String),

    /// I/O error on the owned socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HolePunchError {
    /// Whether the failure came from running out of time
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Failed(PunchFailure::Timeout))
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A STUN server entry is not `host:port`
    #[error(transparent)]
    InvalidServer(#[from] InvalidServerAddress),

    /// A duration field is zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// Symmetric guessing has no offsets to try
    #[error("candidate_offsets must not be empty")]
    EmptyOffsets,

    /// Symmetric probing needs at least two samples
    #[error("symmetric_probe.attempts must be at least 2, got {0}")]
    TooFewAttempts(u32),

    /// Variance threshold is negative or not a number
    #[error("symmetric_probe.timing_variance_threshold_ms2 must be a non-negative number")]
    InvalidThreshold,
}
