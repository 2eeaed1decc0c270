//! Hole-punch state machine (no I/O, no clocks).

use super::PunchStrategy;
use crate::error::PunchFailure;
use std::net::{SocketAddr, SocketAddrV4};

/// Session state
///
/// `Idle -> Punching -> {Established | Failed | TimedOut}`; the last three
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchState {
    /// Not started
    Idle,
    /// Sending probes
    Punching,
    /// Peer answered
    Established,
    /// Gave up without timing out (direct handshake, no candidates, cancelled)
    Failed,
    /// Ceiling expired
    TimedOut,
}

impl PunchState {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Established | Self::Failed | Self::TimedOut)
    }
}

/// Input to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchEvent {
    /// Probe timer fired
    ProbeTick,
    /// A punch datagram arrived from this address
    DatagramReceived(SocketAddr),
    /// Overall ceiling expired
    CeilingExpired,
    /// Caller cancelled
    Cancelled,
}

/// What the driver must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send a probe to this address
    Probe(SocketAddrV4),
    /// Nothing to do until the next event
    Wait,
    /// Terminal state reached
    Finished,
}

/// Candidate ports: peer port plus each offset, skipping out-of-range and
/// duplicate ports, in offset order
#[must_use]
pub fn candidate_ports(peer: SocketAddrV4, offsets: &[i32]) -> Vec<SocketAddrV4> {
    let mut candidates: Vec<SocketAddrV4> = Vec::with_capacity(offsets.len());
    for offset in offsets {
        let port = i64::from(peer.port()) + i64::from(*offset);
        let Ok(port) = u16::try_from(port) else {
            continue;
        };
        let candidate = SocketAddrV4::new(*peer.ip(), port);
        if port != 0 && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Pure hole-punch state machine
#[derive(Debug, Clone)]
pub struct PunchMachine {
    strategy: PunchStrategy,
    state: PunchState,
    peer: SocketAddrV4,
    candidates: Vec<SocketAddrV4>,
    probes_sent: usize,
    remote: Option<SocketAddr>,
    failure: Option<PunchFailure>,
    cancelled: bool,
}

impl PunchMachine {
    /// Create a machine for `peer`; `offsets` only matter for `SymmetricGuess`
    #[must_use]
    pub fn new(strategy: PunchStrategy, peer: SocketAddrV4, offsets: &[i32]) -> Self {
        let candidates = match strategy {
            PunchStrategy::SymmetricGuess => candidate_ports(peer, offsets),
            PunchStrategy::Direct | PunchStrategy::Cone => vec![peer],
        };
        Self {
            strategy,
            state: PunchState::Idle,
            peer,
            candidates,
            probes_sent: 0,
            remote: None,
            failure: None,
            cancelled: false,
        }
    }

    /// Strategy in use
    #[must_use]
    pub fn strategy(&self) -> PunchStrategy {
        self.strategy
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PunchState {
        self.state
    }

    /// Addresses an inbound datagram is accepted from
    #[must_use]
    pub fn candidates(&self) -> &[SocketAddrV4] {
        &self.candidates
    }

    /// Probes issued so far
    #[must_use]
    pub fn probes_sent(&self) -> usize {
        self.probes_sent
    }

    /// Remote endpoint once established
    #[must_use]
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Failure reason once `Failed` or `TimedOut` (none when cancelled)
    #[must_use]
    pub fn failure(&self) -> Option<PunchFailure> {
        self.failure
    }

    /// Whether the session ended by cancellation
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Leave `Idle` and emit the first probe
    pub fn start(&mut self) -> Step {
        if self.state != PunchState::Idle {
            return self.idle_step();
        }
        if self.candidates.is_empty() {
            tracing::debug!("No candidate ports for peer {}", self.peer);
            return self.fail(PunchState::Failed, PunchFailure::NoCandidateResponded);
        }
        self.state = PunchState::Punching;
        self.next_probe()
    }

    /// Apply one event
    pub fn handle(&mut self, event: PunchEvent) -> Step {
        if self.state.is_terminal() {
            return Step::Finished;
        }

        match event {
            PunchEvent::Cancelled => {
                self.cancelled = true;
                self.state = PunchState::Failed;
                Step::Finished
            }
            _ if self.state == PunchState::Idle => Step::Wait,
            PunchEvent::ProbeTick => match self.strategy {
                PunchStrategy::Direct => Step::Wait,
                PunchStrategy::Cone | PunchStrategy::SymmetricGuess => self.next_probe(),
            },
            PunchEvent::DatagramReceived(from) => {
                if self.accepts(from) {
                    self.remote = Some(from);
                    self.state = PunchState::Established;
                    Step::Finished
                } else {
                    tracing::trace!("Ignoring punch datagram from {}", from);
                    Step::Wait
                }
            }
            PunchEvent::CeilingExpired => match self.strategy {
                PunchStrategy::Direct => self.fail(PunchState::Failed, PunchFailure::DirectUnreachable),
                PunchStrategy::Cone | PunchStrategy::SymmetricGuess => {
                    self.fail(PunchState::TimedOut, PunchFailure::Timeout)
                }
            },
        }
    }

    fn accepts(&self, from: SocketAddr) -> bool {
        match from {
            SocketAddr::V4(from) => self.candidates.contains(&from),
            SocketAddr::V6(_) => false,
        }
    }

    /// Round-robin over candidates; cone and direct have exactly one
    fn next_probe(&mut self) -> Step {
        let target = self.candidates[self.probes_sent % self.candidates.len()];
        self.probes_sent += 1;
        Step::Probe(target)
    }

    fn fail(&mut self, state: PunchState, failure: PunchFailure) -> Step {
        self.state = state;
        self.failure = Some(failure);
        Step::Finished
    }

    fn idle_step(&self) -> Step {
        if self.state.is_terminal() {
            Step::Finished
        } else {
            Step::Wait
        }
    }
}
