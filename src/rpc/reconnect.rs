//! Reconnection scheduling.
//!
//! [`ReconnectScheduler`] is the state machine deciding when a probe timer is
//! armed; it does no I/O itself. The connection tracker drives it under the
//! same lock as the connection state and hands any [`ProbeTicket`] it returns
//! to [`spawn_probe_timer`].
//!
//! ```text
//!            disconnect (attempts < max)
//!   Idle ─────────────────────────────────▶ Scheduled ◀───────┐
//!    ▲                                          │ interval    │ probe failed,
//!    │ node answered / shutdown                 ▼             │ attempts < max
//!    └────────────────────────────────────── Probing ─────────┘
//!                                               │ probe failed, budget spent
//!                                               ▼
//!                                           Exhausted ── node answered ──▶ Idle
//! ```
//!
//! The retry interval is flat. Each arm bumps a generation number and cancels
//! the previous timer, so at most one timer is ever pending and a stale timer
//! that fires anyway is ignored.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use log::trace;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::ClientSettings;

pub(crate) type ProbeFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Probing,
    Exhausted,
}

/// Instruction to start a timer that probes the node after `delay`.
#[derive(Debug, Clone)]
pub(crate) struct ProbeTicket {
    pub generation: u64,
    pub delay: Duration,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub struct ReconnectScheduler {
    auto_reconnect: bool,
    max_attempts: u32,
    interval: Duration,
    state: SchedulerState,
    generation: u64,
    pending: Option<CancellationToken>,
}

impl ReconnectScheduler {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            auto_reconnect: settings.auto_reconnect,
            max_attempts: settings.max_reconnect_attempts,
            interval: settings.reconnect_interval(),
            state: SchedulerState::Idle,
            generation: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn has_pending_timer(&self) -> bool {
        self.pending.is_some()
    }

    /// A caller's request failed to reach the node.
    ///
    /// Only `Idle` arms. A pending timer is never postponed, a probe in
    /// flight decides what happens next, and an exhausted budget is only
    /// restored by the node answering.
    pub(crate) fn on_disconnect(&mut self, attempts: u32) -> Option<ProbeTicket> {
        match self.state {
            SchedulerState::Scheduled | SchedulerState::Probing | SchedulerState::Exhausted => None,
            SchedulerState::Idle => {
                if self.can_arm(attempts) {
                    Some(self.arm())
                } else {
                    None
                }
            },
        }
    }

    /// The timer armed as `generation` fired. Returns whether to probe.
    pub(crate) fn begin_probe(&mut self, generation: u64) -> bool {
        if self.state != SchedulerState::Scheduled || self.generation != generation || !self.auto_reconnect {
            return false;
        }
        self.state = SchedulerState::Probing;
        self.pending = None;
        true
    }

    /// The probe sent as `generation` failed to reach the node.
    pub(crate) fn on_probe_failure(&mut self, generation: u64, attempts: u32) -> Option<ProbeTicket> {
        if self.state != SchedulerState::Probing || self.generation != generation {
            // Superseded by a later outcome; judge it like any other failure.
            return self.on_disconnect(attempts);
        }
        if self.can_arm(attempts) {
            Some(self.arm())
        } else {
            self.state = SchedulerState::Exhausted;
            None
        }
    }

    /// The node answered a request.
    pub(crate) fn on_connected(&mut self) {
        self.cancel_pending();
        self.state = SchedulerState::Idle;
    }

    /// Permanently disables automatic reconnection.
    pub(crate) fn shutdown(&mut self) {
        self.auto_reconnect = false;
        self.cancel_pending();
        self.state = SchedulerState::Idle;
    }

    fn can_arm(&self, attempts: u32) -> bool {
        self.auto_reconnect && attempts < self.max_attempts
    }

    fn arm(&mut self) -> ProbeTicket {
        self.cancel_pending();
        self.generation += 1;
        let cancel = CancellationToken::new();
        self.pending = Some(cancel.clone());
        self.state = SchedulerState::Scheduled;
        ProbeTicket {
            generation: self.generation,
            delay: self.interval,
            cancel,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}

/// Waits out the ticket's delay, then runs `probe` unless cancelled first.
pub(crate) fn spawn_probe_timer<F>(ticket: ProbeTicket, probe: F) -> JoinHandle<()>
where
    F: FnOnce(u64) -> ProbeFuture + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = ticket.cancel.cancelled() => {
                trace!(generation = ticket.generation; "Reconnect timer cancelled");
            }
            _ = tokio::time::sleep(ticket.delay) => {
                probe(ticket.generation).await;
            }
        }
    })
}
