use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::error::RpcError;
use super::events::{ClientEvent, EventRegistry};
use super::reconnect::{ProbeTicket, ReconnectScheduler, SchedulerState};
use super::types::ClientSettings;

/// Connection health as last observed by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub reconnect_attempts: u32,
}

/// Who issued the request whose outcome is being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOrigin {
    Caller,
    Probe { generation: u64 },
}

struct Tracked {
    state: ConnectionState,
    scheduler: ReconnectScheduler,
}

/// Owns [`ConnectionState`] and the reconnect scheduler behind one lock and
/// publishes lifecycle events.
///
/// Events are emitted after the state lock is released, so subscribers may
/// read the state. Each transition and its events happen under `ordering`,
/// so lifecycle events reach subscribers in the order the state changed.
pub struct ConnectionTracker {
    ordering: Mutex<()>,
    tracked: Mutex<Tracked>,
    events: EventRegistry,
}

impl ConnectionTracker {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            ordering: Mutex::new(()),
            tracked: Mutex::new(Tracked {
                state: ConnectionState::default(),
                scheduler: ReconnectScheduler::new(settings),
            }),
            events: EventRegistry::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().state.connected
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.lock().scheduler.state()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.lock().scheduler.has_pending_timer()
    }

    pub fn auto_reconnect(&self) -> bool {
        self.lock().scheduler.auto_reconnect()
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// The node answered, whatever the answer was.
    pub(crate) fn record_reachable(&self) {
        let _ordered = self.order();
        let was_connected = {
            let mut tracked = self.lock();
            let was_connected = tracked.state.connected;
            tracked.state.connected = true;
            tracked.state.reconnect_attempts = 0;
            tracked.scheduler.on_connected();
            was_connected
        };

        if !was_connected {
            info!("Connected to node");
            self.events.emit(ClientEvent::Connected);
        }
    }

    /// A request failed to reach the node.
    ///
    /// Returns a ticket when a reconnect timer must be started.
    pub(crate) fn record_unreachable(&self, origin: CallOrigin, error: &RpcError) -> Option<ProbeTicket> {
        let _ordered = self.order();
        let (ticket, attempts, max_attempts, exhausted) = {
            let mut tracked = self.lock();
            tracked.state.connected = false;
            let attempts = tracked.state.reconnect_attempts;
            let ticket = match origin {
                CallOrigin::Caller => tracked.scheduler.on_disconnect(attempts),
                CallOrigin::Probe { generation } => tracked.scheduler.on_probe_failure(generation, attempts),
            };
            let exhausted = tracked.scheduler.state() == SchedulerState::Exhausted;
            (ticket, attempts, tracked.scheduler.max_attempts(), exhausted)
        };

        warn!(error:% = error; "Node unreachable");
        self.events.emit(ClientEvent::Disconnected);

        if let Some(ticket) = &ticket {
            info!(
                attempt = attempts + 1,
                max_attempts = max_attempts,
                delay_ms = ticket.delay.as_millis() as u64;
                "Reconnect scheduled"
            );
        } else if exhausted && matches!(origin, CallOrigin::Probe { .. }) {
            warn!(attempts = attempts; "Reconnect attempts exhausted, giving up until the node answers");
        }

        self.events.emit(ClientEvent::Error(error.clone()));
        ticket
    }

    /// Starts the probe armed as `generation`, returning its attempt number.
    ///
    /// `None` means the timer was superseded or reconnection was disabled.
    pub(crate) fn begin_probe(&self, generation: u64) -> Option<u32> {
        let _ordered = self.order();
        let attempt = {
            let mut tracked = self.lock();
            if !tracked.scheduler.begin_probe(generation) {
                debug!(generation = generation; "Stale reconnect timer ignored");
                return None;
            }
            tracked.state.reconnect_attempts += 1;
            tracked.state.reconnect_attempts
        };

        info!(attempt = attempt; "Reconnecting to node");
        self.events.emit(ClientEvent::Reconnecting { attempt });
        Some(attempt)
    }

    /// Marks the client disconnected for good and drops every subscriber.
    pub(crate) fn shutdown(&self) {
        {
            let mut tracked = self.lock();
            tracked.state.connected = false;
            tracked.scheduler.shutdown();
        }
        self.events.remove_all();
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Always taken before `tracked`, never while holding it.
    fn order(&self) -> MutexGuard<'_, ()> {
        self.ordering.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
