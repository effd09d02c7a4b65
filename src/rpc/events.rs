//! Client lifecycle and trace events.
//!
//! The client publishes [`ClientEvent`]s through an [`EventRegistry`], which
//! maps each [`EventKind`] to the subscribers registered for it, keyed by
//! [`SubscriptionId`]. Subscribers are any [`EventSender`]; the common case is a
//! channel obtained with [`EventRegistry::subscribe`].
//!
//! # Event Categories
//!
//! - **Lifecycle**: [`Connected`](ClientEvent::Connected),
//!   [`Disconnected`](ClientEvent::Disconnected), [`Error`](ClientEvent::Error),
//!   [`Reconnecting`](ClientEvent::Reconnecting)
//! - **Trace**: [`Request`](ClientEvent::Request), [`Response`](ClientEvent::Response)
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use shahcoin_rpc::rpc::{ClientEvent, EventKind, RpcClient};
//!
//! # async fn example(client: RpcClient) {
//! let mut events = client.subscribe(&EventKind::LIFECYCLE);
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Connected => println!("node is up"),
//!             ClientEvent::Disconnected => println!("node is down"),
//!             ClientEvent::Reconnecting { attempt } => println!("reconnect attempt {attempt}"),
//!             _ => {}
//!         }
//!     }
//! });
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use super::error::RpcError;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The node answered after being unreachable or never contacted.
    Connected,

    /// A call failed to reach the node.
    Disconnected,

    /// Detail of the transport failure that caused the latest disconnect.
    Error(RpcError),

    /// A reconnection probe is about to be sent.
    Reconnecting { attempt: u32 },

    /// An envelope is about to be handed to the transport.
    Request { id: u64, method: String },

    /// A call finished, successfully or not.
    Response {
        id: u64,
        method: String,
        elapsed: Duration,
        outcome: CallOutcome,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::Disconnected => EventKind::Disconnected,
            ClientEvent::Error(_) => EventKind::Error,
            ClientEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ClientEvent::Request { .. } => EventKind::Request,
            ClientEvent::Response { .. } => EventKind::Response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    ProtocolError,
    TransportError,
    DecodeError,
}

impl CallOutcome {
    pub fn of<T>(result: &Result<T, RpcError>) -> Self {
        match result {
            Ok(_) => CallOutcome::Success,
            Err(RpcError::Protocol { .. }) => CallOutcome::ProtocolError,
            Err(RpcError::Transport { .. }) => CallOutcome::TransportError,
            Err(RpcError::Decode(_)) => CallOutcome::DecodeError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    Reconnecting,
    Request,
    Response,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Error,
        EventKind::Reconnecting,
        EventKind::Request,
        EventKind::Response,
    ];

    pub const LIFECYCLE: [EventKind; 4] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Error,
        EventKind::Reconnecting,
    ];
}

/// Receives client events.
///
/// Returning `false` tells the registry the subscriber is gone; it is then
/// dropped from every kind it was registered for.
pub trait EventSender: Send + Sync {
    fn send(&self, event: ClientEvent) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct NoopEventSender;

impl EventSender for NoopEventSender {
    fn send(&self, _event: ClientEvent) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct ChannelEventSender {
    sender: UnboundedSender<ClientEvent>,
}

impl ChannelEventSender {
    pub fn new(sender: UnboundedSender<ClientEvent>) -> Self {
        Self { sender }
    }
}

impl EventSender for ChannelEventSender {
    fn send(&self, event: ClientEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Channel-backed subscription returned by [`EventRegistry::subscribe`].
///
/// The stream ends (`recv` yields `None`) once the subscription is removed
/// with [`EventRegistry::off`] or [`EventRegistry::remove_all`].
#[derive(Debug)]
pub struct EventSubscription {
    id: SubscriptionId,
    receiver: UnboundedReceiver<ClientEvent>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ClientEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drains every event already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

type Subscribers = HashMap<EventKind, BTreeMap<SubscriptionId, Arc<dyn EventSender>>>;

#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` for each of `kinds` under one id.
    pub fn on<S: EventSender + 'static>(&self, kinds: &[EventKind], sender: S) -> SubscriptionId {
        self.register(kinds, Arc::new(sender))
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(kinds, Arc::new(ChannelEventSender::new(tx)));
        EventSubscription { id, receiver: rx }
    }

    /// Removes the subscription from every kind. Returns whether it existed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let mut removed = false;
        for by_id in subscribers.values_mut() {
            removed |= by_id.remove(&id).is_some();
        }
        subscribers.retain(|_, by_id| !by_id.is_empty());
        removed
    }

    pub fn remove_all(&self) {
        self.lock().clear();
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, BTreeMap::len)
    }

    /// Delivers `event` to its subscribers in subscription order.
    ///
    /// Senders are invoked outside the registry lock, so a subscriber may
    /// call back into the registry.
    pub fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        let targets: Vec<(SubscriptionId, Arc<dyn EventSender>)> = match self.lock().get(&kind) {
            Some(by_id) => by_id.iter().map(|(id, s)| (*id, s.clone())).collect(),
            None => return,
        };

        let closed: Vec<SubscriptionId> = targets
            .into_iter()
            .filter_map(|(id, sender)| (!sender.send(event.clone())).then_some(id))
            .collect();

        for id in closed {
            self.off(id);
        }
    }

    fn register(&self, kinds: &[EventKind], sender: Arc<dyn EventSender>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut subscribers = self.lock();
        for kind in kinds {
            subscribers.entry(*kind).or_default().insert(id, sender.clone());
        }
        id
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
