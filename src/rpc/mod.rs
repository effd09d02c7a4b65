//! JSON-RPC client for Shahcoin nodes.
//!
//! - [`client`]: the [`RpcClient`] facade and its convenience methods
//! - [`codec`]: envelope encoding, request ids and response unwrapping
//! - [`transport`]: the [`Transport`] seam and its HTTP implementation
//! - [`connection`] and [`reconnect`]: reachability tracking and probe scheduling
//! - [`events`]: lifecycle and trace event subscription

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod events;
pub mod node_types;
pub mod reconnect;
pub mod transport;
pub mod types;

pub use client::RpcClient;
pub use codec::RequestCodec;
pub use connection::ConnectionState;
pub use error::{ConfigError, RpcError, TransportError, TransportErrorKind};
pub use events::{
    CallOutcome, ChannelEventSender, ClientEvent, EventKind, EventSender, EventSubscription, NoopEventSender,
    SubscriptionId,
};
pub use node_types::{BlockchainInfo, MiningInfo, NetworkInfo, TxInputRef, Utxo, WalletInfo};
pub use reconnect::SchedulerState;
pub use transport::{Endpoint, HttpTransport, Transport};
pub use types::{ClientSettings, Credentials, RpcConfig, RpcConfigUpdate};
