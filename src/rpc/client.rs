//! High-level JSON-RPC client for a Shahcoin node.
//!
//! This module provides [`RpcClient`], the only type consumers need. Every
//! operation funnels through [`RpcClient::call`], which encodes one envelope,
//! hands it to the [`Transport`], and classifies the outcome.
//!
//! # Example
//!
//! ```rust,no_run
//! use shahcoin_rpc::rpc::{ClientSettings, RpcClient, RpcConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RpcConfig::new("127.0.0.1", 8368).with_credentials("user", "pass");
//! let client = RpcClient::new(config, ClientSettings::default())?;
//!
//! let info = client.get_blockchain_info().await?;
//! println!("{} blocks on {}", info.blocks, info.chain);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::log::mask_string;

use super::codec::RequestCodec;
use super::connection::{CallOrigin, ConnectionState, ConnectionTracker};
use super::error::{ConfigError, RpcError};
use super::events::{CallOutcome, ClientEvent, EventKind, EventSender, EventSubscription, SubscriptionId};
use super::node_types::{BlockchainInfo, MiningInfo, NetworkInfo, TxInputRef, Utxo, WalletInfo};
use super::reconnect::{ProbeFuture, ProbeTicket, SchedulerState, spawn_probe_timer};
use super::transport::{Endpoint, HttpTransport, Transport};
use super::types::{ClientSettings, RpcConfig, RpcConfigUpdate};

pub const DEFAULT_BLOCK_VERBOSITY: u8 = 1;
pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 1;
pub const DEFAULT_SIGHASH_TYPE: &str = "ALL";
pub const DEFAULT_ADDRESS_TYPE: &str = "legacy";

/// JSON-RPC client with connection tracking and automatic reconnection.
///
/// Cloning is cheap: clones share the request id counter, the connection
/// state, the event subscribers and the reconnect timer.
///
/// # Connection Tracking
///
/// Any answer from the node (including a JSON-RPC error) marks the client
/// connected. A transport failure marks it disconnected and, while
/// `auto_reconnect` is on and the attempt budget lasts, arms a timer that
/// probes the node every `reconnect_interval_ms` with the configured probe
/// method. Disconnection is advisory: calls are always attempted.
///
/// # Thread Safety
///
/// `RpcClient` is `Send + Sync` and can be used from many tasks at once.
/// Request ids are assigned in strictly increasing order at send time.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct Target {
    config: RpcConfig,
    endpoint: Arc<Endpoint>,
}

struct ClientInner {
    this: Weak<ClientInner>,
    codec: RequestCodec,
    transport: Arc<dyn Transport>,
    target: RwLock<Target>,
    settings: ClientSettings,
    tracker: ConnectionTracker,
    last_latency: RwLock<Option<Duration>>,
}

impl RpcClient {
    /// Creates a client that talks HTTP to the node described by `config`.
    ///
    /// No request is made; an unreachable node only shows up on the first call.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not form a valid URL or the
    /// HTTP backend fails to initialize.
    pub fn new(config: RpcConfig, settings: ClientSettings) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new()?;
        Self::with_transport(config, settings, Arc::new(transport))
    }

    /// Creates a client over a caller-supplied [`Transport`].
    pub fn with_transport(
        config: RpcConfig,
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::from_config(&config)?;
        let tracker = ConnectionTracker::new(&settings);
        let inner = Arc::new_cyclic(|this| ClientInner {
            this: this.clone(),
            codec: RequestCodec::new(),
            transport,
            target: RwLock::new(Target {
                config,
                endpoint: Arc::new(endpoint),
            }),
            settings,
            tracker,
            last_latency: RwLock::new(None),
        });
        Ok(Self { inner })
    }

    /// Sends `method` with positional `params` and waits for the node's answer.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Protocol`] when the node returns a JSON-RPC error object,
    ///   even if a `result` is present too
    /// - [`RpcError::Transport`] when the node cannot be reached, times out or
    ///   answers with a non-2xx status and no JSON-RPC error
    /// - [`RpcError::Decode`] when the answer is not a valid envelope or its
    ///   result does not fit `T`
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        self.inner.execute(method, params, CallOrigin::Caller).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.tracker.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.tracker.state()
    }

    pub fn reconnect_state(&self) -> SchedulerState {
        self.inner.tracker.scheduler_state()
    }

    /// Whether a reconnect timer is currently waiting to fire.
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.tracker.has_pending_reconnect()
    }

    /// Snapshot of the current configuration.
    pub fn get_config(&self) -> RpcConfig {
        self.inner.read_target().config.clone()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// The URL requests are currently posted to.
    pub fn endpoint_url(&self) -> Url {
        self.inner.endpoint().url.clone()
    }

    /// Round-trip time of the most recently completed request.
    pub fn last_request_latency(&self) -> Option<Duration> {
        *self.inner.last_latency.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The id given to the most recent request, or 0 before the first one.
    pub fn last_request_id(&self) -> u64 {
        self.inner.codec.last_id()
    }

    /// Merges `update` into the configuration.
    ///
    /// Address and credentials are replaced together, so no request can
    /// observe one without the other. Reachability is not checked.
    pub fn update_config(&self, update: RpcConfigUpdate) -> Result<(), ConfigError> {
        let mut target = self.inner.target.write().unwrap_or_else(PoisonError::into_inner);
        let merged = update.merged_into(&target.config);
        if merged == target.config {
            return Ok(());
        }

        let endpoint = Endpoint::from_config(&merged)?;
        info!(url:% = endpoint.url, auth = endpoint.credentials.is_some(); "RPC target updated");
        *target = Target {
            config: merged,
            endpoint: Arc::new(endpoint),
        };
        Ok(())
    }

    /// Marks the client disconnected, turns automatic reconnection off for
    /// good, cancels any pending reconnect timer and drops every subscriber.
    ///
    /// In-flight calls are left to finish. Later calls are still sent.
    pub fn disconnect(&self) {
        info!("Disconnecting client, automatic reconnection disabled");
        self.inner.tracker.shutdown();
    }

    /// Subscribes a channel to the given event kinds.
    ///
    /// Lifecycle events arrive in the order the connection state changed,
    /// even with concurrent calls. Trace events of concurrent calls may
    /// interleave.
    pub fn subscribe(&self, kinds: &[EventKind]) -> EventSubscription {
        self.inner.tracker.events().subscribe(kinds)
    }

    pub fn on<S: EventSender + 'static>(&self, kinds: &[EventKind], sender: S) -> SubscriptionId {
        self.inner.tracker.events().on(kinds, sender)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.tracker.events().off(id)
    }

    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        self.call("getblockchaininfo", vec![]).await
    }

    pub async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", vec![]).await
    }

    pub async fn get_network_info(&self) -> Result<NetworkInfo, RpcError> {
        self.call("getnetworkinfo", vec![]).await
    }

    pub async fn get_mining_info(&self) -> Result<MiningInfo, RpcError> {
        self.call("getmininginfo", vec![]).await
    }

    pub async fn get_wallet_info(&self) -> Result<WalletInfo, RpcError> {
        self.call("getwalletinfo", vec![]).await
    }

    pub async fn get_staking_info(&self) -> Result<Value, RpcError> {
        self.call("getstakinginfo", vec![]).await
    }

    /// Mining algorithm schedule of the hybrid consensus.
    pub async fn get_algo_info(&self) -> Result<Value, RpcError> {
        self.call("getalgoinfo", vec![]).await
    }

    /// Fetches a block by hash. `verbosity` defaults to 1 (decoded, txids only).
    pub async fn get_block(&self, hash: &str, verbosity: Option<u8>) -> Result<Value, RpcError> {
        let verbosity = verbosity.unwrap_or(DEFAULT_BLOCK_VERBOSITY);
        self.call("getblock", vec![json!(hash), json!(verbosity)]).await
    }

    pub async fn get_block_by_height(&self, height: u64, verbosity: Option<u8>) -> Result<Value, RpcError> {
        let verbosity = verbosity.unwrap_or(DEFAULT_BLOCK_VERBOSITY);
        self.call("getblock", vec![json!(height), json!(verbosity)]).await
    }

    pub async fn get_transaction(&self, txid: &str, include_watchonly: Option<bool>) -> Result<Value, RpcError> {
        let include_watchonly = include_watchonly.unwrap_or(false);
        self.call("gettransaction", vec![json!(txid), json!(include_watchonly)])
            .await
    }

    pub async fn get_raw_transaction(&self, txid: &str, verbose: Option<bool>) -> Result<Value, RpcError> {
        let verbose = verbose.unwrap_or(true);
        self.call("getrawtransaction", vec![json!(txid), json!(verbose)]).await
    }

    pub async fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, RpcError> {
        debug!(address = &*mask_string(address); "RPC: Requesting UTXOs");
        self.call("getutxos", vec![json!(address)]).await
    }

    /// Balance of `address`, or of the whole wallet when `address` is `None`.
    ///
    /// `minconf` defaults to 1. The address parameter is left out entirely
    /// when absent, matching the node's positional signature.
    pub async fn get_balance(&self, address: Option<&str>, minconf: Option<u32>) -> Result<f64, RpcError> {
        let minconf = minconf.unwrap_or(DEFAULT_MIN_CONFIRMATIONS);
        let params = match address {
            Some(address) => {
                debug!(address = &*mask_string(address), minconf = minconf; "RPC: Requesting address balance");
                vec![json!(address), json!(minconf)]
            },
            None => vec![json!(minconf)],
        };
        self.call("getbalance", params).await
    }

    /// Broadcasts a signed transaction and returns its txid.
    pub async fn send_raw_transaction(&self, hex: &str, allow_high_fees: Option<bool>) -> Result<String, RpcError> {
        let allow_high_fees = allow_high_fees.unwrap_or(false);
        info!(target: "audit", bytes = hex.len() / 2; "RPC: Broadcasting raw transaction");
        let result: Result<String, RpcError> = self
            .call("sendrawtransaction", vec![json!(hex), json!(allow_high_fees)])
            .await;
        match &result {
            Ok(txid) => info!(target: "audit", txid = txid.as_str(); "RPC: Raw transaction accepted"),
            Err(e) => warn!(target: "audit", reason:% = e; "RPC: Raw transaction rejected"),
        }
        result
    }

    pub async fn create_raw_transaction(
        &self,
        inputs: &[TxInputRef],
        outputs: &BTreeMap<String, f64>,
    ) -> Result<String, RpcError> {
        self.call("createrawtransaction", vec![json!(inputs), json!(outputs)])
            .await
    }

    /// Signs a raw transaction.
    ///
    /// `inputs` and `private_keys` are only sent when given; the sighash type
    /// (default `"ALL"`) is always the last parameter.
    pub async fn sign_raw_transaction(
        &self,
        hex: &str,
        inputs: Option<Vec<Value>>,
        private_keys: Option<Vec<String>>,
        sighash_type: Option<&str>,
    ) -> Result<Value, RpcError> {
        let mut params = vec![json!(hex)];
        if let Some(inputs) = inputs {
            params.push(Value::Array(inputs));
        }
        if let Some(private_keys) = private_keys {
            params.push(json!(private_keys));
        }
        params.push(json!(sighash_type.unwrap_or(DEFAULT_SIGHASH_TYPE)));
        self.call("signrawtransaction", params).await
    }

    pub async fn get_new_address(&self, label: Option<&str>, address_type: Option<&str>) -> Result<String, RpcError> {
        let label = label.unwrap_or("");
        let address_type = address_type.unwrap_or(DEFAULT_ADDRESS_TYPE);
        self.call("getnewaddress", vec![json!(label), json!(address_type)])
            .await
    }

    pub async fn validate_address(&self, address: &str) -> Result<Value, RpcError> {
        self.call("validateaddress", vec![json!(address)]).await
    }
}

impl ClientInner {
    async fn execute<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        origin: CallOrigin,
    ) -> Result<T, RpcError> {
        let request = self.codec.encode(method, params);
        let id = request.id;
        let body =
            serde_json::to_value(&request).map_err(|e| RpcError::decode(format!("request could not be encoded: {}", e)))?;
        let endpoint = self.endpoint();

        self.tracker.events().emit(ClientEvent::Request {
            id,
            method: method.to_string(),
        });
        debug!(id = id, method = method; "RPC: Sending request");

        let start = Instant::now();
        let sent = self.transport.send(&endpoint, &body).await;
        let elapsed = start.elapsed();
        self.update_latency(elapsed);

        let result = match sent {
            Ok(body) => {
                self.tracker.record_reachable();
                RequestCodec::decode::<T>(id, body)
            },
            Err(err) => match err.body.as_ref().and_then(RequestCodec::protocol_error_in) {
                Some(protocol) => {
                    self.tracker.record_reachable();
                    Err(protocol)
                },
                None => {
                    let error = RpcError::from(err);
                    if error.is_connectivity_failure() {
                        if let Some(ticket) = self.tracker.record_unreachable(origin, &error) {
                            self.arm(ticket);
                        }
                    } else {
                        self.tracker.record_reachable();
                    }
                    Err(error)
                },
            },
        };

        match &result {
            Ok(_) => debug!(id = id, method = method, elapsed_ms = elapsed.as_millis() as u64; "RPC: Response received"),
            Err(e) => debug!(id = id, method = method, error:% = e; "RPC: Call failed"),
        }
        self.tracker.events().emit(ClientEvent::Response {
            id,
            method: method.to_string(),
            elapsed,
            outcome: CallOutcome::of(&result),
        });

        result
    }

    fn arm(&self, ticket: ProbeTicket) {
        let this = self.this.clone();
        spawn_probe_timer(ticket, move |generation| -> ProbeFuture {
            Box::pin(async move {
                if let Some(inner) = this.upgrade() {
                    inner.probe(generation).await;
                }
            })
        });
    }

    async fn probe(&self, generation: u64) {
        let Some(attempt) = self.tracker.begin_probe(generation) else {
            return;
        };

        let method = self.settings.probe_method.clone();
        match self
            .execute::<Value>(&method, Vec::new(), CallOrigin::Probe { generation })
            .await
        {
            Ok(_) => info!(attempt = attempt; "Reconnect probe succeeded"),
            // Probe failures only advance the attempt counter.
            Err(e) => debug!(attempt = attempt, error:% = e; "Reconnect probe failed"),
        }
    }

    fn endpoint(&self) -> Arc<Endpoint> {
        self.read_target().endpoint.clone()
    }

    fn read_target(&self) -> std::sync::RwLockReadGuard<'_, Target> {
        self.target.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_latency(&self, latency: Duration) {
        *self.last_latency.write().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.tracker.shutdown();
    }
}
