use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use shahcoin_rpc::rpc::{
    CallOutcome, ClientEvent, ClientSettings, ConnectionState, Endpoint, EventKind, EventSender, RpcClient,
    RpcConfig, RpcConfigUpdate, RpcError, SchedulerState, Transport, TransportError, TxInputRef,
};

#[derive(Debug, Clone)]
enum Reply {
    Result(Value),
    RpcError(i64, &'static str),
    Status(u16),
    Refused,
    Raw(Value),
}

struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    sent: Mutex<Vec<(Endpoint, Value)>>,
}

impl ScriptedTransport {
    fn new(fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    fn sent(&self) -> Vec<(Endpoint, Value)> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_ids(&self) -> Vec<u64> {
        self.sent().iter().map(|(_, body)| body["id"].as_u64().unwrap()).collect()
    }

    fn sent_params(&self) -> Vec<Value> {
        self.sent().into_iter().map(|(_, body)| body["params"].clone()).collect()
    }

    fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|(_, body)| body["method"].as_str().unwrap().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, endpoint: &Endpoint, body: &Value) -> Result<Value, TransportError> {
        self.sent.lock().unwrap().push((endpoint.clone(), body.clone()));
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());

        let id = body["id"].clone();
        match reply {
            Reply::Result(result) => Ok(json!({"result": result, "error": null, "id": id})),
            Reply::RpcError(code, message) => Ok(json!({
                "result": null,
                "error": {"code": code, "message": message},
                "id": id
            })),
            Reply::Status(status) => Err(TransportError::status(status, "Service Unavailable", None)),
            Reply::Refused => Err(TransportError::connect("connection refused")),
            Reply::Raw(body) => Ok(body),
        }
    }
}

fn settings(max_attempts: u32) -> ClientSettings {
    ClientSettings {
        max_reconnect_attempts: max_attempts,
        reconnect_interval_ms: 100,
        ..Default::default()
    }
}

fn client_with(transport: &Arc<ScriptedTransport>, settings: ClientSettings) -> RpcClient {
    let config = RpcConfig::new("a", 8368).with_credentials("alice", "pw");
    RpcClient::with_transport(config, settings, transport.clone()).unwrap()
}

fn reconnect_attempts(events: &[ClientEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Reconnecting { attempt } => Some(*attempt),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn three_attempt_budget_yields_three_reconnecting_events() {
    let transport = ScriptedTransport::new(Reply::Refused);
    let client = client_with(&transport, settings(3));
    let mut events = client.subscribe(&EventKind::LIFECYCLE);

    let err = client.get_block_count().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.code(), -1);

    tokio::time::sleep(Duration::from_secs(2)).await;

    // One caller failure plus three failed probes.
    assert_eq!(transport.sent().len(), 4);
    assert_eq!(reconnect_attempts(&events.drain()), vec![1, 2, 3]);
    assert_eq!(client.reconnect_state(), SchedulerState::Exhausted);
    assert!(!client.has_pending_reconnect());
    assert_eq!(
        client.connection_state(),
        ConnectionState {
            connected: false,
            reconnect_attempts: 3
        }
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_waits_for_a_successful_call() {
    let transport = ScriptedTransport::new(Reply::Refused);
    let client = client_with(&transport, settings(1));
    let mut events = client.subscribe(&[EventKind::Reconnecting, EventKind::Connected]);

    client.get_block_count().await.unwrap_err();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.reconnect_state(), SchedulerState::Exhausted);

    // Further failures do not resume scheduling.
    client.get_block_count().await.unwrap_err();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!client.has_pending_reconnect());
    assert_eq!(reconnect_attempts(&events.drain()), vec![1]);

    transport.set_fallback(Reply::Result(json!(10)));
    assert_eq!(client.get_block_count().await.unwrap(), 10);
    assert_eq!(events.drain(), vec![ClientEvent::Connected]);
    assert_eq!(client.connection_state().reconnect_attempts, 0);

    transport.set_fallback(Reply::Refused);
    client.get_block_count().await.unwrap_err();
    assert_eq!(client.reconnect_state(), SchedulerState::Scheduled);
}

#[tokio::test]
async fn get_balance_resolves_and_reports_connected() {
    let transport = ScriptedTransport::new(Reply::Raw(json!({"result": 42, "error": null, "id": 1})));
    let client = client_with(&transport, settings(3));
    let mut events = client.subscribe(&EventKind::LIFECYCLE);

    let balance = client.get_balance(Some("SHAHaddr1"), Some(1)).await.unwrap();

    assert_eq!(balance, 42.0);
    assert_eq!(events.drain(), vec![ClientEvent::Connected]);
    assert!(client.is_connected());

    let (_, body) = &transport.sent()[0];
    assert_eq!(
        body,
        &json!({"jsonrpc": "2.0", "id": 1, "method": "getbalance", "params": ["SHAHaddr1", 1]})
    );
}

#[tokio::test]
async fn method_not_found_is_protocol_error_without_reconnect() {
    let transport = ScriptedTransport::new(Reply::Raw(json!({
        "result": null,
        "error": {"code": -32601, "message": "Method not found"},
        "id": 2
    })));
    let client = client_with(&transport, settings(3));

    let err = client.call::<Value>("nosuchmethod", vec![]).await.unwrap_err();

    assert_eq!(
        err,
        RpcError::Protocol {
            code: -32601,
            message: "Method not found".into(),
            data: None
        }
    );
    assert!(client.is_connected());
    assert_eq!(client.reconnect_state(), SchedulerState::Idle);
    assert!(!client.has_pending_reconnect());
}

#[tokio::test]
async fn error_wins_over_populated_result() {
    let transport = ScriptedTransport::new(Reply::Raw(json!({
        "result": {"blocks": 5},
        "error": {"code": -5, "message": "Invalid address"},
        "id": 1
    })));
    let client = client_with(&transport, settings(3));

    let err = client.call::<Value>("validateaddress", vec![json!("x")]).await.unwrap_err();
    assert_eq!(err.code(), -5);
}

#[tokio::test]
async fn falsy_results_are_successes() {
    let transport = ScriptedTransport::new(Reply::Refused);
    for falsy in [json!(null), json!(0), json!(false), json!(""), json!([]), json!({})] {
        transport.push(Reply::Result(falsy));
    }
    let client = client_with(&transport, settings(3));

    assert_eq!(client.call::<Value>("a", vec![]).await.unwrap(), Value::Null);
    assert_eq!(client.call::<u64>("b", vec![]).await.unwrap(), 0);
    assert!(!client.call::<bool>("c", vec![]).await.unwrap());
    assert_eq!(client.call::<String>("d", vec![]).await.unwrap(), "");
    assert!(client.call::<Vec<Value>>("e", vec![]).await.unwrap().is_empty());
    assert_eq!(client.call::<Value>("f", vec![]).await.unwrap(), json!({}));
}

#[tokio::test]
async fn ids_increase_across_failures() {
    let transport = ScriptedTransport::new(Reply::Result(json!(1)));
    transport.push(Reply::Result(json!(1)));
    transport.push(Reply::Refused);
    transport.push(Reply::Status(503));
    let client = client_with(
        &transport,
        ClientSettings {
            auto_reconnect: false,
            ..Default::default()
        },
    );

    client.get_block_count().await.unwrap();
    client.get_block_count().await.unwrap_err();
    let err = client.get_block_count().await.unwrap_err();
    assert_eq!(err.code(), 503);
    client.get_block_count().await.unwrap();

    assert_eq!(transport.sent_ids(), vec![1, 2, 3, 4]);
    assert_eq!(client.last_request_id(), 4);
}

#[tokio::test]
async fn concurrent_calls_get_distinct_ids() {
    let transport = ScriptedTransport::new(Reply::Result(json!(true)));
    let client = client_with(&transport, settings(3));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.call::<bool>("ping", vec![]).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    let mut ids = transport.sent_ids();
    ids.sort_unstable();
    assert_eq!(ids, (1..=32).collect::<Vec<u64>>());
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_terminal() {
    let transport = ScriptedTransport::new(Reply::Refused);
    let client = client_with(&transport, settings(5));
    let mut events = client.subscribe(&EventKind::ALL);

    client.get_block_count().await.unwrap_err();
    assert!(client.has_pending_reconnect());

    client.disconnect();
    assert!(!client.has_pending_reconnect());
    assert!(!client.is_connected());
    events.drain();
    assert!(events.recv().await.is_none());

    // Calls are still attempted but never arm a probe.
    client.get_block_count().await.unwrap_err();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.sent_methods(), vec!["getblockcount", "getblockcount"]);
    assert_eq!(client.reconnect_state(), SchedulerState::Idle);
    assert!(!client.has_pending_reconnect());
}

#[tokio::test]
async fn update_config_switches_host_with_credentials_intact() {
    let transport = ScriptedTransport::new(Reply::Result(json!(1)));
    let client = client_with(&transport, settings(3));

    client.get_block_count().await.unwrap();
    client.update_config(RpcConfigUpdate::default().host("b")).unwrap();
    client.get_block_count().await.unwrap();

    let sent = transport.sent();
    assert_eq!(sent[0].0.url.host_str(), Some("a"));
    assert_eq!(sent[1].0.url.host_str(), Some("b"));
    let credentials = sent[1].0.credentials.as_ref().unwrap();
    assert_eq!(credentials.username, "alice");
    assert_eq!(credentials.password, "pw");
    assert_eq!(client.get_config().host, "b");
}

#[tokio::test]
async fn update_config_changes_timeout() {
    let transport = ScriptedTransport::new(Reply::Result(json!(1)));
    let client = client_with(&transport, settings(3));

    client.update_config(RpcConfigUpdate::default().timeout_ms(1500)).unwrap();
    client.get_block_count().await.unwrap();

    assert_eq!(transport.sent()[0].0.timeout, Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn successful_call_cancels_pending_probe() {
    let transport = ScriptedTransport::new(Reply::Result(json!(1)));
    transport.push(Reply::Refused);
    let client = client_with(&transport, settings(5));

    client.get_block_count().await.unwrap_err();
    assert!(client.has_pending_reconnect());

    client.get_block_count().await.unwrap();
    assert!(!client.has_pending_reconnect());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.sent().len(), 2);
    assert_eq!(client.reconnect_state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn probe_uses_configured_method_and_restores_connection() {
    let transport = ScriptedTransport::new(Reply::Result(json!(100)));
    transport.push(Reply::Refused);
    let client = client_with(
        &transport,
        ClientSettings {
            probe_method: "getblockcount".into(),
            ..settings(5)
        },
    );
    let mut events = client.subscribe(&EventKind::LIFECYCLE);

    client.get_balance(None, None).await.unwrap_err();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(transport.sent_methods(), vec!["getbalance", "getblockcount"]);
    assert_eq!(transport.sent()[0].1["params"], json!([1]));
    let events = events.drain();
    assert_eq!(events[0], ClientEvent::Disconnected);
    assert!(matches!(events[1], ClientEvent::Error(RpcError::Transport { .. })));
    assert_eq!(&events[2..], &[ClientEvent::Reconnecting { attempt: 1 }, ClientEvent::Connected]);
    assert_eq!(
        client.connection_state(),
        ConnectionState {
            connected: true,
            reconnect_attempts: 0
        }
    );
}

#[tokio::test(start_paused = true)]
async fn probe_answered_with_rpc_error_counts_as_reachable() {
    let transport = ScriptedTransport::new(Reply::RpcError(-32601, "Method not found"));
    transport.push(Reply::Refused);
    let client = client_with(&transport, settings(5));

    client.get_block_count().await.unwrap_err();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(client.is_connected());
    assert_eq!(client.reconnect_state(), SchedulerState::Idle);
}

#[tokio::test]
async fn malformed_body_is_decode_error_and_reachable() {
    let transport = ScriptedTransport::new(Reply::Raw(json!({"result": 1})));
    let client = client_with(&transport, settings(3));

    let err = client.get_block_count().await.unwrap_err();

    assert!(err.is_decode());
    assert!(client.is_connected());
    assert!(!client.has_pending_reconnect());
}

#[tokio::test]
async fn wrong_result_shape_is_decode_error() {
    let transport = ScriptedTransport::new(Reply::Result(json!("not a number")));
    let client = client_with(&transport, settings(3));

    assert!(client.get_block_count().await.unwrap_err().is_decode());
}

#[tokio::test]
async fn trace_events_bracket_each_call() {
    let transport = ScriptedTransport::new(Reply::Result(json!(7)));
    let client = client_with(&transport, settings(3));
    let mut trace = client.subscribe(&[EventKind::Request, EventKind::Response]);

    client.get_block_count().await.unwrap();

    let events = trace.drain();
    assert_eq!(
        events[0],
        ClientEvent::Request {
            id: 1,
            method: "getblockcount".into()
        }
    );
    match &events[1] {
        ClientEvent::Response { id, method, outcome, .. } => {
            assert_eq!(*id, 1);
            assert_eq!(method, "getblockcount");
            assert_eq!(*outcome, CallOutcome::Success);
        },
        other => panic!("unexpected event {:?}", other),
    }
    assert!(client.last_request_latency().is_some());
}

struct StateProbe {
    client: RpcClient,
    seen: Arc<Mutex<Vec<bool>>>,
}

impl EventSender for StateProbe {
    fn send(&self, _event: ClientEvent) -> bool {
        self.seen.lock().unwrap().push(self.client.is_connected());
        true
    }
}

#[tokio::test]
async fn subscribers_observe_updated_state_and_can_unsubscribe() {
    let transport = ScriptedTransport::new(Reply::Refused);
    transport.push(Reply::Result(json!(1)));
    let client = client_with(
        &transport,
        ClientSettings {
            auto_reconnect: false,
            ..Default::default()
        },
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let id = client.on(
        &[EventKind::Connected, EventKind::Disconnected],
        StateProbe {
            client: client.clone(),
            seen: seen.clone(),
        },
    );

    client.get_block_count().await.unwrap();
    client.get_block_count().await.unwrap_err();
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);

    assert!(client.off(id));
    client.get_block_count().await.unwrap_err();
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn frequent_caller_failures_do_not_postpone_reconnection() {
    let transport = ScriptedTransport::new(Reply::Refused);
    let client = client_with(&transport, settings(3));
    let mut events = client.subscribe(&[EventKind::Reconnecting]);

    // Callers fail more often than the 100ms interval.
    for _ in 0..40 {
        client.get_block_count().await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    assert_eq!(reconnect_attempts(&events.drain()), vec![1, 2, 3]);
    assert_eq!(client.reconnect_state(), SchedulerState::Exhausted);
}

#[tokio::test]
async fn send_raw_transaction_shapes_params_and_returns_txid() {
    let transport = ScriptedTransport::new(Reply::Result(json!("9f2c")));
    let client = client_with(&transport, settings(3));

    assert_eq!(client.send_raw_transaction("00ff", None).await.unwrap(), "9f2c");
    client.send_raw_transaction("00ff", Some(true)).await.unwrap();

    assert_eq!(transport.sent_methods(), vec!["sendrawtransaction", "sendrawtransaction"]);
    assert_eq!(transport.sent_params(), vec![json!(["00ff", false]), json!(["00ff", true])]);
}

#[tokio::test]
async fn rejected_raw_transaction_is_protocol_error() {
    let transport = ScriptedTransport::new(Reply::RpcError(-26, "txn-mempool-conflict"));
    let client = client_with(&transport, settings(3));

    let err = client.send_raw_transaction("00ff", None).await.unwrap_err();

    assert!(err.is_protocol());
    assert_eq!(err.code(), -26);
    assert!(client.is_connected());
    assert!(!client.has_pending_reconnect());
}

#[tokio::test]
async fn sign_raw_transaction_omits_absent_arrays_and_ends_with_sighash() {
    let transport = ScriptedTransport::new(Reply::Result(json!({"hex": "00ff", "complete": true})));
    let client = client_with(&transport, settings(3));
    let input = json!({"txid": "ab", "vout": 0, "scriptPubKey": "76a9"});

    client.sign_raw_transaction("00ff", None, None, None).await.unwrap();
    client
        .sign_raw_transaction("00ff", Some(vec![input.clone()]), Some(vec!["key1".into()]), Some("NONE"))
        .await
        .unwrap();
    client
        .sign_raw_transaction("00ff", None, Some(vec!["key1".into()]), None)
        .await
        .unwrap();

    assert_eq!(
        transport.sent_params(),
        vec![
            json!(["00ff", "ALL"]),
            json!(["00ff", [input], ["key1"], "NONE"]),
            json!(["00ff", ["key1"], "ALL"]),
        ]
    );
}

#[tokio::test]
async fn get_new_address_defaults_to_unlabelled_legacy() {
    let transport = ScriptedTransport::new(Reply::Result(json!("SHAHnew1")));
    let client = client_with(&transport, settings(3));

    assert_eq!(client.get_new_address(None, None).await.unwrap(), "SHAHnew1");
    client.get_new_address(Some("savings"), Some("bech32")).await.unwrap();

    assert_eq!(
        transport.sent_params(),
        vec![json!(["", "legacy"]), json!(["savings", "bech32"])]
    );
}

#[tokio::test]
async fn get_block_defaults_verbosity_to_one() {
    let transport = ScriptedTransport::new(Reply::Result(json!({"hash": "00ab"})));
    let client = client_with(&transport, settings(3));

    client.get_block("00ab", None).await.unwrap();
    client.get_block("00ab", Some(2)).await.unwrap();
    client.get_block_by_height(42, None).await.unwrap();
    client.get_block_by_height(42, Some(0)).await.unwrap();

    assert_eq!(transport.sent_methods(), vec!["getblock"; 4]);
    assert_eq!(
        transport.sent_params(),
        vec![json!(["00ab", 1]), json!(["00ab", 2]), json!([42, 1]), json!([42, 0])]
    );
}

#[tokio::test]
async fn create_raw_transaction_sends_inputs_then_outputs() {
    let transport = ScriptedTransport::new(Reply::Result(json!("0200")));
    let client = client_with(&transport, settings(3));
    let inputs = vec![TxInputRef {
        txid: "ff00".into(),
        vout: 1,
    }];
    let outputs = BTreeMap::from([("SHAHaddr1".to_string(), 1.5)]);

    assert_eq!(client.create_raw_transaction(&inputs, &outputs).await.unwrap(), "0200");

    assert_eq!(
        transport.sent_params(),
        vec![json!([[{"txid": "ff00", "vout": 1}], {"SHAHaddr1": 1.5}])]
    );
}

#[tokio::test]
async fn transaction_lookups_use_default_flags() {
    let transport = ScriptedTransport::new(Reply::Result(json!({"txid": "ab"})));
    let client = client_with(&transport, settings(3));

    client.get_transaction("ab", None).await.unwrap();
    client.get_raw_transaction("ab", None).await.unwrap();
    client.validate_address("SHAHaddr1").await.unwrap();

    assert_eq!(
        transport.sent_methods(),
        vec!["gettransaction", "getrawtransaction", "validateaddress"]
    );
    assert_eq!(
        transport.sent_params(),
        vec![json!(["ab", false]), json!(["ab", true]), json!(["SHAHaddr1"])]
    );
}

#[tokio::test]
async fn get_utxos_passes_address_and_decodes_entries() {
    let transport = ScriptedTransport::new(Reply::Result(json!([
        {"txid": "ff00", "vout": 0, "address": "SHAHaddr1", "scriptPubKey": "76a9", "amount": 2.5}
    ])));
    let client = client_with(&transport, settings(3));

    let utxos = client.get_utxos("SHAHaddr1").await.unwrap();

    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].amount, 2.5);
    assert_eq!(transport.sent_params(), vec![json!(["SHAHaddr1"])]);
}
