use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    pub bestblockhash: String,
    pub difficulty: f64,
    pub mediantime: u64,
    pub verificationprogress: f64,
    pub chainwork: String,
    pub pruned: bool,
    pub pruneheight: Option<u64>,
    pub softforks: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInfo {
    pub version: u64,
    pub subversion: String,
    pub protocolversion: u64,
    pub localservices: String,
    pub localrelay: bool,
    pub timeoffset: i64,
    pub networkactive: bool,
    pub connections: u32,
    pub connections_in: u32,
    pub connections_out: u32,
    pub networks: Vec<NetworkReachability>,
    pub relayfee: f64,
    pub incrementalfee: f64,
    pub localaddresses: Vec<LocalAddress>,
    pub warnings: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkReachability {
    pub name: String,
    pub limited: bool,
    pub reachable: bool,
    pub proxy: String,
    pub proxy_randomize_credentials: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAddress {
    pub address: String,
    pub port: u16,
    pub score: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningInfo {
    pub blocks: u64,
    pub currentblockweight: Option<u64>,
    pub currentblocktx: Option<u64>,
    pub difficulty: f64,
    pub networkhashps: f64,
    pub pooledtx: u64,
    pub chain: String,
    pub warnings: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletInfo {
    pub walletname: String,
    pub walletversion: u64,
    pub balance: f64,
    pub unconfirmed_balance: f64,
    pub immature_balance: f64,
    pub txcount: u64,
    pub keypoololdest: Option<u64>,
    pub keypoolsize: u64,
    pub unlocked_until: Option<u64>,
    pub paytxfee: f64,
    pub hdseedid: Option<String>,
    pub private_keys_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub script_pub_key: String,
    pub amount: f64,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub spendable: bool,
    #[serde(default)]
    pub solvable: bool,
    #[serde(default)]
    pub safe: bool,
}

/// Outpoint spent by `createrawtransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInputRef {
    pub txid: String,
    pub vout: u32,
}
