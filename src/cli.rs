use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "shahcoin-rpc")]
#[command(about = "Shahcoin node JSON-RPC client", long_about = None)]
pub struct Cli {
    #[arg(short, long, help = "Path to the configuration file", default_value = "config/config.toml")]
    pub config: PathBuf,
    #[arg(long, help = "Path to a log4rs configuration file", default_value = "log4rs.yml")]
    pub log_config: PathBuf,
    #[command(flatten)]
    pub node: NodeArgs,
    #[command(subcommand)]
    pub command: Commands,
}

/// Connection overrides applied on top of the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct NodeArgs {
    #[arg(long, global = true, help = "Node host name or IP address")]
    pub host: Option<String>,
    #[arg(short, long, global = true, help = "Node RPC port")]
    pub port: Option<u16>,
    #[arg(long, global = true, help = "RPC user name")]
    pub rpc_user: Option<String>,
    #[arg(long, global = true, help = "RPC password")]
    pub rpc_password: Option<String>,
    #[arg(long, global = true, help = "Request timeout in milliseconds")]
    pub timeout_ms: Option<u64>,
    #[arg(long, global = true, help = "Connect over HTTPS")]
    pub tls: bool,
    #[arg(long, global = true, help = "Do not schedule reconnection probes")]
    pub no_reconnect: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show chain, network and mining summaries
    Info,
    /// Show a wallet or address balance
    Balance {
        #[arg(short, long, help = "Address to query. If not provided, the wallet balance is shown")]
        address: Option<String>,
        #[arg(short, long, help = "Minimum confirmations", default_value_t = 1)]
        minconf: u32,
    },
    /// Call any RPC method with positional parameters
    Call {
        #[arg(help = "Method name, e.g. getblockcount")]
        method: String,
        #[arg(help = "Parameters, parsed as JSON when possible and passed as strings otherwise")]
        params: Vec<String>,
    },
}

/// Parses a command-line parameter as JSON, falling back to a plain string.
pub fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
