pub mod loader;

use serde::{Deserialize, Serialize};

use crate::cli::NodeArgs;
use crate::rpc::{ClientSettings, RpcConfig};

pub use loader::{get_default_config, load_configuration, write_config_to};

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    pub client: ClientSettings,
}

impl AppConfig {
    /// Command-line values win over file and environment.
    pub fn apply_node(&mut self, args: &NodeArgs) {
        if let Some(host) = &args.host {
            self.rpc.host = host.clone();
        }
        if let Some(port) = args.port {
            self.rpc.port = port;
        }
        if let Some(username) = &args.rpc_user {
            self.rpc.username = Some(username.clone());
        }
        if let Some(password) = &args.rpc_password {
            self.rpc.password = Some(password.clone());
        }
        if let Some(timeout_ms) = args.timeout_ms {
            self.rpc.timeout_ms = timeout_ms;
        }
        if args.tls {
            self.rpc.use_tls = true;
        }
        if args.no_reconnect {
            self.client.auto_reconnect = false;
        }
    }
}
