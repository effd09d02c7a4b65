pub mod cli;
pub mod config;
pub mod log;
pub mod rpc;

pub use crate::config::AppConfig;
pub use crate::rpc::{ClientSettings, RpcClient, RpcConfig, RpcError};
