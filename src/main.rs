use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde_json::{Value, json};
use shahcoin_rpc::cli::{Cli, Commands, parse_param};
use shahcoin_rpc::config::load_configuration;
use shahcoin_rpc::log::{init_logging, mask_amount, mask_string};
use shahcoin_rpc::rpc::RpcClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_config)?;

    let mut config = load_configuration(&cli.config)?;
    config.apply_node(&cli.node);

    let client = RpcClient::new(config.rpc, config.client).context("Could not create RPC client")?;
    info!(url:% = client.endpoint_url(); "Using node");

    let result = run(&client, cli.command).await;
    client.disconnect();

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(client: &RpcClient, command: Commands) -> Result<Value> {
    match command {
        Commands::Info => {
            let chain = client.get_blockchain_info().await?;
            let network = client.get_network_info().await?;
            let mining = client.get_mining_info().await?;
            Ok(json!({
                "chain": chain,
                "network": network,
                "mining": mining,
            }))
        },
        Commands::Balance { address, minconf } => {
            let balance = client.get_balance(address.as_deref(), Some(minconf)).await?;
            info!(
                address = &*address.as_deref().map(mask_string).unwrap_or_else(|| "wallet".to_string()),
                balance = &*mask_amount(balance);
                "Balance fetched"
            );
            Ok(json!(balance))
        },
        Commands::Call { method, params } => {
            let params = params.iter().map(|p| parse_param(p)).collect();
            let value: Value = client.call(&method, params).await?;
            Ok(value)
        },
    }
}
