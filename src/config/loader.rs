use std::{fs, fs::File, io::Write, path::Path};

use anyhow::{Context, Result};
use config::{Config, Environment};
use log::{debug, info};

use super::AppConfig;

pub const ENV_PREFIX: &str = "SHAHCOIN";

pub fn get_default_config() -> &'static str {
    include_str!("../../config/config.toml")
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__")
}

/// Loads the configuration at `path`, creating it from the defaults when
/// missing, with `SHAHCOIN_<SECTION>__<KEY>` environment variables layered on top.
pub fn load_configuration(path: &Path) -> Result<AppConfig> {
    load_with_environment(path, environment())
}

fn load_with_environment(path: &Path, environment: Environment) -> Result<AppConfig> {
    if !path.exists() {
        write_config_to(path, get_default_config()).context("Could not create default config")?;
        info!(path:% = path.display(); "Created new configuration file");
    }

    let filename = path.to_str().context("Invalid config file path")?;

    let cfg = Config::builder()
        .add_source(config::File::with_name(filename))
        .add_source(environment)
        .build()
        .context("Could not build config")?;

    let app_config: AppConfig = cfg.try_deserialize().context("Invalid configuration")?;
    debug!(
        host = app_config.rpc.host.as_str(),
        port = app_config.rpc.port,
        auto_reconnect = app_config.client.auto_reconnect;
        "Configuration loaded"
    );
    Ok(app_config)
}

pub fn write_config_to(path: &Path, source: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create parent directories")?;
    };

    let mut file = File::create(path).context("Failed to create config file")?;
    file.write_all(source.as_bytes())
        .context("Failed to write config content")?;
    Ok(())
}
