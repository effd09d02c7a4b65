pub mod kv_console_encoder;

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use log4rs::{
    Config,
    config::{Deserializers, RawConfig},
};

use crate::log::kv_console_encoder::KvConsoleEncoderDeserializer;

pub const DEFAULT_LOG_CONFIG_PATH: &str = "log4rs.yml";

fn deserializers() -> Deserializers {
    let mut deserializers = Deserializers::default();
    deserializers.insert("kv_console", KvConsoleEncoderDeserializer);
    deserializers
}

/// Initializes logging from `path` when it exists, otherwise from the
/// embedded defaults.
///
/// A present but broken external file is an error rather than a silent
/// fallback.
pub fn init_logging(path: &Path) -> Result<()> {
    if path.exists() {
        log4rs::init_file(path, deserializers())
            .with_context(|| format!("Failed to load logging configuration from {}", path.display()))?;
        info!(path:% = path.display(); "Logging initialized from external configuration");
        return Ok(());
    }

    let config = embedded_config()?;
    log4rs::init_config(config).context("Failed to initialize logging from embedded config")?;
    debug!("Logging initialized from embedded defaults");
    Ok(())
}

fn embedded_config() -> Result<Config> {
    let yaml_content = include_str!("../../resources/default_log4rs.yml");
    let raw_config: RawConfig =
        serde_yaml::from_str(yaml_content).context("Embedded logging configuration is invalid YAML")?;

    let (appenders, errors) = raw_config.appenders_lossy(&deserializers());
    if !errors.is_empty() {
        return Err(anyhow!("Errors parsing embedded appenders: {:?}", errors));
    }

    Config::builder()
        .appenders(appenders)
        .loggers(raw_config.loggers())
        .build(raw_config.root())
        .context("Failed to build logging config")
}

fn reveal_pii() -> bool {
    static REVEAL_PII_CACHE: OnceLock<bool> = OnceLock::new();

    *REVEAL_PII_CACHE.get_or_init(|| {
        std::env::var("REVEAL_PII")
            .map(|v| parse_flag(&v))
            .unwrap_or(false)
    })
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "1"
}

/// Masks an address, keeping only its first and last six characters.
/// Returned unchanged when REVEAL_PII is set.
pub fn mask_string(s: &str) -> String {
    if reveal_pii() {
        return s.to_string();
    }
    mask(s)
}

fn mask(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }

    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Placeholder for coin amounts unless REVEAL_PII is set.
pub fn mask_amount(amount: f64) -> String {
    if reveal_pii() {
        return amount.to_string();
    }

    "<REDACTED>".to_string()
}
