//! log4rs encoder that appends a record's key-values after the pattern output.
//!
//! Values containing whitespace (or empty ones) are quoted so each line stays
//! splittable on spaces.

use log::{
    Record,
    kv::{Error, Key, Value, VisitSource},
};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::encode::{Color, Encode, Style, Write};
use serde::Deserialize;

const DEFAULT_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} {m}";

#[derive(Debug, Default, Deserialize)]
pub struct KvConsoleEncoderConfig {
    pub pattern: Option<String>,
    #[serde(default)]
    pub plain: bool,
}

#[derive(Debug)]
pub struct KvConsoleEncoder {
    delegate: PatternEncoder,
    plain: bool,
}

impl KvConsoleEncoder {
    pub fn new(pattern: &str, plain: bool) -> Self {
        Self {
            delegate: PatternEncoder::new(pattern),
            plain,
        }
    }
}

impl Encode for KvConsoleEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record) -> anyhow::Result<()> {
        self.delegate.encode(w, record)?;

        let mut pairs = PairCollector::default();
        record
            .key_values()
            .visit(&mut pairs)
            .map_err(|e| anyhow::anyhow!("could not read record key-values: {}", e))?;

        for (key, value) in pairs.0 {
            if !self.plain {
                w.set_style(Style::new().text(Color::Cyan))?;
            }
            write!(w, " {}=", key)?;
            if !self.plain {
                w.set_style(&Style::default())?;
            }
            write!(w, "{}", value)?;
        }

        w.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Default)]
struct PairCollector(Vec<(String, String)>);

impl<'kvs> VisitSource<'kvs> for PairCollector {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), Error> {
        self.0.push((key.to_string(), render_value(&value.to_string())));
        Ok(())
    }
}

fn render_value(raw: &str) -> String {
    if raw.is_empty() || raw.contains(char::is_whitespace) {
        format!("{:?}", raw)
    } else {
        raw.to_string()
    }
}

pub struct KvConsoleEncoderDeserializer;

impl log4rs::config::Deserialize for KvConsoleEncoderDeserializer {
    type Trait = dyn Encode;
    type Config = KvConsoleEncoderConfig;

    fn deserialize(
        &self,
        config: KvConsoleEncoderConfig,
        _: &log4rs::config::Deserializers,
    ) -> anyhow::Result<Box<dyn Encode>> {
        let pattern = config.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        Ok(Box::new(KvConsoleEncoder::new(pattern, config.plain)))
    }
}
