// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment variable overrides.
//!
//! `JSTACHE_HANDLER__HTTP_USER=probe` overrides `handler.http_user`: the prefix is
//! stripped, the rest is lowercased and `__` separates key segments. Values are kept
//! verbatim as strings.

use figment::{value::Dict, value::Value, Figment, Profile};
use tracing::warn;

use crate::config::{merge_config, properties, Config, ConfigError, ConfigSource, RawConfig};

pub const ENV_PREFIX: &str = "JSTACHE_";

#[allow(clippy::module_name_repetitions)]
pub struct EnvConfigSource;

impl EnvConfigSource {
    /// Collects the prefixed variables from `vars` into a nested dictionary.
    pub fn collect<I>(vars: I) -> Dict
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut dict = Dict::new();
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let rest = rest.to_lowercase();
            let path: Vec<&str> = rest.split("__").filter(|s| !s.is_empty()).collect();
            // Single-segment names such as JSTACHE_CONFIG or JSTACHE_LOG are not keys.
            if path.len() < 2 {
                continue;
            }
            properties::insert(&mut dict, &path, Value::from(value));
        }
        dict
    }
}

/// The process environment, minus entries that are not valid UTF-8.
fn utf8_vars() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(key, value)| {
        match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) if key.starts_with(ENV_PREFIX) => {
                warn!("Ignoring {}: value is not valid UTF-8", key);
                None
            }
            _ => None,
        }
    })
}

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let dict = Self::collect(utf8_vars());
        let raw: RawConfig = Figment::new()
            .merge(figment::providers::Serialized::from(dict, Profile::Default))
            .extract()
            .map_err(|e| ConfigError::Parse(format!("environment: {e}")))?;
        merge_config(config, &raw)
    }
}
