// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relay configuration.
//!
//! The configuration surface is a flat set of dotted, properties-style keys:
//!
//! ```text
//! server.port=5050
//! handler.url=http://127.0.0.1:9200/_bulk
//! handler.http_user=
//! handler.http_pass=
//! es.index=logstash
//! es.type=jstache
//! handler.buffers=2
//! handler.debug=
//! ```
//!
//! Values are resolved once at startup by a [`ConfigBuilder`] from an ordered list of
//! [`ConfigSource`]s (later sources override earlier ones) and then shared read-only by
//! every connection as an `Arc<Config>`.

pub mod env;
pub mod properties;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

pub const DEFAULT_URL: &str = "http://127.0.0.1:9200/_bulk";
pub const DEFAULT_ES_INDEX: &str = "logstash";
pub const DEFAULT_ES_TYPE: &str = "jstache";
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Properties compiled into the binary, used when no properties file exists.
pub const DEFAULT_PROPERTIES: &str = include_str!("default.properties");

/// Immutable relay configuration.
#[derive(Clone, PartialEq)]
pub struct Config {
    /// Address the listener binds to (`server.host`).
    pub host: IpAddr,
    /// TCP listen port (`server.port`). Zero means "not configured".
    pub port: u16,
    /// Bulk-index endpoint (`handler.url`).
    pub url: String,
    /// Basic-Auth user (`handler.http_user`). Empty disables authentication.
    pub http_user: String,
    /// Basic-Auth password (`handler.http_pass`).
    pub http_pass: String,
    /// Base index name, suffixed with the UTC date per document (`es.index`).
    pub es_index: String,
    /// Document type tag (`es.type`).
    pub es_type: String,
    /// Socket send and receive buffer size in bytes (`handler.buffers`).
    pub socket_buffer_size: usize,
    /// Verbose logging (`handler.debug`).
    pub debug: bool,
    /// HTTP request timeout (`handler.timeout`, seconds).
    pub timeout: Duration,
    /// Maximum number of connections served at once (`handler.max_connections`).
    pub max_connections: usize,
    /// Longest accepted input line in bytes (`handler.max_line_bytes`).
    pub max_line_bytes: usize,
    /// Optional log file (`log.file`).
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            url: DEFAULT_URL.to_string(),
            http_user: String::new(),
            http_pass: String::new(),
            es_index: DEFAULT_ES_INDEX.to_string(),
            es_type: DEFAULT_ES_TYPE.to_string(),
            socket_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            debug: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            log_file: None,
        }
    }
}

impl Config {
    #[must_use]
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Basic-Auth is sent whenever a user is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.http_user.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Missing("server.port"));
        }

        match reqwest::Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::InvalidValue {
                    key: "handler.url",
                    value: self.url.clone(),
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    key: "handler.url",
                    value: self.url.clone(),
                    reason: e.to_string(),
                })
            }
        }

        let positive = [
            ("handler.buffers", self.socket_buffer_size),
            ("handler.max_connections", self.max_connections),
            ("handler.max_line_bytes", self.max_line_bytes),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                    reason: "must be greater than 0".to_string(),
                });
            }
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "handler.timeout",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

// The password never reaches the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("url", &self.url)
            .field("http_user", &self.http_user)
            .field("http_pass", &redact(&self.http_pass))
            .field("es_index", &self.es_index)
            .field("es_type", &self.es_type)
            .field("socket_buffer_size", &self.socket_buffer_size)
            .field("debug", &self.debug)
            .field("timeout", &self.timeout)
            .field("max_connections", &self.max_connections)
            .field("max_line_bytes", &self.max_line_bytes)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "server.host={}", self.host)?;
        writeln!(f, "server.port={}", self.port)?;
        writeln!(f, "handler.url={}", self.url)?;
        writeln!(f, "handler.http_user={}", self.http_user)?;
        writeln!(f, "handler.http_pass={}", redact(&self.http_pass))?;
        writeln!(f, "handler.buffers={}", self.socket_buffer_size)?;
        writeln!(f, "handler.debug={}", self.debug)?;
        writeln!(f, "handler.timeout={}", self.timeout.as_secs())?;
        writeln!(f, "handler.max_connections={}", self.max_connections)?;
        writeln!(f, "handler.max_line_bytes={}", self.max_line_bytes)?;
        writeln!(f, "es.index={}", self.es_index)?;
        write!(f, "es.type={}", self.es_type)?;
        if let Some(path) = &self.log_file {
            write!(f, "\nlog.file={}", path.display())?;
        }
        Ok(())
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "********"
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Read(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Missing required configuration key: {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[allow(clippy::module_name_repetitions)]
pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

#[allow(clippy::module_name_repetitions)]
impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Applies every source in order and validates the result.
    pub fn build(mut self) -> Result<Config, ConfigError> {
        for source in &self.sources {
            source.load(&mut self.config)?;
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Loads the configuration the way the server binary does: bundled defaults or
/// `path`, then `JSTACHE_*` environment variables.
pub fn get_config(path: PathBuf, fallback: Option<&'static str>) -> Result<Config, ConfigError> {
    ConfigBuilder::default()
        .add_source(Box::new(properties::PropertiesConfigSource::new(
            path, fallback,
        )))
        .add_source(Box::new(env::EnvConfigSource))
        .build()
}

/// String-valued view of the configuration keys, shared by every source.
#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub server: RawServer,
    pub handler: RawHandler,
    pub es: RawEs,
    pub log: RawLog,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawServer {
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub host: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub port: Option<String>,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawHandler {
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub url: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub http_user: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub http_pass: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub buffers: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub debug: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub timeout: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub max_connections: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub max_line_bytes: Option<String>,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawEs {
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub index: Option<String>,
    #[serde(rename = "type", deserialize_with = "deserialize_optional_scalar")]
    pub doc_type: Option<String>,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawLog {
    #[serde(deserialize_with = "deserialize_optional_scalar")]
    pub file: Option<String>,
}

/// Overlays every key present in `raw` onto `config`.
pub fn merge_config(config: &mut Config, raw: &RawConfig) -> Result<(), ConfigError> {
    if let Some(host) = &raw.server.host {
        config.host = parse_value("server.host", host)?;
    }
    if let Some(port) = &raw.server.port {
        config.port = parse_value("server.port", port)?;
    }

    let handler = &raw.handler;
    if let Some(url) = &handler.url {
        config.url = url.trim().to_string();
    }
    if let Some(user) = &handler.http_user {
        config.http_user = user.trim().to_string();
    }
    if let Some(pass) = &handler.http_pass {
        config.http_pass = pass.trim().to_string();
    }
    if let Some(buffers) = &handler.buffers {
        config.socket_buffer_size = parse_value("handler.buffers", buffers)?;
    }
    if let Some(debug) = &handler.debug {
        config.debug = !debug.trim().is_empty();
    }
    if let Some(timeout) = &handler.timeout {
        config.timeout = Duration::from_secs(parse_value("handler.timeout", timeout)?);
    }
    if let Some(max_connections) = &handler.max_connections {
        config.max_connections = parse_value("handler.max_connections", max_connections)?;
    }
    if let Some(max_line_bytes) = &handler.max_line_bytes {
        config.max_line_bytes = parse_value("handler.max_line_bytes", max_line_bytes)?;
    }

    if let Some(index) = &raw.es.index {
        config.es_index = index.trim().to_string();
    }
    if let Some(doc_type) = &raw.es.doc_type {
        config.es_type = doc_type.trim().to_string();
    }

    if let Some(file) = &raw.log.file {
        let file = file.trim();
        config.log_file = (!file.is_empty()).then(|| PathBuf::from(file));
    }

    Ok(())
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Accepts strings, numbers and booleans alike, keeping their textual form.
pub fn deserialize_optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Null => Ok(None),
        other => {
            error!(
                "Failed to parse value, expected a string or a number, got: {}, ignoring",
                other
            );
            Ok(None)
        }
    }
}
