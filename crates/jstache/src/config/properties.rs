// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Java-style `.properties` configuration.
//!
//! Only the subset the relay needs is understood: one `key=value` (or `key:value`) pair
//! per line, `#` and `!` comment lines, and blank lines. Dotted keys become nested
//! dictionaries, so `handler.url` is read as `handler -> url`.

use std::path::{Path, PathBuf};

use figment::{
    value::{Dict, Map, Value},
    Error, Figment, Metadata, Profile, Provider,
};
use tracing::{debug, info};

use crate::config::{merge_config, Config, ConfigError, ConfigSource, RawConfig};

/// A figment [`Provider`] reading properties from a file or from memory.
pub struct Properties {
    source: Source,
}

enum Source {
    File(PathBuf),
    Inline(&'static str, String),
}

impl Properties {
    #[must_use]
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source: Source::File(path.as_ref().to_path_buf()),
        }
    }

    /// Properties held in memory, e.g. the defaults bundled into the binary.
    #[must_use]
    pub fn string(name: &'static str, content: impl Into<String>) -> Self {
        Self {
            source: Source::Inline(name, content.into()),
        }
    }

    /// Parses properties text into a nested dictionary.
    #[must_use]
    pub fn parse(content: &str) -> Dict {
        let mut dict = Dict::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let (key, value) = match line.find(['=', ':']) {
                Some(at) => (line[..at].trim(), line[at + 1..].trim()),
                None => (line, ""),
            };
            if key.is_empty() {
                continue;
            }

            let path: Vec<&str> = key.split('.').collect();
            insert(&mut dict, &path, Value::from(value.to_string()));
        }
        dict
    }
}

/// Inserts `value` at the dotted `path`, replacing any scalar found on the way.
pub(crate) fn insert(dict: &mut Dict, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            dict.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = dict
                .entry((*head).to_string())
                .or_insert_with(|| Value::from(Dict::new()));
            if !matches!(entry, Value::Dict(..)) {
                *entry = Value::from(Dict::new());
            }
            if let Value::Dict(_, child) = entry {
                insert(child, rest, value);
            }
        }
    }
}

impl Provider for Properties {
    fn metadata(&self) -> Metadata {
        match &self.source {
            Source::File(path) => Metadata::named(format!("properties file {}", path.display())),
            Source::Inline(name, _) => Metadata::named(*name),
        }
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let dict = match &self.source {
            Source::File(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| Error::from(format!("{}: {e}", path.display())))?;
                Self::parse(&content)
            }
            Source::Inline(_, content) => Self::parse(content),
        };
        Ok(Profile::Default.collect(dict))
    }
}

/// Reads `path` when it exists, the bundled `fallback` properties otherwise.
#[allow(clippy::module_name_repetitions)]
pub struct PropertiesConfigSource {
    path: PathBuf,
    fallback: Option<&'static str>,
}

impl PropertiesConfigSource {
    #[must_use]
    pub fn new(path: PathBuf, fallback: Option<&'static str>) -> Self {
        Self { path, fallback }
    }
}

impl ConfigSource for PropertiesConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let provider = if self.path.is_file() {
            debug!("Loading config from {}", self.path.display());
            Properties::file(&self.path)
        } else if let Some(fallback) = self.fallback {
            info!(
                "User config {} not found, loading default config",
                self.path.display()
            );
            Properties::string("bundled properties", fallback)
        } else {
            return Err(ConfigError::Read(format!(
                "{} does not exist",
                self.path.display()
            )));
        };

        let raw: RawConfig = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        merge_config(config, &raw)
    }
}
