// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk API envelope construction.
//!
//! Every forwarded document becomes a two-line `_bulk` body:
//!
//! ```text
//! {"index":{"_index":"logstash-2024.03.02","_type":"jstache"}}
//! {"@timestamp":"2024-03-02T10:15:00.123Z","level":"info","msg":"hello"}
//! ```
//!
//! The document line is the client's text, untouched except for the `@timestamp` key
//! spliced in front of the first key of objects that do not carry one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::Config;

pub const TIMESTAMP_FIELD: &str = "@timestamp";

const INDEX_DATE_FORMAT: &str = "%Y.%m.%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Action line and document line of a single bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkEnvelope {
    pub action: String,
    pub document: String,
}

impl BulkEnvelope {
    /// The request body: both lines joined by a single newline.
    #[must_use]
    pub fn into_body(self) -> String {
        let mut body = self.action;
        body.reserve(self.document.len() + 1);
        body.push('\n');
        body.push_str(&self.document);
        body
    }
}

impl fmt::Display for BulkEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.action, self.document)
    }
}

#[derive(Debug, Clone)]
pub struct BulkEnvelopeBuilder {
    index: String,
    doc_type: String,
}

impl BulkEnvelopeBuilder {
    #[must_use]
    pub fn new(index: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.es_index.clone(), config.es_type.clone())
    }

    /// Wraps an already validated JSON document.
    #[must_use]
    pub fn build(&self, document: &str, now: DateTime<Utc>) -> BulkEnvelope {
        BulkEnvelope {
            action: self.action_line(now),
            document: inject_timestamp(document, now),
        }
    }

    #[must_use]
    pub fn action_line(&self, now: DateTime<Utc>) -> String {
        let index = format!("{}-{}", self.index, now.format(INDEX_DATE_FORMAT));
        json!({
            "index": {
                "_index": index,
                "_type": self.doc_type,
            }
        })
        .to_string()
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-03-02T00:00:00.000Z`.
#[must_use]
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

fn inject_timestamp(document: &str, now: DateTime<Utc>) -> String {
    if document.contains(TIMESTAMP_FIELD) {
        return document.to_string();
    }
    let Some(members) = document.strip_prefix('{') else {
        return document.to_string();
    };

    let field = format!("\"{TIMESTAMP_FIELD}\":\"{}\"", format_timestamp(now));
    let mut out = String::with_capacity(document.len() + field.len() + 2);
    out.push('{');
    out.push_str(&field);
    if !members.trim_start().starts_with('}') {
        out.push(',');
    }
    out.push_str(members);
    out
}
