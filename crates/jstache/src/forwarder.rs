// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of bulk envelopes to the HTTP endpoint.
//!
//! Delivery is best effort: one POST per document, no retries, no buffering. A failed
//! request is reported to the caller, which logs it and moves on to the next line.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE,
};
use tracing::debug;

use crate::config::Config;
use crate::errors::ForwardError;

/// Sends one prepared `_bulk` body downstream.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, body: String) -> Result<(), ForwardError>;
}

/// [`Forwarder`] posting to the configured bulk endpoint with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HttpForwarder {
    pub fn new(config: &Config) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            headers: build_headers(config)?,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn build_headers(config: &Config) -> Result<HeaderMap, ForwardError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    if config.has_credentials() {
        let mut value =
            HeaderValue::from_str(&basic_auth_value(&config.http_user, &config.http_pass))
                .map_err(|_| ForwardError::InvalidHeader("Authorization"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

/// `Basic` followed by the standard base64 encoding of `user:pass`.
#[must_use]
pub fn basic_auth_value(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, body: String) -> Result<(), ForwardError> {
        let content_length = body.len();
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(CONTENT_LENGTH, content_length)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ForwardError::Status { status, body: text });
        }

        debug!("Bulk request accepted with {}: {}", status, text);
        Ok(())
    }
}
