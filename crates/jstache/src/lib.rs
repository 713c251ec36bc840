// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # jstache
//!
//! A small relay between probes and Elasticsearch. Probes open a TCP connection and
//! write one JSON document per line; every well-formed document is wrapped in a
//! `_bulk` index action and POSTed to the configured endpoint.
//!
//! - [`listener`]: accept loop and per-connection tasks
//! - [`connection`]: read, validate, wrap and forward pipeline of one client
//! - [`codec`]: newline framing
//! - [`envelope`]: bulk action line and `@timestamp` injection
//! - [`forwarder`]: HTTP delivery
//! - [`config`]: properties file and environment configuration
//! - [`logger`]: log line format

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod errors;
pub mod forwarder;
pub mod listener;
pub mod logger;
