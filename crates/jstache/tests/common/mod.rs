// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for running a relay against a mock bulk endpoint.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use jstache::config::Config;
use jstache::forwarder::HttpForwarder;
use jstache::listener::Listener;
use mockito::Mock;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

pub struct TestRelay {
    pub addr: SocketAddr,
    pub cancel_token: CancellationToken,
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Relay configuration listening on an ephemeral localhost port.
pub fn relay_config(bulk_url: String) -> Config {
    Config {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        url: bulk_url,
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub async fn start_relay(config: Config) -> TestRelay {
    let forwarder = HttpForwarder::new(&config).expect("failed to build forwarder");
    let cancel_token = CancellationToken::new();
    let listener = Listener::bind(Arc::new(config), Arc::new(forwarder), cancel_token.clone())
        .await
        .expect("failed to bind relay");
    let addr = listener.local_addr().expect("relay has no address");
    tokio::spawn(listener.run());
    TestRelay { addr, cancel_token }
}

/// Writes `payload` on a fresh connection and closes the write side.
pub async fn send(addr: SocketAddr, payload: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr)
        .await
        .expect("unable to connect to relay");
    stream
        .write_all(payload)
        .await
        .expect("unable to write payload");
    stream.shutdown().await.expect("unable to shut down write side");
    stream
}

/// Polls `mock` until its expectations are met, then asserts them.
pub async fn wait_for(mock: &Mock) {
    let poll = async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(20)).await;
        }
    };
    match timeout(Duration::from_secs(5), poll).await {
        Ok(()) => mock.assert_async().await,
        Err(_) => panic!("timed out before the bulk endpoint received the documents"),
    }
}
