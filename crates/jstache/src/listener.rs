// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP accept loop.
//!
//! Every accepted client gets its own task running a [`Connection`]. At most
//! `handler.max_connections` clients are served at once; further clients wait in the
//! kernel backlog until a slot frees up. Accept errors are logged and never end the
//! loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::Config;
use crate::connection::Connection;
use crate::envelope::BulkEnvelopeBuilder;
use crate::errors::RelayError;
use crate::forwarder::Forwarder;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct Listener {
    listener: TcpListener,
    config: Arc<Config>,
    builder: Arc<BulkEnvelopeBuilder>,
    forwarder: Arc<dyn Forwarder>,
    connections: Arc<Semaphore>,
    cancel_token: CancellationToken,
}

impl Listener {
    /// Binds the configured address. Failing to bind is the only fatal relay error.
    pub async fn bind(
        config: Arc<Config>,
        forwarder: Arc<dyn Forwarder>,
        cancel_token: CancellationToken,
    ) -> Result<Self, RelayError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;

        Ok(Self {
            listener,
            builder: Arc::new(BulkEnvelopeBuilder::from_config(&config)),
            connections: Arc::new(Semaphore::new(config.max_connections)),
            config,
            forwarder,
            cancel_token,
        })
    }

    /// The bound address; differs from the configured one when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listener.local_addr().map_err(RelayError::LocalAddr)
    }

    /// Accepts clients until the cancel token fires. Connections already being served
    /// keep running to completion.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Listening on {}", addr),
            Err(e) => error!("Listening on unknown address: {}", e),
        }

        loop {
            let permit = tokio::select! {
                permit = self.connections.clone().acquire_owned() => permit,
                () = self.cancel_token.cancelled() => break,
            };
            let Ok(permit) = permit else {
                // Only happens if the semaphore is closed, which nothing does.
                break;
            };

            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = self.cancel_token.cancelled() => break,
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!(
                        "Client connected: {}. Shipping to ES index: {} type: {}",
                        peer, self.config.es_index, self.config.es_type
                    );
                    let mut connection = Connection::accept(
                        stream,
                        peer,
                        &self.config,
                        Arc::clone(&self.builder),
                        Arc::clone(&self.forwarder),
                    );
                    tokio::spawn(
                        async move {
                            connection.run().await;
                            drop(permit);
                        }
                        .instrument(info_span!("connection", peer = %peer)),
                    );
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    drop(permit);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        debug!("Stopped accepting connections");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::ForwardError;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingForwarder {
        bodies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Forwarder for RecordingForwarder {
        async fn forward(&self, body: String) -> Result<(), ForwardError> {
            self.bodies.lock().unwrap().push(body);
            Ok(())
        }
    }

    fn local_config() -> Config {
        Config {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..Default::default()
        }
    }

    async fn wait_for_bodies(forwarder: &RecordingForwarder, count: usize) -> Vec<String> {
        timeout(Duration::from_secs(5), async {
            loop {
                let bodies = forwarder.bodies.lock().unwrap().clone();
                if bodies.len() >= count {
                    return bodies;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_accepts_and_forwards() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let cancel_token = CancellationToken::new();
        let listener = Listener::bind(
            Arc::new(local_config()),
            forwarder.clone(),
            cancel_token.clone(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(listener.run().in_current_span());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"{\"probe\":\"cpu\"}\n").await.unwrap();

        let bodies = wait_for_bodies(&forwarder, 1).await;
        assert!(bodies[0].starts_with("{\"index\":{\"_index\":\"logstash-"));
        assert!(bodies[0].ends_with("\"probe\":\"cpu\"}"));
        assert!(logs_contain("Shipping to ES index: logstash type: jstache"));

        cancel_token.cancel();
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_queues_extra_clients() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let cancel_token = CancellationToken::new();
        let config = Config {
            max_connections: 1,
            ..local_config()
        };
        let listener = Listener::bind(Arc::new(config), forwarder.clone(), cancel_token.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(listener.run());

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"{\"n\":1}\n").await.unwrap();
        wait_for_bodies(&forwarder, 1).await;

        // Connects through the backlog, but is not served while the first client is.
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"{\"n\":2}\n").await.unwrap();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(forwarder.bodies.lock().unwrap().len(), 1);

        drop(first);
        let bodies = wait_for_bodies(&forwarder, 2).await;
        assert!(bodies[1].ends_with("\"n\":2}"));

        cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_leaves_running_connections_alone() {
        let forwarder = Arc::new(RecordingForwarder::default());
        let cancel_token = CancellationToken::new();
        let listener = Listener::bind(
            Arc::new(local_config()),
            forwarder.clone(),
            cancel_token.clone(),
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(listener.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"{\"n\":1}\n").await.unwrap();
        wait_for_bodies(&forwarder, 1).await;

        cancel_token.cancel();
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();

        client.write_all(b"{\"n\":2}\n").await.unwrap();
        let bodies = wait_for_bodies(&forwarder, 2).await;
        assert!(bodies[1].ends_with("\"n\":2}"));
    }

    #[tokio::test]
    async fn test_local_addr_reports_the_ephemeral_port() {
        let listener = Listener::bind(
            Arc::new(local_config()),
            Arc::new(RecordingForwarder::default()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let addr = listener.local_addr().unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_names_the_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            port: taken.local_addr().unwrap().port(),
            ..local_config()
        };

        let result = Listener::bind(
            Arc::new(config),
            Arc::new(RecordingForwarder::default()),
            CancellationToken::new(),
        )
        .await;

        match result {
            Err(RelayError::Bind { addr, .. }) => {
                assert_eq!(addr, taken.local_addr().unwrap());
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("bound a port that is already in use"),
        }
    }
}
