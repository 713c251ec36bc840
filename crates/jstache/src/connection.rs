// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-connection pipeline.
//!
//! A [`Connection`] owns one accepted socket and drives it through
//!
//! ```text
//! Connected -> Reading <-> (Validating -> Building -> Forwarding) -> Closing -> Closed
//! ```
//!
//! Lines are handled strictly one after another: the next line is not read until the
//! previous one has been forwarded (or dropped), so a slow endpoint slows down only
//! this connection. Nothing is ever written back to the client.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use socket2::SockRef;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{Line, LineCodec};
use crate::config::Config;
use crate::envelope::BulkEnvelopeBuilder;
use crate::forwarder::Forwarder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reading,
    Validating,
    Building,
    Forwarding,
    Closing,
    Closed,
}

/// What happened to a single input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank after trimming.
    Skipped,
    /// Not well-formed JSON.
    Rejected,
    /// Longer than `handler.max_line_bytes`; discarded up to the next newline.
    Oversized,
    Forwarded,
    /// Valid, but the endpoint did not take it. The document is lost.
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub lines: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub oversized: u64,
    pub forwarded: u64,
    pub failed: u64,
}

impl ConnectionStats {
    fn record(&mut self, outcome: LineOutcome) {
        self.lines += 1;
        match outcome {
            LineOutcome::Skipped => self.skipped += 1,
            LineOutcome::Rejected => self.rejected += 1,
            LineOutcome::Oversized => self.oversized += 1,
            LineOutcome::Forwarded => self.forwarded += 1,
            LineOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lines={} forwarded={} failed={} rejected={} skipped={} oversized={}",
            self.lines, self.forwarded, self.failed, self.rejected, self.skipped, self.oversized
        )
    }
}

pub struct Connection<R, W> {
    peer: SocketAddr,
    lines: Option<FramedRead<R, LineCodec>>,
    writer: Option<BufWriter<W>>,
    builder: Arc<BulkEnvelopeBuilder>,
    forwarder: Arc<dyn Forwarder>,
    cancel_token: CancellationToken,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    /// Takes ownership of an accepted socket and applies the configured buffer sizes.
    pub fn accept(
        stream: TcpStream,
        peer: SocketAddr,
        config: &Config,
        builder: Arc<BulkEnvelopeBuilder>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        configure_socket(&stream, config.socket_buffer_size);
        let (reader, writer) = stream.into_split();
        Self::new(peer, reader, writer, config.max_line_bytes, builder, forwarder)
    }
}

// Tiny buffers keep latency low; the kernel may round them up.
fn configure_socket(stream: &TcpStream, size: usize) {
    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_recv_buffer_size(size) {
        warn!("Failed to set receive buffer size to {}: {}", size, e);
    }
    if let Err(e) = socket.set_send_buffer_size(size) {
        warn!("Failed to set send buffer size to {}: {}", size, e);
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        peer: SocketAddr,
        reader: R,
        writer: W,
        max_line_bytes: usize,
        builder: Arc<BulkEnvelopeBuilder>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            peer,
            lines: Some(FramedRead::new(reader, LineCodec::new(max_line_bytes))),
            writer: Some(BufWriter::new(writer)),
            builder,
            forwarder,
            cancel_token: CancellationToken::new(),
            state: ConnectionState::Connected,
            stats: ConnectionStats::default(),
        }
    }

    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Cancelling the token ends the read loop at the next suspended read.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Reads and forwards lines until end of stream, a read error or cancellation,
    /// then closes the connection.
    pub async fn run(&mut self) {
        loop {
            self.transition(ConnectionState::Reading);
            let Some(lines) = self.lines.as_mut() else {
                break;
            };

            let frame = tokio::select! {
                frame = lines.next() => frame,
                () = self.cancel_token.cancelled() => {
                    debug!("Read loop cancelled");
                    break;
                }
            };

            match frame {
                Some(Ok(Line::Text(line))) => {
                    let outcome = self.handle_line(&line).await;
                    self.stats.record(outcome);
                }
                Some(Ok(Line::Oversized)) => {
                    warn!("Dropping line longer than the configured maximum");
                    self.stats.record(LineOutcome::Oversized);
                }
                Some(Err(e)) => {
                    warn!("Read error: {}", e);
                    break;
                }
                None => {
                    debug!("Peer closed the connection");
                    break;
                }
            }
        }

        self.close().await;
    }

    async fn handle_line(&mut self, line: &str) -> LineOutcome {
        self.transition(ConnectionState::Validating);
        let document = line.trim();
        if document.is_empty() {
            debug!("Skipping empty line");
            return LineOutcome::Skipped;
        }
        if let Err(e) = serde_json::from_str::<serde_json::Value>(document) {
            debug!("Dropping invalid JSON ({}): {}", e, document);
            return LineOutcome::Rejected;
        }

        self.transition(ConnectionState::Building);
        let body = self.builder.build(document, Utc::now()).into_body();
        trace!("Prepared bulk body: {}", body);

        self.transition(ConnectionState::Forwarding);
        match self.forwarder.forward(body).await {
            Ok(()) => LineOutcome::Forwarded,
            Err(e) => {
                error!("Failed to forward document, dropping it: {}", e);
                LineOutcome::Failed
            }
        }
    }

    /// Releases every resource of the connection. Each step runs even if an earlier
    /// one failed, and closing twice is a no-op.
    pub async fn close(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Closing | ConnectionState::Closed
        ) {
            return;
        }
        self.transition(ConnectionState::Closing);

        self.cancel_token.cancel();

        if let Some(lines) = self.lines.take() {
            drop(lines.into_inner());
        }

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Failed to shut down output: {}", e);
            }
        }

        self.transition(ConnectionState::Closed);
        info!("Client disconnected: {}", self.stats);
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
