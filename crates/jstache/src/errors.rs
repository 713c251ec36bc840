// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use reqwest::StatusCode;

/// Fatal relay errors, reported before any connection is accepted.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not read the listener address: {0}")]
    LocalAddr(#[source] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] ForwardError),
}

/// A single document could not be delivered to the bulk endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Request to bulk endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Bulk endpoint answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_error_display() {
        let error = ForwardError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "cluster is red".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Bulk endpoint answered 503 Service Unavailable: cluster is red"
        );

        let error = RelayError::Bind {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5050),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(error.to_string().starts_with("Could not bind 127.0.0.1:5050"));

        let error = RelayError::LocalAddr(std::io::Error::from(std::io::ErrorKind::NotConnected));
        assert!(error
            .to_string()
            .starts_with("Could not read the listener address: "));
        assert!(std::error::Error::source(&error).is_some());
    }
}
