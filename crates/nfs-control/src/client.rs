// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command client.
//!
//! ```no_run
//! # async fn demo() -> Result<(), nfs_control::ClientError> {
//! use nfs_control::CommandClient;
//!
//! let mut client = CommandClient::connect("/tmp/nfs-control.sock").await?;
//! let server = client.start_server("h1", 256).await?;
//! let snort = client.start_snort("h1", 256).await?;
//! let sipp = client.start_client("h2", 256, &server).await?;
//! client.route(&sipp, &server, &snort).await?;
//! # Ok(())
//! # }
//! ```

use crate::command::{Command, Request, Response};
use crate::server::{ConnectionError, FramedConnection};
use std::path::Path;
use thiserror::Error;
use tokio::net::UnixStream;

/// Largest response the client accepts.
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("connection closed by server")]
    Closed,

    /// The server executed the command and reported a failure.
    #[error("{0}")]
    Remote(String),
}

/// Connection to a running control plane.
pub struct CommandClient {
    conn: FramedConnection<UnixStream>,
}

impl CommandClient {
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(ConnectionError::from)?;
        Ok(Self {
            conn: FramedConnection::new(stream, MAX_RESPONSE_SIZE),
        })
    }

    /// Send a raw command and wait for its response.
    pub async fn send(&mut self, command: &Command) -> Result<Response, ClientError> {
        self.conn.send_message(command).await?;
        self.conn
            .read_message::<Response>()
            .await?
            .ok_or(ClientError::Closed)
    }

    /// Send a request, turning an error response into [`ClientError::Remote`].
    pub async fn request(&mut self, request: &Request) -> Result<String, ClientError> {
        let response = self.send(&Command::from(request)).await?;
        if response.is_ok() {
            Ok(response.result)
        } else {
            Err(ClientError::Remote(response.err))
        }
    }

    /// Start a SIP server; returns its id.
    pub async fn start_server(&mut self, host: &str, shares: u32) -> Result<String, ClientError> {
        self.request(&Request::StartServer {
            host: host.to_string(),
            shares,
        })
        .await
    }

    /// Start a SIP client calling `server`; returns its id.
    pub async fn start_client(
        &mut self,
        host: &str,
        shares: u32,
        server: &str,
    ) -> Result<String, ClientError> {
        self.request(&Request::StartClient {
            host: host.to_string(),
            shares,
            server: server.to_string(),
        })
        .await
    }

    /// Start a monitored NF; returns its id.
    pub async fn start_snort(&mut self, host: &str, shares: u32) -> Result<String, ClientError> {
        self.request(&Request::StartSnort {
            host: host.to_string(),
            shares,
        })
        .await
    }

    pub async fn stop(&mut self, cont: &str) -> Result<(), ClientError> {
        self.request(&Request::Stop {
            cont: cont.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn route(&mut self, client: &str, server: &str, router: &str) -> Result<(), ClientError> {
        self.request(&Request::Route {
            client: client.to_string(),
            server: server.to_string(),
            router: router.to_string(),
        })
        .await
        .map(drop)
    }

    pub async fn set_rate(&mut self, client: &str, rate: u32) -> Result<(), ClientError> {
        self.request(&Request::SetRate {
            client: client.to_string(),
            rate,
        })
        .await
        .map(drop)
    }
}
