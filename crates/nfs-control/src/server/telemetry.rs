// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP telemetry feed.
//!
//! Each datagram carries one or more lines of line protocol, as emitted by
//! the collectors running next to the containers.

use super::ServerError;
use crate::state::ControlState;
use crate::telemetry::parse_lines;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Receives telemetry datagrams and feeds them to the control state.
pub struct TelemetryListener {
    socket: UdpSocket,
    state: Arc<ControlState>,
}

impl TelemetryListener {
    pub async fn bind(addr: &str, state: Arc<ControlState>) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;
        Ok(Self { socket, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `cancel` flips to true.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> Result<(), ServerError> {
        info!("Telemetry listener on {}", self.local_addr()?);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            if *cancel.borrow_and_update() {
                break;
            }

            let (len, peer) = tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Telemetry receive error: {}", e);
                        continue;
                    }
                },
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let text = match std::str::from_utf8(&buf[..len]) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Dropping non UTF-8 datagram from {}: {}", peer, e);
                    continue;
                }
            };

            let mut points = Vec::new();
            for parsed in parse_lines(text) {
                match parsed {
                    Ok(point) => points.push(point),
                    Err(e) => warn!("Bad telemetry from {}: {}", peer, e),
                }
            }
            if points.is_empty() {
                continue;
            }

            debug!("{} points from {}", points.len(), peer);
            let state = self.state.clone();
            tokio::task::spawn_blocking(move || state.update(&points))
                .await
                .map_err(|e| ServerError::Task(e.to_string()))?;
        }

        info!("Telemetry listener stopped");
        Ok(())
    }
}
