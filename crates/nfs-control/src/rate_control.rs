// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Call-rate control of traffic clients.
//!
//! sipp listens for remote commands on a UDP port; `cset rate N` changes the
//! call rate of a running client.

use crate::topology::Entity;
use std::net::{SocketAddr, UdpSocket};
use thiserror::Error;
use tracing::info;

/// Rate control errors.
#[derive(Debug, Error)]
pub enum RateControlError {
    #[error("rate control I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel used to change the call rate of a traffic client.
pub trait RateControl: Send {
    fn set_rate(&mut self, client: &Entity, rate: u32) -> Result<(), RateControlError>;
}

/// Sends sipp remote-control datagrams.
#[derive(Debug)]
pub struct UdpRateControl {
    port: u16,
}

impl UdpRateControl {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Datagram body setting the call rate.
pub fn rate_message(rate: u32) -> String {
    format!("cset rate {}", rate)
}

impl RateControl for UdpRateControl {
    fn set_rate(&mut self, client: &Entity, rate: u32) -> Result<(), RateControlError> {
        let target = SocketAddr::from((client.ip, self.port));
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.send_to(rate_message(rate).as_bytes(), target)?;
        info!("Set call rate of {} ({}) to {}", client.id, target, rate);
        Ok(())
    }
}
