// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control plane for an elastic VoIP network-function test fabric.
//!
//! Provisions SIP traffic servers, SIP traffic clients and in-line
//! monitoring NFs as containers, wires them through a virtual switch and
//! keeps re-balancing the CPU shares of every monitoring NF from telemetry.
//!
//! # Components
//!
//! - [`RingQueue`] and [`WindowedRate`]: per-series sampling primitives
//! - [`Topology`]: wiring of provisioned entities
//! - [`FabricManager`]: provisioning, routing and CPU control
//! - [`AdaptiveController`]: per-NF share feedback loop
//! - [`ControlState`]: owner of all of the above
//! - [`CommandServer`] / [`CommandClient`]: the command socket
//!
//! # Configuration File
//!
//! ```toml
//! [server]
//! socket_path = "/tmp/nfs-control.sock"
//!
//! [telemetry]
//! bind = "127.0.0.1:8089"
//!
//! [control]
//! reference = 1000000
//!
//! [fabric.hosts]
//! h1 = "tcp://10.0.0.1:2375"
//! h2 = "tcp://10.0.0.2:2375"
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod controller;
pub mod fabric;
pub mod rate;
pub mod rate_control;
pub mod ring;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod topology;

pub use client::{ClientError, CommandClient};
pub use command::{Command, CommandCode, CommandError, Request, Response};
pub use config::{ConfigError, ControlConfig};
pub use controller::{AdaptiveController, ControlParams, Metric};
pub use fabric::{build_fabric, FabricError, FabricKind, FabricManager, Role};
pub use rate::{Sample, WindowedRate};
pub use rate_control::{RateControl, RateControlError, UdpRateControl};
pub use ring::{QueueError, RingQueue};
pub use server::{CommandServer, ServerError, ShutdownHandle, TelemetryListener};
pub use state::{ControlState, DispatchError};
pub use telemetry::{FieldValue, LineProtocolError, TelemetryPoint};
pub use topology::{Entity, Topology, TopologyError};
