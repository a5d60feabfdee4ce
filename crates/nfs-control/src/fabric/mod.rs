// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fabric management: compute and network resources behind entities.
//!
//! [`FabricManager`] is the contract the control state drives. The only
//! implementation is [`ContainerFabric`], which composes a [`ComputeDriver`]
//! (containers on a set of hosts) with a [`NetworkDriver`] (virtual switch).
//! Which drivers back it is picked once from [`FabricKind`].

pub mod container;
pub mod docker;
pub mod ovs;
pub mod saga;
pub mod sim;

pub use container::{ComputeDriver, ContainerFabric, ContainerSpec, CpuAllocation, NetworkDriver};
pub use docker::DockerCli;
pub use ovs::{AddressPool, OvsSwitch};
pub use sim::{SimCompute, SimFault, SimNetwork};

use crate::config::FabricConfig;
use crate::topology::{Entity, Topology, TopologyError};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Fabric errors.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("compute backend error: {0}")]
    Compute(String),

    #[error("network backend error: {0}")]
    Network(String),

    #[error("address pool exhausted")]
    AddressExhausted,

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Role of a provisioned entity, with what that role needs to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// SIP traffic server.
    Server,
    /// SIP traffic client calling `server_ip`.
    Client { server_ip: Ipv4Addr },
    /// In-line monitoring network function.
    Monitor,
}

impl Role {
    /// Prefix of generated entity ids.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            Role::Server => "sipp-server",
            Role::Client { .. } => "sipp-client",
            Role::Monitor => "snort",
        }
    }
}

/// Fabric backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FabricKind {
    /// Docker hosts plus a local Open vSwitch bridge.
    #[default]
    Docker,
    /// In-process drivers, nothing is touched on the machine.
    Simulated,
}

/// Provisioning, routing and CPU control over entities.
///
/// The topology is owned by the caller and passed in, so that every change
/// to it happens under the caller's lock.
pub trait FabricManager: Send {
    /// Prepare the backends. Called once before any other operation.
    fn setup(&mut self) -> Result<(), FabricError>;

    /// Destroy every remaining entity, leaves first, then release the backends.
    fn teardown(&mut self, topology: &mut Topology) -> Result<(), FabricError>;

    /// Create, start and attach a new entity, registering it as pending.
    ///
    /// On failure every step already taken is undone.
    fn provision(
        &mut self,
        topology: &mut Topology,
        role: Role,
        host: &str,
        shares: u32,
    ) -> Result<Entity, FabricError>;

    /// Stop and remove an entity. Keeps going past failures and returns the
    /// first one.
    fn destroy(&mut self, topology: &mut Topology, entity: &Entity) -> Result<(), FabricError>;

    /// Send traffic from `client` to `server` through `router`.
    fn route(
        &mut self,
        topology: &mut Topology,
        client: &Entity,
        router: &Entity,
        server: &Entity,
    ) -> Result<(), FabricError>;

    /// Change the CPU allocation of an entity.
    fn set_shares(&mut self, entity: &Entity, shares: u32) -> Result<(), FabricError>;
}

/// Build the fabric manager selected by `config.kind`.
pub fn build_fabric(config: &FabricConfig) -> Box<dyn FabricManager> {
    match config.kind {
        FabricKind::Docker => Box::new(ContainerFabric::new(
            DockerCli::new(config.hosts.clone(), config.stop_timeout_secs),
            OvsSwitch::new(&config.network),
            config,
        )),
        FabricKind::Simulated => Box::new(ContainerFabric::new(
            SimCompute::new(config.hosts.keys().cloned()),
            SimNetwork::new(&config.network),
            config,
        )),
    }
}
