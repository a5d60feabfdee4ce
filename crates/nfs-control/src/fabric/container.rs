// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Container-backed fabric manager.
//!
//! Entities are containers created through a [`ComputeDriver`] and plugged
//! into a virtual switch through a [`NetworkDriver`]. Provisioning and
//! routing are recorded step by step in a [`Saga`] and unwound on failure.

use super::saga::Saga;
use super::{FabricError, FabricManager, Role};
use crate::config::{FabricConfig, ImageConfig};
use crate::topology::{Entity, Topology, TopologyError, ROOT_ID};
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receive buffer handed to sipp in both roles.
const SIPP_BUFF_SIZE: u32 = 1_048_576;

/// Port sipp servers listen on.
const SIP_PORT: u16 = 5060;

/// CPU limits applied to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuAllocation {
    /// Relative weight.
    pub shares: u32,
    /// CFS period in microseconds.
    pub period: u64,
    /// CFS quota in microseconds, proportional to `shares` out of 1024.
    pub quota: u64,
}

impl CpuAllocation {
    pub fn new(shares: u32, period: u64) -> Self {
        Self {
            shares,
            period,
            quota: u64::from(shares) * period / 1024,
        }
    }
}

/// What to run in a new container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub env: Vec<(String, String)>,
    pub cap_add: Vec<String>,
    pub cpu: CpuAllocation,
}

/// Container runtime spread over named hosts.
pub trait ComputeDriver: Send {
    fn setup(&mut self) -> Result<(), FabricError>;
    fn teardown(&mut self) -> Result<(), FabricError>;
    fn has_host(&self, host: &str) -> bool;
    fn create(&mut self, host: &str, name: &str, spec: &ContainerSpec) -> Result<(), FabricError>;
    fn start(&mut self, host: &str, name: &str) -> Result<(), FabricError>;
    fn stop(&mut self, host: &str, name: &str) -> Result<(), FabricError>;
    fn remove(&mut self, host: &str, name: &str) -> Result<(), FabricError>;
    fn set_cpu(&mut self, host: &str, name: &str, cpu: &CpuAllocation) -> Result<(), FabricError>;
}

/// Virtual switch the containers are plugged into.
pub trait NetworkDriver: Send {
    fn setup(&mut self) -> Result<(), FabricError>;
    fn teardown(&mut self) -> Result<(), FabricError>;

    /// Plug a container in, returning its address and MAC.
    fn attach(&mut self, name: &str) -> Result<(Ipv4Addr, String), FabricError>;
    fn detach(&mut self, name: &str) -> Result<(), FabricError>;

    /// Redirect frames from `client_mac` to `server_mac` through `router_mac`.
    fn route(
        &mut self,
        client_mac: &str,
        router_mac: &str,
        server_mac: &str,
    ) -> Result<(), FabricError>;

    /// Drop every flow installed for `client_mac`.
    fn deroute(&mut self, client_mac: &str) -> Result<(), FabricError>;
}

#[derive(Debug)]
enum ProvisionStep {
    Created { host: String, name: String },
    Started { host: String, name: String },
    Attached { name: String },
    Registered { id: String },
}

#[derive(Debug)]
enum RouteStep {
    Routed { client_mac: String },
    Wired { id: String },
}

/// Fabric manager over a compute driver and a network driver.
pub struct ContainerFabric<C, N> {
    compute: C,
    network: N,
    images: ImageConfig,
    cpu_period: u64,
}

impl<C: ComputeDriver, N: NetworkDriver> ContainerFabric<C, N> {
    pub fn new(compute: C, network: N, config: &FabricConfig) -> Self {
        Self {
            compute,
            network,
            images: config.images.clone(),
            cpu_period: config.cpu_period,
        }
    }

    pub fn compute(&self) -> &C {
        &self.compute
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Container spec for a role.
    pub fn spec_for(&self, role: Role, shares: u32) -> ContainerSpec {
        let cpu = CpuAllocation::new(shares, self.cpu_period);
        match role {
            Role::Server => ContainerSpec {
                image: self.images.sipp.clone(),
                env: vec![(
                    "ARGS".into(),
                    format!("-buff_size {} -sn uas", SIPP_BUFF_SIZE),
                )],
                cap_add: Vec::new(),
                cpu,
            },
            Role::Client { server_ip } => ContainerSpec {
                image: self.images.sipp.clone(),
                env: vec![(
                    "ARGS".into(),
                    format!(
                        "-buff_size {} -sn uac -r 0 {}:{}",
                        SIPP_BUFF_SIZE, server_ip, SIP_PORT
                    ),
                )],
                cap_add: Vec::new(),
                cpu,
            },
            Role::Monitor => ContainerSpec {
                image: self.images.snort.clone(),
                env: Vec::new(),
                cap_add: vec!["NET_ADMIN".into()],
                cpu,
            },
        }
    }

    fn run_provision(
        &mut self,
        topology: &mut Topology,
        saga: &mut Saga<ProvisionStep>,
        host: &str,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<Entity, FabricError> {
        self.compute.create(host, name, spec)?;
        saga.commit(ProvisionStep::Created {
            host: host.to_string(),
            name: name.to_string(),
        });
        info!("Created container {} on {}", name, host);

        self.compute.start(host, name)?;
        saga.commit(ProvisionStep::Started {
            host: host.to_string(),
            name: name.to_string(),
        });
        info!("Started container {}", name);

        let (ip, mac) = self.network.attach(name)?;
        saga.commit(ProvisionStep::Attached {
            name: name.to_string(),
        });
        info!("Attached {} to the fabric (ip {}, mac {})", name, ip, mac);

        let entity = Entity::new(name, ip, mac, host);
        topology.new_entity(entity.clone())?;
        saga.commit(ProvisionStep::Registered {
            id: name.to_string(),
        });

        Ok(entity)
    }

    fn undo_provision(&mut self, topology: &mut Topology, step: ProvisionStep) {
        let result = match &step {
            ProvisionStep::Registered { id } => topology.unwire(id).map(|_| ()).map_err(FabricError::from),
            ProvisionStep::Attached { name } => self.network.detach(name),
            ProvisionStep::Started { host, name } => self.compute.stop(host, name),
            ProvisionStep::Created { host, name } => self.compute.remove(host, name),
        };

        match result {
            Ok(()) => info!("Rolled back {:?}", step),
            Err(e) => warn!("Rollback of {:?} failed: {}", step, e),
        }
    }

    fn undo_route(&mut self, topology: &mut Topology, step: RouteStep) {
        let result = match &step {
            RouteStep::Wired { id } => topology.unlink(id).map_err(FabricError::from),
            RouteStep::Routed { client_mac } => self.network.deroute(client_mac),
        };

        match result {
            Ok(()) => info!("Rolled back {:?}", step),
            Err(e) => warn!("Rollback of {:?} failed: {}", step, e),
        }
    }

    fn run_route(
        &mut self,
        topology: &mut Topology,
        saga: &mut Saga<RouteStep>,
        plan: &[(String, String)],
        client: &Entity,
        router: &Entity,
        server: &Entity,
    ) -> Result<(), FabricError> {
        self.network.route(&client.mac, &router.mac, &server.mac)?;
        saga.commit(RouteStep::Routed {
            client_mac: client.mac.clone(),
        });

        for (child, parent) in plan {
            topology.wire(child, parent)?;
            saga.commit(RouteStep::Wired { id: child.clone() });
        }

        Ok(())
    }

    /// Links still to be made for `client -> router -> server -> root`.
    fn plan_links(
        topology: &Topology,
        client: &Entity,
        router: &Entity,
        server: &Entity,
    ) -> Result<Vec<(String, String)>, FabricError> {
        let links = [
            (server.id.as_str(), ROOT_ID),
            (router.id.as_str(), server.id.as_str()),
            (client.id.as_str(), router.id.as_str()),
        ];

        let mut plan = Vec::new();
        for (child, parent) in links {
            if topology.is_pending(child) {
                plan.push((child.to_string(), parent.to_string()));
            } else if topology.is_wired(child) {
                if !topology.is_linked(child, parent) {
                    return Err(TopologyError::InvalidState(child.to_string()).into());
                }
            } else {
                return Err(TopologyError::IdNotFound(child.to_string()).into());
            }
        }

        Ok(plan)
    }
}

fn keep_first(first: &mut Option<FabricError>, result: Result<(), FabricError>, what: &str, id: &str) {
    match result {
        Ok(()) => debug!("{} {}: ok", what, id),
        Err(e) => {
            warn!("{} {} failed: {}", what, id, e);
            first.get_or_insert(e);
        }
    }
}

impl<C: ComputeDriver, N: NetworkDriver> FabricManager for ContainerFabric<C, N> {
    fn setup(&mut self) -> Result<(), FabricError> {
        self.compute.setup()?;
        if let Err(e) = self.network.setup() {
            if let Err(undo) = self.compute.teardown() {
                warn!("Compute teardown after failed network setup: {}", undo);
            }
            return Err(e);
        }
        info!("Fabric ready");
        Ok(())
    }

    fn teardown(&mut self, topology: &mut Topology) -> Result<(), FabricError> {
        let mut first = None;

        for id in topology.teardown_order() {
            let Ok(entity) = topology.lookup(&id).cloned() else {
                continue;
            };
            let result = self.destroy(topology, &entity);
            keep_first(&mut first, result, "teardown of", &id);
        }

        let result = self.network.teardown();
        keep_first(&mut first, result, "teardown of", "network");
        let result = self.compute.teardown();
        keep_first(&mut first, result, "teardown of", "compute");

        info!("Fabric torn down");
        first.map_or(Ok(()), Err)
    }

    fn provision(
        &mut self,
        topology: &mut Topology,
        role: Role,
        host: &str,
        shares: u32,
    ) -> Result<Entity, FabricError> {
        if !self.compute.has_host(host) {
            return Err(FabricError::HostNotFound(host.to_string()));
        }

        let name = format!("{}-{}", role.name_prefix(), Uuid::new_v4());
        let spec = self.spec_for(role, shares);

        let mut saga = Saga::new("provision");
        match self.run_provision(topology, &mut saga, host, &name, &spec) {
            Ok(entity) => {
                saga.complete();
                Ok(entity)
            }
            Err(e) => {
                warn!("Provisioning {} failed: {}", name, e);
                saga.unwind(|step| self.undo_provision(topology, step));
                Err(e)
            }
        }
    }

    fn destroy(&mut self, topology: &mut Topology, entity: &Entity) -> Result<(), FabricError> {
        topology.check_unwire(&entity.id)?;

        let mut first = None;
        let id = entity.id.as_str();

        let stopped = self.compute.stop(&entity.host, id);
        let was_stopped = stopped.is_ok();
        keep_first(&mut first, stopped, "stop", id);

        let result = self.network.detach(id);
        keep_first(&mut first, result, "detach", id);

        if was_stopped {
            let result = self.compute.remove(&entity.host, id);
            keep_first(&mut first, result, "remove", id);
        }

        let result = self.network.deroute(&entity.mac);
        keep_first(&mut first, result, "deroute", id);

        if let Err(e) = topology.unwire(id) {
            warn!("Topology may be inconsistent, unable to remove {}: {}", id, e);
            first.get_or_insert(e.into());
        }

        info!("Destroyed {}", id);
        first.map_or(Ok(()), Err)
    }

    fn route(
        &mut self,
        topology: &mut Topology,
        client: &Entity,
        router: &Entity,
        server: &Entity,
    ) -> Result<(), FabricError> {
        let plan = Self::plan_links(topology, client, router, server)?;

        let mut saga = Saga::new("route");
        let result = self.run_route(topology, &mut saga, &plan, client, router, server);

        match result {
            Ok(()) => {
                saga.complete();
                info!("Route {} -> {} -> {}", client.mac, router.mac, server.mac);
                Ok(())
            }
            Err(e) => {
                warn!("Routing {} through {} failed: {}", client.id, router.id, e);
                saga.unwind(|step| self.undo_route(topology, step));
                Err(e)
            }
        }
    }

    fn set_shares(&mut self, entity: &Entity, shares: u32) -> Result<(), FabricError> {
        if !self.compute.has_host(&entity.host) {
            return Err(FabricError::HostNotFound(entity.host.clone()));
        }

        let cpu = CpuAllocation::new(shares, self.cpu_period);
        self.compute.set_cpu(&entity.host, &entity.id, &cpu)?;
        info!("Set cpu shares of {} to {}", entity.id, shares);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FabricConfig;
    use crate::fabric::sim::{SimCompute, SimFault, SimNetwork};

    fn fabric() -> ContainerFabric<SimCompute, SimNetwork> {
        let config = FabricConfig::simulated(["h1", "h2"]);
        let mut fabric = ContainerFabric::new(
            SimCompute::new(config.hosts.keys().cloned()),
            SimNetwork::new(&config.network),
            &config,
        );
        fabric.setup().unwrap();
        fabric
    }

    #[test]
    fn test_cpu_allocation_quota() {
        let cpu = CpuAllocation::new(256, 100_000);
        assert_eq!(cpu.quota, 25_000);
        assert_eq!(CpuAllocation::new(1024, 100_000).quota, 100_000);
    }

    #[test]
    fn test_role_specs() {
        let fabric = fabric();

        let server = fabric.spec_for(Role::Server, 512);
        assert_eq!(server.image, "mangalaman93/sipp");
        assert_eq!(server.env[0].1, "-buff_size 1048576 -sn uas");
        assert_eq!(server.cpu.quota, 50_000);

        let client = fabric.spec_for(
            Role::Client {
                server_ip: Ipv4Addr::new(173, 16, 1, 2),
            },
            256,
        );
        assert_eq!(client.env[0].1, "-buff_size 1048576 -sn uac -r 0 173.16.1.2:5060");

        let monitor = fabric.spec_for(Role::Monitor, 256);
        assert_eq!(monitor.image, "mangalaman93/snort");
        assert_eq!(monitor.cap_add, vec!["NET_ADMIN".to_string()]);
    }

    #[test]
    fn test_provision_registers_pending() {
        let mut fabric = fabric();
        let mut topo = Topology::new();

        let entity = fabric.provision(&mut topo, Role::Server, "h1", 256).unwrap();
        assert!(entity.id.starts_with("sipp-server-"));
        assert_eq!(entity.host, "h1");
        assert!(topo.is_pending(&entity.id));
        assert!(fabric.compute().is_running(&entity.id));
        assert!(fabric.network().is_attached(&entity.id));
    }

    #[test]
    fn test_unknown_host_creates_nothing() {
        let mut fabric = fabric();
        let mut topo = Topology::new();

        let err = fabric.provision(&mut topo, Role::Monitor, "nowhere", 256);
        assert!(matches!(err, Err(FabricError::HostNotFound(_))));
        assert!(fabric.compute().containers().is_empty());
    }

    #[test]
    fn test_attach_failure_rolls_back() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        fabric.network().inject(SimFault::Attach);

        let err = fabric.provision(&mut topo, Role::Server, "h1", 256);
        assert!(matches!(err, Err(FabricError::Network(_))));
        assert!(fabric.compute().containers().is_empty());
        assert!(topo.is_empty());
    }

    #[test]
    fn test_start_failure_removes_container() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        fabric.compute().inject(SimFault::Start);

        assert!(fabric.provision(&mut topo, Role::Server, "h1", 256).is_err());
        assert!(fabric.compute().containers().is_empty());
        assert_eq!(fabric.network().attached_count(), 0);
    }

    fn chain(
        fabric: &mut ContainerFabric<SimCompute, SimNetwork>,
        topo: &mut Topology,
    ) -> (Entity, Entity, Entity) {
        let server = fabric.provision(topo, Role::Server, "h1", 256).unwrap();
        let router = fabric.provision(topo, Role::Monitor, "h1", 256).unwrap();
        let client = fabric
            .provision(
                topo,
                Role::Client {
                    server_ip: server.ip,
                },
                "h2",
                256,
            )
            .unwrap();
        (client, router, server)
    }

    #[test]
    fn test_route_wires_chain() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        let (client, router, server) = chain(&mut fabric, &mut topo);

        fabric.route(&mut topo, &client, &router, &server).unwrap();
        assert!(topo.is_linked(&server.id, ROOT_ID));
        assert!(topo.is_linked(&router.id, &server.id));
        assert!(topo.is_linked(&client.id, &router.id));
        assert_eq!(
            fabric.network().flow(&client.mac),
            Some((router.mac.clone(), server.mac.clone()))
        );

        // Routing the same chain again is accepted.
        fabric.route(&mut topo, &client, &router, &server).unwrap();
    }

    #[test]
    fn test_route_conflicting_link_rejected() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        let (client, router, server) = chain(&mut fabric, &mut topo);
        fabric.route(&mut topo, &client, &router, &server).unwrap();

        let other = fabric.provision(&mut topo, Role::Monitor, "h2", 256).unwrap();
        let err = fabric.route(&mut topo, &client, &other, &server);
        assert!(matches!(
            err,
            Err(FabricError::Topology(TopologyError::InvalidState(_)))
        ));
        assert!(topo.is_pending(&other.id));
    }

    #[test]
    fn test_route_failure_leaves_topology_untouched() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        let (client, router, server) = chain(&mut fabric, &mut topo);
        fabric.network().inject(SimFault::Route);

        assert!(fabric.route(&mut topo, &client, &router, &server).is_err());
        assert_eq!(topo.pending_count(), 3);
        assert_eq!(fabric.network().flow_count(), 0);
    }

    #[test]
    fn test_destroy_is_best_effort() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        let server = fabric.provision(&mut topo, Role::Server, "h1", 256).unwrap();
        fabric.compute().inject(SimFault::Stop);

        let err = fabric.destroy(&mut topo, &server);
        assert!(matches!(err, Err(FabricError::Compute(_))));
        // Network and topology are cleaned up regardless.
        assert!(!fabric.network().is_attached(&server.id));
        assert!(!topo.contains(&server.id));
    }

    #[test]
    fn test_destroy_refuses_orphaning() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        let (client, router, server) = chain(&mut fabric, &mut topo);
        fabric.route(&mut topo, &client, &router, &server).unwrap();

        let err = fabric.destroy(&mut topo, &router);
        assert!(matches!(
            err,
            Err(FabricError::Topology(TopologyError::OrphanChild { .. }))
        ));
        assert!(fabric.compute().is_running(&router.id));

        fabric.destroy(&mut topo, &client).unwrap();
        assert_eq!(fabric.network().flow(&client.mac), None);
        fabric.destroy(&mut topo, &router).unwrap();
    }

    #[test]
    fn test_teardown_removes_everything() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        let (client, router, server) = chain(&mut fabric, &mut topo);
        fabric.route(&mut topo, &client, &router, &server).unwrap();
        fabric.provision(&mut topo, Role::Server, "h2", 128).unwrap();

        fabric.teardown(&mut topo).unwrap();
        assert!(topo.is_empty());
        assert!(fabric.compute().containers().is_empty());
        assert!(!fabric.network().is_up());
    }

    #[test]
    fn test_set_shares() {
        let mut fabric = fabric();
        let mut topo = Topology::new();
        let snort = fabric.provision(&mut topo, Role::Monitor, "h1", 256).unwrap();

        fabric.set_shares(&snort, 512).unwrap();
        assert_eq!(
            fabric.compute().cpu(&snort.id),
            Some(CpuAllocation::new(512, 100_000))
        );
    }
}
