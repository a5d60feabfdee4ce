// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process drivers.
//!
//! They keep container and port state in memory, so a control plane can be
//! run without Docker or Open vSwitch. Clones share state, which lets a
//! caller keep a handle for inspection after handing the driver over, and
//! any operation can be made to fail with [`SimFault`].

use super::container::{ComputeDriver, ContainerSpec, CpuAllocation, NetworkDriver};
use super::ovs::AddressPool;
use super::FabricError;
use crate::config::NetworkConfig;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

/// Driver operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimFault {
    Create,
    Start,
    Stop,
    Remove,
    SetCpu,
    Attach,
    Detach,
    Route,
    Deroute,
}

#[derive(Debug, Clone)]
struct SimContainer {
    host: String,
    running: bool,
    cpu: CpuAllocation,
}

#[derive(Debug, Default)]
struct ComputeState {
    hosts: BTreeSet<String>,
    containers: BTreeMap<String, SimContainer>,
    faults: HashSet<SimFault>,
}

/// In-memory container runtime.
#[derive(Debug, Clone, Default)]
pub struct SimCompute {
    state: Arc<Mutex<ComputeState>>,
}

impl SimCompute {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = ComputeState {
            hosts: hosts.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make `fault` fail until cleared.
    pub fn inject(&self, fault: SimFault) {
        self.state.lock().faults.insert(fault);
    }

    pub fn clear(&self, fault: SimFault) {
        self.state.lock().faults.remove(&fault);
    }

    /// Names of existing containers.
    pub fn containers(&self) -> Vec<String> {
        self.state.lock().containers.keys().cloned().collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(name)
            .is_some_and(|c| c.running)
    }

    pub fn host_of(&self, name: &str) -> Option<String> {
        self.state.lock().containers.get(name).map(|c| c.host.clone())
    }

    pub fn cpu(&self, name: &str) -> Option<CpuAllocation> {
        self.state.lock().containers.get(name).map(|c| c.cpu)
    }

    fn check(state: &ComputeState, fault: SimFault, name: &str) -> Result<(), FabricError> {
        if state.faults.contains(&fault) {
            return Err(FabricError::Compute(format!("injected {:?} failure for {}", fault, name)));
        }
        Ok(())
    }

    fn with_container<F>(&self, fault: SimFault, name: &str, f: F) -> Result<(), FabricError>
    where
        F: FnOnce(&mut SimContainer),
    {
        let mut state = self.state.lock();
        Self::check(&state, fault, name)?;
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| FabricError::Compute(format!("no such container: {}", name)))?;
        f(container);
        Ok(())
    }
}

impl ComputeDriver for SimCompute {
    fn setup(&mut self) -> Result<(), FabricError> {
        debug!("Simulated compute over {} hosts", self.state.lock().hosts.len());
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), FabricError> {
        Ok(())
    }

    fn has_host(&self, host: &str) -> bool {
        self.state.lock().hosts.contains(host)
    }

    fn create(&mut self, host: &str, name: &str, spec: &ContainerSpec) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        Self::check(&state, SimFault::Create, name)?;
        if !state.hosts.contains(host) {
            return Err(FabricError::HostNotFound(host.to_string()));
        }
        if state.containers.contains_key(name) {
            return Err(FabricError::Compute(format!("container exists: {}", name)));
        }

        state.containers.insert(
            name.to_string(),
            SimContainer {
                host: host.to_string(),
                running: false,
                cpu: spec.cpu,
            },
        );
        Ok(())
    }

    fn start(&mut self, _host: &str, name: &str) -> Result<(), FabricError> {
        self.with_container(SimFault::Start, name, |c| c.running = true)
    }

    fn stop(&mut self, _host: &str, name: &str) -> Result<(), FabricError> {
        self.with_container(SimFault::Stop, name, |c| c.running = false)
    }

    fn remove(&mut self, _host: &str, name: &str) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        Self::check(&state, SimFault::Remove, name)?;
        state
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FabricError::Compute(format!("no such container: {}", name)))
    }

    fn set_cpu(&mut self, _host: &str, name: &str, cpu: &CpuAllocation) -> Result<(), FabricError> {
        let cpu = *cpu;
        self.with_container(SimFault::SetCpu, name, |c| c.cpu = cpu)
    }
}

#[derive(Debug)]
struct NetworkState {
    up: bool,
    pool: AddressPool,
    ports: BTreeMap<String, (Ipv4Addr, String)>,
    flows: BTreeMap<String, (String, String)>,
    faults: HashSet<SimFault>,
}

/// In-memory switch.
#[derive(Debug, Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimNetwork {
    pub fn new(config: &NetworkConfig) -> Self {
        let state = NetworkState {
            up: false,
            pool: AddressPool::new(config.subnet_prefix.clone()),
            ports: BTreeMap::new(),
            flows: BTreeMap::new(),
            faults: HashSet::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make `fault` fail until cleared.
    pub fn inject(&self, fault: SimFault) {
        self.state.lock().faults.insert(fault);
    }

    pub fn clear(&self, fault: SimFault) {
        self.state.lock().faults.remove(&fault);
    }

    pub fn is_up(&self) -> bool {
        self.state.lock().up
    }

    pub fn is_attached(&self, name: &str) -> bool {
        self.state.lock().ports.contains_key(name)
    }

    pub fn attached_count(&self) -> usize {
        self.state.lock().ports.len()
    }

    /// Router and server MACs installed for a client MAC.
    pub fn flow(&self, client_mac: &str) -> Option<(String, String)> {
        self.state.lock().flows.get(client_mac).cloned()
    }

    pub fn flow_count(&self) -> usize {
        self.state.lock().flows.len()
    }

    fn check(state: &NetworkState, fault: SimFault, what: &str) -> Result<(), FabricError> {
        if state.faults.contains(&fault) {
            return Err(FabricError::Network(format!("injected {:?} failure for {}", fault, what)));
        }
        Ok(())
    }
}

impl NetworkDriver for SimNetwork {
    fn setup(&mut self) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        state.pool.gateway()?;
        state.up = true;
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        state.flows.clear();
        state.up = false;
        Ok(())
    }

    fn attach(&mut self, name: &str) -> Result<(Ipv4Addr, String), FabricError> {
        let mut state = self.state.lock();
        Self::check(&state, SimFault::Attach, name)?;
        if state.ports.contains_key(name) {
            return Err(FabricError::Network(format!("already attached: {}", name)));
        }

        let (ip, mac) = state.pool.allocate()?;
        state.ports.insert(name.to_string(), (ip, mac.clone()));
        Ok((ip, mac))
    }

    fn detach(&mut self, name: &str) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        Self::check(&state, SimFault::Detach, name)?;
        let (ip, mac) = state
            .ports
            .remove(name)
            .ok_or_else(|| FabricError::Network(format!("not attached: {}", name)))?;
        state.pool.release(ip, &mac);
        Ok(())
    }

    fn route(
        &mut self,
        client_mac: &str,
        router_mac: &str,
        server_mac: &str,
    ) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        Self::check(&state, SimFault::Route, client_mac)?;
        state.flows.insert(
            client_mac.to_string(),
            (router_mac.to_string(), server_mac.to_string()),
        );
        Ok(())
    }

    fn deroute(&mut self, client_mac: &str) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        Self::check(&state, SimFault::Deroute, client_mac)?;
        state.flows.remove(client_mac);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "img".into(),
            env: Vec::new(),
            cap_add: Vec::new(),
            cpu: CpuAllocation::new(256, 100_000),
        }
    }

    #[test]
    fn test_compute_lifecycle() {
        let mut compute = SimCompute::new(["h1"]);
        compute.create("h1", "c1", &spec()).unwrap();
        assert!(!compute.is_running("c1"));
        compute.start("h1", "c1").unwrap();
        assert!(compute.is_running("c1"));
        assert_eq!(compute.host_of("c1").as_deref(), Some("h1"));

        assert!(compute.create("h1", "c1", &spec()).is_err());
        assert!(matches!(
            compute.create("h9", "c2", &spec()),
            Err(FabricError::HostNotFound(_))
        ));

        compute.stop("h1", "c1").unwrap();
        compute.remove("h1", "c1").unwrap();
        assert!(compute.containers().is_empty());
        assert!(compute.start("h1", "c1").is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let mut compute = SimCompute::new(["h1"]);
        let probe = compute.clone();
        compute.create("h1", "c1", &spec()).unwrap();
        assert_eq!(probe.containers(), vec!["c1".to_string()]);

        probe.inject(SimFault::Start);
        assert!(compute.start("h1", "c1").is_err());
        probe.clear(SimFault::Start);
        assert!(compute.start("h1", "c1").is_ok());
    }

    #[test]
    fn test_network_ports_and_flows() {
        let mut net = SimNetwork::new(&NetworkConfig::default());
        net.setup().unwrap();
        assert!(net.is_up());

        let (ip, mac) = net.attach("c1").unwrap();
        assert_eq!(ip, Ipv4Addr::new(173, 16, 1, 2));
        assert!(net.attach("c1").is_err());

        net.route(&mac, "r", "s").unwrap();
        assert_eq!(net.flow(&mac), Some(("r".into(), "s".into())));
        net.deroute(&mac).unwrap();
        assert_eq!(net.flow_count(), 0);

        net.detach("c1").unwrap();
        assert!(!net.is_attached("c1"));
        // Released address is handed out again.
        assert_eq!(net.attach("c2").unwrap().0, ip);
    }
}
