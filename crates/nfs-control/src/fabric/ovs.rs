// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Open vSwitch network driver.
//!
//! Containers get one port on a local bridge through `ovs-docker`; routes
//! are OpenFlow rules installed with `ovs-ofctl`. The bridge itself holds
//! the gateway address (`<prefix>1`), containers get `<prefix>2` upwards.

use super::container::NetworkDriver;
use super::FabricError;
use crate::config::NetworkConfig;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::Ipv4Addr;
use std::process::Command;
use tracing::{debug, info, warn};

/// Interface name inside the container.
const CONTAINER_IFACE: &str = "eth0";

/// Tools that must be on the path.
const OVS_TOOLS: [&str; 3] = ["ovs-vsctl", "ovs-docker", "ovs-ofctl"];

/// Allocator for container addresses and MACs on one subnet.
#[derive(Debug)]
pub struct AddressPool {
    prefix: String,
    next: u8,
    released: BTreeSet<u8>,
    macs: HashSet<String>,
    rng: fastrand::Rng,
}

impl AddressPool {
    /// Pool over `<prefix>2` to `<prefix>254`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 2,
            released: BTreeSet::new(),
            macs: HashSet::new(),
            rng: fastrand::Rng::new(),
        }
    }

    /// Gateway address of the subnet.
    pub fn gateway(&self) -> Result<Ipv4Addr, FabricError> {
        self.address(1)
    }

    /// Take a free address and a fresh MAC.
    pub fn allocate(&mut self) -> Result<(Ipv4Addr, String), FabricError> {
        let octet = match self.released.pop_first() {
            Some(octet) => octet,
            None if self.next < 255 => {
                self.next += 1;
                self.next - 1
            }
            None => return Err(FabricError::AddressExhausted),
        };

        let ip = match self.address(octet) {
            Ok(ip) => ip,
            Err(e) => {
                self.released.insert(octet);
                return Err(e);
            }
        };

        Ok((ip, self.fresh_mac()))
    }

    /// Give an address and MAC back to the pool.
    pub fn release(&mut self, ip: Ipv4Addr, mac: &str) {
        self.released.insert(ip.octets()[3]);
        self.macs.remove(mac);
    }

    fn address(&self, octet: u8) -> Result<Ipv4Addr, FabricError> {
        format!("{}{}", self.prefix, octet)
            .parse()
            .map_err(|e| FabricError::Network(format!("bad subnet prefix {:?}: {}", self.prefix, e)))
    }

    // Locally administered range used by Xen, 2^24 values.
    fn fresh_mac(&mut self) -> String {
        loop {
            let mac = format!(
                "00:16:3e:{:02x}:{:02x}:{:02x}",
                self.rng.u8(..),
                self.rng.u8(..),
                self.rng.u8(..)
            );
            if self.macs.insert(mac.clone()) {
                return mac;
            }
        }
    }
}

/// Prefix length of a dotted netmask.
pub fn prefix_len(netmask: &str) -> Result<u32, FabricError> {
    let mask: Ipv4Addr = netmask
        .parse()
        .map_err(|e| FabricError::Network(format!("bad netmask {:?}: {}", netmask, e)))?;
    Ok(u32::from(mask).count_ones())
}

/// Bridge-backed network driver.
pub struct OvsSwitch {
    bridge: String,
    netmask: String,
    pool: AddressPool,
    ports: BTreeMap<String, (Ipv4Addr, String)>,
    created_bridge: bool,
}

impl OvsSwitch {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            bridge: config.bridge.clone(),
            netmask: config.netmask.clone(),
            pool: AddressPool::new(config.subnet_prefix.clone()),
            ports: BTreeMap::new(),
            created_bridge: false,
        }
    }

    fn add_port_cmd(&self, name: &str, ip: Ipv4Addr, mac: &str) -> Result<String, FabricError> {
        Ok(format!(
            "ovs-docker add-port {} {} {} --ipaddress={}/{} --macaddress={}",
            self.bridge,
            CONTAINER_IFACE,
            name,
            ip,
            prefix_len(&self.netmask)?,
            mac
        ))
    }

    fn del_port_cmd(&self, name: &str) -> String {
        format!("ovs-docker del-port {} {} {}", self.bridge, CONTAINER_IFACE, name)
    }

    fn add_flow_cmd(&self, client_mac: &str, router_mac: &str, server_mac: &str) -> String {
        format!(
            "ovs-ofctl add-flow {} priority=100,ip,dl_src={},dl_dst={},actions=mod_dl_dst={},resubmit:1",
            self.bridge, client_mac, server_mac, router_mac
        )
    }

    fn del_flows_cmd(&self, client_mac: &str) -> String {
        format!("ovs-ofctl del-flows {} dl_src={}", self.bridge, client_mac)
    }
}

fn run_sh(cmd: &str) -> Result<String, FabricError> {
    debug!("Running: {}", cmd);
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| FabricError::Network(format!("{}: {}", cmd, e)))?;

    if !output.status.success() {
        return Err(FabricError::Network(format!(
            "{}: {}",
            cmd,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

impl NetworkDriver for OvsSwitch {
    fn setup(&mut self) -> Result<(), FabricError> {
        for tool in OVS_TOOLS {
            let path = run_sh(&format!("which {}", tool))?;
            if path.trim().is_empty() {
                return Err(FabricError::Network(format!("{} is not installed", tool)));
            }
        }

        if run_sh(&format!("ovs-vsctl br-exists {}", self.bridge)).is_ok() {
            warn!("Bridge {} already exists, reusing it", self.bridge);
            return Ok(());
        }

        run_sh(&format!("ovs-vsctl add-br {}", self.bridge))?;
        let gateway = self.pool.gateway()?;
        let up = format!("ifconfig {} {} netmask {} up", self.bridge, gateway, self.netmask);
        if let Err(e) = run_sh(&up) {
            if let Err(undo) = run_sh(&format!("ovs-vsctl del-br {}", self.bridge)) {
                warn!("Unable to delete bridge {}: {}", self.bridge, undo);
            }
            return Err(e);
        }

        self.created_bridge = true;
        info!("Created bridge {} ({})", self.bridge, gateway);
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), FabricError> {
        if !self.created_bridge {
            return Ok(());
        }

        run_sh(&format!("ovs-vsctl del-br {}", self.bridge))?;
        self.created_bridge = false;
        info!("Deleted bridge {}", self.bridge);
        Ok(())
    }

    fn attach(&mut self, name: &str) -> Result<(Ipv4Addr, String), FabricError> {
        let (ip, mac) = self.pool.allocate()?;

        let result = self
            .add_port_cmd(name, ip, &mac)
            .and_then(|cmd| run_sh(&cmd));
        if let Err(e) = result {
            self.pool.release(ip, &mac);
            return Err(e);
        }

        self.ports.insert(name.to_string(), (ip, mac.clone()));
        Ok((ip, mac))
    }

    fn detach(&mut self, name: &str) -> Result<(), FabricError> {
        run_sh(&self.del_port_cmd(name))?;
        if let Some((ip, mac)) = self.ports.remove(name) {
            self.pool.release(ip, &mac);
        }
        Ok(())
    }

    fn route(
        &mut self,
        client_mac: &str,
        router_mac: &str,
        server_mac: &str,
    ) -> Result<(), FabricError> {
        run_sh(&self.add_flow_cmd(client_mac, router_mac, server_mac)).map(|_| ())
    }

    fn deroute(&mut self, client_mac: &str) -> Result<(), FabricError> {
        run_sh(&self.del_flows_cmd(client_mac)).map(|_| ())
    }
}
