// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Docker compute driver.
//!
//! Each configured host maps to a Docker daemon address; every operation
//! runs `docker -H <address> ...` against it.

use super::container::{ComputeDriver, ContainerSpec, CpuAllocation};
use super::FabricError;
use std::collections::BTreeMap;
use std::process::Command;
use tracing::{debug, info};

/// Compute driver shelling out to the docker CLI.
#[derive(Debug)]
pub struct DockerCli {
    program: String,
    hosts: BTreeMap<String, String>,
    stop_timeout_secs: u64,
}

impl DockerCli {
    /// Driver over `hosts` (name to daemon address).
    pub fn new(hosts: BTreeMap<String, String>, stop_timeout_secs: u64) -> Self {
        Self::with_program("docker", hosts, stop_timeout_secs)
    }

    /// Same as [`new`](Self::new) with another client binary.
    pub fn with_program(
        program: impl Into<String>,
        hosts: BTreeMap<String, String>,
        stop_timeout_secs: u64,
    ) -> Self {
        Self {
            program: program.into(),
            hosts,
            stop_timeout_secs,
        }
    }

    fn run(&self, host: &str, args: &[String]) -> Result<String, FabricError> {
        let address = self
            .hosts
            .get(host)
            .ok_or_else(|| FabricError::HostNotFound(host.to_string()))?;

        debug!("{} -H {} {}", self.program, address, args.join(" "));
        let output = Command::new(&self.program)
            .arg("-H")
            .arg(address)
            .args(args)
            .output()
            .map_err(|e| FabricError::Compute(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let verb = args.first().map(String::as_str).unwrap_or_default();
            return Err(FabricError::Compute(format!(
                "{} {} on {}: {}",
                self.program,
                verb,
                host,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn cpu_args(cpu: &CpuAllocation) -> Vec<String> {
    vec![
        format!("--cpu-shares={}", cpu.shares),
        format!("--cpu-period={}", cpu.period),
        format!("--cpu-quota={}", cpu.quota),
    ]
}

/// Arguments of `docker create` for a container.
///
/// Networking is disabled; the switch driver plugs the interface in later.
pub fn create_args(name: &str, spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        format!("--name={}", name),
        "--network=none".to_string(),
    ];
    args.extend(cpu_args(&spec.cpu));
    for cap in &spec.cap_add {
        args.push(format!("--cap-add={}", cap));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push(spec.image.clone());
    args
}

impl ComputeDriver for DockerCli {
    fn setup(&mut self) -> Result<(), FabricError> {
        for host in self.hosts.keys() {
            let args = ["version".to_string(), "--format={{.Server.Version}}".to_string()];
            let version = self.run(host, &args)?;
            info!("Host {} runs docker {}", host, version.trim());
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), FabricError> {
        Ok(())
    }

    fn has_host(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
    }

    fn create(&mut self, host: &str, name: &str, spec: &ContainerSpec) -> Result<(), FabricError> {
        self.run(host, &create_args(name, spec)).map(|_| ())
    }

    fn start(&mut self, host: &str, name: &str) -> Result<(), FabricError> {
        self.run(host, &["start".to_string(), name.to_string()]).map(|_| ())
    }

    fn stop(&mut self, host: &str, name: &str) -> Result<(), FabricError> {
        let timeout = format!("--time={}", self.stop_timeout_secs);
        self.run(host, &["stop".to_string(), timeout, name.to_string()])
            .map(|_| ())
    }

    fn remove(&mut self, host: &str, name: &str) -> Result<(), FabricError> {
        let args = [
            "rm".to_string(),
            "--force".to_string(),
            "--volumes".to_string(),
            name.to_string(),
        ];
        self.run(host, &args).map(|_| ())
    }

    fn set_cpu(&mut self, host: &str, name: &str, cpu: &CpuAllocation) -> Result<(), FabricError> {
        let mut args = vec!["update".to_string()];
        args.extend(cpu_args(cpu));
        args.push(name.to_string());
        self.run(host, &args).map(|_| ())
    }
}
