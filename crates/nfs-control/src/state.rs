// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control plane state.
//!
//! [`ControlState`] owns the topology, the per-NF controllers and the fabric
//! manager behind a single lock. Commands and telemetry batches both go
//! through it, so they are strictly serialized.

use crate::command::{Command, CommandError, Request, Response};
use crate::config::{ControlConfig, TablesConfig};
use crate::controller::{AdaptiveController, ControlParams, Metric};
use crate::fabric::{build_fabric, FabricError, FabricManager, Role};
use crate::rate_control::{RateControl, RateControlError, UdpRateControl};
use crate::telemetry::TelemetryPoint;
use crate::topology::{Entity, Topology, TopologyError};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors reported back to the command sender.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    RateControl(#[from] RateControlError),
}

struct Inner {
    topology: Topology,
    controllers: HashMap<String, AdaptiveController>,
    fabric: Box<dyn FabricManager>,
    rate_control: Box<dyn RateControl>,
}

/// Single owner of all mutable control plane state.
pub struct ControlState {
    inner: Mutex<Inner>,
    params: ControlParams,
    tables: TablesConfig,
}

impl ControlState {
    /// Create state over explicit backends.
    pub fn new(
        fabric: Box<dyn FabricManager>,
        rate_control: Box<dyn RateControl>,
        params: ControlParams,
        tables: TablesConfig,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                topology: Topology::new(),
                controllers: HashMap::new(),
                fabric,
                rate_control,
            }),
            params,
            tables,
        }
    }

    /// Create state with the backends selected by the configuration.
    pub fn from_config(config: &ControlConfig) -> Self {
        Self::new(
            build_fabric(&config.fabric),
            Box::new(UdpRateControl::new(config.fabric.rate_port)),
            config.control_params(),
            config.tables.clone(),
        )
    }

    /// Prepare the fabric backends.
    pub fn setup(&self) -> Result<(), FabricError> {
        self.inner.lock().fabric.setup()
    }

    /// Decode and execute one command.
    pub fn dispatch(&self, command: &Command) -> Response {
        let request = match Request::try_from(command) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected command {}: {}", command.code, e);
                return Response::error(e);
            }
        };

        let code = request.code();
        let mut inner = self.inner.lock();
        match self.execute(&mut inner, request) {
            Ok(result) => {
                info!("{} succeeded: {}", code, result);
                Response::ok(result)
            }
            Err(e) => {
                warn!("{} failed: {}", code, e);
                Response::error(e)
            }
        }
    }

    fn execute(&self, inner: &mut Inner, request: Request) -> Result<String, DispatchError> {
        let Inner {
            topology,
            controllers,
            fabric,
            rate_control,
        } = inner;

        match request {
            Request::StartServer { host, shares } => {
                let entity = fabric.provision(topology, Role::Server, &host, shares)?;
                Ok(entity.id)
            }
            Request::StartClient {
                host,
                shares,
                server,
            } => {
                let server_ip = topology.lookup_ip(&server)?;
                let entity =
                    fabric.provision(topology, Role::Client { server_ip }, &host, shares)?;
                Ok(entity.id)
            }
            Request::StartSnort { host, shares } => {
                let entity = fabric.provision(topology, Role::Monitor, &host, shares)?;
                let id = entity.id.clone();
                let controller =
                    AdaptiveController::new(entity, shares, &self.params, Utc::now());
                controllers.insert(id.clone(), controller);
                debug!("Registered controller for {}", id);
                Ok(id)
            }
            Request::Stop { cont } => {
                topology.check_unwire(&cont)?;
                let entity = topology.lookup(&cont)?.clone();
                if controllers.remove(&cont).is_some() {
                    debug!("Removed controller for {}", cont);
                }
                fabric.destroy(topology, &entity)?;
                Ok(String::new())
            }
            Request::Route {
                client,
                server,
                router,
            } => {
                let client = topology.lookup(&client)?.clone();
                let server = topology.lookup(&server)?.clone();
                let router = topology.lookup(&router)?.clone();
                fabric.route(topology, &client, &router, &server)?;
                Ok(String::new())
            }
            Request::SetRate { client, rate } => {
                let client = topology.lookup(&client)?;
                rate_control.set_rate(client, rate)?;
                Ok(String::new())
            }
        }
    }

    /// Feed a telemetry batch to the controllers and apply new share targets.
    pub fn update(&self, points: &[TelemetryPoint]) {
        let mut inner = self.inner.lock();
        let Inner {
            controllers,
            fabric,
            ..
        } = &mut *inner;

        for point in points {
            let Some(metric) = self.metric_of(&point.measurement) else {
                continue;
            };
            let Some(id) = point.tag(&self.tables.entity_tag) else {
                debug!("Point {} has no {} tag", point.measurement, self.tables.entity_tag);
                continue;
            };
            let Some(controller) = controllers.get_mut(id) else {
                continue;
            };
            match point.field(&self.tables.value_field).and_then(|v| v.as_i64()) {
                Some(value) => controller.add_point(metric, point.timestamp, value),
                None => warn!(
                    "Point {} for {} has no numeric {} field",
                    point.measurement, id, self.tables.value_field
                ),
            }
        }

        for controller in controllers.values_mut() {
            let Some(shares) = controller.trigger() else {
                continue;
            };
            let entity = controller.entity();
            if let Err(e) = fabric.set_shares(entity, shares) {
                warn!("Failed to set shares of {} to {}: {}", entity.id, shares, e);
            }
        }
    }

    fn metric_of(&self, measurement: &str) -> Option<Metric> {
        let tables = &self.tables;
        if measurement == tables.rx {
            Some(Metric::Rx)
        } else if measurement == tables.tx {
            Some(Metric::Tx)
        } else if measurement == tables.cpu {
            Some(Metric::Cpu)
        } else if tables.queue.as_deref() == Some(measurement) {
            Some(Metric::Queue)
        } else {
            None
        }
    }

    /// Drop every controller and tear the fabric down.
    pub fn shutdown(&self) -> Result<(), FabricError> {
        let mut inner = self.inner.lock();
        inner.controllers.clear();
        let Inner {
            topology, fabric, ..
        } = &mut *inner;
        info!(
            "Tearing down {} wired and {} pending entities",
            topology.wired_count(),
            topology.pending_count()
        );
        fabric.teardown(topology)
    }

    /// Current share target of a monitored NF.
    pub fn controller_shares(&self, id: &str) -> Option<u32> {
        self.inner.lock().controllers.get(id).map(|c| c.shares())
    }

    pub fn controller_count(&self) -> usize {
        self.inner.lock().controllers.len()
    }

    /// Snapshot of an entity.
    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.inner.lock().topology.lookup(id).ok().cloned()
    }

    /// Run `f` against the topology under the state lock.
    pub fn with_topology<R>(&self, f: impl FnOnce(&Topology) -> R) -> R {
        f(&self.inner.lock().topology)
    }
}
