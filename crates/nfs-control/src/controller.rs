// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adaptive CPU-share controller for one monitored network function.
//!
//! Inbound bytes, outbound bytes and CPU load (plus, optionally, the depth of
//! the NF's drop queue) are sampled on a common step grid. Over one control
//! period the controller estimates how many outbound bytes each share buys
//! (`dprime`) and moves the share target toward the reference throughput:
//!
//! ```text
//! dprime  = csum / shares / period
//! delta   = (tx - tx_at_period_start) / period
//! shares += alpha * (reference - delta) / dprime      clamped to [64, 1024]
//! ```
//!
//! `csum` sums forwarded bytes weighted by `rx_rate / (rx_rate - tx_rate)`,
//! using the rates of the previous step.

use crate::rate::{Sample, WindowedRate};
use crate::topology::Entity;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

/// Lowest share target ever returned.
pub const MIN_SHARES: i64 = 64;

/// Highest share target ever returned.
pub const MAX_SHARES: i64 = 1024;

/// Updates with `|dprime|` at or above this are considered noise.
const DPRIME_LIMIT: f64 = 1_000_000.0;

/// CPU counters are cumulative nanoseconds; this turns their rate into percent.
const CPU_RATE_SCALE: f64 = 10_000_000.0;

/// Series fed into a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Rx,
    Tx,
    Cpu,
    Queue,
}

/// Tunables shared by every controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlParams {
    /// Sampling step.
    pub step: Duration,
    /// Control period, a multiple of `step`.
    pub period: Duration,
    /// Target outbound throughput in bytes per second.
    pub reference: f64,
    /// Gain.
    pub alpha: f64,
    /// Gate accumulation on the drop-queue series.
    pub track_queue: bool,
}

/// Feedback loop driving the CPU shares of one NF.
#[derive(Debug)]
pub struct AdaptiveController {
    entity: Entity,

    rx: WindowedRate,
    tx: WindowedRate,
    cpu: WindowedRate,
    queue: Option<WindowedRate>,

    shares: i64,
    reference: f64,
    alpha: f64,

    prev_rx_rate: f64,
    prev_tx_rate: f64,
    prev_queue: i64,
    cpu_load: f64,

    /// Outbound bytes at the start of the period.
    ibytes: Option<i64>,
    /// Outbound bytes already accounted for in `csum`.
    tibytes: i64,
    csum: f64,
}

impl AdaptiveController {
    /// Create a controller whose step grid starts at `base`.
    pub fn new(entity: Entity, shares: u32, params: &ControlParams, base: DateTime<Utc>) -> Self {
        let series = || WindowedRate::new(params.step, params.period, base);

        Self {
            entity,
            rx: series(),
            tx: series(),
            cpu: series(),
            queue: params.track_queue.then(series),
            shares: i64::from(shares).clamp(MIN_SHARES, MAX_SHARES),
            reference: params.reference,
            alpha: params.alpha,
            prev_rx_rate: 0.0,
            prev_tx_rate: 0.0,
            prev_queue: 0,
            cpu_load: 0.0,
            ibytes: None,
            tibytes: 0,
            csum: 0.0,
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Current share target.
    pub fn shares(&self) -> u32 {
        self.shares as u32
    }

    /// CPU load of the last step, in percent.
    pub fn cpu_load(&self) -> f64 {
        self.cpu_load
    }

    /// Buffer one sample of a series.
    pub fn add_point(&mut self, metric: Metric, timestamp: DateTime<Utc>, value: i64) {
        let series = match metric {
            Metric::Rx => &mut self.rx,
            Metric::Tx => &mut self.tx,
            Metric::Cpu => &mut self.cpu,
            Metric::Queue => match self.queue.as_mut() {
                Some(queue) => queue,
                None => return,
            },
        };
        series.add_point(timestamp, value);
    }

    /// Step through all buffered data.
    ///
    /// Returns the new share target if at least one period closed with a
    /// usable estimate during this call.
    pub fn trigger(&mut self) -> Option<u32> {
        let mut updated = false;

        while self.is_ready() {
            let (Some(rx), Some(tx), Some(cpu)) =
                (self.rx.advance(), self.tx.advance(), self.cpu.advance())
            else {
                break;
            };
            let queue = match self.queue.as_mut().map(WindowedRate::advance) {
                Some(Some(sample)) => Some(sample.value),
                Some(None) => break,
                None => None,
            };

            updated |= self.step(rx, tx, cpu, queue);
        }

        updated.then(|| self.shares())
    }

    fn is_ready(&self) -> bool {
        self.rx.is_ready()
            && self.tx.is_ready()
            && self.cpu.is_ready()
            && self.queue.as_ref().map_or(true, WindowedRate::is_ready)
    }

    fn weight(&self) -> f64 {
        let w = self.prev_rx_rate / (self.prev_rx_rate - self.prev_tx_rate);
        if w.is_finite() {
            w
        } else {
            0.0
        }
    }

    fn step(&mut self, rx: Sample, tx: Sample, cpu: Sample, queue: Option<i64>) -> bool {
        let tx_bytes = tx.value;
        if self.ibytes.is_none() {
            self.ibytes = Some(tx_bytes);
            self.tibytes = tx_bytes;
        }

        let weight = self.weight();
        match queue {
            None => {
                self.csum += (tx_bytes - self.tibytes) as f64 * weight;
                self.tibytes = tx_bytes;
            }
            // Queue drained: bytes forwarded since it filled count.
            Some(depth) if self.prev_queue > 0 && depth <= 0 => {
                self.csum += (tx_bytes - self.tibytes) as f64 * weight;
                self.tibytes = tx_bytes;
            }
            // Queue started filling: restart from here.
            Some(depth) if self.prev_queue <= 0 && depth > 0 => {
                self.tibytes = tx_bytes;
            }
            Some(_) => {}
        }

        let mut updated = false;
        if let Some(window) = self.rx.take_window() {
            self.tx.take_window();
            self.cpu.take_window();
            if let Some(queue) = self.queue.as_mut() {
                queue.take_window();
            }
            updated = self.close_period(window, tx_bytes, weight);
        }

        self.prev_rx_rate = rx.rate;
        self.prev_tx_rate = tx.rate;
        self.prev_queue = queue.unwrap_or(0);
        self.cpu_load = cpu.rate / CPU_RATE_SCALE;
        updated
    }

    fn close_period(&mut self, window: Duration, tx_bytes: i64, weight: f64) -> bool {
        let secs = window.as_secs_f64();
        let ibytes = self.ibytes.unwrap_or(tx_bytes);

        self.csum += (tx_bytes - self.tibytes) as f64 * weight;
        let dprime = self.csum / self.shares as f64 / secs;

        let usable = dprime.is_finite() && dprime != 0.0 && dprime.abs() < DPRIME_LIMIT;
        if usable {
            let delta = (tx_bytes - ibytes) as f64 / secs;
            let correction = (self.alpha * (self.reference - delta) / dprime) as i64;
            let shares = self.shares.saturating_add(correction).clamp(MIN_SHARES, MAX_SHARES);
            info!(
                "{}: csum {:.0} dprime {:.3} delta {:.0}, shares {} -> {}",
                self.entity.id, self.csum, dprime, delta, self.shares, shares
            );
            self.shares = shares;
        } else {
            debug!(
                "{}: skipping update, csum {:.0} dprime {}",
                self.entity.id, self.csum, dprime
            );
        }

        self.csum = 0.0;
        self.ibytes = Some(tx_bytes);
        self.tibytes = tx_bytes;
        usable
    }
}
