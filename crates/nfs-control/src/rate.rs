// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Windowed rate sampler.
//!
//! Turns a stream of timestamped cumulative counters into one sample per
//! `step`: the first value at or after each step boundary, plus its rate of
//! change against the last sample that was discarded on the way there.
//!
//! Several samplers built with the same `step` and base time stay aligned
//! as long as they are only advanced together (see [`WindowedRate::is_ready`]).
//! Every `window` worth of steps, [`WindowedRate::take_window`] reports the
//! elapsed time once, which closes one control period.
//!
//! ```text
//!  samples:  40   60   80  90 99 100 101          140
//!  step=10:  |10|20|30|40|50|60|70|80|90|100|110|...|140|
//!  value:     1  1  1  1  2  2  3  3  4   6   8        8
//! ```

use crate::ring::RingQueue;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// One synchronized step of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Counter value of the first sample at or after the step boundary.
    pub value: i64,
    /// Change per second against the last discarded sample.
    pub rate: f64,
}

/// Sliding-window sampler for one metric series.
#[derive(Debug)]
pub struct WindowedRate {
    values: RingQueue<i64>,
    stamps: RingQueue<DateTime<Utc>>,

    boundary: DateTime<Utc>,
    step_ms: i64,
    window_ms: u64,

    since_ms: u64,
    last_discarded: Option<(i64, DateTime<Utc>)>,
    latest: Option<DateTime<Utc>>,
}

impl WindowedRate {
    /// Create a sampler stepping every `step`, closing a window every `window`.
    ///
    /// The first boundary is `base + step`.
    pub fn new(step: Duration, window: Duration, base: DateTime<Utc>) -> Self {
        let step_ms = (step.as_millis() as i64).max(1);
        let window_ms = window.as_millis() as u64;
        let capacity = (window_ms / step_ms as u64 * 2).max(2) as usize;

        Self {
            values: RingQueue::with_capacity(capacity),
            stamps: RingQueue::with_capacity(capacity),
            boundary: base,
            step_ms,
            window_ms,
            since_ms: 0,
            last_discarded: None,
            latest: None,
        }
    }

    /// Buffer one sample. Timestamps must not decrease within a series.
    pub fn add_point(&mut self, timestamp: DateTime<Utc>, value: i64) {
        self.values.push(value);
        self.stamps.push(timestamp);
        self.latest = Some(self.latest.map_or(timestamp, |t| t.max(timestamp)));
    }

    /// Check whether [`advance`](Self::advance) would succeed.
    pub fn is_ready(&self) -> bool {
        let next = self.next_boundary();
        self.latest.is_some_and(|t| t >= next)
    }

    /// Move to the next step boundary.
    ///
    /// Returns `None` if no buffered sample reaches the next boundary yet;
    /// the boundary is then left where it was so the caller can retry once
    /// more data has arrived.
    pub fn advance(&mut self) -> Option<Sample> {
        let boundary = self.next_boundary();

        while let Ok(&ts) = self.stamps.head() {
            if ts >= boundary {
                break;
            }
            if let (Ok(ts), Ok(value)) = (self.stamps.pop(), self.values.pop()) {
                self.last_discarded = Some((value, ts));
            }
        }

        let ts = *self.stamps.head().ok()?;
        let value = *self.values.head().ok()?;

        self.boundary = boundary;
        self.since_ms += self.step_ms as u64;

        let rate = match self.last_discarded {
            Some((prev_value, prev_ts)) => {
                let dt_ms = (ts - prev_ts).num_milliseconds();
                if dt_ms > 0 {
                    (value - prev_value) as f64 * 1000.0 / dt_ms as f64
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        Some(Sample { value, rate })
    }

    /// Report the elapsed stepped time once it reaches the window length.
    ///
    /// Returns `None` until then; after returning `Some` the accumulator
    /// starts again from zero.
    pub fn take_window(&mut self) -> Option<Duration> {
        if self.since_ms < self.window_ms {
            return None;
        }

        let elapsed = self.since_ms;
        self.since_ms = 0;
        Some(Duration::from_millis(elapsed))
    }

    /// Number of buffered samples.
    pub fn buffered(&self) -> usize {
        self.values.size()
    }

    /// Current step boundary.
    pub fn boundary(&self) -> DateTime<Utc> {
        self.boundary
    }

    fn next_boundary(&self) -> DateTime<Utc> {
        self.boundary + chrono::Duration::milliseconds(self.step_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn sampler() -> WindowedRate {
        WindowedRate::new(Duration::from_millis(10), Duration::from_millis(100), at(0))
    }

    /// Feed batches and collect (window, sum of values, step count) per closed window.
    fn run_batches(w: &mut WindowedRate, batches: &[&[(i64, i64)]]) -> Vec<(u64, i64, u32)> {
        let mut windows = Vec::new();
        let mut sum = 0;
        let mut count = 0;

        for batch in batches {
            for &(ts, v) in batch.iter() {
                w.add_point(at(ts), v);
            }
            while let Some(sample) = w.advance() {
                sum += sample.value;
                count += 1;
                if let Some(elapsed) = w.take_window() {
                    windows.push((elapsed.as_millis() as u64, sum, count));
                    sum = 0;
                    count = 0;
                }
            }
        }

        windows
    }

    const SPARSE: [(i64, i64); 9] = [
        (40, 1),
        (60, 2),
        (80, 3),
        (90, 4),
        (99, 5),
        (100, 6),
        (101, 7),
        (140, 8),
        (240, 9),
    ];

    #[test]
    fn test_sparse_single_batch() {
        let mut w = sampler();
        let windows = run_batches(&mut w, &[&SPARSE[..]]);
        assert_eq!(
            windows,
            vec![
                (100, 1 + 1 + 1 + 1 + 2 + 2 + 3 + 3 + 4 + 6, 10),
                (100, 8 * 4 + 9 * 6, 10)
            ]
        );
    }

    #[test]
    fn test_sparse_split_batches_match_single_batch() {
        let mut w = sampler();
        let two = run_batches(&mut w, &[&SPARSE[..3], &SPARSE[3..]]);

        let mut w = sampler();
        let three = run_batches(&mut w, &[&SPARSE[..3], &SPARSE[3..6], &SPARSE[6..]]);

        let mut w = sampler();
        let one = run_batches(&mut w, &[&SPARSE[..]]);

        assert_eq!(two, one);
        assert_eq!(three, one);
    }

    #[test]
    fn test_dense_series_with_gap() {
        let points: Vec<(i64, i64)> = [
            10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 120, 130, 140, 150, 160, 170, 180, 190, 200,
        ]
        .iter()
        .enumerate()
        .map(|(i, &ts)| (ts, i as i64 + 1))
        .collect();

        let mut w = sampler();
        let windows = run_batches(&mut w, &[points.as_slice()]);
        assert_eq!(windows, vec![(100, 55, 10), (100, 146, 10)]);
    }

    #[test]
    fn test_advance_without_data_keeps_boundary() {
        let mut w = sampler();
        assert!(!w.is_ready());
        assert!(w.advance().is_none());
        assert_eq!(w.boundary(), at(0));

        w.add_point(at(10), 5);
        assert!(w.is_ready());
        assert_eq!(w.advance().map(|s| s.value), Some(5));
        assert_eq!(w.boundary(), at(10));
        assert!(w.advance().is_none());
        assert_eq!(w.boundary(), at(10));
    }

    #[test]
    fn test_rate_against_last_discarded() {
        let mut w = sampler();
        for i in 1..=5 {
            w.add_point(at(i * 10), i * 100);
        }

        // Nothing discarded yet on the first step.
        assert_eq!(w.advance(), Some(Sample { value: 100, rate: 0.0 }));

        // 100 units per 10ms is 10_000 per second.
        let s = w.advance().unwrap();
        assert_eq!(s.value, 200);
        assert!((s.rate - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_after_failed_advance() {
        let mut w = sampler();
        w.add_point(at(5), 1);
        w.add_point(at(10), 7);
        w.add_point(at(10), 9);

        let s = w.advance().unwrap();
        assert_eq!(s.value, 7);
        assert!((s.rate - 1200.0).abs() < 1e-9);

        // The next boundary discards both samples at 10ms; nothing reaches 20ms.
        assert!(w.advance().is_none());
        w.add_point(at(10 + 10), 11);
        let s = w.advance().unwrap();
        assert_eq!(s.value, 11);
        assert!((s.rate - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_window_edge() {
        let mut w = sampler();
        for i in 1..=25 {
            w.add_point(at(i * 10), i);
        }
        let mut closed = Vec::new();
        for step in 1..=25 {
            assert!(w.advance().is_some());
            if let Some(d) = w.take_window() {
                closed.push((step, d));
            }
        }
        assert_eq!(
            closed,
            vec![
                (10, Duration::from_millis(100)),
                (20, Duration::from_millis(100))
            ]
        );
        assert!(w.take_window().is_none());
    }

    #[test]
    fn test_drained_samples_are_released() {
        let mut w = sampler();
        for i in 1..=50 {
            w.add_point(at(i * 10), i);
        }
        while w.advance().is_some() {}
        // The failed advance discarded the final sample but kept it as the rate base.
        assert_eq!(w.buffered(), 0);
        w.add_point(at(510), 51);
        let s = w.advance().unwrap();
        assert!((s.rate - 100.0).abs() < 1e-9);
    }
}
