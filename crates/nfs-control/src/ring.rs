// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable ring queue.
//!
//! FIFO buffer used by the rate sampler. Capacity doubles when the queue is
//! full and is never given back: telemetry arrives in bursts that are drained
//! when a control window closes, so the peak size is reached again soon after.

use thiserror::Error;

/// Queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    EmptyQueue,
}

/// Circular FIFO buffer with doubling growth.
#[derive(Debug)]
pub struct RingQueue<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    size: usize,
}

impl<T> RingQueue<T> {
    /// Create a queue with room for `capacity` elements before the first resize.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            size: 0,
        }
    }

    /// Append a value at the back of the queue.
    pub fn push(&mut self, value: T) {
        if self.size == self.slots.len() {
            self.grow();
        }

        self.slots[self.tail] = Some(value);
        self.tail = (self.tail + 1) % self.slots.len();
        self.size += 1;
    }

    /// Remove and return the value at the front of the queue.
    pub fn pop(&mut self) -> Result<T, QueueError> {
        if self.size == 0 {
            return Err(QueueError::EmptyQueue);
        }

        let value = self.slots[self.head].take().ok_or(QueueError::EmptyQueue)?;
        self.head = (self.head + 1) % self.slots.len();
        self.size -= 1;
        Ok(value)
    }

    /// Borrow the value at the front of the queue.
    pub fn head(&self) -> Result<&T, QueueError> {
        if self.size == 0 {
            return Err(QueueError::EmptyQueue);
        }

        self.slots[self.head].as_ref().ok_or(QueueError::EmptyQueue)
    }

    /// Number of queued values.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if the queue holds no values.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    // Only ever grows. Elements are copied starting at `head` so the logical
    // order survives the move.
    fn grow(&mut self) {
        let new_capacity = (self.size * 2).max(1);
        let mut slots: Vec<Option<T>> = Vec::with_capacity(new_capacity);
        slots.resize_with(new_capacity, || None);

        let old_capacity = self.slots.len();
        for (i, slot) in slots.iter_mut().enumerate().take(self.size) {
            *slot = self.slots[(self.head + i) % old_capacity].take();
        }

        self.slots = slots;
        self.head = 0;
        self.tail = self.size % new_capacity;
    }
}

impl<T> Default for RingQueue<T> {
    fn default() -> Self {
        Self::with_capacity(2)
    }
}
