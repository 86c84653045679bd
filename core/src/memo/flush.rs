//! Size-growth and elapsed-time flush triggers.

use std::time::{Duration, Instant};

use crate::config::WrapConfig;

/// Remembers the last successful flush of one table and decides when the next one is due.
#[derive(Debug, Clone, Copy)]
pub struct FlushSchedule {
    growth_factor: f64,
    delay: Duration,
    last_flush_size: usize,
    last_flush_time: Instant,
}

impl FlushSchedule {
    /// Start a schedule for a table that currently holds `initial_size` persisted entries.
    pub fn new(config: &WrapConfig, initial_size: usize, now: Instant) -> Self {
        Self {
            growth_factor: config.growth_factor,
            delay: config.flush_delay,
            last_flush_size: initial_size,
            last_flush_time: now,
        }
    }

    /// `size > last_flush_size * (1 + growth_factor)` or the last flush is older than the delay.
    pub fn is_due(&self, size: usize, now: Instant) -> bool {
        let grown = size as f64 > self.last_flush_size as f64 * (1.0 + self.growth_factor);
        let stale = now.saturating_duration_since(self.last_flush_time) > self.delay;
        grown || stale
    }

    pub fn mark_flushed(&mut self, size: usize, now: Instant) {
        self.last_flush_size = size;
        self.last_flush_time = now;
    }

    pub fn last_flush_size(&self) -> usize {
        self.last_flush_size
    }

    pub fn last_flush_time(&self) -> Instant {
        self.last_flush_time
    }
}
