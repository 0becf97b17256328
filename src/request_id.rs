//! Correlation ids for outbound Thing Model requests.

use alloc::collections::BTreeMap;

use embassy_time::{Duration, Instant};

use crate::error::Error;

/// Request ids travel as decimal strings in the `id` field of an envelope.
pub type RequestId = u32;

/// Bounded cyclic counter handing out ids unique among outstanding requests.
#[derive(Debug)]
pub struct RequestIdAllocator {
    next: RequestId,
    max_value: RequestId,
    limit: usize,
    outstanding: BTreeMap<RequestId, Instant>,
}

impl RequestIdAllocator {
    /// Ids cycle through `0..=max_value`; at most `limit` may be outstanding.
    pub fn new(max_value: RequestId, limit: usize) -> Self {
        Self {
            next: 0,
            max_value,
            limit,
            outstanding: BTreeMap::new(),
        }
    }

    pub fn allocate(&mut self, now: Instant) -> Result<RequestId, Error> {
        if self.outstanding.len() >= self.limit
            || self.outstanding.len() > self.max_value as usize
        {
            return Err(Error::NoRequestId);
        }
        // At least one id in the space is free, so the scan terminates.
        loop {
            let candidate = self.next;
            self.next = if self.next >= self.max_value {
                0
            } else {
                self.next + 1
            };
            if !self.outstanding.contains_key(&candidate) {
                self.outstanding.insert(candidate, now);
                return Ok(candidate);
            }
        }
    }

    pub fn release(&mut self, id: RequestId) -> bool {
        self.outstanding.remove(&id).is_some()
    }

    /// Releases an id as received in a reply envelope.
    pub fn release_str(&mut self, id: &str) -> bool {
        id.parse().map(|id| self.release(id)).unwrap_or(false)
    }

    /// Drops ids older than `timeout`, returning how many aged out.
    pub fn collect_expired(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.outstanding.len();
        self.outstanding.retain(|id, issued| {
            let alive = now.saturating_duration_since(*issued) < timeout;
            if !alive {
                log::warn!("request {} timed out without reply", id);
            }
            alive
        });
        before - self.outstanding.len()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Forgets every outstanding id and restarts the counter.
    pub fn reset(&mut self) {
        self.outstanding.clear();
        self.next = 0;
    }
}
