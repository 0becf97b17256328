//! RRPC correlation store.
//!
//! A fixed-capacity FIFO of unanswered RRPC requests plus a key index.
//! Inserting into a full ring evicts the oldest entry; answering takes the
//! entry out by key.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use embassy_time::Instant;
use heapless::Deque;

use crate::topics::Topic;
use crate::transport::QoS;

pub const RRPC_CAPACITY: usize = 100;

/// How an RRPC request is answered later.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RrpcKey {
    /// A service call; keyed by the envelope request id.
    Service(String),
    /// A message on an RRPC-wrapped user topic; keyed by the RRPC id.
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrpcEntry {
    pub key: RrpcKey,
    /// `/ext/rrpc/<id>/<original-topic>`, where the answer is published.
    pub reply_topic: Topic,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub received_at: Instant,
}

#[derive(Debug)]
pub struct RrpcStore<const N: usize> {
    ring: Deque<RrpcEntry, N>,
    index: BTreeSet<RrpcKey>,
}

impl<const N: usize> Default for RrpcStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RrpcStore<N> {
    pub const fn new() -> Self {
        Self {
            ring: Deque::new(),
            index: BTreeSet::new(),
        }
    }

    /// Stores an entry, returning the entry evicted to make room.
    ///
    /// A second request with the same key replaces the first.
    pub fn push(&mut self, entry: RrpcEntry) -> Option<RrpcEntry> {
        if self.index.contains(&entry.key) {
            self.take(&entry.key);
        }
        let evicted = if self.ring.is_full() {
            let oldest = self.ring.pop_front();
            if let Some(oldest) = &oldest {
                self.index.remove(&oldest.key);
            }
            oldest
        } else {
            None
        };
        self.index.insert(entry.key.clone());
        if let Err(rejected) = self.ring.push_back(entry) {
            // Only reachable with a zero-capacity ring.
            self.index.remove(&rejected.key);
        }
        evicted
    }

    pub fn contains(&self, key: &RrpcKey) -> bool {
        self.index.contains(key)
    }

    /// Removes and returns the entry for `key`, keeping the FIFO order of the rest.
    pub fn take(&mut self, key: &RrpcKey) -> Option<RrpcEntry> {
        if !self.index.remove(key) {
            return None;
        }
        let mut found = None;
        for _ in 0..self.ring.len() {
            let Some(entry) = self.ring.pop_front() else {
                break;
            };
            if found.is_none() && &entry.key == key {
                found = Some(entry);
            } else if let Err(entry) = self.ring.push_back(entry) {
                self.index.remove(&entry.key);
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.index.clear();
    }
}
