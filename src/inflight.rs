//! In-flight registries: outstanding transport message ids per category.
//!
//! Each category sits behind its own lock so a publish-ack for one category
//! never waits on another. Timeouts are pruned and logged; they are never
//! reported back to the caller.

use alloc::collections::BTreeMap;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};

use crate::transport::MessageId;

/// Message categories tracked between publish and publish-ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InFlightCategory {
    EventPost,
    PropertyPost,
    PropertySetReply,
    ServiceReply,
    RawUp,
    RawDownReply,
    DeviceInfoUpdate,
    Shadow,
    DeviceInfoDelete,
    /// The batched system subscribe issued right after connect.
    SubscribeSys,
}

impl InFlightCategory {
    /// Publish categories in the order a publish-ack is matched against them.
    pub const PUBLISHES: [InFlightCategory; 9] = [
        InFlightCategory::EventPost,
        InFlightCategory::PropertyPost,
        InFlightCategory::PropertySetReply,
        InFlightCategory::ServiceReply,
        InFlightCategory::RawUp,
        InFlightCategory::RawDownReply,
        InFlightCategory::DeviceInfoUpdate,
        InFlightCategory::Shadow,
        InFlightCategory::DeviceInfoDelete,
    ];

    pub const COUNT: usize = 10;

    const fn index(self) -> usize {
        self as usize
    }
}

/// Message id → submission time for one category.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    entries: BTreeMap<MessageId, Instant>,
}

impl InFlightRegistry {
    pub fn track(&mut self, mid: MessageId, now: Instant) {
        self.entries.insert(mid, now);
    }

    pub fn acknowledge(&mut self, mid: MessageId) -> bool {
        self.entries.remove(&mid).is_some()
    }

    /// Removes entries submitted at least `timeout` before `now`.
    pub fn prune(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, issued| now.saturating_duration_since(*issued) < timeout);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

type Slot = Mutex<CriticalSectionRawMutex, RefCell<InFlightRegistry>>;

/// One locked registry per [`InFlightCategory`].
pub struct InFlightTable {
    slots: [Slot; InFlightCategory::COUNT],
}

impl Default for InFlightTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Mutex::new(RefCell::new(InFlightRegistry::default()))),
        }
    }

    fn with<R>(&self, category: InFlightCategory, f: impl FnOnce(&mut InFlightRegistry) -> R) -> R {
        self.slots[category.index()].lock(|slot| f(&mut slot.borrow_mut()))
    }

    /// Records the message id of a submission the link just accepted.
    ///
    /// Acks are matched on the dispatch worker, which only sees them after
    /// the submitting call has returned.
    pub fn track(&self, category: InFlightCategory, mid: MessageId, now: Instant) {
        self.with(category, |registry| registry.track(mid, now));
    }

    pub fn acknowledge(&self, category: InFlightCategory, mid: MessageId) -> bool {
        self.with(category, |registry| registry.acknowledge(mid))
    }

    /// Matches a publish-ack against the publish categories, first hit wins.
    pub fn acknowledge_publish(&self, mid: MessageId) -> Option<InFlightCategory> {
        InFlightCategory::PUBLISHES
            .into_iter()
            .find(|category| self.acknowledge(*category, mid))
    }

    /// Prunes every category, logging what timed out.
    pub fn prune(&self, now: Instant, timeout: Duration) -> usize {
        let mut pruned = 0;
        for category in InFlightCategory::PUBLISHES
            .into_iter()
            .chain(core::iter::once(InFlightCategory::SubscribeSys))
        {
            let removed = self.with(category, |registry| registry.prune(now, timeout));
            if removed > 0 {
                log::warn!("{:?}: {} message(s) timed out without ack", category, removed);
            }
            pruned += removed;
        }
        pruned
    }

    pub fn len(&self, category: InFlightCategory) -> usize {
        self.with(category, |registry| registry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.lock(|registry| registry.borrow().is_empty()))
    }

    pub fn clear(&self) {
        for slot in &self.slots {
            slot.lock(|registry| registry.borrow_mut().clear());
        }
    }
}
