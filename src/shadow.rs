//! Device shadow snapshot.
//!
//! Shadow documents arrive either flat (`{version, timestamp, ...}`) or
//! nested under `payload`. State and metadata are only taken from a
//! `payload.status == "success"` reply.

use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use serde_json::Value;

/// The latest shadow document known to the device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shadow {
    pub version: Option<u64>,
    pub timestamp: Option<u64>,
    pub state: Option<Value>,
    pub metadata: Option<Value>,
    pub last_received_time: Option<Instant>,
    /// The last shadow message, verbatim, even if it failed to parse.
    pub last_received_payload: Option<Vec<u8>>,
}

#[derive(Debug, PartialEq)]
struct Extracted {
    version: Option<u64>,
    timestamp: Option<u64>,
    state: Option<(Value, Option<Value>)>,
}

fn extract(payload: &[u8]) -> Result<Extracted, serde_json::Error> {
    let doc: Value = serde_json::from_slice(payload)?;
    let inner = doc.get("payload");
    let field = |name: &str| {
        doc.get(name)
            .or_else(|| inner.and_then(|p| p.get(name)))
            .and_then(Value::as_u64)
    };
    let success = inner
        .and_then(|p| p.get("status"))
        .and_then(Value::as_str)
        == Some("success");
    let state = if success {
        inner
            .and_then(|p| p.get("state"))
            .map(|state| (state.clone(), inner.and_then(|p| p.get("metadata")).cloned()))
    } else {
        None
    };
    Ok(Extracted {
        version: field("version"),
        timestamp: field("timestamp"),
        state,
    })
}

impl Shadow {
    /// Applies a received shadow message.
    ///
    /// The raw payload and receive time are always recorded; the document
    /// fields change only if the payload parses.
    pub fn ingest(&mut self, payload: &[u8], now: Instant) -> Result<(), serde_json::Error> {
        self.last_received_time = Some(now);
        self.last_received_payload = Some(payload.to_vec());
        let extracted = extract(payload)?;
        if extracted.version.is_some() {
            self.version = extracted.version;
        }
        if extracted.timestamp.is_some() {
            self.timestamp = extracted.timestamp;
        }
        if let Some((state, metadata)) = extracted.state {
            self.state = Some(state);
            self.metadata = metadata;
        }
        Ok(())
    }
}

/// A [`Shadow`] behind its own lock.
pub struct ShadowStore {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Shadow>>,
}

impl Default for ShadowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Shadow::default())),
        }
    }

    /// Parses and stores a shadow message; parse failures are logged and swallowed.
    pub fn ingest(&self, payload: &[u8], now: Instant) {
        self.inner.lock(|shadow| {
            if let Err(err) = shadow.borrow_mut().ingest(payload, now) {
                log::warn!("ignoring malformed shadow document: {}", err);
            }
        });
    }

    pub fn get(&self) -> Shadow {
        self.inner.lock(|shadow| shadow.borrow().clone())
    }

    pub fn set(&self, shadow: Shadow) {
        self.inner.lock(|current| *current.borrow_mut() = shadow);
    }
}
