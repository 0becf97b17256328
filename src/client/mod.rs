//! # Thing Model Client
//!
//! [`ThingClient`] ties the registries together around one [`MqttLink`].
//!
//! The client is shared by reference between three kinds of tasks:
//!
//! - the session loop, [`ThingClient::run_session`], which connects, polls
//!   the link, reconnects with backoff and sweeps timed-out requests;
//! - the dispatch worker, [`ThingClient::run_dispatcher`], which delivers
//!   events to the application's [`ThingHandler`](crate::runtime::ThingHandler);
//! - application tasks calling the outbound operations (`post_property`,
//!   `trigger_event`, `answer_service`, ...), which never wait on the network.
//!
//! ```ignore
//! let client = ThingClient::new(config, link)?;
//! client.thing_setup(Some(TSL_JSON.as_bytes()))?;
//! client.connect_async()?;
//! join(client.run_session(), client.run_dispatcher(&mut handler)).await;
//! ```

mod dispatch;
mod session;
mod subscriptions;
mod thing;

pub use thing::AlgorithmInventory;

use alloc::string::String;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::auth::{NoRegistrar, Registrar};
use crate::backoff::Backoff;
use crate::config::{ConnectionConfig, DeviceIdentity, MAX_REQUEST_ID, MqttOptions, validate_interface_info};
use crate::error::{ConnectResult, Error, ValidationError};
use crate::inflight::InFlightTable;
use crate::request_id::RequestIdAllocator;
use crate::rrpc::{RRPC_CAPACITY, RrpcStore};
use crate::runtime::{DispatchQueue, SessionEpoch};
use crate::shadow::{Shadow, ShadowStore};
use crate::state::{SessionState, StateCell};
use crate::thing_model::ThingModel;
use crate::topics::{SubscriptionBook, ThingTopics};
use crate::transport::MqttLink;

pub(crate) type Locked<T> = Mutex<CriticalSectionRawMutex, RefCell<T>>;

fn locked<T>(value: T) -> Locked<T> {
    Mutex::new(RefCell::new(value))
}

/// Derived topics plus the loaded model, if any.
pub(crate) struct Thing {
    topics: ThingTopics,
    model: Option<ThingModel>,
    setup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Start { reconnect: bool },
    Shutdown,
}

/// Signals between the public API, the session loop and the worker.
pub(crate) struct Control {
    command: Signal<CriticalSectionRawMutex, SessionCommand>,
    stop_requested: AtomicBool,
    stop: Signal<CriticalSectionRawMutex, ()>,
    loop_running: AtomicBool,
    loop_done: Signal<CriticalSectionRawMutex, ()>,
    first_attempt: Signal<CriticalSectionRawMutex, ConnectResult>,
    worker_started: AtomicBool,
    worker_exited: Signal<CriticalSectionRawMutex, ()>,
}

impl Control {
    const fn new() -> Self {
        Self {
            command: Signal::new(),
            stop_requested: AtomicBool::new(false),
            stop: Signal::new(),
            loop_running: AtomicBool::new(false),
            loop_done: Signal::new(),
            first_attempt: Signal::new(),
            worker_started: AtomicBool::new(false),
            worker_exited: Signal::new(),
        }
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop.signal(());
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }
}

/// Device-side Thing Model client over an [`MqttLink`].
pub struct ThingClient<L: MqttLink, R: Registrar = NoRegistrar> {
    link: L,
    registrar: R,
    identity: DeviceIdentity,
    options: Locked<MqttOptions>,
    interface_info: Locked<String>,
    device_secret: Locked<String>,
    state: StateCell,
    thing: Locked<Thing>,
    enabled: AtomicBool,
    epoch: AtomicU32,
    request_ids: Locked<RequestIdAllocator>,
    inflight: InFlightTable,
    subscriptions: Locked<SubscriptionBook>,
    rrpc: Locked<RrpcStore<RRPC_CAPACITY>>,
    shadow: ShadowStore,
    queue: DispatchQueue,
    backoff: Locked<Backoff>,
    rng: Locked<SmallRng>,
    control: Control,
}

impl<L: MqttLink> ThingClient<L, NoRegistrar> {
    /// Creates a client for a device provisioned with its device secret.
    pub fn new(config: ConnectionConfig, link: L) -> Result<Self, Error> {
        Self::with_registrar(config, link, NoRegistrar)
    }
}

impl<L: MqttLink, R: Registrar> ThingClient<L, R> {
    /// Creates a client that can register itself when the device secret is empty.
    pub fn with_registrar(config: ConnectionConfig, link: L, registrar: R) -> Result<Self, Error> {
        config.validate()?;
        let ConnectionConfig { identity, mqtt } = config;
        let topics = ThingTopics::new(&identity.product_key, &identity.device_name)?;
        let seed = mqtt.rng_seed ^ Instant::now().as_ticks();
        Ok(Self {
            link,
            registrar,
            device_secret: locked(identity.device_secret.clone()),
            identity,
            request_ids: locked(RequestIdAllocator::new(MAX_REQUEST_ID, mqtt.max_queued)),
            backoff: locked(Backoff::new(mqtt.reconnect_min_secs, mqtt.reconnect_max_secs)),
            options: locked(mqtt),
            interface_info: locked(String::new()),
            state: StateCell::new(),
            thing: locked(Thing {
                topics,
                model: None,
                setup: false,
            }),
            enabled: AtomicBool::new(false),
            epoch: AtomicU32::new(0),
            inflight: InFlightTable::new(),
            subscriptions: locked(SubscriptionBook::new()),
            rrpc: locked(RrpcStore::new()),
            shadow: ShadowStore::new(),
            queue: DispatchQueue::new(),
            rng: locked(SmallRng::seed_from_u64(seed)),
            control: Control::new(),
        })
    }

    /// Replaces the MQTT options; only legal before the first connect.
    pub fn config_mqtt(&self, options: MqttOptions) -> Result<(), Error> {
        self.state.require(&[SessionState::Initialized])?;
        options.validate()?;
        self.request_ids.lock(|ids| {
            *ids.borrow_mut() = RequestIdAllocator::new(MAX_REQUEST_ID, options.max_queued);
        });
        self.backoff.lock(|backoff| {
            *backoff.borrow_mut() = Backoff::new(options.reconnect_min_secs, options.reconnect_max_secs);
        });
        self.options.lock(|current| *current.borrow_mut() = options);
        Ok(())
    }

    /// Sets the interface description uploaded after every connect.
    pub fn config_device_info(&self, interface_info: &str) -> Result<(), Error> {
        self.state.require(&[SessionState::Initialized])?;
        validate_interface_info(interface_info)?;
        self.interface_info
            .lock(|info| *info.borrow_mut() = String::from(interface_info));
        Ok(())
    }

    /// Loads the Thing Model, or enters raw-only mode with `None`.
    pub fn thing_setup(&self, document: Option<&[u8]>) -> Result<(), Error> {
        self.state.require(&[SessionState::Initialized])?;
        let model = document.map(ThingModel::parse).transpose()?;
        let identity = &self.identity;
        self.thing.lock(|thing| {
            let mut thing = thing.borrow_mut();
            if thing.setup {
                return Err(Error::Validation(ValidationError::ThingAlreadySetup));
            }
            if let Some(model) = &model {
                thing
                    .topics
                    .declare(&identity.product_key, &identity.device_name, model)?;
            }
            thing.model = model;
            thing.setup = true;
            Ok(())
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Whether the system subscription has been acknowledged this session.
    pub fn is_thing_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn registrar(&self) -> &R {
        &self.registrar
    }

    /// The latest shadow document received from the cloud.
    pub fn latest_shadow(&self) -> Shadow {
        self.shadow.get()
    }

    /// Direct access to the shadow store.
    pub fn shadow_store(&self) -> &ShadowStore {
        &self.shadow
    }

    /// Copy of the derived topic namespace.
    pub fn topics(&self) -> ThingTopics {
        self.with_thing(|thing| thing.topics.clone())
    }

    /// Number of requests still waiting for a reply.
    pub fn outstanding_requests(&self) -> usize {
        self.request_ids.lock(|ids| ids.borrow().outstanding())
    }

    /// Whether every correlation registry is empty.
    pub fn is_correlation_idle(&self) -> bool {
        self.inflight.is_empty()
            && self.outstanding_requests() == 0
            && self.subscriptions.lock(|book| book.borrow().is_empty())
            && self.rrpc.lock(|rrpc| rrpc.borrow().is_empty())
    }

    fn with_thing<T>(&self, f: impl FnOnce(&Thing) -> T) -> T {
        self.thing.lock(|thing| f(&thing.borrow()))
    }

    fn options<T>(&self, f: impl FnOnce(&MqttOptions) -> T) -> T {
        self.options.lock(|options| f(&options.borrow()))
    }

    fn epoch(&self) -> SessionEpoch {
        self.epoch.load(Ordering::Acquire)
    }

    /// Empties every correlation registry; a new session starts clean.
    ///
    /// Advancing the epoch first makes the worker discard whatever the
    /// closed session still has queued.
    fn reset_correlation(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.enabled.store(false, Ordering::Release);
        self.inflight.clear();
        self.request_ids.lock(|ids| ids.borrow_mut().reset());
        self.subscriptions.lock(|book| book.borrow_mut().clear());
        self.rrpc.lock(|rrpc| rrpc.borrow_mut().clear());
    }
}
