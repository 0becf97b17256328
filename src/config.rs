//! Device identity and MQTT tuning options.
//!
//! Both structs are validated when handed to the client and become immutable
//! once the client leaves `Initialized`.

use alloc::string::String;

use embassy_time::Duration;

use crate::error::ValidationError;
use crate::transport::MqttVersion;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;
pub const KEEP_ALIVE_RANGE: core::ops::RangeInclusive<u16> = 60..=180;
pub const RECONNECT_RANGE_SECS: core::ops::RangeInclusive<u32> = 1..=7200;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 20;
pub const DEFAULT_MAX_QUEUED: usize = 40;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_INTERFACE_INFO_LEN: usize = 160;
pub const MAX_REQUEST_ID: u32 = 1_000_000;

/// Who the device is and where it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Region host, e.g. `cn-shanghai`; `127.0.0.1`/`localhost` connect directly.
    pub host: String,
    pub product_key: String,
    pub device_name: String,
    /// Empty when the device registers itself dynamically.
    pub device_secret: String,
    pub product_secret: String,
}

impl DeviceIdentity {
    pub fn new(
        host: impl Into<String>,
        product_key: impl Into<String>,
        device_name: impl Into<String>,
        device_secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            product_key: product_key.into(),
            device_name: device_name.into(),
            device_secret: device_secret.into(),
            product_secret: String::new(),
        }
    }

    pub fn with_product_secret(mut self, secret: impl Into<String>) -> Self {
        self.product_secret = secret.into();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        if self.product_key.is_empty() {
            return Err(ValidationError::EmptyProductKey);
        }
        if self.device_name.is_empty() {
            return Err(ValidationError::EmptyDeviceName);
        }
        if self.device_secret.is_empty() && self.product_secret.is_empty() {
            return Err(ValidationError::MissingSecret);
        }
        Ok(())
    }

    /// Broker host derived from the region host.
    pub fn broker_host(&self) -> String {
        match self.host.as_str() {
            "127.0.0.1" | "localhost" => self.host.clone(),
            region => alloc::format!("{}.iot-as-mqtt.{}.aliyuncs.com", self.product_key, region),
        }
    }
}

/// MQTT transport tuning.
#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub port: u16,
    pub version: MqttVersion,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub tls: bool,
    /// PEM trust material handed to the link when `tls` is set.
    pub ca_cert: Option<String>,
    pub max_in_flight: usize,
    /// Also bounds the number of outstanding request ids.
    pub max_queued: usize,
    pub reconnect_min_secs: u32,
    pub reconnect_max_secs: u32,
    pub request_timeout: Duration,
    /// Upper bound on one blocking poll of the link.
    pub poll_interval: Duration,
    /// Wall-clock milliseconds for connect signatures; uptime is used when absent.
    pub unix_time_ms: Option<fn() -> u64>,
    pub rng_seed: u64,
}

impl Default for MqttOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            version: MqttVersion::V311,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            clean_session: true,
            tls: true,
            ca_cert: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_queued: DEFAULT_MAX_QUEUED,
            reconnect_min_secs: 1,
            reconnect_max_secs: 60,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            unix_time_ms: None,
            rng_seed: 0x5eed_1e55,
        }
    }
}

impl MqttOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_version(mut self, version: MqttVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Disables TLS; the connect signature then advertises secure mode 3.
    pub fn without_tls(mut self) -> Self {
        self.tls = false;
        self.ca_cert = None;
        self
    }

    pub fn with_ca_cert(mut self, pem: impl Into<String>) -> Self {
        self.tls = true;
        self.ca_cert = Some(pem.into());
        self
    }

    pub fn with_queue_limits(mut self, max_in_flight: usize, max_queued: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self.max_queued = max_queued;
        self
    }

    pub fn with_reconnect_backoff(mut self, min_secs: u32, max_secs: u32) -> Self {
        self.reconnect_min_secs = min_secs;
        self.reconnect_max_secs = max_secs;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_unix_time(mut self, clock: fn() -> u64) -> Self {
        self.unix_time_ms = Some(clock);
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !KEEP_ALIVE_RANGE.contains(&self.keep_alive_secs) {
            return Err(ValidationError::KeepAliveOutOfRange);
        }
        if !RECONNECT_RANGE_SECS.contains(&self.reconnect_min_secs)
            || !RECONNECT_RANGE_SECS.contains(&self.reconnect_max_secs)
            || self.reconnect_min_secs > self.reconnect_max_secs
        {
            return Err(ValidationError::ReconnectBackoffOutOfRange);
        }
        if self.max_in_flight == 0 || self.max_queued == 0 {
            return Err(ValidationError::InvalidQueueLimit);
        }
        Ok(())
    }
}

/// Identity plus transport options, as handed to the client constructor.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub identity: DeviceIdentity,
    pub mqtt: MqttOptions,
}

impl ConnectionConfig {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            mqtt: MqttOptions::default(),
        }
    }

    pub fn with_mqtt(mut self, mqtt: MqttOptions) -> Self {
        self.mqtt = mqtt;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.identity.validate()?;
        self.mqtt.validate()
    }
}

/// Checks the free-form interface description uploaded after connect.
pub fn validate_interface_info(info: &str) -> Result<(), ValidationError> {
    if info.chars().count() > MAX_INTERFACE_INFO_LEN {
        Err(ValidationError::InterfaceInfoTooLong)
    } else {
        Ok(())
    }
}
