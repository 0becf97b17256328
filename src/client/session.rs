//! Session loop: connect, poll, reconnect, shutdown.

use core::sync::atomic::Ordering;

use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Timer, with_timeout};

use super::{SessionCommand, ThingClient};
use crate::alink;
use crate::auth::{
    MqttCredentials, Registrar, RegistrationRequest, parse_registration_reply, registration_nonce,
};
use crate::error::{ConnectResult, Error, RegistrationError};
use crate::inflight::InFlightCategory;
use crate::runtime::{DisconnectReason, SessionEvent};
use crate::state::SessionState;
use crate::transport::{ConnectParams, LinkEvent, MqttLink, QoS};

impl<L: MqttLink, R: Registrar> ThingClient<L, R> {
    /// Connects once and waits for the outcome; the session is not re-established if it drops.
    ///
    /// Requires [`run_session`](Self::run_session) to be driven concurrently.
    pub async fn connect(&self) -> Result<(), Error> {
        self.begin_session(false)?;
        match self.control.first_attempt.wait().await {
            ConnectResult::Accepted => Ok(()),
            failure => Err(Error::ConnectionRefused(failure)),
        }
    }

    /// Starts the session loop with automatic reconnect and returns immediately.
    ///
    /// Connect outcomes are reported through `on_connect`.
    pub fn connect_async(&self) -> Result<(), Error> {
        self.begin_session(true)
    }

    fn begin_session(&self, reconnect: bool) -> Result<(), Error> {
        if self.control.loop_running.load(Ordering::Acquire) {
            return Err(Error::State(self.state.get()));
        }
        self.state.transition(
            &[SessionState::Initialized, SessionState::Disconnected],
            SessionState::Connecting,
        )?;
        self.control.stop_requested.store(false, Ordering::Release);
        self.control.stop.reset();
        self.control.loop_done.reset();
        self.control.first_attempt.reset();
        self.control.command.signal(SessionCommand::Start { reconnect });
        Ok(())
    }

    /// Ends the session and waits until the session loop has wound down.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.state
            .transition(&[SessionState::Connected], SessionState::Disconnecting)?;
        self.control.request_stop();
        self.control.loop_done.wait().await;
        Ok(())
    }

    /// Tears the client down: stops the session loop and the dispatch worker.
    ///
    /// Terminal; any later call fails with a state error.
    pub async fn destruct(&self) -> Result<(), Error> {
        self.state.transition(
            &[
                SessionState::Initialized,
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Disconnecting,
                SessionState::Disconnected,
            ],
            SessionState::Destructing,
        )?;
        if self.control.loop_running.load(Ordering::Acquire) {
            self.control.request_stop();
            self.control.loop_done.wait().await;
        }
        self.control.command.signal(SessionCommand::Shutdown);
        self.reset_correlation();

        if self.control.worker_started.load(Ordering::Acquire) {
            if let Err(err) = self.queue.post(self.epoch(), SessionEvent::Exit).await {
                log::error!("could not stop dispatch worker: {}", err);
            } else {
                self.control.worker_exited.wait().await;
            }
        }
        self.state.set(SessionState::Destructed);
        log::info!("client destructed");
        Ok(())
    }

    /// Drives the session loop until [`destruct`](Self::destruct).
    ///
    /// Idle until `connect`/`connect_async` is called; returns once the
    /// client is destructed.
    pub async fn run_session(&self) {
        loop {
            match self.control.command.wait().await {
                SessionCommand::Shutdown => break,
                SessionCommand::Start { reconnect } => {
                    self.control.loop_running.store(true, Ordering::Release);
                    self.session_loop(reconnect).await;
                    self.control.loop_running.store(false, Ordering::Release);
                    self.control.loop_done.signal(());
                }
            }
        }
    }

    async fn session_loop(&self, reconnect: bool) {
        let mut reported = false;
        loop {
            if self.control.stop_requested() {
                break;
            }
            let Some((result, session_present)) = self.attempt_connect().await else {
                break;
            };
            if result.is_success() {
                self.on_session_established(session_present).await;
                if !reported {
                    self.control.first_attempt.signal(result);
                    reported = true;
                }
                let reason = self.pump().await;
                self.on_session_closed(reason).await;
                if reason == DisconnectReason::Requested {
                    break;
                }
            } else {
                self.on_connect_failed(result).await;
                if !reported {
                    self.control.first_attempt.signal(result);
                    reported = true;
                }
            }

            if !reconnect || self.control.stop_requested() || !self.wait_backoff().await {
                break;
            }
            if self
                .state
                .transition(&[SessionState::Disconnected], SessionState::Connecting)
                .is_err()
            {
                break;
            }
        }
        if !reported {
            self.control.first_attempt.signal(ConnectResult::TransportFailure);
        }
        // A stop that raced with a failed attempt leaves the state in Disconnecting.
        let _ = self
            .state
            .transition(&[SessionState::Disconnecting, SessionState::Connecting], SessionState::Disconnected);
    }

    /// One connect attempt; `None` when a stop request interrupted it.
    async fn attempt_connect(&self) -> Option<(ConnectResult, bool)> {
        let secret = match self.resolve_device_secret().await {
            Ok(secret) => secret,
            Err(err) => {
                log::warn!("dynamic registration failed: {:?}", err);
                return Some((ConnectResult::RegistrationFailed, false));
            }
        };
        let params = self.connect_params(&secret);
        log::info!("connecting to {}:{}", params.host, params.port);
        match select(self.control.stop.wait(), self.link.connect(&params)).await {
            Either::First(()) => None,
            Either::Second(Ok(ack)) if ack.code == 0 => Some((ConnectResult::Accepted, ack.session_present)),
            Either::Second(Ok(ack)) => Some((ConnectResult::Refused(ack.code.into()), false)),
            Either::Second(Err(err)) => {
                log::warn!("connect failed: {:?}", err);
                Some((ConnectResult::TransportFailure, false))
            }
        }
    }

    /// Returns the device secret, registering the device first if it has none.
    async fn resolve_device_secret(&self) -> Result<alloc::string::String, RegistrationError> {
        let cached = self.device_secret.lock(|secret| secret.borrow().clone());
        if !cached.is_empty() {
            return Ok(cached);
        }
        let nonce = self.rng.lock(|rng| registration_nonce(&mut *rng.borrow_mut()));
        let request = RegistrationRequest::new(&self.identity, &nonce);
        let ca_cert = self.options(|o| o.ca_cert.clone());
        let outcome = match self
            .registrar
            .post_form(&request.url, &request.body, ca_cert.as_deref())
            .await
        {
            Ok(body) => parse_registration_reply(&body),
            Err(err) => Err(err),
        };
        self.post(SessionEvent::Registered(outcome.as_ref().map(|_| ()).map_err(|err| err.clone())))
            .await;
        let secret = outcome?;
        log::info!("device {} registered", self.identity.device_name);
        self.device_secret
            .lock(|cached| *cached.borrow_mut() = secret.clone());
        Ok(secret)
    }

    fn connect_params(&self, device_secret: &str) -> ConnectParams {
        self.options(|o| {
            let timestamp = o
                .unix_time_ms
                .map(|clock| clock())
                .unwrap_or_else(|| Instant::now().as_millis());
            let credentials = MqttCredentials::sign(&self.identity, device_secret, o.tls, timestamp);
            ConnectParams {
                host: self.identity.broker_host(),
                port: o.port,
                client_id: credentials.client_id,
                username: credentials.username,
                password: credentials.password,
                keep_alive_secs: o.keep_alive_secs,
                clean_session: o.clean_session,
                version: o.version,
                ca_cert: if o.tls { o.ca_cert.clone() } else { None },
                max_in_flight: o.max_in_flight,
                max_queued: o.max_queued,
            }
        })
    }

    async fn on_session_established(&self, session_present: bool) {
        self.backoff.lock(|backoff| backoff.borrow_mut().reset());
        if self
            .state
            .transition(&[SessionState::Connecting], SessionState::Connected)
            .is_ok()
        {
            log::info!("connected");
            if let Err(err) = self.subscribe_system_topics() {
                log::warn!("system subscription failed: {}", err);
            }
            if let Err(err) = self.upload_interface_info() {
                log::warn!("interface info upload failed: {}", err);
            }
        }
        self.post(SessionEvent::Connect {
            session_present,
            result: ConnectResult::Accepted,
        })
        .await;
    }

    async fn on_connect_failed(&self, result: ConnectResult) {
        log::warn!("connect attempt failed: {:?}", result);
        let _ = self
            .state
            .transition(&[SessionState::Connecting], SessionState::Disconnected);
        self.reset_correlation();
        self.post(SessionEvent::Connect {
            session_present: false,
            result,
        })
        .await;
    }

    async fn on_session_closed(&self, reason: DisconnectReason) {
        log::info!("session closed: {:?}", reason);
        self.reset_correlation();
        let _ = self.state.transition(
            &[SessionState::Connected, SessionState::Disconnecting],
            SessionState::Disconnected,
        );
        self.post(SessionEvent::Disconnect(reason)).await;
    }

    /// Polls the link until the session ends, sweeping timed-out requests.
    async fn pump(&self) -> DisconnectReason {
        let (poll_interval, request_timeout) = self.options(|o| (o.poll_interval, o.request_timeout));
        let mut last_sweep = Instant::now();
        loop {
            if self.control.stop_requested() {
                self.link.disconnect().await;
                return DisconnectReason::Requested;
            }
            match select(
                self.control.stop.wait(),
                with_timeout(poll_interval, self.link.poll()),
            )
            .await
            {
                Either::First(()) => {
                    self.link.disconnect().await;
                    return DisconnectReason::Requested;
                }
                Either::Second(Err(_)) => {}
                Either::Second(Ok(Ok(LinkEvent::Disconnected))) => return DisconnectReason::ConnectionLost,
                Either::Second(Ok(Err(err))) => {
                    log::warn!("link error: {:?}", err);
                    return DisconnectReason::ConnectionLost;
                }
                Either::Second(Ok(Ok(event))) => self.forward(event).await,
            }

            let now = Instant::now();
            if now.saturating_duration_since(last_sweep) >= request_timeout {
                self.sweep(now);
                last_sweep = now;
            }
        }
    }

    /// Turns a raw link event into a dispatch event.
    async fn forward(&self, event: LinkEvent) {
        let event = match event {
            LinkEvent::Message(message) => SessionEvent::Message(message),
            LinkEvent::Published(mid) => SessionEvent::Published(mid),
            LinkEvent::Subscribed { mid, granted } => SessionEvent::Subscribed { mid, granted },
            LinkEvent::Unsubscribed(mid) => SessionEvent::Unsubscribed(mid),
            LinkEvent::Disconnected => return,
        };
        self.post(event).await;
    }

    /// Drops in-flight entries and request ids older than the request timeout.
    pub(crate) fn sweep(&self, now: Instant) {
        let timeout = self.options(|o| o.request_timeout);
        self.inflight.prune(now, timeout);
        self.request_ids
            .lock(|ids| ids.borrow_mut().collect_expired(now, timeout));
    }

    async fn post(&self, event: SessionEvent) {
        if let Err(err) = self.queue.post(self.epoch(), event).await {
            log::error!("dropping session event: {}", err);
        }
    }

    /// Waits out the next backoff delay; `false` if a stop request cut it short.
    async fn wait_backoff(&self) -> bool {
        let step = self.backoff.lock(|backoff| {
            self.rng
                .lock(|rng| backoff.borrow_mut().next_step(&mut *rng.borrow_mut()))
        });
        log::info!("reconnecting in {} ms (base {} s)", step.delay.as_millis(), step.base.as_secs());
        matches!(
            select(self.control.stop.wait(), Timer::after(step.delay)).await,
            Either::Second(())
        )
    }

    fn subscribe_system_topics(&self) -> Result<(), Error> {
        let topics = self.with_thing(|thing| thing.topics.system_subscriptions(thing.model.is_some()));
        let requested: alloc::vec::Vec<(&str, QoS)> = topics.iter().map(|(t, q)| (t.as_str(), *q)).collect();
        let mid = self.link.subscribe(&requested)?;
        self.inflight
            .track(InFlightCategory::SubscribeSys, mid, Instant::now());
        Ok(())
    }

    fn upload_interface_info(&self) -> Result<(), Error> {
        let info = self.interface_info.lock(|info| info.borrow().clone());
        let params = alink::interface_info(&info);
        let topic = self.with_thing(|thing| thing.topics.device_info_update.clone());
        self.publish_request(
            InFlightCategory::DeviceInfoUpdate,
            &topic,
            alink::DEVICE_INFO_UPDATE_METHOD,
            &params,
            QoS::AtMostOnce,
        )
        .map(drop)
    }
}
