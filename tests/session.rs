//! Integration tests for the session lifecycle: connect, disconnect,
//! reconnect and destruct.

mod common;

use std::cell::RefCell;

use common::{MockLink, Seen, TSL, config, drive, settle, wait_until};
use embassy_time::Duration;
use myrtio_linkkit::error::ConnectReasonCode;
use myrtio_linkkit::topics::SubscriptionKind;
use myrtio_linkkit::transport::{ConnAck, LinkError, LinkEvent};
use myrtio_linkkit::{ConnectResult, DisconnectReason, Error, MqttOptions, QoS, SessionState, ThingClient};
use serde_json::json;

fn client() -> ThingClient<MockLink> {
    let client = ThingClient::new(config(), MockLink::new()).expect("valid config");
    client.thing_setup(Some(TSL.as_bytes())).expect("valid thing model");
    client
}

// -----------------------------------------------------------------------------
// Connect / disconnect
// -----------------------------------------------------------------------------

#[test]
fn connect_subscribes_system_topics_and_enables_thing() {
    let client = client();
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect().await.expect("connect");
        assert_eq!(client.state(), SessionState::Connected);
        settle().await;
        assert!(client.is_thing_enabled());
        client.destruct().await.expect("destruct");
    });

    let link = client.link();
    let params = &link.connects.borrow()[0].1;
    assert_eq!(params.host, "127.0.0.1");
    assert_eq!(params.username, "dn&pk");
    assert!(params.client_id.starts_with("pk&dn|securemode=3,signmethod=hmacsha1"));

    let subscribed = link.subscribed.borrow();
    assert_eq!(subscribed.len(), 1);
    assert!(subscribed[0].iter().any(|(t, _)| t == common::PROPERTY_SET));
    assert!(subscribed[0].iter().any(|(t, q)| t == common::SHADOW_GET && *q == QoS::AtLeastOnce));
    assert!(subscribed[0].iter().any(|(t, _)| t == common::REBOOT));

    let info = link.published_on("/sys/pk/dn/thing/deviceinfo/update");
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].json()["method"], "thing.deviceinfo.update");

    let seen = seen.borrow();
    assert_eq!(seen[0], Seen::Connect(false, ConnectResult::Accepted));
    assert_eq!(seen[1], Seen::Enable);
}

#[test]
fn disconnect_then_reconnect_starts_with_empty_registries() {
    let client = client();
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect().await.expect("connect");
        settle().await;
        client.post_property(&json!({"temperature": 21})).expect("post");
        client
            .subscribe_topic("/pk/dn/user/cmd", QoS::AtLeastOnce)
            .expect("subscribe");
        settle().await;
        assert_eq!(client.outstanding_requests(), 2);
        assert!(client.is_subscribed(SubscriptionKind::User, "/pk/dn/user/cmd"));

        client.disconnect().await.expect("disconnect");
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.is_correlation_idle());

        client.connect().await.expect("reconnect");
        settle().await;
        assert!(client.user_topics().is_empty());
        // Only the interface info upload of the new session.
        assert_eq!(client.outstanding_requests(), 1);
        client.destruct().await.expect("destruct");
    });

    // One for `disconnect()`, one for `destruct()` of the second session.
    assert_eq!(client.link().disconnects.get(), 2);
    let seen = seen.borrow();
    let disable = seen.iter().position(|s| *s == Seen::Disable).expect("disable");
    assert_eq!(seen[disable + 1], Seen::Disconnect(DisconnectReason::Requested));
    assert_eq!(
        seen.iter()
            .filter(|s| matches!(s, Seen::Connect(_, ConnectResult::Accepted)))
            .count(),
        2
    );
}

#[test]
fn disconnect_is_only_legal_when_connected() {
    let client = client();
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        assert_eq!(client.disconnect().await, Err(Error::State(SessionState::Initialized)));
        client.destruct().await.expect("destruct");
    });
}

#[test]
fn refused_connect_is_reported() {
    let client = client();
    client.link().script_connects([Ok(ConnAck {
        session_present: false,
        code: 5,
    })]);
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        let refused = ConnectResult::Refused(ConnectReasonCode::NotAuthorized);
        assert_eq!(client.connect().await, Err(Error::ConnectionRefused(refused)));
        assert_eq!(client.state(), SessionState::Disconnected);
        settle().await;
        client.destruct().await.expect("destruct");
    });

    assert_eq!(
        seen.borrow()[0],
        Seen::Connect(false, ConnectResult::Refused(ConnectReasonCode::NotAuthorized))
    );
}

// -----------------------------------------------------------------------------
// Reconnect loop
// -----------------------------------------------------------------------------

#[test]
fn async_connect_retries_after_backoff() {
    let client = client();
    client.link().script_connects([Err(LinkError::Io)]);
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect_async().expect("start");
        let reconnected = wait_until(Duration::from_secs(4), || {
            client.state() == SessionState::Connected
        })
        .await;
        assert!(reconnected);
        client.destruct().await.expect("destruct");
    });

    let connects = client.link().connects.borrow();
    assert_eq!(connects.len(), 2);
    // Base delay 1s plus jitter of at most 1s.
    let waited = connects[1].0 - connects[0].0;
    assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
    assert!(waited <= Duration::from_millis(2500), "waited {waited:?}");

    let seen = seen.borrow();
    assert_eq!(seen[0], Seen::Connect(false, ConnectResult::TransportFailure));
    assert_eq!(seen[1], Seen::Connect(false, ConnectResult::Accepted));
}

#[test]
fn dropped_session_disables_thing_and_reconnects() {
    let client = client();
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect_async().expect("start");
        assert!(wait_until(Duration::from_secs(1), || client.is_thing_enabled()).await);

        client.link().inject(LinkEvent::Disconnected);
        assert!(wait_until(Duration::from_secs(1), || !client.is_thing_enabled()).await);
        assert_ne!(client.state(), SessionState::Connected);

        let back = wait_until(Duration::from_secs(4), || client.is_thing_enabled()).await;
        assert!(back);
        client.destruct().await.expect("destruct");
    });

    let seen = seen.borrow();
    let disable = seen.iter().position(|s| *s == Seen::Disable).expect("disable");
    assert_eq!(seen[disable + 1], Seen::Disconnect(DisconnectReason::ConnectionLost));
    assert_eq!(client.link().connects.borrow().len(), 2);
}

#[test]
fn destruct_interrupts_backoff_wait() {
    let client = ThingClient::new(
        config().with_mqtt(
            MqttOptions::new()
                .without_tls()
                .with_reconnect_backoff(60, 60)
                .with_poll_interval(Duration::from_millis(10)),
        ),
        MockLink::new(),
    )
    .expect("valid config");
    client.link().script_connects([Err(LinkError::Io)]);
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect_async().expect("start");
        settle().await;
        assert_eq!(client.state(), SessionState::Disconnected);
        client.destruct().await.expect("destruct");
    });

    assert_eq!(client.link().connects.borrow().len(), 1);
    assert_eq!(client.state(), SessionState::Destructed);
}

// -----------------------------------------------------------------------------
// Destruct
// -----------------------------------------------------------------------------

#[test]
fn destruct_twice_fails() {
    let client = client();
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect().await.expect("connect");
        client.destruct().await.expect("first destruct");
        assert_eq!(client.destruct().await, Err(Error::State(SessionState::Destructed)));
        assert_eq!(client.connect_async(), Err(Error::State(SessionState::Destructed)));
        assert_eq!(
            client.post_property(&json!({"temperature": 1})),
            Err(Error::State(SessionState::Destructed))
        );
    });
    assert!(client.is_correlation_idle());
}

#[test]
fn configuration_is_frozen_after_connect() {
    let client = client();
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect().await.expect("connect");
        assert_eq!(
            client.config_mqtt(MqttOptions::new()),
            Err(Error::State(SessionState::Connected))
        );
        assert_eq!(
            client.config_device_info("extra"),
            Err(Error::State(SessionState::Connected))
        );
        client.destruct().await.expect("destruct");
    });
}

#[test]
fn backoff_doubles_across_failures_and_restarts_after_success() {
    let client = client();
    client
        .link()
        .script_connects([Err(LinkError::Io), Err(LinkError::Io), Err(LinkError::Io)]);
    let seen = RefCell::new(Vec::new());

    drive(&client, &seen, async {
        client.connect_async().expect("start");
        assert!(wait_until(Duration::from_secs(20), || client.is_thing_enabled()).await);

        client.link().inject(LinkEvent::Disconnected);
        let back = wait_until(Duration::from_secs(5), || {
            client.link().connects.borrow().len() == 5 && client.is_thing_enabled()
        })
        .await;
        assert!(back);
        client.destruct().await.expect("destruct");
    });

    let connects = client.link().connects.borrow();
    let gaps: Vec<Duration> = connects.windows(2).map(|pair| pair[1].0 - pair[0].0).collect();
    assert_eq!(gaps.len(), 4);
    // Base delays 1, 2, 4 s, then 1 s again once a session has succeeded.
    for (gap, base) in gaps.iter().zip([1u64, 2, 4, 1]) {
        assert!(*gap >= Duration::from_secs(base), "gap {gap:?} below base {base}s");
        assert!(
            *gap <= Duration::from_millis(base * 2000 + 500),
            "gap {gap:?} above base {base}s plus jitter"
        );
    }
}

// -----------------------------------------------------------------------------
// Events of a closed session
// -----------------------------------------------------------------------------

#[test]
fn events_queued_by_a_dropped_session_leave_registries_empty() {
    let client = client();
    let seen = RefCell::new(Vec::new());
    let rrpc_topic = "/ext/rrpc/77/sys/pk/dn/thing/service/reboot";

    drive(&client, &seen, async {
        client.connect().await.expect("connect");
        settle().await;

        let link = client.link();
        link.inject_message(common::PROPERTY_SET, r#"{"id":"31","params":{"switch":1}}"#);
        link.inject_message(rrpc_topic, r#"{"id":"88","params":{}}"#);
        link.inject(LinkEvent::Disconnected);
        settle().await;
        assert_eq!(client.state(), SessionState::Disconnected);
        assert!(client.is_correlation_idle());
        assert!(!client.is_thing_enabled());

        client.connect().await.expect("reconnect");
        settle().await;
        client
            .answer_service("reboot", "88", 200, &json!({}))
            .expect("answer");
        client.destruct().await.expect("destruct");
    });

    // The RRPC correlation did not survive into the new session.
    let link = client.link();
    assert!(link.published_on(rrpc_topic).is_empty());
    assert_eq!(link.published_on("/sys/pk/dn/thing/service/reboot_reply").len(), 1);
}
