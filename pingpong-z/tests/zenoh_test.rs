use std::time::{Duration, Instant, SystemTime};

use pingpong_z::{
    Builder, SetupError,
    context::{ZContext, ZContextBuilder},
    msg::{Header, Message, Time},
    pingpong::PingPongBuilder,
    qos::QosProfile,
};
use serde_json::json;

fn isolated_context() -> ZContextBuilder {
    ZContextBuilder::default()
        .with_domain_id(42)
        .with_mode("peer")
        .disable_multicast_scouting()
        .with_json("connect/endpoints", json!([]))
}

#[test]
fn test_zenoh_same_session_round_trip() {
    let ctx = isolated_context().build().expect("Failed to create context");
    let node = ctx.create_node("zenoh_node").build().expect("Failed to create node");

    let subscriber = node
        .create_sub::<Message>("/microROS/pub")
        .with_qos(QosProfile::reliable())
        .build()
        .expect("Failed to create subscriber");
    let publisher = node
        .create_pub::<Message>("/microROS/pub")
        .build()
        .expect("Failed to create publisher");

    let sent = Message::new(3, 1804289383, Time::from(SystemTime::now()));
    publisher.publish(&sent).expect("Failed to publish");

    let deadline = Instant::now() + Duration::from_secs(2);
    let received = loop {
        if let Some(result) = subscriber.try_recv() {
            break result.expect("Failed to decode");
        }
        assert!(Instant::now() < deadline, "no message within 2s");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(received, sent);

    ctx.shutdown().expect("Failed to close session");
}

#[test]
fn test_zenoh_node_filters_own_echo() {
    let ctx = isolated_context().build().expect("Failed to create context");
    let node = ctx.create_node("echo_node").build().expect("Failed to create node");
    let mut pp = PingPongBuilder::new(&node)
        .with_sub_channel("/microROS/pub")
        .with_period(Duration::from_secs(60))
        .build()
        .expect("Failed to build ping/pong node");

    pp.app_mut()
        .publish_tick(SystemTime::now())
        .expect("Failed to publish");

    let deadline = Instant::now() + Duration::from_secs(2);
    while pp.app().stats().echoes == 0 && Instant::now() < deadline {
        pp.spin_once(Duration::from_millis(50)).unwrap();
    }
    assert_eq!(pp.app().stats().echoes, 1);
    assert_eq!(pp.app().stats().forwarded, 0);

    ctx.shutdown().expect("Failed to close session");
}

#[test]
fn test_duplicate_endpoints_are_rejected_on_every_transport() {
    let zenoh_ctx = isolated_context().build().expect("Failed to create context");
    for ctx in [ZContext::loopback(42), zenoh_ctx] {
        let node = ctx.create_node("dup_node").build().expect("Failed to create node");

        let first_sub = node
            .create_sub::<Header>("/dup")
            .build()
            .expect("Failed to create subscriber");
        assert!(matches!(
            node.create_sub::<Header>("/dup").build(),
            Err(SetupError::Endpoint { kind: "subscriber", .. })
        ));

        let first_pub = node
            .create_pub::<Header>("/dup")
            .build()
            .expect("Failed to create publisher");
        assert!(matches!(
            node.create_pub::<Header>("/dup")
                .with_qos(QosProfile::best_effort())
                .build(),
            Err(SetupError::Endpoint { kind: "publisher", .. })
        ));

        // The first pair is untouched by the rejected declarations
        let sent = Header {
            stamp: Time { sec: 1, nanosec: 2 },
            frame_id: "dup".to_string(),
        };
        first_pub.publish(&sent).expect("Failed to publish");
        let deadline = Instant::now() + Duration::from_secs(2);
        let received = loop {
            if let Some(result) = first_sub.try_recv() {
                break result.expect("Failed to decode");
            }
            assert!(Instant::now() < deadline, "no message within 2s");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(received, sent);

        ctx.shutdown().expect("Failed to close session");
    }
}
