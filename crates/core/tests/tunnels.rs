//! Tunnel behavior over the fake host channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kb::channel::fake::{FakeChannelBuilder, FakeChannelController, SentFrame};
use kb::{Bridge, SocketState};
use kb_protocol::{HttpRequest, HttpResponse, Payload, SocketEvent, SocketOpen};

fn spawn_bridge() -> (Arc<Bridge>, FakeChannelController) {
    let (parts, controller) = FakeChannelBuilder::new().build();
    let bridge = Arc::new(Bridge::new(parts));
    let runner = Arc::clone(&bridge);
    tokio::spawn(async move { runner.run().await });
    (bridge, controller)
}

fn open_request(runtime_id: &str) -> SocketOpen {
    SocketOpen {
        url: format!("wss://runtimes.example/{runtime_id}/api/kernels/k1/channels"),
        protocol: Some("v1.kernel.websocket".to_string()),
        headers: HashMap::new(),
        runtime_id: runtime_id.to_string(),
    }
}

async fn settle() {
    // Give the dispatch loop time to route injected events.
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn http_requests_to_sealed_runtimes_short_circuit() {
    let (bridge, controller) = spawn_bridge();
    bridge.fence().seal("r1");

    let tunnel = bridge.http_tunnel();
    let response = tunnel
        .send(HttpRequest {
            url: "https://runtimes.example/r1/api/sessions".into(),
            method: "GET".into(),
            headers: HashMap::new(),
            body: None,
        })
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    match response.body {
        Some(Payload::Json { value }) => assert_eq!(value, serde_json::json!([])),
        other => panic!("expected empty result set, got {other:?}"),
    }
    // The request never crossed the channel.
    assert!(controller.take_sent().is_empty());
}

#[tokio::test]
async fn http_requests_to_live_runtimes_cross_the_channel() {
    let (bridge, controller) = spawn_bridge();
    controller.push_http_response(HttpResponse {
        status: 418,
        status_text: "I'm a teapot".into(),
        headers: HashMap::new(),
        body: Some(Payload::from_text("short and stout")),
    });

    let response = bridge
        .http_tunnel()
        .send(HttpRequest {
            url: "https://runtimes.example/r2/api/sessions".into(),
            method: "GET".into(),
            headers: HashMap::new(),
            body: None,
        })
        .await
        .unwrap();

    assert_eq!(response.status, 418);
    let sent = controller.take_sent();
    assert_eq!(sent.len(), 1);
    match &sent[0] {
        SentFrame::Http(request) => assert_eq!(request.method, "GET"),
        other => panic!("expected http frame, got {other:?}"),
    }
}

#[tokio::test]
async fn open_against_a_sealed_runtime_is_blocked_without_a_channel_request() {
    let (bridge, controller) = spawn_bridge();
    bridge.fence().seal("r1");

    let err = bridge.open_socket(open_request("r1")).await.unwrap_err();
    assert!(err.is_connection_blocked());
    assert!(controller.take_sent().is_empty());
}

#[tokio::test]
async fn socket_walks_the_state_machine() {
    let (bridge, controller) = spawn_bridge();

    let mut tunnel = bridge.open_socket(open_request("r1")).await.unwrap();
    let mut events = tunnel.take_events().unwrap();
    assert!(tunnel.take_events().is_none());
    assert_eq!(tunnel.state(), SocketState::Connecting);

    controller.inject_open(tunnel.id());
    settle().await;
    assert_eq!(tunnel.state(), SocketState::Open);
    assert!(matches!(
        events.recv().await.unwrap(),
        SocketEvent::Open { .. }
    ));

    tunnel.send_text("hello").await.unwrap();

    controller.inject_close(tunnel.id(), Some(1000), Some("normal"));
    settle().await;
    assert_eq!(tunnel.state(), SocketState::Closed);
    match events.recv().await.unwrap() {
        SocketEvent::Close { code, reason, .. } => {
            assert_eq!(code, Some(1000));
            assert_eq!(reason.as_deref(), Some("normal"));
        }
        other => panic!("expected close, got {other:?}"),
    }
    assert!(bridge.registry().is_empty());
}

#[tokio::test]
async fn a_second_dispatch_loop_returns_immediately() {
    let (bridge, controller) = spawn_bridge();
    settle().await;

    // The spawned loop already owns the event stream; this call must not
    // panic and must not steal it.
    bridge.run().await;

    let tunnel = bridge.open_socket(open_request("r1")).await.unwrap();
    controller.inject_open(tunnel.id());
    settle().await;
    assert_eq!(tunnel.state(), SocketState::Open);
}

#[tokio::test]
async fn send_outside_open_is_rejected() {
    let (bridge, _controller) = spawn_bridge();
    let tunnel = bridge.open_socket(open_request("r1")).await.unwrap();

    // Still connecting: no open event has arrived.
    let err = tunnel.send_text("too early").await.unwrap_err();
    assert!(err.is_not_open());
}

#[tokio::test]
async fn binary_payloads_round_trip_byte_identical() {
    let (bridge, controller) = spawn_bridge();
    let mut tunnel = bridge.open_socket(open_request("r1")).await.unwrap();
    let mut events = tunnel.take_events().unwrap();

    controller.inject_open(tunnel.id());
    settle().await;

    let heartbeat: Vec<u8> = vec![0x00, 0xff, 0x80, 0x01, 0x7f];
    tunnel.send_bytes(&heartbeat).await.unwrap();

    // Outbound: explicit tagged byte form on the channel.
    let sent = controller.take_sent();
    let echoed = match sent.last().unwrap() {
        SentFrame::Send(frame) => {
            assert!(matches!(frame.data, Payload::Bytes { .. }));
            assert_eq!(frame.data.to_bytes().unwrap(), heartbeat);
            frame.data.clone()
        }
        other => panic!("expected send frame, got {other:?}"),
    };

    // Echo it back through the inbound path.
    controller.inject_message(tunnel.id(), echoed);
    settle().await;
    events.recv().await.unwrap(); // open
    match events.recv().await.unwrap() {
        SocketEvent::Message { data, .. } => {
            assert!(matches!(data, Payload::Bytes { .. }));
            assert_eq!(data.to_bytes().unwrap(), heartbeat);
        }
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn byte_wrapped_json_control_frames_arrive_as_text() {
    let (bridge, controller) = spawn_bridge();
    let mut tunnel = bridge.open_socket(open_request("r1")).await.unwrap();
    let mut events = tunnel.take_events().unwrap();

    controller.inject_open(tunnel.id());
    let control = br#"{"header": {"msg_type": "kernel_info_reply"}}"#;
    controller.inject_message(tunnel.id(), Payload::from_bytes(control));
    settle().await;

    events.recv().await.unwrap(); // open
    match events.recv().await.unwrap() {
        SocketEvent::Message { data, .. } => match data {
            Payload::Text { text } => assert!(text.contains("kernel_info_reply")),
            other => panic!("expected text after classification, got {other:?}"),
        },
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn structured_sends_use_canonical_text() {
    let (bridge, controller) = spawn_bridge();
    let tunnel = bridge.open_socket(open_request("r1")).await.unwrap();

    controller.inject_open(tunnel.id());
    settle().await;

    tunnel
        .send_json(&serde_json::json!({"header": {"msg_type": "execute_request"}}))
        .await
        .unwrap();

    let sent = controller.take_sent();
    match sent.last().unwrap() {
        SentFrame::Send(frame) => match &frame.data {
            Payload::Text { text } => {
                assert_eq!(text, r#"{"header":{"msg_type":"execute_request"}}"#);
            }
            other => panic!("expected canonical text, got {other:?}"),
        },
        other => panic!("expected send frame, got {other:?}"),
    }
}

#[tokio::test]
async fn close_is_idempotent_and_releases_the_listener() {
    let (bridge, controller) = spawn_bridge();
    let tunnel = bridge.open_socket(open_request("r1")).await.unwrap();

    controller.inject_open(tunnel.id());
    settle().await;

    tunnel.close(Some(1000), Some("done")).await.unwrap();
    assert_eq!(tunnel.state(), SocketState::Closed);
    assert!(bridge.registry().is_empty());

    // Second close: no-op, no second channel-level close.
    tunnel.close(Some(1000), Some("done")).await.unwrap();
    let closes = controller
        .take_sent()
        .into_iter()
        .filter(|frame| matches!(frame, SentFrame::Close(_)))
        .count();
    assert_eq!(closes, 1);

    // A sluggish remote close ack cannot leak a listener.
    controller.inject_close(tunnel.id(), Some(1000), None);
    settle().await;
    assert!(bridge.registry().is_empty());
}

#[tokio::test]
async fn error_events_do_not_change_state() {
    let (bridge, controller) = spawn_bridge();
    let mut tunnel = bridge.open_socket(open_request("r1")).await.unwrap();
    let mut events = tunnel.take_events().unwrap();

    controller.inject_open(tunnel.id());
    controller.inject_error(tunnel.id(), "upstream reset");
    settle().await;

    assert_eq!(tunnel.state(), SocketState::Open);
    events.recv().await.unwrap(); // open
    match events.recv().await.unwrap() {
        SocketEvent::Error { message, .. } => assert_eq!(message, "upstream reset"),
        other => panic!("expected error, got {other:?}"),
    }

    // The subsequent close still arrives and terminates the machine.
    controller.inject_close(tunnel.id(), Some(1006), None);
    settle().await;
    assert_eq!(tunnel.state(), SocketState::Closed);
}

#[tokio::test]
async fn per_connection_event_order_is_preserved() {
    let (bridge, controller) = spawn_bridge();
    let mut tunnel = bridge.open_socket(open_request("r1")).await.unwrap();
    let mut events = tunnel.take_events().unwrap();

    controller.inject_open(tunnel.id());
    for n in 0..8 {
        controller.inject_message(tunnel.id(), Payload::from_text(format!("m{n}")));
    }
    settle().await;

    events.recv().await.unwrap(); // open
    for n in 0..8 {
        match events.recv().await.unwrap() {
            SocketEvent::Message { data, .. } => {
                assert_eq!(data.as_text().unwrap(), format!("m{n}"));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }
}
