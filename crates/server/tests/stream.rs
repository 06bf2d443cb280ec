//! Integration tests for the `/ws` progress stream over a real socket.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use autofollow_core::testing::{Script, ScriptedPage};
use autofollow_core::{ProgressMessage, TerminalReason};
use autofollow_server::{create_app, AppState};
use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use common::{app_state, qualifying, stalling_script};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

/// Next text frame, decoded. Panics after two seconds of silence.
async fn next_message(client: &mut Client) -> ProgressMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no message within 2s")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn connect_receives_status_snapshot() {
    let (state, _) = app_state(Script::default(), Duration::from_secs(30));
    let addr = serve(state).await;

    let mut client = connect(addr).await;
    assert_eq!(
        next_message(&mut client).await,
        ProgressMessage::Status {
            is_running: false,
            target_count: 0,
            current_count: 0,
        }
    );
}

#[tokio::test]
async fn silent_client_gets_keepalive() {
    let (state, _) = app_state(Script::default(), Duration::from_millis(50));
    let addr = serve(state).await;

    let mut client = connect(addr).await;
    assert!(matches!(next_message(&mut client).await, ProgressMessage::Status { .. }));
    assert_eq!(next_message(&mut client).await, ProgressMessage::Keepalive);
    assert_eq!(next_message(&mut client).await, ProgressMessage::Keepalive);
}

#[tokio::test]
async fn chatty_client_gets_no_keepalive() {
    let (state, _) = app_state(Script::default(), Duration::from_millis(100));
    let addr = serve(state).await;

    let mut client = connect(addr).await;
    assert!(matches!(next_message(&mut client).await, ProgressMessage::Status { .. }));

    // 300ms of traffic, never more than 20ms apart.
    for _ in 0..15 {
        client.send(Message::Text("hello".into())).await.unwrap();
        if let Ok(frame) = tokio::time::timeout(Duration::from_millis(20), client.next()).await {
            panic!("unexpected frame while client was active: {frame:?}");
        }
    }

    // Silence again: the timer still fires.
    assert_eq!(next_message(&mut client).await, ProgressMessage::Keepalive);
}

#[tokio::test]
async fn keepalive_frame_uses_ping_tag() {
    let (state, _) = app_state(Script::default(), Duration::from_millis(50));
    let addr = serve(state).await;

    let mut client = connect(addr).await;
    next_message(&mut client).await;
    let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(json, serde_json::json!({ "type": "ping" }));
}

#[tokio::test]
async fn completed_job_streams_updates_then_terminal() {
    let script = Script {
        pages: vec![ScriptedPage {
            items: vec![qualifying("/a"), qualifying("/b"), qualifying("/c")],
            has_next: false,
            list_failures: 0,
        }],
        ..Script::default()
    };
    let (state, _) = app_state(script, Duration::from_secs(30));
    let addr = serve(Arc::clone(&state)).await;

    let mut client = connect(addr).await;
    assert!(matches!(next_message(&mut client).await, ProgressMessage::Status { .. }));

    state.jobs.start(2).await.unwrap();

    let mut counts = Vec::new();
    let terminal = loop {
        match next_message(&mut client).await {
            ProgressMessage::Update {
                is_running,
                current_count,
                target_count,
                ..
            } => {
                assert!(is_running);
                assert_eq!(target_count, 2);
                counts.push(current_count);
            }
            msg @ ProgressMessage::Terminal { .. } => break msg,
            other => panic!("unexpected {other:?}"),
        }
    };
    assert_eq!(counts, vec![1, 2]);

    let ProgressMessage::Terminal {
        reason,
        is_running,
        current_count,
        target_count,
        summary,
        ..
    } = terminal
    else {
        unreachable!()
    };
    assert_eq!(reason, TerminalReason::Completed);
    assert!(!is_running);
    assert_eq!((current_count, target_count), (2, 2));
    assert!(!summary.is_empty());
}

#[tokio::test]
async fn stopped_job_streams_final_update() {
    let (state, factory) = app_state(stalling_script(), Duration::from_secs(30));
    let addr = serve(Arc::clone(&state)).await;

    let mut client = connect(addr).await;
    next_message(&mut client).await;

    state.jobs.start(5).await.unwrap();
    factory.journal().stalled().await;
    assert_eq!(next_message(&mut client).await.current_count(), Some(1));

    state.jobs.stop().await.unwrap();
    match next_message(&mut client).await {
        ProgressMessage::Update {
            is_running,
            current_count,
            target_count,
            ..
        } => {
            assert!(!is_running);
            assert_eq!((current_count, target_count), (1, 5));
        }
        other => panic!("expected final update, got {other:?}"),
    }
}

#[tokio::test]
async fn late_subscriber_sees_running_snapshot() {
    let (state, factory) = app_state(stalling_script(), Duration::from_secs(30));
    let addr = serve(Arc::clone(&state)).await;

    state.jobs.start(5).await.unwrap();
    factory.journal().stalled().await;

    let mut client = connect(addr).await;
    assert_eq!(
        next_message(&mut client).await,
        ProgressMessage::Status {
            is_running: true,
            target_count: 5,
            current_count: 1,
        }
    );
    state.jobs.stop().await.unwrap();
}

#[tokio::test]
async fn closing_the_socket_unsubscribes() {
    let (state, _) = app_state(Script::default(), Duration::from_secs(30));
    let addr = serve(Arc::clone(&state)).await;

    let mut client = connect(addr).await;
    next_message(&mut client).await;
    assert_eq!(state.hub.subscriber_count(), 1);

    client.send(Message::Close(None)).await.unwrap();
    drop(client);

    for _ in 0..100 {
        if state.hub.subscriber_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber was not removed");
}
