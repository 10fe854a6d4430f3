use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hitter_core::QpsPoint;
use hitter_dash::{
    run_transport, CommandSender, ConnectionState, Engine, EngineEvent, HeadlessRenderer, Intent,
    TransportConfig, UiEffect,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

const WAIT: Duration = Duration::from_secs(10);

struct MockService {
    connections: AtomicUsize,
    commands: mpsc::Sender<String>,
}

async fn state_handler(State(service): State<Arc<MockService>>) -> Json<Value> {
    let nodes = if service.connections.load(Ordering::SeqCst) <= 1 {
        json!([{"name": "a"}, {"name": "b"}, {"name": "c"}])
    } else {
        json!([{"name": "a"}, {"name": "b"}])
    };
    Json(json!({
        "qpstarget": "300",
        "numprocs": 2,
        "nodes": nodes,
        "qpsdata": [[1000, 3]],
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(service): State<Arc<MockService>>) -> Response {
    let index = service.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_socket(socket, index, service))
}

async fn serve_socket(mut socket: WebSocket, index: usize, service: Arc<MockService>) {
    if index > 0 {
        let _ = socket
            .send(Message::Text(
                r#"{"type":"LOG","node":"a","value":"back online"}"#.to_string(),
            ))
            .await;
        while let Some(Ok(_)) = socket.recv().await {}
        return;
    }

    let frames = [
        r#"{"type":"QPS","node":"a","value":[2000,5]}"#,
        r#"{"type":"QPS","node":"b","value":[2000,7]}"#,
        r#"{"type":"QPS","node":"c","value":[2000,1]}"#,
        r#"{"type":"RESHARDED","node":"a"}"#,
        "{oops",
        r#"{"type":"GONENODE","node":"zz"}"#,
        r#"{"type":"LOG","node":"a","value":"warming up"}"#,
        r#"{"type":"LOG","node":"a","value":"warming up"}"#,
    ];
    for frame in frames {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Text(text) = msg {
            let _ = service.commands.send(text).await;
            break;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn start_service() -> (Url, mpsc::Receiver<String>) {
    let (commands, command_rx) = mpsc::channel(8);
    let service = Arc::new(MockService {
        connections: AtomicUsize::new(0),
        commands,
    });
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/state/", get(state_handler))
        .with_state(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock service");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let base = Url::parse(&format!("http://{addr}/")).expect("base url");
    (base, command_rx)
}

async fn pump_until<F>(
    engine: &mut Engine<HeadlessRenderer>,
    events: &mut mpsc::Receiver<EngineEvent>,
    mut done: F,
) where
    F: FnMut(&Engine<HeadlessRenderer>) -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !done(engine) {
            let event = events.recv().await.expect("transport running");
            engine.handle(event);
        }
    })
    .await
    .expect("condition reached before timeout");
}

#[tokio::test]
async fn resyncs_after_reconnect_and_dispatches_live_traffic() {
    let (base, mut service_commands) = start_service().await;
    let endpoints = hitter_dash::Endpoints::derive(&base).expect("endpoints");
    let mut config = TransportConfig::new(endpoints.ws, endpoints.state);
    config.reconnect_delay = Duration::from_millis(50);
    config.fetch_timeout = Duration::from_secs(2);

    let (commands, command_rx) = CommandSender::channel();
    let (event_tx, mut events) = mpsc::channel(256);
    tokio::spawn(run_transport(config, event_tx, command_rx));
    let mut engine = Engine::new(HeadlessRenderer::new(), commands);

    pump_until(&mut engine, &mut events, |engine| {
        engine.state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(engine.registry().live_count(), 3);
    assert_eq!(engine.settings().target_qps, 300);

    pump_until(&mut engine, &mut events, |engine| {
        engine
            .registry()
            .get(0)
            .and_then(|node| node.logs.last())
            .map(|entry| entry.repeat)
            == Some(2)
    })
    .await;
    let c = engine.registry().lookup_by_name("c").expect("node c");
    assert_eq!(
        engine.registry().get(c).and_then(|node| node.qps),
        Some(QpsPoint::new(2000, 1))
    );
    assert_eq!(engine.registry().live_count(), 3);

    engine.handle(EngineEvent::Tick);
    assert_eq!(
        engine.dispatcher().series().latest(),
        Some(QpsPoint::new(2000, 13))
    );

    assert_eq!(engine.submit(Intent::ToggleRunning(0)), Ok(1));
    let sent = tokio::time::timeout(WAIT, service_commands.recv())
        .await
        .expect("command reached service");
    assert_eq!(sent.as_deref(), Some("START a"));

    pump_until(&mut engine, &mut events, |engine| {
        engine.epoch() >= 2 && engine.state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(engine.registry().live_count(), 2);
    assert_eq!(engine.registry().lookup_by_name("c"), None);
    assert!(engine.registry().get(2).is_none());
    assert!(engine.renderer().recent().any(|effect| matches!(
        effect,
        UiEffect::Connection {
            state: ConnectionState::Disconnected
        }
    )));

    pump_until(&mut engine, &mut events, |engine| {
        engine.registry().get(0).map(|node| node.unread_logs) == Some(1)
    })
    .await;
    assert_eq!(
        engine
            .registry()
            .get(0)
            .and_then(|node| node.logs.last())
            .map(|entry| entry.line.clone()),
        Some("back online".to_string())
    );
}

#[tokio::test]
async fn unreachable_service_keeps_retrying_without_connecting() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let base = Url::parse(&format!("http://{addr}/")).expect("base url");
    let endpoints = hitter_dash::Endpoints::derive(&base).expect("endpoints");
    let mut config = TransportConfig::new(endpoints.ws, endpoints.state);
    config.reconnect_delay = Duration::from_millis(20);

    let (commands, command_rx) = CommandSender::channel();
    let (event_tx, mut events) = mpsc::channel(64);
    tokio::spawn(run_transport(config, event_tx, command_rx));
    let mut engine = Engine::new(HeadlessRenderer::new(), commands);

    pump_until(&mut engine, &mut events, |engine| engine.epoch() >= 3).await;
    assert_ne!(engine.state(), ConnectionState::Connected);
    assert_eq!(
        engine.submit(Intent::StartAll),
        Err(hitter_dash::CommandError::NotConnected)
    );
}

async fn failing_state_handler(State(fetches): State<Arc<AtomicUsize>>) -> Response {
    if fetches.fetch_add(1, Ordering::SeqCst) == 0 {
        (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
    } else {
        "{oops".into_response()
    }
}

async fn idle_ws_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move { while let Some(Ok(_)) = socket.recv().await {} })
}

#[tokio::test]
async fn failed_state_fetch_after_open_drops_back_to_disconnected() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/ws", get(idle_ws_handler))
        .route("/state/", get(failing_state_handler))
        .with_state(fetches.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock service");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let base = Url::parse(&format!("http://{addr}/")).expect("base url");
    let endpoints = hitter_dash::Endpoints::derive(&base).expect("endpoints");
    let mut config = TransportConfig::new(endpoints.ws, endpoints.state);
    config.reconnect_delay = Duration::from_millis(20);
    config.fetch_timeout = Duration::from_secs(2);

    let (commands, command_rx) = CommandSender::channel();
    let (event_tx, mut events) = mpsc::channel(64);
    tokio::spawn(run_transport(config, event_tx, command_rx));
    let mut engine = Engine::new(HeadlessRenderer::new(), commands);

    let mut seen = Vec::new();
    pump_until(&mut engine, &mut events, |engine| {
        if seen.last() != Some(&engine.state()) {
            seen.push(engine.state());
        }
        engine.epoch() >= 3
    })
    .await;

    assert_eq!(
        seen,
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Syncing,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Syncing,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
        ]
    );
    assert!(fetches.load(Ordering::SeqCst) >= 2);
    assert_eq!(engine.registry().live_count(), 0);
    assert_eq!(
        engine.submit(Intent::StartAll),
        Err(hitter_dash::CommandError::NotConnected)
    );
}
