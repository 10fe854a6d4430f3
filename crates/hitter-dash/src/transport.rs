use crate::command::CommandBatch;
use crate::connection::EngineEvent;
use futures_util::{SinkExt, StreamExt};
use hitter_core::FullState;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ws_url: Url,
    pub state_url: Url,
    pub reconnect_delay: Duration,
    pub fetch_timeout: Duration,
}

impl TransportConfig {
    pub fn new(ws_url: Url, state_url: Url) -> Self {
        Self {
            ws_url,
            state_url,
            reconnect_delay: RECONNECT_DELAY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),
    #[error("websocket connect failed: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("websocket error: {0}")]
    Socket(#[source] tungstenite::Error),
    #[error("state fetch failed: {0}")]
    Fetch(#[source] reqwest::Error),
    #[error("state body undecodable: {0}")]
    StateDecode(#[from] serde_json::Error),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("engine stopped listening")]
    EngineGone,
}

/// Keeps one websocket session alive at a time, forever.
///
/// Every attempt gets a fresh epoch. After the socket opens the full state is fetched
/// before any live frame is read, so the engine never sees traffic for a fleet it has
/// not loaded. Any failure, a failed fetch included, ends the session and the next
/// attempt starts after `reconnect_delay`. Returns once the engine side hangs up.
pub async fn run_transport(
    config: TransportConfig,
    tx: mpsc::Sender<EngineEvent>,
    mut command_rx: mpsc::Receiver<CommandBatch>,
) -> Result<(), TransportError> {
    let client = reqwest::Client::builder()
        .timeout(config.fetch_timeout)
        .build()
        .map_err(TransportError::Client)?;
    let mut epoch = 0u64;

    loop {
        epoch += 1;
        let mut stale = 0usize;
        while command_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(event = "command_drop_stale", epoch, count = stale);
        }

        if tx.send(EngineEvent::Connecting { epoch }).await.is_err() {
            return Ok(());
        }
        let reason = match run_session(&config, &client, epoch, &tx, &mut command_rx).await {
            Err(TransportError::EngineGone) => return Ok(()),
            Err(err) => err.to_string(),
            Ok(()) => "session ended".to_string(),
        };
        warn!(event = "transport_closed", epoch, reason = %reason);
        if tx.send(EngineEvent::Closed { epoch, reason }).await.is_err() {
            return Ok(());
        }
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_session(
    config: &TransportConfig,
    client: &reqwest::Client,
    epoch: u64,
    tx: &mpsc::Sender<EngineEvent>,
    command_rx: &mut mpsc::Receiver<CommandBatch>,
) -> Result<(), TransportError> {
    let (ws, _) = connect_async(config.ws_url.as_str())
        .await
        .map_err(TransportError::Connect)?;
    info!(event = "transport_open", epoch, url = %config.ws_url);
    let (mut sink, mut stream) = ws.split();
    emit(tx, EngineEvent::Opened { epoch }).await?;

    let state = fetch_state(client, &config.state_url).await?;
    debug!(event = "state_fetched", epoch, nodes = state.nodes.len());
    emit(tx, EngineEvent::Synced { epoch, state }).await?;

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        emit(tx, EngineEvent::Message { epoch, text }).await?;
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => emit(tx, EngineEvent::Message { epoch, text }).await?,
                        Err(_) => warn!(event = "inbound_malformed", epoch, reason = "binary frame is not utf-8"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Err(TransportError::PeerClosed),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(TransportError::Socket(err)),
                }
            }
            batch = command_rx.recv() => {
                let Some(batch) = batch else {
                    return Err(TransportError::EngineGone);
                };
                for command in &batch {
                    debug!(event = "command_send", epoch, verb = command.verb());
                    sink.feed(Message::Text(command.encode()))
                        .await
                        .map_err(TransportError::Socket)?;
                }
                sink.flush().await.map_err(TransportError::Socket)?;
            }
        }
    }
}

/// One-shot request for the authoritative fleet state.
pub async fn fetch_state(client: &reqwest::Client, url: &Url) -> Result<FullState, TransportError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(TransportError::Fetch)?;
    let body = response.text().await.map_err(TransportError::Fetch)?;
    Ok(serde_json::from_str(&body)?)
}

async fn emit(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) -> Result<(), TransportError> {
    tx.send(event).await.map_err(|_| TransportError::EngineGone)
}
