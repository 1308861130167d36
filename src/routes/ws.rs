// WebSocket handlers: sample ingestion and the live sample stream

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use super::http::{IngestBody, enqueue};
use crate::models::Sample;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the live connection count on drop (connect = +1, drop = -1).
struct WsLiveGuard(Arc<AtomicUsize>);

impl Drop for WsLiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn send_text(socket: &mut WebSocket, text: String) -> bool {
    matches!(
        timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(text.into()))).await,
        Ok(Ok(()))
    )
}

/// WS /ws/ingest: each text frame is one sample or an array of samples.
pub(super) async fn ws_ingest(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = ingest_stream(socket, state).await {
            tracing::info!("Ingest stream error: {}", e);
        }
    })
}

async fn ingest_stream(mut socket: WebSocket, state: AppState) -> anyhow::Result<()> {
    tracing::info!("Client connected to ingest stream");
    while let Some(msg) = socket.recv().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let body: IngestBody = match serde_json::from_str(text.as_str()) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "malformed ingest frame");
                let reply = serde_json::json!({ "error": format!("malformed sample: {}", e) });
                if !send_text(&mut socket, reply.to_string()).await {
                    break;
                }
                continue;
            }
        };
        if enqueue(&state, body.into_samples(Utc::now())).await.is_err() {
            tracing::warn!("ingest channel closed; dropping ingest connection");
            break;
        }
    }
    tracing::info!("Client disconnected from ingest stream");
    Ok(())
}

/// WS /ws/live: every ingested sample, as JSON, after it has been processed.
pub(super) async fn ws_live(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let tx = state.live_tx.clone();
    let conn_count = state.ws_live_connections.clone();
    let ctx = state.ctx.clone();
    ws.on_upgrade(move |socket| async move {
        let mut rx = tx.subscribe();
        let snapshot = ctx.cache.snapshot().await;
        if let Err(e) = live_stream(socket, &mut rx, conn_count, snapshot.into_values().collect()).await {
            tracing::info!("Live stream error: {}", e);
        }
    })
}

async fn live_stream(
    socket: WebSocket,
    rx: &mut broadcast::Receiver<Sample>,
    conn_count: Arc<AtomicUsize>,
    initial: Vec<Sample>,
) -> anyhow::Result<()> {
    conn_count.fetch_add(1, Ordering::Relaxed);
    let _guard = WsLiveGuard(conn_count);
    tracing::info!("Client connected to live stream");
    let (mut sender, mut receiver) = socket.split();

    let welcome = serde_json::json!({ "type": "snapshot", "samples": initial });
    if !send_live(&mut sender, Message::Text(serde_json::to_string(&welcome)?.into())).await {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(sample) => {
                        let json = serde_json::to_string(&sample)?;
                        if !send_live(&mut sender, Message::Text(json.into())).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/live client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_interval.tick() => {
                if !send_live(&mut sender, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    Ok(())
}

async fn send_live(sender: &mut SplitSink<WebSocket, Message>, msg: Message) -> bool {
    matches!(timeout(WS_SEND_TIMEOUT, sender.send(msg)).await, Ok(Ok(())))
}
