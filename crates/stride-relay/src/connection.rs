use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use stride_types::relay::{RelayCommand, RelayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: relay sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<std::sync::RwLock<HashSet<String>>>;

/// Handle a single client WebSocket connection.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let ready = RelayEvent::Ready {
        node_id: dispatcher.node_id(),
        protocols: dispatcher.protocols(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let open = dispatcher.connection_opened();
    info!("connection {} opened ({} active)", conn_id, open);

    // Replies to this connection's own requests (acks, query pages, errors)
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RelayEvent>();

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_clone = dispatcher.clone();

    // Per-connection topic subscriptions (shared between send and recv tasks).
    let subscribed_topics: Subscriptions = Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscribed_topics.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("connection {} lagged by {} messages", conn_id, n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let subscribed = send_subscriptions
                        .read()
                        .map(|subs| subs.contains(&msg.content_topic))
                        .unwrap_or(false);
                    if !subscribed {
                        continue;
                    }

                    if send_event(&mut sender, &RelayEvent::Message(msg)).await.is_err() {
                        break;
                    }
                }
                result = reply_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection {}", missed_heartbeats, conn_id);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_subscriptions = subscribed_topics.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RelayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_clone, conn_id, cmd, &recv_subscriptions, &reply_tx)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let _ = reply_tx.send(RelayEvent::Error {
                            request_id: None,
                            message: format!("bad command: {}", e),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let open = dispatcher.connection_closed();
    info!("connection {} closed ({} active)", conn_id, open);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &RelayEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        warn!("failed to serialize relay event: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn handle_command(
    dispatcher: &Dispatcher,
    conn_id: Uuid,
    cmd: RelayCommand,
    subscriptions: &Subscriptions,
    reply_tx: &mpsc::UnboundedSender<RelayEvent>,
) {
    match cmd {
        RelayCommand::Subscribe { content_topic } => {
            info!("connection {} subscribing to {}", conn_id, content_topic);
            if let Ok(mut subs) = subscriptions.write() {
                subs.insert(content_topic);
            }
        }

        RelayCommand::Unsubscribe { content_topic } => {
            info!("connection {} unsubscribing from {}", conn_id, content_topic);
            if let Ok(mut subs) = subscriptions.write() {
                subs.remove(&content_topic);
            }
        }

        RelayCommand::Publish {
            request_id,
            content_topic,
            payload,
        } => {
            let result = match B64.decode(&payload) {
                Ok(bytes) => {
                    trace!("connection {} publishing {} bytes to {}", conn_id, bytes.len(), content_topic);
                    dispatcher
                        .publish(content_topic, bytes)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(format!("payload is not base64: {}", e)),
            };

            if let Err(e) = &result {
                warn!("connection {} publish {} rejected: {}", conn_id, request_id, e);
            }
            let _ = reply_tx.send(RelayEvent::PublishAck {
                request_id,
                ok: result.is_ok(),
                error: result.err(),
            });
        }

        RelayCommand::Query {
            request_id,
            content_topic,
            page_size,
            cursor,
        } => {
            debug!(
                "connection {} query {} on {} (page_size={}, cursor={:?})",
                conn_id, request_id, content_topic, page_size, cursor
            );
            let event = match dispatcher.query(content_topic, page_size, cursor).await {
                Ok(page) => RelayEvent::QueryPage {
                    request_id,
                    messages: page.messages,
                    next_cursor: page.next_cursor,
                },
                Err(e) => {
                    warn!("connection {} query {} failed: {}", conn_id, request_id, e);
                    RelayEvent::Error {
                        request_id: Some(request_id),
                        message: format!("query failed: {}", e),
                    }
                }
            };
            let _ = reply_tx.send(event);
        }
    }
}
