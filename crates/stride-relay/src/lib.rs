//! Stride relay node: the pub/sub network chat clients connect to.
//!
//! Offers store (history pages), filter (live topic subscriptions) and
//! light-push (publish with ack) over a single WebSocket at `/relay`.
//! There is no access control on topics.

pub mod connection;
pub mod dispatcher;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::dispatcher::Dispatcher;

/// Routes served by a relay node.
pub fn app(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/relay", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(dispatcher)
}

async fn ws_upgrade(State(dispatcher): State<Dispatcher>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}

async fn health() -> &'static str {
    "ok"
}
