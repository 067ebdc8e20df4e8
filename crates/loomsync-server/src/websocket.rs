//! Push-based complement to `stream()`'s pull-based paging: a client opens
//! `/ws/stream/:collection`, sends its starting checkpoint once, and the
//! server polls the event log and pushes any new page as soon as one is
//! non-empty, echoing the acknowledgment pattern in `server/src/crdt/
//! websocket.rs` (store, then push back to the same connection) without the
//! binary `[msg_type: u8][payload]` framing that repo uses for richer CRDT
//! message types — loomsync's wire messages are uniformly JSON
//! [`StreamResponse`] pages.

use crate::app::App;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use loomsync_types::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// How often to re-poll the event log while the client has no pending page.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const STREAM_PAGE_LIMIT: usize = 500;

pub async fn handle_upgrade(
	State(app): State<Arc<App>>,
	Path(collection): Path<String>,
	ws: WebSocketUpgrade,
) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_socket(app, collection, socket))
}

async fn handle_socket(app: Arc<App>, collection: String, mut socket: WebSocket) {
	let mut checkpoint = match initial_checkpoint(&mut socket).await {
		Some(checkpoint) => checkpoint,
		None => return,
	};

	loop {
		tokio::select! {
			page = poll_until_nonempty(&app, &collection, checkpoint) => {
				match page {
					Ok(response) => {
						checkpoint = response.checkpoint;
						let Ok(payload) = serde_json::to_string(&response) else {
							tracing::warn!(collection, "failed to serialize stream page");
							continue;
						};
						if socket.send(Message::Text(payload.into())).await.is_err() {
							return;
						}
					}
					Err(err) => {
						tracing::warn!(collection, error = %err, "stream poll failed, closing socket");
						return;
					}
				}
			}
			incoming = socket.recv() => {
				match incoming {
					Some(Ok(Message::Close(_))) | None => return,
					Some(Ok(_)) => {}
					Some(Err(_)) => return,
				}
			}
		}
	}
}

async fn initial_checkpoint(socket: &mut WebSocket) -> Option<Checkpoint> {
	match socket.recv().await {
		Some(Ok(Message::Text(text))) => serde_json::from_str::<Checkpoint>(&text).ok(),
		Some(Ok(Message::Binary(bytes))) => serde_json::from_slice::<Checkpoint>(&bytes).ok(),
		_ => Some(Checkpoint::zero()),
	}
}

/// Poll `stream()` until it returns a non-empty page, then return it.
/// Bounded only by the caller's `tokio::select!` arm — the client's
/// `recv()` cancels this future if the socket closes mid-poll.
async fn poll_until_nonempty(
	app: &Arc<App>,
	collection: &str,
	checkpoint: Checkpoint,
) -> crate::error::LsResult<StreamResponse> {
	loop {
		let response = app.stream(collection, checkpoint, STREAM_PAGE_LIMIT).await?;
		if !response.changes.is_empty() {
			return Ok(response);
		}
		tokio::time::sleep(POLL_INTERVAL).await;
	}
}

// vim: ts=4
