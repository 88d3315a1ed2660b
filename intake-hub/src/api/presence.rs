//! Presence endpoints

use crate::api::identity::AdminIdentity;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use intake_common::model::PresenceRecord;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub viewing_submission_id: Option<Uuid>,
}

/// POST /api/presence
///
/// Heartbeat: upserts the caller's record and resets its timer.
pub async fn heartbeat(
    State(state): State<AppState>,
    admin: AdminIdentity,
    body: Option<Json<HeartbeatRequest>>,
) -> Json<PresenceRecord> {
    let viewing = body.and_then(|Json(b)| b.viewing_submission_id);
    Json(state.presence.track(admin.id, admin.label, viewing))
}

/// DELETE /api/presence
pub async fn leave(State(state): State<AppState>, admin: AdminIdentity) -> StatusCode {
    state.presence.untrack(&admin.id);
    StatusCode::NO_CONTENT
}

/// GET /api/presence
pub async fn list_online(State(state): State<AppState>) -> Json<Vec<PresenceRecord>> {
    Json(state.presence.list_online())
}

/// GET /api/presence/viewing/:id
pub async fn list_viewing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<Vec<PresenceRecord>> {
    Json(state.presence.list_viewing(id))
}

/// GET /api/presence/events
///
/// One `presence` event with the full online set, then one per change.
pub async fn presence_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New SSE client connected to presence events");
    let shutdown = state.shutdown.clone();
    let stream = WatchStream::new(state.presence.subscribe())
        .take_until(shutdown.cancelled_owned())
        .filter_map(|records| async move {
            match serde_json::to_string(&records) {
                Ok(json) => Some(Ok(Event::default().event("presence").data(json))),
                Err(e) => {
                    warn!("SSE: Failed to serialize presence snapshot: {}", e);
                    None
                }
            }
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub fn presence_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/presence",
            get(list_online).post(heartbeat).delete(leave),
        )
        .route("/api/presence/viewing/:id", get(list_viewing))
        .route("/api/presence/events", get(presence_stream))
}
