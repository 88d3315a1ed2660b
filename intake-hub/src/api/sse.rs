//! Server-Sent Events change stream
//!
//! Event types on `/api/events`:
//! - `connected`: first frame of every stream
//! - `change`: a committed [`ChangeEvent`]
//! - `resync`: this subscriber fell behind and missed events; the client must
//!   re-fetch its view, exactly as after a dropped connection

use crate::api::identity::AdminIdentity;
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use intake_common::events::ChangeEvent;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

fn change_frame(event: &ChangeEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(data) => Some(Event::default().event("change").data(data)),
        Err(e) => {
            warn!("SSE: Failed to serialize change event: {}", e);
            None
        }
    }
}

/// GET /api/events
///
/// A request carrying an admin identity attaches a presence session that
/// lives exactly as long as the stream.
pub async fn event_stream(
    State(state): State<AppState>,
    admin: Option<AdminIdentity>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.engine.event_bus().subscribe();
    let shutdown = state.shutdown.clone();
    let session = admin.map(|a| state.presence.attach_session(a.id, a.label));
    info!(
        admin_id = ?session.as_ref().map(|s| s.admin_id().to_string()),
        "New SSE client connected to change events"
    );

    let stream = async_stream::stream! {
        // Owned by the stream: dropping the connection detaches presence
        let _session = session;

        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "status": "connected" }).to_string()));

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("SSE: Server shutting down, ending change stream");
                    break;
                }
                received = rx.recv() => received,
            };
            match received {
                Ok(event) => {
                    debug!(submission_id = %event.submission_id, kind = ?event.kind, "SSE: Forwarding change");
                    if let Some(frame) = change_frame(&event) {
                        yield Ok(frame);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "SSE: Subscriber lagged, requesting resync");
                    yield Ok(Event::default()
                        .event("resync")
                        .data(json!({ "missed": missed }).to_string()));
                }
                Err(RecvError::Closed) => {
                    info!("SSE: Event bus closed, ending stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
