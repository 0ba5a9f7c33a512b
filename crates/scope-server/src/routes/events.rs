use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /api/events — SSE stream of every core event.
///
/// A `connected` event goes out first. Each core event is named after its
/// `type` tag with the JSON-encoded event as data. A client that falls more
/// than the configured buffer behind is disconnected and should reconnect,
/// then resync through `GET /api/state` and `GET /api/assignations`.
pub async fn sse_events(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let subscription = app.agent.subscribe().await;
    let welcome = serde_json::json!({
        "subscriber": subscription.id(),
        "state_version": app.agent.state().version().await,
    });
    let connected = tokio_stream::once(Ok::<Event, Infallible>(
        Event::default().event("connected").data(welcome.to_string()),
    ));

    let events = subscription.filter_map(|event| {
        match serde_json::to_string(&event) {
            Ok(data) => Some(Ok::<Event, Infallible>(
                Event::default().event(event.kind()).data(data),
            )),
            Err(e) => {
                tracing::warn!(event = event.kind(), error = %e, "dropping unserializable event");
                None
            }
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
