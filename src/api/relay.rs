//! Live relay stream (server-sent events).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;

use super::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /api/relay - The first event (`connected`) carries the session id to
/// pass as `browerConnectionId`; job progress follows on the same stream.
pub async fn stream(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut session = state.relay.connect();

    let events = stream! {
        while let Some(message) = session.recv().await {
            // SSE data lines cannot carry bare carriage returns.
            let payload = message.payload().replace('\r', "");
            yield Ok(Event::default().event(message.event_name()).data(payload));
        }
    };

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keep-alive"))
}
