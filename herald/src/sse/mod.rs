//! Server-Sent Events stream endpoint.
//!
//! `GET /event` subscribes the caller to the broker and streams every event
//! it receives as one `data:` frame, flushed as it arrives. The first frame
//! is always the consumer's own ID with an empty message.
//!
//! ```text
//! data: {"event_id":1882370116272129,"message":"","consumer_id":1882370116272128}
//!
//! data: {"event_id":1882370250489856,"message":"hello","consumer_id":1882370116272128}
//!
//! ```

mod stream;
pub mod wire;

pub use stream::{Listener, ListenerState};
pub use wire::StreamedEvent;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderValue, Version},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
};

use crate::error::{Error, Result};
use crate::state::AppState;

/// Query string accepted by the stream endpoint
#[derive(Debug, Default)]
pub struct StreamParams {
    /// ID the client held on a previous connection; logged only
    pub id: Option<String>,
}

impl StreamParams {
    /// Pick known keys out of decoded query pairs, first value wins.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let id = pairs
            .into_iter()
            .find_map(|(key, value)| (key == "id").then_some(value));
        Self { id }
    }
}

/// Stream broker events to one consumer.
///
/// Connections older than HTTP/1.1 cannot be flushed incrementally and are
/// rejected before subscribing.
pub async fn stream_events(
    State(state): State<AppState>,
    version: Version,
    query: std::result::Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Response> {
    if version < Version::HTTP_11 {
        return Err(Error::StreamingUnsupported(version));
    }

    let params = match query {
        Ok(Query(pairs)) => StreamParams::from_pairs(pairs),
        Err(rejection) => {
            tracing::debug!(%rejection, "unreadable stream query");
            StreamParams::default()
        }
    };

    tracing::info!(previous_id = params.id.as_deref().unwrap_or(""), "stream listener connecting");

    let listener = Listener::open(state.broker(), state.shutdown_token()).await;
    let sse = Sse::new(listener.into_stream());
    let mut response = match state.config().stream.keep_alive_interval() {
        Some(interval) => sse
            .keep_alive(KeepAlive::new().interval(interval))
            .into_response(),
        None => sse.into_response(),
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    if version == Version::HTTP_11 {
        // connection-specific headers are illegal from HTTP/2 on
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    Ok(response)
}
