//! Wire format of streamed events.
//!
//! Each event goes out as one SSE `data:` field holding
//! `{"event_id":<u64>,"message":<string>,"consumer_id":<u64>}`. A message
//! that cannot be encoded as a JSON string (it is not valid UTF-8) is sent
//! as the plain-text rendering `<id>: <message>` instead of being dropped.

use axum::response::sse::Event as SseEvent;
use serde::{Deserialize, Serialize, Serializer};

use crate::broker::Event;

/// Owned form of one streamed event, as clients decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamedEvent {
    /// Unique ID of the event
    pub event_id: u64,
    /// Message text
    pub message: String,
    /// Recipient consumer ID
    pub consumer_id: u64,
}

#[derive(Serialize)]
struct WireEvent<'a> {
    event_id: u64,
    #[serde(serialize_with = "utf8_message")]
    message: &'a [u8],
    consumer_id: u64,
}

fn utf8_message<S: Serializer>(message: &&[u8], serializer: S) -> Result<S::Ok, S::Error> {
    let text = std::str::from_utf8(message).map_err(<S::Error as serde::ser::Error>::custom)?;
    serializer.serialize_str(text)
}

/// Encode `event` as the JSON body of a `data:` field.
///
/// # Errors
///
/// Returns an error if the message is not valid UTF-8.
pub fn encode(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(&WireEvent {
        event_id: event.id(),
        message: event.message(),
        consumer_id: event.consumer(),
    })
}

/// Plain-text rendering used when [`encode`] fails.
///
/// Carriage returns become newlines so the SSE field splitter sees only
/// line feeds.
pub fn fallback(event: &Event) -> String {
    event.to_string().replace("\r\n", "\n").replace('\r', "\n")
}

/// Build the SSE frame for `event`, falling back to plain text.
pub fn frame(event: &Event) -> SseEvent {
    match encode(event) {
        Ok(json) => SseEvent::default().data(json),
        Err(error) => {
            tracing::warn!(
                event_id = event.id(),
                %error,
                "event not encodable as JSON, sending plain text"
            );
            SseEvent::default().data(fallback(event))
        }
    }
}
