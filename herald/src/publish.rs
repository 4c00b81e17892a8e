//! Publish endpoint.
//!
//! `POST /push` takes an `application/x-www-form-urlencoded` body:
//!
//! | field         | required | meaning                                   |
//! |---------------|----------|-------------------------------------------|
//! | `message`     | yes      | text to deliver, must not be empty        |
//! | `consumer_id` | no       | target consumer; absent or unparseable = broadcast |
//!
//! Repeated fields are allowed; the first value of each wins. The response
//! is sent once the broker has handed the event to every matching
//! subscriber.

use axum::{
    extract::{rejection::FormRejection, State},
    http::StatusCode,
    Form,
};

use crate::broker::BROADCAST;
use crate::error::{Error, Result};
use crate::state::AppState;

/// Form fields of a publish request
#[derive(Debug, Default)]
pub struct PublishForm {
    /// Message text
    pub message: String,

    /// Raw consumer ID, parsed leniently
    pub consumer_id: Option<String>,
}

impl PublishForm {
    /// Pick known fields out of decoded form pairs, ignoring the rest.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut message = None;
        let mut consumer_id = None;

        for (key, value) in pairs {
            match key.as_str() {
                "message" if message.is_none() => message = Some(value),
                "consumer_id" if consumer_id.is_none() => consumer_id = Some(value),
                _ => {}
            }
        }

        Self {
            message: message.unwrap_or_default(),
            consumer_id,
        }
    }

    /// Target consumer, [`BROADCAST`] when absent or not a `u64`
    pub fn consumer(&self) -> u64 {
        self.consumer_id
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(BROADCAST)
    }
}

/// Validate a publish form and hand the event to the broker
pub async fn push_event(
    State(state): State<AppState>,
    form: std::result::Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Result<StatusCode> {
    let form = match form {
        Ok(Form(pairs)) => PublishForm::from_pairs(pairs),
        Err(rejection) => {
            tracing::debug!(%rejection, "unreadable publish form");
            PublishForm::default()
        }
    };

    if form.message.is_empty() {
        return Err(Error::InvalidValue);
    }

    let consumer = form.consumer();
    let broker = state.broker();
    let event = broker.new_event(form.message, consumer);
    broker.publish(&event).await;

    Ok(StatusCode::OK)
}
