use actix_web::{web, HttpRequest};
use common::models::{ChatCompletionRequest, ControlPayload};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::CaptureError;

/// What an inbound body turned out to be.
#[derive(Debug)]
pub enum Payload {
    /// `{"id": ..., "baseURL": ...}` with both fields set.
    Control(ControlPayload),
    Data(ChatCompletionRequest),
}

/// Decide whether `body` reconfigures routing or carries a chat request.
/// Both decodes must succeed for the body to be accepted. A bare `null`
/// reads as an empty object.
pub fn classify(body: &[u8]) -> Result<Payload, CaptureError> {
    let value = match serde_json::from_slice::<Value>(body)? {
        Value::Null => Value::Object(Map::new()),
        value => value,
    };
    let control = ControlPayload::deserialize(&value)?;
    if control.is_complete() {
        return Ok(Payload::Control(control));
    }
    Ok(Payload::Data(ChatCompletionRequest::deserialize(value)?))
}

#[derive(Deserialize)]
struct SessionQuery {
    id: Option<String>,
}

/// Session named by the request's `id` query parameter, if any.
pub fn session_hint(req: &HttpRequest) -> Option<String> {
    web::Query::<SessionQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().id)
        .filter(|id| !id.is_empty())
}
