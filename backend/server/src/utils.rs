use axum::body::Bytes;
use serde_json::{Map, Value};

use crate::error::AppError::{self, MalformedPayload};

static MISSING: Value = Value::Null;

/// An empty body reads as `{}`; anything that isn't a JSON object is rejected.
pub fn json_object(body: &Bytes) -> Result<Map<String, Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice(body).map_err(|_| MalformedPayload)? {
        Value::Object(object) => Ok(object),
        _ => Err(MalformedPayload),
    }
}

/// Missing fields read as `null` so validation rejects them like any other bad value.
pub fn field<'a>(object: &'a Map<String, Value>, name: &str) -> &'a Value {
    object.get(name).unwrap_or(&MISSING)
}
