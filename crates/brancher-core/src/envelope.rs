//! Transport envelope parsing.
//!
//! The notification bus delivers batches shaped like
//! `{"Records": [{"Sns": {"MessageId": "...", "Timestamp": "...", "Message": "<json>"}}]}`.
//! A bare message object is accepted too, for manual runs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{PublishEvent, ValidationError};

/// One message from an envelope. Decoding failures stay per-record so a bad
/// record never blocks its neighbours.
#[derive(Debug, Clone)]
pub struct Notification {
    pub message_id: Option<String>,
    pub event: Result<PublishEvent, ValidationError>,
}

#[derive(Deserialize)]
struct BusRecord {
    #[serde(rename = "Sns")]
    sns: BusMessage,
}

#[derive(Deserialize)]
struct BusMessage {
    #[serde(rename = "MessageId")]
    message_id: Option<String>,
    #[serde(rename = "Timestamp")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Message")]
    message: String,
}

/// Split a raw envelope into notifications.
///
/// Fails as a whole only when `raw` is not a JSON object.
pub fn parse_envelope(raw: &str) -> Result<Vec<Notification>, ValidationError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ValidationError::MalformedPayload(format!("envelope is not JSON: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(ValidationError::MalformedPayload(
            "envelope must be a JSON object".to_string(),
        ));
    };

    match object.remove("Records") {
        Some(Value::Array(records)) => Ok(records.into_iter().map(decode_record).collect()),
        Some(_) => Err(ValidationError::MalformedPayload(
            "Records must be an array".to_string(),
        )),
        None => Ok(vec![Notification {
            message_id: None,
            event: PublishEvent::from_json(Value::Object(object)),
        }]),
    }
}

fn decode_record(record: Value) -> Notification {
    let record: BusRecord = match serde_json::from_value(record) {
        Ok(record) => record,
        Err(e) => {
            return Notification {
                message_id: None,
                event: Err(ValidationError::MalformedPayload(format!(
                    "record is not a bus notification: {e}"
                ))),
            }
        }
    };

    let BusMessage {
        message_id,
        timestamp,
        message,
    } = record.sns;

    let event = serde_json::from_str::<Value>(&message)
        .map_err(|e| ValidationError::MalformedPayload(format!("message body is not JSON: {e}")))
        .and_then(PublishEvent::from_json)
        .map(|mut event| {
            if event.source_timestamp.is_none() {
                event.source_timestamp = timestamp;
            }
            event
        });

    Notification { message_id, event }
}
