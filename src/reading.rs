// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Normalized view of the latest message, as returned to pollers.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DeliveryDecodeError;
use crate::message::Message;

/// A sensor-style reading of the latest message.
///
/// Every field is `None` (serialized as `null`) when nothing has been
/// received yet or no session is active.
///
/// # Examples
///
/// ```
/// use mqtt_sensor_lib::{Message, Qos, Reading};
///
/// let message = Message::new("room/climate", r#"{"temp": 21.5}"#, Qos::AtMostOnce, false);
/// let reading = Reading::from_message(&message);
/// assert_eq!(reading.payload.unwrap()["temp"], 21.5);
///
/// let message = Message::new("room/state", "not-json", Qos::AtMostOnce, false);
/// let reading = Reading::from_message(&message);
/// assert_eq!(reading.payload.unwrap(), "not-json");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reading {
    /// Topic the message arrived on.
    pub topic: Option<String>,
    /// Decoded JSON payload, or the raw text if it is not JSON.
    pub payload: Option<Value>,
    /// Delivery QoS.
    pub qos: Option<u8>,
    /// Retain flag.
    pub retain: Option<bool>,
}

impl Reading {
    /// The reading returned before any message arrives.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a reading from a delivered message.
    ///
    /// Never fails: a payload that is not JSON is passed through as text.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            topic: Some(message.topic().to_string()),
            payload: Some(decode_payload(message)),
            qos: Some(message.qos().as_u8()),
            retain: Some(message.retain()),
        }
    }

    /// Returns true if this is the empty reading.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topic.is_none()
    }

    /// Converts the reading into a key/value map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("topic".to_string(), self.topic.map_or(Value::Null, Value::String));
        map.insert("payload".to_string(), self.payload.unwrap_or(Value::Null));
        map.insert("qos".to_string(), self.qos.map_or(Value::Null, Value::from));
        map.insert("retain".to_string(), self.retain.map_or(Value::Null, Value::Bool));
        map
    }
}

/// Decodes a payload as JSON, falling back to its text.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
#[must_use]
pub fn decode_payload(message: &Message) -> Value {
    let text = String::from_utf8_lossy(message.payload());
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(source) => {
            let err = DeliveryDecodeError {
                topic: message.topic().to_string(),
                source,
            };
            tracing::debug!(error = %err, "Passing payload through as text");
            Value::String(text.into_owned())
        }
    }
}
