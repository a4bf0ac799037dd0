// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loosely typed connection attributes as supplied by a host framework.

use serde::Deserialize;

use super::{ConnectionConfig, DEFAULT_PORT, Qos};
use crate::error::ConfigError;

/// A single attribute value: hosts send numbers either as strings or as
/// JSON numbers (often doubles).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// An integral number.
    Integer(i64),
    /// A floating point number.
    Float(f64),
    /// A string, possibly holding a number.
    Text(String),
}

impl AttributeValue {
    /// Returns true for an empty or whitespace-only string.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }

    /// Returns the value as text, exactly as given.
    fn as_text(&self) -> String {
        match self {
            Self::Integer(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            // Safe: only integral values inside i64 range get here
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Some(*n as i64),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Raw `{topic, host, port, qos}` attributes.
///
/// Every field is optional at this level; [`into_config`](Self::into_config)
/// decides what is required.
///
/// # Examples
///
/// ```
/// use mqtt_sensor_lib::{ConnectionAttributes, Qos};
///
/// let attrs: ConnectionAttributes = serde_json::from_str(
///     r#"{"topic": "sensors/#", "host": "10.1.5.254", "port": "1883", "qos": 1}"#,
/// ).unwrap();
///
/// let config = attrs.into_config().unwrap();
/// assert_eq!(config.port(), 1883);
/// assert_eq!(config.qos(), Qos::AtLeastOnce);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionAttributes {
    /// Topic filter to subscribe to.
    pub topic: Option<AttributeValue>,
    /// Broker host.
    pub host: Option<AttributeValue>,
    /// Broker port.
    pub port: Option<AttributeValue>,
    /// Subscription QoS.
    pub qos: Option<AttributeValue>,
    /// Optional broker username.
    pub username: Option<String>,
    /// Optional broker password.
    pub password: Option<String>,
}

fn is_missing(value: Option<&AttributeValue>) -> bool {
    value.is_none_or(AttributeValue::is_blank)
}

impl ConnectionAttributes {
    /// Lists the human-readable warnings for missing attributes.
    ///
    /// An empty list does not mean the attributes are valid, only that
    /// nothing is absent.
    #[must_use]
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if is_missing(self.topic.as_ref()) {
            warnings.push("no topic to listen to");
        }
        if is_missing(self.host.as_ref()) {
            warnings.push("no host to connect to");
        }
        if is_missing(self.port.as_ref()) {
            warnings.push("no port given, using 1883");
        }
        if is_missing(self.qos.as_ref()) {
            warnings.push("no qos given, using 0");
        }
        warnings
    }

    /// Parses the attributes into a [`ConnectionConfig`].
    ///
    /// A missing port defaults to 1883 and a missing QoS to 0.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when host or topic is missing, when port or QoS
    /// do not parse or are out of range, or when the resulting config fails
    /// [`ConnectionConfig::validate`].
    pub fn into_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let host = match &self.host {
            Some(value) if !value.is_blank() => value.as_text().trim().to_string(),
            _ => return Err(ConfigError::MissingHost),
        };
        // Spaces are legal topic characters, so the filter is kept verbatim.
        let topic = match &self.topic {
            Some(value) if !value.is_blank() => value.as_text(),
            _ => return Err(ConfigError::MissingTopic),
        };

        let port = match &self.port {
            Some(value) if !value.is_blank() => parse_port(value)?,
            _ => DEFAULT_PORT,
        };
        let qos = match &self.qos {
            Some(value) if !value.is_blank() => parse_qos(value)?,
            _ => Qos::AtMostOnce,
        };

        let mut config = ConnectionConfig::new(host, topic)
            .with_port(port)
            .with_qos(qos);
        if let Some(username) = &self.username {
            config = config.with_credentials(username, self.password.as_deref().unwrap_or(""));
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_port(value: &AttributeValue) -> Result<u16, ConfigError> {
    value
        .as_integer()
        .and_then(|n| u16::try_from(n).ok())
        .filter(|port| *port != 0)
        .ok_or_else(|| ConfigError::InvalidPort(value.as_text()))
}

fn parse_qos(value: &AttributeValue) -> Result<Qos, ConfigError> {
    value
        .as_integer()
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidQos(value.as_text()))
        .and_then(Qos::try_from)
}
