// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection configuration for a subscription session.
//!
//! A [`ConnectionConfig`] says where to connect and what to subscribe to.
//! Hosts usually hand over loosely typed attributes instead; those are
//! parsed by [`ConnectionAttributes`].
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use mqtt_sensor_lib::{ConnectionConfig, Qos};
//!
//! let config = ConnectionConfig::new("10.1.5.254", "aranet/+/sensors/#")
//!     .with_port(1883)
//!     .with_qos(Qos::AtLeastOnce)
//!     .with_connect_timeout(Duration::from_secs(5));
//!
//! assert!(config.validate().is_ok());
//! ```

mod attributes;
mod restart_policy;

pub use attributes::{AttributeValue, ConnectionAttributes};
pub use restart_policy::RestartPolicy;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::topic;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Largest keep-alive the CONNECT packet can carry.
const MAX_KEEP_ALIVE: Duration = Duration::from_secs(65_535);

/// MQTT quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// Fire and forget (0).
    #[default]
    AtMostOnce,
    /// Acknowledged delivery (1).
    AtLeastOnce,
    /// Assured single delivery (2).
    ExactlyOnce,
}

impl Qos {
    /// Returns the numeric level.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ConfigError::InvalidQos(other.to_string())),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.as_u8()
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Where to connect and what to subscribe to.
///
/// Immutable once handed to a session; the supervisor clones it for every
/// start. A config with an empty host or topic filter is "unconfigured" and
/// fails [`validate`](Self::validate).
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    topic_filter: String,
    qos: Qos,
    credentials: Option<(String, String)>,
    client_id: Option<String>,
    keep_alive: Duration,
    connect_timeout: Duration,
    subscribe_timeout: Duration,
    disconnect_timeout: Duration,
}

impl ConnectionConfig {
    /// Creates a configuration with default port, QoS 0 and default timeouts.
    #[must_use]
    pub fn new(host: impl Into<String>, topic_filter: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            topic_filter: topic_filter.into(),
            qos: Qos::AtMostOnce,
            credentials: None,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            subscribe_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(1),
        }
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the subscription QoS (default: 0).
    #[must_use]
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Sets broker credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets a fixed client id instead of a generated one.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets how long to wait for the connection acknowledgement (default: 10 seconds).
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long to wait for the subscription acknowledgement (default: 5 seconds).
    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Sets how long a clean disconnect may take on stop (default: 1 second).
    #[must_use]
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the topic filter.
    #[must_use]
    pub fn topic_filter(&self) -> &str {
        &self.topic_filter
    }

    /// Returns the subscription QoS.
    #[must_use]
    pub fn qos(&self) -> Qos {
        self.qos
    }

    /// Returns the credentials if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Returns the fixed client id if configured.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the subscribe timeout.
    #[must_use]
    pub fn subscribe_timeout(&self) -> Duration {
        self.subscribe_timeout
    }

    /// Returns the disconnect timeout.
    #[must_use]
    pub fn disconnect_timeout(&self) -> Duration {
        self.disconnect_timeout
    }

    /// Returns true if host and topic filter are both set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && !self.topic_filter.is_empty()
    }

    /// Checks the configuration before any connection attempt.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the host is empty, the port is 0, the
    /// client id is empty or starts with a space, the keep-alive is below
    /// one second (but not 0) or above 65535 seconds, or the topic filter
    /// is empty or malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        if let Some(client_id) = &self.client_id
            && (client_id.is_empty() || client_id.starts_with(' '))
        {
            return Err(ConfigError::InvalidClientId(client_id.clone()));
        }
        let keep_alive = self.keep_alive;
        if !keep_alive.is_zero()
            && (keep_alive < Duration::from_secs(1) || keep_alive > MAX_KEEP_ALIVE)
        {
            return Err(ConfigError::InvalidKeepAlive(keep_alive));
        }
        topic::validate_filter(&self.topic_filter)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("topic_filter", &self.topic_filter)
            .field("qos", &self.qos)
            .field("has_credentials", &self.credentials.is_some())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ConnectionConfig::new("broker.local", "#");
        assert_eq!(config.port(), 1883);
        assert_eq!(config.qos(), Qos::AtMostOnce);
        assert!(config.credentials().is_none());
        assert_eq!(config.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.subscribe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn builder_chain() {
        let config = ConnectionConfig::new("10.1.5.254", "sensors/+")
            .with_port(8883)
            .with_qos(Qos::ExactlyOnce)
            .with_credentials("user", "pass")
            .with_client_id("robot_1");

        assert_eq!(config.host(), "10.1.5.254");
        assert_eq!(config.port(), 8883);
        assert_eq!(config.topic_filter(), "sensors/+");
        assert_eq!(config.qos(), Qos::ExactlyOnce);
        assert_eq!(config.credentials(), Some(("user", "pass")));
        assert_eq!(config.client_id(), Some("robot_1"));
    }

    #[test]
    fn validate_rejects_empty_host() {
        let config = ConnectionConfig::new("", "#");
        assert_eq!(config.validate(), Err(ConfigError::MissingHost));
        assert!(!config.is_configured());
    }

    #[test]
    fn validate_rejects_blank_host() {
        let config = ConnectionConfig::new("   ", "#");
        assert_eq!(config.validate(), Err(ConfigError::MissingHost));
    }

    #[test]
    fn validate_rejects_empty_topic() {
        let config = ConnectionConfig::new("localhost", "");
        assert_eq!(config.validate(), Err(ConfigError::MissingTopic));
        assert!(!config.is_configured());
    }

    #[test]
    fn validate_rejects_port_zero() {
        let config = ConnectionConfig::new("localhost", "#").with_port(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn validate_rejects_bad_filter() {
        let config = ConnectionConfig::new("localhost", "a/#/b");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTopicFilter { .. })
        ));
    }

    #[test]
    fn validate_rejects_unusable_client_ids() {
        for id in ["", " robot"] {
            let config = ConnectionConfig::new("localhost", "#").with_client_id(id);
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidClientId(id.to_string()))
            );
        }
        let config = ConnectionConfig::new("localhost", "#").with_client_id("robot 1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_keep_alive_bounds() {
        let with = |d| ConnectionConfig::new("localhost", "#").with_keep_alive(d).validate();

        assert_eq!(
            with(Duration::from_millis(500)),
            Err(ConfigError::InvalidKeepAlive(Duration::from_millis(500)))
        );
        assert!(matches!(
            with(Duration::from_secs(70_000)),
            Err(ConfigError::InvalidKeepAlive(_))
        ));
        assert!(with(Duration::ZERO).is_ok());
        assert!(with(Duration::from_secs(1)).is_ok());
        assert!(with(Duration::from_secs(65_535)).is_ok());
    }

    #[test]
    fn qos_conversions() {
        assert_eq!(Qos::try_from(0).unwrap(), Qos::AtMostOnce);
        assert_eq!(Qos::try_from(1).unwrap(), Qos::AtLeastOnce);
        assert_eq!(Qos::try_from(2).unwrap(), Qos::ExactlyOnce);
        assert!(Qos::try_from(3).is_err());
        assert_eq!(u8::from(Qos::ExactlyOnce), 2);
        assert_eq!(Qos::AtLeastOnce.to_string(), "1");
    }

    #[test]
    fn qos_serde() {
        let qos: Qos = serde_json::from_str("2").unwrap();
        assert_eq!(qos, Qos::ExactlyOnce);
        assert_eq!(serde_json::to_string(&Qos::AtLeastOnce).unwrap(), "1");
        assert!(serde_json::from_str::<Qos>("7").is_err());
    }

    #[test]
    fn debug_hides_password() {
        let config = ConnectionConfig::new("h", "t").with_credentials("user", "secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("has_credentials: true"));
    }
}
