// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `mqtt_sensor_lib` crate.
//!
//! Failures are split by where they happen: rejected configuration,
//! connect/subscribe handshakes, transport housekeeping, and a session
//! losing its connection after it was running. Payload decode failures
//! are recovered at read time and only exist so they can be logged.

use std::time::Duration;

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting or subscribing failed.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// The supervisor was shut down and no longer accepts configurations.
    #[error("supervisor has been shut down")]
    ShutDown,

    /// A restart was requested but the supervisor has never been configured.
    #[error("supervisor is not configured")]
    NotConfigured,
}

/// Errors related to connection configuration.
///
/// These are raised before any network activity happens, so a rejected
/// configuration never disturbs the currently running session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No broker host was given.
    #[error("host is required")]
    MissingHost,

    /// No topic filter was given.
    #[error("topic filter is required")]
    MissingTopic,

    /// The port is outside `[1, 65535]` or not a number.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// The QoS level is not one of 0, 1 or 2.
    #[error("invalid qos: {0} (expected 0, 1 or 2)")]
    InvalidQos(String),

    /// The client id is empty or starts with a space.
    #[error("invalid client id {0:?}: must be non-empty and not start with a space")]
    InvalidClientId(String),

    /// The keep-alive is neither disabled (0) nor within 1 s to 65535 s.
    #[error("invalid keep-alive of {} ms (expected 0 or 1 s to 65535 s)", .0.as_millis())]
    InvalidKeepAlive(Duration),

    /// The topic filter violates the wildcard grammar.
    #[error("invalid topic filter {filter:?}: {reason}")]
    InvalidTopicFilter {
        /// The rejected filter.
        filter: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Errors raised while establishing a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The broker could not be reached or refused the connection.
    #[error("connection to {host}:{port} failed: {reason}")]
    ConnectionFailed {
        /// Broker host.
        host: String,
        /// Broker port.
        port: u16,
        /// Transport-level reason.
        reason: String,
    },

    /// A handshake step did not complete in time.
    #[error("{stage} timed out after {} ms", .timeout.as_millis())]
    Timeout {
        /// The handshake step that timed out.
        stage: HandshakeStage,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The broker refused the subscription.
    #[error("subscription to {filter:?} was rejected by the broker")]
    SubscribeRejected {
        /// The topic filter that was refused.
        filter: String,
    },

    /// The session was asked to start a second time.
    #[error("session has already been started")]
    AlreadyStarted,

    /// The underlying transport failed during the handshake.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Handshake step used in timeout reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Waiting for the connection acknowledgement.
    Connect,
    /// Waiting for the subscription acknowledgement.
    Subscribe,
}

impl std::fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Subscribe => f.write_str("subscribe"),
        }
    }
}

/// Errors from the transport client outside the handshake.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The MQTT client rejected a request.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The connection is gone.
    #[error("connection closed: {0}")]
    Closed(String),
}

/// Why a running session stopped receiving messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// The transport reported an unexpected disconnect.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// A payload could not be decoded as JSON.
///
/// Never returned to callers: readings fall back to the raw text.
#[derive(Debug, Error)]
#[error("payload on {topic} is not JSON: {source}")]
pub struct DeliveryDecodeError {
    /// The topic the payload arrived on.
    pub topic: String,
    /// The JSON parser error.
    #[source]
    pub source: serde_json::Error,
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
