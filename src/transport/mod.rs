// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport seam between sessions and an MQTT client.
//!
//! A [`Connector`] opens connections; a [`Connection`] subscribes, yields
//! delivery events and shuts down. Sessions are generic over the connector
//! so the lifecycle can run against a real broker or the in-process
//! [`MemoryBroker`].
//!
//! # Implementations
//!
//! - [`MqttConnector`]: `rumqttc`-based client (feature `mqtt`)
//! - [`MemoryBroker`]: in-process loopback broker with fault injection

pub mod memory;
#[cfg(feature = "mqtt")]
mod mqtt;

pub use memory::{MemoryBroker, MemoryConnection};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConnection, MqttConnector};

use std::future::Future;

use crate::config::{ConnectionConfig, Qos};
use crate::error::{ConnectError, TransportError};
use crate::message::Message;

/// An event produced by a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A message matching the subscription was delivered.
    Message(Message),
    /// The connection was lost; no further events will follow.
    Disconnected(String),
}

/// Opens transport connections.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Connects to `config.host():config.port()` and waits for the broker's
    /// acknowledgement.
    ///
    /// Callers bound this with [`ConnectionConfig::connect_timeout`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the socket or the handshake fails.
    fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self::Connection, ConnectError>> + Send;
}

/// A single live connection, exclusively owned by one session.
pub trait Connection: Send + 'static {
    /// Subscribes to `filter` and waits for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::SubscribeRejected` if the broker refuses the
    /// filter, or another `ConnectError` if the connection fails meanwhile.
    fn subscribe(
        &mut self,
        filter: &str,
        qos: Qos,
    ) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Waits for the next delivery or disconnect.
    ///
    /// Must be cancel safe: dropping the future loses no delivered message.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Removes the subscription for `filter`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request cannot be sent.
    fn unsubscribe(&mut self, filter: &str)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the connection could not be closed cleanly.
    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
