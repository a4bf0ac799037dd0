// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process loopback broker.
//!
//! [`MemoryBroker`] routes publishes to connected subscribers inside the
//! process. It follows MQTT routing rules (topic filter matching, retained
//! messages, granted QoS) and can inject faults: refused connections,
//! rejected or slow subscriptions and dropped connections.
//!
//! ```
//! use mqtt_sensor_lib::{ConnectionConfig, Qos, Supervisor};
//! use mqtt_sensor_lib::transport::MemoryBroker;
//!
//! # #[tokio::main]
//! # async fn main() -> mqtt_sensor_lib::Result<()> {
//! let broker = MemoryBroker::new();
//! let supervisor = Supervisor::with_connector(broker.clone());
//! supervisor.configure(ConnectionConfig::new("loopback", "room/#")).await?;
//!
//! broker.publish("room/climate", r#"{"temp": 21.5}"#, Qos::AtMostOnce, false);
//! # supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Connection, Connector, TransportEvent};
use crate::config::{ConnectionConfig, Qos};
use crate::error::{ConnectError, TransportError};
use crate::message::Message;
use crate::topic;

/// A connected client as seen by the broker.
struct ClientEntry {
    /// Subscription filter and granted QoS, once subscribed.
    subscription: Option<(String, Qos)>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<u64, ClientEntry>,
    retained: HashMap<String, Message>,
}

#[derive(Default)]
struct MemoryBrokerInner {
    state: Mutex<BrokerState>,
    next_client: AtomicU64,
    refuse_connections: AtomicBool,
    reject_subscriptions: AtomicBool,
    subscribe_delay: Mutex<Option<Duration>>,
    connect_count: AtomicU64,
}

/// In-process MQTT-like broker.
///
/// Cheaply cloneable; all clones share the same routing table.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryBrokerInner>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a message to every matching subscriber.
    ///
    /// Retained messages replace the previous retained message on the same
    /// topic; an empty retained payload clears it. Returns the number of
    /// subscribers the message was delivered to.
    pub fn publish(
        &self,
        topic_name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        qos: Qos,
        retain: bool,
    ) -> usize {
        let topic_name = topic_name.into();
        let payload = payload.into();
        let mut state = self.inner.state.lock();

        if retain {
            if payload.is_empty() {
                state.retained.remove(&topic_name);
            } else {
                state.retained.insert(
                    topic_name.clone(),
                    Message::new(topic_name.clone(), payload.clone(), qos, true),
                );
            }
        }

        let mut delivered = 0;
        for client in state.clients.values() {
            let Some((filter, granted)) = &client.subscription else {
                continue;
            };
            if !topic::matches(filter, &topic_name) {
                continue;
            }
            // Live deliveries carry retain = false, as on a real broker.
            let message = Message::new(topic_name.clone(), payload.clone(), qos.min(*granted), false);
            if client.events.send(TransportEvent::Message(message)).is_ok() {
                delivered += 1;
            }
        }

        tracing::trace!(topic = %topic_name, delivered, "Memory broker publish");
        delivered
    }

    /// Drops every connection, as if the broker went away.
    ///
    /// Each client receives a [`TransportEvent::Disconnected`].
    pub fn drop_connections(&self) {
        let clients = std::mem::take(&mut self.inner.state.lock().clients);
        for client in clients.into_values() {
            let _ = client
                .events
                .send(TransportEvent::Disconnected("memory broker dropped the connection".to_string()));
        }
    }

    /// Makes new connection attempts fail.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.refuse_connections.store(refuse, Ordering::Release);
    }

    /// Makes subscriptions fail with a rejected acknowledgement.
    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.inner.reject_subscriptions.store(reject, Ordering::Release);
    }

    /// Delays every subscription acknowledgement by `delay`.
    pub fn set_subscribe_delay(&self, delay: Option<Duration>) {
        *self.inner.subscribe_delay.lock() = delay;
    }

    /// Returns the number of currently connected clients.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().clients.len()
    }

    /// Returns the number of successful connects since creation.
    #[must_use]
    pub fn total_connects(&self) -> u64 {
        self.inner.connect_count.load(Ordering::Relaxed)
    }

    /// Returns the active subscription filters.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .clients
            .values()
            .filter_map(|client| client.subscription.as_ref().map(|(f, _)| f.clone()))
            .collect()
    }

    fn remove_client(&self, id: u64) -> bool {
        self.inner.state.lock().clients.remove(&id).is_some()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl Connector for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<MemoryConnection, ConnectError> {
        if self.inner.refuse_connections.load(Ordering::Acquire) {
            return Err(ConnectError::ConnectionFailed {
                host: config.host().to_string(),
                port: config.port(),
                reason: "connection refused".to_string(),
            });
        }

        let id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
        let (events, rx) = mpsc::unbounded_channel();
        self.inner.state.lock().clients.insert(
            id,
            ClientEntry {
                subscription: None,
                events,
            },
        );
        self.inner.connect_count.fetch_add(1, Ordering::Relaxed);

        Ok(MemoryConnection {
            broker: self.clone(),
            id,
            rx,
        })
    }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Connection for MemoryConnection {
    async fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), ConnectError> {
        let delay = *self.broker.inner.subscribe_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.broker.inner.reject_subscriptions.load(Ordering::Acquire) {
            return Err(ConnectError::SubscribeRejected {
                filter: filter.to_string(),
            });
        }

        let mut state = self.broker.inner.state.lock();
        let BrokerState { clients, retained } = &mut *state;
        let Some(client) = clients.get_mut(&self.id) else {
            return Err(TransportError::Closed("not connected".to_string()).into());
        };
        client.subscription = Some((filter.to_string(), qos));

        for message in retained.values() {
            if topic::matches(filter, message.topic()) {
                let delivery = Message::new(
                    message.topic(),
                    message.payload().to_vec(),
                    message.qos().min(qos),
                    true,
                );
                let _ = client.events.send(TransportEvent::Message(delivery));
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Disconnected("memory broker closed".to_string()))
    }

    async fn unsubscribe(&mut self, _filter: &str) -> Result<(), TransportError> {
        let mut state = self.broker.inner.state.lock();
        let client = state
            .clients
            .get_mut(&self.id)
            .ok_or_else(|| TransportError::Closed("not connected".to_string()))?;
        client.subscription = None;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.broker.remove_client(self.id) {
            Ok(())
        } else {
            Err(TransportError::Closed("not connected".to_string()))
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.broker.remove_client(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("loopback", "#")
    }

    #[tokio::test]
    async fn connect_and_subscribe() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(&config()).await.unwrap();
        conn.subscribe("room/+", Qos::AtLeastOnce).await.unwrap();

        assert_eq!(broker.connection_count(), 1);
        assert_eq!(broker.subscriptions(), vec!["room/+".to_string()]);
        assert_eq!(broker.publish("room/a", "1", Qos::AtLeastOnce, false), 1);
        assert_eq!(broker.publish("hall/a", "1", Qos::AtLeastOnce, false), 0);

        let TransportEvent::Message(message) = conn.next_event().await else {
            panic!("expected a message");
        };
        assert_eq!(message.topic(), "room/a");
        assert!(!message.retain());
    }

    #[tokio::test]
    async fn qos_is_downgraded_to_granted() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(&config()).await.unwrap();
        conn.subscribe("#", Qos::AtMostOnce).await.unwrap();

        broker.publish("a", "1", Qos::ExactlyOnce, false);
        let TransportEvent::Message(message) = conn.next_event().await else {
            panic!("expected a message");
        };
        assert_eq!(message.qos(), Qos::AtMostOnce);
    }

    #[tokio::test]
    async fn retained_message_is_replayed_on_subscribe() {
        let broker = MemoryBroker::new();
        broker.publish("room/a", "old", Qos::AtMostOnce, true);
        broker.publish("room/a", "new", Qos::AtMostOnce, true);

        let mut conn = broker.connect(&config()).await.unwrap();
        conn.subscribe("room/#", Qos::AtMostOnce).await.unwrap();

        let TransportEvent::Message(message) = conn.next_event().await else {
            panic!("expected a message");
        };
        assert_eq!(message.payload(), b"new");
        assert!(message.retain());
    }

    #[tokio::test]
    async fn empty_retained_payload_clears() {
        let broker = MemoryBroker::new();
        broker.publish("room/a", "old", Qos::AtMostOnce, true);
        broker.publish("room/a", "", Qos::AtMostOnce, true);

        let mut conn = broker.connect(&config()).await.unwrap();
        conn.subscribe("room/#", Qos::AtMostOnce).await.unwrap();
        broker.drop_connections();

        assert!(matches!(conn.next_event().await, TransportEvent::Disconnected(_)));
    }

    #[tokio::test]
    async fn refused_connection() {
        let broker = MemoryBroker::new();
        broker.set_refuse_connections(true);
        let result = broker.connect(&config()).await;
        assert!(matches!(result, Err(ConnectError::ConnectionFailed { .. })));
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn rejected_subscription() {
        let broker = MemoryBroker::new();
        broker.set_reject_subscriptions(true);
        let mut conn = broker.connect(&config()).await.unwrap();
        let result = conn.subscribe("a", Qos::AtMostOnce).await;
        assert!(matches!(result, Err(ConnectError::SubscribeRejected { .. })));
    }

    #[tokio::test]
    async fn drop_connections_notifies_clients() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(&config()).await.unwrap();
        broker.drop_connections();
        assert!(matches!(conn.next_event().await, TransportEvent::Disconnected(_)));
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_and_drop_remove_client() {
        let broker = MemoryBroker::new();
        let mut first = broker.connect(&config()).await.unwrap();
        let second = broker.connect(&config()).await.unwrap();
        assert_eq!(broker.connection_count(), 2);
        assert_eq!(broker.total_connects(), 2);

        first.disconnect().await.unwrap();
        assert!(first.disconnect().await.is_err());
        drop(second);
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let mut conn = broker.connect(&config()).await.unwrap();
        conn.subscribe("#", Qos::AtMostOnce).await.unwrap();
        conn.unsubscribe("#").await.unwrap();
        assert_eq!(broker.publish("a", "1", Qos::AtMostOnce, false), 0);
    }
}
