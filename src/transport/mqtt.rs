// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport backed by `rumqttc`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS, SubAck,
    SubscribeReasonCode,
};

use super::{Connection, Connector, TransportEvent};
use crate::config::{ConnectionConfig, Qos};
use crate::error::{ConnectError, TransportError};
use crate::message::Message;

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Capacity of the request channel between client and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Opens `rumqttc` connections.
///
/// # Examples
///
/// ```no_run
/// use mqtt_sensor_lib::{ConnectionConfig, Supervisor};
/// use mqtt_sensor_lib::transport::MqttConnector;
///
/// # async fn example() -> mqtt_sensor_lib::Result<()> {
/// let supervisor = Supervisor::with_connector(MqttConnector::new());
/// supervisor
///     .configure(ConnectionConfig::new("10.1.5.254", "aranet/#"))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl MqttConnector {
    /// Creates a new connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn next_client_id() -> String {
    let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mqtt_sensor_{}_{}", std::process::id(), counter)
}

impl Connector for MqttConnector {
    type Connection = MqttConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<MqttConnection, ConnectError> {
        // MqttOptions asserts on the client id and keep-alive.
        if let Err(e) = config.validate() {
            return Err(ConnectError::ConnectionFailed {
                host: config.host().to_string(),
                port: config.port(),
                reason: e.to_string(),
            });
        }

        let client_id = config
            .client_id()
            .map_or_else(next_client_id, ToString::to_string);

        let mut mqtt_options = MqttOptions::new(&client_id, config.host(), config.port());
        mqtt_options.set_keep_alive(config.keep_alive());
        mqtt_options.set_clean_session(true);

        if let Some((username, password)) = config.credentials() {
            mqtt_options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    tracing::debug!(?connack, client_id = %client_id, "MQTT connected");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(ConnectError::ConnectionFailed {
                        host: config.host().to_string(),
                        port: config.port(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(MqttConnection {
            client,
            event_loop,
            pending: VecDeque::new(),
            closed: false,
            disconnect_timeout: config.disconnect_timeout(),
        })
    }
}

/// A live `rumqttc` connection.
pub struct MqttConnection {
    client: AsyncClient,
    event_loop: EventLoop,
    /// Publishes that arrived while waiting for the subscription ack.
    pending: VecDeque<Message>,
    /// Set once the event loop reported an error or the broker hung up.
    /// Polling again would make `rumqttc` dial the broker a second time.
    closed: bool,
    disconnect_timeout: Duration,
}

impl std::fmt::Debug for MqttConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConnection")
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn to_rumqttc_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_rumqttc_qos(qos: QoS) -> Qos {
    match qos {
        QoS::AtMostOnce => Qos::AtMostOnce,
        QoS::AtLeastOnce => Qos::AtLeastOnce,
        QoS::ExactlyOnce => Qos::ExactlyOnce,
    }
}

fn to_message(publish: Publish) -> Message {
    Message::new(
        publish.topic,
        publish.payload.to_vec(),
        from_rumqttc_qos(publish.qos),
        publish.retain,
    )
}

/// Outcome of one event while waiting for a SUBACK.
#[derive(Debug)]
enum SubscribeStep {
    /// Keep polling.
    Pending,
    /// The broker answered the subscription.
    Acked(Result<(), ConnectError>),
    /// The connection went away.
    Closed(String),
}

/// Classifies an event seen during the subscribe handshake.
///
/// Publishes are queued in `pending` so they are delivered before anything
/// polled later.
fn subscribe_step(event: Event, filter: &str, pending: &mut VecDeque<Message>) -> SubscribeStep {
    match event {
        Event::Incoming(Packet::SubAck(suback)) => {
            tracing::debug!(?suback, filter = %filter, "MQTT subscription acknowledged");
            SubscribeStep::Acked(check_suback(&suback, filter))
        }
        Event::Incoming(Packet::Publish(publish)) => {
            pending.push_back(to_message(publish));
            SubscribeStep::Pending
        }
        Event::Incoming(Packet::Disconnect) => {
            SubscribeStep::Closed("broker sent DISCONNECT".to_string())
        }
        _ => SubscribeStep::Pending,
    }
}

fn check_suback(suback: &SubAck, filter: &str) -> Result<(), ConnectError> {
    let rejected = suback
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure));
    if rejected {
        Err(ConnectError::SubscribeRejected {
            filter: filter.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Maps an event seen by the receive loop, `None` for protocol chatter.
fn receive_step(event: Event) -> Option<TransportEvent> {
    match event {
        Event::Incoming(Packet::Publish(publish)) => Some(TransportEvent::Message(to_message(publish))),
        Event::Incoming(Packet::Disconnect) => Some(TransportEvent::Disconnected(
            "broker sent DISCONNECT".to_string(),
        )),
        _ => None,
    }
}

impl MqttConnection {
    /// Polls the event loop once, latching `closed` on error.
    async fn poll(&mut self) -> Result<Event, String> {
        match self.event_loop.poll().await {
            Ok(event) => Ok(event),
            Err(e) => {
                self.closed = true;
                Err(e.to_string())
            }
        }
    }
}

impl Connection for MqttConnection {
    async fn subscribe(&mut self, filter: &str, qos: Qos) -> Result<(), ConnectError> {
        if self.closed {
            return Err(TransportError::Closed("connection already closed".to_string()).into());
        }

        self.client
            .subscribe(filter, to_rumqttc_qos(qos))
            .await
            .map_err(TransportError::from)?;

        loop {
            let event = self.poll().await.map_err(TransportError::Closed)?;
            match subscribe_step(event, filter, &mut self.pending) {
                SubscribeStep::Pending => {}
                SubscribeStep::Acked(result) => return result,
                SubscribeStep::Closed(reason) => {
                    self.closed = true;
                    return Err(TransportError::Closed(reason).into());
                }
            }
        }
    }

    async fn next_event(&mut self) -> TransportEvent {
        if let Some(message) = self.pending.pop_front() {
            return TransportEvent::Message(message);
        }
        if self.closed {
            return TransportEvent::Disconnected("connection already closed".to_string());
        }

        loop {
            match self.poll().await {
                Ok(event) => {
                    if let Some(event) = receive_step(event) {
                        if matches!(event, TransportEvent::Disconnected(_)) {
                            self.closed = true;
                        }
                        return event;
                    }
                }
                Err(reason) => return TransportEvent::Disconnected(reason),
            }
        }
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed("connection already closed".to_string()));
        }
        self.client.unsubscribe(filter).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        // Nothing left to close, and polling would reconnect.
        if self.closed {
            return Ok(());
        }

        self.client.disconnect().await?;

        // The request only leaves once the event loop is driven.
        let timeout = self.disconnect_timeout;
        let flush = async {
            loop {
                match self.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                    Ok(_) => {}
                    Err(reason) => return Err(TransportError::Closed(reason)),
                }
            }
        };

        let result = tokio::time::timeout(timeout, flush).await;
        self.closed = true;
        result.map_err(|_| TransportError::Closed("disconnect was not flushed in time".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique() {
        let first = next_client_id();
        let second = next_client_id();
        assert_ne!(first, second);
        assert!(first.starts_with("mqtt_sensor_"));
    }

    #[test]
    fn qos_mapping_round_trips() {
        for qos in [Qos::AtMostOnce, Qos::AtLeastOnce, Qos::ExactlyOnce] {
            assert_eq!(from_rumqttc_qos(to_rumqttc_qos(qos)), qos);
        }
    }

    #[test]
    fn publish_becomes_message() {
        let mut publish = Publish::new("sensors/t", QoS::AtLeastOnce, b"21.5".to_vec());
        publish.retain = true;
        let message = to_message(publish);
        assert_eq!(message.topic(), "sensors/t");
        assert_eq!(message.payload(), b"21.5");
        assert_eq!(message.qos(), Qos::AtLeastOnce);
        assert!(message.retain());
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let config = ConnectionConfig::new("127.0.0.1", "#").with_port(1);
        let result = MqttConnector::new().connect(&config).await;
        assert!(matches!(
            result,
            Err(ConnectError::ConnectionFailed { port: 1, .. })
        ));
    }

    #[tokio::test]
    async fn connect_rejects_options_rumqttc_would_panic_on() {
        let configs = [
            ConnectionConfig::new("127.0.0.1", "#").with_client_id(""),
            ConnectionConfig::new("127.0.0.1", "#").with_keep_alive(Duration::from_millis(500)),
        ];
        for config in configs {
            let result = MqttConnector::new().connect(&config).await;
            assert!(matches!(result, Err(ConnectError::ConnectionFailed { .. })));
        }
    }

    /// A connection that never reached a broker; port 1 refuses any dial.
    fn offline_connection(closed: bool) -> MqttConnection {
        let options = MqttOptions::new("offline_test", "127.0.0.1", 1);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        MqttConnection {
            client,
            event_loop,
            pending: VecDeque::new(),
            closed,
            disconnect_timeout: Duration::from_secs(1),
        }
    }

    fn publish(topic: &str, payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            topic,
            QoS::AtMostOnce,
            payload.as_bytes().to_vec(),
        )))
    }

    #[test]
    fn granted_suback_completes_subscribe() {
        let mut pending = VecDeque::new();
        let suback = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        let step = subscribe_step(Event::Incoming(Packet::SubAck(suback)), "a/#", &mut pending);
        assert!(matches!(step, SubscribeStep::Acked(Ok(()))));
    }

    #[test]
    fn failure_suback_is_rejection() {
        let mut pending = VecDeque::new();
        let suback = SubAck::new(1, vec![SubscribeReasonCode::Failure]);
        let step = subscribe_step(Event::Incoming(Packet::SubAck(suback)), "a/#", &mut pending);
        match step {
            SubscribeStep::Acked(Err(ConnectError::SubscribeRejected { filter })) => {
                assert_eq!(filter, "a/#");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn publishes_before_suback_are_queued_in_order() {
        let mut pending = VecDeque::new();
        for (topic, payload) in [("a/1", "first"), ("a/2", "second")] {
            let step = subscribe_step(publish(topic, payload), "a/#", &mut pending);
            assert!(matches!(step, SubscribeStep::Pending));
        }
        let topics: Vec<_> = pending.iter().map(Message::topic).collect();
        assert_eq!(topics, ["a/1", "a/2"]);
    }

    #[test]
    fn broker_disconnect_during_subscribe() {
        let mut pending = VecDeque::new();
        let step = subscribe_step(Event::Incoming(Packet::Disconnect), "a/#", &mut pending);
        assert!(matches!(step, SubscribeStep::Closed(_)));

        let step = subscribe_step(Event::Incoming(Packet::PingResp), "a/#", &mut pending);
        assert!(matches!(step, SubscribeStep::Pending));
    }

    #[test]
    fn receive_step_maps_deliveries() {
        assert!(matches!(
            receive_step(publish("t", "1")),
            Some(TransportEvent::Message(m)) if m.payload() == b"1"
        ));
        assert!(matches!(
            receive_step(Event::Incoming(Packet::Disconnect)),
            Some(TransportEvent::Disconnected(_))
        ));
        assert!(receive_step(Event::Outgoing(Outgoing::PingReq)).is_none());
    }

    #[tokio::test]
    async fn queued_publishes_are_delivered_first() {
        let mut connection = offline_connection(true);
        connection
            .pending
            .push_back(Message::new("a/1", "first", Qos::AtMostOnce, false));
        connection
            .pending
            .push_back(Message::new("a/2", "second", Qos::AtMostOnce, false));

        let TransportEvent::Message(first) = connection.next_event().await else {
            panic!("expected the first queued message");
        };
        let TransportEvent::Message(second) = connection.next_event().await else {
            panic!("expected the second queued message");
        };
        assert_eq!(first.topic(), "a/1");
        assert_eq!(second.topic(), "a/2");
        assert!(matches!(
            connection.next_event().await,
            TransportEvent::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn closed_connection_is_not_polled_again() {
        let mut connection = offline_connection(true);

        // Polling would dial port 1 and fail; a closed connection must not.
        assert!(connection.disconnect().await.is_ok());
        assert!(connection.unsubscribe("a/#").await.is_err());
        assert!(matches!(
            connection.subscribe("a/#", Qos::AtMostOnce).await,
            Err(ConnectError::Transport(TransportError::Closed(_)))
        ));
    }

    #[tokio::test]
    async fn failed_poll_latches_closed() {
        let mut connection = offline_connection(false);
        let result = connection.subscribe("a/#", Qos::AtMostOnce).await;
        assert!(matches!(
            result,
            Err(ConnectError::Transport(TransportError::Closed(_)))
        ));
        assert!(connection.closed);

        // Cleanup after the failed subscribe does not reconnect.
        assert!(connection.disconnect().await.is_ok());
    }
}
