// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A message delivered by the transport.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::Qos;

/// One delivered MQTT message.
///
/// Built once by the transport and never mutated afterwards; the cache
/// hands out shared references to it.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    payload: Vec<u8>,
    qos: Qos,
    retain: bool,
    received_at: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: Qos, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            received_at: Utc::now(),
        }
    }

    /// The concrete topic the message arrived on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The QoS the message was delivered with.
    #[must_use]
    pub fn qos(&self) -> Qos {
        self.qos
    }

    /// The retain flag, passed through from the broker.
    #[must_use]
    pub fn retain(&self) -> bool {
        self.retain
    }

    /// When the message was handed to the session.
    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("qos", &self.qos)
            .field("retain", &self.retain)
            .field("received_at", &self.received_at)
            .finish()
    }
}
