// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `mqtt_sensor_lib` - Expose the latest MQTT message as a polled sensor reading.
//!
//! This library subscribes to one MQTT topic filter and keeps the most recent
//! delivery in a single-slot cache, so a host that polls on its own schedule
//! always gets the latest value without touching the network.
//!
//! # Components
//!
//! - **[`Supervisor`]**: the host-facing adapter. Validates configurations,
//!   replaces sessions on reconfiguration, serves [`Reading`]s
//! - **[`SubscriptionSession`]**: one connect-subscribe-receive lifecycle
//!   running on a background task
//! - **[`LatestMessageCache`]**: thread-safe single-slot store, last write wins
//! - **[`transport`]**: `rumqttc` backend and an in-process loopback broker
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_sensor_lib::{ConnectionConfig, Qos, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> mqtt_sensor_lib::Result<()> {
//!     let supervisor = Supervisor::new();
//!
//!     supervisor
//!         .configure(ConnectionConfig::new("10.1.5.254", "aranet/+/sensors/#").with_qos(Qos::AtLeastOnce))
//!         .await?;
//!
//!     // Later, from any thread: never blocks on the network
//!     let reading = supervisor.read_latest();
//!     println!("{}", serde_json::to_string(&reading).unwrap_or_default());
//!
//!     supervisor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Host Attributes
//!
//! Hosts that hand over a loosely typed attribute map can let the library
//! parse it. Missing port and QoS fall back to 1883 and 0:
//!
//! ```no_run
//! use mqtt_sensor_lib::{ConnectionAttributes, Supervisor};
//!
//! # async fn example() -> mqtt_sensor_lib::Result<()> {
//! let attributes: ConnectionAttributes =
//!     serde_json::from_str(r#"{"topic": "aranet/#", "host": "10.1.5.254", "port": "1883"}"#)
//!         .unwrap_or_default();
//!
//! let supervisor = Supervisor::new();
//! supervisor.configure_attributes(&attributes).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Failures
//!
//! Sessions never reconnect on their own. A lost connection shows up in
//! [`Supervisor::status`] and [`Supervisor::watch_session`]; the host then
//! calls [`Supervisor::restart`], which retries within a [`RestartPolicy`].

mod cache;
pub mod config;
pub mod error;
mod message;
mod reading;
pub mod session;
mod supervisor;
pub mod topic;
pub mod transport;

pub use cache::LatestMessageCache;
pub use config::{
    AttributeValue, ConnectionAttributes, ConnectionConfig, DEFAULT_PORT, Qos, RestartPolicy,
};
pub use error::{ConfigError, ConnectError, Error, Result, SessionFailure};
pub use message::Message;
pub use reading::{Reading, decode_payload};
pub use session::{SessionHandle, SessionId, SessionState, SubscriptionSession};
#[cfg(feature = "mqtt")]
pub use supervisor::MqttSupervisor;
pub use supervisor::{Supervisor, SupervisorStatus};
