// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sensor-facing supervisor owning at most one subscription session.
//!
//! The [`Supervisor`] is what a host talks to. It validates configurations,
//! swaps sessions on reconfiguration and serves [`Reading`]s from the active
//! session's cache without touching the network.
//!
//! Lifecycle operations (`configure`, `restart`, `shutdown`) are serialized
//! by an async mutex, so a supervisor never holds more than one live
//! connection. Reads only take a short synchronous read lock to clone the
//! active cache handle.
//!
//! # Examples
//!
//! ```
//! use mqtt_sensor_lib::{ConnectionConfig, Qos, Supervisor, SupervisorStatus};
//! use mqtt_sensor_lib::transport::MemoryBroker;
//!
//! # #[tokio::main]
//! # async fn main() -> mqtt_sensor_lib::Result<()> {
//! let broker = MemoryBroker::new();
//! let supervisor = Supervisor::with_connector(broker.clone());
//!
//! // Nothing configured yet: the empty reading
//! assert!(supervisor.read_latest().is_empty());
//!
//! supervisor.configure(ConnectionConfig::new("loopback", "aranet/#")).await?;
//! assert_eq!(supervisor.status(), SupervisorStatus::Running);
//!
//! supervisor.shutdown().await;
//! assert_eq!(supervisor.status(), SupervisorStatus::ShutDown);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};

use crate::cache::LatestMessageCache;
use crate::config::{ConnectionAttributes, ConnectionConfig, RestartPolicy};
use crate::error::{ConnectError, Error, Result};
use crate::reading::Reading;
use crate::session::{SessionHandle, SessionState, SubscriptionSession};
use crate::transport::Connector;
#[cfg(feature = "mqtt")]
use crate::transport::MqttConnector;

/// Supervisor over the `rumqttc` transport.
#[cfg(feature = "mqtt")]
pub type MqttSupervisor = Supervisor<MqttConnector>;

/// Coarse status of a supervisor, for hosts that surface health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorStatus {
    /// No configuration has been applied yet.
    Unconfigured,
    /// A session is running.
    Running,
    /// The last start failed or the running session lost its connection.
    Failed(String),
    /// `shutdown` was called.
    ShutDown,
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => f.write_str("unconfigured"),
            Self::Running => f.write_str("running"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::ShutDown => f.write_str("shut down"),
        }
    }
}

/// Owned by whoever holds the lifecycle lock.
#[derive(Default)]
struct Lifecycle {
    session: Option<SubscriptionSession>,
}

/// What readers and status queries see.
#[derive(Default)]
struct View {
    active: Option<SessionHandle>,
    config: Option<ConnectionConfig>,
    last_error: Option<String>,
    shut_down: bool,
}

/// Holds at most one active [`SubscriptionSession`] and serves readings.
///
/// Generic over the [`Connector`] so the same lifecycle runs against a real
/// broker ([`MqttSupervisor`]) or an in-process
/// [`MemoryBroker`](crate::transport::MemoryBroker).
pub struct Supervisor<C: Connector> {
    connector: C,
    restart_policy: RestartPolicy,
    lifecycle: Mutex<Lifecycle>,
    view: RwLock<View>,
}

#[cfg(feature = "mqtt")]
impl Supervisor<MqttConnector> {
    /// Creates a supervisor that connects with `rumqttc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(MqttConnector::new())
    }
}

#[cfg(feature = "mqtt")]
impl Default for Supervisor<MqttConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Supervisor<C> {
    /// Creates an unconfigured supervisor using `connector`.
    #[must_use]
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            restart_policy: RestartPolicy::default(),
            lifecycle: Mutex::new(Lifecycle::default()),
            view: RwLock::new(View::default()),
        }
    }

    /// Sets the policy bounding [`restart`](Self::restart).
    #[must_use]
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Returns the restart policy.
    #[must_use]
    pub fn restart_policy(&self) -> &RestartPolicy {
        &self.restart_policy
    }

    /// Applies a configuration, replacing the active session.
    ///
    /// After [`shutdown`](Self::shutdown) every configuration is refused,
    /// valid or not. An invalid configuration is rejected without touching
    /// the running session. Otherwise the previous session is stopped
    /// (which clears its cache) before a new session with a fresh cache is
    /// started. If the start fails, the supervisor is left without
    /// an active session and reads return the empty reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration,
    /// [`Error::Connect`] if the new session fails to start, and
    /// [`Error::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn configure(&self, config: ConnectionConfig) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        if let Err(e) = config.validate() {
            tracing::warn!(?config, error = %e, "Rejected configuration");
            return Err(e.into());
        }

        let mut lifecycle = self.lifecycle.lock().await;
        // Shutdown may have completed while waiting for the lock.
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }

        tracing::info!(
            host = %config.host(),
            port = %config.port(),
            topic = %config.topic_filter(),
            "Configuring supervisor"
        );
        self.replace_session(&mut lifecycle, config).await?;
        Ok(())
    }

    /// Parses host-provided attributes and applies them.
    ///
    /// Each missing attribute is logged as a warning before parsing, so a
    /// host sees the same hints whether or not defaults could fill the gap.
    ///
    /// # Errors
    ///
    /// Same as [`configure`](Self::configure).
    pub async fn configure_attributes(&self, attributes: &ConnectionAttributes) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        for warning in attributes.warnings() {
            tracing::warn!("{warning}");
        }
        let config = attributes.into_config()?;
        self.configure(config).await
    }

    /// Returns the latest message as a reading.
    ///
    /// Returns the empty reading when nothing has been received, no session
    /// is active, or the supervisor is shut down. Never blocks on I/O.
    #[must_use]
    pub fn read_latest(&self) -> Reading {
        let cache = self.active_cache();
        match cache.and_then(|cache| cache.get()) {
            Some(message) => Reading::from_message(&message),
            None => Reading::empty(),
        }
    }

    fn active_cache(&self) -> Option<Arc<LatestMessageCache>> {
        self.view
            .read()
            .active
            .as_ref()
            .map(|handle| Arc::clone(handle.cache()))
    }

    /// Restarts the session with the current configuration.
    ///
    /// Makes one attempt, then keeps retrying while the [`RestartPolicy`]
    /// allows, sleeping with exponential backoff in between. Never invoked
    /// automatically; hosts call it after observing a failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if no configuration was ever applied,
    /// [`Error::ShutDown`] after shutdown, or the last [`Error::Connect`]
    /// once attempts are exhausted.
    pub async fn restart(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let config = self.config().ok_or(Error::NotConfigured)?;

        let mut attempt = 0;
        loop {
            tracing::info!(attempt = attempt + 1, topic = %config.topic_filter(), "Restarting session");

            match self.replace_session(&mut lifecycle, config.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if self.restart_policy.should_retry(attempt + 1) => {
                    let delay = self.restart_policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Restart attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts = attempt + 1, error = %e, "Restart failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Stops the active session and refuses further configuration.
    ///
    /// Idempotent. The stopped session is joined before this returns.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        {
            let mut view = self.view.write();
            if view.shut_down {
                return;
            }
            view.shut_down = true;
            view.active = None;
        }

        if let Some(mut session) = lifecycle.session.take() {
            session.stop().await;
        }
        tracing::info!("Supervisor shut down");
    }

    /// Returns the coarse supervisor status.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        let view = self.view.read();
        if view.shut_down {
            return SupervisorStatus::ShutDown;
        }
        match (&view.active, &view.last_error) {
            (Some(handle), _) if handle.state().is_failed() => {
                let reason = handle
                    .failure()
                    .map_or_else(|| "session failed".to_string(), |f| f.to_string());
                SupervisorStatus::Failed(reason)
            }
            (Some(_), _) => SupervisorStatus::Running,
            (None, Some(error)) => SupervisorStatus::Failed(error.clone()),
            (None, None) => SupervisorStatus::Unconfigured,
        }
    }

    /// Returns the active session's state, if a session is active.
    #[must_use]
    pub fn session_state(&self) -> Option<SessionState> {
        self.view.read().active.as_ref().map(SessionHandle::state)
    }

    /// Returns a receiver for the active session's state changes.
    ///
    /// The receiver follows one session; after a reconfiguration, ask again.
    #[must_use]
    pub fn watch_session(&self) -> Option<watch::Receiver<SessionState>> {
        self.view
            .read()
            .active
            .as_ref()
            .map(SessionHandle::watch_state)
    }

    /// Returns the most recently applied configuration.
    ///
    /// Recorded even when the start failed, so [`restart`](Self::restart)
    /// can retry it.
    #[must_use]
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.view.read().config.clone()
    }

    /// Returns the error of the last failed start, cleared by a successful one.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.view.read().last_error.clone()
    }

    fn is_shut_down(&self) -> bool {
        self.view.read().shut_down
    }

    /// Stops the current session and starts a new one for `config`.
    ///
    /// Caller holds the lifecycle lock.
    async fn replace_session(
        &self,
        lifecycle: &mut Lifecycle,
        config: ConnectionConfig,
    ) -> std::result::Result<(), ConnectError> {
        // Readers see the empty reading until the new session is subscribed.
        self.view.write().active = None;

        if let Some(mut previous) = lifecycle.session.take() {
            tracing::debug!(session = %previous.id(), "Stopping previous session");
            previous.stop().await;
        }

        self.view.write().config = Some(config.clone());

        let cache = Arc::new(LatestMessageCache::new());
        let mut session = SubscriptionSession::new(config, cache);

        match session.start(&self.connector).await {
            Ok(()) => {
                {
                    let mut view = self.view.write();
                    view.active = Some(session.handle());
                    view.last_error = None;
                }
                lifecycle.session = Some(session);
                Ok(())
            }
            Err(e) => {
                session.stop().await;
                self.view.write().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

impl<C: Connector> fmt::Debug for Supervisor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("status", &self.status())
            .field("restart_policy", &self.restart_policy)
            .finish_non_exhaustive()
    }
}
