// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subscription session: one connection, one subscription, one cache.
//!
//! A [`SubscriptionSession`] connects, subscribes and then hands the
//! connection to a spawned receive loop that writes every delivery into
//! its [`LatestMessageCache`]. The loop waits on the next transport event
//! and the stop signal at the same time.
//!
//! Sessions never reconnect. An unexpected disconnect moves the session to
//! [`SessionState::Failed`] and records a [`SessionFailure`]; deciding what
//! to do next is up to the owner (see [`Supervisor`](crate::Supervisor)).
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use mqtt_sensor_lib::{ConnectionConfig, LatestMessageCache, SessionState, SubscriptionSession};
//! use mqtt_sensor_lib::transport::MemoryBroker;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), mqtt_sensor_lib::error::ConnectError> {
//! let broker = MemoryBroker::new();
//! let cache = Arc::new(LatestMessageCache::new());
//! let mut session = SubscriptionSession::new(ConnectionConfig::new("loopback", "#"), cache);
//!
//! session.start(&broker).await?;
//! assert_eq!(session.state(), SessionState::Running);
//!
//! session.stop().await;
//! session.stop().await; // idempotent
//! assert_eq!(session.state(), SessionState::Stopped);
//! # Ok(())
//! # }
//! ```

mod state;

pub use state::{SessionId, SessionState};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::cache::LatestMessageCache;
use crate::config::ConnectionConfig;
use crate::error::{ConnectError, HandshakeStage, SessionFailure};
use crate::transport::{Connection, Connector, TransportEvent};

/// One connect-subscribe-receive lifecycle bound to one configuration.
pub struct SubscriptionSession {
    id: SessionId,
    config: ConnectionConfig,
    cache: Arc<LatestMessageCache>,
    state_tx: Arc<watch::Sender<SessionState>>,
    failure: Arc<Mutex<Option<SessionFailure>>>,
    /// Dropping this also stops the receive loop.
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Cheap, cloneable view of a session for observers.
///
/// Lets a caller read the cache and state without holding the session
/// itself, which stays exclusively owned by whoever controls its lifecycle.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    cache: Arc<LatestMessageCache>,
    state_rx: watch::Receiver<SessionState>,
    failure: Arc<Mutex<Option<SessionFailure>>>,
}

impl SessionHandle {
    /// Returns the session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the session's cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<LatestMessageCache> {
        &self.cache
    }

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Returns the failure that ended the receive loop, if any.
    #[must_use]
    pub fn failure(&self) -> Option<SessionFailure> {
        self.failure.lock().clone()
    }

    /// Returns a receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }
}

impl SubscriptionSession {
    /// Creates a session in the [`SessionState::Created`] state.
    ///
    /// No network activity happens until [`start`](Self::start).
    #[must_use]
    pub fn new(config: ConnectionConfig, cache: Arc<LatestMessageCache>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Created);
        Self {
            id: SessionId::new(),
            config,
            cache,
            state_tx: Arc::new(state_tx),
            failure: Arc::new(Mutex::new(None)),
            stop_tx: None,
            task: None,
        }
    }

    /// Returns the session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the configuration this session is bound to.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns the cache this session writes into.
    #[must_use]
    pub fn cache(&self) -> &Arc<LatestMessageCache> {
        &self.cache
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Returns the failure that ended the receive loop, if any.
    #[must_use]
    pub fn failure(&self) -> Option<SessionFailure> {
        self.failure.lock().clone()
    }

    /// Returns a receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Returns an observer handle for this session.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            cache: Arc::clone(&self.cache),
            state_rx: self.state_tx.subscribe(),
            failure: Arc::clone(&self.failure),
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::trace!(session = %self.id, from = %previous, to = %state, "Session state changed");
        }
    }

    /// Connects, subscribes and spawns the receive loop.
    ///
    /// Each handshake step is bounded by the configured timeout. On failure
    /// the connection is closed, the session moves to
    /// [`SessionState::Failed`] and no receive loop is spawned.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError` if the session was already started, if the
    /// connection or subscription fails, or if either times out.
    pub async fn start<C: Connector>(&mut self, connector: &C) -> Result<(), ConnectError> {
        if self.state() != SessionState::Created {
            return Err(ConnectError::AlreadyStarted);
        }

        tracing::info!(
            session = %self.id,
            host = %self.config.host(),
            port = %self.config.port(),
            topic = %self.config.topic_filter(),
            qos = %self.config.qos(),
            "Starting subscription session"
        );

        self.set_state(SessionState::Connecting);
        let mut connection = match self.connect(connector).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "Session connect failed");
                self.set_state(SessionState::Failed);
                return Err(e);
            }
        };

        if let Err(e) = self.subscribe(&mut connection).await {
            tracing::warn!(session = %self.id, error = %e, "Session subscribe failed");
            if let Err(e) = connection.disconnect().await {
                tracing::debug!(session = %self.id, error = %e, "Disconnect after failed subscribe");
            }
            self.set_state(SessionState::Failed);
            return Err(e);
        }
        self.set_state(SessionState::Subscribed);

        let (stop_tx, stop_rx) = oneshot::channel();
        let receive_loop = ReceiveLoop {
            id: self.id,
            filter: self.config.topic_filter().to_string(),
            disconnect_timeout: self.config.disconnect_timeout(),
            cache: Arc::clone(&self.cache),
            state_tx: Arc::clone(&self.state_tx),
            failure: Arc::clone(&self.failure),
        };

        // Running is published before the loop can report a failure.
        self.set_state(SessionState::Running);
        self.task = Some(tokio::spawn(receive_loop.run(connection, stop_rx)));
        self.stop_tx = Some(stop_tx);

        tracing::info!(session = %self.id, topic = %self.config.topic_filter(), "Session running");
        Ok(())
    }

    async fn connect<C: Connector>(&self, connector: &C) -> Result<C::Connection, ConnectError> {
        let timeout = self.config.connect_timeout();
        tokio::time::timeout(timeout, connector.connect(&self.config))
            .await
            .map_err(|_| ConnectError::Timeout {
                stage: HandshakeStage::Connect,
                timeout,
            })?
    }

    async fn subscribe<T: Connection>(&self, connection: &mut T) -> Result<(), ConnectError> {
        let timeout = self.config.subscribe_timeout();
        tokio::time::timeout(
            timeout,
            connection.subscribe(self.config.topic_filter(), self.config.qos()),
        )
        .await
        .map_err(|_| ConnectError::Timeout {
            stage: HandshakeStage::Subscribe,
            timeout,
        })?
    }

    /// Stops the session and waits for the receive loop to finish.
    ///
    /// The loop unsubscribes and disconnects (best effort) before it exits;
    /// the cache is cleared once the loop has been joined, so no delivery
    /// can land after this returns. Safe to call repeatedly and on sessions
    /// that never started.
    pub async fn stop(&mut self) {
        if self.state() == SessionState::Stopped {
            return;
        }

        self.set_state(SessionState::Stopping);

        if let Some(stop_tx) = self.stop_tx.take() {
            // The loop may already have exited after a failure.
            let _ = stop_tx.send(());
        }

        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!(session = %self.id, error = %e, "Receive loop did not exit cleanly");
        }

        self.cache.clear();
        self.set_state(SessionState::Stopped);
        tracing::info!(session = %self.id, "Session stopped");
    }
}

impl std::fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("topic", &self.config.topic_filter())
            .finish_non_exhaustive()
    }
}

/// State moved into the spawned receive task.
struct ReceiveLoop {
    id: SessionId,
    filter: String,
    disconnect_timeout: std::time::Duration,
    cache: Arc<LatestMessageCache>,
    state_tx: Arc<watch::Sender<SessionState>>,
    failure: Arc<Mutex<Option<SessionFailure>>>,
}

impl ReceiveLoop {
    async fn run<T: Connection>(self, mut connection: T, mut stop_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                biased;

                // Fires on an explicit stop and when the session is dropped.
                _ = &mut stop_rx => break,

                event = connection.next_event() => match event {
                    TransportEvent::Message(message) => {
                        tracing::debug!(
                            session = %self.id,
                            topic = %message.topic(),
                            bytes = message.payload().len(),
                            "Message received"
                        );
                        self.cache.set(message);
                    }
                    TransportEvent::Disconnected(reason) => {
                        tracing::error!(session = %self.id, reason = %reason, "Session lost its connection");
                        *self.failure.lock() = Some(SessionFailure::ConnectionLost(reason));
                        self.state_tx.send_replace(SessionState::Failed);
                        return;
                    }
                },
            }
        }

        self.close(connection).await;
    }

    async fn close<T: Connection>(&self, mut connection: T) {
        let cleanup = async {
            if let Err(e) = connection.unsubscribe(&self.filter).await {
                tracing::warn!(session = %self.id, error = %e, "Failed to unsubscribe");
            }
            if let Err(e) = connection.disconnect().await {
                tracing::warn!(session = %self.id, error = %e, "Failed to disconnect cleanly");
            }
        };

        if tokio::time::timeout(self.disconnect_timeout, cleanup)
            .await
            .is_err()
        {
            tracing::warn!(session = %self.id, "Disconnect timed out, dropping connection");
        }
    }
}
