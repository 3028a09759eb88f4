//! Session client for the companion process
//!
//! [`SessionClient`] owns at most one live connection at a time. Opening a
//! connection spawns a driver task that runs the handshake; the client talks
//! to it over a command channel and observes its state through a `watch`
//! channel.
//!
//! ## Request Correlation
//!
//! The companion's `fillItem` carries no request identifier, so `password()`
//! calls are serialized: each one waits for the previous to finish before
//! sending its `showPopup`. Pending replies are kept in a map keyed by a
//! local request id and resolved in FIFO order.

mod driver;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use opass_core::error::{OpassError, SessionError};
use opass_core::{AuthMachine, ClientConfig, ConnectionState, Connector, CredentialPair};
use opass_protocol::message::Item;

use crate::transport::WsConnector;
use driver::{Command, Driver};

/// Name of the item field holding the password
pub const PASSWORD_FIELD: &str = "password";

/// Capacity of the verification code broadcast channel
const CODE_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the per-connection command channel
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Handle to a running connection driver
struct Connection {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Client for the companion's authenticated request/response protocol
pub struct SessionClient<C: Connector = WsConnector> {
    connector: C,
    config: ClientConfig,
    credentials: CredentialPair,
    connection: Mutex<Option<Connection>>,
    /// Serializes `password()` calls
    requests: Mutex<()>,
    next_request: AtomicU64,
    state: Arc<watch::Sender<ConnectionState>>,
    codes: broadcast::Sender<String>,
}

impl SessionClient<WsConnector> {
    /// Create a client talking to the companion over WebSocket
    pub fn websocket(config: ClientConfig, credentials: CredentialPair) -> Self {
        Self::new(config, credentials, WsConnector)
    }
}

impl<C: Connector> SessionClient<C> {
    /// Create a client using the given connector
    pub fn new(config: ClientConfig, credentials: CredentialPair, connector: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (codes, _) = broadcast::channel(CODE_CHANNEL_CAPACITY);
        Self {
            connector,
            config,
            credentials,
            connection: Mutex::new(None),
            requests: Mutex::new(()),
            next_request: AtomicU64::new(0),
            state: Arc::new(state),
            codes,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to verification codes shown during registration
    pub fn verification_codes(&self) -> broadcast::Receiver<String> {
        self.codes.subscribe()
    }

    /// Open the connection and wait until the session is ready
    ///
    /// Resolves on the `welcome` that completes the handshake (the first
    /// `welcome` for the legacy variant); an `authFail` with reason
    /// `bad-mac` restarts registration instead of failing.
    ///
    /// Does nothing beyond waiting if a connection is already open. Fails
    /// with [`SessionError::ConnectionRejected`] if the companion refuses
    /// the client, and with [`SessionError::Timeout`] if the session is not
    /// ready within the configured timeout.
    pub async fn connect(&self) -> Result<(), OpassError> {
        match tokio::time::timeout(self.config.timeout, self.establish()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(state = %self.state(), "Timed out waiting for the companion");
                Err(SessionError::Timeout.into())
            }
        }
    }

    /// Ask the companion for the password of the item matching `url`
    ///
    /// Connects if needed, shows the companion's popup and waits for the
    /// user to pick an item. The whole operation, including waiting for
    /// earlier calls to finish, is bounded by the configured timeout.
    pub async fn password(&self, url: &str) -> Result<String, OpassError> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);

        // The turn outlives the timed future so a timed-out request is
        // cancelled before the next one is sent
        let mut turn = None;
        let request = async {
            turn = Some(self.requests.lock().await);
            self.request_item(id, url).await
        };

        let item = match tokio::time::timeout(self.config.timeout, request).await {
            Ok(result) => result?,
            Err(_) => {
                self.cancel_request(id).await;
                drop(turn);
                tracing::warn!(id, "Password request timed out");
                return Err(SessionError::Timeout.into());
            }
        };

        item.field(PASSWORD_FIELD)
            .map(|field| field.value.clone())
            .ok_or_else(|| SessionError::NoPasswordField.into())
    }

    /// Drop the connection and all session state
    pub async fn reset(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            tracing::debug!("Resetting connection");
            connection.cancel.cancel();
            if let Err(e) = connection.task.await {
                tracing::warn!(error = %e, "Connection driver panicked");
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Close the connection and consume the client
    pub async fn close(self) {
        self.reset().await;
        tracing::debug!("Session client closed");
    }

    async fn establish(&self) -> Result<(), OpassError> {
        let ready = {
            let mut slot = self.connection.lock().await;
            if !slot.as_ref().is_some_and(Connection::is_open) {
                *slot = Some(self.open().await?);
            }

            let connection = slot.as_ref().ok_or(SessionError::NotConnected)?;
            let (reply, ready) = oneshot::channel();
            connection
                .commands
                .send(Command::AwaitReady(reply))
                .await
                .map_err(|_| SessionError::TransportClosed)?;
            ready
        };

        ready.await.map_err(|_| SessionError::TransportClosed)??;
        Ok(())
    }

    async fn open(&self) -> Result<Connection, OpassError> {
        self.state.send_replace(ConnectionState::Connecting);
        tracing::debug!(address = %self.config.address, "Connecting to companion");

        let transport = match self.connector.connect(&self.config).await {
            Ok(transport) => transport,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        let mut machine = AuthMachine::new(self.credentials.clone(), &self.config);
        machine.connecting();

        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let driver = Driver::new(
            transport,
            self.config.codec(),
            machine,
            rx,
            cancel.clone(),
            Arc::clone(&self.state),
            self.codes.clone(),
        );
        let task = tokio::spawn(driver.run());

        tracing::info!(address = %self.config.address, "Connected to companion");
        Ok(Connection {
            commands,
            cancel,
            task,
        })
    }

    async fn request_item(&self, id: u64, url: &str) -> Result<Item, OpassError> {
        self.establish().await?;

        let (reply, item) = oneshot::channel();
        {
            let slot = self.connection.lock().await;
            let connection = slot.as_ref().ok_or(SessionError::NotConnected)?;
            connection
                .commands
                .send(Command::ShowPopup {
                    id,
                    url: url.to_string(),
                    reply,
                })
                .await
                .map_err(|_| SessionError::TransportClosed)?;
        }

        Ok(item.await.map_err(|_| SessionError::TransportClosed)??)
    }

    async fn cancel_request(&self, id: u64) {
        let slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            let _ = connection.commands.send(Command::Cancel(id)).await;
        }
    }
}
