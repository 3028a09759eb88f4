//! Connection driver
//!
//! One driver task owns one transport. It processes inbound messages
//! strictly in delivery order, executes the actions returned by the
//! [`AuthMachine`], runs the settle timer between `authRegistered` and the
//! next `authBegin`, and correlates `fillItem` replies with pending popup
//! requests.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use opass_core::error::SessionError;
use opass_core::{AuthAction, AuthMachine, ConnectionState, Transport};
use opass_protocol::message::{FillItemPayload, Item, PopupOptions, ShowPopupPayload};
use opass_protocol::{Action, EnvelopeCodec, InboundEnvelope};

/// Requests from the client handle to the driver
#[derive(Debug)]
pub(crate) enum Command {
    /// Resolve once the session is ready (immediately if it already is)
    AwaitReady(oneshot::Sender<Result<(), SessionError>>),
    /// Send `showPopup` and resolve with the next `fillItem`
    ShowPopup {
        id: u64,
        url: String,
        reply: oneshot::Sender<Result<Item, SessionError>>,
    },
    /// Forget a pending popup request
    Cancel(u64),
}

pub(crate) struct Driver<T: Transport> {
    transport: T,
    codec: EnvelopeCodec,
    machine: AuthMachine,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
    codes: broadcast::Sender<String>,
    ready_waiters: Vec<oneshot::Sender<Result<(), SessionError>>>,
    pending: BTreeMap<u64, oneshot::Sender<Result<Item, SessionError>>>,
    settle: Pin<Box<Sleep>>,
    settle_armed: bool,
}

impl<T: Transport> Driver<T> {
    pub(crate) fn new(
        transport: T,
        codec: EnvelopeCodec,
        machine: AuthMachine,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
        state: Arc<watch::Sender<ConnectionState>>,
        codes: broadcast::Sender<String>,
    ) -> Self {
        Self {
            transport,
            codec,
            machine,
            commands,
            cancel,
            state,
            codes,
            ready_waiters: Vec::new(),
            pending: BTreeMap::new(),
            settle: Box::pin(tokio::time::sleep_until(Instant::now())),
            settle_armed: false,
        }
    }

    /// Run until the transport closes, the session is rejected or the
    /// client cancels
    pub(crate) async fn run(mut self) {
        let reason = match self.process().await {
            Ok(()) => {
                tracing::debug!("Connection driver stopped");
                SessionError::TransportClosed
            }
            Err(reason) => {
                tracing::info!(%reason, "Connection driver exiting");
                reason
            }
        };
        self.shutdown(reason).await;
    }

    async fn process(&mut self) -> Result<(), SessionError> {
        match self.machine.start() {
            Ok(actions) => self.apply(actions).await?,
            Err(e) => tracing::error!(error = %e, "Failed to build hello"),
        }

        loop {
            // Inbound messages are drained before new commands
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::debug!("Connection cancelled");
                    return Ok(());
                }

                () = &mut self.settle, if self.settle_armed => {
                    self.settle_armed = false;
                    match self.machine.authenticate() {
                        Ok(actions) => self.apply(actions).await?,
                        Err(e) => tracing::error!(error = %e, "Failed to start challenge exchange"),
                    }
                }

                incoming = self.transport.recv() => match incoming {
                    Some(Ok(text)) => self.on_message(&text).await?,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Transport failure");
                        return Err(SessionError::TransportClosed);
                    }
                    None => {
                        tracing::info!("Companion closed the connection");
                        return Err(SessionError::TransportClosed);
                    }
                },

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await?,
                    None => return Ok(()),
                },
            }

            self.publish_state();
        }
    }

    async fn on_message(&mut self, text: &str) -> Result<(), SessionError> {
        let envelope = match self.codec.decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed message");
                return Ok(());
            }
        };

        tracing::debug!(
            action = %envelope.action,
            state = %self.machine.state(),
            "Received message"
        );

        if envelope.action.is_handshake() {
            return match self.machine.handle(&envelope) {
                Ok(actions) => self.apply(actions).await,
                Err(e) => {
                    tracing::warn!(
                        action = %envelope.action,
                        error = %e,
                        "Dropping handshake message"
                    );
                    Ok(())
                }
            };
        }

        self.on_application(envelope);
        Ok(())
    }

    fn on_application(&mut self, envelope: InboundEnvelope) {
        let action = envelope.action;
        let payload = match self.machine.unprotect(envelope.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%action, error = %e, "Dropping message that failed integrity check");
                return;
            }
        };

        match action {
            Action::FillItem => {
                let fill: FillItemPayload = match serde_json::from_value(payload) {
                    Ok(fill) => fill,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping invalid fillItem");
                        return;
                    }
                };

                match self.pending.pop_first() {
                    Some((id, reply)) => {
                        if reply.send(Ok(fill.item)).is_err() {
                            tracing::debug!(id, "Requester went away before fillItem");
                        }
                    }
                    None => tracing::warn!("fillItem with no request pending, dropping"),
                }
            }
            other => tracing::debug!(action = %other, "Ignoring message"),
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<(), SessionError> {
        match command {
            Command::AwaitReady(reply) => {
                if self.machine.state() == ConnectionState::Ready {
                    let _ = reply.send(Ok(()));
                } else {
                    // Callers that timed out have dropped their receiver
                    self.ready_waiters.retain(|waiter| !waiter.is_closed());
                    self.ready_waiters.push(reply);
                }
            }
            Command::ShowPopup { id, url, reply } => {
                if self.machine.state() != ConnectionState::Ready {
                    let _ = reply.send(Err(SessionError::NotConnected));
                    return Ok(());
                }

                let popup = ShowPopupPayload {
                    url,
                    options: PopupOptions::default(),
                };
                let text = match serde_json::to_value(&popup)
                    .map_err(|e| SessionError::Encoding(e.to_string()))
                    .and_then(|payload| self.prepare(&Action::ShowPopup, payload))
                {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(id, error = %e, "Failed to build showPopup");
                        let _ = reply.send(Err(e));
                        return Ok(());
                    }
                };

                tracing::debug!(id, "Requesting popup");
                if let Err(e) = self.deliver(&Action::ShowPopup, text).await {
                    let _ = reply.send(Err(e.clone()));
                    return Err(e);
                }
                self.pending.insert(id, reply);
            }
            Command::Cancel(id) => {
                if self.pending.remove(&id).is_some() {
                    tracing::debug!(id, "Request cancelled");
                }
            }
        }
        Ok(())
    }

    async fn apply(&mut self, actions: Vec<AuthAction>) -> Result<(), SessionError> {
        for action in actions {
            match action {
                AuthAction::Send { action, payload } => self.send(action, payload).await?,
                AuthAction::ScheduleBegin(delay) => {
                    self.settle.as_mut().reset(Instant::now() + delay);
                    self.settle_armed = true;
                }
                AuthAction::VerificationCode(code) => {
                    tracing::info!(%code, "Companion shows verification code");
                    // No subscribers is fine
                    let _ = self.codes.send(code);
                }
                AuthAction::Ready => {
                    self.publish_state();
                    for waiter in self.ready_waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                }
                AuthAction::Rejected(reason) => {
                    return Err(SessionError::ConnectionRejected(reason));
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, action: Action, payload: Value) -> Result<(), SessionError> {
        if action == Action::AuthBegin {
            // A fresh challenge supersedes the one the settle timer would start
            self.settle_armed = false;
        }

        match self.prepare(&action, payload) {
            Ok(text) => self.deliver(&action, text).await,
            Err(e) => {
                tracing::error!(%action, error = %e, "Dropping outbound message");
                Ok(())
            }
        }
    }

    /// Protect and encode an outbound message
    fn prepare(&mut self, action: &Action, payload: Value) -> Result<String, SessionError> {
        let payload = self
            .machine
            .protect(payload)
            .map_err(|e| SessionError::Encoding(e.to_string()))?;
        self.codec
            .encode(action, &payload)
            .map_err(|e| SessionError::Encoding(e.to_string()))
    }

    async fn deliver(&mut self, action: &Action, text: String) -> Result<(), SessionError> {
        tracing::trace!(%action, number = self.codec.next_number() - 1, "Sending message");
        self.transport.send(text).await.map_err(|e| {
            tracing::warn!(%action, error = %e, "Send failed");
            SessionError::TransportClosed
        })
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(from = %current, to = %state, "Connection state changed");
                *current = state;
                true
            }
        });
    }

    async fn shutdown(&mut self, reason: SessionError) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "Error closing transport");
        }
        self.machine.reset();
        self.settle_armed = false;
        self.publish_state();

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::AwaitReady(reply) => {
                    let _ = reply.send(Err(reason.clone()));
                }
                Command::ShowPopup { reply, .. } => {
                    let _ = reply.send(Err(reason.clone()));
                }
                Command::Cancel(_) => {}
            }
        }

        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(reason.clone()));
        }
        for (_, reply) in std::mem::take(&mut self.pending) {
            let _ = reply.send(Err(reason.clone()));
        }
    }
}
