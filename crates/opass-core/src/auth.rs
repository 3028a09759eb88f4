//! Authentication state machine
//!
//! Drives registration and the challenge-response handshake with the
//! companion, and owns the session keys once they are agreed.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods take decoded inbound envelopes, never touch the transport
//! - Methods return `Result<Vec<AuthAction>, AuthError>`
//! - The driver executes actions (send, arm the settle timer, notify)
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ hello  ┌─────────────────┐ authNew ┌─────────────┐
//! │ Disconnected │───────>│ AwaitingWelcome │────────>│ Registering │<─┐
//! └──────────────┘        └─────────────────┘         └─────────────┘  │
//!                                 │ authBegin               │          │ authFail
//!                                 │                         │ authRegistered
//!                                 ↓                         ↓ (+ settle)
//!                         ┌────────────────┐  authContinue  ┌───────┐  │
//!                         │ Authenticating │───────────────>│ Ready │  │
//!                         └────────────────┘  + welcome     └───────┘  │
//!                                 └────────────────────────────────────┘
//! ```
//!
//! `Ready` with session keys is the only state in which application
//! payloads are encrypted. The legacy protocol variant has no handshake and
//! goes straight from `AwaitingWelcome` to `Ready` on the first `welcome`.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use opass_protocol::message::{
    AuthBeginPayload, AuthContinuePayload, AuthFailPayload, AuthNewPayload, AuthRegisterPayload,
    AuthVerifyPayload, HelloPayload, WelcomePayload,
};
use opass_protocol::{
    base64, Action, InboundEnvelope, ProtocolError, AUTH_METHOD, BAD_MAC, CIPHER_ALG,
};

use crate::config::{ClientConfig, ProtocolVariant};
use crate::credentials::CredentialPair;
use crate::crypto::kdf::{constant_time_eq, derive, SessionKeys};
use crate::crypto::envelope;
use crate::error::{AuthError, CryptoError};

/// Exclusive upper bound of the numeric client challenge
const CHALLENGE_BOUND: u32 = 1_000_000_000;

/// Connection state as seen by the session client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Transport being opened
    Connecting,
    /// `hello` sent, waiting for the companion to react
    AwaitingWelcome,
    /// Shared secret sent, waiting for `authRegistered`
    Registering,
    /// `authBegin` sent, challenge exchange in progress
    Authenticating,
    /// Session usable for application requests
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::AwaitingWelcome => write!(f, "awaiting-welcome"),
            ConnectionState::Registering => write!(f, "registering"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Ready => write!(f, "ready"),
        }
    }
}

/// Actions returned by the state machine for the driver to execute
#[derive(Debug, Clone, PartialEq)]
pub enum AuthAction {
    /// Send this message (through the envelope, then the codec)
    Send { action: Action, payload: Value },
    /// Call [`AuthMachine::authenticate`] after this delay
    ScheduleBegin(Duration),
    /// Show this registration code to the user
    VerificationCode(String),
    /// The session is ready for application requests
    Ready,
    /// The companion refused the client for a non-recoverable reason
    Rejected(String),
}

/// Handshake state machine for one connection
pub struct AuthMachine {
    state: ConnectionState,
    credentials: CredentialPair,
    variant: ProtocolVariant,
    client_version: String,
    settle_delay: Duration,
    /// Client challenge of the attempt in progress
    client_challenge: Option<Vec<u8>>,
    /// Keys agreed by the last successful `authContinue`
    keys: Option<SessionKeys>,
    authenticated: bool,
}

impl AuthMachine {
    /// Create a machine for the given credentials and configuration
    pub fn new(credentials: CredentialPair, config: &ClientConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            credentials,
            variant: config.variant,
            client_version: config.client_version(),
            settle_delay: config.settle_delay,
            client_challenge: None,
            keys: None,
            authenticated: false,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether application payloads are encrypted
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Credentials this machine authenticates with
    pub fn credentials(&self) -> &CredentialPair {
        &self.credentials
    }

    /// Session keys, only while authenticated
    pub fn session_keys(&self) -> Option<&SessionKeys> {
        if self.authenticated {
            self.keys.as_ref()
        } else {
            None
        }
    }

    /// Forget keys and challenge and return to `Disconnected`
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.client_challenge = None;
        self.keys = None;
        self.authenticated = false;
    }

    /// Mark the transport as being opened
    pub fn connecting(&mut self) {
        self.reset();
        self.state = ConnectionState::Connecting;
    }

    /// Greet the companion once the transport is open
    pub fn start(&mut self) -> Result<Vec<AuthAction>, AuthError> {
        self.reset();
        self.state = ConnectionState::AwaitingWelcome;

        let capabilities = self
            .variant
            .requires_handshake()
            .then(|| vec![AUTH_METHOD.to_string(), CIPHER_ALG.to_string()]);
        let hello = HelloPayload {
            version: self.client_version.clone(),
            capabilities,
        };

        tracing::debug!(variant = ?self.variant, "Sending hello");
        Ok(vec![send(Action::Hello, &hello)?])
    }

    /// Start a fresh challenge exchange
    pub fn authenticate(&mut self) -> Result<Vec<AuthAction>, AuthError> {
        if self.state == ConnectionState::Disconnected {
            tracing::debug!("Ignoring authenticate on a closed connection");
            return Ok(vec![]);
        }

        let challenge = rand::thread_rng().gen_range(0..CHALLENGE_BOUND).to_string();
        let cc = challenge.into_bytes();

        let begin = AuthBeginPayload {
            ext_id: self.credentials.client_id.clone(),
            method: AUTH_METHOD.to_string(),
            alg: CIPHER_ALG.to_string(),
            cc: base64::encode(&cc),
        };

        self.keys = None;
        self.authenticated = false;
        self.client_challenge = Some(cc);
        self.state = ConnectionState::Authenticating;

        tracing::debug!("Starting challenge exchange");
        Ok(vec![send(Action::AuthBegin, &begin)?])
    }

    /// Feed one decoded inbound handshake envelope
    pub fn handle(&mut self, envelope: &InboundEnvelope) -> Result<Vec<AuthAction>, AuthError> {
        use ConnectionState as S;

        if self.state == S::Disconnected || self.state == S::Connecting {
            tracing::warn!(
                action = %envelope.action,
                state = %self.state,
                "Handshake message before hello, ignoring"
            );
            return Ok(vec![]);
        }

        if !self.variant.requires_handshake() {
            return match envelope.action {
                Action::Welcome => self.on_welcome(envelope),
                _ => {
                    tracing::debug!(
                        action = %envelope.action,
                        "Ignoring handshake message in legacy mode"
                    );
                    Ok(vec![])
                }
            };
        }

        match (self.state, &envelope.action) {
            (_, Action::Welcome) => self.on_welcome(envelope),
            (S::AwaitingWelcome | S::Registering | S::Authenticating, Action::AuthNew) => {
                self.on_auth_new(envelope)
            }
            (S::Registering, Action::AuthRegistered) => {
                tracing::debug!(delay = ?self.settle_delay, "Registered, scheduling authBegin");
                Ok(vec![AuthAction::ScheduleBegin(self.settle_delay)])
            }
            (_, Action::AuthBegin) => self.authenticate(),
            (S::Authenticating, Action::AuthContinue) => self.on_auth_continue(envelope),
            (_, Action::AuthFail) => self.on_auth_fail(envelope),
            (state, action) => {
                tracing::warn!(%action, %state, "Unexpected handshake message, ignoring");
                Ok(vec![])
            }
        }
    }

    /// Protect an outbound application payload
    ///
    /// The legacy variant never tags payloads with the client id.
    pub fn protect(&self, payload: Value) -> Result<Value, CryptoError> {
        let client_id = self
            .variant
            .requires_handshake()
            .then_some(self.credentials.client_id.as_str());
        envelope::protect(payload, self.session_keys(), client_id)
    }

    /// Unprotect an inbound application payload
    pub fn unprotect(&self, payload: Value) -> Result<Value, CryptoError> {
        envelope::unprotect(payload, self.session_keys())
    }

    fn on_welcome(&mut self, envelope: &InboundEnvelope) -> Result<Vec<AuthAction>, AuthError> {
        if !self.variant.requires_handshake() {
            self.state = ConnectionState::Ready;
            tracing::info!("Companion ready (legacy protocol)");
            return Ok(vec![AuthAction::Ready]);
        }

        let welcome: WelcomePayload = if envelope.payload.is_null() {
            WelcomePayload::default()
        } else {
            envelope.payload_as()?
        };

        match welcome.alg {
            None => {
                tracing::debug!(state = %self.state, "Welcome without alg, handshake pending");
                Ok(vec![])
            }
            Some(alg) if alg != CIPHER_ALG => {
                tracing::warn!(%alg, "Companion selected an unsupported algorithm");
                Ok(vec![AuthAction::Rejected(format!("unsupported algorithm {alg}"))])
            }
            Some(_) if self.keys.is_none() => {
                tracing::warn!("Welcome with alg before key agreement, ignoring");
                Ok(vec![])
            }
            Some(_) => {
                self.authenticated = true;
                self.state = ConnectionState::Ready;
                tracing::info!("Session authenticated");
                Ok(vec![AuthAction::Ready])
            }
        }
    }

    fn on_auth_new(&mut self, envelope: &InboundEnvelope) -> Result<Vec<AuthAction>, AuthError> {
        let AuthNewPayload { code } = envelope.payload_as()?;
        tracing::info!("Companion requested registration");

        let register = self.register()?;
        Ok(vec![AuthAction::VerificationCode(code), register])
    }

    fn on_auth_continue(
        &mut self,
        envelope: &InboundEnvelope,
    ) -> Result<Vec<AuthAction>, AuthError> {
        let payload: AuthContinuePayload = envelope.payload_as()?;
        let cc = self
            .client_challenge
            .take()
            .ok_or(AuthError::NoPendingChallenge)?;
        let cs = base64::decode(&payload.cs)?;
        let received_m3 = base64::decode(&payload.m3)?;

        let keys = derive(self.credentials.secret_bytes(), &cc, &cs)?;

        if !constant_time_eq(&keys.m3, &received_m3) {
            tracing::warn!("Companion verification token mismatch");
            self.keys = None;
            self.authenticated = false;
            let fail = AuthFailPayload {
                reason: BAD_MAC.to_string(),
            };
            return Ok(vec![send(Action::AuthFail, &fail)?]);
        }

        let verify = AuthVerifyPayload {
            method: AUTH_METHOD.to_string(),
            m4: base64::encode(keys.m4),
        };
        self.keys = Some(keys);

        tracing::debug!("Companion verified, sending authVerify");
        Ok(vec![send(Action::AuthVerify, &verify)?])
    }

    fn on_auth_fail(&mut self, envelope: &InboundEnvelope) -> Result<Vec<AuthAction>, AuthError> {
        let AuthFailPayload { reason } = if envelope.payload.is_null() {
            AuthFailPayload {
                reason: String::new(),
            }
        } else {
            envelope.payload_as()?
        };

        self.keys = None;
        self.client_challenge = None;
        self.authenticated = false;

        if reason == BAD_MAC {
            tracing::info!("Companion rejected our token, re-registering");
            return Ok(vec![self.register()?]);
        }

        tracing::warn!(%reason, "Companion rejected authentication");
        Ok(vec![AuthAction::Rejected(reason)])
    }

    fn register(&mut self) -> Result<AuthAction, AuthError> {
        self.state = ConnectionState::Registering;
        let register = AuthRegisterPayload {
            method: AUTH_METHOD.to_string(),
            secret: base64::encode(self.credentials.secret_bytes()),
        };
        send(Action::AuthRegister, &register)
    }
}

impl fmt::Debug for AuthMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMachine")
            .field("state", &self.state)
            .field("variant", &self.variant)
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}

fn send<T: Serialize>(action: Action, payload: &T) -> Result<AuthAction, AuthError> {
    let payload = serde_json::to_value(payload).map_err(ProtocolError::from)?;
    Ok(AuthAction::Send { action, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn machine() -> AuthMachine {
        let config = ClientConfig::default();
        AuthMachine::new(CredentialPair::new("client-1", "secret-1"), &config)
    }

    fn inbound(action: Action, payload: Value) -> InboundEnvelope {
        InboundEnvelope::new(action, payload)
    }

    fn sent(actions: &[AuthAction]) -> Vec<(Action, Value)> {
        actions
            .iter()
            .filter_map(|a| match a {
                AuthAction::Send { action, payload } => Some((action.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Run the handshake up to the point where authBegin was sent, returning cc
    fn begin(m: &mut AuthMachine) -> Vec<u8> {
        m.start().unwrap();
        let actions = m.handle(&inbound(Action::AuthBegin, Value::Null)).unwrap();
        let (action, payload) = sent(&actions).remove(0);
        assert_eq!(action, Action::AuthBegin);
        base64::decode(payload["cc"].as_str().unwrap()).unwrap()
    }

    fn auth_continue(m: &mut AuthMachine, cc: &[u8], secret: &[u8]) -> Vec<AuthAction> {
        let cs = b"server-challenge";
        let keys = derive(secret, cc, cs).unwrap();
        m.handle(&inbound(
            Action::AuthContinue,
            json!({"cs": base64::encode(cs), "M3": base64::encode(keys.m3)}),
        ))
        .unwrap()
    }

    #[test]
    fn test_start_sends_hello_with_capabilities() {
        let mut m = machine();
        let actions = m.start().unwrap();
        assert_eq!(m.state(), ConnectionState::AwaitingWelcome);

        let (action, payload) = sent(&actions).remove(0);
        assert_eq!(action, Action::Hello);
        assert_eq!(payload["capabilities"], json!([AUTH_METHOD, CIPHER_ALG]));
        assert_eq!(payload["version"], json!("4.7.2.90"));
    }

    #[test]
    fn test_auth_new_registers_and_surfaces_code() {
        let mut m = machine();
        m.start().unwrap();

        let actions = m
            .handle(&inbound(Action::AuthNew, json!({"code": "1234"})))
            .unwrap();
        assert_eq!(actions[0], AuthAction::VerificationCode("1234".to_string()));
        assert_eq!(m.state(), ConnectionState::Registering);

        let (action, payload) = sent(&actions).remove(0);
        assert_eq!(action, Action::AuthRegister);
        assert_eq!(payload["method"], json!(AUTH_METHOD));
        assert_eq!(
            base64::decode(payload["secret"].as_str().unwrap()).unwrap(),
            b"secret-1"
        );
    }

    #[test]
    fn test_registered_schedules_begin() {
        let mut m = machine();
        m.start().unwrap();
        m.handle(&inbound(Action::AuthNew, json!({"code": "1"}))).unwrap();

        let actions = m
            .handle(&inbound(Action::AuthRegistered, Value::Null))
            .unwrap();
        assert_eq!(
            actions,
            vec![AuthAction::ScheduleBegin(Duration::from_millis(500))]
        );
    }

    #[test]
    fn test_authenticate_generates_numeric_challenge() {
        let mut m = machine();
        let cc = begin(&mut m);
        let text = String::from_utf8(cc).unwrap();
        let value: u32 = text.parse().unwrap();
        assert!(value < CHALLENGE_BOUND);
        assert_eq!(m.state(), ConnectionState::Authenticating);
    }

    #[test]
    fn test_auth_begin_payload_fields() {
        let mut m = machine();
        m.start().unwrap();
        let actions = m.authenticate().unwrap();
        let (_, payload) = sent(&actions).remove(0);
        assert_eq!(payload["extId"], json!("client-1"));
        assert_eq!(payload["method"], json!(AUTH_METHOD));
        assert_eq!(payload["alg"], json!(CIPHER_ALG));
    }

    #[test]
    fn test_full_handshake() {
        let mut m = machine();
        let cc = begin(&mut m);

        let actions = auth_continue(&mut m, &cc, b"secret-1");
        let (action, payload) = sent(&actions).remove(0);
        assert_eq!(action, Action::AuthVerify);

        let expected = derive(b"secret-1", &cc, b"server-challenge").unwrap();
        assert_eq!(payload["M4"], json!(base64::encode(expected.m4)));
        assert!(!m.is_authenticated());
        assert!(m.session_keys().is_none());

        let actions = m
            .handle(&inbound(Action::Welcome, json!({"alg": CIPHER_ALG})))
            .unwrap();
        assert_eq!(actions, vec![AuthAction::Ready]);
        assert!(m.is_authenticated());
        assert_eq!(m.state(), ConnectionState::Ready);
        assert_eq!(m.session_keys(), Some(&expected));
    }

    #[test]
    fn test_bad_mac_sends_auth_fail() {
        let mut m = machine();
        let cc = begin(&mut m);

        let actions = auth_continue(&mut m, &cc, b"wrong-secret");
        let (action, payload) = sent(&actions).remove(0);
        assert_eq!(action, Action::AuthFail);
        assert_eq!(payload, json!({"reason": BAD_MAC}));

        // A welcome now must not authenticate: no keys were retained
        m.handle(&inbound(Action::Welcome, json!({"alg": CIPHER_ALG}))).unwrap();
        assert!(!m.is_authenticated());
    }

    #[test]
    fn test_peer_bad_mac_reregisters() {
        let mut m = machine();
        let cc = begin(&mut m);
        auth_continue(&mut m, &cc, b"secret-1");

        let actions = m
            .handle(&inbound(Action::AuthFail, json!({"reason": BAD_MAC})))
            .unwrap();
        let (action, _) = sent(&actions).remove(0);
        assert_eq!(action, Action::AuthRegister);
        assert_eq!(m.state(), ConnectionState::Registering);
        assert!(m.session_keys().is_none());
    }

    #[test]
    fn test_other_auth_fail_rejects() {
        let mut m = machine();
        m.start().unwrap();
        let actions = m
            .handle(&inbound(Action::AuthFail, json!({"reason": "denied"})))
            .unwrap();
        assert_eq!(actions, vec![AuthAction::Rejected("denied".to_string())]);
    }

    #[test]
    fn test_continue_without_challenge_is_error() {
        let mut m = machine();
        let cc = begin(&mut m);
        auth_continue(&mut m, &cc, b"secret-1");

        // The challenge is single-use
        let result = m.handle(&inbound(
            Action::AuthContinue,
            json!({"cs": "AA", "M3": "AA"}),
        ));
        assert!(matches!(result, Err(AuthError::NoPendingChallenge)));
    }

    #[test]
    fn test_unexpected_transition_ignored() {
        let mut m = machine();
        m.start().unwrap();
        let actions = m
            .handle(&inbound(Action::AuthRegistered, Value::Null))
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(m.state(), ConnectionState::AwaitingWelcome);
    }

    #[test]
    fn test_messages_before_start_ignored() {
        let mut m = machine();
        let actions = m
            .handle(&inbound(Action::AuthNew, json!({"code": "1"})))
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_welcome_without_alg_keeps_waiting() {
        let mut m = machine();
        m.start().unwrap();
        let actions = m.handle(&inbound(Action::Welcome, json!({}))).unwrap();
        assert!(actions.is_empty());
        assert!(!m.is_authenticated());
    }

    #[test]
    fn test_legacy_welcome_is_ready_without_encryption() {
        let mut config = ClientConfig::default();
        config.variant = ProtocolVariant::Legacy;
        let mut m = AuthMachine::new(CredentialPair::new("c", "s"), &config);

        let actions = m.start().unwrap();
        let (_, hello) = sent(&actions).remove(0);
        assert_eq!(hello, json!({"version": "4.2.4.90"}));

        let actions = m.handle(&inbound(Action::Welcome, json!({}))).unwrap();
        assert_eq!(actions, vec![AuthAction::Ready]);
        assert_eq!(m.state(), ConnectionState::Ready);
        assert!(!m.is_authenticated());

        let plain = m.protect(json!({"url": "x"})).unwrap();
        assert_eq!(plain, json!({"url": "x"}));
    }

    #[test]
    fn test_reset_drops_keys() {
        let mut m = machine();
        let cc = begin(&mut m);
        auth_continue(&mut m, &cc, b"secret-1");
        m.handle(&inbound(Action::Welcome, json!({"alg": CIPHER_ALG}))).unwrap();
        assert!(m.is_authenticated());

        m.reset();
        assert!(!m.is_authenticated());
        assert!(m.session_keys().is_none());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_protect_follows_authentication() {
        let mut m = machine();
        m.start().unwrap();
        let plain = m.protect(json!({"url": "x"})).unwrap();
        assert_eq!(plain, json!({"url": "x", "clientId": "client-1"}));

        let cc = begin(&mut m);
        auth_continue(&mut m, &cc, b"secret-1");
        m.handle(&inbound(Action::Welcome, json!({"alg": CIPHER_ALG}))).unwrap();

        let sealed = m.protect(json!({"url": "x"})).unwrap();
        assert_eq!(sealed["alg"], json!(CIPHER_ALG));
        assert_eq!(m.unprotect(sealed).unwrap(), json!({"url": "x"}));
    }
}
