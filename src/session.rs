use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::claims::{self, Claims};
use crate::db::TokenStore;
use crate::error::ClientError;
use crate::gateway::{endpoint, HttpGateway};
use crate::models::{LoginRequest, RegisterForm};

pub const LOGIN_FAILED: &str = "Login failed";
pub const REGISTRATION_FAILED: &str = "Registration failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub claims: Claims,
}

impl Session {
    /// Holding a token is enough; its expiry claim is not consulted.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.claims.subject.as_deref()
    }
}

struct SessionInner {
    phase: SessionPhase,
    session: Session,
    error: Option<String>,
    generation: u64,
}

/// In-memory session shared by the session manager (writer) and the
/// gateway (which tears it down on a 401).
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Mutex<SessionInner>>,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            inner: Arc::new(Mutex::new(SessionInner {
                phase: SessionPhase::Anonymous,
                session: Session::default(),
                error: None,
                generation: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Session {
        self.lock().session.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Bumped every time the session is established or ends. State cached
    /// for one session is stale once this moves.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn begin(&self) {
        let mut inner = self.lock();
        inner.phase = SessionPhase::Authenticating;
        inner.error = None;
    }

    fn establish(&self, token: String, claims: Claims) -> Session {
        let mut inner = self.lock();
        inner.phase = SessionPhase::Authenticated;
        inner.generation += 1;
        inner.session = Session {
            token: Some(token),
            claims,
        };
        inner.error = None;
        inner.session.clone()
    }

    fn fail(&self, message: String) {
        let mut inner = self.lock();
        inner.phase = SessionPhase::Anonymous;
        inner.generation += 1;
        inner.session = Session::default();
        inner.error = Some(message);
    }

    fn reject(&self, message: String) {
        self.lock().error = Some(message);
    }

    pub(crate) fn teardown(&self) {
        let mut inner = self.lock();
        inner.phase = SessionPhase::Anonymous;
        inner.generation += 1;
        inner.session = Session::default();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionManager {
    gateway: Arc<HttpGateway>,
    store: Arc<dyn TokenStore>,
    state: SessionState,
    auth_url: String,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<HttpGateway>,
        store: Arc<dyn TokenStore>,
        state: SessionState,
        auth_url: impl Into<String>,
    ) -> Self {
        SessionManager {
            gateway,
            store,
            state,
            auth_url: auth_url.into(),
        }
    }

    /// Rehydrates the session from the token store at start-up. The stored
    /// token is trusted until the server first rejects it.
    pub fn restore(&self) -> Result<Session, ClientError> {
        match self.store.read()? {
            Some(token) => {
                let claims = decode_claims(&token);
                info!(user = ?claims.subject, "Restored stored session");
                Ok(self.state.establish(token, claims))
            }
            None => {
                debug!("No stored session");
                Ok(self.state.snapshot())
            }
        }
    }

    pub async fn login(&self, credentials: &LoginRequest) -> Result<Session, ClientError> {
        self.state.begin();
        info!(username = %credentials.username, "Logging in");

        match self.authenticate(credentials).await {
            Ok(token) => self.establish(token, LOGIN_FAILED),
            Err(err) => Err(self.fail(err, LOGIN_FAILED)),
        }
    }

    /// Registers an account. When the server hands back a token the user is
    /// logged in directly, otherwise a login request follows.
    pub async fn register(&self, form: &RegisterForm) -> Result<Session, ClientError> {
        let request = match form.validate() {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "Registration form rejected");
                self.state.reject(err.to_string());
                return Err(err);
            }
        };

        self.state.begin();
        info!(username = %request.username, "Registering");

        let outcome: Result<String, ClientError> = async {
            let url = endpoint(&self.auth_url, "register")?;
            let response = self.gateway.post(url, &request).await?;
            match extract_registration_token(&response) {
                Some(token) => {
                    debug!("Registration returned a token");
                    Ok(token)
                }
                None => {
                    debug!("Registration returned no token, logging in");
                    self.authenticate(&form.credentials()).await
                }
            }
        }
        .await;

        match outcome {
            Ok(token) => self.establish(token, REGISTRATION_FAILED),
            Err(err) => Err(self.fail(err, REGISTRATION_FAILED)),
        }
    }

    /// Ends the session locally. Never fails.
    pub fn logout(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Failed to clear stored token");
        }
        self.state.teardown();
        info!("Logged out");
    }

    pub fn session(&self) -> Session {
        self.state.snapshot()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.snapshot().is_authenticated()
    }

    /// Message from the last failed login or registration.
    pub fn last_error(&self) -> Option<String> {
        self.state.last_error()
    }

    async fn authenticate(&self, credentials: &LoginRequest) -> Result<String, ClientError> {
        let url = endpoint(&self.auth_url, "login")?;
        let response = self.gateway.post(url, credentials).await?;
        extract_token(&response)
            .ok_or_else(|| ClientError::Decode("login response carried no token".into()))
    }

    fn establish(&self, token: String, fallback: &str) -> Result<Session, ClientError> {
        if let Err(err) = self.store.save(&token) {
            return Err(self.fail(err, fallback));
        }
        let claims = decode_claims(&token);
        let session = self.state.establish(token, claims);
        info!(user = ?session.username(), "Logged in");
        Ok(session)
    }

    fn fail(&self, err: ClientError, fallback: &str) -> ClientError {
        let message = err.user_message(fallback);
        warn!(error = %err, %message, "Authentication failed");
        if let Err(clear_err) = self.store.clear() {
            warn!(error = %clear_err, "Failed to clear stored token");
        }
        self.state.fail(message);
        err
    }
}

fn decode_claims(token: &str) -> Claims {
    claims::decode(token).unwrap_or_else(|| {
        debug!("Token payload is not decodable, continuing without claims");
        Claims::default()
    })
}

/// Token from `token`, else `accessToken`, else a bare JSON string body.
fn extract_token(body: &Value) -> Option<String> {
    match body {
        Value::String(s) => non_empty(s),
        _ => extract_registration_token(body),
    }
}

/// Registration replies only count as a login when they carry a token
/// field. A plain-text body is a confirmation message, not a credential.
fn extract_registration_token(body: &Value) -> Option<String> {
    let map = body.as_object()?;
    map.get("token")
        .or_else(|| map.get("accessToken"))
        .and_then(Value::as_str)
        .and_then(non_empty)
}

fn non_empty(token: &str) -> Option<String> {
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_field_variants() {
        assert_eq!(extract_token(&json!({ "token": "a.b.c" })).as_deref(), Some("a.b.c"));
        assert_eq!(extract_token(&json!({ "accessToken": "x.y.z" })).as_deref(), Some("x.y.z"));
        assert_eq!(extract_token(&json!("raw.token.value")).as_deref(), Some("raw.token.value"));
        assert_eq!(extract_token(&json!({ "message": "User registered" })), None);
        assert_eq!(extract_token(&json!({ "token": "" })), None);
        assert_eq!(extract_token(&Value::Null), None);
    }

    #[test]
    fn registration_ignores_text_bodies() {
        assert_eq!(
            extract_registration_token(&json!("User registered successfully")),
            None
        );
        assert_eq!(
            extract_registration_token(&json!({ "accessToken": "x.y.z" })).as_deref(),
            Some("x.y.z")
        );
    }

    #[test]
    fn teardown_drops_token_and_claims() {
        let state = SessionState::new();
        state.establish(
            "a.b.c".into(),
            Claims {
                subject: Some("alice".into()),
                ..Claims::default()
            },
        );
        assert!(state.snapshot().is_authenticated());
        assert_eq!(state.phase(), SessionPhase::Authenticated);

        let generation = state.generation();
        state.teardown();
        assert_eq!(state.snapshot(), Session::default());
        assert_eq!(state.phase(), SessionPhase::Anonymous);
        assert!(state.generation() > generation);
    }
}
