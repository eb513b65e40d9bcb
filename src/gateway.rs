use std::sync::Arc;

use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::TokenStore;
use crate::error::ClientError;
use crate::navigation::{Navigator, View};
use crate::session::SessionState;

/// Joins a base URL and a path segment without doubling or dropping slashes.
pub fn endpoint(base: &str, path: &str) -> Result<Url, ClientError> {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let joined = if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    };
    Url::parse(&joined).map_err(|e| ClientError::Config(format!("invalid URL {joined:?}: {e}")))
}

pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Every outbound request goes through here: the stored bearer token is
/// attached, and a 401 on any request ends the session.
pub struct HttpGateway {
    client: Client,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    session: SessionState,
}

impl HttpGateway {
    pub fn new(
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        session: SessionState,
    ) -> Result<Self, ClientError> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, store, navigator, session))
    }

    pub fn with_client(
        client: Client,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        session: SessionState,
    ) -> Self {
        HttpGateway {
            client,
            store,
            navigator,
            session,
        }
    }

    /// Session this gateway tears down on a 401.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub async fn get(&self, url: Url) -> Result<Value, ClientError> {
        self.send::<()>(Method::GET, url, None).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<Value, ClientError> {
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<Value, ClientError> {
        self.send(Method::PUT, url, Some(body)).await
    }

    pub async fn delete(&self, url: Url) -> Result<Value, ClientError> {
        self.send::<()>(Method::DELETE, url, None).await
    }

    /// Sends one request. A successful response yields its JSON body
    /// (`Null` when empty, a string when it is not JSON). Non-2xx responses
    /// come back as errors carrying the status and body untouched.
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Value, ClientError> {
        // Read per request so a login or logout is seen by the next call.
        let token = self.store.read()?;

        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(%method, path = url.path(), authenticated = token.is_some(), "Sending request");
        let response = request.send().await.inspect_err(|e| {
            warn!(%method, path = url.path(), error = %e, "Request failed to complete");
        })?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let payload = parse_body(&bytes);

        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized();
            return Err(ClientError::Unauthorized { body: payload });
        }
        if !status.is_success() {
            debug!(%method, path = url.path(), %status, "Request rejected");
            return Err(ClientError::Status {
                status,
                body: payload,
            });
        }

        Ok(payload.unwrap_or(Value::Null))
    }

    fn handle_unauthorized(&self) {
        warn!("Server rejected the session token, logging out");
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Failed to clear stored token");
        }
        self.session.teardown();

        if self.navigator.current() != View::Login {
            info!("Redirecting to login");
            self.navigator.navigate(View::Login);
        }
    }
}

fn parse_body(bytes: &[u8]) -> Option<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(
        serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    )
}
