#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use taskflow::config::{Config, FilterMode};
use taskflow::db::{MemoryTokenStore, TokenStore};
use taskflow::navigation::{Router as ViewRouter, View};
use taskflow::TaskflowApp;

pub const FAR_FUTURE_EXP: i64 = 9_999_999_999;

/// Builds a three-segment token whose payload is `claims`.
pub fn make_token(claims: &Value) -> String {
    format!(
        "eyJhbGciOiJIUzI1NiJ9.{}.c2lnbmF0dXJl",
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

struct User {
    password: String,
    email: String,
}

#[derive(Default)]
struct BackendState {
    users: HashMap<String, User>,
    tokens: HashMap<String, String>,
    tasks: BTreeMap<i64, Value>,
    next_id: i64,
    issued: u64,
    register_returns_token: bool,
    register_replies_text: bool,
    login_calls: usize,
    list_answers_404: bool,
    ignore_filters: bool,
    slow_status: Option<String>,
    list_queries: Vec<HashMap<String, String>>,
    auth_headers: Vec<Option<String>>,
}

/// In-process stand-in for the auth and task services.
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<Mutex<BackendState>>,
}

impl Backend {
    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.state.lock().unwrap().users.insert(
            username.to_string(),
            User {
                password: password.to_string(),
                email: format!("{username}@example.com"),
            },
        );
        self
    }

    pub fn register_returns_token(self, yes: bool) -> Self {
        self.state.lock().unwrap().register_returns_token = yes;
        self
    }

    /// Answers registrations with a plain-text confirmation.
    pub fn register_replies_text(self, yes: bool) -> Self {
        self.state.lock().unwrap().register_replies_text = yes;
        self
    }

    pub fn ignore_filters(self, yes: bool) -> Self {
        self.state.lock().unwrap().ignore_filters = yes;
        self
    }

    /// Delays list responses filtered on `status`.
    pub fn slow_status(self, status: &str) -> Self {
        self.state.lock().unwrap().slow_status = Some(status.to_string());
        self
    }

    pub fn set_list_answers_404(&self, yes: bool) {
        self.state.lock().unwrap().list_answers_404 = yes;
    }

    /// Invalidates every issued token, as an expiry or server restart would.
    pub fn revoke_all_tokens(&self) {
        self.state.lock().unwrap().tokens.clear();
    }

    pub fn insert_raw_task(&self, task: Value) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut task = task;
        task["id"] = json!(id);
        state.tasks.insert(id, task);
    }

    pub fn login_calls(&self) -> usize {
        self.state.lock().unwrap().login_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_queries.len()
    }

    pub fn list_queries(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().unwrap().list_queries.clone()
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().auth_headers.clone()
    }

    pub fn user_email(&self, username: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(username)
            .map(|u| u.email.clone())
    }

    fn issue_token(&self, username: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.issued += 1;
        let token = make_token(&json!({
            "sub": username,
            "exp": FAR_FUTURE_EXP,
            "jti": state.issued,
        }));
        state.tokens.insert(token.clone(), username.to_string());
        token
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<String, Response> {
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let mut state = self.state.lock().unwrap();
        state.auth_headers.push(header.clone());

        header
            .as_deref()
            .and_then(|h| h.strip_prefix("Bearer "))
            .and_then(|token| state.tokens.get(token).cloned())
            .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "Invalid or missing token"))
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn login(State(backend): State<Backend>, Json(req): Json<Value>) -> Response {
    let username = req["username"].as_str().unwrap_or_default().to_string();
    let password = req["password"].as_str().unwrap_or_default();

    let valid = {
        let mut state = backend.state.lock().unwrap();
        state.login_calls += 1;
        state
            .users
            .get(&username)
            .is_some_and(|u| u.password == password)
    };
    if !valid {
        return error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    }

    let token = backend.issue_token(&username);
    Json(json!({ "token": token, "username": username })).into_response()
}

async fn register(State(backend): State<Backend>, Json(req): Json<Value>) -> Response {
    let username = req["username"].as_str().unwrap_or_default().to_string();
    let email = req["email"].as_str().unwrap_or_default().to_string();
    let password = req["password"].as_str().unwrap_or_default().to_string();

    let (returns_token, replies_text) = {
        let mut state = backend.state.lock().unwrap();
        if state.users.contains_key(&username) {
            return error(StatusCode::BAD_REQUEST, "Username is already taken");
        }
        state.users.insert(username.clone(), User { password, email: email.clone() });
        (state.register_returns_token, state.register_replies_text)
    };

    if replies_text {
        (StatusCode::CREATED, "User registered successfully").into_response()
    } else if returns_token {
        let token = backend.issue_token(&username);
        (StatusCode::CREATED, Json(json!({ "token": token }))).into_response()
    } else {
        (
            StatusCode::CREATED,
            Json(json!({
                "message": "User registered successfully",
                "user": { "username": username, "email": email },
            })),
        )
            .into_response()
    }
}

async fn me(State(backend): State<Backend>, headers: HeaderMap) -> Response {
    let username = match backend.authorize(&headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let email = backend.user_email(&username).unwrap_or_default();
    Json(json!({ "username": username, "email": email })).into_response()
}

async fn update_email(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> Response {
    let username = match backend.authorize(&headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let Some(new_email) = req["newEmail"].as_str() else {
        return error(StatusCode::BAD_REQUEST, "newEmail is required");
    };
    if let Some(user) = backend.state.lock().unwrap().users.get_mut(&username) {
        user.email = new_email.to_string();
    }
    Json(json!({ "message": "Email updated" })).into_response()
}

async fn change_password(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> Response {
    let username = match backend.authorize(&headers) {
        Ok(username) => username,
        Err(resp) => return resp,
    };
    let old = req["oldPassword"].as_str().unwrap_or_default();
    let new = req["newPassword"].as_str().unwrap_or_default();

    let mut state = backend.state.lock().unwrap();
    let Some(user) = state.users.get_mut(&username) else {
        return error(StatusCode::NOT_FOUND, "User not found");
    };
    if user.password != old {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Old password is incorrect" })),
        )
            .into_response();
    }
    user.password = new.to_string();
    Json(json!({ "message": "Password changed" })).into_response()
}

async fn list_tasks(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Err(resp) = backend.authorize(&headers) {
        return resp;
    }

    let delay = {
        let mut state = backend.state.lock().unwrap();
        state.list_queries.push(params.clone());
        state.slow_status.is_some() && params.get("status") == state.slow_status.as_ref()
    };
    if delay {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let state = backend.state.lock().unwrap();
    if state.list_answers_404 {
        return error(StatusCode::NOT_FOUND, "No tasks found");
    }

    let tasks: Vec<Value> = state
        .tasks
        .values()
        .filter(|task| {
            state.ignore_filters
                || ["status", "priority"].iter().all(|field| {
                    params
                        .get(*field)
                        .is_none_or(|wanted| task[*field].as_str() == Some(wanted.as_str()))
                })
        })
        .cloned()
        .collect();
    Json(tasks).into_response()
}

fn validate_task(req: &Value) -> Result<(), Response> {
    if req["title"].as_str().is_none_or(|t| t.trim().is_empty()) {
        return Err(error(StatusCode::BAD_REQUEST, "Title is required"));
    }
    Ok(())
}

async fn create_task(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> Response {
    if let Err(resp) = backend.authorize(&headers) {
        return resp;
    }
    if let Err(resp) = validate_task(&req) {
        return resp;
    }

    let mut state = backend.state.lock().unwrap();
    state.next_id += 1;
    let id = state.next_id;
    let mut task = req;
    task["id"] = json!(id);
    state.tasks.insert(id, task.clone());
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn get_task(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(resp) = backend.authorize(&headers) {
        return resp;
    }
    match backend.state.lock().unwrap().tasks.get(&id) {
        Some(task) => Json(task.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "Task not found"),
    }
}

async fn update_task(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<Value>,
) -> Response {
    if let Err(resp) = backend.authorize(&headers) {
        return resp;
    }
    if let Err(resp) = validate_task(&req) {
        return resp;
    }

    let mut state = backend.state.lock().unwrap();
    if !state.tasks.contains_key(&id) {
        return error(StatusCode::NOT_FOUND, "Task not found or access denied");
    }
    let mut task = req;
    task["id"] = json!(id);
    state.tasks.insert(id, task.clone());
    Json(task).into_response()
}

async fn delete_task(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(resp) = backend.authorize(&headers) {
        return resp;
    }
    match backend.state.lock().unwrap().tasks.remove(&id) {
        Some(_) => Json(json!({ "message": "Task deleted successfully" })).into_response(),
        None => error(StatusCode::NOT_FOUND, "Task not found or access denied"),
    }
}

fn routes(backend: Backend) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/me", get(me))
        .route("/api/auth/update-email", put(update_email))
        .route("/api/auth/change-password", put(change_password))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .layer(tower::ServiceBuilder::new().layer(tower_http::trace::TraceLayer::new_for_http()))
        .with_state(backend)
}

pub struct TestServer {
    pub backend: Backend,
    pub addr: String,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_backend(Backend::default().with_user("alice", "secret")).await
    }

    pub async fn with_backend(backend: Backend) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("taskflow=debug")
            .with_test_writer()
            .try_init();

        // Bind to random available port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = routes(backend.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer { backend, addr }
    }

    pub fn config(&self) -> Config {
        Config::new(
            format!("{}/api/auth", self.addr),
            format!("{}/api/tasks", self.addr),
        )
    }

    pub fn app(&self) -> TaskflowApp {
        self.app_with(Arc::new(MemoryTokenStore::new()), FilterMode::Server)
    }

    pub fn app_with(&self, store: Arc<dyn TokenStore>, mode: FilterMode) -> TaskflowApp {
        let config = self.config().with_filter_mode(mode);
        TaskflowApp::with_router(&config, store, Arc::new(ViewRouter::new(View::Login)))
            .expect("Failed to build app")
    }
}
