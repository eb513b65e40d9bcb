use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ClientError;

pub const DEFAULT_AUTH_URL: &str = "http://localhost:8081/api/auth";
pub const DEFAULT_TASK_URL: &str = "http://localhost:8082/api/tasks";
pub const DEFAULT_TOKEN_DB: &str = "taskflow.db";

/// Where task filtering happens. A deployment picks one; the controller never
/// switches between them at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMode {
    /// `status`/`priority` are sent as query parameters and the response is
    /// shown as-is.
    #[default]
    Server,
    /// The full list is fetched and filtered locally.
    Client,
}

impl FromStr for FilterMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(FilterMode::Server),
            "client" => Ok(FilterMode::Client),
            other => Err(ClientError::Config(format!(
                "unknown filter mode {other:?}, expected \"server\" or \"client\""
            ))),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterMode::Server => "server",
            FilterMode::Client => "client",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub auth_url: String,
    pub task_url: String,
    pub token_db: PathBuf,
    pub filter_mode: FilterMode,
}

impl Config {
    pub fn new(auth_url: impl Into<String>, task_url: impl Into<String>) -> Self {
        Config {
            auth_url: normalize_url(auth_url.into()),
            task_url: normalize_url(task_url.into()),
            token_db: PathBuf::from(DEFAULT_TOKEN_DB),
            filter_mode: FilterMode::default(),
        }
    }

    pub fn with_token_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_db = path.into();
        self
    }

    pub fn with_filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_AUTH_URL, DEFAULT_TASK_URL)
    }
}

fn normalize_url(url: String) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed.to_string()
}
