pub mod claims;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod navigation;
pub mod profile;
pub mod session;
pub mod tasks;

use std::sync::Arc;

use config::Config;
use db::TokenStore;
use error::ClientError;
use gateway::HttpGateway;
use navigation::{Router, View};
use profile::ProfileClient;
use session::{SessionManager, SessionState};
use tasks::TaskSyncController;

/// Root of the client: one session, one task mirror, one router, all sharing
/// a single gateway and token store.
pub struct TaskflowApp {
    pub session: SessionManager,
    pub tasks: TaskSyncController,
    pub profile: ProfileClient,
    pub router: Arc<Router>,
}

impl TaskflowApp {
    /// Builds the app and rehydrates any stored session.
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self, ClientError> {
        Self::with_router(config, store, Arc::new(Router::new(View::Login)))
    }

    pub fn with_router(
        config: &Config,
        store: Arc<dyn TokenStore>,
        router: Arc<Router>,
    ) -> Result<Self, ClientError> {
        let state = SessionState::new();
        let gateway = Arc::new(HttpGateway::new(
            store.clone(),
            router.clone(),
            state.clone(),
        )?);

        let session = SessionManager::new(gateway.clone(), store, state, &config.auth_url);
        session.restore()?;

        tracing::info!(
            auth_url = %config.auth_url,
            task_url = %config.task_url,
            filter_mode = %config.filter_mode,
            "Client ready"
        );

        Ok(TaskflowApp {
            tasks: TaskSyncController::new(gateway.clone(), &config.task_url, config.filter_mode),
            profile: ProfileClient::new(gateway, &config.auth_url),
            session,
            router,
        })
    }

    /// Enters `view`, subject to the login/protected-view redirects.
    pub fn enter(&self, view: View) -> View {
        self.router.enter(view, self.session.is_authenticated())
    }
}
