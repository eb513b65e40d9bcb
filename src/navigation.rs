use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    Register,
    Dashboard,
    Profile,
}

impl View {
    pub fn path(self) -> &'static str {
        match self {
            View::Login => "/login",
            View::Register => "/register",
            View::Dashboard => "/",
            View::Profile => "/profile",
        }
    }

    /// Views that require a session.
    pub fn is_protected(self) -> bool {
        matches!(self, View::Dashboard | View::Profile)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Whatever currently shows a view to the user.
pub trait Navigator: Send + Sync {
    fn current(&self) -> View;
    fn navigate(&self, view: View);
}

/// Number of most recent views the router keeps.
pub const HISTORY_LIMIT: usize = 32;

/// In-memory navigator that remembers the last [`HISTORY_LIMIT`] views it
/// was sent to.
pub struct Router {
    state: Mutex<RouterState>,
}

struct RouterState {
    current: View,
    history: Vec<View>,
}

impl Router {
    pub fn new(start: View) -> Self {
        Router {
            state: Mutex::new(RouterState {
                current: start,
                history: vec![start],
            }),
        }
    }

    /// Enters `view`, redirecting anonymous users away from protected views
    /// and authenticated users away from the login page. Returns the view
    /// that was actually entered.
    pub fn enter(&self, view: View, authenticated: bool) -> View {
        let target = if view.is_protected() && !authenticated {
            View::Login
        } else if view == View::Login && authenticated {
            View::Dashboard
        } else {
            view
        };
        if target != view {
            info!(requested = %view, landed = %target, "Redirected");
        }
        self.navigate(target);
        target
    }

    pub fn history(&self) -> Vec<View> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .clone()
    }
}

impl Default for Router {
    fn default() -> Self {
        Router::new(View::Login)
    }
}

impl Navigator for Router {
    fn current(&self) -> View {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
    }

    fn navigate(&self, view: View) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.current = view;
        state.history.push(view);
        if state.history.len() > HISTORY_LIMIT {
            let excess = state.history.len() - HISTORY_LIMIT;
            state.history.drain(..excess);
        }
    }
}
