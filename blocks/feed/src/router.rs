use feedline_atoms::backend::IdentityProvider;
use feedline_atoms::users::Session;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    // Authenticated tree
    AddPost,
    Home,
    Profile,
    // Unauthenticated tree
    Welcome,
    SignIn,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::AddPost => "/add-post",
            Route::Home => "/home",
            Route::Profile => "/profile",
            Route::Welcome => "/",
            Route::SignIn => "/signin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Render(Route),
    Redirect(&'static str),
}

/// Which set of routes is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTree {
    Authenticated,
    Unauthenticated,
}

impl RouteTree {
    pub fn for_session(session: Option<&Session>) -> Self {
        match session {
            Some(_) => RouteTree::Authenticated,
            None => RouteTree::Unauthenticated,
        }
    }

    /// Resolve a path by its first segment. Unknown paths redirect to the
    /// tree's landing route.
    pub fn resolve(self, path: &str) -> Resolution {
        let first = path.split('/').find(|s| !s.is_empty()).unwrap_or("");

        match (self, first) {
            (RouteTree::Authenticated, "add-post") => Resolution::Render(Route::AddPost),
            (RouteTree::Authenticated, "home") => Resolution::Render(Route::Home),
            (RouteTree::Authenticated, "profile") => Resolution::Render(Route::Profile),
            (RouteTree::Authenticated, _) => Resolution::Redirect(Route::AddPost.path()),
            (RouteTree::Unauthenticated, "") => Resolution::Render(Route::Welcome),
            (RouteTree::Unauthenticated, "signin") => Resolution::Render(Route::SignIn),
            (RouteTree::Unauthenticated, _) => Resolution::Redirect(Route::Welcome.path()),
        }
    }

    /// Entries of the bottom tab bar, which only signed-in users see.
    pub fn tabs(self) -> &'static [Route] {
        match self {
            RouteTree::Authenticated => &[Route::AddPost, Route::Home, Route::Profile],
            RouteTree::Unauthenticated => &[],
        }
    }
}

/// Top-level gate: tracks the provider's current session and picks the
/// route tree from it.
pub struct SessionRouter {
    sessions: watch::Receiver<Option<Session>>,
    current: Option<Session>,
}

impl SessionRouter {
    pub fn new(provider: &dyn IdentityProvider) -> Self {
        let mut sessions = provider.subscribe();
        let current = sessions.borrow_and_update().clone();
        Self { sessions, current }
    }

    pub fn session(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn tree(&self) -> RouteTree {
        RouteTree::for_session(self.current.as_ref())
    }

    pub fn resolve(&self, path: &str) -> Resolution {
        self.tree().resolve(path)
    }

    /// Wait for the next session notification and return the tree it
    /// selects. A closed provider channel counts as signed out and returns
    /// `None`; there is nothing left to wait for.
    pub async fn changed(&mut self) -> Option<RouteTree> {
        match self.sessions.changed().await {
            Ok(()) => {
                self.current = self.sessions.borrow_and_update().clone();
                tracing::debug!(
                    "session changed, authenticated={}",
                    self.current.is_some()
                );
                Some(self.tree())
            }
            Err(_) => {
                tracing::warn!("identity provider channel closed, treating as signed out");
                self.current = None;
                None
            }
        }
    }
}
