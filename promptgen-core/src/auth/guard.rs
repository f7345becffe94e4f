//! Route guard for protected views
//!
//! Decisions are made from the session manager's cached state only, so a
//! check never waits on the network.

use super::manager::SessionManager;
use log::debug;

pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Outcome of a navigation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Navigation cancelled; go to `to` and come back to `return_to` after login
    Redirect { to: String, return_to: String },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

#[derive(Clone)]
pub struct RouteGuard {
    session: SessionManager,
    login_route: String,
    protected: Vec<String>,
}

impl RouteGuard {
    /// Guard with the default table: `/dashboard` and `/generator` protected
    pub fn new(session: SessionManager, login_route: impl Into<String>) -> Self {
        Self {
            session,
            login_route: login_route.into(),
            protected: vec!["/dashboard".to_string(), "/generator".to_string()],
        }
    }

    /// Add a protected route prefix
    pub fn protect(mut self, prefix: impl Into<String>) -> Self {
        self.protected.push(prefix.into());
        self
    }

    pub fn is_protected(&self, path: &str) -> bool {
        let path = normalize(path);
        self.protected.iter().any(|prefix| {
            let prefix = normalize(prefix);
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
        })
    }

    /// Decide whether navigation to `path` may proceed
    pub fn check(&self, path: &str) -> GuardDecision {
        if !self.is_protected(path) || self.session.is_authenticated() {
            return GuardDecision::Allow;
        }

        debug!("Blocked navigation to {}, redirecting to {}", path, self.login_route);
        GuardDecision::Redirect {
            to: self.login_route.clone(),
            return_to: path.to_string(),
        }
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryCredentialStore;
    use crate::auth::types::{AuthSession, Credentials, SessionOrigin, UserProfile};
    use crate::settings::SessionSettings;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn make_session() -> SessionManager {
        SessionManager::new(
            SessionSettings::for_api("http://127.0.0.1:9"),
            Arc::new(MemoryCredentialStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_public_routes_always_allowed() {
        let guard = RouteGuard::new(make_session(), DEFAULT_LOGIN_ROUTE);
        assert_eq!(guard.check("/login"), GuardDecision::Allow);
        assert_eq!(guard.check("/register"), GuardDecision::Allow);
        assert_eq!(guard.check("/"), GuardDecision::Allow);
    }

    #[test]
    fn test_protected_route_redirects_when_signed_out() {
        let guard = RouteGuard::new(make_session(), DEFAULT_LOGIN_ROUTE);
        assert_eq!(
            guard.check("/dashboard/history"),
            GuardDecision::Redirect {
                to: "/login".to_string(),
                return_to: "/dashboard/history".to_string(),
            }
        );
    }

    #[test]
    fn test_prefix_matching_respects_segments() {
        let guard = RouteGuard::new(make_session(), DEFAULT_LOGIN_ROUTE).protect("/settings/");
        assert!(guard.is_protected("/dashboard"));
        assert!(guard.is_protected("/dashboard/"));
        assert!(guard.is_protected("/generator?mode=fast"));
        assert!(guard.is_protected("/settings"));
        assert!(!guard.is_protected("/dashboards"));
    }

    #[tokio::test]
    async fn test_allows_when_authenticated() {
        let session = AuthSession {
            credentials: Credentials {
                access_token: "abc".to_string(),
                refresh_token: Some("r1".to_string()),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            },
            user: UserProfile {
                identifier: "user@test.com".to_string(),
                display_name: "Demo".to_string(),
                role: "user".to_string(),
                id: None,
            },
            origin: SessionOrigin::Backend,
        };
        let manager = SessionManager::new(
            SessionSettings::for_api("http://127.0.0.1:9"),
            Arc::new(MemoryCredentialStore::with_session(session)),
        )
        .unwrap();
        // Backend is unreachable; a trusted expiry keeps the session
        manager.initialize().await;

        let guard = RouteGuard::new(manager, DEFAULT_LOGIN_ROUTE);
        assert!(guard.check("/generator").is_allowed());
    }
}
