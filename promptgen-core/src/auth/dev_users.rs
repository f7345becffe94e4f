//! Development login fallback
//!
//! When explicitly enabled, a login whose backend call fails with a network
//! error is checked against a local allow-list. This exists for demos and
//! offline development only. A backend that answers (any status code) is
//! always authoritative.

use super::types::{AuthSession, Credentials, LoginRequest, SessionOrigin, UserProfile};
use crate::settings::DevFallbackSettings;
use log::warn;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

const DEV_TOKEN_PREFIX: &str = "dev-";

/// Allow-listed development account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DevUser {
    pub identifier: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "super::types::default_role")]
    pub role: String,
}

/// Allow-list checker built from settings
#[derive(Debug, Clone, Default)]
pub struct DevFallback {
    enabled: bool,
    users: Vec<DevUser>,
}

impl DevFallback {
    pub fn from_settings(settings: &DevFallbackSettings) -> Self {
        if settings.enabled {
            warn!(
                "Development login fallback is ENABLED ({} allow-listed users). Do not use in production.",
                settings.users.len()
            );
        }
        Self {
            enabled: settings.enabled,
            users: settings.users.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Build a local session if the request matches an allow-listed user
    pub fn authenticate(&self, request: &LoginRequest) -> Option<AuthSession> {
        if !self.enabled {
            return None;
        }

        let user = self.users.iter().find(|u| {
            u.identifier.eq_ignore_ascii_case(&request.identifier) && u.password == request.password
        })?;

        warn!(
            "Backend unreachable: signing in {} with the DEVELOPMENT fallback",
            user.identifier
        );

        Some(AuthSession {
            credentials: Credentials {
                access_token: generate_dev_token(),
                refresh_token: None,
                expires_at: None,
            },
            user: UserProfile {
                identifier: user.identifier.clone(),
                display_name: user
                    .display_name
                    .clone()
                    .unwrap_or_else(|| user.identifier.clone()),
                role: user.role.clone(),
                id: None,
            },
            origin: SessionOrigin::DevFallback,
        })
    }
}

fn generate_dev_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    format!("{}{}", DEV_TOKEN_PREFIX, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fallback(enabled: bool) -> DevFallback {
        DevFallback::from_settings(&DevFallbackSettings {
            enabled,
            users: vec![DevUser {
                identifier: "user@test.com".to_string(),
                password: "user123".to_string(),
                display_name: Some("Demo User".to_string()),
                role: "user".to_string(),
            }],
        })
    }

    #[test]
    fn test_disabled_never_authenticates() {
        let fallback = make_fallback(false);
        assert!(fallback
            .authenticate(&LoginRequest::new("user@test.com", "user123"))
            .is_none());
    }

    #[test]
    fn test_matching_user() {
        let fallback = make_fallback(true);
        let session = fallback
            .authenticate(&LoginRequest::new("USER@test.com", "user123"))
            .unwrap();
        assert_eq!(session.origin, SessionOrigin::DevFallback);
        assert_eq!(session.user.display_name, "Demo User");
        assert!(session.credentials.access_token.starts_with(DEV_TOKEN_PREFIX));
        assert!(session.credentials.refresh_token.is_none());
    }

    #[test]
    fn test_wrong_password() {
        let fallback = make_fallback(true);
        assert!(fallback
            .authenticate(&LoginRequest::new("user@test.com", "nope"))
            .is_none());
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_dev_token(), generate_dev_token());
    }
}
