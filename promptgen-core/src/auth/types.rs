//! Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No credentials held
    #[default]
    Unauthenticated,
    /// Login or registration request in flight
    Authenticating,
    /// Holding credentials the backend accepted
    Authenticated,
    /// Refresh request in flight; the previous credentials stay installed
    Refreshing,
    /// Access token rejected with no way to refresh it
    Expired,
}

impl SessionStatus {
    /// Whether protected content may be shown in this state
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            SessionStatus::Authenticated | SessionStatus::Refreshing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Authenticating => "authenticating",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Refreshing => "refreshing",
            SessionStatus::Expired => "expired",
        }
    }
}

/// Why the last snapshot was published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Restored,
    LoggedIn,
    Registered,
    Refreshed,
    Validated,
    LoggedOut,
    /// Session dropped without user action; UI should send the user to login
    Expired,
    /// Login or registration attempt failed
    Failed,
}

/// Observable view of the session, published on every mutation
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserProfile>,
    pub reason: Option<ChangeReason>,
}

/// Bearer credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    /// Absent when the backend keeps refresh material in a cookie
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unknown when neither the response nor the token carries an expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Check if the access token has expired. Unknown expiry counts as expired.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => true,
        }
    }

    /// Check if the token will expire within `skew`
    pub fn expires_soon(&self, skew: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + skew >= expires_at,
            None => false,
        }
    }

    /// True when the expiry is known and still in the future
    pub fn has_trusted_expiry(&self) -> bool {
        self.expires_at.is_some() && !self.is_expired()
    }
}

/// Minimal profile of the signed-in user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    /// Email or username the user signed in with
    pub identifier: String,
    pub display_name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub id: Option<String>,
}

pub(crate) fn default_role() -> String {
    "user".to_string()
}

/// Where a session came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    #[default]
    Backend,
    /// Local allow-list login made while the backend was unreachable
    DevFallback,
}

/// Persisted session record: credentials and profile always travel together
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub credentials: Credentials,
    pub user: UserProfile,
    #[serde(default)]
    pub origin: SessionOrigin,
}

/// Normalized result of a login, register or refresh call
#[derive(Debug, Clone, PartialEq)]
pub struct AuthGrant {
    pub credentials: Credentials,
    /// Refresh responses may omit the profile
    pub user: Option<UserProfile>,
}

/// Email/username sign in
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
        }
    }
}

/// New account form
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterRequest {
    /// Checks that need no round trip to the backend
    pub fn check(&self) -> Result<(), AuthError> {
        if self.full_name.trim().is_empty() {
            return Err(AuthError::ValidationError("Full name is required".to_string()));
        }
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(AuthError::ValidationError(
                "A valid email is required".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(AuthError::ValidationError("Password is required".to_string()));
        }
        if self.password != self.confirm_password {
            return Err(AuthError::ValidationError(
                "Passwords do not match".to_string(),
            ));
        }
        Ok(())
    }
}

/// Error types for authentication
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Session expired, please sign in again")]
    RefreshRejected,

    #[error("Stored session is corrupt: {0}")]
    StorageCorrupt(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Unauthorized")]
    Unauthorized,
}

impl AuthError {
    /// Errors worth another refresh attempt
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::NetworkError(_) => true,
            AuthError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Text suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthError::ValidationError(msg) => msg.clone(),
            AuthError::NetworkError(_) => {
                "Could not reach the server. Check your connection".to_string()
            }
            AuthError::RefreshRejected | AuthError::Unauthorized => {
                "Your session has expired. Please sign in again".to_string()
            }
            AuthError::NotAuthenticated => "Please sign in to continue".to_string(),
            AuthError::StorageCorrupt(_) | AuthError::StorageError(_) => {
                "Could not save your session on this device".to_string()
            }
            AuthError::ServerError { status, message } => match status {
                403 => "Access denied".to_string(),
                404 => "Resource not found".to_string(),
                500 => "Internal server error".to_string(),
                503 => "Service temporarily unavailable".to_string(),
                _ if !message.is_empty() => message.clone(),
                _ => format!("Error {}: unknown error", status),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn make_credentials(expires_at: Option<DateTime<Utc>>) -> Credentials {
        Credentials {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_credentials_is_expired_when_past() {
        let creds = make_credentials(Some(Utc::now() - Duration::hours(1)));
        assert!(creds.is_expired());
        assert!(!creds.has_trusted_expiry());
    }

    #[test]
    fn test_credentials_not_expired_when_future() {
        let creds = make_credentials(Some(Utc::now() + Duration::hours(1)));
        assert!(!creds.is_expired());
        assert!(creds.has_trusted_expiry());
    }

    #[test]
    fn test_unknown_expiry_is_untrusted_but_not_expiring() {
        let creds = make_credentials(None);
        assert!(creds.is_expired());
        assert!(!creds.has_trusted_expiry());
        assert!(!creds.expires_soon(Duration::minutes(5)));
    }

    #[test]
    fn test_expires_soon_uses_skew() {
        let creds = make_credentials(Some(Utc::now() + Duration::minutes(3)));
        assert!(creds.expires_soon(Duration::minutes(5)));
        assert!(!creds.expires_soon(Duration::minutes(1)));
    }

    #[test]
    fn test_status_authenticated_states() {
        assert!(SessionStatus::Authenticated.is_authenticated());
        assert!(SessionStatus::Refreshing.is_authenticated());
        assert!(!SessionStatus::Authenticating.is_authenticated());
        assert!(!SessionStatus::Expired.is_authenticated());
        assert_eq!(SessionStatus::default(), SessionStatus::Unauthenticated);
    }

    #[test]
    fn test_session_record_defaults_origin() {
        let json = r#"{
            "credentials": {"access_token": "abc"},
            "user": {"identifier": "user@test.com", "display_name": "Test"}
        }"#;
        let session: AuthSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.origin, SessionOrigin::Backend);
        assert_eq!(session.user.role, "user");
        assert!(session.credentials.refresh_token.is_none());
        assert!(session.credentials.expires_at.is_none());
    }

    #[test]
    fn test_register_request_serializes_camel_case() {
        let req = RegisterRequest {
            full_name: "Ana Test".to_string(),
            email: "ana@test.com".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["fullName"], "Ana Test");
        assert_eq!(value["confirmPassword"], "secret1");
        assert!(req.check().is_ok());
    }

    #[test]
    fn test_register_request_password_mismatch() {
        let req = RegisterRequest {
            full_name: "Ana Test".to_string(),
            email: "ana@test.com".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret2".to_string(),
        };
        assert_eq!(
            req.check(),
            Err(AuthError::ValidationError(
                "Passwords do not match".to_string()
            ))
        );
    }

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid email or password"
        );
        assert_eq!(
            AuthError::NetworkError("timeout".to_string()).to_string(),
            "Network error: timeout"
        );
        assert_eq!(
            AuthError::RefreshRejected.to_string(),
            "Session expired, please sign in again"
        );
        assert_eq!(
            AuthError::ServerError {
                status: 502,
                message: "bad gateway".to_string()
            }
            .to_string(),
            "Server error 502: bad gateway"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(AuthError::NetworkError("refused".to_string()).is_transient());
        assert!(AuthError::ServerError {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!AuthError::RefreshRejected.is_transient());
        assert!(!AuthError::ServerError {
            status: 409,
            message: String::new()
        }
        .is_transient());
    }

    #[test]
    fn test_user_message_status_table() {
        let err = AuthError::ServerError {
            status: 503,
            message: String::new(),
        };
        assert_eq!(err.user_message(), "Service temporarily unavailable");
        let err = AuthError::ServerError {
            status: 418,
            message: "teapot".to_string(),
        };
        assert_eq!(err.user_message(), "teapot");
    }
}
