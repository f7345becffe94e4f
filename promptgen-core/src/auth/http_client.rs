//! HTTP client for the PromptGen auth backend
//!
//! Backend deployments disagree on field names (`token` vs `accessToken`,
//! a nested `user` object vs discrete fields). Everything is normalized here
//! into [`AuthGrant`] / [`UserProfile`] so the session manager never sees the
//! raw shapes.

use super::types::{
    default_role, AuthError, AuthGrant, Credentials, LoginRequest, RegisterRequest, UserProfile,
};
use crate::settings::{RefreshMode, SessionSettings};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

const USER_AGENT: &str = concat!("PromptGen-Client/", env!("CARGO_PKG_VERSION"));

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const VALIDATE_PATH: &str = "/auth/validate";

/// Auth response as the various backends send it
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuthResponse {
    #[serde(default, alias = "token", alias = "access_token")]
    access_token: Option<String>,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(default, alias = "expires_in")]
    expires_in: Option<i64>,
    #[serde(default, alias = "profile")]
    user: Option<RawProfile>,
    #[serde(flatten)]
    fields: RawProfile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProfile {
    #[serde(default, alias = "_id", alias = "sub")]
    id: Option<serde_json::Value>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, alias = "display_name")]
    display_name: Option<String>,
    #[serde(default, alias = "full_name")]
    full_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    roles: Option<Vec<String>>,
}

impl RawProfile {
    fn into_profile(self, fallback_identifier: Option<&str>) -> Option<UserProfile> {
        let identifier = self
            .identifier
            .or(self.email)
            .or_else(|| self.username.clone())
            .or_else(|| fallback_identifier.map(str::to_string))?;

        let display_name = self
            .display_name
            .or(self.full_name)
            .or(self.name)
            .or(self.username)
            .unwrap_or_else(|| identifier.clone());

        let role = self
            .role
            .or_else(|| self.roles.and_then(|roles| roles.into_iter().next()))
            .unwrap_or_else(default_role);

        let id = self.id.and_then(|id| match id {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Some(UserProfile {
            identifier,
            display_name,
            role,
            id,
        })
    }
}

impl RawAuthResponse {
    /// Nested profile wins over discrete fields
    fn profile(self, fallback_identifier: Option<&str>) -> Option<UserProfile> {
        match self.user {
            Some(user) => user.into_profile(fallback_identifier),
            None => self.fields.into_profile(fallback_identifier),
        }
    }

    fn into_grant(
        mut self,
        status: StatusCode,
        fallback_identifier: Option<&str>,
    ) -> Result<AuthGrant, AuthError> {
        let access_token = self
            .access_token
            .take()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::ServerError {
                status: status.as_u16(),
                message: "Response did not include an access token".to_string(),
            })?;

        // Out-of-range `expiresIn` falls back to the token's own claim
        let expires_at = self
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .or_else(|| jwt_expiry(&access_token));

        let credentials = Credentials {
            access_token,
            refresh_token: self.refresh_token.take().filter(|t| !t.is_empty()),
            expires_at,
        };

        Ok(AuthGrant {
            credentials,
            user: self.profile(fallback_identifier),
        })
    }
}

/// Read the `exp` claim of a JWT without verifying it
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: i64,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp, 0)
}

/// Pull a human-readable message out of an error body
pub(crate) fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default, alias = "error", alias = "msg")]
        message: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
        }) => message,
        _ => body.trim().to_string(),
    }
}

pub(crate) fn network_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::NetworkError("request timed out".to_string())
    } else {
        AuthError::NetworkError(e.to_string())
    }
}

/// Classify a refresh error response.
///
/// Returns `true` if the refresh material is permanently unusable
/// (rejected, revoked, rotated or expired). These must not be retried.
pub(crate) fn is_refresh_token_permanently_invalid(status: StatusCode, body: &str) -> bool {
    status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || body.contains("refresh_token_not_found")
        || body.contains("Invalid Refresh Token")
        || body.contains("refresh_token_already_used")
}

/// HTTP client for authentication API calls
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    settings: SessionSettings,
}

impl AuthClient {
    /// Create a new AuthClient
    pub fn new(settings: &SessionSettings) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout())
            .cookie_store(settings.refresh_mode == RefreshMode::Cookie)
            .build()
            .map_err(|e| AuthError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    /// The underlying client, shared with the request authorizer so cookies
    /// and connection pools are common
    pub fn http(&self) -> &Client {
        &self.client
    }

    async fn read_failure(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }

    async fn parse_grant(
        response: Response,
        fallback_identifier: Option<&str>,
    ) -> Result<AuthGrant, AuthError> {
        let status = response.status();
        let raw: RawAuthResponse = response.json().await.map_err(|e| AuthError::ServerError {
            status: status.as_u16(),
            message: format!("Failed to parse response: {}", e),
        })?;
        raw.into_grant(status, fallback_identifier)
    }

    /// Sign in with identifier and password
    pub async fn login(&self, request: &LoginRequest) -> Result<AuthGrant, AuthError> {
        debug!("Signing in user: {}", request.identifier);

        let response = self
            .client
            .post(self.settings.endpoint(LOGIN_PATH))
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let (status, body) = Self::read_failure(response).await;
            error!("Sign in failed: {} - {}", status, body);

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(AuthError::InvalidCredentials);
            }
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
                return Err(AuthError::ValidationError(error_message(&body)));
            }
            return Err(AuthError::ServerError {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let grant = Self::parse_grant(response, Some(&request.identifier)).await?;
        info!("Sign in successful for {}", request.identifier);
        Ok(grant)
    }

    /// Create an account
    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthGrant, AuthError> {
        debug!("Registering account: {}", request.email);

        let response = self
            .client
            .post(self.settings.endpoint(REGISTER_PATH))
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let (status, body) = Self::read_failure(response).await;
            error!("Registration failed: {} - {}", status, body);

            return Err(match status {
                StatusCode::BAD_REQUEST
                | StatusCode::CONFLICT
                | StatusCode::UNPROCESSABLE_ENTITY => {
                    let message = error_message(&body);
                    AuthError::ValidationError(if message.is_empty() {
                        "Invalid registration data".to_string()
                    } else {
                        message
                    })
                }
                _ => AuthError::ServerError {
                    status: status.as_u16(),
                    message: error_message(&body),
                },
            });
        }

        let mut grant = Self::parse_grant(response, Some(&request.email)).await?;
        if let Some(user) = grant.user.as_mut() {
            if user.display_name == user.identifier && !request.full_name.is_empty() {
                user.display_name = request.full_name.clone();
            }
        }
        info!("Registration successful for {}", request.email);
        Ok(grant)
    }

    /// Exchange refresh material for a new access token.
    ///
    /// `refresh_token` is `None` when the backend reads it from a cookie.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<AuthGrant, AuthError> {
        debug!("Refreshing access token");

        let mut request = self.client.post(self.settings.endpoint(REFRESH_PATH));
        if let Some(token) = refresh_token {
            request = request.json(&json!({ "refreshToken": token }));
        }

        let response = request.send().await.map_err(network_error)?;

        if !response.status().is_success() {
            let (status, body) = Self::read_failure(response).await;
            error!("Refresh failed: {} - {}", status, body);

            if is_refresh_token_permanently_invalid(status, &body) {
                return Err(AuthError::RefreshRejected);
            }
            return Err(AuthError::ServerError {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let grant = Self::parse_grant(response, None).await?;
        info!("Token refresh successful");
        Ok(grant)
    }

    /// Ask the backend whether `access_token` is still good
    pub async fn validate(&self, access_token: &str) -> Result<Option<UserProfile>, AuthError> {
        debug!("Validating access token");

        let response = self
            .client
            .get(self.settings.endpoint(VALIDATE_PATH))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let (status, body) = Self::read_failure(response).await;
            debug!("Validation rejected: {} - {}", status, body);

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(AuthError::Unauthorized);
            }
            return Err(AuthError::ServerError {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        // Some backends answer 204 or a bare ack
        let body = response.text().await.map_err(network_error)?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let raw: RawAuthResponse = match serde_json::from_str(&body) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Validate response had no usable profile: {}", e);
                return Ok(None);
            }
        };
        Ok(raw.profile(None))
    }

    /// Ask the backend to drop server-side session material
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut request = self.client.post(self.settings.endpoint(LOGOUT_PATH));
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        if let Some(token) = refresh_token {
            request = request.json(&json!({ "refreshToken": token }));
        }

        let response = request.send().await.map_err(network_error)?;
        if !response.status().is_success() {
            let (status, body) = Self::read_failure(response).await;
            return Err(AuthError::ServerError {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        debug!("Backend session invalidated");
        Ok(())
    }
}
