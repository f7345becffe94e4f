//! Request authorizer - bearer injection and refresh-and-retry on 401
//!
//! Every protected call goes through [`RequestAuthorizer::execute`]:
//! 1. Calls to the auth endpoints are passed through untouched.
//! 2. Everything else gets `Authorization: Bearer <access token>`.
//! 3. A 401 triggers the session manager's shared refresh; the call is then
//!    replayed exactly once with the new token. A call that was in flight
//!    when the user signed out is never refreshed.
//! 4. If the refresh fails, or the replay is rejected again, the session is
//!    ended and the caller gets [`AuthError::Unauthorized`].

use super::http_client::{error_message, network_error};
use super::manager::SessionManager;
use super::types::AuthError;
use crate::settings::RefreshMode;
use log::{debug, info, warn};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Wraps outgoing protected calls
#[derive(Clone)]
pub struct RequestAuthorizer {
    session: SessionManager,
    http: Client,
    auth_prefix: String,
    cookie_mode: bool,
}

impl RequestAuthorizer {
    pub fn new(session: SessionManager) -> Self {
        let http = session.client().http().clone();
        let auth_prefix = session.settings().auth_path_prefix.clone();
        let cookie_mode = session.settings().refresh_mode == RefreshMode::Cookie;
        Self {
            session,
            http,
            auth_prefix,
            cookie_mode,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Start a request against an API path
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.session.settings().endpoint(path))
    }

    /// Whether `request` targets the auth endpoints themselves
    pub fn is_auth_endpoint(&self, request: &Request) -> bool {
        request.url().path().contains(&self.auth_prefix)
    }

    /// Send `request` with credentials attached, refreshing and replaying
    /// it once if the backend answers 401. Other statuses are returned as is.
    pub async fn execute(&self, request: Request) -> Result<Response, AuthError> {
        if self.is_auth_endpoint(&request) {
            debug!("Auth endpoint {}, sending without bearer", request.url().path());
            return self.http.execute(request).await.map_err(network_error);
        }

        let token = match self.session.access_token().await {
            Ok(token) => Some(token),
            // Only a cookie jar can still authenticate a signed-out call
            Err(AuthError::NotAuthenticated) if self.cookie_mode => None,
            Err(AuthError::NotAuthenticated) => {
                debug!("Not signed in, refusing {}", request.url().path());
                return Err(AuthError::Unauthorized);
            }
            Err(e) => {
                // Proactive refresh failed; the session is already gone
                debug!("No usable credentials: {}", e);
                return Err(AuthError::Unauthorized);
            }
        };

        let method = request.method().clone();
        let path = request.url().path().to_string();
        let replay = request.try_clone();

        let mut request = request;
        if let Some(token) = &token {
            attach_bearer(&mut request, token)?;
        }

        let response = self.http.execute(request).await.map_err(network_error)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(token) = token else {
            debug!("{} {} returned 401 without a session", method, path);
            return Err(AuthError::Unauthorized);
        };

        info!("{} {} returned 401, refreshing credentials", method, path);

        let credentials = match self.session.refresh_after_unauthorized(&token).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("Refresh failed, giving up on {} {}: {}", method, path, e);
                return Err(AuthError::Unauthorized);
            }
        };

        let Some(mut replay) = replay else {
            warn!("{} {} has a streaming body and cannot be replayed", method, path);
            return Err(AuthError::Unauthorized);
        };
        attach_bearer(&mut replay, &credentials.access_token)?;

        debug!("Replaying {} {} with refreshed token", method, path);
        let response = self.http.execute(replay).await.map_err(network_error)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("{} {} still unauthorized after refresh", method, path);
            self.session.expire_token(&credentials.access_token);
            return Err(AuthError::Unauthorized);
        }

        Ok(response)
    }

    /// Execute and decode a JSON body, mapping non-success statuses to errors
    pub async fn send_json<T: DeserializeOwned>(&self, request: Request) -> Result<T, AuthError> {
        let response = self.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::ServerError {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        response.json().await.map_err(|e| AuthError::ServerError {
            status: status.as_u16(),
            message: format!("Failed to parse response: {}", e),
        })
    }

    /// GET `path` as a protected call
    pub async fn get(&self, path: &str) -> Result<Response, AuthError> {
        let request = build(self.request(Method::GET, path))?;
        self.execute(request).await
    }

    /// POST a JSON body to `path` as a protected call
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response, AuthError> {
        let request = build(self.request(Method::POST, path).json(body))?;
        self.execute(request).await
    }
}

fn build(builder: RequestBuilder) -> Result<Request, AuthError> {
    builder
        .build()
        .map_err(|e| AuthError::NetworkError(format!("Failed to build request: {}", e)))
}

fn attach_bearer(request: &mut Request, token: &str) -> Result<(), AuthError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| AuthError::Unauthorized)?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
