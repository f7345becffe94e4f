#![allow(dead_code)]

use promptgen_core::auth::{
    AuthSession, Credentials, FileCredentialStore, LoginRequest, SessionManager, SessionOrigin,
    UserProfile,
};
use promptgen_core::settings::SessionSettings;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Nothing listens on the discard port
pub const UNREACHABLE: &str = "http://127.0.0.1:9";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_settings(api: &str, data_dir: &Path) -> SessionSettings {
    let mut settings = SessionSettings::for_api(api);
    settings.data_dir = Some(data_dir.to_path_buf());
    settings.use_keyring = false;
    settings.refresh_retries = 0;
    settings.request_timeout_secs = 5;
    settings
}

pub fn file_store(dir: &TempDir) -> FileCredentialStore {
    FileCredentialStore::new(dir.path(), false).unwrap()
}

pub fn manager(settings: SessionSettings, dir: &TempDir) -> SessionManager {
    SessionManager::new(settings, Arc::new(file_store(dir))).unwrap()
}

pub fn stored_session(access_token: &str, refresh_token: Option<&str>) -> AuthSession {
    AuthSession {
        credentials: Credentials {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: None,
        },
        user: UserProfile {
            identifier: "user@test.com".to_string(),
            display_name: "Demo User".to_string(),
            role: "user".to_string(),
            id: None,
        },
        origin: SessionOrigin::Backend,
    }
}

pub fn login_body(access_token: &str, refresh_token: &str) -> serde_json::Value {
    json!({
        "accessToken": access_token,
        "refreshToken": refresh_token,
        "user": { "email": "user@test.com", "name": "Demo User", "role": "user" }
    })
}

pub async fn mount_login(server: &MockServer, access_token: &str, refresh_token: &str) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(access_token, refresh_token)))
        .mount(server)
        .await;
}

pub async fn sign_in(session: &SessionManager) {
    session
        .login(&LoginRequest::new("user@test.com", "user123"))
        .await
        .unwrap();
}
