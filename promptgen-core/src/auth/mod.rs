//! Authentication module for PromptGen
//!
//! Handles the client-side session lifecycle:
//! - Email/password sign-in and registration against the backend
//! - Persistent credential storage (obfuscated file, keyring mirror)
//! - Single-flight token refresh and refresh-and-retry on 401
//! - Route guarding for protected views

mod authorizer;
mod dev_users;
pub mod guard;
mod http_client;
mod manager;
pub mod storage;
pub mod types;

pub use authorizer::RequestAuthorizer;
pub use dev_users::{DevFallback, DevUser};
pub use guard::{GuardDecision, RouteGuard, DEFAULT_LOGIN_ROUTE};
pub use http_client::{jwt_expiry, AuthClient};
pub use manager::SessionManager;
pub use storage::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use types::*;
