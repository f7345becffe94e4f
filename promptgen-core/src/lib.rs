//! PromptGen Core Library
//!
//! Session lifecycle (sign-in, credential storage, token refresh, route
//! guarding), settings, and the protected prompt API client. Used by the
//! `promptgen` CLI.

pub mod auth;
pub mod prompts;
pub mod settings;

// Re-export commonly used items
pub use auth::{
    AuthError, GuardDecision, RequestAuthorizer, RouteGuard, SessionManager, SessionStatus,
    UserProfile,
};
pub use prompts::{PromptClient, PromptRequest};
pub use settings::{load_settings, save_settings, SessionSettings};
