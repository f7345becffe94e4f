//! Prompt API client
//!
//! Thin wrapper over the request authorizer. Payloads other than the
//! generation request are passed through as raw JSON.

use crate::auth::{AuthError, RequestAuthorizer};
use log::info;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const GENERATE_PATH: &str = "/api/ai/generate";
pub const HISTORY_PATH: &str = "/api/prompts";
pub const FAVORITES_PATH: &str = "/api/prompts/favorites";

/// Body of a generation call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptRequest {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl PromptRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            provider: None,
            category: None,
        }
    }
}

#[derive(Clone)]
pub struct PromptClient {
    authorizer: RequestAuthorizer,
}

impl PromptClient {
    pub fn new(authorizer: RequestAuthorizer) -> Self {
        Self { authorizer }
    }

    /// Generate a prompt from `request.input`
    pub async fn generate(&self, request: &PromptRequest) -> Result<Value, AuthError> {
        if request.input.trim().is_empty() {
            return Err(AuthError::ValidationError(
                "Prompt input is required".to_string(),
            ));
        }

        info!("Generating prompt ({} chars)", request.input.len());
        let http = self
            .authorizer
            .request(Method::POST, GENERATE_PATH)
            .json(request)
            .build()
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        self.authorizer.send_json(http).await
    }

    /// Saved prompts of the signed-in user
    pub async fn history(&self) -> Result<Value, AuthError> {
        self.get_json(HISTORY_PATH).await
    }

    pub async fn favorites(&self) -> Result<Value, AuthError> {
        self.get_json(FAVORITES_PATH).await
    }

    async fn get_json(&self, path: &str) -> Result<Value, AuthError> {
        let http = self
            .authorizer
            .request(Method::GET, path)
            .build()
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;
        self.authorizer.send_json(http).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_empty_fields() {
        let json = serde_json::to_value(PromptRequest::new("write a haiku")).unwrap();
        assert_eq!(json, serde_json::json!({ "input": "write a haiku" }));
    }

    #[test]
    fn test_request_with_provider() {
        let mut request = PromptRequest::new("summarize");
        request.provider = Some("openai".to_string());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["provider"], "openai");
        assert!(json.get("category").is_none());
    }
}
