//! Wallet backend HTTP client.
//!
//! One reqwest client implements every collaborator trait against the
//! wallet backend API. Transport and decode failures are mapped into the
//! taxonomy variant of the operation that failed, so the pipeline's
//! fallback logic sees the category, never the raw error.

use crate::backend::{
    ActionPlan, ActionResolver, Conversation, ConversationStore, Intent, IntentParser,
    OptimizedTransfer, SpeechGenerator, TextGenerator, TransferOptimizer,
};
use crate::config::BackendConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// HTTP client for the wallet backend API.
pub struct WalletBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    audio_base64: String,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    id: Uuid,
}

impl WalletBackend {
    /// Create a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.resolved_api_key(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON body and decode a JSON response. Non-2xx statuses and
    /// malformed bodies are reported as plain strings for the caller to
    /// wrap in the right error variant.
    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<T, String> {
        let mut request = self.client.post(self.url(path)).json(body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("backend returned {status}"));
        }

        response
            .json()
            .await
            .map_err(|e| format!("invalid response body: {e}"))
    }
}

#[async_trait]
impl IntentParser for WalletBackend {
    async fn parse(&self, text: &str) -> Result<Intent> {
        self.post_json("/v1/intent/parse", &serde_json::json!({ "text": text }))
            .await
            .map_err(AgentError::Intent)
    }
}

#[async_trait]
impl TransferOptimizer for WalletBackend {
    async fn optimize(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        token: &str,
    ) -> Result<OptimizedTransfer> {
        let body = serde_json::json!({
            "from": from,
            "to": to,
            "amount": amount,
            "token": token,
        });
        self.post_json("/v1/tx/optimize", &body)
            .await
            .map_err(AgentError::Optimize)
    }
}

#[async_trait]
impl ActionResolver for WalletBackend {
    async fn resolve(&self, intent: &Intent, address: &str) -> Result<ActionPlan> {
        let body = serde_json::json!({
            "intent": intent,
            "address": address,
        });
        self.post_json("/v1/actions/resolve", &body)
            .await
            .map_err(AgentError::Resolve)
    }
}

#[async_trait]
impl TextGenerator for WalletBackend {
    async fn generate_text(
        &self,
        prompt: &str,
        image_base64: Option<&str>,
        context: &[crate::backend::ChatTurn],
        user_id: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "prompt": prompt,
            "image_base64": image_base64,
            "context": context,
            "user_id": user_id,
        });
        let response: TextResponse = self
            .post_json("/v1/generate/text", &body)
            .await
            .map_err(AgentError::Generate)?;
        Ok(response.text)
    }
}

#[async_trait]
impl SpeechGenerator for WalletBackend {
    async fn generate_speech(&self, text: &str) -> Result<String> {
        let response: SpeechResponse = self
            .post_json("/v1/generate/speech", &serde_json::json!({ "text": text }))
            .await
            .map_err(AgentError::Generate)?;
        Ok(response.audio_base64)
    }
}

#[async_trait]
impl ConversationStore for WalletBackend {
    async fn save(&self, conversation: &Conversation, existing_id: Option<Uuid>) -> Result<Uuid> {
        let body = serde_json::json!({
            "conversation": conversation,
            "existing_id": existing_id,
        });
        let response: SaveResponse = self
            .post_json("/v1/conversations", &body)
            .await
            .map_err(AgentError::Persist)?;
        Ok(response.id)
    }
}
