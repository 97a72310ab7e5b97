//! Wallet backend collaborators.
//!
//! The agent core never talks to the chain or the model APIs directly; it
//! consumes these trait seams. [`http::WalletBackend`] implements all of
//! them against the wallet backend API, and tests substitute mocks.

pub mod http;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The kind of wallet action an utterance asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Send a token to an address.
    Transfer,
    /// Exchange one token for another.
    Swap,
    /// Swap and deliver the output to a third-party address.
    SwapAndSend,
    /// Delegate tokens to a validator.
    Stake,
    /// Not a recognized wallet action. Unrecognized wire values also map
    /// here so a newer backend cannot break the gate.
    #[serde(other)]
    Unknown,
}

impl ActionKind {
    /// Whether the optimizer should be tried before the generic resolver.
    pub fn is_transfer_like(self) -> bool {
        matches!(self, Self::Transfer | Self::SwapAndSend)
    }
}

/// A parsed user intent. Immutable once produced for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// What the user wants to do.
    pub action: ActionKind,
    /// Parser confidence in [0, 1].
    pub confidence: f32,
    /// Extracted slots (recipient, amount, token, ...).
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Natural-language explanation of the parse.
    #[serde(default)]
    pub explanation: String,
}

impl Intent {
    /// String-valued parameter, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Numeric parameter, accepting both JSON numbers and numeric strings
    /// (the parser emits either depending on the model).
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        let value = self.parameters.get(key)?;
        value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }
}

/// An executable action proposal. At most one is produced per turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    /// Action type, e.g. `"transfer"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable summary shown for confirmation.
    pub summary: String,
    /// Opaque execution payload handed to the wallet.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Refined transfer plan returned by the transaction optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedTransfer {
    /// Action type, e.g. `"transfer"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Generated explanation of the optimized route.
    pub explanation: String,
    pub input_asset: String,
    pub input_amount: f64,
    pub recipient: String,
    pub output_asset: String,
    pub output_amount: f64,
}

impl OptimizedTransfer {
    /// Build the action plan for this optimized route. The summary is the
    /// optimizer's explanation verbatim.
    pub fn into_plan(self) -> ActionPlan {
        let payload = serde_json::json!({
            "inputAsset": self.input_asset,
            "inputAmount": self.input_amount,
            "recipient": self.recipient,
            "outputAsset": self.output_asset,
            "outputAmount": self.output_amount,
        });
        ActionPlan {
            kind: self.kind,
            summary: self.explanation,
            payload,
        }
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message in a persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatTurn {
    /// A turn stamped with the current time.
    pub fn now(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// A conversation as persisted by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Backend id; `None` until first saved.
    pub id: Option<Uuid>,
    pub turns: Vec<ChatTurn>,
}

/// Derives an [`Intent`] from one utterance.
#[async_trait]
pub trait IntentParser: Send + Sync {
    async fn parse(&self, text: &str) -> Result<Intent>;
}

/// Refines transfer-like intents into an optimized route.
#[async_trait]
pub trait TransferOptimizer: Send + Sync {
    async fn optimize(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        token: &str,
    ) -> Result<OptimizedTransfer>;
}

/// Resolves an intent into an executable plan without optimization.
#[async_trait]
pub trait ActionResolver: Send + Sync {
    async fn resolve(&self, intent: &Intent, address: &str) -> Result<ActionPlan>;
}

/// General-purpose text generation for non-action turns.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        image_base64: Option<&str>,
        context: &[ChatTurn],
        user_id: &str,
    ) -> Result<String>;
}

/// Speech synthesis for spoken replies.
#[async_trait]
pub trait SpeechGenerator: Send + Sync {
    /// Returns base64-encoded audio for `text`.
    async fn generate_speech(&self, text: &str) -> Result<String>;
}

/// Best-effort conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Saves the conversation, updating `existing_id` when given, and
    /// returns the stored id.
    async fn save(&self, conversation: &Conversation, existing_id: Option<Uuid>) -> Result<Uuid>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn unknown_action_kind_from_unrecognized_wire_value() {
        let kind: ActionKind = serde_json::from_str("\"yield_farm\"").unwrap();
        assert_eq!(kind, ActionKind::Unknown);
    }

    #[test]
    fn transfer_like_kinds() {
        assert!(ActionKind::Transfer.is_transfer_like());
        assert!(ActionKind::SwapAndSend.is_transfer_like());
        assert!(!ActionKind::Swap.is_transfer_like());
        assert!(!ActionKind::Unknown.is_transfer_like());
    }

    #[test]
    fn intent_numeric_params_accept_strings() {
        let intent: Intent = serde_json::from_value(serde_json::json!({
            "action": "transfer",
            "confidence": 0.9,
            "parameters": { "amount": "10", "token": "VCN" },
        }))
        .unwrap();
        assert_eq!(intent.param_f64("amount"), Some(10.0));
        assert_eq!(intent.param_str("token"), Some("VCN"));
    }

    #[test]
    fn optimized_transfer_plan_uses_explanation_as_summary() {
        let optimized = OptimizedTransfer {
            kind: "transfer".to_owned(),
            explanation: "Send 10 VCN to 0xAbc via the direct route".to_owned(),
            input_asset: "VCN".to_owned(),
            input_amount: 10.0,
            recipient: "0xAbc".to_owned(),
            output_asset: "VCN".to_owned(),
            output_amount: 10.0,
        };
        let plan = optimized.into_plan();
        assert_eq!(plan.kind, "transfer");
        assert_eq!(plan.summary, "Send 10 VCN to 0xAbc via the direct route");
        assert_eq!(plan.payload["recipient"], "0xAbc");
    }
}
