//! Contract tests for the wallet backend HTTP client.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use vela::backend::http::WalletBackend;
use vela::backend::{
    ActionKind, ActionResolver, ChatRole, ChatTurn, Conversation, ConversationStore, Intent,
    IntentParser, SpeechGenerator, TextGenerator, TransferOptimizer,
};
use vela::config::BackendConfig;
use vela::error::AgentError;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(base_url: &str) -> BackendConfig {
    BackendConfig {
        base_url: base_url.to_owned(),
        api_key: "test-key".to_owned(),
        timeout_secs: 5,
    }
}

fn backend(server: &MockServer) -> WalletBackend {
    WalletBackend::new(&config(&server.uri())).unwrap()
}

#[tokio::test]
async fn parse_decodes_an_intent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/intent/parse"))
        .and(body_partial_json(serde_json::json!({ "text": "send 10 VCN to 0xAbc" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "action": "transfer",
            "confidence": 0.9,
            "parameters": { "to": "0xAbc", "amount": 10, "token": "VCN" },
            "explanation": "user wants to transfer"
        })))
        .mount(&server)
        .await;

    let intent = backend(&server).parse("send 10 VCN to 0xAbc").await.unwrap();
    assert_eq!(intent.action, ActionKind::Transfer);
    assert!((intent.confidence - 0.9).abs() < f32::EPSILON);
    assert_eq!(intent.param_str("to"), Some("0xAbc"));
}

#[tokio::test]
async fn parse_maps_server_errors_to_the_intent_variant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/intent/parse"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = backend(&server).parse("hello").await;
    assert!(matches!(result, Err(AgentError::Intent(_))));
}

#[tokio::test]
async fn requests_carry_the_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate/text"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "text": "hi" })),
        )
        .mount(&server)
        .await;

    let text = backend(&server)
        .generate_text("hello", None, &[], "u1")
        .await
        .unwrap();
    assert_eq!(text, "hi");
}

#[tokio::test]
async fn optimize_decodes_the_camel_case_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/tx/optimize"))
        .and(body_partial_json(serde_json::json!({
            "from": "0xMe", "to": "0xAbc", "amount": 10.0, "token": "VCN"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "transfer",
            "explanation": "Send 10 VCN to 0xAbc",
            "inputAsset": "VCN",
            "inputAmount": 10.0,
            "recipient": "0xAbc",
            "outputAsset": "VCN",
            "outputAmount": 10.0
        })))
        .mount(&server)
        .await;

    let optimized = backend(&server)
        .optimize("0xMe", "0xAbc", 10.0, "VCN")
        .await
        .unwrap();
    assert_eq!(optimized.kind, "transfer");
    assert_eq!(optimized.recipient, "0xAbc");
    assert_eq!(optimized.explanation, "Send 10 VCN to 0xAbc");
}

#[tokio::test]
async fn optimize_failure_maps_to_the_optimize_variant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/tx/optimize"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let result = backend(&server).optimize("0xMe", "0xAbc", 10.0, "VCN").await;
    assert!(matches!(result, Err(AgentError::Optimize(_))));
}

#[tokio::test]
async fn resolve_posts_the_intent_and_address() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/actions/resolve"))
        .and(body_partial_json(serde_json::json!({ "address": "0xMe" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "stake",
            "summary": "Stake 5 VCN",
            "payload": { "validator": "v1" }
        })))
        .mount(&server)
        .await;

    let intent = Intent {
        action: ActionKind::Stake,
        confidence: 0.9,
        parameters: Default::default(),
        explanation: String::new(),
    };
    let plan = backend(&server).resolve(&intent, "0xMe").await.unwrap();
    assert_eq!(plan.kind, "stake");
    assert_eq!(plan.payload["validator"], "v1");
}

#[tokio::test]
async fn generate_speech_returns_base64_audio() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/generate/speech"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "audio_base64": "AAAA"
        })))
        .mount(&server)
        .await;

    let audio = backend(&server).generate_speech("hello").await.unwrap();
    assert_eq!(audio, "AAAA");
}

#[tokio::test]
async fn save_returns_the_stored_id_and_maps_failures() {
    let server = MockServer::start().await;
    let id = uuid::Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/v1/conversations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": id })),
        )
        .mount(&server)
        .await;

    let conversation = Conversation {
        id: None,
        turns: vec![ChatTurn::now(ChatRole::User, "hi")],
    };
    let stored = backend(&server).save(&conversation, None).await.unwrap();
    assert_eq!(stored, id);

    // A backend outage maps to the persist variant.
    let down = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/conversations"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&down)
        .await;
    let result = backend(&down).save(&conversation, Some(id)).await;
    assert!(matches!(result, Err(AgentError::Persist(_))));
}
