//! Action-resolution pipeline.
//!
//! Turns one user utterance into exactly one terminal outcome: an
//! executable [`ActionPlan`], a general answer, or the fixed error
//! message. The fallback order is an explicit stage list driven by a
//! short-circuiting runner: it advances to the next stage only
//! on failure and stops on the first success, which makes the
//! total-function property structural rather than a property of
//! control flow.

pub mod messages;

use crate::backend::{
    ActionKind, ActionPlan, ActionResolver, ChatRole, ChatTurn, Conversation, ConversationStore,
    Intent, IntentParser, TextGenerator, TransferOptimizer,
};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::progress::ThinkingProgressTracker;
use crate::runtime::AgentEvent;
use messages::{PROCESSING_ERROR_MESSAGE, TurnOutcome, TurnRequest};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

/// The fallible stages an utterance can resolve through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Optimizer-then-resolver action resolution.
    ResolveAction,
    /// General-purpose text generation.
    GeneralAnswer,
}

/// Resolution order. The gate decides whether `ResolveAction` applies at
/// all; `GeneralAnswer` is the last stage with a fallback behind it (the
/// fixed error message).
const STAGE_ORDER: [Stage; 2] = [Stage::ResolveAction, Stage::GeneralAnswer];

/// The collaborator seams the pipeline drives.
pub struct PipelineCollaborators {
    pub parser: Arc<dyn IntentParser>,
    pub optimizer: Arc<dyn TransferOptimizer>,
    pub resolver: Arc<dyn ActionResolver>,
    pub generator: Arc<dyn TextGenerator>,
    pub store: Arc<dyn ConversationStore>,
}

/// Per-conversation state guarded by the turn lock.
struct TurnState {
    tracker: ThinkingProgressTracker,
    history: Vec<ChatTurn>,
    conversation_id: Option<Uuid>,
}

impl TurnState {
    fn new(events: Option<broadcast::Sender<AgentEvent>>) -> Self {
        Self {
            tracker: ThinkingProgressTracker::new(events),
            history: Vec::new(),
            conversation_id: None,
        }
    }
}

/// Multi-stage fallback pipeline from utterance to outcome.
pub struct IntentActionPipeline {
    collaborators: PipelineCollaborators,
    config: PipelineConfig,
    events: Option<broadcast::Sender<AgentEvent>>,
    /// Serializes turns: at most one active pipeline run per conversation,
    /// enforced here rather than left to the caller's loading flag.
    turn: Mutex<TurnState>,
}

impl IntentActionPipeline {
    /// Create a pipeline over the given collaborators.
    pub fn new(config: &PipelineConfig, collaborators: PipelineCollaborators) -> Self {
        Self {
            collaborators,
            config: config.clone(),
            events: None,
            turn: Mutex::new(TurnState::new(None)),
        }
    }

    /// Attach an event broadcaster for UI/observability.
    pub fn with_events(mut self, tx: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(tx.clone());
        self.turn = Mutex::new(TurnState::new(Some(tx)));
        self
    }

    /// Process one utterance to its terminal outcome.
    ///
    /// Total over utterances: always returns a plan, an answer, or the
    /// fixed error message; a failure never escapes the call. Conversation
    /// persistence runs after the outcome is known and cannot invalidate
    /// it.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnOutcome {
        let mut turn = self.turn.lock().await;
        let TurnState {
            tracker, history, ..
        } = &mut *turn;

        tracker.begin();
        let outcome = self.run_stages(&request, tracker, history).await;

        // Progress is cleared on every terminal outcome; successes show
        // the terminal pseudo-step first.
        if matches!(outcome, TurnOutcome::Failed(_)) {
            tracker.clear();
        } else {
            tracker.finish_success();
            tracker.clear();
        }

        self.publish_outcome(&outcome);

        turn.history.push(ChatTurn::now(ChatRole::User, &request.text));
        turn.history
            .push(ChatTurn::now(ChatRole::Assistant, outcome.display_text()));
        trim_history(&mut turn.history, self.config.max_history_turns);

        // Best-effort persistence: a save failure is logged, never
        // surfaced, and the already-produced outcome stands.
        let conversation = Conversation {
            id: turn.conversation_id,
            turns: turn.history.clone(),
        };
        match self
            .collaborators
            .store
            .save(&conversation, turn.conversation_id)
            .await
        {
            Ok(id) => turn.conversation_id = Some(id),
            Err(e) => warn!("conversation save failed: {e}"),
        }

        outcome
    }

    /// Run the stage list for one utterance.
    async fn run_stages(
        &self,
        request: &TurnRequest,
        tracker: &mut ThinkingProgressTracker,
        history: &[ChatTurn],
    ) -> TurnOutcome {
        // Analyze → Interpret: derive the intent. A parser failure is
        // absorbed; the turn continues on the general-answer path.
        tracker.advance();
        let intent = match self.collaborators.parser.parse(&request.text).await {
            Ok(intent) => {
                info!(
                    action = ?intent.action,
                    confidence = intent.confidence,
                    "intent parsed"
                );
                Some(intent)
            }
            Err(e) => {
                warn!("intent parsing failed, using general answer: {e}");
                None
            }
        };
        tracker.advance();

        let eligible = intent
            .as_ref()
            .is_some_and(|i| gate_allows(i, self.config.confidence_threshold));

        for stage in STAGE_ORDER {
            match stage {
                Stage::ResolveAction => {
                    if !eligible {
                        continue;
                    }
                    // eligible implies the intent parsed.
                    let Some(intent) = intent.as_ref() else {
                        continue;
                    };
                    match self.resolve_action(intent, &request.address).await {
                        Ok(plan) => {
                            tracker.advance();
                            return TurnOutcome::Action(plan);
                        }
                        Err(e) => warn!("action resolution failed, falling through: {e}"),
                    }
                }
                Stage::GeneralAnswer => {
                    tracker.advance();
                    match self
                        .collaborators
                        .generator
                        .generate_text(
                            &request.text,
                            request.image_base64.as_deref(),
                            history,
                            &request.user_id,
                        )
                        .await
                    {
                        Ok(text) => return TurnOutcome::Answer(text),
                        Err(e) => warn!("text generation failed: {e}"),
                    }
                }
            }
        }

        TurnOutcome::Failed(PROCESSING_ERROR_MESSAGE.to_owned())
    }

    /// The resolve stage: optimizer first for transfer-like intents,
    /// then the basic resolver with the same intent and address. The
    /// stage fails, with no retry, when both collaborators fail.
    async fn resolve_action(&self, intent: &Intent, address: &str) -> Result<ActionPlan> {
        if intent.action.is_transfer_like() {
            let to = intent
                .param_str("to")
                .or_else(|| intent.param_str("recipient"))
                .unwrap_or_default();
            let amount = intent.param_f64("amount").unwrap_or(0.0);
            let token = intent
                .param_str("token")
                .or_else(|| intent.param_str("asset"))
                .unwrap_or("VCN");

            match self
                .collaborators
                .optimizer
                .optimize(address, to, amount, token)
                .await
            {
                Ok(optimized) => return Ok(optimized.into_plan()),
                Err(e) => warn!("optimizer failed, falling back to resolver: {e}"),
            }
        }

        self.collaborators.resolver.resolve(intent, address).await
    }

    fn publish_outcome(&self, outcome: &TurnOutcome) {
        let Some(tx) = &self.events else { return };
        let event = match outcome {
            TurnOutcome::Action(plan) => AgentEvent::ActionProposed {
                summary: plan.summary.clone(),
            },
            TurnOutcome::Answer(text) | TurnOutcome::Failed(text) => AgentEvent::Answer {
                text: text.clone(),
            },
        };
        let _ = tx.send(event);
    }
}

/// Whether an intent qualifies for the resolve stage: confidence strictly
/// above the threshold and a recognized action kind.
fn gate_allows(intent: &Intent, threshold: f32) -> bool {
    intent.confidence > threshold && intent.action != ActionKind::Unknown
}

/// Keep at most `max_turns` user/assistant pairs of history.
fn trim_history(history: &mut Vec<ChatTurn>, max_turns: usize) {
    let max_entries = max_turns.saturating_mul(2);
    if max_entries > 0 && history.len() > max_entries {
        let drain_end = history.len() - max_entries;
        history.drain(..drain_end);
    }
}
