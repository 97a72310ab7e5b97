//! Thinking-step progress tracking for the action pipeline.
//!
//! Drives UI feedback while a turn is being processed. The tracker is
//! purely observational: the pipeline advances it as stages run, and it is
//! cleared unconditionally once the turn reaches any terminal outcome.

use crate::runtime::AgentEvent;
use tokio::sync::broadcast;

/// Status of a single thinking step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Not started yet.
    Pending,
    /// Currently in progress. At most one step is loading at a time.
    Loading,
    /// Finished.
    Completed,
    /// Terminal pseudo-step appended when the turn resolves.
    Success,
}

/// One entry in the thinking-step list shown while a turn is processed.
#[derive(Debug, Clone)]
pub struct ThinkingStep {
    /// Stable id within one turn.
    pub id: u32,
    /// Human-readable label.
    pub label: String,
    /// Current status. Transitions are monotonic: a step never regresses.
    pub status: StepStatus,
}

/// Labels for the fixed step sequence initialized per utterance.
const STEP_LABELS: [&str; 4] = [
    "Analyzing request",
    "Interpreting intent",
    "Scanning wallet state",
    "Preparing insight",
];

/// Step state machine driven by the pipeline.
pub struct ThinkingProgressTracker {
    steps: Vec<ThinkingStep>,
    events: Option<broadcast::Sender<AgentEvent>>,
}

impl ThinkingProgressTracker {
    /// Create a tracker. When `events` is set, every mutation publishes a
    /// snapshot for UI observers.
    pub fn new(events: Option<broadcast::Sender<AgentEvent>>) -> Self {
        Self {
            steps: Vec::new(),
            events,
        }
    }

    /// Initialize the fixed step sequence for a new utterance. The first
    /// step starts loading, the rest pending.
    pub fn begin(&mut self) {
        self.steps = STEP_LABELS
            .iter()
            .enumerate()
            .map(|(i, label)| ThinkingStep {
                id: i as u32,
                label: (*label).to_owned(),
                status: if i == 0 {
                    StepStatus::Loading
                } else {
                    StepStatus::Pending
                },
            })
            .collect();
        self.publish();
    }

    /// Complete the currently loading step and promote the next pending
    /// step to loading. No-op once every step has completed.
    pub fn advance(&mut self) {
        if let Some(current) = self
            .steps
            .iter_mut()
            .find(|s| s.status == StepStatus::Loading)
        {
            current.status = StepStatus::Completed;
        }
        if let Some(next) = self
            .steps
            .iter_mut()
            .find(|s| s.status == StepStatus::Pending)
        {
            next.status = StepStatus::Loading;
        }
        self.publish();
    }

    /// Append the terminal success pseudo-step, completing anything still
    /// loading first so observers see a fully resolved list.
    pub fn finish_success(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::Loading || step.status == StepStatus::Pending {
                step.status = StepStatus::Completed;
            }
        }
        let id = self.steps.len() as u32;
        self.steps.push(ThinkingStep {
            id,
            label: "Done".to_owned(),
            status: StepStatus::Success,
        });
        self.publish();
    }

    /// Drop every step. Called on any terminal pipeline outcome.
    pub fn clear(&mut self) {
        self.steps.clear();
        self.publish();
    }

    /// Current step snapshot.
    pub fn steps(&self) -> &[ThinkingStep] {
        &self.steps
    }

    fn publish(&self) {
        if let Some(tx) = &self.events {
            let _ = tx.send(AgentEvent::Thinking {
                steps: self.steps.clone(),
            });
        }
    }
}
