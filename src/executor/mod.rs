//! Step execution
//!
//! Executes exactly one agent turn under a shared contract: pre-step
//! validation, variant-specific invocation with in-turn retry, post-step
//! bookkeeping, and uniform fault handling through the unified classifier.
//! Callers branch on [`StepOutcome`]; faults never propagate past this
//! module as errors.

mod completion;
mod delegated;
pub mod stuck;

pub use stuck::StuckDetector;

use std::time::Duration;

use tracing::{debug, warn};

use crate::agent::{ActionSource, AgentAction, AgentHandle, AgentVariant, TurnOutput};
use crate::config::SwitchyardConfig;
use crate::events::{Event, EventSink, EventSource};
use crate::fault::{
    self, AgentFault, ClassifiedFault, ErrorCategory, FaultContext,
};
use crate::session::{
    SessionState, SessionStatus, META_COMPLETION_TOKENS, META_COST, META_PROMPT_TOKENS,
};

/// Max characters of fault detail kept in the last-fault message.
const DETAIL_EXCERPT_CHARS: usize = 500;

/// Outcome of one step-executor invocation.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The turn produced an action, already tagged and recorded.
    Action(AgentAction),
    /// Pre-step validation declined the turn silently; no state change.
    NoOp,
    /// A non-fatal fault was classified and published; the loop may
    /// continue on the next iteration.
    Recoverable {
        category: ErrorCategory,
        message: String,
    },
    /// A fatal fault; the session has transitioned to `Error`.
    Fatal {
        category: ErrorCategory,
        message: String,
    },
}

/// Execute one turn for the given variant. Both variants share the full
/// pre/post-condition contract; callers never need to know which track ran.
pub async fn execute_step(
    variant: AgentVariant,
    handle: &AgentHandle,
    session: &mut SessionState,
    stuck: &mut StuckDetector,
    config: &SwitchyardConfig,
    sink: &dyn EventSink,
) -> StepOutcome {
    if let Some(outcome) = preflight(variant, session, stuck, config, sink).await {
        return outcome;
    }

    let outcome = match variant {
        AgentVariant::SdkDelegated => {
            delegated::run_turn(handle, session, config, sink).await
        }
        AgentVariant::Legacy => {
            completion::run_turn(handle, session, stuck, config, sink).await
        }
    };

    // the cursor advances once per executed turn, recovered or not
    session.iteration = session.iteration.saturating_add(1);
    outcome
}

/// Shared pre-step validation. Returns `Some` when the turn must not run.
async fn preflight(
    variant: AgentVariant,
    session: &mut SessionState,
    stuck: &StuckDetector,
    config: &SwitchyardConfig,
    sink: &dyn EventSink,
) -> Option<StepOutcome> {
    // 1. only running sessions take turns
    if session.status != SessionStatus::Running {
        debug!(
            session = %session.id,
            status = session.status.as_str(),
            "skipping turn: session not running"
        );
        return Some(StepOutcome::NoOp);
    }

    // 2. back-pressure: one outstanding action/observation pair at a time
    if let Some(pending) = session.pending_action() {
        debug!(
            session = %session.id,
            action = %pending.action_id,
            "skipping turn: action awaiting observation"
        );
        return Some(StepOutcome::NoOp);
    }

    // 3. loop detection
    if stuck.is_stuck() {
        let detail = stuck
            .stuck_detail()
            .unwrap_or_else(|| "repeating actions".to_string());
        let classified = fault::classify(
            &AgentFault::StuckInLoop(detail),
            turn_context(session, None),
            variant,
        );
        return Some(fail_session(classified, session, sink).await);
    }

    // 4. control flags
    if session.iteration >= session.max_iterations {
        let fault = AgentFault::ControlFlag(format!(
            "iteration limit reached ({}/{})",
            session.iteration, session.max_iterations
        ));
        let classified = fault::classify(&fault, turn_context(session, None), variant);
        return Some(fail_session(classified, session, sink).await);
    }
    if let Some(ceiling) = config.budget_ceiling {
        let spent = session.counter(META_COST);
        if spent >= ceiling {
            let fault = AgentFault::ControlFlag(format!(
                "budget ceiling reached (${spent:.2} of ${ceiling:.2})"
            ));
            let classified =
                fault::classify(&fault, turn_context(session, None), variant);
            return Some(fail_session(classified, session, sink).await);
        }
    }

    None
}

/// Post-step bookkeeping for a completed invocation.
///
/// Token counters accumulate even when the turn produced no action; the
/// step counter only moves for actual actions.
pub(crate) async fn complete_turn(
    output: TurnOutput,
    variant: AgentVariant,
    session: &mut SessionState,
    stuck: Option<&mut StuckDetector>,
    config: &SwitchyardConfig,
    sink: &dyn EventSink,
) -> StepOutcome {
    record_usage(&output, session);

    let Some(mut action) = output.action else {
        let classified = fault::classify(
            &AgentFault::NoActionReturned,
            turn_context(session, None),
            variant,
        );
        return fault_outcome(classified, session, config, sink).await;
    };

    action.source = Some(ActionSource::Agent);
    if action.is_finish() {
        // the finish marker closes the run; it is not a counted work step
        session.set_meta(crate::session::META_LAST_ACTION, action.kind.as_str());
        session.set_meta(crate::session::META_VARIANT, variant.as_str());
    } else {
        session.record_turn(variant.as_str(), &action.kind);
        if let Some(detector) = stuck {
            detector.record(action.signature());
        }
    }

    StepOutcome::Action(action)
}

fn record_usage(output: &TurnOutput, session: &mut SessionState) {
    // deltas are unsigned; add_counter cannot regress here
    let _ = session.add_counter(META_PROMPT_TOKENS, output.prompt_tokens as f64);
    let _ = session.add_counter(META_COMPLETION_TOKENS, output.completion_tokens as f64);
    if let Some(cost) = output.cost {
        if cost > 0.0 {
            let _ = session.add_counter(META_COST, cost);
        }
    }
}

/// Route a classified fault to its outcome. LLM-level faults are non-fatal;
/// context-window faults turn into a condensation request when enabled;
/// everything else terminates the session.
pub(crate) async fn fault_outcome(
    classified: ClassifiedFault,
    session: &mut SessionState,
    config: &SwitchyardConfig,
    sink: &dyn EventSink,
) -> StepOutcome {
    match classified.category {
        ErrorCategory::ContextWindow if config.history_condensation_enabled => {
            sink.publish(
                Event::CondensationRequested {
                    session_id: session.id.clone(),
                },
                EventSource::ControlPlane,
            )
            .await;
            StepOutcome::Recoverable {
                category: classified.category,
                message: classified.user_message,
            }
        }
        ErrorCategory::ContextWindow => fail_session(classified, session, sink).await,
        category if category.is_recoverable() || category == ErrorCategory::LlmError => {
            publish_observation(&classified, sink).await;
            StepOutcome::Recoverable {
                category: classified.category,
                message: classified.user_message,
            }
        }
        _ => fail_session(classified, session, sink).await,
    }
}

/// Terminal fault path: transition to `Error`, keep a bounded excerpt of
/// the fault detail, publish the observation.
async fn fail_session(
    classified: ClassifiedFault,
    session: &mut SessionState,
    sink: &dyn EventSink,
) -> StepOutcome {
    let excerpt = truncate_chars(&classified.fault, DETAIL_EXCERPT_CHARS);
    session.fail(format!("{} ({})", classified.user_message, excerpt));
    publish_observation(&classified, sink).await;
    StepOutcome::Fatal {
        category: classified.category,
        message: classified.user_message,
    }
}

async fn publish_observation(classified: &ClassifiedFault, sink: &dyn EventSink) {
    sink.publish(
        Event::Observation {
            category: classified.category,
            message: classified.user_message.clone(),
        },
        EventSource::Agent,
    )
    .await;
}

pub(crate) fn turn_context(session: &SessionState, action_id: Option<&str>) -> FaultContext {
    FaultContext {
        action_id: action_id.map(str::to_string),
        turn: Some(session.iteration),
    }
}

/// Retry helper: true when the fault category warrants another in-turn
/// attempt under the configured ceiling. Sleeps the configured backoff
/// before returning true.
pub(crate) async fn retry_after_backoff(
    classified: &ClassifiedFault,
    attempt: u32,
    config: &SwitchyardConfig,
) -> bool {
    if !fault::should_retry_within(classified.category, attempt, config.max_retries) {
        return false;
    }
    warn!(
        category = classified.category.as_str(),
        attempt,
        "retrying turn after fault"
    );
    if config.retry_backoff_secs > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(config.retry_backoff_secs)).await;
    }
    true
}

fn truncate_chars(s: &str, chars: usize) -> String {
    if s.chars().count() <= chars {
        s.to_string()
    } else {
        s.chars().take(chars).collect::<String>() + "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::session::PendingAction;

    fn running_session() -> SessionState {
        let mut session = SessionState::new(10);
        session.status = SessionStatus::Running;
        session
    }

    #[tokio::test]
    async fn test_preflight_noop_when_not_running() {
        let mut session = SessionState::new(10); // Init
        let sink = MemorySink::new();
        let outcome = preflight(
            AgentVariant::Legacy,
            &mut session,
            &StuckDetector::default(),
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;
        assert!(matches!(outcome, Some(StepOutcome::NoOp)));
        assert_eq!(session.status, SessionStatus::Init);
    }

    #[tokio::test]
    async fn test_preflight_noop_on_pending_action() {
        let mut session = running_session();
        session
            .set_pending_action(PendingAction {
                action_id: "a1".into(),
                kind: "run_command".into(),
            })
            .unwrap();
        let sink = MemorySink::new();
        let outcome = preflight(
            AgentVariant::Legacy,
            &mut session,
            &StuckDetector::default(),
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;
        assert!(matches!(outcome, Some(StepOutcome::NoOp)));
        // silent: no state change, no events
        assert_eq!(session.status, SessionStatus::Running);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_preflight_stuck_is_fatal() {
        let mut session = running_session();
        let mut detector = StuckDetector::default();
        for _ in 0..3 {
            detector.record("run_command:{}");
        }
        let sink = MemorySink::new();
        let outcome = preflight(
            AgentVariant::Legacy,
            &mut session,
            &detector,
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;
        assert!(matches!(
            outcome,
            Some(StepOutcome::Fatal {
                category: ErrorCategory::StuckDetection,
                ..
            })
        ));
        assert_eq!(session.status, SessionStatus::Error);
        assert!(session.last_fault.is_some());
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_preflight_iteration_cap() {
        let mut session = running_session();
        session.iteration = session.max_iterations;
        let sink = MemorySink::new();
        let outcome = preflight(
            AgentVariant::Legacy,
            &mut session,
            &StuckDetector::default(),
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;
        assert!(matches!(
            outcome,
            Some(StepOutcome::Fatal {
                category: ErrorCategory::ControlFlag,
                ..
            })
        ));
        assert_eq!(session.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_preflight_budget_ceiling() {
        let mut session = running_session();
        session.add_counter(META_COST, 2.5).unwrap();
        let config = SwitchyardConfig {
            budget_ceiling: Some(2.0),
            ..Default::default()
        };
        let sink = MemorySink::new();
        let outcome = preflight(
            AgentVariant::Legacy,
            &mut session,
            &StuckDetector::default(),
            &config,
            &sink,
        )
        .await;
        assert!(matches!(
            outcome,
            Some(StepOutcome::Fatal {
                category: ErrorCategory::ControlFlag,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_complete_turn_records_and_tags() {
        let mut session = running_session();
        let sink = MemorySink::new();
        let output = TurnOutput {
            action: Some(AgentAction::new(
                "a1",
                "run_command",
                serde_json::json!({"cmd": "ls"}),
            )),
            prompt_tokens: 100,
            completion_tokens: 20,
            cost: Some(0.01),
        };
        let outcome = complete_turn(
            output,
            AgentVariant::Legacy,
            &mut session,
            None,
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;

        let StepOutcome::Action(action) = outcome else {
            panic!("expected action outcome");
        };
        assert_eq!(action.source, Some(ActionSource::Agent));
        assert_eq!(session.steps(), 1);
        assert_eq!(session.counter(META_PROMPT_TOKENS), 100.0);
        assert_eq!(session.counter(META_COMPLETION_TOKENS), 20.0);
    }

    #[tokio::test]
    async fn test_missing_action_is_no_action_fault() {
        let mut session = running_session();
        let sink = MemorySink::new();
        let outcome = complete_turn(
            TurnOutput {
                action: None,
                prompt_tokens: 50,
                completion_tokens: 0,
                cost: None,
            },
            AgentVariant::Legacy,
            &mut session,
            None,
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;
        assert!(matches!(
            outcome,
            StepOutcome::Recoverable {
                category: ErrorCategory::NoAction,
                ..
            }
        ));
        // tokens still accumulate, steps do not
        assert_eq!(session.counter(META_PROMPT_TOKENS), 50.0);
        assert_eq!(session.steps(), 0);
        assert_eq!(session.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn test_context_window_condensation_path() {
        let mut session = running_session();
        let sink = MemorySink::new();
        let classified = fault::classify(
            &AgentFault::ContextWindowExceeded,
            FaultContext::default(),
            AgentVariant::Legacy,
        );
        let config = SwitchyardConfig {
            history_condensation_enabled: true,
            ..Default::default()
        };
        let outcome = fault_outcome(classified, &mut session, &config, &sink).await;
        assert!(matches!(
            outcome,
            StepOutcome::Recoverable {
                category: ErrorCategory::ContextWindow,
                ..
            }
        ));
        assert_eq!(session.status, SessionStatus::Running);
        assert!(matches!(
            sink.events()[0].0,
            Event::CondensationRequested { .. }
        ));
    }

    #[tokio::test]
    async fn test_context_window_fatal_when_disabled() {
        let mut session = running_session();
        let sink = MemorySink::new();
        let classified = fault::classify(
            &AgentFault::ContextWindowExceeded,
            FaultContext::default(),
            AgentVariant::Legacy,
        );
        let outcome = fault_outcome(
            classified,
            &mut session,
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;
        assert!(matches!(outcome, StepOutcome::Fatal { .. }));
        assert_eq!(session.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_unexpected_fault_is_fatal_with_excerpt() {
        let mut session = running_session();
        let sink = MemorySink::new();
        let classified = fault::classify(
            &AgentFault::Other("x".repeat(2000)),
            FaultContext::default(),
            AgentVariant::Legacy,
        );
        let outcome = fault_outcome(
            classified,
            &mut session,
            &SwitchyardConfig::default(),
            &sink,
        )
        .await;
        assert!(matches!(
            outcome,
            StepOutcome::Fatal {
                category: ErrorCategory::Unexpected,
                ..
            }
        ));
        let last_fault = session.last_fault.unwrap();
        // excerpt is bounded
        assert!(last_fault.len() < 700);
    }
}
