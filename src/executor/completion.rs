//! Legacy step executor
//!
//! Drives one turn through the agent's raw-completion turn method and
//! threads the per-session stuck detector across turns. The trait is async
//! end-to-end; blocking implementations wrap themselves at the boundary.

use tracing::debug;

use crate::agent::{AgentHandle, AgentVariant};
use crate::config::SwitchyardConfig;
use crate::events::{Event, EventSink, EventSource};
use crate::executor::{self, StepOutcome, StuckDetector};
use crate::fault::{self, ErrorCategory};
use crate::session::SessionState;

pub(super) async fn run_turn(
    handle: &AgentHandle,
    session: &mut SessionState,
    stuck: &mut StuckDetector,
    config: &SwitchyardConfig,
    sink: &dyn EventSink,
) -> StepOutcome {
    let Some(runner) = handle.completion() else {
        let message = format!(
            "agent {} classified legacy but has no completion runner",
            handle.name()
        );
        session.fail(&message);
        sink.publish(
            Event::Observation {
                category: ErrorCategory::Unexpected,
                message: message.clone(),
            },
            EventSource::ControlPlane,
        )
        .await;
        return StepOutcome::Fatal {
            category: ErrorCategory::Unexpected,
            message,
        };
    };

    let runner = runner.clone();
    let mut attempt: u32 = 0;
    loop {
        debug!(
            session = %session.id,
            turn = session.iteration,
            attempt,
            "legacy turn"
        );
        match runner.take_turn(session).await {
            Ok(output) => {
                return executor::complete_turn(
                    output,
                    AgentVariant::Legacy,
                    session,
                    Some(&mut *stuck),
                    config,
                    sink,
                )
                .await;
            }
            Err(agent_fault) => {
                let classified = fault::classify(
                    &agent_fault,
                    executor::turn_context(session, None),
                    AgentVariant::Legacy,
                );
                if executor::retry_after_backoff(&classified, attempt, config).await {
                    attempt += 1;
                    continue;
                }
                return executor::fault_outcome(classified, session, config, sink).await;
            }
        }
    }
}
