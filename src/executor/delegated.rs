//! SDK-delegated step executor
//!
//! Drives one turn through the agent's delegated-execution runner. The
//! runner is already asynchronous; no bridging is needed here.

use tracing::debug;

use crate::agent::{AgentHandle, AgentVariant};
use crate::config::SwitchyardConfig;
use crate::events::{Event, EventSink, EventSource};
use crate::executor::{self, StepOutcome};
use crate::fault::{self, ErrorCategory};
use crate::session::SessionState;

pub(super) async fn run_turn(
    handle: &AgentHandle,
    session: &mut SessionState,
    config: &SwitchyardConfig,
    sink: &dyn EventSink,
) -> StepOutcome {
    let Some(runner) = handle.delegated() else {
        // structurally misconfigured handle: classified SDK-delegated but
        // no delegated runner was ever constructed
        let message = format!(
            "agent {} classified sdk_delegated but has no delegated runner",
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
            "delegated turn"
        );
        match runner.run_turn(session).await {
            Ok(output) => {
                return executor::complete_turn(
                    output,
                    AgentVariant::SdkDelegated,
                    session,
                    None,
                    config,
                    sink,
                )
                .await;
            }
            Err(agent_fault) => {
                let classified = fault::classify(
                    &agent_fault,
                    executor::turn_context(session, None),
                    AgentVariant::SdkDelegated,
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
