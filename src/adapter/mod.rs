//! Control-plane adapter
//!
//! Outward-facing coordinator for one agent run. Owns the session state,
//! resolves which step executor drives each turn, aggregates metrics, and
//! drives the loop to a terminal status. One adapter instance owns one run
//! at a time; session state is never shared for concurrent mutation.

pub mod metrics;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::classify::ClassifierCache;
use crate::agent::{AgentFactory, AgentHandle, AgentVariant};
use crate::config::{SwitchyardConfig, VariantOverride};
use crate::events::{Event, EventSink, EventSource, NullSink};
use crate::executor::{self, StepOutcome, StuckDetector};
use crate::session::{SessionSnapshot, SessionState, SessionStatus};

/// Coordinates one run of one agent.
pub struct ControlPlaneAdapter {
    config: SwitchyardConfig,
    handle: AgentHandle,
    session: SessionState,
    cache: ClassifierCache,
    stuck: StuckDetector,
    sink: Arc<dyn EventSink>,
    external_stats: HashMap<String, Value>,
    run_hint: Option<AgentVariant>,
}

impl ControlPlaneAdapter {
    /// Wrap an already-constructed agent handle.
    pub fn new(handle: AgentHandle, config: SwitchyardConfig, sink: Arc<dyn EventSink>) -> Self {
        let session = SessionState::new(config.max_iterations);
        Self {
            config,
            handle,
            session,
            cache: ClassifierCache::new(),
            stuck: StuckDetector::default(),
            sink,
            external_stats: HashMap::new(),
            run_hint: None,
        }
    }

    /// Wrap a handle with the default (null) event sink.
    pub fn with_null_sink(handle: AgentHandle, config: SwitchyardConfig) -> Self {
        Self::new(handle, config, Arc::new(NullSink))
    }

    /// Construct the agent through a factory, preferring the SDK build when
    /// SDK control-plane routing is enabled. If the SDK build fails and
    /// legacy fallback is on, the legacy build is attempted once for the
    /// same logical agent name; a second failure propagates. The fallback
    /// is a construction-time decision, never revisited per turn.
    pub fn construct(
        factory: &dyn AgentFactory,
        name: &str,
        config: SwitchyardConfig,
        sink: Arc<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        let handle = if config.sdk_control_plane_enabled {
            match factory.build_sdk(name) {
                Ok(handle) => handle,
                Err(err) if config.legacy_fallback_enabled => {
                    warn!(
                        agent = name,
                        error = %err,
                        "sdk agent construction failed, falling back to legacy"
                    );
                    factory
                        .build_legacy(name)
                        .with_context(|| format!("legacy fallback failed for agent {name}"))?
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("sdk agent construction failed for {name}"));
                }
            }
        } else {
            factory
                .build_legacy(name)
                .with_context(|| format!("legacy agent construction failed for {name}"))?
        };
        Ok(Self::new(handle, config, sink))
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    /// Drop memoized classification results (e.g. between rollout phases).
    pub fn clear_classifier_cache(&mut self) {
        self.cache.clear();
    }

    /// Which executor drives the next turn. The configured override wins;
    /// otherwise a per-run hint, then classification, both gated by the SDK
    /// routing flag.
    fn effective_variant(&mut self) -> AgentVariant {
        match self.config.variant_override {
            VariantOverride::ForceSdk => AgentVariant::SdkDelegated,
            VariantOverride::ForceLegacy => AgentVariant::Legacy,
            VariantOverride::Auto => {
                let classified = match self.run_hint {
                    Some(hinted) => hinted,
                    None => self.cache.classify(Some(&self.handle)),
                };
                if classified == AgentVariant::SdkDelegated && !self.config.sdk_routing_enabled {
                    warn!(
                        agent = self.handle.name(),
                        "sdk routing disabled, routing sdk-classified agent to legacy track"
                    );
                    AgentVariant::Legacy
                } else {
                    classified
                }
            }
        }
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Start a run for the given task and drive it to a terminal status.
    /// Returns the terminal session snapshot. A variant hint, when given,
    /// replaces auto-detection for this run; a configured override still
    /// wins over the hint.
    pub async fn initiate(
        &mut self,
        task: &str,
        variant_hint: Option<AgentVariant>,
    ) -> anyhow::Result<SessionSnapshot> {
        self.run_hint = variant_hint;
        anyhow::ensure!(
            self.session.status == SessionStatus::Init,
            "session {} is {}, expected init (call reset first)",
            self.session.id,
            self.session.status
        );

        info!(session = %self.session.id, "run initiated");
        self.sink
            .publish(
                Event::RunStarted {
                    session_id: self.session.id.clone(),
                    task: task.to_string(),
                },
                EventSource::ControlPlane,
            )
            .await;

        self.transition(SessionStatus::Running).await;
        self.run_to_completion(None).await;

        self.sink
            .publish(
                Event::RunFinished {
                    session_id: self.session.id.clone(),
                    status: self.session.status,
                    steps: self.session.steps(),
                },
                EventSource::ControlPlane,
            )
            .await;

        Ok(self.session.snapshot())
    }

    /// Drive the loop until the session reaches a terminal status or the
    /// optional step budget runs out. Turns are strictly sequential; a
    /// reached budget skips the next iteration but never cancels an
    /// in-flight turn.
    pub async fn run_to_completion(&mut self, max_steps: Option<u32>) {
        let mut external_steps: u32 = 0;

        loop {
            if self.session.is_terminal() {
                break;
            }
            if let Some(cap) = max_steps {
                if external_steps >= cap {
                    warn!(
                        session = %self.session.id,
                        cap,
                        "max steps reached, stopping run"
                    );
                    self.transition(SessionStatus::Stopped).await;
                    break;
                }
            }

            let variant = self.effective_variant();
            let outcome = executor::execute_step(
                variant,
                &self.handle,
                &mut self.session,
                &mut self.stuck,
                &self.config,
                self.sink.as_ref(),
            )
            .await;

            match outcome {
                StepOutcome::Action(action) if action.is_finish() => {
                    self.transition(SessionStatus::Finished).await;
                    break;
                }
                StepOutcome::Action(_) => {
                    external_steps += 1;
                    // give other tasks a chance between turns
                    tokio::task::yield_now().await;
                }
                StepOutcome::Recoverable { .. } => {
                    tokio::task::yield_now().await;
                }
                // a no-op is a resolved error or an intentional halt
                StepOutcome::NoOp => break,
                // session already transitioned to error
                StepOutcome::Fatal { .. } => break,
            }
        }
    }

    /// Variant-local counters merged with externally supplied conversation
    /// statistics; external values win on conflicting keys.
    pub fn metrics(&self) -> HashMap<String, Value> {
        let mut local = self.session.metadata().clone();
        local.insert("session_id".to_string(), Value::from(self.session.id.clone()));
        local.insert(
            "status".to_string(),
            Value::from(self.session.status.as_str()),
        );
        local.insert(
            "iteration".to_string(),
            Value::from(self.session.iteration),
        );
        metrics::merge_metrics(&local, &self.external_stats)
    }

    /// Supply authoritative conversation-level statistics for the merge.
    pub fn set_external_stats(&mut self, stats: HashMap<String, Value>) {
        self.external_stats = stats;
    }

    /// Adopt a session restored from an external store, e.g. to resume a
    /// run that was snapshotted mid-flight. The loop detector restarts
    /// empty; its window does not survive snapshots.
    pub fn restore_session(&mut self, session: SessionState) {
        self.stuck.reset();
        self.session = session;
    }

    /// Reinitialize for a new run: session back to `Init` (same id), pending
    /// action cleared, loop detector reset, agent reset hook invoked.
    pub async fn reset(&mut self) {
        let id = self.session.id.clone();
        self.session = SessionState::with_id(id, self.config.max_iterations);
        self.stuck.reset();
        self.external_stats.clear();
        self.run_hint = None;
        self.handle.reset().await;
        info!(session = %self.session.id, "adapter reset");
    }

    async fn transition(&mut self, status: SessionStatus) {
        self.session.status = status;
        self.sink
            .publish(
                Event::StatusChanged {
                    session_id: self.session.id.clone(),
                    status,
                },
                EventSource::ControlPlane,
            )
            .await;
    }
}
