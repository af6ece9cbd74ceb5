//! Agent handles and the collaborator traits behind them
//!
//! An [`AgentHandle`] is an opaque capability for one conversational agent.
//! Its variant (SDK-delegated vs legacy) is decided once at construction by
//! the classifier and stored as an immutable discriminant; nothing probes
//! the handle at turn time.

pub mod classify;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fault::AgentFault;
use crate::session::SessionState;

/// Type-name suffix identifying SDK-delegated agent classes.
pub const SDK_TYPE_SUFFIX: &str = "SDK";
/// Module-path segment identifying SDK-delegated agent modules.
pub const SDK_MODULE_SEGMENT: &str = "sdk";

/// The two execution tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentVariant {
    /// Turn logic runs inside an external, opaque agent runtime.
    SdkDelegated,
    /// Turn logic issues direct completion calls and owns its own loop.
    Legacy,
}

impl AgentVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SdkDelegated => "sdk_delegated",
            Self::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for AgentVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the conversation produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Agent,
    User,
}

/// One action produced by an agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAction {
    /// Opaque action identifier.
    pub id: String,
    /// Type tag, e.g. "run_command", "message", "finish".
    pub kind: String,
    /// Free-form action payload.
    pub payload: Value,
    /// Originating side; set by the executor before the action is handed
    /// back to the loop.
    pub source: Option<ActionSource>,
}

impl AgentAction {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
            source: None,
        }
    }

    /// Whether this action denotes run completion.
    pub fn is_finish(&self) -> bool {
        self.kind == "finish"
    }

    /// Signature used by loop detection: type tag plus payload digest.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.kind, self.payload)
    }
}

/// Output of one agent turn: at most one action, plus token accounting.
#[derive(Debug, Clone, Default)]
pub struct TurnOutput {
    pub action: Option<AgentAction>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Dollar cost of the turn, when the provider reports one.
    pub cost: Option<f64>,
}

impl TurnOutput {
    pub fn action(action: AgentAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }
}

/// Asynchronous single-turn entry point of an SDK-delegated agent.
#[async_trait]
pub trait DelegatedAgent: Send + Sync {
    async fn run_turn(&self, session: &SessionState) -> Result<TurnOutput, AgentFault>;

    /// Optional reset hook invoked by the adapter's `reset`.
    async fn reset(&self) {}
}

/// Single-turn entry point of a legacy completion-based agent.
///
/// The trait is async end-to-end; a blocking implementation wraps itself
/// once (e.g. `spawn_blocking`) inside its impl rather than having the
/// loop bridge per call.
#[async_trait]
pub trait CompletionAgent: Send + Sync {
    async fn take_turn(&self, session: &SessionState) -> Result<TurnOutput, AgentFault>;

    /// Optional reset hook invoked by the adapter's `reset`.
    async fn reset(&self) {}
}

/// Structural facts about an agent handle, captured at construction.
/// These are the only inputs the classifier looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleShape {
    /// Runtime type name of the agent class.
    pub type_name: String,
    /// `::`-separated module path of the defining type.
    pub module_path: String,
    /// The delegated runner's type carries the SDK marker attribute.
    pub delegated_marker: bool,
    /// A delegated-execution configuration attribute is present.
    pub has_delegated_config: bool,
}

/// Opaque capability object for one conversational agent instance.
///
/// Both runner fields may be populated at once (backward-compatibility
/// shims); the variant discriminant decides which one drives execution.
#[derive(Clone)]
pub struct AgentHandle {
    name: String,
    shape: HandleShape,
    variant: AgentVariant,
    delegated: Option<Arc<dyn DelegatedAgent>>,
    completion: Option<Arc<dyn CompletionAgent>>,
}

impl AgentHandle {
    /// Build a handle, classifying it exactly once.
    pub fn new(
        name: impl Into<String>,
        shape: HandleShape,
        delegated: Option<Arc<dyn DelegatedAgent>>,
        completion: Option<Arc<dyn CompletionAgent>>,
    ) -> Self {
        let variant = classify::classify_shape(&shape, delegated.is_some());
        Self {
            name: name.into(),
            shape,
            variant,
            delegated,
            completion,
        }
    }

    /// Logical agent name; also the classifier-cache key.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &HandleShape {
        &self.shape
    }

    /// The discriminant decided at construction.
    pub fn variant(&self) -> AgentVariant {
        self.variant
    }

    pub fn delegated(&self) -> Option<&Arc<dyn DelegatedAgent>> {
        self.delegated.as_ref()
    }

    pub fn completion(&self) -> Option<&Arc<dyn CompletionAgent>> {
        self.completion.as_ref()
    }

    /// Invoke the reset hook of whichever runner drives execution.
    pub async fn reset(&self) {
        match self.variant {
            AgentVariant::SdkDelegated => {
                if let Some(runner) = &self.delegated {
                    runner.reset().await;
                }
            }
            AgentVariant::Legacy => {
                if let Some(runner) = &self.completion {
                    runner.reset().await;
                }
            }
        }
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("name", &self.name)
            .field("variant", &self.variant)
            .field("shape", &self.shape)
            .field("has_delegated", &self.delegated.is_some())
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

/// Builds concrete agents for the adapter. The SDK build may fail (e.g. the
/// delegated runtime cannot be constructed); the adapter then falls back to
/// the legacy build when configured to.
pub trait AgentFactory: Send + Sync {
    fn build_sdk(&self, name: &str) -> anyhow::Result<AgentHandle>;
    fn build_legacy(&self, name: &str) -> anyhow::Result<AgentHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_finish_and_signature() {
        let action = AgentAction::new("a1", "finish", serde_json::json!({"ok": true}));
        assert!(action.is_finish());
        assert!(action.signature().starts_with("finish:"));

        let action = AgentAction::new("a2", "run_command", serde_json::json!({"cmd": "ls"}));
        assert!(!action.is_finish());
    }

    #[test]
    fn test_handle_variant_fixed_at_construction() {
        let handle = AgentHandle::new(
            "coder",
            HandleShape {
                type_name: "CoderAgentSDK".into(),
                ..Default::default()
            },
            None,
            None,
        );
        assert_eq!(handle.variant(), AgentVariant::SdkDelegated);
        // repeated reads return the same discriminant
        assert_eq!(handle.variant(), handle.variant());
    }
}
