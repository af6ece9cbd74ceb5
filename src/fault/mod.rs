//! Unified fault classification
//!
//! Every fault raised during a turn, from either execution track, maps into
//! exactly one category of a closed taxonomy. The step executors and the
//! control loop branch on categories, never on concrete fault types, which
//! keeps the two tracks uniform.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::agent::AgentVariant;

/// Retry attempt ceiling for retryable categories.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Marker substring that reclassifies a generic bad-request fault as a
/// content-policy refusal.
const CONTENT_POLICY_MARKER: &str = "content policy";

/// A fault raised while executing one agent turn.
///
/// Concrete agents surface their failures through this enum; anything they
/// cannot name goes through [`AgentFault::Other`] (or [`AgentFault::Sdk`]
/// for opaque SDK runtime failures).
#[derive(Debug, Error)]
pub enum AgentFault {
    /// Loop detection reported the agent repeating itself.
    #[error("agent stuck in a loop: {0}")]
    StuckInLoop(String),

    /// Prompt plus history no longer fits the model context.
    #[error("context window exceeded")]
    ContextWindowExceeded,

    /// Credentials rejected by the provider.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Provider rate limit hit.
    #[error("rate limited")]
    RateLimited {
        /// Provider-suggested wait before retrying, when known.
        retry_after_ms: Option<u64>,
    },

    /// Provider or SDK service unreachable or down.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Provider returned a 5xx-style internal error.
    #[error("internal server error: {0}")]
    InternalServer(String),

    /// Request refused for content policy reasons.
    #[error("content policy refusal: {0}")]
    ContentPolicy(String),

    /// Generic bad request; the message may carry a content-policy marker.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The agent produced an action that failed to parse or validate.
    #[error("malformed action: {0}")]
    MalformedAction(String),

    /// The agent turn completed without producing an action.
    #[error("no action returned")]
    NoActionReturned,

    /// A function/tool call failed argument validation.
    #[error("function call validation failed for {name}: {detail}")]
    FunctionCallValidation { name: String, detail: String },

    /// The agent called a function/tool that does not exist.
    #[error("function does not exist: {0}")]
    FunctionNotExist(String),

    /// Generic completion/response failure from the LLM path.
    #[error("completion error: {0}")]
    Completion(String),

    /// A control flag (iteration or budget ceiling) tripped.
    #[error("control flag: {0}")]
    ControlFlag(String),

    /// Opaque failure from the delegated SDK runtime.
    #[error("sdk error: {0}")]
    Sdk(String),

    /// Anything else.
    #[error("unexpected fault: {0}")]
    Other(String),
}

impl AgentFault {
    /// Stable type name used in the fallback user-facing message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::StuckInLoop(_) => "StuckInLoop",
            Self::ContextWindowExceeded => "ContextWindowExceeded",
            Self::Authentication(_) => "Authentication",
            Self::RateLimited { .. } => "RateLimited",
            Self::ServiceUnavailable(_) => "ServiceUnavailable",
            Self::InternalServer(_) => "InternalServer",
            Self::ContentPolicy(_) => "ContentPolicy",
            Self::BadRequest(_) => "BadRequest",
            Self::MalformedAction(_) => "MalformedAction",
            Self::NoActionReturned => "NoActionReturned",
            Self::FunctionCallValidation { .. } => "FunctionCallValidation",
            Self::FunctionNotExist(_) => "FunctionNotExist",
            Self::Completion(_) => "Completion",
            Self::ControlFlag(_) => "ControlFlag",
            Self::Sdk(_) => "Sdk",
            Self::Other(_) => "Other",
        }
    }
}

/// The closed category set. Any fault not matching a specific rule is
/// `Unexpected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    LlmError,
    ContextWindow,
    ControlFlag,
    StuckDetection,
    Unexpected,
    Authentication,
    RateLimit,
    ServiceUnavailable,
    InternalServer,
    ContentPolicy,
    MalformedAction,
    NoAction,
    FunctionCallError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LlmError => "llm_error",
            Self::ContextWindow => "context_window",
            Self::ControlFlag => "control_flag",
            Self::StuckDetection => "stuck_detection",
            Self::Unexpected => "unexpected",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalServer => "internal_server",
            Self::ContentPolicy => "content_policy",
            Self::MalformedAction => "malformed_action",
            Self::NoAction => "no_action",
            Self::FunctionCallError => "function_call_error",
        }
    }

    /// Categories the run loop may continue past on the next iteration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit
                | Self::ServiceUnavailable
                | Self::MalformedAction
                | Self::NoAction
                | Self::FunctionCallError
                | Self::ContextWindow
        )
    }

    /// Stricter subset worth re-invoking the provider for within a turn.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::ServiceUnavailable | Self::InternalServer
        )
    }

    /// Fixed user-facing template, if this category has one.
    fn message_template(&self) -> Option<&'static str> {
        match self {
            Self::LlmError => Some("The language model call failed."),
            Self::ContextWindow => {
                Some("Context window exceeded. History must be condensed before continuing.")
            }
            Self::ControlFlag => Some("Run halted by a control flag (iteration or budget limit)."),
            Self::StuckDetection => Some("Agent appears to be stuck in a loop. Stopping."),
            Self::Authentication => Some("Authentication failed. Check the provider credentials."),
            Self::RateLimit => Some("Rate limit reached. The request will be retried."),
            Self::ServiceUnavailable => Some("The agent service is temporarily unavailable."),
            Self::InternalServer => Some("The agent service reported an internal error."),
            Self::ContentPolicy => Some("Content policy violation. The request was refused."),
            Self::MalformedAction => Some("The agent produced a malformed action."),
            Self::NoAction => Some("The agent did not return an action."),
            Self::FunctionCallError => Some("A function call failed validation."),
            Self::Unexpected => None,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry predicate: retryable category and attempt count under the ceiling.
pub fn should_retry(category: ErrorCategory, retry_count: u32) -> bool {
    should_retry_within(category, retry_count, MAX_RETRY_ATTEMPTS)
}

/// Retry predicate with an explicit ceiling (config override).
pub fn should_retry_within(category: ErrorCategory, retry_count: u32, ceiling: u32) -> bool {
    category.is_retryable() && retry_count < ceiling
}

/// Context captured alongside a classified fault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultContext {
    /// Identifier of the action being executed, when known.
    pub action_id: Option<String>,
    /// Loop iteration at the time of the fault.
    pub turn: Option<u32>,
}

/// The categorized, structured form of a raised fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedFault {
    pub category: ErrorCategory,
    /// Display form of the original fault.
    pub fault: String,
    /// Stable type name of the original fault.
    pub fault_type: String,
    pub context: FaultContext,
    pub variant: AgentVariant,
    /// Message suitable for direct display.
    pub user_message: String,
}

/// Map a raised fault into exactly one category (ordered, first match wins)
/// and emit a log line at the category's severity. Never raises.
pub fn classify(fault: &AgentFault, context: FaultContext, variant: AgentVariant) -> ClassifiedFault {
    let category = categorize(fault, variant);

    let user_message = match category.message_template() {
        Some(template) => template.to_string(),
        None => format!("An error occurred: {}", fault.type_name()),
    };

    let classified = ClassifiedFault {
        category,
        fault: fault.to_string(),
        fault_type: fault.type_name().to_string(),
        context,
        variant,
        user_message,
    };

    log_classified(&classified, fault);
    classified
}

fn categorize(fault: &AgentFault, variant: AgentVariant) -> ErrorCategory {
    match fault {
        AgentFault::StuckInLoop(_) => ErrorCategory::StuckDetection,
        AgentFault::ContextWindowExceeded => ErrorCategory::ContextWindow,
        AgentFault::Authentication(_) => ErrorCategory::Authentication,
        AgentFault::RateLimited { .. } => ErrorCategory::RateLimit,
        AgentFault::ServiceUnavailable(_) => ErrorCategory::ServiceUnavailable,
        AgentFault::InternalServer(_) => ErrorCategory::InternalServer,
        AgentFault::ContentPolicy(_) => ErrorCategory::ContentPolicy,
        AgentFault::BadRequest(msg) if is_content_policy(msg) => ErrorCategory::ContentPolicy,
        AgentFault::MalformedAction(_) => ErrorCategory::MalformedAction,
        AgentFault::NoActionReturned => ErrorCategory::NoAction,
        AgentFault::FunctionCallValidation { .. } | AgentFault::FunctionNotExist(_) => {
            ErrorCategory::FunctionCallError
        }
        AgentFault::Completion(_) | AgentFault::BadRequest(_) => ErrorCategory::LlmError,
        AgentFault::ControlFlag(_) => ErrorCategory::ControlFlag,
        // The SDK runtime does not yet surface typed faults; fold anything
        // unrecognized from that track into LlmError until it does.
        AgentFault::Sdk(_) | AgentFault::Other(_) if variant == AgentVariant::SdkDelegated => {
            ErrorCategory::LlmError
        }
        AgentFault::Sdk(_) | AgentFault::Other(_) => ErrorCategory::Unexpected,
    }
}

fn is_content_policy(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains(CONTENT_POLICY_MARKER) || lower.contains("content_policy")
}

/// Severity policy: credential/policy/unknown faults log at error with the
/// full fault debug form; transient provider faults at warn; the rest at
/// info. Debug echoes the turn context.
fn log_classified(classified: &ClassifiedFault, fault: &AgentFault) {
    match classified.category {
        ErrorCategory::Authentication | ErrorCategory::ContentPolicy | ErrorCategory::Unexpected => {
            error!(
                category = classified.category.as_str(),
                variant = classified.variant.as_str(),
                fault = ?fault,
                "turn fault"
            );
        }
        ErrorCategory::RateLimit
        | ErrorCategory::ServiceUnavailable
        | ErrorCategory::InternalServer => {
            warn!(
                category = classified.category.as_str(),
                variant = classified.variant.as_str(),
                "turn fault: {}",
                classified.fault
            );
        }
        _ => {
            info!(
                category = classified.category.as_str(),
                variant = classified.variant.as_str(),
                "turn fault: {}",
                classified.fault
            );
        }
    }
    debug!(
        turn = ?classified.context.turn,
        action = ?classified.context.action_id,
        "fault context"
    );
}
