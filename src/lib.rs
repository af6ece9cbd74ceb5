//! Switchyard - control plane for mixed-variant agent runs
//!
//! One agent run, two execution tracks. A run is owned by a
//! [`ControlPlaneAdapter`] which classifies the agent handle once
//! (SDK-delegated vs legacy completion-based), then drives a sequential
//! turn loop through the matching step executor. Faults from either track
//! are folded into a single closed error taxonomy so the loop never needs
//! to know which track produced them.

pub mod adapter;
pub mod agent;
pub mod config;
pub mod events;
pub mod executor;
pub mod fault;
pub mod session;

pub use adapter::ControlPlaneAdapter;
pub use agent::{AgentHandle, AgentVariant};
pub use config::SwitchyardConfig;
pub use events::{Event, EventSink, EventSource};
pub use executor::StepOutcome;
pub use fault::{AgentFault, ClassifiedFault, ErrorCategory};
pub use session::{SessionState, SessionStatus};
