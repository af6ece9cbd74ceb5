//! Agent type classification
//!
//! Deterministic, infallible mapping from a handle's structural shape to an
//! execution variant. Strong signals are checked first, and anything the
//! rules do not recognize classifies as legacy so the rest of the system
//! always has a defined execution path.

use std::collections::HashMap;

use tracing::debug;

use super::{AgentHandle, AgentVariant, HandleShape, SDK_MODULE_SEGMENT, SDK_TYPE_SUFFIX};

/// Classify an agent handle. A missing handle classifies as legacy by
/// policy; this function never fails.
pub fn classify(handle: Option<&AgentHandle>) -> AgentVariant {
    match handle {
        Some(h) => h.variant(),
        None => {
            debug!("classifying null handle as legacy");
            AgentVariant::Legacy
        }
    }
}

/// Classify from structural shape. Precedence order, first match wins:
///
/// 1. type name ends with the SDK suffix
/// 2. a delegated runner is present and its type carries the SDK marker
/// 3. a delegated-execution configuration attribute is present
/// 4. the defining module path contains an `sdk` segment
/// 5. legacy (default)
pub fn classify_shape(shape: &HandleShape, has_delegated: bool) -> AgentVariant {
    let variant = if shape.type_name.ends_with(SDK_TYPE_SUFFIX) {
        AgentVariant::SdkDelegated
    } else if has_delegated && shape.delegated_marker {
        AgentVariant::SdkDelegated
    } else if shape.has_delegated_config {
        AgentVariant::SdkDelegated
    } else if shape
        .module_path
        .split("::")
        .any(|segment| segment == SDK_MODULE_SEGMENT)
    {
        AgentVariant::SdkDelegated
    } else {
        AgentVariant::Legacy
    };

    debug!(
        type_name = %shape.type_name,
        variant = variant.as_str(),
        "classified agent shape"
    );
    variant
}

/// Memoized classification results, keyed by handle name.
///
/// Owned by a control-plane adapter (or injected into one) rather than held
/// as process-global state; `clear` resets it between rollout phases.
#[derive(Debug, Default)]
pub struct ClassifierCache {
    entries: HashMap<String, AgentVariant>,
}

impl ClassifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify through the cache. Safe to call repeatedly; classification
    /// is deterministic so a hit always matches a fresh computation.
    pub fn classify(&mut self, handle: Option<&AgentHandle>) -> AgentVariant {
        let Some(h) = handle else {
            return AgentVariant::Legacy;
        };
        if let Some(cached) = self.entries.get(h.name()) {
            return *cached;
        }
        let variant = classify(Some(h));
        self.entries.insert(h.name().to_string(), variant);
        variant
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
