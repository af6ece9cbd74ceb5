//! Switchyard configuration
//!
//! Tunable parameters for the control plane. Defaults are conservative;
//! everything can be overridden from `SWITCHYARD_*` environment variables.

use serde::{Deserialize, Serialize};

/// How the adapter decides which execution track to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantOverride {
    /// Classify the agent handle structurally (the default).
    Auto,
    /// Force the SDK-delegated track regardless of handle shape.
    ForceSdk,
    /// Force the legacy completion track regardless of handle shape.
    ForceLegacy,
}

impl VariantOverride {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::ForceSdk => "sdk",
            Self::ForceLegacy => "legacy",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "sdk" | "force_sdk" => Some(Self::ForceSdk),
            "legacy" | "force_legacy" => Some(Self::ForceLegacy),
            _ => None,
        }
    }
}

/// Configuration for one control-plane adapter.
#[derive(Debug, Clone)]
pub struct SwitchyardConfig {
    // === Routing ===
    /// Route turns through the SDK-delegated executor when the handle
    /// classifies as SDK-delegated.
    pub sdk_routing_enabled: bool,
    /// Route control-plane construction through the SDK agent factory.
    pub sdk_control_plane_enabled: bool,
    /// Fall back to constructing a legacy agent when SDK construction fails.
    pub legacy_fallback_enabled: bool,
    /// Explicit variant override versus auto-detection.
    pub variant_override: VariantOverride,

    // === Run limits ===
    /// Hard cap on turns per run (must be >= 1).
    pub max_iterations: u32,
    /// Optional budget ceiling in dollars; `None` disables the check.
    pub budget_ceiling: Option<f64>,

    // === Fault handling ===
    /// Emit a condensation request instead of failing on context-window faults.
    pub history_condensation_enabled: bool,
    /// Retry attempt ceiling for retryable fault categories.
    pub max_retries: u32,
    /// Backoff between retry attempts, in seconds.
    pub retry_backoff_secs: f64,

    // === Timeouts ===
    /// Per-operation timeout in seconds (enforced by the host, recorded here).
    pub operation_timeout_secs: u64,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            // SDK routing ships dark until explicitly enabled
            sdk_routing_enabled: false,
            sdk_control_plane_enabled: false,
            legacy_fallback_enabled: true,
            variant_override: VariantOverride::Auto,

            max_iterations: 100,
            budget_ceiling: None,

            history_condensation_enabled: false,
            max_retries: 3,
            retry_backoff_secs: 1.0,

            operation_timeout_secs: 300,
        }
    }
}

impl SwitchyardConfig {
    /// Load config from environment variables, starting from defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SWITCHYARD_SDK_ROUTING") {
            config.sdk_routing_enabled = truthy(&val);
        }
        if let Ok(val) = std::env::var("SWITCHYARD_SDK_CONTROL_PLANE") {
            config.sdk_control_plane_enabled = truthy(&val);
        }
        if let Ok(val) = std::env::var("SWITCHYARD_LEGACY_FALLBACK") {
            config.legacy_fallback_enabled = truthy(&val);
        }
        if let Ok(val) = std::env::var("SWITCHYARD_VARIANT") {
            if let Some(v) = VariantOverride::from_str(&val) {
                config.variant_override = v;
            }
        }
        if let Ok(val) = std::env::var("SWITCHYARD_MAX_ITERATIONS") {
            if let Ok(n) = val.parse::<u32>() {
                config.max_iterations = n.max(1);
            }
        }
        if let Ok(val) = std::env::var("SWITCHYARD_BUDGET_CEILING") {
            if let Ok(b) = val.parse::<f64>() {
                config.budget_ceiling = Some(b);
            }
        }
        if let Ok(val) = std::env::var("SWITCHYARD_HISTORY_CONDENSATION") {
            config.history_condensation_enabled = truthy(&val);
        }
        if let Ok(val) = std::env::var("SWITCHYARD_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                config.max_retries = n;
            }
        }
        if let Ok(val) = std::env::var("SWITCHYARD_RETRY_BACKOFF_SECS") {
            if let Ok(s) = val.parse() {
                config.retry_backoff_secs = s;
            }
        }
        if let Ok(val) = std::env::var("SWITCHYARD_OPERATION_TIMEOUT_SECS") {
            if let Ok(s) = val.parse() {
                config.operation_timeout_secs = s;
            }
        }

        config
    }

    /// Config for incremental SDK rollout: SDK routing on, fallback on.
    pub fn sdk_rollout() -> Self {
        Self {
            sdk_routing_enabled: true,
            sdk_control_plane_enabled: true,
            legacy_fallback_enabled: true,
            ..Default::default()
        }
    }

    /// Config pinned to the legacy track only.
    pub fn legacy_only() -> Self {
        Self {
            sdk_routing_enabled: false,
            sdk_control_plane_enabled: false,
            variant_override: VariantOverride::ForceLegacy,
            ..Default::default()
        }
    }
}

fn truthy(val: &str) -> bool {
    val == "1" || val.to_lowercase() == "true"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwitchyardConfig::default();
        assert!(!config.sdk_routing_enabled);
        assert!(config.legacy_fallback_enabled);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.operation_timeout_secs, 300);
        assert_eq!(config.variant_override, VariantOverride::Auto);
    }

    #[test]
    fn test_variant_override_roundtrip() {
        for v in [
            VariantOverride::Auto,
            VariantOverride::ForceSdk,
            VariantOverride::ForceLegacy,
        ] {
            assert_eq!(VariantOverride::from_str(v.as_str()), Some(v));
        }
        assert_eq!(VariantOverride::from_str("bogus"), None);
    }

    #[test]
    fn test_sdk_rollout_preset() {
        let config = SwitchyardConfig::sdk_rollout();
        assert!(config.sdk_routing_enabled);
        assert!(config.legacy_fallback_enabled);
    }

    #[test]
    fn test_truthy() {
        assert!(truthy("1"));
        assert!(truthy("true"));
        assert!(truthy("TRUE"));
        assert!(!truthy("0"));
        assert!(!truthy("no"));
    }
}
