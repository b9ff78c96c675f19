//! Policy loading from TOML files
//!
//! Provides file-based policy loading with validation and the
//! conservative fallback used when a policy cannot be loaded.

use std::path::Path;

use regex::Regex;
use tracing::{info, warn};

use super::schema::TOP_LEVEL_KEYS;
use super::{ConfigError, ConfigResult, PolicyConfig};

/// Tolerance for the humanization weight sum.
const WEIGHT_EPSILON: f64 = 1e-6;

/// A parsed policy together with non-fatal load warnings
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub policy: PolicyConfig,
    pub warnings: Vec<String>,
}

/// Load and validate a policy from a TOML file
pub fn load_policy_from_file(path: impl AsRef<Path>) -> ConfigResult<LoadedPolicy> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_policy(&content)
}

/// Parse and validate a policy from a TOML string
pub fn parse_policy(toml_content: &str) -> ConfigResult<LoadedPolicy> {
    let table: toml::Table =
        toml::from_str(toml_content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if let Some(key) = table
        .keys()
        .find(|k| !TOP_LEVEL_KEYS.contains(&k.as_str()))
    {
        return Err(ConfigError::UnknownKey(key.clone()));
    }

    let warnings = TOP_LEVEL_KEYS
        .iter()
        .filter(|k| !table.contains_key(**k))
        .map(|k| format!("policy section `{}` missing, using defaults", k))
        .collect();

    let policy: PolicyConfig =
        toml::from_str(toml_content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate_policy(&policy)?;

    Ok(LoadedPolicy { policy, warnings })
}

/// Load a policy, falling back to the conservative built-in policy on any error.
///
/// The returned warnings always describe why the fallback was taken.
pub fn load_policy_or_conservative(path: impl AsRef<Path>) -> LoadedPolicy {
    let path = path.as_ref();
    match load_policy_from_file(path) {
        Ok(loaded) => {
            info!(path = %path.display(), warnings = loaded.warnings.len(), "Policy loaded");
            loaded
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Policy load failed, using conservative defaults");
            LoadedPolicy {
                policy: PolicyConfig::conservative(),
                warnings: vec![format!(
                    "policy {} could not be loaded ({}); conservative defaults in effect",
                    path.display(),
                    e
                )],
            }
        }
    }
}

/// Validate a policy for consistency
pub fn validate_policy(policy: &PolicyConfig) -> ConfigResult<()> {
    let caps = &policy.session_caps;
    if !(caps.max_session_hours > 0.0) {
        return invalid("session_caps.max_session_hours must be positive");
    }

    let humanization = &policy.humanization;
    if !(0.0..=1.0).contains(&humanization.base_probability) {
        return invalid("humanization.base_probability must be within [0, 1]");
    }
    if humanization.enabled {
        if humanization.actions.is_empty() {
            return invalid("humanization.actions must not be empty when enabled");
        }
        if humanization.actions.iter().any(|a| !(a.weight >= 0.0)) {
            return invalid("humanization weights must be non-negative");
        }
        let sum: f64 = humanization.actions.iter().map(|a| a.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ConfigError::Validation(format!(
                "humanization weights must sum to 1.0 (got {:.6})",
                sum
            )));
        }
        if let Some(action) = humanization
            .actions
            .iter()
            .find(|a| a.min_delay_ms > a.max_delay_ms)
        {
            return Err(ConfigError::Validation(format!(
                "humanization action `{}` has min_delay_ms > max_delay_ms",
                action.name
            )));
        }
    }

    let anti = &policy.anti_patterns;
    if anti.max_consecutive_identical == 0 || anti.max_identical_timing == 0 {
        return invalid("anti_patterns thresholds must be at least 1");
    }
    if !(anti.min_variance > 0.0 && anti.min_variance <= 1.0) {
        return invalid("anti_patterns.min_variance must be within (0, 1]");
    }
    if anti.variance_window < 2 || anti.timing_resolution_ms == 0 {
        return invalid("anti_patterns.variance_window must be >= 2 and timing_resolution_ms > 0");
    }

    let surfaces = &policy.detection_surfaces;
    for (name, cadence) in [
        ("macro_cadence", &surfaces.macro_cadence),
        ("input_timing", &surfaces.input_timing),
    ] {
        if !(cadence.min_variance > 0.0 && cadence.min_variance <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "detection_surfaces.{}.min_variance must be within (0, 1]",
                name
            )));
        }
        if cadence.window < 2 || cadence.min_samples < 2 {
            return Err(ConfigError::Validation(format!(
                "detection_surfaces.{}.window and min_samples must be >= 2",
                name
            )));
        }
    }
    if !(surfaces.session_length.warning_fraction > 0.0
        && surfaces.session_length.warning_fraction <= 1.0)
    {
        return invalid("detection_surfaces.session_length.warning_fraction must be within (0, 1]");
    }
    let network = &surfaces.network;
    if network.soft_rate_per_minute == 0
        || network.soft_rate_per_minute >= network.hard_rate_per_minute
    {
        return invalid("detection_surfaces.network requires 0 < soft_rate_per_minute < hard_rate_per_minute");
    }
    let resource = &surfaces.resource_access;
    for pattern in &resource.suspicious_patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::Validation(format!("invalid resource pattern {:?}: {}", pattern, e))
        })?;
    }
    if resource.repeat_threshold < 2 {
        return invalid("detection_surfaces.resource_access.repeat_threshold must be >= 2");
    }

    let emergency = &policy.emergency;
    if emergency.repeat_flag_count < 2 {
        return invalid("emergency.repeat_flag_count must be >= 2");
    }

    let audit = &policy.audit;
    if audit.interval_secs == 0 || audit.history_capacity == 0 || audit.fallback_capacity == 0 {
        return invalid("audit.interval_secs, history_capacity and fallback_capacity must be positive");
    }

    let alerts = &policy.alerts;
    if alerts.max_per_minute == 0 {
        return invalid("alerts.max_per_minute must be positive");
    }
    if let Some(url) = &alerts.webhook_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        return Err(ConfigError::Validation(format!(
            "alerts.webhook_url must be an http(s) URL (got {:?})",
            url
        )));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigResult<()> {
    Err(ConfigError::Validation(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[session_caps]
max_session_hours = 3.0

[humanization]
enabled = true

[anti_patterns]
max_consecutive_identical = 4

[detection_surfaces.identity]
deny_list = ["inspector"]

[enforcement]
strict_mode = false

[emergency]
cooldown_secs = 60

[audit]
interval_secs = 10

[alerts]
min_level = "warning"
"#;

    #[test]
    fn test_parse_policy_empty_uses_defaults() {
        let loaded = parse_policy("").unwrap();
        assert_eq!(loaded.policy, PolicyConfig::default());
        assert_eq!(loaded.warnings.len(), TOP_LEVEL_KEYS.len());
    }

    #[test]
    fn test_parse_policy_full() {
        let loaded = parse_policy(FULL).unwrap();
        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
        let policy = loaded.policy;
        assert_eq!(policy.session_caps.max_session_hours, 3.0);
        assert_eq!(policy.anti_patterns.max_consecutive_identical, 4);
        assert_eq!(policy.anti_patterns.min_variance, 0.10);
        assert_eq!(policy.detection_surfaces.identity.deny_list, vec!["inspector"]);
        assert!(!policy.enforcement.strict_mode);
        assert_eq!(policy.audit.interval_secs, 10);
        assert_eq!(policy.alerts.min_level, crate::types::AlertLevel::Warning);
    }

    #[test]
    fn test_missing_section_is_warning() {
        let toml = FULL.replace("[detection_surfaces.identity]\ndeny_list = [\"inspector\"]\n", "");
        let loaded = parse_policy(&toml).unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("detection_surfaces"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let err = parse_policy("[telemetry]\nenabled = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(ref k) if k == "telemetry"));
    }

    #[test]
    fn test_unknown_nested_key_rejected() {
        let err = parse_policy("[anti_patterns]\nmax_repeats = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("max_repeats"));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            parse_policy("invalid { toml"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let toml = r#"
[[humanization.actions]]
name = "idle"
weight = 0.5

[[humanization.actions]]
name = "emote"
weight = 0.2
"#;
        let err = parse_policy(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_soft_rate_must_be_below_hard_rate() {
        let mut policy = PolicyConfig::default();
        policy.detection_surfaces.network.soft_rate_per_minute = 100;
        policy.detection_surfaces.network.hard_rate_per_minute = 50;
        assert!(validate_policy(&policy).is_err());
    }

    #[test]
    fn test_bad_resource_pattern_rejected() {
        let mut policy = PolicyConfig::default();
        policy
            .detection_surfaces
            .resource_access
            .suspicious_patterns
            .push("([unclosed".to_string());
        let err = validate_policy(&policy).unwrap_err();
        assert!(err.to_string().contains("unclosed"));
    }

    #[test]
    fn test_min_variance_out_of_range() {
        let mut policy = PolicyConfig::default();
        policy.anti_patterns.min_variance = 0.0;
        assert!(validate_policy(&policy).is_err());
    }

    #[test]
    fn test_default_policy_is_valid() {
        assert!(validate_policy(&PolicyConfig::default()).is_ok());
        assert!(validate_policy(&PolicyConfig::conservative()).is_ok());
    }

    #[test]
    fn test_load_or_conservative_missing_file() {
        let loaded = load_policy_or_conservative("/nonexistent/warden/policy.toml");
        assert!(loaded.policy.enforcement.strict_mode);
        assert!(loaded.policy.humanization.enabled);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_load_or_conservative_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "[enforcement]\nstrict_mode = false\nbogus = 1\n").unwrap();

        let loaded = load_policy_or_conservative(&path);
        assert!(loaded.policy.enforcement.strict_mode);
        assert!(loaded.warnings[0].contains("conservative"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, FULL).unwrap();

        let loaded = load_policy_from_file(&path).unwrap();
        assert!(!loaded.policy.enforcement.strict_mode);
    }
}
