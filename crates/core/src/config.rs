//! # Engine Configuration
//!
//! Round budget, probe timeouts, validator limits and the subprocess
//! environment policy. Loaded from TOML, then overridden by `CRUCIBLE_*`
//! environment variables.
//!
//! ```toml
//! max_rounds = 4
//! success_threshold = 0.8
//!
//! [build]
//! strict_tools = true
//!
//! [test]
//! no_tests_is_success = false
//! ```

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::swarm::coordinator::CoordinatorConfig;

// ============================================================================
// Engine
// ============================================================================

/// Top-level configuration for one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Round budget (default: 5)
    pub max_rounds: u32,
    /// Minimum overall score for success (default: 0.7)
    pub success_threshold: f64,
    /// Rounds without a drop in finding count before a no-progress warning
    pub stall_rounds: u32,
    /// Wall-clock limit for one generator call
    pub generator_timeout_secs: u64,
    pub validator: ValidatorConfig,
    pub build: BuildConfig,
    pub test: TestConfig,
    pub env: EnvPolicy,
    pub coordinator: CoordinatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            success_threshold: 0.7,
            stall_rounds: 2,
            generator_timeout_secs: 600,
            validator: ValidatorConfig::default(),
            build: BuildConfig::default(),
            test: TestConfig::default(),
            env: EnvPolicy::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the environment
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `CRUCIBLE_*` overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CRUCIBLE_MAX_ROUNDS") {
            self.max_rounds = parse_override("CRUCIBLE_MAX_ROUNDS", &value)?;
        }
        if let Some(value) = lookup("CRUCIBLE_SUCCESS_THRESHOLD") {
            self.success_threshold = parse_override("CRUCIBLE_SUCCESS_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("CRUCIBLE_GENERATOR_TIMEOUT_SECS") {
            self.generator_timeout_secs =
                parse_override("CRUCIBLE_GENERATOR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("CRUCIBLE_STRICT_TOOLS") {
            self.build.strict_tools = parse_override("CRUCIBLE_STRICT_TOOLS", &value)?;
        }
        Ok(())
    }

    /// Reject configurations the round loop cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            return Err(ConfigError::Invalid(format!(
                "success_threshold must be within 0..=1, got {}",
                self.success_threshold
            )));
        }
        if self.generator_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "generator_timeout_secs must be non-zero".into(),
            ));
        }
        let timeouts = [
            ("build.overall_timeout_secs", self.build.overall_timeout_secs),
            ("build.install_timeout_secs", self.build.install_timeout_secs),
            ("build.build_timeout_secs", self.build.build_timeout_secs),
            ("build.lint_timeout_secs", self.build.lint_timeout_secs),
            ("build.container_timeout_secs", self.build.container_timeout_secs),
            ("test.surface_timeout_secs", self.test.surface_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        for pattern in &self.validator.exemptions {
            Pattern::new(pattern).map_err(|e| {
                ConfigError::Invalid(format!("bad exemption glob '{}': {}", pattern, e))
            })?;
        }
        if self.coordinator.max_concurrent_generators == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.max_concurrent_generators must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}: cannot parse '{}'", key, value)))
}

// ============================================================================
// Static validation
// ============================================================================

/// Limits for the style heuristics of the static validator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Longest line before a warning (default: 120)
    pub max_line_length: usize,
    /// Longest file before a warning (default: 1000)
    pub max_file_lines: usize,
    /// File patterns exempt from style checks (glob syntax)
    pub exemptions: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_line_length: 120,
            max_file_lines: 1000,
            exemptions: vec![
                "**/*.min.js".into(),
                "**/*.min.css".into(),
                "**/package-lock.json".into(),
                "**/generated/**".into(),
                "**/vendor/**".into(),
            ],
        }
    }
}

impl ValidatorConfig {
    /// Check if a file path is exempt from style checks
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exemptions
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|pat| pat.matches(path) || pat.matches(&format!("/{}", path)))
    }
}

// ============================================================================
// Build
// ============================================================================

/// Timeouts and switches for the build checker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    pub overall_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub lint_timeout_secs: u64,
    pub container_timeout_secs: u64,
    /// Treat a missing ecosystem tool as a blocking error
    pub strict_tools: bool,
    /// Run the `lint` script when one is declared
    pub run_lint: bool,
    /// Build the container image when a Dockerfile is present
    pub container_build: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            overall_timeout_secs: 900,
            install_timeout_secs: 300,
            build_timeout_secs: 180,
            lint_timeout_secs: 60,
            container_timeout_secs: 300,
            strict_tools: false,
            run_lint: true,
            container_build: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

/// Settings for the test executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TestConfig {
    pub surface_timeout_secs: u64,
    /// Upper bound on captured output per surface
    pub max_output_chars: usize,
    /// Count a run with no executed surface as passing
    pub no_tests_is_success: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            surface_timeout_secs: 300,
            max_output_chars: 4000,
            no_tests_is_success: true,
        }
    }
}

// ============================================================================
// Subprocess environment
// ============================================================================

/// Variables passed to external tools: an allow-list plus fixed overrides
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvPolicy {
    /// Inherited from the parent process when set
    pub allow: Vec<String>,
    /// Always set, after the allow-list
    pub overrides: BTreeMap<String, String>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        let allow = [
            "PATH",
            "HOME",
            "USER",
            "LANG",
            "LC_ALL",
            "TMPDIR",
            "TEMP",
            "TMP",
            "SYSTEMROOT",
            "CARGO_HOME",
            "RUSTUP_HOME",
            "NVM_DIR",
            "npm_config_cache",
            "PIP_INDEX_URL",
            "DOCKER_HOST",
        ];
        let overrides = [
            ("CI", "true"),
            ("FORCE_COLOR", "0"),
            ("NO_COLOR", "1"),
            ("PIP_DISABLE_PIP_VERSION_CHECK", "1"),
            ("PYTHONDONTWRITEBYTECODE", "1"),
            ("npm_config_fund", "false"),
            ("npm_config_audit", "false"),
        ];
        Self {
            allow: allow.iter().map(|s| s.to_string()).collect(),
            overrides: overrides
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.success_threshold, 0.7);
        assert_eq!(config.validator.max_line_length, 120);
        assert!(config.test.no_tests_is_success);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            "max_rounds = 3\n[build]\nstrict_tools = true\n",
        )
        .unwrap();
        assert_eq!(config.max_rounds, 3);
        assert!(config.build.strict_tools);
        assert_eq!(config.build.install_timeout_secs, 300);
        assert_eq!(config.success_threshold, 0.7);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CRUCIBLE_MAX_ROUNDS", "9"),
            ("CRUCIBLE_SUCCESS_THRESHOLD", "0.5"),
        ]
        .into_iter()
        .collect();
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_rounds, 9);
        assert_eq!(config.success_threshold, 0.5);
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = EngineConfig::default();
        let result = config.apply_overrides(|k| {
            (k == "CRUCIBLE_MAX_ROUNDS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_threshold() {
        let config = EngineConfig {
            success_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            max_rounds: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exemption_patterns() {
        let config = ValidatorConfig::default();
        assert!(config.is_exempt("static/app.min.js"));
        assert!(config.is_exempt("package-lock.json"));
        assert!(!config.is_exempt("src/app.js"));
    }
}
