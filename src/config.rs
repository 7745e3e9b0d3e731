//! Configuration loading and the model registry.
//!
//! Resolution order: explicit constructor arguments win over the project
//! config file (`minion.toml`), which wins over the user config file
//! (`~/.config/minion/config.toml`), which wins over environment variables.
//! `${VAR}` references in string values are interpolated from the process
//! environment; `.env` files load in declared order with later files
//! overriding earlier ones.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

const PROJECT_CONFIG_PATH: &str = "minion.toml";
const CONFIG_PATH_ENV: &str = "MINION_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Provider descriptor for one model alias.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelConfig {
    /// Backend family, e.g. "openai", "anthropic", "scripted".
    pub api_type: String,
    /// Concrete model identifier used for the call and for pricing.
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Resolved agent-level defaults.
#[derive(Debug, Clone)]
pub struct AgentDefaults {
    pub max_steps: usize,
    pub context_window: usize,
    /// Fraction of the context window that triggers auto-compact.
    pub auto_compact_threshold: f64,
    /// Messages pinned at the end of history during compaction.
    pub auto_compact_keep_recent: usize,
    /// Minimum content size in bytes for auto-decay.
    pub decay_min_size: usize,
    /// Age in steps before a large message decays.
    pub decay_ttl_steps: usize,
    /// Model alias used for compaction summaries; the agent's model if unset.
    pub compact_model: Option<String>,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_steps: 20,
            context_window: 128_000,
            auto_compact_threshold: 0.92,
            auto_compact_keep_recent: 10,
            decay_min_size: 100_000,
            decay_ttl_steps: 3,
            compact_model: None,
        }
    }
}

/// Resolved check/improve defaults.
#[derive(Debug, Clone)]
pub struct CheckDefaults {
    pub max_improve_rounds: u32,
    pub acceptance_threshold: f64,
    pub numeric_tolerance: f64,
}

impl Default for CheckDefaults {
    fn default() -> Self {
        Self {
            max_improve_rounds: 3,
            acceptance_threshold: 0.8,
            numeric_tolerance: 1e-6,
        }
    }
}

/// `[agent]` section as written in a config file. Every field is optional so
/// an unset key falls through to the next layer instead of silently
/// resetting it to the built-in default.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct AgentSection {
    max_steps: Option<usize>,
    context_window: Option<usize>,
    auto_compact_threshold: Option<f64>,
    auto_compact_keep_recent: Option<usize>,
    decay_min_size: Option<usize>,
    decay_ttl_steps: Option<usize>,
    compact_model: Option<String>,
}

impl AgentSection {
    /// Overlay set fields of `other` on top of this section.
    fn overlay(&mut self, other: AgentSection) {
        if other.max_steps.is_some() {
            self.max_steps = other.max_steps;
        }
        if other.context_window.is_some() {
            self.context_window = other.context_window;
        }
        if other.auto_compact_threshold.is_some() {
            self.auto_compact_threshold = other.auto_compact_threshold;
        }
        if other.auto_compact_keep_recent.is_some() {
            self.auto_compact_keep_recent = other.auto_compact_keep_recent;
        }
        if other.decay_min_size.is_some() {
            self.decay_min_size = other.decay_min_size;
        }
        if other.decay_ttl_steps.is_some() {
            self.decay_ttl_steps = other.decay_ttl_steps;
        }
        if other.compact_model.is_some() {
            self.compact_model = other.compact_model;
        }
    }

    fn resolve(&self) -> AgentDefaults {
        let defaults = AgentDefaults::default();
        AgentDefaults {
            max_steps: self.max_steps.unwrap_or(defaults.max_steps),
            context_window: self.context_window.unwrap_or(defaults.context_window),
            auto_compact_threshold: self
                .auto_compact_threshold
                .unwrap_or(defaults.auto_compact_threshold),
            auto_compact_keep_recent: self
                .auto_compact_keep_recent
                .unwrap_or(defaults.auto_compact_keep_recent),
            decay_min_size: self.decay_min_size.unwrap_or(defaults.decay_min_size),
            decay_ttl_steps: self.decay_ttl_steps.unwrap_or(defaults.decay_ttl_steps),
            compact_model: self.compact_model.clone(),
        }
    }
}

/// `[check]` section as written in a config file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct CheckSection {
    max_improve_rounds: Option<u32>,
    acceptance_threshold: Option<f64>,
    numeric_tolerance: Option<f64>,
}

impl CheckSection {
    fn overlay(&mut self, other: CheckSection) {
        if other.max_improve_rounds.is_some() {
            self.max_improve_rounds = other.max_improve_rounds;
        }
        if other.acceptance_threshold.is_some() {
            self.acceptance_threshold = other.acceptance_threshold;
        }
        if other.numeric_tolerance.is_some() {
            self.numeric_tolerance = other.numeric_tolerance;
        }
    }

    fn resolve(&self) -> CheckDefaults {
        let defaults = CheckDefaults::default();
        CheckDefaults {
            max_improve_rounds: self.max_improve_rounds.unwrap_or(defaults.max_improve_rounds),
            acceptance_threshold: self
                .acceptance_threshold
                .unwrap_or(defaults.acceptance_threshold),
            numeric_tolerance: self.numeric_tolerance.unwrap_or(defaults.numeric_tolerance),
        }
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Model alias -> provider descriptor.
    pub models: HashMap<String, ModelConfig>,
    /// Alias used when no model is named explicitly.
    pub default_model: String,
    /// `.env` files loaded in order; later files override earlier ones.
    pub env_file: Vec<PathBuf>,
    agent: AgentSection,
    check: CheckSection,
}

impl Config {
    /// Load configuration from the standard locations.
    pub fn load() -> Result<Self, ConfigError> {
        let user_path = user_config_path();
        let project_path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(PROJECT_CONFIG_PATH));

        let mut config = Config::default();
        if let Some(user_path) = user_path.filter(|p| p.is_file()) {
            config = Self::from_file(&user_path)?;
        }
        if project_path.is_file() {
            let project = Self::from_file(&project_path)?;
            config.merge_from(project);
        }

        config.load_env_files();
        config.apply_env_fallbacks();
        config.interpolate();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Overlay `other` on top of this config (project over user). Only keys
    /// actually present in `other` replace the existing values.
    fn merge_from(&mut self, other: Config) {
        for (alias, model) in other.models {
            self.models.insert(alias, model);
        }
        if !other.default_model.is_empty() {
            self.default_model = other.default_model;
        }
        if !other.env_file.is_empty() {
            self.env_file = other.env_file;
        }
        self.agent.overlay(other.agent);
        self.check.overlay(other.check);
    }

    fn load_env_files(&self) {
        for path in &self.env_file {
            // later files override earlier ones
            match dotenvy::from_path_override(path) {
                Ok(_) => tracing::debug!(path = %path.display(), "loaded env file"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load env file"),
            }
        }
    }

    fn apply_env_fallbacks(&mut self) {
        if self.default_model.is_empty() {
            if let Ok(model) = std::env::var("MINION_DEFAULT_MODEL") {
                self.default_model = model;
            }
        }
    }

    /// Interpolate `${VAR}` in every string value.
    fn interpolate(&mut self) {
        self.default_model = interpolate_env(&self.default_model);
        for model in self.models.values_mut() {
            model.api_type = interpolate_env(&model.api_type);
            model.model = interpolate_env(&model.model);
            model.api_key = model.api_key.as_deref().map(interpolate_env);
            model.base_url = model.base_url.as_deref().map(interpolate_env);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.default_model.is_empty() && !self.models.contains_key(&self.default_model) {
            return Err(ConfigError::Invalid(format!(
                "default_model '{}' is not declared under [models]",
                self.default_model
            )));
        }
        if !(0.0..=1.0).contains(&self.agent().auto_compact_threshold) {
            return Err(ConfigError::Invalid(
                "agent.auto_compact_threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Agent defaults with unset keys resolved to the built-in values.
    pub fn agent(&self) -> AgentDefaults {
        self.agent.resolve()
    }

    /// Check/improve defaults with unset keys resolved.
    pub fn check(&self) -> CheckDefaults {
        self.check.resolve()
    }

    /// Descriptor for a model alias.
    pub fn model(&self, alias: &str) -> Option<&ModelConfig> {
        self.models.get(alias)
    }

    pub fn default_model(&self) -> Option<&ModelConfig> {
        self.models.get(&self.default_model)
    }
}

fn user_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("minion").join("config.toml"))
}

/// Replace `${VAR}` references with values from the process environment.
/// Unknown variables are left untouched.
pub fn interpolate_env(value: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(value, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            default_model = "main"
            env_file = [".env", ".env.local"]

            [models.main]
            api_type = "openai"
            model = "gpt-4o"
            api_key = "${OPENAI_API_KEY}"

            [models.cheap]
            api_type = "openai"
            model = "gpt-4o-mini"

            [agent]
            max_steps = 12
            context_window = 200000

            [check]
            acceptance_threshold = 0.9
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.default_model, "main");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models["main"].model, "gpt-4o");
        assert_eq!(config.agent().max_steps, 12);
        assert_eq!(config.agent().auto_compact_keep_recent, 10); // default preserved
        assert!((config.check().acceptance_threshold - 0.9).abs() < 1e-9);
        assert!((config.check().numeric_tolerance - 1e-6).abs() < 1e-12);
        assert_eq!(config.env_file.len(), 2);
    }

    #[test]
    fn test_env_interpolation() {
        std::env::set_var("MINION_TEST_VAR_XYZ", "resolved");
        assert_eq!(interpolate_env("prefix-${MINION_TEST_VAR_XYZ}"), "prefix-resolved");
        assert_eq!(interpolate_env("${MINION_TEST_MISSING_XYZ}"), "${MINION_TEST_MISSING_XYZ}");
        std::env::remove_var("MINION_TEST_VAR_XYZ");
    }

    #[test]
    fn test_validation_rejects_unknown_default() {
        let mut config = Config::default();
        config.default_model = "ghost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_project_overrides_user() {
        let mut user: Config = toml::from_str(
            r#"
            default_model = "a"
            [models.a]
            api_type = "openai"
            model = "gpt-4o"
        "#,
        )
        .unwrap();
        let project: Config = toml::from_str(
            r#"
            default_model = "b"
            [models.b]
            api_type = "anthropic"
            model = "claude-sonnet-4"
        "#,
        )
        .unwrap();
        user.merge_from(project);
        assert_eq!(user.default_model, "b");
        // both alias tables survive the merge
        assert!(user.models.contains_key("a"));
        assert!(user.models.contains_key("b"));
    }

    #[test]
    fn test_merge_preserves_user_sections_absent_from_project() {
        let mut user: Config = toml::from_str(
            r#"
            [agent]
            max_steps = 7
            decay_ttl_steps = 5

            [check]
            acceptance_threshold = 0.5
        "#,
        )
        .unwrap();
        // the project config declares neither [agent] nor [check]
        let project: Config = toml::from_str(
            r#"
            default_model = "b"
            [models.b]
            api_type = "openai"
            model = "gpt-4o"
        "#,
        )
        .unwrap();
        user.merge_from(project);
        assert_eq!(user.agent().max_steps, 7);
        assert_eq!(user.agent().decay_ttl_steps, 5);
        assert!((user.check().acceptance_threshold - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_merge_overlays_sections_key_by_key() {
        let mut user: Config = toml::from_str(
            r#"
            [agent]
            max_steps = 7
            context_window = 64000
        "#,
        )
        .unwrap();
        // the project sets only one [agent] key; the user's other keys stay
        let project: Config = toml::from_str(
            r#"
            [agent]
            context_window = 200000
        "#,
        )
        .unwrap();
        user.merge_from(project);
        assert_eq!(user.agent().max_steps, 7);
        assert_eq!(user.agent().context_window, 200_000);
    }
}
