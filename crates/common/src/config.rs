//! ARTK configuration
//!
//! Every section has defaults, so a missing file or a partial file is fine. Values that
//! have no safe interpretation are rejected by [`ArtkConfig::validate`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::ir::LocatorStrategy;
use crate::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtkConfig {
    pub locators: LocatorConfig,
    pub matcher: MatcherConfig,
    pub ai: AiConfig,
    pub runner: RunnerSettings,
    pub healing: HealingSettings,
    pub codegen: CodegenConfig,
    pub paths: PathsConfig,
}

/// Locator selection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Strategy order, most preferred first
    pub priority: Vec<LocatorStrategy>,

    /// Regexes matched against locator values; matching candidates are avoided
    pub forbidden_patterns: Vec<String>,

    /// Strategies avoided unless nothing else is available
    pub forbidden_strategies: Vec<LocatorStrategy>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            priority: vec![
                LocatorStrategy::Role,
                LocatorStrategy::Label,
                LocatorStrategy::Placeholder,
                LocatorStrategy::Text,
                LocatorStrategy::Testid,
                LocatorStrategy::Css,
            ],
            forbidden_patterns: Vec::new(),
            forbidden_strategies: Vec::new(),
        }
    }
}

/// Step matcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum similarity (0..=1) for the fuzzy tier
    pub fuzzy_threshold: f64,

    /// Minimum confidence for a learned mapping to be used
    pub knowledge_min_confidence: f64,

    /// JSON file of learned step mappings
    pub knowledge_path: Option<PathBuf>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            knowledge_min_confidence: 0.7,
            knowledge_path: None,
        }
    }
}

/// AI fallback tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub max_session_cost_usd: f64,
    pub estimated_cost_per_call_usd: f64,
    pub model: Option<String>,
    /// Program that answers prompts: prompt on stdin, reply on stdout.
    /// Empty means cache-only.
    pub command: Vec<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 15_000,
            max_session_cost_usd: 0.50,
            estimated_cost_per_call_usd: 0.01,
            model: None,
            command: Vec::new(),
        }
    }
}

/// Test runner invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Program and leading arguments; the test file path is appended
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub retries: u32,
    pub working_dir: Option<PathBuf>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".to_string(),
                "playwright".to_string(),
                "test".to_string(),
                "--reporter=line".to_string(),
            ],
            timeout_secs: 300,
            retries: 0,
            working_dir: None,
        }
    }
}

/// Healing loop limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingSettings {
    pub enabled: bool,
    pub max_attempts: u32,
}

impl Default for HealingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
        }
    }
}

/// Generated source layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Import base for `callModule` targets
    pub modules_import_base: String,

    /// Module exporting `actors` and `testData`
    pub fixtures_import: String,

    /// Indentation unit
    pub indent: String,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            modules_import_base: "../modules".to_string(),
            fixtures_import: "../fixtures".to_string(),
            indent: "  ".to_string(),
        }
    }
}

/// Filesystem locations, relative to the project root
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub journeys_dir: PathBuf,
    pub tests_dir: PathBuf,
    /// Compiled IR, one JSON file per journey
    pub ir_dir: PathBuf,
    pub state_file: PathBuf,
    pub telemetry_file: PathBuf,
    pub healing_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            journeys_dir: PathBuf::from("journeys"),
            tests_dir: PathBuf::from("tests/journeys"),
            ir_dir: PathBuf::from(".artk/ir"),
            state_file: PathBuf::from(".artk/pipeline-state.json"),
            telemetry_file: PathBuf::from(".artk/blocked-steps.jsonl"),
            healing_log: PathBuf::from(".artk/healing-log.json"),
        }
    }
}

impl PathsConfig {
    /// Resolve every relative path against `root`
    pub fn resolve(&self, root: &Path) -> PathsConfig {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        };
        PathsConfig {
            journeys_dir: join(&self.journeys_dir),
            tests_dir: join(&self.tests_dir),
            ir_dir: join(&self.ir_dir),
            state_file: join(&self.state_file),
            telemetry_file: join(&self.telemetry_file),
            healing_log: join(&self.healing_log),
        }
    }
}

impl ArtkConfig {
    /// Parse and validate configuration from TOML text
    pub fn parse(toml_src: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_src).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(&content)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        crate::fsutil::write_atomic(path, content.as_bytes())
    }

    /// Reject values with no safe interpretation
    pub fn validate(&self) -> Result<()> {
        if self.locators.priority.is_empty() {
            return Err(Error::InvalidConfig(
                "locators.priority must list at least one strategy".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for strategy in &self.locators.priority {
            if !seen.insert(*strategy) {
                return Err(Error::InvalidConfig(format!(
                    "locators.priority lists '{strategy}' more than once"
                )));
            }
        }
        for pattern in &self.locators.forbidden_patterns {
            regex::Regex::new(pattern).map_err(|e| Error::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        if !(self.matcher.fuzzy_threshold > 0.0 && self.matcher.fuzzy_threshold <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "matcher.fuzzy_threshold must be in (0, 1], got {}",
                self.matcher.fuzzy_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.matcher.knowledge_min_confidence) {
            return Err(Error::InvalidConfig(format!(
                "matcher.knowledge_min_confidence must be in [0, 1], got {}",
                self.matcher.knowledge_min_confidence
            )));
        }
        if self.ai.max_session_cost_usd < 0.0 || self.ai.estimated_cost_per_call_usd < 0.0 {
            return Err(Error::InvalidConfig(
                "ai cost limits must not be negative".to_string(),
            ));
        }
        if self.ai.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "ai.timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.runner.command.is_empty() {
            return Err(Error::InvalidConfig(
                "runner.command must name a program".to_string(),
            ));
        }
        if self.healing.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "healing.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
