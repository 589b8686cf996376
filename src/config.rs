//! Configuration for specforge, read from `.specforge/specforge.toml`.
//!
//! Layered: file → environment → CLI. Every section has defaults, so a
//! missing file yields the default configuration.
//!
//! ```toml
//! [project]
//! name = "Acme Shop"
//!
//! [executor]
//! command = "claude"
//! args = ["--print"]
//! timeout_secs = 600
//! retries = 1
//!
//! [executor.phases.SPEC_ARCHITECT]
//! timeout_secs = 1200
//!
//! [checker]
//! enabled = true
//! command = "claude"
//! args = ["--print"]
//! max_artifact_chars = 8000
//!
//! [checker.phases.SPEC_PM]
//! persona = "product-skeptic"
//! max_regenerations = 2
//! escalate_on_critical = true
//!
//! [gates.overrides.design_approved]
//! blocking = true
//! auto_approve_threshold = 85
//!
//! [clarification]
//! mode = "hybrid"
//! ```

use crate::checker::{
    CheckerConfig, CheckerPattern, CommandReviewClient, CriticPersona, DEFAULT_MAX_ARTIFACT_CHARS,
    DEFAULT_MAX_REGENERATIONS, ReviewClient, default_persona_for_phase,
};
use crate::clarification::ClarificationMode;
use crate::engine::{CommandAgentExecutor, ExecutionPolicy};
use crate::phase::{GateOverride, PhaseRegistry};
use crate::process::CommandSpec;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding `[executor] command` (whitespace-split).
pub const AGENT_CMD_ENV: &str = "SPECFORGE_AGENT_CMD";
/// Environment variable overriding `[checker] command` (whitespace-split).
pub const REVIEW_CMD_ENV: &str = "SPECFORGE_REVIEW_CMD";

pub const CONFIG_FILE: &str = "specforge.toml";
pub const SPECFORGE_DIR: &str = ".specforge";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectSection {
    /// Display name used by `init` when none is given
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorSection {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Per-phase timeout/retry overrides
    #[serde(default)]
    pub phases: BTreeMap<String, ExecutorPhaseOverride>,
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_executor_timeout() -> u64 {
    600
}

fn default_retries() -> u32 {
    1
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            timeout_secs: default_executor_timeout(),
            retries: default_retries(),
            phases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutorPhaseOverride {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckerSection {
    #[serde(default = "default_checker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_review_timeout")]
    pub timeout_secs: u64,
    /// Per-artifact truncation in review prompts
    #[serde(default = "default_max_artifact_chars")]
    pub max_artifact_chars: usize,
    #[serde(default)]
    pub phases: BTreeMap<String, CheckerPhaseSection>,
}

fn default_checker_enabled() -> bool {
    true
}

fn default_review_timeout() -> u64 {
    300
}

fn default_max_artifact_chars() -> usize {
    DEFAULT_MAX_ARTIFACT_CHARS
}

impl Default for CheckerSection {
    fn default() -> Self {
        Self {
            enabled: default_checker_enabled(),
            command: default_command(),
            args: default_args(),
            timeout_secs: default_review_timeout(),
            max_artifact_chars: default_max_artifact_chars(),
            phases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckerPhaseSection {
    /// Built-in persona name (see `CriticPersona::builtin_names`)
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub max_regenerations: Option<u32>,
    #[serde(default)]
    pub escalate_on_critical: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatesSection {
    #[serde(default)]
    pub overrides: HashMap<String, GateOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClarificationSection {
    #[serde(default)]
    pub mode: ClarificationMode,
}

/// Contents of `specforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpecforgeToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub checker: CheckerSection,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub clarification: ClarificationSection,
}

impl SpecforgeToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse specforge.toml")
    }

    /// Load `<dir>/specforge.toml`, or the defaults when it does not exist.
    pub fn load_or_default(specforge_dir: &Path) -> Result<Self> {
        let path = specforge_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize specforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Effective timeout/retries for `phase`.
    pub fn execution_policy(&self, phase: &str) -> ExecutionPolicy {
        let mut policy = ExecutionPolicy {
            timeout: Duration::from_secs(self.executor.timeout_secs),
            retries: self.executor.retries,
        };
        if let Some(phase_override) = self.executor.phases.get(phase) {
            if let Some(secs) = phase_override.timeout_secs {
                policy.timeout = Duration::from_secs(secs);
            }
            if let Some(retries) = phase_override.retries {
                policy.retries = retries;
            }
        }
        policy
    }

    /// Critic config for `phase`: the built-in persona (if any) with overrides applied.
    pub fn checker_config(&self, phase: &str) -> Result<Option<CheckerConfig>> {
        let section = self.checker.phases.get(phase);
        let persona = match section.and_then(|s| s.persona.as_deref()) {
            Some(name) => match CriticPersona::builtin(name) {
                Some(persona) => Some(persona),
                None => bail!("Unknown critic persona '{}' for phase {}", name, phase),
            },
            None => default_persona_for_phase(phase),
        };
        let Some(persona) = persona else {
            return Ok(None);
        };

        let mut config = CheckerConfig::new(persona)
            .with_max_regenerations(DEFAULT_MAX_REGENERATIONS);
        if let Some(section) = section {
            if let Some(max) = section.max_regenerations {
                config = config.with_max_regenerations(max);
            }
            if let Some(escalate) = section.escalate_on_critical {
                config = config.with_escalate_on_critical(escalate);
            }
        }
        Ok(Some(config))
    }

    /// Check the configuration against `registry`; returns human-readable warnings.
    pub fn validate(&self, registry: &PhaseRegistry) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.executor.command.trim().is_empty() {
            warnings.push("executor.command is empty".to_string());
        }
        if self.executor.timeout_secs == 0 {
            warnings.push("executor.timeout_secs is 0; every agent call would time out".to_string());
        }
        if self.checker.enabled && self.checker.timeout_secs == 0 {
            warnings.push("checker.timeout_secs is 0; every review would time out".to_string());
        }
        if self.checker.max_artifact_chars == 0 {
            warnings.push("checker.max_artifact_chars is 0; critics would see no content".to_string());
        }

        for (phase, phase_override) in &self.executor.phases {
            if !registry.contains(phase) {
                warnings.push(format!("executor.phases references unknown phase '{}'", phase));
            }
            if phase_override.timeout_secs == Some(0) {
                warnings.push(format!("executor.phases.{}.timeout_secs is 0", phase));
            }
        }

        for (phase, section) in &self.checker.phases {
            if !registry.contains(phase) {
                warnings.push(format!("checker.phases references unknown phase '{}'", phase));
            }
            if let Some(ref name) = section.persona
                && CriticPersona::builtin(name).is_none()
            {
                warnings.push(format!(
                    "Unknown critic persona '{}' for phase {} (known: {})",
                    name,
                    phase,
                    CriticPersona::builtin_names().join(", ")
                ));
            }
        }

        let mut gate_names: Vec<&String> = self.gates.overrides.keys().collect();
        gate_names.sort();
        for name in gate_names {
            if registry.gate(name).is_none() {
                warnings.push(format!("gates.overrides references unknown gate '{}'", name));
            }
            if let Some(threshold) = self.gates.overrides[name].auto_approve_threshold
                && threshold > 100
            {
                warnings.push(format!(
                    "gates.overrides.{}.auto_approve_threshold {} is above 100",
                    name, threshold
                ));
            }
        }

        warnings
    }
}

/// Split a command line from the environment into a `CommandSpec`.
fn command_from_env(var: &str) -> Option<CommandSpec> {
    let value = std::env::var(var).ok()?;
    let mut parts = value.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    let args: Vec<String> = parts.collect();
    Some(CommandSpec::new(&program, &args))
}

/// Runtime configuration: the parsed file plus environment and CLI layers.
#[derive(Debug, Clone)]
pub struct SpecforgeConfig {
    pub project_dir: PathBuf,
    pub specforge_dir: PathBuf,
    pub toml: SpecforgeToml,
    pub verbose: bool,
}

impl SpecforgeConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let specforge_dir = project_dir.join(SPECFORGE_DIR);
        let toml = SpecforgeToml::load_or_default(&specforge_dir)?;
        Ok(Self {
            project_dir,
            specforge_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.specforge_dir.join(CONFIG_FILE)
    }

    pub fn phases_file(&self) -> PathBuf {
        self.specforge_dir.join("phases.json")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.specforge_dir.join("state")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.specforge_dir.join("audit")
    }

    /// Agent command (env → file).
    pub fn agent_command(&self) -> CommandSpec {
        command_from_env(AGENT_CMD_ENV)
            .unwrap_or_else(|| CommandSpec::new(&self.toml.executor.command, &self.toml.executor.args))
            .with_working_dir(self.project_dir.clone())
    }

    /// Review command (env → file).
    pub fn review_command(&self) -> CommandSpec {
        command_from_env(REVIEW_CMD_ENV)
            .unwrap_or_else(|| CommandSpec::new(&self.toml.checker.command, &self.toml.checker.args))
            .with_working_dir(self.project_dir.clone())
    }

    /// The registry from `phases.json` (or built-in) with gate overrides applied.
    pub fn load_registry(&self) -> Result<PhaseRegistry> {
        let phases_file = self.phases_file();
        let registry = PhaseRegistry::load_or_builtin(Some(&phases_file))
            .with_context(|| format!("Failed to load phase registry from {}", phases_file.display()))?;
        if self.toml.gates.overrides.is_empty() {
            return Ok(registry);
        }
        registry.with_gate_overrides(&self.toml.gates.overrides)
    }

    pub fn build_executor(&self, registry: &PhaseRegistry) -> CommandAgentExecutor {
        let mut executor =
            CommandAgentExecutor::new(self.agent_command(), self.toml.execution_policy(""));
        for phase in registry.phases() {
            if self.toml.executor.phases.contains_key(&phase.name) {
                executor =
                    executor.with_phase_policy(&phase.name, self.toml.execution_policy(&phase.name));
            }
        }
        executor
    }

    /// Checker with a critic for every phase that has a persona.
    pub fn build_checker(&self, registry: &PhaseRegistry) -> Result<CheckerPattern> {
        if !self.toml.checker.enabled {
            return Ok(CheckerPattern::disabled());
        }
        let client: Arc<dyn ReviewClient> = Arc::new(CommandReviewClient::new(
            self.review_command(),
            Duration::from_secs(self.toml.checker.timeout_secs),
        ));
        self.checker_with_client(registry, client)
    }

    pub fn checker_with_client(
        &self,
        registry: &PhaseRegistry,
        client: Arc<dyn ReviewClient>,
    ) -> Result<CheckerPattern> {
        let mut checker =
            CheckerPattern::new(client).with_max_artifact_chars(self.toml.checker.max_artifact_chars);
        for phase in registry.phases() {
            if let Some(config) = self.toml.checker_config(&phase.name)? {
                checker = checker.with_phase(&phase.name, config);
            }
        }
        Ok(checker)
    }

    pub fn validate(&self, registry: &PhaseRegistry) -> Vec<String> {
        self.toml.validate(registry)
    }
}
