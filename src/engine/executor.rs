//! Agent executor seam and the command-backed implementation.
//!
//! The engine only knows `AgentExecutor::execute`: accumulated artifacts and
//! phase parameters in, artifact map out. Timeouts and retries belong to the
//! executor; the engine treats any returned error as the phase failing.

use crate::artifact::ArtifactMap;
use crate::process::{CommandSpec, run_with_stdin};
use anyhow::{Result, bail};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<artifact\s+name\s*=\s*"([^"]+)"\s*>(.*?)</artifact>"#).unwrap()
});

/// What the executor needs to know about the phase it is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseParams {
    pub phase: String,
    pub agent: String,
    pub required_artifacts: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Regeneration feedback or remediation instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
    /// 1-based generation attempt within one run
    pub attempt: u32,
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(
        &self,
        project_id: &str,
        accumulated: &ArtifactMap,
        params: &PhaseParams,
    ) -> Result<ArtifactMap>;
}

/// Timeout and retry budget for one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first failure
    pub retries: u32,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            retries: 1,
        }
    }
}

/// Runs an external agent command per phase.
///
/// The request (phase brief plus upstream artifacts) is written to stdin and
/// the agent answers with `<artifact name="...">...</artifact>` blocks.
pub struct CommandAgentExecutor {
    spec: CommandSpec,
    policy: ExecutionPolicy,
    phase_policies: HashMap<String, ExecutionPolicy>,
}

impl CommandAgentExecutor {
    pub fn new(spec: CommandSpec, policy: ExecutionPolicy) -> Self {
        Self {
            spec,
            policy,
            phase_policies: HashMap::new(),
        }
    }

    pub fn with_phase_policy(mut self, phase: &str, policy: ExecutionPolicy) -> Self {
        self.phase_policies.insert(phase.to_string(), policy);
        self
    }

    pub fn policy_for(&self, phase: &str) -> ExecutionPolicy {
        self.phase_policies.get(phase).copied().unwrap_or(self.policy)
    }
}

#[async_trait]
impl AgentExecutor for CommandAgentExecutor {
    async fn execute(
        &self,
        project_id: &str,
        accumulated: &ArtifactMap,
        params: &PhaseParams,
    ) -> Result<ArtifactMap> {
        let policy = self.policy_for(&params.phase);
        let request = build_agent_request(project_id, accumulated, params);
        let spec = self
            .spec
            .clone()
            .with_env("SPECFORGE_PROJECT", project_id)
            .with_env("SPECFORGE_PHASE", &params.phase)
            .with_env("SPECFORGE_AGENT", &params.agent);

        let mut last_error = None;
        for attempt in 0..=policy.retries {
            debug!(
                project = project_id,
                phase = %params.phase,
                attempt = attempt + 1,
                command = %spec.display(),
                "Invoking agent"
            );
            match run_with_stdin(&spec, &request, policy.timeout).await {
                Ok(output) => {
                    let artifacts = parse_artifacts(&output);
                    if artifacts.is_empty() {
                        last_error = Some(anyhow::anyhow!(
                            "Agent produced no <artifact> blocks for {}",
                            params.phase
                        ));
                    } else {
                        return Ok(artifacts);
                    }
                }
                Err(e) => last_error = Some(e),
            }
            if attempt < policy.retries
                && let Some(ref e) = last_error
            {
                warn!(phase = %params.phase, attempt = attempt + 1, error = %e, "Agent attempt failed; retrying");
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => bail!("Agent for {} was never invoked", params.phase),
        }
    }
}

/// Extract `<artifact name="...">` blocks. Later blocks with the same name win.
pub fn parse_artifacts(output: &str) -> ArtifactMap {
    ARTIFACT_RE
        .captures_iter(output)
        .map(|cap| (cap[1].trim().to_string(), cap[2].trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

pub fn build_agent_request(project_id: &str, accumulated: &ArtifactMap, params: &PhaseParams) -> String {
    let required = params
        .required_artifacts
        .iter()
        .map(|a| format!("- {a}"))
        .collect::<Vec<_>>()
        .join("\n");

    let upstream = if accumulated.is_empty() {
        "(none yet)\n".to_string()
    } else {
        accumulated
            .iter()
            .map(|(name, content)| format!("### {name}\n\n{content}\n"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let instructions = params
        .additional_instructions
        .as_ref()
        .map(|i| format!("\n## Additional Instructions\n\n{i}\n"))
        .unwrap_or_default();

    format!(
        r#"# Phase {phase} ({agent})

Project: {project_id}
Attempt: {attempt}
{description}
## Required Artifacts
{required}
{instructions}
## Upstream Artifacts

{upstream}
## Output Format

Wrap every artifact in a tag carrying its file name:

<artifact name="FILENAME">
...content...
</artifact>
"#,
        phase = params.phase,
        agent = params.agent,
        attempt = params.attempt,
        description = if params.description.is_empty() {
            String::new()
        } else {
            format!("\n{}\n", params.description)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PhaseParams {
        PhaseParams {
            phase: "SPEC_PM".into(),
            agent: "pm".into(),
            required_artifacts: vec!["PRD.md".into()],
            description: "Write the product requirements document".into(),
            additional_instructions: Some("Cover authentication".into()),
            attempt: 2,
        }
    }

    #[test]
    fn test_parse_artifacts() {
        let output = r#"Sure, here you go.
<artifact name="PRD.md">
# PRD
Users sign in.
</artifact>
noise
<artifact name = "notes.md">first</artifact>
<artifact name="notes.md">second</artifact>
"#;
        let artifacts = parse_artifacts(output);
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts["PRD.md"], "# PRD\nUsers sign in.");
        assert_eq!(artifacts["notes.md"], "second");
    }

    #[test]
    fn test_parse_artifacts_none() {
        assert!(parse_artifacts("no tags at all").is_empty());
        assert!(parse_artifacts("<artifact name=\"x.md\">unterminated").is_empty());
    }

    #[test]
    fn test_build_agent_request_contents() {
        let mut accumulated = ArtifactMap::new();
        accumulated.insert("project-brief.md".into(), "# Brief".into());
        let request = build_agent_request("acme", &accumulated, &params());
        assert!(request.starts_with("# Phase SPEC_PM (pm)"));
        assert!(request.contains("- PRD.md"));
        assert!(request.contains("Cover authentication"));
        assert!(request.contains("### project-brief.md"));
        assert!(request.contains("Attempt: 2"));
    }

    #[test]
    fn test_policy_overrides() {
        let executor = CommandAgentExecutor::new(
            CommandSpec::new("agent", &[]),
            ExecutionPolicy::default(),
        )
        .with_phase_policy(
            "SPEC_ARCHITECT",
            ExecutionPolicy {
                timeout: Duration::from_secs(1200),
                retries: 3,
            },
        );
        assert_eq!(executor.policy_for("SPEC_PM"), ExecutionPolicy::default());
        assert_eq!(executor.policy_for("SPEC_ARCHITECT").retries, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_round_trip() {
        let script = r#"cat > /dev/null; printf '<artifact name="%s.md"># Out</artifact>' "$SPECFORGE_PHASE""#;
        let executor = CommandAgentExecutor::new(
            CommandSpec::new("sh", &["-c".to_string(), script.to_string()]),
            ExecutionPolicy {
                timeout: Duration::from_secs(5),
                retries: 0,
            },
        );
        let artifacts = executor
            .execute("acme", &ArtifactMap::new(), &params())
            .await
            .unwrap();
        assert_eq!(artifacts["SPEC_PM.md"], "# Out");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_executor_without_artifacts_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        let script = format!(
            "cat > /dev/null; echo x >> {}; echo 'nothing useful'",
            counter.display()
        );
        let executor = CommandAgentExecutor::new(
            CommandSpec::new("sh", &["-c".to_string(), script]),
            ExecutionPolicy {
                timeout: Duration::from_secs(5),
                retries: 2,
            },
        );
        let err = executor
            .execute("acme", &ArtifactMap::new(), &params())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no <artifact> blocks"));
        let runs = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(runs.lines().count(), 3);
    }
}
