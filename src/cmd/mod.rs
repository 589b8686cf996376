//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                         |
//! |------------|------------------------------------------|
//! | `project`  | `Init`, `Status`, `Phases`               |
//! | `run`      | `Run`, `Advance`                         |
//! | `gates`    | `Gates`, `Approve`, `Reject`             |
//! | `rollback` | `Rollback`, `Snapshots`, `Restore`       |
//! | `clarify`  | `Clarify`                                |
//! | `classify` | `Classify`                               |
//! | `audit`    | `Audit`                                  |
//! | `config`   | `Config`                                 |

pub mod audit;
pub mod clarify;
pub mod classify;
pub mod config;
pub mod gates;
pub mod project;
pub mod rollback;
pub mod run;

pub use audit::cmd_audit;
pub use clarify::cmd_clarify;
pub use classify::cmd_classify;
pub use config::cmd_config;
pub use gates::{cmd_approve, cmd_gates, cmd_reject};
pub use project::{cmd_init, cmd_phases, cmd_status};
pub use rollback::{cmd_restore, cmd_rollback, cmd_snapshots};
pub use run::{cmd_advance, cmd_run};

use anyhow::{Context, Result, bail};
use specforge::audit::AuditLog;
use specforge::config::SpecforgeConfig;
use specforge::engine::Engine;
use specforge::project::validate_slug;
use specforge::store::{FileStore, Stores};
use std::path::Path;
use std::sync::Arc;

/// Resolved configuration plus an engine wired to the on-disk stores.
pub struct Workspace {
    pub config: SpecforgeConfig,
    pub engine: Engine,
}

impl Workspace {
    pub fn open(project_dir: &Path, verbose: bool) -> Result<Self> {
        let config = SpecforgeConfig::with_cli_args(project_dir.to_path_buf(), verbose)?;
        let registry = Arc::new(config.load_registry()?);
        let executor = Arc::new(config.build_executor(&registry));
        let checker = config.build_checker(&registry)?;
        let stores = Stores::from_backend(Arc::new(FileStore::new(&config.state_dir())));

        let engine = Engine::new(registry, executor, stores)
            .with_checker(checker)
            .with_audit(AuditLog::new(&config.audit_dir()))
            .with_clarification_mode(config.toml.clarification.mode);
        Ok(Self { config, engine })
    }

    /// The explicit `--project`, or the only project in the workspace.
    pub async fn project_id(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(id) = explicit {
            validate_slug(id).with_context(|| format!("Invalid project id '{id}'"))?;
            return Ok(id.to_string());
        }
        let projects = self.engine.list_projects().await?;
        match projects.as_slice() {
            [] => bail!(
                "No projects found in {}. Run 'specforge init <slug>' first.",
                self.config.project_dir.display()
            ),
            [only] => Ok(only.id.clone()),
            many => bail!(
                "Several projects found ({}); pass --project <slug>",
                many.iter()
                    .map(|p| p.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}
