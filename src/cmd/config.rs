//! Configuration view and validation commands: `specforge config`.

use anyhow::Result;
use specforge::config::{AGENT_CMD_ENV, REVIEW_CMD_ENV, SpecforgeConfig, SpecforgeToml};

use crate::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = SpecforgeConfig::new(project_dir.to_path_buf())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Specforge Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No specforge.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            let toml = &config.toml;
            println!("[executor]");
            println!("  command = \"{}\"", toml.executor.command);
            println!("  args = {:?}", toml.executor.args);
            println!("  timeout_secs = {}", toml.executor.timeout_secs);
            println!("  retries = {}", toml.executor.retries);
            for (phase, o) in &toml.executor.phases {
                println!(
                    "  phases.{}: timeout_secs = {:?}, retries = {:?}",
                    phase, o.timeout_secs, o.retries
                );
            }
            println!();

            println!("[checker]");
            println!("  enabled = {}", toml.checker.enabled);
            println!("  command = \"{}\"", toml.checker.command);
            println!("  max_artifact_chars = {}", toml.checker.max_artifact_chars);
            for (phase, c) in &toml.checker.phases {
                println!(
                    "  phases.{}: persona = {:?}, max_regenerations = {:?}, escalate_on_critical = {:?}",
                    phase, c.persona, c.max_regenerations, c.escalate_on_critical
                );
            }
            println!();

            if !toml.gates.overrides.is_empty() {
                println!("[gates.overrides]");
                let mut names: Vec<_> = toml.gates.overrides.keys().collect();
                names.sort();
                for name in names {
                    let o = &toml.gates.overrides[name];
                    println!(
                        "  {}: blocking = {:?}, auto_approve_threshold = {:?}",
                        name, o.blocking, o.auto_approve_threshold
                    );
                }
                println!();
            }

            println!("[clarification]");
            println!("  mode = \"{}\"", toml.clarification.mode);
            println!();

            println!("Effective values (with env overrides):");
            println!("  agent command  = \"{}\"", config.agent_command().display());
            println!("  review command = \"{}\"", config.review_command().display());
            println!("  ({} / {} override the file)", AGENT_CMD_ENV, REVIEW_CMD_ENV);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let registry = config.load_registry()?;
            let warnings = config.validate(&registry);
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("specforge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&config.specforge_dir)?;
            SpecforgeToml::default().save(&config_path)?;

            println!("Created specforge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [executor] agent command, timeout_secs, retries");
            println!("  - [checker] critic command and per-phase personas");
            println!("  - [gates.overrides.<gate>] blocking, auto_approve_threshold");
            println!("  - [clarification] mode");
            println!();
        }
    }

    Ok(())
}
