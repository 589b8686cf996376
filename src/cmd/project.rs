//! Project creation, status and registry listing.

use anyhow::{Context, Result};
use console::style;
use specforge::config::SpecforgeConfig;
use specforge::phase::DONE_PHASE;
use specforge::ui::{self, icons};
use std::path::Path;

use super::Workspace;

pub async fn cmd_init(project_dir: &Path, verbose: bool, slug: &str, name: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    std::fs::create_dir_all(workspace.config.state_dir())
        .context("Failed to create .specforge/state")?;

    let name = name
        .map(str::to_string)
        .or_else(|| workspace.config.toml.project.name.clone())
        .unwrap_or_else(|| slug.to_string());
    let project = workspace.engine.create_project(slug, &name).await?;
    let gates = workspace.engine.gates().list_gates(slug).await?;

    println!();
    println!(
        "{}Created project {} ({})",
        icons::SPARKLE,
        style(&project.id).bold(),
        project.name
    );
    println!("  Current phase: {}", style(&project.current_phase).cyan());
    println!("  Gates:         {} pending", gates.len());
    println!();
    println!("Next steps:");
    println!("  1. Run `specforge run` to generate {}", project.current_phase);
    println!("  2. Run `specforge advance` once its gates are approved");
    println!();
    Ok(())
}

pub async fn cmd_status(project_dir: &Path, verbose: bool, project: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let engine = &workspace.engine;
    let project = engine.get_project(&id).await?;
    let registry = engine.registry();

    println!();
    println!("{} ({})", style(&project.name).bold(), project.id);
    println!("{}", "=".repeat(project.name.len() + project.id.len() + 3));
    println!();
    println!("Current phase: {}", style(&project.current_phase).cyan().bold());
    if project.phases_completed.is_empty() {
        println!("Completed:     (none)");
    } else {
        println!("Completed:     {}", project.phases_completed.join(" → "));
    }
    println!("Version:       {}", project.version);

    let pending = project.pending_clarifications();
    if pending > 0 {
        println!(
            "{}{} clarification question(s) pending (`specforge clarify list`)",
            icons::QUESTION,
            pending
        );
    }

    if project.current_phase == DONE_PHASE {
        println!();
        println!("{}Pipeline complete.", icons::CHECK);
        println!();
        return Ok(());
    }

    let stage = registry
        .stage_of(&project.current_phase)
        .with_context(|| format!("Phase {} is not in the registry", project.current_phase))?;

    println!();
    println!("Current stage:");
    for member in stage.phases() {
        let artifacts = engine.phase_artifacts(&id, &member).await?;
        let Some(spec) = registry.phase(&member) else {
            continue;
        };
        println!("  {} ({})", style(&member).bold(), spec.agent);
        for required in &spec.required_artifacts {
            let marker = if artifacts.contains_key(required) {
                style("present").green()
            } else {
                style("missing").red()
            };
            println!("    {:<32} {}", required, marker);
        }
        for gate in registry.gates_for_phase(&member) {
            let status = engine.gates().check_gate_status(&id, &gate.name).await?;
            let label = match status {
                Some(status) => ui::gate_status(status).to_string(),
                None => style("uninitialized".to_string()).red().to_string(),
            };
            let kind = if gate.blocking { "blocking" } else { "advisory" };
            println!("    {}{} [{}] {}", icons::GATE, gate.name, kind, label);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_phases(project_dir: &Path) -> Result<()> {
    let config = SpecforgeConfig::new(project_dir.to_path_buf())?;
    let registry = config.load_registry()?;
    let source = if config.phases_file().exists() {
        config.phases_file().display().to_string()
    } else {
        "built-in registry".to_string()
    };

    println!();
    println!("Phases from: {}", source);
    println!();
    println!(
        "{:<4} {:<24} {:<12} {:<8} Required artifacts",
        "#", "Phase", "Agent", "Group"
    );
    println!(
        "{:<4} {:<24} {:<12} {:<8} ------------------",
        "--", "-----", "-----", "-----"
    );
    for (i, phase) in registry.phases().iter().enumerate() {
        println!(
            "{:<4} {:<24} {:<12} {:<8} {}",
            i + 1,
            phase.name,
            phase.agent,
            phase.group.as_deref().unwrap_or("-"),
            phase.required_artifacts.join(", ")
        );
        for gate in registry.gates_for_phase(&phase.name) {
            let threshold = gate
                .auto_approve_threshold
                .map(|t| format!(", auto-approve at {t}"))
                .unwrap_or_default();
            println!(
                "     {}{} ({}{}{})",
                icons::GATE,
                style(&gate.name).dim(),
                if gate.blocking { "blocking" } else { "advisory" },
                format_args!(", {}", gate.stakeholder),
                threshold
            );
        }
    }
    println!();
    Ok(())
}
