//! Rollback and snapshot commands: `specforge rollback|snapshots|restore`.

use anyhow::Result;
use console::style;
use specforge::rollback::RollbackRequest;
use specforge::ui::{self, icons};
use std::path::Path;

use super::Workspace;

/// Without `--confirm` this only prints the preview.
pub async fn cmd_rollback(
    project_dir: &Path,
    verbose: bool,
    project: Option<&str>,
    phase: &str,
    confirm: bool,
) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let engine = &workspace.engine;

    if !confirm {
        let preview = engine.rollback_preview(&id, phase).await?;
        let meta = &preview.metadata;
        println!();
        println!(
            "{}Rollback preview: {} → {}",
            icons::REWIND,
            style(&id).bold(),
            style(&meta.target_phase).cyan()
        );
        println!("  Phases reset:   {}", meta.phases_to_remove.join(", "));
        println!(
            "  Artifacts:      {} ({})",
            meta.artifact_count,
            ui::format_bytes(meta.total_bytes)
        );
        for artifact in &preview.artifacts {
            println!(
                "    {}/{} v{} ({})",
                artifact.phase,
                artifact.filename,
                artifact.version,
                ui::format_bytes(artifact.size)
            );
        }
        if let Some(ref commit) = preview.commit_id {
            println!("  Content id:     {}", &commit[..commit.len().min(12)]);
        }
        println!();
        println!("Nothing was changed. Re-run with --confirm to roll back.");
        println!();
        return Ok(());
    }

    let outcome = engine
        .rollback(RollbackRequest::new(&id, phase, true))
        .await?;
    println!();
    println!(
        "{}Rolled back {} to {}",
        icons::REWIND,
        style(&id).bold(),
        style(&outcome.target_phase).cyan().bold()
    );
    println!("  Snapshot:       {}", outcome.snapshot_id);
    println!("  Removed:        {} artifact record(s)", outcome.removed_artifacts.len());
    println!("  Gates reset:    {}", outcome.gates_reset);
    if verbose {
        for name in &outcome.removed_artifacts {
            println!("    - {}", name);
        }
    }
    println!();
    println!(
        "Restore the artifacts with `specforge restore {}`.",
        outcome.snapshot_id
    );
    println!();
    Ok(())
}

pub async fn cmd_snapshots(project_dir: &Path, verbose: bool, project: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let snapshots = workspace.engine.list_snapshots(&id).await?;

    println!();
    if snapshots.is_empty() {
        println!("No snapshots for {}.", id);
        println!();
        return Ok(());
    }
    println!(
        "{:<38} {:<24} {:<10} {:<12} Created",
        "Snapshot", "Target", "Artifacts", "Content id"
    );
    for snapshot in &snapshots {
        println!(
            "{:<38} {:<24} {:<10} {:<12} {}",
            snapshot.id,
            snapshot.target_phase,
            snapshot.artifacts.len(),
            snapshot.short_commit().unwrap_or("-"),
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_restore(
    project_dir: &Path,
    verbose: bool,
    project: Option<&str>,
    snapshot_id: &str,
) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let outcome = workspace.engine.restore_snapshot(&id, snapshot_id).await?;

    println!();
    println!(
        "{}Restored {} artifact record(s) from {} ({} already present)",
        icons::CHECK,
        outcome.restored,
        outcome.snapshot_id,
        outcome.already_present
    );
    println!();
    Ok(())
}
