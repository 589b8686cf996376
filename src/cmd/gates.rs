//! Approval gate commands: `specforge gates|approve|reject`.

use anyhow::Result;
use console::style;
use specforge::gates::{ApproveRequest, GateStatus, RejectRequest};
use specforge::ui::{self, icons};
use std::path::Path;

use super::Workspace;

pub async fn cmd_gates(project_dir: &Path, verbose: bool, project: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let engine = &workspace.engine;
    let records = engine.gates().list_gates(&id).await?;

    println!();
    println!(
        "{:<24} {:<24} {:<10} {:<14} Decided by",
        "Gate", "Phase", "Kind", "Status"
    );
    println!(
        "{:<24} {:<24} {:<10} {:<14} ----------",
        "----", "-----", "----", "------"
    );
    for record in &records {
        let definition = engine.registry().gate(&record.gate);
        let kind = match definition {
            Some(d) if d.blocking => "blocking",
            Some(_) => "advisory",
            None => "unknown",
        };
        let decided = match (&record.decided_by, record.score) {
            (Some(by), Some(score)) => format!("{by} (score {score})"),
            (Some(by), None) => by.clone(),
            _ => "-".to_string(),
        };
        // Pad before styling; escape codes break width formatting.
        let status = format!("{:<14}", record.status.to_string());
        let status = match record.status {
            GateStatus::Approved | GateStatus::AutoApproved => style(status).green(),
            GateStatus::Rejected => style(status).red(),
            GateStatus::Pending => style(status).yellow(),
        };
        println!(
            "{:<24} {:<24} {:<10} {} {}",
            record.gate, record.phase, kind, status, decided
        );
        if verbose && let Some(ref notes) = record.notes {
            println!("{:<24} {}", "", style(notes).dim());
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_approve(
    project_dir: &Path,
    verbose: bool,
    project: Option<&str>,
    gate: &str,
    approver: &str,
    score: Option<u32>,
    notes: Option<&str>,
) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;

    let mut req = ApproveRequest::new(&id, gate, approver);
    if let Some(score) = score {
        req = req.with_score(score);
    }
    if let Some(notes) = notes {
        req = req.with_notes(notes);
    }
    let record = workspace.engine.approve_gate(req).await?;

    println!();
    println!(
        "{}Gate {} is now {}",
        icons::CHECK,
        style(&record.gate).bold(),
        ui::gate_status(record.status)
    );
    println!();
    Ok(())
}

pub async fn cmd_reject(
    project_dir: &Path,
    verbose: bool,
    project: Option<&str>,
    gate: &str,
    rejected_by: &str,
    reason: &str,
) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let record = workspace
        .engine
        .reject_gate(RejectRequest::new(&id, gate, rejected_by, reason))
        .await?;

    println!();
    println!(
        "{}Gate {} is now {}",
        icons::CROSS,
        style(&record.gate).bold(),
        ui::gate_status(record.status)
    );
    println!("  Reason: {}", reason);
    println!(
        "  Roll back with `specforge rollback {} --confirm` to regenerate.",
        record.phase
    );
    println!();
    Ok(())
}
