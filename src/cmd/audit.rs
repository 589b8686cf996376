//! Audit trail view: `specforge audit`.

use anyhow::Result;
use console::style;
use specforge::audit::{AuditKind, AuditLog};
use std::path::Path;

use super::Workspace;

pub async fn cmd_audit(
    project_dir: &Path,
    verbose: bool,
    project: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let log = AuditLog::new(&workspace.config.audit_dir());
    let events = log.events_for(&id)?;

    let skip = limit.map(|n| events.len().saturating_sub(n)).unwrap_or(0);
    println!();
    if events.is_empty() {
        println!("No audit events for {}.", id);
    }
    for event in events.iter().skip(skip) {
        println!(
            "{} {:<24} {}",
            style(event.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
            event.kind.name(),
            describe(&event.kind)
        );
    }
    println!();
    Ok(())
}

fn describe(kind: &AuditKind) -> String {
    match kind {
        AuditKind::ProjectCreated { name } => name.clone(),
        AuditKind::PhaseCompleted {
            phase,
            version,
            attempts,
            confidence,
        } => format!("{phase} v{version} after {attempts} attempt(s), confidence {confidence:.2}"),
        AuditKind::PhaseEscalated { phase, reason } => format!("{phase}: {reason}"),
        AuditKind::PhaseFailed {
            phase,
            failure_kind,
            ..
        } => format!("{phase} ({failure_kind})"),
        AuditKind::GateApproved {
            gate,
            approver,
            status,
            ..
        } => format!("{gate} {status} by {approver}"),
        AuditKind::GateRejected {
            gate,
            rejected_by,
            reason,
        } => format!("{gate} by {rejected_by}: {reason}"),
        AuditKind::Advanced { from, to } => format!("{from} → {to}"),
        AuditKind::RolledBack {
            target,
            snapshot_id,
            ..
        } => format!("to {target} (snapshot {snapshot_id})"),
        AuditKind::SnapshotRestored {
            snapshot_id,
            restored,
        } => format!("{snapshot_id}: {restored} record(s)"),
        AuditKind::ClarificationsResolved { mode, count } => format!("{count} in {mode} mode"),
    }
}
