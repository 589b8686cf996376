//! Phase generation and advancing: `specforge run`, `specforge advance`.

use anyhow::{Result, bail};
use console::style;
use specforge::engine::{PhaseExecutionResult, PhaseOutcome};
use specforge::ui::{PhaseSpinner, icons};
use std::path::Path;

use super::Workspace;

/// Feedback items printed per escalated phase.
const MAX_FEEDBACK_SHOWN: usize = 5;

pub async fn cmd_run(
    project_dir: &Path,
    verbose: bool,
    project: Option<&str>,
    phase: Option<&str>,
) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let engine = &workspace.engine;
    let current = engine.get_project(&id).await?.current_phase;

    let target = phase.unwrap_or(&current);
    let spinner = PhaseSpinner::start(&format!("Generating {target}..."));
    let outcomes = match phase {
        Some(phase) => engine.run_phase(&id, phase).await.map(|o| vec![o]),
        None => engine.run_current(&id).await,
    };
    spinner.finish();
    let outcomes = outcomes?;

    println!();
    for outcome in &outcomes {
        print_outcome(outcome, verbose);
    }

    let unfinished = outcomes.iter().filter(|o| !o.is_completed()).count();
    if unfinished > 0 {
        bail!("{} phase(s) did not complete", unfinished);
    }

    let gates = match phase {
        Some(phase) => engine.registry().gates_for_phase(phase),
        None => engine.registry().gates_for_stage(&current),
    };
    if !gates.is_empty() {
        println!("Review the output, then approve:");
        for gate in gates {
            println!("  specforge approve {} --approver <name>", gate.name);
        }
        println!();
    }
    Ok(())
}

pub async fn cmd_advance(project_dir: &Path, verbose: bool, project: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let outcome = workspace.engine.advance(&id).await?;

    println!();
    println!(
        "{}Advanced {} → {}",
        icons::CHECK,
        style(&outcome.previous_phase).dim(),
        style(&outcome.new_phase).cyan().bold()
    );
    if outcome.completed.len() > 1 {
        println!("  Completed: {}", outcome.completed.join(", "));
    }
    println!();
    Ok(())
}

fn print_outcome(outcome: &PhaseOutcome, verbose: bool) {
    match outcome {
        PhaseOutcome::Completed { result, version } => {
            println!(
                "{}{} completed (version {}, {} attempt(s), {:.1}s)",
                icons::CHECK,
                style(&result.phase).bold(),
                version,
                result.attempts,
                result.duration.as_secs_f64()
            );
            if let Some(ref review) = result.review {
                println!("  Critic: {} (confidence {:.2})", review.summary, review.confidence);
            }
            print_artifacts(result);
            print_warnings(result, verbose);
        }
        PhaseOutcome::Escalated { result, reason } => {
            println!(
                "{}{} escalated: {}",
                icons::WARN,
                style(&result.phase).bold(),
                style(reason).yellow()
            );
            if let Some(ref review) = result.review {
                for item in review.feedback.iter().take(MAX_FEEDBACK_SHOWN) {
                    println!("  - [{}] {}: {}", item.severity, item.category, item.concern);
                }
                if review.feedback.len() > MAX_FEEDBACK_SHOWN {
                    println!("  ... {} more", review.feedback.len() - MAX_FEEDBACK_SHOWN);
                }
            }
            println!("  Needs human attention; nothing was saved.");
        }
        PhaseOutcome::Failed {
            result,
            remediation,
        } => {
            println!(
                "{}{} failed: {}",
                icons::CROSS,
                style(&result.phase).bold(),
                style(result.error.as_deref().unwrap_or("unknown error")).red()
            );
            let strategy = &remediation.strategy;
            println!(
                "  Classified as {} (confidence {:.2})",
                style(remediation.classification.kind).bold(),
                remediation.classification.confidence
            );
            if strategy.requires_manual_review {
                println!(
                    "  Manual review required{}",
                    strategy
                        .reason
                        .as_ref()
                        .map(|r| format!(": {r}"))
                        .unwrap_or_default()
                );
            } else if let (Some(agent), Some(phase)) = (&strategy.agent_to_rerun, &strategy.target_phase) {
                println!("  Suggested: re-run {} for {}", agent, phase);
                if !strategy.additional_instructions.is_empty() {
                    println!("  Instructions: {}", strategy.additional_instructions);
                }
            }
        }
    }
    println!();
}

fn print_artifacts(result: &PhaseExecutionResult) {
    for (name, content) in &result.artifacts {
        println!("  {} ({} bytes)", name, content.len());
    }
}

fn print_warnings(result: &PhaseExecutionResult, verbose: bool) {
    let warnings = &result.validation.warnings;
    if warnings.is_empty() {
        return;
    }
    if verbose {
        for warning in warnings {
            println!("  {}{}", icons::WARN, warning.describe());
        }
    } else {
        println!("  {} validation warning(s); use --verbose to list", warnings.len());
    }
}
