//! Clarification questions: `specforge clarify`.

use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use specforge::clarification::{ClarificationMode, ClarificationQuestion, Resolution, ResolvedBy};
use specforge::ui::icons;
use std::path::Path;

use crate::ClarifyCommands;
use super::Workspace;

pub async fn cmd_clarify(
    project_dir: &Path,
    verbose: bool,
    project: Option<&str>,
    command: ClarifyCommands,
) -> Result<()> {
    let workspace = Workspace::open(project_dir, verbose)?;
    let id = workspace.project_id(project).await?;
    let engine = &workspace.engine;

    match command {
        ClarifyCommands::List => {
            let project = engine.get_project(&id).await?;
            println!();
            if project.clarifications.is_empty() {
                println!("No clarification questions for {}.", id);
                println!();
                return Ok(());
            }
            for q in &project.clarifications {
                println!("{} [{}] {}", style(&q.id).bold(), q.category, q.question);
                if !q.options.is_empty() {
                    println!("    options: {}", q.options.join(" | "));
                }
                match &q.resolution {
                    Resolution::Unresolved => println!("    {}", style("unresolved").yellow()),
                    Resolution::Resolved {
                        by,
                        answer,
                        assumption,
                    } => {
                        let who = match by {
                            ResolvedBy::User => "user",
                            ResolvedBy::Ai => "ai",
                        };
                        println!("    {} ({}): {}", style("resolved").green(), who, answer);
                        if let Some(assumption) = assumption {
                            println!("    assumption: {}", style(assumption).dim());
                        }
                    }
                }
            }
            println!();
        }
        ClarifyCommands::Add {
            question,
            category,
            options,
        } => {
            let added = engine
                .add_clarification(&id, &category, &question, options)
                .await?;
            println!("{}Added {}: {}", icons::QUESTION, added.id, added.question);
        }
        ClarifyCommands::Answer { id: qid, answer } => {
            let answer = match answer {
                Some(answer) => answer,
                None => {
                    let project = engine.get_project(&id).await?;
                    let question = project
                        .clarifications
                        .iter()
                        .find(|q| q.id == qid)
                        .with_context(|| format!("Clarification question '{}' not found", qid))?;
                    prompt_answer(question)?
                }
            };
            engine.answer_clarification(&id, &qid, &answer).await?;
            println!("{}Answered {}", icons::CHECK, qid);
        }
        ClarifyCommands::Auto { mode } => {
            let mode = match mode {
                Some(mode) => mode.parse::<ClarificationMode>()?,
                None => workspace.config.toml.clarification.mode,
            };
            let resolved = engine.resolve_clarifications(&id, mode).await?;
            let remaining = engine.get_project(&id).await?.pending_clarifications();
            println!(
                "{}Resolved {} question(s) in {} mode; {} still pending",
                icons::CHECK,
                resolved,
                mode,
                remaining
            );
        }
    }
    Ok(())
}

fn prompt_answer(question: &ClarificationQuestion) -> Result<String> {
    println!();
    println!("{} {}", style(&question.id).bold(), question.question);
    for (i, option) in question.options.iter().enumerate() {
        println!("  [{}] {}", i + 1, option);
    }

    let input: String = Input::new()
        .with_prompt(">")
        .allow_empty(false)
        .interact_text()
        .context("Failed to read user input")?;

    // A bare number picks one of the suggested options.
    let picked = input
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| question.options.get(i));
    Ok(picked.cloned().unwrap_or(input))
}
