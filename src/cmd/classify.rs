//! Failure classification: `specforge classify`.

use anyhow::{Result, bail};
use console::style;
use specforge::config::SpecforgeConfig;
use specforge::remediation::RemediationPlanner;
use std::path::Path;
use std::sync::Arc;

pub fn cmd_classify(project_dir: &Path, phase: &str, message: &str) -> Result<()> {
    let config = SpecforgeConfig::new(project_dir.to_path_buf())?;
    let registry = Arc::new(config.load_registry()?);
    if !registry.contains(phase) {
        bail!("Phase {} is not registered", phase);
    }

    let remediation = RemediationPlanner::new(registry).plan(phase, message);
    let classification = &remediation.classification;
    let strategy = &remediation.strategy;

    println!();
    println!("Kind:          {}", style(classification.kind).bold());
    println!("Confidence:    {:.2}", classification.confidence);
    if let Some(ref matched) = classification.matched {
        println!("Matched:       \"{}\"", matched);
    }
    println!(
        "Agent:         {}",
        strategy.agent_to_rerun.as_deref().unwrap_or("-")
    );
    println!(
        "Target phase:  {}",
        strategy.target_phase.as_deref().unwrap_or("-")
    );
    println!("Manual review: {}", strategy.requires_manual_review);
    if !strategy.additional_instructions.is_empty() {
        println!("Instructions:  {}", strategy.additional_instructions);
    }
    if let Some(ref reason) = strategy.reason {
        println!("Reason:        {}", reason);
    }
    println!();
    Ok(())
}
