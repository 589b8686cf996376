//! Integration tests for the specforge CLI
//!
//! The agent is a shell command that ignores its request and prints a
//! fixture file named after the phase, so whole pipelines run offline.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a specforge Command
fn specforge() -> Command {
    let mut cmd = cargo_bin_cmd!("specforge");
    cmd.env_remove("SPECFORGE_PROJECT")
        .env_remove("SPECFORGE_AGENT_CMD")
        .env_remove("SPECFORGE_REVIEW_CMD");
    cmd
}

const TEST_CONFIG: &str = r#"
[executor]
command = "sh"
args = ["-c", "cat > /dev/null; cat .specforge/fixtures/$SPECFORGE_PHASE.txt"]
timeout_secs = 30
retries = 0

[checker]
enabled = false
"#;

fn doc(title: &str) -> String {
    format!(
        "# {title}\n\nThis document was produced by the fixture agent. {}",
        "It has enough prose to clear the minimum length check. ".repeat(4)
    )
}

/// Temp directory with a config and agent fixtures for the first phases.
fn create_workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let fixtures = dir.path().join(".specforge/fixtures");
    fs::create_dir_all(&fixtures).unwrap();
    fs::write(dir.path().join(".specforge/specforge.toml"), TEST_CONFIG).unwrap();

    fs::write(
        fixtures.join("ANALYSIS.txt"),
        format!(
            "<artifact name=\"project-brief.md\">\n{}\n</artifact>\n\
             <artifact name=\"project-classification.json\">\n{{\"project_type\": \"web_app\"}}\n</artifact>\n",
            doc("Project Brief")
        ),
    )
    .unwrap();
    fs::write(
        fixtures.join("STACK_SELECTION.txt"),
        format!(
            "<artifact name=\"stack-analysis.md\">\n{}\n</artifact>\n\
             <artifact name=\"stack.json\">\n{{\"frontend\": \"svelte\", \"backend\": \"axum\"}}\n</artifact>\n",
            doc("Stack Analysis")
        ),
    )
    .unwrap();
    dir
}

fn init_project(dir: &TempDir) {
    specforge()
        .current_dir(dir.path())
        .args(["init", "acme"])
        .assert()
        .success();
}

fn run_and_advance(dir: &TempDir) {
    specforge()
        .current_dir(dir.path())
        .arg("run")
        .assert()
        .success();
    specforge()
        .current_dir(dir.path())
        .arg("advance")
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_specforge_help() {
        specforge().arg("--help").assert().success();
    }

    #[test]
    fn test_specforge_version() {
        specforge().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_project() {
        let dir = create_workspace();

        specforge()
            .current_dir(dir.path())
            .args(["init", "acme", "--name", "Acme Portal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created project"))
            .stdout(predicate::str::contains("ANALYSIS"));

        assert!(dir.path().join(".specforge/state").exists());
    }

    #[test]
    fn test_init_rejects_duplicate_slug() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["init", "acme"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_init_rejects_invalid_slug() {
        let dir = create_workspace();

        specforge()
            .current_dir(dir.path())
            .args(["init", "Not A Slug"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid project id"));
    }

    #[test]
    fn test_status_without_project_fails() {
        let dir = create_workspace();

        specforge()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No projects found"));
    }

    #[test]
    fn test_project_flag_rejects_path_like_id() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["--project", "../acme", "status"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid project id"));
    }

    #[test]
    fn test_phases_lists_registry() {
        let dir = create_workspace();

        specforge()
            .current_dir(dir.path())
            .arg("phases")
            .assert()
            .success()
            .stdout(predicate::str::contains("built-in registry"))
            .stdout(predicate::str::contains("SPEC_DESIGN_TOKENS"))
            .stdout(predicate::str::contains("stack_approved"));
    }
}

// =============================================================================
// Pipeline Tests
// =============================================================================

mod pipeline {
    use super::*;

    #[test]
    fn test_run_generates_current_phase() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("ANALYSIS completed"))
            .stdout(predicate::str::contains("project-brief.md"));

        specforge()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("present"));
    }

    #[test]
    fn test_gate_blocks_advance_until_approved() {
        let dir = create_workspace();
        init_project(&dir);
        run_and_advance(&dir);

        specforge()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success();

        specforge()
            .current_dir(dir.path())
            .arg("advance")
            .assert()
            .failure()
            .stderr(predicate::str::contains("stack_approved"));

        specforge()
            .current_dir(dir.path())
            .args(["approve", "stack_approved", "--approver", "alice"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Gate stack_approved is now approved"));

        specforge()
            .current_dir(dir.path())
            .arg("advance")
            .assert()
            .success()
            .stdout(predicate::str::contains("SPEC_PM"));
    }

    #[test]
    fn test_run_fails_when_agent_produces_nothing() {
        let dir = create_workspace();
        fs::remove_file(dir.path().join(".specforge/fixtures/ANALYSIS.txt")).unwrap();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stdout(predicate::str::contains("ANALYSIS failed"))
            .stderr(predicate::str::contains("did not complete"));
    }

    #[test]
    fn test_run_inactive_phase_fails() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["run", "--phase", "SPEC_PM"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("is not active"));
    }

    #[test]
    fn test_gates_lists_pending_records() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .arg("gates")
            .assert()
            .success()
            .stdout(predicate::str::contains("architecture_approved"))
            .stdout(predicate::str::contains("pending"));
    }
}

// =============================================================================
// Rollback Tests
// =============================================================================

mod rollback {
    use super::*;

    #[test]
    fn test_rollback_preview_changes_nothing() {
        let dir = create_workspace();
        init_project(&dir);
        run_and_advance(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["rollback", "ANALYSIS"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing was changed"));

        specforge()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Current phase: STACK_SELECTION"));
    }

    #[test]
    fn test_rollback_confirm_then_restore() {
        let dir = create_workspace();
        init_project(&dir);
        run_and_advance(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["rollback", "ANALYSIS", "--confirm"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rolled back"));

        specforge()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Current phase: ANALYSIS"))
            .stdout(predicate::str::contains("missing"));

        specforge()
            .current_dir(dir.path())
            .arg("snapshots")
            .assert()
            .success()
            .stdout(predicate::str::contains("ANALYSIS"));
    }

    #[test]
    fn test_rollback_to_unreached_phase_fails() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["rollback", "SPEC_PM", "--confirm"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("has not been completed"));
    }
}

// =============================================================================
// Clarification, Classification, Audit and Config Tests
// =============================================================================

mod support_commands {
    use super::*;

    #[test]
    fn test_pending_clarification_blocks_run() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["clarify", "add", "Is there a mobile app?", "--category", "scope"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Q1"));

        specforge()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("clarification"));

        specforge()
            .current_dir(dir.path())
            .args(["clarify", "answer", "Q1", "Web only"])
            .assert()
            .success();

        specforge()
            .current_dir(dir.path())
            .args(["clarify", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Web only"));

        specforge()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success();
    }

    #[test]
    fn test_clarify_auto_uses_first_option() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["clarify", "add", "Which region?", "--option", "EU", "--option", "US"])
            .assert()
            .success();

        specforge()
            .current_dir(dir.path())
            .args(["clarify", "auto", "--mode", "hybrid"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resolved 1 question(s)"));
    }

    #[test]
    fn test_classify_failure_message() {
        let dir = create_workspace();

        specforge()
            .current_dir(dir.path())
            .args([
                "classify",
                "--phase",
                "SPEC_PM",
                "PRD.md is missing requirements for user authentication mentioned in project-brief.md",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("missing_requirement_mapping"))
            .stdout(predicate::str::contains("scrummaster"));
    }

    #[test]
    fn test_audit_records_operations() {
        let dir = create_workspace();
        init_project(&dir);

        specforge()
            .current_dir(dir.path())
            .args(["approve", "stack_approved", "--approver", "alice"])
            .assert()
            .success();

        specforge()
            .current_dir(dir.path())
            .arg("audit")
            .assert()
            .success()
            .stdout(predicate::str::contains("project_created"))
            .stdout(predicate::str::contains("gate_approved"));
    }

    #[test]
    fn test_config_validate_and_show() {
        let dir = create_workspace();

        specforge()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));

        specforge()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("command = \"sh\""));
    }

    #[test]
    fn test_config_init_writes_defaults() {
        let dir = TempDir::new().unwrap();

        specforge()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created specforge.toml"));

        let written = fs::read_to_string(dir.path().join(".specforge/specforge.toml")).unwrap();
        assert!(written.contains("[executor]"));
    }
}
