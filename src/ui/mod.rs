//! Terminal presentation helpers shared by the CLI commands.

pub mod icons;
pub mod progress;

pub use progress::PhaseSpinner;

use crate::gates::GateStatus;
use console::{StyledObject, style};

/// Gate status coloured for tables.
pub fn gate_status(status: GateStatus) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        GateStatus::Approved | GateStatus::AutoApproved => style(text).green(),
        GateStatus::Rejected => style(text).red(),
        GateStatus::Pending => style(text).yellow(),
    }
}

/// Human-friendly byte count.
pub fn format_bytes(bytes: usize) -> String {
    match bytes {
        b if b >= 1024 * 1024 => format!("{:.1} MiB", b as f64 / (1024.0 * 1024.0)),
        b if b >= 1024 => format!("{:.1} KiB", b as f64 / 1024.0),
        b => format!("{b} B"),
    }
}
