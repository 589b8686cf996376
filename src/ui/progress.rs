use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while an agent or critic call is in flight.
///
/// indicatif hides the bar when stderr is not a terminal, so scripted runs
/// only see the final lines printed by the caller.
pub struct PhaseSpinner {
    bar: ProgressBar,
}

impl PhaseSpinner {
    pub fn start(message: &str) -> Self {
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}
