//! Terminal status output: one spinner line per target.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use rapply_common::Reporter;
use std::time::Duration;

/// Owns the spinner area shared by all targets.
pub struct TerminalUi {
    multi: MultiProgress,
}

impl TerminalUi {
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self { multi }
    }

    /// Add a status line for `prefix`.
    pub fn reporter(&self, prefix: &str) -> SpinnerReporter {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(format!("[{prefix}]"));
        bar.enable_steady_tick(Duration::from_millis(100));
        SpinnerReporter { bar }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {prefix:.bold} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
}

pub struct SpinnerReporter {
    bar: ProgressBar,
}

impl Reporter for SpinnerReporter {
    fn update(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn success(&self, message: &str) {
        self.bar
            .finish_with_message(format!("{} {message}", style("✔").green()));
    }

    fn error(&self, message: &str) {
        self.bar
            .finish_with_message(format!("{} {message}", style("✖").red()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_finishes_bar() {
        let ui = TerminalUi::new(true);
        let reporter = ui.reporter("web1");

        reporter.update("Connecting as root");
        assert_eq!(reporter.bar.message(), "Connecting as root");
        assert_eq!(reporter.bar.prefix(), "[web1]");

        reporter.success("Successfully converged site.tgz.");
        assert!(reporter.bar.is_finished());
        assert!(reporter.bar.message().ends_with("Successfully converged site.tgz."));
    }

    #[test]
    fn test_error_finishes_bar() {
        let ui = TerminalUi::new(true);
        let reporter = ui.reporter("web2");
        reporter.error("[RAP-E101] connection refused");
        assert!(reporter.bar.is_finished());
        assert!(reporter.bar.message().contains("RAP-E101"));
    }
}
