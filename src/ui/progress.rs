use crate::ui::icons::{CHECK, CROSS, REVIEW, STOP};
use crate::workflow::{WorkflowObserver, WorkflowState};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Terminal spinner for a single review.
///
/// Follows the workflow through [`WorkflowObserver`] and shows the current
/// state, attempt number and elapsed time. Draws to stderr and hides
/// itself when stderr is not a terminal.
pub struct ReviewProgress {
    bar: ProgressBar,
    tool: String,
    max_attempts: u32,
    attempt: AtomicU32,
    verbose: bool,
}

impl ReviewProgress {
    pub fn new(tool: &str, max_attempts: u32, verbose: bool) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style);
        bar.set_prefix("Review");
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            tool: tool.to_string(),
            max_attempts,
            attempt: AtomicU32::new(0),
            verbose,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        self.bar.println(msg.as_ref());
    }

    fn status_line(&self, state: WorkflowState) -> String {
        let attempt = self.attempt.load(Ordering::SeqCst);
        if attempt == 0 {
            state.to_string()
        } else {
            format!(
                "{} {} {}",
                style(&self.tool).cyan(),
                state,
                style(format!("(attempt {}/{})", attempt, self.max_attempts)).dim()
            )
        }
    }

    /// Stop the spinner, leaving nothing behind.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl WorkflowObserver for ReviewProgress {
    fn state_changed(&self, state: WorkflowState, attempt: u32) {
        if attempt > 0 {
            let previous = self.attempt.swap(attempt, Ordering::SeqCst);
            if previous != 0 && previous != attempt {
                self.print_line(format!(
                    "    {} attempt {} failed, relaunching {}",
                    CROSS,
                    previous,
                    style(&self.tool).cyan()
                ));
            }
        }

        match state {
            WorkflowState::Succeeded => {
                self.print_line(format!("{} Review finished", CHECK));
                self.finish();
            }
            WorkflowState::Failed => {
                self.print_line(format!("{} Review failed", CROSS));
                self.finish();
            }
            WorkflowState::Aborted => {
                self.print_line(format!("{} Review cancelled", STOP));
                self.finish();
            }
            WorkflowState::Monitoring => {
                self.bar
                    .set_message(format!("{} {}", REVIEW, self.status_line(state)));
            }
            other => {
                if self.verbose {
                    self.print_line(format!("    {} {}", style("→").dim(), style(other).dim()));
                }
                self.bar.set_message(self.status_line(other));
            }
        }
    }
}
