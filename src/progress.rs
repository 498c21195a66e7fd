//! Status and progress reporting.
//!
//! The pipeline never talks to a terminal or a window directly; it publishes
//! through [`ProgressSink`]. The CLI plugs in [`ConsoleProgress`]
//! (indicatif); a GUI collaborator would implement the trait and additionally
//! consume the per-frame preview hook.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::frame::Frame;

/// Pure notifications; implementations must not fail or block the worker.
pub trait ProgressSink: Send + Sync {
    /// Human-readable status line (start, completion, termination, errors).
    fn on_status(&self, text: &str);

    /// Frame counters after each processed frame. `total` is 0 when the
    /// source does not know its frame count.
    fn on_progress(&self, current: u64, total: u64);

    /// The frame just processed, for live preview. Default: ignored.
    fn on_preview(&self, _frame: &Frame) {}
}

/// indicatif progress bar on stderr.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_draw_target(ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }

    /// Close the bar, leaving `text` as the final line.
    pub fn finish(&self, text: &str) {
        self.bar.finish_with_message(text.to_string());
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_status(&self, text: &str) {
        self.bar.set_message(text.to_string());
    }

    fn on_progress(&self, current: u64, total: u64) {
        if total > 0 && self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(current);
    }
}

/// Discards every notification.
#[derive(Default)]
pub struct NullProgress;

impl NullProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressSink for NullProgress {
    fn on_status(&self, _text: &str) {}

    fn on_progress(&self, _current: u64, _total: u64) {}
}
