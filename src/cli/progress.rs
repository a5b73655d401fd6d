//! Terminal progress bar for matrix builds.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::processing::ProgressSink;

/// `ProgressSink` backed by an `indicatif` bar on stderr.
#[derive(Debug, Clone)]
pub struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    pub fn new(message: &'static str) -> Self {
        let style = ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏ ");
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(style);
        bar.set_message(message);
        Self { bar }
    }

    /// A bar that never draws.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressSink for IndicatifProgress {
    fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn advance(&self, delta: usize) {
        self.bar.inc(delta as u64);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_bar_tracks_position() {
        let progress = IndicatifProgress::hidden();
        progress.start(5);
        progress.advance(2);
        progress.advance(1);
        assert_eq!(progress.position(), 3);
    }
}
