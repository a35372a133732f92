use crate::ui::theme;
use crate::ui::Icons;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

fn visible(pb: ProgressBar) -> ProgressBar {
    if console::Term::stdout().is_term() {
        pb
    } else {
        ProgressBar::hidden()
    }
}

/// Tracks the index queue while a sweep drains it. The bar length grows
/// with the highest depth seen so far, so a second pass extends it.
pub struct QueueProgress {
    pb: ProgressBar,
    high_water: u64,
    drained: u64,
    last_depth: u64,
}

impl QueueProgress {
    pub fn new(message: &str) -> Self {
        let pb = visible(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}/{len}") {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self {
            pb,
            high_water: 0,
            drained: 0,
            last_depth: 0,
        }
    }

    /// Record the current queue depth
    pub fn observe(&mut self, depth: usize) {
        let depth = depth as u64;
        if depth > self.last_depth {
            self.high_water += depth - self.last_depth;
        } else {
            self.drained += self.last_depth - depth;
        }
        self.last_depth = depth;
        self.pb.set_length(self.high_water);
        self.pb.set_position(self.drained);
    }

    pub fn set_message(&self, msg: &str) {
        self.pb.set_message(msg.to_string());
    }

    pub fn finish(&self, elapsed: Duration, files: usize) {
        self.pb.finish_and_clear();
        println!(
            "{} {}",
            Icons::CHECK.style(theme().success.clone()),
            format!("Swept {} files in {}", files, HumanDuration(elapsed)).style(theme().success.clone())
        );
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = visible(ProgressBar::new_spinner());
        pb.set_message(format!("{} {}", Icons::HOURGLASS, message));
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish_and_clear(&self) {
        self.pb.finish_and_clear();
    }
}
