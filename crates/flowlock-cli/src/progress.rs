//! Batch-compile progress with TTY detection.
//!
//! Shows a progress bar on interactive terminals and falls back to plain
//! line output when stdout is redirected.

use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};

pub fn is_tty() -> bool {
    std::io::stdout().is_terminal()
}

pub struct BatchProgress {
    bar: Option<ProgressBar>,
    total: usize,
    done: usize,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        let bar = if is_tty() && total > 1 {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:30} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };
        Self {
            bar,
            total,
            done: 0,
        }
    }

    pub fn file_done(&mut self, name: &str) {
        self.done += 1;
        match &self.bar {
            Some(bar) => {
                bar.set_message(name.to_string());
                bar.inc(1);
            }
            None => eprintln!("[{}/{}] {name}", self.done, self.total),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
