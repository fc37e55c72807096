use std::io::{self, Write};
use std::time::Instant;

use crate::sweep::SweepStats;

/// Timestamped status lines on stderr for the CLI; stdout stays reserved for results.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    /// One line per finished sweep: text nodes seen and how many were rewritten.
    pub fn sweep_done(&self, label: &str, stats: SweepStats) {
        if !self.enabled {
            return;
        }
        let total = stats.visited.max(1);
        let pct = (stats.written.min(total) as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{ts}] {label}: {}/{} text nodes rewritten ({pct:5.1}%)",
            stats.written, stats.visited
        );
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formatting() {
        assert_eq!(fmt_elapsed(-1.0), "00:00");
        assert_eq!(fmt_elapsed(75.9), "01:15");
        assert_eq!(fmt_elapsed(3723.0), "01:02:03");
    }
}
