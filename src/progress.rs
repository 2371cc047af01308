//! Rate-limited progress reporting, composing with `byte_size::format_bytes`
//! exactly as `ewftools/new/process_status.c` composes with
//! `byte_size_string.c` in the original source.

use std::time::{Duration, Instant};

use crate::byte_size::{format_bytes, ByteBase};

/// Terminal status a pipeline run ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Aborted,
    Failed,
}

/// One progress snapshot, ready to render or log.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    pub percent: Option<f64>,
    pub throughput_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
}

impl ProcessStatus {
    pub fn render(&self) -> String {
        let done = format_bytes(self.bytes_done, ByteBase::Binary);
        let mut out = format!("{}", done);
        if let Some(pct) = self.percent {
            out.push_str(&format!(" ({:.1}%)", pct));
        }
        out.push_str(&format!(
            " at {}/s",
            format_bytes(self.throughput_bytes_per_sec as u64, ByteBase::Binary)
        ));
        if let Some(eta) = self.eta_seconds {
            out.push_str(&format!(", ETA {:.0}s", eta));
        }
        out
    }
}

/// Receives progress ticks and the terminal status. The CLI swaps in a
/// no-op sink for `-q`.
pub trait ProgressSink {
    fn tick(&mut self, status: &ProcessStatus);
    fn finished(&mut self, status: TerminalStatus);
}

/// A `ProgressSink` that renders nothing, for `-q`.
#[derive(Default)]
pub struct QuietSink;

impl ProgressSink for QuietSink {
    fn tick(&mut self, _status: &ProcessStatus) {}
    fn finished(&mut self, _status: TerminalStatus) {}
}

/// Emits a tick when the percent-known total advances, or (for unknown
/// totals) every 10 MiB or 30 seconds, whichever comes first.
pub struct RateLimitedReporter {
    started_at: Instant,
    last_tick_at: Instant,
    last_percent: Option<u32>,
    last_bytes_total: u64,
    bytes_total: Option<u64>,
}

const UNKNOWN_TOTAL_BYTE_STEP: u64 = 10 * 1024 * 1024;
const UNKNOWN_TOTAL_TIME_STEP: Duration = Duration::from_secs(30);

impl RateLimitedReporter {
    pub fn new(bytes_total: Option<u64>, now: Instant) -> Self {
        RateLimitedReporter {
            started_at: now,
            last_tick_at: now,
            last_percent: None,
            last_bytes_total: 0,
            bytes_total,
        }
    }

    /// Considers emitting a tick for `bytes_done` bytes processed as of
    /// `now`. Returns `Some(status)` when a tick should be emitted.
    pub fn observe(&mut self, bytes_done: u64, now: Instant) -> Option<ProcessStatus> {
        let should_tick = match self.bytes_total {
            Some(total) if total > 0 => {
                let percent = ((bytes_done as f64 / total as f64) * 100.0).floor() as u32;
                let advanced = self.last_percent.map(|p| percent > p).unwrap_or(true);
                if advanced {
                    self.last_percent = Some(percent);
                }
                advanced
            }
            _ => {
                let grew_enough =
                    bytes_done.saturating_sub(self.last_bytes_total) >= UNKNOWN_TOTAL_BYTE_STEP;
                let time_elapsed = now.saturating_duration_since(self.last_tick_at) >= UNKNOWN_TOTAL_TIME_STEP;
                grew_enough || time_elapsed
            }
        };

        if !should_tick {
            return None;
        }
        self.last_tick_at = now;
        self.last_bytes_total = bytes_done;

        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let throughput = if elapsed > 0.0 {
            bytes_done as f64 / elapsed
        } else {
            0.0
        };
        let percent = self
            .bytes_total
            .filter(|&t| t > 0)
            .map(|t| (bytes_done as f64 / t as f64) * 100.0);
        let eta = percent.map(|p| {
            if p <= 0.0 {
                0.0
            } else {
                (elapsed * 100.0 / p - elapsed).max(0.0)
            }
        });

        Some(ProcessStatus {
            bytes_done,
            bytes_total: self.bytes_total,
            percent,
            throughput_bytes_per_sec: throughput,
            eta_seconds: eta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_total_ticks_on_percent_advance() {
        let t0 = Instant::now();
        let mut reporter = RateLimitedReporter::new(Some(1000), t0);
        assert!(reporter.observe(0, t0).is_some());
        assert!(reporter.observe(5, t0).is_none());
        let tick = reporter.observe(50, t0).unwrap();
        assert_eq!(tick.percent, Some(5.0));
    }

    #[test]
    fn unknown_total_ticks_after_byte_step() {
        let t0 = Instant::now();
        let mut reporter = RateLimitedReporter::new(None, t0);
        assert!(reporter.observe(0, t0).is_some());
        assert!(reporter.observe(1024, t0).is_none());
        let tick = reporter
            .observe(UNKNOWN_TOTAL_BYTE_STEP + 1, t0)
            .unwrap();
        assert_eq!(tick.bytes_done, UNKNOWN_TOTAL_BYTE_STEP + 1);
    }

    #[test]
    fn unknown_total_ticks_after_time_step() {
        let t0 = Instant::now();
        let mut reporter = RateLimitedReporter::new(None, t0);
        reporter.observe(0, t0);
        let later = t0 + Duration::from_secs(31);
        assert!(reporter.observe(1, later).is_some());
    }

    #[test]
    fn eta_is_clamped_nonnegative() {
        let t0 = Instant::now();
        let mut reporter = RateLimitedReporter::new(Some(100), t0);
        let later = t0 + Duration::from_secs(10);
        let tick = reporter.observe(99, later).unwrap();
        assert!(tick.eta_seconds.unwrap() >= 0.0);
    }
}
