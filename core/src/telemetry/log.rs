use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{info, warn, Level};

pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Throttles steady-state anomaly logging to one line per kind per interval,
/// reporting how many repeats were swallowed in between.
pub struct RateLimitedLog {
    interval: Duration,
    entries: HashMap<&'static str, Entry>,
}

#[derive(Default)]
struct Entry {
    last: Option<Instant>,
    suppressed: usize,
}

impl RateLimitedLog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: HashMap::new(),
        }
    }

    pub fn warn(&mut self, kind: &'static str, message: &str) {
        self.emit(Level::Warn, kind, message, Instant::now());
    }

    pub fn info(&mut self, kind: &'static str, message: &str) {
        self.emit(Level::Info, kind, message, Instant::now());
    }

    fn emit(&mut self, level: Level, kind: &'static str, message: &str, now: Instant) {
        let Some(suppressed) = self.admit(kind, now) else {
            return;
        };
        let line = if suppressed > 0 {
            format!("{} ({} similar suppressed)", message, suppressed)
        } else {
            message.to_string()
        };
        match level {
            Level::Warn | Level::Error => warn!("{}: {}", kind, line),
            _ => info!("{}: {}", kind, line),
        }
    }

    /// Repeats of `kind` swallowed since its last written line.
    pub fn suppressed(&self, kind: &str) -> usize {
        self.entries.get(kind).map_or(0, |entry| entry.suppressed)
    }

    fn admit(&mut self, kind: &'static str, now: Instant) -> Option<usize> {
        let entry = self.entries.entry(kind).or_default();
        match entry.last {
            Some(last) if now.duration_since(last) < self.interval => {
                entry.suppressed += 1;
                None
            }
            _ => {
                entry.last = Some(now);
                Some(std::mem::take(&mut entry.suppressed))
            }
        }
    }
}

impl Default for RateLimitedLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_inside_interval_are_counted_not_logged() {
        let mut log = RateLimitedLog::new(Duration::from_secs(10));
        let start = Instant::now();
        assert_eq!(log.admit("timeout", start), Some(0));
        assert_eq!(log.admit("timeout", start + Duration::from_secs(1)), None);
        assert_eq!(log.admit("timeout", start + Duration::from_secs(2)), None);
        // other kinds are independent
        assert_eq!(log.admit("drift", start + Duration::from_secs(2)), Some(0));
        assert_eq!(log.admit("timeout", start + Duration::from_secs(11)), Some(2));
        assert_eq!(log.admit("timeout", start + Duration::from_secs(12)), None);
    }
}
