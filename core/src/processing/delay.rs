use std::time::Duration;

use crate::prelude::Clock;

pub const DELAY_ALPHA: f64 = 0.1;

/// Pulses are held back this much longer than the measured gap.
pub const DELAY_OVERSHOOT: f64 = 1.5;

/// Longest single sleep, so a controller with a broken clock cannot stall
/// the relay.
pub const MAX_READ_DELAY: Duration = Duration::from_secs(10);

/// Tracks how far behind wall-clock time the scan-control metadata runs.
#[derive(Debug, Default, Clone)]
pub struct ReadDelayController {
    metadata_late_secs: Option<f64>,
}

impl ReadDelayController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate(&self) -> Option<f64> {
        self.metadata_late_secs
    }

    pub fn record_metadata_arrival(&mut self, packet_time: f64, now: f64) {
        let late = now - packet_time;
        self.metadata_late_secs = Some(match self.metadata_late_secs {
            None => late,
            Some(estimate) => DELAY_ALPHA * late + (1.0 - DELAY_ALPHA) * estimate,
        });
    }

    pub fn delay_for(&self, pulse_time: f64, now: f64) -> Option<Duration> {
        let estimate = self.metadata_late_secs?;
        let pulse_late = now - pulse_time;
        if pulse_late >= estimate {
            return None;
        }
        let secs = (estimate - pulse_late) * DELAY_OVERSHOOT;
        if !secs.is_finite() {
            return None;
        }
        Some(Duration::from_secs_f64(secs.min(MAX_READ_DELAY.as_secs_f64())))
    }

    /// Sleeps on `clock` as required for the pulse. Returns the time slept.
    pub fn maybe_delay(&self, pulse_time: f64, clock: &dyn Clock) -> Option<Duration> {
        let wait = self.delay_for(pulse_time, clock.now())?;
        clock.sleep(wait);
        Some(wait)
    }
}
