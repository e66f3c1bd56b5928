use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::{FrameError, ParseError};
use crate::transport::QueueError;

/// Engine configuration. Every field has a default so partial YAML works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub n_pulses_per_message: usize,

    pub merge_antenna_angles: bool,
    pub check_angles: bool,
    pub correct_angles_using_telemetry: bool,
    /// Degrees.
    pub angle_error_correction_threshold: f64,
    pub n_samples_for_angle_error_stats: usize,
    pub angle_read_timeout_ms: u64,

    pub merge_scan_control: bool,
    pub merge_xmit_power_from_scan_control: bool,
    pub sync_scan_control_with_pulses: bool,

    pub delay_sweep_num_change_in_sector_scan: bool,
    /// Azimuth movement (deg) that counts as "moved" when a sweep change starts.
    pub sweep_change_az_tolerance: f64,
    pub zero_sweep_number_at_start_of_vol: bool,

    pub monitor_test_pulse: bool,
    pub test_pulse_range_km: f64,
    pub test_pulse_n_samples: usize,
    pub dual_pol_alternating_mode: bool,
    pub dual_pol_switching_receivers: bool,

    pub augment_status_xml: bool,
    pub status_xml_max_age_secs: f64,
    pub status_xml_interval_secs: f64,
    pub merge_secondary_status: bool,
    pub xmit_power_xml_tag: String,
    pub test_pulse_xml_tag: String,
    pub angle_errors_xml_tag: String,

    pub pulse_time_adjustment_secs: f64,
    pub apply_iq_scale: bool,
    pub iq_scale: f64,
    pub iq_bias: f64,

    pub calibration_override_path: Option<PathBuf>,

    pub write_end_of_vol_when_data_stops: bool,
    pub n_timeouts_for_end_of_vol: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            n_pulses_per_message: 100,
            merge_antenna_angles: false,
            check_angles: false,
            correct_angles_using_telemetry: false,
            angle_error_correction_threshold: 0.1,
            n_samples_for_angle_error_stats: 1000,
            angle_read_timeout_ms: 10,
            merge_scan_control: false,
            merge_xmit_power_from_scan_control: true,
            sync_scan_control_with_pulses: false,
            delay_sweep_num_change_in_sector_scan: false,
            sweep_change_az_tolerance: 0.0,
            zero_sweep_number_at_start_of_vol: false,
            monitor_test_pulse: false,
            test_pulse_range_km: 0.0,
            test_pulse_n_samples: 5000,
            dual_pol_alternating_mode: false,
            dual_pol_switching_receivers: false,
            augment_status_xml: false,
            status_xml_max_age_secs: 60.0,
            status_xml_interval_secs: 10.0,
            merge_secondary_status: false,
            xmit_power_xml_tag: "XmitPower".to_string(),
            test_pulse_xml_tag: "TestPulse".to_string(),
            angle_errors_xml_tag: "AngleErrors".to_string(),
            pulse_time_adjustment_secs: 0.0,
            apply_iq_scale: false,
            iq_scale: 1.0,
            iq_bias: 0.0,
            calibration_override_path: None,
            write_end_of_vol_when_data_stops: false,
            n_timeouts_for_end_of_vol: 5,
        }
    }
}

impl RelayConfig {
    pub fn reads_angles(&self) -> bool {
        self.merge_antenna_angles || self.check_angles
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("decode error: {0}")]
    Parse(#[from] ParseError),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Liveness callback invoked around blocking reads.
pub trait Heartbeat {
    fn beat(&mut self, label: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHeartbeat;

impl Heartbeat for NoopHeartbeat {
    fn beat(&mut self, _label: &str) {}
}

impl<F: FnMut(&str)> Heartbeat for F {
    fn beat(&mut self, label: &str) {
        self(label)
    }
}

/// Wall clock used for lateness measurements and throttling sleeps.
pub trait Clock {
    /// Seconds since the epoch.
    fn now(&self) -> f64;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock under test control. Sleeping advances the clock and is recorded.
/// Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
    slept: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
            slept: Rc::new(Cell::new(0.0)),
        }
    }

    pub fn set(&self, now: f64) {
        self.now.set(now);
    }

    pub fn advance(&self, secs: f64) {
        self.now.set(self.now.get() + secs);
    }

    pub fn total_slept(&self) -> f64 {
        self.slept.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        self.slept.set(self.slept.get() + secs);
        self.advance(secs);
    }
}

const PAUSE_STEP: Duration = Duration::from_millis(100);

/// Sleeps for `total` in short steps, beating between them. Returns early,
/// with false, once `shutdown` is raised.
pub fn pause(
    clock: &dyn Clock,
    total: Duration,
    shutdown: &AtomicBool,
    heartbeat: &mut dyn Heartbeat,
) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        heartbeat.beat("waiting");
        let step = remaining.min(PAUSE_STEP);
        clock.sleep(step);
        remaining -= step;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_sleeps_in_steps() {
        let clock = ManualClock::new(0.0);
        let mut beats = 0;
        let done = pause(
            &clock,
            Duration::from_millis(250),
            &AtomicBool::new(false),
            &mut |_: &str| beats += 1,
        );
        assert!(done);
        assert_eq!(beats, 3);
        assert!((clock.total_slept() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn pause_stops_on_shutdown() {
        let clock = ManualClock::new(0.0);
        let done = pause(&clock, Duration::from_secs(30), &AtomicBool::new(true), &mut NoopHeartbeat);
        assert!(!done);
        assert_eq!(clock.total_slept(), 0.0);
    }
}
