use std::collections::VecDeque;
use std::time::Duration;

use log::debug;

use crate::math::angles::{interpolate_deg, normalize_deg, time_fraction, wrap_deg};
use crate::math::stats::{ErrorStats, StatsHelper};
use crate::prelude::Heartbeat;
use crate::processing::xml::XmlBuilder;
use crate::protocol::{AntennaAngles, Packet, PacketInfo, PulseHeader};
use crate::telemetry::RateLimitedLog;
use crate::transport::{MessagePart, MessageParts, MessageQueue};

/// Telemetry pulls attempted for one pulse before giving up.
pub const MAX_ANGLE_PULLS: usize = 1000;

/// Errors above this (deg) are tallied as notable.
pub const NOTABLE_ANGLE_ERROR: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngleSample {
    pub time_secs: i64,
    pub time_nanos: i32,
    pub elevation: f64,
    pub azimuth: f64,
}

impl AngleSample {
    pub fn new(time: f64, elevation: f64, azimuth: f64) -> Self {
        let mut info = PacketInfo::default();
        info.set_time(time);
        Self {
            time_secs: info.time_secs_utc,
            time_nanos: info.time_nano_secs,
            elevation,
            azimuth,
        }
    }

    pub fn time_since(&self, base_secs: i64) -> f64 {
        self.time_secs.saturating_sub(base_secs) as f64 + self.time_nanos as f64 / 1.0e9
    }
}

impl From<&AntennaAngles> for AngleSample {
    fn from(angles: &AntennaAngles) -> Self {
        Self {
            time_secs: angles.info.time_secs_utc,
            time_nanos: angles.info.time_nano_secs,
            elevation: angles.elevation as f64,
            azimuth: angles.azimuth as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AngleLookup {
    /// Pulse precedes the interpolation window.
    Previous(AngleSample),
    Interpolated { elevation: f64, azimuth: f64 },
    /// Window could not be advanced far enough; best available sample.
    Latest(AngleSample),
    Unavailable,
}

pub struct AngleReader {
    queue: Box<dyn MessageQueue>,
    pending: VecDeque<MessagePart>,
    timeout: Duration,
    prev: Option<AngleSample>,
    latest: Option<AngleSample>,
    log: RateLimitedLog,
}

impl AngleReader {
    pub fn new(queue: Box<dyn MessageQueue>, timeout: Duration) -> Self {
        Self {
            queue,
            pending: VecDeque::new(),
            timeout,
            prev: None,
            latest: None,
            log: RateLimitedLog::default(),
        }
    }

    pub fn prev(&self) -> Option<AngleSample> {
        self.prev
    }

    pub fn latest(&self) -> Option<AngleSample> {
        self.latest
    }

    /// Advances the window by one sample. False when nothing usable arrived.
    pub fn pull(&mut self, heartbeat: &mut dyn Heartbeat) -> bool {
        if self.pending.is_empty() {
            heartbeat.beat("reading antenna angles");
            let message = match self.queue.read_blocking(self.timeout) {
                Ok(Some(message)) => message,
                Ok(None) => return false,
                Err(err) => {
                    self.log.warn("angle queue", &format!("cannot read angle queue: {}", err));
                    return false;
                }
            };
            match MessageParts::disassemble(&message.bytes) {
                Ok(parts) => self.pending.extend(parts.into_parts()),
                Err(err) => {
                    self.log.warn("angle message", &format!("bad angle message: {}", err));
                    return false;
                }
            }
        }
        let Some(part) = self.pending.pop_front() else {
            return false;
        };
        let angles = Packet::from_bytes(part.bytes)
            .map_err(|err| err.to_string())
            .and_then(|packet| AntennaAngles::decode(&packet).map_err(|err| err.to_string()));
        match angles {
            Ok(angles) => {
                self.prev = self.latest.take();
                self.latest = Some(AngleSample::from(&angles));
                true
            }
            Err(err) => {
                self.log.warn(
                    "angle message",
                    &format!("bad angle message part, type 0x{:x}: {}", part.part_type, err),
                );
                false
            }
        }
    }

    /// Finds the telemetry position at the time given by `info`.
    ///
    /// The second value is true when the pull budget ran out.
    pub fn lookup(&mut self, info: &PacketInfo, heartbeat: &mut dyn Heartbeat) -> (AngleLookup, bool) {
        let base = info.time_secs_utc;
        let t = info.time_since(base);

        if let Some(prev) = self.prev {
            if t < prev.time_since(base) {
                return (AngleLookup::Previous(prev), false);
            }
        }

        for _ in 0..MAX_ANGLE_PULLS {
            match (self.prev, self.latest) {
                (Some(prev), Some(latest)) if t <= latest.time_since(base) => {
                    let fraction =
                        time_fraction(t, prev.time_since(base), latest.time_since(base));
                    return (
                        AngleLookup::Interpolated {
                            elevation: interpolate_deg(prev.elevation, latest.elevation, fraction),
                            azimuth: interpolate_deg(prev.azimuth, latest.azimuth, fraction),
                        },
                        false,
                    );
                }
                (None, Some(latest)) if t <= latest.time_since(base) => {
                    return (AngleLookup::Latest(latest), false);
                }
                _ => {}
            }
            if !self.pull(heartbeat) {
                return (self.best_available(), false);
            }
        }
        (self.best_available(), true)
    }

    fn best_available(&self) -> AngleLookup {
        self.latest.map_or(AngleLookup::Unavailable, AngleLookup::Latest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleErrorSummary {
    pub time: f64,
    pub azimuth: ErrorStats,
    pub elevation: ErrorStats,
}

impl AngleErrorSummary {
    pub fn to_xml(&self, tag: &str) -> String {
        XmlBuilder::new(tag)
            .float("Time", self.time, 3)
            .float("AzErrorMax", self.azimuth.max_abs, 5)
            .float("ElErrorMax", self.elevation.max_abs, 5)
            .float("AzErrorMean", self.azimuth.mean, 5)
            .float("ElErrorMean", self.elevation.mean, 5)
            .float("AzErrorSdev", self.azimuth.sdev, 5)
            .float("ElErrorSdev", self.elevation.sdev, 5)
            .finish()
    }
}

/// Bounded window of (azimuth, elevation) errors, summarised when full.
pub struct AngleErrorAccumulator {
    window: usize,
    azimuth: Vec<f64>,
    elevation: Vec<f64>,
    latest: Option<AngleErrorSummary>,
}

impl AngleErrorAccumulator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            azimuth: Vec::with_capacity(window),
            elevation: Vec::with_capacity(window),
            latest: None,
        }
    }

    pub fn len(&self) -> usize {
        self.azimuth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.azimuth.is_empty()
    }

    /// Adds one error pair; returns the new summary when the window fills.
    pub fn push(&mut self, error_el: f64, error_az: f64, now: f64) -> Option<AngleErrorSummary> {
        self.azimuth.push(error_az);
        self.elevation.push(error_el);
        if self.azimuth.len() < self.window {
            return None;
        }
        let summary = AngleErrorSummary {
            time: now,
            azimuth: StatsHelper::censored(&self.azimuth),
            elevation: StatsHelper::censored(&self.elevation),
        };
        self.azimuth.clear();
        self.elevation.clear();
        self.latest = Some(summary);
        Some(summary)
    }

    pub fn latest(&self) -> Option<&AngleErrorSummary> {
        self.latest.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleCheck {
    pub error_el: f64,
    pub error_az: f64,
    pub corrected_el: bool,
    pub corrected_az: bool,
    /// Set when this pulse completed an error statistics window.
    pub summary: Option<AngleErrorSummary>,
}

impl AngleCheck {
    pub fn is_notable(&self) -> bool {
        self.error_el.abs() > NOTABLE_ANGLE_ERROR || self.error_az.abs() > NOTABLE_ANGLE_ERROR
    }
}

pub struct AngleMerger {
    reader: AngleReader,
    errors: AngleErrorAccumulator,
    starved: bool,
    log: RateLimitedLog,
}

impl AngleMerger {
    pub fn new(reader: AngleReader, stats_window: usize) -> Self {
        Self {
            reader,
            errors: AngleErrorAccumulator::new(stats_window),
            starved: false,
            log: RateLimitedLog::default(),
        }
    }

    /// True once after a lookup that ran out of telemetry pulls.
    pub fn take_starved(&mut self) -> bool {
        std::mem::take(&mut self.starved)
    }

    fn lookup(&mut self, info: &PacketInfo, heartbeat: &mut dyn Heartbeat) -> AngleLookup {
        let (lookup, starved) = self.reader.lookup(info, heartbeat);
        if starved {
            self.starved = true;
            self.log
                .warn("angle telemetry", "no telemetry angle caught up with the pulse time");
        }
        lookup
    }

    pub fn errors(&self) -> &AngleErrorAccumulator {
        &self.errors
    }

    /// Overwrites the pulse angles with the telemetry position.
    /// Returns false if the pulse was left unchanged.
    pub fn merge(
        &mut self,
        header: &mut PulseHeader,
        info: &PacketInfo,
        heartbeat: &mut dyn Heartbeat,
    ) -> bool {
        let (elevation, azimuth) = match self.lookup(info, heartbeat) {
            AngleLookup::Previous(sample) | AngleLookup::Latest(sample) => {
                (sample.elevation, sample.azimuth)
            }
            AngleLookup::Interpolated { elevation, azimuth } => (elevation, azimuth),
            AngleLookup::Unavailable => return false,
        };
        header.elevation = wrap_deg(elevation) as f32;
        header.azimuth = wrap_deg(azimuth) as f32;
        true
    }

    /// Measures the pulse angles against telemetry, optionally correcting
    /// angles whose error exceeds `correction_threshold`.
    pub fn check(
        &mut self,
        header: &mut PulseHeader,
        info: &PacketInfo,
        correction_threshold: Option<f64>,
        now: f64,
        heartbeat: &mut dyn Heartbeat,
    ) -> Option<AngleCheck> {
        let AngleLookup::Interpolated { elevation, azimuth } = self.lookup(info, heartbeat) else {
            return None;
        };

        let error_el = wrap_deg(header.elevation as f64 - elevation);
        let error_az = wrap_deg(header.azimuth as f64 - azimuth);
        let summary = self.errors.push(error_el, error_az, now);
        if let Some(summary) = &summary {
            debug!(
                "angle errors: az mean {:.4} sdev {:.4}, el mean {:.4} sdev {:.4}",
                summary.azimuth.mean, summary.azimuth.sdev, summary.elevation.mean, summary.elevation.sdev
            );
        }

        let mut check = AngleCheck {
            error_el,
            error_az,
            corrected_el: false,
            corrected_az: false,
            summary,
        };
        if let Some(threshold) = correction_threshold {
            if error_el.abs() > threshold {
                debug!("fixing elevation {:.4} -> {:.4}", header.elevation, elevation);
                header.elevation = elevation as f32;
                check.corrected_el = true;
            }
            if error_az.abs() > threshold {
                let azimuth = normalize_deg(azimuth);
                debug!("fixing azimuth {:.4} -> {:.4}", header.azimuth, azimuth);
                header.azimuth = azimuth as f32;
                check.corrected_az = true;
            }
        }
        if check.is_notable() {
            debug!(
                "angle error el {:.3} az {:.3} at {:.3}",
                error_el,
                error_az,
                info.time()
            );
        }
        Some(check)
    }
}
