use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayStats {
    pub packets_in: u64,
    pub pulses: u64,
    pub packets_out: u64,
    pub unknown_packets: u64,
    pub bad_packets: u64,
    pub timeouts: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub delay_sleeps: u64,
    pub delay_secs: f64,
    pub angle_corrections: u64,
    pub angle_starvations: u64,
    pub end_of_volumes: u64,
    pub scan_control_packets: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    PacketIn,
    Pulse,
    UnknownPacket,
    BadPacket,
    Timeout,
    FlushFailure,
    AngleCorrection,
    AngleStarvation,
    EndOfVolume,
    ScanControlPacket,
}

pub struct MetricsRecorder {
    inner: Mutex<RelayStats>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RelayStats::default()),
        }
    }

    pub fn increment(&self, counter: Counter) {
        if let Ok(mut stats) = self.inner.lock() {
            let slot = match counter {
                Counter::PacketIn => &mut stats.packets_in,
                Counter::Pulse => &mut stats.pulses,
                Counter::UnknownPacket => &mut stats.unknown_packets,
                Counter::BadPacket => &mut stats.bad_packets,
                Counter::Timeout => &mut stats.timeouts,
                Counter::FlushFailure => &mut stats.flush_failures,
                Counter::AngleCorrection => &mut stats.angle_corrections,
                Counter::AngleStarvation => &mut stats.angle_starvations,
                Counter::EndOfVolume => &mut stats.end_of_volumes,
                Counter::ScanControlPacket => &mut stats.scan_control_packets,
            };
            *slot += 1;
        }
    }

    pub fn record_flush(&self, n_packets: usize) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.flushes += 1;
            stats.packets_out += n_packets as u64;
        }
    }

    pub fn record_delay(&self, secs: f64) {
        if let Ok(mut stats) = self.inner.lock() {
            stats.delay_sleeps += 1;
            stats.delay_secs += secs;
        }
    }

    pub fn snapshot(&self) -> RelayStats {
        self.inner
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
