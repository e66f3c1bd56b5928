use log::debug;

use crate::math::angles::diff_deg;
use crate::prelude::RelayConfig;
use crate::protocol::{PulseHeader, ScanMode};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepState {
    Stable,
    /// Raw sweep number has changed; the old one is held until the antenna
    /// reverses against `direction` (+1 clockwise, -1 counter-clockwise).
    TransitionPending { direction: f64 },
}

#[derive(Debug, Clone, Copy)]
struct Reference {
    sweep_num: i32,
    azimuth: f64,
}

/// Holds back sweep-number changes in sector scans until the antenna turns
/// around, and optionally counts sweeps from zero in every volume.
pub struct SweepStabilizer {
    delay_in_sector: bool,
    az_tolerance: f64,
    zero_at_volume_start: bool,
    reference: Option<Reference>,
    state: SweepState,
    volume_num: Option<i32>,
    volume_start_sweep: i32,
    last_sweep_num: i32,
}

impl SweepStabilizer {
    pub fn new(delay_in_sector: bool, az_tolerance: f64, zero_at_volume_start: bool) -> Self {
        Self {
            delay_in_sector,
            az_tolerance: az_tolerance.abs(),
            zero_at_volume_start,
            reference: None,
            state: SweepState::Stable,
            volume_num: None,
            volume_start_sweep: 0,
            last_sweep_num: 0,
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.delay_sweep_num_change_in_sector_scan,
            config.sweep_change_az_tolerance,
            config.zero_sweep_number_at_start_of_vol,
        )
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn current(&self) -> (i32, i32) {
        (self.volume_num.unwrap_or(0), self.last_sweep_num)
    }

    pub fn apply(&mut self, header: &mut PulseHeader) {
        self.last_sweep_num = header.sweep_num;
        if self.volume_num != Some(header.volume_num) {
            self.volume_num = Some(header.volume_num);
            self.volume_start_sweep = header.sweep_num;
        }
        if self.zero_at_volume_start {
            header.sweep_num -= self.volume_start_sweep;
        }
        if self.delay_in_sector && header.scan_mode == ScanMode::Sector {
            header.sweep_num = self.stabilize(header.sweep_num, header.azimuth as f64);
        }
    }

    fn stabilize(&mut self, sweep_num: i32, azimuth: f64) -> i32 {
        if self.reference.is_none() {
            self.reference = Some(Reference { sweep_num, azimuth });
            return sweep_num;
        }
        let Some(reference) = self.reference.as_mut() else {
            return sweep_num;
        };

        if sweep_num == reference.sweep_num {
            self.state = SweepState::Stable;
            reference.azimuth = azimuth;
            return sweep_num;
        }

        let delta = diff_deg(reference.azimuth, azimuth);
        if delta.abs() <= self.az_tolerance {
            // wait for the antenna to move measurably
            return reference.sweep_num;
        }
        reference.azimuth = azimuth;

        match self.state {
            SweepState::Stable => {
                let direction = if delta >= 0.0 { 1.0 } else { -1.0 };
                debug!(
                    "sweep number {} -> {} at az {:.2}, holding until turnaround",
                    reference.sweep_num, sweep_num, azimuth
                );
                self.state = SweepState::TransitionPending { direction };
                reference.sweep_num
            }
            SweepState::TransitionPending { direction } if delta * direction < 0.0 => {
                debug!("antenna turned at az {:.2}, adopting sweep {}", azimuth, sweep_num);
                self.state = SweepState::Stable;
                reference.sweep_num = sweep_num;
                sweep_num
            }
            SweepState::TransitionPending { .. } => reference.sweep_num,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_pulse(sweep_num: i32, azimuth: f32) -> PulseHeader {
        PulseHeader {
            scan_mode: ScanMode::Sector,
            sweep_num,
            azimuth,
            volume_num: 1,
            ..Default::default()
        }
    }

    #[test]
    fn sector_sweep_change_waits_for_reversal() {
        let mut stabilizer = SweepStabilizer::new(true, 0.0, false);
        // sweep 0 scans clockwise; the controller bumps the number to 1 at
        // pulse 10 while the antenna is still running clockwise; the antenna
        // turns at pulse 15
        let mut raw = Vec::new();
        for i in 0..15 {
            raw.push((if i < 10 { 0 } else { 1 }, 10.0 + i as f32));
        }
        for i in 0..10 {
            raw.push((1, 23.0 - i as f32));
        }

        let emitted: Vec<i32> = raw
            .iter()
            .map(|&(sweep, az)| {
                let mut header = sector_pulse(sweep, az);
                stabilizer.apply(&mut header);
                header.sweep_num
            })
            .collect();

        let changes: Vec<usize> = (1..emitted.len())
            .filter(|&i| emitted[i] != emitted[i - 1])
            .collect();
        assert_eq!(changes, vec![15]);
        assert_eq!(emitted[14], 0);
        assert_eq!(emitted[15], 1);
        assert_eq!(stabilizer.state(), SweepState::Stable);
    }

    #[test]
    fn other_scan_modes_pass_through() {
        let mut stabilizer = SweepStabilizer::new(true, 0.0, false);
        for (sweep, az) in [(0, 1.0), (1, 2.0), (2, 3.0)] {
            let mut header = sector_pulse(sweep, az);
            header.scan_mode = ScanMode::AzSur360;
            stabilizer.apply(&mut header);
            assert_eq!(header.sweep_num, sweep);
        }
    }

    #[test]
    fn stationary_antenna_holds_old_sweep() {
        let mut stabilizer = SweepStabilizer::new(true, 0.5, false);
        let mut first = sector_pulse(3, 40.0);
        stabilizer.apply(&mut first);
        let mut jitter = sector_pulse(4, 40.2);
        stabilizer.apply(&mut jitter);
        assert_eq!(jitter.sweep_num, 3);
        assert_eq!(stabilizer.state(), SweepState::Stable);
    }

    #[test]
    fn sweep_numbers_rebase_per_volume() {
        let mut stabilizer = SweepStabilizer::new(false, 0.0, true);
        let mut emitted = Vec::new();
        for (volume, sweep) in [(5, 12), (5, 13), (6, 14), (6, 15)] {
            let mut header = sector_pulse(sweep, 0.0);
            header.volume_num = volume;
            stabilizer.apply(&mut header);
            emitted.push(header.sweep_num);
        }
        assert_eq!(emitted, vec![0, 1, 0, 1]);
        assert_eq!(stabilizer.current(), (6, 15));
    }

    #[test]
    fn rebased_sweep_change_still_waits_for_reversal() {
        let mut stabilizer = SweepStabilizer::new(true, 0.0, true);
        // volume 2 starts at raw sweep 20; the controller moves to 21 at
        // pulse 5 while the antenna keeps turning clockwise until pulse 8
        let mut raw = Vec::new();
        for i in 0..8 {
            raw.push((if i < 5 { 20 } else { 21 }, 40.0 + i as f32));
        }
        for i in 0..4 {
            raw.push((21, 46.0 - i as f32));
        }

        let emitted: Vec<i32> = raw
            .iter()
            .map(|&(sweep, az)| {
                let mut header = sector_pulse(sweep, az);
                header.volume_num = 2;
                stabilizer.apply(&mut header);
                header.sweep_num
            })
            .collect();
        assert_eq!(emitted, vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(stabilizer.current(), (2, 21));
    }
}
