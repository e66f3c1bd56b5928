use log::debug;

use crate::protocol::payload::MISSING_ANGLE;
use crate::protocol::{EventNotice, PacketInfo, PulseHeader, RadarInfo, ScanSegment, TsProcessing, XmitPower};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Stream,
    Controller,
}

/// Latest metadata of every kind, one slot per origin. A filled controller
/// slot takes precedence.
#[derive(Debug, Default, Clone)]
pub struct ScanState {
    stream_radar_info: Option<RadarInfo>,
    controller_radar_info: Option<RadarInfo>,
    stream_scan_segment: Option<ScanSegment>,
    controller_scan_segment: Option<ScanSegment>,
    stream_ts_processing: Option<TsProcessing>,
    controller_ts_processing: Option<TsProcessing>,
    stream_xmit_power: Option<XmitPower>,
    controller_xmit_power: Option<XmitPower>,
    start_of_sweep: Option<EventNotice>,
    start_of_sweep_prev: Option<EventNotice>,
    end_of_sweep: Option<EventNotice>,
    end_of_sweep_prev: Option<EventNotice>,
    start_of_volume: Option<EventNotice>,
    end_of_volume: Option<EventNotice>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepBracket {
    pub event: EventNotice,
    pub transition: bool,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_radar_info(&mut self, origin: Origin, info: RadarInfo) {
        match origin {
            Origin::Stream => self.stream_radar_info = Some(info),
            Origin::Controller => self.controller_radar_info = Some(info),
        }
    }

    pub fn set_scan_segment(&mut self, origin: Origin, segment: ScanSegment) {
        match origin {
            Origin::Stream => self.stream_scan_segment = Some(segment),
            Origin::Controller => self.controller_scan_segment = Some(segment),
        }
    }

    pub fn set_ts_processing(&mut self, origin: Origin, proc: TsProcessing) {
        match origin {
            Origin::Stream => self.stream_ts_processing = Some(proc),
            Origin::Controller => self.controller_ts_processing = Some(proc),
        }
    }

    pub fn set_xmit_power(&mut self, origin: Origin, power: XmitPower) {
        match origin {
            Origin::Stream => self.stream_xmit_power = Some(power),
            Origin::Controller => self.controller_xmit_power = Some(power),
        }
    }

    /// Controller radar info, keeping the stream's wavelength and site name.
    pub fn radar_info(&self) -> Option<RadarInfo> {
        match (&self.controller_radar_info, &self.stream_radar_info) {
            (Some(controller), Some(stream)) => Some(RadarInfo {
                wavelength_cm: stream.wavelength_cm,
                site_name: stream.site_name.clone(),
                ..controller.clone()
            }),
            (Some(controller), None) => Some(controller.clone()),
            (None, stream) => stream.clone(),
        }
    }

    pub fn scan_segment(&self) -> Option<ScanSegment> {
        self.controller_scan_segment
            .clone()
            .or_else(|| self.stream_scan_segment.clone())
    }

    /// Controller processing values, keeping the stream's transmit phase
    /// mode, pulse width, range geometry and polarization mode.
    pub fn ts_processing(&self) -> Option<TsProcessing> {
        match (&self.controller_ts_processing, &self.stream_ts_processing) {
            (Some(controller), Some(stream)) => Some(TsProcessing {
                xmit_phase_mode: stream.xmit_phase_mode,
                pulse_width_us: stream.pulse_width_us,
                start_range_m: stream.start_range_m,
                gate_spacing_m: stream.gate_spacing_m,
                pol_mode: stream.pol_mode,
                ..controller.clone()
            }),
            (Some(controller), None) => Some(controller.clone()),
            (None, stream) => stream.clone(),
        }
    }

    pub fn xmit_power(&self) -> Option<XmitPower> {
        self.controller_xmit_power
            .clone()
            .or_else(|| self.stream_xmit_power.clone())
    }

    pub fn wavelength_m(&self) -> Option<f64> {
        self.radar_info()
            .map(|info| info.wavelength_cm as f64 / 100.0)
            .filter(|wavelength| *wavelength > 0.0)
    }

    /// Records a controller event notice. A notice may carry several flags.
    pub fn apply_event(&mut self, event: EventNotice) {
        if event.start_of_sweep {
            self.start_of_sweep_prev = self.start_of_sweep.replace(event);
        }
        if event.end_of_sweep {
            self.end_of_sweep_prev = self.end_of_sweep.replace(event);
        }
        if event.start_of_volume {
            self.start_of_volume = Some(event);
        }
        if event.end_of_volume {
            self.end_of_volume = Some(event);
        }
    }

    pub fn end_of_volume(&self) -> Option<&EventNotice> {
        self.end_of_volume.as_ref()
    }

    pub fn start_of_volume(&self) -> Option<&EventNotice> {
        self.start_of_volume.as_ref()
    }

    pub fn end_of_sweep_prev(&self) -> Option<&EventNotice> {
        self.end_of_sweep_prev.as_ref()
    }

    /// Picks the sweep event governing a pulse at `pulse_time`. `None`
    /// until a start-of-sweep has been seen.
    pub fn bracket(&self, pulse_time: f64) -> Option<SweepBracket> {
        let start = self.start_of_sweep?;
        let start_time = start.info.time();
        let end = self.end_of_sweep;
        let end_time = end.map_or(f64::NEG_INFINITY, |event| event.info.time());
        let pick = |event: Option<EventNotice>, transition| SweepBracket {
            event: event.unwrap_or(start),
            transition,
        };

        let bracket = if start_time < end_time {
            // sweep ended; scan in transition
            if pulse_time < start_time {
                pick(Some(start), true)
            } else if pulse_time > end_time {
                pick(end, true)
            } else {
                pick(Some(start), false)
            }
        } else if pulse_time > end_time && pulse_time < start_time {
            let mean_time = (start_time + end_time) / 2.0;
            if pulse_time < mean_time {
                pick(end, true)
            } else {
                pick(Some(start), true)
            }
        } else if pulse_time < end_time {
            // pulse belongs to the previous sweep
            pick(self.start_of_sweep_prev, false)
        } else {
            pick(Some(start), false)
        };
        Some(bracket)
    }

    /// Overwrites the scan fields of a pulse from the bracketing controller
    /// event. Returns false when no start-of-sweep is known yet.
    pub fn apply_to_pulse(&self, header: &mut PulseHeader, info: &PacketInfo) -> bool {
        let Some(SweepBracket { event, transition }) = self.bracket(info.time()) else {
            return false;
        };
        header.volume_num = event.volume_num;
        header.sweep_num = event.sweep_num.max(0);
        header.scan_mode = event.scan_mode;
        if event.scan_mode.is_rhi() {
            header.fixed_az = event.current_fixed_angle;
            header.fixed_el = MISSING_ANGLE;
        } else {
            header.fixed_el = event.current_fixed_angle;
            header.fixed_az = MISSING_ANGLE;
        }
        if transition && !header.antenna_transition {
            debug!("pulse {} flagged in transition", header.pulse_seq_num);
        }
        header.antenna_transition = transition;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ScanMode;

    fn event(time: f64, start: bool, sweep_num: i32, fixed: f32) -> EventNotice {
        let mut info = PacketInfo::default();
        info.set_time(time);
        EventNotice {
            info,
            start_of_sweep: start,
            end_of_sweep: !start,
            scan_mode: ScanMode::Sector,
            volume_num: 2,
            sweep_num,
            current_fixed_angle: fixed,
            ..Default::default()
        }
    }

    fn info_at(time: f64) -> PacketInfo {
        let mut info = PacketInfo::default();
        info.set_time(time);
        info
    }

    #[test]
    fn nothing_applies_before_first_start_of_sweep() {
        let mut state = ScanState::new();
        state.apply_event(event(10.0, false, 1, 0.5));
        let mut header = PulseHeader::default();
        assert!(!state.apply_to_pulse(&mut header, &info_at(11.0)));
        assert_eq!(header, PulseHeader::default());
    }

    #[test]
    fn gap_between_end_and_next_start_is_transition() {
        let mut state = ScanState::new();
        state.apply_event(event(0.0, true, 1, 0.5));
        state.apply_event(event(10.0, false, 1, 0.5));
        state.apply_event(event(12.0, true, 2, 1.5));

        let mut header = PulseHeader::default();
        assert!(state.apply_to_pulse(&mut header, &info_at(10.5)));
        assert!(header.antenna_transition);
        // nearer to the end event
        assert_eq!(header.sweep_num, 1);

        state.apply_to_pulse(&mut header, &info_at(11.8));
        assert!(header.antenna_transition);
        assert_eq!(header.sweep_num, 2);
        assert_eq!(header.fixed_el, 1.5);
        assert_eq!(header.fixed_az, MISSING_ANGLE);

        state.apply_to_pulse(&mut header, &info_at(13.0));
        assert!(!header.antenna_transition);
        assert_eq!(header.sweep_num, 2);

        // late pulse from before the end belongs to the previous sweep
        state.apply_to_pulse(&mut header, &info_at(9.0));
        assert!(!header.antenna_transition);
        assert_eq!(header.sweep_num, 1);
    }

    #[test]
    fn pulses_after_end_of_sweep_use_end_event() {
        let mut state = ScanState::new();
        state.apply_event(event(0.0, true, 4, 2.0));
        state.apply_event(event(5.0, false, 4, 2.0));
        let bracket = state.bracket(6.0).unwrap();
        assert!(bracket.transition);
        assert!(bracket.event.end_of_sweep);
        let bracket = state.bracket(3.0).unwrap();
        assert!(!bracket.transition);
        assert!(bracket.event.start_of_sweep);
    }

    #[test]
    fn rhi_fixed_angle_is_azimuth_and_sweep_clamped() {
        let mut state = ScanState::new();
        let mut start = event(0.0, true, -3, 45.0);
        start.scan_mode = ScanMode::Rhi;
        state.apply_event(start);
        let mut header = PulseHeader::default();
        state.apply_to_pulse(&mut header, &info_at(1.0));
        assert_eq!(header.fixed_az, 45.0);
        assert_eq!(header.fixed_el, MISSING_ANGLE);
        assert_eq!(header.sweep_num, 0);
        assert_eq!(header.scan_mode, ScanMode::Rhi);
    }

    #[test]
    fn controller_values_take_precedence_with_stream_fields_kept() {
        let mut state = ScanState::new();
        state.set_radar_info(
            Origin::Stream,
            RadarInfo {
                wavelength_cm: 10.7,
                site_name: "Marshall".into(),
                radar_name: "stream".into(),
                ..Default::default()
            },
        );
        assert_eq!(state.radar_info().unwrap().radar_name, "stream");
        state.set_radar_info(
            Origin::Controller,
            RadarInfo {
                wavelength_cm: 3.0,
                site_name: "elsewhere".into(),
                radar_name: "controller".into(),
                ..Default::default()
            },
        );
        let merged = state.radar_info().unwrap();
        assert_eq!(merged.radar_name, "controller");
        assert_eq!(merged.site_name, "Marshall");
        assert!((state.wavelength_m().unwrap() - 0.107).abs() < 1e-6);

        state.set_ts_processing(
            Origin::Stream,
            TsProcessing {
                gate_spacing_m: 150.0,
                prt_usec: 1000.0,
                ..Default::default()
            },
        );
        state.set_ts_processing(
            Origin::Controller,
            TsProcessing {
                gate_spacing_m: 75.0,
                prt_usec: 800.0,
                ..Default::default()
            },
        );
        let proc = state.ts_processing().unwrap();
        assert_eq!(proc.gate_spacing_m, 150.0);
        assert_eq!(proc.prt_usec, 800.0);
    }
}
