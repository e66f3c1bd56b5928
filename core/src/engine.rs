use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};

use crate::prelude::{
    pause, Clock, Heartbeat, NoopHeartbeat, RelayConfig, RelayError, RelayResult, SystemClock,
};
use crate::processing::{
    xmit_power_xml, AngleMerger, AngleReader, CalibrationMonitor, FragmentKind, Origin, OutputBatcher,
    RangeGeometry, ReadDelayController, ScanState, StatusAugmenter, SweepStabilizer,
};
use crate::protocol::{
    EventNotice, FrameError, Packet, PacketFramer, PacketId, PacketInfo, Payload, PulseHeader, PulseRecord,
    XmitPower,
};
use crate::telemetry::{Counter, MetricsRecorder, RateLimitedLog, RelayStats};
use crate::transport::{MessageQueue, PacketSource};

/// Wait after the first failed read from a source; doubles per repeat.
pub const MIN_SOURCE_BACKOFF: Duration = Duration::from_millis(100);
pub const MAX_SOURCE_BACKOFF: Duration = Duration::from_secs(5);

pub struct RelayEngineBuilder {
    config: RelayConfig,
    output: Box<dyn MessageQueue>,
    angles: Option<Box<dyn MessageQueue>>,
    scan_control: Option<Box<dyn MessageQueue>>,
    secondary_status: Option<Box<dyn MessageQueue>>,
    clock: Box<dyn Clock>,
    heartbeat: Box<dyn Heartbeat>,
}

impl RelayEngineBuilder {
    pub fn angle_queue(mut self, queue: Box<dyn MessageQueue>) -> Self {
        self.angles = Some(queue);
        self
    }

    pub fn scan_control_queue(mut self, queue: Box<dyn MessageQueue>) -> Self {
        self.scan_control = Some(queue);
        self
    }

    pub fn secondary_status_queue(mut self, queue: Box<dyn MessageQueue>) -> Self {
        self.secondary_status = Some(queue);
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn heartbeat(mut self, heartbeat: Box<dyn Heartbeat>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn build(self) -> RelayResult<RelayEngine> {
        let config = self.config;

        let angles = match (config.reads_angles(), self.angles) {
            (true, Some(queue)) => {
                let timeout = Duration::from_millis(config.angle_read_timeout_ms);
                Some(AngleMerger::new(
                    AngleReader::new(queue, timeout),
                    config.n_samples_for_angle_error_stats,
                ))
            }
            (true, None) => {
                return Err(RelayError::Setup(
                    "angle merging or checking is enabled but no angle queue was given".to_string(),
                ))
            }
            (false, _) => None,
        };
        if config.merge_scan_control && self.scan_control.is_none() {
            return Err(RelayError::Setup(
                "scan-control merging is enabled but no scan-control queue was given".to_string(),
            ));
        }
        if config.merge_secondary_status && self.secondary_status.is_none() {
            return Err(RelayError::Setup(
                "secondary status merging is enabled but no status queue was given".to_string(),
            ));
        }

        let calibration_override = match &config.calibration_override_path {
            Some(path) => Some(load_calibration(path)?),
            None => None,
        };
        let calibration = config
            .monitor_test_pulse
            .then(|| CalibrationMonitor::from_config(&config));

        Ok(RelayEngine {
            batcher: OutputBatcher::new(self.output, config.n_pulses_per_message),
            angles,
            scan_control: self.scan_control.filter(|_| config.merge_scan_control),
            secondary_status: self.secondary_status.filter(|_| config.merge_secondary_status),
            clock: self.clock,
            heartbeat: self.heartbeat,
            calibration_override,
            state: EngineState {
                scan: ScanState::new(),
                sweep: SweepStabilizer::from_config(&config),
                delay: ReadDelayController::new(),
                calibration,
                status: StatusAugmenter::from_config(&config),
                consecutive_timeouts: 0,
                consecutive_source_errors: 0,
                iq_scale_warned: false,
                last_pulse: None,
            },
            metrics: MetricsRecorder::new(),
            log: RateLimitedLog::default(),
            config,
        })
    }
}

fn load_calibration(path: &Path) -> RelayResult<Packet> {
    let file = File::open(path).map_err(|err| {
        RelayError::Setup(format!("cannot open calibration file {}: {}", path.display(), err))
    })?;
    let packet = PacketFramer::new(BufReader::new(file))
        .read_packet()
        .map_err(|err| {
            RelayError::Setup(format!("cannot read calibration file {}: {}", path.display(), err))
        })?;
    if packet.id != PacketId::Calibration {
        return Err(RelayError::Setup(format!(
            "{} holds a {:?} packet, not a calibration",
            path.display(),
            packet.id
        )));
    }
    info!("loaded calibration override from {}", path.display());
    Ok(packet)
}

/// Everything the ingestion loop mutates between packets.
pub struct EngineState {
    pub scan: ScanState,
    pub sweep: SweepStabilizer,
    pub delay: ReadDelayController,
    pub calibration: Option<CalibrationMonitor>,
    pub status: StatusAugmenter,
    pub consecutive_timeouts: usize,
    /// Failed reads since the source last produced a packet or timed out.
    pub consecutive_source_errors: u32,
    iq_scale_warned: bool,
    pub last_pulse: Option<PulseHeader>,
}

pub struct RelayEngine {
    config: RelayConfig,
    batcher: OutputBatcher,
    angles: Option<AngleMerger>,
    scan_control: Option<Box<dyn MessageQueue>>,
    secondary_status: Option<Box<dyn MessageQueue>>,
    clock: Box<dyn Clock>,
    heartbeat: Box<dyn Heartbeat>,
    calibration_override: Option<Packet>,
    state: EngineState,
    metrics: MetricsRecorder,
    log: RateLimitedLog,
}

impl RelayEngine {
    pub fn builder(config: RelayConfig, output: Box<dyn MessageQueue>) -> RelayEngineBuilder {
        RelayEngineBuilder {
            config,
            output,
            angles: None,
            scan_control: None,
            secondary_status: None,
            clock: Box::new(SystemClock),
            heartbeat: Box::new(NoopHeartbeat),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.metrics.snapshot()
    }

    /// Relays packets from `source` until it closes or `shutdown` is set.
    /// The partial batch is flushed before returning.
    pub fn run(&mut self, source: &mut dyn PacketSource, shutdown: &AtomicBool) -> RelayStats {
        info!(
            "relay starting: {} packets per message, angles {}, scan control {}",
            self.config.n_pulses_per_message,
            self.angles.is_some(),
            self.scan_control.is_some()
        );
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested");
                break;
            }
            match source.next_packet(self.heartbeat.as_mut()) {
                Ok(packet) => {
                    self.state.consecutive_timeouts = 0;
                    self.state.consecutive_source_errors = 0;
                    self.handle_packet(packet);
                }
                Err(FrameError::TimedOut) => {
                    self.state.consecutive_source_errors = 0;
                    self.handle_timeout();
                }
                Err(FrameError::Closed) => {
                    info!("input closed");
                    break;
                }
                Err(err) => {
                    let counter = match err {
                        FrameError::UnknownType { .. } => Counter::UnknownPacket,
                        _ => Counter::BadPacket,
                    };
                    self.metrics.increment(counter);
                    self.log.warn("input", &err.to_string());
                    if !err.is_skippable() {
                        self.back_off(shutdown);
                    }
                }
            }
        }
        self.flush(true);
        let stats = self.metrics.snapshot();
        info!(
            "relay stopped: {} packets in, {} out in {} flushes",
            stats.packets_in, stats.packets_out, stats.flushes
        );
        stats
    }

    fn back_off(&mut self, shutdown: &AtomicBool) {
        let doublings = self.state.consecutive_source_errors.min(16);
        self.state.consecutive_source_errors = self.state.consecutive_source_errors.saturating_add(1);
        let wait = MIN_SOURCE_BACKOFF
            .saturating_mul(1 << doublings)
            .min(MAX_SOURCE_BACKOFF);
        debug!("input failing, waiting {:?} before the next read", wait);
        pause(self.clock.as_ref(), wait, shutdown, self.heartbeat.as_mut());
    }

    fn handle_packet(&mut self, packet: Packet) {
        self.metrics.increment(Counter::PacketIn);
        self.drain_scan_control();
        self.read_secondary_status();
        self.state.status.note_packet(&packet.info);

        match Payload::decode(&packet) {
            Ok(Payload::Pulse(pulse)) => self.handle_pulse(pulse),
            Ok(Payload::RadarInfo(radar)) => {
                self.state.scan.set_radar_info(Origin::Stream, radar);
                self.emit_merged(PacketId::RadarInfo);
            }
            Ok(Payload::ScanSegment(segment)) => {
                self.state.scan.set_scan_segment(Origin::Stream, segment);
                self.emit_merged(PacketId::ScanSegment);
            }
            Ok(Payload::TsProcessing(proc)) => {
                self.state.scan.set_ts_processing(Origin::Stream, proc);
                self.emit_merged(PacketId::TsProcessing);
            }
            Ok(Payload::XmitPower(power)) => {
                self.state.scan.set_xmit_power(Origin::Stream, power);
                self.emit_merged(PacketId::XmitPower);
            }
            Ok(Payload::StatusXml(status)) if self.config.augment_status_xml => {
                let now = self.clock.now();
                if let Some(augmented) = self.state.status.handle_status(&status, now) {
                    self.batcher.enqueue(augmented.to_packet());
                }
            }
            Ok(Payload::Opaque(PacketId::Calibration)) => {
                let packet = self.calibration_override.clone().unwrap_or(packet);
                self.batcher.enqueue(packet);
            }
            Ok(_) => self.batcher.enqueue(packet),
            Err(err) => {
                self.metrics.increment(Counter::BadPacket);
                self.log
                    .warn("decode", &format!("dropping {:?} packet: {}", packet.id, err));
            }
        }

        self.flush(false);

        if self.config.augment_status_xml {
            let now = self.clock.now();
            if let Some(status) = self.state.status.check_due(now) {
                debug!("no recent status packet, sending one");
                self.batcher.enqueue(status.to_packet());
            }
        }
    }

    fn handle_pulse(&mut self, mut pulse: PulseRecord) {
        self.metrics.increment(Counter::Pulse);
        let config = &self.config;

        if config.pulse_time_adjustment_secs != 0.0 {
            let adjusted = pulse.time() + config.pulse_time_adjustment_secs;
            pulse.info.set_time(adjusted);
        }

        if config.apply_iq_scale
            && !pulse.scale_iq(config.iq_scale, config.iq_bias)
            && !self.state.iq_scale_warned
        {
            warn!("IQ scaling only applies to float IQ data, pulses are {:?}", pulse.header.iq_encoding);
            self.state.iq_scale_warned = true;
        }

        if let Some(monitor) = self.state.calibration.as_mut() {
            let geometry = self.state.scan.ts_processing().map_or(
                RangeGeometry {
                    start_range_km: pulse.header.start_range_m as f64 / 1000.0,
                    gate_spacing_km: pulse.header.gate_spacing_m as f64 / 1000.0,
                },
                |proc| RangeGeometry {
                    start_range_km: proc.start_range_m as f64 / 1000.0,
                    gate_spacing_km: proc.gate_spacing_m as f64 / 1000.0,
                },
            );
            let now = self.clock.now();
            if let Some(summary) = monitor.observe(&pulse, geometry, self.state.scan.wavelength_m(), now) {
                debug!("test pulse summary at gate {}", summary.gate_num);
                let xml = summary.to_xml(&config.test_pulse_xml_tag);
                self.state.status.set_fragment(FragmentKind::TestPulse, summary.time, xml);
            }
        }

        if self.scan_control.is_some() {
            self.state.scan.apply_to_pulse(&mut pulse.header, &pulse.info);
        }

        if let Some(angles) = self.angles.as_mut() {
            if config.merge_antenna_angles {
                angles.merge(&mut pulse.header, &pulse.info, self.heartbeat.as_mut());
            } else if config.check_angles {
                let threshold = config
                    .correct_angles_using_telemetry
                    .then_some(config.angle_error_correction_threshold);
                let now = self.clock.now();
                let check = angles.check(
                    &mut pulse.header,
                    &pulse.info,
                    threshold,
                    now,
                    self.heartbeat.as_mut(),
                );
                if let Some(check) = check {
                    if check.corrected_el || check.corrected_az {
                        self.metrics.increment(Counter::AngleCorrection);
                    }
                    if let Some(summary) = check.summary {
                        let xml = summary.to_xml(&config.angle_errors_xml_tag);
                        self.state.status.set_fragment(FragmentKind::AngleErrors, summary.time, xml);
                    }
                }
            }
            if angles.take_starved() {
                self.metrics.increment(Counter::AngleStarvation);
            }
        }

        self.state.sweep.apply(&mut pulse.header);

        let pulse_time = pulse.time();
        self.state.last_pulse = Some(pulse.header);
        self.batcher.enqueue(pulse.to_packet());

        if self.config.sync_scan_control_with_pulses {
            if let Some(wait) = self.state.delay.maybe_delay(pulse_time, self.clock.as_ref()) {
                self.metrics.record_delay(wait.as_secs_f64());
                self.log.info(
                    "read delay",
                    &format!("holding pulses {:.3}s for scan control", wait.as_secs_f64()),
                );
            }
        }
    }

    fn emit_merged(&mut self, id: PacketId) {
        let packet = match id {
            PacketId::RadarInfo => self.state.scan.radar_info().map(|v| v.to_packet()),
            PacketId::ScanSegment => self.state.scan.scan_segment().map(|v| v.to_packet()),
            PacketId::TsProcessing => self.state.scan.ts_processing().map(|v| v.to_packet()),
            PacketId::XmitPower => {
                let power = self.state.scan.xmit_power();
                if let Some(power) = &power {
                    self.note_xmit_power(power);
                }
                power.map(|v| v.to_packet())
            }
            _ => None,
        };
        if let Some(packet) = packet {
            self.batcher.enqueue(packet);
        }
    }

    fn note_xmit_power(&mut self, power: &XmitPower) {
        let xml = xmit_power_xml(power, &self.config.xmit_power_xml_tag);
        self.state.status
            .set_fragment(FragmentKind::XmitPower, power.info.time(), xml);
    }

    fn drain_scan_control(&mut self) {
        loop {
            let Some(queue) = self.scan_control.as_mut() else {
                return;
            };
            let message = match queue.read() {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(err) => {
                    self.log.warn("scan control", &err.to_string());
                    return;
                }
            };
            let expected = PacketId::from_i32(message.msg_type).and_then(PacketId::fixed_len);
            if expected != Some(message.bytes.len()) {
                debug!(
                    "ignoring scan-control message type 0x{:x}, {} bytes",
                    message.msg_type,
                    message.bytes.len()
                );
                continue;
            }
            let payload = Packet::from_bytes(message.bytes)
                .map_err(|err| err.to_string())
                .and_then(|packet| Payload::decode(&packet).map_err(|err| err.to_string()));
            match payload {
                Ok(payload) => self.apply_scan_control(payload),
                Err(err) => self.log.warn("scan control", &err),
            }
        }
    }

    fn apply_scan_control(&mut self, payload: Payload) {
        let (time, id) = match payload {
            Payload::RadarInfo(radar) => {
                let time = radar.info.time();
                self.state.scan.set_radar_info(Origin::Controller, radar);
                (time, PacketId::RadarInfo)
            }
            Payload::ScanSegment(segment) => {
                let time = segment.info.time();
                self.state.scan.set_scan_segment(Origin::Controller, segment);
                (time, PacketId::ScanSegment)
            }
            Payload::TsProcessing(proc) => {
                let time = proc.info.time();
                self.state.scan.set_ts_processing(Origin::Controller, proc);
                (time, PacketId::TsProcessing)
            }
            Payload::XmitPower(power) if self.config.merge_xmit_power_from_scan_control => {
                let time = power.info.time();
                self.state.scan.set_xmit_power(Origin::Controller, power);
                (time, PacketId::XmitPower)
            }
            Payload::EventNotice(event) => {
                self.metrics.increment(Counter::ScanControlPacket);
                self.state.scan.apply_event(event);
                self.sync_delay(event.info.time());
                self.batcher.enqueue(event.to_packet());
                return;
            }
            _ => return,
        };
        self.metrics.increment(Counter::ScanControlPacket);
        self.sync_delay(time);
        self.emit_merged(id);
    }

    fn sync_delay(&mut self, packet_time: f64) {
        if self.config.sync_scan_control_with_pulses {
            let now = self.clock.now();
            self.state.delay.record_metadata_arrival(packet_time, now);
        }
    }

    fn read_secondary_status(&mut self) {
        let Some(queue) = self.secondary_status.as_mut() else {
            return;
        };
        match queue.read() {
            Ok(Some(message)) => {
                let end = message
                    .bytes
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(message.bytes.len());
                let text = String::from_utf8_lossy(&message.bytes[..end]).into_owned();
                let now = self.clock.now();
                self.state.status.set_fragment(FragmentKind::SecondaryStatus, now, text);
            }
            Ok(None) => {}
            Err(err) => self.log.warn("secondary status", &err.to_string()),
        }
    }

    fn handle_timeout(&mut self) {
        self.metrics.increment(Counter::Timeout);
        self.state.consecutive_timeouts += 1;
        self.log.info("input", "timed out waiting for data");

        self.drain_scan_control();
        self.flush(false);

        let limit = self.config.n_timeouts_for_end_of_vol.max(1);
        if self.config.write_end_of_vol_when_data_stops && self.state.consecutive_timeouts == limit {
            self.write_end_of_volume();
        }
    }

    fn write_end_of_volume(&mut self) {
        let (volume_num, sweep_num, scan_mode) = match &self.state.last_pulse {
            Some(header) => (header.volume_num, header.sweep_num, header.scan_mode),
            None => {
                let (volume_num, sweep_num) = self.state.sweep.current();
                (volume_num, sweep_num, Default::default())
            }
        };
        let mut info = PacketInfo::new(PacketId::EventNotice, 0);
        info.set_time(self.clock.now());
        let notice = EventNotice {
            info,
            end_of_volume: true,
            scan_mode,
            volume_num,
            sweep_num,
            ..Default::default()
        };
        info!("data stopped, writing end of volume {}", volume_num);
        self.metrics.increment(Counter::EndOfVolume);
        self.batcher.enqueue(notice.to_packet());
        self.flush(true);
    }

    fn flush(&mut self, force: bool) {
        match self.batcher.maybe_flush(force) {
            Ok(0) => {}
            Ok(n_packets) => self.metrics.record_flush(n_packets),
            Err(err) => {
                self.metrics.increment(Counter::FlushFailure);
                self.log.warn("output", &format!("flush failed: {}", err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::ManualClock;
    use crate::protocol::codec::FieldWriter;
    use crate::protocol::{ScanMode, StatusXml};
    use crate::transport::{MemoryQueue, MessageParts, MULTIPART_MSG_TYPE};
    use num_complex::Complex32;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::rc::Rc;

    const T0: f64 = 1_700_000_000.0;

    fn pulse_packet(seq: i64, time: f64, azimuth: f32, sweep_num: i32) -> Packet {
        let mut info = PacketInfo::new(PacketId::PulseHeader, 0);
        info.set_time(time);
        let header = PulseHeader {
            pulse_seq_num: seq,
            scan_mode: ScanMode::Sector,
            volume_num: 3,
            sweep_num,
            elevation: 0.5,
            azimuth,
            prt: 0.001,
            ..Default::default()
        };
        let channels = vec![vec![Complex32::new(1.0, 0.5); 4]];
        PulseRecord::from_samples(info, header, &channels).to_packet()
    }

    fn stream(packets: &[Packet]) -> PacketFramer<Cursor<Vec<u8>>> {
        let bytes: Vec<u8> = packets.iter().flat_map(|p| p.bytes().to_vec()).collect();
        PacketFramer::new(Cursor::new(bytes))
    }

    fn output_packets(output: &MemoryQueue) -> Vec<Packet> {
        output
            .drain()
            .into_iter()
            .flat_map(|message| {
                assert_eq!(message.msg_type, MULTIPART_MSG_TYPE);
                MessageParts::disassemble(&message.bytes).unwrap().into_parts()
            })
            .map(|part| Packet::from_bytes(part.bytes).unwrap())
            .collect()
    }

    fn pulses(packets: &[Packet]) -> Vec<PulseRecord> {
        packets
            .iter()
            .filter(|p| p.id == PacketId::PulseHeader)
            .map(|p| PulseRecord::decode(p).unwrap())
            .collect()
    }

    struct Scripted(VecDeque<Result<Packet, FrameError>>);

    impl PacketSource for Scripted {
        fn next_packet(&mut self, _heartbeat: &mut dyn Heartbeat) -> Result<Packet, FrameError> {
            self.0.pop_front().unwrap_or(Err(FrameError::Closed))
        }
    }

    #[test]
    fn relays_pulses_in_order_and_flushes_at_threshold() {
        let config = RelayConfig {
            n_pulses_per_message: 10,
            ..Default::default()
        };
        let output = MemoryQueue::new();
        let beats = Rc::new(Cell::new(0));
        let counter = beats.clone();
        let mut engine = RelayEngine::builder(config, Box::new(output.clone()))
            .clock(Box::new(ManualClock::new(T0)))
            .heartbeat(Box::new(move |_: &str| counter.set(counter.get() + 1)))
            .build()
            .unwrap();

        let input: Vec<Packet> = (0..100)
            .map(|i| pulse_packet(i, T0 + i as f64 * 0.001, (i % 360) as f32, 7))
            .collect();
        let stats = engine.run(&mut stream(&input), &AtomicBool::new(false));

        assert_eq!(stats.pulses, 100);
        assert_eq!(stats.flushes, 10);
        assert_eq!(stats.packets_out, 100);
        assert_eq!(output.len(), 10);
        assert!(beats.get() >= 100);

        let relayed = pulses(&output_packets(&output));
        assert_eq!(relayed.len(), 100);
        for (i, pulse) in relayed.iter().enumerate() {
            assert_eq!(pulse.header.pulse_seq_num, i as i64);
            assert_eq!(pulse.header.azimuth, (i % 360) as f32);
            assert_eq!(pulse.header.elevation, 0.5);
            assert_eq!(pulse.header.sweep_num, 7);
        }
    }

    #[test]
    fn shutdown_flushes_partial_batch() {
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(RelayConfig::default(), Box::new(output.clone()))
            .clock(Box::new(ManualClock::new(T0)))
            .build()
            .unwrap();
        let input: Vec<Packet> = (0..3).map(|i| pulse_packet(i, T0, 1.0, 0)).collect();
        let stats = engine.run(&mut stream(&input), &AtomicBool::new(false));
        assert_eq!(stats.flushes, 1);
        assert_eq!(pulses(&output_packets(&output)).len(), 3);

        let stopped = MemoryQueue::new();
        let mut engine = RelayEngine::builder(RelayConfig::default(), Box::new(stopped.clone()))
            .build()
            .unwrap();
        let stats = engine.run(&mut stream(&input), &AtomicBool::new(true));
        assert_eq!(stats.packets_in, 0);
        assert!(stopped.is_empty());
    }

    #[test]
    fn merges_interpolated_telemetry_angles() {
        let angles = MemoryQueue::new();
        let mut parts = MessageParts::new();
        for (time, azimuth) in [(T0, 10.0), (T0 + 1.0, 12.0)] {
            let mut info = PacketInfo::default();
            info.set_time(time);
            parts.add_packet(
                crate::protocol::AntennaAngles {
                    info,
                    elevation: 1.0,
                    azimuth,
                }
                .to_packet(),
            );
        }
        angles.clone().write(MULTIPART_MSG_TYPE, &parts.assemble()).unwrap();

        let config = RelayConfig {
            merge_antenna_angles: true,
            ..Default::default()
        };
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(config, Box::new(output.clone()))
            .angle_queue(Box::new(angles))
            .clock(Box::new(ManualClock::new(T0)))
            .build()
            .unwrap();
        engine.run(&mut stream(&[pulse_packet(0, T0 + 0.5, 99.0, 1)]), &AtomicBool::new(false));

        let relayed = pulses(&output_packets(&output));
        assert!((relayed[0].header.azimuth - 11.0).abs() < 1e-4);
        assert!((relayed[0].header.elevation - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_angle_queue_is_a_setup_error() {
        let config = RelayConfig {
            check_angles: true,
            ..Default::default()
        };
        let result = RelayEngine::builder(config, Box::new(MemoryQueue::new())).build();
        assert!(matches!(result, Err(RelayError::Setup(_))));
    }

    fn sweep_event(time: f64, start: bool, sweep_num: i32, fixed: f32) -> Packet {
        let mut info = PacketInfo::default();
        info.set_time(time);
        EventNotice {
            info,
            start_of_sweep: start,
            end_of_sweep: !start,
            scan_mode: ScanMode::Sector,
            volume_num: 4,
            sweep_num,
            current_fixed_angle: fixed,
            ..Default::default()
        }
        .to_packet()
    }

    #[test]
    fn scan_control_events_bracket_pulses() {
        let control = MemoryQueue::new();
        let mut writer = control.clone();
        for event in [
            sweep_event(T0 + 100.0, true, 1, 0.5),
            sweep_event(T0 + 110.0, false, 1, 0.5),
            sweep_event(T0 + 112.0, true, 2, 1.5),
        ] {
            writer.write(event.info.id, event.bytes()).unwrap();
        }
        // wrong size for its type, ignored
        writer.write(PacketId::EventNotice.as_i32(), &[0u8; 12]).unwrap();

        let config = RelayConfig {
            merge_scan_control: true,
            ..Default::default()
        };
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(config, Box::new(output.clone()))
            .scan_control_queue(Box::new(control))
            .clock(Box::new(ManualClock::new(T0 + 200.0)))
            .build()
            .unwrap();
        let input = [
            pulse_packet(0, T0 + 105.0, 1.0, 0),
            pulse_packet(1, T0 + 110.5, 1.0, 0),
            pulse_packet(2, T0 + 113.0, 1.0, 0),
        ];
        let stats = engine.run(&mut stream(&input), &AtomicBool::new(false));
        assert_eq!(stats.scan_control_packets, 3);

        let packets = output_packets(&output);
        let events = packets.iter().filter(|p| p.id == PacketId::EventNotice).count();
        assert_eq!(events, 3);

        let relayed = pulses(&packets);
        let summary: Vec<(i32, bool)> = relayed
            .iter()
            .map(|p| (p.header.sweep_num, p.header.antenna_transition))
            .collect();
        assert_eq!(summary, vec![(1, false), (1, true), (2, false)]);
        assert_eq!(relayed[2].header.fixed_el, 1.5);
        assert_eq!(relayed[2].header.volume_num, 4);
    }

    #[test]
    fn status_text_is_augmented_with_transmit_power() {
        let config = RelayConfig {
            augment_status_xml: true,
            status_xml_interval_secs: 1.0e6,
            ..Default::default()
        };
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(config, Box::new(output.clone()))
            .clock(Box::new(ManualClock::new(T0)))
            .build()
            .unwrap();

        let status = |xml: &str| {
            StatusXml {
                info: PacketInfo::new(PacketId::StatusXml, 0),
                xml: xml.to_string(),
            }
            .to_packet()
        };
        let mut info = PacketInfo::new(PacketId::XmitPower, 0);
        info.set_time(T0);
        let power = XmitPower {
            info,
            power_dbm_h: 85.0,
            power_dbm_v: 84.0,
        }
        .to_packet();
        engine.run(
            &mut stream(&[status("<Radar/>"), power, status("<Radar/>")]),
            &AtomicBool::new(false),
        );

        let texts: Vec<String> = output_packets(&output)
            .iter()
            .filter(|p| p.id == PacketId::StatusXml)
            .map(|p| StatusXml::decode(p).unwrap().xml)
            .collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0], "<Radar/>");
        assert!(texts[1].starts_with("<Radar/><XmitPower>"));
        assert!(texts[1].contains("<XmitPowerDbmH>85.000</XmitPowerDbmH>"));
    }

    #[test]
    fn end_of_volume_written_once_when_data_stops() {
        let config = RelayConfig {
            write_end_of_vol_when_data_stops: true,
            n_timeouts_for_end_of_vol: 3,
            ..Default::default()
        };
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(config, Box::new(output.clone()))
            .clock(Box::new(ManualClock::new(T0)))
            .build()
            .unwrap();

        let mut script = VecDeque::new();
        script.push_back(Ok(pulse_packet(0, T0, 5.0, 4)));
        for _ in 0..5 {
            script.push_back(Err(FrameError::TimedOut));
        }
        let stats = engine.run(&mut Scripted(script), &AtomicBool::new(false));
        assert_eq!(stats.timeouts, 5);
        assert_eq!(stats.end_of_volumes, 1);
        assert_eq!(stats.flushes, 1);
        assert_eq!(engine.state().consecutive_timeouts, 5);

        let packets = output_packets(&output);
        assert_eq!(packets.len(), 2);
        let notice = EventNotice::decode(&packets[1]).unwrap();
        assert!(notice.end_of_volume);
        assert_eq!((notice.volume_num, notice.sweep_num), (3, 4));
    }

    #[test]
    fn corrupt_input_is_counted_and_skipped() {
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(RelayConfig::default(), Box::new(output.clone()))
            .build()
            .unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PacketId::AntennaAngles.as_i32().to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(pulse_packet(9, T0, 3.0, 0).bytes());
        let mut source = PacketFramer::new(Cursor::new(bytes));

        let stats = engine.run(&mut source, &AtomicBool::new(false));
        assert_eq!(stats.bad_packets, 1);
        assert_eq!(pulses(&output_packets(&output))[0].header.pulse_seq_num, 9);
    }

    fn calibration_packet(fill: u8) -> Packet {
        let len = PacketInfo::SIZE + 16;
        let info = PacketInfo::new(PacketId::Calibration, len);
        let mut writer = FieldWriter::with_capacity(len);
        info.write(&mut writer);
        writer.bytes(&[fill; 16]);
        Packet::from_bytes(writer.into_inner()).unwrap()
    }

    #[test]
    fn calibration_override_replaces_stream_calibration() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), calibration_packet(7).bytes()).unwrap();
        let config = RelayConfig {
            calibration_override_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(config, Box::new(output.clone()))
            .build()
            .unwrap();
        engine.run(&mut stream(&[calibration_packet(1)]), &AtomicBool::new(false));

        let packets = output_packets(&output);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].body(), &[7u8; 16]);
    }

    #[test]
    fn unreadable_calibration_override_is_fatal() {
        let config = RelayConfig {
            calibration_override_path: Some("/nonexistent/cal.bin".into()),
            ..Default::default()
        };
        let result = RelayEngine::builder(config, Box::new(MemoryQueue::new())).build();
        assert!(matches!(result, Err(RelayError::Setup(_))));
    }

    fn angle_queue(samples: &[(f64, f32, f32)]) -> MemoryQueue {
        let queue = MemoryQueue::new();
        let mut parts = MessageParts::new();
        for &(time, elevation, azimuth) in samples {
            let mut info = PacketInfo::default();
            info.set_time(time);
            parts.add_packet(
                crate::protocol::AntennaAngles {
                    info,
                    elevation,
                    azimuth,
                }
                .to_packet(),
            );
        }
        queue.clone().write(MULTIPART_MSG_TYPE, &parts.assemble()).unwrap();
        queue
    }

    #[test]
    fn angle_drift_is_corrected_and_reported_in_status() {
        let config = RelayConfig {
            check_angles: true,
            correct_angles_using_telemetry: true,
            angle_error_correction_threshold: 0.1,
            n_samples_for_angle_error_stats: 2,
            augment_status_xml: true,
            status_xml_interval_secs: 1.0e6,
            ..Default::default()
        };
        let output = MemoryQueue::new();
        let mut engine = RelayEngine::builder(config, Box::new(output.clone()))
            .angle_queue(Box::new(angle_queue(&[(T0, 0.5, 10.0), (T0 + 1.0, 0.5, 12.0)])))
            .clock(Box::new(ManualClock::new(T0)))
            .build()
            .unwrap();

        let status = StatusXml {
            info: PacketInfo::new(PacketId::StatusXml, 0),
            xml: "<Radar/>".to_string(),
        }
        .to_packet();
        let input = [
            pulse_packet(0, T0 + 0.25, 11.0, 0),
            pulse_packet(1, T0 + 0.5, 11.5, 0),
            status,
        ];
        let stats = engine.run(&mut stream(&input), &AtomicBool::new(false));
        assert_eq!(stats.angle_corrections, 2);

        let merger = engine.angles.as_ref().unwrap();
        assert!(merger.errors().is_empty());
        let summary = merger.errors().latest().unwrap();
        assert!((summary.azimuth.max_abs - 0.5).abs() < 1e-4);

        let packets = output_packets(&output);
        let relayed = pulses(&packets);
        assert!((relayed[0].header.azimuth - 10.5).abs() < 1e-4);
        assert!((relayed[1].header.azimuth - 11.0).abs() < 1e-4);
        let texts: Vec<String> = packets
            .iter()
            .filter(|p| p.id == PacketId::StatusXml)
            .map(|p| StatusXml::decode(p).unwrap().xml)
            .collect();
        let last = texts.last().unwrap();
        assert!(last.starts_with("<Radar/><AngleErrors>"), "{last}");
        assert!(last.contains("<AzErrorMax>0.50000</AzErrorMax>"), "{last}");
    }

    #[test]
    fn pulses_wait_for_late_scan_control() {
        let control = MemoryQueue::new();
        let event = sweep_event(T0 + 99.0, true, 1, 0.5);
        control.clone().write(event.info.id, event.bytes()).unwrap();

        let config = RelayConfig {
            merge_scan_control: true,
            sync_scan_control_with_pulses: true,
            ..Default::default()
        };
        let clock = ManualClock::new(T0 + 100.0);
        let mut engine = RelayEngine::builder(config, Box::new(MemoryQueue::new()))
            .scan_control_queue(Box::new(control))
            .clock(Box::new(clock.clone()))
            .build()
            .unwrap();
        // metadata runs 1 s late, the pulse only 0.2 s
        let input = [pulse_packet(0, T0 + 99.8, 1.0, 0)];
        let stats = engine.run(&mut stream(&input), &AtomicBool::new(false));

        assert_eq!(stats.delay_sleeps, 1);
        assert!((clock.total_slept() - 1.2).abs() < 1e-5, "slept {}", clock.total_slept());
        assert!((stats.delay_secs - 1.2).abs() < 1e-5);
    }

    #[test]
    fn failing_source_is_backed_off() {
        let clock = ManualClock::new(T0);
        let mut engine = RelayEngine::builder(RelayConfig::default(), Box::new(MemoryQueue::new()))
            .clock(Box::new(clock.clone()))
            .build()
            .unwrap();
        let io_error = || -> Result<Packet, FrameError> {
            Err(FrameError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        };
        let mut script = VecDeque::new();
        for _ in 0..3 {
            script.push_back(io_error());
        }
        script.push_back(Ok(pulse_packet(0, T0, 1.0, 0)));
        script.push_back(io_error());

        let stats = engine.run(&mut Scripted(script), &AtomicBool::new(false));
        assert_eq!(stats.bad_packets, 4);
        assert_eq!(stats.pulses, 1);
        // 0.1 + 0.2 + 0.4, then reset by the good packet
        assert!((clock.total_slept() - 0.8).abs() < 1e-9, "slept {}", clock.total_slept());
        assert_eq!(engine.state().consecutive_source_errors, 1);
    }
}
