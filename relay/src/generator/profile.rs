use anyhow::Context;
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use relaycore::protocol::{
    IqEncoding, Packet, PacketId, PacketInfo, PulseHeader, PulseRecord, RadarInfo, ScanMode,
    TsProcessing,
};
use serde::{Deserialize, Serialize};

/// Configuration for a synthetic sector-scan pulse stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub n_pulses: usize,
    pub prt_secs: f64,
    pub n_gates: usize,
    pub start_range_m: f32,
    pub gate_spacing_m: f32,
    pub wavelength_cm: f32,
    pub elevation_deg: f32,
    pub sector_left_deg: f32,
    pub sector_right_deg: f32,
    pub scan_rate_deg_per_sec: f32,
    /// Gate carrying the constant test-pulse tone.
    pub test_pulse_gate: usize,
    pub test_pulse_amplitude: f32,
    /// Phase advance of the tone per pulse, radians.
    pub test_pulse_phase_step: f32,
    pub noise: f32,
    pub seed: u64,
    pub start_time: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            n_pulses: 1000,
            prt_secs: 0.001,
            n_gates: 200,
            start_range_m: 0.0,
            gate_spacing_m: 150.0,
            wavelength_cm: 10.7,
            elevation_deg: 0.5,
            sector_left_deg: 30.0,
            sector_right_deg: 90.0,
            scan_rate_deg_per_sec: 20.0,
            test_pulse_gate: 150,
            test_pulse_amplitude: 1.0,
            test_pulse_phase_step: 0.3,
            noise: 0.01,
            seed: 0,
            start_time: 1_700_000_000.0,
        }
    }
}

impl GeneratorConfig {
    fn normalized_gates(&self) -> usize {
        self.n_gates.max(1)
    }

    fn sector_width(&self) -> f32 {
        (self.sector_right_deg - self.sector_left_deg).abs().max(1.0)
    }

    /// Azimuth and sweep number after `elapsed` seconds of back-and-forth scanning.
    fn position(&self, elapsed: f64) -> (f32, i32) {
        let width = self.sector_width() as f64;
        let travel = elapsed * self.scan_rate_deg_per_sec as f64;
        let sweep = (travel / width).floor();
        let offset = travel - sweep * width;
        let azimuth = if sweep as i64 % 2 == 0 {
            self.sector_left_deg as f64 + offset
        } else {
            self.sector_left_deg as f64 + width - offset
        };
        (azimuth as f32, sweep as i32)
    }
}

fn metadata_packets(config: &GeneratorConfig) -> Vec<Packet> {
    let mut info = PacketInfo::new(PacketId::RadarInfo, 0);
    info.set_time(config.start_time);
    let radar = RadarInfo {
        info,
        wavelength_cm: config.wavelength_cm,
        beamwidth_deg_h: 0.9,
        beamwidth_deg_v: 0.9,
        radar_name: "SYNTH".to_string(),
        site_name: "offline".to_string(),
        ..Default::default()
    };
    let proc = TsProcessing {
        info,
        prt_usec: (config.prt_secs * 1.0e6) as f32,
        start_range_m: config.start_range_m,
        gate_spacing_m: config.gate_spacing_m,
        max_gate: config.normalized_gates() as i32,
        ..Default::default()
    };
    vec![radar.to_packet(), proc.to_packet()]
}

/// Builds the synthetic packets: radar info and processing metadata, then
/// the pulses.
pub fn build_packets(config: &GeneratorConfig) -> anyhow::Result<Vec<Packet>> {
    let n_gates = config.normalized_gates();
    let sample_count = n_gates
        .checked_mul(2)
        .context("overflow computing sample count for generator")?;
    let tone_gate = config.test_pulse_gate.min(n_gates - 1);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut packets = metadata_packets(config);
    packets.reserve(config.n_pulses);

    for index in 0..config.n_pulses {
        let elapsed = index as f64 * config.prt_secs;
        let (azimuth, sweep_num) = config.position(elapsed);
        let mut info = PacketInfo::new(PacketId::PulseHeader, 0);
        info.seq_num = index as i64;
        info.set_time(config.start_time + elapsed);

        let phase = index as f32 * config.test_pulse_phase_step;
        let mut channels = Vec::with_capacity(2);
        for _ in 0..2 {
            let mut gates = Vec::with_capacity(sample_count / 2);
            for gate in 0..n_gates {
                let mut value = Complex32::new(
                    rng.gen_range(-config.noise..=config.noise),
                    rng.gen_range(-config.noise..=config.noise),
                );
                if gate == tone_gate {
                    value += Complex32::from_polar(config.test_pulse_amplitude, phase);
                }
                gates.push(value);
            }
            channels.push(gates);
        }

        let header = PulseHeader {
            pulse_seq_num: index as i64,
            scan_mode: ScanMode::Sector,
            volume_num: 0,
            sweep_num,
            fixed_el: config.elevation_deg,
            elevation: config.elevation_deg,
            azimuth,
            prt: config.prt_secs as f32,
            prt_next: config.prt_secs as f32,
            iq_encoding: IqEncoding::Fl32,
            hv_flag: 1,
            start_range_m: config.start_range_m,
            gate_spacing_m: config.gate_spacing_m,
            ..Default::default()
        };
        packets.push(PulseRecord::from_samples(info, header, &channels).to_packet());
    }
    Ok(packets)
}

/// The synthetic packets as one framed byte stream.
pub fn build_stream(config: &GeneratorConfig) -> anyhow::Result<Vec<u8>> {
    let packets = build_packets(config)?;
    let mut stream = Vec::with_capacity(packets.iter().map(Packet::len).sum());
    for packet in packets {
        stream.extend_from_slice(packet.bytes());
    }
    Ok(stream)
}
