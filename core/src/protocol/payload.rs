use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::protocol::codec::{FieldReader, FieldWriter};
use crate::protocol::packet::{Packet, PacketId, PacketInfo, ScanMode};
use crate::protocol::ParseError;

/// Fill value for angles that do not apply to the current scan mode.
pub const MISSING_ANGLE: f32 = -9999.0;

fn expect_id(packet: &Packet, expected: PacketId) -> Result<(), ParseError> {
    if packet.id != expected {
        return Err(ParseError::WrongType {
            expected,
            actual: packet.id,
        });
    }
    if let Some(len) = expected.fixed_len() {
        if packet.len() < len {
            return Err(ParseError::TooShort {
                expected: len,
                actual: packet.len(),
            });
        }
    }
    Ok(())
}

fn seal(mut info: PacketInfo, id: PacketId, body: FieldWriter) -> Packet {
    let body = body.into_inner();
    info.id = id.as_i32();
    info.len_bytes = (PacketInfo::SIZE + body.len()) as i32;
    let mut writer = FieldWriter::with_capacity(info.len_bytes as usize);
    info.write(&mut writer);
    writer.bytes(&body);
    Packet::from_parts(id, info, writer.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IqEncoding {
    #[default]
    NotSet,
    Fl32,
    ScaledSi16,
    Other(i32),
}

impl IqEncoding {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => IqEncoding::NotSet,
            1 => IqEncoding::Fl32,
            2 => IqEncoding::ScaledSi16,
            other => IqEncoding::Other(other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            IqEncoding::NotSet => 0,
            IqEncoding::Fl32 => 1,
            IqEncoding::ScaledSi16 => 2,
            IqEncoding::Other(other) => other,
        }
    }

    pub fn value_size(self) -> Option<usize> {
        match self {
            IqEncoding::Fl32 => Some(4),
            IqEncoding::ScaledSi16 => Some(2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PulseHeader {
    pub pulse_seq_num: i64,
    pub scan_mode: ScanMode,
    pub follow_mode: i32,
    pub volume_num: i32,
    pub sweep_num: i32,
    pub fixed_el: f32,
    pub fixed_az: f32,
    pub elevation: f32,
    pub azimuth: f32,
    pub prt: f32,
    pub prt_next: f32,
    pub pulse_width_us: f32,
    pub n_gates: i32,
    pub n_channels: i32,
    pub iq_encoding: IqEncoding,
    pub hv_flag: i32,
    pub antenna_transition: bool,
    pub n_data: i32,
    pub scale: f32,
    pub offset: f32,
    pub start_range_m: f32,
    pub gate_spacing_m: f32,
    pub event_flags: i32,
}

impl PulseHeader {
    pub const SIZE: usize = 96;

    fn read(reader: &mut FieldReader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            pulse_seq_num: reader.i64()?,
            scan_mode: ScanMode::from_i32(reader.i32()?),
            follow_mode: reader.i32()?,
            volume_num: reader.i32()?,
            sweep_num: reader.i32()?,
            fixed_el: reader.f32()?,
            fixed_az: reader.f32()?,
            elevation: reader.f32()?,
            azimuth: reader.f32()?,
            prt: reader.f32()?,
            prt_next: reader.f32()?,
            pulse_width_us: reader.f32()?,
            n_gates: reader.i32()?,
            n_channels: reader.i32()?,
            iq_encoding: IqEncoding::from_i32(reader.i32()?),
            hv_flag: reader.i32()?,
            antenna_transition: reader.bool()?,
            n_data: reader.i32()?,
            scale: reader.f32()?,
            offset: reader.f32()?,
            start_range_m: reader.f32()?,
            gate_spacing_m: reader.f32()?,
            event_flags: reader.i32()?,
        })
    }

    fn write(&self, writer: &mut FieldWriter) {
        writer
            .i64(self.pulse_seq_num)
            .i32(self.scan_mode.as_i32())
            .i32(self.follow_mode)
            .i32(self.volume_num)
            .i32(self.sweep_num)
            .f32(self.fixed_el)
            .f32(self.fixed_az)
            .f32(self.elevation)
            .f32(self.azimuth)
            .f32(self.prt)
            .f32(self.prt_next)
            .f32(self.pulse_width_us)
            .i32(self.n_gates)
            .i32(self.n_channels)
            .i32(self.iq_encoding.as_i32())
            .i32(self.hv_flag)
            .bool(self.antenna_transition)
            .i32(self.n_data)
            .f32(self.scale)
            .f32(self.offset)
            .f32(self.start_range_m)
            .f32(self.gate_spacing_m)
            .i32(self.event_flags);
    }
}

/// Decoded pulse: header fields plus the raw IQ block.
///
/// The correction stages mutate the header in place; [`PulseRecord::to_packet`]
/// re-encodes it for output.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseRecord {
    pub info: PacketInfo,
    pub header: PulseHeader,
    iq: Vec<u8>,
}

impl PulseRecord {
    pub fn new(info: PacketInfo, header: PulseHeader, iq: Vec<u8>) -> Self {
        Self { info, header, iq }
    }

    pub fn from_samples(info: PacketInfo, mut header: PulseHeader, channels: &[Vec<Complex32>]) -> Self {
        let n_gates = channels.first().map_or(0, Vec::len);
        let mut writer = FieldWriter::with_capacity(channels.len() * n_gates * 8);
        for channel in channels {
            for sample in channel {
                writer.f32(sample.re).f32(sample.im);
            }
        }
        header.n_gates = n_gates as i32;
        header.n_channels = channels.len() as i32;
        header.n_data = (channels.len() * n_gates * 2) as i32;
        header.iq_encoding = IqEncoding::Fl32;
        Self::new(info, header, writer.into_inner())
    }

    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::PulseHeader)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        let header = PulseHeader::read(&mut reader)?;
        let iq_start = PacketInfo::SIZE + PulseHeader::SIZE;
        let iq = packet.bytes()[iq_start..].to_vec();
        if let Some(size) = header.iq_encoding.value_size() {
            let needed = header.n_data.max(0) as usize * size;
            if iq.len() < needed {
                return Err(ParseError::TooShort {
                    expected: iq_start + needed,
                    actual: packet.len(),
                });
            }
        }
        Ok(Self {
            info: packet.info,
            header,
            iq,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut body = FieldWriter::with_capacity(PulseHeader::SIZE + self.iq.len());
        self.header.write(&mut body);
        body.bytes(&self.iq);
        seal(self.info, PacketId::PulseHeader, body)
    }

    pub fn time(&self) -> f64 {
        self.info.time()
    }

    /// True when this pulse was transmitted horizontally (alternating mode).
    pub fn is_horizontal(&self) -> bool {
        self.header.hv_flag != 0
    }

    pub fn iq_bytes(&self) -> &[u8] {
        &self.iq
    }

    pub fn iq_sample(&self, channel: usize, gate: usize) -> Option<Complex32> {
        let size = self.header.iq_encoding.value_size()?;
        let n_gates = self.header.n_gates.max(0) as usize;
        if channel >= self.header.n_channels.max(0) as usize || gate >= n_gates {
            return None;
        }
        let index = (channel * n_gates + gate) * 2;
        if index + 1 >= self.header.n_data.max(0) as usize {
            return None;
        }
        let mut reader = FieldReader::at(&self.iq, index * size);
        let (i, q) = match self.header.iq_encoding {
            IqEncoding::Fl32 => (reader.f32().ok()?, reader.f32().ok()?),
            IqEncoding::ScaledSi16 => {
                let scale = self.header.scale;
                let offset = self.header.offset;
                (
                    reader.i16().ok()? as f32 * scale + offset,
                    reader.i16().ok()? as f32 * scale + offset,
                )
            }
            _ => return None,
        };
        Some(Complex32::new(i, q))
    }

    /// Applies `value * scale + bias` to every float IQ value.
    /// Returns false, leaving the data untouched, for non-float encodings.
    pub fn scale_iq(&mut self, scale: f64, bias: f64) -> bool {
        if self.header.iq_encoding != IqEncoding::Fl32 {
            return false;
        }
        let n_values = (self.header.n_data.max(0) as usize).min(self.iq.len() / 4);
        for chunk in self.iq.chunks_exact_mut(4).take(n_values) {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let scaled = (value as f64 * scale + bias) as f32;
            chunk.copy_from_slice(&scaled.to_le_bytes());
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RadarInfo {
    pub info: PacketInfo,
    pub latitude_deg: f32,
    pub longitude_deg: f32,
    pub altitude_m: f32,
    pub platform_type: i32,
    pub beamwidth_deg_h: f32,
    pub beamwidth_deg_v: f32,
    pub wavelength_cm: f32,
    pub nominal_gain_ant_db_h: f32,
    pub nominal_gain_ant_db_v: f32,
    pub radar_name: String,
    pub site_name: String,
}

impl RadarInfo {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::RadarInfo)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        Ok(Self {
            info: packet.info,
            latitude_deg: reader.f32()?,
            longitude_deg: reader.f32()?,
            altitude_m: reader.f32()?,
            platform_type: reader.i32()?,
            beamwidth_deg_h: reader.f32()?,
            beamwidth_deg_v: reader.f32()?,
            wavelength_cm: reader.f32()?,
            nominal_gain_ant_db_h: reader.f32()?,
            nominal_gain_ant_db_v: reader.f32()?,
            radar_name: reader.text::<32>()?,
            site_name: reader.text::<32>()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut body = FieldWriter::with_capacity(100);
        body.f32(self.latitude_deg)
            .f32(self.longitude_deg)
            .f32(self.altitude_m)
            .i32(self.platform_type)
            .f32(self.beamwidth_deg_h)
            .f32(self.beamwidth_deg_v)
            .f32(self.wavelength_cm)
            .f32(self.nominal_gain_ant_db_h)
            .f32(self.nominal_gain_ant_db_v)
            .text::<32>(&self.radar_name)
            .text::<32>(&self.site_name);
        seal(self.info, PacketId::RadarInfo, body)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanSegment {
    pub info: PacketInfo,
    pub scan_mode: ScanMode,
    pub follow_mode: i32,
    pub volume_num: i32,
    pub sweep_num: i32,
    pub time_limit: i32,
    pub az_manual: f32,
    pub el_manual: f32,
    pub az_start: f32,
    pub el_start: f32,
    pub scan_rate: f32,
    pub left_limit: f32,
    pub right_limit: f32,
    pub up_limit: f32,
    pub down_limit: f32,
    pub step: f32,
    pub current_fixed_angle: f32,
    pub init_direction_cw: bool,
    pub init_direction_up: bool,
    pub n_sweeps: i32,
    pub segment_name: String,
    pub project_name: String,
}

impl ScanSegment {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::ScanSegment)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        Ok(Self {
            info: packet.info,
            scan_mode: ScanMode::from_i32(reader.i32()?),
            follow_mode: reader.i32()?,
            volume_num: reader.i32()?,
            sweep_num: reader.i32()?,
            time_limit: reader.i32()?,
            az_manual: reader.f32()?,
            el_manual: reader.f32()?,
            az_start: reader.f32()?,
            el_start: reader.f32()?,
            scan_rate: reader.f32()?,
            left_limit: reader.f32()?,
            right_limit: reader.f32()?,
            up_limit: reader.f32()?,
            down_limit: reader.f32()?,
            step: reader.f32()?,
            current_fixed_angle: reader.f32()?,
            init_direction_cw: reader.bool()?,
            init_direction_up: reader.bool()?,
            n_sweeps: reader.i32()?,
            segment_name: reader.text::<32>()?,
            project_name: reader.text::<32>()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut body = FieldWriter::with_capacity(140);
        body.i32(self.scan_mode.as_i32())
            .i32(self.follow_mode)
            .i32(self.volume_num)
            .i32(self.sweep_num)
            .i32(self.time_limit)
            .f32(self.az_manual)
            .f32(self.el_manual)
            .f32(self.az_start)
            .f32(self.el_start)
            .f32(self.scan_rate)
            .f32(self.left_limit)
            .f32(self.right_limit)
            .f32(self.up_limit)
            .f32(self.down_limit)
            .f32(self.step)
            .f32(self.current_fixed_angle)
            .bool(self.init_direction_cw)
            .bool(self.init_direction_up)
            .i32(self.n_sweeps)
            .text::<32>(&self.segment_name)
            .text::<32>(&self.project_name);
        seal(self.info, PacketId::ScanSegment, body)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TsProcessing {
    pub info: PacketInfo,
    pub xmit_rcv_mode: i32,
    pub xmit_phase_mode: i32,
    pub prf_mode: i32,
    pub pulse_type: i32,
    pub prt_usec: f32,
    pub prt2_usec: f32,
    pub cal_type: i32,
    pub burst_range_offset_m: f32,
    pub pulse_width_us: f32,
    pub start_range_m: f32,
    pub gate_spacing_m: f32,
    pub integration_cycle_pulses: i32,
    pub clutter_filter_number: i32,
    pub range_gate_averaging: i32,
    pub max_gate: i32,
    pub test_power_dbm: f32,
    pub test_pulse_range_km: f32,
    pub test_pulse_length_usec: f32,
    pub pol_mode: i32,
}

impl TsProcessing {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::TsProcessing)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        Ok(Self {
            info: packet.info,
            xmit_rcv_mode: reader.i32()?,
            xmit_phase_mode: reader.i32()?,
            prf_mode: reader.i32()?,
            pulse_type: reader.i32()?,
            prt_usec: reader.f32()?,
            prt2_usec: reader.f32()?,
            cal_type: reader.i32()?,
            burst_range_offset_m: reader.f32()?,
            pulse_width_us: reader.f32()?,
            start_range_m: reader.f32()?,
            gate_spacing_m: reader.f32()?,
            integration_cycle_pulses: reader.i32()?,
            clutter_filter_number: reader.i32()?,
            range_gate_averaging: reader.i32()?,
            max_gate: reader.i32()?,
            test_power_dbm: reader.f32()?,
            test_pulse_range_km: reader.f32()?,
            test_pulse_length_usec: reader.f32()?,
            pol_mode: reader.i32()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut body = FieldWriter::with_capacity(76);
        body.i32(self.xmit_rcv_mode)
            .i32(self.xmit_phase_mode)
            .i32(self.prf_mode)
            .i32(self.pulse_type)
            .f32(self.prt_usec)
            .f32(self.prt2_usec)
            .i32(self.cal_type)
            .f32(self.burst_range_offset_m)
            .f32(self.pulse_width_us)
            .f32(self.start_range_m)
            .f32(self.gate_spacing_m)
            .i32(self.integration_cycle_pulses)
            .i32(self.clutter_filter_number)
            .i32(self.range_gate_averaging)
            .i32(self.max_gate)
            .f32(self.test_power_dbm)
            .f32(self.test_pulse_range_km)
            .f32(self.test_pulse_length_usec)
            .i32(self.pol_mode);
        seal(self.info, PacketId::TsProcessing, body)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmitPower {
    pub info: PacketInfo,
    pub power_dbm_h: f32,
    pub power_dbm_v: f32,
}

impl XmitPower {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::XmitPower)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        Ok(Self {
            info: packet.info,
            power_dbm_h: reader.f32()?,
            power_dbm_v: reader.f32()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut body = FieldWriter::with_capacity(8);
        body.f32(self.power_dbm_h).f32(self.power_dbm_v);
        seal(self.info, PacketId::XmitPower, body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventNotice {
    pub info: PacketInfo,
    pub start_of_sweep: bool,
    pub end_of_sweep: bool,
    pub start_of_volume: bool,
    pub end_of_volume: bool,
    pub scan_mode: ScanMode,
    pub follow_mode: i32,
    pub volume_num: i32,
    pub sweep_num: i32,
    pub cause: i32,
    pub current_fixed_angle: f32,
    pub antenna_transition: bool,
}

impl EventNotice {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::EventNotice)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        Ok(Self {
            info: packet.info,
            start_of_sweep: reader.bool()?,
            end_of_sweep: reader.bool()?,
            start_of_volume: reader.bool()?,
            end_of_volume: reader.bool()?,
            scan_mode: ScanMode::from_i32(reader.i32()?),
            follow_mode: reader.i32()?,
            volume_num: reader.i32()?,
            sweep_num: reader.i32()?,
            cause: reader.i32()?,
            current_fixed_angle: reader.f32()?,
            antenna_transition: reader.bool()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut body = FieldWriter::with_capacity(44);
        body.bool(self.start_of_sweep)
            .bool(self.end_of_sweep)
            .bool(self.start_of_volume)
            .bool(self.end_of_volume)
            .i32(self.scan_mode.as_i32())
            .i32(self.follow_mode)
            .i32(self.volume_num)
            .i32(self.sweep_num)
            .i32(self.cause)
            .f32(self.current_fixed_angle)
            .bool(self.antenna_transition);
        seal(self.info, PacketId::EventNotice, body)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusXml {
    pub info: PacketInfo,
    pub xml: String,
}

impl StatusXml {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::StatusXml)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        let declared = reader.i32()?.max(0) as usize;
        let text = &packet.bytes()[(PacketInfo::SIZE + 4).min(packet.len())..];
        // never trust xml_len beyond the buffer
        let text = &text[..declared.min(text.len())];
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        let xml = String::from_utf8_lossy(&text[..end]).into_owned();
        Ok(Self {
            info: packet.info,
            xml,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let xml_len = self.xml.len() + 1;
        let mut body = FieldWriter::with_capacity(4 + xml_len);
        body.i32(xml_len as i32).bytes(self.xml.as_bytes()).bytes(&[0]);
        seal(self.info, PacketId::StatusXml, body)
    }
}

/// Antenna position sample from the angle telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AntennaAngles {
    pub info: PacketInfo,
    pub elevation: f32,
    pub azimuth: f32,
}

impl AntennaAngles {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        expect_id(packet, PacketId::AntennaAngles)?;
        let mut reader = FieldReader::at(packet.bytes(), PacketInfo::SIZE);
        Ok(Self {
            info: packet.info,
            elevation: reader.f32()?,
            azimuth: reader.f32()?,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut body = FieldWriter::with_capacity(8);
        body.f32(self.elevation).f32(self.azimuth);
        seal(self.info, PacketId::AntennaAngles, body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Pulse(PulseRecord),
    RadarInfo(RadarInfo),
    ScanSegment(ScanSegment),
    TsProcessing(TsProcessing),
    XmitPower(XmitPower),
    EventNotice(EventNotice),
    StatusXml(StatusXml),
    AntennaAngles(AntennaAngles),
    /// Known packet the relay forwards without interpreting.
    Opaque(PacketId),
}

impl Payload {
    pub fn decode(packet: &Packet) -> Result<Self, ParseError> {
        let payload = match packet.id {
            PacketId::PulseHeader => Payload::Pulse(PulseRecord::decode(packet)?),
            PacketId::RadarInfo => Payload::RadarInfo(RadarInfo::decode(packet)?),
            PacketId::ScanSegment => Payload::ScanSegment(ScanSegment::decode(packet)?),
            PacketId::TsProcessing => Payload::TsProcessing(TsProcessing::decode(packet)?),
            PacketId::XmitPower => Payload::XmitPower(XmitPower::decode(packet)?),
            PacketId::EventNotice => Payload::EventNotice(EventNotice::decode(packet)?),
            PacketId::StatusXml => Payload::StatusXml(StatusXml::decode(packet)?),
            PacketId::AntennaAngles => Payload::AntennaAngles(AntennaAngles::decode(packet)?),
            other => Payload::Opaque(other),
        };
        Ok(payload)
    }
}
