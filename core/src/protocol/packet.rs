use serde::{Deserialize, Serialize};

use crate::protocol::codec::{FieldReader, FieldWriter};
use crate::protocol::ParseError;

/// Known packet types. Values follow the IWRF numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketId {
    Sync,
    RadarInfo,
    ScanSegment,
    AntennaCorrection,
    TsProcessing,
    XmitPower,
    XmitSample,
    Calibration,
    EventNotice,
    PhaseCode,
    XmitInfo,
    PulseHeader,
    Version,
    UiOperations,
    AntControlConstants,
    XmitSampleV2,
    BurstHeader,
    StatusXml,
    AntennaAngles,
    RxPower,
    PlatformGeoref,
    GeorefCorrection,
}

impl PacketId {
    pub fn from_i32(value: i32) -> Option<Self> {
        let id = match value as u32 {
            0x7777_0001 => PacketId::Sync,
            0x7777_0002 => PacketId::RadarInfo,
            0x7777_0003 => PacketId::ScanSegment,
            0x7777_0004 => PacketId::AntennaCorrection,
            0x7777_0005 => PacketId::TsProcessing,
            0x7777_0006 => PacketId::XmitPower,
            0x7777_0007 => PacketId::XmitSample,
            0x7777_0008 => PacketId::Calibration,
            0x7777_0009 => PacketId::EventNotice,
            0x7777_000a => PacketId::PhaseCode,
            0x7777_000b => PacketId::XmitInfo,
            0x7777_000c => PacketId::PulseHeader,
            0x7777_000d => PacketId::Version,
            0x7777_000e => PacketId::UiOperations,
            0x7777_000f => PacketId::AntControlConstants,
            0x7777_0010 => PacketId::XmitSampleV2,
            0x7777_0011 => PacketId::BurstHeader,
            0x7777_0012 => PacketId::StatusXml,
            0x7777_0013 => PacketId::AntennaAngles,
            0x7777_0014 => PacketId::RxPower,
            0x7777_0111 => PacketId::PlatformGeoref,
            0x7777_0112 => PacketId::GeorefCorrection,
            _ => return None,
        };
        Some(id)
    }

    pub fn as_i32(self) -> i32 {
        let raw: u32 = match self {
            PacketId::Sync => 0x7777_0001,
            PacketId::RadarInfo => 0x7777_0002,
            PacketId::ScanSegment => 0x7777_0003,
            PacketId::AntennaCorrection => 0x7777_0004,
            PacketId::TsProcessing => 0x7777_0005,
            PacketId::XmitPower => 0x7777_0006,
            PacketId::XmitSample => 0x7777_0007,
            PacketId::Calibration => 0x7777_0008,
            PacketId::EventNotice => 0x7777_0009,
            PacketId::PhaseCode => 0x7777_000a,
            PacketId::XmitInfo => 0x7777_000b,
            PacketId::PulseHeader => 0x7777_000c,
            PacketId::Version => 0x7777_000d,
            PacketId::UiOperations => 0x7777_000e,
            PacketId::AntControlConstants => 0x7777_000f,
            PacketId::XmitSampleV2 => 0x7777_0010,
            PacketId::BurstHeader => 0x7777_0011,
            PacketId::StatusXml => 0x7777_0012,
            PacketId::AntennaAngles => 0x7777_0013,
            PacketId::RxPower => 0x7777_0014,
            PacketId::PlatformGeoref => 0x7777_0111,
            PacketId::GeorefCorrection => 0x7777_0112,
        };
        raw as i32
    }

    pub fn fixed_len(self) -> Option<usize> {
        let payload = match self {
            PacketId::RadarInfo => 100,
            PacketId::ScanSegment => 140,
            PacketId::TsProcessing => 76,
            PacketId::XmitPower => 8,
            PacketId::EventNotice => 44,
            PacketId::AntennaAngles => 8,
            _ => return None,
        };
        Some(PacketInfo::SIZE + payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanMode {
    #[default]
    NotSet,
    Sector,
    Coplane,
    Rhi,
    VerticalPointing,
    Idle,
    AzSur360,
    ElSur360,
    Sunscan,
    Pointing,
    FollowVehicle,
    ElSurv,
    ManPpi,
    ManRhi,
    SunscanRhi,
    Other(i32),
}

impl ScanMode {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => ScanMode::NotSet,
            1 => ScanMode::Sector,
            2 => ScanMode::Coplane,
            3 => ScanMode::Rhi,
            4 => ScanMode::VerticalPointing,
            7 => ScanMode::Idle,
            8 => ScanMode::AzSur360,
            9 => ScanMode::ElSur360,
            11 => ScanMode::Sunscan,
            12 => ScanMode::Pointing,
            13 => ScanMode::FollowVehicle,
            14 => ScanMode::ElSurv,
            15 => ScanMode::ManPpi,
            16 => ScanMode::ManRhi,
            17 => ScanMode::SunscanRhi,
            other => ScanMode::Other(other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            ScanMode::NotSet => 0,
            ScanMode::Sector => 1,
            ScanMode::Coplane => 2,
            ScanMode::Rhi => 3,
            ScanMode::VerticalPointing => 4,
            ScanMode::Idle => 7,
            ScanMode::AzSur360 => 8,
            ScanMode::ElSur360 => 9,
            ScanMode::Sunscan => 11,
            ScanMode::Pointing => 12,
            ScanMode::FollowVehicle => 13,
            ScanMode::ElSurv => 14,
            ScanMode::ManPpi => 15,
            ScanMode::ManRhi => 16,
            ScanMode::SunscanRhi => 17,
            ScanMode::Other(other) => other,
        }
    }

    /// Fixed angle is an azimuth in these modes, an elevation otherwise.
    pub fn is_rhi(self) -> bool {
        matches!(self, ScanMode::Rhi | ScanMode::ManRhi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PacketInfo {
    pub id: i32,
    pub len_bytes: i32,
    pub seq_num: i64,
    pub version: i32,
    pub time_secs_utc: i64,
    pub time_nano_secs: i32,
}

impl PacketInfo {
    pub const SIZE: usize = 32;
    /// Bytes needed to learn the id and length of a packet.
    pub const TOP_SIZE: usize = 8;

    pub fn new(id: PacketId, len_bytes: usize) -> Self {
        Self {
            id: id.as_i32(),
            len_bytes: len_bytes as i32,
            ..Default::default()
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = FieldReader::new(buf);
        Ok(Self {
            id: reader.i32()?,
            len_bytes: reader.i32()?,
            seq_num: reader.i64()?,
            version: reader.i32()?,
            time_secs_utc: reader.i64()?,
            time_nano_secs: reader.i32()?,
        })
    }

    pub(crate) fn write(&self, writer: &mut FieldWriter) {
        writer
            .i32(self.id)
            .i32(self.len_bytes)
            .i64(self.seq_num)
            .i32(self.version)
            .i64(self.time_secs_utc)
            .i32(self.time_nano_secs);
    }

    pub fn time(&self) -> f64 {
        self.time_secs_utc as f64 + self.time_nano_secs as f64 / 1.0e9
    }

    /// Packet time relative to `base_secs`, keeping sub-microsecond precision.
    pub fn time_since(&self, base_secs: i64) -> f64 {
        self.time_secs_utc.saturating_sub(base_secs) as f64 + self.time_nano_secs as f64 / 1.0e9
    }

    pub fn set_time(&mut self, time: f64) {
        let secs = time.floor();
        let mut nanos = ((time - secs) * 1.0e9).round() as i32;
        let mut secs = secs as i64;
        if nanos >= 1_000_000_000 {
            secs += 1;
            nanos -= 1_000_000_000;
        }
        self.time_secs_utc = secs;
        self.time_nano_secs = nanos;
    }
}

/// One framed packet: the decoded header plus the complete raw buffer,
/// header included.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub id: PacketId,
    pub info: PacketInfo,
    bytes: Vec<u8>,
}

impl Packet {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ParseError> {
        let info = PacketInfo::decode(&bytes)?;
        let id = PacketId::from_i32(info.id).ok_or(ParseError::UnknownPacketId(info.id))?;
        if info.len_bytes < 0 || info.len_bytes as usize != bytes.len() {
            return Err(ParseError::LengthMismatch {
                header_len: info.len_bytes.max(0) as usize,
                actual_len: bytes.len(),
            });
        }
        Ok(Self { id, info, bytes })
    }

    pub(crate) fn from_parts(id: PacketId, info: PacketInfo, bytes: Vec<u8>) -> Self {
        Self { id, info, bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn time(&self) -> f64 {
        self.info.time()
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[PacketInfo::SIZE.min(self.bytes.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_ids_map_both_ways() {
        for raw in (0x7777_0001u32..=0x7777_0014).chain([0x7777_0111, 0x7777_0112]) {
            let id = PacketId::from_i32(raw as i32).unwrap();
            assert_eq!(id.as_i32() as u32, raw);
        }
        assert!(PacketId::from_i32(0x7777_0015).is_none());
        assert!(PacketId::from_i32(0).is_none());
    }

    #[test]
    fn set_time_carries_rounded_nanoseconds() {
        let mut info = PacketInfo::default();
        info.set_time(1_700_000_000.999_999_999_9);
        assert_eq!(info.time_secs_utc, 1_700_000_001);
        assert_eq!(info.time_nano_secs, 0);

        info.set_time(12.25);
        assert_eq!(info.time_secs_utc, 12);
        assert_eq!(info.time_nano_secs, 250_000_000);
    }

    #[test]
    fn time_since_survives_corrupt_seconds() {
        let info = PacketInfo {
            time_secs_utc: i64::MIN,
            ..Default::default()
        };
        assert!(info.time_since(i64::MAX) < -9.0e18);

        let info = PacketInfo {
            time_secs_utc: 100,
            time_nano_secs: 500_000_000,
            ..Default::default()
        };
        assert_eq!(info.time_since(99), 1.5);
    }

    #[test]
    fn from_bytes_rejects_length_mismatch() {
        let mut writer = FieldWriter::default();
        PacketInfo::new(PacketId::Sync, 40).write(&mut writer);
        let err = Packet::from_bytes(writer.into_inner()).unwrap_err();
        assert_eq!(
            err,
            ParseError::LengthMismatch {
                header_len: 40,
                actual_len: 32
            }
        );
    }
}
