pub(crate) mod codec;
pub mod framer;
pub mod packet;
pub mod payload;

pub use framer::{FrameError, PacketFramer, MAX_BAD_PACKETS};
pub use packet::{Packet, PacketId, PacketInfo, ScanMode};
pub use payload::{
    AntennaAngles, EventNotice, IqEncoding, Payload, PulseHeader, PulseRecord, RadarInfo,
    ScanSegment, StatusXml, TsProcessing, XmitPower,
};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("length mismatch: header says {header_len} bytes, packet has {actual_len}")]
    LengthMismatch { header_len: usize, actual_len: usize },

    #[error("unknown packet id: {0:#010x}")]
    UnknownPacketId(i32),

    #[error("expected {expected:?} packet, got {actual:?}")]
    WrongType { expected: PacketId, actual: PacketId },

    #[error("invalid string encoding")]
    InvalidString,

    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}
