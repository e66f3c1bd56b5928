use std::io::{self, ErrorKind, Read};

use log::debug;
use thiserror::Error;

use crate::protocol::packet::{Packet, PacketId, PacketInfo};
use crate::protocol::ParseError;

/// Consecutive corrupt or unknown packets tolerated before the stream is
/// considered out of sync.
pub const MAX_BAD_PACKETS: usize = 1000;

pub const MAX_PACKET_LEN: usize = 1_000_000;

/// Timeouts tolerated in the middle of a packet before giving up on it.
const MAX_PARTIAL_TIMEOUTS: usize = 10;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("timed out waiting for data")]
    TimedOut,

    #[error("stream closed")]
    Closed,

    #[error("stream ended after {read} of {expected} bytes")]
    Truncated { expected: usize, read: usize },

    /// Packet was skipped because its id is unknown or its length does not
    /// suit its type
    #[error("skipped unknown packet id {id:#010x}, len {len}")]
    UnknownType { id: i32, len: usize },

    #[error("bad packet length {len} for id {id:#010x}")]
    BadLength { id: i32, len: i32 },

    #[error("{0} consecutive bad packets, stream out of sync")]
    TooManyBadPackets(usize),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Skip-and-retry conditions. Everything else ends the current connection.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            FrameError::UnknownType { .. } | FrameError::BadLength { .. } | FrameError::Parse(_)
        )
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

pub struct PacketFramer<R> {
    reader: R,
    bad_packets: usize,
}

impl<R: Read> PacketFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            bad_packets: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub fn bad_packets(&self) -> usize {
        self.bad_packets
    }

    /// Reads the next packet.
    ///
    /// `TimedOut`, `UnknownType` and `BadLength` are non-fatal: call again.
    pub fn read_packet(&mut self) -> Result<Packet, FrameError> {
        let mut top = [0u8; PacketInfo::TOP_SIZE];
        match self.fill(&mut top, true)? {
            0 => return Err(FrameError::Closed),
            n if n < top.len() => {
                return Err(FrameError::Truncated {
                    expected: top.len(),
                    read: n,
                })
            }
            _ => {}
        }

        let id = i32::from_le_bytes([top[0], top[1], top[2], top[3]]);
        let len = i32::from_le_bytes([top[4], top[5], top[6], top[7]]);

        if len < PacketInfo::SIZE as i32 || len as usize >= MAX_PACKET_LEN {
            debug!("bad packet length {} (0x{:x}), id 0x{:x}", len, len, id);
            self.count_bad()?;
            return Err(FrameError::BadLength { id, len });
        }

        let len = len as usize;
        let mut bytes = vec![0u8; len];
        bytes[..top.len()].copy_from_slice(&top);
        let read = self.fill(&mut bytes[top.len()..], false)?;
        if read < len - top.len() {
            return Err(FrameError::Truncated {
                expected: len,
                read: top.len() + read,
            });
        }

        let known = PacketId::from_i32(id).filter(|id| id.fixed_len().map_or(true, |min| len >= min));
        if known.is_none() {
            debug!("skipping unknown packet id 0x{:x}, len {}", id, len);
            self.count_bad()?;
            return Err(FrameError::UnknownType { id, len });
        }

        let packet = Packet::from_bytes(bytes)?;
        self.bad_packets = 0;
        Ok(packet)
    }

    fn count_bad(&mut self) -> Result<(), FrameError> {
        self.bad_packets += 1;
        if self.bad_packets > MAX_BAD_PACKETS {
            let count = self.bad_packets;
            self.bad_packets = 0;
            return Err(FrameError::TooManyBadPackets(count));
        }
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8], at_boundary: bool) -> Result<usize, FrameError> {
        let mut filled = 0;
        let mut timeouts = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    timeouts = 0;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if is_timeout(&err) => {
                    if at_boundary && filled == 0 {
                        return Err(FrameError::TimedOut);
                    }
                    timeouts += 1;
                    if timeouts > MAX_PARTIAL_TIMEOUTS {
                        return Err(FrameError::Io(err));
                    }
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(filled)
    }
}
