use crate::protocol::Packet;
use crate::transport::QueueError;

/// Message type used when writing multi-part containers to a queue.
pub const MULTIPART_MSG_TYPE: i32 = 0;

const PART_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePart {
    pub part_type: i32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageParts {
    parts: Vec<MessagePart>,
}

impl MessageParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, part_type: i32, bytes: Vec<u8>) {
        self.parts.push(MessagePart { part_type, bytes });
    }

    pub fn add_packet(&mut self, packet: Packet) {
        let part_type = packet.info.id;
        self.add(part_type, packet.into_bytes());
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<MessagePart> {
        self.parts
    }

    /// Serialises as `n_parts:u32` then `part_type:i32, part_len:u32, bytes` per part.
    pub fn assemble(&self) -> Vec<u8> {
        let total: usize = self
            .parts
            .iter()
            .map(|part| PART_HEADER_LEN + part.bytes.len())
            .sum();
        let mut out = Vec::with_capacity(4 + total);
        out.extend_from_slice(&(self.parts.len() as u32).to_le_bytes());
        for part in &self.parts {
            out.extend_from_slice(&part.part_type.to_le_bytes());
            out.extend_from_slice(&(part.bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&part.bytes);
        }
        out
    }

    pub fn disassemble(buf: &[u8]) -> Result<Self, QueueError> {
        let n_parts = read_u32(buf, 0)? as usize;
        let mut pos = 4;
        // every part needs at least its header
        if n_parts > (buf.len() - pos) / PART_HEADER_LEN {
            return Err(QueueError::Malformed(format!(
                "{} parts declared in {} bytes",
                n_parts,
                buf.len()
            )));
        }
        let mut parts = Vec::with_capacity(n_parts);
        for index in 0..n_parts {
            let part_type = read_u32(buf, pos)? as i32;
            let len = read_u32(buf, pos + 4)? as usize;
            pos += PART_HEADER_LEN;
            let bytes = buf.get(pos..pos + len).ok_or_else(|| {
                QueueError::Malformed(format!(
                    "part {} needs {} bytes, {} remain",
                    index,
                    len,
                    buf.len() - pos
                ))
            })?;
            parts.push(MessagePart {
                part_type,
                bytes: bytes.to_vec(),
            });
            pos += len;
        }
        Ok(Self { parts })
    }
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32, QueueError> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| QueueError::Malformed(format!("container truncated at byte {}", pos)))
}
