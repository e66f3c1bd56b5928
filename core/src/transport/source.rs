use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::time::Duration;

use log::debug;

use crate::prelude::Heartbeat;
use crate::protocol::{FrameError, Packet, ParseError};
use crate::transport::{MessagePart, MessageParts, MessageQueue, QueueError};

pub struct QueuePacketSource {
    queue: Box<dyn MessageQueue>,
    pending: VecDeque<MessagePart>,
    timeout: Duration,
}

impl QueuePacketSource {
    pub fn new(queue: Box<dyn MessageQueue>, timeout: Duration) -> Self {
        Self {
            queue,
            pending: VecDeque::new(),
            timeout,
        }
    }
}

impl crate::transport::PacketSource for QueuePacketSource {
    fn next_packet(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Packet, FrameError> {
        while self.pending.is_empty() {
            heartbeat.beat("reading input queue");
            let message = self.queue.read_blocking(self.timeout).map_err(|err| match err {
                QueueError::Corrupt(_) => FrameError::Parse(ParseError::InvalidPacket(err.to_string())),
                other => FrameError::Io(io::Error::new(ErrorKind::Other, other.to_string())),
            })?;
            let Some(message) = message else {
                return Err(FrameError::TimedOut);
            };
            match MessageParts::disassemble(&message.bytes) {
                Ok(parts) => self.pending.extend(parts.into_parts()),
                Err(err) => {
                    debug!("dropping input message: {}", err);
                    return Err(FrameError::Parse(ParseError::InvalidPacket(err.to_string())));
                }
            }
        }

        let Some(part) = self.pending.pop_front() else {
            return Err(FrameError::TimedOut);
        };
        let len = part.bytes.len();
        Packet::from_bytes(part.bytes).map_err(|err| match err {
            ParseError::UnknownPacketId(id) => FrameError::UnknownType { id, len },
            other => FrameError::Parse(other),
        })
    }
}
