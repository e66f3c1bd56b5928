pub mod message;
pub mod queue;
pub mod retry;
pub mod source;
pub mod tcp;

use std::io::Read;

pub use message::{MessagePart, MessageParts, MULTIPART_MSG_TYPE};
pub use queue::{FileQueue, MemoryQueue, MessageQueue, QueueError, QueueMessage, QueuePosition};
pub use retry::{with_retries, MAX_WRITE_ATTEMPTS};
pub use source::QueuePacketSource;
pub use tcp::{TcpPacketSource, TcpSettings};

use crate::prelude::Heartbeat;
use crate::protocol::{FrameError, Packet, PacketFramer};

pub trait PacketSource {
    /// Next packet. `TimedOut` and skippable errors are non-fatal; `Closed`
    /// means the source is exhausted.
    fn next_packet(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Packet, FrameError>;
}

impl<R: Read> PacketSource for PacketFramer<R> {
    fn next_packet(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Packet, FrameError> {
        heartbeat.beat("reading packet");
        self.read_packet()
    }
}
