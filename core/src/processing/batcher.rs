use log::{debug, warn};

use crate::protocol::Packet;
use crate::transport::{
    with_retries, MessageParts, MessageQueue, QueueError, MAX_WRITE_ATTEMPTS, MULTIPART_MSG_TYPE,
};

pub struct OutputBatcher {
    parts: MessageParts,
    queue: Box<dyn MessageQueue>,
    threshold: usize,
}

impl OutputBatcher {
    pub fn new(queue: Box<dyn MessageQueue>, threshold: usize) -> Self {
        Self {
            parts: MessageParts::new(),
            queue,
            threshold: threshold.max(1),
        }
    }

    pub fn pending(&self) -> usize {
        self.parts.len()
    }

    pub fn enqueue(&mut self, packet: Packet) {
        self.parts.add_packet(packet);
    }

    /// Writes the batch once it reaches the threshold, or now if `force`.
    /// Returns the number of packets written. A write that still fails after
    /// `MAX_WRITE_ATTEMPTS` drops the batch.
    pub fn maybe_flush(&mut self, force: bool) -> Result<usize, QueueError> {
        if self.parts.is_empty() || (!force && self.parts.len() < self.threshold) {
            return Ok(0);
        }
        let n_parts = self.parts.len();
        let message = self.parts.assemble();
        self.parts.clear();
        let queue = &mut self.queue;
        match with_retries(MAX_WRITE_ATTEMPTS, |_| queue.write(MULTIPART_MSG_TYPE, &message)) {
            Ok(()) => {
                debug!("flushed {} packets ({} bytes)", n_parts, message.len());
                Ok(n_parts)
            }
            Err(err) => {
                warn!("dropping batch of {} packets: {}", n_parts, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PacketId, PacketInfo, XmitPower};
    use crate::transport::MemoryQueue;

    fn packet(seq: i64) -> Packet {
        let mut info = PacketInfo::new(PacketId::XmitPower, 0);
        info.seq_num = seq;
        XmitPower {
            info,
            power_dbm_h: 80.0,
            power_dbm_v: 79.0,
        }
        .to_packet()
    }

    #[test]
    fn flushes_at_threshold() {
        let output = MemoryQueue::new();
        let mut batcher = OutputBatcher::new(Box::new(output.clone()), 3);
        for seq in 0..2 {
            batcher.enqueue(packet(seq));
            assert_eq!(batcher.maybe_flush(false).unwrap(), 0);
        }
        batcher.enqueue(packet(2));
        assert_eq!(batcher.maybe_flush(false).unwrap(), 3);
        assert_eq!(batcher.pending(), 0);

        let messages = output.drain();
        assert_eq!(messages.len(), 1);
        let parts = MessageParts::disassemble(&messages[0].bytes).unwrap();
        let seqs: Vec<i64> = parts
            .parts()
            .iter()
            .map(|part| Packet::from_bytes(part.bytes.clone()).unwrap().info.seq_num)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn forced_flush_of_empty_batch_writes_nothing() {
        let output = MemoryQueue::new();
        let mut batcher = OutputBatcher::new(Box::new(output.clone()), 10);
        assert_eq!(batcher.maybe_flush(true).unwrap(), 0);
        assert!(output.is_empty());

        batcher.enqueue(packet(1));
        assert_eq!(batcher.maybe_flush(true).unwrap(), 1);
        assert_eq!(output.len(), 1);
    }

    #[test]
    fn failed_write_drops_the_batch() {
        let output = MemoryQueue::new();
        output.set_fail_writes(true);
        let mut batcher = OutputBatcher::new(Box::new(output.clone()), 1);
        batcher.enqueue(packet(1));
        assert!(batcher.maybe_flush(false).is_err());
        assert_eq!(batcher.pending(), 0);
    }
}
