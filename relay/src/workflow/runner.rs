use crate::generator::profile::build_stream;
use crate::workflow::config::{InputMode, WorkflowConfig};
use anyhow::Context;
use log::{info, trace};
use relaycore::protocol::PacketFramer;
use relaycore::transport::{
    FileQueue, MessageQueue, PacketSource, QueuePacketSource, QueuePosition, TcpPacketSource,
};
use relaycore::{RelayEngine, RelayStats};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

fn open_reader(path: &Path, position: QueuePosition) -> anyhow::Result<Box<dyn MessageQueue>> {
    let queue = FileQueue::open_reader(path, position)
        .with_context(|| format!("opening queue {}", path.display()))?;
    Ok(Box::new(queue))
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    fn source(&self, shutdown: &Arc<AtomicBool>) -> anyhow::Result<Box<dyn PacketSource>> {
        let source: Box<dyn PacketSource> = match self.config.input {
            InputMode::Tcp => {
                info!(
                    "reading pulses from {}:{}",
                    self.config.tcp.host, self.config.tcp.port
                );
                Box::new(TcpPacketSource::new(self.config.tcp.clone()).with_shutdown(shutdown.clone()))
            }
            InputMode::Queue => {
                let path = self
                    .config
                    .input_queue
                    .as_deref()
                    .context("queue input selected but input_queue is not set")?;
                let position = if self.config.read_input_from_start {
                    QueuePosition::Start
                } else {
                    QueuePosition::End
                };
                info!("reading pulses from queue {}", path.display());
                Box::new(QueuePacketSource::new(
                    open_reader(path, position)?,
                    Duration::from_millis(self.config.input_timeout_ms),
                ))
            }
            InputMode::Synthetic => {
                let stream = build_stream(&self.config.generator)
                    .context("building synthetic pulse stream")?;
                info!(
                    "relaying {} synthetic pulses ({} bytes)",
                    self.config.generator.n_pulses,
                    stream.len()
                );
                Box::new(PacketFramer::new(Cursor::new(stream)))
            }
        };
        Ok(source)
    }

    /// Wires the queues to a new engine and relays until the input ends or
    /// `shutdown` is raised.
    pub fn execute(&self, shutdown: &Arc<AtomicBool>) -> anyhow::Result<RelayStats> {
        self.config.validate()?;

        let output = FileQueue::open_writer(&self.config.output_queue)
            .with_context(|| format!("opening output queue {}", self.config.output_queue.display()))?;
        let mut builder = RelayEngine::builder(self.config.relay.clone(), Box::new(output))
            .heartbeat(Box::new(|label: &str| trace!("heartbeat: {}", label)));
        if let Some(path) = &self.config.angle_queue {
            builder = builder.angle_queue(open_reader(path, QueuePosition::End)?);
        }
        if let Some(path) = &self.config.scan_control_queue {
            builder = builder.scan_control_queue(open_reader(path, QueuePosition::End)?);
        }
        if let Some(path) = &self.config.secondary_status_queue {
            builder = builder.secondary_status_queue(open_reader(path, QueuePosition::End)?);
        }
        let mut engine = builder.build().context("setting up relay engine")?;

        let mut source = self.source(shutdown)?;
        Ok(engine.run(source.as_mut(), shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::GeneratorConfig;
    use relaycore::protocol::{Packet, PacketId};
    use relaycore::transport::MessageParts;
    use tempfile::tempdir;

    #[test]
    fn runner_relays_synthetic_stream_to_output_queue() {
        let dir = tempdir().unwrap();
        let mut cfg = WorkflowConfig {
            input: InputMode::Synthetic,
            output_queue: dir.path().join("out.fmq"),
            generator: GeneratorConfig {
                n_pulses: 45,
                n_gates: 32,
                test_pulse_gate: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.relay.n_pulses_per_message = 10;
        cfg.relay.monitor_test_pulse = true;
        cfg.relay.test_pulse_n_samples = 20;

        let stats = Runner::new(cfg.clone())
            .execute(&Arc::new(AtomicBool::new(false)))
            .unwrap();
        assert_eq!(stats.pulses, 45);
        assert_eq!(stats.packets_out, 47);

        let mut reader = FileQueue::open_reader(&cfg.output_queue, QueuePosition::Start).unwrap();
        let mut ids = Vec::new();
        while let Some(message) = reader.read().unwrap() {
            for part in MessageParts::disassemble(&message.bytes).unwrap().into_parts() {
                ids.push(Packet::from_bytes(part.bytes).unwrap().id);
            }
        }
        assert_eq!(ids.len(), 47);
        assert_eq!(ids[0], PacketId::RadarInfo);
        assert_eq!(ids.iter().filter(|id| **id == PacketId::PulseHeader).count(), 45);
    }

    #[test]
    fn queue_input_without_path_is_rejected() {
        let dir = tempdir().unwrap();
        let cfg = WorkflowConfig {
            input: InputMode::Queue,
            output_queue: dir.path().join("out.fmq"),
            ..Default::default()
        };
        assert!(Runner::new(cfg).execute(&Arc::new(AtomicBool::new(false))).is_err());
    }
}
