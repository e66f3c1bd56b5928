use anyhow::Context;
use clap::ValueEnum;
use relaycore::transport::TcpSettings;
use relaycore::RelayConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::generator::profile::GeneratorConfig;

/// Where the primary pulse stream comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Tcp,
    Queue,
    Synthetic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub input: InputMode,
    pub tcp: TcpSettings,
    pub input_queue: Option<PathBuf>,
    /// Start a queue input at its oldest record instead of waiting for new ones.
    pub read_input_from_start: bool,
    pub input_timeout_ms: u64,
    pub output_queue: PathBuf,
    pub angle_queue: Option<PathBuf>,
    pub scan_control_queue: Option<PathBuf>,
    pub secondary_status_queue: Option<PathBuf>,
    pub generator: GeneratorConfig,
    pub relay: RelayConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            input: InputMode::Tcp,
            tcp: TcpSettings::default(),
            input_queue: None,
            read_input_from_start: false,
            input_timeout_ms: 1_000,
            output_queue: PathBuf::from("data/relay/output.fmq"),
            angle_queue: None,
            scan_control_queue: None,
            secondary_status_queue: None,
            generator: GeneratorConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Checks that the chosen input and enabled merges have their queues.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input == InputMode::Queue && self.input_queue.is_none() {
            anyhow::bail!("queue input selected but input_queue is not set");
        }
        if self.relay.reads_angles() && self.angle_queue.is_none() {
            anyhow::bail!("angle merging or checking is enabled but angle_queue is not set");
        }
        if self.relay.merge_scan_control && self.scan_control_queue.is_none() {
            anyhow::bail!("merge_scan_control is enabled but scan_control_queue is not set");
        }
        if self.relay.merge_secondary_status && self.secondary_status_queue.is_none() {
            anyhow::bail!("merge_secondary_status is enabled but secondary_status_queue is not set");
        }
        Ok(())
    }
}
