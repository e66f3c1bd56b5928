use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::{InputMode, WorkflowConfig};
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Relays framed radar pulse streams to an output queue")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    input: Option<InputMode>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    input_queue: Option<PathBuf>,
    #[arg(long)]
    output_queue: Option<PathBuf>,
    #[arg(long)]
    pulses_per_message: Option<usize>,
    /// Number of pulses to generate in synthetic mode
    #[arg(long)]
    synthetic_pulses: Option<usize>,
    /// Append the end-of-run statistics to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut WorkflowConfig) {
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(host) = &self.host {
            config.tcp.host = host.clone();
        }
        if let Some(port) = self.port {
            config.tcp.port = port;
        }
        if let Some(path) = &self.input_queue {
            config.input_queue = Some(path.clone());
        }
        if let Some(path) = &self.output_queue {
            config.output_queue = path.clone();
        }
        if let Some(n) = self.pulses_per_message {
            config.relay.n_pulses_per_message = n;
        }
        if let Some(n) = self.synthetic_pulses {
            config.generator.n_pulses = n;
        }
    }
}

/// Raises `shutdown` on Ctrl+C, from a thread of its own.
fn watch_ctrl_c(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let result = runtime.block_on(signal::ctrl_c());
            match result {
                Ok(()) => info!("Ctrl+C received, stopping"),
                Err(ref err) => warn!("cannot wait for Ctrl+C: {}", err),
            }
            if result.is_ok() {
                shutdown.store(true, Ordering::Relaxed);
            }
        })
        .context("spawning signal thread")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = if let Some(path) = &args.config {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::default()
    };
    args.apply(&mut workflow_config);

    let shutdown = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(shutdown.clone())?;

    let runner = Runner::new(workflow_config);
    let stats = runner.execute(&shutdown)?;

    let report = serde_json::to_string(&stats).context("serializing relay statistics")?;
    info!("relay statistics: {}", report);
    if let Some(report_path) = args.report {
        if let Some(parent) = report_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&report_path)
            .with_context(|| format!("opening report {}", report_path.display()))?;
        writeln!(file, "{}", report)?;
    }

    Ok(())
}
