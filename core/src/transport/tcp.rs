use std::io::{self, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::prelude::{pause, Heartbeat, SystemClock};
use crate::protocol::{FrameError, Packet, PacketFramer};
use crate::telemetry::RateLimitedLog;
use crate::transport::PacketSource;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 12000,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 1_000,
        }
    }
}

/// Reconnecting packet source. Connection failures are reported as timeouts
/// so the caller keeps doing its housekeeping while the server is away.
pub struct TcpPacketSource {
    settings: TcpSettings,
    framer: Option<PacketFramer<TcpStream>>,
    backoff: Duration,
    shutdown: Arc<AtomicBool>,
    log: RateLimitedLog,
}

impl TcpPacketSource {
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            settings,
            framer: None,
            backoff: MIN_BACKOFF,
            shutdown: Arc::new(AtomicBool::new(false)),
            log: RateLimitedLog::default(),
        }
    }

    /// Cuts reconnect waits short once `shutdown` is raised.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.framer.is_some()
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let addrs = (self.settings.host.as_str(), self.settings.port).to_socket_addrs()?;
        let timeout = Duration::from_millis(self.settings.connect_timeout_ms.max(1));
        let mut last_err = io::Error::new(ErrorKind::NotFound, "host resolved to no addresses");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    let read_timeout = Duration::from_millis(self.settings.read_timeout_ms.max(1));
                    stream.set_read_timeout(Some(read_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    fn next_backoff(current: Duration) -> Duration {
        (current * 2).min(MAX_BACKOFF)
    }
}

impl PacketSource for TcpPacketSource {
    fn next_packet(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Packet, FrameError> {
        if self.framer.is_none() {
            heartbeat.beat("connecting to pulse server");
            match self.connect() {
                Ok(stream) => {
                    info!(
                        "connected to pulse server {}:{}",
                        self.settings.host, self.settings.port
                    );
                    self.backoff = MIN_BACKOFF;
                    self.framer = Some(PacketFramer::new(stream));
                }
                Err(err) => {
                    self.log.warn(
                        "tcp connect",
                        &format!(
                            "cannot connect to {}:{}: {}, retrying in {:?}",
                            self.settings.host, self.settings.port, err, self.backoff
                        ),
                    );
                    pause(&SystemClock, self.backoff, &self.shutdown, heartbeat);
                    self.backoff = Self::next_backoff(self.backoff);
                    return Err(FrameError::TimedOut);
                }
            }
        }

        let Some(framer) = self.framer.as_mut() else {
            return Err(FrameError::TimedOut);
        };
        heartbeat.beat("reading pulse server");
        match framer.read_packet() {
            Ok(packet) => Ok(packet),
            Err(err @ FrameError::TimedOut) => Err(err),
            Err(err) if err.is_skippable() => Err(err),
            Err(FrameError::Closed) => {
                self.framer = None;
                Err(FrameError::Io(io::Error::new(
                    ErrorKind::ConnectionAborted,
                    "pulse server closed the connection",
                )))
            }
            Err(err) => {
                // resync by reconnecting
                self.framer = None;
                Err(err)
            }
        }
    }
}
