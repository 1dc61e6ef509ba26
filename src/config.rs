//! # Configuration Management
//!
//! Loads relay configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with RELAY_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `CMD_ENDPOINT`, `STREAM_ENDPOINT` and `RELAY_TOKEN`
//! 2. Environment variables (`RELAY_ENDPOINTS__CMD_ENDPOINT`, `RELAY_PLAYBACK__BATCH_SIZE`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::error::{RelayError, RelayResult};
use crate::queue::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main relay configuration, grouped by component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub endpoints: EndpointsConfig,
    pub control: ControlConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub queues: QueuesConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

/// Remote endpoints and the bearer credential used on both connections.
///
/// ## Fields:
/// - `cmd_endpoint`: websocket URL of the command-and-control server
/// - `stream_endpoint`: websocket URL of the binary audio stream
/// - `token`: sent as `Authorization: Bearer <token>` when each connection is opened.
///   This is the transport credential, not the session key issued by the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub cmd_endpoint: String,
    pub stream_endpoint: String,
    pub token: String,
}

/// Control channel timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// One command record leaves the control queue per tick
    pub send_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Maximum wait for the `hello` message after the connection opens
    pub handshake_timeout_ms: u64,
    /// Command that opens the readiness gate instead of being transmitted
    pub ready_sentinel: String,
}

/// Audio channel timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Poll interval while waiting for the readiness gate and session key
    pub gate_poll_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Playback pacer knobs.
///
/// ## Fields:
/// - `batch_size`: frames coalesced before a burst to the voice sink
/// - `idle_wait_ms`: longest sleep while the frame queue is empty
/// - `flush_after_ms`: flush a partial batch once no frame arrived for this long (0 disables)
/// - `sink_path`: where the binary dumps frames; no path means frames are discarded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub batch_size: usize,
    pub idle_wait_ms: u64,
    pub flush_after_ms: u64,
    pub sink_path: Option<String>,
}

/// Capacity and overflow policy of one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuesConfig {
    pub frames: QueueConfig,
    pub control: QueueConfig,
    pub responses: QueueConfig,
}

/// Restart policy applied when a channel terminates.
///
/// With `restart = false` a terminated channel stops the whole process and
/// recovery is left to whatever manages the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub restart: bool,
    pub max_restarts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Seconds between relay statistics log lines (0 disables)
    pub stats_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig {
                cmd_endpoint: "ws://127.0.0.1:8080/cmd".to_string(),
                stream_endpoint: "ws://127.0.0.1:8080/stream".to_string(),
                token: String::new(), // must be provided
            },
            control: ControlConfig {
                send_interval_ms: 500,
                connect_timeout_ms: 10_000,
                handshake_timeout_ms: 10_000,
                ready_sentinel: "discord ready".to_string(),
            },
            audio: AudioConfig {
                gate_poll_ms: 500,
                connect_timeout_ms: 10_000,
            },
            playback: PlaybackConfig {
                batch_size: 10,
                idle_wait_ms: 10,
                flush_after_ms: 200,
                sink_path: None,
            },
            queues: QueuesConfig {
                // ~10s of 20ms opus frames
                frames: QueueConfig { capacity: 500, overflow: OverflowPolicy::DropOldest },
                control: QueueConfig { capacity: 64, overflow: OverflowPolicy::Block },
                responses: QueueConfig { capacity: 256, overflow: OverflowPolicy::DropOldest },
            },
            supervisor: SupervisorConfig {
                restart: false,
                max_restarts: 5,
                backoff_ms: 1000,
            },
            logging: LoggingConfig {
                filter: "voice_relay=debug,info".to_string(),
                stats_interval_secs: 30,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `RELAY_ENDPOINTS__TOKEN=secret`
    /// - `RELAY_PLAYBACK__BATCH_SIZE=20`
    /// - `CMD_ENDPOINT=wss://music.example/cmd`: shorthand for deployment platforms
    pub fn load() -> RelayResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(endpoint) = env::var("CMD_ENDPOINT") {
            settings = settings.set_override("endpoints.cmd_endpoint", endpoint)?;
        }
        if let Ok(endpoint) = env::var("STREAM_ENDPOINT") {
            settings = settings.set_override("endpoints.stream_endpoint", endpoint)?;
        }
        if let Ok(token) = env::var("RELAY_TOKEN") {
            settings = settings.set_override("endpoints.token", token)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> RelayResult<()> {
        validate_ws_url("endpoints.cmd_endpoint", &self.endpoints.cmd_endpoint)?;
        validate_ws_url("endpoints.stream_endpoint", &self.endpoints.stream_endpoint)?;

        if self.endpoints.token.trim().is_empty() {
            return Err(RelayError::Config("endpoints.token must be set".to_string()));
        }

        let timings = [
            ("control.send_interval_ms", self.control.send_interval_ms),
            ("control.connect_timeout_ms", self.control.connect_timeout_ms),
            ("control.handshake_timeout_ms", self.control.handshake_timeout_ms),
            ("audio.gate_poll_ms", self.audio.gate_poll_ms),
            ("audio.connect_timeout_ms", self.audio.connect_timeout_ms),
            ("playback.idle_wait_ms", self.playback.idle_wait_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(RelayError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.control.ready_sentinel.is_empty() {
            return Err(RelayError::Config("control.ready_sentinel cannot be empty".to_string()));
        }

        if self.playback.batch_size == 0 {
            return Err(RelayError::Config("playback.batch_size must be greater than 0".to_string()));
        }

        let queues = [
            ("queues.frames", &self.queues.frames),
            ("queues.control", &self.queues.control),
            ("queues.responses", &self.queues.responses),
        ];
        for (name, queue) in queues {
            if queue.capacity == 0 {
                return Err(RelayError::Config(format!("{}.capacity must be greater than 0", name)));
            }
        }

        Ok(())
    }
}

fn validate_ws_url(name: &str, url: &str) -> RelayResult<()> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(RelayError::Config(format!(
            "{} must be a ws:// or wss:// URL, got {:?}",
            name, url
        )))
    }
}

impl ControlConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl AudioConfig {
    pub fn gate_poll(&self) -> Duration {
        Duration::from_millis(self.gate_poll_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl PlaybackConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// `None` when the time-based fallback flush is disabled.
    pub fn flush_after(&self) -> Option<Duration> {
        (self.flush_after_ms > 0).then(|| Duration::from_millis(self.flush_after_ms))
    }
}
