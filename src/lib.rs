//! # Voice Relay
//!
//! Relays control commands and binary audio frames between a chat/voice
//! front-end, a remote command-and-control websocket and a remote audio
//! stream websocket, so that a voice channel keeps playing what was chosen
//! through chat commands.
//!
//! ## Data Flow:
//! ```text
//! front-end ──post──▶ control queue ──▶ ControlChannel ──▶ command endpoint
//! front-end ◀─────── response queue ◀── ControlChannel ◀── command endpoint
//!
//! stream endpoint ──▶ AudioChannel ──▶ frame queue ──▶ PlaybackPacer ──▶ VoiceSink
//! ```
//!
//! The control channel's handshake issues the session key, the front-end
//! opens the readiness gate once it has joined voice, and only then does the
//! audio channel connect. Apart from that the two flows are independent.

pub mod audio;       // Audio channel, playback pacer and voice sinks
pub mod config;      // Configuration management (config.rs)
pub mod console;     // Stdin front-end and response dispatcher
pub mod control;     // Control channel (control.rs)
pub mod error;       // Error types (error.rs)
pub mod gate;        // Readiness gate and session key
pub mod protocol;    // Control wire messages
pub mod queue;       // Bounded hand-off queues
pub mod state;       // Shared relay context and metrics
pub mod supervisor;  // Restart policy for terminated channels
pub mod transport;   // Websocket connect and termination events

pub use config::AppConfig;
pub use control::ControlChannel;
pub use error::{RelayError, RelayResult};
pub use protocol::{CommandRecord, ResponseKind, ResponseRecord};
pub use state::{AudioFrame, RelayContext};
pub use transport::Termination;
