//! # Audio Path
//!
//! Stream endpoint → [`AudioChannel`] → frame queue → [`PlaybackPacer`] → [`VoiceSink`].
//!
//! Frames are opaque, already-encoded payloads. Nothing in this module
//! decodes or re-encodes audio; frames reach the sink byte-for-byte and in
//! the order they were received.

pub mod channel;    // Gated connection to the stream endpoint
pub mod pacer;      // Batching and pacing into the voice sink
pub mod sink;       // Voice sink trait and implementations

pub use channel::AudioChannel;
pub use pacer::{PacerStats, PlaybackPacer};
pub use sink::{FileSink, NullSink, VoiceSink};
