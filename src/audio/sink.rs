//! Voice sinks: where the playback pacer delivers frames.
//!
//! A sink takes one opaque, already-encoded frame per call, synchronously.
//! The chat front-end's voice connection is the production sink; the binary
//! ships a file dump and a discarding sink.

use crate::error::{RelayError, RelayResult};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub trait VoiceSink: Send {
    /// Deliver one frame. An error rejects this frame only.
    fn send_packet(&mut self, frame: &[u8]) -> RelayResult<()>;

    /// Called after each batch burst with the number of frames in it.
    fn batch_complete(&mut self, _frames: usize) -> RelayResult<()> {
        Ok(())
    }
}

impl<S: VoiceSink + ?Sized> VoiceSink for Box<S> {
    fn send_packet(&mut self, frame: &[u8]) -> RelayResult<()> {
        (**self).send_packet(frame)
    }

    fn batch_complete(&mut self, frames: usize) -> RelayResult<()> {
        (**self).batch_complete(frames)
    }
}

/// Writes every frame as a little-endian `u32` length followed by the payload.
pub struct FileSink {
    writer: BufWriter<File>,
    frames_written: u64,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> RelayResult<Self> {
        let file = File::create(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "Dumping voice frames to file");
        Ok(Self {
            writer: BufWriter::new(file),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl VoiceSink for FileSink {
    fn send_packet(&mut self, frame: &[u8]) -> RelayResult<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| RelayError::Sink(format!("frame of {} bytes is too large", frame.len())))?;
        self.writer.write_u32::<LittleEndian>(len)?;
        self.writer.write_all(frame)?;
        self.frames_written += 1;
        Ok(())
    }

    fn batch_complete(&mut self, _frames: usize) -> RelayResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Accepts and discards frames.
#[derive(Debug, Default)]
pub struct NullSink {
    pub frames: u64,
    pub bytes: u64,
}

impl VoiceSink for NullSink {
    fn send_packet(&mut self, frame: &[u8]) -> RelayResult<()> {
        self.frames += 1;
        self.bytes += frame.len() as u64;
        Ok(())
    }
}

/// Read back a file written by [`FileSink`].
pub fn read_frame_dump(path: impl AsRef<Path>) -> RelayResult<Vec<Vec<u8>>> {
    use byteorder::ReadBytesExt;
    use std::io::{ErrorKind, Read};

    let mut reader = std::io::BufReader::new(File::open(path)?);
    let mut frames = Vec::new();
    loop {
        let len = match reader.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame)?;
        frames.push(frame);
    }
    Ok(frames)
}
