//! # Playback Pacer
//!
//! Drains the frame queue into the voice sink in fixed-size bursts.
//!
//! ## Batching Policy:
//! - Frames accumulate until `batch_size` of them are held, then the whole
//!   batch goes to the sink in FIFO order and accumulation restarts
//! - While the queue is empty the pacer sleeps at most `idle_wait` instead of spinning
//! - A partial batch is flushed once no frame arrived for `flush_after`, and
//!   when the frame queue closes, so the tail of a stream is never held back
//! - A frame the sink rejects is logged and skipped; the rest of the batch still goes out

use crate::audio::sink::VoiceSink;
use crate::config::PlaybackConfig;
use crate::queue::Pop;
use crate::state::{AudioFrame, RelayContext, RelayMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Totals reported when the pacer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub frames_played: u64,
    pub frames_rejected: u64,
    pub batches: u64,
}

pub struct PlaybackPacer<S> {
    ctx: Arc<RelayContext>,
    sink: S,
    batch_size: usize,
    idle_wait: Duration,
    flush_after: Option<Duration>,
    batch: Vec<AudioFrame>,
    stats: PacerStats,
}

impl<S: VoiceSink> PlaybackPacer<S> {
    pub fn new(ctx: Arc<RelayContext>, sink: S, config: &PlaybackConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            ctx,
            sink,
            batch_size,
            idle_wait: config.idle_wait(),
            flush_after: config.flush_after(),
            batch: Vec::with_capacity(batch_size),
            stats: PacerStats::default(),
        }
    }

    /// Run until the frame queue is closed and drained, or shutdown is
    /// requested while the queue is empty.
    pub async fn run(mut self) -> PacerStats {
        info!(batch_size = self.batch_size, "Playback pacer started");
        let mut last_frame = Instant::now();

        loop {
            match self.ctx.frames.pop_timeout(self.idle_wait).await {
                Pop::Item(frame) => {
                    self.batch.push(frame);
                    last_frame = Instant::now();
                    if self.batch.len() >= self.batch_size {
                        self.flush();
                    }
                }
                Pop::Empty => {
                    if self.ctx.is_shutting_down() {
                        break;
                    }
                    if let Some(flush_after) = self.flush_after {
                        if !self.batch.is_empty() && last_frame.elapsed() >= flush_after {
                            debug!(frames = self.batch.len(), "Flushing partial batch after idle");
                            self.flush();
                        }
                    }
                }
                Pop::Closed => break,
            }
        }

        self.flush();
        info!(
            frames = self.stats.frames_played,
            rejected = self.stats.frames_rejected,
            batches = self.stats.batches,
            "Playback pacer stopped"
        );
        self.stats
    }

    /// Send the held batch to the sink, oldest frame first.
    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let metrics = &self.ctx.metrics;
        let count = self.batch.len();
        for frame in self.batch.drain(..) {
            match self.sink.send_packet(&frame) {
                Ok(()) => {
                    self.stats.frames_played += 1;
                    RelayMetrics::incr(&metrics.frames_played);
                }
                Err(e) => {
                    self.stats.frames_rejected += 1;
                    RelayMetrics::incr(&metrics.sink_errors);
                    warn!(error = %e, bytes = frame.len(), "Voice sink rejected frame");
                }
            }
        }
        if let Err(e) = self.sink.batch_complete(count) {
            warn!(error = %e, "Voice sink failed to complete batch");
        }
        self.stats.batches += 1;
        RelayMetrics::incr(&metrics.batches_flushed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::{RelayError, RelayResult};
    use std::sync::Mutex;

    /// Records frames grouped by the batch they were delivered in.
    #[derive(Clone, Default)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<Vec<AudioFrame>>>>,
        current: Vec<AudioFrame>,
        reject: Option<u8>,
    }

    impl VoiceSink for RecordingSink {
        fn send_packet(&mut self, frame: &[u8]) -> RelayResult<()> {
            if self.reject.is_some() && frame.first() == self.reject.as_ref() {
                return Err(RelayError::Sink("voice transport unavailable".to_string()));
            }
            self.current.push(frame.to_vec());
            Ok(())
        }

        fn batch_complete(&mut self, _frames: usize) -> RelayResult<()> {
            let batch = std::mem::take(&mut self.current);
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn config(flush_after_ms: u64) -> AppConfig {
        let mut config = AppConfig::default();
        config.playback.flush_after_ms = flush_after_ms;
        config
    }

    #[tokio::test]
    async fn test_25_frames_make_two_full_batches_and_a_tail() {
        let config = config(0);
        let ctx = RelayContext::new(&config.queues);
        let frames: Vec<AudioFrame> = (0..25u8).map(|i| vec![i, i.wrapping_mul(3)]).collect();
        for frame in &frames {
            ctx.frames.push(frame.clone()).await.unwrap();
        }
        ctx.frames.close();

        let sink = RecordingSink::default();
        let batches = sink.batches.clone();
        let stats = PlaybackPacer::new(ctx.clone(), sink, &config.playback).run().await;

        let batches = batches.lock().unwrap().clone();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(batches.concat(), frames);
        assert_eq!(stats, PacerStats { frames_played: 25, frames_rejected: 0, batches: 3 });
        assert_eq!(ctx.metrics_snapshot().frames_played, 25);
    }

    #[tokio::test]
    async fn test_order_preserved_across_many_batches() {
        let config = config(0);
        let ctx = RelayContext::new(&config.queues);
        let frames: Vec<AudioFrame> = (0..137u32).map(|i| i.to_le_bytes().to_vec()).collect();

        let sink = RecordingSink::default();
        let batches = sink.batches.clone();
        let pacer = tokio::spawn(PlaybackPacer::new(ctx.clone(), sink, &config.playback).run());

        for frame in &frames {
            ctx.frames.push(frame.clone()).await.unwrap();
            if frame[0] % 16 == 0 {
                tokio::task::yield_now().await;
            }
        }
        ctx.frames.close();
        pacer.await.unwrap();

        let batches = batches.lock().unwrap().clone();
        assert_eq!(batches.concat(), frames);
        let (last, full) = batches.split_last().unwrap();
        assert!(full.iter().all(|batch| batch.len() == 10));
        assert_eq!(last.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_flushed_after_idle() {
        let config = config(200);
        let ctx = RelayContext::new(&config.queues);
        let sink = RecordingSink::default();
        let batches = sink.batches.clone();
        let pacer = tokio::spawn(PlaybackPacer::new(ctx.clone(), sink, &config.playback).run());

        for i in 0..3u8 {
            ctx.frames.push(vec![i]).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(batches.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*batches.lock().unwrap(), vec![vec![vec![0], vec![1], vec![2]]]);

        ctx.shutdown();
        pacer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_idle_flush_when_disabled() {
        let config = config(0);
        let ctx = RelayContext::new(&config.queues);
        let sink = RecordingSink::default();
        let batches = sink.batches.clone();
        let pacer = tokio::spawn(PlaybackPacer::new(ctx.clone(), sink, &config.playback).run());

        ctx.frames.push(vec![1]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(batches.lock().unwrap().is_empty());

        // Shutdown closes the queue; the held frame still reaches the sink
        ctx.shutdown();
        pacer.await.unwrap();
        assert_eq!(*batches.lock().unwrap(), vec![vec![vec![1]]]);
    }

    #[tokio::test]
    async fn test_rejected_frame_does_not_lose_later_frames() {
        let config = config(0);
        let ctx = RelayContext::new(&config.queues);
        for i in 0..10u8 {
            ctx.frames.push(vec![i]).await.unwrap();
        }
        ctx.frames.close();

        let sink = RecordingSink { reject: Some(4), ..Default::default() };
        let batches = sink.batches.clone();
        let stats = PlaybackPacer::new(ctx.clone(), sink, &config.playback).run().await;

        let delivered = batches.lock().unwrap().concat();
        let expected: Vec<AudioFrame> = (0..10u8).filter(|i| *i != 4).map(|i| vec![i]).collect();
        assert_eq!(delivered, expected);
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(ctx.metrics_snapshot().sink_errors, 1);
    }
}
