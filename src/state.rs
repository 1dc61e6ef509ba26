//! # Relay State
//!
//! [`RelayContext`] is built once at startup and handed to every component
//! as an `Arc<RelayContext>`. Components never share anything else: all
//! communication goes through the three queues and the two single-value cells.
//!
//! ## Ownership Pattern:
//! - **Arc**: each task holds its own handle, the context lives as long as the last task
//! - **Per-queue locking**: every queue synchronizes itself, there is no process-wide lock
//! - **CancellationToken**: one token observed by every loop for shutdown

use crate::config::QueuesConfig;
use crate::error::RelayResult;
use crate::gate::{ReadinessGate, SessionKey};
use crate::protocol::{CommandRecord, ResponseRecord};
use crate::queue::BoundedQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Opaque, already-encoded audio payload as received from the stream endpoint.
pub type AudioFrame = Vec<u8>;

pub struct RelayContext {
    /// Audio channel → playback pacer
    pub frames: BoundedQueue<AudioFrame>,
    /// Front-end → control channel
    pub control: BoundedQueue<CommandRecord>,
    /// Control channel → front-end dispatcher
    pub responses: BoundedQueue<ResponseRecord>,
    pub session_key: SessionKey,
    pub gate: ReadinessGate,
    pub shutdown: CancellationToken,
    pub metrics: RelayMetrics,
    pub started_at: DateTime<Utc>,
}

impl RelayContext {
    pub fn new(queues: &QueuesConfig) -> Arc<Self> {
        Arc::new(Self {
            frames: BoundedQueue::new("frames", queues.frames.capacity, queues.frames.overflow),
            control: BoundedQueue::new("control", queues.control.capacity, queues.control.overflow),
            responses: BoundedQueue::new(
                "responses",
                queues.responses.capacity,
                queues.responses.overflow,
            ),
            session_key: SessionKey::new(),
            gate: ReadinessGate::new(),
            shutdown: CancellationToken::new(),
            metrics: RelayMetrics::default(),
            started_at: Utc::now(),
        })
    }

    /// Queue a command for the control channel (front-end entry point).
    pub async fn post(&self, command: CommandRecord) -> RelayResult<()> {
        tracing::debug!(op = %command.op, postback = ?command.postback, "Command queued");
        self.control.push(command).await
    }

    /// Cancel every loop and close the queues so consumers drain and exit.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Relay shutting down");
        }
        self.shutdown.cancel();
        self.frames.close();
        self.control.close();
        self.responses.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self)
    }
}

/// Counters updated by the relay loops.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    pub commands_sent: AtomicU64,
    pub responses_received: AtomicU64,
    pub parse_errors: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_played: AtomicU64,
    pub sink_errors: AtomicU64,
    pub batches_flushed: AtomicU64,
}

impl RelayMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, ctx: &RelayContext) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            frames_dropped: ctx.frames.dropped(),
            frames_queued: ctx.frames.len(),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            uptime_seconds: ctx.uptime_seconds(),
        }
    }
}

/// Point-in-time copy of [`RelayMetrics`] plus queue depths.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub commands_sent: u64,
    pub responses_received: u64,
    pub parse_errors: u64,
    pub frames_received: u64,
    pub frames_played: u64,
    pub frames_dropped: u64,
    pub frames_queued: usize,
    pub sink_errors: u64,
    pub batches_flushed: u64,
    pub uptime_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::RelayError;

    #[tokio::test]
    async fn test_post_and_shutdown() {
        let ctx = RelayContext::new(&AppConfig::default().queues);
        ctx.post(CommandRecord::new("skip")).await.unwrap();
        assert_eq!(ctx.control.len(), 1);

        ctx.shutdown();
        assert!(ctx.is_shutting_down());
        assert!(ctx.frames.is_closed());
        assert!(matches!(
            ctx.post(CommandRecord::new("pause")).await,
            Err(RelayError::QueueClosed)
        ));
        // Already queued commands survive shutdown
        assert_eq!(ctx.control.try_pop().map(|c| c.op), Some("skip".to_string()));
    }

    #[test]
    fn test_metrics_snapshot() {
        let ctx = RelayContext::new(&AppConfig::default().queues);
        RelayMetrics::incr(&ctx.metrics.frames_received);
        RelayMetrics::incr(&ctx.metrics.frames_received);
        ctx.frames.try_push(vec![1, 2, 3]).unwrap();
        let snapshot = ctx.metrics_snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.frames_queued, 1);
        assert_eq!(snapshot.commands_sent, 0);
    }
}
