//! # Audio Channel
//!
//! Owns the persistent connection to the streaming endpoint.
//!
//! ## Lifecycle:
//! 1. **Gated**: polls every `gate_poll` until the readiness gate is open and a
//!    session key exists. Nothing touches the network before that.
//! 2. **Connect** with the bearer token, then send the session key as the
//!    first text frame.
//! 3. **Receive**: every binary frame goes verbatim into the frame queue.
//!    A close frame or transport error ends the channel with a [`Termination`].

use crate::config::{AudioConfig, EndpointsConfig};
use crate::error::{RelayError, RelayResult};
use crate::state::{RelayContext, RelayMetrics};
use crate::transport::{self, Termination, WsStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, trace, warn};

pub struct AudioChannel {
    ctx: Arc<RelayContext>,
    endpoint: String,
    token: String,
    config: AudioConfig,
}

impl AudioChannel {
    pub fn new(ctx: Arc<RelayContext>, endpoints: &EndpointsConfig, config: AudioConfig) -> Self {
        Self {
            ctx,
            endpoint: endpoints.stream_endpoint.clone(),
            token: endpoints.token.clone(),
            config,
        }
    }

    /// Wait for the readiness gate and the session key, returning the key.
    ///
    /// Re-checks at least once per poll interval and returns `None` if the
    /// relay shuts down first.
    pub async fn wait_until_ready(&self) -> Option<String> {
        let mut logged = false;
        loop {
            if self.ctx.gate.is_set() {
                if let Some(key) = self.ctx.session_key.get() {
                    return Some(key);
                }
            }
            if !logged {
                debug!(
                    gate = self.ctx.gate.is_set(),
                    key = self.ctx.session_key.is_set(),
                    "Audio channel waiting for readiness"
                );
                logged = true;
            }

            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.config.gate_poll()) => {}
                _ = self.ctx.gate.changed() => {}
                _ = self.ctx.session_key.changed() => {}
            }
        }
    }

    pub async fn connect(&self) -> RelayResult<WsStream> {
        transport::connect(&self.endpoint, &self.token, self.config.connect_timeout()).await
    }

    /// Wait for readiness, connect and forward frames until the stream ends.
    pub async fn run(&self) -> RelayResult<Termination> {
        let Some(key) = self.wait_until_ready().await else {
            return Ok(Termination::Shutdown);
        };
        let stream = tokio::select! {
            _ = self.ctx.shutdown.cancelled() => return Ok(Termination::Shutdown),
            stream = self.connect() => stream?,
        };
        let (sink, stream) = stream.split();
        self.relay(key, sink, stream).await
    }

    /// Authenticate with `key` and forward binary frames into the frame queue.
    pub async fn relay<Si, St>(&self, key: String, mut sink: Si, mut stream: St) -> RelayResult<Termination>
    where
        Si: Sink<Message, Error = WsError> + Unpin,
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        sink.send(Message::Text(key)).await.map_err(|e| RelayError::Connect {
            endpoint: self.endpoint.clone(),
            reason: format!("failed to send session key: {}", e),
        })?;
        info!(endpoint = %self.endpoint, "Audio stream connected");

        loop {
            tokio::select! {
                biased;

                _ = self.ctx.shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(Termination::Shutdown);
                }

                message = stream.next() => match message {
                    None => return Ok(Termination::StreamEnded),
                    Some(Err(e)) => return Ok(Termination::Transport(e.to_string())),
                    Some(Ok(Message::Binary(frame))) => {
                        trace!(bytes = frame.len(), "Audio frame");
                        RelayMetrics::incr(&self.ctx.metrics.frames_received);
                        if self.ctx.frames.push(frame).await.is_err() {
                            // Frame queue closed: the relay is shutting down
                            return Ok(Termination::Shutdown);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => return Ok(Termination::from_close(frame)),
                    Some(Ok(Message::Text(text))) => {
                        warn!(len = text.len(), "Ignoring text message on audio stream");
                    }
                    // Ping/pong are answered by the transport
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}
