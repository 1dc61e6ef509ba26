//! # Control Channel
//!
//! Owns the persistent connection to the command endpoint.
//!
//! ## Protocol Flow:
//! 1. **Connect** with the bearer token (fatal on failure, no retry)
//! 2. **Handshake**: wait for `{"type": "hello", "key": ...}` and store the session key
//! 3. **Send loop**: one command record per tick leaves the control queue
//! 4. **Receive loop**: every other inbound message goes to the response queue
//!
//! Both loops share one task and one `select!`, so outbound commands and
//! inbound responses are handled cooperatively without extra locking.
//! The channel ends with a [`Termination`] when the transport goes away.

use crate::config::{ControlConfig, EndpointsConfig};
use crate::error::{RelayError, RelayResult};
use crate::protocol::{parse_inbound, CommandRecord, Inbound};
use crate::state::{RelayContext, RelayMetrics};
use crate::transport::{self, Termination, WsStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

pub struct ControlChannel {
    ctx: Arc<RelayContext>,
    endpoint: String,
    token: String,
    config: ControlConfig,
}

impl ControlChannel {
    pub fn new(ctx: Arc<RelayContext>, endpoints: &EndpointsConfig, config: ControlConfig) -> Self {
        Self {
            ctx,
            endpoint: endpoints.cmd_endpoint.clone(),
            token: endpoints.token.clone(),
            config,
        }
    }

    /// Open the control connection.
    pub async fn connect(&self) -> RelayResult<WsStream> {
        transport::connect(&self.endpoint, &self.token, self.config.connect_timeout()).await
    }

    /// Connect and relay until the connection or the relay shuts down.
    ///
    /// `Err` means the channel never came up (connect or handshake failed);
    /// `Ok` carries the reason an established channel stopped.
    pub async fn run(&self) -> RelayResult<Termination> {
        let stream = tokio::select! {
            _ = self.ctx.shutdown.cancelled() => return Ok(Termination::Shutdown),
            stream = self.connect() => stream?,
        };
        let (sink, stream) = stream.split();
        self.drive(sink, stream).await
    }

    /// Run the handshake, send loop and receive loop over an open transport.
    pub async fn drive<Si, St>(&self, mut sink: Si, mut stream: St) -> RelayResult<Termination>
    where
        Si: Sink<Message, Error = WsError> + Unpin,
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let handshake_timeout = tokio::time::sleep(self.config.handshake_timeout());
        tokio::pin!(handshake_timeout);
        let mut handshake_done = false;
        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                biased;

                _ = self.ctx.shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(Termination::Shutdown);
                }

                _ = &mut handshake_timeout, if !handshake_done => {
                    return Err(RelayError::Timeout("control handshake"));
                }

                message = stream.next() => {
                    let text = match message {
                        None => return Ok(Termination::StreamEnded),
                        Some(Err(e)) => return Ok(Termination::Transport(e.to_string())),
                        Some(Ok(Message::Close(frame))) => return Ok(Termination::from_close(frame)),
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!("Dropping non-UTF-8 binary message on control channel");
                                RelayMetrics::incr(&self.ctx.metrics.parse_errors);
                                continue;
                            }
                        },
                        Some(Ok(_)) => continue,
                    };

                    if self.handle_inbound(&text).await? && !handshake_done {
                        handshake_done = true;
                        // The first tick of a fresh interval fires immediately
                        ticker = self.ticker();
                        info!("Control handshake complete, send loop started");
                    }
                }

                _ = ticker.tick(), if handshake_done => {
                    if let Err(e) = self.send_next(&mut sink).await {
                        return Ok(Termination::Transport(e.to_string()));
                    }
                }
            }
        }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = interval(self.config.send_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Process one inbound text message. Returns `true` for a handshake.
    ///
    /// Malformed messages are logged and skipped; only a closed response
    /// queue (relay shutting down) is an error.
    async fn handle_inbound(&self, text: &str) -> RelayResult<bool> {
        match parse_inbound(text) {
            Ok(Inbound::Hello { key }) => {
                info!(key = %key, "Received session key");
                self.ctx.session_key.set(key);
                Ok(true)
            }
            Ok(Inbound::Response(response)) => {
                debug!(kind = %response.kind, postback = ?response.postback, "Response received");
                RelayMetrics::incr(&self.ctx.metrics.responses_received);
                self.ctx.responses.push(response).await?;
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed control message");
                RelayMetrics::incr(&self.ctx.metrics.parse_errors);
                Ok(false)
            }
        }
    }

    /// Take at most one command off the control queue and transmit it.
    async fn send_next<Si>(&self, sink: &mut Si) -> Result<(), WsError>
    where
        Si: Sink<Message, Error = WsError> + Unpin,
    {
        let Some(command) = self.ctx.control.try_pop() else {
            return Ok(());
        };

        if command.op == self.config.ready_sentinel {
            self.ctx.gate.set();
            return Ok(());
        }

        let text = match command.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(op = %command.op, error = %e, "Dropping command that failed to encode");
                return Ok(());
            }
        };
        sink.send(Message::Text(text)).await?;
        RelayMetrics::incr(&self.ctx.metrics.commands_sent);
        log_sent(&command);
        Ok(())
    }
}

fn log_sent(command: &CommandRecord) {
    info!(op = %command.op, data = ?command.data, postback = ?command.postback, "post");
}
