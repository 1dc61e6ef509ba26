//! Console front-end used by the binary: reads commands from stdin and logs
//! responses from the music server.
//!
//! ## Command Syntax:
//! - `skip`
//! - `play {"query": "lofi beats"}`: everything after the op is a JSON payload
//! - `@42 state`: a leading `@<integer>` is the correlation token

use crate::error::{RelayError, RelayResult};
use crate::protocol::{CommandRecord, ResponseKind, ResponseRecord};
use crate::queue::Pop;
use crate::state::RelayContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_command_line(line: &str) -> RelayResult<Option<CommandRecord>> {
    let mut rest = line.trim();
    if rest.is_empty() || rest.starts_with('#') {
        return Ok(None);
    }

    let mut postback = None;
    if let Some(tagged) = rest.strip_prefix('@') {
        let (token, tail) = tagged.split_once(char::is_whitespace).unwrap_or((tagged, ""));
        let token = token
            .parse::<i64>()
            .map_err(|_| RelayError::Protocol(format!("invalid correlation token {:?}", token)))?;
        postback = Some(token);
        rest = tail.trim_start();
    }

    let (op, payload) = match rest.split_once(char::is_whitespace) {
        Some((op, payload)) => (op, payload.trim()),
        None => (rest, ""),
    };
    if op.is_empty() {
        return Err(RelayError::Protocol("missing command".to_string()));
    }

    let data = if payload.is_empty() {
        None
    } else {
        Some(serde_json::from_str(payload)?)
    };

    Ok(Some(CommandRecord {
        op: op.to_string(),
        data,
        postback,
    }))
}

/// Read commands line by line and queue them until EOF or shutdown.
pub async fn run_console<R>(ctx: Arc<RelayContext>, reader: R) -> RelayResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    loop {
        let line = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };
        match parse_command_line(&line) {
            Ok(Some(command)) => {
                ctx.post(command).await?;
                queued += 1;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, line = %line, "Ignoring console command"),
        }
    }
    Ok(queued)
}

/// Receives every response taken off the response queue.
pub trait ResponseHandler: Send {
    fn handle(&mut self, response: ResponseRecord);
}

/// Logs responses, one line per message, keyed by response kind.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl ResponseHandler for LoggingHandler {
    fn handle(&mut self, response: ResponseRecord) {
        let postback = response.postback;
        match &response.kind {
            ResponseKind::PlayerStateChange => {
                let title = response.data.get("title").and_then(|v| v.as_str()).unwrap_or("");
                let state = response.data.get("state").and_then(|v| v.as_str()).unwrap_or("");
                info!(state, title, "Player state changed");
            }
            ResponseKind::PlaylistsChange | ResponseKind::PlaylistEntryChange => {
                debug!(kind = %response.kind, "Playlist event");
            }
            ResponseKind::Other(tag) => {
                warn!(kind = %tag, ?postback, "Unexpected response type");
            }
            kind => info!(kind = %kind, ?postback, data = %response.data, "Response"),
        }
    }
}

/// Drain the response queue into `handler` until the queue closes.
pub async fn dispatch_responses<H: ResponseHandler>(ctx: Arc<RelayContext>, mut handler: H) -> u64 {
    let mut handled = 0;
    loop {
        match ctx.responses.pop_timeout(Duration::from_millis(500)).await {
            Pop::Item(response) => {
                handler.handle(response);
                handled += 1;
            }
            Pop::Empty if ctx.is_shutting_down() => break,
            Pop::Empty => {}
            Pop::Closed => break,
        }
    }
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;

    #[test]
    fn test_parse_plain_command() {
        let command = parse_command_line("  skip  ").unwrap().unwrap();
        assert_eq!(command, CommandRecord::new("skip"));
    }

    #[test]
    fn test_parse_payload_and_postback() {
        let command = parse_command_line(r#"@42 play {"query": "lofi beats"}"#).unwrap().unwrap();
        assert_eq!(command.op, "play");
        assert_eq!(command.data, Some(json!({"query": "lofi beats"})));
        assert_eq!(command.postback, Some(42));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_command_line("").unwrap(), None);
        assert_eq!(parse_command_line("# comment").unwrap(), None);
        assert!(parse_command_line("@abc skip").is_err());
        assert!(parse_command_line("@7").is_err());
        assert!(parse_command_line("play {broken").is_err());
    }

    #[tokio::test]
    async fn test_console_queues_valid_lines() {
        let ctx = RelayContext::new(&AppConfig::default().queues);
        let input: &[u8] = b"skip\n\nplay {oops\n@5 state\n";
        let queued = run_console(ctx.clone(), input).await.unwrap();
        assert_eq!(queued, 2);
        assert_eq!(ctx.control.try_pop(), Some(CommandRecord::new("skip")));
        assert_eq!(ctx.control.try_pop(), Some(CommandRecord::new("state").with_postback(5)));
    }

    #[derive(Default)]
    struct Collecting(Vec<ResponseRecord>);

    impl ResponseHandler for &mut Collecting {
        fn handle(&mut self, response: ResponseRecord) {
            self.0.push(response);
        }
    }

    #[tokio::test]
    async fn test_dispatcher_drains_in_order() {
        let ctx = RelayContext::new(&AppConfig::default().queues);
        for i in 0..3 {
            ctx.responses
                .push(ResponseRecord {
                    kind: ResponseKind::State,
                    data: json!({"n": i}),
                    postback: Some(i),
                })
                .await
                .unwrap();
        }
        ctx.responses.close();

        let mut collected = Collecting::default();
        let handled = dispatch_responses(ctx, &mut collected).await;
        assert_eq!(handled, 3);
        let postbacks: Vec<_> = collected.0.iter().map(|r| r.postback).collect();
        assert_eq!(postbacks, vec![Some(0), Some(1), Some(2)]);
    }
}
