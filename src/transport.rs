//! Websocket connection setup shared by the control and audio channels, and
//! the termination event both channels report when their receive loop ends.

use crate::error::{RelayError, RelayResult};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use uuid::Uuid;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a websocket to `endpoint` with `Authorization: Bearer <token>`.
///
/// Any failure here is a fatal startup error: the caller does not retry.
pub async fn connect(endpoint: &str, token: &str, timeout: Duration) -> RelayResult<WsStream> {
    let connection_id = Uuid::new_v4();
    let connect_error = |reason: String| RelayError::Connect {
        endpoint: endpoint.to_string(),
        reason,
    };

    let mut request = endpoint
        .into_client_request()
        .map_err(|e| connect_error(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| connect_error(format!("invalid bearer token: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    debug!(%connection_id, endpoint, "Connecting");
    let (stream, response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| RelayError::Timeout("websocket connect"))?
        .map_err(|e| connect_error(e.to_string()))?;

    info!(%connection_id, endpoint, status = %response.status(), "Websocket connected");
    Ok(stream)
}

/// Why a channel's receive loop stopped.
///
/// The relay never reconnects by itself; this event is what a supervising
/// layer acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The shutdown token was cancelled
    Shutdown,
    /// The remote sent a close frame
    RemoteClosed { code: Option<u16>, reason: String },
    /// The stream ended without a close frame
    StreamEnded,
    /// Read or write failure on the transport
    Transport(String),
}

impl Termination {
    pub fn from_close(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Termination::RemoteClosed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => Termination::RemoteClosed {
                code: None,
                reason: String::new(),
            },
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Termination::Shutdown)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Shutdown => write!(f, "shutdown requested"),
            Termination::RemoteClosed { code: Some(code), reason } => {
                write!(f, "closed by remote ({}): {}", code, reason)
            }
            Termination::RemoteClosed { code: None, .. } => write!(f, "closed by remote"),
            Termination::StreamEnded => write!(f, "stream ended"),
            Termination::Transport(err) => write!(f, "transport error: {}", err),
        }
    }
}
