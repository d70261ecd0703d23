//! Websocket transport and listen lifecycle.
//!
//! `Listener` sequences authorize, connect, and listen. While listening, a
//! read loop and a keepalive loop share one socket: the read half is owned by
//! the read loop, the write half sits behind a single mutex that serializes
//! acks and pings. The first terminal signal among cancellation, read-loop
//! failure, and keepalive failure wins; the close sequence then sends a
//! normal close frame, waits a short grace interval, and drops the socket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::SecretString;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{identity_headers, AuthClient, AuthError};
use crate::listener::dispatch::{Dispatcher, EventHandler};
use crate::listener::proto::Session;

/// Application-level subprotocol requested during the dial.
pub const SUBPROTOCOL: &str = "stripecli-devproxy-v1";
/// Read deadline: a pong (or any frame) must arrive within this window.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(10);
/// Deadline for writing a single frame.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(1);
/// Upper bound on the websocket handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSE_GRACE: Duration = Duration::from_millis(500);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors produced by connection setup and the listen lifecycle.
///
/// Frame-, payload-, and ack-level failures never appear here; they are
/// absorbed by the dispatch engine and reported via logging only.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Operation called out of lifecycle order.
    #[error("{0}")]
    Precondition(&'static str),

    /// Dial failed; includes the server response body when one was returned.
    #[error("websocket dial failed: {0}")]
    Handshake(String),

    /// Websocket transport error outside the loops.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// A header value could not be constructed.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// Read loop terminated: deadline expired or the transport failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Keepalive loop terminated: a ping write failed or timed out.
    #[error("ping failed: {0}")]
    Ping(String),

    /// Listen was cancelled through its cancellation token.
    #[error("listener cancelled")]
    Cancelled,
}

/// Configuration for [`Listener`].
pub struct ListenerConfig {
    /// Secret API key used for the authorize call.
    pub api_key: SecretString,
    /// Device name sent during session creation.
    pub device_name: String,
    /// Features to request. Defaults to `["webhooks"]`.
    pub websocket_features: Vec<String>,
    /// Receives parsed events.
    pub handler: Arc<dyn EventHandler>,
    /// Rolling read deadline.
    pub pong_wait: Duration,
    /// Keepalive interval. `None` derives `pong_wait * 2 / 10`.
    pub ping_period: Option<Duration>,
    /// Per-frame write deadline.
    pub write_wait: Duration,
    /// Websocket handshake timeout.
    pub handshake_timeout: Duration,
    /// API base URL override for the authorize call.
    pub api_base: Option<String>,
}

impl ListenerConfig {
    pub fn new(api_key: SecretString, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            api_key,
            device_name: "stripe-listener-sdk".to_string(),
            websocket_features: vec!["webhooks".to_string()],
            handler,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: None,
            write_wait: DEFAULT_WRITE_WAIT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            api_base: None,
        }
    }

    /// Keepalive interval, derived from the pong window unless overridden.
    pub fn keepalive_period(&self) -> Duration {
        self.ping_period.unwrap_or(self.pong_wait * 2 / 10)
    }
}

/// Connects to the event delivery service and streams events to a handler.
///
/// Lifecycle: constructed, then `authorize` populates the session, `connect`
/// opens the socket, `listen` runs the loops until a terminal condition.
pub struct Listener {
    config: ListenerConfig,
    auth: AuthClient,
    session: Option<Session>,
    socket: Option<WsStream>,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Result<Self, ListenerError> {
        let mut auth = AuthClient::new(config.api_key.clone())?;
        if let Some(base) = config.api_base.as_deref() {
            auth = auth.with_base_url(base);
        }

        Ok(Self {
            config,
            auth,
            session: None,
            socket: None,
        })
    }

    /// Session obtained during `authorize`. `None` before authorization.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Creates a CLI session and stores it for the subsequent dial.
    pub async fn authorize(&mut self) -> Result<Session, ListenerError> {
        let session = self
            .auth
            .authorize(&self.config.device_name, &self.config.websocket_features)
            .await?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Dials the websocket endpoint of the stored session.
    pub async fn connect(&mut self) -> Result<(), ListenerError> {
        let session = self
            .session
            .as_ref()
            .ok_or(ListenerError::Precondition("call authorize before connect"))?;

        let ws_url = format!(
            "{}?websocket_feature={}",
            session.websocket_url, session.websocket_authorized_feature
        );

        // Same identity headers as authorize, minus the bearer token.
        let mut request = ws_url.as_str().into_client_request()?;
        request.headers_mut().extend(identity_headers()?);
        request
            .headers_mut()
            .insert("Websocket-Id", session.websocket_id.parse()?);
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        debug!(event = "dialing", url = %ws_url);
        let socket = match timeout(self.config.handshake_timeout, connect_async(request)).await {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(err)) => return Err(handshake_error(err)),
            Err(_) => return Err(ListenerError::Handshake("handshake timed out".to_string())),
        };

        self.socket = Some(socket);
        info!(event = "websocket_connected", websocket_id = %session.websocket_id);
        Ok(())
    }

    /// Runs the read and keepalive loops until a terminal condition.
    ///
    /// Returns the loop error that triggered shutdown, `Cancelled` when the
    /// token won the race, or `Ok(())` when the peer closed the socket
    /// normally. The socket is closed and consumed either way.
    pub async fn listen(&mut self, cancel: CancellationToken) -> Result<(), ListenerError> {
        let socket = self
            .socket
            .take()
            .ok_or(ListenerError::Precondition("call connect before listen"))?;

        let (write, read) = socket.split();
        let writer = Arc::new(Mutex::new(write));
        let dispatcher = Dispatcher::new(
            Arc::clone(&writer),
            Arc::clone(&self.config.handler),
            self.config.write_wait,
        );

        let result = {
            let read_loop = read_loop(read, dispatcher, self.config.pong_wait);
            let ping_loop = ping_loop(
                Arc::clone(&writer),
                self.config.keepalive_period(),
                self.config.write_wait,
            );
            tokio::pin!(read_loop, ping_loop);

            tokio::select! {
                () = cancel.cancelled() => Err(ListenerError::Cancelled),
                result = &mut read_loop => result,
                result = &mut ping_loop => result,
            }
            // Both loops are dropped here; any write-lock guard held across a
            // suspension point is released before the close sequence runs.
        };

        close_socket(&writer, self.config.write_wait).await;

        match &result {
            Ok(()) => info!(event = "listener_stopped"),
            Err(ListenerError::Cancelled) => info!(event = "listener_cancelled"),
            Err(err) => warn!(event = "listener_failed", error = %err),
        }
        result
    }

    /// Authorize, connect, and listen as one composite operation. Any step's
    /// failure short-circuits the rest.
    pub async fn listen_all(&mut self, cancel: CancellationToken) -> Result<(), ListenerError> {
        self.authorize().await?;
        self.connect().await?;
        self.listen(cancel).await
    }
}

fn handshake_error(err: WsError) -> ListenerError {
    if let WsError::Http(response) = &err {
        let body = response
            .body()
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        return ListenerError::Handshake(format!(
            "handshake rejected (http {}): {}",
            response.status(),
            body
        ));
    }
    ListenerError::Handshake(err.to_string())
}

/// Reads frames until the peer closes, the deadline expires, or the
/// transport fails. Frames are dispatched synchronously in arrival order.
async fn read_loop<R, S>(
    mut read: R,
    dispatcher: Dispatcher<S>,
    pong_wait: Duration,
) -> Result<(), ListenerError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    loop {
        // Rolling deadline: every receive must land within the pong window.
        let frame = match timeout(pong_wait, read.next()).await {
            Ok(frame) => frame,
            Err(_) => return Err(ListenerError::Read("read deadline exceeded".to_string())),
        };

        match frame {
            Some(Ok(Message::Text(text))) => dispatcher.handle_frame(&text).await,
            Some(Ok(Message::Pong(_))) => debug!(event = "pong_received"),
            // The protocol layer queues the pong reply on the next write.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let normal = frame
                    .as_ref()
                    .map_or(true, |frame| frame.code == CloseCode::Normal);
                if normal {
                    info!(event = "peer_closed");
                    return Ok(());
                }
                return Err(ListenerError::Read(format!(
                    "peer closed abnormally: {frame:?}"
                )));
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(ListenerError::Read(err.to_string())),
            None => return Ok(()),
        }
    }
}

/// Sends a ping control frame on every tick. A write failure is fatal for
/// the loop and, transitively, for the listen call.
async fn ping_loop<S>(
    writer: Arc<Mutex<S>>,
    period: Duration,
    write_wait: Duration,
) -> Result<(), ListenerError>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    let mut ticker = interval(period);
    ticker.tick().await; // first tick completes immediately

    loop {
        ticker.tick().await;
        let mut writer = writer.lock().await;
        match timeout(write_wait, writer.send(Message::Ping(Vec::new()))).await {
            Ok(Ok(())) => debug!(event = "ping_sent"),
            Ok(Err(err)) => return Err(ListenerError::Ping(err.to_string())),
            Err(_) => return Err(ListenerError::Ping("write deadline exceeded".to_string())),
        }
    }
}

/// Close sequence: best-effort close frame, grace wait, then drop.
async fn close_socket<S>(writer: &Arc<Mutex<S>>, write_wait: Duration)
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    let close = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "done".into(),
    }));

    {
        let mut writer = writer.lock().await;
        match timeout(write_wait, writer.send(close)).await {
            Ok(Ok(())) => debug!(event = "close_sent"),
            Ok(Err(err)) => debug!(event = "close_send_failed", error = %err),
            Err(_) => debug!(event = "close_send_timeout"),
        }
    }

    // Give the peer a moment to acknowledge before the socket drops.
    tokio::time::sleep(CLOSE_GRACE).await;
}
