//! Persistent bidirectional connection to the tabletop server.
//!
//! [`TcpTransport`] owns at most one live link. Each link runs a reader task
//! and a writer task; the transport talks to them over channels and reports
//! everything that happens as [`TransportEvent`]s on an unbounded receiver
//! handed out at construction. Dropping that receiver unsubscribes.
//!
//! Liveness is tracked per link in a [`ConnectionStateWatch`]. Whichever side
//! first observes the link dying (reader EOF, write failure, explicit close)
//! flips it to [`ConnectionState::Disconnected`] and is the only one to emit
//! [`TransportEvent::Disconnected`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};

use crate::bandwidth::{NetworkCounters, TrafficSnapshot};
use crate::compression::{CompressionConfig, compress_payload, decompress_payload};
use crate::framing::{FrameConfig, FrameError, encode_frame, read_frame};
use crate::messages::{ClientMessage, MessageError, ServerMessage, decode_message, encode_message};
use crate::platform::{SocketConfig, configure_stream};

/// Connection lifecycle state of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP handshake in progress.
    Connecting,
    /// Link is up.
    Connected,
    /// Link is gone, for whatever reason.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// A watch starting in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Overwrite the state.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    /// Flip to disconnected. Returns `true` only for the caller that made the
    /// transition.
    pub fn mark_disconnected(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                false
            } else {
                *state = ConnectionState::Disconnected;
                true
            }
        })
    }

    /// New receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Current state.
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

/// What the transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A link came up.
    Connected {
        /// Server address.
        addr: SocketAddr,
    },
    /// A decoded server message.
    Message(ServerMessage),
    /// An inbound frame could not be decoded; the link stays up.
    Error(String),
    /// The link went down.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A connection attempt failed.
    ConnectFailed(String),
}

/// Transport failures surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No live link.
    #[error("not connected")]
    NotConnected,
    /// The handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The outbound message could not be encoded.
    #[error(transparent)]
    Encode(#[from] MessageError),
    /// The outbound message does not fit in a frame.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// The seam between the sync layer and the network.
///
/// The sync client only ever sends through this trait and receives through
/// [`TransportEvent`]s, so tests can drive it with an in-memory fake.
pub trait Transport {
    /// Queue a message for the server. Never blocks.
    fn send(&self, message: ClientMessage) -> Result<(), TransportError>;

    /// Whether a link is currently up.
    fn is_connected(&self) -> bool;

    /// Drop the link, if any.
    fn close(&mut self);

    /// Traffic since the previous call, when the transport counts it.
    fn take_traffic(&self) -> Option<TrafficSnapshot> {
        None
    }
}

/// Settings for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Frame size limit.
    pub frame: FrameConfig,
    /// Outbound compression.
    pub compression: CompressionConfig,
    /// Socket options.
    pub socket: SocketConfig,
    /// Handshake deadline. Default: 10 s.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            compression: CompressionConfig::default(),
            socket: SocketConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct Link {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<ConnectionStateWatch>,
    shutdown_tx: watch::Sender<bool>,
}

/// TCP implementation of [`Transport`].
pub struct TcpTransport {
    config: TransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    counters: Arc<NetworkCounters>,
    link: Option<Link>,
}

impl TcpTransport {
    /// Create an unconnected transport and the receiver for its events.
    pub fn new(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            config,
            events,
            counters: Arc::new(NetworkCounters::new()),
            link: None,
        };
        (transport, rx)
    }

    /// Open a link to `addr`, replacing any existing one.
    ///
    /// Resolves once the handshake completes and socket options are applied.
    pub async fn connect<A: ToSocketAddrs>(&mut self, addr: A) -> Result<SocketAddr, TransportError> {
        self.teardown("reconnecting");

        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let stream = match self.open(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                state.set(ConnectionState::Disconnected);
                tracing::warn!("Connect failed: {e}");
                let _ = self.events.send(TransportEvent::ConnectFailed(e.to_string()));
                return Err(e);
            }
        };
        let peer = stream.peer_addr()?;

        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        state.set(ConnectionState::Connected);
        tracing::info!("Connected to {peer}");
        let _ = self.events.send(TransportEvent::Connected { addr: peer });

        tokio::spawn(read_loop(
            reader,
            self.config.frame.clone(),
            Arc::clone(&state),
            Arc::clone(&self.counters),
            self.events.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(write_loop(
            writer,
            outbound_rx,
            Arc::clone(&state),
            Arc::clone(&self.counters),
            self.events.clone(),
            shutdown_rx,
        ));

        self.link = Some(Link {
            outbound,
            state,
            shutdown_tx,
        });
        Ok(peer)
    }

    async fn open<A: ToSocketAddrs>(&self, addr: A) -> Result<TcpStream, TransportError> {
        let timeout = self.config.connect_timeout;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout(timeout))??;
        configure_stream(&stream, &self.config.socket)?;
        Ok(stream)
    }

    /// Close the link. Emits [`TransportEvent::Disconnected`] if one was up.
    pub fn disconnect(&mut self) {
        self.teardown("closed by client");
    }

    fn teardown(&mut self, reason: &str) {
        let Some(link) = self.link.take() else {
            return;
        };
        let _ = link.shutdown_tx.send(true);
        if link.state.mark_disconnected() {
            tracing::info!("Disconnected: {reason}");
            let _ = self.events.send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// State of the current link.
    pub fn state(&self) -> ConnectionState {
        self.link
            .as_ref()
            .map_or(ConnectionState::Disconnected, |link| link.state.current())
    }

    /// Subscribe to state changes of the current link.
    pub fn watch_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.link.as_ref().map(|link| link.state.subscribe())
    }

    /// Live traffic counters shared with the link tasks.
    pub fn counters(&self) -> &Arc<NetworkCounters> {
        &self.counters
    }

    fn frame(&self, message: &ClientMessage) -> Result<Vec<u8>, TransportError> {
        let encoded = encode_message(message)?;
        let payload = compress_payload(&encoded, &self.config.compression);
        Ok(encode_frame(&payload, &self.config.frame)?)
    }
}

impl Transport for TcpTransport {
    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let link = self
            .link
            .as_ref()
            .filter(|link| link.state.current() == ConnectionState::Connected)
            .ok_or(TransportError::NotConnected)?;
        let frame = self.frame(&message)?;
        tracing::trace!("Queueing {} ({} bytes)", message.kind(), frame.len());
        link.outbound
            .send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn close(&mut self) {
        self.disconnect();
    }

    fn take_traffic(&self) -> Option<TrafficSnapshot> {
        Some(self.counters.take())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.shutdown_tx.send(true);
        }
    }
}

fn link_lost(
    state: &ConnectionStateWatch,
    events: &mpsc::UnboundedSender<TransportEvent>,
    reason: String,
) {
    if state.mark_disconnected() {
        tracing::warn!("Connection lost: {reason}");
        let _ = events.send(TransportEvent::Disconnected { reason });
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    frame_config: FrameConfig,
    state: Arc<ConnectionStateWatch>,
    counters: Arc<NetworkCounters>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = read_frame(&mut reader, &frame_config) => match result {
                Ok(body) => {
                    counters.record_receive(body.len() as u64 + 4);
                    match decode_frame(&body) {
                        Ok(message) => {
                            tracing::trace!("Received {}", message.kind());
                            let _ = events.send(TransportEvent::Message(message));
                        }
                        Err(reason) => {
                            tracing::warn!("Dropping malformed frame: {reason}");
                            let _ = events.send(TransportEvent::Error(reason));
                        }
                    }
                }
                Err(FrameError::PayloadTooLarge { size, max }) => {
                    tracing::warn!("Skipping {size}-byte frame (limit {max})");
                    let skipped = tokio::io::copy(
                        &mut (&mut reader).take(size as u64),
                        &mut tokio::io::sink(),
                    )
                    .await;
                    match skipped {
                        Ok(n) if n == size as u64 => {
                            let _ = events.send(TransportEvent::Error(format!(
                                "frame of {size} bytes exceeds limit of {max}"
                            )));
                        }
                        Ok(_) => {
                            link_lost(&state, &events, "connection closed".to_string());
                            break;
                        }
                        Err(e) => {
                            link_lost(&state, &events, e.to_string());
                            break;
                        }
                    }
                }
                Err(e) => {
                    link_lost(&state, &events, e.to_string());
                    break;
                }
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

fn decode_frame(body: &[u8]) -> Result<ServerMessage, String> {
    let encoded = decompress_payload(body).map_err(|e| e.to_string())?;
    decode_message(&encoded).map_err(|e| e.to_string())
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    state: Arc<ConnectionStateWatch>,
    counters: Arc<NetworkCounters>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let written = async {
                    writer.write_all(&frame).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    link_lost(&state, &events, e.to_string());
                    break;
                }
                counters.record_send(frame.len() as u64);
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = writer.shutdown().await;
                    break;
                }
            }
        }
    }
}
