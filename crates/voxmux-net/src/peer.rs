//! A framed, typed connection to one remote endpoint.
//!
//! A [`Peer`] owns two background tasks: a reader that decodes inbound
//! packets into a queue, and a writer that drains outbound packets and keeps
//! the connection alive. Closing is observable through a [`watch`] channel so
//! any number of tasks can wait for it without polling, and the reason the
//! connection ended stays queryable afterwards.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot, watch};

use crate::framing::{Frame, FrameConfig, FrameError, read_frame, write_frame, write_keepalive};
use crate::messages::{self, MessageError, ToCltCmd, ToSrvCmd};
use crate::packet::{self, CompressionConfig, Packet, PacketError};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Peer::close`] was called on this side.
    Local,
    /// The remote side sent a disconnect notice.
    Remote,
    /// The stream ended without a disconnect notice.
    Dropped,
    /// Nothing, not even a keepalive, arrived within the idle timeout.
    TimedOut,
    /// An I/O or framing error broke the stream.
    Io,
}

impl CloseReason {
    pub fn is_timeout(self) -> bool {
        self == CloseReason::TimedOut
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("connection closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] postcard::Error),
    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),
    #[error("malformed message: {0}")]
    Message(#[from] MessageError),
}

/// Tunables for a [`Peer`].
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub frame: FrameConfig,
    pub compression: CompressionConfig,
    /// The connection times out when nothing arrives for this long. Default: 30 s.
    pub idle_timeout: Duration,
    /// Keepalive frames are sent this often. Default: 5 s.
    pub keepalive_interval: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            compression: CompressionConfig::default(),
            idle_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
        }
    }
}

/// Observable close state shared by a peer and its tasks.
struct CloseWatch {
    tx: watch::Sender<Option<CloseReason>>,
}

impl CloseWatch {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Record `reason` unless the connection is already closed. Returns
    /// whether this call closed it.
    fn close_with(&self, reason: CloseReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    fn reason(&self) -> Option<CloseReason> {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<Option<CloseReason>> {
        self.tx.subscribe()
    }
}

struct Outgoing {
    payload: Vec<u8>,
    ack: oneshot::Sender<()>,
}

/// Resolves once the corresponding command has been written and flushed.
#[must_use = "an ack does nothing unless awaited"]
pub struct Ack(oneshot::Receiver<()>);

impl Future for Ack {
    type Output = Result<(), PeerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|r| r.map_err(|_| PeerError::Closed))
    }
}

/// A typed connection receiving `In` and sending `Out`.
pub struct Peer<In, Out> {
    label: String,
    compression: CompressionConfig,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    incoming: Mutex<mpsc::UnboundedReceiver<Result<In, PeerError>>>,
    close: Arc<CloseWatch>,
    _out: PhantomData<fn(Out)>,
}

/// The proxy's view of a game client: receives server-bound commands.
pub type CltPeer = Peer<ToSrvCmd, ToCltCmd>;

/// The proxy's view of a game server: receives client-bound commands.
pub type SrvPeer = Peer<ToCltCmd, ToSrvCmd>;

impl<In, Out> Peer<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize,
{
    /// Wrap a byte stream, spawning the reader and writer tasks.
    ///
    /// `label` only shows up in log lines.
    pub fn spawn<S>(io: S, label: impl Into<String>, config: PeerConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let label = label.into();
        let (reader, writer) = tokio::io::split(io);
        let close = Arc::new(CloseWatch::new());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(
            reader,
            in_tx,
            Arc::clone(&close),
            config.clone(),
            label.clone(),
        ));
        tokio::spawn(write_loop(
            writer,
            out_rx,
            Arc::clone(&close),
            config.clone(),
            label.clone(),
        ));

        Self {
            label,
            compression: config.compression,
            outgoing: out_tx,
            incoming: Mutex::new(in_rx),
            close,
            _out: PhantomData,
        }
    }

    /// Queue a command. The returned [`Ack`] resolves once it hit the wire.
    pub fn send(&self, cmd: &Out) -> Result<Ack, PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }

        let bytes = messages::encode(cmd)?;
        let payload = packet::encode_message(&bytes, &self.compression);
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outgoing
            .send(Outgoing {
                payload,
                ack: ack_tx,
            })
            .map_err(|_| PeerError::Closed)?;
        Ok(Ack(ack_rx))
    }

    /// Next inbound command, in arrival order.
    ///
    /// Malformed packets yield a non-fatal error; [`PeerError::Closed`] means
    /// the connection is gone and nothing further will arrive.
    pub async fn recv(&self) -> Result<In, PeerError> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(result) => result,
            None => Err(PeerError::Closed),
        }
    }
}

impl<In, Out> Peer<In, Out> {
    /// Close the connection deliberately. Commands queued before the call
    /// are still delivered, followed by a disconnect notice.
    pub fn close(&self) {
        if self.close.close_with(CloseReason::Local) {
            tracing::debug!(peer = %self.label, "closing");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.close.reason().is_some()
    }

    /// Why the connection ended, `None` while it is open.
    pub fn why_closed(&self) -> Option<CloseReason> {
        self.close.reason()
    }

    /// Resolves once the connection is closed, for whatever reason.
    pub async fn closed(&self) {
        let mut rx = self.close.subscribe();
        let _ = rx.wait_for(|reason| reason.is_some()).await;
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<In, Out> Drop for Peer<In, Out> {
    fn drop(&mut self) {
        self.close.close_with(CloseReason::Local);
    }
}

async fn read_loop<R, In>(
    mut reader: R,
    incoming: mpsc::UnboundedSender<Result<In, PeerError>>,
    close: Arc<CloseWatch>,
    config: PeerConfig,
    label: String,
) where
    R: AsyncRead + Unpin,
    In: DeserializeOwned,
{
    let mut closed_rx = close.subscribe();

    while close.reason().is_none() {
        let frame = tokio::select! {
            result = tokio::time::timeout(config.idle_timeout, read_frame(&mut reader, &config.frame)) => result,
            _ = closed_rx.changed() => break,
        };

        let payload = match frame {
            Err(_elapsed) => {
                close.close_with(CloseReason::TimedOut);
                break;
            }
            Ok(Err(FrameError::ConnectionClosed)) => {
                close.close_with(CloseReason::Dropped);
                break;
            }
            Ok(Err(e)) => {
                tracing::warn!(peer = %label, "read failed: {e}");
                close.close_with(CloseReason::Io);
                break;
            }
            Ok(Ok(Frame::Keepalive)) => continue,
            Ok(Ok(Frame::Payload(payload))) => payload,
        };

        let item = match packet::decode_packet(&payload) {
            Ok(Packet::Disconnect) => {
                close.close_with(CloseReason::Remote);
                break;
            }
            Ok(Packet::Message(bytes)) => messages::decode::<In>(&bytes).map_err(PeerError::from),
            Err(e) => Err(PeerError::from(e)),
        };

        tracing::trace!(peer = %label, bytes = payload.len(), "received packet");
        if incoming.send(item).is_err() {
            break;
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    close: Arc<CloseWatch>,
    config: PeerConfig,
    label: String,
) where
    W: AsyncWrite + Unpin,
{
    let mut closed_rx = close.subscribe();
    let mut keepalive = tokio::time::interval(config.keepalive_interval);
    keepalive.tick().await;

    loop {
        tokio::select! {
            biased;
            item = outgoing.recv() => {
                let Some(item) = item else { break };
                if let Err(e) = write_frame(&mut writer, &item.payload, &config.frame).await {
                    tracing::warn!(peer = %label, "write failed: {e}");
                    close.close_with(CloseReason::Io);
                    break;
                }
                let _ = item.ack.send(());
            }
            _ = closed_rx.changed() => {
                if close.reason() == Some(CloseReason::Local) {
                    // Flush what was queued before the close, then say goodbye.
                    while let Ok(item) = outgoing.try_recv() {
                        if write_frame(&mut writer, &item.payload, &config.frame).await.is_err() {
                            break;
                        }
                        let _ = item.ack.send(());
                    }
                    let _ = write_frame(&mut writer, &packet::encode_disconnect(), &config.frame).await;
                }
                break;
            }
            _ = keepalive.tick() => {
                if write_keepalive(&mut writer).await.is_err() {
                    close.close_with(CloseReason::Io);
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
}

/// Two connected peers over an in-memory pipe: the proxy-side view of a
/// client and the matching client-side view of the proxy.
pub fn memory_pair(config: PeerConfig) -> (CltPeer, SrvPeer) {
    let (a, b) = tokio::io::duplex(1 << 16);
    (
        Peer::spawn(a, "memory-client", config.clone()),
        Peer::spawn(b, "memory-server", config),
    )
}
