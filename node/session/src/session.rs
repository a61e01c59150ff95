//! A live connection: handshake, link registration, and the paired
//! sender/receiver loops.
//!
//! The sender drains an unbounded queue fed by the registered
//! [`Link`] and emits a keepalive frame whenever the queue stays empty
//! for a full keepalive interval. The receiver decodes frames, consumes
//! keepalives, and hands everything else to the local [`Node`] with the
//! link name prepended to the source path. Keepalive enforcement only
//! starts once the peer has sent its first keepalive, so a peer that
//! never sends them is tolerated indefinitely.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use weft_registry::{prepend_link, Link, LinkRef, Node};
use weft_wire::{
    Frame, FrameDecoder, DEFAULT_MAX_PAYLOAD, DISCONNECT_TIMEOUT, KEEPALIVE_INTERVAL,
};

use crate::error::SessionError;
use crate::handshake::exchange_header;

/// Queue depth at which a backlogged outbound link starts warning.
const QUEUE_DEPTH_WARN: usize = 1000;

/// Tunables for a single connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fallback link name when the peer offers no hint.
    pub link_name: String,
    /// Name we suggest the peer register us under.
    pub remote_hint: Option<String>,
    /// How often the sender emits a keepalive when idle.
    pub keepalive_interval: Duration,
    /// Silence threshold after which a keepalive-speaking peer is
    /// considered gone.
    pub disconnect_timeout: Duration,
    /// Largest payload accepted from the peer.
    pub max_payload: usize,
}

impl SessionConfig {
    /// Config with the protocol's default timings and payload limit.
    pub fn new(link_name: impl Into<String>) -> Self {
        SessionConfig {
            link_name: link_name.into(),
            remote_hint: None,
            keepalive_interval: KEEPALIVE_INTERVAL,
            disconnect_timeout: DISCONNECT_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Suggest a name for the peer to register this connection under.
    pub fn with_remote_hint(mut self, hint: impl Into<String>) -> Self {
        self.remote_hint = Some(hint.into());
        self
    }
}

/// What a single read attempt produced.
pub enum ReadOutcome {
    /// A complete frame arrived.
    Frame(Frame),
    /// Nothing arrived within the deadline.
    Timeout,
    /// The peer reset the connection.
    Reset,
    /// The peer closed the connection cleanly.
    Closed,
}

/// Read until one frame decodes, the deadline passes, or the stream ends.
///
/// The decode buffer lives outside this function, so a timeout mid-frame
/// loses nothing; the partial bytes are still there on the next call.
pub async fn read_frame<R>(
    reader: &mut R,
    decoder: &FrameDecoder,
    buf: &mut BytesMut,
    deadline: Duration,
) -> Result<ReadOutcome, SessionError>
where
    R: AsyncRead + Unpin,
{
    let read = tokio::time::timeout(deadline, async {
        loop {
            if let Some(frame) = decoder.decode(buf)? {
                return Ok(ReadOutcome::Frame(frame));
            }
            match reader.read_buf(buf).await {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    return Ok(ReadOutcome::Reset)
                }
                Err(e) => return Err(SessionError::from(e)),
            }
        }
    })
    .await;
    match read {
        Ok(outcome) => outcome,
        Err(_) => Ok(ReadOutcome::Timeout),
    }
}

/// Outbound half of a connection as seen by the routing registry.
///
/// `try_send` queues the frame for the sender task. Once the sender
/// exits the link reports dead and drops traffic silently, which is
/// exactly what routing wants from a stale registry entry.
struct SocketLink {
    tx: mpsc::UnboundedSender<Frame>,
    depth: Arc<AtomicUsize>,
    alive: Arc<AtomicBool>,
    name: String,
}

impl Link for SocketLink {
    fn try_send(&self, dest: Option<&str>, source: Option<&str>, payload: &[u8]) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }
        let frame = Frame::new(
            dest.map(str::to_owned),
            source.map(str::to_owned),
            payload.to_vec(),
        );
        // Count the frame before it becomes visible to the sender, so
        // the sender's decrement can never land first and underflow.
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(frame).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        if depth > QUEUE_DEPTH_WARN {
            warn!(link = %self.name, depth, "outbound queue is backlogged");
        }
        true
    }
}

async fn run_sender<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    depth: Arc<AtomicUsize>,
    keepalive_interval: Duration,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    loop {
        let frame = match tokio::time::timeout(keepalive_interval, rx.recv()).await {
            Ok(Some(frame)) => {
                depth.fetch_sub(1, Ordering::Relaxed);
                frame
            }
            Ok(None) => break,
            Err(_) => Frame::keepalive(),
        };
        buf.clear();
        frame.encode(&mut buf)?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn run_receiver<R>(
    mut reader: R,
    node: Arc<Node>,
    link_name: &str,
    deny: &LinkRef,
    config: &SessionConfig,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let decoder = FrameDecoder::with_max_payload(config.max_payload);
    let mut buf = BytesMut::with_capacity(4096);
    let mut expect_keepalives = false;
    let mut last_receive = Instant::now();

    loop {
        match read_frame(&mut reader, &decoder, &mut buf, config.keepalive_interval).await? {
            ReadOutcome::Frame(frame) => {
                last_receive = Instant::now();
                if frame.is_keepalive() {
                    if !expect_keepalives {
                        info!(link = %link_name, "peer sends keepalives, enabling timeout");
                        expect_keepalives = true;
                    }
                    continue;
                }
                let source = prepend_link(link_name, frame.source.as_deref());
                trace!(link = %link_name, dest = ?frame.dest, source = %source, "received frame");
                node.transmit(
                    frame.dest.as_deref(),
                    Some(&source),
                    &frame.payload,
                    Some(deny),
                );
            }
            ReadOutcome::Timeout => {
                if expect_keepalives && last_receive.elapsed() > config.disconnect_timeout {
                    debug!(link = %link_name, "keepalive timeout, dropping connection");
                    return Ok(());
                }
            }
            ReadOutcome::Reset => {
                debug!(link = %link_name, "connection reset by peer");
                return Ok(());
            }
            ReadOutcome::Closed => {
                debug!(link = %link_name, "connection closed by peer");
                return Ok(());
            }
        }
    }
}

/// One established connection.
pub struct Session;

impl Session {
    /// Drive a connection to completion: handshake, register the link,
    /// then run the sender and receiver loops until either side ends.
    ///
    /// The link stays registered after the session ends. A later session
    /// under the same name replaces it; until then routing to this link
    /// fails quietly through the dead [`SocketLink`].
    pub async fn run(
        stream: TcpStream,
        node: Arc<Node>,
        config: SessionConfig,
    ) -> Result<(), SessionError> {
        stream.set_nodelay(true)?;
        let mut stream = stream;
        let outcome = exchange_header(&mut stream, config.remote_hint.as_deref()).await?;
        let link_name = outcome
            .peer_hint
            .clone()
            .unwrap_or_else(|| config.link_name.clone());
        info!(link = %link_name, version = outcome.version, "session established");

        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let alive = Arc::new(AtomicBool::new(true));
        let link: LinkRef = Arc::new(SocketLink {
            tx,
            depth: depth.clone(),
            alive: alive.clone(),
            name: link_name.clone(),
        });
        node.add_or_replace_link(&link_name, link.clone())?;
        node.notify_network_modified();

        let sender = tokio::spawn(run_sender(
            writer,
            rx,
            depth,
            config.keepalive_interval,
        ));

        let result = run_receiver(reader, node.clone(), &link_name, &link, &config).await;
        alive.store(false, Ordering::Release);
        sender.abort();
        info!(link = %link_name, "session ended");
        result
    }
}
