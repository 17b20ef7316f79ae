//! The multiplexing engine.
//!
//! A session carries many logical connections over one link:
//!
//! ```text
//! conn reader ─┐                                  ┌─► conn writer (existing)
//! conn reader ─┼─► uplink queue ─┐      ┌─► table ─┤
//! conn reader ─┘                 ├─ dispatch       └─► dial backend + register
//!                                │      │
//! link reader ──► downlink queue ┘      └─► link writer
//! ```
//!
//! The dispatch loop is the only consumer of both queues and the only writer
//! to the link and to connection streams. It waits on both queues with no
//! priority, so nothing is ordered across directions. Frames from one
//! connection keep their read order because a single reader task produces
//! them into a FIFO queue.
//!
//! There is no shutdown signal from the outside. The session stops when the
//! link fails: a link write error ends the dispatch loop and a link read
//! error ends the link reader, and either one trips the session's
//! cancellation token so the other tasks follow.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::framing::Frame;
use super::table::{ConnectionTable, SharedWriter, TableGuard};
use crate::constants::{PAYLOAD_CAPACITY, QUEUE_CAPACITY, RECORD_LEN, UNASSIGNED_ID};
use crate::error::MuxError;
use crate::transport::Dialer;

struct SessionInner {
    table: ConnectionTable,
    uplink_tx: mpsc::Sender<Frame>,
    downlink_tx: mpsc::Sender<Frame>,
    backend: Option<Arc<dyn Dialer>>,
    shutdown: CancellationToken,
}

/// Shared handle to one multiplexing session.
///
/// Cheap to clone; every connection reader holds one.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.inner.backend)
            .field("shut_down", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// The dispatch loop, holding the receiving ends of both queues.
///
/// Created alongside its [`Session`]; consumed by [`Dispatcher::run`].
pub struct Dispatcher {
    session: Session,
    uplink_rx: mpsc::Receiver<Frame>,
    downlink_rx: mpsc::Receiver<Frame>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("uplink_pending", &self.uplink_rx.len())
            .field("downlink_pending", &self.downlink_rx.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session and its dispatch loop.
    ///
    /// With a `backend`, frames for unknown ids dial a new backend stream
    /// (remote role). Without one they are dropped (hub role).
    pub fn new(backend: Option<Arc<dyn Dialer>>) -> (Self, Dispatcher) {
        let (uplink_tx, uplink_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (downlink_tx, downlink_rx) = mpsc::channel(QUEUE_CAPACITY);
        let session = Self {
            inner: Arc::new(SessionInner {
                table: ConnectionTable::new(),
                uplink_tx,
                downlink_tx,
                backend,
                shutdown: CancellationToken::new(),
            }),
        };
        let dispatcher = Dispatcher {
            session: session.clone(),
            uplink_rx,
            downlink_rx,
        };
        (session, dispatcher)
    }

    /// The connection table.
    pub fn table(&self) -> &ConnectionTable {
        &self.inner.table
    }

    /// Whether the session has stopped.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Wait until the session stops.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Stop the session and every task attached to it.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Register a stream as a logical connection and start its reader.
    ///
    /// An `id` of zero allocates a fresh random id; any other id is used
    /// as-is, replacing an existing entry. Returns the id in use.
    ///
    /// # Errors
    ///
    /// Fails if the session has shut down or no free id could be drawn.
    pub async fn register_connection<S>(&self, stream: S, id: u32) -> Result<u32, MuxError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(MuxError::SessionClosed);
        }
        let mut table = self.inner.table.lock().await;
        let id = if id == UNASSIGNED_ID {
            table.allocate_id()?
        } else {
            id
        };
        self.attach(&mut table, id, stream);
        info!("[Session] conn={:08x} registered", id);
        Ok(id)
    }

    /// Insert `stream` under `id` in an already locked table.
    ///
    /// Returns the entry's serial and write half.
    fn attach<S>(&self, table: &mut TableGuard<'_>, id: u32, stream: S) -> (u64, SharedWriter)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let conn = table.insert(id, Box::new(writer));
        let serial = conn.serial();
        let shared = conn.writer();

        let session = self.clone();
        tokio::spawn(async move {
            session.read_connection(id, serial, reader).await;
        });
        (serial, shared)
    }

    /// Per-connection reader: real stream → uplink queue.
    ///
    /// A clean end-of-stream is a half-close: the entry and its write half
    /// stay registered so replies still reach the peer. The entry is pruned
    /// on a read error, or later by [`Session::deliver`] once a write fails.
    async fn read_connection<R>(self, id: u32, serial: u64, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; PAYLOAD_CAPACITY];
        let prune = loop {
            let n = tokio::select! {
                () = self.inner.shutdown.cancelled() => break true,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("[Session] conn={:08x} half-closed by peer", id);
                        break false;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("[Session] conn={:08x} read failed: {}", id, e);
                        break true;
                    }
                },
            };

            let frame = Frame::data(id, Bytes::copy_from_slice(&buf[..n]));
            if self.inner.uplink_tx.send(frame).await.is_err() {
                debug!("[Session] conn={:08x} uplink closed", id);
                break true;
            }
        };

        if prune && self.inner.table.remove_if_current(id, serial).await {
            debug!("[Session] conn={:08x} removed from table", id);
        }
    }

    /// Spawn the link reader on its own task.
    pub fn spawn_link_reader<R>(&self, reader: R) -> JoinHandle<Result<(), MuxError>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move { session.read_link(reader).await })
    }

    /// Link reader: fixed-size records → downlink queue.
    ///
    /// Malformed records are dropped. Returns when the link fails or the
    /// session shuts down, and shuts the session down in either case.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::LinkRead`] when reading the link fails, including
    /// the peer closing it.
    pub async fn read_link<R>(&self, mut reader: R) -> Result<(), MuxError>
    where
        R: AsyncRead + Unpin,
    {
        let mut record = [0u8; RECORD_LEN];
        let result = loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break Ok(()),
                read = reader.read_exact(&mut record) => {
                    if let Err(e) = read {
                        warn!("[Session] Link read failed: {}", e);
                        break Err(MuxError::LinkRead(e));
                    }
                }
            }

            match Frame::decode(&record) {
                Ok(frame) => {
                    if self.inner.downlink_tx.send(frame).await.is_err() {
                        break Err(MuxError::SessionClosed);
                    }
                }
                Err(e) => warn!("[Session] Protocol violation on link, dropping record: {}", e),
            }
        };
        self.shutdown();
        result
    }

    /// Deliver one downlink frame to its logical connection.
    ///
    /// Unknown ids dial the backend when one is configured. The table stays
    /// locked across the dial so a concurrent registration cannot race it.
    /// A failed write prunes the entry it was aimed at.
    async fn deliver(&self, frame: Frame) {
        let id = frame.id;
        let (serial, writer) = {
            let mut table = self.inner.table.lock().await;
            let existing = table.get(id).map(|conn| (conn.serial(), conn.writer()));
            match (existing, &self.inner.backend) {
                (Some(existing), _) => existing,
                (None, None) => {
                    debug!(
                        "[Session] conn={:08x} unknown, dropping {} bytes",
                        id,
                        frame.payload.len()
                    );
                    return;
                }
                (None, Some(_)) if id == UNASSIGNED_ID => {
                    warn!("[Session] Protocol violation: frame with unassigned id, dropping");
                    return;
                }
                (None, Some(dialer)) => match dialer.dial().await {
                    Ok(stream) => {
                        info!("[Session] conn={:08x} dialed backend {:?}", id, dialer);
                        self.attach(&mut table, id, stream)
                    }
                    Err(e) => {
                        warn!("[Session] conn={:08x} backend dial failed: {}", id, e);
                        return;
                    }
                },
            }
        };

        let written = {
            let mut writer = writer.lock().await;
            writer.write_all(&frame.payload).await
        };
        if let Err(e) = written {
            warn!("[Session] conn={:08x} write failed: {}", id, e);
            if self.inner.table.remove_if_current(id, serial).await {
                debug!("[Session] conn={:08x} removed from table", id);
            }
        }
    }
}

impl Dispatcher {
    /// The session this loop serves.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Spawn the dispatch loop on its own task.
    pub fn spawn<W>(self, link: W) -> JoinHandle<Result<(), MuxError>>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        tokio::spawn(self.run(link))
    }

    /// Run the dispatch loop until the link fails or the session stops.
    ///
    /// # Errors
    ///
    /// Returns [`MuxError::LinkWrite`] when writing to the link fails. The
    /// session is shut down on return either way.
    pub async fn run<W>(mut self, mut link: W) -> Result<(), MuxError>
    where
        W: AsyncWrite + Unpin,
    {
        let shutdown = self.session.inner.shutdown.clone();
        let result = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                Some(frame) = self.uplink_rx.recv() => {
                    if let Err(e) = write_record(&mut link, &frame).await {
                        error!("[Session] conn={:08x} link write failed: {}", frame.id, e);
                        break Err(MuxError::LinkWrite(e));
                    }
                }
                Some(frame) = self.downlink_rx.recv() => self.session.deliver(frame).await,
                else => break Ok(()),
            }
        };
        shutdown.cancel();
        result
    }
}

async fn write_record<W>(link: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    link.write_all(&frame.encode()).await?;
    link.flush().await
}
