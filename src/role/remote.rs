//! Remote role: one link in, backend connections out.
//!
//! Accepts exactly one link and then serves it for the rest of the process.
//! Every id seen for the first time on the link dials a fresh backend
//! connection registered under that id.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::net::TcpListener;

use super::join_task;
use crate::config::{LinkEndpoint, RemoteSettings};
use crate::mux::Session;
use crate::transport::file::FileLink;
use crate::transport::{BoxedStream, Dialer, TcpDialer};

enum PendingLink {
    Listening(TcpListener),
    Open(BoxedStream),
}

/// A bound remote, waiting for its link.
pub struct Remote {
    link: PendingLink,
    backend: Arc<dyn Dialer>,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("local_addr", &self.local_addr())
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Remote {
    /// Bind the link listener, or open the link files.
    ///
    /// # Errors
    ///
    /// Fails if the listen address cannot be bound or the files cannot be
    /// opened. These are startup-fatal.
    pub async fn bind(settings: RemoteSettings) -> Result<Self> {
        let link = match &settings.link {
            LinkEndpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind {addr}"))?;
                info!("[Remote] Waiting for link on {}", addr);
                PendingLink::Listening(listener)
            }
            LinkEndpoint::Files { input, output } => {
                let stream = FileLink::open(input, output, settings.file_options.clone())
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to open link files {} / {}",
                            input.display(),
                            output.display()
                        )
                    })?;
                PendingLink::Open(stream)
            }
        };

        Ok(Self {
            link,
            backend: Arc::new(TcpDialer::new(settings.forward)),
        })
    }

    /// Replace the backend dialer.
    pub fn with_backend(mut self, backend: Arc<dyn Dialer>) -> Self {
        self.backend = backend;
        self
    }

    /// Address of the link listener, when the link is TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.link {
            PendingLink::Listening(listener) => listener.local_addr().ok(),
            PendingLink::Open(_) => None,
        }
    }

    /// Accept the link and serve it until it fails.
    ///
    /// The link reader runs on the calling task.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting the link fails, or describing why the
    /// link ended.
    pub async fn run(self) -> Result<()> {
        let link: BoxedStream = match self.link {
            PendingLink::Listening(listener) => {
                let (stream, peer) = listener.accept().await.context("Failed to accept link")?;
                stream
                    .set_nodelay(true)
                    .context("Failed to set TCP_NODELAY on link")?;
                info!("[Remote] Link accepted from {}", peer);
                // Exactly one link per process.
                drop(listener);
                Box::new(stream)
            }
            PendingLink::Open(stream) => stream,
        };

        let (session, dispatcher) = Session::new(Some(self.backend));
        let (link_read, link_write) = tokio::io::split(link);
        let dispatch = dispatcher.spawn(link_write);

        let read_result = session.read_link(link_read).await;
        join_task("dispatch loop", dispatch).await?;
        read_result.context("link reader stopped")
    }
}
