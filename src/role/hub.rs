//! Hub role: many application connections out over one link.
//!
//! The link is obtained once at startup. Every accepted application
//! connection is registered under a fresh id; frames for ids the hub does
//! not know are dropped, since only the hub originates connections.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::net::TcpListener;

use super::join_task;
use crate::config::{HubSettings, LinkEndpoint};
use crate::mux::Session;
use crate::transport::file::FileLink;
use crate::transport::{BoxedStream, Dialer, TcpDialer};

/// Back-off after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A started hub: link established, listener bound.
pub struct Hub {
    link: BoxedStream,
    listener: TcpListener,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("listener", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Establish the link and bind the application listener.
    ///
    /// # Errors
    ///
    /// Fails if the link cannot be dialed or opened, or the listen address
    /// cannot be bound. These are startup-fatal.
    pub async fn start(settings: HubSettings) -> Result<Self> {
        let link = match &settings.link {
            LinkEndpoint::Tcp(addr) => TcpDialer::new(addr.clone())
                .dial()
                .await
                .with_context(|| format!("Failed to dial link {addr}"))?,
            LinkEndpoint::Files { input, output } => {
                FileLink::open(input, output, settings.file_options.clone())
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to open link files {} / {}",
                            input.display(),
                            output.display()
                        )
                    })?
            }
        };
        info!("[Hub] Link established via {:?}", settings.link);

        let listener = TcpListener::bind(&settings.listen)
            .await
            .with_context(|| format!("Failed to bind {}", settings.listen))?;
        info!("[Hub] Listening on {}", settings.listen);

        Ok(Self { link, listener })
    }

    /// Address the application listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the session and accept applications until the link dies.
    ///
    /// # Errors
    ///
    /// Always returns an error describing why the session ended.
    pub async fn run(self) -> Result<()> {
        let (session, dispatcher) = Session::new(None);
        let (link_read, link_write) = tokio::io::split(self.link);
        let reader = session.spawn_link_reader(link_read);
        let dispatch = dispatcher.spawn(link_write);

        loop {
            tokio::select! {
                () = session.closed() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("[Hub] set_nodelay for {} failed: {}", peer, e);
                        }
                        match session.register_connection(stream, 0).await {
                            Ok(id) => info!("[Hub] conn={:08x} accepted from {}", id, peer),
                            Err(e) => warn!("[Hub] Dropping connection from {}: {}", peer, e),
                        }
                    }
                    Err(e) => {
                        error!("[Hub] Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }

        join_task("dispatch loop", dispatch).await?;
        join_task("link reader", reader).await?;
        bail!("hub session ended")
    }
}
