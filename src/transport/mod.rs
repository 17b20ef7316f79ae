//! Byte-stream transports that can carry a link or a logical connection.
//!
//! Anything that is `AsyncRead + AsyncWrite` qualifies. Reads block until
//! data arrives and end-of-stream is reported as `Ok(0)`. Two concrete
//! transports ship with the crate:
//!
//! - TCP, via [`TcpDialer`] or an accepted `TcpStream`
//! - [`file::FileLink`], a duplex stream emulated over two shared files
//!
//! Rust guideline compliant 2025-01

pub mod file;
pub mod poll;

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A duplex byte stream usable as a link or a logical connection.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased duplex stream.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Opens new outbound streams to a fixed destination.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Open one new stream.
    async fn dial(&self) -> io::Result<BoxedStream>;
}

/// Dials a TCP address.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    /// Create a dialer for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Destination address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
