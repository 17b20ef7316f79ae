//! Duplex stream emulated over two shared files.
//!
//! Used when the two peers have no direct network path but share a
//! filesystem. Each side appends to its output file and tails its input file
//! (the peer's output). Files are bounded: once an output file reaches the
//! size cap the writer stops and polls until the reader has drained and
//! truncated it, then continues from offset zero.
//!
//! # Architecture
//!
//! ```text
//! Session ◄──► DuplexStream (local end)
//!                    │
//!        ┌───────────┴───────────┐
//!   inbound pump             outbound pump
//!   input file ──► duplex    duplex ──► output file
//! ```
//!
//! Pump failures are logged and surface to the session as end-of-stream.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use super::poll::{wait_until, IntervalPoller, Poller};
use super::BoxedStream;
use crate::constants::{FILE_POLL_INTERVAL, FILE_PUMP_CHUNK, MAX_LINK_FILE_SIZE};

/// Tuning for a [`FileLink`].
#[derive(Clone)]
pub struct FileLinkOptions {
    /// Size at which an output file is handed back for truncation.
    pub max_file_size: u64,
    /// Cadence for size checks.
    pub poller: Arc<dyn Poller>,
}

impl Default for FileLinkOptions {
    fn default() -> Self {
        Self {
            max_file_size: MAX_LINK_FILE_SIZE,
            poller: Arc::new(IntervalPoller::new(FILE_POLL_INTERVAL)),
        }
    }
}

impl fmt::Debug for FileLinkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLinkOptions")
            .field("max_file_size", &self.max_file_size)
            .field("poller", &self.poller)
            .finish()
    }
}

/// Opens file-backed links.
#[derive(Debug, Clone, Copy)]
pub struct FileLink;

impl FileLink {
    /// Open a link that reads `input` and appends to `output`.
    ///
    /// Both files are created if missing. Returns the local end of an
    /// in-memory duplex pipe; two background pumps move bytes between it and
    /// the files.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be created or opened.
    pub async fn open(
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        options: FileLinkOptions,
    ) -> io::Result<BoxedStream> {
        let input = input.as_ref().to_path_buf();
        let output = output.as_ref().to_path_buf();

        ensure_exists(&input).await?;
        let input_file = File::open(&input).await?;
        let output_file = open_output(&output).await?;

        let (local, remote) = tokio::io::duplex(FILE_PUMP_CHUNK * 4);
        let (from_session, to_session) = tokio::io::split(remote);

        // Both pumps share one task: when either stops, the other is dropped
        // with it and the session end sees EOF on read and BrokenPipe on write.
        let inbound_opts = options.clone();
        tokio::spawn(async move {
            let input_name = input.display().to_string();
            let output_name = output.display().to_string();
            tokio::select! {
                result = pump_inbound(input, input_file, to_session, inbound_opts) => {
                    match result {
                        Ok(()) => debug!("[FileLink] Inbound pump for {} finished", input_name),
                        Err(e) => warn!("[FileLink] Inbound pump for {} failed: {}", input_name, e),
                    }
                }
                result = pump_outbound(output, output_file, from_session, options) => {
                    match result {
                        Ok(()) => debug!("[FileLink] Outbound pump for {} finished", output_name),
                        Err(e) => warn!("[FileLink] Outbound pump for {} failed: {}", output_name, e),
                    }
                }
            }
            info!("[FileLink] Link {} / {} closed", input_name, output_name);
        });

        Ok(Box::new(local))
    }
}

async fn ensure_exists(path: &Path) -> io::Result<()> {
    OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(())
}

async fn open_output(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn file_len(path: &Path) -> io::Result<u64> {
    Ok(fs::metadata(path).await?.len())
}

/// Tail `file` into the session end of the pipe.
async fn pump_inbound(
    path: PathBuf,
    mut file: File,
    mut sink: WriteHalf<DuplexStream>,
    options: FileLinkOptions,
) -> io::Result<()> {
    let path = path.as_path();
    let ticks = wait_until(options.poller.as_ref(), || async move {
        Ok::<_, io::Error>(file_len(path).await? > 0)
    })
    .await?;
    info!(
        "[FileLink] {} has data after {} polls, using it as input",
        path.display(),
        ticks
    );

    let mut buf = vec![0u8; FILE_PUMP_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n > 0 {
            sink.write_all(&buf[..n]).await?;
            continue;
        }

        // EOF. Only reclaim the file once it is full and fully consumed;
        // the writer has stopped appending by then.
        let len = file_len(path).await?;
        if len >= options.max_file_size && file.stream_position().await? >= len {
            drop(file);
            OpenOptions::new()
                .write(true)
                .open(path)
                .await?
                .set_len(0)
                .await?;
            file = File::open(path).await?;
            info!("[FileLink] Drained and truncated {}", path.display());
        } else {
            options.poller.tick().await;
        }
    }
}

/// Append everything the session writes to `file`.
async fn pump_outbound(
    path: PathBuf,
    mut file: File,
    mut source: ReadHalf<DuplexStream>,
    options: FileLinkOptions,
) -> io::Result<()> {
    let path = path.as_path();
    let mut buf = vec![0u8; FILE_PUMP_CHUNK];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        if file_len(path).await? >= options.max_file_size {
            file.flush().await?;
            drop(file);
            info!("[FileLink] {} is full, waiting for the peer to drain it", path.display());
            wait_until(options.poller.as_ref(), || async move {
                Ok::<_, io::Error>(file_len(path).await? == 0)
            })
            .await?;
            file = open_output(path).await?;
            info!("[FileLink] {} emptied, reusing it as output", path.display());
        }

        file.write_all(&buf[..n]).await?;
        file.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn fast_options(max_file_size: u64) -> FileLinkOptions {
        FileLinkOptions {
            max_file_size,
            poller: Arc::new(IntervalPoller::new(Duration::from_millis(5))),
        }
    }

    #[tokio::test]
    async fn test_bytes_cross_between_two_links() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a_out = tmp.path().join("a.bin");
        let b_out = tmp.path().join("b.bin");

        let mut a = FileLink::open(&b_out, &a_out, fast_options(MAX_LINK_FILE_SIZE))
            .await
            .unwrap();
        let mut b = FileLink::open(&a_out, &b_out, fast_options(MAX_LINK_FILE_SIZE))
            .await
            .unwrap();

        a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        timeout(Duration::from_secs(5), b.read_exact(&mut buf))
            .await
            .expect("Timed out waiting for a -> b")
            .unwrap();
        assert_eq!(&buf, b"hello");

        b.write_all(b"world").await.unwrap();
        timeout(Duration::from_secs(5), a.read_exact(&mut buf))
            .await
            .expect("Timed out waiting for b -> a")
            .unwrap();
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_size_cap_hands_file_back_for_truncation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a_out = tmp.path().join("a.bin");
        let b_out = tmp.path().join("b.bin");

        let mut a = FileLink::open(&b_out, &a_out, fast_options(64)).await.unwrap();
        let mut b = FileLink::open(&a_out, &b_out, fast_options(64)).await.unwrap();

        let sent: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
        for chunk in sent.chunks(100) {
            a.write_all(chunk).await.unwrap();
        }

        let mut received = vec![0u8; sent.len()];
        timeout(Duration::from_secs(10), b.read_exact(&mut received))
            .await
            .expect("Timed out reading across truncations")
            .unwrap();
        assert_eq!(received, sent);

        // Once everything is consumed the reader truncates the full file.
        timeout(Duration::from_secs(5), async {
            while file_len(&a_out).await.unwrap() >= 64 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Output file was never truncated");
    }

    #[tokio::test]
    async fn test_pump_failure_reaches_session_as_eof() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("in.bin");
        let output = tmp.path().join("out.bin");

        let mut link = FileLink::open(&input, &output, fast_options(64)).await.unwrap();
        // The inbound pump is still polling for data; losing its input fails it.
        fs::remove_file(&input).await.unwrap();

        let mut buf = [0u8; 8];
        let read = timeout(Duration::from_secs(2), link.read(&mut buf))
            .await
            .expect("Link read hung after the inbound pump failed");
        assert!(matches!(read, Ok(0) | Err(_)), "unexpected read: {read:?}");

        // The outbound pump went down with it.
        let write = timeout(Duration::from_secs(2), async {
            link.write_all(b"x").await?;
            link.flush().await
        })
        .await
        .expect("Link write hung after the pumps stopped");
        assert!(write.is_err());
    }

    #[tokio::test]
    async fn test_missing_files_are_created() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("in.bin");
        let output = tmp.path().join("out.bin");

        let _link = FileLink::open(&input, &output, fast_options(64)).await.unwrap();
        assert!(input.exists());
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_unopenable_path_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = tmp.path().join("missing-dir").join("in.bin");
        let output = tmp.path().join("out.bin");

        assert!(FileLink::open(&input, &output, fast_options(64)).await.is_err());
    }
}
