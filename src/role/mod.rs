//! Role drivers that assemble a [`Session`](crate::mux::Session).
//!
//! - [`hub`] - accepts many application connections, dials one link
//! - [`remote`] - accepts one link, dials the backend per connection id
//!
//! Both return only when their session is over; restarting is left to
//! whatever supervises the process.

pub mod hub;
pub mod remote;

pub use hub::Hub;
pub use remote::Remote;

use anyhow::{anyhow, Result};
use tokio::task::JoinHandle;

use crate::error::MuxError;

/// Collapse a finished session task into an error for the role's caller.
async fn join_task(name: &str, task: JoinHandle<Result<(), MuxError>>) -> Result<()> {
    match task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow!(e).context(format!("{name} stopped"))),
        Err(e) => Err(anyhow!("{name} task failed: {e}")),
    }
}
