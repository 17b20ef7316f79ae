//! linkmux - many TCP connections over one link.
//!
//! A hub accepts application connections and multiplexes them, tagged by a
//! 32-bit connection id, over a single link to a remote. The remote
//! demultiplexes and dials a fixed backend once per new id.
//!
//! # Architecture
//!
//! ```text
//! clients ──► Hub ════ link (512-byte records) ════ Remote ──► backend
//! ```
//!
//! # Modules
//!
//! - [`mux`] - wire codec, connection table and session engine
//! - [`role`] - hub and remote drivers
//! - [`transport`] - TCP dialer and the file-backed link
//! - [`config`] - configuration loading and validation

pub mod config;
pub mod constants;
pub mod error;
pub mod mux;
pub mod role;
pub mod transport;

pub use config::Config;
pub use error::{DecodeError, MuxError};
pub use mux::{Frame, Session};
pub use role::{Hub, Remote};
