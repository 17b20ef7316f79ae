//! Connection multiplexing over a single link.
//!
//! Many logical connections, each tagged with a 32-bit id, share one link.
//! Traffic crosses the link as fixed 512-byte records.
//!
//! # Architecture
//!
//! ```text
//! app conns ──► Session ──► [512-byte records] ──► Session ──► backend conns
//!   (hub)        │                                    │          (remote)
//!                └── ConnectionTable                  └── ConnectionTable
//! ```
//!
//! - [`framing`] - wire record codec
//! - [`table`] - id → logical connection map
//! - [`session`] - reader tasks, queues and the dispatch loop

pub mod framing;
pub mod session;
pub mod table;

pub use framing::Frame;
pub use session::{Dispatcher, Session};
pub use table::{ConnectionTable, LogicalConnection};
