//! Wire and runtime constants for linkmux.
//!
//! # Categories
//!
//! - **Wire format**: fixed record layout shared by both peers
//! - **Session**: queue depth and id allocation
//! - **File link**: size cap and polling cadence

use std::time::Duration;

// ============================================================================
// Wire format
// ============================================================================

/// Size of the record header: id, status and payload length, 4 bytes each.
pub const HEADER_LEN: usize = 12;

/// Size of the payload region carried by every record.
///
/// Connection readers never read more than this per frame, and the codec
/// truncates anything longer.
pub const PAYLOAD_CAPACITY: usize = 500;

/// Total size of one encoded record on the wire.
pub const RECORD_LEN: usize = HEADER_LEN + PAYLOAD_CAPACITY;

/// Connection id that asks the session to allocate a fresh id.
///
/// Never appears on the wire as a real connection.
pub const UNASSIGNED_ID: u32 = 0;

// ============================================================================
// Session
// ============================================================================

/// Depth of the uplink and downlink queues, in frames.
///
/// This is the only flow control in the system. A full downlink queue stalls
/// the link reader and therefore every multiplexed connection.
pub const QUEUE_CAPACITY: usize = 200;

/// Maximum random draws when allocating a connection id.
pub const ID_PROBE_LIMIT: usize = 64;

// ============================================================================
// File link
// ============================================================================

/// Size at which a link file is handed back to the peer for truncation (100 MiB).
pub const MAX_LINK_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Interval between file size checks while waiting on the peer.
pub const FILE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Read buffer used by the file link pumps.
pub const FILE_PUMP_CHUNK: usize = 16 * 1024;
