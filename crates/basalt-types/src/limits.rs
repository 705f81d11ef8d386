//! Platform-wide size limits and on-device geometry.
//!
//! All zone and trailer capacities are multiples of [`SECTOR_SIZE`] so that
//! every verified region starts and ends on a sector boundary.

/// Simulated device sector size in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Grid block size in bytes. Every grid block occupies exactly this much
/// device space; the logically-stored size is declared by the block header.
pub const BLOCK_SIZE: usize = 4096;

/// Maximum number of grid blocks the device addresses. Block addresses run
/// `1..=GRID_BLOCKS_MAX`.
pub const GRID_BLOCKS_MAX: usize = 2048;

/// Number of redundant on-device superblock copies.
pub const SUPERBLOCK_COPIES: usize = 4;

/// Fixed header region at the front of each superblock copy. Replica-local
/// (sequence numbers, parent pointers); never verified across replicas.
pub const SUPERBLOCK_HEADER_SIZE: usize = 4096;

/// Capacity reserved for the manifest trailer in each superblock copy.
pub const MANIFEST_TRAILER_CAPACITY: usize = 16 * 1024;

/// Capacity reserved for the free-set trailer in each superblock copy:
/// one bit per grid block, rounded up to a sector boundary.
pub const FREE_SET_TRAILER_CAPACITY: usize = sector_ceil(GRID_BLOCKS_MAX / 8);

/// Fixed size of one message header (shared with `basalt-schema`).
pub const MESSAGE_HEADER_SIZE: usize = 64;

/// Maximum number of client-session slots (one reply retained per client).
pub const REPLY_SLOTS_MAX: usize = 64;

/// Capacity of one client-reply slot in the client-replies zone.
pub const REPLY_SIZE_MAX: usize = 4096;

/// Serialized size of one client-sessions trailer entry: the session number
/// followed by the retained reply header.
pub const CLIENT_SESSION_ENTRY_SIZE: usize = 8 + MESSAGE_HEADER_SIZE;

/// Capacity reserved for the client-sessions trailer in each superblock copy.
pub const CLIENT_SESSIONS_TRAILER_CAPACITY: usize = REPLY_SLOTS_MAX * CLIENT_SESSION_ENTRY_SIZE;

/// Total size of one superblock copy: header plus the three trailer regions.
pub const SUPERBLOCK_COPY_SIZE: usize = SUPERBLOCK_HEADER_SIZE
    + MANIFEST_TRAILER_CAPACITY
    + FREE_SET_TRAILER_CAPACITY
    + CLIENT_SESSIONS_TRAILER_CAPACITY;

/// Round `size` up to the next sector boundary.
#[inline]
#[must_use]
pub const fn sector_ceil(size: usize) -> usize {
    size.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}
