//! The working superblock.
//!
//! The superblock anchors a replica's durable state: the VSR commit/sync
//! positions plus three checkpoint trailers (manifest, free set, client
//! sessions), each written to every redundant superblock copy with a
//! declared size and content checksum. Header parsing, quorum repair, and
//! sequence arbitration live with the replica runtime; this crate models
//! the installed record and the on-device trailer layout that the storage
//! verifier consumes.

pub mod client_sessions;
pub mod free_set;

pub use client_sessions::{ClientSessions, Slot};
pub use free_set::FreeSet;

use std::fmt;

use basalt_error::{BasaltError, Result};
use basalt_storage::{SimStorage, Zone};
use basalt_types::checksum;
use basalt_types::limits::{
    CLIENT_SESSIONS_TRAILER_CAPACITY, FREE_SET_TRAILER_CAPACITY, MANIFEST_TRAILER_CAPACITY,
    SUPERBLOCK_COPIES, SUPERBLOCK_COPY_SIZE, SUPERBLOCK_HEADER_SIZE,
};
use tracing::debug;

/// The three checkpoint trailer areas carried by every superblock copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrailerArea {
    Manifest,
    FreeSet,
    ClientSessions,
}

impl TrailerArea {
    /// All areas, in on-device order.
    pub const ALL: [Self; 3] = [Self::Manifest, Self::FreeSet, Self::ClientSessions];

    /// Capacity reserved for this trailer in each superblock copy.
    #[must_use]
    pub const fn capacity(self) -> usize {
        match self {
            Self::Manifest => MANIFEST_TRAILER_CAPACITY,
            Self::FreeSet => FREE_SET_TRAILER_CAPACITY,
            Self::ClientSessions => CLIENT_SESSIONS_TRAILER_CAPACITY,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Manifest => 0,
            Self::FreeSet => 1,
            Self::ClientSessions => 2,
        }
    }

    const fn offset_in_copy(self) -> usize {
        SUPERBLOCK_HEADER_SIZE
            + match self {
                Self::Manifest => 0,
                Self::FreeSet => MANIFEST_TRAILER_CAPACITY,
                Self::ClientSessions => MANIFEST_TRAILER_CAPACITY + FREE_SET_TRAILER_CAPACITY,
            }
    }
}

impl fmt::Display for TrailerArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manifest => "manifest",
            Self::FreeSet => "free_set",
            Self::ClientSessions => "client_sessions",
        })
    }
}

/// Absolute device offset of `area`'s trailer in superblock copy `copy`.
#[must_use]
pub fn trailer_offset(copy: usize, area: TrailerArea) -> usize {
    assert!(copy < SUPERBLOCK_COPIES, "superblock copy {copy} out of range");
    Zone::SuperBlock.start() + copy * SUPERBLOCK_COPY_SIZE + area.offset_in_copy()
}

/// Replica position within the VSR protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VsrState {
    /// Highest committed (and checkpointed) operation number.
    pub commit_min: u64,
    /// Nonzero iff the replica is catching up via state transfer.
    pub sync_op_max: u64,
}

impl VsrState {
    /// Whether the replica is mid-sync.
    #[must_use]
    pub const fn is_syncing(&self) -> bool {
        self.sync_op_max != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrailerMeta {
    size: u32,
    checksum: u128,
}

/// The currently-installed superblock record.
///
/// `install` is the simulation-side stand-in for the checkpoint write path:
/// it serializes the trailers into every copy and records their declared
/// sizes and checksums, which is exactly the state a restarted replica
/// would recover.
#[derive(Debug, Clone)]
pub struct SuperBlock {
    /// Working VSR state.
    pub vsr_state: VsrState,
    trailers: [TrailerMeta; 3],
    client_sessions: ClientSessions,
}

impl SuperBlock {
    /// A superblock with no installed checkpoint: empty trailers, vacant
    /// session table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vsr_state: VsrState::default(),
            trailers: [TrailerMeta {
                size: 0,
                checksum: checksum(&[]),
            }; 3],
            client_sessions: ClientSessions::new(),
        }
    }

    /// Declared size of `area`'s trailer.
    #[must_use]
    pub fn trailer_size(&self, area: TrailerArea) -> u32 {
        self.trailers[area.index()].size
    }

    /// Declared checksum of `area`'s trailer.
    #[must_use]
    pub fn trailer_checksum(&self, area: TrailerArea) -> u128 {
        self.trailers[area.index()].checksum
    }

    /// Declared size of the free-set trailer.
    #[must_use]
    pub fn free_set_size(&self) -> u32 {
        self.trailer_size(TrailerArea::FreeSet)
    }

    /// Declared checksum of the free-set trailer.
    #[must_use]
    pub fn free_set_checksum(&self) -> u128 {
        self.trailer_checksum(TrailerArea::FreeSet)
    }

    /// The working client-sessions table.
    #[must_use]
    pub fn client_sessions(&self) -> &ClientSessions {
        &self.client_sessions
    }

    /// Install a checkpoint: serialize the three trailers into every
    /// superblock copy on `storage` and update the working record.
    pub fn install(
        &mut self,
        storage: &mut SimStorage,
        manifest: &[u8],
        free_set: &FreeSet,
        sessions: &ClientSessions,
        vsr_state: VsrState,
    ) -> Result<()> {
        let free_set_bytes = free_set.encode();
        let sessions_bytes = sessions.encode();
        let payloads: [(&[u8], TrailerArea); 3] = [
            (manifest, TrailerArea::Manifest),
            (&free_set_bytes, TrailerArea::FreeSet),
            (&sessions_bytes, TrailerArea::ClientSessions),
        ];

        for (bytes, area) in payloads {
            if bytes.len() > area.capacity() {
                return Err(BasaltError::trailer_corrupt(format!(
                    "{area} trailer length {} exceeds capacity {}",
                    bytes.len(),
                    area.capacity()
                )));
            }
        }

        for (bytes, area) in payloads {
            for copy in 0..SUPERBLOCK_COPIES {
                let offset = trailer_offset(copy, area);
                // Clear the whole region so stale bytes from an earlier,
                // longer trailer cannot survive past the declared size.
                storage.write_at(offset, &vec![0_u8; area.capacity()])?;
                storage.write_at(offset, bytes)?;
            }
            self.trailers[area.index()] = TrailerMeta {
                size: u32::try_from(bytes.len()).expect("trailer capacity fits in u32"),
                checksum: checksum(bytes),
            };
        }

        self.vsr_state = vsr_state;
        self.client_sessions = sessions.clone();
        debug!(
            commit_min = vsr_state.commit_min,
            sync_op_max = vsr_state.sync_op_max,
            free_set_bytes = free_set_bytes.len(),
            sessions_occupied = sessions.occupied(),
            "installed superblock checkpoint"
        );
        Ok(())
    }
}

impl Default for SuperBlock {
    fn default() -> Self {
        Self::new()
    }
}
