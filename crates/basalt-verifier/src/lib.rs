//! Deterministic cross-replica storage verifier.
//!
//! During simulation testing every replica executes the same operation
//! sequence against its own simulated device. At well-defined logical
//! points the on-disk state of the deterministic storage areas must be
//! byte-for-byte identical across replicas. One `StorageVerifier` instance
//! serves the whole simulation as the oracle: the first replica to reach a
//! logical point records the area checksums, and every later replica at the
//! same point is compared against the record.
//!
//! Two event classes feed the verifier:
//!
//! - **Compaction half-measures**: stable mid-window snapshots during
//!   background LSM compaction; only the grid is checked.
//! - **Checkpoints**: durable superblock-anchored snapshots; the three
//!   superblock trailers are always checked, and the client-replies zone
//!   and grid are checked when the replica is not mid-sync.
//!
//! Divergence between replicas surfaces as [`StorageMismatch`] and fails
//! the simulation. Corruption *within* one replica (a trailer that does not
//! match its own declared checksum, an acquired block missing from the
//! device) is not a divergence: it means the simulator itself is broken,
//! and the verifier asserts.
//!
//! Replica-local areas (superblock headers, WAL headers and prepares) and
//! unallocated grid regions are never verified.

mod checkpoint;
mod stream;

pub use checkpoint::{Checkpoint, CheckpointArea};
pub use stream::ChecksumStream;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use basalt_schema::{header_from_block, Command, HEADER_SIZE};
use basalt_storage::SimStorage;
use basalt_superblock::{trailer_offset, FreeSet, SuperBlock, TrailerArea};
use basalt_types::checksum;
use basalt_types::limits::{sector_ceil, GRID_BLOCKS_MAX, SUPERBLOCK_COPIES};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Divergence between replicas, reported to the replica runtime. The
/// runtime terminates the simulation run; every mismatched area has already
/// been logged at warn level with expected and actual checksums.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum StorageMismatch {
    /// The grid checksum at a compaction half-measure differs from the
    /// recorded value.
    #[error(
        "grid diverged at compaction half-measure {half_measure}: \
         expected {expected:#034x}, actual {actual:#034x}"
    )]
    CompactionDivergence {
        half_measure: u64,
        #[serde(serialize_with = "checkpoint::hex128")]
        expected: u128,
        #[serde(serialize_with = "checkpoint::hex128")]
        actual: u128,
    },
    /// One or more checkpoint areas differ from the recorded value.
    #[error("checkpoint diverged at op {op}: mismatched areas {areas:?}")]
    CheckpointDivergence {
        op: u64,
        areas: Vec<CheckpointArea>,
    },
}

/// Which event is asking for the grid checksum. At a half-measure the
/// manifest log may have acquired addresses whose block writes have not
/// landed yet, so stale headers are skipped there; a checkpoint is strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GridContext {
    Checkpoint,
    HalfMeasure,
}

/// The cross-replica storage oracle. One instance per simulation.
///
/// Stateless between events except for the two first-writer-wins logs and
/// the reusable free-set bitmap, which is allocated once here and reset
/// after every grid checksum; event handlers do not allocate per event.
#[derive(Debug)]
pub struct StorageVerifier {
    free_set: FreeSet,
    compactions: BTreeMap<u64, u128>,
    checkpoints: BTreeMap<u64, Checkpoint>,
}

impl StorageVerifier {
    /// Create a verifier sized for the platform grid.
    #[must_use]
    pub fn new() -> Self {
        Self {
            free_set: FreeSet::new(GRID_BLOCKS_MAX),
            compactions: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    /// Verify one replica's grid at a compaction half-measure.
    ///
    /// The replica runtime supplies the half-measure index; the first
    /// observation at an index becomes the reference for every later one.
    pub fn on_compaction_half_measure(
        &mut self,
        half_measure: u64,
        storage: &SimStorage,
        superblock: &SuperBlock,
    ) -> Result<(), StorageMismatch> {
        let actual = self.checksum_grid_with(storage, superblock, GridContext::HalfMeasure);
        match self.compactions.entry(half_measure) {
            Entry::Vacant(entry) => {
                debug!(
                    half_measure,
                    checksum = %format_args!("{actual:#034x}"),
                    "recorded compaction grid reference"
                );
                entry.insert(actual);
                Ok(())
            }
            Entry::Occupied(entry) => {
                let expected = *entry.get();
                if expected == actual {
                    return Ok(());
                }
                warn!(
                    half_measure,
                    expected = %format_args!("{expected:#034x}"),
                    actual = %format_args!("{actual:#034x}"),
                    "grid diverged between replicas at compaction half-measure"
                );
                Err(StorageMismatch::CompactionDivergence {
                    half_measure,
                    expected,
                    actual,
                })
            }
        }
    }

    /// Verify one replica's deterministic areas at a checkpoint.
    ///
    /// The checkpoint op is read from `superblock.vsr_state.commit_min`. A
    /// replica that is mid-sync contributes no client-replies or grid
    /// observation and cannot establish the record for an op; it is still
    /// compared on the three trailer areas when a record exists.
    pub fn on_checkpoint(
        &mut self,
        storage: &SimStorage,
        superblock: &SuperBlock,
    ) -> Result<(), StorageMismatch> {
        let op = superblock.vsr_state.commit_min;
        let syncing = superblock.vsr_state.is_syncing();

        let mut observation = Checkpoint::default();
        observation.insert(
            CheckpointArea::SuperblockManifest,
            checksum_trailer(storage, superblock, TrailerArea::Manifest),
        );
        observation.insert(
            CheckpointArea::SuperblockFreeSet,
            checksum_trailer(storage, superblock, TrailerArea::FreeSet),
        );
        observation.insert(
            CheckpointArea::SuperblockClientSessions,
            checksum_trailer(storage, superblock, TrailerArea::ClientSessions),
        );
        if !syncing {
            observation.insert(
                CheckpointArea::ClientReplies,
                checksum_client_replies(storage, superblock),
            );
            observation.insert(
                CheckpointArea::Grid,
                self.checksum_grid_with(storage, superblock, GridContext::Checkpoint),
            );
        }

        match self.checkpoints.entry(op) {
            Entry::Vacant(entry) => {
                if syncing {
                    // A syncing replica cannot compute two of the areas and
                    // has no deterministic claim on the other three either;
                    // recording would bind future replicas to an
                    // unverified value.
                    debug!(op, "syncing replica cannot establish the checkpoint record");
                    return Ok(());
                }
                debug!(op, "recorded checkpoint reference");
                entry.insert(observation);
                Ok(())
            }
            Entry::Occupied(entry) => {
                let record = entry.get();
                let mut mismatched = Vec::new();
                for area in CheckpointArea::ALL {
                    let (Some(expected), Some(actual)) = (record.get(area), observation.get(area))
                    else {
                        continue;
                    };
                    if expected != actual {
                        warn!(
                            %area,
                            op,
                            expected = %format_args!("{expected:#034x}"),
                            actual = %format_args!("{actual:#034x}"),
                            "checkpoint area diverged between replicas"
                        );
                        mismatched.push(area);
                    }
                }
                if mismatched.is_empty() {
                    Ok(())
                } else {
                    Err(StorageMismatch::CheckpointDivergence {
                        op,
                        areas: mismatched,
                    })
                }
            }
        }
    }

    /// Checksum of the acquired-grid-block set, checkpoint-strict.
    pub fn checksum_grid(&mut self, storage: &SimStorage, superblock: &SuperBlock) -> u128 {
        self.checksum_grid_with(storage, superblock, GridContext::Checkpoint)
    }

    /// Checksum of the acquired-grid-block set as observed at a compaction
    /// half-measure: acquired addresses whose block writes have not landed
    /// yet are skipped.
    pub fn checksum_grid_half_measure(
        &mut self,
        storage: &SimStorage,
        superblock: &SuperBlock,
    ) -> u128 {
        self.checksum_grid_with(storage, superblock, GridContext::HalfMeasure)
    }

    fn checksum_grid_with(
        &mut self,
        storage: &SimStorage,
        superblock: &SuperBlock,
        context: GridContext,
    ) -> u128 {
        let size = superblock.free_set_size() as usize;
        let declared = superblock.free_set_checksum();
        let offset = trailer_offset(0, TrailerArea::FreeSet);
        let trailer = &storage.memory()[offset..offset + size];
        assert_eq!(
            checksum(trailer),
            declared,
            "free set trailer does not match its declared checksum"
        );
        self.free_set
            .decode(trailer)
            .expect("superblock installed a free set trailer the decoder rejects");

        let mut stream = ChecksumStream::new();
        let mut blocks_missing = 0_u64;
        for address in self.free_set.iter_acquired() {
            let Some(block) = storage.grid_block(address) else {
                warn!(%address, "acquired grid block missing from device");
                blocks_missing += 1;
                continue;
            };
            let header = match header_from_block(block) {
                Ok(header) => header,
                Err(error) => {
                    if context == GridContext::HalfMeasure {
                        debug!(%address, %error, "skipping unwritten grid block at half-measure");
                        continue;
                    }
                    panic!("grid block {address} header corrupt at checkpoint: {error}");
                }
            };
            let block_size = header.size as usize;
            if context == GridContext::HalfMeasure
                && (header.op != address.get()
                    || !header.validate_body(&block[HEADER_SIZE..block_size]))
            {
                debug!(%address, "skipping grid block with stale header at half-measure");
                continue;
            }
            assert_eq!(
                header.op,
                address.get(),
                "grid block header op must equal its address"
            );
            assert_eq!(
                header.command,
                Command::Block,
                "grid block {address} holds a non-block header"
            );
            stream.add(&block[..block_size]);
            // The address defeats cancellation between distinct acquired
            // addresses with identical payloads.
            stream.add(&address.get().to_le_bytes());
            assert!(
                block[block_size..sector_ceil(block_size)]
                    .iter()
                    .all(|&b| b == 0),
                "grid block {address} padding must be zero"
            );
        }
        assert_eq!(
            blocks_missing, 0,
            "free set acquires {blocks_missing} blocks the grid never saw"
        );
        self.free_set.reset();
        stream.checksum()
    }

    /// The recorded checkpoint for `op`, if any replica established it.
    #[must_use]
    pub fn checkpoint(&self, op: u64) -> Option<&Checkpoint> {
        self.checkpoints.get(&op)
    }

    /// The recorded grid checksum for a half-measure, if any.
    #[must_use]
    pub fn compaction(&self, half_measure: u64) -> Option<u128> {
        self.compactions.get(&half_measure).copied()
    }

    /// Number of checkpoint records established so far.
    #[must_use]
    pub fn checkpoints_recorded(&self) -> usize {
        self.checkpoints.len()
    }

    /// Number of half-measure references established so far.
    #[must_use]
    pub fn compactions_recorded(&self) -> usize {
        self.compactions.len()
    }
}

impl Default for StorageVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of one superblock trailer area.
///
/// Every redundant copy must hash to the declared checksum; divergent
/// copies within one replica mean the simulator corrupted the superblock
/// zone, not that replicas diverged.
#[must_use]
pub fn checksum_trailer(
    storage: &SimStorage,
    superblock: &SuperBlock,
    area: TrailerArea,
) -> u128 {
    let declared = superblock.trailer_checksum(area);
    let size = superblock.trailer_size(area) as usize;
    for copy in 0..SUPERBLOCK_COPIES {
        let offset = trailer_offset(copy, area);
        let actual = checksum(&storage.memory()[offset..offset + size]);
        assert_eq!(
            actual, declared,
            "superblock {area} trailer copy {copy} does not match its declared checksum"
        );
    }
    declared
}

/// Checksum of the client-replies zone.
///
/// Commutative XOR fold of the per-slot hashes, each covering the slot's
/// first `sector_ceil(header.size)` bytes. Vacant slots and header-only
/// replies (not materialized on disk) contribute nothing. Requires a
/// non-syncing replica: occupancy is only deterministic outside state
/// transfer.
#[must_use]
pub fn checksum_client_replies(storage: &SimStorage, superblock: &SuperBlock) -> u128 {
    assert!(
        !superblock.vsr_state.is_syncing(),
        "client replies are not deterministic while syncing"
    );
    let mut fold = 0_u128;
    for (slot_index, slot) in superblock.client_sessions().iter() {
        if !slot.is_occupied() {
            continue;
        }
        let header = slot
            .header
            .as_ref()
            .expect("occupied client session slot retains a reply header");
        assert_eq!(
            header.command,
            Command::Reply,
            "client session slot {slot_index} must retain a reply"
        );
        if header.is_header_only() {
            continue;
        }
        let reply = storage.client_reply(slot_index);
        fold ^= checksum(&reply[..sector_ceil(header.size as usize)]);
    }
    fold
}
