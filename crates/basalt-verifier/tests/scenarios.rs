//! End-to-end verifier scenarios.
//!
//! Each test plays several replicas against one simulation-wide verifier,
//! the way the simulator does: identical replicas are built from the same
//! spec, divergent ones from a mutated copy.

use basalt_schema::HEADER_SIZE;
use basalt_storage::SimStorage;
use basalt_superblock::{ClientSessions, FreeSet, SuperBlock, VsrState};
use basalt_types::limits::GRID_BLOCKS_MAX;
use basalt_types::BlockAddress;
use basalt_verifier::{CheckpointArea, StorageMismatch, StorageVerifier};

use proptest::prelude::*;

fn address(n: u64) -> BlockAddress {
    BlockAddress::new(n).expect("nonzero test address")
}

/// Recipe for one replica's on-device state. Two replicas built from the
/// same spec are byte-for-byte identical.
#[derive(Debug, Clone)]
struct ReplicaSpec {
    manifest: Vec<u8>,
    blocks: Vec<(u64, Vec<u8>)>,
    replies: Vec<(usize, u64, u64, Vec<u8>)>,
    commit_min: u64,
    sync_op_max: u64,
}

impl ReplicaSpec {
    fn new(commit_min: u64) -> Self {
        Self {
            manifest: b"manifest: level 0 tables".to_vec(),
            blocks: Vec::new(),
            replies: Vec::new(),
            commit_min,
            sync_op_max: 0,
        }
    }

    fn with_blocks(mut self, blocks: &[(u64, Vec<u8>)]) -> Self {
        self.blocks = blocks.to_vec();
        self
    }

    fn with_replies(mut self, replies: &[(usize, u64, u64, Vec<u8>)]) -> Self {
        self.replies = replies.to_vec();
        self
    }

    fn syncing(mut self, sync_op_max: u64) -> Self {
        self.sync_op_max = sync_op_max;
        self
    }

    fn build(&self) -> (SimStorage, SuperBlock) {
        let mut storage = SimStorage::new();
        let mut free_set = FreeSet::new(GRID_BLOCKS_MAX);
        for (block_address, body) in &self.blocks {
            storage
                .write_grid_block(address(*block_address), body)
                .expect("grid write");
            free_set.acquire(address(*block_address));
        }
        let mut sessions = ClientSessions::new();
        for (slot, client, op, body) in &self.replies {
            let header = storage
                .write_client_reply(*slot, *client, *op, body)
                .expect("reply write");
            sessions
                .set(*slot, *client, header)
                .expect("session install");
        }
        let mut superblock = SuperBlock::new();
        superblock
            .install(
                &mut storage,
                &self.manifest,
                &free_set,
                &sessions,
                VsrState {
                    commit_min: self.commit_min,
                    sync_op_max: self.sync_op_max,
                },
            )
            .expect("superblock install");
        (storage, superblock)
    }
}

#[test]
fn two_replicas_matching_checkpoint() {
    let spec = ReplicaSpec::new(1024)
        .with_blocks(&[(3, vec![0x11; 500]), (17, vec![0x22; 80])])
        .with_replies(&[(2, 9, 1000, b"committed".to_vec())]);
    let (storage_a, superblock_a) = spec.build();
    let (storage_b, superblock_b) = spec.build();

    let mut verifier = StorageVerifier::new();
    verifier
        .on_checkpoint(&storage_a, &superblock_a)
        .expect("first replica establishes the record");
    assert_eq!(verifier.checkpoints_recorded(), 1);
    let record = verifier.checkpoint(1024).expect("record exists");
    assert!(record.is_complete());

    verifier
        .on_checkpoint(&storage_b, &superblock_b)
        .expect("identical replica matches all five areas");
    assert_eq!(verifier.checkpoints_recorded(), 1);
}

#[test]
fn divergent_manifest_is_caught_and_attributed() {
    let spec = ReplicaSpec::new(1024).with_blocks(&[(3, vec![0x11; 500])]);
    let (storage_a, superblock_a) = spec.build();

    let mut spec_b = spec;
    spec_b.manifest[5] ^= 0x01;
    let (storage_b, superblock_b) = spec_b.build();

    let mut verifier = StorageVerifier::new();
    verifier
        .on_checkpoint(&storage_a, &superblock_a)
        .expect("first replica establishes the record");

    let error = verifier
        .on_checkpoint(&storage_b, &superblock_b)
        .expect_err("manifest byte differs");
    assert_eq!(
        error,
        StorageMismatch::CheckpointDivergence {
            op: 1024,
            areas: vec![CheckpointArea::SuperblockManifest],
        }
    );
}

#[test]
fn syncing_replica_cannot_establish_the_record() {
    let spec = ReplicaSpec::new(2048).with_blocks(&[(8, vec![0x33; 100])]);
    let (storage_b, superblock_b) = spec.clone().syncing(1500).build();

    let mut verifier = StorageVerifier::new();
    verifier
        .on_checkpoint(&storage_b, &superblock_b)
        .expect("syncing replica succeeds without recording");
    assert_eq!(verifier.checkpoints_recorded(), 0);
    assert!(verifier.checkpoint(2048).is_none());

    // A non-syncing replica later establishes the record.
    let (storage_a, superblock_a) = spec.build();
    verifier
        .on_checkpoint(&storage_a, &superblock_a)
        .expect("non-syncing replica records");
    let record = verifier.checkpoint(2048).expect("record exists");
    assert!(record.is_complete());
}

#[test]
fn syncing_replica_is_still_compared_on_trailer_areas() {
    let spec = ReplicaSpec::new(4096).with_blocks(&[(4, vec![0x44; 60])]);
    let (storage_a, superblock_a) = spec.clone().build();

    let mut verifier = StorageVerifier::new();
    verifier
        .on_checkpoint(&storage_a, &superblock_a)
        .expect("record established");

    // A syncing replica with a matching superblock passes: its absent
    // client-replies and grid observations are not comparable.
    let (storage_b, superblock_b) = spec.clone().syncing(3000).build();
    verifier
        .on_checkpoint(&storage_b, &superblock_b)
        .expect("matching trailers pass");

    // A syncing replica with a divergent manifest still fails.
    let mut spec_c = spec;
    spec_c.manifest.push(0xFF);
    let (storage_c, superblock_c) = spec_c.syncing(3000).build();
    let error = verifier
        .on_checkpoint(&storage_c, &superblock_c)
        .expect_err("trailer areas are compared even while syncing");
    let StorageMismatch::CheckpointDivergence { op, areas } = error else {
        panic!("expected a checkpoint divergence");
    };
    assert_eq!(op, 4096);
    assert_eq!(areas, vec![CheckpointArea::SuperblockManifest]);
}

#[test]
#[should_panic(expected = "blocks the grid never saw")]
fn acquired_but_missing_block_aborts_the_simulation() {
    let (mut storage, mut superblock) = ReplicaSpec::new(100)
        .with_blocks(&[(1, vec![0x55; 40])])
        .build();

    // Rewrite the superblock with a free set that also acquires address
    // 42, which the device never saw.
    let mut free_set = FreeSet::new(GRID_BLOCKS_MAX);
    free_set.acquire(address(1));
    free_set.acquire(address(42));
    superblock
        .install(
            &mut storage,
            b"manifest: level 0 tables",
            &free_set,
            &ClientSessions::new(),
            VsrState {
                commit_min: 100,
                sync_op_max: 0,
            },
        )
        .expect("superblock install");

    let mut verifier = StorageVerifier::new();
    let _ = verifier.on_checkpoint(&storage, &superblock);
}

#[test]
fn compaction_half_measures_match_then_mismatch() {
    let spec0 = ReplicaSpec::new(0).with_blocks(&[(2, vec![0x66; 128])]);
    let mut verifier = StorageVerifier::new();

    // Half-measure #0: all three replicas agree.
    for _ in 0..3 {
        let (storage, superblock) = spec0.build();
        verifier
            .on_compaction_half_measure(0, &storage, &superblock)
            .expect("identical grids match");
    }
    assert_eq!(verifier.compactions_recorded(), 1);

    // Half-measure #1: replica C differs by one grid body byte.
    let spec1 = spec0.with_blocks(&[(2, vec![0x66; 128]), (6, vec![0x77; 64])]);
    for _ in 0..2 {
        let (storage, superblock) = spec1.build();
        verifier
            .on_compaction_half_measure(1, &storage, &superblock)
            .expect("identical grids match");
    }
    let (mut storage_c, superblock_c) = spec1.build();
    let offset = SimStorage::grid_block_offset(address(6)) + HEADER_SIZE + 10;
    storage_c.flip_byte(offset).expect("in bounds");
    let error = verifier
        .on_compaction_half_measure(1, &storage_c, &superblock_c)
        .expect_err("replica C diverged");
    assert!(matches!(
        error,
        StorageMismatch::CompactionDivergence { half_measure: 1, .. }
    ));

    // The recorded reference is immutable: half-measure #0 still matches.
    let (storage, superblock) = ReplicaSpec::new(0)
        .with_blocks(&[(2, vec![0x66; 128])])
        .build();
    verifier
        .on_compaction_half_measure(0, &storage, &superblock)
        .expect("earlier reference unchanged");
}

#[test]
fn empty_client_replies_match_trivially() {
    let spec = ReplicaSpec::new(512);
    let (storage_a, superblock_a) = spec.build();
    let (storage_b, superblock_b) = spec.build();

    let mut verifier = StorageVerifier::new();
    verifier
        .on_checkpoint(&storage_a, &superblock_a)
        .expect("record established");
    let record = verifier.checkpoint(512).expect("record exists");
    assert_eq!(record.get(CheckpointArea::ClientReplies), Some(0));
    let snapshot = serde_json::to_value(record).expect("record serializes");
    assert_eq!(
        snapshot["client_replies"],
        serde_json::json!("0x00000000000000000000000000000000")
    );

    verifier
        .on_checkpoint(&storage_b, &superblock_b)
        .expect("all-vacant tables match");
}

#[test]
fn divergence_serializes_for_failure_bundles() {
    let error = StorageMismatch::CheckpointDivergence {
        op: 1024,
        areas: vec![CheckpointArea::Grid, CheckpointArea::ClientReplies],
    };
    let json = serde_json::to_value(&error).expect("serializable");
    assert_eq!(
        json["CheckpointDivergence"]["areas"],
        serde_json::json!(["grid", "client_replies"])
    );

    // 128-bit checksums serialize as hex strings; JSON numbers cannot hold
    // them.
    let error = StorageMismatch::CompactionDivergence {
        half_measure: 3,
        expected: u128::MAX,
        actual: 0,
    };
    let json = serde_json::to_value(&error).expect("serializable");
    assert_eq!(
        json["CompactionDivergence"]["expected"],
        serde_json::json!("0xffffffffffffffffffffffffffffffff")
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Replicas built from the same spec match at every checkpoint.
    #[test]
    fn prop_identical_replicas_always_match(
        blocks in proptest::collection::btree_map(
            1_u64..64,
            proptest::collection::vec(any::<u8>(), 0..256),
            0..12,
        ),
        replies in proptest::collection::btree_map(
            0_usize..8,
            (1_u64..100, 1_u64..10_000, proptest::collection::vec(any::<u8>(), 0..128)),
            0..4,
        ),
    ) {
        let blocks: Vec<(u64, Vec<u8>)> = blocks.into_iter().collect();
        let replies: Vec<(usize, u64, u64, Vec<u8>)> = replies
            .into_iter()
            .map(|(slot, (client, op, body))| (slot, client, op, body))
            .collect();
        let spec = ReplicaSpec::new(7)
            .with_blocks(&blocks)
            .with_replies(&replies);
        let (storage_a, superblock_a) = spec.build();
        let (storage_b, superblock_b) = spec.build();

        let mut verifier = StorageVerifier::new();
        verifier.on_checkpoint(&storage_a, &superblock_a).expect("record");
        verifier.on_checkpoint(&storage_b, &superblock_b).expect("match");
        verifier
            .on_compaction_half_measure(0, &storage_a, &superblock_a)
            .expect("record");
        verifier
            .on_compaction_half_measure(0, &storage_b, &superblock_b)
            .expect("match");
    }

    /// Any body byte flip in any acquired block is caught as a grid
    /// divergence.
    #[test]
    fn prop_body_flip_always_diverges(
        victim in 0_usize..4,
        byte in 0_usize..100,
    ) {
        let blocks: Vec<(u64, Vec<u8>)> = (0..4)
            .map(|i| (10 + i as u64 * 3, vec![i as u8 ^ 0x5A; 100]))
            .collect();
        let spec = ReplicaSpec::new(9).with_blocks(&blocks);
        let (storage_a, superblock_a) = spec.build();
        let (mut storage_b, superblock_b) = spec.build();

        let block_address = address(blocks[victim].0);
        let offset = SimStorage::grid_block_offset(block_address) + HEADER_SIZE + byte;
        storage_b.flip_byte(offset).expect("in bounds");

        let mut verifier = StorageVerifier::new();
        verifier.on_checkpoint(&storage_a, &superblock_a).expect("record");
        let error = verifier
            .on_checkpoint(&storage_b, &superblock_b)
            .expect_err("flip must diverge");
        prop_assert_eq!(
            error,
            StorageMismatch::CheckpointDivergence {
                op: 9,
                areas: vec![CheckpointArea::Grid],
            }
        );
    }
}
