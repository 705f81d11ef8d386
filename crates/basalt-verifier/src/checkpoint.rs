//! Checkpoint areas and per-checkpoint records.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// Serialize a 128-bit checksum as the same zero-padded hex the logs use;
/// JSON numbers cannot hold a full u128.
pub(crate) fn hex128<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{value:#034x}"))
}

/// The deterministic storage areas verified at a checkpoint.
///
/// A closed set: the record stores one optional checksum per tag, and the
/// comparison loop iterates [`CheckpointArea::ALL`], so adding an area is a
/// local change here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointArea {
    SuperblockManifest,
    SuperblockFreeSet,
    SuperblockClientSessions,
    ClientReplies,
    Grid,
}

impl CheckpointArea {
    /// All areas, in comparison order.
    pub const ALL: [Self; 5] = [
        Self::SuperblockManifest,
        Self::SuperblockFreeSet,
        Self::SuperblockClientSessions,
        Self::ClientReplies,
        Self::Grid,
    ];

    const fn index(self) -> usize {
        match self {
            Self::SuperblockManifest => 0,
            Self::SuperblockFreeSet => 1,
            Self::SuperblockClientSessions => 2,
            Self::ClientReplies => 3,
            Self::Grid => 4,
        }
    }
}

impl fmt::Display for CheckpointArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SuperblockManifest => "superblock_manifest",
            Self::SuperblockFreeSet => "superblock_free_set",
            Self::SuperblockClientSessions => "superblock_client_sessions",
            Self::ClientReplies => "client_replies",
            Self::Grid => "grid",
        })
    }
}

/// One checkpoint's recorded (or observed) area checksums.
///
/// The three superblock-trailer areas are always present; `client_replies`
/// and `grid` are absent when the observing replica was mid-sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    areas: [Option<u128>; CheckpointArea::ALL.len()],
}

impl Serialize for Checkpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(CheckpointArea::ALL.len()))?;
        for area in CheckpointArea::ALL {
            map.serialize_entry(&area, &self.get(area).map(|v| format!("{v:#034x}")))?;
        }
        map.end()
    }
}

impl Checkpoint {
    /// The checksum recorded for `area`, if any.
    #[must_use]
    pub fn get(&self, area: CheckpointArea) -> Option<u128> {
        self.areas[area.index()]
    }

    /// Record a checksum for `area`. Recorded checksums are immutable.
    pub(crate) fn insert(&mut self, area: CheckpointArea, value: u128) {
        let slot = &mut self.areas[area.index()];
        assert!(slot.is_none(), "checkpoint area {area} recorded twice");
        *slot = Some(value);
    }

    /// Whether all five areas carry a checksum.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.areas.iter().all(Option::is_some)
    }
}
