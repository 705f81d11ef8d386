//! Simulated zoned block device.
//!
//! The simulator gives every replica one of these: a single in-memory image
//! carved into zones, with typed read-only views for consumers and explicit
//! write helpers for the replica runtime and tests. There is no persistence
//! and no I/O scheduling here; fault injection happens by mutating bytes.
//!
//! Zone order on the device:
//!
//! 1. Superblock zone: `SUPERBLOCK_COPIES` redundant copies, each holding a
//!    replica-local header plus the three checkpoint trailers.
//! 2. Client-replies zone: one slot per client session.
//! 3. Grid zone: fixed-size blocks backing the LSM engine, 1-based
//!    addresses.

use basalt_error::{BasaltError, Result};
use basalt_schema::{Header, HEADER_SIZE};
use basalt_types::limits::{
    BLOCK_SIZE, GRID_BLOCKS_MAX, REPLY_SIZE_MAX, REPLY_SLOTS_MAX, SUPERBLOCK_COPIES,
    SUPERBLOCK_COPY_SIZE,
};
use basalt_types::BlockAddress;

/// The zones of the simulated device, in on-device order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    SuperBlock,
    ClientReplies,
    Grid,
}

impl Zone {
    /// Offset of this zone's first byte in the device image.
    #[must_use]
    pub const fn start(self) -> usize {
        match self {
            Self::SuperBlock => 0,
            Self::ClientReplies => Self::SuperBlock.start() + Self::SuperBlock.size(),
            Self::Grid => Self::ClientReplies.start() + Self::ClientReplies.size(),
        }
    }

    /// Size of this zone in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::SuperBlock => SUPERBLOCK_COPIES * SUPERBLOCK_COPY_SIZE,
            Self::ClientReplies => REPLY_SLOTS_MAX * REPLY_SIZE_MAX,
            Self::Grid => GRID_BLOCKS_MAX * BLOCK_SIZE,
        }
    }
}

/// Total size of the simulated device image.
pub const STORAGE_SIZE: usize = Zone::Grid.start() + Zone::Grid.size();

/// One replica's simulated device.
///
/// Reads never fail: the image is allocated up front and zero-filled.
/// `grid_block` additionally tracks which addresses have ever been written,
/// so consumers can distinguish "never written" from "written with zeros".
#[derive(Debug, Clone)]
pub struct SimStorage {
    memory: Vec<u8>,
    grid_written: Vec<bool>,
}

impl SimStorage {
    /// Create a zero-filled device.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: vec![0; STORAGE_SIZE],
            grid_written: vec![false; GRID_BLOCKS_MAX],
        }
    }

    /// Read-only view of the full device image.
    #[must_use]
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Resolve an acquired grid block to its on-device bytes, or `None` if
    /// the address was never written.
    #[must_use]
    pub fn grid_block(&self, address: BlockAddress) -> Option<&[u8]> {
        let ordinal = address.ordinal() as usize;
        assert!(
            ordinal < GRID_BLOCKS_MAX,
            "grid address {address} beyond grid zone"
        );
        if !self.grid_written[ordinal] {
            return None;
        }
        let offset = Self::grid_block_offset(address);
        Some(&self.memory[offset..offset + BLOCK_SIZE])
    }

    /// View of one client-reply slot (always `REPLY_SIZE_MAX` bytes).
    #[must_use]
    pub fn client_reply(&self, slot: usize) -> &[u8] {
        assert!(slot < REPLY_SLOTS_MAX, "reply slot {slot} beyond slot table");
        let offset = Self::client_reply_offset(slot);
        &self.memory[offset..offset + REPLY_SIZE_MAX]
    }

    /// Device offset of the grid block at `address`.
    #[must_use]
    pub const fn grid_block_offset(address: BlockAddress) -> usize {
        Zone::Grid.start() + address.ordinal() as usize * BLOCK_SIZE
    }

    /// Device offset of the client-reply slot `slot`.
    #[must_use]
    pub const fn client_reply_offset(slot: usize) -> usize {
        Zone::ClientReplies.start() + slot * REPLY_SIZE_MAX
    }

    /// Write raw bytes at a device offset.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len();
        if end > self.memory.len() {
            return Err(BasaltError::OutOfBounds {
                offset,
                len: bytes.len(),
                size: self.memory.len(),
            });
        }
        self.memory[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Flip one byte of the image. Fault injection for tests.
    pub fn flip_byte(&mut self, offset: usize) -> Result<()> {
        if offset >= self.memory.len() {
            return Err(BasaltError::OutOfBounds {
                offset,
                len: 1,
                size: self.memory.len(),
            });
        }
        self.memory[offset] ^= 0xFF;
        Ok(())
    }

    /// Write a grid block: header, body, zero padding to the block boundary.
    pub fn write_grid_block(&mut self, address: BlockAddress, body: &[u8]) -> Result<Header> {
        let ordinal = address.ordinal() as usize;
        if ordinal >= GRID_BLOCKS_MAX {
            return Err(BasaltError::AddressOutOfRange {
                address: address.get(),
                max: GRID_BLOCKS_MAX as u64,
            });
        }
        if HEADER_SIZE + body.len() > BLOCK_SIZE {
            return Err(BasaltError::OutOfBounds {
                offset: HEADER_SIZE,
                len: body.len(),
                size: BLOCK_SIZE,
            });
        }
        let header = Header::for_block(address.get(), body);
        let offset = Self::grid_block_offset(address);
        self.memory[offset..offset + BLOCK_SIZE].fill(0);
        self.memory[offset..offset + HEADER_SIZE].copy_from_slice(&header.to_bytes());
        self.memory[offset + HEADER_SIZE..offset + HEADER_SIZE + body.len()].copy_from_slice(body);
        self.grid_written[ordinal] = true;
        Ok(header)
    }

    /// Write a client reply into its slot: header, body, zero padding.
    ///
    /// Returns the header so the caller can install the same header in the
    /// superblock's client-sessions table.
    pub fn write_client_reply(&mut self, slot: usize, client: u64, op: u64, body: &[u8]) -> Result<Header> {
        if slot >= REPLY_SLOTS_MAX {
            return Err(BasaltError::SlotOutOfRange {
                slot,
                max: REPLY_SLOTS_MAX,
            });
        }
        if HEADER_SIZE + body.len() > REPLY_SIZE_MAX {
            return Err(BasaltError::OutOfBounds {
                offset: HEADER_SIZE,
                len: body.len(),
                size: REPLY_SIZE_MAX,
            });
        }
        let header = Header::for_reply(client, op, body);
        let offset = Self::client_reply_offset(slot);
        self.memory[offset..offset + REPLY_SIZE_MAX].fill(0);
        self.memory[offset..offset + HEADER_SIZE].copy_from_slice(&header.to_bytes());
        self.memory[offset + HEADER_SIZE..offset + HEADER_SIZE + body.len()].copy_from_slice(body);
        Ok(header)
    }
}

impl Default for SimStorage {
    fn default() -> Self {
        Self::new()
    }
}
