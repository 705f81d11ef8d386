//! On-device header schema.
//!
//! Every grid block and every stored client reply starts with the same
//! fixed-size header carrying a body checksum, the owning operation, and the
//! logically-stored size. The verifier decodes these headers to know how
//! many bytes of a block are meaningful and to cross-check block addresses.

use basalt_error::{BasaltError, Result};
use basalt_types::checksum;
use basalt_types::limits::MESSAGE_HEADER_SIZE;

/// Size of the fixed header in bytes (re-exported from `basalt-types` so the
/// superblock trailer layout can name it without depending on this crate).
pub const HEADER_SIZE: usize = MESSAGE_HEADER_SIZE;

const HEADER_CHECKSUM_OFFSET: usize = 0;
const HEADER_OP_OFFSET: usize = 16;
const HEADER_CLIENT_OFFSET: usize = 24;
const HEADER_SIZE_OFFSET: usize = 32;
const HEADER_COMMAND_OFFSET: usize = 36;
const HEADER_RESERVED_OFFSET: usize = 37;

/// Commands that appear in stored headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// A client reply retained in the client-replies zone.
    Reply = 1,
    /// A grid block owned by the LSM storage engine.
    Block = 2,
}

impl Command {
    /// Parse a command byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Reply),
            2 => Some(Self::Block),
            _ => None,
        }
    }
}

/// Parsed fixed-size header.
///
/// Layout:
/// ```text
/// Offset  Size  Description
///   0      16   Body checksum: XXH3-128 of bytes [64, size)
///  16       8   Op: block address for blocks, reply op for replies
///  24       8   Client id (0 for blocks)
///  32       4   Size: total bytes including this header (>= 64)
///  36       1   Command: 1 = reply, 2 = block
///  37      27   Reserved (must be zero)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Checksum of the body bytes `[HEADER_SIZE, size)`.
    pub checksum: u128,
    /// Owning operation: for grid blocks this must equal the block address.
    pub op: u64,
    /// Client id; 0 for grid blocks.
    pub client: u64,
    /// Total size including the header.
    pub size: u32,
    /// Command tag.
    pub command: Command,
}

impl Header {
    /// Build a block header for `body` stored at `address`.
    #[must_use]
    pub fn for_block(address: u64, body: &[u8]) -> Self {
        Self {
            checksum: checksum(body),
            op: address,
            client: 0,
            size: total_size(body.len()),
            command: Command::Block,
        }
    }

    /// Build a reply header for `body` sent to `client` at `op`.
    #[must_use]
    pub fn for_reply(client: u64, op: u64, body: &[u8]) -> Self {
        Self {
            checksum: checksum(body),
            op,
            client,
            size: total_size(body.len()),
            command: Command::Reply,
        }
    }

    /// Whether the header declares no body beyond itself.
    #[must_use]
    pub const fn is_header_only(&self) -> bool {
        self.size as usize == HEADER_SIZE
    }

    /// Verify `body` against the declared body checksum.
    #[must_use]
    pub fn validate_body(&self, body: &[u8]) -> bool {
        body.len() + HEADER_SIZE == self.size as usize && checksum(body) == self.checksum
    }

    /// Parse a header from raw bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(BasaltError::header_corrupt(format!(
                "too small: expected >= {HEADER_SIZE}, got {}",
                buf.len()
            )));
        }
        let command_byte = buf[HEADER_COMMAND_OFFSET];
        let Some(command) = Command::from_u8(command_byte) else {
            return Err(BasaltError::header_corrupt(format!(
                "unknown command {command_byte}"
            )));
        };
        let size = read_le_u32_at(buf, HEADER_SIZE_OFFSET);
        if (size as usize) < HEADER_SIZE {
            return Err(BasaltError::header_corrupt(format!(
                "declared size {size} smaller than header"
            )));
        }
        if buf[HEADER_RESERVED_OFFSET..HEADER_SIZE].iter().any(|&b| b != 0) {
            return Err(BasaltError::header_corrupt(
                "reserved bytes must be zero".to_owned(),
            ));
        }
        Ok(Self {
            checksum: read_le_u128_at(buf, HEADER_CHECKSUM_OFFSET),
            op: read_le_u64_at(buf, HEADER_OP_OFFSET),
            client: read_le_u64_at(buf, HEADER_CLIENT_OFFSET),
            size,
            command,
        })
    }

    /// Serialize this header into a fixed-size buffer.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 16]
            .copy_from_slice(&self.checksum.to_le_bytes());
        buf[HEADER_OP_OFFSET..HEADER_OP_OFFSET + 8].copy_from_slice(&self.op.to_le_bytes());
        buf[HEADER_CLIENT_OFFSET..HEADER_CLIENT_OFFSET + 8]
            .copy_from_slice(&self.client.to_le_bytes());
        buf[HEADER_SIZE_OFFSET..HEADER_SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
        buf[HEADER_COMMAND_OFFSET] = self.command as u8;
        buf
    }
}

/// Decode the header at the front of a grid block.
pub fn header_from_block(block: &[u8]) -> Result<Header> {
    let header = Header::from_bytes(block)?;
    if header.size as usize > block.len() {
        return Err(BasaltError::header_corrupt(format!(
            "declared size {} exceeds block length {}",
            header.size,
            block.len()
        )));
    }
    Ok(header)
}

fn total_size(body_len: usize) -> u32 {
    u32::try_from(HEADER_SIZE + body_len).expect("block body length fits in u32")
}

fn read_le_u32_at(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0_u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_le_u64_at(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn read_le_u128_at(bytes: &[u8], offset: usize) -> u128 {
    let mut raw = [0_u8; 16];
    raw.copy_from_slice(&bytes[offset..offset + 16]);
    u128::from_le_bytes(raw)
}
