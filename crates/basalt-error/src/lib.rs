use thiserror::Error;

/// Primary error type for Basalt storage operations.
///
/// Structured variants for the failures collaborators can surface to their
/// callers. Divergence between replicas is deliberately *not* here: the
/// verifier reports it through its own typed error, while corruption inside
/// a single replica is an internal invariant violation and asserts.
#[derive(Error, Debug)]
pub enum BasaltError {
    /// A superblock trailer failed to decode.
    #[error("superblock trailer corrupt: {detail}")]
    TrailerCorrupt { detail: String },

    /// A message or block header failed to decode.
    #[error("header corrupt: {detail}")]
    HeaderCorrupt { detail: String },

    /// A free-set trailer addresses more blocks than the grid holds.
    #[error("free set trailer too large: {words} words exceeds capacity {words_max}")]
    FreeSetOverflow { words: usize, words_max: usize },

    /// A client-sessions trailer failed to decode.
    #[error("client sessions trailer corrupt: {detail}")]
    ClientSessionsCorrupt { detail: String },

    /// A grid block address beyond the device's grid zone.
    #[error("block address {address} out of range (max {max})")]
    AddressOutOfRange { address: u64, max: u64 },

    /// A client-reply slot index beyond the slot table.
    #[error("reply slot {slot} out of range (max {max})")]
    SlotOutOfRange { slot: usize, max: usize },

    /// A write or view past the end of the device image.
    #[error("storage access out of bounds: offset {offset} + len {len} > size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BasaltError {
    /// Create a trailer-corruption error.
    pub fn trailer_corrupt(detail: impl Into<String>) -> Self {
        Self::TrailerCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a header-corruption error.
    pub fn header_corrupt(detail: impl Into<String>) -> Self {
        Self::HeaderCorrupt {
            detail: detail.into(),
        }
    }

    /// Create a client-sessions-corruption error.
    pub fn client_sessions_corrupt(detail: impl Into<String>) -> Self {
        Self::ClientSessionsCorrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `BasaltError`.
pub type Result<T> = std::result::Result<T, BasaltError>;
