//! Dense bitmap of acquired grid-block addresses.
//!
//! Bit `i` (LSB-first within little-endian `u64` words) is set iff block
//! address `i + 1` is acquired. The serialized trailer form is the word
//! array truncated after the last nonzero word, so an empty grid serializes
//! to zero bytes and the trailer length is always a multiple of 8.

use basalt_error::{BasaltError, Result};
use basalt_types::BlockAddress;

const WORD_BITS: usize = u64::BITS as usize;

/// Owned free-set bitmap.
///
/// Allocated once at full capacity and reused across decode cycles; `decode`
/// never grows the word array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSet {
    words: Vec<u64>,
    capacity: usize,
}

impl FreeSet {
    /// Create an empty free set able to track `capacity` grid blocks.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity % WORD_BITS == 0, "capacity must be a whole number of words");
        Self {
            words: vec![0; capacity / WORD_BITS],
            capacity,
        }
    }

    /// Number of grid blocks this set can track.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mark `address` acquired.
    pub fn acquire(&mut self, address: BlockAddress) {
        let ordinal = self.checked_ordinal(address);
        self.words[ordinal / WORD_BITS] |= 1 << (ordinal % WORD_BITS);
    }

    /// Mark `address` free.
    pub fn release(&mut self, address: BlockAddress) {
        let ordinal = self.checked_ordinal(address);
        self.words[ordinal / WORD_BITS] &= !(1 << (ordinal % WORD_BITS));
    }

    /// Whether `address` is acquired.
    #[must_use]
    pub fn is_acquired(&self, address: BlockAddress) -> bool {
        let ordinal = self.checked_ordinal(address);
        self.words[ordinal / WORD_BITS] & (1 << (ordinal % WORD_BITS)) != 0
    }

    /// Number of acquired blocks.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether no block is acquired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Clear every bit, restoring the post-`new` state.
    pub fn reset(&mut self) {
        self.words.fill(0);
    }

    /// Serialize to the trailer form: little-endian words truncated after
    /// the last nonzero word.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let last_nonzero = self.words.iter().rposition(|&w| w != 0);
        let words = match last_nonzero {
            Some(index) => &self.words[..=index],
            None => &[],
        };
        let mut out = Vec::with_capacity(words.len() * 8);
        for word in words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decode a trailer buffer into this set, replacing its contents.
    ///
    /// The buffer must be whole little-endian words and must not address
    /// more blocks than `capacity`.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() % 8 != 0 {
            return Err(BasaltError::trailer_corrupt(format!(
                "free set trailer length {} is not a whole number of words",
                bytes.len()
            )));
        }
        let words = bytes.len() / 8;
        if words > self.words.len() {
            return Err(BasaltError::FreeSetOverflow {
                words,
                words_max: self.words.len(),
            });
        }
        self.reset();
        for (index, chunk) in bytes.chunks_exact(8).enumerate() {
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(chunk);
            self.words[index] = u64::from_le_bytes(raw);
        }
        Ok(())
    }

    /// Iterate acquired addresses in ascending order.
    pub fn iter_acquired(&self) -> impl Iterator<Item = BlockAddress> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            let mut remaining = word;
            std::iter::from_fn(move || {
                if remaining == 0 {
                    return None;
                }
                let bit = remaining.trailing_zeros() as usize;
                remaining &= remaining - 1;
                Some(BlockAddress::from_ordinal(
                    (word_index * WORD_BITS + bit) as u64,
                ))
            })
        })
    }

    fn checked_ordinal(&self, address: BlockAddress) -> usize {
        let ordinal = address.ordinal() as usize;
        assert!(
            ordinal < self.capacity,
            "block address {address} beyond free set capacity {}",
            self.capacity
        );
        ordinal
    }
}
