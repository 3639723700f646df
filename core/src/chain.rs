//! Committed block records and ancestor lookup by height.

use serde::{Deserialize, Serialize};

/// The per-block facts the retarget code reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Altezza del block (genesis = 0)
    pub height: u64,
    /// Timestamp Unix in secondi
    pub timestamp: i64,
    /// Compact target used by the block
    pub bits: u32,
}

impl BlockRecord {
    pub fn new(height: u64, timestamp: i64, bits: u32) -> Self {
        Self {
            height,
            timestamp,
            bits,
        }
    }
}

/// Read access to a committed chain.
///
/// Implementations must present a consistent snapshot for the duration of a
/// retarget computation: a record returned for a height may not change while
/// the caller still holds the borrow of the index.
pub trait ChainIndex {
    /// The record at `height` on this chain, if committed.
    fn block_at(&self, height: u64) -> Option<BlockRecord>;

    /// Like [`ChainIndex::block_at`], but a missing height is an error.
    fn ancestor(&self, height: u64) -> Result<BlockRecord, ChainError> {
        self.block_at(height)
            .ok_or(ChainError::MissingAncestor { height })
    }
}

impl<T: ChainIndex + ?Sized> ChainIndex for &T {
    fn block_at(&self, height: u64) -> Option<BlockRecord> {
        (**self).block_at(height)
    }
}

impl ChainIndex for [BlockRecord] {
    /// Slices are assumed to start at genesis
    fn block_at(&self, height: u64) -> Option<BlockRecord> {
        usize::try_from(height)
            .ok()
            .and_then(|i| self.get(i))
            .copied()
    }
}

/// Append-only chain index addressed by height
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndex {
    records: Vec<BlockRecord>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index containing only a genesis record
    pub fn with_genesis(timestamp: i64, bits: u32) -> Self {
        Self {
            records: vec![BlockRecord::new(0, timestamp, bits)],
        }
    }

    /// Appends the next block; its height must be exactly `len()`.
    pub fn push(&mut self, record: BlockRecord) -> Result<(), ChainError> {
        let expected = self.records.len() as u64;
        if record.height != expected {
            return Err(ChainError::NonContiguousHeight {
                expected,
                got: record.height,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Appends a block on top of the tip.
    pub fn push_next(&mut self, timestamp: i64, bits: u32) -> BlockRecord {
        let record = BlockRecord::new(self.records.len() as u64, timestamp, bits);
        self.records.push(record);
        record
    }

    pub fn tip(&self) -> Option<BlockRecord> {
        self.records.last().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[BlockRecord] {
        &self.records
    }
}

impl ChainIndex for BlockIndex {
    fn block_at(&self, height: u64) -> Option<BlockRecord> {
        self.records.as_slice().block_at(height)
    }
}

impl FromIterator<BlockRecord> for BlockIndex {
    /// Records are renumbered from zero in iteration order
    fn from_iter<I: IntoIterator<Item = BlockRecord>>(iter: I) -> Self {
        let mut index = BlockIndex::new();
        for record in iter {
            index.push_next(record.timestamp, record.bits);
        }
        index
    }
}

/// Errori di accesso alla chain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Ancestor at height {height} is not available")]
    MissingAncestor { height: u64 },

    #[error("Non-contiguous block height: expected {expected}, got {got}")]
    NonContiguousHeight { expected: u64, got: u64 },

    #[error("Chain index is empty")]
    EmptyChain,
}
