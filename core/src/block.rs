//! BlockHeader structure and block hash

use crate::compact::{bits_to_target, CompactTarget, Target};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Serialized header size in bytes
pub const HEADER_SIZE: usize = 80;

/// Block header as it appears on the wire
///
/// Field order and widths are consensus-critical: bincode's fixed-width
/// little-endian encoding of this struct is exactly the 80-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Versione del block format
    pub version: i32,
    /// Hash del block precedente (internal byte order)
    pub previous_hash: [u8; 32],
    /// Merkle root delle transazioni (internal byte order)
    pub merkle_root: [u8; 32],
    /// Timestamp Unix in secondi
    pub time: u32,
    /// Difficulty target (formato compact)
    pub bits: u32,
    /// Nonce per il mining
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: i32,
        previous_hash: [u8; 32],
        merkle_root: [u8; 32],
        time: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            previous_hash,
            merkle_root,
            time,
            bits,
            nonce,
        }
    }

    /// 80-byte wire encoding
    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        let bytes = bincode::serialize(self).map_err(|e| HeaderError::Encoding(e.to_string()))?;
        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        Ok(bytes)
    }

    /// Parses an 80-byte wire header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::InvalidLength(bytes.len()));
        }
        bincode::deserialize(bytes).map_err(|e| HeaderError::Encoding(e.to_string()))
    }

    /// Calcola hash del header (double SHA-256)
    pub fn hash(&self) -> Result<[u8; 32], HeaderError> {
        let header_bytes = self.to_bytes()?;

        let hash1 = Sha256::digest(&header_bytes);
        let hash2 = Sha256::digest(hash1);

        Ok(hash2.into())
    }

    /// Block hash read as a little-endian 256-bit integer
    pub fn hash_target(&self) -> Result<Target, HeaderError> {
        Ok(hash_to_target(&self.hash()?))
    }

    /// Decoded compact target claimed by this header
    pub fn target(&self) -> CompactTarget {
        bits_to_target(self.bits)
    }
}

/// Interprets a hash in internal byte order as a 256-bit integer.
pub fn hash_to_target(hash: &[u8; 32]) -> Target {
    Target::from_little_endian(hash)
}

/// Hex form of a hash as block explorers display it (reversed bytes).
pub fn hash_to_hex(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parses a displayed (reversed) hash back into internal byte order.
pub fn hash_from_hex(s: &str) -> Result<[u8; 32], HeaderError> {
    let bytes = hex::decode(s).map_err(|e| HeaderError::Encoding(e.to_string()))?;
    let mut hash: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| HeaderError::InvalidLength(b.len()))?;
    hash.reverse();
    Ok(hash)
}

/// Errori di codifica del header
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("Invalid header length: {0} bytes")]
    InvalidLength(usize),

    #[error("Header encoding error: {0}")]
    Encoding(String),
}
