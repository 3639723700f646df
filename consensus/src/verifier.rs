//! Contextual proof-of-work verification of candidate headers

use retarget_core::{
    check_proof_of_work_detailed, BlockHeader, BlockRecord, ChainIndex, DifficultyAdjuster,
    DifficultyError, HeaderError, PowError,
};

/// Checks that a header claims exactly the required target and meets it
#[derive(Debug, Clone)]
pub struct HeaderVerifier {
    adjuster: DifficultyAdjuster,
}

impl HeaderVerifier {
    pub fn new(adjuster: DifficultyAdjuster) -> Self {
        Self { adjuster }
    }

    pub fn adjuster(&self) -> &DifficultyAdjuster {
        &self.adjuster
    }

    /// Verifies `header` as the successor of `tip`, using the header's
    /// double SHA-256 as the proof-of-work hash.
    pub fn verify<C: ChainIndex + ?Sized>(
        &self,
        chain: &C,
        tip: &BlockRecord,
        header: &BlockHeader,
    ) -> Result<(), ConsensusError> {
        let hash = header.hash()?;
        self.verify_with_pow_hash(chain, tip, header, &hash)
    }

    /// Same as [`HeaderVerifier::verify`] for chains whose proof-of-work
    /// hash is computed by a different function than the block hash.
    pub fn verify_with_pow_hash<C: ChainIndex + ?Sized>(
        &self,
        chain: &C,
        tip: &BlockRecord,
        header: &BlockHeader,
        pow_hash: &[u8; 32],
    ) -> Result<(), ConsensusError> {
        let required = self.adjuster.next_work_required(chain, tip, header)?;
        if header.bits != required {
            return Err(ConsensusError::BadDifficultyBits {
                expected: required,
                got: header.bits,
            });
        }

        check_proof_of_work_detailed(pow_hash, header.bits, self.adjuster.params())
            .map_err(ConsensusError::InvalidProofOfWork)
    }
}

/// Consensus errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("Incorrect difficulty bits: expected 0x{expected:08x}, got 0x{got:08x}")]
    BadDifficultyBits { expected: u32, got: u32 },

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(PowError),

    #[error("Difficulty error: {0}")]
    Difficulty(#[from] DifficultyError),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
}
