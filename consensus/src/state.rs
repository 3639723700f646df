//! Header chain state management

use crate::verifier::{ConsensusError, HeaderVerifier};
use retarget_core::block::hash_to_hex;
use retarget_core::{
    block_proof, BlockHeader, BlockIndex, BlockRecord, ChainError, ConsensusParams,
    DifficultyAdjustment, DifficultyError, HeaderError, Target,
};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Committed header chain, genesis included
#[derive(Debug, Clone)]
struct ChainState {
    headers: Vec<BlockHeader>,
    hashes: Vec<[u8; 32]>,
    index: BlockIndex,
}

impl ChainState {
    fn tip(&self) -> Result<BlockRecord, ChainError> {
        self.index.tip().ok_or(ChainError::EmptyChain)
    }

    fn tip_hash(&self) -> Result<[u8; 32], ChainError> {
        self.hashes.last().copied().ok_or(ChainError::EmptyChain)
    }
}

/// State manager for the header chain
///
/// Readers and writers share one `RwLock`: every read operation sees a chain
/// that is not being appended to.
pub struct StateManager {
    /// Current chain
    state: Arc<RwLock<ChainState>>,
    /// Contextual header checks
    verifier: HeaderVerifier,
}

impl StateManager {
    /// Create a new state manager rooted at `genesis`
    ///
    /// The genesis header is trusted as given; it is not checked against
    /// any proof-of-work rule.
    pub fn new(genesis: BlockHeader, verifier: HeaderVerifier) -> Result<Self, StateError> {
        let hash = genesis.hash()?;
        let index = BlockIndex::with_genesis(i64::from(genesis.time), genesis.bits);

        log::info!(
            "Chain initialised with genesis {} (bits 0x{:08x})",
            hash_to_hex(&hash),
            genesis.bits
        );

        Ok(Self {
            state: Arc::new(RwLock::new(ChainState {
                headers: vec![genesis],
                hashes: vec![hash],
                index,
            })),
            verifier,
        })
    }

    pub fn params(&self) -> &ConsensusParams {
        self.verifier.adjuster().params()
    }

    pub fn verifier(&self) -> &HeaderVerifier {
        &self.verifier
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ChainState>, StateError> {
        self.state.read().map_err(|_| StateError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ChainState>, StateError> {
        self.state.write().map_err(|_| StateError::LockPoisoned)
    }

    /// Height of the current tip
    pub fn height(&self) -> Result<u64, StateError> {
        Ok(self.read()?.tip()?.height)
    }

    pub fn tip(&self) -> Result<BlockRecord, StateError> {
        Ok(self.read()?.tip()?)
    }

    pub fn tip_hash(&self) -> Result<[u8; 32], StateError> {
        Ok(self.read()?.tip_hash()?)
    }

    pub fn header_at(&self, height: u64) -> Result<Option<BlockHeader>, StateError> {
        let state = self.read()?;
        Ok(usize::try_from(height)
            .ok()
            .and_then(|i| state.headers.get(i))
            .copied())
    }

    /// Difficulty required for a block built on the current tip at
    /// `candidate_time`.
    pub fn next_work_required(
        &self,
        candidate_time: u32,
    ) -> Result<DifficultyAdjustment, StateError> {
        let state = self.read()?;
        let tip = state.tip()?;
        Ok(self
            .verifier
            .adjuster()
            .calculate_next_difficulty(&state.index, &tip, i64::from(candidate_time))?)
    }

    /// Copy of the committed chain index
    pub fn snapshot(&self) -> Result<BlockIndex, StateError> {
        Ok(self.read()?.index.clone())
    }

    /// Verify `header` against the tip and append it
    pub fn submit_header(&self, header: BlockHeader) -> Result<BlockRecord, StateError> {
        self.connect(header, None)
    }

    /// Like [`StateManager::submit_header`], checking `pow_hash` instead of
    /// the header's own hash against the target.
    pub fn submit_header_with_pow_hash(
        &self,
        header: BlockHeader,
        pow_hash: [u8; 32],
    ) -> Result<BlockRecord, StateError> {
        self.connect(header, Some(pow_hash))
    }

    fn connect(
        &self,
        header: BlockHeader,
        pow_hash: Option<[u8; 32]>,
    ) -> Result<BlockRecord, StateError> {
        let hash = header.hash()?;
        let mut state = self.write()?;
        let tip = state.tip()?;
        let tip_hash = state.tip_hash()?;

        if header.previous_hash != tip_hash {
            log::warn!(
                "Rejected header {}: does not extend tip {}",
                hash_to_hex(&hash),
                hash_to_hex(&tip_hash)
            );
            return Err(StateError::Orphan {
                tip: hash_to_hex(&tip_hash),
                previous: hash_to_hex(&header.previous_hash),
            });
        }

        let pow_hash = pow_hash.unwrap_or(hash);
        if let Err(e) = self
            .verifier
            .verify_with_pow_hash(&state.index, &tip, &header, &pow_hash)
        {
            log::warn!(
                "Rejected header {} at height {}: {}",
                hash_to_hex(&hash),
                tip.height + 1,
                e
            );
            return Err(e.into());
        }

        let record = BlockRecord::new(tip.height + 1, i64::from(header.time), header.bits);
        state.index.push(record)?;
        state.headers.push(header);
        state.hashes.push(hash);

        if record.bits != tip.bits {
            log::info!(
                "Difficulty changed at height {}: 0x{:08x} -> 0x{:08x}",
                record.height,
                tip.bits,
                record.bits
            );
        }
        log::info!(
            "Accepted header {} at height {}",
            hash_to_hex(&hash),
            record.height
        );

        Ok(record)
    }

    /// Disconnect the tip header
    pub fn rollback(&self) -> Result<BlockHeader, StateError> {
        let mut state = self.write()?;
        if state.headers.len() <= 1 {
            return Err(StateError::CannotDisconnectGenesis);
        }

        let mut records = state.index.records().to_vec();
        records.pop();
        state.index = records.into_iter().collect();
        state.hashes.pop();
        let header = state.headers.pop().ok_or(ChainError::EmptyChain)?;

        log::info!(
            "Disconnected header at height {}, new tip height {}",
            state.headers.len(),
            state.headers.len() - 1
        );
        Ok(header)
    }

    /// Get state statistics
    pub fn statistics(&self) -> Result<StateStatistics, StateError> {
        let state = self.read()?;
        let tip = state.tip()?;
        let next = self
            .verifier
            .adjuster()
            .calculate_next_difficulty(&state.index, &tip, tip.timestamp)?;

        let chain_work = state
            .index
            .records()
            .iter()
            .fold(Target::zero(), |work, record| {
                work.saturating_add(block_proof(record.bits))
            });

        Ok(StateStatistics {
            height: tip.height,
            tip_bits: tip.bits,
            next_bits: next.new_bits,
            chain_work,
        })
    }

    /// Serialize the header chain for backup
    pub fn export_headers(&self) -> Result<Vec<u8>, StateError> {
        let state = self.read()?;
        bincode::serialize(&state.headers)
            .map_err(|e| StateError::SerializationError(e.to_string()))
    }

    /// Rebuild a state manager from exported headers
    ///
    /// Every header after genesis is verified again while it is replayed.
    pub fn import_headers(data: &[u8], verifier: HeaderVerifier) -> Result<Self, StateError> {
        let headers: Vec<BlockHeader> = bincode::deserialize(data)
            .map_err(|e| StateError::SerializationError(e.to_string()))?;

        let (genesis, rest) = headers.split_first().ok_or(ChainError::EmptyChain)?;
        let manager = Self::new(*genesis, verifier)?;
        for header in rest {
            manager.submit_header(*header)?;
        }

        log::info!("Imported {} headers", headers.len());
        Ok(manager)
    }
}

/// State statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStatistics {
    /// Current tip height
    pub height: u64,
    /// Bits of the tip block
    pub tip_bits: u32,
    /// Bits required for a block at the tip's timestamp
    pub next_bits: u32,
    /// Sum of the expected work of every block
    pub chain_work: Target,
}

/// State management errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Header does not extend the tip: tip {tip}, previous {previous}")]
    Orphan { tip: String, previous: String },

    #[error("Genesis cannot be disconnected")]
    CannotDisconnectGenesis,

    #[error("State lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error("Difficulty error: {0}")]
    Difficulty(#[from] DifficultyError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use retarget_core::{
        check_proof_of_work, DifficultyAdjuster, Network, PowError, RetargetRule, BLOCK_VERSION,
    };
    use std::thread;

    const REGTEST_BITS: u32 = 0x207fffff;
    const GENESIS_TIME: u32 = 1_296_688_602;

    fn regtest_manager() -> StateManager {
        let genesis = BlockHeader::new(
            BLOCK_VERSION,
            [0; 32],
            [0x4a; 32],
            GENESIS_TIME,
            REGTEST_BITS,
            2,
        );
        let verifier = HeaderVerifier::new(DifficultyAdjuster::for_network(Network::Regtest));
        StateManager::new(genesis, verifier).unwrap()
    }

    fn candidate(manager: &StateManager, nonce: u32) -> BlockHeader {
        let tip = manager.tip().unwrap();
        BlockHeader::new(
            BLOCK_VERSION,
            manager.tip_hash().unwrap(),
            [0x11; 32],
            tip.timestamp as u32 + 150,
            REGTEST_BITS,
            nonce,
        )
    }

    fn mine(manager: &StateManager) -> BlockHeader {
        let params = manager.params().clone();
        (0u32..)
            .map(|nonce| candidate(manager, nonce))
            .find(|h| check_proof_of_work(&h.hash().unwrap(), h.bits, &params))
            .unwrap()
    }

    fn extend(manager: &StateManager, count: usize) {
        for _ in 0..count {
            manager.submit_header(mine(manager)).unwrap();
        }
    }

    #[test]
    fn test_state_manager_creation() {
        let manager = regtest_manager();

        assert_eq!(manager.height().unwrap(), 0);
        assert_eq!(manager.tip().unwrap().bits, REGTEST_BITS);
        let genesis = manager.header_at(0).unwrap().unwrap();
        assert_eq!(manager.tip_hash().unwrap(), genesis.hash().unwrap());
        assert_eq!(manager.header_at(1).unwrap(), None);
    }

    #[test]
    fn test_submit_headers() {
        let manager = regtest_manager();
        extend(&manager, 5);

        assert_eq!(manager.height().unwrap(), 5);
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.len(), 6);
        assert_eq!(
            snapshot.tip().unwrap().timestamp,
            i64::from(GENESIS_TIME) + 5 * 150
        );
    }

    #[test]
    fn test_next_work_required() {
        let manager = regtest_manager();
        extend(&manager, 2);
        let tip = manager.tip().unwrap();

        let on_time = manager.next_work_required(tip.timestamp as u32 + 150).unwrap();
        assert_eq!(on_time.new_bits, REGTEST_BITS);
        assert_eq!(on_time.rule, RetargetRule::LastRegularDifficulty { height: 0 });

        let late = manager.next_work_required(tip.timestamp as u32 + 301).unwrap();
        assert_eq!(late.rule, RetargetRule::MinDifficultyGap);
    }

    #[test]
    fn test_orphan_rejected() {
        let manager = regtest_manager();
        let mut header = mine(&manager);
        header.previous_hash = [0xab; 32];

        let result = manager.submit_header(header);
        assert!(matches!(result, Err(StateError::Orphan { .. })));
        assert_eq!(manager.height().unwrap(), 0);
    }

    #[test]
    fn test_bad_bits_rejected() {
        let manager = regtest_manager();
        let header = BlockHeader {
            bits: 0x1e0ffff0,
            ..candidate(&manager, 0)
        };

        let result = manager.submit_header_with_pow_hash(header, [0; 32]);
        assert!(matches!(
            result,
            Err(StateError::Consensus(ConsensusError::BadDifficultyBits {
                expected: REGTEST_BITS,
                got: 0x1e0ffff0,
            }))
        ));
        assert_eq!(manager.height().unwrap(), 0);
    }

    #[test]
    fn test_high_hash_rejected() {
        let manager = regtest_manager();
        let params = manager.params().clone();
        let header = (0u32..)
            .map(|nonce| candidate(&manager, nonce))
            .find(|h| !check_proof_of_work(&h.hash().unwrap(), h.bits, &params))
            .unwrap();

        let result = manager.submit_header(header);
        assert!(matches!(
            result,
            Err(StateError::Consensus(ConsensusError::InvalidProofOfWork(
                PowError::HashAboveTarget
            )))
        ));
        assert_eq!(manager.height().unwrap(), 0);
    }

    #[test]
    fn test_external_pow_hash() {
        let manager = regtest_manager();
        let header = candidate(&manager, 7);

        let record = manager.submit_header_with_pow_hash(header, [0; 32]).unwrap();
        assert_eq!(record.height, 1);
        assert_eq!(manager.tip_hash().unwrap(), header.hash().unwrap());

        let next = candidate(&manager, 8);
        let result = manager.submit_header_with_pow_hash(next, [0xff; 32]);
        assert!(matches!(
            result,
            Err(StateError::Consensus(ConsensusError::InvalidProofOfWork(_)))
        ));
    }

    #[test]
    fn test_state_rollback() {
        let manager = regtest_manager();
        extend(&manager, 2);
        let tip_header = manager.header_at(2).unwrap().unwrap();

        assert_eq!(manager.rollback().unwrap(), tip_header);
        assert_eq!(manager.height().unwrap(), 1);
        assert_eq!(
            manager.tip_hash().unwrap(),
            manager.header_at(1).unwrap().unwrap().hash().unwrap()
        );

        // The disconnected header can be connected again
        manager.submit_header(tip_header).unwrap();
        assert_eq!(manager.height().unwrap(), 2);

        manager.rollback().unwrap();
        manager.rollback().unwrap();
        assert!(matches!(
            manager.rollback(),
            Err(StateError::CannotDisconnectGenesis)
        ));
    }

    #[test]
    fn test_statistics() {
        let manager = regtest_manager();
        extend(&manager, 3);

        let stats = manager.statistics().unwrap();
        assert_eq!(stats.height, 3);
        assert_eq!(stats.tip_bits, REGTEST_BITS);
        assert_eq!(stats.next_bits, REGTEST_BITS);
        // Every regtest block is worth two expected hashes
        assert_eq!(stats.chain_work, Target::from(8u64));
    }

    #[test]
    fn test_export_import() {
        let manager = regtest_manager();
        extend(&manager, 4);

        let data = manager.export_headers().unwrap();
        let verifier = HeaderVerifier::new(DifficultyAdjuster::for_network(Network::Regtest));
        let imported = StateManager::import_headers(&data, verifier.clone()).unwrap();

        assert_eq!(imported.snapshot().unwrap(), manager.snapshot().unwrap());
        assert_eq!(imported.tip_hash().unwrap(), manager.tip_hash().unwrap());

        // A tampered header breaks the replay
        let mut headers: Vec<BlockHeader> = bincode::deserialize(&data).unwrap();
        headers[2].bits = 0x1e0ffff0;
        let tampered = bincode::serialize(&headers).unwrap();
        assert!(StateManager::import_headers(&tampered, verifier.clone()).is_err());

        let empty = bincode::serialize(&Vec::<BlockHeader>::new()).unwrap();
        assert!(matches!(
            StateManager::import_headers(&empty, verifier),
            Err(StateError::Chain(ChainError::EmptyChain))
        ));
    }

    #[test]
    fn test_concurrent_readers() {
        let manager = regtest_manager();

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let snapshot = manager.snapshot().unwrap();
                        let tip = snapshot.tip().unwrap();
                        assert_eq!(snapshot.len() as u64, tip.height + 1);

                        let next = manager.next_work_required(tip.timestamp as u32).unwrap();
                        assert_eq!(next.new_bits, REGTEST_BITS);
                    }
                });
            }

            extend(&manager, 10);
        });

        assert_eq!(manager.height().unwrap(), 10);
    }
}
