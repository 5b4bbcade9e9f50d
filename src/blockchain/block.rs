use std::iter;
use std::time::Instant;

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use super::crypto::{has_leading_zero_bits, hash_fields, to_canonical};
use super::miner::{CancelToken, MiningError};
use super::transaction::Transaction;
use crate::config::{CoinbaseIssuer, GenesisData, ProtocolConfig};

/// How far in the future a block timestamp may be (clock skew)
const FUTURE_TIMESTAMP_CUSHION_MS: i64 = 1000 * 5;

/// How far back a block may be stamped relative to its predecessor
const OUT_OF_ORDER_CUSHION_MS: i64 = 1000 * 60 * 10;

/// Slack added to the observed block interval when checking mining duration
const MINING_DURATION_CUSHION_MS: i64 = 1000 * 60 * 2;

/// Nonces tried between two checks of the cancel flag
const CANCEL_POLL_INTERVAL: u64 = 1024;

/// Distinguishes the hardcoded genesis block from mined blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    #[default]
    Standard,
    Genesis,
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Construction time in milliseconds since epoch
    pub timestamp: i64,

    /// Proof-of-work hash, empty until the block is mined
    #[serde(default)]
    pub hash: String,

    /// Position in the chain, genesis is 0
    pub height: u64,

    pub nonce: u64,

    /// Wall-clock time spent mining
    #[serde(default)]
    pub mining_duration_ms: i64,

    /// Hash of the previous block, `None` for genesis
    pub previous_hash: Option<String>,

    /// Transactions in inclusion order
    pub transactions: Vec<Transaction>,

    /// Required number of leading zero bits in `hash`
    pub difficulty: u32,

    #[serde(default)]
    pub kind: BlockKind,
}

impl Block {
    /// Creates a new, unmined block stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include, in order
    /// * `difficulty` - Required number of leading zero bits
    /// * `previous_hash` - Hash of the parent block, `None` only for genesis
    /// * `height` - Position of the block in the chain
    ///
    /// # Returns
    ///
    /// A new Block instance with an empty hash and nonce 0
    pub fn new(
        transactions: Vec<Transaction>,
        difficulty: u32,
        previous_hash: Option<String>,
        height: u64,
    ) -> Self {
        Block {
            timestamp: Utc::now().timestamp_millis(),
            hash: String::new(),
            height,
            nonce: 0,
            mining_duration_ms: 0,
            previous_hash,
            transactions,
            difficulty,
            kind: BlockKind::Standard,
        }
    }

    /// Builds the fixed first block of the chain
    ///
    /// # Arguments
    ///
    /// * `data` - The network's genesis fields
    ///
    /// # Returns
    ///
    /// The genesis Block, hashed but not mined
    pub fn genesis(data: &GenesisData) -> Self {
        let mut block = Block {
            timestamp: data.timestamp,
            hash: String::new(),
            height: 0,
            nonce: data.nonce,
            mining_duration_ms: data.mining_duration_ms,
            previous_hash: None,
            transactions: Vec::new(),
            difficulty: data.difficulty,
            kind: BlockKind::Genesis,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Hash of `(timestamp, transactions, previous_hash, height, difficulty, nonce)`
    pub fn calculate_hash(&self) -> String {
        Self::hash_with_nonce(&self.header_fields(), self.nonce)
    }

    // Every hashed field except the nonce, canonicalized once per search
    fn header_fields(&self) -> [String; 5] {
        [
            to_canonical(&self.timestamp),
            to_canonical(&self.transactions),
            to_canonical(&self.previous_hash),
            to_canonical(&self.height),
            to_canonical(&self.difficulty),
        ]
    }

    fn hash_with_nonce(header: &[String; 5], nonce: u64) -> String {
        let nonce = to_canonical(&nonce);
        hash_fields(header.iter().map(String::as_str).chain(iter::once(nonce.as_str())))
    }

    /// Runs the proof-of-work search and returns the mining duration in ms
    ///
    /// Termination is probabilistic: roughly `2^difficulty` hashes are needed.
    pub fn mine_block(&mut self) -> i64 {
        // A fresh token is never cancelled
        self.mine_block_with_cancel(&CancelToken::new())
            .unwrap_or_default()
    }

    /// Proof-of-work search that stops early once `cancel` is set
    ///
    /// On cancellation the block keeps its partial nonce and no hash.
    ///
    /// # Arguments
    ///
    /// * `cancel` - Token polled every few thousand nonces
    ///
    /// # Returns
    ///
    /// The mining duration in ms, or `MiningError::Cancelled`
    pub fn mine_block_with_cancel(&mut self, cancel: &CancelToken) -> Result<i64, MiningError> {
        let started = Instant::now();
        let header = self.header_fields();

        debug!(
            "Mining block {} at difficulty {} with {} transactions",
            self.height,
            self.difficulty,
            self.transactions.len()
        );

        loop {
            if self.nonce % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(MiningError::Cancelled { nonce: self.nonce });
            }

            self.nonce += 1;
            let hash = Self::hash_with_nonce(&header, self.nonce);
            if has_leading_zero_bits(&hash, self.difficulty) {
                self.hash = hash;
                break;
            }
        }

        self.mining_duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        debug!(
            "Mined block {} with nonce {} in {} ms",
            self.height, self.nonce, self.mining_duration_ms
        );

        Ok(self.mining_duration_ms)
    }

    /// Validity rule for the block's kind
    ///
    /// # Arguments
    ///
    /// * `config` - Network rules (coinbase issuer and genesis data)
    ///
    /// # Returns
    ///
    /// `true` if the block is valid on its own, ignoring its neighbours
    pub fn is_valid(&self, config: &ProtocolConfig) -> bool {
        match self.kind {
            BlockKind::Standard => {
                self.has_valid_transactions(&config.coinbase)
                    && self.has_only_one_coinbase_tx()
                    && self.timestamp_is_in_past()
                    && self.has_proof_of_work()
            }
            BlockKind::Genesis => self.is_valid_genesis(&config.genesis),
        }
    }

    pub fn has_valid_transactions(&self, issuer: &CoinbaseIssuer) -> bool {
        self.transactions
            .iter()
            .all(|transaction| transaction.passes_validation(issuer))
    }

    pub fn has_only_one_coinbase_tx(&self) -> bool {
        match self.kind {
            BlockKind::Genesis => true,
            BlockKind::Standard => {
                self.transactions
                    .iter()
                    .filter(|transaction| transaction.is_coinbase())
                    .count()
                    == 1
            }
        }
    }

    pub fn timestamp_is_in_past(&self) -> bool {
        self.timestamp <= Utc::now().timestamp_millis() + FUTURE_TIMESTAMP_CUSHION_MS
    }

    pub fn has_proof_of_work(&self) -> bool {
        self.has_valid_hash() && self.meets_difficulty()
    }

    /// Stored hash equals the recomputed content hash
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// The first `difficulty` bits of the stored hash are zero
    pub fn meets_difficulty(&self) -> bool {
        has_leading_zero_bits(&self.hash, self.difficulty)
    }

    fn is_valid_genesis(&self, data: &GenesisData) -> bool {
        self.height == 0
            && self.previous_hash.is_none()
            && self.transactions.is_empty()
            && self.timestamp == data.timestamp
            && self.difficulty == data.difficulty
            && self.nonce == data.nonce
            && self.mining_duration_ms == data.mining_duration_ms
            && self.has_valid_hash()
    }

    /// All linkage rules between consecutive blocks
    ///
    /// # Arguments
    ///
    /// * `block1` - The parent block
    /// * `block2` - The block that claims to follow it
    /// * `target_mine_rate_ms` - Target block interval used by the difficulty rule
    ///
    /// # Returns
    ///
    /// `true` if `block2` may directly follow `block1`
    pub fn are_blocks_validly_connected(block1: &Block, block2: &Block, target_mine_rate_ms: i64) -> bool {
        Self::blocks_hashes_are_connected(block1, block2)
            && Self::block2_comes_after_block1(block1, block2)
            && Self::difficulty_jump_is_valid(block1, block2, target_mine_rate_ms)
            && Self::block1_has_plausible_mining_duration(block1, block2)
    }

    pub fn blocks_hashes_are_connected(block1: &Block, block2: &Block) -> bool {
        block2.previous_hash.as_deref() == Some(block1.hash.as_str())
    }

    /// Checks that `block2` is not stamped too far before `block1`
    ///
    /// Timestamps come from peers, so the difference saturates instead of
    /// overflowing.
    pub fn block2_comes_after_block1(block1: &Block, block2: &Block) -> bool {
        block2.timestamp.saturating_sub(block1.timestamp) > -OUT_OF_ORDER_CUSHION_MS
    }

    /// Difficulty may drop by at most one, and must rise after a fast block
    pub fn difficulty_jump_is_valid(block1: &Block, block2: &Block, target_mine_rate_ms: i64) -> bool {
        let difficulty_jump = i64::from(block2.difficulty) - i64::from(block1.difficulty);
        if difficulty_jump < -1 {
            return false;
        }
        if block1.mining_duration_ms < target_mine_rate_ms {
            return difficulty_jump >= 1;
        }
        true
    }

    pub fn block1_has_plausible_mining_duration(block1: &Block, block2: &Block) -> bool {
        let time_between_blocks = block2.timestamp.saturating_sub(block1.timestamp);
        block1.mining_duration_ms < time_between_blocks.saturating_add(MINING_DURATION_CUSHION_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;
    use crate::config::GENESIS_TIMESTAMP_MS;
    use crate::test_utils::test_config;

    fn mined_block(config: &ProtocolConfig, previous: &Block, difficulty: u32) -> Block {
        let coinbase = Transaction::new_coinbase(Wallet::new().public_key(), 10.0, &config.coinbase).unwrap();
        let mut block = Block::new(
            vec![coinbase],
            difficulty,
            Some(previous.hash.clone()),
            previous.height + 1,
        );
        block.mine_block();
        block
    }

    #[test]
    fn test_new_block() {
        let block = Block::new(Vec::new(), 3, Some("previous_hash".to_string()), 1);

        assert_eq!(block.height, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.difficulty, 3);
        assert_eq!(block.kind, BlockKind::Standard);
        assert!(block.hash.is_empty());
    }

    #[test]
    fn test_calculate_hash() {
        let block = Block::new(Vec::new(), 1, Some("previous_hash".to_string()), 1);

        let hash = block.calculate_hash();
        assert_eq!(hash.len(), 64); // SHA-256 hash is 64 characters in hex
        assert_eq!(hash, block.calculate_hash());
    }

    #[test]
    fn test_mining_produces_leading_zero_bits() {
        for difficulty in 0..=4 {
            let mut block = Block::new(Vec::new(), difficulty, Some("prev".to_string()), 1);
            block.mine_block();

            assert!(block.nonce > 0);
            assert!(block.has_valid_hash());
            assert!(has_leading_zero_bits(&block.hash, difficulty));
            assert!(block.mining_duration_ms >= 0);
        }
    }

    #[test]
    fn test_tampering_invalidates_proof_of_work() {
        let config = test_config();
        let genesis = Block::genesis(&config.genesis);
        let mut block = mined_block(&config, &genesis, 2);
        assert!(block.is_valid(&config));

        block.transactions[0].amount = 1_000_000.0;

        assert!(!block.has_valid_hash());
        assert!(!block.is_valid(&config));
    }

    #[test]
    fn test_block_requires_exactly_one_coinbase() {
        let config = test_config();

        let mut empty = Block::new(Vec::new(), 1, Some("prev".to_string()), 1);
        empty.mine_block();
        assert!(!empty.has_only_one_coinbase_tx());
        assert!(!empty.is_valid(&config));

        let reward = |amount| Transaction::new_coinbase("miner", amount, &config.coinbase).unwrap();
        let mut double = Block::new(vec![reward(1.0), reward(2.0)], 1, Some("prev".to_string()), 1);
        double.mine_block();
        assert!(!double.is_valid(&config));
    }

    #[test]
    fn test_far_future_timestamp_is_rejected() {
        let config = test_config();
        let genesis = Block::genesis(&config.genesis);
        let mut block = mined_block(&config, &genesis, 1);

        block.timestamp = Utc::now().timestamp_millis() + 60_000;
        block.nonce = 0;
        block.mine_block();

        assert!(block.has_proof_of_work());
        assert!(!block.timestamp_is_in_past());
        assert!(!block.is_valid(&config));
    }

    #[test]
    fn test_genesis_is_valid_and_fixed() {
        let config = test_config();
        let genesis = Block::genesis(&config.genesis);

        assert!(genesis.is_valid(&config));
        assert_eq!(genesis, Block::genesis(&config.genesis));
        assert!(genesis.has_only_one_coinbase_tx());

        let mut forged = genesis.clone();
        forged.timestamp += 1;
        forged.hash = forged.calculate_hash();
        assert!(!forged.is_valid(&config));
    }

    #[test]
    fn test_sequential_blocks_are_connected() {
        let config = test_config();
        let genesis = Block::genesis(&config.genesis);
        let block1 = mined_block(&config, &genesis, genesis.difficulty + 1);
        let block2 = mined_block(&config, &block1, block1.difficulty + 1);

        assert!(Block::are_blocks_validly_connected(&genesis, &block1, config.target_mine_rate_ms));
        assert!(Block::are_blocks_validly_connected(&block1, &block2, config.target_mine_rate_ms));

        let mut detached = block2.clone();
        detached.previous_hash = Some("f".repeat(64));
        assert!(!Block::blocks_hashes_are_connected(&block1, &detached));
        assert!(!Block::are_blocks_validly_connected(&block1, &detached, config.target_mine_rate_ms));
    }

    #[test]
    fn test_timestamp_ordering_cushion() {
        let mut block1 = Block::new(Vec::new(), 1, None, 0);
        let mut block2 = Block::new(Vec::new(), 1, None, 1);
        block1.timestamp = 1_000_000_000;

        block2.timestamp = block1.timestamp - 60_000;
        assert!(Block::block2_comes_after_block1(&block1, &block2));

        block2.timestamp = block1.timestamp - OUT_OF_ORDER_CUSHION_MS;
        assert!(!Block::block2_comes_after_block1(&block1, &block2));
    }

    #[test]
    fn test_difficulty_jump_rules() {
        let target = 1_000;
        let mut block1 = Block::new(Vec::new(), 5, None, 0);
        let mut block2 = Block::new(Vec::new(), 5, None, 1);

        // block1 was slow: anything down to one below is fine
        block1.mining_duration_ms = 5_000;
        block2.difficulty = 4;
        assert!(Block::difficulty_jump_is_valid(&block1, &block2, target));
        block2.difficulty = 3;
        assert!(!Block::difficulty_jump_is_valid(&block1, &block2, target));

        // block1 was fast: difficulty has to go up
        block1.mining_duration_ms = 10;
        block2.difficulty = 5;
        assert!(!Block::difficulty_jump_is_valid(&block1, &block2, target));
        block2.difficulty = 6;
        assert!(Block::difficulty_jump_is_valid(&block1, &block2, target));
    }

    #[test]
    fn test_implausible_mining_duration() {
        let mut block1 = Block::new(Vec::new(), 1, None, 0);
        let mut block2 = Block::new(Vec::new(), 1, None, 1);
        block1.timestamp = 1_000_000;
        block2.timestamp = block1.timestamp + 1_000;

        block1.mining_duration_ms = 1_000 + MINING_DURATION_CUSHION_MS - 1;
        assert!(Block::block1_has_plausible_mining_duration(&block1, &block2));

        block1.mining_duration_ms = 1_000 + MINING_DURATION_CUSHION_MS;
        assert!(!Block::block1_has_plausible_mining_duration(&block1, &block2));
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let mut block1 = Block::new(Vec::new(), 1, None, 0);
        let mut block2 = Block::new(Vec::new(), 1, None, 1);
        block1.timestamp = GENESIS_TIMESTAMP_MS;

        block2.timestamp = i64::MIN;
        assert!(!Block::block2_comes_after_block1(&block1, &block2));
        assert!(!Block::block1_has_plausible_mining_duration(&block1, &block2));

        block1.timestamp = i64::MIN;
        block2.timestamp = i64::MAX;
        block1.mining_duration_ms = i64::MAX - 1;
        assert!(Block::block2_comes_after_block1(&block1, &block2));
        assert!(Block::block1_has_plausible_mining_duration(&block1, &block2));

        block1.timestamp = i64::MAX;
        block2.timestamp = i64::MIN;
        assert!(!Block::block2_comes_after_block1(&block1, &block2));
    }

    #[test]
    fn test_block_stamped_at_min_time_is_not_connected() {
        let config = test_config();
        let genesis = Block::genesis(&config.genesis);
        let mut block = mined_block(&config, &genesis, genesis.difficulty + 1);

        block.timestamp = i64::MIN;
        block.nonce = 0;
        block.mine_block();

        assert!(block.is_valid(&config));
        assert!(!Block::are_blocks_validly_connected(&genesis, &block, config.target_mine_rate_ms));
    }

    #[test]
    fn test_cancelled_search_leaves_block_unmined() {
        let mut block = Block::new(Vec::new(), 200, Some("prev".to_string()), 1);
        let token = CancelToken::new();
        token.cancel();

        let result = block.mine_block_with_cancel(&token);

        assert!(matches!(result, Err(MiningError::Cancelled { nonce: 0 })));
        assert!(block.hash.is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let config = test_config();
        let block = Block::genesis(&config.genesis);

        let json = serde_json::to_value(&block).unwrap();

        for field in [
            "timestamp",
            "hash",
            "height",
            "nonce",
            "miningDurationMs",
            "previousHash",
            "transactions",
            "difficulty",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(json["previousHash"].is_null());

        let restored: Block = serde_json::from_value(json).unwrap();
        assert_eq!(restored, block);
    }
}
