use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use super::block::{Block, BlockKind};
use crate::config::ProtocolConfig;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Invalid chain: {0}")]
    InvalidChain(String),
}

/// Ordered sequence of blocks starting at the genesis block
///
/// The chain is never empty. It changes only through
/// [`Blockchain::add_block_to_chain`] and [`Blockchain::replace_chain`].
#[derive(Debug, Clone)]
pub struct Blockchain {
    chain: Vec<Block>,
    config: Arc<ProtocolConfig>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new blockchain for the production network
    pub fn new() -> Self {
        Self::with_config(ProtocolConfig::default())
    }

    /// Creates a new blockchain holding only the configured genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - The network's protocol constants
    ///
    /// # Returns
    ///
    /// A new Blockchain instance
    pub fn with_config(config: ProtocolConfig) -> Self {
        Blockchain {
            chain: vec![Block::genesis(&config.genesis)],
            config: Arc::new(config),
        }
    }

    /// Wraps blocks received from elsewhere, e.g. a peer's chain
    ///
    /// Only the genesis shape is checked here; use
    /// [`Blockchain::is_chain_valid`] for full validation.
    ///
    /// # Arguments
    ///
    /// * `blocks` - The blocks, genesis first
    /// * `config` - The rules the blocks claim to follow
    ///
    /// # Returns
    ///
    /// The wrapped chain, or `BlockchainError::InvalidChain` if the first
    /// block is missing or is not a genesis block
    pub fn from_blocks(blocks: Vec<Block>, config: ProtocolConfig) -> Result<Self, BlockchainError> {
        match blocks.first() {
            None => Err(BlockchainError::InvalidChain("chain has no blocks".to_string())),
            Some(first) if first.kind != BlockKind::Genesis => Err(BlockchainError::InvalidChain(
                "first block is not a genesis block".to_string(),
            )),
            Some(_) => Ok(Blockchain {
                chain: blocks,
                config: Arc::new(config),
            }),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub(crate) fn shared_config(&self) -> Arc<ProtocolConfig> {
        Arc::clone(&self.config)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn get_latest_block(&self) -> &Block {
        self.chain
            .last()
            .expect("Blockchain should always have at least the genesis block")
    }

    /// Appends a block without validating it
    pub fn add_block_to_chain(&mut self, block: Block) -> &[Block] {
        info!(
            "Appending block {} ({} transactions) to the chain",
            block.height,
            block.transactions.len()
        );
        self.chain.push(block);
        &self.chain
    }

    /// Validates every block and every link, starting at genesis
    pub fn is_chain_valid(&self) -> bool {
        validate_blocks(&self.chain, &self.config)
    }

    /// Adopts `candidate` if it is strictly longer and valid under our rules
    ///
    /// # Arguments
    ///
    /// * `candidate` - The competing chain
    ///
    /// # Returns
    ///
    /// `true` if the chain was replaced; `false` leaves it untouched
    pub fn replace_chain(&mut self, candidate: Blockchain) -> bool {
        if candidate.len() <= self.len() {
            warn!(
                "Rejected replacement chain: length {} is not longer than {}",
                candidate.len(),
                self.len()
            );
            return false;
        }

        if !validate_blocks(&candidate.chain, &self.config) {
            warn!("Rejected replacement chain: validation failed");
            return false;
        }

        info!("Replacing chain of length {} with {}", self.len(), candidate.len());
        self.chain = candidate.chain;
        true
    }
}

fn validate_blocks(chain: &[Block], config: &ProtocolConfig) -> bool {
    let genesis_is_valid = chain
        .first()
        .is_some_and(|genesis| genesis.kind == BlockKind::Genesis && genesis.is_valid(config));
    if !genesis_is_valid {
        return false;
    }

    chain.windows(2).all(|pair| {
        let (previous_block, current_block) = (&pair[0], &pair[1]);
        current_block.kind == BlockKind::Standard
            && current_block.is_valid(config)
            && Block::are_blocks_validly_connected(
                previous_block,
                current_block,
                config.target_mine_rate_ms,
            )
    })
}
