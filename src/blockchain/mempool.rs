use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use log::{debug, info, warn};
use thiserror::Error;

use super::block::Block;
use super::chain::Blockchain;
use super::crypto::CryptoError;
use super::miner::{join_mining, spawn_mining, CancelToken, MiningError};
use super::transaction::{Transaction, TransactionError};
use super::wallet::Wallet;
use crate::config::{ProtocolConfig, MAX_DIFFICULTY};

/// Errors that can occur while admitting or mining transactions
#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Stale block: expected parent {expected}, mined on {actual}")]
    StaleBlock { expected: String, actual: String },

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),
}

/// Staging pool of transactions waiting to be mined into the shared chain
#[derive(Debug)]
pub struct Mempool {
    pending_transactions: Vec<Transaction>,
    blockchain: Arc<RwLock<Blockchain>>,
    config: Arc<ProtocolConfig>,
}

impl Mempool {
    /// Creates an empty mempool feeding `blockchain`
    ///
    /// # Arguments
    ///
    /// * `blockchain` - The chain shared with readers and other writers
    ///
    /// # Returns
    ///
    /// A new Mempool instance
    pub fn new(blockchain: Arc<RwLock<Blockchain>>) -> Self {
        let config = blockchain
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shared_config();

        Mempool {
            pending_transactions: Vec::new(),
            blockchain,
            config,
        }
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn blockchain(&self) -> Arc<RwLock<Blockchain>> {
        Arc::clone(&self.blockchain)
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, Blockchain> {
        self.blockchain.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates and queues a transaction
    ///
    /// Checks run in order: validity, available funds, duplicate signature.
    ///
    /// # Arguments
    ///
    /// * `transaction` - The signed transaction to admit
    ///
    /// # Returns
    ///
    /// Result indicating admission, or the first check that failed
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), MempoolError> {
        if !transaction.is_valid(&self.config.coinbase)? {
            warn!("Rejected transaction {}: failed validation", transaction.uuid);
            return Err(MempoolError::InvalidTransaction(transaction.uuid));
        }

        {
            let chain = self.read_chain();
            if !Wallet::wallet_has_sufficient_funds(
                &transaction.from_address,
                &transaction,
                chain.blocks(),
                &self.pending_transactions,
            ) {
                let available = Wallet::get_available_balance(
                    &transaction.from_address,
                    chain.blocks(),
                    &self.pending_transactions,
                );
                warn!(
                    "Rejected transaction {}: needs {}, has {}",
                    transaction.uuid,
                    transaction.total_amount(),
                    available
                );
                return Err(MempoolError::InsufficientFunds {
                    required: transaction.total_amount(),
                    available,
                });
            }
        }

        if self
            .pending_transactions
            .iter()
            .any(|pending| pending.signature == transaction.signature)
        {
            warn!("Rejected transaction {}: already pending", transaction.uuid);
            return Err(MempoolError::DuplicateTransaction(transaction.uuid));
        }

        info!(
            "Admitted transaction {} ({} + {} fee)",
            transaction.uuid, transaction.amount, transaction.fee
        );
        self.pending_transactions.push(transaction);
        Ok(())
    }

    /// Base subsidy halved once per completed halving epoch of chain length
    pub fn get_current_block_subsidy(&self) -> f64 {
        let chain_length = self.read_chain().len() as u64;
        let halvings = chain_length
            .checked_div(self.config.blocks_per_halving)
            .unwrap_or(0);

        (0..halvings).fold(self.config.block_subsidy, |subsidy, _| subsidy / 2.0)
    }

    pub fn get_total_transaction_fees(&self) -> f64 {
        self.pending_transactions.iter().map(|tx| tx.fee).sum()
    }

    /// Pending fees plus the current subsidy
    pub fn get_mining_reward(&self) -> f64 {
        self.get_total_transaction_fees() + self.get_current_block_subsidy()
    }

    /// Queues the reward for the next block, replacing any leftover coinbase
    ///
    /// # Arguments
    ///
    /// * `reward_address` - The miner's hex public key
    ///
    /// # Returns
    ///
    /// Result indicating success or failure
    pub fn add_coinbase_tx_to_mempool(&mut self, reward_address: &str) -> Result<(), MempoolError> {
        self.remove_pending_coinbase();

        let reward = self.get_mining_reward();
        let coinbase = Transaction::new_coinbase(reward_address, reward, &self.config.coinbase)?;
        info!("Issued coinbase of {} to {}", reward, reward_address);

        self.pending_transactions.push(coinbase);
        Ok(())
    }

    fn remove_pending_coinbase(&mut self) {
        self.pending_transactions.retain(|tx| !tx.is_coinbase());
    }

    /// Retargets from the tip's mining duration
    ///
    /// The result moves by exactly one step, stays at least 1 and never
    /// exceeds [`MAX_DIFFICULTY`], the number of bits in a SHA-256 hash.
    ///
    /// # Returns
    ///
    /// The difficulty the next block must meet
    pub fn get_new_mining_difficulty(&self) -> u32 {
        self.next_difficulty(&self.read_chain())
    }

    fn next_difficulty(&self, chain: &Blockchain) -> u32 {
        let latest_block = chain.get_latest_block();

        let difficulty = if latest_block.mining_duration_ms < self.config.target_mine_rate_ms {
            latest_block.difficulty.saturating_add(1).min(MAX_DIFFICULTY)
        } else {
            latest_block.difficulty.saturating_sub(1).max(1)
        };

        debug!(
            "Difficulty {} -> {} (last block took {} ms)",
            latest_block.difficulty, difficulty, latest_block.mining_duration_ms
        );
        difficulty
    }

    /// Unmined block over a snapshot of the pending set, on top of the tip
    ///
    /// Difficulty, parent hash and height all come from the same read of the
    /// chain.
    pub fn add_pending_transactions_to_block(&self) -> Block {
        let chain = self.read_chain();

        Block::new(
            self.pending_transactions.clone(),
            self.next_difficulty(&chain),
            Some(chain.get_latest_block().hash.clone()),
            chain.len() as u64,
        )
    }

    /// Issues the reward and snapshots the pool into a block ready to mine
    pub fn prepare_block(&mut self, reward_address: &str) -> Result<Block, MempoolError> {
        self.add_coinbase_tx_to_mempool(reward_address)?;
        Ok(self.add_pending_transactions_to_block())
    }

    /// Appends a mined block and drops exactly the transactions it included
    ///
    /// Fails with [`MempoolError::StaleBlock`] if the tip moved since the
    /// block was prepared; the pool is left untouched in that case.
    ///
    /// # Arguments
    ///
    /// * `block` - A block from [`Mempool::prepare_block`] that has been mined
    ///
    /// # Returns
    ///
    /// The appended block
    pub fn commit_mined_block(&mut self, block: Block) -> Result<Block, MempoolError> {
        // Field-level borrow so the pool can be pruned under the same guard
        let mut chain = self.blockchain.write().unwrap_or_else(PoisonError::into_inner);

        let tip_hash = &chain.get_latest_block().hash;
        if block.previous_hash.as_ref() != Some(tip_hash) {
            warn!("Discarding stale block {}", block.height);
            return Err(MempoolError::StaleBlock {
                expected: tip_hash.clone(),
                actual: block.previous_hash.unwrap_or_default(),
            });
        }

        let included: HashSet<&str> = block
            .transactions
            .iter()
            .filter_map(|tx| tx.signature.as_deref())
            .collect();
        self.pending_transactions.retain(|tx| {
            tx.signature
                .as_deref()
                .map_or(true, |signature| !included.contains(signature))
        });

        chain.add_block_to_chain(block.clone());
        Ok(block)
    }

    /// Rewards `reward_address`, mines the pool and appends the block
    ///
    /// # Arguments
    ///
    /// * `reward_address` - The miner's hex public key
    ///
    /// # Returns
    ///
    /// The mined block, now the chain tip
    pub fn mine_pending_transactions(&mut self, reward_address: &str) -> Result<Block, MempoolError> {
        self.mine_pending_transactions_with_cancel(reward_address, &CancelToken::new())
    }

    /// Like [`Mempool::mine_pending_transactions`], aborting once `cancel` is set
    ///
    /// A cancelled attempt withdraws its coinbase and leaves the chain as is.
    pub fn mine_pending_transactions_with_cancel(
        &mut self,
        reward_address: &str,
        cancel: &CancelToken,
    ) -> Result<Block, MempoolError> {
        let mut block = self.prepare_block(reward_address)?;

        if let Err(err) = block.mine_block_with_cancel(cancel) {
            info!("Mining of block {} stopped: {}", block.height, err);
            self.remove_pending_coinbase();
            return Err(err.into());
        }

        self.commit_mined_block(block)
    }

    pub fn reset_mempool(&mut self) {
        self.pending_transactions.clear();
    }
}

fn lock(mempool: &Mutex<Mempool>) -> MutexGuard<'_, Mempool> {
    mempool.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mines on tokio's blocking pool while the mempool stays open for admissions
///
/// The lock is held only to prepare and to commit. Transactions admitted in
/// between stay pending for the next block.
///
/// # Arguments
///
/// * `mempool` - The shared mempool
/// * `reward_address` - The miner's hex public key
/// * `cancel` - Token that aborts the search, e.g. when a longer chain arrives
///
/// # Returns
///
/// The committed block, or the reason mining or committing failed
pub async fn mine_pending_transactions_in_background(
    mempool: &Mutex<Mempool>,
    reward_address: &str,
    cancel: CancelToken,
) -> Result<Block, MempoolError> {
    let block = lock(mempool).prepare_block(reward_address)?;
    info!("Started background mining of block {}", block.height);

    match join_mining(spawn_mining(block, cancel)).await {
        Ok(block) => lock(mempool).commit_mined_block(block),
        Err(err) => {
            info!("Background mining stopped: {}", err);
            lock(mempool).remove_pending_coinbase();
            Err(err.into())
        }
    }
}
