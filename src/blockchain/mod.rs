// Blockchain module
//
// This module contains the core blockchain implementation including:
// - Hashing and signature utilities
// - Transaction and coinbase structure
// - Block structure and proof of work
// - Chain validation and replacement
// - Mempool admission and mining orchestration
// - Wallet balances

pub mod block;
pub mod chain;
pub mod crypto;
pub mod mempool;
pub mod miner;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use block::{Block, BlockKind};
pub use chain::{Blockchain, BlockchainError};
pub use crypto::CryptoError;
pub use mempool::{mine_pending_transactions_in_background, Mempool, MempoolError};
pub use miner::{CancelToken, MiningError};
pub use transaction::{Transaction, TransactionError, TransactionKind};
pub use wallet::Wallet;
