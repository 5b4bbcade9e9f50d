use std::sync::{Arc, RwLock};

use crate::blockchain::{Block, Blockchain, Mempool, Transaction, Wallet};
use crate::config::ProtocolConfig;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Cheap network: difficulty starts at 1 and every fast block raises it by one
pub fn test_config() -> ProtocolConfig {
    ProtocolConfig::default()
        .with_initial_difficulty(1)
        .with_block_subsidy(100.0)
        .with_blocks_per_halving(10)
}

pub fn new_mempool(config: ProtocolConfig) -> Mempool {
    Mempool::new(Arc::new(RwLock::new(Blockchain::with_config(config))))
}

/// Mempool whose chain holds one mined block paying `wallet` the full subsidy (100)
pub fn funded_mempool(wallet: &Wallet) -> Mempool {
    let mut mempool = new_mempool(test_config());
    mempool
        .mine_pending_transactions(wallet.public_key())
        .expect("funding block should mine");
    mempool
}

/// Mines a coinbase-only block on top of `blockchain` without appending it
pub fn mine_next_block(blockchain: &Blockchain, reward_address: &str) -> Block {
    let config = blockchain.config();
    let tip = blockchain.get_latest_block();
    let coinbase = Transaction::new_coinbase(reward_address, config.block_subsidy, &config.coinbase)
        .expect("test issuer key is valid");

    // Test blocks always mine faster than the target rate
    let mut block = Block::new(
        vec![coinbase],
        tip.difficulty + 1,
        Some(tip.hash.clone()),
        blockchain.len() as u64,
    );
    block.mine_block();
    block
}
