use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::block::Block;

/// Errors that can occur while searching for a proof of work
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining cancelled at nonce {nonce}")]
    Cancelled { nonce: u64 },

    #[error("Mining worker failed: {0}")]
    Worker(String),
}

/// Shared flag used to abort a running nonce search
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Mines `block` on tokio's blocking pool
///
/// The block is moved into the worker, so nothing is shared with the caller
/// while the search runs. Cancel through `cancel` to stop it early.
pub fn spawn_mining(mut block: Block, cancel: CancelToken) -> JoinHandle<Result<Block, MiningError>> {
    tokio::task::spawn_blocking(move || {
        block.mine_block_with_cancel(&cancel)?;
        Ok(block)
    })
}

/// Awaits a mining worker, flattening the join error
pub async fn join_mining(
    handle: JoinHandle<Result<Block, MiningError>>,
) -> Result<Block, MiningError> {
    let block = handle
        .await
        .map_err(|e| MiningError::Worker(e.to_string()))??;

    info!(
        "Background mining finished block {} in {} ms",
        block.height, block.mining_duration_ms
    );
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_background_mining_finds_proof() {
        let block = Block::new(Vec::new(), 4, Some("prev".to_string()), 1);

        let mined = join_mining(spawn_mining(block, CancelToken::new())).await.unwrap();

        assert!(mined.has_proof_of_work());
    }

    #[tokio::test]
    async fn test_background_mining_can_be_cancelled() {
        // Unreachable difficulty: only cancellation ends this search
        let block = Block::new(Vec::new(), 200, Some("prev".to_string()), 1);
        let token = CancelToken::new();

        let handle = spawn_mining(block, token.clone());
        token.cancel();

        let result = join_mining(handle).await;
        assert!(matches!(result, Err(MiningError::Cancelled { .. })));
    }
}
