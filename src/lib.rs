//! Minimal proof-of-work blockchain core
//!
//! Signed account-to-account transactions are staged in a [`Mempool`], mined
//! into blocks by a nonce search over SHA-256, and appended to a
//! [`Blockchain`] whose fork-choice rule is "longest valid chain wins".
//! Networking, persistence and any CLI live outside this crate; they are
//! expected to exchange the serde shapes of [`Block`] and [`Transaction`].

pub mod blockchain;
pub mod config;

#[cfg(test)]
mod test_utils;

pub use blockchain::{
    Block, Blockchain, CancelToken, Mempool, MempoolError, Transaction, TransactionError, Wallet,
};
pub use config::ProtocolConfig;
