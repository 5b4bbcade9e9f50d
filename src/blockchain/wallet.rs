use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use super::block::Block;
use super::crypto::{public_key_hex, signing_key_from_hex, CryptoError};
use super::transaction::{Transaction, TransactionError};

/// Represents a wallet with a keypair
///
/// A wallet holds no ledger state; balances are always derived from a chain
/// and a pending pool handed in by the caller.
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    public_key: String,
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = public_key_hex(&signing_key);

        Wallet {
            signing_key,
            public_key,
        }
    }

    /// Restores a wallet from a hex secret key
    ///
    /// # Arguments
    ///
    /// * `secret_key` - 32-byte secret key in hex
    ///
    /// # Returns
    ///
    /// The wallet, or a `CryptoError` if the key is malformed
    pub fn from_secret_key(secret_key: &str) -> Result<Self, CryptoError> {
        let signing_key = signing_key_from_hex(secret_key)?;
        let public_key = public_key_hex(&signing_key);

        Ok(Wallet {
            signing_key,
            public_key,
        })
    }

    /// Hex public key, also used as the wallet's address
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Hex secret key
    pub fn private_key(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Builds and signs a transfer from this wallet
    ///
    /// # Arguments
    ///
    /// * `to_address` - The recipient's hex public key
    /// * `amount` - The amount to transfer
    /// * `memo` - Free-form note
    /// * `fee` - The fee offered to the miner
    ///
    /// # Returns
    ///
    /// A signed Transaction
    pub fn create_transaction(
        &self,
        to_address: &str,
        amount: f64,
        memo: &str,
        fee: f64,
    ) -> Result<Transaction, TransactionError> {
        let mut transaction = Transaction::new(&self.public_key, to_address, amount, memo, fee);
        transaction.sign_transaction(&self.private_key())?;
        Ok(transaction)
    }

    /// Confirmed transactions sent or received by `public_key`, in chain order
    pub fn get_all_transactions_for_wallet<'a>(
        public_key: &str,
        chain: &'a [Block],
    ) -> Vec<&'a Transaction> {
        chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| tx.from_address == public_key || tx.to_address == public_key)
            .collect()
    }

    /// Confirmed balance, or `None` if the wallet never appears on the chain
    pub fn get_balance_of_address(public_key: &str, chain: &[Block]) -> Option<f64> {
        let transactions = Self::get_all_transactions_for_wallet(public_key, chain);
        if transactions.is_empty() {
            return None;
        }

        let balance = transactions.iter().fold(0.0, |mut balance, tx| {
            if tx.from_address == public_key {
                balance -= tx.total_amount();
            }
            if tx.to_address == public_key {
                balance += tx.amount;
            }
            balance
        });

        Some(balance)
    }

    /// Amount plus fee of every pending transaction sent by `public_key`
    pub fn get_total_pending_owed_by_wallet(public_key: &str, pending: &[Transaction]) -> f64 {
        pending
            .iter()
            .filter(|tx| tx.from_address == public_key)
            .map(Transaction::total_amount)
            .sum()
    }

    /// Confirmed balance minus pending debts, with no activity counting as zero
    pub fn get_available_balance(public_key: &str, chain: &[Block], pending: &[Transaction]) -> f64 {
        Self::get_balance_of_address(public_key, chain).unwrap_or(0.0)
            - Self::get_total_pending_owed_by_wallet(public_key, pending)
    }

    /// Double-spend guard: can `public_key` cover `transaction` on top of what it already owes
    ///
    /// # Arguments
    ///
    /// * `public_key` - The sender
    /// * `transaction` - The transfer being admitted
    /// * `chain` - Confirmed blocks
    /// * `pending` - Transactions already admitted but not mined
    ///
    /// # Returns
    ///
    /// `true` if confirmed balance minus pending debts covers amount plus fee
    pub fn wallet_has_sufficient_funds(
        public_key: &str,
        transaction: &Transaction,
        chain: &[Block],
        pending: &[Transaction],
    ) -> bool {
        Self::get_available_balance(public_key, chain, pending) >= transaction.total_amount()
    }
}
