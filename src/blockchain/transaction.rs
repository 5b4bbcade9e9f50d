use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::crypto::{
    hash_fields, public_key_hex, sign_message, signing_key_from_hex, to_canonical,
    verify_signature, CryptoError,
};
use crate::config::CoinbaseIssuer;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Unauthorized: private key does not match sender address {0}")]
    Unauthorized(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Distinguishes user transfers from protocol-issued rewards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    #[default]
    Standard,
    Coinbase,
}

/// Represents a transfer of value between two public keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Sender's public key (hex)
    pub from_address: String,

    /// Recipient's public key (hex)
    pub to_address: String,

    pub amount: f64,

    pub memo: String,

    /// Fee paid to the miner that includes this transaction
    pub fee: f64,

    /// Unique identifier for the transaction
    pub uuid: String,

    /// Creation time in milliseconds since epoch
    pub timestamp: i64,

    /// Hex signature over the content hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default)]
    pub kind: TransactionKind,
}

impl Transaction {
    /// Creates a new unsigned transaction
    ///
    /// # Arguments
    ///
    /// * `from_address` - The sender's hex public key
    /// * `to_address` - The recipient's hex public key
    /// * `amount` - The amount to transfer
    /// * `memo` - Free-form note
    /// * `fee` - The fee offered to the miner
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn new(from_address: &str, to_address: &str, amount: f64, memo: &str, fee: f64) -> Self {
        Transaction {
            from_address: from_address.to_string(),
            to_address: to_address.to_string(),
            amount,
            memo: memo.to_string(),
            fee,
            uuid: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            signature: None,
            kind: TransactionKind::Standard,
        }
    }

    /// Creates a coinbase transaction paying `reward_amount` to `reward_address`
    ///
    /// The transaction is signed with the issuer's secret key, not the miner's.
    ///
    /// # Arguments
    ///
    /// * `reward_address` - The miner's hex public key
    /// * `reward_amount` - Subsidy plus collected fees
    /// * `issuer` - The network's coinbase identity
    ///
    /// # Returns
    ///
    /// A signed coinbase Transaction
    pub fn new_coinbase(
        reward_address: &str,
        reward_amount: f64,
        issuer: &CoinbaseIssuer,
    ) -> Result<Self, TransactionError> {
        let mut transaction = Transaction::new(
            &issuer.from_address,
            reward_address,
            reward_amount,
            &issuer.memo,
            0.0,
        );
        transaction.kind = TransactionKind::Coinbase;
        transaction.sign_transaction(&issuer.secret_key)?;

        Ok(transaction)
    }

    /// Hash over the transaction content (signature and kind excluded)
    pub fn calculate_hash(&self) -> String {
        hash_fields([
            to_canonical(&self.from_address),
            to_canonical(&self.to_address),
            to_canonical(&self.amount),
            to_canonical(&self.memo),
            to_canonical(&self.fee),
            to_canonical(&self.uuid),
            to_canonical(&self.timestamp),
        ])
    }

    /// Signs the transaction with the sender's hex secret key
    ///
    /// # Arguments
    ///
    /// * `secret_key` - Hex secret key that must belong to `from_address`
    ///
    /// # Returns
    ///
    /// Result indicating success, `Unauthorized` for a foreign key
    pub fn sign_transaction(&mut self, secret_key: &str) -> Result<(), TransactionError> {
        let signing_key = signing_key_from_hex(secret_key)?;

        if public_key_hex(&signing_key) != self.from_address {
            return Err(TransactionError::Unauthorized(self.from_address.clone()));
        }

        let transaction_hash = self.calculate_hash();
        self.signature = Some(sign_message(&signing_key, transaction_hash.as_bytes()));

        Ok(())
    }

    /// Checks the stored signature against the current content
    ///
    /// Returns `Ok(false)` when unsigned or when the signature does not match,
    /// and an error when the key or signature bytes are malformed.
    pub fn has_valid_signature(&self) -> Result<bool, CryptoError> {
        match &self.signature {
            Some(signature) => verify_signature(
                &self.from_address,
                signature,
                self.calculate_hash().as_bytes(),
            ),
            None => Ok(false),
        }
    }

    pub fn has_required_fields(&self) -> bool {
        !self.from_address.is_empty() && !self.to_address.is_empty() && self.amount > 0.0
    }

    /// Validity rule for the transaction's kind
    ///
    /// # Arguments
    ///
    /// * `issuer` - The identity a coinbase must come from
    ///
    /// # Returns
    ///
    /// `Ok(true)` if valid, `Err` if the key material is malformed
    pub fn is_valid(&self, issuer: &CoinbaseIssuer) -> Result<bool, CryptoError> {
        match self.kind {
            TransactionKind::Standard => Ok(self.has_required_fields()
                && self.has_valid_signature()?
                && self.amount > 0.0
                && self.fee >= 0.0),
            TransactionKind::Coinbase => Ok(self.from_address == issuer.from_address
                && self.memo == issuer.memo
                && self.amount > 0.0
                && self.has_valid_signature()?),
        }
    }

    /// Like [`Transaction::is_valid`] but treats malformed key material as invalid
    pub fn passes_validation(&self, issuer: &CoinbaseIssuer) -> bool {
        match self.is_valid(issuer) {
            Ok(valid) => valid,
            Err(err) => {
                warn!("Transaction {} has malformed key material: {}", self.uuid, err);
                false
            }
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind == TransactionKind::Coinbase
    }

    /// Gets the total amount debited from the sender (amount + fee)
    pub fn total_amount(&self) -> f64 {
        self.amount + self.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wallet;

    #[test]
    fn test_new_transaction() {
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let transaction = Transaction::new(sender.public_key(), recipient.public_key(), 10.5, "rent", 0.1);

        assert_eq!(transaction.from_address, sender.public_key());
        assert_eq!(transaction.to_address, recipient.public_key());
        assert_eq!(transaction.amount, 10.5);
        assert_eq!(transaction.fee, 0.1);
        assert_eq!(transaction.kind, TransactionKind::Standard);
        assert!(!transaction.uuid.is_empty());
        assert!(transaction.signature.is_none());
    }

    #[test]
    fn test_sign_then_verify() {
        let sender = Wallet::new();
        let recipient = Wallet::new();
        let mut transaction = Transaction::new(sender.public_key(), recipient.public_key(), 10.0, "", 0.0);

        transaction.sign_transaction(&sender.private_key()).unwrap();

        assert!(transaction.signature.is_some());
        assert!(transaction.has_valid_signature().unwrap());
        assert!(transaction.is_valid(&CoinbaseIssuer::default()).unwrap());
    }

    #[test]
    fn test_unsigned_transaction_is_invalid() {
        let sender = Wallet::new();
        let transaction = Transaction::new(sender.public_key(), "recipient", 10.0, "", 0.0);

        assert!(!transaction.has_valid_signature().unwrap());
        assert!(!transaction.is_valid(&CoinbaseIssuer::default()).unwrap());
    }

    #[test]
    fn test_tampered_amount_breaks_signature() {
        let sender = Wallet::new();
        let mut transaction = Transaction::new(sender.public_key(), "recipient", 10.0, "", 0.0);
        transaction.sign_transaction(&sender.private_key()).unwrap();

        transaction.amount = 1000.0;

        assert!(!transaction.has_valid_signature().unwrap());
    }

    #[test]
    fn test_cannot_sign_for_someone_else() {
        let sender = Wallet::new();
        let intruder = Wallet::new();
        let mut transaction = Transaction::new(sender.public_key(), "recipient", 10.0, "", 0.0);

        let result = transaction.sign_transaction(&intruder.private_key());

        assert!(matches!(result, Err(TransactionError::Unauthorized(_))));
        assert!(transaction.signature.is_none());
    }

    #[test]
    fn test_malformed_sender_is_an_error_not_false() {
        let signer = Wallet::new();
        let mut transaction = Transaction::new(signer.public_key(), "recipient", 10.0, "", 0.0);
        transaction.sign_transaction(&signer.private_key()).unwrap();
        transaction.from_address = "not-a-key".to_string();

        assert!(transaction.has_valid_signature().is_err());
        assert!(!transaction.passes_validation(&CoinbaseIssuer::default()));
    }

    #[test]
    fn test_amount_and_fee_rules() {
        let sender = Wallet::new();
        let issuer = CoinbaseIssuer::default();

        let mut zero = Transaction::new(sender.public_key(), "recipient", 0.0, "", 0.0);
        zero.sign_transaction(&sender.private_key()).unwrap();
        assert!(!zero.has_required_fields());
        assert!(!zero.is_valid(&issuer).unwrap());

        let mut negative_fee = Transaction::new(sender.public_key(), "recipient", 5.0, "", -1.0);
        negative_fee.sign_transaction(&sender.private_key()).unwrap();
        assert!(!negative_fee.is_valid(&issuer).unwrap());
    }

    #[test]
    fn test_coinbase_transaction() {
        let miner = Wallet::new();
        let issuer = CoinbaseIssuer::default();

        let transaction = Transaction::new_coinbase(miner.public_key(), 50.0, &issuer).unwrap();

        assert!(transaction.is_coinbase());
        assert_eq!(transaction.from_address, issuer.from_address);
        assert_eq!(transaction.memo, issuer.memo);
        assert_eq!(transaction.to_address, miner.public_key());
        assert_eq!(transaction.fee, 0.0);
        assert!(transaction.is_valid(&issuer).unwrap());
    }

    #[test]
    fn test_coinbase_with_wrong_memo_is_invalid() {
        let issuer = CoinbaseIssuer::default();
        let mut transaction = Transaction::new_coinbase("miner", 50.0, &issuer).unwrap();

        transaction.memo = "free money".to_string();
        transaction.sign_transaction(&issuer.secret_key).unwrap();

        assert!(transaction.has_valid_signature().unwrap());
        assert!(!transaction.is_valid(&issuer).unwrap());
    }

    #[test]
    fn test_serialized_shape() {
        let sender = Wallet::new();
        let transaction = Transaction::new(sender.public_key(), "recipient", 1.0, "hi", 0.5);

        let json = serde_json::to_value(&transaction).unwrap();

        for field in ["fromAddress", "toAddress", "amount", "memo", "fee", "uuid", "timestamp"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(json.get("signature").is_none());

        let restored: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(restored, transaction);
    }
}
