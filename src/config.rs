//! Protocol constants
//!
//! Every consensus constant lives in [`ProtocolConfig`]. The `Default` value is
//! the production network; tests and alternative networks override it through
//! JSON, environment variables or the `with_*` setters.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockchain::crypto::{public_key_hex, signing_key_from_hex, CryptoError};

/// Target time between blocks in milliseconds
pub const TARGET_MINE_RATE_MS: i64 = 60_000;

/// Difficulty of the genesis block
pub const INITIAL_DIFFICULTY: u32 = 10;

/// Highest reachable difficulty: every bit of a SHA-256 hash is zero
pub const MAX_DIFFICULTY: u32 = 256;

/// Block subsidy before any halving
pub const BLOCK_SUBSIDY: f64 = 50.0;

/// Number of blocks between two subsidy halvings
pub const NUM_OF_BLOCKS_TO_HALF_MINING_REWARD: u64 = 210_000;

/// Timestamp of the genesis block (ms since epoch)
pub const GENESIS_TIMESTAMP_MS: i64 = 1_700_000_000_000;

/// Memo carried by every coinbase transaction
pub const COINBASE_MEMO: &str = "Block reward";

// Issuance authority key. Publicly known: anyone can sign a coinbase with it.
const COINBASE_SECRET_KEY: [u8; 32] = [
    0x9d, 0x61, 0xb1, 0x9d, 0xef, 0xfd, 0x5a, 0x60, 0xba, 0x84, 0x4a, 0xf4, 0x92, 0xec, 0x2c, 0xc4,
    0x44, 0x49, 0xc5, 0x69, 0x7b, 0x32, 0x69, 0x19, 0x70, 0x3b, 0xac, 0x03, 0x1c, 0xae, 0x7f, 0x60,
];

const ENV_TARGET_MINE_RATE_MS: &str = "MINICHAIN_TARGET_MINE_RATE_MS";
const ENV_INITIAL_DIFFICULTY: &str = "MINICHAIN_INITIAL_DIFFICULTY";
const ENV_BLOCK_SUBSIDY: &str = "MINICHAIN_BLOCK_SUBSIDY";
const ENV_BLOCKS_PER_HALVING: &str = "MINICHAIN_BLOCKS_PER_HALVING";

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid coinbase issuer key: {0}")]
    IssuerKey(#[from] CryptoError),
}

/// Fixed content of the genesis block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisData {
    pub timestamp: i64,
    pub difficulty: u32,
    pub nonce: u64,
    pub mining_duration_ms: i64,
}

impl Default for GenesisData {
    fn default() -> Self {
        GenesisData {
            timestamp: GENESIS_TIMESTAMP_MS,
            difficulty: INITIAL_DIFFICULTY,
            nonce: 0,
            mining_duration_ms: 0,
        }
    }
}

/// Identity used to issue and sign coinbase transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinbaseIssuer {
    pub from_address: String,
    pub secret_key: String,
    pub memo: String,
}

impl CoinbaseIssuer {
    /// Builds an issuer whose address is derived from `secret_key`
    pub fn from_secret_key(secret_key: &str, memo: &str) -> Result<Self, CryptoError> {
        let signing_key = signing_key_from_hex(secret_key)?;

        Ok(CoinbaseIssuer {
            from_address: public_key_hex(&signing_key),
            secret_key: secret_key.to_string(),
            memo: memo.to_string(),
        })
    }
}

impl Default for CoinbaseIssuer {
    fn default() -> Self {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&COINBASE_SECRET_KEY);

        CoinbaseIssuer {
            from_address: public_key_hex(&signing_key),
            secret_key: hex::encode(COINBASE_SECRET_KEY),
            memo: COINBASE_MEMO.to_string(),
        }
    }
}

/// All consensus constants of a network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolConfig {
    pub target_mine_rate_ms: i64,
    pub initial_difficulty: u32,
    pub block_subsidy: f64,
    pub blocks_per_halving: u64,
    pub genesis: GenesisData,
    pub coinbase: CoinbaseIssuer,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            target_mine_rate_ms: TARGET_MINE_RATE_MS,
            initial_difficulty: INITIAL_DIFFICULTY,
            block_subsidy: BLOCK_SUBSIDY,
            blocks_per_halving: NUM_OF_BLOCKS_TO_HALF_MINING_REWARD,
            genesis: GenesisData::default(),
            coinbase: CoinbaseIssuer::default(),
        }
    }
}

impl ProtocolConfig {
    /// Parses a JSON configuration document; missing fields keep their defaults
    ///
    /// # Arguments
    ///
    /// * `document` - camelCase JSON, possibly partial
    ///
    /// # Returns
    ///
    /// The config, or a `ConfigError` for bad JSON or a mismatched issuer
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: ProtocolConfig = serde_json::from_str(document)?;

        // The address must belong to the secret key, or coinbase signing fails later
        let issuer = CoinbaseIssuer::from_secret_key(&config.coinbase.secret_key, &config.coinbase.memo)?;
        if issuer.from_address != config.coinbase.from_address {
            return Err(ConfigError::InvalidValue {
                key: "coinbase.fromAddress".to_string(),
                value: config.coinbase.from_address,
            });
        }

        Ok(config)
    }

    /// Defaults overridden by `MINICHAIN_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ProtocolConfig::default();

        if let Some(value) = env_value(ENV_TARGET_MINE_RATE_MS)? {
            config.target_mine_rate_ms = value;
        }
        if let Some(value) = env_value(ENV_INITIAL_DIFFICULTY)? {
            config = config.with_initial_difficulty(value);
        }
        if let Some(value) = env_value(ENV_BLOCK_SUBSIDY)? {
            config.block_subsidy = value;
        }
        if let Some(value) = env_value(ENV_BLOCKS_PER_HALVING)? {
            config.blocks_per_halving = value;
        }

        Ok(config)
    }

    pub fn with_target_mine_rate_ms(mut self, target_mine_rate_ms: i64) -> Self {
        self.target_mine_rate_ms = target_mine_rate_ms;
        self
    }

    /// Sets the initial difficulty, which is also the genesis difficulty
    pub fn with_initial_difficulty(mut self, difficulty: u32) -> Self {
        self.initial_difficulty = difficulty;
        self.genesis.difficulty = difficulty;
        self
    }

    pub fn with_block_subsidy(mut self, block_subsidy: f64) -> Self {
        self.block_subsidy = block_subsidy;
        self
    }

    pub fn with_blocks_per_halving(mut self, blocks_per_halving: u64) -> Self {
        self.blocks_per_halving = blocks_per_halving;
        self
    }
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
