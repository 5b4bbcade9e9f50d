use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur during cryptographic operations
///
/// These describe malformed key material. A well-formed signature that simply
/// does not match is reported as `Ok(false)` by [`verify_signature`].
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Serializes a value into the canonical form used for content hashing
///
/// # Arguments
///
/// * `value` - A hashed field (number, string, option or transaction list)
///
/// # Returns
///
/// The compact JSON text of `value`
pub fn to_canonical<T: Serialize + ?Sized>(value: &T) -> String {
    // Serialization of these types is infallible
    serde_json::to_string(value).unwrap_or_default()
}

/// Hashes an ordered list of already canonicalized fields
///
/// Fields are joined with a single space and digested with SHA-256. The
/// result is the lowercase hex form of the digest.
pub fn hash_fields<I>(fields: I) -> String
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();

    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            hasher.update(b" ");
        }
        hasher.update(field.as_ref());
    }

    hex::encode(hasher.finalize())
}

/// Returns true if the hex hash has at least `difficulty` leading zero bits
pub fn has_leading_zero_bits(hash_hex: &str, difficulty: u32) -> bool {
    match hex::decode(hash_hex) {
        Ok(bytes) => leading_zero_bits(&bytes) >= difficulty,
        Err(_) => false,
    }
}

fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut zeros = 0;

    for byte in bytes {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }

    zeros
}

/// Parses a hex-encoded 32-byte secret key
pub fn signing_key_from_hex(secret_key_hex: &str) -> Result<SigningKey, CryptoError> {
    let bytes = hex::decode(secret_key_hex)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
    })?;

    Ok(SigningKey::from_bytes(&bytes))
}

/// Parses a hex-encoded 32-byte public key
pub fn verifying_key_from_hex(public_key_hex: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

    let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidPublicKey("Invalid public key length".to_string())
    })?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Hex form of the public half of a signing key
pub fn public_key_hex(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.verifying_key().as_bytes())
}

/// Signs a message and returns the hex-encoded signature
pub fn sign_message(signing_key: &SigningKey, message: &[u8]) -> String {
    hex::encode(signing_key.sign(message).to_bytes())
}

/// Verifies a hex signature against a message and hex public key
///
/// # Arguments
///
/// * `public_key_hex` - The signer's hex public key
/// * `signature_hex` - The hex signature
/// * `message` - The signed bytes
///
/// # Returns
///
/// `Ok(false)` for a mismatch, `Err` for malformed key or signature bytes
pub fn verify_signature(
    public_key_hex: &str,
    signature_hex: &str,
    message: &[u8],
) -> Result<bool, CryptoError> {
    let public_key = verifying_key_from_hex(public_key_hex)?;

    let bytes = hex::decode(signature_hex)
        .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidSignature("Invalid signature length".to_string())
    })?;
    let signature = Signature::from_bytes(&bytes);

    Ok(public_key.verify(message, &signature).is_ok())
}
