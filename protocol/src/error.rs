use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the protocol primitives.
///
/// None of these ever carry key material.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid private key: {0}")]
    InvalidKey(&'static str),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
    #[error("Signature does not match the vote payload")]
    InvalidSignature,
    #[error("Failed to produce a signature")]
    Signing,
    #[error("Entropy source failed: {0}")]
    Entropy(#[from] rand::Error),
}
