use std::fmt::{Display, Formatter};
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Symbols a generated code is drawn from.
pub const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random bytes at or above this bound are discarded, so that `byte % 36`
/// is uniform over the alphabet.
const REJECTION_BOUND: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Generate a uniformly random alphanumeric code of the given length,
/// using the operating system's CSPRNG.
///
/// A failing entropy source is reported as [`crate::Error::Entropy`]; there
/// is no fallback to a weaker generator.
pub fn generate_code(length: usize) -> Result<String> {
    generate_code_with(&mut OsRng, length)
}

/// Generate a code using the given cryptographic RNG.
pub fn generate_code_with(rng: &mut (impl RngCore + CryptoRng), length: usize) -> Result<String> {
    let mut code = String::with_capacity(length);
    let mut buffer = [0u8; 32];
    while code.len() < length {
        rng.try_fill_bytes(&mut buffer)?;
        for byte in buffer {
            if code.len() == length {
                break;
            }
            if byte < REJECTION_BOUND {
                code.push(ALPHABET[usize::from(byte) % ALPHABET.len()] as char);
            }
        }
    }
    Ok(code)
}

/// The SHA-256 digest of an access code. This is all that is ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessCodeHash([u8; 32]);

impl AccessCodeHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Hash a presented access code.
///
/// Surrounding whitespace is ignored and letters are upper-cased first, so
/// `" xj3k9p"` and `"XJ3K9P"` hash identically. Issuance and lookup both go
/// through this function.
pub fn hash_access_code(code: &str) -> AccessCodeHash {
    let normalized = code.trim().to_ascii_uppercase();
    AccessCodeHash(Sha256::digest(normalized.as_bytes()).into())
}

impl Display for AccessCodeHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&HEXLOWER.encode(&self.0))
    }
}

impl FromStr for AccessCodeHash {
    type Err = data_encoding::DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = HEXLOWER_PERMISSIVE.decode(s.as_bytes())?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| data_encoding::DecodeError {
            position: 0,
            kind: data_encoding::DecodeKind::Length,
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for AccessCodeHash {
    type Error = data_encoding::DecodeError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AccessCodeHash> for String {
    fn from(hash: AccessCodeHash) -> Self {
        hash.to_string()
    }
}
