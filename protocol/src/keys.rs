use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use k256::schnorr::{SigningKey, VerifyingKey};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Width in bytes of a serialized secp256k1 scalar or x-only point.
pub const KEY_BYTES: usize = 32;

/// A voter's signing key. Exists only at issuance and in the voter's hands.
///
/// `Debug` is redacted and there is no `Display`; use [`PrivateKey::to_hex`]
/// deliberately when disclosing it.
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    /// Parse a hex-encoded scalar. An optional `0x` prefix is accepted and
    /// short inputs are left-padded with zeros.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_padded_hex(hex).map_err(Error::InvalidKey)?;
        SigningKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| Error::InvalidKey("not a valid secp256k1 scalar"))
    }

    /// Lowercase, zero-padded 64-character hex encoding.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().clone())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.0
    }
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A voter's x-only (BIP-340) public key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parse a public key after normalizing it with [`normalize_public_key_hex`].
    pub fn from_hex(hex: &str) -> Result<Self> {
        let normalized = normalize_public_key_hex(hex)?;
        let bytes = HEXLOWER
            .decode(normalized.as_bytes())
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| Error::InvalidPublicKey("not a point on secp256k1".to_string()))
    }

    /// The ledger's fixed-width representation.
    pub fn to_bytes(&self) -> [u8; KEY_BYTES] {
        let mut bytes = [0u8; KEY_BYTES];
        bytes.copy_from_slice(&self.0.to_bytes());
        bytes
    }

    /// Lowercase, zero-padded 64-character hex encoding.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.to_bytes())
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state)
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_hex()
    }
}

/// Normalize a hex public key to the ledger's fixed-width form: optional
/// `0x` prefix removed, left-padded with zeros to 64 characters, lowercase.
///
/// Odd-length, empty, over-long or non-hex input is rejected rather than
/// guessed at.
pub fn normalize_public_key_hex(hex: &str) -> Result<String> {
    decode_padded_hex(hex)
        .map(|bytes| HEXLOWER.encode(&bytes))
        .map_err(|reason| Error::InvalidPublicKey(reason.to_string()))
}

/// Generate a fresh keypair from the operating system's CSPRNG.
pub fn generate_keypair() -> Result<(PrivateKey, PublicKey)> {
    generate_keypair_with(&mut OsRng)
}

/// Generate a fresh keypair from the given cryptographic RNG.
///
/// Entropy failures propagate; candidate scalars outside the curve order are
/// redrawn.
pub fn generate_keypair_with(
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<(PrivateKey, PublicKey)> {
    let mut bytes = [0u8; KEY_BYTES];
    loop {
        rng.try_fill_bytes(&mut bytes)?;
        if let Ok(signing_key) = SigningKey::from_bytes(&bytes) {
            let private_key = PrivateKey(signing_key);
            let public_key = private_key.public_key();
            return Ok((private_key, public_key));
        }
    }
}

/// Decode up to 32 bytes of hex, left-padding to exactly 32.
fn decode_padded_hex(hex: &str) -> std::result::Result<[u8; KEY_BYTES], &'static str> {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    if digits.is_empty() {
        return Err("empty key");
    }
    if digits.len() % 2 != 0 {
        return Err("odd number of hex digits");
    }
    if digits.len() > KEY_BYTES * 2 {
        return Err("longer than 32 bytes");
    }
    let decoded = HEXLOWER_PERMISSIVE
        .decode(digits.as_bytes())
        .map_err(|_| "not hexadecimal")?;
    let mut bytes = [0u8; KEY_BYTES];
    bytes[KEY_BYTES - decoded.len()..].copy_from_slice(&decoded);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_round_trips_through_hex() {
        let (private_key, public_key) = generate_keypair().unwrap();
        let restored = PrivateKey::from_hex(&private_key.to_hex()).unwrap();
        assert_eq!(restored.public_key(), public_key);
        assert_eq!(PublicKey::from_hex(&public_key.to_hex()).unwrap(), public_key);
        assert_eq!(public_key.to_hex().len(), 64);
    }

    #[test]
    fn private_key_debug_is_redacted() {
        let (private_key, _) = generate_keypair().unwrap();
        let debug = format!("{private_key:?}");
        assert!(!debug.contains(&private_key.to_hex()));
    }

    #[test]
    fn malformed_private_keys_are_rejected() {
        let too_long = "11".repeat(33);
        let zero = "00".repeat(32);
        for bad in ["", "0x", "abc", "zz", too_long.as_str(), zero.as_str()] {
            assert!(
                matches!(PrivateKey::from_hex(bad), Err(Error::InvalidKey(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn public_keys_are_normalized() {
        let (_, public_key) = generate_keypair().unwrap();
        let upper = format!("0x{}", public_key.to_hex().to_uppercase());
        assert_eq!(normalize_public_key_hex(&upper).unwrap(), public_key.to_hex());
        assert_eq!(PublicKey::from_hex(&upper).unwrap(), public_key);

        assert_eq!(
            normalize_public_key_hex("0x0abc").unwrap(),
            format!("{}0abc", "0".repeat(60))
        );
    }

    #[test]
    fn leading_zero_keys_survive_stripping() {
        // Find a key whose x coordinate starts with a zero byte.
        let public_key = loop {
            let (_, public_key) = generate_keypair().unwrap();
            if public_key.to_bytes()[0] == 0 {
                break public_key;
            }
        };
        let stripped = &public_key.to_hex()[2..];
        assert_eq!(PublicKey::from_hex(stripped).unwrap(), public_key);
    }

    #[test]
    fn malformed_public_keys_are_rejected() {
        let too_long = "ab".repeat(33);
        for bad in ["", "abc", "0x123", "gg", too_long.as_str()] {
            assert!(
                matches!(normalize_public_key_hex(bad), Err(Error::InvalidPublicKey(_))),
                "accepted {bad:?}"
            );
        }
        // Well-formed hex, but no curve point has this x coordinate.
        assert!(matches!(
            PublicKey::from_hex(&"ff".repeat(32)),
            Err(Error::InvalidPublicKey(_))
        ));
    }
}
