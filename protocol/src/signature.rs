use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use k256::schnorr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::payload::VotePayload;
use crate::CandidateId;

/// Auxiliary randomness fed to BIP-340 signing. Fixed, so that signing the
/// same payload with the same key always yields the same signature.
const AUX_RAND: [u8; 32] = [0; 32];

/// A 64-byte BIP-340 Schnorr signature over a payload digest.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature(schnorr::Signature);

impl Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        schnorr::Signature::try_from(bytes)
            .map(Self)
            .map_err(|_| Error::MalformedSignature("not a valid Schnorr signature".to_string()))
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.to_bytes())
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = HEXLOWER_PERMISSIVE
            .decode(digits.as_bytes())
            .map_err(|e| Error::MalformedSignature(e.to_string()))?;
        if bytes.len() != 64 {
            return Err(Error::MalformedSignature(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        Self::from_bytes(&bytes)
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Signature {}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for Signature {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<Signature> for String {
    fn from(signature: Signature) -> Self {
        signature.to_hex()
    }
}

/// Sign a vote: build the canonical payload `(voter_id, candidate_id,
/// timestamp)`, hash it, and sign the hash.
///
/// The key is only borrowed for the duration of the call.
pub fn sign_vote(
    voter_id: &str,
    candidate_id: CandidateId,
    private_key: &PrivateKey,
    timestamp: i64,
) -> Result<Signature> {
    sign_payload(&VotePayload::new(voter_id, candidate_id, timestamp), private_key)
}

/// Sign the digest of an already-built payload.
pub fn sign_payload(payload: &VotePayload, private_key: &PrivateKey) -> Result<Signature> {
    let digest = payload.digest();
    private_key
        .signing_key()
        .sign_raw(digest.as_ref(), &AUX_RAND)
        .map(Signature)
        .map_err(|_| Error::Signing)
}

/// Check that `signature` was produced over `payload` by the holder of the
/// private key matching `public_key`.
pub fn verify_payload(
    payload: &VotePayload,
    public_key: &PublicKey,
    signature: &Signature,
) -> Result<()> {
    let digest = payload.digest();
    public_key
        .verifying_key()
        .verify_raw(digest.as_ref(), &signature.0)
        .map_err(|_| Error::InvalidSignature)
}
