//! Vote integrity hashing.
//!
//! A vote hash binds the election id, the encrypted ballot and the voter
//! address. It is the dedup key of the local queue and the lookup key on the
//! ledger, so anyone holding the three inputs can recompute it off-ledger.
//!
//! The digest is the ledger's own: Keccak-256 over the Solidity packed
//! encoding of `(string electionId, bytes payload, address voter)`, i.e.
//!
//! ```text
//! keccak256(utf8(election_id) || payload || voter address (20 bytes))
//! ```
//!
//! Packed encoding has no length prefixes. Field boundaries come from the
//! ledger contract, not from the digest.

use crate::error::ValidationError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref ADDRESS_RE: Regex = Regex::new(r"^0[xX][0-9a-fA-F]{40}$").unwrap();
}

/// A 32-byte vote digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoteHash([u8; 32]);

impl VoteHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex with a `0x` prefix, the form used on the wire and as the queue key.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for VoteHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoteHash({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for VoteHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for VoteHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for VoteHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VoteHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 20-byte ledger account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoterAddress([u8; 20]);

impl VoterAddress {
    /// Parses `0x` followed by 40 hex digits, in any case.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if !ADDRESS_RE.is_match(trimmed) {
            return Err(ValidationError::InvalidVoterAddress(s.to_string()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(&trimmed[2..], &mut bytes)
            .map_err(|_| ValidationError::InvalidVoterAddress(s.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for VoterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VoterAddress({})", self)
    }
}

impl fmt::Display for VoterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for VoterAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VoterAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VoterAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Computes the vote hash for an (election, payload, voter) triple.
pub fn vote_hash(election_id: &str, payload: &[u8], voter: &VoterAddress) -> VoteHash {
    let mut hasher = Keccak256::new();
    hasher.update(election_id.as_bytes());
    hasher.update(payload);
    hasher.update(voter.as_bytes());
    VoteHash(hasher.finalize().into())
}
