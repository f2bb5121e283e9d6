//! Keccak-256 hashing utilities and the child chain's digest types.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// A named alias for a 32-byte(u8) array, used to represent a 256-bit hash.
pub type H256 = [u8; 32];

/// Hash arbitrary data using Keccak-256.
pub fn keccak256(data: &[u8]) -> H256 {
    keccak256_concat(&[data])
}

/// Hash multiple pieces of data by concatenating them.
pub fn keccak256_concat(parts: &[&[u8]]) -> H256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Error returned when parsing a hex-encoded digest.
pub type FromHexError = hex::FromHexError;

fn h256_from_hex(s: &str) -> Result<H256, FromHexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

macro_rules! digest_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub H256);

        impl $name {
            /// The zero digest (all zeros).
            pub const ZERO: Self = Self([0u8; 32]);

            /// Create from raw bytes.
            pub fn from_bytes(bytes: H256) -> Self {
                Self(bytes)
            }

            /// Get the underlying bytes.
            pub fn as_bytes(&self) -> &H256 {
                &self.0
            }

            /// Convert to a hex string (no prefix).
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from a hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, FromHexError> {
                h256_from_hex(s).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), &self.to_hex()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", self.to_hex())
            }
        }

        impl From<H256> for $name {
            fn from(bytes: H256) -> Self {
                Self(bytes)
            }
        }

        impl From<$name> for H256 {
            fn from(hash: $name) -> Self {
                hash.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

digest_type!(
    /// Hash of a transaction's canonical encoding.
    TransactionHash
);

digest_type!(
    /// Hash of a block header.
    BlockHash
);

digest_type!(
    /// Root of the Merkle tree built over a block's transaction hashes.
    MerkleRoot
);

impl TransactionHash {
    /// Sentinel referenced by inputs that do not spend a prior output.
    pub const GENERATION: Self = Self([0u8; 32]);

    /// Hash an encoded transaction.
    pub fn digest(encoded: &[u8]) -> Self {
        Self(keccak256(encoded))
    }

    pub fn is_generation(&self) -> bool {
        *self == Self::GENERATION
    }
}

impl BlockHash {
    /// Hash a block header made of the previous block hash and the merkle root.
    pub fn of_header(previous: &BlockHash, merkle_root: &MerkleRoot) -> Self {
        Self(keccak256_concat(&[previous.as_ref(), merkle_root.as_ref()]))
    }
}
