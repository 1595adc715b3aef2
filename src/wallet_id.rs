//! Deterministic wallet identifiers.
//!
//! A [`WalletId`] is a 160-bit value derived once from the wallet's seed
//! bytes (or, for watching-only wallets, from the watching key fingerprint)
//! and formatted as five lowercase hex groups of eight digits, e.g.
//! `11111111-22222222-33333333-44444444-55555555`. The formatted string is
//! the storage-directory suffix and the binding key between a stored
//! credential record and the wallet that decrypts it.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::WalletIdError;

/// Identifier length in bytes (five groups of four).
pub const WALLET_ID_LENGTH: usize = 20;

/// Separator between formatted identifier groups.
pub const WALLET_ID_SEPARATOR: char = '-';

const GROUP_LENGTH: usize = 4;
const GROUP_COUNT: usize = WALLET_ID_LENGTH / GROUP_LENGTH;

/// Fixed salt mixed into identifier derivation for Trezor-style soft
/// wallets, so they never collide with a plain soft wallet built from the
/// same seed. There is no particular significance to the value.
pub const TREZOR_SOFT_WALLET_ID_SALT: [u8; 1] = [0x02];

/// An opaque, fixed-width wallet identifier.
///
/// Immutable after creation. Identical inputs always yield the identical
/// identifier across calls and across process restarts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletId([u8; WALLET_ID_LENGTH]);

impl WalletId {
    /// Derive an identifier from wallet seed bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, WalletIdError> {
        if seed.is_empty() {
            return Err(WalletIdError::EmptyInput);
        }
        Ok(Self::digest(&[seed]))
    }

    /// Derive an identifier from seed bytes combined with a fixed salt.
    ///
    /// Used for the Trezor-style soft wallet variant, see
    /// [`TREZOR_SOFT_WALLET_ID_SALT`].
    pub fn from_seed_with_salt(seed: &[u8], salt: &[u8]) -> Result<Self, WalletIdError> {
        if seed.is_empty() {
            return Err(WalletIdError::EmptyInput);
        }
        Ok(Self::digest(&[salt, seed]))
    }

    /// Derive an identifier from a watching-key fingerprint.
    ///
    /// Supports watching-key-only wallets, which have no seed to derive
    /// from. Uses the same digest as the seed path.
    pub fn from_fingerprint(fingerprint: &[u8]) -> Result<Self, WalletIdError> {
        if fingerprint.is_empty() {
            return Err(WalletIdError::EmptyInput);
        }
        Ok(Self::digest(&[fingerprint]))
    }

    fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; WALLET_ID_LENGTH];
        bytes.copy_from_slice(&digest[..WALLET_ID_LENGTH]);
        Self(bytes)
    }

    /// Create an identifier from raw bytes.
    pub fn from_bytes(bytes: [u8; WALLET_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the identifier as a byte slice.
    pub fn as_bytes(&self) -> &[u8; WALLET_ID_LENGTH] {
        &self.0
    }

    /// Format as five lowercase hex groups joined by the separator.
    pub fn to_formatted_string(&self) -> String {
        let mut s = String::with_capacity(WALLET_ID_LENGTH * 2 + GROUP_COUNT - 1);
        for (i, group) in self.0.chunks(GROUP_LENGTH).enumerate() {
            if i > 0 {
                s.push(WALLET_ID_SEPARATOR);
            }
            s.push_str(&hex::encode(group));
        }
        s
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_formatted_string())
    }
}

impl fmt::Debug for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletId({self})")
    }
}

impl FromStr for WalletId {
    type Err = WalletIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let groups: Vec<&str> = s.split(WALLET_ID_SEPARATOR).collect();
        if groups.len() != GROUP_COUNT {
            return Err(WalletIdError::Malformed(format!(
                "expected {} groups, got {}",
                GROUP_COUNT,
                groups.len()
            )));
        }
        let mut bytes = [0u8; WALLET_ID_LENGTH];
        for (i, group) in groups.iter().enumerate() {
            if group.len() != GROUP_LENGTH * 2 {
                return Err(WalletIdError::Malformed(format!(
                    "group {} has length {}, expected {}",
                    i,
                    group.len(),
                    GROUP_LENGTH * 2
                )));
            }
            let decoded = hex::decode(group)
                .map_err(|e| WalletIdError::Malformed(format!("group {i}: {e}")))?;
            bytes[i * GROUP_LENGTH..(i + 1) * GROUP_LENGTH].copy_from_slice(&decoded);
        }
        Ok(Self(bytes))
    }
}

impl Serialize for WalletId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_formatted_string())
    }
}

impl<'de> Deserialize<'de> for WalletId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let seed = [0x42u8; 32];
        let a = WalletId::from_seed(&seed).unwrap();
        let b = WalletId::from_seed(&seed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = WalletId::from_seed(&[1u8; 32]).unwrap();
        let b = WalletId::from_seed(&[2u8; 32]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_salt_changes_identifier() {
        let seed = [7u8; 64];
        let plain = WalletId::from_seed(&seed).unwrap();
        let salted = WalletId::from_seed_with_salt(&seed, &TREZOR_SOFT_WALLET_ID_SALT).unwrap();
        assert_ne!(plain, salted);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(WalletId::from_seed(&[]), Err(WalletIdError::EmptyInput));
        assert_eq!(WalletId::from_fingerprint(&[]), Err(WalletIdError::EmptyInput));
    }

    #[test]
    fn test_formatted_string_shape() {
        let id = WalletId::from_seed(b"some seed bytes").unwrap();
        let formatted = id.to_formatted_string();
        let groups: Vec<&str> = formatted.split('-').collect();
        assert_eq!(groups.len(), 5);
        for group in groups {
            assert_eq!(group.len(), 8);
            assert!(group.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(group.to_lowercase(), group);
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let id = WalletId::from_seed(&[0xabu8; 16]).unwrap();
        let parsed: WalletId = id.to_formatted_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_wrong_group_count() {
        assert!("11111111-22222222-33333333-44444444".parse::<WalletId>().is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(
            "1111111g-22222222-33333333-44444444-55555555".parse::<WalletId>().is_err()
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let id = WalletId::from_seed(&[9u8; 8]).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: WalletId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
