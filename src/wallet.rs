//! Wallet record, keychain data model and wallet type classification.
//!
//! The engine never performs elliptic-curve math itself; the keychain here
//! is the structural view handed back by the external
//! [`KeychainFactory`](crate::services::KeychainFactory) collaborator, and
//! the [`Wallet`] struct carries only the fields the lifecycle and sync
//! logic read.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The wallet format version this build writes and understands.
pub const WALLET_VERSION: u32 = 1;

/// A single step in a key derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildNumber {
    pub index: u32,
    pub hardened: bool,
}

impl ChildNumber {
    /// A hardened derivation step.
    pub const fn hardened(index: u32) -> Self {
        Self {
            index,
            hardened: true,
        }
    }

    /// A normal (non-hardened) derivation step.
    pub const fn normal(index: u32) -> Self {
        Self {
            index,
            hardened: false,
        }
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// A key derivation path, e.g. `m/44'/0'/0'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DerivationPath(pub Vec<ChildNumber>);

impl DerivationPath {
    /// The first derivation step, if any.
    pub fn first(&self) -> Option<&ChildNumber> {
        self.0.first()
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for child in &self.0 {
            write!(f, "/{child}")?;
        }
        Ok(())
    }
}

impl From<Vec<ChildNumber>> for DerivationPath {
    fn from(path: Vec<ChildNumber>) -> Self {
        Self(path)
    }
}

/// A derived leaf key as reported by the keychain collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafKey {
    /// Full derivation path of this key.
    pub path: DerivationPath,
    /// Whether private key material is present (watching-only keychains
    /// carry public material only).
    pub has_private_key: bool,
    /// Creation time of this key, when known.
    pub creation_time: Option<DateTime<Utc>>,
}

/// The structural view of a wallet's derived keys.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Keychain {
    pub leaf_keys: Vec<LeafKey>,
}

impl Keychain {
    /// The first leaf key, used for wallet type inference.
    pub fn first_leaf_key(&self) -> Option<&LeafKey> {
        self.leaf_keys.first()
    }
}

/// Wallet variants.
///
/// Stored in the summary in the clear so that wallets can be listed and
/// filtered without decrypting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalletType {
    /// Original soft wallet built from seed bytes (not BIP32 compliant).
    SoftWalletLegacy,
    /// BIP32 compliant soft wallet built from entropy.
    SoftWalletBip32,
    /// Trezor-style hardware wallet (watching keys only).
    TrezorHardWallet,
    /// Trezor-style soft wallet (BIP44 paths with private material).
    TrezorSoftWallet,
    #[default]
    Unknown,
}

impl WalletType {
    /// Whether this variant holds spendable private material locally.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            WalletType::SoftWalletLegacy | WalletType::SoftWalletBip32 | WalletType::TrezorSoftWallet
        )
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WalletType::SoftWalletLegacy => "soft-wallet-legacy",
            WalletType::SoftWalletBip32 => "soft-wallet-bip32",
            WalletType::TrezorHardWallet => "trezor-hard-wallet",
            WalletType::TrezorSoftWallet => "trezor-soft-wallet",
            WalletType::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// The wallet content persisted inside the encrypted primary file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Format version, checked before the rest of the payload is trusted.
    pub version: u32,

    pub keychain: Keychain,

    /// Height of the last ledger block this wallet has seen.
    pub last_block_seen_height: Option<u32>,

    /// Timestamp of the last ledger block this wallet has seen.
    pub last_block_seen_time: Option<DateTime<Utc>>,

    /// Creation time of the wallet's earliest key.
    pub earliest_key_creation_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub wallet_type: WalletType,
}

impl Wallet {
    /// Create a fresh wallet around a derived keychain.
    pub fn new(keychain: Keychain) -> Self {
        let earliest_key_creation_time =
            keychain.leaf_keys.iter().filter_map(|key| key.creation_time).min();
        Self {
            version: WALLET_VERSION,
            keychain,
            last_block_seen_height: None,
            last_block_seen_time: None,
            earliest_key_creation_time,
            wallet_type: WalletType::Unknown,
        }
    }
}

/// Classify a wallet, inferring the type from its key structure when no
/// explicit tag is present.
///
/// An explicit non-[`WalletType::Unknown`] tag is returned unchanged and
/// never overwritten. Otherwise the first leaf key's derivation path is
/// inspected: a path starting at hardened index 0 marks a BIP32 soft
/// wallet; a path starting at hardened index 44 marks the Trezor family,
/// hard or soft depending on whether private material is present. A
/// non-Unknown inference is written back onto the wallet so future
/// classification is O(1). Best effort, not authoritative.
pub fn classify(wallet: &mut Wallet) -> WalletType {
    if wallet.wallet_type != WalletType::Unknown {
        return wallet.wallet_type;
    }

    let inferred = infer_from_keychain(&wallet.keychain);
    if inferred != WalletType::Unknown {
        tracing::debug!("inferred wallet type {}", inferred);
        wallet.wallet_type = inferred;
    }
    inferred
}

fn infer_from_keychain(keychain: &Keychain) -> WalletType {
    let Some(first_leaf) = keychain.first_leaf_key() else {
        return WalletType::Unknown;
    };
    let Some(head) = first_leaf.path.first() else {
        return WalletType::Unknown;
    };

    if *head == ChildNumber::hardened(0) {
        WalletType::SoftWalletBip32
    } else if *head == ChildNumber::hardened(44) {
        if first_leaf.has_private_key {
            WalletType::TrezorSoftWallet
        } else {
            WalletType::TrezorHardWallet
        }
    } else {
        WalletType::Unknown
    }
}
