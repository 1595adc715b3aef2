//! Interfaces to the engine's external collaborators.
//!
//! Everything consumed as an opaque service lives behind one of these
//! traits: HD/EC key derivation, the ledger store, the unconfirmed
//! transaction detector, the backup subsystem, the network replay client
//! and the installation layer.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{BackupError, KeychainError, LedgerError, SyncError};
use crate::wallet::{DerivationPath, Keychain, Wallet};
use crate::wallet_id::WalletId;

/// Public-only root key material for a watching wallet, as exported by a
/// hardware device (e.g. the node at `m/44'/0'/0'`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchingKey {
    /// Key fingerprint; also the wallet identifier source.
    pub fingerprint: Vec<u8>,
    /// Derivation path of the exported node.
    pub path: DerivationPath,
}

/// Derives wallet keychains from secret material.
///
/// The elliptic-curve and BIP32 primitives live behind this seam; the
/// engine only consumes the resulting structural [`Keychain`].
pub trait KeychainFactory: Send + Sync {
    /// Build a keychain from processed seed bytes rooted at the given
    /// account path.
    fn from_seed(
        &self,
        seed: &[u8],
        account_path: &DerivationPath,
        creation_time: DateTime<Utc>,
    ) -> Result<Keychain, KeychainError>;

    /// Build a keychain from raw entropy bytes rooted at the given
    /// account path.
    fn from_entropy(
        &self,
        entropy: &[u8],
        account_path: &DerivationPath,
        creation_time: DateTime<Utc>,
    ) -> Result<Keychain, KeychainError>;

    /// Build a watching-only keychain from an exported public root key.
    fn from_watching_key(
        &self,
        root: &WatchingKey,
        creation_time: DateTime<Utc>,
    ) -> Result<Keychain, KeychainError>;
}

/// A transiently opened ledger store handle.
pub trait LedgerStore: Send {
    /// Height of the current chain head.
    fn chain_head_height(&mut self) -> Result<u32, LedgerError>;

    /// Release the store. Must be called on every exit path; the store may
    /// be reopened later with or without a replay checkpoint.
    fn close(self: Box<Self>);
}

/// Access to the ledger block store.
pub trait LedgerService: Send + Sync {
    /// Open the store transiently with no replay checkpoint, for head
    /// height queries only.
    fn open_store(&self) -> Result<Box<dyn LedgerStore>, LedgerError>;
}

/// Detects transactions still unconfirmed within the replay interest
/// window.
pub trait UnconfirmedTransactionDetector: Send + Sync {
    /// A candidate replay date when unconfirmed transactions require one.
    fn calculate_replay_date(&self, wallet: &Wallet, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// The backup subsystem: rolling, local zip and cloud zip backups.
pub trait BackupService: Send + Sync {
    fn remember_for_rolling_backup(&self, id: &WalletId, password: &str);

    fn remember_for_local_zip_backup(&self, id: &WalletId, password: &str);

    fn remember_for_cloud_zip_backup(&self, id: &WalletId, password: &str);

    /// Load the most recent rolling backup for the given wallet.
    fn load_rolling_backup(&self, id: &WalletId, password: &str) -> Result<Wallet, BackupError>;
}

/// The ledger synchronization client, driven on the background worker.
#[async_trait]
pub trait SyncService: Send + Sync {
    /// Synchronize the wallet against the ledger. A replay date means
    /// history is re-scanned from that date forward; `None` requests a
    /// regular sync from the current checkpoint.
    async fn replay(&self, replay_from: Option<DateTime<Utc>>) -> Result<(), SyncError>;
}

/// Installation and configuration concerns owned by the host application.
pub trait InstallationService: Send + Sync {
    /// Supply the ledger checkpoint artifact at the given location. The
    /// engine only triggers the presence check, never the generation.
    fn copy_checkpoints_to(&self, target: &Path) -> Result<(), std::io::Error>;

    /// Record the most recently used soft wallet root in the host
    /// configuration.
    fn remember_last_soft_wallet_root(&self, wallet_root: &str);
}
