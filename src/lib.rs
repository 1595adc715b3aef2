//! HD Wallet Manager
//!
//! This library manages the lifecycle of hierarchical-deterministic
//! wallets: deriving stable identifiers from seed material, creating and
//! opening encrypted wallet storage, protecting the user's password and a
//! derived backup key under layered symmetric encryption, classifying
//! wallet variants and deciding when transaction history must be replayed
//! against the ledger after the wallet has been offline.
//!
//! ## Features
//!
//! - Deterministic wallet identifier derivation
//! - Credential vault with password padding, scrypt key derivation and
//!   AES-CBC encryption/rotation
//! - Create/open/save/close state machine with rolling-backup fallback
//! - Wallet type classification from key derivation paths
//! - Synchronization replay decisions over multiple time sources
//!
//! Elliptic-curve key derivation, the ledger network client, backup
//! storage and the host installation layer are consumed through the
//! traits in [`services`].

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod error;
pub mod events;
pub mod manager;
pub mod services;
pub mod storage;
pub mod summary;
pub mod sync;
pub mod vault;
pub mod wallet;
pub mod wallet_id;

pub use error::{
    BackupError, KeychainError, LedgerError, SyncError, VaultError, WalletIdError,
    WalletManagerError,
};
pub use events::{EventBus, EventReceiver, WalletEvent};
pub use manager::{Collaborators, WalletLifecycleManager};
pub use services::{
    BackupService, InstallationService, KeychainFactory, LedgerService, LedgerStore, SyncService,
    UnconfirmedTransactionDetector, WatchingKey,
};
pub use storage::{DecryptedWallet, DecryptionPath};
pub use summary::WalletSummary;
pub use sync::{SyncDecisionEngine, SyncPlan};
pub use vault::CredentialRecord;
pub use wallet::{ChildNumber, DerivationPath, Keychain, LeafKey, Wallet, WalletType};
pub use wallet_id::WalletId;
