//! Error types for the wallet lifecycle engine.

use std::io;
use thiserror::Error;

/// Result type alias for wallet lifecycle operations.
pub type Result<T> = std::result::Result<T, WalletManagerError>;

/// Errors raised by the credential vault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// The stored padding marker exceeds the available payload length.
    /// A record in this state is never repaired in place.
    #[error("stored credential record is malformed")]
    MalformedCredentialRecord,

    /// The slow key-derivation function rejected its parameters or output
    /// length, meaning the crypto provider cannot serve this build.
    #[error("key derivation unavailable: {0}")]
    CryptoUnavailable(String),

    /// The supplied credential does not decrypt the stored record.
    #[error("credential does not match the stored binding")]
    IncorrectCredential,
}

/// Errors raised while deriving or parsing wallet identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletIdError {
    #[error("identifier input must not be empty")]
    EmptyInput,

    #[error("malformed wallet identifier: {0}")]
    Malformed(String),
}

/// Errors raised by the external keychain derivation collaborator.
#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// Errors raised by the ledger height/store collaborator.
///
/// These are recovered locally by the sync decision engine (unknown height
/// biases toward replay) and never surface to lifecycle callers.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    #[error("ledger query failed: {0}")]
    Query(String),
}

/// Errors raised by the backup collaborator.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("no rolling backup available for wallet {0}")]
    NoBackup(String),

    #[error("rolling backup failed to load: {0}")]
    Load(String),
}

/// Errors raised by the ledger synchronization collaborator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("ledger replay failed: {0}")]
    Replay(String),
}

/// Main error type for wallet lifecycle operations.
#[derive(Debug, Error)]
pub enum WalletManagerError {
    /// The primary wallet file reports a format version this build does not
    /// understand. Never masked by backup fallback: a rolling backup is
    /// equally unlikely to satisfy the version check.
    #[error("unsupported wallet version {found} (supported up to {supported})")]
    UnsupportedWalletVersion {
        found: u32,
        supported: u32,
    },

    /// The primary wallet file was unreadable and no rolling backup could
    /// be recovered either.
    #[error("wallet load failed: {0}")]
    WalletLoadFailure(String),

    /// A wallet directory does not match the required naming shape.
    #[error("invalid wallet directory: {0}")]
    WalletDirectoryInvalid(String),

    /// The password does not match the wallet's stored credential binding.
    #[error("credential does not match this wallet")]
    IncorrectCredential,

    /// No wallet is currently open in this manager.
    #[error("no wallet is open")]
    NoWalletOpen,

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("wallet id error: {0}")]
    WalletId(#[from] WalletIdError),

    #[error("keychain error: {0}")]
    Keychain(#[from] KeychainError),

    #[error("wallet payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("summary file error: {0}")]
    Summary(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
