//! Wallet summary sidecar persistence.
//!
//! The summary is a small human-readable TOML file alongside the primary
//! wallet file. Everything in it is in the clear except the two encrypted
//! credential fields; plaintext credentials are never written.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, WalletManagerError};
use crate::storage;
use crate::vault::CredentialRecord;
use crate::wallet::WalletType;
use crate::wallet_id::WalletId;

/// Mutable metadata record for a wallet, persisted as the sidecar file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub id: WalletId,

    /// Human-readable display name.
    pub name: String,

    /// Free-text public notes.
    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub wallet_type: WalletType,

    /// Location of the primary wallet file. Runtime-only; recomputed from
    /// the directory on load.
    #[serde(skip)]
    pub wallet_file: Option<PathBuf>,

    /// Encrypted password, encrypted backup key and IV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialRecord>,
}

impl WalletSummary {
    pub fn new(id: WalletId, name: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            notes: notes.into(),
            wallet_type: WalletType::Unknown,
            wallet_file: None,
            credentials: None,
        }
    }
}

/// Load the summary sidecar from a wallet directory, or build a default
/// one when the file is absent or unreadable.
///
/// The default takes its name from the short directory prefix so a wallet
/// without a sidecar still lists usably.
pub fn load_or_default(wallet_directory: &Path, id: WalletId) -> WalletSummary {
    let file = storage::summary_file(wallet_directory);

    let loaded = match fs::read_to_string(&file) {
        Ok(text) => match toml::from_str::<WalletSummary>(&text) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("could not parse wallet summary '{}': {}", file.display(), e);
                None
            }
        },
        Err(e) => {
            debug!("no wallet summary at '{}': {}", file.display(), e);
            None
        }
    };

    let mut summary = loaded.unwrap_or_else(|| {
        let directory_name = wallet_directory
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(storage::WALLET_DIRECTORY_PREFIX);
        let short = &directory_name[..directory_name.len().min(12)];
        WalletSummary::new(id, format!("Wallet ({short}...)"), "")
    });
    // The directory, not the sidecar, is authoritative for the identifier
    summary.id = id;
    summary.wallet_file = Some(storage::wallet_file(wallet_directory));
    summary
}

/// Persist the summary sidecar into a wallet directory.
pub fn persist(wallet_directory: &Path, summary: &WalletSummary) -> Result<()> {
    let file = storage::summary_file(wallet_directory);
    let text = toml::to_string_pretty(summary)
        .map_err(|e| WalletManagerError::Summary(e.to_string()))?;
    fs::write(&file, text)?;
    debug!("wrote wallet summary '{}'", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault;

    fn test_id() -> WalletId {
        WalletId::from_seed(&[3u8; 32]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = WalletSummary::new(test_id(), "Savings", "cold storage");
        summary.wallet_type = WalletType::TrezorHardWallet;
        summary.credentials = Some(vault::protect_credentials(&[1u8; 32], b"pw").unwrap());

        persist(dir.path(), &summary).unwrap();
        let loaded = load_or_default(dir.path(), test_id());

        assert_eq!(loaded.name, "Savings");
        assert_eq!(loaded.notes, "cold storage");
        assert_eq!(loaded.wallet_type, WalletType::TrezorHardWallet);
        assert_eq!(loaded.credentials, summary.credentials);
        assert!(loaded.wallet_file.is_some());
    }

    #[test]
    fn test_missing_sidecar_gets_default_name() {
        let data_dir = tempfile::tempdir().unwrap();
        let id = test_id();
        let wallet_dir = data_dir.path().join(storage::wallet_root(&id));
        fs::create_dir(&wallet_dir).unwrap();

        let summary = load_or_default(&wallet_dir, id);
        assert!(summary.name.starts_with("Wallet (hdw-"));
        assert_eq!(summary.id, id);
        assert!(summary.credentials.is_none());
    }

    #[test]
    fn test_corrupt_sidecar_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(storage::summary_file(dir.path()), "not [valid toml").unwrap();
        let summary = load_or_default(dir.path(), test_id());
        assert_eq!(summary.id, test_id());
    }

    #[test]
    fn test_sidecar_never_contains_plaintext_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = WalletSummary::new(test_id(), "Spending", "");
        summary.credentials =
            Some(vault::protect_credentials(&[7u8; 32], b"hunter2 is secret").unwrap());
        persist(dir.path(), &summary).unwrap();

        let text = fs::read_to_string(storage::summary_file(dir.path())).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("encrypted_password"));
    }
}
