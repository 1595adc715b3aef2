//! Wallet directory layout and encrypted primary-file persistence.
//!
//! One directory per wallet identifier under the application data
//! directory, named `hdw-<id>`. Inside it live the encrypted primary
//! wallet file, the summary sidecar, the checkpoint artifact and any
//! rolling backups owned by the backup collaborator. Directories are
//! created on first write and never implicitly deleted here.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::{Result, WalletManagerError};
use crate::vault::{self, AES_IV_LENGTH, LEGACY_FIXED_IV};
use crate::wallet::{Wallet, WALLET_VERSION};
use crate::wallet_id::{WALLET_ID_SEPARATOR, WalletId};

/// Prefix of every wallet directory name.
pub const WALLET_DIRECTORY_PREFIX: &str = "hdw";

/// Base name of the primary wallet file (pre-encryption).
pub const WALLET_FILE_NAME: &str = "hdw.wallet";

/// Suffix added once the primary file is AES protected.
pub const AES_SUFFIX: &str = ".aes";

/// Name of the summary sidecar file.
pub const SUMMARY_FILE_NAME: &str = "hdw.toml";

/// Name of the ledger checkpoint artifact inside the wallet directory.
pub const CHECKPOINTS_FILE_NAME: &str = "hdw.checkpoints";

/// Magic prefix of the long-unsupported serialized wallet format.
const SERIALIZED_WALLET_MAGIC: [u8; 2] = [0xac, 0xed];

/// Which decryption strategy produced a readable wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionPath {
    /// `[16-byte IV][ciphertext]` layout with a per-file random IV.
    RandomIv,
    /// Whole file as ciphertext under the hard-coded pre-migration IV.
    /// A file read this way should be rewritten in the current layout.
    LegacyFixedIv,
}

/// A decrypted wallet plus the strategy that produced it.
#[derive(Debug)]
pub struct DecryptedWallet {
    pub wallet: Wallet,
    pub via: DecryptionPath,
}

/// The directory name for a wallet id, e.g.
/// `hdw-11111111-22222222-33333333-44444444-55555555`.
pub fn wallet_root(id: &WalletId) -> String {
    format!("{WALLET_DIRECTORY_PREFIX}{WALLET_ID_SEPARATOR}{id}")
}

/// Parse a directory name of the `hdw-<id>` shape.
pub fn parse_wallet_root(name: &str) -> Option<WalletId> {
    let rest = name.strip_prefix(WALLET_DIRECTORY_PREFIX)?;
    let rest = rest.strip_prefix(WALLET_ID_SEPARATOR)?;
    rest.parse().ok()
}

/// Verify that a path is an existing directory named like a wallet
/// directory, returning the embedded identifier.
///
/// Fails fast with [`WalletManagerError::WalletDirectoryInvalid`] on any
/// shape violation.
pub fn verify_wallet_directory(directory: &Path) -> Result<WalletId> {
    trace!("verifying wallet directory {}", directory.display());

    if !directory.is_dir() {
        return Err(WalletManagerError::WalletDirectoryInvalid(format!(
            "not a directory: {}",
            directory.display()
        )));
    }
    let name = directory
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            WalletManagerError::WalletDirectoryInvalid(format!(
                "unreadable directory name: {}",
                directory.display()
            ))
        })?;
    parse_wallet_root(name).ok_or_else(|| {
        WalletManagerError::WalletDirectoryInvalid(format!("not named correctly: {name}"))
    })
}

/// Find the wallet directories inside an application data directory.
///
/// Anything not matching the `hdw-<id>` shape is ignored.
pub fn find_wallet_directories(data_directory: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(data_directory) else {
        return Vec::new();
    };

    let mut directories: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(parse_wallet_root)
                    .is_some()
        })
        .collect();
    directories.sort();
    directories
}

/// Get or create the wallet directory for an identifier.
pub fn get_or_create_wallet_directory(data_directory: &Path, id: &WalletId) -> Result<PathBuf> {
    let directory = data_directory.join(wallet_root(id));
    if !directory.exists() {
        debug!("creating wallet directory {}", directory.display());
        fs::create_dir_all(&directory)?;
    }
    verify_wallet_directory(&directory)?;
    Ok(directory)
}

/// Path of the primary wallet file (without the encryption suffix).
pub fn wallet_file(wallet_directory: &Path) -> PathBuf {
    wallet_directory.join(WALLET_FILE_NAME)
}

/// Path of the AES protected primary wallet file.
pub fn encrypted_wallet_file(wallet_directory: &Path) -> PathBuf {
    wallet_directory.join(format!("{WALLET_FILE_NAME}{AES_SUFFIX}"))
}

/// Path of the summary sidecar file.
pub fn summary_file(wallet_directory: &Path) -> PathBuf {
    wallet_directory.join(SUMMARY_FILE_NAME)
}

/// Path of the ledger checkpoint artifact.
pub fn checkpoints_file(wallet_directory: &Path) -> PathBuf {
    wallet_directory.join(CHECKPOINTS_FILE_NAME)
}

/// Serialize and encrypt a wallet to the primary file.
///
/// Layout: `[16-byte random IV][AES-CBC ciphertext]`, keyed by the slow
/// derivation of the password with the fixed application salt.
pub fn write_encrypted_wallet(file: &Path, wallet: &Wallet, password: &str) -> Result<()> {
    let plain = serde_json::to_vec(wallet)?;
    let key = vault::derive_key(password.as_bytes())?;
    let iv = vault::generate_iv();
    let ciphertext = vault::aes_encrypt(&plain, &key, &iv);

    let mut bytes = Vec::with_capacity(AES_IV_LENGTH + ciphertext.len());
    bytes.extend_from_slice(&iv);
    bytes.extend_from_slice(&ciphertext);
    fs::write(file, &bytes)?;
    debug!(
        "wrote encrypted wallet file {} ({} bytes)",
        file.display(),
        bytes.len()
    );
    Ok(())
}

/// Read and decrypt the primary wallet file.
///
/// Tries the current `[IV][ciphertext]` layout first. If the plaintext
/// fails the parseability probe the whole file is retried as ciphertext
/// under the legacy fixed IV; which strategy succeeded is surfaced in the
/// result, since a legacy read signals a file needing migration. An
/// unsupported format version propagates from either path and is never
/// masked. A file that decrypts under neither strategy fails with
/// [`WalletManagerError::IncorrectCredential`].
pub fn read_encrypted_wallet(file: &Path, password: &str) -> Result<DecryptedWallet> {
    let bytes = fs::read(file)?;

    if bytes.starts_with(&SERIALIZED_WALLET_MAGIC) {
        return Err(WalletManagerError::WalletLoadFailure(format!(
            "'{}' is a serialized wallet; serialized wallets are no longer supported",
            file.display()
        )));
    }
    if bytes.len() <= AES_IV_LENGTH {
        return Err(WalletManagerError::WalletLoadFailure(format!(
            "'{}' is too short to hold an encrypted wallet",
            file.display()
        )));
    }

    let key = vault::derive_key(password.as_bytes())?;

    let mut iv = [0u8; AES_IV_LENGTH];
    iv.copy_from_slice(&bytes[..AES_IV_LENGTH]);
    if let Ok(plain) = vault::aes_decrypt(&bytes[AES_IV_LENGTH..], &key, &iv) {
        if is_parseable(&plain) {
            return parse_wallet(&plain, DecryptionPath::RandomIv);
        }
    }

    warn!(
        "'{}' did not decrypt under the random-IV layout, retrying with the legacy fixed IV",
        file.display()
    );
    let plain = vault::aes_decrypt(&bytes, &key, &LEGACY_FIXED_IV)
        .map_err(|_| WalletManagerError::IncorrectCredential)?;
    if !is_parseable(&plain) {
        return Err(WalletManagerError::IncorrectCredential);
    }
    warn!(
        "'{}' decrypted under the legacy fixed IV and should be migrated",
        file.display()
    );
    parse_wallet(&plain, DecryptionPath::LegacyFixedIv)
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Whether decrypted bytes look like wallet content. This is a structural
/// probe, not a cryptographic integrity check.
fn is_parseable(plain: &[u8]) -> bool {
    serde_json::from_slice::<VersionProbe>(plain).is_ok()
}

fn parse_wallet(plain: &[u8], via: DecryptionPath) -> Result<DecryptedWallet> {
    let probe: VersionProbe = serde_json::from_slice(plain)?;
    if probe.version > WALLET_VERSION {
        return Err(WalletManagerError::UnsupportedWalletVersion {
            found: probe.version,
            supported: WALLET_VERSION,
        });
    }
    let wallet: Wallet = serde_json::from_slice(plain)?;
    Ok(DecryptedWallet {
        wallet,
        via,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Keychain;

    fn test_wallet() -> Wallet {
        let mut wallet = Wallet::new(Keychain::default());
        wallet.last_block_seen_height = Some(42);
        wallet
    }

    #[test]
    fn test_wallet_root_round_trip() {
        let id = WalletId::from_seed(&[5u8; 32]).unwrap();
        let root = wallet_root(&id);
        assert!(root.starts_with("hdw-"));
        assert_eq!(parse_wallet_root(&root), Some(id));
    }

    #[test]
    fn test_parse_wallet_root_rejects_malformed_names() {
        assert_eq!(parse_wallet_root("hdw-11111111-22222222"), None);
        assert_eq!(parse_wallet_root("other-11111111-22222222-33333333-44444444-55555555"), None);
        assert_eq!(parse_wallet_root("hdw-1111111x-22222222-33333333-44444444-55555555"), None);
        assert_eq!(parse_wallet_root("hdw"), None);
    }

    #[test]
    fn test_find_wallet_directories_ignores_non_matching() {
        let data_dir = tempfile::tempdir().unwrap();
        let id = WalletId::from_seed(&[9u8; 16]).unwrap();
        fs::create_dir(data_dir.path().join(wallet_root(&id))).unwrap();
        fs::create_dir(data_dir.path().join("hdw-not-a-wallet")).unwrap();
        fs::create_dir(data_dir.path().join("unrelated")).unwrap();
        fs::write(data_dir.path().join("hdw-file"), b"x").unwrap();

        let found = find_wallet_directories(data_dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(verify_wallet_directory(&found[0]).unwrap(), id);
    }

    #[test]
    fn test_verify_rejects_bad_name() {
        let data_dir = tempfile::tempdir().unwrap();
        let bad = data_dir.path().join("hdw-11111111-22222222");
        fs::create_dir(&bad).unwrap();
        assert!(matches!(
            verify_wallet_directory(&bad),
            Err(WalletManagerError::WalletDirectoryInvalid(_))
        ));
    }

    #[test]
    fn test_encrypted_wallet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hdw.wallet.aes");
        let wallet = test_wallet();

        write_encrypted_wallet(&file, &wallet, "password").unwrap();
        let decrypted = read_encrypted_wallet(&file, "password").unwrap();
        assert_eq!(decrypted.wallet, wallet);
        assert_eq!(decrypted.via, DecryptionPath::RandomIv);
    }

    #[test]
    fn test_wrong_password_is_incorrect_credential() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hdw.wallet.aes");
        write_encrypted_wallet(&file, &test_wallet(), "password").unwrap();
        assert!(matches!(
            read_encrypted_wallet(&file, "not the password"),
            Err(WalletManagerError::IncorrectCredential)
        ));
    }

    #[test]
    fn test_legacy_fixed_iv_file_is_read_and_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hdw.wallet.aes");
        let wallet = test_wallet();

        // A pre-migration file: the whole file is ciphertext under the
        // hard-coded IV, with no IV prefix.
        let plain = serde_json::to_vec(&wallet).unwrap();
        let key = vault::derive_key(b"password").unwrap();
        let bytes = vault::aes_encrypt(&plain, &key, &LEGACY_FIXED_IV);
        fs::write(&file, &bytes).unwrap();

        let decrypted = read_encrypted_wallet(&file, "password").unwrap();
        assert_eq!(decrypted.wallet, wallet);
        assert_eq!(decrypted.via, DecryptionPath::LegacyFixedIv);
    }

    #[test]
    fn test_serialized_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hdw.wallet.aes");
        let mut bytes = vec![0xac, 0xed];
        bytes.extend_from_slice(&[0u8; 64]);
        fs::write(&file, &bytes).unwrap();
        assert!(matches!(
            read_encrypted_wallet(&file, "password"),
            Err(WalletManagerError::WalletLoadFailure(_))
        ));
    }

    #[test]
    fn test_unsupported_version_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hdw.wallet.aes");
        let mut wallet = test_wallet();
        wallet.version = WALLET_VERSION + 1;

        write_encrypted_wallet(&file, &wallet, "password").unwrap();
        assert!(matches!(
            read_encrypted_wallet(&file, "password"),
            Err(WalletManagerError::UnsupportedWalletVersion {
                found,
                supported: WALLET_VERSION,
            }) if found == WALLET_VERSION + 1
        ));
    }

    #[test]
    fn test_truncated_file_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hdw.wallet.aes");
        fs::write(&file, &[1u8; 10]).unwrap();
        assert!(matches!(
            read_encrypted_wallet(&file, "password"),
            Err(WalletManagerError::WalletLoadFailure(_))
        ));
    }
}
