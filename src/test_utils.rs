//! In-memory collaborator implementations for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{BackupError, KeychainError, LedgerError, SyncError};
use crate::manager::Collaborators;
use crate::services::{
    BackupService, InstallationService, KeychainFactory, LedgerService, LedgerStore, SyncService,
    UnconfirmedTransactionDetector, WatchingKey,
};
use crate::wallet::{ChildNumber, DerivationPath, Keychain, LeafKey, Wallet};
use crate::wallet_id::WalletId;

/// Builds structural keychains without touching any curve math.
#[derive(Debug, Default)]
pub struct StubKeychainFactory;

impl StubKeychainFactory {
    fn leaf_keys(
        account_path: &DerivationPath,
        has_private_key: bool,
        creation_time: DateTime<Utc>,
    ) -> Keychain {
        let leaf_keys = (0..2)
            .map(|index| {
                let mut path = account_path.0.clone();
                path.push(ChildNumber::normal(0));
                path.push(ChildNumber::normal(index));
                LeafKey {
                    path: DerivationPath(path),
                    has_private_key,
                    creation_time: Some(creation_time),
                }
            })
            .collect();
        Keychain {
            leaf_keys,
        }
    }
}

impl KeychainFactory for StubKeychainFactory {
    fn from_seed(
        &self,
        _seed: &[u8],
        account_path: &DerivationPath,
        creation_time: DateTime<Utc>,
    ) -> Result<Keychain, KeychainError> {
        Ok(Self::leaf_keys(account_path, true, creation_time))
    }

    fn from_entropy(
        &self,
        _entropy: &[u8],
        account_path: &DerivationPath,
        creation_time: DateTime<Utc>,
    ) -> Result<Keychain, KeychainError> {
        Ok(Self::leaf_keys(account_path, true, creation_time))
    }

    fn from_watching_key(
        &self,
        root: &WatchingKey,
        creation_time: DateTime<Utc>,
    ) -> Result<Keychain, KeychainError> {
        Ok(Self::leaf_keys(&root.path, false, creation_time))
    }
}

/// A ledger whose head height is fixed, with close-call accounting.
pub struct StubLedger {
    pub height: Option<u32>,
    pub closes: Arc<AtomicUsize>,
}

impl StubLedger {
    pub fn at_height(height: u32) -> Self {
        Self {
            height: Some(height),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            height: None,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct StubStore {
    height: Option<u32>,
    closes: Arc<AtomicUsize>,
}

impl LedgerStore for StubStore {
    fn chain_head_height(&mut self) -> Result<u32, LedgerError> {
        self.height.ok_or_else(|| LedgerError::Query("no head".to_string()))
    }

    fn close(self: Box<Self>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl LedgerService for StubLedger {
    fn open_store(&self) -> Result<Box<dyn LedgerStore>, LedgerError> {
        Ok(Box::new(StubStore {
            height: self.height,
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// A detector that always reports the configured replay date.
#[derive(Debug, Default)]
pub struct StubUnconfirmedDetector(pub Option<DateTime<Utc>>);

impl UnconfirmedTransactionDetector for StubUnconfirmedDetector {
    fn calculate_replay_date(&self, _: &Wallet, _: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.0
    }
}

/// Records registrations and serves rolling backups from memory.
#[derive(Debug, Default)]
pub struct StubBackupService {
    pub remembered: Mutex<Vec<(WalletId, String)>>,
    pub rolling_backups: Mutex<HashMap<WalletId, Wallet>>,
    pub rolling_loads: AtomicUsize,
}

impl StubBackupService {
    pub fn with_rolling_backup(id: WalletId, wallet: Wallet) -> Self {
        let service = Self::default();
        service.rolling_backups.lock().unwrap().insert(id, wallet);
        service
    }

    pub fn remembered_count(&self) -> usize {
        self.remembered.lock().unwrap().len()
    }
}

impl BackupService for StubBackupService {
    fn remember_for_rolling_backup(&self, id: &WalletId, password: &str) {
        self.remembered.lock().unwrap().push((*id, password.to_string()));
    }

    fn remember_for_local_zip_backup(&self, id: &WalletId, password: &str) {
        self.remembered.lock().unwrap().push((*id, password.to_string()));
    }

    fn remember_for_cloud_zip_backup(&self, id: &WalletId, password: &str) {
        self.remembered.lock().unwrap().push((*id, password.to_string()));
    }

    fn load_rolling_backup(&self, id: &WalletId, _password: &str) -> Result<Wallet, BackupError> {
        self.rolling_loads.fetch_add(1, Ordering::SeqCst);
        self.rolling_backups
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| BackupError::NoBackup(id.to_string()))
    }
}

/// A sync client that records replay requests.
#[derive(Debug, Default)]
pub struct StubSyncService {
    pub replays: Mutex<Vec<Option<DateTime<Utc>>>>,
}

#[async_trait]
impl SyncService for StubSyncService {
    async fn replay(&self, replay_from: Option<DateTime<Utc>>) -> Result<(), SyncError> {
        self.replays.lock().unwrap().push(replay_from);
        Ok(())
    }
}

/// Writes a canned checkpoint artifact and records configuration updates.
#[derive(Debug, Default)]
pub struct StubInstallation {
    pub last_soft_wallet_root: Mutex<Option<String>>,
}

impl InstallationService for StubInstallation {
    fn copy_checkpoints_to(&self, target: &Path) -> Result<(), std::io::Error> {
        std::fs::write(target, b"checkpoints")
    }

    fn remember_last_soft_wallet_root(&self, wallet_root: &str) {
        *self.last_soft_wallet_root.lock().unwrap() = Some(wallet_root.to_string());
    }
}

/// A full set of stub collaborators around the given ledger height.
pub fn stub_collaborators(ledger_height: u32) -> (Collaborators, StubHandles) {
    let backups = Arc::new(StubBackupService::default());
    let sync = Arc::new(StubSyncService::default());
    let installation = Arc::new(StubInstallation::default());
    let ledger = Arc::new(StubLedger::at_height(ledger_height));

    let handles = StubHandles {
        backups: Arc::clone(&backups),
        sync: Arc::clone(&sync),
        installation: Arc::clone(&installation),
        ledger_closes: Arc::clone(&ledger.closes),
    };
    let collaborators = Collaborators {
        keychains: Arc::new(StubKeychainFactory),
        ledger,
        unconfirmed: Arc::new(StubUnconfirmedDetector::default()),
        backups,
        sync,
        installation,
    };
    (collaborators, handles)
}

/// Handles onto the stubs inside a [`Collaborators`] set.
pub struct StubHandles {
    pub backups: Arc<StubBackupService>,
    pub sync: Arc<StubSyncService>,
    pub installation: Arc<StubInstallation>,
    pub ledger_closes: Arc<AtomicUsize>,
}
