//! Wallet lifecycle orchestration.
//!
//! A [`WalletLifecycleManager`] owns at most one open wallet at a time,
//! together with its collaborators and the background synchronization
//! worker. It is an explicit context object: callers construct one, hold
//! it and pass it around; there is no ambient singleton. Lifecycle
//! operations run synchronously on the caller's thread; only ledger
//! synchronization is dispatched to the worker, fire-and-forget, with the
//! outcome reported on the event bus.
//!
//! Callers must serialize open/close calls externally; concurrent
//! mutation of the current-wallet slot is not supported.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{KeychainError, Result, VaultError, WalletManagerError};
use crate::events::{EventBus, EventReceiver, WalletEvent};
use crate::services::{
    BackupService, InstallationService, KeychainFactory, LedgerService, SyncService,
    UnconfirmedTransactionDetector, WatchingKey,
};
use crate::storage;
use crate::summary::{self, WalletSummary};
use crate::sync::{SyncDecisionEngine, SyncPlan};
use crate::vault;
use crate::wallet::{ChildNumber, DerivationPath, Keychain, Wallet, WalletType, classify};
use crate::wallet_id::{TREZOR_SOFT_WALLET_ID_SALT, WalletId};

/// The external collaborators a manager is wired to.
pub struct Collaborators {
    pub keychains: Arc<dyn KeychainFactory>,
    pub ledger: Arc<dyn LedgerService>,
    pub unconfirmed: Arc<dyn UnconfirmedTransactionDetector>,
    pub backups: Arc<dyn BackupService>,
    pub sync: Arc<dyn SyncService>,
    pub installation: Arc<dyn InstallationService>,
}

/// The wallet currently occupying the manager's single open slot.
struct CurrentWallet {
    summary: WalletSummary,
    wallet: Wallet,
    password: Zeroizing<String>,
    directory: PathBuf,
}

struct CreateSpec<'a> {
    id: WalletId,
    wallet_type: WalletType,
    /// Secret the credential vault derives K1 from: the seed, the entropy
    /// seed, or (for hardware wallets) the device password bytes.
    credential_secret: &'a [u8],
    password: &'a str,
    name: &'a str,
    notes: &'a str,
    perform_sync: bool,
}

/// Top-level wallet lifecycle manager.
pub struct WalletLifecycleManager {
    data_directory: PathBuf,
    collaborators: Collaborators,
    decision: SyncDecisionEngine,
    events: EventBus,
    current: Option<CurrentWallet>,
    sync_worker: Option<Runtime>,
}

impl WalletLifecycleManager {
    pub fn new(data_directory: impl Into<PathBuf>, collaborators: Collaborators) -> Self {
        let decision = SyncDecisionEngine::new(
            Arc::clone(&collaborators.ledger),
            Arc::clone(&collaborators.unconfirmed),
        );
        Self {
            data_directory: data_directory.into(),
            collaborators,
            decision,
            events: EventBus::default(),
            current: None,
            sync_worker: None,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// The summary of the currently open wallet, if any.
    pub fn current_summary(&self) -> Option<&WalletSummary> {
        self.current.as_ref().map(|current| &current.summary)
    }

    /// The currently open wallet, if any.
    pub fn current_wallet(&self) -> Option<&Wallet> {
        self.current.as_ref().map(|current| &current.wallet)
    }

    /// Mutable access to the currently open wallet, for collaborators that
    /// feed back chain state (last seen block height/time).
    pub fn current_wallet_mut(&mut self) -> Option<&mut Wallet> {
        self.current.as_mut().map(|current| &mut current.wallet)
    }

    /// Get or create a legacy soft wallet from processed seed bytes.
    ///
    /// Not BIP32 compliant: the keychain is rooted directly at `m/0'` over
    /// the seed bytes. Kept for compatibility with existing wallets; new
    /// soft wallets should come from
    /// [`create_soft_wallet_from_entropy`](Self::create_soft_wallet_from_entropy).
    pub fn create_soft_wallet_from_seed(
        &mut self,
        seed: &[u8],
        creation_time: DateTime<Utc>,
        password: &str,
        name: &str,
        notes: &str,
        perform_sync: bool,
    ) -> Result<WalletId> {
        debug!("create_soft_wallet_from_seed called");
        let id = WalletId::from_seed(seed)?;
        let keychains = Arc::clone(&self.collaborators.keychains);
        self.get_or_create_wallet(
            CreateSpec {
                id,
                wallet_type: WalletType::SoftWalletLegacy,
                credential_secret: seed,
                password,
                name,
                notes,
                perform_sync,
            },
            || keychains.from_seed(seed, &soft_wallet_account_path(), creation_time),
        )
    }

    /// Get or create a BIP32 soft wallet from entropy bytes.
    ///
    /// The keychain derives from the raw entropy; the identifier still
    /// derives from the processed seed bytes for backwards compatibility
    /// of storage locations.
    pub fn create_soft_wallet_from_entropy(
        &mut self,
        entropy: &[u8],
        seed: &[u8],
        creation_time: DateTime<Utc>,
        password: &str,
        name: &str,
        notes: &str,
        perform_sync: bool,
    ) -> Result<WalletId> {
        debug!("create_soft_wallet_from_entropy called, creation time {creation_time}");
        let id = WalletId::from_seed(seed)?;
        let keychains = Arc::clone(&self.collaborators.keychains);
        self.get_or_create_wallet(
            CreateSpec {
                id,
                wallet_type: WalletType::SoftWalletBip32,
                credential_secret: seed,
                password,
                name,
                notes,
                perform_sync,
            },
            || keychains.from_entropy(entropy, &soft_wallet_account_path(), creation_time),
        )
    }

    /// Get or create a hardware (watching-only) wallet from an exported
    /// public root key.
    ///
    /// The identifier derives from the watching-key fingerprint. The
    /// device-supplied password doubles as the credential vault secret,
    /// since there is no local seed.
    pub fn create_hard_wallet_from_root_key(
        &mut self,
        root: &WatchingKey,
        creation_time: DateTime<Utc>,
        password: &str,
        name: &str,
        notes: &str,
        perform_sync: bool,
    ) -> Result<WalletId> {
        debug!("create_hard_wallet_from_root_key called");
        let id = WalletId::from_fingerprint(&root.fingerprint)?;
        let keychains = Arc::clone(&self.collaborators.keychains);
        self.get_or_create_wallet(
            CreateSpec {
                id,
                wallet_type: WalletType::TrezorHardWallet,
                credential_secret: password.as_bytes(),
                password,
                name,
                notes,
                perform_sync,
            },
            || keychains.from_watching_key(root, creation_time),
        )
    }

    /// Get or create a Trezor-style soft wallet from seed bytes.
    ///
    /// BIP44 account paths with local private material. The identifier is
    /// salted so it never collides with a plain soft wallet built from the
    /// same seed.
    pub fn create_trezor_soft_wallet_from_seed(
        &mut self,
        seed: &[u8],
        creation_time: DateTime<Utc>,
        password: &str,
        name: &str,
        notes: &str,
        perform_sync: bool,
    ) -> Result<WalletId> {
        debug!("create_trezor_soft_wallet_from_seed called");
        let id = WalletId::from_seed_with_salt(seed, &TREZOR_SOFT_WALLET_ID_SALT)?;
        let keychains = Arc::clone(&self.collaborators.keychains);
        self.get_or_create_wallet(
            CreateSpec {
                id,
                wallet_type: WalletType::TrezorSoftWallet,
                credential_secret: seed,
                password,
                name,
                notes,
                perform_sync,
            },
            || keychains.from_seed(seed, &bip44_account_path(), creation_time),
        )
    }

    /// Open an existing wallet by identifier.
    ///
    /// Scans the application data directory for the wallet's directory and
    /// loads it, falling back to the most recent rolling backup if the
    /// primary file is unreadable. Returns `Ok(None)` when no directory
    /// for the identifier exists.
    pub fn open_wallet(
        &mut self,
        id: &WalletId,
        password: &str,
        perform_sync: bool,
    ) -> Result<Option<&WalletSummary>> {
        debug!("open_wallet called for {id}");
        self.close();

        let mut target = None;
        for directory in storage::find_wallet_directories(&self.data_directory) {
            let directory_id = storage::verify_wallet_directory(&directory)?;
            if directory_id == *id {
                target = Some(directory);
                break;
            }
        }
        let Some(directory) = target else {
            debug!("no wallet directory found for {id}");
            return Ok(None);
        };

        let (summary, wallet, backup_used) = self
            .load_from_wallet_directory(&directory, password)
            .inspect_err(|e| {
                self.events.emit(WalletEvent::WalletLoadFailed {
                    id: *id,
                    reason: e.to_string(),
                });
            })?;

        self.activate(summary, wallet, directory, password, false, perform_sync, backup_used)?;
        Ok(self.current_summary())
    }

    /// Save the current wallet and refresh its backup registration.
    ///
    /// Failures are logged and reported on the event bus, never returned:
    /// saving is routinely triggered by background autosave.
    pub fn save(&mut self) {
        let Some(current) = self.current.as_ref() else {
            debug!("no current wallet to save");
            return;
        };
        let id = current.summary.id;
        debug!(
            "saving wallet {id} at height {:?}",
            current.wallet.last_block_seen_height
        );

        let file = storage::encrypted_wallet_file(&current.directory);
        if let Err(e) = storage::write_encrypted_wallet(&file, &current.wallet, &current.password)
        {
            warn!("could not save wallet {id}: {e}");
            self.events.emit(WalletEvent::WalletSaveFailed {
                id,
                reason: e.to_string(),
            });
            return;
        }

        self.register_backups(&id, current.password.as_str());
        self.events.emit(WalletEvent::WalletSaved {
            id,
        });
    }

    /// Close the current wallet: flush pending state and discard the
    /// credential material.
    pub fn close(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        debug!(
            "closing wallet {} at height {:?}",
            current.summary.id, current.wallet.last_block_seen_height
        );
        let file = storage::encrypted_wallet_file(&current.directory);
        if let Err(e) = storage::write_encrypted_wallet(&file, &current.wallet, &current.password)
        {
            warn!("could not flush wallet {} on close: {e}", current.summary.id);
        }
        // `current.password` is zeroized on drop here
    }

    /// Change the wallet password.
    ///
    /// Rotates the credential record (the backup key bytes themselves are
    /// unchanged), re-encrypts the primary file under the new password and
    /// re-registers the backups. Requires an open wallet; the original
    /// seed/entropy is not needed.
    pub fn rotate_credentials(&mut self, old_password: &str, new_password: &str) -> Result<()> {
        let current = self.current.as_mut().ok_or(WalletManagerError::NoWalletOpen)?;
        let record = current
            .summary
            .credentials
            .as_ref()
            .ok_or(WalletManagerError::Vault(VaultError::MalformedCredentialRecord))?;

        let rotated = vault::rotate_credentials(
            record,
            old_password.as_bytes(),
            new_password.as_bytes(),
        )?;
        current.summary.credentials = Some(rotated);

        let file = storage::encrypted_wallet_file(&current.directory);
        storage::write_encrypted_wallet(&file, &current.wallet, new_password)?;
        summary::persist(&current.directory, &current.summary)?;
        current.password = Zeroizing::new(new_password.to_owned());

        let id = current.summary.id;
        info!("rotated credentials for wallet {id}");
        self.register_backups(&id, new_password);
        Ok(())
    }

    /// Summaries of every wallet present in the application data
    /// directory, without decrypting anything.
    pub fn wallet_summaries(&self) -> Vec<WalletSummary> {
        storage::find_wallet_directories(&self.data_directory)
            .into_iter()
            .filter_map(|directory| {
                let id = storage::verify_wallet_directory(&directory).ok()?;
                Some(summary::load_or_default(&directory, id))
            })
            .collect()
    }

    /// Summaries of the soft wallets only, sorted by name.
    pub fn soft_wallet_summaries(&self) -> Vec<WalletSummary> {
        let mut summaries: Vec<WalletSummary> = self
            .wallet_summaries()
            .into_iter()
            .filter(|summary| summary.wallet_type.is_soft())
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Load a wallet and its summary from a verified wallet directory.
    ///
    /// On a primary-file decrypt/parse failure exactly one fallback is
    /// attempted: the most recent rolling backup for the identifier. A
    /// version mismatch propagates immediately and never triggers the
    /// fallback.
    fn load_from_wallet_directory(
        &self,
        directory: &std::path::Path,
        password: &str,
    ) -> Result<(WalletSummary, Wallet, bool)> {
        let id = storage::verify_wallet_directory(directory)?;
        let file = storage::encrypted_wallet_file(directory);

        let (wallet, backup_used) = match storage::read_encrypted_wallet(&file, password) {
            Ok(decrypted) => (decrypted.wallet, false),
            Err(e @ WalletManagerError::UnsupportedWalletVersion { .. }) => {
                // A rolling backup is almost certainly the same version;
                // do not mask this behind the fallback.
                return Err(e);
            }
            Err(e) => {
                warn!("primary wallet file failed to load ({e}); trying rolling backup");
                let wallet = self
                    .collaborators
                    .backups
                    .load_rolling_backup(&id, password)
                    .map_err(|backup_error| {
                        WalletManagerError::WalletLoadFailure(format!(
                            "{e}; rolling backup also failed: {backup_error}"
                        ))
                    })?;
                info!("loaded wallet {id} from rolling backup");
                (wallet, true)
            }
        };

        let summary = summary::load_or_default(directory, id);
        Ok((summary, wallet, backup_used))
    }

    /// Drive the transition into the open state.
    ///
    /// Classifies and tags the wallet, persists the summary when newly
    /// created or freshly classified, records the soft wallet root,
    /// ensures the checkpoint artifact is present, registers the backups
    /// and, unless suppressed, decides and dispatches synchronization.
    #[allow(clippy::too_many_arguments)]
    fn activate(
        &mut self,
        mut summary: WalletSummary,
        mut wallet: Wallet,
        directory: PathBuf,
        password: &str,
        created: bool,
        perform_sync: bool,
        backup_used: bool,
    ) -> Result<()> {
        let tag_before = summary.wallet_type;
        let classified = classify(&mut wallet);
        if classified != WalletType::Unknown {
            summary.wallet_type = classified;
        }
        let freshly_classified = summary.wallet_type != tag_before;

        if created || freshly_classified {
            summary::persist(&directory, &summary)?;
        }

        if summary.wallet_type.is_soft() {
            self.collaborators
                .installation
                .remember_last_soft_wallet_root(&storage::wallet_root(&summary.id));
        }

        let checkpoints = storage::checkpoints_file(&directory);
        if !checkpoints.exists() {
            if let Err(e) = self.collaborators.installation.copy_checkpoints_to(&checkpoints) {
                warn!("could not copy checkpoints into {}: {e}", directory.display());
            }
        }

        let id = summary.id;
        self.register_backups(&id, password);

        let plan = if perform_sync {
            Some(self.decision.decide(&wallet, Utc::now()))
        } else {
            warn!("wallet configured - synchronization not selected - expect this during testing");
            None
        };

        self.current = Some(CurrentWallet {
            summary,
            wallet,
            password: Zeroizing::new(password.to_owned()),
            directory,
        });
        self.events.emit(WalletEvent::WalletLoaded {
            id,
            backup_used,
        });

        if let Some(plan) = plan {
            info!("wallet configured - performing synchronization");
            self.dispatch_sync(plan);
        }
        Ok(())
    }

    fn get_or_create_wallet(
        &mut self,
        spec: CreateSpec<'_>,
        build_keychain: impl FnOnce() -> std::result::Result<Keychain, KeychainError>,
    ) -> Result<WalletId> {
        self.close();

        let directory = storage::get_or_create_wallet_directory(&self.data_directory, &spec.id)?;
        debug!("wallet directory '{}'", directory.display());
        let file = storage::encrypted_wallet_file(&directory);

        let (mut summary, mut wallet, created, backup_used) = if file.exists() {
            debug!("discovered encrypted wallet file, loading");
            let (summary, wallet, backup_used) = self
                .load_from_wallet_directory(&directory, spec.password)
                .inspect_err(|e| {
                    self.events.emit(WalletEvent::WalletLoadFailed {
                        id: spec.id,
                        reason: e.to_string(),
                    });
                })?;
            (summary, wallet, false, backup_used)
        } else {
            debug!("creating new wallet file");
            let keychain = build_keychain()?;
            let mut wallet = Wallet::new(keychain);
            wallet.wallet_type = spec.wallet_type;
            storage::write_encrypted_wallet(&file, &wallet, spec.password)?;

            let mut summary = WalletSummary::new(spec.id, spec.name, spec.notes);
            summary.wallet_file = Some(storage::wallet_file(&directory));
            (summary, wallet, true, false)
        };

        // The creation route knows the variant authoritatively
        summary.wallet_type = spec.wallet_type;
        wallet.wallet_type = spec.wallet_type;

        if summary.credentials.is_none() {
            // Missing on first creation, and on wallets whose sidecar was
            // lost or written before credentials were stored
            summary.credentials = Some(vault::protect_credentials(
                spec.credential_secret,
                spec.password.as_bytes(),
            )?);
        }

        self.activate(
            summary,
            wallet,
            directory,
            spec.password,
            created,
            spec.perform_sync,
            backup_used,
        )?;
        Ok(spec.id)
    }

    fn register_backups(&self, id: &WalletId, password: &str) {
        let backups = &self.collaborators.backups;
        backups.remember_for_rolling_backup(id, password);
        backups.remember_for_local_zip_backup(id, password);
        backups.remember_for_cloud_zip_backup(id, password);
    }

    /// Submit a sync plan to the background worker.
    ///
    /// Fire-and-forget: returns once the task is submitted. Completion or
    /// failure arrives on the event bus; nothing is thrown back to the
    /// caller. The worker is a single dedicated thread, created lazily,
    /// one per manager instance. A dispatched task has no cancellation
    /// contract.
    fn dispatch_sync(&mut self, plan: SyncPlan) {
        if self.sync_worker.is_none() {
            self.sync_worker = build_sync_worker();
        }
        let Some(worker) = self.sync_worker.as_ref() else {
            self.events.emit(WalletEvent::SyncFailed {
                reason: "sync worker unavailable".to_string(),
            });
            return;
        };

        self.events.emit(WalletEvent::SyncStarted {
            plan,
        });

        let replay_from = match plan {
            SyncPlan::Regular => None,
            SyncPlan::ReplayFrom(date) => Some(date),
        };
        let service = Arc::clone(&self.collaborators.sync);
        let events = self.events.clone();
        worker.spawn(async move {
            debug!("synchronizing wallet with replay date {:?}", replay_from);
            match service.replay(replay_from).await {
                Ok(()) => {
                    debug!("sync has completed");
                    events.emit(WalletEvent::SyncCompleted);
                }
                Err(e) => {
                    warn!("sync failed: {e}");
                    events.emit(WalletEvent::SyncFailed {
                        reason: e.to_string(),
                    });
                }
            }
        });
    }
}

impl Drop for WalletLifecycleManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// The account path legacy and BIP32 soft wallets are rooted at.
fn soft_wallet_account_path() -> DerivationPath {
    DerivationPath(vec![ChildNumber::hardened(0)])
}

/// The account path Trezor-style wallets are rooted at (`m/44'/0'`).
fn bip44_account_path() -> DerivationPath {
    DerivationPath(vec![ChildNumber::hardened(44), ChildNumber::hardened(0)])
}

fn build_sync_worker() -> Option<Runtime> {
    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("sync-wallet")
        .enable_all()
        .build()
    {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            warn!("could not start sync worker: {e}");
            None
        }
    }
}
