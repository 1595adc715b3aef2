//! Synchronization replay decisions.
//!
//! After a wallet has been offline its transaction history may be stale.
//! [`SyncDecisionEngine::decide`] computes whether a regular sync suffices
//! or history must be replayed from a date, and if so from which date.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use crate::services::{LedgerService, UnconfirmedTransactionDetector};
use crate::wallet::Wallet;

/// A wallet whose keys were created within this window counts as brand
/// new and is not replayed.
const KEY_CREATION_TOLERANCE_SECONDS: i64 = 10;

/// No HD wallets existed before this date. Replay never starts earlier;
/// this keeps legacy zero-timestamp keys from triggering replays back to
/// the epoch.
pub fn earliest_hd_wallet_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 5, 1, 0, 0, 0).unwrap()
}

/// The outcome of a sync decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPlan {
    /// The wallet is current; download from the existing checkpoint.
    Regular,
    /// Re-scan ledger history from the given date forward.
    ReplayFrom(DateTime<Utc>),
}

/// Decides between regular synchronization and replay-from-date.
pub struct SyncDecisionEngine {
    ledger: Arc<dyn LedgerService>,
    unconfirmed: Arc<dyn UnconfirmedTransactionDetector>,
}

impl SyncDecisionEngine {
    pub fn new(
        ledger: Arc<dyn LedgerService>,
        unconfirmed: Arc<dyn UnconfirmedTransactionDetector>,
    ) -> Self {
        Self {
            ledger,
            unconfirmed,
        }
    }

    /// Compute the sync plan for a wallet.
    ///
    /// Regular sync is chosen iff the wallet and ledger store agree on the
    /// head height, or the wallet is brand new (no last-seen block and key
    /// creation within tolerance of `now`), and no unconfirmed
    /// transaction demands a replay. Everything else replays.
    pub fn decide(&self, wallet: &Wallet, now: DateTime<Utc>) -> SyncPlan {
        let wallet_height = wallet.last_block_seen_height;
        let store_height = self.query_chain_head_height();
        debug!(
            "wallet height {:?}, store height {:?}, last seen block time {:?}, earliest key creation {:?}",
            wallet_height,
            store_height,
            wallet.last_block_seen_time,
            wallet.earliest_key_creation_time,
        );

        let key_creation_in_past = wallet
            .earliest_key_creation_time
            .map(|t| t < now - Duration::seconds(KEY_CREATION_TOLERANCE_SECONDS))
            .unwrap_or(false);

        let unconfirmed_replay_date = self.unconfirmed.calculate_replay_date(wallet, now);

        let heights_match = matches!(
            (wallet_height, store_height),
            (Some(w), Some(s)) if w > 0 && w == s
        );
        let brand_new = wallet.last_block_seen_time.is_none() && !key_creation_in_past;

        if (heights_match || brand_new) && unconfirmed_replay_date.is_none() {
            debug!("regular sync suffices");
            return SyncPlan::Regular;
        }

        let replay_date = replay_date(wallet, unconfirmed_replay_date);
        debug!("replay required from {}", replay_date);
        SyncPlan::ReplayFrom(replay_date)
    }

    /// Query the chain head height through a transiently opened store.
    ///
    /// The store is closed on every exit path. Failures are logged and
    /// treated as "unknown height", which fails the equality check in
    /// [`decide`](Self::decide) and biases toward the safer replay path;
    /// they are never surfaced to the caller.
    fn query_chain_head_height(&self) -> Option<u32> {
        let mut store = match self.ledger.open_store() {
            Ok(store) => store,
            Err(e) => {
                warn!("ledger store unavailable: {e}");
                return None;
            }
        };
        let height = store.chain_head_height();
        store.close();
        match height {
            Ok(height) => Some(height),
            Err(e) => {
                warn!("ledger head query failed: {e}");
                None
            }
        }
    }
}

/// Work out the replay date from the last block seen, the unconfirmed
/// transaction candidate and the earliest key creation date, clamped to
/// the earliest HD wallet date.
fn replay_date(wallet: &Wallet, unconfirmed_candidate: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let mut replay = wallet.last_block_seen_time;
    if replay.is_some() {
        debug!("candidate replay date from last block seen time {:?}", replay);
    }

    // An earlier unconfirmed transaction date pushes the replay back
    if let Some(candidate) = unconfirmed_candidate {
        if replay.map_or(true, |current| candidate < current) {
            debug!("earlier candidate replay date from unconfirmed transactions {candidate}");
            replay = Some(candidate);
        }
    }

    // Fall back to the earliest key creation date when nothing else is set
    if replay.is_none() {
        if let Some(earliest) = wallet.earliest_key_creation_time {
            debug!("candidate replay date from earliest key creation {earliest}");
            replay = Some(earliest);
        }
    }

    // The floor always wins over an earlier candidate
    let floor = earliest_hd_wallet_date();
    match replay {
        Some(date) if date > floor => date,
        _ => floor,
    }
}
