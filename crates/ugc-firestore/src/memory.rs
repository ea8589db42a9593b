//! In-process stores with the same conditional-write contract as the
//! Firestore implementations.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use ugc_models::{CreditTransaction, Video, VideoId, VideoStatus};

use crate::error::{FirestoreError, FirestoreResult};
use crate::ledger::{AccountSnapshot, AccountUpdate, LedgerStore};
use crate::video_store::VideoStore;

#[derive(Default)]
struct LedgerState {
    /// user -> (balance, transaction count, version)
    accounts: HashMap<String, (i64, u64, u64)>,
    /// user -> transactions in commit order
    transactions: HashMap<String, Vec<CreditTransaction>>,
    ids: HashSet<(String, String)>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transaction for `user_id`, oldest first.
    pub async fn all_transactions(&self, user_id: &str) -> Vec<CreditTransaction> {
        self.state
            .lock()
            .await
            .transactions
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load_account(&self, user_id: &str) -> FirestoreResult<AccountSnapshot> {
        let snapshot = {
            let state = self.state.lock().await;
            match state.accounts.get(user_id) {
                Some((balance, count, version)) => AccountSnapshot {
                    user_id: user_id.to_string(),
                    balance: *balance,
                    transaction_count: *count,
                    version: Some(version.to_string()),
                },
                None => AccountSnapshot::empty(user_id),
            }
        };
        // Let concurrent writers interleave between read and commit.
        tokio::task::yield_now().await;
        Ok(snapshot)
    }

    async fn commit(
        &self,
        snapshot: &AccountSnapshot,
        update: AccountUpdate,
        tx: &CreditTransaction,
    ) -> FirestoreResult<()> {
        let mut state = self.state.lock().await;
        let user_id = snapshot.user_id.clone();

        let current = state.accounts.get(&user_id).map(|(_, _, v)| v.to_string());
        match (&snapshot.version, &current) {
            (None, Some(_)) => {
                return Err(FirestoreError::AlreadyExists(format!("users/{}", user_id)))
            }
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(FirestoreError::PreconditionFailed(format!("users/{}", user_id)))
            }
            (Some(_), None) => return Err(FirestoreError::not_found(format!("users/{}", user_id))),
            _ => {}
        }

        let key = (user_id.clone(), tx.id.clone());
        if state.ids.contains(&key) {
            return Err(FirestoreError::AlreadyExists(format!(
                "users/{}/credit_transactions/{}",
                user_id, tx.id
            )));
        }

        let version = state.accounts.get(&user_id).map(|(_, _, v)| v + 1).unwrap_or(1);
        state
            .accounts
            .insert(user_id.clone(), (update.balance, update.transaction_count, version));
        state.ids.insert(key);
        state.transactions.entry(user_id).or_default().push(tx.clone());
        Ok(())
    }

    async fn transaction_exists(&self, user_id: &str, tx_id: &str) -> FirestoreResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .ids
            .contains(&(user_id.to_string(), tx_id.to_string())))
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> FirestoreResult<Vec<CreditTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .get(user_id)
            .map(|txs| {
                txs.iter()
                    .rev()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryVideoStore {
    videos: Mutex<Vec<Video>>,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record unconditionally (test setup).
    pub async fn put(&self, video: Video) {
        let mut videos = self.videos.lock().await;
        match videos.iter_mut().find(|v| v.id == video.id) {
            Some(slot) => *slot = video,
            None => videos.push(video),
        }
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn create(&self, video: &Video) -> FirestoreResult<()> {
        let mut videos = self.videos.lock().await;
        if videos.iter().any(|v| v.id == video.id) {
            return Err(FirestoreError::AlreadyExists(format!("videos/{}", video.id)));
        }
        videos.push(video.clone());
        Ok(())
    }

    async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<Video>> {
        Ok(self
            .videos
            .lock()
            .await
            .iter()
            .find(|v| &v.id == video_id)
            .cloned())
    }

    async fn update_if_status(&self, video: &Video, expected: &[VideoStatus]) -> FirestoreResult<bool> {
        let mut videos = self.videos.lock().await;
        let slot = videos
            .iter_mut()
            .find(|v| v.id == video.id)
            .ok_or_else(|| FirestoreError::not_found(format!("videos/{}", video.id)))?;

        if !expected.contains(&slot.status) {
            return Ok(false);
        }
        *slot = video.clone();
        Ok(true)
    }

    async fn list_for_user(&self, user_id: &str, offset: u32, limit: u32) -> FirestoreResult<Vec<Video>> {
        let videos = self.videos.lock().await;
        Ok(videos
            .iter()
            .rev()
            .filter(|v| v.user_id == user_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_started_before(
        &self,
        status: VideoStatus,
        before: DateTime<Utc>,
        limit: u32,
    ) -> FirestoreResult<Vec<Video>> {
        let videos = self.videos.lock().await;
        let mut matching: Vec<Video> = videos
            .iter()
            .filter(|v| v.status == status && v.generation_started_at.is_some_and(|t| t < before))
            .cloned()
            .collect();
        matching.sort_by_key(|v| v.generation_started_at);
        matching.truncate(limit as usize);
        Ok(matching)
    }
}
