//! Credit ledger.
//!
//! The balance lives on the user's account document next to a transaction
//! counter; every mutation rewrites both and inserts one immutable
//! transaction row in a single atomic commit that is conditioned on the
//! account being unchanged since it was read. A lost race re-reads and
//! recomputes, so concurrent debits always observe each other.
//!
//! Commits for one user are serialized inside a process, so the optimistic
//! retry loop only has to absorb writers in other processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ugc_models::{CreditTransaction, TransactionType, VideoId};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::{record_ledger_conflict, record_ledger_transaction};

/// How long a mutation keeps retrying lost commit races before giving up.
const CONTENTION_BUDGET: Duration = Duration::from_secs(15);

const RETRY_BASE_DELAY_MS: u64 = 10;
const RETRY_MAX_DELAY_MS: u64 = 1_000;

pub const MAX_HISTORY_LIMIT: u32 = 100;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient credits: balance {balance}, requested {requested}")]
    InsufficientCredits { balance: i64, requested: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("{0} is not a grant transaction type")]
    InvalidTransactionType(TransactionType),

    /// A transaction with this idempotency key was already recorded.
    #[error("Duplicate ledger operation: {0}")]
    Duplicate(String),

    #[error("Ledger contention for user {0}, gave up after retries")]
    Contention(String),

    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(#[from] FirestoreError),
}

impl LedgerError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerError::Duplicate(_))
    }

    /// Worth retrying the whole operation later.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Contention(_) => true,
            LedgerError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Account state as read before a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub user_id: String,
    pub balance: i64,
    pub transaction_count: u64,
    /// Opaque version token; `None` if the account does not exist yet.
    pub version: Option<String>,
}

impl AccountSnapshot {
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: 0,
            transaction_count: 0,
            version: None,
        }
    }
}

/// New account totals written by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountUpdate {
    pub balance: i64,
    pub transaction_count: u64,
}

/// Storage primitive behind the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_account(&self, user_id: &str) -> FirestoreResult<AccountSnapshot>;

    /// Atomically write `update` to the account and insert `tx`.
    ///
    /// Must fail with `PreconditionFailed` if the account changed since
    /// `snapshot` was read, and with `AlreadyExists` if a transaction with
    /// `tx.id` exists. Nothing is written on failure.
    async fn commit(
        &self,
        snapshot: &AccountSnapshot,
        update: AccountUpdate,
        tx: &CreditTransaction,
    ) -> FirestoreResult<()>;

    async fn transaction_exists(&self, user_id: &str, tx_id: &str) -> FirestoreResult<bool>;

    /// Transactions newest-first.
    async fn list_transactions(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> FirestoreResult<Vec<CreditTransaction>>;
}

/// Correlation data recorded with a ledger mutation.
#[derive(Debug, Clone, Default)]
pub struct CreditContext {
    pub idempotency_key: Option<String>,
    pub video_id: Option<String>,
    pub description: String,
}

impl CreditContext {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_video(mut self, video_id: &VideoId) -> Self {
        self.video_id = Some(video_id.to_string());
        self
    }
}

/// A committed ledger movement.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub transaction: CreditTransaction,
}

impl LedgerEntry {
    pub fn new_balance(&self) -> i64 {
        self.transaction.balance_after
    }
}

/// One page of transaction history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub transactions: Vec<CreditTransaction>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BalanceRule {
    /// Reject if the balance would go negative.
    RequireSufficient,
    /// Debit at most the current balance.
    ClampToZero,
    Credit,
}

type UserLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Credit ledger service.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
    locks: Arc<UserLocks>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: Arc::default(),
        }
    }

    /// Consume `amount` credits. Fails with `InsufficientCredits` without
    /// writing anything if the balance is too low.
    pub async fn deduct(
        &self,
        user_id: &str,
        amount: u32,
        ctx: CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        let amount = positive(amount)?;
        self.apply(user_id, TransactionType::Consumption, -amount, BalanceRule::RequireSufficient, ctx)
            .await
    }

    /// Return `amount` credits. Never fails on balance.
    pub async fn refund(
        &self,
        user_id: &str,
        amount: u32,
        ctx: CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        let amount = positive(amount)?;
        self.apply(user_id, TransactionType::Refund, amount, BalanceRule::Credit, ctx)
            .await
    }

    /// Add purchased, bonus or subscription credits.
    pub async fn grant(
        &self,
        user_id: &str,
        amount: u32,
        tx_type: TransactionType,
        ctx: CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        if !tx_type.is_grant() {
            return Err(LedgerError::InvalidTransactionType(tx_type));
        }
        let amount = positive(amount)?;
        self.apply(user_id, tx_type, amount, BalanceRule::Credit, ctx).await
    }

    /// Remove up to `amount` credits (payment refunds), never below zero.
    pub async fn claw_back(
        &self,
        user_id: &str,
        amount: u32,
        ctx: CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        let amount = positive(amount)?;
        self.apply(user_id, TransactionType::Adjustment, -amount, BalanceRule::ClampToZero, ctx)
            .await
    }

    pub async fn balance(&self, user_id: &str) -> LedgerResult<i64> {
        let account = self.store.load_account(user_id).await?;
        check_balance(&account)?;
        Ok(account.balance)
    }

    /// Whether a mutation with this idempotency key has been committed.
    pub async fn is_recorded(&self, user_id: &str, idempotency_key: &str) -> LedgerResult<bool> {
        Ok(self.store.transaction_exists(user_id, idempotency_key).await?)
    }

    /// Paginated history, newest first. `page` is 1-based.
    pub async fn history(&self, user_id: &str, page: u32, limit: u32) -> LedgerResult<HistoryPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let offset = (page - 1).saturating_mul(limit);

        let account = self.store.load_account(user_id).await?;
        let transactions = self.store.list_transactions(user_id, offset, limit).await?;

        Ok(HistoryPage {
            transactions,
            total: account.transaction_count,
            page,
            limit,
        })
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(user_id.to_string()).or_default().clone()
    }

    fn release_user_lock(&self, user_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Held by the map and by `lock` only: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
    }

    async fn apply(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        amount: i64,
        rule: BalanceRule,
        ctx: CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        let lock = self.user_lock(user_id);
        let result = {
            let _serialized = lock.lock().await;
            self.apply_serialized(user_id, tx_type, amount, rule, ctx).await
        };
        self.release_user_lock(user_id, lock);
        result
    }

    async fn apply_serialized(
        &self,
        user_id: &str,
        tx_type: TransactionType,
        amount: i64,
        rule: BalanceRule,
        ctx: CreditContext,
    ) -> LedgerResult<LedgerEntry> {
        if let Some(key) = &ctx.idempotency_key {
            if self.store.transaction_exists(user_id, key).await? {
                debug!(user_id = %user_id, key = %key, "Ledger operation already recorded");
                return Err(LedgerError::Duplicate(key.clone()));
            }
        }

        let deadline = Instant::now() + CONTENTION_BUDGET;
        let mut attempt: u32 = 0;
        loop {
            let account = self.store.load_account(user_id).await?;
            check_balance(&account)?;

            let delta = match rule {
                BalanceRule::RequireSufficient if account.balance < -amount => {
                    return Err(LedgerError::InsufficientCredits {
                        balance: account.balance,
                        requested: -amount,
                    });
                }
                BalanceRule::ClampToZero => amount.max(-account.balance),
                _ => amount,
            };

            let new_balance = account.balance.checked_add(delta).ok_or_else(|| {
                LedgerError::InvariantViolation(format!(
                    "balance overflow for {}: {} + {}",
                    user_id, account.balance, delta
                ))
            })?;
            if new_balance < 0 {
                return Err(LedgerError::InvariantViolation(format!(
                    "{} would leave {} with balance {}",
                    tx_type, user_id, new_balance
                )));
            }

            let tx_id = ctx
                .idempotency_key
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut tx = CreditTransaction::new(
                tx_id,
                user_id,
                tx_type,
                delta,
                new_balance,
                ctx.description.clone(),
            );
            tx.video_id = ctx.video_id.clone();

            let update = AccountUpdate {
                balance: new_balance,
                transaction_count: account.transaction_count + 1,
            };

            match self.store.commit(&account, update, &tx).await {
                Ok(()) => {
                    record_ledger_transaction(tx_type.as_str(), delta);
                    info!(
                        user_id = %user_id,
                        tx_type = %tx_type,
                        amount = delta,
                        balance_after = new_balance,
                        video_id = ?tx.video_id,
                        "Ledger transaction committed"
                    );
                    return Ok(LedgerEntry { transaction: tx });
                }
                Err(e) if e.is_precondition_failed() => {
                    record_ledger_conflict();
                    debug!(user_id = %user_id, attempt = attempt + 1, "Ledger account changed, retrying");
                }
                Err(FirestoreError::AlreadyExists(_)) => {
                    if let Some(key) = &ctx.idempotency_key {
                        if self.store.transaction_exists(user_id, key).await? {
                            return Err(LedgerError::Duplicate(key.clone()));
                        }
                    }
                    // The account document was created concurrently.
                    record_ledger_conflict();
                }
                Err(e) => return Err(e.into()),
            }

            let delay = commit_backoff(attempt);
            if Instant::now() + delay > deadline {
                warn!(
                    user_id = %user_id,
                    tx_type = %tx_type,
                    attempts = attempt + 1,
                    "Ledger commit retries exhausted"
                );
                return Err(LedgerError::Contention(user_id.to_string()));
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Full-jitter exponential backoff, so racing writers spread out instead of
/// waking together.
fn commit_backoff(attempt: u32) -> Duration {
    let ceiling = RETRY_BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY_MS);
    Duration::from_millis(rand::rng().random_range(1..=ceiling))
}

fn positive(amount: u32) -> LedgerResult<i64> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount(0));
    }
    Ok(i64::from(amount))
}

fn check_balance(account: &AccountSnapshot) -> LedgerResult<()> {
    if account.balance < 0 {
        return Err(LedgerError::InvariantViolation(format!(
            "stored balance for {} is negative ({})",
            account.user_id, account.balance
        )));
    }
    Ok(())
}
