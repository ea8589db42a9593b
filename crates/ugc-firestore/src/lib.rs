//! Firestore persistence for the UGC backend.
//!
//! This crate provides:
//! - A Firestore REST client authenticated via gcp_auth
//! - The credit ledger (atomic balance + transaction log)
//! - Video record storage with status-conditional updates
//! - In-memory stores behind the `memory` feature

pub mod client;
pub mod error;
pub mod ledger;
pub mod ledger_store;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;
pub mod video_store;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use ledger::{
    AccountSnapshot, AccountUpdate, CreditContext, CreditLedger, HistoryPage, LedgerEntry,
    LedgerError, LedgerResult, LedgerStore,
};
pub use ledger_store::FirestoreLedgerStore;
pub use video_store::{FirestoreVideoStore, VideoStore};

#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryLedgerStore, MemoryVideoStore};
