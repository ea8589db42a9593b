//! Shared data models for the UGC video backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and the generation state machine
//! - Video styles and product snapshots
//! - Credit ledger transactions
//! - Render job identifiers

pub mod credit_cost;
pub mod credit_transaction;
pub mod job;
pub mod product;
pub mod script;
pub mod style;
pub mod video;

pub use credit_cost::GENERATION_CREDIT_COST;
pub use credit_transaction::{
    attempt_debit_key, attempt_refund_key, payment_key, CreditTransaction, TransactionStatus,
    TransactionType,
};
pub use job::JobId;
pub use product::ProductData;
pub use script::{GeneratedScript, ScriptScene};
pub use style::{StyleParseError, VideoStyle};
pub use video::{Video, VideoEvent, VideoId, VideoStatus};
