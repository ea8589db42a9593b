//! Firestore and ledger metrics.

use metrics::{counter, histogram};

pub mod names {
    pub const REQUESTS_TOTAL: &str = "firestore_requests_total";
    pub const RETRIES_TOTAL: &str = "firestore_retries_total";
    pub const LATENCY_SECONDS: &str = "firestore_latency_seconds";
    pub const LEDGER_TRANSACTIONS_TOTAL: &str = "ugc_ledger_transactions_total";
    pub const LEDGER_CREDITS_TOTAL: &str = "ugc_ledger_credits_total";
    pub const LEDGER_CONFLICTS_TOTAL: &str = "ugc_ledger_conflicts_total";
}

/// Record metrics for a completed Firestore request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a committed ledger transaction.
pub fn record_ledger_transaction(tx_type: &str, amount: i64) {
    counter!(
        names::LEDGER_TRANSACTIONS_TOTAL,
        "type" => tx_type.to_string()
    )
    .increment(1);

    counter!(
        names::LEDGER_CREDITS_TOTAL,
        "type" => tx_type.to_string()
    )
    .increment(amount.unsigned_abs());
}

/// Record a lost compare-and-swap race on a ledger account.
pub fn record_ledger_conflict() {
    counter!(names::LEDGER_CONFLICTS_TOTAL).increment(1);
}
