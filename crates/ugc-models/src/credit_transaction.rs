//! Credit ledger transaction models.
//!
//! A transaction is an immutable ledger row. The user's balance is a
//! denormalized sum of every transaction amount, and each row snapshots the
//! balance it produced so the history can be reconciled line by line.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::VideoId;

/// Kind of ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// One-time credit package purchase
    Purchase,
    /// Credits spent on a generation attempt
    Consumption,
    /// Credits returned for an attempt that did not complete
    Refund,
    /// Promotional or package bonus credits
    Bonus,
    /// Manual or payment-driven correction
    Adjustment,
    /// Credits granted by a subscription renewal
    SubscriptionCredit,
    /// Bonus credits granted by a subscription renewal
    SubscriptionBonus,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "PURCHASE",
            Self::Consumption => "CONSUMPTION",
            Self::Refund => "REFUND",
            Self::Bonus => "BONUS",
            Self::Adjustment => "ADJUSTMENT",
            Self::SubscriptionCredit => "SUBSCRIPTION_CREDIT",
            Self::SubscriptionBonus => "SUBSCRIPTION_BONUS",
        }
    }

    /// Human-readable label for history views.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Purchase => "Credit Purchase",
            Self::Consumption => "Video Generation",
            Self::Refund => "Refund",
            Self::Bonus => "Bonus Credits",
            Self::Adjustment => "Adjustment",
            Self::SubscriptionCredit => "Subscription Credits",
            Self::SubscriptionBonus => "Subscription Bonus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PURCHASE" => Some(Self::Purchase),
            "CONSUMPTION" => Some(Self::Consumption),
            "REFUND" => Some(Self::Refund),
            "BONUS" => Some(Self::Bonus),
            "ADJUSTMENT" => Some(Self::Adjustment),
            "SUBSCRIPTION_CREDIT" => Some(Self::SubscriptionCredit),
            "SUBSCRIPTION_BONUS" => Some(Self::SubscriptionBonus),
            _ => None,
        }
    }

    /// Whether this type may be used by `grant`.
    pub fn is_grant(&self) -> bool {
        matches!(
            self,
            Self::Purchase | Self::Bonus | Self::SubscriptionCredit | Self::SubscriptionBonus
        )
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    #[default]
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    /// Document id; equals the idempotency key when one was supplied
    pub id: String,

    pub user_id: String,

    #[serde(rename = "type")]
    pub tx_type: TransactionType,

    pub status: TransactionStatus,

    /// Signed amount; negative for consumption
    pub amount: i64,

    /// Balance immediately after this transaction
    pub balance_after: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,

    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        tx_type: TransactionType,
        amount: i64,
        balance_after: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            tx_type,
            status: TransactionStatus::Completed,
            amount,
            balance_after,
            video_id: None,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// Balance before this transaction was applied.
    pub fn balance_before(&self) -> i64 {
        self.balance_after - self.amount
    }
}

/// Ledger idempotency key for the debit of a generation attempt.
pub fn attempt_debit_key(video_id: &VideoId, attempt: u32) -> String {
    format!("debit:{}:{}", video_id, attempt)
}

/// Ledger idempotency key for the refund of a generation attempt.
pub fn attempt_refund_key(video_id: &VideoId, attempt: u32) -> String {
    format!("refund:{}:{}", video_id, attempt)
}

/// Ledger idempotency key for one part of a payment event (`purchase`, `bonus`, `refund`).
pub fn payment_key(event_id: &str, part: &str) -> String {
    format!("payment:{}:{}", event_id, part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_serializes_type_field() {
        let tx = CreditTransaction::new("t1", "u1", TransactionType::Consumption, -1, 4, "Video")
            .with_video_id("v1");
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "CONSUMPTION");
        assert_eq!(json["balanceAfter"], 4);
        assert_eq!(json["videoId"], "v1");
        assert_eq!(tx.balance_before(), 5);
    }

    #[test]
    fn test_keys_are_attempt_scoped() {
        let video = VideoId::from("abc");
        assert_eq!(attempt_debit_key(&video, 0), "debit:abc:0");
        assert_eq!(attempt_refund_key(&video, 1), "refund:abc:1");
        assert_eq!(payment_key("evt_9", "bonus"), "payment:evt_9:bonus");
    }

    #[test]
    fn test_grant_types() {
        assert!(TransactionType::Purchase.is_grant());
        assert!(TransactionType::SubscriptionBonus.is_grant());
        assert!(!TransactionType::Refund.is_grant());
        assert!(!TransactionType::Consumption.is_grant());
        assert_eq!(
            TransactionType::parse("SUBSCRIPTION_CREDIT"),
            Some(TransactionType::SubscriptionCredit)
        );
    }
}
