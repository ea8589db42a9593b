//! Payment provider webhook.
//!
//! Events are signed with `x-signature: sha256=<hex>` over the raw body.
//! Every ledger write is keyed by the event id, so redelivered events are
//! acknowledged without moving credits twice.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ugc_firestore::{CreditContext, LedgerError};
use ugc_models::{payment_key, TransactionType};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{verify_signature, SIGNATURE_HEADER};
use crate::state::AppState;

pub const PURCHASE_COMPLETED: &str = "purchase.completed";
pub const REFUND_ISSUED: &str = "refund.issued";

#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentData {
    pub user_id: String,
    #[serde(default)]
    pub credits: u32,
    #[serde(default)]
    pub bonus_credits: u32,
    #[serde(default)]
    pub subscription: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Processed,
    Duplicate,
    Ignored,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub status: WebhookStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

/// Outcome of one keyed ledger write.
enum Applied {
    Written(i64),
    AlreadyRecorded,
    Nothing,
}

/// POST /webhooks/payments
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&state.config.payment_webhook_secret, &body, signature) {
        warn!("Rejected payment webhook with bad signature");
        return Err(ApiError::InvalidSignature);
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("malformed payment event: {}", e)))?;
    if event.id.trim().is_empty() || event.data.user_id.trim().is_empty() {
        return Err(ApiError::validation("payment event needs an id and a userId"));
    }

    let results = match event.event_type.as_str() {
        PURCHASE_COMPLETED => purchase_completed(&state, &event).await?,
        REFUND_ISSUED => vec![refund_issued(&state, &event).await?],
        other => {
            info!(event_id = %event.id, event_type = other, "Ignoring payment event");
            metrics::record_payment_event(other, "ignored");
            return Ok(Json(WebhookResponse {
                status: WebhookStatus::Ignored,
                balance: None,
            }));
        }
    };

    let balance = results.iter().rev().find_map(|r| match r {
        Applied::Written(balance) => Some(*balance),
        _ => None,
    });
    let duplicate = balance.is_none() && results.iter().any(|r| matches!(r, Applied::AlreadyRecorded));
    let status = if duplicate {
        WebhookStatus::Duplicate
    } else {
        WebhookStatus::Processed
    };

    metrics::record_payment_event(
        &event.event_type,
        if duplicate { "duplicate" } else { "processed" },
    );
    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        user_id = %event.data.user_id,
        status = ?status,
        "Payment event handled"
    );
    Ok(Json(WebhookResponse { status, balance }))
}

async fn purchase_completed(state: &AppState, event: &PaymentEvent) -> ApiResult<Vec<Applied>> {
    let data = &event.data;
    let (base_type, bonus_type) = if data.subscription {
        (TransactionType::SubscriptionCredit, TransactionType::SubscriptionBonus)
    } else {
        (TransactionType::Purchase, TransactionType::Bonus)
    };

    let base = grant(
        state,
        event,
        data.credits,
        base_type,
        "purchase",
        format!("Purchased {} credits", data.credits),
    )
    .await?;
    let bonus = grant(
        state,
        event,
        data.bonus_credits,
        bonus_type,
        "bonus",
        format!("Bonus {} credits", data.bonus_credits),
    )
    .await?;
    Ok(vec![base, bonus])
}

async fn grant(
    state: &AppState,
    event: &PaymentEvent,
    amount: u32,
    tx_type: TransactionType,
    part: &str,
    description: String,
) -> ApiResult<Applied> {
    if amount == 0 {
        return Ok(Applied::Nothing);
    }
    let ctx = CreditContext::new(description).with_key(payment_key(&event.id, part));
    match state.ledger.grant(&event.data.user_id, amount, tx_type, ctx).await {
        Ok(entry) => {
            metrics::record_credits("grant", amount);
            Ok(Applied::Written(entry.new_balance()))
        }
        Err(LedgerError::Duplicate(_)) => Ok(Applied::AlreadyRecorded),
        Err(e) => Err(e.into()),
    }
}

async fn refund_issued(state: &AppState, event: &PaymentEvent) -> ApiResult<Applied> {
    let amount = event.data.credits.saturating_add(event.data.bonus_credits);
    if amount == 0 {
        return Ok(Applied::Nothing);
    }
    let ctx = CreditContext::new(format!("Payment refunded: {} credits", amount))
        .with_key(payment_key(&event.id, "refund"));
    match state.ledger.claw_back(&event.data.user_id, amount, ctx).await {
        Ok(entry) => {
            metrics::record_credits("claw_back", amount);
            Ok(Applied::Written(entry.new_balance()))
        }
        Err(LedgerError::Duplicate(_)) => Ok(Applied::AlreadyRecorded),
        Err(e) => Err(e.into()),
    }
}
