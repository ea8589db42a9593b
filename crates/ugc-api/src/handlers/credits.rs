//! Credit balance and history handlers.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use ugc_models::CreditTransaction;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreditHistoryQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    /// Clamped to 1..=100.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditHistoryResponse {
    pub transactions: Vec<CreditTransaction>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

/// GET /api/credits/balance
pub async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.ledger.balance(&user.uid).await?;
    Ok(Json(BalanceResponse { balance }))
}

/// GET /api/credits/history
pub async fn get_credit_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CreditHistoryQuery>,
) -> ApiResult<Json<CreditHistoryResponse>> {
    let page = state
        .ledger
        .history(&user.uid, query.page, query.limit)
        .await?;
    let seen = u64::from(page.page - 1) * u64::from(page.limit) + page.transactions.len() as u64;

    Ok(Json(CreditHistoryResponse {
        has_more: seen < page.total,
        transactions: page.transactions,
        total: page.total,
        page: page.page,
        limit: page.limit,
    }))
}
