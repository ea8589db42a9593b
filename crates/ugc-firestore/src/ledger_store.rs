//! Firestore-backed ledger store.
//!
//! Layout:
//! - `users/{uid}`: `creditBalance`, `transactionCount`, `updatedAt`
//! - `users/{uid}/credit_transactions/{txId}`: one immutable row each

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;

use ugc_models::CreditTransaction;

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::ledger::{AccountSnapshot, AccountUpdate, LedgerStore};
use crate::types::{
    from_document, to_fields, Direction, Document, Precondition, StructuredQuery,
    ToFirestoreValue, Write,
};

const USERS_COLLECTION: &str = "users";
const TRANSACTIONS_COLLECTION: &str = "credit_transactions";

const BALANCE_FIELD: &str = "creditBalance";
const COUNT_FIELD: &str = "transactionCount";
const UPDATED_AT_FIELD: &str = "updatedAt";

pub struct FirestoreLedgerStore {
    client: FirestoreClient,
}

impl FirestoreLedgerStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    fn transactions_collection(user_id: &str) -> String {
        format!("{}/{}/{}", USERS_COLLECTION, user_id, TRANSACTIONS_COLLECTION)
    }
}

#[async_trait]
impl LedgerStore for FirestoreLedgerStore {
    async fn load_account(&self, user_id: &str) -> FirestoreResult<AccountSnapshot> {
        let Some(doc) = self.client.get_document(USERS_COLLECTION, user_id).await? else {
            return Ok(AccountSnapshot::empty(user_id));
        };

        Ok(AccountSnapshot {
            user_id: user_id.to_string(),
            balance: doc.get::<i64>(BALANCE_FIELD).unwrap_or(0),
            transaction_count: doc.get::<u64>(COUNT_FIELD).unwrap_or(0),
            version: doc.update_time.clone(),
        })
    }

    async fn commit(
        &self,
        snapshot: &AccountSnapshot,
        update: AccountUpdate,
        tx: &CreditTransaction,
    ) -> FirestoreResult<()> {
        let mut account_fields = HashMap::new();
        account_fields.insert(BALANCE_FIELD.to_string(), update.balance.to_firestore_value());
        account_fields.insert(
            COUNT_FIELD.to_string(),
            update.transaction_count.to_firestore_value(),
        );
        account_fields.insert(UPDATED_AT_FIELD.to_string(), Utc::now().to_firestore_value());

        let account_precondition = match &snapshot.version {
            Some(update_time) => Precondition::updated_at(update_time.clone()),
            None => Precondition::must_not_exist(),
        };

        let account_write = Write::update(Document::named(
            self.client.document_name(USERS_COLLECTION, &snapshot.user_id),
            account_fields,
        ))
        .with_mask(&[BALANCE_FIELD, COUNT_FIELD, UPDATED_AT_FIELD])
        .with_precondition(account_precondition);

        let tx_write = Write::update(Document::named(
            self.client
                .document_name(&Self::transactions_collection(&snapshot.user_id), &tx.id),
            to_fields(tx, &["createdAt"])?,
        ))
        .with_precondition(Precondition::must_not_exist());

        self.client.commit(vec![account_write, tx_write]).await?;
        Ok(())
    }

    async fn transaction_exists(&self, user_id: &str, tx_id: &str) -> FirestoreResult<bool> {
        Ok(self
            .client
            .get_document(&Self::transactions_collection(user_id), tx_id)
            .await?
            .is_some())
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        offset: u32,
        limit: u32,
    ) -> FirestoreResult<Vec<CreditTransaction>> {
        let query = StructuredQuery::collection(TRANSACTIONS_COLLECTION)
            .order_by("createdAt", Direction::Descending)
            .offset(offset)
            .limit(limit);

        let docs = self
            .client
            .run_query(&format!("{}/{}", USERS_COLLECTION, user_id), query)
            .await?;

        docs.iter().map(from_document::<CreditTransaction>).collect()
    }
}
