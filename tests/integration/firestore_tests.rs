//! Firestore integration tests.

use std::sync::Arc;

use ugc_firestore::{
    CreditContext, CreditLedger, FirestoreClient, FirestoreLedgerStore, FirestoreVideoStore,
    LedgerError, VideoStore,
};
use ugc_models::{
    attempt_debit_key, GeneratedScript, ProductData, TransactionType, Video, VideoId,
    VideoStatus, VideoStyle,
};

async fn client() -> FirestoreClient {
    dotenvy::dotenv().ok();
    FirestoreClient::from_env()
        .await
        .expect("Failed to create Firestore client")
}

fn sample_video(user_id: &str) -> Video {
    let script = GeneratedScript {
        script: "Three reasons this backpack survives every commute.".to_string(),
        estimated_duration: 15,
        scenes: Vec::new(),
    };
    Video::with_script(
        VideoId::new(),
        user_id,
        &ProductData::new("Integration Backpack"),
        VideoStyle::ProductShowcase,
        &script,
    )
}

#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_firestore_connection() {
    let client = client().await;

    match client.get_document("_health", "_check").await {
        Ok(doc) => println!("Health check document present: {}", doc.is_some()),
        Err(e) => panic!("Unexpected error: {}", e),
    }
}

#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_video_store_conditional_update() {
    let store = FirestoreVideoStore::new(client().await);
    let mut video = sample_video("test_user_integration");
    store.create(&video).await.expect("Failed to create video");

    let loaded = store
        .get(&video.id)
        .await
        .expect("Failed to read video")
        .expect("video exists");
    assert_eq!(loaded.status, VideoStatus::ScriptReady);

    video.status = VideoStatus::Queued;
    let applied = store
        .update_if_status(&video, &[VideoStatus::ScriptReady])
        .await
        .expect("Failed to update video");
    assert!(applied);

    // The stored status no longer matches, so a second confirm loses.
    let applied = store
        .update_if_status(&video, &[VideoStatus::ScriptReady])
        .await
        .expect("Failed to update video");
    assert!(!applied);

    let listed = store
        .list_for_user("test_user_integration", 0, 10)
        .await
        .expect("Failed to list videos");
    assert!(listed.iter().any(|v| v.id == video.id));
}

#[tokio::test]
#[ignore = "requires Firestore credentials"]
async fn test_ledger_keyed_debit() {
    let ledger = CreditLedger::new(Arc::new(FirestoreLedgerStore::new(client().await)));
    let user_id = format!("test_ledger_{}", VideoId::new());
    let video_id = VideoId::new();

    ledger
        .grant(&user_id, 2, TransactionType::Bonus, CreditContext::new("Integration grant"))
        .await
        .expect("Failed to grant");

    let ctx = || {
        CreditContext::new("Video Generation")
            .with_key(attempt_debit_key(&video_id, 0))
            .with_video(&video_id)
    };
    let entry = ledger.deduct(&user_id, 1, ctx()).await.expect("Failed to debit");
    assert_eq!(entry.new_balance(), 1);

    let replay = ledger.deduct(&user_id, 1, ctx()).await;
    assert!(matches!(replay, Err(LedgerError::Duplicate(_))));
    assert_eq!(ledger.balance(&user_id).await.expect("balance"), 1);

    let history = ledger.history(&user_id, 1, 10).await.expect("history");
    assert_eq!(history.total, 2);
}
