//! Pattern store persistence and concurrency tests
//!
//! Outcomes for one signature arrive from many targets at once; every update
//! must land, both in memory and in the database.

use approx::assert_relative_eq;
use healer_common::{ApprovalPolicy, DiagnosisType, PatternSignature};
use healerd::db::HealerDb;
use healerd::patterns::PatternStore;
use std::sync::Arc;
use tempfile::TempDir;

fn wsod(culprit: &str) -> PatternSignature {
    PatternSignature::new(DiagnosisType::Wsod, "plugin_fatal_error", Some(culprit.into()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_outcomes_persist_without_loss() {
    let dir = TempDir::new().unwrap();
    let db = HealerDb::open(&dir.path().join("healer.db")).await.unwrap();
    let store = Arc::new(PatternStore::load(db.clone(), ApprovalPolicy::default()).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..24 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let commands = vec![format!("wp plugin deactivate hello --path=/srv/site{}", i)];
            store
                .record_outcome(&wsod("hello"), &commands, i % 4 != 0)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let pattern = store.lookup(&wsod("hello")).await.unwrap();
    assert_eq!(pattern.success_count, 18);
    assert_eq!(pattern.failure_count, 6);
    assert_relative_eq!(pattern.confidence, 0.75);
    assert!(!pattern.auto_approved);

    // A fresh store sees exactly what was written
    let reloaded = PatternStore::load(db, ApprovalPolicy::default()).await.unwrap();
    let stored = reloaded.lookup(&wsod("hello")).await.unwrap();
    assert_eq!(stored.success_count, 18);
    assert_eq!(stored.failure_count, 6);
    assert_relative_eq!(stored.confidence, 0.75);
}

#[tokio::test]
async fn test_promotion_and_graceful_revocation() {
    let db = HealerDb::open_in_memory().await.unwrap();
    let store = PatternStore::load(db, ApprovalPolicy::default()).await.unwrap();
    let sig = wsod("akismet");
    let commands = vec!["wp plugin deactivate akismet".to_string()];

    for _ in 0..2 {
        store.record_outcome(&sig, &commands, true).await.unwrap();
    }
    assert!(!store.lookup(&sig).await.unwrap().auto_approved);

    let third = store.record_outcome(&sig, &commands, true).await.unwrap();
    assert!(third.auto_approved);
    assert_relative_eq!(third.confidence, 1.0);

    // Build up history so one failure keeps confidence above 0.9
    for _ in 0..7 {
        store.record_outcome(&sig, &commands, true).await.unwrap();
    }
    let one_failure = store.record_outcome(&sig, &commands, false).await.unwrap();
    assert!(one_failure.auto_approved);
    assert_relative_eq!(one_failure.confidence, 10.0 / 11.0);

    let second_failure = store.record_outcome(&sig, &commands, false).await.unwrap();
    assert!(!second_failure.auto_approved);
    assert_relative_eq!(second_failure.confidence, 10.0 / 12.0);
}

#[tokio::test]
async fn test_revoke_on_failure_policy() {
    let policy = ApprovalPolicy {
        revoke_on_failure: true,
        ..ApprovalPolicy::default()
    };
    let store = PatternStore::in_memory(policy);
    let sig = wsod("jetpack");

    for _ in 0..10 {
        store.record_outcome(&sig, &[], true).await.unwrap();
    }
    assert!(store.lookup(&sig).await.unwrap().auto_approved);

    let failed = store.record_outcome(&sig, &[], false).await.unwrap();
    assert!(!failed.auto_approved);
}

#[tokio::test]
async fn test_lookup_never_creates() {
    let store = PatternStore::in_memory(ApprovalPolicy::default());
    assert!(store.lookup(&wsod("missing")).await.is_none());
    assert!(store.list().await.is_empty());
}
