//! Integration tests for transaction sequencing and deferred callbacks.

mod common;

use common::{auto_trx, open_mock};
use db_client::config::ClientFlags;
use db_client::db::{FlushMode, TrxState};
use db_client::DbError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_second_begin_commits_first() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.begin("first").await.unwrap();
    assert_eq!(client.trx_level(), 1);
    client.begin("second").await.unwrap();

    assert_eq!(client.trx_level(), 1);
    assert_eq!(client.driver().verbs(), ["BEGIN", "COMMIT", "BEGIN"]);
    assert_eq!(client.caller_warning_count(), 1);
    assert_eq!(client.transaction_info().unwrap().origin, "second");
}

#[tokio::test]
async fn test_begin_over_automatic_transaction_is_quiet() {
    let mut client = open_mock(auto_trx()).await;

    client.query("UPDATE page SET touched = 1", "writer").await.unwrap();
    assert_eq!(client.trx_state(), TrxState::OpenAutomatic);
    assert!(client.write_pending());

    client.begin("explicit").await.unwrap();
    assert_eq!(client.trx_state(), TrxState::OpenExplicit);
    assert_eq!(client.driver().verbs(), ["BEGIN", "UPDATE", "COMMIT", "BEGIN"]);
    assert_eq!(client.caller_warning_count(), 0);
}

#[tokio::test]
async fn test_commit_without_transaction_warns() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.commit("nothing", FlushMode::Normal).await.unwrap();
    assert_eq!(client.caller_warning_count(), 1);
    assert!(client.driver().statements.is_empty());

    client.commit("flush", FlushMode::Flush).await.unwrap();
    assert_eq!(client.caller_warning_count(), 1);
}

#[tokio::test]
async fn test_idle_callback_runs_immediately_when_idle() {
    let mut client = open_mock(auto_trx()).await;
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    client
        .on_transaction_idle("deferred", move |c| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                c.query("INSERT INTO log (msg) VALUES ('x')", "deferred").await?;
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    // auto-trx is off while the callback runs
    assert_eq!(client.driver().verbs(), ["INSERT"]);
    assert_eq!(client.trx_level(), 0);
    assert!(client.flags().auto_trx);
}

#[tokio::test]
async fn test_idle_callback_waits_for_commit() {
    let mut client = open_mock(ClientFlags::default()).await;
    let ran = Arc::new(AtomicUsize::new(0));

    client.begin("outer").await.unwrap();
    let counter = ran.clone();
    client
        .on_transaction_idle("deferred", move |_c| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(client.write_pending());

    client.commit("outer", FlushMode::Normal).await.unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert!(!client.write_pending());
}

#[tokio::test]
async fn test_rollback_cancels_callbacks() {
    let mut client = open_mock(ClientFlags::default()).await;
    let ran = Arc::new(AtomicUsize::new(0));

    client.begin("outer").await.unwrap();
    let idle = ran.clone();
    client
        .on_transaction_idle("idle", move |_c| {
            Box::pin(async move {
                idle.fetch_add(1, Ordering::SeqCst);
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();
    let pre = ran.clone();
    client
        .on_transaction_pre_commit_or_idle("pre", move |_c| {
            Box::pin(async move {
                pre.fetch_add(1, Ordering::SeqCst);
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();

    client.rollback("outer", FlushMode::Normal).await.unwrap();
    client.begin("again").await.unwrap();
    client.commit("again", FlushMode::Normal).await.unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(
        client.driver().verbs(),
        ["BEGIN", "ROLLBACK", "BEGIN", "COMMIT"]
    );
}

#[tokio::test]
async fn test_pre_commit_order_and_nested_registration() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.begin("outer").await.unwrap();
    client
        .on_transaction_pre_commit_or_idle("first", |c| {
            Box::pin(async move {
                c.query("UPDATE a SET x = 1", "first").await?;
                c.on_transaction_pre_commit_or_idle("nested", |c| {
                    Box::pin(async move {
                        c.query("UPDATE b SET x = 1", "nested").await?;
                        Ok::<(), DbError>(())
                    })
                })
                .await?;
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();
    client
        .on_transaction_idle("after", |c| {
            Box::pin(async move {
                c.query("UPDATE c SET x = 1", "after").await?;
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();

    client.commit("outer", FlushMode::Normal).await.unwrap();

    assert_eq!(
        client.driver().plain_statements(),
        [
            "BEGIN",
            "UPDATE a SET x = 1",
            "UPDATE b SET x = 1",
            "COMMIT",
            "UPDATE c SET x = 1",
        ]
    );
}

#[tokio::test]
async fn test_pre_commit_callback_cannot_control_transaction() {
    let mut client = open_mock(ClientFlags::default()).await;
    let refused = Arc::new(Mutex::new(Vec::new()));

    client.begin("outer").await.unwrap();
    let seen = refused.clone();
    client
        .on_transaction_pre_commit_or_idle("pre", move |c| {
            Box::pin(async move {
                let begin = c.begin("pre").await;
                let commit = c.commit("pre", FlushMode::Normal).await;
                let rollback = c.rollback("pre", FlushMode::Normal).await;
                let mut seen = seen.lock().unwrap();
                for outcome in [begin, commit, rollback] {
                    seen.push(matches!(outcome, Err(DbError::Transaction { .. })));
                }
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();

    client.commit("outer", FlushMode::Normal).await.unwrap();

    assert_eq!(*refused.lock().unwrap(), [true, true, true]);
    assert_eq!(client.driver().verbs(), ["BEGIN", "COMMIT"]);
    assert_eq!(client.trx_level(), 0);
}

#[tokio::test]
async fn test_callback_errors_surface_once_after_all_ran() {
    let mut client = open_mock(ClientFlags::default()).await;
    let ran = Arc::new(AtomicUsize::new(0));

    client.begin("outer").await.unwrap();
    for (i, fails) in [true, true, false].into_iter().enumerate() {
        let counter = ran.clone();
        client
            .on_transaction_idle("cb", move |_c| {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if fails {
                        return Err(DbError::invalid_input(format!("callback {i} failed")));
                    }
                    Ok::<(), DbError>(())
                })
            })
            .await
            .unwrap();
    }

    let err = client.commit("outer", FlushMode::Normal).await.unwrap_err();
    assert!(err.to_string().contains("callback 1 failed"));
    assert_eq!(ran.load(Ordering::SeqCst), 3);

    // the queue is drained, nothing fires twice
    client.commit("again", FlushMode::Flush).await.unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_idle_callback_rolls_back_its_transaction() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.begin("outer").await.unwrap();
    client
        .on_transaction_idle("cb", |c| {
            Box::pin(async move {
                c.begin("cb").await?;
                c.query("UPDATE page SET x = 1", "cb").await?;
                Err::<(), DbError>(DbError::invalid_input("callback gave up"))
            })
        })
        .await
        .unwrap();

    assert!(client.commit("outer", FlushMode::Normal).await.is_err());
    assert_eq!(client.trx_level(), 0);
    assert_eq!(
        client.driver().verbs(),
        ["BEGIN", "COMMIT", "BEGIN", "UPDATE", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_close_flushes_explicit_transaction() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.begin("outer").await.unwrap();
    client.query("UPDATE page SET x = 1", "outer").await.unwrap();
    client.close().await.unwrap();

    assert_eq!(client.driver().verbs(), ["BEGIN", "UPDATE", "COMMIT"]);
    assert!(client.driver().closed);
    assert!(!client.is_open());
    assert!(client.caller_warning_count() >= 1);
}

#[tokio::test]
async fn test_close_with_callbacks_left_pending_fails() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.begin("outer").await.unwrap();
    client
        .on_transaction_idle("reopens", |c| {
            Box::pin(async move {
                c.begin("reopens").await?;
                c.on_transaction_idle("stranded", |_c| {
                    Box::pin(async move { Ok::<(), DbError>(()) })
                })
                .await?;
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();

    let err = client.close().await.unwrap_err();
    assert!(matches!(err, DbError::Transaction { .. }));
    assert!(client.is_open());
}

#[tokio::test]
async fn test_transaction_statements_recorded_as_last_query() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.begin("writer").await.unwrap();
    assert_eq!(client.last_query(), "BEGIN");

    client.query("UPDATE page SET len = 1", "writer").await.unwrap();
    assert_eq!(client.last_query(), "UPDATE page SET len = 1");

    client.commit("writer", FlushMode::Normal).await.unwrap();
    assert_eq!(client.last_query(), "COMMIT");
}
