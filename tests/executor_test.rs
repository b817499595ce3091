//! Integration tests for statement execution: replay after a lost
//! connection, error policies and the implicit transaction on write.

mod common;

use common::{LOST, MockDriver, auto_trx, open_mock, open_with, test_config};
use db_client::config::ClientFlags;
use db_client::db::{Client, ErrorPolicy, FlushMode, TrxState};
use db_client::error::FailureClass;
use db_client::DbError;
use serde_json::json;

#[tokio::test]
async fn test_lost_connection_is_replayed_once() {
    let mut driver = MockDriver::new();
    driver.fail_next("SELECT", LOST);
    let mut client = open_with(driver, ClientFlags::default()).await;

    let handle = client.query("SELECT 1", "reader").await.unwrap();

    assert!(!handle.is_failed());
    assert_eq!(client.driver().verbs(), ["SELECT", "SELECT"]);
    assert_eq!(client.driver().connects, 2);
    assert_eq!(client.query_count(), 2);
    assert!(client.last_error().is_none());
}

#[tokio::test]
async fn test_lost_connection_resets_transaction_and_callbacks() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.begin("outer").await.unwrap();
    client
        .on_transaction_idle("never", |_c| {
            Box::pin(async move { Err::<(), DbError>(DbError::internal("must not run")) })
        })
        .await
        .unwrap();
    client.driver_mut().fail_next("UPDATE", LOST);

    client.query("UPDATE page SET x = 1", "writer").await.unwrap();

    assert_eq!(client.trx_state(), TrxState::Idle);
    assert!(!client.write_pending());
    assert_eq!(client.driver().verbs(), ["BEGIN", "UPDATE", "UPDATE"]);
    // nothing queued survives the reconnect
    client.commit("outer", FlushMode::Flush).await.unwrap();
}

#[tokio::test]
async fn test_second_loss_is_a_hard_error() {
    let mut driver = MockDriver::new();
    driver.fail_next("SELECT", LOST);
    driver.fail_next("SELECT", LOST);
    let mut client = open_with(driver, ClientFlags::default()).await;

    let err = client.query("SELECT 1", "reader").await.unwrap_err();

    assert_eq!(err.code(), Some(LOST));
    assert!(matches!(
        err,
        DbError::Query {
            class: FailureClass::LostConnection,
            ..
        }
    ));
    assert_eq!(client.driver().connects, 2);
    assert_eq!(client.error_count(), 1);
}

#[tokio::test]
async fn test_failed_reconnect_closes_client() {
    let mut client = open_mock(ClientFlags::default()).await;
    client.driver_mut().fail_next("SELECT", LOST);
    client.driver_mut().fail_connect = true;

    let err = client.query("SELECT 1", "reader").await.unwrap_err();

    assert!(matches!(err, DbError::Connection { .. }));
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_error_raised_with_context() {
    let mut client = open_mock(ClientFlags::default()).await;
    client.driver_mut().fail_next("SELECT", "1064");

    let err = client.query("SELECT * FROM", "broken").await.unwrap_err();

    match err {
        DbError::Query {
            code, sql, caller, ..
        } => {
            assert_eq!(code, "1064");
            assert_eq!(sql, "SELECT * FROM");
            assert_eq!(caller, "broken");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(client.last_error().unwrap().code, "1064");
}

#[tokio::test]
async fn test_suppress_policy_returns_failed() {
    let mut client = open_mock(ClientFlags::default()).await;
    client.driver_mut().fail_next("SELECT", "1146");

    let handle = client
        .query_with("SELECT * FROM missing", "lookup", ErrorPolicy::Suppress)
        .await
        .unwrap();

    assert!(handle.is_failed());
    assert_eq!(client.error_count(), 1);
    assert_eq!(client.last_error().unwrap().class, FailureClass::Other);

    client.query("SELECT 1", "lookup").await.unwrap();
    assert!(client.last_error().is_none());
}

#[tokio::test]
async fn test_ignore_errors_flag_returns_failed() {
    let flags = ClientFlags {
        ignore_errors: true,
        ..ClientFlags::default()
    };
    let mut client = open_mock(flags).await;
    client.driver_mut().fail_next("UPDATE", "1064");

    let handle = client.query("UPDATE page SET", "writer").await.unwrap();
    assert!(handle.is_failed());
}

#[tokio::test]
async fn test_closed_client_rejects_queries() {
    let mut client = open_mock(ClientFlags::default()).await;
    client.close().await.unwrap();

    let err = client.query("SELECT 1", "late").await.unwrap_err();
    assert!(err.to_string().contains("already closed"));
    assert!(client.driver().statements.is_empty());
}

#[tokio::test]
async fn test_statements_carry_trace_comment() {
    let config = test_config(ClientFlags::default()).with_actor("Alice");
    let mut client = Client::open(MockDriver::new(), config).await.unwrap();

    client.query("SELECT 1", "Page::load").await.unwrap();
    client.query("COMMIT", "Page::load").await.unwrap();

    assert_eq!(
        client.driver().statements,
        ["SELECT /* Page::load Alice */ 1", "COMMIT /* Page::load Alice */"]
    );
}

#[tokio::test]
async fn test_auto_trx_opens_on_first_write_only() {
    let mut client = open_mock(auto_trx()).await;

    client.query("SELECT 1", "reader").await.unwrap();
    assert_eq!(client.trx_level(), 0);
    assert!(!client.done_writes());

    client.query("INSERT INTO t (a) VALUES (1)", "writer").await.unwrap();
    client.query("INSERT INTO t (a) VALUES (2)", "writer").await.unwrap();

    assert_eq!(client.trx_state(), TrxState::OpenAutomatic);
    assert!(client.done_writes());
    assert_eq!(
        client.driver().verbs(),
        ["SELECT", "BEGIN", "INSERT", "INSERT"]
    );
    assert!(client.transaction_info().unwrap().done_writes);
}

#[tokio::test]
async fn test_without_auto_trx_writes_run_bare() {
    let mut client = open_mock(ClientFlags::default()).await;

    client.query("DELETE FROM t WHERE a = 1", "writer").await.unwrap();

    assert_eq!(client.trx_level(), 0);
    assert_eq!(client.driver().verbs(), ["DELETE"]);
    assert!(client.done_writes());
}

#[tokio::test]
async fn test_safe_query_substitutes_arguments() {
    let mut client = open_mock(ClientFlags::default()).await;

    client
        .safe_query(
            "SELECT ! FROM page WHERE title = ?",
            &[json!("COUNT(*)"), json!("Main Page")],
            "reader",
        )
        .await
        .unwrap();

    assert_eq!(
        client.driver().plain_statements(),
        ["SELECT COUNT(*) FROM page WHERE title = 'Main Page'"]
    );
}

#[tokio::test]
async fn test_ping_reconnects() {
    let mut client = open_mock(ClientFlags::default()).await;
    client.driver_mut().fail_next("SELECT", LOST);

    client.ping().await.unwrap();
    assert_eq!(client.driver().connects, 2);
}

#[tokio::test]
async fn test_ping_failure_keeps_transaction() {
    let mut client = open_mock(ClientFlags::default()).await;
    client.begin("writer").await.unwrap();
    client.driver_mut().fail_next("SELECT", "1064");

    let err = client.ping().await.unwrap_err();

    assert!(matches!(
        err,
        DbError::Query {
            class: FailureClass::Other,
            ..
        }
    ));
    assert_eq!(client.driver().connects, 1);
    assert_eq!(client.trx_level(), 1);
    assert_eq!(client.error_count(), 1);
}

#[tokio::test]
async fn test_open_fails_with_connection_error() {
    let mut driver = MockDriver::new();
    driver.fail_connect = true;

    let err = Client::open(driver, test_config(ClientFlags::default()))
        .await
        .err()
        .expect("connect failure surfaces");

    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.suggestion().is_some());
}

#[tokio::test]
async fn test_buffer_flag_reaches_driver() {
    let mut client = open_mock(ClientFlags::default()).await;
    assert_eq!(client.driver().buffered, Some(false));

    client.set_flags(ClientFlags {
        buffer: true,
        ..client.flags()
    });
    assert_eq!(client.driver().buffered, Some(true));
}
