use std::time::{Duration, Instant};

use crate::common::{scalar, setup};
use sqlrest::{Config, ErrorKind, SelectionNode, SessionContext, Sqlrest};

const RUNAWAY: &str =
    "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) SELECT max(i) FROM n";

#[tokio::test]
async fn statement_timeout_interrupts_and_restores_identity() {
    let db = Sqlrest::open(
        Config::in_memory(1).with_statement_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    let started = Instant::now();
    let err = db
        .execute_raw(RUNAWAY, &[], SessionContext::new("service_role").with_user("u-slow"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.code(), "57014");
    assert!(started.elapsed() < Duration::from_secs(5));

    // Same (only) slot, different role: must see its own identity
    let seen = scalar(
        &db,
        "SELECT current_role() || '/' || coalesce(auth_uid(), '-')",
        SessionContext::new("authenticated"),
    )
    .await;
    assert_eq!(seen.as_deref(), Some("authenticated/-"));
    assert_eq!(db.pool().idle_count(), 1);
}

#[tokio::test]
async fn session_deadline_bounds_the_statement() {
    let db = Sqlrest::open(Config::default()).unwrap();
    let ctx = SessionContext::new("authenticated").with_timeout(Duration::from_millis(50));
    let err = db.execute_raw(RUNAWAY, &[], ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let seen = scalar(&db, "SELECT current_role()", SessionContext::new("anon")).await;
    assert_eq!(seen.as_deref(), Some("anon"));
}

#[tokio::test]
async fn waiting_for_a_busy_slot_times_out() {
    let db = Sqlrest::open(Config::default()).unwrap();
    let held = db.pool().acquire(None).await.unwrap();

    let ctx = SessionContext::new("anon").with_timeout(Duration::from_millis(30));
    let err = db.execute_raw("SELECT 1", &[], ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    drop(held);
    let seen = scalar(&db, "SELECT 1", SessionContext::new("anon")).await;
    assert_eq!(seen.as_deref(), Some("1"));
}

#[tokio::test]
async fn expired_context_never_compiles() {
    let db = setup().await;
    let ctx = SessionContext::new("anon").with_deadline(Instant::now());
    let err = db
        .execute(&SelectionNode::new("instruments").star(), ctx)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}
