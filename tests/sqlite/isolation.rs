use std::sync::Arc;

use crate::common::{ORCHESTRA, load, scalar, service};
use serde_json::json;
use sqlrest::{Config, ErrorKind, SessionContext, Sqlrest};

const ROLES: [&str; 3] = ["anon", "authenticated", "service_role"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_only_see_their_own_role() {
    let db = Arc::new(Sqlrest::open(Config::in_memory(3)).unwrap());

    let mut handles = Vec::new();
    for i in 0..48 {
        let db = Arc::clone(&db);
        handles.push(tokio::spawn(async move {
            let role = ROLES[i % ROLES.len()];
            let user = format!("user-{i}");
            let ctx = SessionContext::new(role).with_user(user.clone());
            let rows = db
                .execute_raw("SELECT current_role(), auth_uid()", &[], ctx)
                .await
                .unwrap();
            assert_eq!(rows.rows[0][0].as_text(), Some(role), "request {i}");
            assert_eq!(rows.rows[0][1].as_text(), Some(user.as_str()), "request {i}");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every slot is back and carries the default identity
    assert_eq!(db.pool().idle_count(), 3);
    for _ in 0..3 {
        assert_eq!(
            scalar(&db, "SELECT current_role()", SessionContext::new("anon")).await.as_deref(),
            Some("anon")
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_slot_serves_queued_requests_in_turn() {
    let db = Arc::new(Sqlrest::open(Config::in_memory(1)).unwrap());

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let db = Arc::clone(&db);
            tokio::spawn(async move {
                let role = ROLES[i % ROLES.len()];
                let seen = scalar(
                    &db,
                    "SELECT current_setting('role')",
                    SessionContext::new(role),
                )
                .await;
                assert_eq!(seen.as_deref(), Some(role));
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn unknown_role_is_refused_and_leaves_no_trace() {
    let db = Sqlrest::open(Config::default()).unwrap();
    let err = db
        .execute_raw("SELECT 1", &[], SessionContext::new("superuser").with_user("mallory"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionSetupFailed);
    assert_eq!(err.code(), "28000");

    assert_eq!(
        scalar(&db, "SELECT current_role() || '/' || coalesce(auth_uid(), '-')", SessionContext::new("authenticated"))
            .await
            .as_deref(),
        Some("authenticated/-")
    );
}

#[tokio::test]
async fn claims_request_and_project_are_visible_to_sql() {
    let db = Sqlrest::open(Config::default()).unwrap();
    let ctx = SessionContext::new("authenticated")
        .with_user("u-1")
        .with_project("tenant-9")
        .with_claims(json!({"email": "ada@example.com"}));
    let request_id = ctx.request_id().to_string();

    let rows = db
        .execute_raw(
            "SELECT json_extract(auth_jwt(), '$.email'), json_extract(auth_jwt(), '$.sub'), \
             current_setting('app.project_id'), current_setting('request.id'), auth_role()",
            &[],
            ctx,
        )
        .await
        .unwrap();
    let row = &rows.rows[0];
    assert_eq!(row[0].as_text(), Some("ada@example.com"));
    assert_eq!(row[1].as_text(), Some("u-1"));
    assert_eq!(row[2].as_text(), Some("tenant-9"));
    assert_eq!(row[3].as_text(), Some(request_id.as_str()));
    assert_eq!(row[4].as_text(), Some("authenticated"));
}

#[tokio::test]
async fn row_level_view_filters_by_requesting_user() {
    let db = Sqlrest::open(Config::in_memory(2)).unwrap();
    load(&db, ORCHESTRA).await;
    load(
        &db,
        "CREATE VIEW my_players AS SELECT id, name FROM players WHERE owner_id = auth_uid()",
    )
    .await;

    let query = [("select", "name"), ("order", "id")];
    let ada = db
        .execute_query(
            "my_players",
            query,
            SessionContext::new("authenticated").with_user("u-ada"),
        )
        .await
        .unwrap();
    assert_eq!(ada, [json!({"name": "ada"}), json!({"name": "cy"})]);

    let bo = db
        .execute_query(
            "my_players",
            query,
            SessionContext::new("authenticated").with_user("u-bo"),
        )
        .await
        .unwrap();
    assert_eq!(bo, [json!({"name": "bo"})]);

    let nobody = db.execute_query("my_players", query, service()).await.unwrap();
    assert!(nobody.is_empty());
}
