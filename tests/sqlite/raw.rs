use crate::common::{anon, service, setup};
use sqlrest::{SelectionNode, EmbedNode, FilterClause, SessionContext, SqlValue, shape};

#[tokio::test]
async fn writes_report_changes_and_bind_parameters() {
    let db = setup().await;
    let rows = db
        .execute_raw(
            "INSERT INTO orchestral_sections (id, name) VALUES (?1, ?2), (?3, ?4)",
            &[4.into(), "brass".into(), 5.into(), "keyboards".into()],
            service(),
        )
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(rows.changes, 2);

    let rows = db
        .execute_raw(
            "SELECT name FROM orchestral_sections WHERE id >= ?1 ORDER BY id",
            &[SqlValue::Integer(4)],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(rows.columns, ["name"]);
    assert_eq!(rows.get(1, "name"), Some(&SqlValue::Text("keyboards".into())));
    assert_eq!(rows.changes, 0);
}

#[tokio::test]
async fn compiled_sql_through_raw_path_shapes_identically() {
    let db = setup().await;
    let node = SelectionNode::new("orchestral_sections")
        .column("name")
        .embed(EmbedNode::new("instruments").column("name").order(sqlrest::OrderTerm::asc("name")))
        .filter(FilterClause::is_in("id", [1, 2]));

    let compiled = db.compile(&node, &anon()).await.unwrap();
    let raw = db
        .execute_raw(&compiled.sql, &compiled.params, anon())
        .await
        .unwrap();
    let via_raw = shape(&raw, &compiled.shape).unwrap();

    let direct = db.execute(&node, anon()).await.unwrap();
    assert_eq!(via_raw, direct);
    assert_eq!(direct.len(), 2);
}

#[tokio::test]
async fn engine_errors_keep_their_message() {
    let db = setup().await;
    let err = db
        .execute_raw("INSERT INTO players (id, name) VALUES (1, 'dup')", &[], service())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), sqlrest::ErrorKind::ExecutionFailed);
    assert!(err.to_string().contains("UNIQUE"), "{err}");

    let err = db
        .execute_raw(
            "INSERT INTO instruments (id, section_id, name) VALUES (9, 99, 'theremin')",
            &[],
            SessionContext::new("service_role"),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("FOREIGN KEY"), "{err}");
}
