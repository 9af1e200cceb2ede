use crate::common::{anon, setup};
use serde_json::{Value, json};
use sqlrest::{ErrorKind, Sqlrest};

async fn names(db: &Sqlrest, table: &str, params: &[(&str, &str)]) -> Vec<Value> {
    let mut query = vec![("select", "name"), ("order", "id")];
    query.extend_from_slice(params);
    db.execute_query(table, query, anon())
        .await
        .unwrap()
        .into_iter()
        .map(|row| row["name"].clone())
        .collect()
}

#[tokio::test]
async fn comparison_operators() {
    let db = setup().await;
    assert_eq!(
        names(&db, "instruments", &[("id", "gt.2")]).await,
        [json!("viola"), json!("oboe")]
    );
    assert_eq!(
        names(&db, "instruments", &[("id", "lte.1")]).await,
        [json!("flute")]
    );
    assert_eq!(
        names(&db, "instruments", &[("section_id", "neq.2")]).await,
        [json!("violin"), json!("viola")]
    );
    assert_eq!(
        names(&db, "instruments", &[("id", "gte.2"), ("id", "lt.4")]).await,
        [json!("violin"), json!("viola")]
    );
}

#[tokio::test]
async fn list_and_null_operators() {
    let db = setup().await;
    assert_eq!(
        names(&db, "instruments", &[("id", "in.(1,3)")]).await,
        [json!("flute"), json!("viola")]
    );
    assert_eq!(
        names(&db, "instruments", &[("id", "not.in.(1,2)")]).await,
        [json!("viola"), json!("oboe")]
    );
    assert_eq!(
        names(&db, "instruments", &[("tuning", "not.is.null")]).await,
        [json!("flute")]
    );
    assert_eq!(
        names(&db, "players", &[("spare_instrument_id", "is.null")]).await,
        [json!("bo")]
    );
}

#[tokio::test]
async fn like_is_case_sensitive_and_ilike_is_not() {
    let db = setup().await;
    assert_eq!(
        names(&db, "instruments", &[("name", "like.vi*")]).await,
        [json!("violin"), json!("viola")]
    );
    assert!(names(&db, "instruments", &[("name", "like.VI*")]).await.is_empty());
    assert_eq!(
        names(&db, "instruments", &[("name", "ilike.VI%")]).await,
        [json!("violin"), json!("viola")]
    );
    assert_eq!(
        names(&db, "instruments", &[("name", "like.viol_")]).await,
        [json!("viola")]
    );
}

#[tokio::test]
async fn ordering_and_pagination() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "players",
            [
                ("select", "name"),
                ("order", "spare_instrument_id.asc.nullsfirst"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        [json!({"name": "bo"}), json!({"name": "cy"}), json!({"name": "ada"})]
    );

    assert_eq!(
        names(&db, "instruments", &[("limit", "2"), ("offset", "1")]).await,
        [json!("violin"), json!("viola")]
    );

    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments(name)"),
                ("id", "eq.1"),
                ("instruments.order", "name.desc"),
                ("instruments.limit", "1"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        [json!({"name": "strings", "instruments": [{"name": "violin"}]})]
    );
}

#[tokio::test]
async fn uncoercible_value_is_rejected_before_execution() {
    let db = setup().await;
    let err = db
        .execute_query("instruments", [("section_id", "eq.abc")], anon())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFilter);
    assert_eq!(err.subject(), Some("section_id"));
}

#[tokio::test]
async fn unknown_names_are_not_found() {
    let db = setup().await;

    let err = db
        .execute_query("instruments", [("select", "name,pitch")], anon())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.subject(), Some("pitch"));

    let err = db
        .execute_query("drums", [("select", "*")], anon())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.code(), "42P01");

    let err = db
        .execute_query("instruments", [("pitch", "eq.1")], anon())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn malformed_surface_syntax() {
    let db = setup().await;
    for query in [
        [("select", "name,instruments(")],
        [("name", "approx.flute")],
        [("limit", "many")],
    ] {
        let err = db
            .execute_query("orchestral_sections", query, anon())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse, "{query:?}");
    }

    let err = db
        .execute_query("orchestral_sections", [("drums.limit", "1")], anon())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}
