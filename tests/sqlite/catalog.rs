use std::sync::Arc;

use crate::common::{ORCHESTRA, anon, load, service, setup};
use serde_json::json;
use sqlrest::{Catalog, Config, ErrorKind, Sqlrest};

#[tokio::test]
async fn snapshot_describes_tables_and_named_constraints() {
    let db = setup().await;
    let snapshot = db.catalog().await.unwrap();

    let players = snapshot.table("players").unwrap();
    let columns: Vec<_> = players.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        columns,
        ["id", "name", "owner_id", "main_instrument_id", "spare_instrument_id"]
    );

    let mut names: Vec<_> = snapshot
        .foreign_keys("players", "instruments")
        .into_iter()
        .map(|e| e.constraint_name.to_string())
        .collect();
    names.sort();
    assert_eq!(names, ["players_main_fk", "players_spare_fk"]);

    // Unnamed constraints get the PostgreSQL-style default name
    let section = snapshot.foreign_keys("instruments", "orchestral_sections");
    assert_eq!(section.len(), 1);
    assert_eq!(section[0].constraint_name, "instruments_section_id_fkey");

    // Implicit target columns resolve to the primary key
    let lead = snapshot.foreign_keys("section_leads", "orchestral_sections");
    assert_eq!(lead[0].target_columns.as_slice(), ["id"]);
}

#[tokio::test]
async fn ddl_is_visible_to_the_next_request() {
    let db = setup().await;
    let before = db.catalog().await.unwrap();
    assert!(Arc::ptr_eq(&before, &db.catalog().await.unwrap()));

    let err = db
        .execute_query("conductors", [("select", "name")], anon())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    load(
        &db,
        "CREATE TABLE conductors (
             id INTEGER PRIMARY KEY,
             name TEXT,
             section_id INTEGER REFERENCES orchestral_sections(id)
         );
         INSERT INTO conductors VALUES (1, 'clara', 2);",
    )
    .await;

    let rows = db
        .execute_query(
            "conductors",
            [("select", "name,orchestral_sections(name)")],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        [json!({"name": "clara", "orchestral_sections": {"name": "woodwinds"}})]
    );
    assert!(db.catalog().await.unwrap().version() > before.version());
}

#[tokio::test]
async fn explicit_invalidation_reloads() {
    let db = setup().await;
    let before = db.catalog().await.unwrap();
    db.invalidate_catalog();
    let after = db.catalog().await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.table_count(), after.table_count());
}

#[tokio::test]
async fn instances_do_not_share_in_memory_databases() {
    let a = setup().await;
    let b = Sqlrest::open(Config::default()).unwrap();
    assert!(a.catalog().await.unwrap().table("players").is_some());
    assert_eq!(b.catalog().await.unwrap().table_count(), 0);
}

#[tokio::test]
async fn file_database_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("orchestra.db");
    let config_path = dir.path().join("sqlrest.toml");
    std::fs::write(
        &config_path,
        format!(
            "[database]\npath = {:?}\npool_size = 2\n\n[session]\nstatement_timeout_ms = 2000\n",
            db_path.to_string_lossy()
        ),
    )
    .unwrap();

    let config = Config::load_from(&config_path).unwrap();
    assert_eq!(config.database.pool_size, 2);

    {
        let db = Sqlrest::open(config.clone()).unwrap();
        load(&db, ORCHESTRA).await;
        db.shutdown().await;
    }

    let db = Sqlrest::open(config).unwrap();
    let rows = db
        .execute_query(
            "instruments",
            [("select", "name"), ("section_id", "eq.1"), ("order", "name")],
            service(),
        )
        .await
        .unwrap();
    assert_eq!(rows, [json!({"name": "viola"}), json!({"name": "violin"})]);
}
