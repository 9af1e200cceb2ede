use crate::common::{anon, load, setup};
use serde_json::json;
use sqlrest::{
    Config, EmbedFilterMode, EmbedNode, Error, ErrorKind, FilterClause, SelectionNode, Sqlrest,
};

#[tokio::test]
async fn flute_embeds_its_section() {
    let db = Sqlrest::open(Config::default()).unwrap();
    load(
        &db,
        "CREATE TABLE orchestral_sections (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE instruments (
             id INTEGER PRIMARY KEY,
             section_id INTEGER REFERENCES orchestral_sections(id),
             name TEXT
         );
         INSERT INTO orchestral_sections VALUES (1, 'strings'), (2, 'woodwinds');
         INSERT INTO instruments VALUES (1, 2, 'flute'), (2, 1, 'violin');",
    )
    .await;

    let node = SelectionNode::new("instruments")
        .columns(["name", "section_id"])
        .embed(EmbedNode::new("orchestral_sections").columns(["id", "name"]))
        .filter(FilterClause::eq("section_id", 2));
    let rows = db.execute(&node, anon()).await.unwrap();

    assert_eq!(
        rows,
        vec![json!({
            "name": "flute",
            "section_id": 2,
            "orchestral_sections": {"id": 2, "name": "woodwinds"}
        })]
    );
    let keys: Vec<_> = rows[0].as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, ["name", "section_id", "orchestral_sections"]);
}

#[tokio::test]
async fn to_many_yields_empty_array_for_childless_parent() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments(name)"),
                ("order", "id"),
                ("instruments.order", "name"),
            ],
            anon(),
        )
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            json!({"name": "strings", "instruments": [{"name": "viola"}, {"name": "violin"}]}),
            json!({"name": "woodwinds", "instruments": [{"name": "flute"}, {"name": "oboe"}]}),
            json!({"name": "percussion", "instruments": []}),
        ]
    );
}

#[tokio::test]
async fn to_one_without_target_is_null() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "members",
            [("select", "name,mentor:mentor_id(name)"), ("order", "id")],
            anon(),
        )
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            json!({"name": "root", "mentor": null}),
            json!({"name": "left", "mentor": {"name": "root"}}),
            json!({"name": "right", "mentor": {"name": "root"}}),
        ]
    );
}

#[tokio::test]
async fn self_reference_needs_a_hint_for_children() {
    let db = setup().await;
    let err = db
        .execute_query("members", [("select", "name,members(name)")], anon())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousRelationship);

    let rows = db
        .execute_query(
            "members",
            [
                ("select", "name,mentees:members!mentor_id(name)"),
                ("id", "eq.1"),
                ("mentees.order", "id"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![json!({"name": "root", "mentees": [{"name": "left"}, {"name": "right"}]})]
    );
}

#[tokio::test]
async fn unique_reverse_key_embeds_one_object() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "orchestral_sections",
            [("select", "name,section_leads(player_id)"), ("order", "id")],
            anon(),
        )
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            json!({"name": "strings", "section_leads": {"player_id": 2}}),
            json!({"name": "woodwinds", "section_leads": {"player_id": 1}}),
            json!({"name": "percussion", "section_leads": null}),
        ]
    );
}

#[tokio::test]
async fn two_foreign_keys_are_ambiguous_without_hint() {
    let db = setup().await;
    for (table, select) in [
        ("players", "name,instruments(name)"),
        ("instruments", "name,players(name)"),
    ] {
        let err = db
            .execute_query(table, [("select", select)], anon())
            .await
            .unwrap_err();
        match err {
            Error::AmbiguousRelationship { mut candidates, .. } => {
                candidates.sort();
                assert_eq!(candidates, ["players_main_fk", "players_spare_fk"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn hint_selects_exactly_one_constraint() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "players",
            [
                ("select", "name,spare:instruments!players_spare_fk(name)"),
                ("order", "id"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            json!({"name": "ada", "spare": {"name": "oboe"}}),
            json!({"name": "bo", "spare": null}),
            json!({"name": "cy", "spare": {"name": "violin"}}),
        ]
    );

    let rows = db
        .execute_query(
            "instruments",
            [
                ("select", "name,players!players_main_fk(name)"),
                ("id", "eq.2"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"name": "violin", "players": [{"name": "bo"}]})]);
}

#[tokio::test]
async fn unknown_hint_finds_no_relationship() {
    let db = setup().await;
    let err = db
        .execute_query(
            "players",
            [("select", "name,instruments!players_other_fk(name)")],
            anon(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoRelationshipFound);
}

#[tokio::test]
async fn embed_filter_narrows_without_dropping_parents() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments(name)"),
                ("instruments.name", "eq.flute"),
                ("order", "id"),
            ],
            anon(),
        )
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            json!({"name": "strings", "instruments": []}),
            json!({"name": "woodwinds", "instruments": [{"name": "flute"}]}),
            json!({"name": "percussion", "instruments": []}),
        ]
    );
}

#[tokio::test]
async fn inner_embed_drops_unmatched_parents() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments!inner(name)"),
                ("instruments.name", "eq.flute"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![json!({"name": "woodwinds", "instruments": [{"name": "flute"}]})]
    );

    let rows = db
        .execute_query(
            "players",
            [
                ("select", "name,spare:instruments!players_spare_fk!inner(name)"),
                ("order", "id"),
            ],
            anon(),
        )
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, [json!("ada"), json!("cy")]);
}

#[tokio::test]
async fn require_mode_applies_to_every_embed_unless_left() {
    let db = crate::common::orchestra(
        Config::default().with_embed_filter(EmbedFilterMode::Require),
    )
    .await;

    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments(name)"),
                ("instruments.name", "eq.violin"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![json!({"name": "strings", "instruments": [{"name": "violin"}]})]
    );

    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments!left(name)"),
                ("instruments.name", "eq.violin"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn nested_embeds_at_every_level() {
    let db = setup().await;

    // joined to-one inside joined to-one
    let rows = db
        .execute_query(
            "players",
            [
                (
                    "select",
                    "name,main:instruments!players_main_fk(name,section:orchestral_sections(name))",
                ),
                ("id", "eq.1"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![json!({"name": "ada", "main": {"name": "flute", "section": {"name": "woodwinds"}}})]
    );

    // to-many with a nested to-many inside the JSON aggregate
    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments(name,players!players_main_fk(name))"),
                ("id", "eq.2"),
                ("instruments.order", "name"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![json!({
            "name": "woodwinds",
            "instruments": [
                {"name": "flute", "players": [{"name": "ada"}]},
                {"name": "oboe", "players": []}
            ]
        })]
    );

    // to-one nested inside a to-many aggregate
    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "name,instruments(name,section:orchestral_sections(name))"),
                ("id", "eq.1"),
                ("instruments.order", "name"),
                ("instruments.limit", "1"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![json!({
            "name": "strings",
            "instruments": [{"name": "viola", "section": {"name": "strings"}}]
        })]
    );
}

#[tokio::test]
async fn blobs_render_as_hex_text() {
    let db = setup().await;
    let rows = db
        .execute_query(
            "instruments",
            [("select", "name,tuning"), ("id", "eq.1")],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"name": "flute", "tuning": "\\x0a0b"})]);

    let rows = db
        .execute_query(
            "orchestral_sections",
            [
                ("select", "instruments(tuning)"),
                ("id", "eq.2"),
                ("instruments.id", "eq.1"),
            ],
            anon(),
        )
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"instruments": [{"tuning": "\\x0a0b"}]})]);
}

#[tokio::test]
async fn star_expands_in_catalog_order() {
    let db = setup().await;
    let rows = db
        .execute_query("orchestral_sections", [("select", "*"), ("id", "eq.3")], anon())
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({"id": 3, "name": "percussion"})]);

    let keys: Vec<_> = rows[0].as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, ["id", "name"]);
}
