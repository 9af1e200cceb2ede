//! Shared fixtures for the integration suite.

use sqlrest::{Config, SessionContext, SqlValue, Sqlrest};

/// Orchestra schema: sections, instruments, players with two foreign keys
/// into `instruments`, a one-to-one `section_leads` table and a
/// self-referencing `members` table.
pub const ORCHESTRA: &str = "
CREATE TABLE orchestral_sections (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE instruments (
    id INTEGER PRIMARY KEY,
    section_id INTEGER REFERENCES orchestral_sections(id),
    name TEXT NOT NULL,
    tuning BLOB
);
CREATE TABLE players (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT,
    main_instrument_id INTEGER,
    spare_instrument_id INTEGER,
    CONSTRAINT players_main_fk FOREIGN KEY (main_instrument_id) REFERENCES instruments(id),
    CONSTRAINT players_spare_fk FOREIGN KEY (spare_instrument_id) REFERENCES instruments(id)
);
CREATE TABLE section_leads (
    section_id INTEGER PRIMARY KEY REFERENCES orchestral_sections,
    player_id INTEGER REFERENCES players(id)
);
CREATE TABLE members (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    mentor_id INTEGER REFERENCES members(id)
);

INSERT INTO orchestral_sections VALUES (1, 'strings'), (2, 'woodwinds'), (3, 'percussion');
INSERT INTO instruments VALUES
    (1, 2, 'flute', X'0a0b'),
    (2, 1, 'violin', NULL),
    (3, 1, 'viola', NULL),
    (4, 2, 'oboe', NULL);
INSERT INTO players VALUES
    (1, 'ada', 'u-ada', 1, 4),
    (2, 'bo', 'u-bo', 2, NULL),
    (3, 'cy', 'u-ada', 3, 2);
INSERT INTO section_leads VALUES (1, 2), (2, 1);
INSERT INTO members VALUES (1, 'root', NULL), (2, 'left', 1), (3, 'right', 1);
";

pub fn service() -> SessionContext {
    SessionContext::new("service_role")
}

pub fn anon() -> SessionContext {
    SessionContext::new("anon")
}

/// Private in-memory database with the orchestra fixture loaded.
pub async fn orchestra(config: Config) -> Sqlrest {
    let db = Sqlrest::open(config).expect("open database");
    load(&db, ORCHESTRA).await;
    db
}

pub async fn setup() -> Sqlrest {
    orchestra(Config::default()).await
}

/// Runs every statement of `script` through the raw path.
pub async fn load(db: &Sqlrest, script: &str) {
    for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        db.execute_raw(statement, &[], service())
            .await
            .unwrap_or_else(|e| panic!("fixture statement failed: {e}\n{statement}"));
    }
}

/// First column of the first row as text.
pub async fn scalar(db: &Sqlrest, sql: &str, ctx: SessionContext) -> Option<String> {
    let rows = db.execute_raw(sql, &[], ctx).await.expect("scalar query");
    match rows.rows.first().and_then(|r| r.first()) {
        Some(SqlValue::Null) | None => None,
        Some(value) => Some(value.to_string()),
    }
}
