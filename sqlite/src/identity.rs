//! Per-connection identity settings.
//!
//! SQLite has no roles or session settings, so every connection gets a small
//! settings map and a set of SQL functions over it, modelled on PostgreSQL's
//! `set_config` / `current_setting` and the usual `auth.*` helpers. Views can
//! use them for row-level filtering, e.g. `WHERE owner_id = auth_uid()`.

use std::sync::{Arc, Mutex, PoisonError};

use hashbrown::HashMap;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::{Connection, params};
use sqlrest_core::SessionContext;

pub const ROLE: &str = "role";
pub const JWT_CLAIMS: &str = "request.jwt.claims";
pub const JWT_SUB: &str = "request.jwt.claim.sub";
pub const REQUEST_ID: &str = "request.id";
pub const PROJECT_ID: &str = "app.project_id";

/// Applies a request identity in one statement.
pub const SWITCH_SQL: &str = "SELECT set_config('role', ?1, 1), \
    set_config('request.jwt.claims', ?2, 1), \
    set_config('request.jwt.claim.sub', ?3, 1), \
    set_config('request.id', ?4, 1), \
    set_config('app.project_id', ?5, 1)";

/// Puts the default identity back.
pub const RESTORE_SQL: &str = "SELECT set_config('role', ?1, 0), \
    set_config('request.jwt.claims', '', 0), \
    set_config('request.jwt.claim.sub', '', 0), \
    set_config('request.id', '', 0), \
    set_config('app.project_id', '', 0)";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("role \"{0}\" does not exist")]
    UnknownRole(String),
    #[error("unrecognized configuration parameter \"{0}\"")]
    UnknownSetting(String),
    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: &'static str,
        got: usize,
    },
}

/// Settings visible to SQL on one connection.
#[derive(Debug, Default)]
pub struct SessionSettings {
    values: HashMap<String, String>,
}

impl SessionSettings {
    /// Value of `name`; an empty value reads as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    /// Drops every setting and puts `role` back.
    pub fn reset(&mut self, role: &str) {
        self.values.clear();
        self.set(ROLE, role);
    }
}

pub type SharedSettings = Arc<Mutex<SessionSettings>>;

/// Owned copy of the identity parts of a [`SessionContext`], so it can move
/// into a blocking task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub role: String,
    pub claims: String,
    pub user_id: String,
    pub request_id: String,
    pub project_id: String,
}

impl From<&SessionContext> for Identity {
    fn from(ctx: &SessionContext) -> Self {
        Self {
            role: ctx.role().to_string(),
            claims: ctx.claims_json(),
            user_id: ctx.user_id().unwrap_or_default().to_string(),
            request_id: ctx.request_id().to_string(),
            project_id: ctx.project_id().to_string(),
        }
    }
}

/// Applies `identity` to the connection. Fails without running anything else
/// when the role is not one of the configured roles.
pub fn switch(conn: &Connection, identity: &Identity) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(SWITCH_SQL)?;
    stmt.query_row(
        params![
            identity.role,
            identity.claims,
            identity.user_id,
            identity.request_id,
            identity.project_id
        ],
        |_| Ok(()),
    )
}

/// Rolls back any transaction left open and restores the default identity.
pub fn restore(conn: &Connection, default_role: &str) -> rusqlite::Result<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("ROLLBACK")?;
    }
    let mut stmt = conn.prepare_cached(RESTORE_SQL)?;
    stmt.query_row([default_role], |_| Ok(()))
}

fn lock(settings: &SharedSettings) -> std::sync::MutexGuard<'_, SessionSettings> {
    settings.lock().unwrap_or_else(PoisonError::into_inner)
}

fn user_error(err: IdentityError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(err))
}

fn optional_text(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(ctx.get::<Option<String>>(idx)?.unwrap_or_default())
}

/// Registers the identity functions on `conn`, all reading and writing
/// `settings`. `roles` lists the roles `set_config('role', ...)` accepts.
pub fn register_functions(
    conn: &Connection,
    settings: &SharedSettings,
    roles: &[String],
) -> rusqlite::Result<()> {
    // Settings change per request, so none of these may be treated as deterministic
    let flags = FunctionFlags::SQLITE_UTF8;

    let s = Arc::clone(settings);
    let allowed = roles.to_vec();
    conn.create_scalar_function("set_config", 3, flags, move |ctx| {
        let name: String = ctx.get(0)?;
        let value = optional_text(ctx, 1)?;
        if name == ROLE && !allowed.iter().any(|r| *r == value) {
            return Err(user_error(IdentityError::UnknownRole(value)));
        }
        lock(&s).set(&name, &value);
        Ok(value)
    })?;

    let s = Arc::clone(settings);
    conn.create_scalar_function("current_setting", -1, flags, move |ctx| {
        if !(1..=2).contains(&ctx.len()) {
            return Err(user_error(IdentityError::Arity {
                name: "current_setting",
                expected: "1 or 2",
                got: ctx.len(),
            }));
        }
        let name: String = ctx.get(0)?;
        let missing_ok = if ctx.len() == 2 { ctx.get::<bool>(1)? } else { false };
        match lock(&s).get(&name) {
            Some(v) => Ok(Some(v.to_string())),
            None if missing_ok => Ok(None),
            None => Err(user_error(IdentityError::UnknownSetting(name))),
        }
    })?;

    let s = Arc::clone(settings);
    conn.create_scalar_function("current_role", 0, flags, move |_| {
        Ok(lock(&s).get(ROLE).map(str::to_string))
    })?;

    let s = Arc::clone(settings);
    conn.create_scalar_function("auth_uid", 0, flags, move |_| {
        Ok(lock(&s).get(JWT_SUB).map(str::to_string))
    })?;

    let s = Arc::clone(settings);
    conn.create_scalar_function("auth_role", 0, flags, move |_| {
        let settings = lock(&s);
        let from_claims = settings
            .get(JWT_CLAIMS)
            .and_then(|c| serde_json::from_str::<serde_json::Value>(c).ok())
            .and_then(|c| c.get("role").and_then(|r| r.as_str()).map(str::to_string));
        Ok(from_claims.or_else(|| settings.get(ROLE).map(str::to_string)))
    })?;

    let s = Arc::clone(settings);
    conn.create_scalar_function("auth_jwt", 0, flags, move |_| {
        Ok(lock(&s).get(JWT_CLAIMS).map(str::to_string))
    })?;

    Ok(())
}
