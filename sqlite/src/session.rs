//! Identity-scoped statement execution.
//!
//! Every statement runs inside one scope: take a slot, switch it to the
//! request identity, run, restore the default identity, give the slot back.
//! The slot moves into the blocking task and only returns once restore has
//! happened, so a cancelled or timed-out caller can never hand back a
//! connection still carrying its identity.

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::time::{Duration, Instant};

use sqlrest_core::{Error, Result, RowSet, SessionContext, SqlValue};

use crate::identity::{self, Identity};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::rows;

/// Progress-handler granularity, in virtual machine instructions.
const PROGRESS_STEPS: i32 = 1000;

#[derive(Debug, Clone)]
pub struct SessionManager {
    pool: ConnectionPool,
    statement_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(pool: ConnectionPool, statement_timeout: Option<Duration>) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Runs `sql` under the identity of `ctx`.
    ///
    /// Waits for a slot in arrival order. The earlier of the context deadline
    /// and the statement timeout bounds both the wait and the statement.
    pub async fn with_context(
        &self,
        ctx: &SessionContext,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<RowSet> {
        let started = Instant::now();
        let deadline = earliest(
            ctx.deadline(),
            self.statement_timeout.map(|t| started + t),
        );

        let wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let conn = self.pool.acquire(wait).await.map_err(|e| stamp(e, started))?;

        let identity = Identity::from(ctx);
        let sql = sql.to_string();
        let params = params.to_vec();

        let task = tokio::task::spawn_blocking(move || {
            run_scoped(conn, &identity, &sql, &params, deadline)
        });

        match task.await {
            Ok(result) => result.map_err(|e| stamp(e, started)),
            Err(join) if join.is_panic() => {
                Err(Error::ExecutionFailed("statement execution panicked".into()))
            }
            Err(join) => Err(Error::ExecutionFailed(join.to_string())),
        }
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Fills in how long a timed-out request actually took.
fn stamp(err: Error, started: Instant) -> Error {
    match err {
        Error::Timeout { .. } => Error::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        },
        other => other,
    }
}

/// Switch, execute, restore. Owns the slot for the whole sequence; dropping
/// `conn` at the end is what returns the slot.
fn run_scoped(
    conn: PooledConnection,
    identity: &Identity,
    sql: &str,
    params: &[SqlValue],
    deadline: Option<Instant>,
) -> Result<RowSet> {
    let slot = conn.slot_id();

    if let Err(err) = identity::switch(conn.connection(), identity) {
        // The switch may have been partially applied
        restore_or_discard(conn);
        return Err(Error::SessionSetupFailed {
            role: identity.role.clone(),
            message: err.to_string(),
        });
    }
    sqlrest_core::sqlrest_trace_session!("switch", slot, &identity.role);

    if let Some(deadline) = deadline {
        conn.connection()
            .progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        rows::query_rowset(conn.connection(), sql, params)
    }));

    conn.connection().progress_handler(PROGRESS_STEPS, None::<fn() -> bool>);
    restore_or_discard(conn);

    match result {
        Ok(rows) => rows,
        Err(panic) => resume_unwind(panic),
    }
}

/// Puts the default identity back, or replaces the connection when that fails.
fn restore_or_discard(conn: PooledConnection) {
    let slot = conn.slot_id();
    match identity::restore(conn.connection(), conn.default_role()) {
        Ok(()) => {
            sqlrest_core::sqlrest_trace_session!("restore", slot, conn.default_role());
            drop(conn);
        }
        Err(err) => {
            sqlrest_core::sqlrest_trace_discard!(slot, err);
            if let Err(reopen) = conn.discard() {
                // `discard` already retired the slot
                sqlrest_core::sqlrest_trace_discard!(slot, format!("slot retired: {reopen}"));
            }
        }
    }
}
