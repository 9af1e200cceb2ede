//! Tracing utilities for query compilation and session observability.
//!
//! Enable the `tracing` feature to emit events via the `tracing` crate.
//! These macros no-op when the feature is disabled (arguments are only
//! borrowed), avoiding `#[cfg]` boilerplate at every call site. Crates using
//! them must declare their own `tracing` feature.

/// Emit a debug-level event with the compiled SQL text and parameter count.
///
/// ```ignore
/// sqlrest_trace_query!(ctx.request_id(), &sql, params.len());
/// ```
#[macro_export]
macro_rules! sqlrest_trace_query {
    ($request_id:expr, $sql:expr, $param_count:expr) => {
        #[cfg(feature = "tracing")]
        ::tracing::debug!(request_id = %$request_id, sql = %$sql, params = $param_count, "sqlrest.query");
        #[cfg(not(feature = "tracing"))]
        let _ = (&$request_id, &$sql, &$param_count);
    };
}

/// Emit a debug-level event for a session lifecycle step (switch, restore, discard).
///
/// ```ignore
/// sqlrest_trace_session!("switch", slot.id(), &identity.role);
/// ```
#[macro_export]
macro_rules! sqlrest_trace_session {
    ($event:literal, $slot:expr, $role:expr) => {
        #[cfg(feature = "tracing")]
        ::tracing::debug!(event = $event, slot = $slot, role = %$role, "sqlrest.session");
        #[cfg(not(feature = "tracing"))]
        let _ = (&$slot, &$role);
    };
}

/// Emit a warn-level event when a connection has to be thrown away.
#[macro_export]
macro_rules! sqlrest_trace_discard {
    ($slot:expr, $reason:expr) => {
        #[cfg(feature = "tracing")]
        ::tracing::warn!(slot = $slot, reason = %$reason, "sqlrest.session.discard");
        #[cfg(not(feature = "tracing"))]
        let _ = (&$slot, &$reason);
    };
}

/// Emit an info-level event when the catalog snapshot is (re)loaded.
#[macro_export]
macro_rules! sqlrest_trace_catalog {
    ($version:expr, $tables:expr, $edges:expr) => {
        #[cfg(feature = "tracing")]
        ::tracing::info!(schema_version = $version, tables = $tables, edges = $edges, "sqlrest.catalog.reload");
        #[cfg(not(feature = "tracing"))]
        let _ = (&$version, &$tables, &$edges);
    };
}
