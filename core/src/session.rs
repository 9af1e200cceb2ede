//! Per-request security identity.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use uuid::Uuid;

/// Identity and limits of one request.
///
/// Built once per request and handed to the facade by value. Deliberately not
/// `Clone`: a context belongs to exactly one execution.
#[derive(Debug)]
pub struct SessionContext {
    request_id: Uuid,
    project_id: String,
    role: String,
    user_id: Option<String>,
    claims: Map<String, Value>,
    deadline: Option<Instant>,
}

impl SessionContext {
    /// New context for `role` with a fresh request id and no user.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            project_id: "default".to_string(),
            role: role.into(),
            user_id: None,
            claims: Map::new(),
            deadline: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Replaces the claims. Anything but a JSON object clears them.
    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = match claims {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Expires the context `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Claims as a JSON document, with `role` and `sub` filled in from the
    /// context when the caller did not supply them.
    pub fn claims_json(&self) -> String {
        let mut claims = self.claims.clone();
        claims
            .entry("role")
            .or_insert_with(|| Value::String(self.role.clone()));
        if let Some(user) = &self.user_id {
            claims
                .entry("sub")
                .or_insert_with(|| Value::String(user.clone()));
        }
        Value::Object(claims).to_string()
    }
}
