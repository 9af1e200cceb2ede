//! Configuration for a [`Sqlrest`](crate::Sqlrest) instance
//!
//! Loaded from a `sqlrest.toml` file or built in code. Every section and key is
//! optional; the defaults give a single-connection private in-memory database.
//!
//! ```toml
//! [database]
//! path = "./app.db"
//! pool_size = 4
//! busy_timeout_ms = 5000
//!
//! [session]
//! default_role = "anon"
//! roles = ["anon", "authenticated", "service_role"]
//! statement_timeout_ms = 10000
//!
//! [query]
//! embed_filter = "narrow"
//! max_embed_depth = 8
//! ```

use serde::Deserialize;
use sqlrest_core::{CompileOptions, EmbedFilterMode, MAX_SELECT_DEPTH};
use sqlrest_sqlite::{ConnectionOptions, DatabaseLocation};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "sqlrest.toml";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// File path, or `:memory:` for a private in-memory database
    pub path: String,
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            pool_size: 1,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Identity every idle connection carries
    pub default_role: String,
    /// Roles a request may run as
    pub roles: Vec<String>,
    /// Upper bound for one statement, on top of any per-request deadline
    pub statement_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_role: "anon".to_string(),
            roles: vec![
                "anon".to_string(),
                "authenticated".to_string(),
                "service_role".to_string(),
            ],
            statement_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub embed_filter: EmbedFilterMode,
    pub max_embed_depth: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        let options = CompileOptions::default();
        Self {
            embed_filter: options.embed_filter,
            max_embed_depth: options.max_embed_depth,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub query: QueryConfig,
}

impl Config {
    /// Load from `sqlrest.toml` in the working directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.into())
            } else {
                ConfigError::Io(path.into(), e)
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.into(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// In-memory database with the given pool size
    pub fn in_memory(pool_size: usize) -> Self {
        let mut config = Self::default();
        config.database.pool_size = pool_size;
        config
    }

    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.database.path = path.as_ref().to_string_lossy().into_owned();
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.session.statement_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_embed_filter(mut self, mode: EmbedFilterMode) -> Self {
        self.query.embed_filter = mode;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.database.path.trim().is_empty() {
            return invalid("database.path must not be empty".into());
        }
        if self.database.pool_size == 0 {
            return invalid("database.pool_size must be at least 1".into());
        }
        if self.session.roles.is_empty() {
            return invalid("session.roles must list at least one role".into());
        }
        if let Some(role) = self.session.roles.iter().find(|r| r.trim().is_empty()) {
            return invalid(format!("session.roles contains an empty role name {role:?}"));
        }
        if !self.session.roles.contains(&self.session.default_role) {
            return invalid(format!(
                "session.default_role '{}' is not listed in session.roles",
                self.session.default_role
            ));
        }
        if self.session.statement_timeout_ms == Some(0) {
            return invalid("session.statement_timeout_ms must be greater than 0".into());
        }
        if self.query.max_embed_depth == 0 {
            return invalid("query.max_embed_depth must be at least 1".into());
        }
        if self.query.max_embed_depth > MAX_SELECT_DEPTH {
            return invalid(format!(
                "query.max_embed_depth must be at most {MAX_SELECT_DEPTH}"
            ));
        }
        Ok(())
    }

    pub fn location(&self) -> DatabaseLocation {
        DatabaseLocation::parse(&self.database.path)
    }

    /// Connection settings for the pool and the catalog. The location is
    /// resolved here, so an in-memory database gets a fresh name per call.
    pub fn connection_options(&self) -> ConnectionOptions {
        let mut options = ConnectionOptions::new(self.location());
        options.busy_timeout = Duration::from_millis(self.database.busy_timeout_ms);
        options.default_role = self.session.default_role.clone();
        options.roles = self.session.roles.clone();
        options
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            embed_filter: self.query.embed_filter,
            max_embed_depth: self.query.max_embed_depth,
        }
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.session.statement_timeout_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Tests
// ============================================================================
