use thiserror::Error;

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown table or column
    NotFound,
    /// More than one foreign key could back an embed
    AmbiguousRelationship,
    /// No foreign key connects the parent and the embed
    NoRelationshipFound,
    /// Predicate does not fit the column it targets
    InvalidFilter,
    /// Surface syntax could not be parsed
    Parse,
    /// Structurally valid request that cannot be served
    InvalidRequest,
    /// The engine rejected the statement
    ExecutionFailed,
    /// Deadline exceeded while waiting for or running the statement
    Timeout,
    /// The identity switch failed; nothing was executed
    SessionSetupFailed,
    /// An aggregated embed could not be decoded
    Decode,
}

#[derive(Debug, Error)]
pub enum Error {
    /// Table (or view) missing from the catalog
    #[error("relation \"{table}\" does not exist")]
    TableNotFound { table: String },

    /// Column missing from a table
    #[error("column \"{column}\" does not exist on \"{table}\"")]
    ColumnNotFound { table: String, column: String },

    /// Several candidate relationships and nothing to pick between them
    #[error(
        "more than one relationship was found for \"{parent}\" and \"{embed}\": {}; add a hint naming one of them",
        candidates.join(", ")
    )]
    AmbiguousRelationship {
        parent: String,
        embed: String,
        candidates: Vec<String>,
    },

    /// No relationship between the two resources
    #[error("could not find a relationship between \"{parent}\" and \"{embed}\"{}", hint_suffix(hint))]
    NoRelationshipFound {
        parent: String,
        embed: String,
        hint: Option<String>,
    },

    /// Malformed predicate
    #[error("invalid filter on \"{column}\": {reason}")]
    InvalidFilter { column: String, reason: String },

    /// Surface syntax error
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Request rejected before compilation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Engine error, message kept verbatim
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Deadline exceeded
    #[error("statement timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// Identity could not be applied to the connection
    #[error("failed to set session identity for role \"{role}\": {message}")]
    SessionSetupFailed { role: String, message: String },

    /// Aggregated embed was not valid JSON
    #[error("failed to decode embedded resource \"{key}\": {message}")]
    Decode { key: String, message: String },
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(" using the hint \"{h}\""),
        None => String::new(),
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TableNotFound { .. } | Self::ColumnNotFound { .. } => ErrorKind::NotFound,
            Self::AmbiguousRelationship { .. } => ErrorKind::AmbiguousRelationship,
            Self::NoRelationshipFound { .. } => ErrorKind::NoRelationshipFound,
            Self::InvalidFilter { .. } => ErrorKind::InvalidFilter,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::ExecutionFailed(_) => ErrorKind::ExecutionFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::SessionSetupFailed { .. } => ErrorKind::SessionSetupFailed,
            Self::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// PostgREST / PostgreSQL flavoured error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TableNotFound { .. } => "42P01",
            Self::ColumnNotFound { .. } => "42703",
            Self::AmbiguousRelationship { .. } => "PGRST201",
            Self::NoRelationshipFound { .. } => "PGRST200",
            Self::InvalidFilter { .. } => "22P02",
            Self::Parse { .. } | Self::InvalidRequest(_) => "PGRST100",
            Self::ExecutionFailed(_) | Self::Decode { .. } => "XX000",
            Self::Timeout { .. } => "57014",
            Self::SessionSetupFailed { .. } => "28000",
        }
    }

    /// The table, column or constraint the error is about, if any.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::TableNotFound { table } => Some(table),
            Self::ColumnNotFound { column, .. } | Self::InvalidFilter { column, .. } => Some(column),
            Self::AmbiguousRelationship { embed, .. } | Self::NoRelationshipFound { embed, .. } => {
                Some(embed)
            }
            Self::SessionSetupFailed { role, .. } => Some(role),
            Self::Decode { key, .. } => Some(key),
            _ => None,
        }
    }

    pub(crate) fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_filter(column: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "rusqlite")]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Self::Timeout { elapsed_ms: 0 }
            }
            _ => Self::ExecutionFailed(err.to_string()),
        }
    }
}

/// Result type for sqlrest operations
pub type Result<T> = std::result::Result<T, Error>;
