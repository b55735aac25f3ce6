use crate::changelog::ChangeSetId;

/// Everything that can go wrong while loading or applying a changelog.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// None of the resource accessors knows the requested path.
    #[error("resource [{path}] not found (searched: {searched})")]
    ResourceNotFound { path: String, searched: String },
    /// An accessor found the resource but failed to read it.
    #[error("failed to read resource [{path}]: {source}")]
    ResourceRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The changelog file is not a valid YAML, JSON or formatted SQL changelog.
    #[error("failed to parse changelog [{path}]: {message}")]
    Parse { path: String, message: String },
    /// A changelog includes itself, directly or through other files.
    #[error("changelog [{path}] is included recursively")]
    IncludeCycle { path: String },
    /// Two change sets share the same id, author and path.
    #[error("duplicate change set [{0}]")]
    DuplicateChangeSet(ChangeSetId),
    /// A context expression could not be parsed.
    #[error("invalid context expression [{expression}]: {message}")]
    InvalidContexts { expression: String, message: String },
    /// A change is missing required attributes or carries invalid values.
    #[error("invalid change in change set [{change_set}]: {message}")]
    InvalidChange {
        change_set: ChangeSetId,
        message: String,
    },
    /// A change set was modified after it had been applied.
    #[error(
        "change set [{change_set}] was modified after it was applied: recorded checksum {recorded}, current checksum {computed}"
    )]
    ChecksumMismatch {
        change_set: ChangeSetId,
        recorded: String,
        computed: String,
    },
    /// A statement of a change set was rejected by the database.
    #[error("change set [{change_set}] failed executing [{statement}]: {source}")]
    ChangeSetFailed {
        change_set: ChangeSetId,
        statement: String,
        #[source]
        source: sqlx::Error,
    },
    /// Another update holds the changelog lock.
    #[error("could not acquire the changelog lock, it is held by [{locked_by}]")]
    LockUnavailable { locked_by: String },
    /// The connection reports a backend the engine has no dialect for.
    #[error("unsupported database [{0}]")]
    UnsupportedDatabase(String),
    /// Building a bookkeeping query failed.
    #[error("failed to build query: {0}")]
    Query(#[from] sea_query::error::Error),
    /// Bookkeeping or transaction handling failed at the database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// Whether the changelog (or one of its includes) could not be loaded.
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            EngineError::ResourceNotFound { .. } | EngineError::ResourceRead { .. }
        )
    }
}
