use thiserror::Error;

/// Failures of the underlying store. Fatal for the operation that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("stored json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ForumError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ForumError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ForumError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ForumError::InvalidOperation(msg.into())
    }

    pub fn is_store_failure(&self) -> bool {
        matches!(self, ForumError::Store(_))
    }
}

impl From<rusqlite::Error> for ForumError {
    fn from(e: rusqlite::Error) -> Self {
        ForumError::Store(StoreError::Sqlite(e))
    }
}

impl From<r2d2::Error> for ForumError {
    fn from(e: r2d2::Error) -> Self {
        ForumError::Store(StoreError::Pool(e))
    }
}

impl From<serde_json::Error> for ForumError {
    fn from(e: serde_json::Error) -> Self {
        ForumError::Store(StoreError::Json(e))
    }
}

pub type ForumResult<T> = Result<T, ForumError>;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid user id '{0}'")]
    InvalidUserId(String),
    #[error("invalid settings: {0}")]
    InvalidInput(String),
    #[error("settings io at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("settings json at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a number, got '{value}'")]
    NotANumber { name: &'static str, value: String },
    #[error("default models file {path}: {source}")]
    DefaultModels {
        path: String,
        #[source]
        source: SettingsError,
    },
}
