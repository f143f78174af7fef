pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod forum;
pub mod interactions;
pub mod messages;
pub mod points;
pub mod settings;
pub mod users;

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::error;

pub use error::{ForumError, ForumResult, SettingsError, StoreError};
pub use settings::FileSettingsStore;
pub use users::UserDirectory;

pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;

/// Data-access handle for the forum. Cheap to clone; every operation takes one
/// pooled connection for its duration.
#[derive(Clone)]
pub struct Forum {
    pool: DbPool,
}

impl Forum {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Runs `f` on a pooled connection, logging store failures under `op`.
    pub(crate) fn with_conn<T, F>(&self, op: &'static str, f: F) -> ForumResult<T>
    where
        F: FnOnce(&Connection) -> ForumResult<T>,
    {
        let result = self
            .pool
            .get()
            .map_err(ForumError::from)
            .and_then(|conn| f(&*conn));
        log_store_failure(op, result)
    }

    /// Like `with_conn`, but inside an IMMEDIATE transaction that commits only
    /// when `f` succeeds.
    pub(crate) fn with_tx<T, F>(&self, op: &'static str, f: F) -> ForumResult<T>
    where
        F: FnOnce(&Connection) -> ForumResult<T>,
    {
        let result = self.pool.get().map_err(ForumError::from).and_then(|mut conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&*tx)?;
            tx.commit()?;
            Ok(value)
        });
        log_store_failure(op, result)
    }
}

pub(crate) fn log_store_failure<T>(op: &'static str, result: ForumResult<T>) -> ForumResult<T> {
    if let Err(e) = &result {
        if e.is_store_failure() {
            error!(op, error = %e, "store failure");
        }
    }
    result
}

/// RFC 3339 UTC with microseconds; sorts lexicographically.
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Reads a JSON-encoded list column, treating NULL or empty text as `[]`.
pub(crate) fn json_column<T: DeserializeOwned + Default>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: Option<String> = row.get(idx)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

/// Maps a text column onto a type parsed with `FromStr`.
pub(crate) fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// A migrated forum over a fresh database file. Keep the `TempDir` alive.
    pub fn forum() -> (Forum, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("forum.db");
        let pool = db::open_pool(path.to_str().expect("utf-8 path"), 4).expect("pool");
        db::run_migrations(&pool).expect("migrations");
        (Forum::new(pool), dir)
    }
}
