use mindocean_shared::{NewUser, User, UserStats};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{ForumError, ForumResult};
use crate::{log_store_failure, now, DbPool};

/// The single source of user identities and display names.
#[derive(Clone)]
pub struct UserDirectory {
    pool: DbPool,
}

fn load_user(conn: &Connection, id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, email, is_admin, created_at FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                is_admin: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

fn count(conn: &Connection, sql: &str, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [user_id], |row| row.get(0))
}

impl UserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn with_conn<T, F>(&self, op: &'static str, f: F) -> ForumResult<T>
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

    /// Inserts the user or refreshes name and email. The admin flag and
    /// creation time survive a refresh.
    pub fn upsert_user(&self, user: NewUser) -> ForumResult<User> {
        self.with_conn("upsert_user", |conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, is_admin, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)
                 ON CONFLICT(id) DO UPDATE SET username = ?2, email = ?3",
                params![user.id, user.username, user.email, now()],
            )?;
            load_user(conn, &user.id)?.ok_or_else(|| ForumError::not_found("user", &user.id))
        })
    }

    pub fn get_user(&self, id: &str) -> ForumResult<Option<User>> {
        self.with_conn("get_user", |conn| Ok(load_user(conn, id)?))
    }

    pub fn set_admin(&self, id: &str, is_admin: bool) -> ForumResult<User> {
        self.with_conn("set_admin", |conn| {
            let changed = conn.execute(
                "UPDATE users SET is_admin = ?2 WHERE id = ?1",
                params![id, is_admin],
            )?;
            if changed == 0 {
                return Err(ForumError::not_found("user", id));
            }
            info!(user_id = id, is_admin, "admin flag changed");
            load_user(conn, id)?.ok_or_else(|| ForumError::not_found("user", id))
        })
    }

    pub fn user_count(&self) -> ForumResult<i64> {
        self.with_conn("user_count", |conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
        })
    }

    /// Activity counters shown on a profile page. Works for ids the directory
    /// has never seen; they simply count zero.
    pub fn user_stats(&self, id: &str) -> ForumResult<UserStats> {
        self.with_conn("user_stats", |conn| {
            Ok(UserStats {
                post_count: count(
                    conn,
                    "SELECT COUNT(*) FROM forum_posts WHERE user_id = ?1 AND status = 'active'",
                    id,
                )?,
                like_count: count(conn, "SELECT COUNT(*) FROM forum_likes WHERE user_id = ?1", id)?,
                collect_count: count(
                    conn,
                    "SELECT COUNT(*) FROM forum_collections WHERE user_id = ?1",
                    id,
                )?,
                received_likes: count(
                    conn,
                    "SELECT COALESCE(SUM(likes), 0) FROM forum_posts WHERE user_id = ?1",
                    id,
                )?,
            })
        })
    }
}
