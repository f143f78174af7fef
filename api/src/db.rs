use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::DbPool;

/// Name of the SQL function used by post search: `fold_contains(haystack, needle)`.
pub const FOLD_CONTAINS: &str = "fold_contains";

pub fn open_pool(database_url: &str, max_connections: u32) -> Result<DbPool, StoreError> {
    let manager = SqliteConnectionManager::file(database_url).with_init(init_connection);
    let pool = r2d2::Pool::builder()
        .max_size(max_connections.max(1))
        .build(manager)?;
    info!(database_url, max_connections, "opened sqlite pool");
    Ok(pool)
}

fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    register_functions(conn)
}

/// SQLite's LIKE only folds ASCII; search needs Unicode-aware case folding and
/// must treat 1- and 2-character terms exactly like longer ones.
fn register_functions(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.create_scalar_function(
        FOLD_CONTAINS,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let haystack: Option<String> = ctx.get(0)?;
            let needle: Option<String> = ctx.get(1)?;
            Ok(match (haystack, needle) {
                (Some(h), Some(n)) => h.to_lowercase().contains(&n.to_lowercase()),
                _ => false,
            })
        },
    )
}

pub fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL,
            email       TEXT NOT NULL DEFAULT '',
            is_admin    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            slug        TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS forum_posts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            category    TEXT NOT NULL,
            tags        TEXT NOT NULL DEFAULT '[]',
            type        TEXT NOT NULL DEFAULT 'help',
            attachments TEXT NOT NULL DEFAULT '[]',
            user_id     TEXT NOT NULL,
            author_name TEXT NOT NULL,
            views       INTEGER NOT NULL DEFAULT 0,
            likes       INTEGER NOT NULL DEFAULT 0,
            is_top      INTEGER NOT NULL DEFAULT 0,
            is_essence  INTEGER NOT NULL DEFAULT 0,
            status      TEXT NOT NULL DEFAULT 'active',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_posts_listing ON forum_posts(status, category, created_at);
        CREATE INDEX IF NOT EXISTS idx_posts_user ON forum_posts(user_id);

        CREATE TABLE IF NOT EXISTS forum_comments (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id           INTEGER NOT NULL REFERENCES forum_posts(id) ON DELETE CASCADE,
            user_id           TEXT NOT NULL,
            author_name       TEXT NOT NULL,
            content           TEXT NOT NULL,
            parent_comment_id INTEGER REFERENCES forum_comments(id) ON DELETE SET NULL,
            reply_to_user     TEXT,
            depth             INTEGER NOT NULL DEFAULT 0 CHECK (depth IN (0, 1)),
            is_accepted       INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON forum_comments(post_id, created_at);

        CREATE TABLE IF NOT EXISTS forum_likes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            post_id     INTEGER NOT NULL REFERENCES forum_posts(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL,
            UNIQUE(user_id, post_id)
        );

        CREATE TABLE IF NOT EXISTS forum_collections (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            post_id     INTEGER NOT NULL REFERENCES forum_posts(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL,
            UNIQUE(user_id, post_id)
        );

        CREATE TABLE IF NOT EXISTS forum_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id   TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            content     TEXT NOT NULL,
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_receiver ON forum_messages(receiver_id, is_read);
        CREATE INDEX IF NOT EXISTS idx_messages_sender ON forum_messages(sender_id);

        CREATE TABLE IF NOT EXISTS user_profiles (
            user_id        TEXT PRIMARY KEY,
            points         INTEGER NOT NULL DEFAULT 0,
            expertise_tags TEXT NOT NULL DEFAULT '[]',
            bio            TEXT NOT NULL DEFAULT '',
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS point_events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            delta       INTEGER NOT NULL,
            reason      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_point_events_user ON point_events(user_id, reason, created_at);

        -- Seed default categories if empty
        INSERT OR IGNORE INTO categories (id, name, slug, description) VALUES
            (1, 'General',   'general',   'General discussion'),
            (2, 'Process',   'process',   'Process engineering questions'),
            (3, 'Equipment', 'equipment', 'Tools, maintenance and equipment'),
            (4, 'Safety',    'safety',    'Safety practice and incidents'),
            (5, 'Career',    'career',    'Career growth and advice');
        ",
    )?;

    info!("database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent_and_seed_categories() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("t.db").to_str().unwrap(), 2).unwrap();
        run_migrations(&pool).unwrap();
        run_migrations(&pool).unwrap();

        let conn = pool.get().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 5);
    }

    #[test]
    fn fold_contains_is_unicode_aware() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("t.db").to_str().unwrap(), 1).unwrap();
        let conn = pool.get().unwrap();
        let check = |h: &str, n: &str| -> bool {
            conn.query_row("SELECT fold_contains(?1, ?2)", [h, n], |row| row.get(0))
                .unwrap()
        };

        assert!(check("Ätzprozess im Reinraum", "ätz"));
        assert!(check("光刻工艺参数", "光刻"));
        assert!(check("ПРИВЕТ", "привет"));
        assert!(!check("etching", "光刻"));
    }
}
