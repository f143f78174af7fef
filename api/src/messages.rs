use mindocean_shared::{Message, Pagination};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::{ForumError, ForumResult};
use crate::{now, Forum};

pub const DEFAULT_CONVERSATION_LIMIT: i64 = 50;

// Callers select from `forum_messages m` joined with `users s` / `users r`.
const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, m.receiver_id, s.username, r.username, m.content, m.is_read, m.created_at";

const NAME_JOINS: &str = "LEFT JOIN users s ON s.id = m.sender_id
     LEFT JOIN users r ON r.id = m.receiver_id";

fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        sender_name: row.get(3)?,
        receiver_name: row.get(4)?,
        content: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn load_message(conn: &Connection, id: i64) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM forum_messages m {NAME_JOINS} WHERE m.id = ?1"),
        [id],
        map_message,
    )
    .optional()
}

impl Forum {
    pub fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> ForumResult<Message> {
        if sender_id == receiver_id {
            return Err(ForumError::invalid("cannot send a message to yourself"));
        }
        self.with_conn("send_message", |conn| {
            conn.execute(
                "INSERT INTO forum_messages (sender_id, receiver_id, content, is_read, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![sender_id, receiver_id, content, now()],
            )?;
            let id = conn.last_insert_rowid();
            debug!(message_id = id, sender_id, receiver_id, "message sent");
            load_message(conn, id)?.ok_or_else(|| ForumError::not_found("message", id))
        })
    }

    pub fn get_message(&self, id: i64) -> ForumResult<Option<Message>> {
        self.with_conn("get_message", |conn| Ok(load_message(conn, id)?))
    }

    /// Both directions between the two users, oldest first.
    pub fn get_conversation(
        &self,
        user_id: &str,
        other_id: &str,
        page: Pagination,
    ) -> ForumResult<Vec<Message>> {
        let (limit, offset) = page.clamped();
        self.with_conn("get_conversation", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM forum_messages m {NAME_JOINS}
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.created_at ASC, m.id ASC
                 LIMIT ?3 OFFSET ?4"
            ))?;
            let rows = stmt
                .query_map(params![user_id, other_id, limit, offset], map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The latest message of every thread the user takes part in, whichever
    /// side sent it, newest thread first.
    pub fn get_contacts(&self, user_id: &str) -> ForumResult<Vec<Message>> {
        self.with_conn("get_contacts", |conn| {
            let mut stmt = conn.prepare(&format!(
                "WITH ranked AS (
                    SELECT id, ROW_NUMBER() OVER (
                        PARTITION BY CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                        ORDER BY created_at DESC, id DESC
                    ) AS rn
                    FROM forum_messages
                    WHERE sender_id = ?1 OR receiver_id = ?1
                 )
                 SELECT {MESSAGE_COLUMNS}
                 FROM ranked
                 JOIN forum_messages m ON m.id = ranked.id
                 {NAME_JOINS}
                 WHERE ranked.rn = 1
                 ORDER BY m.created_at DESC, m.id DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks what `other_id` sent to `user_id` as read. Returns how many
    /// messages changed.
    pub fn mark_conversation_read(&self, user_id: &str, other_id: &str) -> ForumResult<usize> {
        self.with_conn("mark_conversation_read", |conn| {
            Ok(conn.execute(
                "UPDATE forum_messages SET is_read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
                params![user_id, other_id],
            )?)
        })
    }

    /// Marks a single message read, only when `user_id` received it.
    pub fn mark_message_read(&self, message_id: i64, user_id: &str) -> ForumResult<bool> {
        self.with_conn("mark_message_read", |conn| {
            let changed = conn.execute(
                "UPDATE forum_messages SET is_read = 1 WHERE id = ?1 AND receiver_id = ?2",
                params![message_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_unread_count(&self, user_id: &str) -> ForumResult<i64> {
        self.with_conn("get_unread_count", |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM forum_messages WHERE receiver_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?)
        })
    }
}
