use mindocean_shared::{
    Author, ForumCategory, NewPost, Pagination, PointReason, Post, PostFilter, PostStatus,
    PostType, PostUpdate, SortMode,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::db::FOLD_CONTAINS;
use crate::error::{ForumError, ForumResult};
use crate::{json_column, now, parsed_column, points, Forum};

/// Category value that disables the category filter.
pub const ALL_CATEGORIES: &str = "all";

/// Parses a sort mode from a query value; an empty value means latest.
pub fn parse_sort(raw: &str) -> ForumResult<SortMode> {
    raw.parse().map_err(ForumError::InvalidOperation)
}

pub fn parse_post_type(raw: &str) -> ForumResult<PostType> {
    raw.parse().map_err(ForumError::InvalidOperation)
}

const POST_COLUMNS: &str = "p.id, p.title, p.content, p.category, p.tags, p.type, p.attachments,
        p.user_id, p.author_name, p.views, p.likes,
        (SELECT COUNT(*) FROM forum_comments c WHERE c.post_id = p.id),
        p.is_top, p.is_essence, p.status, p.created_at, p.updated_at";

fn map_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3)?,
        tags: json_column(row, 4)?,
        post_type: parsed_column(row, 5)?,
        attachments: json_column(row, 6)?,
        author: Author {
            id: row.get(7)?,
            name: row.get(8)?,
        },
        views: row.get(9)?,
        likes: row.get(10)?,
        comment_count: row.get(11)?,
        is_top: row.get(12)?,
        is_essence: row.get(13)?,
        status: parsed_column(row, 14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

pub(crate) fn load_post(conn: &Connection, id: i64) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("SELECT {POST_COLUMNS} FROM forum_posts p WHERE p.id = ?1"),
        [id],
        map_post,
    )
    .optional()
}

fn ensure_category(conn: &Connection, slug: &str) -> ForumResult<()> {
    let known = conn
        .query_row("SELECT 1 FROM categories WHERE slug = ?1", [slug], |_| Ok(()))
        .optional()?;
    match known {
        Some(()) => Ok(()),
        None => Err(ForumError::invalid(format!("unknown category '{slug}'"))),
    }
}

fn query_posts(conn: &Connection, sql: &str, args: &[Value]) -> ForumResult<Vec<Post>> {
    let mut stmt = conn.prepare(sql)?;
    let posts = stmt
        .query_map(params_from_iter(args.iter()), map_post)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

fn set_flag(conn: &Connection, id: i64, column: &str, on: bool) -> ForumResult<()> {
    let changed = conn.execute(
        &format!("UPDATE forum_posts SET {column} = ?2, updated_at = ?3 WHERE id = ?1"),
        params![id, on, now()],
    )?;
    if changed == 0 {
        return Err(ForumError::not_found("post", id));
    }
    Ok(())
}

impl Forum {
    /// Creates an active post and credits the author's creation bonus in the
    /// same transaction.
    pub fn create_post(&self, input: NewPost) -> ForumResult<Post> {
        let tags = serde_json::to_string(&input.tags)?;
        let attachments = serde_json::to_string(&input.attachments)?;

        self.with_tx("create_post", |conn| {
            ensure_category(conn, &input.category)?;
            let ts = now();
            conn.execute(
                "INSERT INTO forum_posts
                    (title, content, category, tags, type, attachments, user_id, author_name,
                     status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    input.title,
                    input.content,
                    input.category,
                    tags,
                    input.post_type.as_str(),
                    attachments,
                    input.author.id,
                    input.author.name,
                    PostStatus::Active.as_str(),
                    ts,
                ],
            )?;
            let id = conn.last_insert_rowid();

            points::credit(
                conn,
                &input.author.id,
                PointReason::PostCreated.reward(),
                PointReason::PostCreated,
            )?;

            info!(post_id = id, author = %input.author.id, "post created");
            load_post(conn, id)?.ok_or_else(|| ForumError::not_found("post", id))
        })
    }

    /// Fetches a post whatever its status; soft-deleted posts stay readable by id.
    pub fn get_post(&self, id: i64) -> ForumResult<Option<Post>> {
        self.with_conn("get_post", |conn| Ok(load_post(conn, id)?))
    }

    /// Lists active posts. Every whitespace-separated search term must appear in
    /// the title or the content, case-insensitively, however short it is.
    pub fn list_posts(&self, filter: &PostFilter) -> ForumResult<Vec<Post>> {
        let (limit, offset) = filter.page.clamped();

        self.with_conn("list_posts", |conn| {
            let mut sql = format!(
                "SELECT {POST_COLUMNS} FROM forum_posts p WHERE p.status = '{}'",
                PostStatus::Active.as_str()
            );
            let mut args: Vec<Value> = Vec::new();

            let category = filter
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty() && *c != ALL_CATEGORIES);
            if let Some(category) = category {
                ensure_category(conn, category)?;
                args.push(Value::Text(category.to_string()));
                sql.push_str(&format!(" AND p.category = ?{}", args.len()));
            }

            if let Some(search) = filter.search.as_deref() {
                for term in search.split_whitespace() {
                    args.push(Value::Text(term.to_string()));
                    let n = args.len();
                    sql.push_str(&format!(
                        " AND ({FOLD_CONTAINS}(p.title, ?{n}) OR {FOLD_CONTAINS}(p.content, ?{n}))"
                    ));
                }
            }

            match filter.sort {
                SortMode::Hot => sql.push_str(
                    " ORDER BY p.is_top DESC,
                        (p.views + (SELECT COUNT(*) FROM forum_comments c WHERE c.post_id = p.id)) DESC,
                        p.created_at DESC, p.id DESC",
                ),
                SortMode::Essence => sql.push_str(
                    " AND p.is_essence = 1 ORDER BY p.is_top DESC, p.created_at DESC, p.id DESC",
                ),
                SortMode::Latest => {
                    sql.push_str(" ORDER BY p.is_top DESC, p.created_at DESC, p.id DESC")
                }
            }

            args.push(Value::Integer(limit));
            args.push(Value::Integer(offset));
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", args.len() - 1, args.len()));

            let posts = query_posts(conn, &sql, &args)?;
            debug!(sort = %filter.sort, found = posts.len(), "posts listed");
            Ok(posts)
        })
    }

    /// Applies the editable fields and refreshes `updated_at`. Moderation flags,
    /// counters and status are untouched.
    pub fn update_post(&self, id: i64, fields: PostUpdate) -> ForumResult<Post> {
        let mut sets: Vec<(&str, Value)> = Vec::new();
        if let Some(title) = fields.title {
            sets.push(("title", Value::Text(title)));
        }
        if let Some(content) = fields.content {
            sets.push(("content", Value::Text(content)));
        }
        if let Some(tags) = &fields.tags {
            sets.push(("tags", Value::Text(serde_json::to_string(tags)?)));
        }
        if let Some(post_type) = fields.post_type {
            sets.push(("type", Value::Text(post_type.as_str().to_string())));
        }
        if let Some(attachments) = &fields.attachments {
            sets.push(("attachments", Value::Text(serde_json::to_string(attachments)?)));
        }

        self.with_tx("update_post", |conn| {
            if let Some(category) = &fields.category {
                ensure_category(conn, category)?;
                sets.push(("category", Value::Text(category.clone())));
            }
            sets.push(("updated_at", Value::Text(now())));

            let assignments = sets
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{column} = ?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let mut args = vec![Value::Integer(id)];
            args.extend(sets.drain(..).map(|(_, value)| value));

            let changed = conn.execute(
                &format!("UPDATE forum_posts SET {assignments} WHERE id = ?1"),
                params_from_iter(args.iter()),
            )?;
            if changed == 0 {
                return Err(ForumError::not_found("post", id));
            }
            load_post(conn, id)?.ok_or_else(|| ForumError::not_found("post", id))
        })
    }

    /// Soft delete. Comments, likes and collections stay in place.
    pub fn delete_post(&self, id: i64) -> ForumResult<()> {
        self.with_conn("delete_post", |conn| {
            let changed = conn.execute(
                "UPDATE forum_posts SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, PostStatus::Deleted.as_str(), now()],
            )?;
            if changed == 0 {
                return Err(ForumError::not_found("post", id));
            }
            info!(post_id = id, "post soft-deleted");
            Ok(())
        })
    }

    /// Best effort; a lost increment only costs one view.
    pub fn increment_views(&self, id: i64) {
        let result = self.pool().get().map_err(ForumError::from).and_then(|conn| {
            conn.execute(
                "UPDATE forum_posts SET views = views + 1 WHERE id = ?1",
                [id],
            )?;
            Ok(())
        });
        if let Err(e) = result {
            warn!(post_id = id, error = %e, "view increment dropped");
        }
    }

    pub fn set_pinned(&self, id: i64, pinned: bool) -> ForumResult<()> {
        self.with_conn("set_pinned", |conn| set_flag(conn, id, "is_top", pinned))
    }

    pub fn set_essence(&self, id: i64, essence: bool) -> ForumResult<()> {
        self.with_conn("set_essence", |conn| set_flag(conn, id, "is_essence", essence))
    }

    /// Active posts among `ids`, newest first.
    pub fn list_posts_by_ids(&self, ids: &[i64], page: Pagination) -> ForumResult<Vec<Post>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (limit, offset) = page.clamped();

        self.with_conn("list_posts_by_ids", |conn| {
            let placeholders = (1..=ids.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let mut args: Vec<Value> = ids.iter().map(|&id| Value::Integer(id)).collect();
            args.push(Value::Integer(limit));
            args.push(Value::Integer(offset));
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM forum_posts p
                 WHERE p.id IN ({placeholders}) AND p.status = 'active'
                 ORDER BY p.created_at DESC, p.id DESC
                 LIMIT ?{} OFFSET ?{}",
                ids.len() + 1,
                ids.len() + 2
            );
            query_posts(conn, &sql, &args)
        })
    }

    pub fn list_user_posts(&self, user_id: &str, page: Pagination) -> ForumResult<Vec<Post>> {
        let (limit, offset) = page.clamped();
        self.with_conn("list_user_posts", |conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM forum_posts p
                 WHERE p.user_id = ?1 AND p.status = 'active'
                 ORDER BY p.created_at DESC, p.id DESC
                 LIMIT ?2 OFFSET ?3"
            );
            query_posts(
                conn,
                &sql,
                &[
                    Value::Text(user_id.to_string()),
                    Value::Integer(limit),
                    Value::Integer(offset),
                ],
            )
        })
    }

    pub fn list_categories(&self) -> ForumResult<Vec<ForumCategory>> {
        self.with_conn("list_categories", |conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, slug, description FROM categories ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ForumCategory {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        slug: row.get(2)?,
                        description: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
