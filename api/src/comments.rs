use std::collections::HashMap;

use mindocean_shared::{Author, Comment, CommentNode, NewComment, PointReason, PostStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{ForumError, ForumResult};
use crate::forum::load_post;
use crate::{now, points, Forum};

/// Replies never nest deeper than this.
pub const MAX_DEPTH: u8 = 1;

const COMMENT_COLUMNS: &str = "id, post_id, user_id, author_name, content, parent_comment_id,
        reply_to_user, depth, is_accepted, created_at";

fn map_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author: Author {
            id: row.get(2)?,
            name: row.get(3)?,
        },
        content: row.get(4)?,
        parent_comment_id: row.get(5)?,
        reply_to_user: row.get(6)?,
        depth: row.get(7)?,
        is_accepted: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn load_comment(conn: &Connection, id: i64) -> rusqlite::Result<Option<Comment>> {
    conn.query_row(
        &format!("SELECT {COMMENT_COLUMNS} FROM forum_comments WHERE id = ?1"),
        [id],
        map_comment,
    )
    .optional()
}

/// Where a new comment hangs: (parent id, depth, name shown as "replying to").
fn placement(
    conn: &Connection,
    post_id: i64,
    parent_id: Option<i64>,
) -> ForumResult<(Option<i64>, u8, Option<String>)> {
    let Some(parent_id) = parent_id else {
        return Ok((None, 0, None));
    };
    let parent =
        load_comment(conn, parent_id)?.ok_or_else(|| ForumError::not_found("comment", parent_id))?;
    if parent.post_id != post_id {
        return Err(ForumError::invalid(format!(
            "comment {parent_id} belongs to post {}, not {post_id}",
            parent.post_id
        )));
    }

    // A reply to a reply goes under the same top-level comment.
    let anchor = if parent.depth >= MAX_DEPTH {
        parent.parent_comment_id.unwrap_or(parent.id)
    } else {
        parent.id
    };
    Ok((Some(anchor), MAX_DEPTH, Some(parent.author.name)))
}

/// Rebuilds the reply tree from comments ordered oldest first.
///
/// Comments whose parent is missing from the set become roots, as do
/// comments caught in a parent cycle. Every input comment appears exactly
/// once in the output.
pub fn build_comment_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
    let n = comments.len();
    let index: HashMap<i64, usize> = comments
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id, i))
        .collect();

    let mut parent_of: Vec<Option<usize>> = comments
        .iter()
        .enumerate()
        .map(|(i, c)| {
            c.parent_comment_id
                .and_then(|p| index.get(&p).copied())
                .filter(|&p| p != i)
        })
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots = Vec::new();
    for (i, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    let mut reached = vec![false; n];
    for &r in &roots {
        mark_reachable(r, &mut reached, &children);
    }
    let mut next = 0;
    while let Some(offset) = reached[next..].iter().position(|r| !r) {
        let i = next + offset;
        // Only cycles are left unreached; cut this node loose to break it.
        if let Some(p) = parent_of[i].take() {
            children[p].retain(|&c| c != i);
        }
        roots.push(i);
        mark_reachable(i, &mut reached, &children);
        next = i + 1;
    }
    roots.sort_unstable();

    // Parents precede their replies in `order`, so walking it backwards
    // builds every reply before the node that holds it.
    let mut order = Vec::with_capacity(n);
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(i) = stack.pop() {
        order.push(i);
        stack.extend(children[i].iter().rev().copied());
    }

    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode>> = (0..n).map(|_| None).collect();
    for &i in order.iter().rev() {
        let replies = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        if let Some(comment) = slots[i].take() {
            built[i] = Some(CommentNode { comment, replies });
        }
    }
    roots.into_iter().filter_map(|r| built[r].take()).collect()
}

fn mark_reachable(start: usize, reached: &mut [bool], children: &[Vec<usize>]) {
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if !reached[i] {
            reached[i] = true;
            stack.extend(children[i].iter().copied());
        }
    }
}

impl Forum {
    /// Adds a comment, flattening reply chains to two levels, and credits the
    /// commenter.
    pub fn create_comment(&self, input: NewComment) -> ForumResult<Comment> {
        self.with_tx("create_comment", |conn| {
            let post = load_post(conn, input.post_id)?
                .ok_or_else(|| ForumError::not_found("post", input.post_id))?;
            if post.status == PostStatus::Deleted {
                return Err(ForumError::invalid(format!(
                    "post {} has been deleted",
                    input.post_id
                )));
            }

            let (parent_id, depth, reply_to) =
                placement(conn, input.post_id, input.parent_comment_id)?;

            conn.execute(
                "INSERT INTO forum_comments
                    (post_id, user_id, author_name, content, parent_comment_id, reply_to_user,
                     depth, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    input.post_id,
                    input.author.id,
                    input.author.name,
                    input.content,
                    parent_id,
                    reply_to,
                    depth,
                    now(),
                ],
            )?;
            let id = conn.last_insert_rowid();

            points::credit(
                conn,
                &input.author.id,
                PointReason::CommentCreated.reward(),
                PointReason::CommentCreated,
            )?;

            debug!(comment_id = id, post_id = input.post_id, depth, "comment created");
            load_comment(conn, id)?.ok_or_else(|| ForumError::not_found("comment", id))
        })
    }

    pub fn get_comment(&self, id: i64) -> ForumResult<Option<Comment>> {
        self.with_conn("get_comment", |conn| Ok(load_comment(conn, id)?))
    }

    pub fn get_comments_for_post(&self, post_id: i64) -> ForumResult<Vec<CommentNode>> {
        let flat = self.with_conn("get_comments_for_post", |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMENT_COLUMNS} FROM forum_comments
                 WHERE post_id = ?1
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt
                .query_map([post_id], map_comment)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(build_comment_tree(flat))
    }

    /// Marks an answer as accepted and pays its author once. Accepting an
    /// already accepted comment changes nothing.
    pub fn accept_comment(&self, comment_id: i64) -> ForumResult<Comment> {
        self.with_tx("accept_comment", |conn| {
            let comment = load_comment(conn, comment_id)?
                .ok_or_else(|| ForumError::not_found("comment", comment_id))?;
            if comment.is_accepted {
                return Ok(comment);
            }

            conn.execute(
                "UPDATE forum_comments SET is_accepted = 1 WHERE id = ?1",
                [comment_id],
            )?;
            points::credit(
                conn,
                &comment.author.id,
                PointReason::CommentAccepted.reward(),
                PointReason::CommentAccepted,
            )?;

            info!(comment_id, author = %comment.author.id, "comment accepted");
            Ok(Comment {
                is_accepted: true,
                ..comment
            })
        })
    }
}
