use mindocean_shared::{CollectToggle, LikeToggle, PointReason, PostInteraction, PostStatus};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{ForumError, ForumResult};
use crate::{now, parsed_column, points, Forum};

/// Author of a post that can still be interacted with.
fn active_post_author(conn: &Connection, post_id: i64) -> ForumResult<String> {
    let (author, status): (String, PostStatus) = conn
        .query_row(
            "SELECT user_id, status FROM forum_posts WHERE id = ?1",
            [post_id],
            |row| Ok((row.get(0)?, parsed_column(row, 1)?)),
        )
        .optional()?
        .ok_or_else(|| ForumError::not_found("post", post_id))?;
    if status == PostStatus::Deleted {
        return Err(ForumError::invalid(format!("post {post_id} has been deleted")));
    }
    Ok(author)
}

fn row_exists(conn: &Connection, table: &str, post_id: i64, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE user_id = ?1 AND post_id = ?2)"),
        params![user_id, post_id],
        |row| row.get(0),
    )
}

fn post_ids_for(conn: &Connection, table: &str, user_id: &str) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT post_id FROM {table} WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
    ))?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

impl Forum {
    /// Flips the like state. The like row, the post's counter and the author's
    /// points change in one transaction; liking your own post moves the
    /// counter but never your points.
    pub fn toggle_like(&self, post_id: i64, user_id: &str) -> ForumResult<LikeToggle> {
        self.with_tx("toggle_like", |conn| {
            let author = active_post_author(conn, post_id)?;
            let existing = row_exists(conn, "forum_likes", post_id, user_id)?;

            let (liked, step, reason) = if existing {
                conn.execute(
                    "DELETE FROM forum_likes WHERE user_id = ?1 AND post_id = ?2",
                    params![user_id, post_id],
                )?;
                (false, -1, PointReason::PostUnliked)
            } else {
                conn.execute(
                    "INSERT INTO forum_likes (user_id, post_id, created_at) VALUES (?1, ?2, ?3)",
                    params![user_id, post_id, now()],
                )?;
                (true, 1, PointReason::PostLiked)
            };

            conn.execute(
                "UPDATE forum_posts SET likes = likes + ?2 WHERE id = ?1",
                params![post_id, step],
            )?;
            if author != user_id {
                points::credit(conn, &author, reason.reward(), reason)?;
            }

            let likes: i64 = conn.query_row(
                "SELECT likes FROM forum_posts WHERE id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            debug!(post_id, user_id, liked, likes, "like toggled");
            Ok(LikeToggle { liked, likes })
        })
    }

    /// Flips the bookmark state. No counter and no points.
    pub fn toggle_collect(&self, post_id: i64, user_id: &str) -> ForumResult<CollectToggle> {
        self.with_tx("toggle_collect", |conn| {
            active_post_author(conn, post_id)?;
            let collected = if row_exists(conn, "forum_collections", post_id, user_id)? {
                conn.execute(
                    "DELETE FROM forum_collections WHERE user_id = ?1 AND post_id = ?2",
                    params![user_id, post_id],
                )?;
                false
            } else {
                conn.execute(
                    "INSERT INTO forum_collections (user_id, post_id, created_at) VALUES (?1, ?2, ?3)",
                    params![user_id, post_id, now()],
                )?;
                true
            };
            debug!(post_id, user_id, collected, "collect toggled");
            Ok(CollectToggle { collected })
        })
    }

    pub fn interaction_status(&self, post_id: i64, user_id: &str) -> ForumResult<PostInteraction> {
        self.with_conn("interaction_status", |conn| {
            Ok(PostInteraction {
                liked: row_exists(conn, "forum_likes", post_id, user_id)?,
                collected: row_exists(conn, "forum_collections", post_id, user_id)?,
            })
        })
    }

    pub fn liked_post_ids(&self, user_id: &str) -> ForumResult<Vec<i64>> {
        self.with_conn("liked_post_ids", |conn| {
            Ok(post_ids_for(conn, "forum_likes", user_id)?)
        })
    }

    pub fn collected_post_ids(&self, user_id: &str) -> ForumResult<Vec<i64>> {
        self.with_conn("collected_post_ids", |conn| {
            Ok(post_ids_for(conn, "forum_collections", user_id)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use mindocean_shared::{Author, NewPost, Pagination, PostType};

    fn post_by(forum: &Forum, author: &str) -> i64 {
        forum
            .create_post(NewPost {
                title: "hi".into(),
                content: "first post".into(),
                category: "general".into(),
                tags: vec![],
                post_type: PostType::Share,
                attachments: vec![],
                author: Author::new(author, author),
            })
            .unwrap()
            .id
    }

    fn like_rows(forum: &Forum, post_id: i64) -> i64 {
        forum
            .pool()
            .get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM forum_likes WHERE post_id = ?1",
                [post_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn like_twice_is_an_involution() {
        let (forum, _dir) = test_support::forum();
        let post = post_by(&forum, "u1");
        let before = forum.get_post(post).unwrap().unwrap().likes;

        let on = forum.toggle_like(post, "u2").unwrap();
        assert_eq!(on, LikeToggle { liked: true, likes: before + 1 });
        assert_eq!(like_rows(&forum, post), 1);

        let off = forum.toggle_like(post, "u2").unwrap();
        assert_eq!(off, LikeToggle { liked: false, likes: before });
        assert_eq!(like_rows(&forum, post), 0);
        assert_eq!(forum.get_post(post).unwrap().unwrap().likes, before);
    }

    #[test]
    fn counter_tracks_rows_across_users() {
        let (forum, _dir) = test_support::forum();
        let post = post_by(&forum, "u1");
        for user in ["a", "b", "c"] {
            forum.toggle_like(post, user).unwrap();
        }
        forum.toggle_like(post, "b").unwrap();

        let likes = forum.get_post(post).unwrap().unwrap().likes;
        assert_eq!(likes, 2);
        assert_eq!(likes, like_rows(&forum, post));
    }

    #[test]
    fn self_like_never_moves_points() {
        let (forum, _dir) = test_support::forum();
        let post = post_by(&forum, "u1");
        assert_eq!(forum.get_profile("u1").unwrap().points, 10);

        let toggled = forum.toggle_like(post, "u1").unwrap();
        assert_eq!(toggled.likes, 1);
        assert_eq!(forum.get_profile("u1").unwrap().points, 10);

        forum.toggle_like(post, "u1").unwrap();
        assert_eq!(forum.get_profile("u1").unwrap().points, 10);
    }

    #[test]
    fn missing_post_leaves_nothing_behind() {
        let (forum, _dir) = test_support::forum();
        let err = forum.toggle_like(31337, "u2").unwrap_err();
        assert!(matches!(err, ForumError::NotFound { entity: "post", .. }));
        assert_eq!(like_rows(&forum, 31337), 0);
        assert!(matches!(
            forum.toggle_collect(31337, "u2"),
            Err(ForumError::NotFound { .. })
        ));
    }

    #[test]
    fn failed_point_credit_rolls_back_the_like() {
        let (forum, _dir) = test_support::forum();
        let post = post_by(&forum, "u1");
        forum
            .pool()
            .get()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER refuse_points BEFORE INSERT ON point_events
                 BEGIN SELECT RAISE(ABORT, 'ledger closed'); END;",
            )
            .unwrap();

        let err = forum.toggle_like(post, "u2").unwrap_err();
        assert!(err.is_store_failure());
        assert_eq!(like_rows(&forum, post), 0);
        assert_eq!(forum.get_post(post).unwrap().unwrap().likes, 0);
        assert_eq!(forum.get_profile("u1").unwrap().points, 10);
    }

    #[test]
    fn deleted_posts_refuse_likes_and_bookmarks() {
        let (forum, _dir) = test_support::forum();
        let post = post_by(&forum, "u1");
        forum.delete_post(post).unwrap();

        assert!(matches!(
            forum.toggle_like(post, "u2"),
            Err(ForumError::InvalidOperation(_))
        ));
        assert!(matches!(
            forum.toggle_collect(post, "u2"),
            Err(ForumError::InvalidOperation(_))
        ));
        assert_eq!(like_rows(&forum, post), 0);
        assert_eq!(forum.get_profile("u1").unwrap().points, 10);
    }

    #[test]
    fn collect_toggles_without_side_effects() {
        let (forum, _dir) = test_support::forum();
        let post = post_by(&forum, "u1");

        assert!(forum.toggle_collect(post, "u2").unwrap().collected);
        assert_eq!(
            forum.interaction_status(post, "u2").unwrap(),
            PostInteraction { liked: false, collected: true }
        );
        assert_eq!(forum.collected_post_ids("u2").unwrap(), vec![post]);
        let collected = forum
            .list_posts_by_ids(&forum.collected_post_ids("u2").unwrap(), Pagination::new(10, 0))
            .unwrap();
        assert_eq!(collected.len(), 1);

        assert!(!forum.toggle_collect(post, "u2").unwrap().collected);
        assert!(forum.collected_post_ids("u2").unwrap().is_empty());
        assert_eq!(forum.get_profile("u1").unwrap().points, 10);
        assert_eq!(forum.get_post(post).unwrap().unwrap().likes, 0);
    }
}
