use mindocean_api::{db, Forum};
use mindocean_shared::{Author, NewComment, NewPost, PostFilter, PostType};
use tempfile::TempDir;

fn forum() -> (Forum, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flow.db");
    let pool = db::open_pool(path.to_str().unwrap(), 4).unwrap();
    db::run_migrations(&pool).unwrap();
    (Forum::new(pool), dir)
}

fn question(author: &str) -> NewPost {
    NewPost {
        title: "光刻胶显影残留".into(),
        content: "Developer leaves residue after PEB, any ideas?".into(),
        category: "process".into(),
        tags: vec!["lithography".into()],
        post_type: PostType::Question,
        attachments: vec![],
        author: Author::new(author, author),
    }
}

#[test_log::test]
fn like_and_unlike_move_author_points() {
    let (forum, _dir) = forum();
    let post = forum.create_post(question("u1")).unwrap();
    assert_eq!(forum.get_profile("u1").unwrap().points, 10);

    let liked = forum.toggle_like(post.id, "u2").unwrap();
    assert!(liked.liked);
    assert_eq!(liked.likes, 1);
    assert_eq!(forum.get_profile("u1").unwrap().points, 15);

    let unliked = forum.toggle_like(post.id, "u2").unwrap();
    assert!(!unliked.liked);
    assert_eq!(unliked.likes, 0);
    assert_eq!(forum.get_profile("u1").unwrap().points, 10);
    assert_eq!(forum.get_user_level("u1").unwrap().level.level, 1);
}

#[test_log::test]
fn replies_to_replies_stay_two_levels_deep() {
    let (forum, _dir) = forum();
    let post = forum.create_post(question("u1")).unwrap();
    let comment = |author: &str, parent: Option<i64>| NewComment {
        post_id: post.id,
        author: Author::new(author, author),
        content: format!("from {author}"),
        parent_comment_id: parent,
    };

    let root = forum.create_comment(comment("u2", None)).unwrap();
    let reply = forum.create_comment(comment("u3", Some(root.id))).unwrap();
    let nested = forum.create_comment(comment("u4", Some(reply.id))).unwrap();
    assert_eq!(nested.parent_comment_id, Some(root.id));
    assert_eq!(nested.depth, 1);
    assert_eq!(nested.reply_to_user.as_deref(), Some("u3"));

    let tree = forum.get_comments_for_post(post.id).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].replies.len(), 2);
    assert!(tree[0].replies.iter().all(|r| r.replies.is_empty()));

    let listed = forum
        .list_posts(&PostFilter {
            search: Some("显影".into()),
            ..PostFilter::default()
        })
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].comment_count, 3);
}

#[test_log::test]
fn reading_a_conversation_clears_unread() {
    let (forum, _dir) = forum();
    forum.send_message("u1", "u2", "hello").unwrap();
    assert_eq!(forum.get_unread_count("u2").unwrap(), 1);

    forum.mark_conversation_read("u2", "u1").unwrap();
    assert_eq!(forum.get_unread_count("u2").unwrap(), 0);
}
