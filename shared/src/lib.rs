use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Users ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub post_count: i64,
    pub like_count: i64,
    pub collect_count: i64,
    pub received_likes: i64,
}

/// Who wrote a post or comment, as shown next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
}

impl Author {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ── Pagination ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Negative values coming from loosely parsed query strings become 0.
    pub fn clamped(self) -> (i64, i64) {
        (self.limit.max(0), self.offset.max(0))
    }
}

// ── Posts ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    #[default]
    Help,
    Share,
    Question,
    Discussion,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Help => "help",
            PostType::Share => "share",
            PostType::Question => "question",
            PostType::Discussion => "discussion",
        }
    }
}

impl FromStr for PostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "help" => Ok(PostType::Help),
            "share" => Ok(PostType::Share),
            "question" => Ok(PostType::Question),
            "discussion" => Ok(PostType::Discussion),
            other => Err(format!(
                "unknown post type '{other}', expected one of: help, share, question, discussion"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Active,
    Deleted,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Active => "active",
            PostStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PostStatus::Active),
            "deleted" => Ok(PostStatus::Deleted),
            other => Err(format!("unknown post status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub attachments: Vec<Attachment>,
    pub author: Author,
    pub views: i64,
    pub likes: i64,
    pub comment_count: i64,
    pub is_top: bool,
    pub is_essence: bool,
    pub status: PostStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "type", default)]
    pub post_type: PostType,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub author: Author,
}

/// Fields an edit may touch. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub post_type: Option<PostType>,
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Latest,
    Hot,
    Essence,
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "latest" => Ok(SortMode::Latest),
            "hot" => Ok(SortMode::Hot),
            "essence" => Ok(SortMode::Essence),
            other => Err(format!(
                "unknown sort mode '{other}', expected one of: latest, hot, essence"
            )),
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortMode::Latest => "latest",
            SortMode::Hot => "hot",
            SortMode::Essence => "essence",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortMode,
    #[serde(default = "default_post_page")]
    pub page: Pagination,
}

fn default_post_page() -> Pagination {
    Pagination::new(20, 0)
}

impl Default for PostFilter {
    fn default() -> Self {
        Self {
            category: None,
            search: None,
            sort: SortMode::Latest,
            page: default_post_page(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumCategory {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
}

// ── Comments ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author: Author,
    pub content: String,
    pub parent_comment_id: Option<i64>,
    pub reply_to_user: Option<String>,
    pub depth: u8,
    pub is_accepted: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: i64,
    pub author: Author,
    pub content: String,
    pub parent_comment_id: Option<i64>,
}

/// A comment together with the replies that hang off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

// ── Interactions ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeToggle {
    pub liked: bool,
    pub likes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectToggle {
    pub collected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInteraction {
    pub liked: bool,
    pub collected: bool,
}

// ── Messages ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_name: Option<String>,
    pub receiver_name: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

// ── Profiles, points, levels ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub points: i64,
    pub expertise_tags: Vec<String>,
    pub bio: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub level: u8,
    pub title: String,
    pub icon: String,
    pub current_level_min_points: i64,
    pub next_level_min_points: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLevel {
    pub user_id: String,
    pub points: i64,
    pub level: Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointReason {
    PostCreated,
    PostLiked,
    PostUnliked,
    CommentCreated,
    CommentAccepted,
    DailyLogin,
    Adjustment,
}

impl PointReason {
    /// The fixed reward for this reason. Manual adjustments carry their own delta.
    pub fn reward(&self) -> i64 {
        match self {
            PointReason::PostCreated => 10,
            PointReason::PostLiked => 5,
            PointReason::PostUnliked => -5,
            PointReason::CommentCreated => 3,
            PointReason::CommentAccepted => 20,
            PointReason::DailyLogin => 2,
            PointReason::Adjustment => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PointReason::PostCreated => "post_created",
            PointReason::PostLiked => "post_liked",
            PointReason::PostUnliked => "post_unliked",
            PointReason::CommentCreated => "comment_created",
            PointReason::CommentAccepted => "comment_accepted",
            PointReason::DailyLogin => "daily_login",
            PointReason::Adjustment => "adjustment",
        }
    }
}
