use mindocean_shared::{Level, PointReason, UserLevel, UserProfile};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::error::{ForumError, ForumResult};
use crate::{json_column, now, Forum};

pub const MAX_EXPERTISE_TAGS: usize = 5;
pub const MAX_BIO_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LevelTier {
    pub level: u8,
    pub title: &'static str,
    pub icon: &'static str,
    pub min_points: i64,
}

// Ascending by min_points.
const LEVELS: [LevelTier; 10] = [
    LevelTier { level: 1, title: "实习工程师", icon: "🌱", min_points: 0 },
    LevelTier { level: 2, title: "助理工程师", icon: "🔧", min_points: 50 },
    LevelTier { level: 3, title: "工程师", icon: "⚙️", min_points: 150 },
    LevelTier { level: 4, title: "高级工程师", icon: "🛠️", min_points: 400 },
    LevelTier { level: 5, title: "资深工程师", icon: "🔬", min_points: 800 },
    LevelTier { level: 6, title: "主任工程师", icon: "📐", min_points: 1500 },
    LevelTier { level: 7, title: "技术专家", icon: "💡", min_points: 3000 },
    LevelTier { level: 8, title: "高级专家", icon: "🏅", min_points: 6000 },
    LevelTier { level: 9, title: "首席专家", icon: "🏆", min_points: 12000 },
    LevelTier { level: 10, title: "技术大师", icon: "👑", min_points: 20000 },
];

pub const EXPERTISE_OPTIONS: &[&str] = &[
    "光刻",
    "刻蚀",
    "薄膜沉积",
    "离子注入",
    "CMP",
    "量测",
    "良率提升",
    "设备维护",
    "工艺整合",
    "封装测试",
    "安全管理",
    "自动化",
];

pub fn level_table() -> &'static [LevelTier] {
    &LEVELS
}

pub fn expertise_options() -> &'static [&'static str] {
    EXPERTISE_OPTIONS
}

/// Highest tier whose threshold is reached. Anything below the first
/// threshold, negative totals included, lands on tier 1.
pub fn level_for_points(points: i64) -> Level {
    let idx = LEVELS
        .iter()
        .rposition(|tier| tier.min_points <= points)
        .unwrap_or(0);
    let tier = &LEVELS[idx];
    Level {
        level: tier.level,
        title: tier.title.to_string(),
        icon: tier.icon.to_string(),
        current_level_min_points: tier.min_points,
        next_level_min_points: LEVELS.get(idx + 1).map(|next| next.min_points),
    }
}

pub(crate) fn ensure_profile(conn: &Connection, user_id: &str) -> rusqlite::Result<()> {
    let ts = now();
    conn.execute(
        "INSERT OR IGNORE INTO user_profiles (user_id, points, expertise_tags, bio, created_at, updated_at)
         VALUES (?1, 0, '[]', '', ?2, ?2)",
        params![user_id, ts],
    )?;
    Ok(())
}

/// Applies `delta` to the running total and records it in the ledger.
/// Returns the new total.
pub(crate) fn credit(
    conn: &Connection,
    user_id: &str,
    delta: i64,
    reason: PointReason,
) -> rusqlite::Result<i64> {
    ensure_profile(conn, user_id)?;
    let ts = now();
    conn.execute(
        "UPDATE user_profiles SET points = points + ?2, updated_at = ?3 WHERE user_id = ?1",
        params![user_id, delta, ts],
    )?;
    conn.execute(
        "INSERT INTO point_events (user_id, delta, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, delta, reason.as_str(), ts],
    )?;
    let total = conn.query_row(
        "SELECT points FROM user_profiles WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    debug!(user_id, delta, reason = reason.as_str(), total, "points credited");
    Ok(total)
}

fn load_profile(conn: &Connection, user_id: &str) -> rusqlite::Result<UserProfile> {
    conn.query_row(
        "SELECT user_id, points, expertise_tags, bio, created_at, updated_at
         FROM user_profiles WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(UserProfile {
                user_id: row.get(0)?,
                points: row.get(1)?,
                expertise_tags: json_column(row, 2)?,
                bio: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        },
    )
}

fn normalize_tags(tags: Vec<String>) -> ForumResult<Vec<String>> {
    let mut cleaned = Vec::with_capacity(tags.len().min(MAX_EXPERTISE_TAGS));
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ForumError::invalid("expertise tags must not be blank"));
        }
        cleaned.push(tag.to_string());
    }
    cleaned.truncate(MAX_EXPERTISE_TAGS);
    Ok(cleaned)
}

impl Forum {
    pub fn add_points(&self, user_id: &str, delta: i64, reason: PointReason) -> ForumResult<i64> {
        self.with_tx("add_points", |conn| Ok(credit(conn, user_id, delta, reason)?))
    }

    /// Fetches the profile, creating an empty one on first access.
    pub fn get_profile(&self, user_id: &str) -> ForumResult<UserProfile> {
        self.with_conn("get_profile", |conn| {
            ensure_profile(conn, user_id)?;
            Ok(load_profile(conn, user_id)?)
        })
    }

    pub fn get_user_level(&self, user_id: &str) -> ForumResult<UserLevel> {
        let profile = self.get_profile(user_id)?;
        Ok(UserLevel {
            level: level_for_points(profile.points),
            user_id: profile.user_id,
            points: profile.points,
        })
    }

    /// Replaces the expertise tags. Entries are trimmed, blanks are rejected and
    /// anything past the fifth tag is dropped.
    pub fn update_expertise_tags(
        &self,
        user_id: &str,
        tags: Vec<String>,
    ) -> ForumResult<UserProfile> {
        let tags = normalize_tags(tags)?;
        let encoded = serde_json::to_string(&tags)?;
        self.with_conn("update_expertise_tags", |conn| {
            ensure_profile(conn, user_id)?;
            conn.execute(
                "UPDATE user_profiles SET expertise_tags = ?2, updated_at = ?3 WHERE user_id = ?1",
                params![user_id, encoded, now()],
            )?;
            Ok(load_profile(conn, user_id)?)
        })
    }

    pub fn update_bio(&self, user_id: &str, bio: &str) -> ForumResult<UserProfile> {
        let bio: String = bio.chars().take(MAX_BIO_CHARS).collect();
        self.with_conn("update_bio", |conn| {
            ensure_profile(conn, user_id)?;
            conn.execute(
                "UPDATE user_profiles SET bio = ?2, updated_at = ?3 WHERE user_id = ?1",
                params![user_id, bio, now()],
            )?;
            Ok(load_profile(conn, user_id)?)
        })
    }

    /// Credits the daily login bonus at most once per UTC day. Returns the new
    /// total when credited, `None` when today's bonus was already taken.
    pub fn claim_daily_login(&self, user_id: &str) -> ForumResult<Option<i64>> {
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        self.with_tx("claim_daily_login", |conn| {
            let claimed = conn
                .query_row(
                    "SELECT id FROM point_events
                     WHERE user_id = ?1 AND reason = ?2 AND substr(created_at, 1, 10) = ?3
                     LIMIT 1",
                    params![user_id, PointReason::DailyLogin.as_str(), today],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            if claimed.is_some() {
                return Ok(None);
            }
            let reward = PointReason::DailyLogin.reward();
            Ok(Some(credit(conn, user_id, reward, PointReason::DailyLogin)?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn level_lookup_is_monotonic() {
        let mut last = 0;
        for points in (-100..25_000).step_by(7) {
            let level = level_for_points(points).level;
            assert!(level >= last, "level dropped at {points}");
            last = level;
        }
        assert_eq!(last, 10);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level_for_points(-30).level, 1);
        let entry = level_for_points(10);
        assert_eq!(entry.level, 1);
        assert_eq!(entry.title, "实习工程师");
        assert_eq!(entry.next_level_min_points, Some(50));
        assert_eq!(level_for_points(50).level, 2);
        let top = level_for_points(20_000);
        assert_eq!(top.level, 10);
        assert_eq!(top.current_level_min_points, 20_000);
        assert_eq!(top.next_level_min_points, None);
    }

    #[test]
    fn profile_is_created_lazily() {
        let (forum, _dir) = test_support::forum();
        let profile = forum.get_profile("u1").unwrap();
        assert_eq!(profile.points, 0);
        assert!(profile.expertise_tags.is_empty());
        assert_eq!(profile.bio, "");
    }

    #[test]
    fn points_may_go_negative_but_level_clamps() {
        let (forum, _dir) = test_support::forum();
        let total = forum
            .add_points("u1", -12, PointReason::Adjustment)
            .unwrap();
        assert_eq!(total, -12);
        let level = forum.get_user_level("u1").unwrap();
        assert_eq!(level.points, -12);
        assert_eq!(level.level.level, 1);
    }

    #[test]
    fn expertise_tags_are_trimmed_and_truncated() {
        let (forum, _dir) = test_support::forum();
        let tags = ["光刻", " 刻蚀 ", "CMP", "量测", "自动化", "良率提升", "封装测试"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let profile = forum.update_expertise_tags("u1", tags).unwrap();
        assert_eq!(profile.expertise_tags, vec!["光刻", "刻蚀", "CMP", "量测", "自动化"]);

        let err = forum
            .update_expertise_tags("u1", vec!["ok".into(), "  ".into()])
            .unwrap_err();
        assert!(matches!(err, ForumError::InvalidOperation(_)));
    }

    #[test]
    fn bio_is_truncated_by_characters() {
        let (forum, _dir) = test_support::forum();
        let long = "晶".repeat(250);
        let profile = forum.update_bio("u1", &long).unwrap();
        assert_eq!(profile.bio.chars().count(), MAX_BIO_CHARS);
    }

    #[test]
    fn daily_login_pays_once_per_day() {
        let (forum, _dir) = test_support::forum();
        assert_eq!(forum.claim_daily_login("u1").unwrap(), Some(2));
        assert_eq!(forum.claim_daily_login("u1").unwrap(), None);
        assert_eq!(forum.get_profile("u1").unwrap().points, 2);
    }
}
