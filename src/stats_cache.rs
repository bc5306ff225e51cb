use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::UserStats;

/// Ten years; keeps `now + ttl` far from overflow.
const MAX_TTL_SECS: u64 = 315_360_000;

#[derive(Debug, Clone)]
struct CachedStats {
    stats: UserStats,
    /// Latest session `updated_at` seen when the entry was computed.
    last_session_update: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

/// Per-user statistics cache with TTL expiry and invalidation on session change.
///
/// Best effort only: a miss just means the stats are recomputed.
#[derive(Debug, Clone)]
pub struct StatsCache {
    cache: Arc<RwLock<HashMap<Uuid, CachedStats>>>,
    ttl: Duration,
}

impl StatsCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds.min(MAX_TTL_SECS) as i64),
        }
    }

    /// Cached stats for `user_id`, provided the entry is fresh and was computed
    /// against the same latest session update.
    pub async fn get(
        &self,
        user_id: Uuid,
        last_session_update: Option<DateTime<Utc>>,
    ) -> Option<UserStats> {
        self.get_at(user_id, last_session_update, Utc::now()).await
    }

    async fn get_at(
        &self,
        user_id: Uuid,
        last_session_update: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<UserStats> {
        let mut cache = self.cache.write().await;

        if let Some(cached) = cache.get(&user_id) {
            if cached.expires_at > now && cached.last_session_update == last_session_update {
                debug!(user_id = %user_id, "Stats cache hit");
                return Some(cached.stats.clone());
            }
            debug!(user_id = %user_id, "Stats cache entry stale, removing");
            cache.remove(&user_id);
        }

        debug!(user_id = %user_id, "Stats cache miss");
        None
    }

    pub async fn insert(&self, stats: UserStats) {
        self.insert_at(stats, Utc::now()).await
    }

    async fn insert_at(&self, stats: UserStats, now: DateTime<Utc>) {
        let mut cache = self.cache.write().await;
        cache.retain(|_, cached| cached.expires_at > now);

        let user_id = stats.user_id;
        cache.insert(
            user_id,
            CachedStats {
                last_session_update: stats.last_session_update,
                stats,
                expires_at: now + self.ttl,
            },
        );
        debug!(user_id = %user_id, cache_size = cache.len(), "Cached user stats");
    }

    pub async fn invalidate(&self, user_id: Uuid) {
        self.cache.write().await.remove(&user_id);
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(user_id: Uuid, last: Option<DateTime<Utc>>) -> UserStats {
        UserStats {
            user_id,
            completed_sessions: 2,
            questions_answered: 10,
            correct_answers: 7,
            average_score: 70.0,
            last_session_update: last,
        }
    }

    #[tokio::test]
    async fn test_hit_until_expiry() {
        let cache = StatsCache::new(60);
        let user = Uuid::new_v4();
        let now = Utc::now();
        let last = Some(now - Duration::minutes(5));

        cache.insert_at(stats(user, last), now).await;
        assert!(cache.get_at(user, last, now + Duration::seconds(59)).await.is_some());
        assert!(cache.get_at(user, last, now + Duration::seconds(61)).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_session_update_invalidates() {
        let cache = StatsCache::new(300);
        let user = Uuid::new_v4();
        let now = Utc::now();
        let last = Some(now - Duration::minutes(1));

        cache.insert_at(stats(user, last), now).await;
        assert!(cache.get_at(user, Some(now), now).await.is_none());
        assert!(cache.get_at(user, last, now).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_and_expired_cleanup() {
        let cache = StatsCache::new(10);
        let now = Utc::now();
        let old_user = Uuid::new_v4();
        let new_user = Uuid::new_v4();

        cache.insert_at(stats(old_user, None), now).await;
        cache.insert_at(stats(new_user, None), now + Duration::seconds(30)).await;
        assert_eq!(cache.len().await, 1);

        cache.invalidate(new_user).await;
        assert_eq!(cache.len().await, 0);
    }
}
