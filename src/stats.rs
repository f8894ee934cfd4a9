//! Per-user points, level and streak, recomputed from stored counts on every request.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::usage::UsageLogger;

pub const LEVEL_THRESHOLDS: [i64; 10] = [0, 20, 50, 100, 200, 500, 1000, 2000, 5000, 10000];
pub const MAX_LEVEL: u32 = LEVEL_THRESHOLDS.len() as u32;

pub const POINTS_PER_RUN: i64 = 1;
pub const POINTS_PER_CREATED: i64 = 5;
pub const POINTS_PER_FAVORITE: i64 = 3;

pub fn total_points(runs: i64, created: i64, favorites_received: i64) -> i64 {
    runs * POINTS_PER_RUN + created * POINTS_PER_CREATED + favorites_received * POINTS_PER_FAVORITE
}

/// 1-based level: the last threshold not above `points`.
pub fn level(points: i64) -> u32 {
    let reached = LEVEL_THRESHOLDS.iter().take_while(|t| **t <= points).count();
    reached.max(1) as u32
}

/// Percent of the way to the next level, 0 at the max level.
pub fn progress(points: i64, level: u32) -> u32 {
    if level >= MAX_LEVEL || level == 0 {
        return 0;
    }
    let lo = LEVEL_THRESHOLDS[(level - 1) as usize];
    let hi = LEVEL_THRESHOLDS[level as usize];
    let pct = (points - lo) * 100 / (hi - lo);
    pct.clamp(0, 100) as u32
}

/// Consecutive days with activity, ending today or yesterday. `days` may be unsorted
/// and contain duplicates.
pub fn current_streak(days: &[NaiveDate], today: NaiveDate) -> u32 {
    let mut days: Vec<NaiveDate> = days.iter().copied().filter(|d| *d <= today).collect();
    days.sort_unstable_by(|a, b| b.cmp(a));
    days.dedup();

    let Some(&latest) = days.first() else {
        return 0;
    };
    if latest < today - Duration::days(1) {
        return 0;
    }
    let mut streak = 0;
    let mut expected = latest;
    for d in days {
        if d != expected {
            break;
        }
        streak += 1;
        expected = d - Duration::days(1);
    }
    streak
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStatsSnapshot {
    pub prompts_run: i64,
    pub prompts_created: i64,
    pub favorites_received: i64,
    pub total_points: i64,
    pub level: u32,
    pub progress: u32,
    pub max_level: bool,
    pub current_streak_days: u32,
}

impl UserStatsSnapshot {
    pub fn from_counts(runs: i64, created: i64, favorites_received: i64, streak: u32) -> Self {
        let points = total_points(runs, created, favorites_received);
        let level = level(points);
        Self {
            prompts_run: runs,
            prompts_created: created,
            favorites_received,
            total_points: points,
            level,
            progress: progress(points, level),
            max_level: level >= MAX_LEVEL,
            current_streak_days: streak,
        }
    }
}

#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn count_prompts_by_creator(&self, user_id: &str) -> rusqlite::Result<i64>;
    /// Sum of favorites on every prompt the user created.
    async fn count_favorites_received(&self, user_id: &str) -> rusqlite::Result<i64>;
    /// Distinct UTC dates with at least one run by the user.
    async fn run_days_by_user(&self, user_id: &str) -> rusqlite::Result<Vec<NaiveDate>>;
}

#[derive(Clone)]
pub struct StatsAggregator {
    usage: UsageLogger,
    source: Arc<dyn StatsSource>,
}

impl StatsAggregator {
    pub fn new(usage: UsageLogger, source: Arc<dyn StatsSource>) -> Self {
        Self { usage, source }
    }

    pub async fn snapshot(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> rusqlite::Result<UserStatsSnapshot> {
        let runs = self.usage.count_by_user(user_id).await?;
        let created = self.source.count_prompts_by_creator(user_id).await?;
        let favorites = self.source.count_favorites_received(user_id).await?;
        let days = self.source.run_days_by_user(user_id).await?;
        Ok(UserStatsSnapshot::from_counts(
            runs,
            created,
            favorites,
            current_streak(&days, today),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weighted_points() {
        assert_eq!(total_points(10, 2, 1), 23);
        assert_eq!(total_points(0, 0, 0), 0);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level(0), 1);
        assert_eq!(level(19), 1);
        assert_eq!(level(20), 2);
        assert_eq!(level(49), 2);
        assert_eq!(level(50), 3);
        assert_eq!(level(9999), 9);
        assert_eq!(level(10_000), 10);
        assert_eq!(level(1_000_000), 10);
        assert_eq!(level(-5), 1);
    }

    #[test]
    fn level_is_monotonic() {
        let mut prev = level(0);
        for p in 0..12_000 {
            let l = level(p);
            assert!(l >= prev);
            prev = l;
        }
    }

    #[test]
    fn progress_within_level() {
        assert_eq!(progress(23, 2), 10);
        assert_eq!(progress(0, 1), 0);
        assert_eq!(progress(19, 1), 95);
        assert_eq!(progress(7500, 9), 50);
        assert_eq!(progress(50_000, 10), 0);
    }

    #[test]
    fn snapshot_from_example_counts() {
        let s = UserStatsSnapshot::from_counts(10, 2, 1, 0);
        assert_eq!(s.total_points, 23);
        assert_eq!(s.level, 2);
        assert_eq!(s.progress, 10);
        assert!(!s.max_level);

        let top = UserStatsSnapshot::from_counts(10_000, 0, 0, 0);
        assert_eq!(top.level, MAX_LEVEL);
        assert_eq!(top.progress, 0);
        assert!(top.max_level);
    }

    #[test]
    fn streak_counts_back_from_today_or_yesterday() {
        let today = d(2025, 3, 10);
        assert_eq!(current_streak(&[], today), 0);
        assert_eq!(
            current_streak(&[d(2025, 3, 10), d(2025, 3, 9), d(2025, 3, 8), d(2025, 3, 6)], today),
            3
        );
        assert_eq!(current_streak(&[d(2025, 3, 9), d(2025, 3, 8)], today), 2);
        assert_eq!(current_streak(&[d(2025, 3, 8), d(2025, 3, 7)], today), 0);
        // unsorted input with duplicates, across a month boundary
        assert_eq!(
            current_streak(&[d(2025, 2, 28), d(2025, 3, 1), d(2025, 3, 1)], d(2025, 3, 1)),
            2
        );
    }
}
