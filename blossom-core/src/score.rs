//! Time-decayed popularity scores.
//!
//! [`hot_score`] is the score that selects the trending feed. The other
//! functions are alternative heuristics kept alongside it for comparisons and
//! offline tuning.

use crate::{Timestamp, Topic};
use chrono::Utc;

/// Exponent of the age penalty in [`hot_score`].
pub const HOT_GRAVITY: f64 = 1.8;
/// Exponent of the age penalty in [`engagement_score`].
pub const ENGAGEMENT_GRAVITY: f64 = 1.5;
/// Offset added to the age so brand-new topics do not divide by ~0.
pub const AGE_OFFSET_HOURS: f64 = 2.0;
/// z for a 95% confidence interval.
pub const WILSON_Z: f64 = 1.96;

/// `(likes - dislikes) / (age_hours + 2)^1.8`
pub fn hot_score(likes: i64, dislikes: i64, age_hours: f64) -> f64 {
    let votes = (likes - dislikes) as f64;
    votes / (age_hours + AGE_OFFSET_HOURS).powf(HOT_GRAVITY)
}

/// Classic Hacker News ranking: `(points - 1) / (age_hours + 2)^1.8`.
pub fn hacker_news_score(points: i64, age_hours: f64) -> f64 {
    (points - 1) as f64 / (age_hours + AGE_OFFSET_HOURS).powf(HOT_GRAVITY)
}

/// Lower bound of the Wilson score interval for the like ratio.
///
/// Age is ignored; this answers "how confident are we that people like it".
pub fn wilson_score(likes: i64, dislikes: i64) -> f64 {
    let n = (likes + dislikes) as f64;
    if n <= 0.0 {
        return 0.0;
    }
    let z = WILSON_Z;
    let p = likes as f64 / n;
    let left = p + z * z / (2.0 * n);
    let right = z * ((p * (1.0 - p) + z * z / (4.0 * n)) / n).sqrt();
    let under = 1.0 + z * z / n;
    (left - right) / under
}

/// Weighted engagement with a gentler decay.
///
/// Likes weigh 1, comments 2, views 0.01.
pub fn engagement_score(likes: i64, comments: i64, views: i64, age_hours: f64) -> f64 {
    let engagement = likes as f64 + comments as f64 * 2.0 + views as f64 * 0.01;
    engagement / (age_hours + AGE_OFFSET_HOURS).powf(ENGAGEMENT_GRAVITY)
}

/// Hours elapsed from `created_at` to `now`, never negative.
pub fn age_hours(created_at: Timestamp, now: Timestamp) -> f64 {
    let millis = (now - created_at).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

/// Hot score of a topic as of `now`.
pub fn topic_hot_score(topic: &Topic, now: Timestamp) -> f64 {
    hot_score(
        topic.like_count,
        topic.dislike_count,
        age_hours(topic.created_at, now),
    )
}

/// Sort topics by descending hot score as of `now`.
///
/// Ties keep their input order.
pub fn rank_topics_at(topics: Vec<Topic>, now: Timestamp) -> Vec<Topic> {
    let mut scored: Vec<(f64, Topic)> = topics
        .into_iter()
        .map(|t| (topic_hot_score(&t, now), t))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, t)| t).collect()
}

/// Sort topics by descending hot score as of the current time.
pub fn rank_topics(topics: Vec<Topic>) -> Vec<Topic> {
    rank_topics_at(topics, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn topic(id: i64, likes: i64, dislikes: i64, created_at: Timestamp) -> Topic {
        Topic {
            id,
            user_id: 1,
            username: String::new(),
            title: format!("topic {}", id),
            content: String::new(),
            category: "tech".into(),
            like_count: likes,
            dislike_count: dislikes,
            comment_count: 0,
            view_count: 0,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn test_hot_score_reference_values() {
        let s = hot_score(10, 2, 0.0);
        assert!((s - 8.0 / 2f64.powf(1.8)).abs() < 1e-12);
        assert!((s - 2.297).abs() < 1e-3);
        assert_eq!(hot_score(0, 0, 10.0), 0.0);
    }

    #[test]
    fn test_hot_score_negative_margin() {
        assert!(hot_score(1, 5, 1.0) < 0.0);
    }

    #[test]
    fn test_hacker_news_score() {
        assert_eq!(hacker_news_score(1, 3.0), 0.0);
        assert!(hacker_news_score(11, 0.0) > hacker_news_score(11, 5.0));
    }

    #[test]
    fn test_wilson_score_bounds() {
        assert_eq!(wilson_score(0, 0), 0.0);
        let all_likes = wilson_score(100, 0);
        assert!(all_likes > 0.95 && all_likes < 1.0);
        // More evidence, same ratio, higher lower bound.
        assert!(wilson_score(80, 20) > wilson_score(8, 2));
    }

    #[test]
    fn test_engagement_score_weights() {
        let base = engagement_score(1, 0, 0, 0.0);
        let with_comment = engagement_score(1, 1, 0, 0.0);
        assert!((with_comment - base * 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_age_hours_never_negative() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(age_hours(now + Duration::hours(1), now), 0.0);
        assert!((age_hours(now - Duration::minutes(90), now) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_rank_topics_prefers_fresh_margin() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ranked = rank_topics_at(
            vec![
                topic(1, 50, 0, now - Duration::hours(48)),
                topic(2, 10, 0, now - Duration::hours(1)),
                topic(3, 0, 3, now),
            ],
            now,
        );
        let ids: Vec<i64> = ranked.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_hot_score_decays_with_age(
            likes in 0i64..10_000,
            dislikes in 0i64..10_000,
            age in 0.0f64..1_000.0,
            extra in 0.001f64..100.0,
        ) {
            let young = hot_score(likes, dislikes, age);
            let old = hot_score(likes, dislikes, age + extra);
            prop_assert!(young.abs() >= old.abs());
            prop_assert!(young.signum() == old.signum() || young == 0.0);
        }
    }
}
