//! Client-side shaping of admin aggregates for charts and tables.

use std::collections::BTreeMap;
use chrono::{DateTime, Datelike, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use crate::models::{ClusterStat, DateRange, FeedbackBucket, Granularity};

pub const OTHER_LABEL: &str = "Other";

/// Upper bound on points in one feedback series; older buckets are dropped.
pub const MAX_FEEDBACK_BUCKETS: usize = 24 * 93;

impl Granularity {
    pub fn step(&self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
            Granularity::Week => Duration::weeks(1),
        }
    }

    /// Start of the bucket containing `at`. Weeks start on Monday.
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hour => at.duration_trunc(Duration::hours(1)).unwrap_or(at),
            Granularity::Day => at.duration_trunc(Duration::days(1)).unwrap_or(at),
            Granularity::Week => {
                let day = at.duration_trunc(Duration::days(1)).unwrap_or(at);
                day - Duration::days(day.weekday().num_days_from_monday() as i64)
            }
        }
    }
}

/// Re-bucket, merge and zero-fill feedback counts so the series has one
/// entry per bucket from the start of `range` to its end.
pub fn fill_feedback_gaps(
    buckets: &[FeedbackBucket],
    granularity: Granularity,
    range: Option<DateRange>,
) -> Vec<FeedbackBucket> {
    let mut merged: BTreeMap<DateTime<Utc>, FeedbackBucket> = BTreeMap::new();
    for bucket in buckets {
        let start = granularity.bucket_start(bucket.bucket_start);
        let entry = merged
            .entry(start)
            .or_insert_with(|| FeedbackBucket::empty(start));
        entry.likes += bucket.likes;
        entry.dislikes += bucket.dislikes;
        entry.neutral += bucket.neutral;
    }

    let bounds = match range {
        Some(r) => Some((granularity.bucket_start(r.from), granularity.bucket_start(r.to))),
        None => merged
            .keys()
            .next()
            .copied()
            .zip(merged.keys().next_back().copied()),
    };

    let Some((mut first, last)) = bounds else {
        return Vec::new();
    };

    let step = granularity.step();
    let span = (last - first).num_seconds() / step.num_seconds().max(1);
    if span >= MAX_FEEDBACK_BUCKETS as i64 {
        first = last - step * (MAX_FEEDBACK_BUCKETS as i32 - 1);
    }
    merged.retain(|start, _| *start >= first && *start <= last);

    let mut cursor = first;
    while cursor <= last {
        merged
            .entry(cursor)
            .or_insert_with(|| FeedbackBucket::empty(cursor));
        cursor += step;
    }

    merged.into_values().collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackTotals {
    pub likes: u64,
    pub dislikes: u64,
    pub neutral: u64,
    pub total: u64,
    /// `likes / (likes + dislikes)`; absent when nobody voted.
    pub satisfaction_rate: Option<f64>,
}

pub fn feedback_totals(buckets: &[FeedbackBucket]) -> FeedbackTotals {
    let (likes, dislikes, neutral) = buckets.iter().fold((0, 0, 0), |(l, d, n), b| {
        (l + b.likes, d + b.dislikes, n + b.neutral)
    });
    let voted = likes + dislikes;

    FeedbackTotals {
        likes,
        dislikes,
        neutral,
        total: voted + neutral,
        satisfaction_rate: (voted > 0).then(|| likes as f64 / voted as f64),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub name: String,
    pub count: u64,
    pub percent: f64,
}

fn shares(mut entries: Vec<(String, u64)>, top_n: Option<usize>) -> Vec<Share> {
    let total: u64 = entries.iter().map(|(_, c)| c).sum();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    if let Some(n) = top_n {
        if entries.len() > n {
            let tail: u64 = entries.drain(n..).map(|(_, c)| c).sum();
            entries.push((OTHER_LABEL.to_string(), tail));
        }
    }

    entries
        .into_iter()
        .map(|(name, count)| Share {
            name,
            count,
            percent: if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            },
        })
        .collect()
}

/// Per-cluster share of all requests, largest first. With `top_n`, the
/// remaining clusters are folded into one "Other" entry.
pub fn cluster_shares(stats: &[ClusterStat], top_n: Option<usize>) -> Vec<Share> {
    shares(
        stats.iter().map(|s| (s.cluster.clone(), s.count)).collect(),
        top_n,
    )
}

pub fn sub_cluster_shares(stat: &ClusterStat) -> Vec<Share> {
    shares(
        stat.sub_clusters
            .iter()
            .map(|s| (s.name.clone(), s.count))
            .collect(),
        None,
    )
}

/// Render a horizontal bar for terminal charts.
pub fn bar(value: u64, max: u64, width: usize) -> String {
    if max == 0 {
        return String::new();
    }
    let filled = ((value as f64 / max as f64) * width as f64).round() as usize;
    "█".repeat(filled.min(width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubClusterStat;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn bucket(start: DateTime<Utc>, likes: u64, dislikes: u64, neutral: u64) -> FeedbackBucket {
        FeedbackBucket {
            bucket_start: start,
            likes,
            dislikes,
            neutral,
        }
    }

    #[test]
    fn weeks_start_on_monday() {
        // 2024-05-02 is a Thursday.
        let start = Granularity::Week.bucket_start(at(2024, 5, 2, 15));
        assert_eq!(start, at(2024, 4, 29, 0));
        assert_eq!(Granularity::Hour.bucket_start(Utc.with_ymd_and_hms(2024, 5, 2, 15, 42, 7).unwrap()), at(2024, 5, 2, 15));
    }

    #[test]
    fn gaps_are_zero_filled_across_the_range() {
        let buckets = vec![bucket(at(2024, 5, 1, 0), 3, 1, 0), bucket(at(2024, 5, 4, 0), 1, 0, 2)];
        let range = DateRange {
            from: at(2024, 5, 1, 8),
            to: at(2024, 5, 5, 8),
        };

        let series = fill_feedback_gaps(&buckets, Granularity::Day, Some(range));

        assert_eq!(series.len(), 5);
        assert_eq!(series[0].likes, 3);
        assert_eq!(series[1].total(), 0);
        assert_eq!(series[3].neutral, 2);
        assert_eq!(series[4].bucket_start, at(2024, 5, 5, 0));
    }

    #[test]
    fn hourly_fill_keeps_only_the_latest_buckets() {
        let range = DateRange {
            from: at(2020, 1, 1, 0),
            to: at(2024, 5, 5, 12),
        };
        let buckets = vec![bucket(at(2020, 1, 2, 0), 9, 0, 0), bucket(at(2024, 5, 5, 11), 1, 0, 0)];

        let series = fill_feedback_gaps(&buckets, Granularity::Hour, Some(range));

        assert_eq!(series.len(), MAX_FEEDBACK_BUCKETS);
        assert_eq!(series.last().unwrap().bucket_start, at(2024, 5, 5, 12));
        assert_eq!(series[series.len() - 2].likes, 1);
        assert_eq!(feedback_totals(&series).likes, 1);
    }

    #[test]
    fn duplicate_buckets_are_merged() {
        let buckets = vec![
            bucket(at(2024, 5, 1, 10), 1, 0, 0),
            bucket(at(2024, 5, 1, 14), 2, 1, 0),
        ];
        let series = fill_feedback_gaps(&buckets, Granularity::Day, None);
        assert_eq!(series, vec![bucket(at(2024, 5, 1, 0), 3, 1, 0)]);
        assert!(fill_feedback_gaps(&[], Granularity::Day, None).is_empty());
    }

    #[test]
    fn totals_compute_satisfaction_from_votes_only() {
        let totals = feedback_totals(&[bucket(at(2024, 5, 1, 0), 3, 1, 4)]);
        assert_eq!(totals.total, 8);
        assert_eq!(totals.satisfaction_rate, Some(0.75));

        let totals = feedback_totals(&[bucket(at(2024, 5, 1, 0), 0, 0, 4)]);
        assert_eq!(totals.satisfaction_rate, None);
    }

    #[test]
    fn cluster_tail_is_folded_into_other() {
        let stats = vec![
            ClusterStat { cluster: "Invoices".into(), count: 50, sub_clusters: vec![] },
            ClusterStat { cluster: "Orders".into(), count: 30, sub_clusters: vec![] },
            ClusterStat { cluster: "Onboarding".into(), count: 15, sub_clusters: vec![] },
            ClusterStat { cluster: "Other topics".into(), count: 5, sub_clusters: vec![] },
        ];

        let shares = cluster_shares(&stats, Some(2));

        assert_eq!(shares.len(), 3);
        assert_eq!(shares[0].name, "Invoices");
        assert_eq!(shares[0].percent, 50.0);
        assert_eq!(shares[2].name, OTHER_LABEL);
        assert_eq!(shares[2].count, 20);
    }

    #[test]
    fn sub_cluster_shares_are_relative_to_the_cluster() {
        let stat = ClusterStat {
            cluster: "Invoices".into(),
            count: 4,
            sub_clusters: vec![
                SubClusterStat { name: "Late payment".into(), count: 1 },
                SubClusterStat { name: "Missing invoice".into(), count: 3 },
            ],
        };
        let shares = sub_cluster_shares(&stat);
        assert_eq!(shares[0].name, "Missing invoice");
        assert_eq!(shares[0].percent, 75.0);
    }

    #[test]
    fn bars_scale_to_width() {
        assert_eq!(bar(5, 10, 10).chars().count(), 5);
        assert_eq!(bar(10, 10, 4).chars().count(), 4);
        assert_eq!(bar(1, 0, 4), "");
    }
}
