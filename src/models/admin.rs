use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use crate::error::{Error, Result};

/// Longest range the dashboard asks the backend for.
pub const MAX_RANGE_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubClusterStat {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStat {
    pub cluster: String,
    pub count: u64,
    #[serde(default)]
    pub sub_clusters: Vec<SubClusterStat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Week,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(Granularity::Hour),
            "day" | "daily" => Ok(Granularity::Day),
            "week" | "weekly" => Ok(Granularity::Week),
            other => Err(format!("Unknown granularity: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBucket {
    pub bucket_start: DateTime<Utc>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub dislikes: u64,
    #[serde(default)]
    pub neutral: u64,
}

impl FeedbackBucket {
    pub fn empty(bucket_start: DateTime<Utc>) -> Self {
        Self {
            bucket_start,
            likes: 0,
            dislikes: 0,
            neutral: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.likes + self.dislikes + self.neutral
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// The `days` days leading up to now.
    pub fn last_days(days: i64) -> Result<Self> {
        let span = Some(days)
            .filter(|d| (1..=MAX_RANGE_DAYS).contains(d))
            .and_then(chrono::Duration::try_days)
            .ok_or_else(|| {
                Error::validation("days", &format!("Days must be between 1 and {}", MAX_RANGE_DAYS))
            })?;
        let to = Utc::now();
        Ok(Self { from: to - span, to })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminChatRow {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub sub_cluster: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub dislikes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminChatQuery {
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size as u64) as u32
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn range_lengths_outside_the_limit_are_rejected() {
        for days in [0, -7, MAX_RANGE_DAYS + 1, i64::MAX / 1000] {
            let err = DateRange::last_days(days).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(err.field_errors()[0].field, "days");
        }

        let range = DateRange::last_days(7).unwrap();
        assert!(range.from < range.to);
        assert_eq!((range.to - range.from).num_days(), 7);
    }

    #[test]
    fn page_counts_round_up() {
        let page: Page<u8> = Page {
            items: vec![],
            page: 1,
            page_size: 20,
            total: 41,
        };
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());
    }

    #[test]
    fn granularity_parses_aliases() {
        assert_eq!("Daily".parse::<Granularity>(), Ok(Granularity::Day));
        assert_eq!("week".parse::<Granularity>(), Ok(Granularity::Week));
        assert!("month".parse::<Granularity>().is_err());
    }
}
