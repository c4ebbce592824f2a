use serde::Serialize;
use chrono::{DateTime, Utc};
use crate::error::Result;
use crate::models::{
    AdminChatQuery, AdminChatRow, Chat, ClusterStat, DateRange, FeedbackBucket, Granularity, Page,
};
use super::api_client::{segment, ApiClient};

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    granularity: Option<Granularity>,
}

impl RangeQuery {
    fn new(range: Option<DateRange>, granularity: Option<Granularity>) -> Self {
        Self {
            from: range.map(|r| r.from),
            to: range.map(|r| r.to),
            granularity,
        }
    }
}

/// Read-only statistics endpoints behind the admin dashboard.
#[derive(Debug, Clone)]
pub struct AdminApi {
    http: ApiClient,
}

impl AdminApi {
    pub fn new(http: ApiClient) -> Self {
        Self { http }
    }

    pub async fn cluster_stats(&self, range: Option<DateRange>) -> Result<Vec<ClusterStat>> {
        self.http
            .get_json_with_query("/admin/clusters", &RangeQuery::new(range, None))
            .await
    }

    pub async fn feedback_stats(
        &self,
        granularity: Granularity,
        range: Option<DateRange>,
    ) -> Result<Vec<FeedbackBucket>> {
        self.http
            .get_json_with_query("/admin/feedback", &RangeQuery::new(range, Some(granularity)))
            .await
    }

    pub async fn list_chats(&self, query: &AdminChatQuery) -> Result<Page<AdminChatRow>> {
        let query = normalize_query(query);
        self.http.get_json_with_query("/admin/chats", &query).await
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Chat> {
        self.http
            .get_json(&format!("/admin/chats/{}", segment(chat_id)))
            .await
    }
}

/// Clamp paging to the backend's limits and drop blank filters.
pub fn normalize_query(query: &AdminChatQuery) -> AdminChatQuery {
    let blank_to_none = |v: &Option<String>| {
        v.as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    AdminChatQuery {
        page: query.page.max(1),
        page_size: match query.page_size {
            0 => 20,
            n => n.min(MAX_PAGE_SIZE),
        },
        cluster: blank_to_none(&query.cluster),
        search: blank_to_none(&query.search),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_clamped_and_trimmed() {
        let query = normalize_query(&AdminChatQuery {
            page: 0,
            page_size: 500,
            cluster: Some("  ".to_string()),
            search: Some(" invoice ".to_string()),
        });

        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, MAX_PAGE_SIZE);
        assert_eq!(query.cluster, None);
        assert_eq!(query.search.as_deref(), Some("invoice"));
    }

    #[test]
    fn range_query_serializes_only_present_fields() {
        let value = serde_json::to_value(RangeQuery::new(None, Some(Granularity::Week))).unwrap();
        assert_eq!(value, serde_json::json!({ "granularity": "week" }));
    }
}
