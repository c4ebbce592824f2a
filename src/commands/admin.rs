use serde::{Deserialize, Serialize};
use crate::models::{AdminChatQuery, AdminChatRow, Chat, ClusterStat, DateRange, FeedbackBucket, Granularity, Page};
use crate::services::admin_stats::{self, FeedbackTotals, Share};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOverview {
    pub range: DateRange,
    pub clusters: Vec<ClusterStat>,
    pub shares: Vec<Share>,
    pub total_requests: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackTimeline {
    pub granularity: Granularity,
    pub range: DateRange,
    pub series: Vec<FeedbackBucket>,
    pub totals: FeedbackTotals,
}

pub async fn cluster_overview(state: &AppState, days: i64, top_n: Option<usize>) -> Result<ClusterOverview, String> {
    let range = DateRange::last_days(days).map_err(|e| e.to_string())?;
    let mut clusters = state
        .admin
        .cluster_stats(Some(range))
        .await
        .map_err(|e| e.to_string())?;
    clusters.sort_by(|a, b| b.count.cmp(&a.count));

    Ok(ClusterOverview {
        range,
        shares: admin_stats::cluster_shares(&clusters, top_n),
        total_requests: clusters.iter().map(|c| c.count).sum(),
        clusters,
    })
}

pub async fn feedback_timeline(
    state: &AppState,
    granularity: Granularity,
    days: i64,
) -> Result<FeedbackTimeline, String> {
    let range = DateRange::last_days(days).map_err(|e| e.to_string())?;
    let buckets = state
        .admin
        .feedback_stats(granularity, Some(range))
        .await
        .map_err(|e| e.to_string())?;

    let series = admin_stats::fill_feedback_gaps(&buckets, granularity, Some(range));
    Ok(FeedbackTimeline {
        granularity,
        range,
        totals: admin_stats::feedback_totals(&series),
        series,
    })
}

pub async fn list_admin_chats(state: &AppState, query: AdminChatQuery) -> Result<Page<AdminChatRow>, String> {
    state.admin.list_chats(&query).await.map_err(|e| e.to_string())
}

pub async fn get_admin_chat(state: &AppState, chat_id: String) -> Result<Chat, String> {
    state.admin.get_chat(&chat_id).await.map_err(|e| e.to_string())
}
