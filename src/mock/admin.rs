//! Admin statistics. Cluster and feedback figures are random on every
//! request; the chat listing reflects the chats actually stored.

use std::sync::Arc;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use crate::models::{
    AdminChatRow, Chat, ClusterStat, FeedbackBucket, Granularity, MessageType, Page, ReactionType,
    SubClusterStat,
};
use crate::services::admin_stats::MAX_FEEDBACK_BUCKETS;
use super::auth::current_admin;
use super::error::MockError;
use super::state::{MockState, StoredChat};

const CLUSTERS: &[(&str, &[&str])] = &[
    ("Invoicing", &["Payment status", "Invoice errors", "Credit notes"]),
    ("Onboarding", &["Registration", "Bank details", "Certificates"]),
    ("Orders", &["Purchase orders", "Delivery dates", "Cancellations"]),
    ("Contracts", &["Renewals", "Terms", "Pricing"]),
    ("Portal access", &["Password reset", "User roles"]),
];

const DEFAULT_RANGE_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeParams {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    granularity: Option<Granularity>,
}

impl RangeParams {
    fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), MockError> {
        let to = self.to.unwrap_or_else(Utc::now);
        let from = self.from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
        if from > to {
            return Err(MockError::field("from", "Range start must not be after its end"));
        }
        Ok((from, to))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatListParams {
    page: Option<u32>,
    page_size: Option<u32>,
    cluster: Option<String>,
    search: Option<String>,
}

pub fn routes() -> Router<Arc<MockState>> {
    Router::new()
        .route("/admin/clusters", get(clusters))
        .route("/admin/feedback", get(feedback))
        .route("/admin/chats", get(list_chats))
        .route("/admin/chats/:id", get(get_chat))
}

async fn clusters(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<ClusterStat>>, MockError> {
    current_admin(&state, &headers).await?;
    let (from, to) = params.bounds()?;
    Ok(Json(random_clusters((to - from).num_days().max(1))))
}

async fn feedback(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<FeedbackBucket>>, MockError> {
    current_admin(&state, &headers).await?;
    let (from, to) = params.bounds()?;
    let granularity = params.granularity.unwrap_or(Granularity::Day);
    Ok(Json(random_feedback(granularity, from, to)))
}

async fn list_chats(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(params): Query<ChatListParams>,
) -> Result<Json<Page<AdminChatRow>>, MockError> {
    current_admin(&state, &headers).await?;
    let data = state.data().read().await;

    let cluster = params.cluster.as_deref().map(str::to_lowercase);
    let search = params.search.as_deref().map(str::to_lowercase);
    let mut rows: Vec<AdminChatRow> = data
        .chats
        .values()
        .map(admin_row)
        .filter(|row| match &cluster {
            Some(c) => row.cluster.as_deref().is_some_and(|rc| rc.to_lowercase() == *c),
            None => true,
        })
        .filter(|row| match &search {
            Some(s) => {
                row.title.to_lowercase().contains(s)
                    || row.user.as_deref().is_some_and(|u| u.to_lowercase().contains(s))
            }
            None => true,
        })
        .collect();
    rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    let total = rows.len() as u64;
    let items = rows
        .into_iter()
        .skip(((page - 1) * page_size) as usize)
        .take(page_size as usize)
        .collect();

    Ok(Json(Page {
        items,
        page,
        page_size,
        total,
    }))
}

async fn get_chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, MockError> {
    current_admin(&state, &headers).await?;
    let data = state.data().read().await;
    data.chats
        .get(&chat_id)
        .map(|stored| Json(stored.chat.clone()))
        .ok_or(MockError::NotFound("Chat"))
}

/// Stable pseudo-classification of a chat into a cluster and sub-cluster.
fn classify(chat_id: &str) -> (&'static str, &'static str) {
    let hash = chat_id.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    let (cluster, subs) = CLUSTERS[hash % CLUSTERS.len()];
    (cluster, subs[(hash / CLUSTERS.len()) % subs.len()])
}

fn admin_row(stored: &StoredChat) -> AdminChatRow {
    let chat = &stored.chat;
    let (cluster, sub_cluster) = classify(&chat.id);
    let count_reactions = |kind: ReactionType| {
        chat.messages
            .iter()
            .filter(|m| m.message_type == MessageType::Ai)
            .filter(|m| m.reaction(kind).is_some())
            .count() as u64
    };

    AdminChatRow {
        id: chat.id.clone(),
        title: chat.title.clone(),
        user: Some(stored.owner.clone()),
        cluster: Some(cluster.to_string()),
        sub_cluster: Some(sub_cluster.to_string()),
        message_count: chat.messages.len() as u64,
        likes: count_reactions(ReactionType::Like),
        dislikes: count_reactions(ReactionType::Dislike),
        created_at: chat.created_at,
        updated_at: chat.updated_at,
    }
}

fn random_clusters(days: i64) -> Vec<ClusterStat> {
    let mut rng = rand::thread_rng();
    let scale = days as u64;
    CLUSTERS
        .iter()
        .map(|(cluster, subs)| {
            let sub_clusters: Vec<SubClusterStat> = subs
                .iter()
                .map(|name| SubClusterStat {
                    name: name.to_string(),
                    count: rng.gen_range(1..=12) * scale,
                })
                .collect();
            ClusterStat {
                cluster: cluster.to_string(),
                count: sub_clusters.iter().map(|s| s.count).sum(),
                sub_clusters,
            }
        })
        .collect()
}

fn random_feedback(granularity: Granularity, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<FeedbackBucket> {
    let mut rng = rand::thread_rng();
    let mut buckets = Vec::new();
    let mut cursor = granularity.bucket_start(from);
    while cursor <= to && buckets.len() < MAX_FEEDBACK_BUCKETS {
        buckets.push(FeedbackBucket {
            bucket_start: cursor,
            likes: rng.gen_range(0..40),
            dislikes: rng.gen_range(0..12),
            neutral: rng.gen_range(0..25),
        });
        cursor += granularity.step();
    }
    buckets
}
