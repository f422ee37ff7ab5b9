use std::sync::Arc;

use axum::extract::State;
use mongodb::bson::{Bson, Document};
use serde::Serialize;
use serde_json::{json, Value};

use super::HandlerResult;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::AppState;
use crate::pipeline::{self, SortSpec};
use crate::response::{to_json, ApiResponse};
use crate::store::Filter;

#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub total_videos: i64,
    pub total_views: i64,
    pub total_likes: i64,
    pub total_subscribers: u64,
}

/// Group sums come back as int32, int64 or double depending on the backend.
fn number(row: &Document, field: &str) -> i64 {
    match row.get(field) {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(n)) => n.round() as i64,
        _ => 0,
    }
}

pub async fn get_channel_stats(State(state): State<Arc<AppState>>, user: AuthUser) -> HandlerResult {
    let rows = state
        .videos
        .aggregate(&pipeline::channel_stats(user.id()))
        .await?;
    let total_subscribers = state
        .subscriptions
        .count_matching(&Filter::new().eq("channel", user.id()))
        .await?;

    let stats = match rows.first() {
        Some(row) => ChannelStats {
            total_videos: number(row, "totalVideos"),
            total_views: number(row, "totalViews"),
            total_likes: number(row, "totalLikes"),
            total_subscribers,
        },
        None => ChannelStats {
            total_subscribers,
            ..ChannelStats::default()
        },
    };

    let data = serde_json::to_value(&stats)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize response: {}", e)))?;
    Ok(ApiResponse::ok(data, "Channel stats fetched successfully"))
}

pub async fn get_channel_videos(State(state): State<Arc<AppState>>, user: AuthUser) -> HandlerResult {
    let videos = state
        .videos
        .find_many(
            &Filter::new().eq("owner", user.id()).eq("isPublished", true),
            &SortSpec::newest_first(),
        )
        .await?;

    let data = videos
        .iter()
        .map(to_json)
        .collect::<Result<Vec<Value>, ApiError>>()?;
    Ok(ApiResponse::ok(json!(data), "Channel videos fetched successfully"))
}
