use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
};
use bytes::Bytes;
use mongodb::bson::{doc, Bson};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{HandlerResult, PageQuery};
use crate::auth::{ensure_owner, is_owner, AuthUser};
use crate::error::ApiError;
use crate::ids::parse_id;
use crate::media::ResourceKind;
use crate::models::{AppState, Video};
use crate::pipeline::{self, VideoListParams};
use crate::probe;
use crate::response::{bson_to_json, to_json, ApiResponse};
use crate::store::{Filter, Inserted, Mutation};
use crate::uploads::parse_upload;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

/// Best-effort removal of hosted media that no longer has a record.
async fn discard_media(state: &AppState, media: &[(&str, ResourceKind)]) {
    for (url, kind) in media {
        if let Err(e) = state.media.delete(url, *kind).await {
            warn!("[media] ⚠️ Could not remove {}: {}", url, e);
        }
    }
}

pub async fn get_all_videos(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<VideoQuery>,
) -> HandlerResult {
    let request = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .to_request(&state)?;
    let listing = pipeline::video_listing(&VideoListParams {
        query: params.query,
        user_id: params.user_id,
        sort_by: params.sort_by,
        sort_type: params.sort_type,
    })?;

    let page = state
        .videos
        .aggregate_paginate(&listing, request)
        .await?
        .map(|d| bson_to_json(Bson::Document(d)));

    let data = serde_json::to_value(page)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize response: {}", e)))?;
    Ok(ApiResponse::ok(data, "Videos fetched successfully"))
}

pub async fn publish_video(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let mut form =
        parse_upload(&headers, body, &state.config.upload_dir, state.config.max_file_size).await?;

    let (title, description) = match (form.text("title"), form.text("description")) {
        (Some(t), Some(d)) => (t.to_string(), d.to_string()),
        _ => {
            return Err(ApiError::InvalidInput(
                "Title and description are required".to_string(),
            ))
        }
    };
    let video_file = form
        .take_file("videoFile")
        .ok_or_else(|| ApiError::InvalidInput("Video file is required".to_string()))?;
    let thumbnail_file = form
        .take_file("thumbnail")
        .ok_or_else(|| ApiError::InvalidInput("Thumbnail is required".to_string()))?;

    let probed = match probe::video_duration(&video_file.path).await {
        Ok(seconds) => Some(seconds),
        Err(e) => {
            debug!("[POST /videos] ffprobe unavailable for {:?}: {}", video_file.path, e);
            None
        }
    };

    let uploaded_video = state.media.upload(&video_file.path, ResourceKind::Video).await?;
    let uploaded_thumbnail = match state
        .media
        .upload(&thumbnail_file.path, ResourceKind::Image)
        .await
    {
        Ok(media) => media,
        Err(e) => {
            discard_media(&state, &[(uploaded_video.url.as_str(), ResourceKind::Video)]).await;
            return Err(e.into());
        }
    };

    let uploaded = [
        (uploaded_video.url.as_str(), ResourceKind::Video),
        (uploaded_thumbnail.url.as_str(), ResourceKind::Image),
    ];

    let duration = match uploaded_video.duration.or(probed) {
        Some(seconds) => probe::whole_seconds(seconds),
        None => {
            discard_media(&state, &uploaded).await;
            return Err(ApiError::Internal(
                "Could not determine the video duration".to_string(),
            ));
        }
    };

    let video = Video::new(
        user.id(),
        title,
        description,
        uploaded_video.url.clone(),
        uploaded_thumbnail.url.clone(),
        duration,
    );

    let created = match state.videos.create(video).await {
        Ok(Inserted::Created(video)) => video,
        Ok(Inserted::AlreadyExists) => {
            discard_media(&state, &uploaded).await;
            return Err(ApiError::Internal("Video could not be saved".to_string()));
        }
        Err(e) => {
            discard_media(&state, &uploaded).await;
            return Err(e.into());
        }
    };

    info!(
        "[POST /videos] ✅ {} published `{}` ({}s)",
        user.id(),
        created.title,
        created.duration
    );
    Ok(ApiResponse::created(to_json(&created)?, "Video published successfully"))
}

pub async fn get_video_by_id(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> HandlerResult {
    let id = parse_id(&video_id, "video")?;

    let video = state
        .videos
        .find_by_id(id)
        .await?
        .filter(|v| v.is_published || is_owner(v, user))
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;

    let video = if is_owner(&video, user) {
        video
    } else {
        state
            .videos
            .update_by_id(id, Mutation::Inc("views", 1))
            .await?
            .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?
    };

    Ok(ApiResponse::ok(to_json(&video)?, "Video fetched successfully"))
}

pub async fn update_video(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let id = parse_id(&video_id, "video")?;
    let mut form =
        parse_upload(&headers, body, &state.config.upload_dir, state.config.max_file_size).await?;

    let mut changes = doc! {};
    if let Some(title) = form.text("title") {
        changes.insert("title", title);
    }
    if let Some(description) = form.text("description") {
        changes.insert("description", description);
    }
    let thumbnail_file = form.take_file("thumbnail");

    if changes.is_empty() && thumbnail_file.is_none() {
        return Err(ApiError::InvalidInput(
            "Provide a title, description or thumbnail to update".to_string(),
        ));
    }

    let video = state
        .videos
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;
    ensure_owner(&video, user, "You are not allowed to update this video")?;

    let mut replaced_thumbnail = None;
    if let Some(file) = thumbnail_file {
        let uploaded = state.media.upload(&file.path, ResourceKind::Image).await?;
        changes.insert("thumbnail", uploaded.url.clone());
        replaced_thumbnail = Some(uploaded.url);
    }

    let updated = match state.videos.update_by_id(id, Mutation::Set(changes)).await {
        Ok(Some(video)) => video,
        Ok(None) => {
            if let Some(url) = &replaced_thumbnail {
                discard_media(&state, &[(url.as_str(), ResourceKind::Image)]).await;
            }
            return Err(ApiError::NotFound("Video not found".to_string()));
        }
        Err(e) => {
            if let Some(url) = &replaced_thumbnail {
                discard_media(&state, &[(url.as_str(), ResourceKind::Image)]).await;
            }
            return Err(e.into());
        }
    };

    if replaced_thumbnail.is_some() {
        discard_media(&state, &[(video.thumbnail.as_str(), ResourceKind::Image)]).await;
    }

    info!("[PATCH /videos/{}] ✅ updated by {}", id, user.id());
    Ok(ApiResponse::ok(to_json(&updated)?, "Video updated successfully"))
}

pub async fn delete_video(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> HandlerResult {
    let id = parse_id(&video_id, "video")?;

    let video = state
        .videos
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;
    ensure_owner(&video, user, "You are not allowed to delete this video")?;

    state
        .videos
        .delete_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;

    let likes = state.likes.delete_matching(&Filter::new().eq("video", id)).await?;
    let comments = state
        .comments
        .delete_matching(&Filter::new().eq("video", id))
        .await?;

    discard_media(
        &state,
        &[
            (video.video_file.as_str(), ResourceKind::Video),
            (video.thumbnail.as_str(), ResourceKind::Image),
        ],
    )
    .await;

    info!(
        "[DELETE /videos/{}] ✅ removed with {} likes and {} comments",
        id, likes, comments
    );
    Ok(ApiResponse::ok(json!({}), "Video deleted successfully"))
}

pub async fn toggle_publish_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> HandlerResult {
    let id = parse_id(&video_id, "video")?;

    let video = state
        .videos
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;
    ensure_owner(&video, user, "You are not allowed to change this video")?;

    let updated = state
        .videos
        .update_by_id(id, Mutation::Set(doc! { "isPublished": !video.is_published }))
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;

    info!(
        "[PATCH /videos/toggle/publish/{}] isPublished = {}",
        id, updated.is_published
    );
    Ok(ApiResponse::ok(
        json!({ "isPublished": updated.is_published }),
        "Video publish status toggled successfully",
    ))
}
