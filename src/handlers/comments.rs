use std::sync::Arc;

use axum::extract::{Path, Query, State};
use bytes::Bytes;
use mongodb::bson::{doc, Bson};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{parse_json, required, HandlerResult, PageQuery};
use crate::auth::{ensure_owner, AuthUser};
use crate::error::ApiError;
use crate::ids::parse_id;
use crate::models::{AppState, Comment};
use crate::pipeline;
use crate::response::{bson_to_json, to_json, ApiResponse};
use crate::store::{Filter, Inserted, Mutation};

#[derive(Debug, Default, Deserialize)]
pub struct NewComment {
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentEdit {
    #[serde(alias = "content")]
    pub new_content: Option<String>,
}

pub async fn get_video_comments(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(video_id): Path<String>,
    Query(params): Query<PageQuery>,
) -> HandlerResult {
    let video = parse_id(&video_id, "video")?;
    let request = params.to_request(&state)?;

    let page = state
        .comments
        .aggregate_paginate(&pipeline::video_comments(video), request)
        .await?
        .map(|d| bson_to_json(Bson::Document(d)));

    let data = serde_json::to_value(page)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize response: {}", e)))?;
    Ok(ApiResponse::ok(data, "Comments fetched successfully"))
}

pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(video_id): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let video = parse_id(&video_id, "video")?;
    let input: NewComment = parse_json(&body)?;
    let content = required(input.content, "Comment content is required")?;

    state
        .videos
        .find_by_id(video)
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;

    let comment = match state.comments.create(Comment::new(content, video, user.id())).await? {
        Inserted::Created(comment) => comment,
        Inserted::AlreadyExists => {
            return Err(ApiError::Internal("Comment could not be saved".to_string()))
        }
    };

    info!("[POST /comments/{}] {} commented", video, user.id());
    Ok(ApiResponse::created(to_json(&comment)?, "Comment published."))
}

pub async fn update_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(comment_id): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let id = parse_id(&comment_id, "comment")?;
    let input: CommentEdit = parse_json(&body)?;
    let content = required(input.new_content, "Comment content is required")?;

    let comment = state
        .comments
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;
    ensure_owner(&comment, user, "You are not allowed to edit this comment")?;

    let updated = state
        .comments
        .update_by_id(id, Mutation::Set(doc! { "content": content }))
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    info!("[PATCH /comments/c/{}] edited by {}", id, user.id());
    Ok(ApiResponse::ok(to_json(&updated)?, "Comment updated successfully"))
}

pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(comment_id): Path<String>,
) -> HandlerResult {
    let id = parse_id(&comment_id, "comment")?;

    let comment = state
        .comments
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;
    ensure_owner(&comment, user, "You are not allowed to delete this comment")?;

    state.comments.delete_by_id(id).await?;
    let likes = state
        .likes
        .delete_matching(&Filter::new().eq("comment", id))
        .await?;

    info!("[DELETE /comments/c/{}] removed with {} likes", id, likes);
    Ok(ApiResponse::ok(json!({}), "Comment deleted successfully"))
}
