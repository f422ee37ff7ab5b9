use std::sync::Arc;

use axum::extract::{Path, State};
use serde_json::json;
use tracing::info;

use super::HandlerResult;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ids::parse_id;
use crate::models::{AppState, Like, LikeTarget};
use crate::pipeline;
use crate::response::{docs_to_json, ApiResponse};
use crate::store::Filter;
use crate::toggle::toggle;

async fn target_exists(state: &AppState, target: LikeTarget) -> Result<bool, ApiError> {
    let found = match target {
        LikeTarget::Video(id) => state.videos.find_by_id(id).await?.is_some(),
        LikeTarget::Comment(id) => state.comments.find_by_id(id).await?.is_some(),
        LikeTarget::Tweet(id) => state.tweets.find_by_id(id).await?.is_some(),
    };
    Ok(found)
}

async fn toggle_like(state: &AppState, user: AuthUser, target: LikeTarget) -> HandlerResult {
    if !target_exists(state, target).await? {
        return Err(ApiError::NotFound(format!("{} not found", target.label())));
    }

    let key = Filter::new()
        .eq("likedBy", user.id())
        .eq(target.field(), target.id());
    let outcome = toggle(state.likes.as_ref(), &key, || Like::new(user.id(), target)).await?;

    let verb = if outcome.is_present() { "liked" } else { "unliked" };
    info!(
        "[likes] {} {} {} {}",
        user.id(),
        verb,
        target.field(),
        target.id()
    );

    Ok(ApiResponse::ok(
        json!({ "isLiked": outcome.is_present() }),
        format!("{} {} successfully", target.label(), verb),
    ))
}

pub async fn toggle_video_like(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> HandlerResult {
    let target = LikeTarget::Video(parse_id(&video_id, "video")?);
    toggle_like(&state, user, target).await
}

pub async fn toggle_comment_like(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(comment_id): Path<String>,
) -> HandlerResult {
    let target = LikeTarget::Comment(parse_id(&comment_id, "comment")?);
    toggle_like(&state, user, target).await
}

pub async fn toggle_tweet_like(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(tweet_id): Path<String>,
) -> HandlerResult {
    let target = LikeTarget::Tweet(parse_id(&tweet_id, "tweet")?);
    toggle_like(&state, user, target).await
}

pub async fn get_liked_videos(State(state): State<Arc<AppState>>, user: AuthUser) -> HandlerResult {
    let liked = state
        .likes
        .aggregate(&pipeline::liked_videos(user.id()))
        .await?;

    Ok(ApiResponse::ok(
        docs_to_json(liked),
        "Liked videos fetched successfully",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;
    use axum::http::StatusCode;
    use mongodb::bson::oid::ObjectId;

    #[tokio::test]
    async fn liking_twice_restores_the_original_state() {
        let app = TestApp::new();
        let me = AuthUser(ObjectId::new());
        let video = app.video(ObjectId::new(), 1_000, true).await;

        let first = toggle_video_like(State(app.state.clone()), me, Path(video.id.to_hex()))
            .await
            .unwrap();
        assert_eq!(first.data, json!({ "isLiked": true }));
        assert_eq!(first.message, "Video liked successfully");

        let second = toggle_video_like(State(app.state.clone()), me, Path(video.id.to_hex()))
            .await
            .unwrap();
        assert_eq!(second.data, json!({ "isLiked": false }));
        assert_eq!(second.message, "Video unliked successfully");

        let key = Filter::new().eq("likedBy", me.id()).eq("video", video.id);
        assert_eq!(app.state.likes.count_matching(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_targets_are_not_found() {
        let app = TestApp::new();
        let me = AuthUser(ObjectId::new());

        let err = toggle_tweet_like(State(app.state.clone()), me, Path(ObjectId::new().to_hex()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Tweet not found");
    }

    #[tokio::test]
    async fn likes_on_different_targets_are_independent() {
        let app = TestApp::new();
        let me = AuthUser(ObjectId::new());
        let tweet = app.tweet(ObjectId::new()).await;
        let comment = app.comment(ObjectId::new(), ObjectId::new()).await;

        toggle_tweet_like(State(app.state.clone()), me, Path(tweet.id.to_hex()))
            .await
            .unwrap();
        let liked = toggle_comment_like(State(app.state.clone()), me, Path(comment.id.to_hex()))
            .await
            .unwrap();

        assert_eq!(liked.data["isLiked"], true);
        assert_eq!(liked.message, "Comment liked successfully");
    }

    #[tokio::test]
    async fn liked_videos_join_the_video_and_its_owner() {
        let app = TestApp::new();
        let me = AuthUser(ObjectId::new());
        let owner = app.user("carol").await;
        let video = app.video(owner.id, 1_000, true).await;
        let tweet = app.tweet(owner.id).await;

        toggle_video_like(State(app.state.clone()), me, Path(video.id.to_hex()))
            .await
            .unwrap();
        toggle_tweet_like(State(app.state.clone()), me, Path(tweet.id.to_hex()))
            .await
            .unwrap();

        let response = get_liked_videos(State(app.state.clone()), me).await.unwrap();
        let rows = response.data.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["video"]["title"], video.title.as_str());
        assert_eq!(rows[0]["video"]["owner"]["username"], "carol");
    }
}
