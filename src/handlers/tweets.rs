use std::sync::Arc;

use axum::extract::{Path, State};
use bytes::Bytes;
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_json, required, HandlerResult};
use crate::auth::{ensure_owner, AuthUser};
use crate::error::ApiError;
use crate::ids::parse_id;
use crate::models::{AppState, Tweet};
use crate::pipeline::SortSpec;
use crate::response::{to_json, ApiResponse};
use crate::store::{Filter, Inserted, Mutation};

#[derive(Debug, Default, Deserialize)]
pub struct NewTweet {
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetEdit {
    #[serde(alias = "content")]
    pub new_content: Option<String>,
}

pub async fn create_tweet(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Bytes,
) -> HandlerResult {
    let input: NewTweet = parse_json(&body)?;
    let content = required(input.content, "Tweet content is required")?;

    let tweet = match state.tweets.create(Tweet::new(content, user.id())).await? {
        Inserted::Created(tweet) => tweet,
        Inserted::AlreadyExists => {
            return Err(ApiError::Internal("Tweet could not be saved".to_string()))
        }
    };

    info!("[POST /tweets] {} tweeted", user.id());
    Ok(ApiResponse::created(to_json(&tweet)?, "Tweet created successfully"))
}

pub async fn get_user_tweets(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(user_id): Path<String>,
) -> HandlerResult {
    let owner = parse_id(&user_id, "user")?;

    let tweets = state
        .tweets
        .find_many(&Filter::new().eq("owner", owner), &SortSpec::newest_first())
        .await?;

    let data = tweets
        .iter()
        .map(to_json)
        .collect::<Result<Vec<Value>, ApiError>>()?;
    Ok(ApiResponse::ok(json!(data), "Tweets fetched successfully"))
}

pub async fn update_tweet(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(tweet_id): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let id = parse_id(&tweet_id, "tweet")?;
    let input: TweetEdit = parse_json(&body)?;
    let content = required(input.new_content, "Tweet content is required")?;

    let tweet = state
        .tweets
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tweet not found".to_string()))?;
    ensure_owner(&tweet, user, "You are not allowed to edit this tweet")?;

    let updated = state
        .tweets
        .update_by_id(id, Mutation::Set(doc! { "content": content }))
        .await?
        .ok_or_else(|| ApiError::NotFound("Tweet not found".to_string()))?;

    info!("[PATCH /tweets/{}] edited by {}", id, user.id());
    Ok(ApiResponse::ok(to_json(&updated)?, "Tweet updated successfully"))
}

pub async fn delete_tweet(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(tweet_id): Path<String>,
) -> HandlerResult {
    let id = parse_id(&tweet_id, "tweet")?;

    let tweet = state
        .tweets
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Tweet not found".to_string()))?;
    ensure_owner(&tweet, user, "You are not allowed to delete this tweet")?;

    state.tweets.delete_by_id(id).await?;
    let likes = state
        .likes
        .delete_matching(&Filter::new().eq("tweet", id))
        .await?;

    info!("[DELETE /tweets/{}] removed with {} likes", id, likes);
    Ok(ApiResponse::ok(json!({}), "Tweet deleted successfully"))
}
