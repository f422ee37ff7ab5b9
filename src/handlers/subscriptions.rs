use std::sync::Arc;

use axum::extract::{Path, State};
use serde_json::json;
use tracing::info;

use super::HandlerResult;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ids::parse_id;
use crate::models::{AppState, Subscription};
use crate::pipeline;
use crate::response::{docs_to_json, ApiResponse};
use crate::store::Filter;
use crate::toggle::toggle;

pub async fn toggle_subscription(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(channel_id): Path<String>,
) -> HandlerResult {
    let channel = parse_id(&channel_id, "channel")?;
    if channel == user.id() {
        return Err(ApiError::InvalidInput(
            "You cannot subscribe to your own channel".to_string(),
        ));
    }

    state
        .users
        .find_by_id(channel)
        .await?
        .ok_or_else(|| ApiError::NotFound("Channel not found".to_string()))?;

    let key = Filter::new()
        .eq("subscriber", user.id())
        .eq("channel", channel);
    let outcome = toggle(state.subscriptions.as_ref(), &key, || {
        Subscription::new(user.id(), channel)
    })
    .await?;

    let subscribed = outcome.is_present();
    info!(
        "[POST /subscriptions/c/{}] {} {}",
        channel,
        user.id(),
        if subscribed { "subscribed" } else { "unsubscribed" }
    );

    let message = if subscribed {
        "Subscribed successfully"
    } else {
        "Unsubscribed successfully"
    };
    Ok(ApiResponse::ok(json!({ "isSubscribed": subscribed }), message))
}

pub async fn get_channel_subscribers(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(channel_id): Path<String>,
) -> HandlerResult {
    let channel = parse_id(&channel_id, "channel")?;

    let subscribers = state
        .subscriptions
        .aggregate(&pipeline::channel_subscribers(channel))
        .await?;

    Ok(ApiResponse::ok(
        docs_to_json(subscribers),
        "Subscribers fetched successfully",
    ))
}

pub async fn get_subscribed_channels(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(subscriber_id): Path<String>,
) -> HandlerResult {
    let subscriber = parse_id(&subscriber_id, "subscriber")?;

    let channels = state
        .subscriptions
        .aggregate(&pipeline::subscribed_channels(subscriber))
        .await?;

    Ok(ApiResponse::ok(
        docs_to_json(channels),
        "Subscribed channels fetched successfully",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;
    use axum::http::StatusCode;
    use mongodb::bson::oid::ObjectId;

    #[tokio::test]
    async fn subscribing_to_yourself_never_reaches_the_store() {
        let app = TestApp::new();
        let me = app.user("dave").await;
        let before = app.store.accesses();

        let err = toggle_subscription(State(app.state.clone()), AuthUser(me.id), Path(me.id.to_hex()))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(app.store.accesses(), before);
    }

    #[tokio::test]
    async fn unknown_channels_are_not_found() {
        let app = TestApp::new();
        let err = toggle_subscription(
            State(app.state.clone()),
            AuthUser(ObjectId::new()),
            Path(ObjectId::new().to_hex()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggling_twice_restores_the_original_state() {
        let app = TestApp::new();
        let me = app.user("erin").await;
        let channel = app.user("frank").await;
        let path = || Path(channel.id.to_hex());

        let first = toggle_subscription(State(app.state.clone()), AuthUser(me.id), path())
            .await
            .unwrap();
        assert_eq!(first.data, json!({ "isSubscribed": true }));

        let subscribers = get_channel_subscribers(State(app.state.clone()), AuthUser(me.id), path())
            .await
            .unwrap();
        assert_eq!(subscribers.data[0]["subscriberDetails"]["username"], "erin");

        let channels = get_subscribed_channels(
            State(app.state.clone()),
            AuthUser(me.id),
            Path(me.id.to_hex()),
        )
        .await
        .unwrap();
        assert_eq!(channels.data[0]["subscribedChannel"]["username"], "frank");

        let second = toggle_subscription(State(app.state.clone()), AuthUser(me.id), path())
            .await
            .unwrap();
        assert_eq!(second.data, json!({ "isSubscribed": false }));

        let key = Filter::new().eq("subscriber", me.id).eq("channel", channel.id);
        assert_eq!(app.state.subscriptions.count_matching(&key).await.unwrap(), 0);
    }
}
