use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::models::AppState;
use crate::pagination::PageRequest;
use crate::response::ApiResponse;

pub mod comments;
pub mod dashboard;
pub mod likes;
pub mod playlists;
pub mod subscriptions;
pub mod tweets;
pub mod videos;

pub type HandlerResult = Result<ApiResponse, ApiError>;

/// Every route of the public API, relative to `/api/v1`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/videos", get(videos::get_all_videos).post(videos::publish_video))
        .route(
            "/videos/:videoId",
            get(videos::get_video_by_id)
                .patch(videos::update_video)
                .delete(videos::delete_video),
        )
        .route("/videos/toggle/publish/:videoId", patch(videos::toggle_publish_status))
        .route(
            "/comments/:videoId",
            get(comments::get_video_comments).post(comments::add_comment),
        )
        .route(
            "/comments/c/:commentId",
            patch(comments::update_comment).delete(comments::delete_comment),
        )
        .route("/likes/toggle/v/:videoId", post(likes::toggle_video_like))
        .route("/likes/toggle/c/:commentId", post(likes::toggle_comment_like))
        .route("/likes/toggle/t/:tweetId", post(likes::toggle_tweet_like))
        .route("/likes/videos", get(likes::get_liked_videos))
        .route("/tweets", post(tweets::create_tweet))
        .route("/tweets/user/:userId", get(tweets::get_user_tweets))
        .route(
            "/tweets/:tweetId",
            patch(tweets::update_tweet).delete(tweets::delete_tweet),
        )
        .route("/playlist", post(playlists::create_playlist))
        .route("/playlist/user/:userId", get(playlists::get_user_playlists))
        .route(
            "/playlist/:playlistId",
            get(playlists::get_playlist_by_id)
                .patch(playlists::update_playlist)
                .delete(playlists::delete_playlist),
        )
        .route(
            "/playlist/add/:videoId/:playlistId",
            patch(playlists::add_video_to_playlist),
        )
        .route(
            "/playlist/remove/:videoId/:playlistId",
            patch(playlists::remove_video_from_playlist),
        )
        .route(
            "/subscriptions/c/:channelId",
            post(subscriptions::toggle_subscription).get(subscriptions::get_channel_subscribers),
        )
        .route(
            "/subscriptions/u/:subscriberId",
            get(subscriptions::get_subscribed_channels),
        )
        .route("/dashboard/stats", get(dashboard::get_channel_stats))
        .route("/dashboard/videos", get(dashboard::get_channel_videos))
}

pub async fn healthcheck() -> ApiResponse {
    ApiResponse::ok(json!({ "status": "OK" }), "Health check passed")
}

/// `page` and `limit` as they arrive on the query string.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    pub fn to_request(&self, state: &AppState) -> Result<PageRequest, ApiError> {
        PageRequest::parse(
            self.page.as_deref(),
            self.limit.as_deref(),
            state.config.pagination.default_limit,
            state.config.pagination.max_limit,
        )
    }
}

/// Decodes a JSON body. An empty body decodes as `{}` so missing fields
/// surface as the handler's own validation errors.
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };

    serde_json::from_slice(raw)
        .map_err(|e| ApiError::InvalidInput(format!("Malformed request body: {}", e)))
}

/// Trimmed, non-blank text or an `InvalidInput` carrying `message`.
pub fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::InvalidInput(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use crate::test_support::TestApp;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use mongodb::bson::oid::ObjectId;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn empty_body_parses_as_empty_object() {
        #[derive(Deserialize)]
        struct Payload {
            content: Option<String>,
        }
        let parsed: Payload = parse_json(&Bytes::new()).unwrap();
        assert!(parsed.content.is_none());
        assert!(parse_json::<Payload>(&Bytes::from_static(b"{oops")).is_err());
    }

    #[tokio::test]
    async fn healthcheck_needs_no_token() {
        let app = TestApp::new();
        let response = Router::new()
            .nest("/api/v1", routes())
            .with_state(app.state.clone())
            .oneshot(Request::get("/api/v1/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["status"], "OK");
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_tokens_with_the_envelope() {
        let app = TestApp::new();
        let response = Router::new()
            .nest("/api/v1", routes())
            .with_state(app.state.clone())
            .oneshot(Request::get("/api/v1/likes/videos").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["statusCode"], 401);
        assert_eq!(app.store.accesses(), 0);
    }

    #[tokio::test]
    async fn malformed_ids_fail_before_touching_the_store() {
        let app = TestApp::new();
        let token = issue_token(
            &app.state.config.auth.access_token_secret,
            ObjectId::new(),
            60,
        );
        let router = Router::new()
            .nest("/api/v1", routes())
            .with_state(app.state.clone());

        let requests = [
            ("GET", "/api/v1/videos/not-an-id"),
            ("DELETE", "/api/v1/videos/123"),
            ("PATCH", "/api/v1/videos/toggle/publish/zz"),
            ("GET", "/api/v1/comments/xyz"),
            ("DELETE", "/api/v1/comments/c/xyz"),
            ("POST", "/api/v1/likes/toggle/v/xyz"),
            ("POST", "/api/v1/likes/toggle/c/xyz"),
            ("POST", "/api/v1/likes/toggle/t/xyz"),
            ("GET", "/api/v1/tweets/user/xyz"),
            ("DELETE", "/api/v1/tweets/xyz"),
            ("GET", "/api/v1/playlist/xyz"),
            ("GET", "/api/v1/playlist/user/xyz"),
            ("PATCH", "/api/v1/playlist/add/xyz/abc"),
            ("PATCH", "/api/v1/playlist/remove/xyz/abc"),
            ("POST", "/api/v1/subscriptions/c/xyz"),
            ("GET", "/api/v1/subscriptions/c/xyz"),
            ("GET", "/api/v1/subscriptions/u/xyz"),
            ("GET", "/api/v1/videos?userId=xyz"),
            ("PATCH", "/api/v1/videos/xyz"),
            ("POST", "/api/v1/comments/xyz"),
            ("PATCH", "/api/v1/comments/c/xyz"),
            ("PATCH", "/api/v1/tweets/xyz"),
            ("PATCH", "/api/v1/playlist/xyz"),
            ("DELETE", "/api/v1/playlist/xyz"),
        ];

        for (method, uri) in requests {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .header(header::AUTHORIZATION, format!("Bearer {token}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{method} {uri}");
        }

        assert_eq!(app.store.accesses(), 0);
    }
}
