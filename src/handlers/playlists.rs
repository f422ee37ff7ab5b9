use std::sync::Arc;

use axum::extract::{Path, State};
use bytes::Bytes;
use mongodb::bson::{doc, oid::ObjectId};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_json, required, HandlerResult};
use crate::auth::{ensure_owner, AuthUser};
use crate::error::ApiError;
use crate::ids::parse_id;
use crate::models::{AppState, Playlist};
use crate::pipeline::SortSpec;
use crate::response::{to_json, ApiResponse};
use crate::store::{Filter, Inserted, Mutation};

#[derive(Debug, Default, Deserialize)]
pub struct PlaylistInput {
    pub name: Option<String>,
    pub description: Option<String>,
}

async fn owned_playlist(
    state: &AppState,
    id: ObjectId,
    user: AuthUser,
    message: &str,
) -> Result<Playlist, ApiError> {
    let playlist = state
        .playlists
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Playlist not found".to_string()))?;
    ensure_owner(&playlist, user, message)?;
    Ok(playlist)
}

pub async fn create_playlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Bytes,
) -> HandlerResult {
    let input: PlaylistInput = parse_json(&body)?;
    let name = required(input.name, "Playlist name is required")?;
    let description = required(input.description, "Playlist description is required")?;

    let playlist = match state
        .playlists
        .create(Playlist::new(name, description, user.id()))
        .await?
    {
        Inserted::Created(playlist) => playlist,
        Inserted::AlreadyExists => {
            return Err(ApiError::Internal("Playlist could not be saved".to_string()))
        }
    };

    info!("[POST /playlist] {} created `{}`", user.id(), playlist.name);
    Ok(ApiResponse::created(to_json(&playlist)?, "Playlist created successfully"))
}

pub async fn get_user_playlists(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(user_id): Path<String>,
) -> HandlerResult {
    let owner = parse_id(&user_id, "user")?;

    let playlists = state
        .playlists
        .find_many(&Filter::new().eq("owner", owner), &SortSpec::newest_first())
        .await?;

    let data = playlists
        .iter()
        .map(to_json)
        .collect::<Result<Vec<Value>, ApiError>>()?;
    Ok(ApiResponse::ok(json!(data), "Playlists fetched successfully"))
}

pub async fn get_playlist_by_id(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(playlist_id): Path<String>,
) -> HandlerResult {
    let id = parse_id(&playlist_id, "playlist")?;

    let playlist = state
        .playlists
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Playlist not found".to_string()))?;

    Ok(ApiResponse::ok(to_json(&playlist)?, "Playlist fetched successfully"))
}

pub async fn update_playlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(playlist_id): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let id = parse_id(&playlist_id, "playlist")?;
    let input: PlaylistInput = parse_json(&body)?;
    let name = required(input.name, "Playlist name is required")?;
    let description = required(input.description, "Playlist description is required")?;

    owned_playlist(&state, id, user, "You are not allowed to update this playlist").await?;

    let updated = state
        .playlists
        .update_by_id(
            id,
            Mutation::Set(doc! { "name": name, "description": description }),
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("Playlist not found".to_string()))?;

    info!("[PATCH /playlist/{}] updated by {}", id, user.id());
    Ok(ApiResponse::ok(to_json(&updated)?, "Playlist updated successfully"))
}

pub async fn delete_playlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(playlist_id): Path<String>,
) -> HandlerResult {
    let id = parse_id(&playlist_id, "playlist")?;

    owned_playlist(&state, id, user, "You are not allowed to delete this playlist").await?;
    state.playlists.delete_by_id(id).await?;

    info!("[DELETE /playlist/{}] removed by {}", id, user.id());
    Ok(ApiResponse::ok(json!({}), "Playlist deleted successfully"))
}

pub async fn add_video_to_playlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> HandlerResult {
    let video = parse_id(&video_id, "video")?;
    let id = parse_id(&playlist_id, "playlist")?;

    owned_playlist(&state, id, user, "You are not allowed to change this playlist").await?;
    state
        .videos
        .find_by_id(video)
        .await?
        .ok_or_else(|| ApiError::NotFound("Video not found".to_string()))?;

    let updated = state
        .playlists
        .update_by_id(id, Mutation::AddToSet("videos", video.into()))
        .await?
        .ok_or_else(|| ApiError::NotFound("Playlist not found".to_string()))?;

    info!("[PATCH /playlist/add/{}/{}] playlist holds {} videos", video, id, updated.videos.len());
    Ok(ApiResponse::ok(
        to_json(&updated)?,
        "Video added to playlist successfully",
    ))
}

pub async fn remove_video_from_playlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((video_id, playlist_id)): Path<(String, String)>,
) -> HandlerResult {
    let video = parse_id(&video_id, "video")?;
    let id = parse_id(&playlist_id, "playlist")?;

    owned_playlist(&state, id, user, "You are not allowed to change this playlist").await?;

    let updated = state
        .playlists
        .update_by_id(id, Mutation::Pull("videos", video.into()))
        .await?
        .ok_or_else(|| ApiError::NotFound("Playlist not found".to_string()))?;

    info!("[PATCH /playlist/remove/{}/{}] playlist holds {} videos", video, id, updated.videos.len());
    Ok(ApiResponse::ok(
        to_json(&updated)?,
        "Video removed from playlist successfully",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;
    use axum::http::StatusCode;

    async fn playlist(app: &TestApp, owner: ObjectId) -> Playlist {
        let response = create_playlist(
            State(app.state.clone()),
            AuthUser(owner),
            Bytes::from_static(br#"{"name": "Mix", "description": "good stuff"}"#),
        )
        .await
        .unwrap();
        let id = ObjectId::parse_str(response.data["_id"].as_str().unwrap()).unwrap();
        app.state.playlists.find_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn creating_requires_name_and_description() {
        let app = TestApp::new();
        let err = create_playlist(
            State(app.state.clone()),
            AuthUser(ObjectId::new()),
            Bytes::from_static(br#"{"name": "Mix"}"#),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn adding_is_idempotent_and_removal_pulls() {
        let app = TestApp::new();
        let me = ObjectId::new();
        let list = playlist(&app, me).await;
        let video = app.video(ObjectId::new(), 1_000, true).await;
        let path = || Path((video.id.to_hex(), list.id.to_hex()));

        add_video_to_playlist(State(app.state.clone()), AuthUser(me), path())
            .await
            .unwrap();
        let twice = add_video_to_playlist(State(app.state.clone()), AuthUser(me), path())
            .await
            .unwrap();
        assert_eq!(twice.data["videos"], json!([video.id.to_hex()]));

        let removed = remove_video_from_playlist(State(app.state.clone()), AuthUser(me), path())
            .await
            .unwrap();
        assert_eq!(removed.data["videos"], json!([]));
    }

    #[tokio::test]
    async fn adding_a_missing_video_is_not_found() {
        let app = TestApp::new();
        let me = ObjectId::new();
        let list = playlist(&app, me).await;

        let err = add_video_to_playlist(
            State(app.state.clone()),
            AuthUser(me),
            Path((ObjectId::new().to_hex(), list.id.to_hex())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn strangers_cannot_modify_a_playlist() {
        let app = TestApp::new();
        let me = ObjectId::new();
        let stranger = AuthUser(ObjectId::new());
        let list = playlist(&app, me).await;
        let video = app.video(ObjectId::new(), 1_000, true).await;

        let err = add_video_to_playlist(
            State(app.state.clone()),
            stranger,
            Path((video.id.to_hex(), list.id.to_hex())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = update_playlist(
            State(app.state.clone()),
            stranger,
            Path(list.id.to_hex()),
            Bytes::from_static(br#"{"name": "Mine", "description": "now"}"#),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = delete_playlist(State(app.state.clone()), stranger, Path(list.id.to_hex()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let still = app.state.playlists.find_by_id(list.id).await.unwrap().unwrap();
        assert_eq!(still.name, "Mix");
        assert!(still.videos.is_empty());
    }

    #[tokio::test]
    async fn missing_playlists_are_not_found() {
        let app = TestApp::new();
        let err = get_playlist_by_id(
            State(app.state.clone()),
            AuthUser(ObjectId::new()),
            Path(ObjectId::new().to_hex()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn owner_can_rename_and_delete() {
        let app = TestApp::new();
        let me = ObjectId::new();
        let list = playlist(&app, me).await;

        let renamed = update_playlist(
            State(app.state.clone()),
            AuthUser(me),
            Path(list.id.to_hex()),
            Bytes::from_static(br#"{"name": "Chill", "description": "slower"}"#),
        )
        .await
        .unwrap();
        assert_eq!(renamed.data["name"], "Chill");

        let listed = get_user_playlists(State(app.state.clone()), AuthUser(me), Path(me.to_hex()))
            .await
            .unwrap();
        assert_eq!(listed.data.as_array().unwrap().len(), 1);

        delete_playlist(State(app.state.clone()), AuthUser(me), Path(list.id.to_hex()))
            .await
            .unwrap();
        assert!(app.state.playlists.find_by_id(list.id).await.unwrap().is_none());
    }
}
