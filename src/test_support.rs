use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mongodb::bson::{oid::ObjectId, DateTime};
use tempfile::TempDir;

use crate::config::{Config, StorageBackend};
use crate::media::{MediaError, MediaHost, ResourceKind, UploadedMedia};
use crate::models::{AppState, Comment, Like, Playlist, Subscription, Tweet, User, Video};
use crate::store::{InMemoryStore, Inserted};

/// Media host double: records calls and removes uploaded files like the
/// real host does.
#[derive(Default)]
pub struct FakeMediaHost {
    pub uploads: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<(String, ResourceKind)>>,
    pub fail_deletes: AtomicBool,
    pub omit_duration: AtomicBool,
}

impl FakeMediaHost {
    pub fn deleted_urls(&self) -> Vec<String> {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

#[async_trait]
impl MediaHost for FakeMediaHost {
    async fn upload(&self, path: &Path, kind: ResourceKind) -> Result<UploadedMedia, MediaError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        std::fs::remove_file(path)?;

        let url = format!("https://media.test/demo/{}/upload/v1/{}", kind.as_str(), name);
        self.uploads.lock().unwrap().push(url.clone());

        let duration = match kind {
            ResourceKind::Video if !self.omit_duration.load(Ordering::SeqCst) => Some(12.6),
            _ => None,
        };
        Ok(UploadedMedia { url, duration })
    }

    async fn delete(&self, url: &str, kind: ResourceKind) -> Result<(), MediaError> {
        self.deletes.lock().unwrap().push((url.to_string(), kind));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(MediaError::Rejected("destroy failed".to_string()));
        }
        Ok(())
    }
}

/// Application state over the in-memory store and the fake media host.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryStore>,
    pub media: Arc<FakeMediaHost>,
    pub upload_dir: PathBuf,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("uploads");

        let mut config = Config::default();
        config.upload_dir = upload_dir.clone();
        config.storage.backend = StorageBackend::Memory;
        config.auth.access_token_secret = "test-secret".to_string();

        let store = InMemoryStore::new();
        let media = Arc::new(FakeMediaHost::default());

        let state = Arc::new(AppState {
            config,
            users: Arc::new(store.repository::<User>()),
            videos: Arc::new(store.repository::<Video>()),
            comments: Arc::new(store.repository::<Comment>()),
            likes: Arc::new(store.repository::<Like>()),
            tweets: Arc::new(store.repository::<Tweet>()),
            playlists: Arc::new(store.repository::<Playlist>()),
            subscriptions: Arc::new(store.repository::<Subscription>()),
            media: media.clone(),
        });

        Self {
            state,
            store,
            media,
            upload_dir,
            _dir: dir,
        }
    }

    pub async fn user(&self, username: &str) -> User {
        let user = User {
            id: ObjectId::new(),
            username: username.to_string(),
            full_name: username.to_uppercase(),
            avatar: format!("https://media.test/avatars/{username}.png"),
        };
        created(self.state.users.create(user).await.unwrap())
    }

    /// A video created `created_millis` after the epoch, so tests control
    /// ordering.
    pub async fn video(&self, owner: ObjectId, created_millis: i64, published: bool) -> Video {
        let mut video = Video::new(
            owner,
            format!("video {created_millis}"),
            "a test video".to_string(),
            format!("https://media.test/demo/video/upload/v1/v{created_millis}.mp4"),
            format!("https://media.test/demo/image/upload/v1/t{created_millis}.jpg"),
            30,
        );
        video.created_at = DateTime::from_millis(created_millis);
        video.is_published = published;
        created(self.state.videos.create(video).await.unwrap())
    }

    pub async fn comment(&self, video: ObjectId, owner: ObjectId) -> Comment {
        let comment = Comment::new("nice".to_string(), video, owner);
        created(self.state.comments.create(comment).await.unwrap())
    }

    pub async fn tweet(&self, owner: ObjectId) -> Tweet {
        let tweet = Tweet::new("hello".to_string(), owner);
        created(self.state.tweets.create(tweet).await.unwrap())
    }
}

fn created<T>(inserted: Inserted<T>) -> T {
    match inserted {
        Inserted::Created(item) => item,
        Inserted::AlreadyExists => panic!("seed collided with an existing row"),
    }
}
