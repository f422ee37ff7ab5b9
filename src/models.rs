use std::sync::Arc;

use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::Config;
use crate::media::MediaHost;
use crate::store::Repository;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectionName {
    Users,
    Videos,
    Comments,
    Likes,
    Tweets,
    Playlists,
    Subscriptions,
}

impl CollectionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Users => "users",
            CollectionName::Videos => "videos",
            CollectionName::Comments => "comments",
            CollectionName::Likes => "likes",
            CollectionName::Tweets => "tweets",
            CollectionName::Playlists => "playlists",
            CollectionName::Subscriptions => "subscriptions",
        }
    }
}

/// A document kind stored in its own collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    const COLLECTION: CollectionName;

    fn id(&self) -> ObjectId;

    /// Natural keys that must stay unique. A key only applies to documents
    /// carrying every one of its fields.
    fn unique_keys() -> &'static [&'static [&'static str]] {
        &[]
    }
}

/// Entities with an owning principal.
pub trait Owned {
    fn owner(&self) -> ObjectId;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub avatar: String,
}

impl Entity for User {
    const COLLECTION: CollectionName = CollectionName::Users;

    fn id(&self) -> ObjectId {
        self.id
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub video_file: String,
    pub thumbnail: String,
    pub owner: ObjectId,
    pub title: String,
    pub description: String,
    /// Whole seconds.
    pub duration: i64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Video {
    pub fn new(
        owner: ObjectId,
        title: String,
        description: String,
        video_file: String,
        thumbnail: String,
        duration: i64,
    ) -> Self {
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            video_file,
            thumbnail,
            owner,
            title,
            description,
            duration,
            views: 0,
            is_published: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Video {
    const COLLECTION: CollectionName = CollectionName::Videos;

    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Owned for Video {
    fn owner(&self) -> ObjectId {
        self.owner
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub content: String,
    pub video: ObjectId,
    pub owner: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Comment {
    pub fn new(content: String, video: ObjectId, owner: ObjectId) -> Self {
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            content,
            video,
            owner,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Comment {
    const COLLECTION: CollectionName = CollectionName::Comments;

    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Owned for Comment {
    fn owner(&self) -> ObjectId {
        self.owner
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub content: String,
    pub owner: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Tweet {
    pub fn new(content: String, owner: ObjectId) -> Self {
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            content,
            owner,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Tweet {
    const COLLECTION: CollectionName = CollectionName::Tweets;

    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Owned for Tweet {
    fn owner(&self) -> ObjectId {
        self.owner
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub description: String,
    pub owner: ObjectId,
    #[serde(default)]
    pub videos: Vec<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Playlist {
    pub fn new(name: String, description: String, owner: ObjectId) -> Self {
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            name,
            description,
            owner,
            videos: vec![],
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Playlist {
    const COLLECTION: CollectionName = CollectionName::Playlists;

    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Owned for Playlist {
    fn owner(&self) -> ObjectId {
        self.owner
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub subscriber: ObjectId,
    pub channel: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Subscription {
    pub fn new(subscriber: ObjectId, channel: ObjectId) -> Self {
        let now = DateTime::now();
        Self {
            id: ObjectId::new(),
            subscriber,
            channel,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Subscription {
    const COLLECTION: CollectionName = CollectionName::Subscriptions;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn unique_keys() -> &'static [&'static [&'static str]] {
        &[&["subscriber", "channel"]]
    }
}

/// What a like points at. A like always has exactly one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LikeTarget {
    Video(ObjectId),
    Comment(ObjectId),
    Tweet(ObjectId),
}

impl LikeTarget {
    pub fn field(&self) -> &'static str {
        match self {
            LikeTarget::Video(_) => "video",
            LikeTarget::Comment(_) => "comment",
            LikeTarget::Tweet(_) => "tweet",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LikeTarget::Video(_) => "Video",
            LikeTarget::Comment(_) => "Comment",
            LikeTarget::Tweet(_) => "Tweet",
        }
    }

    pub fn id(&self) -> ObjectId {
        match self {
            LikeTarget::Video(id) | LikeTarget::Comment(id) | LikeTarget::Tweet(id) => *id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub liked_by: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tweet: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Like {
    pub fn new(liked_by: ObjectId, target: LikeTarget) -> Self {
        let now = DateTime::now();
        let mut like = Self {
            id: ObjectId::new(),
            liked_by,
            video: None,
            comment: None,
            tweet: None,
            created_at: now,
            updated_at: now,
        };
        match target {
            LikeTarget::Video(id) => like.video = Some(id),
            LikeTarget::Comment(id) => like.comment = Some(id),
            LikeTarget::Tweet(id) => like.tweet = Some(id),
        }
        like
    }
}

impl Entity for Like {
    const COLLECTION: CollectionName = CollectionName::Likes;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn unique_keys() -> &'static [&'static [&'static str]] {
        &[
            &["likedBy", "video"],
            &["likedBy", "comment"],
            &["likedBy", "tweet"],
        ]
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn Repository<User>>,
    pub videos: Arc<dyn Repository<Video>>,
    pub comments: Arc<dyn Repository<Comment>>,
    pub likes: Arc<dyn Repository<Like>>,
    pub tweets: Arc<dyn Repository<Tweet>>,
    pub playlists: Arc<dyn Repository<Playlist>>,
    pub subscriptions: Arc<dyn Repository<Subscription>>,
    pub media: Arc<dyn MediaHost>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson;

    #[test]
    fn like_serializes_only_its_target() {
        let user = ObjectId::new();
        let tweet = ObjectId::new();
        let doc = bson::to_document(&Like::new(user, LikeTarget::Tweet(tweet))).unwrap();

        assert_eq!(doc.get_object_id("likedBy").unwrap(), user);
        assert_eq!(doc.get_object_id("tweet").unwrap(), tweet);
        assert!(!doc.contains_key("video"));
        assert!(!doc.contains_key("comment"));
    }
}
