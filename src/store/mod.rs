use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use thiserror::Error;

use crate::models::Entity;
use crate::pagination::{Page, PageRequest};
use crate::pipeline::{Pipeline, SortSpec};

mod eval;
pub mod memory;
pub mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoRepository;

pub type Result<T> = ::std::result::Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("stored document could not be decoded: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Outcome of an insert against a collection with unique natural keys.
#[derive(Debug)]
pub enum Inserted<T> {
    Created(T),
    AlreadyExists,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(&'static str, Bson),
    /// Present and not null.
    Exists(&'static str),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: ObjectId) -> Self {
        Self::new().eq("_id", id)
    }

    pub fn eq(mut self, field: &'static str, value: impl Into<Bson>) -> Self {
        self.conditions.push(Condition::Eq(field, value.into()));
        self
    }

    pub fn exists(mut self, field: &'static str) -> Self {
        self.conditions.push(Condition::Exists(field));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn to_document(&self) -> Document {
        let mut filter = Document::new();
        for condition in &self.conditions {
            match condition {
                Condition::Eq(field, value) => {
                    filter.insert(*field, value.clone());
                }
                Condition::Exists(field) => {
                    filter.insert(*field, doc! { "$exists": true, "$ne": Bson::Null });
                }
            }
        }
        filter
    }
}

/// A single-document update. Every mutation also stamps `updatedAt`.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Set(Document),
    Inc(&'static str, i64),
    AddToSet(&'static str, Bson),
    Pull(&'static str, Bson),
}

impl Mutation {
    pub fn to_update_document(&self, now: DateTime) -> Document {
        match self {
            Mutation::Set(fields) => {
                let mut set = fields.clone();
                set.insert("updatedAt", now);
                doc! { "$set": set }
            }
            Mutation::Inc(field, by) => doc! {
                "$inc": { *field: *by },
                "$set": { "updatedAt": now },
            },
            Mutation::AddToSet(field, value) => doc! {
                "$addToSet": { *field: value.clone() },
                "$set": { "updatedAt": now },
            },
            Mutation::Pull(field, value) => doc! {
                "$pull": { *field: value.clone() },
                "$set": { "updatedAt": now },
            },
        }
    }
}

/// Narrow accessor over one entity kind's collection.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<T>>;
    async fn find_one(&self, filter: &Filter) -> Result<Option<T>>;
    async fn find_many(&self, filter: &Filter, sort: &SortSpec) -> Result<Vec<T>>;

    /// Reports `AlreadyExists` instead of failing when a unique key collides.
    async fn create(&self, item: T) -> Result<Inserted<T>>;

    async fn update_by_id(&self, id: ObjectId, mutation: Mutation) -> Result<Option<T>>;
    async fn delete_by_id(&self, id: ObjectId) -> Result<Option<T>>;
    async fn delete_matching(&self, filter: &Filter) -> Result<u64>;
    async fn count_matching(&self, filter: &Filter) -> Result<u64>;

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>>;
    async fn aggregate_paginate(
        &self,
        pipeline: &Pipeline,
        request: PageRequest,
    ) -> Result<Page<Document>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_condition_excludes_nulls() {
        let filter = Filter::new().eq("likedBy", 7).exists("video");
        assert_eq!(
            filter.to_document(),
            doc! { "likedBy": 7, "video": { "$exists": true, "$ne": Bson::Null } }
        );
    }

    #[test]
    fn mutations_stamp_updated_at() {
        let now = DateTime::from_millis(42);
        let update = Mutation::AddToSet("videos", Bson::Int32(1)).to_update_document(now);
        assert_eq!(
            update,
            doc! { "$addToSet": { "videos": 1 }, "$set": { "updatedAt": now } }
        );

        let update = Mutation::Set(doc! { "title": "t" }).to_update_document(now);
        assert_eq!(update, doc! { "$set": { "title": "t", "updatedAt": now } });
    }
}
