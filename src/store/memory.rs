use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use mongodb::bson::{self, oid::ObjectId, Bson, DateTime, Document};
use tokio::sync::RwLock;

use super::eval::{self, Collections};
use super::{Filter, Inserted, Mutation, Repository, RepositoryError, Result};
use crate::models::Entity;
use crate::pagination::{Page, PageRequest};
use crate::pipeline::{Pipeline, SortSpec};

/// Process-local document store shared by every in-memory repository so
/// joins can reach across collections. Counts every repository call.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<Collections>,
    accesses: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn repository<T: Entity>(self: &Arc<Self>) -> InMemoryRepository<T> {
        InMemoryRepository {
            store: Arc::clone(self),
            _entity: PhantomData,
        }
    }

    /// Number of repository operations served so far.
    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.accesses.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct InMemoryRepository<T> {
    store: Arc<InMemoryStore>,
    _entity: PhantomData<fn() -> T>,
}

fn encode<T: Entity>(item: &T) -> Result<Document> {
    bson::to_document(item).map_err(|e| RepositoryError::Internal(anyhow!(e)))
}

fn decode<T: Entity>(doc: Document) -> Result<T> {
    bson::from_document(doc).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn violates_unique_key<T: Entity>(existing: &[Document], candidate: &Document) -> bool {
    T::unique_keys().iter().any(|key| {
        let values: Option<Vec<&Bson>> = key
            .iter()
            .map(|field| candidate.get(*field).filter(|v| **v != Bson::Null))
            .collect();

        match values {
            Some(values) => existing.iter().any(|doc| {
                key.iter()
                    .zip(&values)
                    .all(|(field, value)| doc.get(*field) == Some(*value))
            }),
            None => false,
        }
    })
}

fn apply(doc: &mut Document, mutation: &Mutation, now: DateTime) {
    match mutation {
        Mutation::Set(fields) => {
            for (key, value) in fields {
                doc.insert(key.clone(), value.clone());
            }
        }
        Mutation::Inc(field, by) => {
            let next = match doc.get(*field) {
                Some(Bson::Int32(n)) => Bson::Int64(*n as i64 + by),
                Some(Bson::Int64(n)) => Bson::Int64(n + by),
                Some(Bson::Double(n)) => Bson::Double(n + *by as f64),
                _ => Bson::Int64(*by),
            };
            doc.insert(*field, next);
        }
        Mutation::AddToSet(field, value) => match doc.get_mut(*field) {
            Some(Bson::Array(items)) => {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            _ => {
                doc.insert(*field, vec![value.clone()]);
            }
        },
        Mutation::Pull(field, value) => {
            if let Some(Bson::Array(items)) = doc.get_mut(*field) {
                items.retain(|item| item != value);
            }
        }
    }
    doc.insert("updatedAt", now);
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<T>> {
        self.find_one(&Filter::by_id(id)).await
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>> {
        self.store.touch();
        let guard = self.store.collections.read().await;

        guard
            .get(&T::COLLECTION)
            .and_then(|docs| docs.iter().find(|d| eval::matches(filter, d)))
            .cloned()
            .map(decode)
            .transpose()
    }

    async fn find_many(&self, filter: &Filter, sort: &SortSpec) -> Result<Vec<T>> {
        self.store.touch();
        let guard = self.store.collections.read().await;

        let mut docs: Vec<Document> = guard
            .get(&T::COLLECTION)
            .map(|docs| {
                docs.iter()
                    .filter(|d| eval::matches(filter, d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        eval::sort_documents(&mut docs, sort);

        docs.into_iter().map(decode).collect()
    }

    async fn create(&self, item: T) -> Result<Inserted<T>> {
        self.store.touch();
        let doc = encode(&item)?;
        let mut guard = self.store.collections.write().await;
        let docs = guard.entry(T::COLLECTION).or_default();

        if violates_unique_key::<T>(docs, &doc) {
            return Ok(Inserted::AlreadyExists);
        }

        docs.push(doc);
        Ok(Inserted::Created(item))
    }

    async fn update_by_id(&self, id: ObjectId, mutation: Mutation) -> Result<Option<T>> {
        self.store.touch();
        let filter = Filter::by_id(id);
        let mut guard = self.store.collections.write().await;

        let doc = match guard
            .get_mut(&T::COLLECTION)
            .and_then(|docs| docs.iter_mut().find(|d| eval::matches(&filter, d)))
        {
            Some(doc) => doc,
            None => return Ok(None),
        };

        apply(doc, &mutation, DateTime::now());
        decode(doc.clone()).map(Some)
    }

    async fn delete_by_id(&self, id: ObjectId) -> Result<Option<T>> {
        self.store.touch();
        let filter = Filter::by_id(id);
        let mut guard = self.store.collections.write().await;

        let docs = match guard.get_mut(&T::COLLECTION) {
            Some(docs) => docs,
            None => return Ok(None),
        };

        match docs.iter().position(|d| eval::matches(&filter, d)) {
            Some(index) => decode(docs.remove(index)).map(Some),
            None => Ok(None),
        }
    }

    async fn delete_matching(&self, filter: &Filter) -> Result<u64> {
        self.store.touch();
        let mut guard = self.store.collections.write().await;

        let docs = match guard.get_mut(&T::COLLECTION) {
            Some(docs) => docs,
            None => return Ok(0),
        };

        let before = docs.len();
        docs.retain(|d| !eval::matches(filter, d));
        Ok((before - docs.len()) as u64)
    }

    async fn count_matching(&self, filter: &Filter) -> Result<u64> {
        self.store.touch();
        let guard = self.store.collections.read().await;

        let count = guard
            .get(&T::COLLECTION)
            .map(|docs| docs.iter().filter(|d| eval::matches(filter, d)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>> {
        self.store.touch();
        let guard = self.store.collections.read().await;

        let source = guard.get(&T::COLLECTION).cloned().unwrap_or_default();
        Ok(eval::run(&guard, source, pipeline.stages()))
    }

    async fn aggregate_paginate(
        &self,
        pipeline: &Pipeline,
        request: PageRequest,
    ) -> Result<Page<Document>> {
        let all = self.aggregate(pipeline).await?;
        let total = all.len() as u64;

        let docs = all
            .into_iter()
            .skip(request.skip() as usize)
            .take(request.limit as usize)
            .collect();

        Ok(Page::assemble(docs, total, request))
    }
}
