use anyhow::anyhow;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::{Collection, Database};
use tracing::{debug, Instrument};

use super::{Filter, Inserted, Mutation, Repository, RepositoryError, Result};
use crate::models::{CollectionName, Entity};
use crate::pagination::{Page, PageRequest};
use crate::pipeline::{Pipeline, SortSpec};

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoRepository<T: Entity> {
    collection: Collection<T>,
}

fn internal(e: mongodb::error::Error) -> RepositoryError {
    RepositoryError::Internal(anyhow!(e))
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        &*e.kind,
        ErrorKind::Write(WriteFailure::WriteError(w)) if w.code == DUPLICATE_KEY
    )
}

impl<T: Entity> MongoRepository<T> {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection::<T>(T::COLLECTION.as_str()),
        }
    }

    /// Creates the unique indexes backing `Entity::unique_keys`. Each index
    /// is partial so documents lacking one of its fields are not indexed.
    pub async fn ensure_indexes(&self, db: &Database) -> anyhow::Result<()> {
        let mut indexes = Vec::new();

        for key in T::unique_keys() {
            let mut spec = Document::new();
            let mut partial = Document::new();
            for field in key.iter() {
                spec.insert(*field, 1);
                partial.insert(*field, doc! { "$exists": true });
            }
            indexes.push(Bson::Document(doc! {
                "name": format!("unique_{}", key.join("_")),
                "key": spec,
                "unique": true,
                "partialFilterExpression": partial,
            }));
        }

        if T::COLLECTION == CollectionName::Videos {
            indexes.push(Bson::Document(doc! {
                "name": "video_text",
                "key": { "title": "text", "description": "text" },
            }));
        }

        if indexes.is_empty() {
            return Ok(());
        }

        db.run_command(
            doc! {
                "createIndexes": T::COLLECTION.as_str(),
                "indexes": indexes,
            },
            None,
        )
        .instrument(tracing::trace_span!("create_indexes"))
        .await?;

        debug!("[store] indexes ready for `{}`", T::COLLECTION.as_str());
        Ok(())
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MongoRepository<T> {
    async fn find_by_id(&self, id: ObjectId) -> Result<Option<T>> {
        self.find_one(&Filter::by_id(id)).await
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>> {
        self.collection
            .find_one(filter.to_document(), None)
            .instrument(tracing::trace_span!("find_one"))
            .await
            .map_err(internal)
    }

    async fn find_many(&self, filter: &Filter, sort: &SortSpec) -> Result<Vec<T>> {
        let options = FindOptions::builder().sort(sort.to_document()).build();

        self.collection
            .find(filter.to_document(), options)
            .instrument(tracing::trace_span!("find"))
            .await
            .map_err(internal)?
            .try_collect()
            .await
            .map_err(internal)
    }

    async fn create(&self, item: T) -> Result<Inserted<T>> {
        match self
            .collection
            .insert_one(&item, None)
            .instrument(tracing::trace_span!("insert_one"))
            .await
        {
            Ok(_) => Ok(Inserted::Created(item)),
            Err(e) if is_duplicate_key(&e) => Ok(Inserted::AlreadyExists),
            Err(e) => Err(internal(e)),
        }
    }

    async fn update_by_id(&self, id: ObjectId, mutation: Mutation) -> Result<Option<T>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.collection
            .find_one_and_update(
                Filter::by_id(id).to_document(),
                mutation.to_update_document(DateTime::now()),
                options,
            )
            .instrument(tracing::trace_span!("find_one_and_update"))
            .await
            .map_err(internal)
    }

    async fn delete_by_id(&self, id: ObjectId) -> Result<Option<T>> {
        self.collection
            .find_one_and_delete(Filter::by_id(id).to_document(), None)
            .instrument(tracing::trace_span!("find_one_and_delete"))
            .await
            .map_err(internal)
    }

    async fn delete_matching(&self, filter: &Filter) -> Result<u64> {
        let result = self
            .collection
            .delete_many(filter.to_document(), None)
            .instrument(tracing::trace_span!("delete_many"))
            .await
            .map_err(internal)?;

        Ok(result.deleted_count)
    }

    async fn count_matching(&self, filter: &Filter) -> Result<u64> {
        self.collection
            .count_documents(filter.to_document(), None)
            .instrument(tracing::trace_span!("count_documents"))
            .await
            .map_err(internal)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>> {
        self.collection
            .clone_with_type::<Document>()
            .aggregate(pipeline.to_documents(), None)
            .instrument(tracing::trace_span!("aggregate"))
            .await
            .map_err(internal)?
            .try_collect()
            .await
            .map_err(internal)
    }

    async fn aggregate_paginate(
        &self,
        pipeline: &Pipeline,
        request: PageRequest,
    ) -> Result<Page<Document>> {
        let mut stages = pipeline.to_documents();
        stages.push(doc! {
            "$facet": {
                "metadata": [{ "$count": "total" }],
                "docs": [
                    { "$skip": request.skip() as i64 },
                    { "$limit": request.limit as i64 },
                ],
            }
        });

        let mut rows: Vec<Document> = self
            .collection
            .clone_with_type::<Document>()
            .aggregate(stages, None)
            .instrument(tracing::trace_span!("aggregate_paginate"))
            .await
            .map_err(internal)?
            .try_collect()
            .await
            .map_err(internal)?;

        let row = rows.pop().unwrap_or_default();
        let (docs, total) = split_facet(row)?;

        Ok(Page::assemble(docs, total, request))
    }
}

/// Unpacks a `$facet` row into its page of documents and the total count.
fn split_facet(mut row: Document) -> Result<(Vec<Document>, u64)> {
    let total = match row.get_array("metadata").ok().and_then(|m| m.first()) {
        Some(Bson::Document(meta)) => match meta.get("total") {
            Some(Bson::Int32(n)) => *n as u64,
            Some(Bson::Int64(n)) => *n as u64,
            _ => 0,
        },
        _ => 0,
    };

    let docs = match row.remove("docs") {
        Some(Bson::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Bson::Document(d) => Ok(d),
                other => Err(RepositoryError::Decode(format!(
                    "expected a document in page, got {:?}",
                    other.element_type()
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        None => vec![],
        Some(other) => {
            return Err(RepositoryError::Decode(format!(
                "expected `docs` array, got {:?}",
                other.element_type()
            )))
        }
    };

    Ok((docs, total))
}
