use mongodb::bson::{doc, oid::ObjectId, Bson, Document};

use crate::error::ApiError;
use crate::ids::parse_id;
use crate::models::CollectionName;
use crate::store::Filter;

/// Fields a caller may sort the public video listing by.
pub const VIDEO_SORT_FIELDS: &[&str] = &["createdAt", "updatedAt", "views", "duration", "title"];

const VIDEO_SEARCH_FIELDS: &[&str] = &["title", "description"];
const PUBLIC_PROFILE: &[&str] = &["username", "fullName", "avatar"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Ordered sort keys. `_id` always closes the list so equal primary keys
/// still page deterministically.
#[derive(Clone, Debug, PartialEq)]
pub struct SortSpec {
    keys: Vec<(&'static str, SortOrder)>,
}

impl SortSpec {
    pub fn by(field: &'static str, order: SortOrder) -> Self {
        let mut keys = vec![(field, order)];
        if field != "_id" {
            keys.push(("_id", order));
        }
        Self { keys }
    }

    pub fn newest_first() -> Self {
        Self::by("createdAt", SortOrder::Descending)
    }

    /// Both `sort_by` and `sort_type` must be given to override the default.
    /// `"asc"` sorts ascending, any other token descending.
    pub fn from_params(
        sort_by: Option<&str>,
        sort_type: Option<&str>,
        allowed: &[&'static str],
    ) -> Result<Self, ApiError> {
        let (field, direction) = match (sort_by, sort_type) {
            (Some(field), Some(direction)) if !field.is_empty() => (field, direction),
            _ => return Ok(Self::newest_first()),
        };

        let field = allowed
            .iter()
            .copied()
            .find(|candidate| *candidate == field)
            .ok_or_else(|| ApiError::InvalidInput(format!("Cannot sort by `{}`", field)))?;

        let order = if direction == "asc" {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        };

        Ok(Self::by(field, order))
    }

    pub fn keys(&self) -> &[(&'static str, SortOrder)] {
        &self.keys
    }

    pub fn to_document(&self) -> Document {
        let mut sort = Document::new();
        for (field, order) in &self.keys {
            sort.insert(*field, order.as_i32());
        }
        sort
    }
}

/// Left-outer join against another collection.
#[derive(Clone, Debug, PartialEq)]
pub struct Lookup {
    pub from: CollectionName,
    pub local_field: &'static str,
    pub foreign_field: &'static str,
    pub as_field: &'static str,
    /// Keep only these fields (plus `_id`) of each joined document; empty keeps all.
    pub fields: &'static [&'static str],
    /// Unwrap the joined array to its first element.
    pub single: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AccumulatorOp {
    Count,
    Sum(&'static str),
    SumSize(&'static str),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Accumulator {
    pub name: &'static str,
    pub op: AccumulatorOp,
}

impl Accumulator {
    pub fn count(name: &'static str) -> Self {
        Self { name, op: AccumulatorOp::Count }
    }

    pub fn sum(name: &'static str, field: &'static str) -> Self {
        Self { name, op: AccumulatorOp::Sum(field) }
    }

    pub fn sum_size(name: &'static str, field: &'static str) -> Self {
        Self { name, op: AccumulatorOp::SumSize(field) }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    Search { query: String, fields: &'static [&'static str] },
    Match(Filter),
    Lookup(Lookup),
    First(&'static str),
    Group(Vec<Accumulator>),
    Project(&'static [&'static str]),
    Sort(SortSpec),
}

impl Stage {
    pub fn to_document(&self) -> Document {
        match self {
            Stage::Search { query, .. } => doc! { "$match": { "$text": { "$search": query } } },
            Stage::Match(filter) => doc! { "$match": filter.to_document() },
            Stage::Lookup(lookup) => {
                let mut spec = doc! {
                    "from": lookup.from.as_str(),
                    "localField": lookup.local_field,
                    "foreignField": lookup.foreign_field,
                    "as": lookup.as_field,
                };
                if !lookup.fields.is_empty() {
                    spec.insert("pipeline", vec![Bson::Document(doc! { "$project": projection(lookup.fields) })]);
                }
                doc! { "$lookup": spec }
            }
            Stage::First(field) => {
                doc! { "$addFields": { *field: { "$first": format!("${}", field) } } }
            }
            Stage::Group(accumulators) => {
                let mut group = doc! { "_id": Bson::Null };
                for acc in accumulators {
                    let op = match acc.op {
                        AccumulatorOp::Count => doc! { "$sum": 1 },
                        AccumulatorOp::Sum(field) => doc! { "$sum": format!("${}", field) },
                        AccumulatorOp::SumSize(field) => doc! {
                            "$sum": { "$size": { "$ifNull": [format!("${}", field), []] } }
                        },
                    };
                    group.insert(acc.name, op);
                }
                doc! { "$group": group }
            }
            Stage::Project(fields) => doc! { "$project": projection(fields) },
            Stage::Sort(sort) => doc! { "$sort": sort.to_document() },
        }
    }
}

fn projection(fields: &[&str]) -> Document {
    let mut projection = Document::new();
    for field in fields {
        projection.insert(*field, 1);
    }
    projection
}

/// An ordered list of stages, built but not executed.
#[derive(Clone, Debug, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn to_documents(&self) -> Vec<Document> {
        self.stages.iter().map(Stage::to_document).collect()
    }
}

/// Collects stages in any order and emits them in the one order that is
/// valid: search, owner scope, visibility, other filters, joins, group,
/// projection, sort.
#[derive(Default)]
pub struct PipelineBuilder {
    search: Option<Stage>,
    scope: Option<Filter>,
    published_only: bool,
    filter: Option<Filter>,
    joins: Vec<Stage>,
    group: Option<Vec<Accumulator>>,
    project: Option<&'static [&'static str]>,
    sort: Option<SortSpec>,
}

impl PipelineBuilder {
    /// Blank or missing queries add no stage.
    pub fn search(mut self, query: Option<&str>, fields: &'static [&'static str]) -> Self {
        self.search = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| Stage::Search { query: q.to_string(), fields });
        self
    }

    pub fn scope(mut self, field: &'static str, id: ObjectId) -> Self {
        self.scope = Some(Filter::new().eq(field, id));
        self
    }

    /// Scope by a caller-supplied id, which must be well formed.
    pub fn scope_by_param(
        self,
        field: &'static str,
        id: Option<&str>,
        what: &str,
    ) -> Result<Self, ApiError> {
        match id {
            Some(raw) => Ok(self.scope(field, parse_id(raw, what)?)),
            None => Ok(self),
        }
    }

    pub fn published_only(mut self) -> Self {
        self.published_only = true;
        self
    }

    pub fn matching(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn lookup(mut self, lookup: Lookup) -> Self {
        let single = lookup.single.then_some(lookup.as_field);
        self.joins.push(Stage::Lookup(lookup));
        if let Some(field) = single {
            self.joins.push(Stage::First(field));
        }
        self
    }

    pub fn group(mut self, accumulators: Vec<Accumulator>) -> Self {
        self.group = Some(accumulators);
        self
    }

    pub fn project(mut self, fields: &'static [&'static str]) -> Self {
        self.project = Some(fields);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn build(self) -> Pipeline {
        let mut stages = Vec::new();

        stages.extend(self.search);
        if let Some(scope) = self.scope {
            stages.push(Stage::Match(scope));
        }
        if self.published_only {
            stages.push(Stage::Match(Filter::new().eq("isPublished", true)));
        }
        if let Some(filter) = self.filter {
            stages.push(Stage::Match(filter));
        }
        stages.extend(self.joins);
        if let Some(accumulators) = self.group {
            stages.push(Stage::Group(accumulators));
        }
        if let Some(fields) = self.project {
            stages.push(Stage::Project(fields));
        }
        stages.push(Stage::Sort(self.sort.unwrap_or_else(SortSpec::newest_first)));

        Pipeline { stages }
    }
}

/// Raw listing parameters as they arrive on the query string.
#[derive(Debug, Default, Clone)]
pub struct VideoListParams {
    pub query: Option<String>,
    pub user_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
}

/// Published videos, optionally narrowed by text search and owner.
pub fn video_listing(params: &VideoListParams) -> Result<Pipeline, ApiError> {
    let sort = SortSpec::from_params(
        params.sort_by.as_deref(),
        params.sort_type.as_deref(),
        VIDEO_SORT_FIELDS,
    )?;

    let pipeline = Pipeline::builder()
        .search(params.query.as_deref(), VIDEO_SEARCH_FIELDS)
        .scope_by_param("owner", params.user_id.as_deref(), "user")?
        .published_only()
        .lookup(Lookup {
            from: CollectionName::Users,
            local_field: "owner",
            foreign_field: "_id",
            as_field: "ownerDetails",
            fields: PUBLIC_PROFILE,
            single: true,
        })
        .sort(sort)
        .build();

    Ok(pipeline)
}

/// One row of video/view/like totals for a channel, or no row at all
/// when the channel has no videos.
pub fn channel_stats(owner: ObjectId) -> Pipeline {
    Pipeline::builder()
        .scope("owner", owner)
        .lookup(Lookup {
            from: CollectionName::Likes,
            local_field: "_id",
            foreign_field: "video",
            as_field: "videoLikes",
            fields: &[],
            single: false,
        })
        .group(vec![
            Accumulator::count("totalVideos"),
            Accumulator::sum("totalViews", "views"),
            Accumulator::sum_size("totalLikes", "videoLikes"),
        ])
        .build()
}

pub fn channel_subscribers(channel: ObjectId) -> Pipeline {
    Pipeline::builder()
        .scope("channel", channel)
        .lookup(Lookup {
            from: CollectionName::Users,
            local_field: "subscriber",
            foreign_field: "_id",
            as_field: "subscriberDetails",
            fields: PUBLIC_PROFILE,
            single: true,
        })
        .project(&["subscriberDetails", "createdAt"])
        .build()
}

pub fn subscribed_channels(subscriber: ObjectId) -> Pipeline {
    Pipeline::builder()
        .scope("subscriber", subscriber)
        .lookup(Lookup {
            from: CollectionName::Users,
            local_field: "channel",
            foreign_field: "_id",
            as_field: "subscribedChannel",
            fields: PUBLIC_PROFILE,
            single: true,
        })
        .project(&["subscribedChannel", "createdAt"])
        .build()
}

pub fn video_comments(video: ObjectId) -> Pipeline {
    Pipeline::builder()
        .scope("video", video)
        .lookup(Lookup {
            from: CollectionName::Users,
            local_field: "owner",
            foreign_field: "_id",
            as_field: "owner",
            fields: &["username", "avatar"],
            single: true,
        })
        .build()
}

pub fn liked_videos(user: ObjectId) -> Pipeline {
    Pipeline::builder()
        .scope("likedBy", user)
        .matching(Filter::new().exists("video"))
        .lookup(Lookup {
            from: CollectionName::Videos,
            local_field: "video",
            foreign_field: "_id",
            as_field: "video",
            fields: &[],
            single: true,
        })
        .lookup(Lookup {
            from: CollectionName::Users,
            local_field: "video.owner",
            foreign_field: "_id",
            as_field: "video.owner",
            fields: &["username", "avatar"],
            single: true,
        })
        .build()
}
