//! Evaluates typed pipeline stages over plain documents for the in-memory
//! store. Semantics follow the document database closely enough for the
//! stages this service builds.

use std::cmp::Ordering;
use std::collections::HashMap;

use mongodb::bson::{Bson, Document};

use super::{Condition, Filter};
use crate::models::CollectionName;
use crate::pipeline::{AccumulatorOp, Accumulator, Lookup, SortOrder, SortSpec, Stage};

pub(super) type Collections = HashMap<CollectionName, Vec<Document>>;

pub(super) fn run(collections: &Collections, mut docs: Vec<Document>, stages: &[Stage]) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Search { query, fields } => {
                let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
                docs.into_iter()
                    .filter(|d| text_matches(d, fields, &terms))
                    .collect()
            }
            Stage::Match(filter) => docs.into_iter().filter(|d| matches(filter, d)).collect(),
            Stage::Lookup(lookup) => docs
                .into_iter()
                .map(|d| join(collections, d, lookup))
                .collect(),
            Stage::First(field) => docs
                .into_iter()
                .map(|mut d| {
                    let first = match get_path(&d, field) {
                        Some(Bson::Array(items)) => items.first().cloned(),
                        Some(other) => Some(other.clone()),
                        None => None,
                    };
                    match first {
                        Some(value) => set_path(&mut d, field, value),
                        None => remove_path(&mut d, field),
                    }
                    d
                })
                .collect(),
            Stage::Group(accumulators) => group(&docs, accumulators),
            Stage::Project(fields) => docs.into_iter().map(|d| project(d, fields)).collect(),
            Stage::Sort(sort) => {
                sort_documents(&mut docs, sort);
                docs
            }
        };
    }

    docs
}

pub(super) fn matches(filter: &Filter, doc: &Document) -> bool {
    filter.conditions().iter().all(|condition| match condition {
        Condition::Eq(field, expected) => match get_path(doc, field) {
            Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
                items.contains(expected)
            }
            Some(actual) => actual == expected,
            None => *expected == Bson::Null,
        },
        Condition::Exists(field) => !matches!(get_path(doc, field), None | Some(Bson::Null)),
    })
}

pub(super) fn sort_documents(docs: &mut [Document], sort: &SortSpec) {
    docs.sort_by(|a, b| {
        for (field, order) in sort.keys() {
            let ordering = compare(get_path(a, field), get_path(b, field));
            let ordering = match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn text_matches(doc: &Document, fields: &[&str], terms: &[String]) -> bool {
    fields.iter().any(|field| match get_path(doc, field) {
        Some(Bson::String(text)) => text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .any(|word| terms.contains(&word)),
        _ => false,
    })
}

fn join(collections: &Collections, mut doc: Document, lookup: &Lookup) -> Document {
    let joined: Vec<Bson> = match get_path(&doc, lookup.local_field) {
        Some(local) => collections
            .get(&lookup.from)
            .map(|foreign| {
                foreign
                    .iter()
                    .filter(|f| match (local, get_path(f, lookup.foreign_field)) {
                        (Bson::Array(items), Some(value)) => items.contains(value),
                        (local, Some(value)) => local == value,
                        _ => false,
                    })
                    .map(|f| {
                        if lookup.fields.is_empty() {
                            Bson::Document(f.clone())
                        } else {
                            Bson::Document(project(f.clone(), lookup.fields))
                        }
                    })
                    .collect()
            })
            .unwrap_or_default(),
        None => vec![],
    };

    set_path(&mut doc, lookup.as_field, Bson::Array(joined));
    doc
}

/// Groups everything into one row; no input rows means no output row.
fn group(docs: &[Document], accumulators: &[Accumulator]) -> Vec<Document> {
    if docs.is_empty() {
        return vec![];
    }

    let mut row = Document::new();
    row.insert("_id", Bson::Null);

    for acc in accumulators {
        let value = match acc.op {
            AccumulatorOp::Count => Bson::Int64(docs.len() as i64),
            AccumulatorOp::Sum(field) => sum(docs.iter().filter_map(|d| get_path(d, field))),
            AccumulatorOp::SumSize(field) => {
                let total: i64 = docs
                    .iter()
                    .map(|d| match get_path(d, field) {
                        Some(Bson::Array(items)) => items.len() as i64,
                        _ => 0,
                    })
                    .sum();
                Bson::Int64(total)
            }
        };
        row.insert(acc.name, value);
    }

    vec![row]
}

/// Non-numeric values are ignored. Integer sums stay integral.
fn sum<'a>(values: impl Iterator<Item = &'a Bson>) -> Bson {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;

    for value in values {
        match value {
            Bson::Int32(n) => int_total += *n as i64,
            Bson::Int64(n) => int_total += n,
            Bson::Double(n) => {
                float_total += n;
                saw_float = true;
            }
            _ => {}
        }
    }

    if saw_float {
        Bson::Double(float_total + int_total as f64)
    } else {
        Bson::Int64(int_total)
    }
}

fn project(doc: Document, fields: &[&str]) -> Document {
    let mut projected = Document::new();
    if let Some(id) = doc.get("_id") {
        projected.insert("_id", id.clone());
    }
    for field in fields {
        if let Some(value) = get_path(&doc, field) {
            set_path(&mut projected, field, value.clone());
        }
    }
    projected
}

pub(super) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

pub(super) fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Cross-type order used by the database: missing/null, numbers, strings,
/// documents, arrays, binary, object ids, booleans, dates.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 1,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 2,
        Some(Bson::String(_)) | Some(Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        _ => 11,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

pub(super) fn compare(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }

    match (a, b) {
        (Some(Bson::String(x)), Some(Bson::String(y))) => x.cmp(y),
        (Some(Bson::ObjectId(x)), Some(Bson::ObjectId(y))) => x.bytes().cmp(&y.bytes()),
        (Some(Bson::Boolean(x)), Some(Bson::Boolean(y))) => x.cmp(y),
        (Some(Bson::DateTime(x)), Some(Bson::DateTime(y))) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Some(x), Some(y)) => match (as_f64(x), as_f64(y)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, DateTime};

    #[test]
    fn dotted_paths_read_and_write_nested_documents() {
        let mut d = doc! { "video": { "title": "t" } };
        set_path(&mut d, "video.owner", Bson::Int32(1));
        assert_eq!(get_path(&d, "video.owner"), Some(&Bson::Int32(1)));
        assert_eq!(get_path(&d, "video.title"), Some(&Bson::String("t".into())));

        remove_path(&mut d, "video.owner");
        assert_eq!(get_path(&d, "video.owner"), None);
    }

    #[test]
    fn missing_sorts_before_numbers_and_dates_compare_by_instant() {
        assert_eq!(compare(None, Some(&Bson::Int32(0))), Ordering::Less);
        assert_eq!(
            compare(Some(&Bson::Int64(2)), Some(&Bson::Double(1.5))),
            Ordering::Greater
        );
        assert_eq!(
            compare(
                Some(&Bson::DateTime(DateTime::from_millis(1))),
                Some(&Bson::DateTime(DateTime::from_millis(2)))
            ),
            Ordering::Less
        );
    }

    #[test]
    fn lookup_then_first_unwraps_the_join() {
        let owner = ObjectId::new();
        let mut collections = Collections::new();
        collections.insert(
            CollectionName::Users,
            vec![doc! { "_id": owner, "username": "ann", "password": "secret" }],
        );

        let stages = [
            Stage::Lookup(Lookup {
                from: CollectionName::Users,
                local_field: "owner",
                foreign_field: "_id",
                as_field: "owner",
                fields: &["username"],
                single: true,
            }),
            Stage::First("owner"),
        ];
        let out = run(&collections, vec![doc! { "owner": owner }], &stages);

        assert_eq!(out[0], doc! { "owner": { "_id": owner, "username": "ann" } });
    }

    #[test]
    fn text_search_matches_whole_words_case_insensitively() {
        let docs = vec![
            doc! { "title": "Learning Rust", "description": "" },
            doc! { "title": "Rusty nails", "description": "" },
            doc! { "title": "Other", "description": "all about RUST" },
        ];
        let stages = [Stage::Search { query: "rust".into(), fields: &["title", "description"] }];
        let out = run(&Collections::new(), docs, &stages);

        let titles: Vec<&str> = out.iter().map(|d| d.get_str("title").unwrap()).collect();
        assert_eq!(titles, ["Learning Rust", "Other"]);
    }

    #[test]
    fn group_over_nothing_yields_no_row() {
        let out = group(&[], &[Accumulator::count("n")]);
        assert!(out.is_empty());
    }

    #[test]
    fn group_ignores_missing_fields() {
        let docs = vec![
            doc! { "views": 3_i64, "likes": [1, 2] },
            doc! { "likes": [] },
        ];
        let out = group(
            &docs,
            &[
                Accumulator::count("n"),
                Accumulator::sum("views", "views"),
                Accumulator::sum_size("likes", "likes"),
            ],
        );

        assert_eq!(out[0].get_i64("n").unwrap(), 2);
        assert_eq!(out[0].get_i64("views").unwrap(), 3);
        assert_eq!(out[0].get_i64("likes").unwrap(), 2);
    }

    #[test]
    fn integer_accumulators_share_one_width() {
        let docs = vec![doc! { "views": 7_i32, "likes": [1] }];
        let out = group(
            &docs,
            &[
                Accumulator::count("n"),
                Accumulator::sum("views", "views"),
                Accumulator::sum_size("likes", "likes"),
            ],
        );

        assert_eq!(out[0].get("n"), Some(&Bson::Int64(1)));
        assert_eq!(out[0].get("views"), Some(&Bson::Int64(7)));
        assert_eq!(out[0].get("likes"), Some(&Bson::Int64(1)));
    }
}
