//! Immutable, ordered span collections and the queries the parser runs on them.

use crate::trace::{Span, SpanEvent, SpanId};
use crate::tree::DirectedTrees;
use dagspan_core::{AttributeValue, Attributes};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

/// Hierarchy-level uniqueness violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("expected exactly one element, found {found}")]
    ExpectedExactlyOne { found: usize },
}

/// Unwraps an iterator that must yield exactly one element.
pub fn one<T>(items: impl IntoIterator<Item = T>) -> Result<T, InvariantError> {
    let mut iter = items.into_iter();
    match (iter.next(), iter.next()) {
        (Some(item), None) => Ok(item),
        (None, _) => Err(InvariantError::ExpectedExactlyOne { found: 0 }),
        (Some(_), Some(_)) => Err(InvariantError::ExpectedExactlyOne { found: 2 + iter.count() }),
    }
}

/// An ordered collection of spans.
///
/// The parent/child index is built on the first structural query and reused
/// by every later `bound_*` / `contains_path` call on the same collection.
#[derive(Debug, Clone, Default)]
pub struct Spans {
    spans: Vec<Span>,
    index: OnceLock<DirectedTrees<SpanId>>,
}

impl Spans {
    pub fn new(spans: Vec<Span>) -> Self {
        Self { spans, index: OnceLock::new() }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Span> {
        self.spans.iter()
    }

    pub fn as_slice(&self) -> &[Span] {
        &self.spans
    }

    pub fn into_vec(self) -> Vec<Span> {
        self.spans
    }

    pub fn get(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id() == span_id)
    }

    /// The single span of this collection.
    pub fn one(&self) -> Result<&Span, InvariantError> {
        one(self.spans.iter())
    }

    /// Spans whose value at `path` equals `value`.
    pub fn filter(&self, path: &[&str], value: impl Into<AttributeValue>) -> Spans {
        let value = value.into();
        self.filter_by(|span| span.read_key(path).as_ref() == Some(&value))
    }

    pub fn filter_by(&self, predicate: impl Fn(&Span) -> bool) -> Spans {
        Spans::new(self.spans.iter().filter(|s| predicate(s)).cloned().collect())
    }

    /// Stable sort on start time.
    pub fn sort_by_start_time(&self) -> Spans {
        let mut spans = self.spans.clone();
        spans.sort_by_key(|s| s.start_time);
        Spans::new(spans)
    }

    /// Parent/child forest of this collection. A parent id that is not part of
    /// the collection makes its span a root.
    pub fn index(&self) -> &DirectedTrees<SpanId> {
        self.index.get_or_init(|| {
            let ids: HashSet<&str> = self.spans.iter().map(|s| s.span_id()).collect();
            let edges: Vec<(SpanId, SpanId)> = self
                .spans
                .iter()
                .filter_map(|s| {
                    let parent = s.parent_id.as_deref().filter(|p| ids.contains(p))?;
                    Some((parent.to_string(), s.span_id().to_string()))
                })
                .collect();
            let nodes = self.spans.iter().map(|s| s.span_id().to_string());
            DirectedTrees::with_nodes(nodes, edges)
        })
    }

    /// Spans strictly below `root`.
    pub fn bound_under(&self, root: &Span) -> Spans {
        self.bound(root, false)
    }

    /// `root` and every span below it.
    pub fn bound_inclusive(&self, root: &Span) -> Spans {
        self.bound(root, true)
    }

    fn bound(&self, root: &Span, inclusive: bool) -> Spans {
        let root_id = root.span_id().to_string();
        let mut keep: HashSet<SpanId> = self.index().descendants(&root_id).into_iter().collect();
        if inclusive && self.index().contains(&root_id) {
            keep.insert(root_id);
        }
        self.filter_by(|s| keep.contains(s.span_id()))
    }

    /// Whether each consecutive pair of `path` is a parent→child edge
    /// (`recursive = false`) or an ancestor→descendant pair (`recursive = true`).
    pub fn contains_path(&self, path: &[&Span], recursive: bool) -> bool {
        let index = self.index();
        let ids: Vec<SpanId> = path.iter().map(|s| s.span_id().to_string()).collect();

        if recursive {
            return index.contains_path(&ids);
        }
        ids.iter().all(|id| index.contains(id))
            && ids.windows(2).all(|pair| index.has_edge(&pair[0], &pair[1]))
    }

    pub fn exception_events(&self) -> Vec<&SpanEvent> {
        self.spans.iter().flat_map(|s| s.exceptions()).collect()
    }

    /// Exceptions recorded on `root` or anywhere below it.
    pub fn exceptions_in(&self, root: &Span) -> Vec<SpanEvent> {
        self.bound_inclusive(root)
            .exception_events()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Merges attributes of all spans, keeping keys under `allowed_prefixes`.
    /// Later spans override earlier ones.
    pub fn get_attributes(&self, allowed_prefixes: &[&str]) -> Attributes {
        let mut merged = Attributes::new();
        for span in &self.spans {
            for (key, value) in &span.attributes {
                if allowed_prefixes.iter().any(|p| key.starts_with(p)) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }
}

impl std::ops::Index<usize> for Spans {
    type Output = Span;

    fn index(&self, idx: usize) -> &Span {
        &self.spans[idx]
    }
}

impl FromIterator<Span> for Spans {
    fn from_iter<I: IntoIterator<Item = Span>>(iter: I) -> Self {
        Spans::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Spans {
    type Item = Span;
    type IntoIter = std::vec::IntoIter<Span>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.into_iter()
    }
}

impl<'a> IntoIterator for &'a Spans {
    type Item = &'a Span;
    type IntoIter = std::slice::Iter<'a, Span>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.iter()
    }
}

impl Serialize for Spans {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.spans.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Spans {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Span>::deserialize(deserializer).map(Spans::new)
    }
}
