//! Read-only projections over the index
//!
//! `Query` borrows a [`Store`] and shapes its rows for callers: completion
//! candidates, grouped backlinks and a graph export. Nothing here writes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::corpus::slug;
use crate::error::IndexResult;
use crate::models::{Link, LinkProperties, Ref};
use crate::store::Store;

/// A title or alias offered for link insertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleCompletion {
    pub title: String,
    pub identity: PathBuf,
}

/// Every link from one source to the queried document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklinkGroup {
    pub source: PathBuf,
    pub source_title: String,
    pub occurrences: Vec<LinkProperties>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub identity: PathBuf,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GraphEdge {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// The whole link graph, one edge per linked pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

pub struct Query<'a> {
    store: &'a Store,
}

impl<'a> Query<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn titles_for(&self, identity: &Path) -> IndexResult<Vec<String>> {
        self.store.titles_for(identity)
    }

    /// Primary title of a document, or its slug when it has none
    pub fn title_of(&self, identity: &Path) -> IndexResult<String> {
        Ok(self
            .store
            .titles_for(identity)?
            .into_iter()
            .next()
            .unwrap_or_else(|| slug(identity)))
    }

    /// One candidate per title and alias; untitled documents offer their slug
    pub fn title_completions(&self) -> IndexResult<Vec<TitleCompletion>> {
        let mut completions = Vec::new();
        for (identity, titles) in self.store.all_titles()? {
            if titles.is_empty() {
                completions.push(TitleCompletion {
                    title: slug(&identity),
                    identity,
                });
                continue;
            }
            for title in titles {
                completions.push(TitleCompletion {
                    title,
                    identity: identity.clone(),
                });
            }
        }
        Ok(completions)
    }

    pub fn ref_completions(&self) -> IndexResult<Vec<Ref>> {
        self.store.all_refs()
    }

    /// Document bound to a ref key
    pub fn find_ref(&self, key: &str) -> IndexResult<Option<PathBuf>> {
        self.store.ref_lookup(key)
    }

    /// Backlinks to `identity` grouped by source, occurrences kept in order
    pub fn backlinks(&self, identity: &Path) -> IndexResult<Vec<BacklinkGroup>> {
        let mut groups: Vec<BacklinkGroup> = Vec::new();
        for backlink in self.store.backlinks_to(identity)? {
            match groups.last_mut() {
                Some(group) if group.source == backlink.source => {
                    group.occurrences.push(backlink.properties);
                }
                _ => groups.push(BacklinkGroup {
                    source_title: self.title_of(&backlink.source)?,
                    source: backlink.source,
                    occurrences: vec![backlink.properties],
                }),
            }
        }
        Ok(groups)
    }

    /// Nodes for every indexed document and one edge per linked pair
    pub fn graph(&self) -> IndexResult<Graph> {
        let nodes = self
            .store
            .all_titles()?
            .into_iter()
            .map(|(identity, titles)| GraphNode {
                title: titles.into_iter().next().unwrap_or_else(|| slug(&identity)),
                identity,
            })
            .collect();

        let edges: BTreeSet<GraphEdge> = self
            .store
            .all_links()?
            .into_iter()
            .map(|(source, target)| GraphEdge { source, target })
            .collect();

        Ok(Graph {
            nodes,
            edges: edges.into_iter().collect(),
        })
    }

    pub fn dangling_links(&self) -> IndexResult<Vec<Link>> {
        self.store.dangling_links()
    }
}
