use std::collections::HashSet;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use regex::Regex;

use super::{copy_graph_inner, CopyGraphOptions};
use crate::content::proxy::CachingProxy;
use crate::content::{
    PredecessorFinder, ReadOnlyGraphStorage, ReadOnlyGraphTarget, Resolver, Storage, Tagger, Target,
};
use crate::descriptor::Descriptor;
use crate::errors::{CopyError, Error};
use crate::graph::dispatch::Limiter;
use crate::graph::status::StatusTracker;

/// Rewrites the predecessor edge set during root discovery.
#[async_trait]
pub trait FindPredecessors: Send + Sync {
    async fn find(
        &self,
        finder: &dyn PredecessorFinder,
        node: &Descriptor,
    ) -> Result<Vec<Descriptor>, Error>;
}

pub struct ExtendedCopyGraphOptions {
    pub copy: CopyGraphOptions,
    /// Maximum distance walked along predecessor edges; `0` is unbounded.
    pub depth: usize,
    pub find_predecessors: Option<Box<dyn FindPredecessors>>,
}

impl Default for ExtendedCopyGraphOptions {
    fn default() -> ExtendedCopyGraphOptions {
        ExtendedCopyGraphOptions {
            copy: CopyGraphOptions::default(),
            depth: 0,
            find_predecessors: None,
        }
    }
}

impl ExtendedCopyGraphOptions {
    /// Keep only predecessors whose artifact type matches the pattern. `None`
    /// is a no-op. Repeated calls intersect.
    pub fn filter_artifact_type(&mut self, pattern: Option<Regex>) {
        let pattern = match pattern {
            Some(pattern) => pattern,
            None => return,
        };
        let inner = self.find_predecessors.take();
        self.find_predecessors = Some(Box::new(ArtifactTypeFilter { pattern, inner }));
    }

    /// Keep only predecessors carrying the annotation key, with a value
    /// matching the pattern when one is given. Repeated calls intersect.
    pub fn filter_annotation<K>(&mut self, key: K, pattern: Option<Regex>)
    where
        K: Into<String>,
    {
        let inner = self.find_predecessors.take();
        self.find_predecessors = Some(Box::new(AnnotationFilter {
            key: key.into(),
            pattern,
            inner,
        }));
    }

    async fn predecessors(
        &self,
        finder: &dyn PredecessorFinder,
        node: &Descriptor,
    ) -> Result<Vec<Descriptor>, Error> {
        match &self.find_predecessors {
            Some(find) => find.find(finder, node).await,
            None => finder.predecessors(node).await,
        }
    }
}

struct ArtifactTypeFilter {
    pattern: Regex,
    inner: Option<Box<dyn FindPredecessors>>,
}

#[async_trait]
impl FindPredecessors for ArtifactTypeFilter {
    async fn find(
        &self,
        finder: &dyn PredecessorFinder,
        node: &Descriptor,
    ) -> Result<Vec<Descriptor>, Error> {
        let mut predecessors = match &self.inner {
            Some(inner) => inner.find(finder, node).await?,
            None => finder.predecessors(node).await?,
        };
        predecessors.retain(|predecessor| {
            predecessor
                .artifact_type
                .as_ref()
                .map(|artifact_type| self.pattern.is_match(artifact_type))
                .unwrap_or(false)
        });
        Ok(predecessors)
    }
}

struct AnnotationFilter {
    key: String,
    pattern: Option<Regex>,
    inner: Option<Box<dyn FindPredecessors>>,
}

#[async_trait]
impl FindPredecessors for AnnotationFilter {
    async fn find(
        &self,
        finder: &dyn PredecessorFinder,
        node: &Descriptor,
    ) -> Result<Vec<Descriptor>, Error> {
        let mut predecessors = match &self.inner {
            Some(inner) => inner.find(finder, node).await?,
            None => finder.predecessors(node).await?,
        };
        predecessors.retain(|predecessor| {
            let value = predecessor
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(&self.key));
            match (value, &self.pattern) {
                (Some(value), Some(pattern)) => pattern.is_match(value),
                (Some(_), None) => true,
                (None, _) => false,
            }
        });
        Ok(predecessors)
    }
}

#[derive(Default)]
pub struct ExtendedCopyOptions {
    pub graph: ExtendedCopyGraphOptions,
}

/// Depth-first search along predecessor edges for the roots of all sub-DAGs
/// the given node participates in.
async fn find_roots(
    finder: &dyn PredecessorFinder,
    node: &Descriptor,
    opts: &ExtendedCopyGraphOptions,
) -> Result<Vec<Descriptor>, Error> {
    let mut roots = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![(node.clone(), 0usize)];

    while let Some((current, distance)) = stack.pop() {
        if !visited.insert(current.content_key()) {
            continue;
        }
        if opts.depth != 0 && distance == opts.depth {
            roots.push(current);
            continue;
        }
        let predecessors = opts
            .predecessors(finder, &current)
            .await
            .map_err(|error| CopyError::on_source("predecessors", error))?;
        if predecessors.is_empty() {
            roots.push(current);
        } else {
            for predecessor in predecessors {
                stack.push((predecessor, distance + 1));
            }
        }
    }
    log::debug!("discovered {} sub-graph root(s)", roots.len());
    Ok(roots)
}

/// Replicate every sub-DAG the given node participates in: walk backwards
/// along predecessor edges to find the roots, then forward-copy each root's
/// graph through one shared proxy and tracker.
pub async fn extended_copy_graph<S, D>(
    src: &S,
    dst: &D,
    node: &Descriptor,
    opts: ExtendedCopyGraphOptions,
) -> Result<(), Error>
where
    S: ReadOnlyGraphStorage,
    D: Storage,
{
    let roots = find_roots(src, node, &opts).await?;
    let proxy = CachingProxy::new(src, opts.copy.max_metadata_bytes);
    let tracker = StatusTracker::new();
    let limiter = Limiter::new(opts.copy.concurrency);

    let pending: Vec<_> = roots
        .iter()
        .map(|root| copy_graph_inner(src, &proxy, dst, root, &opts.copy, &tracker, &limiter, None))
        .collect();
    try_join_all(pending).await?;
    Ok(())
}

/// Extended copy: replicate all sub-DAGs around the resolved node, then bind
/// `dst_ref` (defaulting to `src_ref`) to it at the destination.
pub async fn extended_copy<S, D>(
    src: &S,
    src_ref: &str,
    dst: &D,
    dst_ref: &str,
    opts: ExtendedCopyOptions,
) -> Result<Descriptor, Error>
where
    S: ReadOnlyGraphTarget,
    D: Target,
{
    let dst_ref = if dst_ref.is_empty() { src_ref } else { dst_ref };
    let node = src
        .resolve(src_ref)
        .await
        .map_err(|error| CopyError::on_source("resolve", error))?;
    extended_copy_graph(src, dst, &node, opts.graph).await?;
    dst.tag(&node, dst_ref)
        .await
        .map_err(|error| CopyError::on_destination("tag", error))?;
    Ok(node)
}
