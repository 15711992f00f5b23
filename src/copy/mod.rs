use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::content::proxy::CachingProxy;
use crate::content::{
    Fetcher, Pusher, ReadOnlyStorage, ReadOnlyTarget, ReferenceFetcher, ReferencePusher, Resolver,
    Storage, Tagger, Target,
};
use crate::descriptor::{Descriptor, Platform};
use crate::errors::{CopyError, Error};
use crate::graph::dispatch::{dispatch, Limiter, Step, Visitor};
use crate::graph::status::StatusTracker;
use crate::graph::successors::successors;
use crate::platform::PlatformSelector;

pub mod extended;

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_MAX_METADATA_BYTES: u64 = 4 * 1024 * 1024;

/// Outcome of a `pre_copy` hook.
pub enum CopyDecision {
    Continue,
    /// Leave this node out of the copy; it still counts as completed.
    Skip,
}

pub type PreCopyHook = Box<dyn Fn(&Descriptor) -> Result<CopyDecision, Error> + Send + Sync>;
pub type CopyHook = Box<dyn Fn(&Descriptor) -> Result<(), Error> + Send + Sync>;

/// Rewrites the root before the graph walk, e.g. to select a platform.
#[async_trait]
pub trait MapRoot: Send + Sync {
    async fn map_root(&self, fetcher: &dyn Fetcher, root: Descriptor) -> Result<Descriptor, Error>;
}

pub struct CopyGraphOptions {
    /// Upper bound on concurrently processed nodes. `0` disables the bound.
    pub concurrency: usize,
    /// Manifests up to this size are held in the proxy cache; anything larger
    /// is streamed straight through.
    pub max_metadata_bytes: u64,
    pub pre_copy: Option<PreCopyHook>,
    pub post_copy: Option<CopyHook>,
    pub on_copy_skipped: Option<CopyHook>,
}

impl Default for CopyGraphOptions {
    fn default() -> CopyGraphOptions {
        CopyGraphOptions {
            concurrency: DEFAULT_CONCURRENCY,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            pre_copy: None,
            post_copy: None,
            on_copy_skipped: None,
        }
    }
}

#[derive(Default)]
pub struct CopyOptions {
    pub graph: CopyGraphOptions,
    pub map_root: Option<Box<dyn MapRoot>>,
}

impl CopyOptions {
    /// Copy only the sub-graph for the given platform when the source
    /// reference points at an index.
    pub fn with_target_platform(mut self, platform: Platform) -> CopyOptions {
        self.map_root = Some(Box::new(PlatformSelector::new(platform)));
        self
    }
}

/// Root push deferred to a `ReferencePusher`, binding the destination
/// reference in the same round-trip as the manifest push.
pub(crate) struct RootBinding<'a> {
    root: Descriptor,
    reference: &'a str,
    pusher: &'a dyn ReferencePusher,
    bound: AtomicBool,
}

struct GraphCopier<'a> {
    source: &'a dyn Fetcher,
    proxy: &'a CachingProxy<'a>,
    destination: &'a dyn Storage,
    opts: &'a CopyGraphOptions,
    root_binding: Option<&'a RootBinding<'a>>,
}

#[async_trait]
impl Visitor for GraphCopier<'_> {
    async fn pre(&self, node: &Descriptor) -> Result<Step, Error> {
        let exists = self
            .destination
            .exists(node)
            .await
            .map_err(|error| CopyError::on_destination("exists", error))?;
        if exists {
            log::debug!("content `{}` already exists at the destination", node.digest);
            if let Some(hook) = &self.opts.on_copy_skipped {
                hook(node)?;
            }
            return Ok(Step::Skip);
        }
        let children = successors(self.proxy, node)
            .await
            .map_err(|error| CopyError::on_source("fetch", error))?;
        Ok(Step::Descend(children))
    }

    async fn post(&self, node: &Descriptor) -> Result<(), Error> {
        if let Some(hook) = &self.opts.pre_copy {
            if let CopyDecision::Skip = hook(node)? {
                log::debug!("copy of `{}` skipped by hook", node.digest);
                return Ok(());
            }
        }

        // manifests were fetched for successor extraction and sit in the
        // proxy cache; everything else streams straight from the source
        let cached = self.proxy.is_cached(node);
        let content = if cached {
            self.proxy
                .fetch_cached(node)
                .await
                .map_err(|error| CopyError::on_source("fetch", error))?
        } else {
            log::trace!("copying `{}` directly from the source", node.digest);
            self.source
                .fetch(node)
                .await
                .map_err(|error| CopyError::on_source("fetch", error))?
        };

        match self.root_binding {
            Some(binding) if cached && binding.root.same_content(node) => {
                log::debug!(
                    "pushing root `{}` with reference `{}`",
                    node.digest,
                    binding.reference
                );
                match binding
                    .pusher
                    .push_reference(node, content, binding.reference)
                    .await
                {
                    Ok(()) | Err(Error::AlreadyExists(_)) => {
                        binding.bound.store(true, Ordering::SeqCst);
                    }
                    Err(error) => return Err(CopyError::on_destination("push", error)),
                }
            }
            _ => match self.destination.push(node, content).await {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(error) => return Err(CopyError::on_destination("push", error)),
            },
        }

        if let Some(hook) = &self.opts.post_copy {
            hook(node)?;
        }
        Ok(())
    }
}

pub(crate) async fn copy_graph_inner<'a>(
    source: &'a dyn Fetcher,
    proxy: &'a CachingProxy<'a>,
    destination: &'a dyn Storage,
    root: &'a Descriptor,
    opts: &'a CopyGraphOptions,
    tracker: &'a StatusTracker,
    limiter: &'a Limiter,
    root_binding: Option<&'a RootBinding<'a>>,
) -> Result<(), Error> {
    let copier = GraphCopier {
        source,
        proxy,
        destination,
        opts,
        root_binding,
    };
    dispatch(&copier, root, tracker, limiter).await
}

/// Replicate the graph rooted at `root` from `src` to `dst`. Content already
/// present at the destination prunes its whole sub-graph.
pub async fn copy_graph<S, D>(
    src: &S,
    dst: &D,
    root: &Descriptor,
    opts: CopyGraphOptions,
) -> Result<(), Error>
where
    S: ReadOnlyStorage,
    D: Storage,
{
    let proxy = CachingProxy::new(src, opts.max_metadata_bytes);
    let tracker = StatusTracker::new();
    let limiter = Limiter::new(opts.concurrency);
    copy_graph_inner(src, &proxy, dst, root, &opts, &tracker, &limiter, None).await
}

/// Resolve `src_ref` at the source, replicate its graph to `dst` and bind
/// `dst_ref` (defaulting to `src_ref`) to the root at the destination.
/// Returns the root descriptor after any root mapping.
pub async fn copy<S, D>(
    src: &S,
    src_ref: &str,
    dst: &D,
    dst_ref: &str,
    opts: CopyOptions,
) -> Result<Descriptor, Error>
where
    S: ReadOnlyTarget,
    D: Target,
{
    let dst_ref = if dst_ref.is_empty() { src_ref } else { dst_ref };
    let proxy = CachingProxy::new(src, opts.graph.max_metadata_bytes);

    let root = match src.reference_fetcher() {
        Some(fetcher) => {
            log::debug!("resolving and fetching `{}` in one round-trip", src_ref);
            let (descriptor, content) = fetcher
                .fetch_reference(src_ref)
                .await
                .map_err(|error| CopyError::on_source("resolve", error))?;
            if descriptor.size <= opts.graph.max_metadata_bytes {
                proxy
                    .cache_push(&descriptor, content)
                    .await
                    .map_err(|error| CopyError::on_source("fetch", error))?;
            }
            descriptor
        }
        None => src
            .resolve(src_ref)
            .await
            .map_err(|error| CopyError::on_source("resolve", error))?,
    };

    let root = match &opts.map_root {
        Some(mapper) => {
            // probe reads (configs) should not take up cache space
            proxy.set_caching(false);
            let mapped = mapper.map_root(&proxy, root).await?;
            proxy.set_caching(true);
            mapped
        }
        None => root,
    };

    let tracker = StatusTracker::new();
    let limiter = Limiter::new(opts.graph.concurrency);
    let binding = dst.reference_pusher().map(|pusher| RootBinding {
        root: root.clone(),
        reference: dst_ref,
        pusher,
        bound: AtomicBool::new(false),
    });

    copy_graph_inner(
        src,
        &proxy,
        dst,
        &root,
        &opts.graph,
        &tracker,
        &limiter,
        binding.as_ref(),
    )
    .await?;

    let bound = binding
        .as_ref()
        .map(|binding| binding.bound.load(Ordering::SeqCst))
        .unwrap_or(false);
    if !bound {
        dst.tag(&root, dst_ref)
            .await
            .map_err(|error| CopyError::on_destination("tag", error))?;
    }
    log::debug!("copied `{}` to `{}`", src_ref, dst_ref);
    Ok(root)
}
