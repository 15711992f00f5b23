use async_trait::async_trait;
use futures_util::future::{try_join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::status::StatusTracker;
use crate::descriptor::Descriptor;
use crate::errors::Error;

/// Outcome of a node's pre handler.
pub(crate) enum Step {
    /// Do not descend and do not post-process this node.
    Skip,
    /// Descend into the given children, then post-process.
    Descend(Vec<Descriptor>),
}

#[async_trait]
pub(crate) trait Visitor: Send + Sync {
    async fn pre(&self, node: &Descriptor) -> Result<Step, Error>;

    async fn post(&self, node: &Descriptor) -> Result<(), Error>;
}

/// An optional concurrency bound shared by all workers of one walk.
pub(crate) struct Limiter {
    semaphore: Option<Semaphore>,
}

impl Limiter {
    pub(crate) fn new(concurrency: usize) -> Limiter {
        Limiter {
            semaphore: if concurrency == 0 {
                None
            } else {
                Some(Semaphore::new(concurrency))
            },
        }
    }

    async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        match &self.semaphore {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        }
    }
}

/// Walk the DAG rooted at `root`. Each node runs `pre` exactly once; its
/// children are dispatched concurrently (one permit each); `post` runs after
/// every child has signalled completion. A node already committed by another
/// worker is passed over, and the worker that reached it through a different
/// parent waits on the owner's latch instead.
pub(crate) async fn dispatch(
    visitor: &dyn Visitor,
    root: &Descriptor,
    tracker: &StatusTracker,
    limiter: &Limiter,
) -> Result<(), Error> {
    visit(visitor, root.clone(), tracker, limiter).await
}

fn visit<'a>(
    visitor: &'a dyn Visitor,
    node: Descriptor,
    tracker: &'a StatusTracker,
    limiter: &'a Limiter,
) -> BoxFuture<'a, Result<(), Error>> {
    async move {
        let mut permit = limiter.acquire().await;

        let (latch, committed) = tracker.try_commit(&node);
        if !committed {
            return Ok(());
        }

        let children = match visitor.pre(&node).await? {
            Step::Skip => {
                latch.close();
                return Ok(());
            }
            Step::Descend(children) => children,
        };

        if !children.is_empty() {
            // the permit is given up while the subtree is in flight and
            // taken again for the node's own post-processing
            permit.take();
            let pending: Vec<_> = children
                .iter()
                .map(|child| visit(visitor, child.clone(), tracker, limiter))
                .collect();
            try_join_all(pending).await?;
            for child in &children {
                let (child_latch, _) = tracker.try_commit(child);
                child_latch.wait().await;
            }
            permit = limiter.acquire().await;
        }

        let _permit = permit;
        visitor.post(&node).await?;
        latch.close();
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    struct TestGraph {
        edges: HashMap<String, Vec<Descriptor>>,
        skipped: Vec<String>,
        order: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TestGraph {
        fn new(edges: Vec<(&Descriptor, Vec<Descriptor>)>) -> TestGraph {
            TestGraph {
                edges: edges
                    .into_iter()
                    .map(|(node, children)| (node.digest.to_string(), children))
                    .collect(),
                skipped: Vec::new(),
                order: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn record(&self, event: String) {
            self.order.lock().unwrap().push(event);
        }

        fn position(&self, event: &str) -> usize {
            let order = self.order.lock().unwrap();
            order.iter().position(|e| e == event).unwrap()
        }
    }

    #[async_trait]
    impl Visitor for TestGraph {
        async fn pre(&self, node: &Descriptor) -> Result<Step, Error> {
            let key = node.digest.to_string();
            self.record(format!("pre {}", key));
            if self.skipped.contains(&key) {
                return Ok(Step::Skip);
            }
            Ok(Step::Descend(
                self.edges.get(&key).cloned().unwrap_or_default(),
            ))
        }

        async fn post(&self, node: &Descriptor) -> Result<(), Error> {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.record(format!("post {}", node.digest));
            Ok(())
        }
    }

    fn descriptor(bytes: &[u8]) -> Descriptor {
        Descriptor::from_bytes("application/vnd.test", bytes)
    }

    #[tokio::test]
    async fn test_post_order_respects_edges() {
        let root = descriptor(b"root");
        let left = descriptor(b"left");
        let right = descriptor(b"right");
        let leaf = descriptor(b"leaf");
        let graph = TestGraph::new(vec![
            (&root, vec![left.clone(), right.clone()]),
            (&left, vec![leaf.clone()]),
            (&right, vec![leaf.clone()]),
        ]);

        let tracker = StatusTracker::new();
        let limiter = Limiter::new(3);
        dispatch(&graph, &root, &tracker, &limiter).await.unwrap();

        assert!(graph.position(&format!("post {}", leaf.digest))
            < graph.position(&format!("post {}", left.digest)));
        assert!(graph.position(&format!("post {}", left.digest))
            < graph.position(&format!("post {}", root.digest)));
        assert!(graph.position(&format!("post {}", right.digest))
            < graph.position(&format!("post {}", root.digest)));
    }

    #[tokio::test]
    async fn test_diamond_posts_each_node_once() {
        let root = descriptor(b"root");
        let left = descriptor(b"left");
        let right = descriptor(b"right");
        let shared = descriptor(b"shared");
        let graph = TestGraph::new(vec![
            (&root, vec![left.clone(), right.clone()]),
            (&left, vec![shared.clone()]),
            (&right, vec![shared.clone()]),
        ]);

        let tracker = StatusTracker::new();
        let limiter = Limiter::new(3);
        dispatch(&graph, &root, &tracker, &limiter).await.unwrap();

        let order = graph.order.lock().unwrap();
        let shared_posts = order
            .iter()
            .filter(|e| **e == format!("post {}", shared.digest))
            .count();
        assert_eq!(shared_posts, 1);
    }

    #[tokio::test]
    async fn test_skip_prunes_the_subtree() {
        let root = descriptor(b"root");
        let pruned = descriptor(b"pruned");
        let hidden = descriptor(b"hidden");
        let mut graph = TestGraph::new(vec![
            (&root, vec![pruned.clone()]),
            (&pruned, vec![hidden.clone()]),
        ]);
        graph.skipped.push(pruned.digest.to_string());

        let tracker = StatusTracker::new();
        let limiter = Limiter::new(3);
        dispatch(&graph, &root, &tracker, &limiter).await.unwrap();

        let order = graph.order.lock().unwrap();
        assert!(!order.contains(&format!("pre {}", hidden.digest)));
        assert!(!order.contains(&format!("post {}", pruned.digest)));
        assert!(order.contains(&format!("post {}", root.digest)));
    }

    #[tokio::test]
    async fn test_concurrency_stays_within_the_bound() {
        let root = descriptor(b"root");
        let children: Vec<Descriptor> = (0..16u8)
            .map(|index| descriptor(&[b'c', index]))
            .collect();
        let graph = TestGraph::new(vec![(&root, children)]);

        let tracker = StatusTracker::new();
        let limiter = Limiter::new(2);
        dispatch(&graph, &root, &tracker, &limiter).await.unwrap();

        assert!(graph.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_deep_chain_does_not_deadlock_on_one_permit() {
        let a = descriptor(b"a");
        let b = descriptor(b"b");
        let c = descriptor(b"c");
        let d = descriptor(b"d");
        let graph = TestGraph::new(vec![
            (&a, vec![b.clone()]),
            (&b, vec![c.clone()]),
            (&c, vec![d.clone()]),
        ]);

        let tracker = StatusTracker::new();
        let limiter = Limiter::new(1);
        dispatch(&graph, &a, &tracker, &limiter).await.unwrap();

        assert!(graph.position(&format!("post {}", d.digest))
            < graph.position(&format!("post {}", a.digest)));
    }
}
