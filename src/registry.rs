use crate::cache::TimeCache;
use crate::time::TfTime;
use crate::transform::TransformStorage;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::warn;

/// Stable handle of a frame in the registry arena. Frames are never removed,
/// so a handle stays valid for the life of the registry.
pub type FrameHandle = NodeIndex;

/// Shared per-edge sample buffer. Cloning shares the buffer, so samples can
/// be inserted while only a read guard on the surrounding graph is held.
pub type EdgeCache = Arc<RwLock<TimeCache>>;

/// A named coordinate frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: String,
}

/// The arena owning every frame and every parent→child edge cache.
///
/// Logged histories may record several parents for one frame over time, so
/// this is a general directed graph, not a tree.
#[derive(Default)]
pub struct FrameGraph {
    graph: StableDiGraph<Frame, EdgeCache>,
    by_id: HashMap<String, FrameHandle>,
}

impl FrameGraph {
    pub fn get(&self, canonical_id: &str) -> Option<FrameHandle> {
        self.by_id.get(canonical_id).copied()
    }

    pub fn frame_id(&self, handle: FrameHandle) -> Option<&str> {
        self.graph.node_weight(handle).map(|f| f.id.as_str())
    }

    /// Frames with a parent→child edge into `handle`.
    pub fn parent_frames(&self, handle: FrameHandle) -> impl Iterator<Item = FrameHandle> + '_ {
        self.graph.neighbors_directed(handle, Direction::Incoming)
    }

    pub fn edge_cache(&self, parent: FrameHandle, child: FrameHandle) -> Option<&EdgeCache> {
        self.graph
            .find_edge(parent, child)
            .and_then(|e| self.graph.edge_weight(e))
    }

    /// True iff any parent edge of `handle` buffers samples around `time`.
    pub fn covers(&self, handle: FrameHandle, time: TfTime) -> bool {
        self.graph
            .edges_directed(handle, Direction::Incoming)
            .any(|edge| {
                edge.weight()
                    .read()
                    .expect("edge cache lock poisoned")
                    .time_in_buffer_range(time)
            })
    }
}

/// Process-wide frame registry: canonical ID interning plus the arena graph,
/// behind a single read-mostly lock. Sample inserts only need the read guard
/// once the edge exists; structural growth takes the write guard briefly.
pub struct FrameRegistry {
    inner: RwLock<FrameGraph>,
    max_storage_duration: i64,
    tf_prefix: String,
    generation: AtomicU64,
}

impl FrameRegistry {
    pub fn new(max_storage_duration: i64, tf_prefix: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(FrameGraph::default()),
            max_storage_duration,
            tf_prefix: tf_prefix.into(),
            generation: AtomicU64::new(0),
        }
    }

    /// Canonical form of a frame ID: absolute IDs pass through, anything
    /// else gets the configured prefix (or just a leading slash) attached.
    pub fn resolve(&self, frame_id: &str) -> String {
        if frame_id.starts_with('/') {
            return frame_id.to_string();
        }
        warn!(
            frame_id,
            prefix = %self.tf_prefix,
            "frame id is not fully resolved, canonicalizing with local prefix"
        );
        if self.tf_prefix.is_empty() {
            format!("/{frame_id}")
        } else if self.tf_prefix.starts_with('/') {
            format!("{}/{frame_id}", self.tf_prefix)
        } else {
            format!("/{}/{frame_id}", self.tf_prefix)
        }
    }

    pub fn get(&self, canonical_id: &str) -> Option<FrameHandle> {
        self.graph().get(canonical_id)
    }

    /// Canonicalizes `frame_id` and returns its handle, interning the frame
    /// on first reference. When two callers race, the loser re-reads under
    /// the write guard and adopts the winner's frame.
    pub fn resolve_or_insert(&self, frame_id: &str) -> FrameHandle {
        let canonical = self.resolve(frame_id);
        if let Some(handle) = self.get(&canonical) {
            return handle;
        }
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(&handle) = inner.by_id.get(&canonical) {
            return handle;
        }
        let handle = inner.graph.add_node(Frame {
            id: canonical.clone(),
        });
        inner.by_id.insert(canonical, handle);
        handle
    }

    /// The cache on the parent→child edge, creating the edge on first use.
    pub fn get_or_create_cache(&self, parent: FrameHandle, child: FrameHandle) -> EdgeCache {
        if let Some(cache) = self.graph().edge_cache(parent, child) {
            return cache.clone();
        }
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(e) = inner.graph.find_edge(parent, child) {
            return inner.graph[e].clone();
        }
        let cache = Arc::new(RwLock::new(TimeCache::new(self.max_storage_duration)));
        inner.graph.add_edge(parent, child, cache.clone());
        cache
    }

    /// Routes a sample to its edge cache. Returns `false` when the cache
    /// rejected it as older than the retention horizon; self-loop samples
    /// are never accepted.
    pub fn insert(&self, sample: TransformStorage) -> bool {
        if sample.parent == sample.child {
            let id = self
                .graph()
                .frame_id(sample.child)
                .unwrap_or_default()
                .to_string();
            warn!(frame = %id, "dropping self-loop transform sample");
            return false;
        }
        let cache = self.get_or_create_cache(sample.parent, sample.child);
        let accepted = cache
            .write()
            .expect("edge cache lock poisoned")
            .insert(sample);
        if accepted {
            self.generation.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Read access to the arena for searches and availability checks. The
    /// guard must not be held across store I/O.
    pub fn graph(&self) -> RwLockReadGuard<'_, FrameGraph> {
        self.inner.read().expect("registry lock poisoned")
    }

    /// Monotone ingest counter; bumps whenever a sample lands. Memoized
    /// lookups from an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }
}
