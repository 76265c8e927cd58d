use crate::backfill::Backfiller;
use crate::config::TfMemoryConfig;
use crate::decode::ingest_document;
use crate::error::{TfError, TfResult};
use crate::registry::FrameRegistry;
use crate::search;
use crate::store::{Document, DocumentStore};
use crate::time::TfTime;
use crate::transform::{RigidTransform, Stamped, StampedTransform, TransformStorage};
use dashmap::DashMap;
use nalgebra::{Point3, UnitQuaternion, Vector3};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Reads transforms from the document store on demand, buffers them per
/// edge and answers transform, point and pose queries between any two
/// connected frames at arbitrary historical instants.
///
/// The registry is an explicit context value owned by this façade; create
/// one instance per store and share it across threads.
pub struct TfMemory {
    registry: FrameRegistry,
    backfiller: Backfiller,
    lookup_cache: LookupCache,
}

impl TfMemory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, TfMemoryConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: TfMemoryConfig) -> Self {
        Self {
            registry: FrameRegistry::new(config.max_storage_duration, config.tf_prefix.clone()),
            backfiller: Backfiller::new(
                store,
                config.backfill_window,
                config.backfill_max_batches,
            ),
            lookup_cache: LookupCache::new(config.lookup_cache_size),
        }
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    /// Feeds one stored tf document straight into the buffer, bypassing the
    /// store. Returns the number of accepted samples.
    pub fn ingest(&self, document: &Document) -> usize {
        ingest_document(&self.registry, document)
    }

    /// Inserts a single transform sample. `Ok(false)` means the edge cache
    /// rejected it as older than the retention horizon.
    pub fn insert_transform(
        &self,
        parent: &str,
        child: &str,
        translation: Vector3<f64>,
        rotation: UnitQuaternion<f64>,
        stamp: TfTime,
    ) -> TfResult<bool> {
        let parent_id = self.registry.resolve(parent);
        let child_id = self.registry.resolve(child);
        if parent_id == "/" || child_id == "/" {
            return Err(TfError::MalformedRecord("empty frame id".into()));
        }
        if parent_id == child_id {
            return Err(TfError::SelfTransform(child_id));
        }
        let sample = TransformStorage {
            translation,
            rotation,
            stamp,
            parent: self.registry.resolve_or_insert(&parent_id),
            child: self.registry.resolve_or_insert(&child_id),
        };
        Ok(self.registry.insert(sample))
    }

    /// The transform mapping source-frame coordinates into the target frame
    /// at `time`, backfilling either endpoint from the store when its buffer
    /// does not cover the instant.
    pub fn lookup_transform(
        &self,
        target: &str,
        source: &str,
        time: TfTime,
    ) -> TfResult<StampedTransform> {
        self.lookup(target, source, time, None)
    }

    /// Like [`lookup_transform`](Self::lookup_transform) but gives up with
    /// [`TfError::Timeout`] once `deadline` passes; no partial result is
    /// returned.
    pub fn lookup_transform_with_deadline(
        &self,
        target: &str,
        source: &str,
        time: TfTime,
        deadline: Instant,
    ) -> TfResult<StampedTransform> {
        self.lookup(target, source, time, Some(deadline))
    }

    /// Dual-time lookup: the source frame is taken at `source_time`, the
    /// target at `target_time`, bridged through `fixed` which is assumed
    /// static between the two instants.
    pub fn lookup_transform_full(
        &self,
        target: &str,
        target_time: TfTime,
        source: &str,
        source_time: TfTime,
        fixed: &str,
    ) -> TfResult<StampedTransform> {
        let source_to_fixed = self.lookup(fixed, source, source_time, None)?;
        let fixed_to_target = self.lookup(target, fixed, target_time, None)?;
        Ok(StampedTransform {
            transform: fixed_to_target
                .transform
                .compose(&source_to_fixed.transform),
            stamp: target_time,
            frame_id: fixed_to_target.frame_id,
            child_frame_id: source_to_fixed.child_frame_id,
        })
    }

    /// Re-expresses a stamped point in the target frame at its own stamp.
    pub fn transform_point(
        &self,
        target: &str,
        input: &Stamped<Point3<f64>>,
    ) -> TfResult<Stamped<Point3<f64>>> {
        let tf = self.lookup_transform(target, &input.frame_id, input.stamp)?;
        Ok(Stamped {
            data: tf.transform.apply_point(input.data),
            frame_id: tf.frame_id,
            stamp: input.stamp,
        })
    }

    pub fn transform_pose(
        &self,
        target: &str,
        input: &Stamped<RigidTransform>,
    ) -> TfResult<Stamped<RigidTransform>> {
        let tf = self.lookup_transform(target, &input.frame_id, input.stamp)?;
        Ok(Stamped {
            data: tf.transform.apply_pose(&input.data),
            frame_id: tf.frame_id,
            stamp: input.stamp,
        })
    }

    /// Dual-time point transform; the output is stamped at `target_time`.
    pub fn transform_point_full(
        &self,
        target: &str,
        target_time: TfTime,
        input: &Stamped<Point3<f64>>,
        fixed: &str,
    ) -> TfResult<Stamped<Point3<f64>>> {
        let tf =
            self.lookup_transform_full(target, target_time, &input.frame_id, input.stamp, fixed)?;
        Ok(Stamped {
            data: tf.transform.apply_point(input.data),
            frame_id: tf.frame_id,
            stamp: target_time,
        })
    }

    pub fn transform_pose_full(
        &self,
        target: &str,
        target_time: TfTime,
        input: &Stamped<RigidTransform>,
        fixed: &str,
    ) -> TfResult<Stamped<RigidTransform>> {
        let tf =
            self.lookup_transform_full(target, target_time, &input.frame_id, input.stamp, fixed)?;
        Ok(Stamped {
            data: tf.transform.apply_pose(&input.data),
            frame_id: tf.frame_id,
            stamp: target_time,
        })
    }

    fn lookup(
        &self,
        target: &str,
        source: &str,
        time: TfTime,
        deadline: Option<Instant>,
    ) -> TfResult<StampedTransform> {
        let target_id = self.registry.resolve(target);
        let source_id = self.registry.resolve(source);

        if source_id == target_id {
            return Ok(StampedTransform::identity(target_id, source_id, time));
        }

        let generation = self.registry.generation();
        if let Some(hit) = self
            .lookup_cache
            .get(&target_id, &source_id, time, generation)
        {
            return Ok(hit);
        }

        // make sure both endpoints are buffered around the instant; a store
        // outage degrades to whatever is already in memory
        let mut outage: Option<String> = None;
        for id in [&source_id, &target_id] {
            match self
                .backfiller
                .ensure_available(&self.registry, id, time, deadline)
            {
                Ok(()) => {}
                Err(TfError::StoreUnavailable(message)) => outage = Some(message),
                Err(other) => return Err(other),
            }
        }

        // any sample accepted after this point invalidates the entry we are
        // about to compute
        let generation = self.registry.generation();

        let graph = self.registry.graph();
        let endpoints = (graph.get(&source_id), graph.get(&target_id));
        let (source_handle, target_handle) = match endpoints {
            (Some(source_handle), Some(target_handle)) => (source_handle, target_handle),
            (missing_source, _) => {
                let missing = if missing_source.is_none() {
                    source_id
                } else {
                    target_id
                };
                debug!(frame = %missing, "frame unknown after backfill");
                return Err(match outage {
                    Some(message) => TfError::StoreUnavailable(message),
                    None => TfError::NoData(missing),
                });
            }
        };

        let path = search::lookup_path(&graph, source_handle, target_handle, time)?;

        let mut out = RigidTransform::identity();
        for entry in &path.inverse {
            out = out.compose(&entry.transform());
        }
        for entry in &path.forward {
            out = entry.transform().inverse().compose(&out);
        }
        drop(graph);

        let result = StampedTransform {
            transform: out,
            stamp: time,
            frame_id: target_id.clone(),
            child_frame_id: source_id.clone(),
        };
        self.lookup_cache
            .put(target_id, source_id, time, generation, result.clone());
        Ok(result)
    }
}

/// Memoized lookup results keyed by frame pair and instant. An entry is
/// only valid for the registry generation it was computed against, so any
/// accepted sample invalidates everything at once. Bounded in size; the
/// least recently touched entry makes room.
struct LookupCache {
    entries: DashMap<(String, String, i64), LookupEntry>,
    max_size: usize,
}

#[derive(Clone)]
struct LookupEntry {
    result: StampedTransform,
    generation: u64,
    last_access: Instant,
}

impl LookupCache {
    fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(max_size),
            max_size,
        }
    }

    fn get(
        &self,
        target: &str,
        source: &str,
        time: TfTime,
        generation: u64,
    ) -> Option<StampedTransform> {
        let key = (target.to_string(), source.to_string(), time.as_nanos());
        let mut entry = self.entries.get_mut(&key)?;
        if entry.generation != generation {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        entry.last_access = Instant::now();
        Some(entry.result.clone())
    }

    fn put(
        &self,
        target: String,
        source: String,
        time: TfTime,
        generation: u64,
        result: StampedTransform,
    ) {
        if self.max_size == 0 {
            return;
        }
        if self.entries.len() >= self.max_size {
            let mut oldest: Option<((String, String, i64), Instant)> = None;
            for entry in self.entries.iter() {
                match &oldest {
                    Some((_, access)) if entry.last_access >= *access => {}
                    _ => oldest = Some((entry.key().clone(), entry.last_access)),
                }
            }
            if let Some((key, _)) = oldest {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            (target, source, time.as_nanos()),
            LookupEntry {
                result,
                generation,
                last_access: Instant::now(),
            },
        );
    }
}
