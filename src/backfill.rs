use crate::decode::ingest_document;
use crate::error::{TfError, TfResult};
use crate::registry::FrameRegistry;
use crate::store::{DocumentStore, Filter, FindRequest};
use crate::time::{TfTime, NANOS_PER_SEC};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Collection holding the logged tf documents.
pub const TF_COLLECTION: &str = "tf";

/// Loads missing time ranges for a frame from the document store.
///
/// The store query selects documents recorded in `[t − window, t + 1 s)`
/// whose transform batch mentions the frame as a child, newest first; by
/// default only the newest batch straddling the instant is ingested.
pub struct Backfiller {
    store: Arc<dyn DocumentStore>,
    window: i64,
    max_batches: usize,
}

impl Backfiller {
    pub fn new(store: Arc<dyn DocumentStore>, window: i64, max_batches: usize) -> Self {
        Self {
            store,
            window,
            max_batches,
        }
    }

    /// Makes sure the frame's caches cover `time`, fetching from the store
    /// when they do not. No registry guard is held across store I/O; racing
    /// callers at worst fetch the same window twice, which the caches
    /// absorb idempotently.
    pub fn ensure_available(
        &self,
        registry: &FrameRegistry,
        canonical_id: &str,
        time: TfTime,
        deadline: Option<Instant>,
    ) -> TfResult<()> {
        {
            let graph = registry.graph();
            if let Some(handle) = graph.get(canonical_id) {
                if graph.covers(handle, time) {
                    return Ok(());
                }
            }
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(TfError::Timeout);
        }

        let request = FindRequest::new(
            TF_COLLECTION,
            Filter::And(vec![
                Filter::ElemMatch {
                    path: "transforms".into(),
                    inner: Box::new(Filter::eq_str("child_frame_id", canonical_id)),
                },
                Filter::Recorded {
                    start: (time - self.window).to_datetime(),
                    end: (time + NANOS_PER_SEC).to_datetime(),
                },
            ]),
        )
        .project(&["_id", "__recorded", "transforms"])
        .sort_desc("__recorded");

        let mut cursor = self.store.find(&request).map_err(|err| {
            warn!(frame = canonical_id, error = %err, "document store unreachable, serving buffered data only");
            TfError::StoreUnavailable(err.to_string())
        })?;

        let mut batches = 0;
        while batches < self.max_batches {
            let document = match cursor.next_document() {
                Ok(Some(document)) => document,
                Ok(None) => break,
                Err(err) => {
                    warn!(frame = canonical_id, error = %err, "cursor failed mid-backfill");
                    return Err(TfError::StoreUnavailable(err.to_string()));
                }
            };
            let accepted = ingest_document(registry, &document);
            debug!(
                frame = canonical_id,
                accepted, "ingested backfill batch"
            );
            batches += 1;

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TfError::Timeout);
            }
        }

        Ok(())
    }
}
