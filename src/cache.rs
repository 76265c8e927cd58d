use crate::time::TfTime;
use crate::transform::TransformStorage;
use std::collections::VecDeque;

/// Bounded, time-ordered buffer of samples for one parent→child edge.
///
/// Samples older than `max_storage_duration` behind the newest buffered
/// sample are rejected on insert and evicted once a newer sample arrives, so
/// the buffer always spans at most that duration.
#[derive(Debug, Clone)]
pub struct TimeCache {
    samples: VecDeque<TransformStorage>,
    max_storage_duration: i64,
}

impl TimeCache {
    pub fn new(max_storage_duration: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            max_storage_duration,
        }
    }

    /// Inserts a sample, keeping the buffer ordered by timestamp.
    ///
    /// Returns `false` when the sample is older than the retention horizon
    /// (`newest − max_storage_duration`); the buffer is left unchanged. A
    /// sample at an already-buffered timestamp replaces the existing one,
    /// which keeps the ordering strict and makes re-ingestion idempotent.
    pub fn insert(&mut self, sample: TransformStorage) -> bool {
        if let Some(newest) = self.samples.back() {
            if sample.stamp.as_nanos() < newest.stamp.as_nanos() - self.max_storage_duration {
                return false;
            }
        }

        let pos = self
            .samples
            .partition_point(|s| s.stamp <= sample.stamp);
        if pos > 0 && self.samples[pos - 1].stamp == sample.stamp {
            self.samples[pos - 1] = sample;
        } else {
            self.samples.insert(pos, sample);
        }

        if let Some(newest) = self.samples.back().map(|s| s.stamp) {
            while let Some(oldest) = self.samples.front() {
                if newest - oldest.stamp > self.max_storage_duration {
                    self.samples.pop_front();
                } else {
                    break;
                }
            }
        }
        true
    }

    /// The best sample for `time`: an exact hit or interior interpolation
    /// when the instant is bracketed, otherwise the nearest boundary sample
    /// unchanged. `None` when the buffer is empty.
    pub fn get_data(&self, time: TfTime) -> Option<TransformStorage> {
        if self.samples.len() == 1 {
            return self.samples.front().copied();
        }

        let pos = self.samples.partition_point(|s| s.stamp <= time);
        match pos {
            0 => self.samples.front().copied(),
            p if p == self.samples.len() => self.samples.back().copied(),
            p => {
                let before = &self.samples[p - 1];
                if before.stamp == time {
                    return Some(*before);
                }
                Some(interpolate(before, &self.samples[p], time))
            }
        }
    }

    /// True iff the buffer holds samples on both sides of `time`
    /// (boundaries included).
    pub fn time_in_buffer_range(&self, time: TfTime) -> bool {
        match (self.samples.front(), self.samples.back()) {
            (Some(oldest), Some(newest)) => oldest.stamp <= time && time <= newest.stamp,
            _ => false,
        }
    }

    /// Absolute nanosecond distance from `time` to the closest buffered
    /// sample; the search cost of using this edge. `None` when empty.
    pub fn time_to_nearest(&self, time: TfTime) -> Option<i64> {
        if self.samples.is_empty() {
            return None;
        }
        let pos = self.samples.partition_point(|s| s.stamp <= time);
        let mut nearest = i64::MAX;
        if pos > 0 {
            nearest = nearest.min(self.samples[pos - 1].stamp.abs_diff(time));
        }
        if pos < self.samples.len() {
            nearest = nearest.min(self.samples[pos].stamp.abs_diff(time));
        }
        Some(nearest)
    }

    pub fn oldest_time(&self) -> Option<TfTime> {
        self.samples.front().map(|s| s.stamp)
    }

    pub fn latest_time(&self) -> Option<TfTime> {
        self.samples.back().map(|s| s.stamp)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Interior interpolation: lerp on translation, slerp on rotation, result
/// stamped at the requested instant.
fn interpolate(
    before: &TransformStorage,
    after: &TransformStorage,
    time: TfTime,
) -> TransformStorage {
    let span = (after.stamp - before.stamp) as f64;
    let ratio = (time - before.stamp) as f64 / span;

    let translation = before.translation + (after.translation - before.translation) * ratio;
    let rotation = before
        .rotation
        .try_slerp(&after.rotation, ratio, 1e-9)
        // antipodal rotations have no unique midpoint; snap to the closer end
        .unwrap_or(if ratio < 0.5 {
            before.rotation
        } else {
            after.rotation
        });

    TransformStorage {
        translation,
        rotation,
        stamp: time,
        parent: before.parent,
        child: before.child,
    }
}
