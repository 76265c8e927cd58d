use crate::time::NANOS_PER_SEC;
use serde::Deserialize;

/// Tuning knobs for a transform memory instance. All durations are
/// nanoseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TfMemoryConfig {
    /// Retention window Δ per edge cache; samples older than the newest by
    /// more than this are rejected and evicted.
    pub max_storage_duration: i64,
    /// How far before the queried instant a backfill reaches into the store.
    pub backfill_window: i64,
    /// Newest store batches ingested per backfill before stopping.
    pub backfill_max_batches: usize,
    /// Prefix attached when canonicalizing frame IDs without a leading
    /// slash. Left empty unless deployment configuration says otherwise.
    pub tf_prefix: String,
    /// Memoized lookup results kept before the oldest entry is evicted.
    pub lookup_cache_size: usize,
}

impl Default for TfMemoryConfig {
    fn default() -> Self {
        Self {
            max_storage_duration: 10 * NANOS_PER_SEC,
            backfill_window: 5 * NANOS_PER_SEC,
            backfill_max_batches: 1,
            tf_prefix: String::new(),
            lookup_cache_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TfMemoryConfig::default();
        assert_eq!(config.max_storage_duration, 10 * NANOS_PER_SEC);
        assert_eq!(config.backfill_window, 5 * NANOS_PER_SEC);
        assert_eq!(config.backfill_max_batches, 1);
        assert!(config.tf_prefix.is_empty());
    }

    #[test]
    fn test_partial_deserialization_keeps_defaults() {
        let config: TfMemoryConfig =
            serde_json::from_str(r#"{ "backfill_window": 2000000000 }"#).unwrap();
        assert_eq!(config.backfill_window, 2 * NANOS_PER_SEC);
        assert_eq!(config.max_storage_duration, 10 * NANOS_PER_SEC);
    }
}
