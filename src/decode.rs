use crate::error::{TfError, TfResult};
use crate::registry::FrameRegistry;
use crate::time::TfTime;
use crate::transform::TransformStorage;
use chrono::{DateTime, Utc};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// How far a stored quaternion may deviate from unit length before the
/// record is rejected instead of renormalized.
const QUATERNION_NORM_TOLERANCE: f64 = 1e-6;

/// Wire shape of one stored TF record, matching the logging layout:
/// `header.frame_id` is the parent, `child_frame_id` the child.
#[derive(Debug, Deserialize)]
pub struct TfRecord {
    pub header: TfHeader,
    pub child_frame_id: String,
    pub transform: WireTransform,
}

#[derive(Debug, Deserialize)]
pub struct TfHeader {
    pub frame_id: String,
    pub stamp: WireStamp,
}

/// ISO-8601 stamp as logged; nanoseconds survive in the textual form.
#[derive(Debug, Deserialize)]
pub struct WireStamp {
    #[serde(rename = "$date")]
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct WireTransform {
    pub translation: WireTranslation,
    pub rotation: WireRotation,
}

#[derive(Debug, Deserialize)]
pub struct WireTranslation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Deserialize)]
pub struct WireRotation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

pub fn parse_stamp(raw: &str) -> TfResult<TfTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|stamp| TfTime::from_datetime(stamp.with_timezone(&Utc)))
        .map_err(|err| TfError::MalformedRecord(format!("bad stamp '{raw}': {err}")))
}

/// Validates one wire record and resolves it into a storable sample.
///
/// Frame identity checks compare canonical string values, so a record whose
/// parent and child only differ before canonicalization is still rejected
/// as a self-transform.
pub fn decode_record(registry: &FrameRegistry, record: &TfRecord) -> TfResult<TransformStorage> {
    let child_id = registry.resolve(&record.child_frame_id);
    let parent_id = registry.resolve(&record.header.frame_id);

    if child_id == "/" {
        return Err(TfError::MalformedRecord("child_frame_id not set".into()));
    }
    if parent_id == "/" {
        return Err(TfError::MalformedRecord(format!(
            "frame_id not set for child '{child_id}'"
        )));
    }
    if child_id == parent_id {
        return Err(TfError::SelfTransform(child_id));
    }

    let stamp = parse_stamp(&record.header.stamp.date)?;

    let r = &record.transform.rotation;
    let raw = Quaternion::new(r.w, r.x, r.y, r.z);
    let norm = raw.norm();
    if !norm.is_finite() || (norm - 1.0).abs() > QUATERNION_NORM_TOLERANCE {
        return Err(TfError::InvalidQuaternion);
    }

    let t = &record.transform.translation;
    if ![t.x, t.y, t.z].iter().all(|v| v.is_finite()) {
        return Err(TfError::MalformedRecord(format!(
            "non-finite translation for child '{child_id}'"
        )));
    }

    Ok(TransformStorage {
        translation: Vector3::new(t.x, t.y, t.z),
        rotation: UnitQuaternion::from_quaternion(raw),
        stamp,
        parent: registry.resolve_or_insert(&parent_id),
        child: registry.resolve_or_insert(&child_id),
    })
}

/// Decodes and inserts every record of one stored tf document.
///
/// A malformed record is skipped with a diagnostic and never fails the
/// batch; returns how many samples the registry accepted.
pub fn ingest_document(registry: &FrameRegistry, document: &Value) -> usize {
    let Some(records) = document.get("transforms").and_then(Value::as_array) else {
        warn!("skipping tf document without a transforms array");
        return 0;
    };

    let mut accepted = 0;
    for raw in records {
        let record: TfRecord = match serde_json::from_value(raw.clone()) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "skipping undecodable tf record");
                continue;
            }
        };
        match decode_record(registry, &record) {
            Ok(sample) => {
                if registry.insert(sample) {
                    accepted += 1;
                } else {
                    debug!(
                        child = %record.child_frame_id,
                        stamp = %record.header.stamp.date,
                        "ignoring transform data from the past"
                    );
                }
            }
            Err(err) => warn!(error = %err, "skipping invalid tf record"),
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::NANOS_PER_SEC;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn registry() -> FrameRegistry {
        FrameRegistry::new(3600 * NANOS_PER_SEC, "")
    }

    fn record(parent: &str, child: &str, stamp: &str) -> Value {
        json!({
            "header": { "frame_id": parent, "stamp": { "$date": stamp } },
            "child_frame_id": child,
            "transform": {
                "translation": { "x": 1.0, "y": 2.0, "z": 3.0 },
                "rotation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 }
            }
        })
    }

    #[test]
    fn test_decode_valid_record() {
        let reg = registry();
        let raw = record("/map", "/base", "2014-02-19T08:42:38.500000000+00:00");
        let rec: TfRecord = serde_json::from_value(raw).unwrap();
        let sample = decode_record(&reg, &rec).unwrap();

        assert_relative_eq!(sample.translation.x, 1.0, epsilon = 1e-9);
        assert_eq!(reg.graph().frame_id(sample.parent), Some("/map"));
        assert_eq!(reg.graph().frame_id(sample.child), Some("/base"));
        assert_eq!(
            sample.stamp.as_nanos() % NANOS_PER_SEC,
            500_000_000,
            "fractional seconds must survive decoding"
        );
    }

    #[test]
    fn test_self_transform_rejected_by_value() {
        let reg = registry();
        // ids differ textually but canonicalize to the same frame
        let raw = record("base", "/base", "2014-02-19T08:42:38Z");
        let rec: TfRecord = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            decode_record(&reg, &rec),
            Err(TfError::SelfTransform(_))
        ));
    }

    #[test]
    fn test_empty_ids_rejected() {
        let reg = registry();
        let raw = record("", "/base", "2014-02-19T08:42:38Z");
        let rec: TfRecord = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            decode_record(&reg, &rec),
            Err(TfError::MalformedRecord(_))
        ));

        let raw = record("/map", "", "2014-02-19T08:42:38Z");
        let rec: TfRecord = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            decode_record(&reg, &rec),
            Err(TfError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_non_unit_quaternion_rejected() {
        let reg = registry();
        let mut raw = record("/map", "/base", "2014-02-19T08:42:38Z");
        raw["transform"]["rotation"]["w"] = json!(0.5);
        let rec: TfRecord = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            decode_record(&reg, &rec),
            Err(TfError::InvalidQuaternion)
        ));
    }

    #[test]
    fn test_bad_stamp_rejected() {
        let reg = registry();
        let raw = record("/map", "/base", "not-a-date");
        let rec: TfRecord = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            decode_record(&reg, &rec),
            Err(TfError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_ingest_skips_bad_records_and_keeps_batch() {
        let reg = registry();
        let document = json!({
            "__recorded": { "$date": "2014-02-19T08:42:38Z" },
            "transforms": [
                record("/map", "/base", "2014-02-19T08:42:38Z"),
                record("/base", "base", "2014-02-19T08:42:38Z"),   // self-transform
                { "child_frame_id": "/arm" },                      // undecodable
                record("/base", "/arm", "2014-02-19T08:42:38Z"),
            ]
        });
        assert_eq!(ingest_document(&reg, &document), 2);
        assert!(reg.get("/map").is_some());
        assert!(reg.get("/arm").is_some());
    }

    #[test]
    fn test_ingest_document_without_transforms() {
        let reg = registry();
        assert_eq!(ingest_document(&reg, &json!({ "__recorded": 1 })), 0);
    }
}
