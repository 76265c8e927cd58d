use crate::error::TfResult;
use crate::store::{parse_recorded, Document, DocumentStore, Filter, FindRequest};
use crate::time::{TfTime, NANOS_PER_SEC};
use crate::transform::{RigidTransform, Stamped};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

pub const UIMA_COLLECTION: &str = "uima_uima_results";
pub const DESIGNATOR_COLLECTION: &str = "logged_designators";

/// Perception results reach the log ±60 s around the event they describe;
/// object listings use a tighter ±30 s window.
const PERCEPTION_WINDOW: i64 = 60 * NANOS_PER_SEC;
const OBJECT_WINDOW: i64 = 30 * NANOS_PER_SEC;

/// Which collection family a designator came from, and therefore what kind
/// of information it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionType {
    VisualPerception,
    MentalEvent,
}

/// A logged designator: an open key/value description of an object or
/// event, with an optional pose that callers can push through the
/// transform memory.
#[derive(Debug, Clone)]
pub struct Designator {
    values: Map<String, Value>,
    pub detection_type: DetectionType,
}

#[derive(Debug, Deserialize)]
struct WirePose {
    header: WirePoseHeader,
    pose: WirePoseBody,
}

#[derive(Debug, Deserialize)]
struct WirePoseHeader {
    frame_id: String,
    stamp: Option<WirePoseStamp>,
}

#[derive(Debug, Deserialize)]
struct WirePoseStamp {
    #[serde(rename = "$date")]
    date: String,
}

#[derive(Debug, Deserialize)]
struct WirePoseBody {
    position: WireXyz,
    orientation: WireXyzw,
}

#[derive(Debug, Deserialize)]
struct WireXyz {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Deserialize)]
struct WireXyzw {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
}

impl Designator {
    fn from_document(document: &Document, detection_type: DetectionType) -> Option<Self> {
        let values = document.get("designator")?.as_object()?.clone();
        Some(Self {
            values,
            detection_type,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// The designator's identifier; logged under either casing.
    pub fn id(&self) -> Option<&str> {
        self.get_str("__id").or_else(|| self.get_str("__ID"))
    }

    /// The stamped pose stored under `POSE`, when present and well formed.
    pub fn pose(&self) -> Option<Stamped<RigidTransform>> {
        let raw = self.values.get("POSE")?;
        let wire: WirePose = match serde_json::from_value(raw.clone()) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(error = %err, "designator POSE entry is malformed");
                return None;
            }
        };
        let stamp = wire
            .header
            .stamp
            .as_ref()
            .and_then(|s| crate::decode::parse_stamp(&s.date).ok())
            .unwrap_or_default();
        let p = &wire.pose.position;
        let o = &wire.pose.orientation;
        Some(Stamped::new(
            RigidTransform::new(
                UnitQuaternion::from_quaternion(Quaternion::new(o.w, o.x, o.y, o.z)),
                Vector3::new(p.x, p.y, p.z),
            ),
            wire.header.frame_id,
            stamp,
        ))
    }
}

/// Queries over the designator collection family. Pose results feed
/// straight into [`TfMemory::transform_pose`](crate::TfMemory::transform_pose).
pub struct DesignatorStore {
    store: Arc<dyn DocumentStore>,
}

impl DesignatorStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Reads a designator by ID, trying perception results first, then the
    /// logged designators.
    pub fn designator_by_id(&self, id: &str) -> TfResult<Option<Designator>> {
        let families = [
            (UIMA_COLLECTION, DetectionType::VisualPerception),
            (DESIGNATOR_COLLECTION, DetectionType::MentalEvent),
        ];
        for (collection, detection_type) in families {
            let request = FindRequest::new(collection, id_filter(id)).project(&["designator"]);
            let mut cursor = self.store.find(&request)?;
            if let Some(document) = cursor.next_document()? {
                return Ok(Designator::from_document(&document, detection_type));
            }
        }
        Ok(None)
    }

    /// The newest perception designator recorded around `time`.
    pub fn latest_perception_before(&self, time: TfTime) -> TfResult<Option<Designator>> {
        let request = FindRequest::new(
            UIMA_COLLECTION,
            recorded_window(time, PERCEPTION_WINDOW),
        )
        .project(&["designator"])
        .sort_desc("__recorded");

        let mut cursor = self.store.find(&request)?;
        match cursor.next_document()? {
            Some(document) => Ok(Designator::from_document(
                &document,
                DetectionType::VisualPerception,
            )),
            None => Ok(None),
        }
    }

    /// Every instant at which the given object was perceived, newest first.
    pub fn perception_times(&self, object: &str) -> TfResult<Vec<TfTime>> {
        let request = FindRequest::new(
            UIMA_COLLECTION,
            Filter::eq_str("designator.__id", object),
        )
        .project(&["__recorded"])
        .sort_desc("__recorded");

        let mut cursor = self.store.find(&request)?;
        let mut times = Vec::new();
        while let Some(document) = cursor.next_document()? {
            if let Some(at) = parse_recorded(document.get("__recorded")) {
                times.push(TfTime::from_datetime(at));
            }
        }
        Ok(times)
    }

    /// IDs of every object perceived around `time`, newest first.
    pub fn perception_objects(&self, time: TfTime) -> TfResult<Vec<String>> {
        let request = FindRequest::new(
            UIMA_COLLECTION,
            recorded_window(time, OBJECT_WINDOW),
        )
        .project(&["designator"])
        .sort_desc("__recorded");

        let mut cursor = self.store.find(&request)?;
        let mut objects = Vec::new();
        while let Some(document) = cursor.next_document()? {
            let designator = Designator::from_document(&document, DetectionType::VisualPerception);
            if let Some(id) = designator.as_ref().and_then(|d| d.id()) {
                objects.push(id.to_string());
            }
        }
        Ok(objects)
    }

    /// The most recently logged pose of an object.
    pub fn designator_location(&self, id: &str) -> TfResult<Option<Stamped<RigidTransform>>> {
        let request = FindRequest::new(
            DESIGNATOR_COLLECTION,
            Filter::eq_str("designator.__ID", id),
        )
        .project(&["__recorded", "designator"])
        .sort_desc("__recorded");

        let mut cursor = self.store.find(&request)?;
        match cursor.next_document()? {
            Some(document) => {
                Ok(Designator::from_document(&document, DetectionType::MentalEvent)
                    .and_then(|d| d.pose()))
            }
            None => Ok(None),
        }
    }
}

fn id_filter(id: &str) -> Filter {
    Filter::Or(vec![
        Filter::eq_str("designator.__id", id),
        Filter::eq_str("designator.__ID", id),
    ])
}

fn recorded_window(time: TfTime, half_width: i64) -> Filter {
    Filter::Recorded {
        start: (time - half_width).to_datetime(),
        end: (time + half_width).to_datetime(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn recorded(secs: i64) -> Value {
        json!({ "$date": Utc.timestamp_opt(secs, 0).unwrap().to_rfc3339() })
    }

    fn perception(recorded_secs: i64, id: &str) -> Value {
        json!({
            "__recorded": recorded(recorded_secs),
            "designator": { "__id": id, "TYPE": "object" }
        })
    }

    fn logged_with_pose(recorded_secs: i64, id: &str, x: f64) -> Value {
        json!({
            "__recorded": recorded(recorded_secs),
            "designator": {
                "__ID": id,
                "POSE": {
                    "header": {
                        "frame_id": "/map",
                        "stamp": { "$date": Utc.timestamp_opt(recorded_secs, 0).unwrap().to_rfc3339() }
                    },
                    "pose": {
                        "position": { "x": x, "y": 0.5, "z": 0.0 },
                        "orientation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 }
                    }
                }
            }
        })
    }

    fn designators() -> (Arc<MemoryStore>, DesignatorStore) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), DesignatorStore::new(store))
    }

    #[test]
    fn test_designator_by_id_prefers_perception() {
        let (store, designators) = designators();
        store.insert(UIMA_COLLECTION, perception(100, "cup-1"));
        store.insert(DESIGNATOR_COLLECTION, logged_with_pose(100, "cup-1", 1.0));

        let found = designators.designator_by_id("cup-1").unwrap().unwrap();
        assert_eq!(found.detection_type, DetectionType::VisualPerception);
        assert_eq!(found.id(), Some("cup-1"));
    }

    #[test]
    fn test_designator_by_id_falls_back_to_logged() {
        let (store, designators) = designators();
        store.insert(DESIGNATOR_COLLECTION, logged_with_pose(100, "cup-2", 1.0));

        let found = designators.designator_by_id("cup-2").unwrap().unwrap();
        assert_eq!(found.detection_type, DetectionType::MentalEvent);
        assert!(designators.designator_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn test_latest_perception_before() {
        let (store, designators) = designators();
        store.insert(UIMA_COLLECTION, perception(100, "old"));
        store.insert(UIMA_COLLECTION, perception(120, "new"));
        store.insert(UIMA_COLLECTION, perception(500, "far-future"));

        let found = designators
            .latest_perception_before(TfTime::from_secs(130))
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), Some("new"));
    }

    #[test]
    fn test_perception_times_newest_first() {
        let (store, designators) = designators();
        store.insert(UIMA_COLLECTION, perception(100, "cup-1"));
        store.insert(UIMA_COLLECTION, perception(200, "cup-1"));
        store.insert(UIMA_COLLECTION, perception(150, "other"));

        let times = designators.perception_times("cup-1").unwrap();
        assert_eq!(
            times,
            vec![TfTime::from_secs(200), TfTime::from_secs(100)]
        );
    }

    #[test]
    fn test_perception_objects_in_window() {
        let (store, designators) = designators();
        store.insert(UIMA_COLLECTION, perception(100, "inside"));
        store.insert(UIMA_COLLECTION, perception(200, "outside"));

        let objects = designators
            .perception_objects(TfTime::from_secs(110))
            .unwrap();
        assert_eq!(objects, vec!["inside".to_string()]);
    }

    #[test]
    fn test_designator_location_latest_pose() {
        let (store, designators) = designators();
        store.insert(DESIGNATOR_COLLECTION, logged_with_pose(100, "cup-1", 1.0));
        store.insert(DESIGNATOR_COLLECTION, logged_with_pose(200, "cup-1", 2.0));

        let pose = designators
            .designator_location("cup-1")
            .unwrap()
            .unwrap();
        assert_eq!(pose.frame_id, "/map");
        assert_relative_eq!(pose.data.translation.x, 2.0, epsilon = 1e-9);
        assert_eq!(pose.stamp, TfTime::from_secs(200));
    }
}
