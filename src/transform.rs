use crate::registry::FrameHandle;
use crate::time::TfTime;
use nalgebra::{Matrix4, Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid motion: rotation followed by translation.
///
/// Applying the transform maps coordinates expressed in the child frame into
/// the parent frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    pub fn from_rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self {
            rotation,
            translation: Vector3::zeros(),
        }
    }

    /// `self ∘ other`: the transform that applies `other` first, then `self`.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// The inverse rigid motion `(−q⁻¹·t, q⁻¹)`.
    pub fn inverse(&self) -> RigidTransform {
        let rotation = self.rotation.inverse();
        RigidTransform {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    pub fn apply_point(&self, point: Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    /// Re-expresses a pose given in this transform's child frame.
    pub fn apply_pose(&self, pose: &RigidTransform) -> RigidTransform {
        self.compose(pose)
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut matrix = self.rotation.to_homogeneous();
        matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        matrix
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// One buffered sample on a parent→child edge. Immutable once ingested; the
/// frame handles point into the registry arena, which outlives every sample.
#[derive(Debug, Clone, Copy)]
pub struct TransformStorage {
    pub translation: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub stamp: TfTime,
    pub parent: FrameHandle,
    pub child: FrameHandle,
}

impl TransformStorage {
    pub fn transform(&self) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation,
            translation: self.translation,
        }
    }
}

/// A fully resolved transform between two named frames, as returned by
/// lookups: maps source-frame (`child_frame_id`) coordinates into the target
/// frame (`frame_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedTransform {
    pub transform: RigidTransform,
    pub stamp: TfTime,
    pub frame_id: String,
    pub child_frame_id: String,
}

impl StampedTransform {
    pub fn identity(
        frame_id: impl Into<String>,
        child_frame_id: impl Into<String>,
        stamp: TfTime,
    ) -> Self {
        Self {
            transform: RigidTransform::identity(),
            stamp,
            frame_id: frame_id.into(),
            child_frame_id: child_frame_id.into(),
        }
    }

    pub fn transform_point(&self, point: Point3<f64>) -> Point3<f64> {
        self.transform.apply_point(point)
    }

    pub fn transform_pose(&self, pose: &RigidTransform) -> RigidTransform {
        self.transform.apply_pose(pose)
    }
}

/// A geometric operand tagged with the frame it is expressed in and the
/// instant it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub data: T,
    pub frame_id: String,
    pub stamp: TfTime,
}

impl<T> Stamped<T> {
    pub fn new(data: T, frame_id: impl Into<String>, stamp: TfTime) -> Self {
        Self {
            data,
            frame_id: frame_id.into(),
            stamp,
        }
    }
}
