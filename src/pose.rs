// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Marker pose returned by the solver.

use nalgebra::{Isometry3, Matrix3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::CameraIntrinsics;
use crate::marker::{MarkerCorners, SquareMarker};

type Iso3 = Isometry3<f64>;
type Mat3 = Matrix3<f64>;
type Vec3 = Vector3<f64>;

/// Rigid transform from the marker frame to the camera frame:
/// $$
/// \bm{x_{cam}} = \bm{R \ x_{marker}} + \bm{t}
/// $$
///
/// The camera pose in the marker frame is given by [`Pose::inverse`]:
/// $$
/// \begin{cases}
///     \bm{R_{cam}} = \bm{R^T} \\\\
///     \bm{t_{cam}} = \bm{-R_{cam} \ t}
/// \end{cases}
/// $$
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rotation given as a unit quaternion of the form `[w, x, y, z]`
    /// where the real coefficient is the first one, and `w >= 0`.
    pub rotation: [f64; 4],

    /// Translation, in the unit of the marker size.
    pub translation: [f64; 3],
}

impl Pose {
    /// Build a pose from a rotation matrix and a translation.
    pub fn from_parts(rotation: &Mat3, translation: &Vec3) -> Self {
        let q = quaternion_from_rotation(rotation);
        Self {
            rotation: [q.w, q.i, q.j, q.k],
            translation: (*translation).into(),
        }
    }

    /// Convert from nalgebra Isometry3 type.
    pub fn from_iso3(iso3: &Iso3) -> Self {
        let q = iso3.rotation.into_inner();
        let q = if q.w < 0.0 { -q } else { q };
        Self {
            rotation: [q.w, q.i, q.j, q.k],
            translation: iso3.translation.vector.into(),
        }
    }

    /// Convert to nalgebra Isometry3 type.
    pub fn to_iso3(&self) -> Iso3 {
        let [w, x, y, z] = self.rotation;
        let rot = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
        let trans = Translation3::from(Vec3::from(self.translation));
        Iso3::from_parts(trans, rot)
    }

    /// Rotation part as an orthonormal 3x3 matrix.
    pub fn rotation_matrix(&self) -> Mat3 {
        self.to_iso3().rotation.to_rotation_matrix().into_inner()
    }

    /// Euclidean norm of the rotation quaternion.
    pub fn quaternion_norm(&self) -> f64 {
        self.rotation.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    /// Map a point from marker coordinates to camera coordinates.
    pub fn transform_point(&self, point: &[f64; 3]) -> [f64; 3] {
        let iso = self.to_iso3();
        (iso.rotation * Vec3::from(*point) + iso.translation.vector).into()
    }

    /// Pose of the camera expressed in the marker frame.
    pub fn inverse(&self) -> Self {
        Self::from_iso3(&self.to_iso3().inverse())
    }

    /// Homogeneous 4x4 model matrix in column-major order,
    /// ready to place content on the marker in a rendering scene.
    pub fn model_matrix(&self) -> [[f64; 4]; 4] {
        self.to_iso3().to_homogeneous().into()
    }

    /// Angle in radians of the rotation taking this pose's orientation onto `other`'s.
    pub fn angle_to(&self, other: &Pose) -> f64 {
        self.to_iso3().rotation.angle_to(&other.to_iso3().rotation)
    }

    /// Root mean square distance in pixels between the observed corners and
    /// the projection of the marker model points.
    /// Infinite if a corner lands behind the camera.
    pub fn reprojection_rmse(
        &self,
        corners: &MarkerCorners,
        marker: &SquareMarker,
        intrinsics: &CameraIntrinsics,
    ) -> f64 {
        let iso = self.to_iso3();
        let mut sum_sq = 0.0;
        for (model, observed) in marker.model_points().iter().zip(corners.to_array().iter()) {
            let cam = iso.rotation * *model + iso.translation.vector;
            match intrinsics.project(&cam) {
                Some(p) => {
                    let du = p[0] - observed[0];
                    let dv = p[1] - observed[1];
                    sum_sq += du * du + dv * dv;
                }
                None => return f64::INFINITY,
            }
        }
        (sum_sq / 4.0).sqrt()
    }
}

/// Compute the angular residual between the bearing vector and the 3D point projection vector.
/// Return `1 - cos(angle)`.
pub fn error(point_3d: &[f64; 3], bearing_vector: &[f64; 3], pose: &Pose) -> f64 {
    let new_bearing = Vec3::from(pose.transform_point(point_3d)).normalize();
    let bearing_vector = Vec3::from(*bearing_vector).normalize();
    1.0 - bearing_vector.dot(&new_bearing)
}

/// Unit quaternion of a rotation matrix, with a non-negative real part.
///
/// The square root is taken on the largest of the trace and the three
/// diagonal elements, which keeps it away from zero.
#[allow(clippy::many_single_char_names)]
pub fn quaternion_from_rotation(m: &Mat3) -> UnitQuaternion<f64> {
    let (m00, m01, m02) = (m[(0, 0)], m[(0, 1)], m[(0, 2)]);
    let (m10, m11, m12) = (m[(1, 0)], m[(1, 1)], m[(1, 2)]);
    let (m20, m21, m22) = (m[(2, 0)], m[(2, 1)], m[(2, 2)]);
    let trace = m00 + m11 + m22;

    let (w, x, y, z) = if trace > m00 && trace > m11 && trace > m22 {
        let s = 2.0 * (1.0 + trace).sqrt();
        (0.25 * s, (m21 - m12) / s, (m02 - m20) / s, (m10 - m01) / s)
    } else if m00 > m11 && m00 > m22 {
        let s = 2.0 * (1.0 + m00 - m11 - m22).sqrt();
        ((m21 - m12) / s, 0.25 * s, (m01 + m10) / s, (m02 + m20) / s)
    } else if m11 > m22 {
        let s = 2.0 * (1.0 + m11 - m00 - m22).sqrt();
        ((m02 - m20) / s, (m01 + m10) / s, 0.25 * s, (m12 + m21) / s)
    } else {
        let s = 2.0 * (1.0 + m22 - m00 - m11).sqrt();
        ((m10 - m01) / s, (m02 + m20) / s, (m12 + m21) / s, 0.25 * s)
    };

    let q = Quaternion::new(w, x, y, z);
    let q = if w < 0.0 { -q } else { q };
    UnitQuaternion::from_quaternion(q)
}

// Tests #######################################################################
