// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pinhole camera model.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::PoseError;

type Mat3 = Matrix3<f64>;
type Vec2 = Vector2<f64>;
type Vec3 = Vector3<f64>;

/// Intrinsic parameters of a distortion-free pinhole camera.
///
/// A point $(X, Y, Z)$ in camera coordinates (x right, y down, z forward)
/// projects to the pixel
/// $$
/// u = f_x \frac{X}{Z} + c_x, \quad v = f_y \frac{Y}{Z} + c_y
/// $$
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length along x, in pixels.
    pub fx: f64,
    /// Focal length along y, in pixels.
    pub fy: f64,
    /// Principal point x coordinate, in pixels.
    pub cx: f64,
    /// Principal point y coordinate, in pixels.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Read intrinsics from a calibration matrix
    /// $\bm{K} = \begin{pmatrix} f_x & s & c_x \\\\ 0 & f_y & c_y \\\\ 0 & 0 & 1 \end{pmatrix}$.
    ///
    /// Skew is ignored.
    pub fn from_matrix(k: &Mat3) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    /// Calibration matrix $\bm{K}$ with zero skew.
    #[rustfmt::skip]
    pub fn matrix(&self) -> Mat3 {
        Mat3::new(
            self.fx, 0.0,     self.cx,
            0.0,     self.fy, self.cy,
            0.0,     0.0,     1.0,
        )
    }

    /// Intrinsics for the same camera at a resolution scaled by `(sx, sy)`,
    /// for instance when corners are detected on a resized frame.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }

    /// Check that the parameters describe a usable projection.
    pub fn validate(&self) -> Result<(), PoseError> {
        if !(self.fx.is_finite() && self.fx > 0.0) {
            return Err(PoseError::InvalidConfiguration(format!(
                "focal length fx must be positive, got {}",
                self.fx
            )));
        }
        if !(self.fy.is_finite() && self.fy > 0.0) {
            return Err(PoseError::InvalidConfiguration(format!(
                "focal length fy must be positive, got {}",
                self.fy
            )));
        }
        if !(self.cx.is_finite() && self.cy.is_finite()) {
            return Err(PoseError::InvalidConfiguration(format!(
                "principal point must be finite, got ({}, {})",
                self.cx, self.cy
            )));
        }
        Ok(())
    }

    /// Normalized image coordinates of a pixel:
    /// $x' = (u - c_x) / f_x$, $y' = (v - c_y) / f_y$.
    pub fn back_project(&self, pixel: &[f64; 2]) -> Vec2 {
        Vec2::new(
            (pixel[0] - self.cx) / self.fx,
            (pixel[1] - self.cy) / self.fy,
        )
    }

    /// Bearing vector $(x', y', 1)$ of a pixel.
    pub fn bearing(&self, pixel: &[f64; 2]) -> Vec3 {
        self.back_project(pixel).push(1.0)
    }

    /// Pixel coordinates of a point given in camera coordinates.
    /// Returns `None` for points on or behind the camera plane.
    pub fn project(&self, point: &Vec3) -> Option<[f64; 2]> {
        if point.z <= 0.0 {
            return None;
        }
        Some([
            self.fx * point.x / point.z + self.cx,
            self.fy * point.y / point.z + self.cy,
        ])
    }
}
