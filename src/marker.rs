// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Square marker geometry and corner ordering.
//!
//! The marker frame uses the camera axis convention: x to the right,
//! y down, z pointing away from the viewer. A marker facing the camera
//! squarely therefore has the identity rotation, and its corners read
//! clockwise in the image starting from the top-left one:
//!
//! ```text
//!   0 (-h,-h) -------- 1 (h,-h)
//!   |                  |
//!   |                  |
//!   3 (-h, h) -------- 2 (h, h)
//! ```

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::PoseError;

/// Physical size of a square marker lying on the plane $Z = 0$ of its own frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquareMarker {
    /// Half of the side length, in the unit the translation is wanted in
    /// (for instance meters).
    pub half_size: f64,
}

impl SquareMarker {
    /// Marker with the given half side length.
    pub fn new(half_size: f64) -> Self {
        Self { half_size }
    }

    /// Marker with the given full side length.
    pub fn with_side(side: f64) -> Self {
        Self::new(0.5 * side)
    }

    /// Check that the marker has a positive, finite size.
    pub fn validate(&self) -> Result<(), PoseError> {
        if self.half_size.is_finite() && self.half_size > 0.0 {
            Ok(())
        } else {
            Err(PoseError::InvalidConfiguration(format!(
                "marker half size must be positive, got {}",
                self.half_size
            )))
        }
    }

    /// The four corners in marker coordinates, in [`MarkerCorners`] order.
    pub fn model_points(&self) -> [Vector3<f64>; 4] {
        let h = self.half_size;
        [
            Vector3::new(-h, -h, 0.0),
            Vector3::new(h, -h, 0.0),
            Vector3::new(h, h, 0.0),
            Vector3::new(-h, h, 0.0),
        ]
    }
}

/// Pixel positions of the four marker corners, named after the corner of the
/// marker they belong to (not after where they happen to appear in the image).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerCorners {
    /// Corner matching model point `(-h, -h, 0)`.
    pub top_left: [f64; 2],
    /// Corner matching model point `(h, -h, 0)`.
    pub top_right: [f64; 2],
    /// Corner matching model point `(h, h, 0)`.
    pub bottom_right: [f64; 2],
    /// Corner matching model point `(-h, h, 0)`.
    pub bottom_left: [f64; 2],
}

impl MarkerCorners {
    /// Corners given by name.
    pub fn new(
        top_left: [f64; 2],
        top_right: [f64; 2],
        bottom_right: [f64; 2],
        bottom_left: [f64; 2],
    ) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// Corners in [`SquareMarker::model_points`] order.
    pub fn to_array(&self) -> [[f64; 2]; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }
}

impl From<[[f64; 2]; 4]> for MarkerCorners {
    /// Interpret the array as top-left, top-right, bottom-right, bottom-left.
    fn from(c: [[f64; 2]; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

impl From<MarkerCorners> for [[f64; 2]; 4] {
    fn from(c: MarkerCorners) -> Self {
        c.to_array()
    }
}
