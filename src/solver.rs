// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pose of a square marker from its four image corners.

use log::debug;
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::CameraIntrinsics;
use crate::error::PoseError;
use crate::homography;
use crate::marker::{MarkerCorners, SquareMarker};
use crate::pose::{error, Pose};
use crate::refine::{refine_pose, RefineParams};

type Mat3 = Matrix3<f64>;
type Vec2 = Vector2<f64>;
type Vec3 = Vector3<f64>;
type Candidate = (Mat3, Vec3);

/// Settings of a [`PoseSolver`].
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Reprojection refinement applied after the closed-form estimate.
    /// `None` returns the closed-form estimate directly.
    pub refine: Option<RefineParams>,
    /// Relative tolerance under which corners count as coincident or collinear.
    pub degeneracy_tolerance: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            refine: Some(RefineParams::default()),
            degeneracy_tolerance: 1e-6,
        }
    }
}

impl SolverParams {
    /// Create default solver parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the refinement parameters.
    pub fn with_refine(mut self, refine: RefineParams) -> Self {
        self.refine = Some(refine);
        self
    }

    /// Disable refinement.
    pub fn without_refine(mut self) -> Self {
        self.refine = None;
        self
    }

    /// Set the degeneracy tolerance.
    pub fn with_degeneracy_tolerance(mut self, tol: f64) -> Self {
        self.degeneracy_tolerance = tol;
        self
    }
}

/// A pose with diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    /// Estimated marker pose.
    pub pose: Pose,
    /// Root mean square reprojection error of the four corners, in pixels.
    pub reprojection_rmse: f64,
    /// Largest angular residual `1 - cos(angle)` between a corner bearing and
    /// its model point, see [`error`]. Independent of the image resolution.
    pub angular_residual: f64,
    /// Refinement iterations, `None` if refinement is disabled.
    pub iterations: Option<usize>,
}

/// Planar pose solver for square markers.
///
/// The solver only holds its settings; every call is independent, and a
/// solver can be shared between threads.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct PoseSolver {
    params: SolverParams,
}

impl PoseSolver {
    /// Solver with the given settings.
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    /// Settings of this solver.
    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Estimate the pose of `marker` whose corners were observed at `corners`.
    ///
    /// The corners must be given in [`MarkerCorners`] order; the solver cannot
    /// tell a permuted set of corners from a differently oriented marker.
    pub fn solve(
        &self,
        corners: &MarkerCorners,
        marker: &SquareMarker,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Pose, PoseError> {
        self.estimate(corners, marker, intrinsics)
            .map(|estimate| estimate.pose)
    }

    /// Same as [`PoseSolver::solve`], also reporting the reprojection error
    /// and the refinement effort.
    ///
    /// Both closed-form candidates are refined and the one with the lowest
    /// final cost is kept, so a noisy view of a distant marker does not get
    /// stuck on the wrong side of the planar pose ambiguity.
    pub fn estimate(
        &self,
        corners: &MarkerCorners,
        marker: &SquareMarker,
        intrinsics: &CameraIntrinsics,
    ) -> Result<PoseEstimate, PoseError> {
        let (best, other) = self.closed_form(corners, marker, intrinsics)?;

        let (pose, iterations) = match &self.params.refine {
            Some(refine_params) => {
                let model = marker.model_points();
                let observed = corners.to_array();
                let refine = |(rot, trans): &Candidate| {
                    refine_pose(rot, trans, &model, &observed, intrinsics, refine_params)
                };
                let mut refined = refine(&best);
                if let Some(other) = &other {
                    refined = match (refined, refine(other)) {
                        (Ok(a), Ok(b)) => Ok(if b.cost < a.cost { b } else { a }),
                        (Ok(a), Err(_)) | (Err(_), Ok(a)) => Ok(a),
                        (Err(e), Err(_)) => Err(e),
                    };
                }
                let refined = refined?;
                let pose = Pose::from_parts(&refined.rotation, &refined.translation);
                (pose, Some(refined.iterations))
            }
            None => (Pose::from_parts(&best.0, &best.1), None),
        };

        let angular_residual = marker
            .model_points()
            .iter()
            .zip(corners.to_array().iter())
            .map(|(x, pixel)| {
                let point: [f64; 3] = (*x).into();
                let bearing: [f64; 3] = intrinsics.bearing(pixel).into();
                error(&point, &bearing, &pose)
            })
            .fold(0.0, f64::max);

        Ok(PoseEstimate {
            pose,
            reprojection_rmse: pose.reprojection_rmse(corners, marker, intrinsics),
            angular_residual,
            iterations,
        })
    }

    /// Closed-form pose from the corner homography, without refinement.
    /// This is the fallback when refinement reports
    /// [`PoseError::NumericalDivergence`].
    pub fn solve_closed_form(
        &self,
        corners: &MarkerCorners,
        marker: &SquareMarker,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Pose, PoseError> {
        let ((rot, trans), _) = self.closed_form(corners, marker, intrinsics)?;
        Ok(Pose::from_parts(&rot, &trans))
    }

    /// Closed-form candidates with every corner in front of the camera,
    /// the one reprojecting best first.
    fn closed_form(
        &self,
        corners: &MarkerCorners,
        marker: &SquareMarker,
        intrinsics: &CameraIntrinsics,
    ) -> Result<(Candidate, Option<Candidate>), PoseError> {
        marker.validate()?;
        intrinsics.validate()?;

        let pixels = corners.to_array();
        let mut normalized = [Vec2::zeros(); 4];
        for (n, p) in normalized.iter_mut().zip(pixels.iter()) {
            *n = intrinsics.back_project(p);
        }
        homography::check_corners(&normalized, self.params.degeneracy_tolerance)?;

        let h_mat = homography::square_to_quad(&normalized)?;
        let [first, second] = homography::planar_poses(&h_mat, &normalized, marker.half_size)?;

        let model = marker.model_points();
        let in_front = |(rot, trans): &Candidate| model.iter().all(|x| (rot * x + trans).z > 0.0);
        match (in_front(&first), in_front(&second)) {
            (true, true) => Ok((first, Some(second))),
            (true, false) => Ok((first, None)),
            (false, true) => Ok((second, None)),
            (false, false) => {
                debug!("both pose candidates place the marker behind the camera");
                Err(PoseError::DegenerateInput(
                    "marker reconstructed behind the camera".to_string(),
                ))
            }
        }
    }
}

/// Estimate a marker pose with the default [`SolverParams`].
///
/// ```
/// use square_pnp::{solve, CameraIntrinsics, MarkerCorners, SquareMarker};
///
/// // 10 cm marker seen squarely from 50 cm.
/// let corners = MarkerCorners::new([240.0, 240.0], [400.0, 240.0], [400.0, 400.0], [240.0, 400.0]);
/// let marker = SquareMarker::new(0.05);
/// let intrinsics = CameraIntrinsics::new(800.0, 800.0, 320.0, 320.0);
///
/// let pose = solve(&corners, &marker, &intrinsics).unwrap();
/// assert!((pose.rotation[0] - 1.0).abs() < 1e-9);
/// assert!((pose.translation[2] - 0.5).abs() < 1e-9);
/// ```
pub fn solve(
    corners: &MarkerCorners,
    marker: &SquareMarker,
    intrinsics: &CameraIntrinsics,
) -> Result<Pose, PoseError> {
    PoseSolver::default().solve(corners, marker, intrinsics)
}
