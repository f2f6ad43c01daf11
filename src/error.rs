// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors returned by the pose solver.

use thiserror::Error;

/// Reasons a pose could not be recovered.
///
/// A caller driving a video stream should treat any of these as
/// "pose unavailable this frame".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseError {
    /// Static parameters are unusable: non-positive marker size or focal length,
    /// or non-finite intrinsics. Retrying with the same parameters fails again.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The four corners of this frame do not define a pose: repeated or collinear
    /// points, a singular homography, or a marker reconstructed behind the camera.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Reprojection refinement did not converge within its iteration budget.
    /// The closed-form estimate is still available through
    /// [`PoseSolver::solve_closed_form`](crate::PoseSolver::solve_closed_form).
    #[error("pose refinement did not converge after {iterations} iterations")]
    NumericalDivergence {
        /// Number of iterations performed before giving up.
        iterations: usize,
    },
}
