#![warn(missing_docs)]

//! This package provides functions to estimate the pose of a square marker
//! given the pixel coordinates of its four corners and a pinhole camera model.
//!
//! This problem is a planar instance of ["Perspective-n-Point" (PnP)][pnp]
//! with n = 4, which has a single solution for non-degenerate corners.
//! The pose is recovered in two stages:
//!
//!  - two closed-form candidates from the homography between the marker
//!    plane and the normalized image plane (see [`homography`]),
//!  - a few Levenberg-Marquardt iterations from each candidate, minimizing
//!    the pixel reprojection error (see [`refine`]).
//!
//! Corners must be listed in a fixed order, described in [`marker`].
//! The returned [`Pose`] maps marker coordinates to camera coordinates,
//! with its rotation given as a unit quaternion.
//!
//! ```
//! use square_pnp::{CameraIntrinsics, MarkerCorners, PoseSolver, SolverParams, SquareMarker};
//!
//! let solver = PoseSolver::new(SolverParams::default());
//! let corners = MarkerCorners::from([[250.0, 230.0], [410.0, 236.0], [404.0, 395.0], [244.0, 390.0]]);
//! let pose = solver
//!     .solve(&corners, &SquareMarker::new(0.05), &CameraIntrinsics::new(800.0, 800.0, 320.0, 320.0))
//!     .unwrap();
//! assert!((pose.quaternion_norm() - 1.0).abs() < 1e-9);
//! ```
//!
//! [pnp]: https://en.wikipedia.org/wiki/Perspective-n-Point

pub mod camera;
pub mod error;
pub mod homography;
pub mod marker;
pub mod pose;
pub mod refine;
pub mod solver;

pub use camera::CameraIntrinsics;
pub use error::PoseError;
pub use marker::{MarkerCorners, SquareMarker};
pub use pose::{error, Pose};
pub use refine::RefineParams;
pub use solver::{solve, PoseEstimate, PoseSolver, SolverParams};
