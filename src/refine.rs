// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Levenberg-Marquardt refinement of a marker pose.
//!
//! Minimizes the squared pixel distance between the observed corners and the
//! projection of the model points. The rotation is updated on the left,
//! $\bm{R} \leftarrow \exp([\bm{\delta\omega}]_\times) \bm{R}$,
//! and the translation additively, $\bm{t} \leftarrow \bm{t} + \bm{\delta t}$.

use log::{debug, trace};
use nalgebra::{Matrix2x3, Matrix3, Rotation3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::CameraIntrinsics;
use crate::error::PoseError;

type Mat3 = Matrix3<f64>;
type Vec3 = Vector3<f64>;
type Residuals = SVector<f64, 8>;
type Jacobian = SMatrix<f64, 8, 6>;

/// Below this cost (squared pixels summed over the four corners)
/// the corners are considered matched exactly.
const NEGLIGIBLE_COST: f64 = 1e-18;

/// Largest damping before a step is considered unreachable.
const MAX_LAMBDA: f64 = 1e16;

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Maximum number of LM iterations, accepted and rejected steps included.
    pub max_iterations: usize,
    /// Convergence threshold on the relative decrease of the cost.
    pub cost_tolerance: f64,
    /// Convergence threshold on the step norm, relative to the translation norm.
    pub step_tolerance: f64,
    /// Initial damping factor (lambda).
    pub initial_lambda: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-12,
            step_tolerance: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

impl RefineParams {
    /// Create default refinement parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iters: usize) -> Self {
        self.max_iterations = max_iters;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set step tolerance.
    pub fn with_step_tolerance(mut self, tol: f64) -> Self {
        self.step_tolerance = tol;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }
}

/// Result of a converged refinement.
#[derive(Debug, Copy, Clone)]
pub struct Refined {
    /// Refined rotation matrix.
    pub rotation: Mat3,
    /// Refined translation.
    pub translation: Vec3,
    /// Final cost, in squared pixels summed over the corners.
    pub cost: f64,
    /// Number of iterations performed.
    pub iterations: usize,
}

/// Refine `(rotation, translation)` so that the `model` points project onto `observed` pixels.
///
/// Fails with [`PoseError::NumericalDivergence`] if the iteration budget runs
/// out or the state stops being finite.
pub fn refine_pose(
    rotation: &Mat3,
    translation: &Vec3,
    model: &[Vec3; 4],
    observed: &[[f64; 2]; 4],
    intrinsics: &CameraIntrinsics,
    params: &RefineParams,
) -> Result<Refined, PoseError> {
    let mut rot = *rotation;
    let mut trans = *translation;
    let (mut res, mut jac) = linearize(&rot, &trans, model, observed, intrinsics).ok_or_else(
        || PoseError::DegenerateInput("marker corner behind the camera".to_string()),
    )?;
    let mut cost = res.norm_squared();
    let mut lambda = params.initial_lambda;

    for iter in 0..params.max_iterations {
        if cost < NEGLIGIBLE_COST {
            return converged(rot, trans, cost, iter);
        }

        let jtj = jac.transpose() * jac;
        let gradient = jac.transpose() * res;
        let damped = jtj + SMatrix::<f64, 6, 6>::from_diagonal(&jtj.diagonal()) * lambda;

        let step = match damped.cholesky() {
            Some(chol) => -chol.solve(&gradient),
            None => {
                lambda *= 10.0;
                trace!("iter {}: damped system not positive definite", iter);
                continue;
            }
        };
        if step.iter().any(|x| !x.is_finite()) {
            return Err(PoseError::NumericalDivergence { iterations: iter + 1 });
        }
        if step.norm() <= params.step_tolerance * (1.0 + trans.norm()) {
            return converged(rot, trans, cost, iter);
        }

        let delta_w = Vec3::new(step[0], step[1], step[2]);
        let delta_t = Vec3::new(step[3], step[4], step[5]);
        let rot_new = Rotation3::new(delta_w).into_inner() * rot;
        let trans_new = trans + delta_t;

        let (res_new, jac_new) = match linearize(&rot_new, &trans_new, model, observed, intrinsics)
        {
            Some(linearized) => linearized,
            None => {
                trace!("iter {}: step moves a corner behind the camera", iter);
                lambda *= 10.0;
                continue;
            }
        };
        let cost_new = res_new.norm_squared();
        if !cost_new.is_finite() {
            return Err(PoseError::NumericalDivergence { iterations: iter + 1 });
        }

        if cost_new < cost {
            let decrease = (cost - cost_new) / cost;
            trace!(
                "iter {}: accepted, cost {:e} -> {:e}, lambda {:e}",
                iter,
                cost,
                cost_new,
                lambda
            );
            rot = rot_new;
            trans = trans_new;
            res = res_new;
            jac = jac_new;
            cost = cost_new;
            lambda = (lambda / 10.0).max(1e-12);
            if decrease < params.cost_tolerance {
                return converged(rot, trans, cost, iter + 1);
            }
        } else {
            trace!("iter {}: rejected, cost {:e}, lambda {:e}", iter, cost_new, lambda);
            // A step that leaves the cost unchanged, or no descent at any damping:
            // the current state is a minimum.
            if cost_new - cost <= params.cost_tolerance * cost || lambda > MAX_LAMBDA {
                return converged(rot, trans, cost, iter + 1);
            }
            lambda *= 10.0;
        }
    }

    debug!(
        "pose refinement stopped after {} iterations, cost {:e}",
        params.max_iterations, cost
    );
    Err(PoseError::NumericalDivergence {
        iterations: params.max_iterations,
    })
}

fn converged(rot: Mat3, trans: Vec3, cost: f64, iterations: usize) -> Result<Refined, PoseError> {
    debug!(
        "pose refinement converged after {} iterations, cost {:e}",
        iterations, cost
    );
    Ok(Refined {
        rotation: rot,
        translation: trans,
        cost,
        iterations,
    })
}

/// Residuals (projected minus observed, in pixels) and their Jacobian with respect to
/// $(\bm{\delta\omega}, \bm{\delta t})$.
/// `None` if a model point is not in front of the camera.
fn linearize(
    rot: &Mat3,
    trans: &Vec3,
    model: &[Vec3; 4],
    observed: &[[f64; 2]; 4],
    k: &CameraIntrinsics,
) -> Option<(Residuals, Jacobian)> {
    let mut res = Residuals::zeros();
    let mut jac = Jacobian::zeros();
    for (i, (x_model, obs)) in model.iter().zip(observed.iter()).enumerate() {
        let rotated = rot * x_model;
        let p = rotated + trans;
        if p.z <= 0.0 {
            return None;
        }
        let inv_z = 1.0 / p.z;
        res[2 * i] = k.fx * p.x * inv_z + k.cx - obs[0];
        res[2 * i + 1] = k.fy * p.y * inv_z + k.cy - obs[1];

        #[rustfmt::skip]
        let d_proj = Matrix2x3::new(
            k.fx * inv_z, 0.0,          -k.fx * p.x * inv_z * inv_z,
            0.0,          k.fy * inv_z, -k.fy * p.y * inv_z * inv_z,
        );
        // d(exp(w) R x + t) / dw = -[R x]_x
        let d_rot = d_proj * (-rotated.cross_matrix());
        jac.fixed_view_mut::<2, 3>(2 * i, 0).copy_from(&d_rot);
        jac.fixed_view_mut::<2, 3>(2 * i, 3).copy_from(&d_proj);
    }
    Some((res, jac))
}
