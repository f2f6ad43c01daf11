// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Closed-form pose of a square from its four normalized image corners.
//!
//! The unit square $(u, v) \in \\{-1, 1\\}^2$ is mapped onto the normalized
//! image plane by a homography $\bm{H}$, which four correspondences
//! determine exactly. With noisy corners, a planar target seen from afar has
//! two nearly equivalent poses tilted in opposite directions, so
//! [`planar_poses`] returns both.

use nalgebra::{Matrix2, Matrix2x3, Matrix3, Rotation3, SMatrix, SVector, Vector2, Vector3};

use crate::error::PoseError;

type Mat3 = Matrix3<f64>;
type Vec2 = Vector2<f64>;
type Vec3 = Vector3<f64>;

/// Unit square corners in marker corner order.
const UNIT_SQUARE: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// The four corner triangles, each one leaving out the corner of the same index.
const TRIANGLES: [[usize; 3]; 4] = [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];

/// Reject corner sets that cannot define a homography.
///
/// `tolerance` is relative to the largest distance between two corners:
/// points closer than `tolerance * scale` are considered coincident, and
/// three corners spanning a triangle with area below `tolerance * scale^2`
/// are considered collinear.
/// Corners that are out of order, crossing each other, are rejected too.
pub fn check_corners(points: &[Vec2; 4], tolerance: f64) -> Result<(), PoseError> {
    if points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
        return Err(PoseError::DegenerateInput(
            "corner coordinates must be finite".to_string(),
        ));
    }

    let mut scale: f64 = 0.0;
    for i in 0..4 {
        for j in (i + 1)..4 {
            scale = scale.max((points[i] - points[j]).norm());
        }
    }
    if scale <= f64::MIN_POSITIVE {
        return Err(PoseError::DegenerateInput("all corners coincide".to_string()));
    }

    for i in 0..4 {
        for j in (i + 1)..4 {
            if (points[i] - points[j]).norm() < tolerance * scale {
                return Err(PoseError::DegenerateInput(format!(
                    "corners {} and {} coincide",
                    i, j
                )));
            }
        }
    }

    for (skip, tri) in TRIANGLES.iter().enumerate() {
        let (a, b, c) = (points[tri[0]], points[tri[1]], points[tri[2]]);
        if 0.5 * cross2(&(b - a), &(c - a)).abs() < tolerance * scale * scale {
            return Err(PoseError::DegenerateInput(format!(
                "three corners are collinear (all but corner {})",
                skip
            )));
        }
    }

    // The image of a square in front of the camera is a convex quadrilateral,
    // traversed clockwise or counter-clockwise depending on which side is seen.
    let mut turns = [0.0; 4];
    for (i, turn) in turns.iter_mut().enumerate() {
        let (a, b, c) = (points[i], points[(i + 1) % 4], points[(i + 2) % 4]);
        *turn = cross2(&(b - a), &(c - b));
    }
    if !(turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0)) {
        return Err(PoseError::DegenerateInput(
            "corners do not form a convex quadrilateral".to_string(),
        ));
    }
    Ok(())
}

/// Homography mapping the unit square corners onto `points`, normalized so
/// that its bottom-right coefficient is 1.
///
/// Each correspondence $(u, v) \mapsto (x, y)$ contributes the two rows
/// $$
/// \begin{aligned}
/// h_{11} u + h_{12} v + h_{13} - h_{31} u x - h_{32} v x &= x \\\\
/// h_{21} u + h_{22} v + h_{23} - h_{31} u y - h_{32} v y &= y
/// \end{aligned}
/// $$
pub fn square_to_quad(points: &[Vec2; 4]) -> Result<Mat3, PoseError> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, (sq, p)) in UNIT_SQUARE.iter().zip(points.iter()).enumerate() {
        let (u, v) = (sq[0], sq[1]);
        let (x, y) = (p.x, p.y);
        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = u;
        a[(r0, 1)] = v;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -v * x;
        b[r0] = x;

        a[(r1, 3)] = u;
        a[(r1, 4)] = v;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -u * y;
        a[(r1, 7)] = -v * y;
        b[r1] = y;
    }

    let h = a
        .lu()
        .solve(&b)
        .filter(|h| h.iter().all(|x| x.is_finite()))
        .ok_or_else(|| PoseError::DegenerateInput("homography system is singular".to_string()))?;

    #[rustfmt::skip]
    let h_mat = Mat3::new(
        h[0], h[1], h[2],
        h[3], h[4], h[5],
        h[6], h[7], 1.0,
    );
    Ok(h_mat)
}

/// The two poses of a square compatible with a unit-square homography
/// normalized by [`square_to_quad`], the one reprojecting best first.
///
/// This is infinitesimal plane-based pose estimation (IPPE, Collins and
/// Bartoli). Around the marker center the homography is approximated by its
/// image $\bm{p}$ and Jacobian $\bm{J}$, which determine the first two
/// rotation columns up to the sign of their depth components. The two signs
/// are the two sides of the planar pose ambiguity, and for each the
/// translation is solved by least squares over the four corners.
pub fn planar_poses(
    h_mat: &Mat3,
    points: &[Vec2; 4],
    half_size: f64,
) -> Result<[(Mat3, Vec3); 2], PoseError> {
    let degenerate =
        || PoseError::DegenerateInput("degenerate homography for pose extraction".to_string());

    // Image of the marker center, and Jacobian there per unit of marker length.
    let (px, py) = (h_mat[(0, 2)], h_mat[(1, 2)]);
    #[rustfmt::skip]
    let jac = Matrix2::new(
        h_mat[(0, 0)] - px * h_mat[(2, 0)], h_mat[(0, 1)] - px * h_mat[(2, 1)],
        h_mat[(1, 0)] - py * h_mat[(2, 0)], h_mat[(1, 1)] - py * h_mat[(2, 1)],
    ) / half_size;

    // Rotation taking the optical axis onto the line of sight of the center.
    let r_v = Rotation3::rotation_between(&Vec3::z(), &Vec3::new(px, py, 1.0))
        .ok_or_else(degenerate)?;
    #[rustfmt::skip]
    let proj = Matrix2x3::new(
        1.0, 0.0, -px,
        0.0, 1.0, -py,
    );
    let b_mat = (proj * r_v.matrix()).fixed_columns::<2>(0).into_owned();
    let a_mat = b_mat.try_inverse().ok_or_else(degenerate)? * jac;

    // A = M / t_z, where M is the upper 2x2 block of a 3x2 matrix with
    // orthonormal columns, so its largest singular value is 1.
    let gamma = a_mat.singular_values().max();
    if !(gamma.is_finite() && gamma > 1e-12) {
        return Err(degenerate());
    }
    let m = a_mat / gamma;
    let (c0, c1) = (m.column(0), m.column(1));
    let b0 = (1.0 - c0.norm_squared()).max(0.0).sqrt();
    let mut b1 = (1.0 - c1.norm_squared()).max(0.0).sqrt();
    if c0.dot(&c1) > 0.0 {
        b1 = -b1;
    }

    let model = UNIT_SQUARE.map(|[u, v]| Vec3::new(half_size * u, half_size * v, 0.0));
    let mut candidates = [(Mat3::identity(), Vec3::zeros()); 2];
    for (candidate, sign) in candidates.iter_mut().zip([1.0, -1.0]) {
        let r1 = r_v * Vec3::new(c0[0], c0[1], sign * b0);
        let r2 = r_v * Vec3::new(c1[0], c1[1], sign * b1);
        let rot = Mat3::from_columns(&[r1, r2, r1.cross(&r2)]);
        let trans = translation_given_rotation(&rot, &model, points)?;
        *candidate = (rot, trans);
    }

    let cost = |(rot, trans): &(Mat3, Vec3)| plane_cost(rot, trans, &model, points);
    if cost(&candidates[1]) < cost(&candidates[0]) {
        candidates.swap(0, 1);
    }
    Ok(candidates)
}

/// Translation minimizing the algebraic projection error of `model` onto
/// `points` for a known rotation:
/// $x_i (\bm{R x_i} + \bm{t})_z = (\bm{R x_i} + \bm{t})_x$ and likewise for $y_i$.
fn translation_given_rotation(
    rot: &Mat3,
    model: &[Vec3; 4],
    points: &[Vec2; 4],
) -> Result<Vec3, PoseError> {
    let mut a = SMatrix::<f64, 8, 3>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (i, (x, p)) in model.iter().zip(points.iter()).enumerate() {
        let q = rot * x;
        a[(2 * i, 0)] = 1.0;
        a[(2 * i, 2)] = -p.x;
        b[2 * i] = p.x * q.z - q.x;
        a[(2 * i + 1, 1)] = 1.0;
        a[(2 * i + 1, 2)] = -p.y;
        b[2 * i + 1] = p.y * q.z - q.y;
    }
    let a_t = a.transpose();
    (a_t * a)
        .cholesky()
        .map(|chol| chol.solve(&(a_t * b)))
        .ok_or_else(|| PoseError::DegenerateInput("translation system is singular".to_string()))
}

/// Squared reprojection error on the normalized image plane,
/// infinite if a corner is not in front of the camera.
fn plane_cost(rot: &Mat3, trans: &Vec3, model: &[Vec3; 4], points: &[Vec2; 4]) -> f64 {
    model
        .iter()
        .zip(points.iter())
        .map(|(x, p)| {
            let c = rot * x + trans;
            if c.z <= 0.0 {
                f64::INFINITY
            } else {
                (c.xy() / c.z - p).norm_squared()
            }
        })
        .sum()
}

/// z component of the cross product of two plane vectors.
#[inline]
fn cross2(a: &Vec2, b: &Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}
