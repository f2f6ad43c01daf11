use approx::assert_relative_eq;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use square_pnp::*;

type V3 = (f64, f64, f64);

/// Maximum rotation error, in radians (0.5 degree).
const MAX_ANGLE_ERROR: f64 = 0.5 * std::f64::consts::PI / 180.0;

/// Maximum translation error, relative to the marker distance.
const MAX_RELATIVE_TRANSLATION_ERROR: f64 = 0.01;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(800.0, 800.0, 320.0, 320.0)
}

fn marker() -> SquareMarker {
    SquareMarker::new(0.05)
}

fn iso(roll_deg: f64, pitch_deg: f64, yaw_deg: f64, trans: [f64; 3]) -> Isometry3<f64> {
    let rot = UnitQuaternion::from_euler_angles(
        roll_deg.to_radians(),
        pitch_deg.to_radians(),
        yaw_deg.to_radians(),
    );
    Isometry3::from_parts(Translation3::from(Vector3::from(trans)), rot)
}

/// Pixel corners of `marker` placed at `pose`.
fn observe(pose: &Isometry3<f64>, marker: &SquareMarker, k: &CameraIntrinsics) -> MarkerCorners {
    let pixels = marker
        .model_points()
        .map(|p| k.project(&(pose * Point3::from(p)).coords).unwrap());
    MarkerCorners::from(pixels)
}

/// Deterministic corner noise of at most one pixel per coordinate.
fn add_noise(corners: &MarkerCorners, seed: f64) -> MarkerCorners {
    let mut pixels = corners.to_array();
    for (k, p) in pixels.iter_mut().enumerate() {
        let k = k as f64;
        p[0] += (1.7 * k + seed).sin();
        p[1] += (2.3 * k + 0.5 * seed).cos();
    }
    MarkerCorners::from(pixels)
}

fn assert_pose_close(estimated: &Pose, expected: &Isometry3<f64>) {
    let estimated = estimated.to_iso3();
    let angle = estimated.rotation.angle_to(&expected.rotation);
    assert!(angle < MAX_ANGLE_ERROR, "rotation error {} rad", angle);
    let distance = expected.translation.vector.norm();
    let t_err = (estimated.translation.vector - expected.translation.vector).norm();
    assert!(
        t_err < MAX_RELATIVE_TRANSLATION_ERROR * distance,
        "translation error {} at distance {}",
        t_err,
        distance
    );
}

#[test]
fn manual_case() {
    init_logger();

    // Marker 50cm in front of the camera, facing it squarely.
    let pose = solve(
        &MarkerCorners::new([240.0, 240.0], [400.0, 240.0], [400.0, 400.0], [240.0, 400.0]),
        &marker(),
        &intrinsics(),
    )
    .unwrap();

    assert_relative_eq!(
        Vector3::from(pose.translation),
        Vector3::new(0.0, 0.0, 0.5),
        epsilon = 1e-9
    );
    let [w, x, y, z] = pose.rotation;
    assert_relative_eq!(w, 1.0, epsilon = 1e-9);
    assert_relative_eq!(Vector3::new(x, y, z), Vector3::zeros(), epsilon = 1e-9);
}

#[test]
fn recovers_grid_of_poses() {
    init_logger();
    let angles = [
        (0.0, 0.0, 0.0),
        (30.0, 0.0, 0.0),
        (0.0, 45.0, 0.0),
        (60.0, 0.0, 10.0),
        (0.0, -60.0, -20.0),
        (40.0, 40.0, 0.0),
        (-35.0, 20.0, 170.0),
    ];
    let distances = [0.3, 0.5, 1.0, 2.0];
    let solver = PoseSolver::default();

    for &(roll, pitch, yaw) in &angles {
        for &d in &distances {
            let expected = iso(roll, pitch, yaw, [0.1 * d, -0.05 * d, d]);
            let corners = observe(&expected, &marker(), &intrinsics());
            let pose = solver.solve(&corners, &marker(), &intrinsics()).unwrap();
            assert_pose_close(&pose, &expected);
            assert!((pose.quaternion_norm() - 1.0).abs() < 1e-4);
            assert!(pose.rotation[0] >= 0.0);
            assert!(pose.reprojection_rmse(&corners, &marker(), &intrinsics()) < 1e-6);
        }
    }
}

#[test]
fn closed_form_alone_is_accurate_on_exact_corners() {
    let solver = PoseSolver::new(SolverParams::new().without_refine());
    let expected = iso(25.0, -40.0, 60.0, [-0.05, 0.02, 0.8]);
    let corners = observe(&expected, &marker(), &intrinsics());
    let pose = solver.solve(&corners, &marker(), &intrinsics()).unwrap();
    assert_pose_close(&pose, &expected);
}

#[test]
fn refinement_reduces_reprojection_error() {
    init_logger();
    let expected = iso(20.0, -30.0, 5.0, [0.02, -0.01, 0.6]);
    let clean = observe(&expected, &marker(), &intrinsics()).to_array();
    let noise = [[0.4, -0.3], [-0.5, 0.2], [0.3, 0.5], [-0.2, -0.4]];
    let mut noisy = clean;
    for (p, n) in noisy.iter_mut().zip(noise.iter()) {
        p[0] += n[0];
        p[1] += n[1];
    }
    let corners = MarkerCorners::from(noisy);

    let solver = PoseSolver::default();
    let closed = solver
        .solve_closed_form(&corners, &marker(), &intrinsics())
        .unwrap();
    let estimate = solver.estimate(&corners, &marker(), &intrinsics()).unwrap();

    let closed_rmse = closed.reprojection_rmse(&corners, &marker(), &intrinsics());
    assert!(estimate.reprojection_rmse <= closed_rmse + 1e-9);
    assert!(estimate.iterations.is_some());
    let t_err = (Vector3::from(estimate.pose.translation) - expected.translation.vector).norm();
    assert!(t_err < 0.02 * 0.6, "translation error {}", t_err);
}

#[test]
fn noisy_distant_markers_are_solved() {
    init_logger();
    let angles = [
        (0.0, 0.0, 0.0),
        (30.0, 0.0, 0.0),
        (0.0, 45.0, 20.0),
        (50.0, -30.0, 100.0),
        (-40.0, 40.0, -150.0),
        (57.0, 0.0, 45.0),
        (0.0, -57.0, 0.0),
    ];
    let solver = PoseSolver::default();

    for (case, &(roll, pitch, yaw)) in angles.iter().enumerate() {
        for &d in &[2.0, 2.5, 3.0] {
            let expected = iso(roll, pitch, yaw, [0.15 * d, -0.1 * d, d]);
            let corners = add_noise(&observe(&expected, &marker(), &intrinsics()), case as f64 + d);
            let estimate = solver
                .estimate(&corners, &marker(), &intrinsics())
                .unwrap_or_else(|e| panic!("({}, {}, {}) at {} m: {}", roll, pitch, yaw, d, e));

            assert!(
                estimate.reprojection_rmse < 2.0,
                "rmse {} px",
                estimate.reprojection_rmse
            );
            assert!(estimate.angular_residual > 0.0);
            // The tilt may flip between the two ambiguous poses, the line of sight may not.
            let t = Vector3::from(estimate.pose.translation);
            assert!(t.angle(&expected.translation.vector) < 1f64.to_radians());
        }
    }
}

#[test]
fn exhausted_refinement_reports_divergence() {
    let expected = iso(20.0, -30.0, 5.0, [0.02, -0.01, 0.6]);
    let mut pixels = observe(&expected, &marker(), &intrinsics()).to_array();
    pixels[0][0] += 0.8;
    pixels[2][1] -= 0.6;
    let corners = MarkerCorners::from(pixels);

    let params = SolverParams::new().with_refine(RefineParams::new().with_max_iterations(1));
    let solver = PoseSolver::new(params);
    assert_eq!(
        solver.solve(&corners, &marker(), &intrinsics()),
        Err(PoseError::NumericalDivergence { iterations: 1 })
    );

    // The closed-form estimate stays available as a fallback.
    let fallback = solver
        .solve_closed_form(&corners, &marker(), &intrinsics())
        .unwrap();
    assert!(fallback.reprojection_rmse(&corners, &marker(), &intrinsics()) < 2.0);
}

#[test]
fn degenerate_corners_are_rejected() {
    let collinear =
        MarkerCorners::new([100.0, 100.0], [200.0, 200.0], [300.0, 300.0], [400.0, 400.0]);
    let coincident =
        MarkerCorners::new([240.0, 240.0], [240.0, 240.0], [400.0, 400.0], [240.0, 400.0]);
    for corners in &[collinear, coincident] {
        match solve(corners, &marker(), &intrinsics()) {
            Err(PoseError::DegenerateInput(_)) => {}
            other => panic!("expected degenerate input, got {:?}", other),
        }
    }
}

#[test]
fn invalid_configuration_is_rejected() {
    let corners = observe(&iso(0.0, 0.0, 0.0, [0.0, 0.0, 0.5]), &marker(), &intrinsics());

    let zero_size = solve(&corners, &SquareMarker::new(0.0), &intrinsics());
    assert!(matches!(zero_size, Err(PoseError::InvalidConfiguration(_))));

    let zero_focal = solve(
        &corners,
        &marker(),
        &CameraIntrinsics::new(0.0, 800.0, 320.0, 320.0),
    );
    assert!(matches!(zero_focal, Err(PoseError::InvalidConfiguration(_))));
}

#[test]
fn corner_order_matters() {
    let expected = iso(15.0, -10.0, 5.0, [0.01, 0.02, 0.5]);
    let c = observe(&expected, &marker(), &intrinsics());
    let permutations = [
        // Starting from another corner.
        MarkerCorners::new(c.top_right, c.bottom_right, c.bottom_left, c.top_left),
        // Opposite winding.
        MarkerCorners::new(c.top_left, c.bottom_left, c.bottom_right, c.top_right),
        // Crossed outline.
        MarkerCorners::new(c.top_left, c.bottom_right, c.top_right, c.bottom_left),
    ];

    let reference = solve(&c, &marker(), &intrinsics()).unwrap();
    assert!(matches!(
        solve(&permutations[2], &marker(), &intrinsics()),
        Err(PoseError::DegenerateInput(_))
    ));
    for corners in &permutations {
        match solve(corners, &marker(), &intrinsics()) {
            Ok(pose) => {
                let angle = pose.angle_to(&reference);
                assert!(angle > 10f64.to_radians(), "same orientation: {}", angle);
            }
            // A wrong order may also leave no consistent pose at all.
            Err(_) => {}
        }
    }
}

#[test]
fn parallel_solves_match_serial_ones() {
    let solver = PoseSolver::default();
    let inputs: Vec<MarkerCorners> = (0..16)
        .map(|i| {
            let a = i as f64 * 4.0;
            let pose = iso(a - 50.0, 40.0 - a, 2.0 * a, [0.01 * a, 0.0, 0.4 + 0.05 * a]);
            observe(&pose, &marker(), &intrinsics())
        })
        .collect();
    let serial: Vec<Pose> = inputs
        .iter()
        .map(|c| solver.solve(c, &marker(), &intrinsics()).unwrap())
        .collect();

    let parallel: Vec<Pose> = std::thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|c| scope.spawn(move || solver.solve(c, &marker(), &intrinsics()).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(serial, parallel);
}

#[test]
fn params_load_from_json() {
    let params: SolverParams = serde_json::from_str(r#"{ "refine": null }"#).unwrap();
    assert_eq!(params.refine, None);
    assert_eq!(params.degeneracy_tolerance, SolverParams::default().degeneracy_tolerance);

    let params: SolverParams =
        serde_json::from_str(r#"{ "refine": { "max_iterations": 5 } }"#).unwrap();
    assert_eq!(params.refine, Some(RefineParams::new().with_max_iterations(5)));

    let json = serde_json::to_string(&SolverParams::default()).unwrap();
    let back: SolverParams = serde_json::from_str(&json).unwrap();
    assert_eq!(back, SolverParams::default());
}

#[quickcheck]
fn non_degenerate_case(rot: V3, trans: V3) -> TestResult {
    let values = [rot.0, rot.1, rot.2, trans.0, trans.1, trans.2];
    if values.iter().any(|v| !v.is_finite()) {
        return TestResult::discard();
    }

    // Tilts up to 45 degrees on each axis, any in-plane rotation,
    // distances between 0.3 and 3 meters.
    let distance = 0.3 + 2.7 * trans.2.sin().abs();
    let expected = iso(
        45.0 * rot.0.sin(),
        45.0 * rot.1.sin(),
        180.0 * rot.2.sin(),
        [
            0.3 * distance * trans.0.sin(),
            0.3 * distance * trans.1.sin(),
            distance,
        ],
    );
    let corners = observe(&expected, &marker(), &intrinsics());

    let pose = match solve(&corners, &marker(), &intrinsics()) {
        Ok(pose) => pose,
        Err(e) => return TestResult::error(format!("{}", e)),
    };
    let estimated = pose.to_iso3();
    let angle = estimated.rotation.angle_to(&expected.rotation);
    let t_err = (estimated.translation.vector - expected.translation.vector).norm();
    TestResult::from_bool(
        angle < MAX_ANGLE_ERROR
            && t_err < MAX_RELATIVE_TRANSLATION_ERROR * distance
            && (pose.quaternion_norm() - 1.0).abs() < 1e-4,
    )
}

#[quickcheck]
fn noisy_distant_case(rot: V3, trans: V3, seed: f64) -> TestResult {
    let values = [rot.0, rot.1, rot.2, trans.0, trans.1, trans.2, seed];
    if values.iter().any(|v| !v.is_finite()) {
        return TestResult::discard();
    }

    // Tilts up to 50 degrees on each axis, distances between 1.5 and 3 meters.
    let distance = 1.5 + 1.5 * trans.2.sin().abs();
    let expected = iso(
        50.0 * rot.0.sin(),
        50.0 * rot.1.sin(),
        180.0 * rot.2.sin(),
        [
            0.3 * distance * trans.0.sin(),
            0.3 * distance * trans.1.sin(),
            distance,
        ],
    );
    let corners = add_noise(
        &observe(&expected, &marker(), &intrinsics()),
        10.0 * seed.sin(),
    );

    let estimate = match PoseSolver::default().estimate(&corners, &marker(), &intrinsics()) {
        Ok(estimate) => estimate,
        Err(e) => return TestResult::error(format!("{}", e)),
    };
    let t = Vector3::from(estimate.pose.translation);
    TestResult::from_bool(
        estimate.reprojection_rmse < 2.0
            && t.angle(&expected.translation.vector) < 1f64.to_radians()
            && (estimate.pose.quaternion_norm() - 1.0).abs() < 1e-4,
    )
}
