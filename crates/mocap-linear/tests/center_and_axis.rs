use mocap_core::{Pt3, Real, Vec3};
use mocap_linear::{
    fit_axis_gamage_lasenby, fit_axis_svd, fit_center_of_rotation, fit_concentric_sphere_center,
    fit_sphere_center, CenterFitMethod, CenterFitOptions,
};
use nalgebra::{Unit, UnitQuaternion};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

const OFFSETS: [(Real, Real, Real); 3] = [
    (0.05, -0.20, 0.04),
    (-0.04, -0.12, -0.03),
    (0.03, -0.28, 0.06),
];

fn center() -> Pt3 {
    Pt3::new(0.1, 0.9, -0.2)
}

fn hinge_axis() -> Unit<Vec3> {
    Unit::new_normalize(Vec3::new(0.2, 0.1, 1.0))
}

/// One trace per marker, all rotating about the hinge axis through `center()`.
fn hinge_traces(frames: usize) -> Vec<Vec<Pt3>> {
    let axis = hinge_axis();
    OFFSETS
        .iter()
        .map(|&(x, y, z)| {
            (0..frames)
                .map(|i| {
                    let angle = 1.6 * i as Real / (frames - 1) as Real;
                    let r = UnitQuaternion::from_axis_angle(&axis, angle);
                    center() + r * Vec3::new(x, y, z)
                })
                .collect()
        })
        .collect()
}

/// Traces rotating through a two-parameter cone of orientations.
fn ball_traces() -> Vec<Vec<Pt3>> {
    OFFSETS
        .iter()
        .map(|&(x, y, z)| {
            let mut trace = Vec::new();
            for i in 0..20 {
                for j in 0..20 {
                    let roll = -0.9 + 1.8 * i as Real / 19.0;
                    let yaw = -0.9 + 1.8 * j as Real / 19.0;
                    let r = UnitQuaternion::from_euler_angles(roll, 0.3 * roll, yaw);
                    trace.push(center() + r * Vec3::new(x, y, z));
                }
            }
            trace
        })
        .collect()
}

fn add_noise(traces: &[Vec<Pt3>], sigma: Real, seed: u64) -> Vec<Vec<Pt3>> {
    let normal = Normal::new(0.0, sigma).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    traces
        .iter()
        .map(|t| {
            t.iter()
                .map(|p| {
                    p + Vec3::new(
                        normal.sample(&mut rng),
                        normal.sample(&mut rng),
                        normal.sample(&mut rng),
                    )
                })
                .collect()
        })
        .collect()
}

fn distance_to_axis(p: &Pt3) -> Real {
    let d = p - center();
    (d - hinge_axis().into_inner() * d.dot(&hinge_axis())).norm()
}

#[test]
fn hinge_axis_is_recovered_by_both_fits() {
    let traces = hinge_traces(120);

    let gl = fit_axis_gamage_lasenby(&traces).unwrap();
    let align = gl.axis.dot(&hinge_axis()).abs();
    assert!(gl.singular_value < 1e-2, "gamage-lasenby value {}", gl.singular_value);
    assert!((1.0 - align) < 1e-9, "gamage-lasenby axis misaligned: {}", align);

    let svd = fit_axis_svd(&traces, &center()).unwrap();
    let align = svd.axis.dot(&hinge_axis()).abs();
    assert!(svd.singular_value < 1e-2, "svd value {}", svd.singular_value);
    assert!((1.0 - align) < 1e-9, "svd axis misaligned: {}", align);
}

#[test]
fn hinge_axis_survives_noise() {
    let traces = add_noise(&hinge_traces(200), 1e-3, 11);
    let gl = fit_axis_gamage_lasenby(&traces).unwrap();
    assert!(gl.singular_value < 1e-2, "value {}", gl.singular_value);
    assert!(gl.axis.dot(&hinge_axis()).abs() > 0.99);
}

#[test]
fn hinge_center_lies_on_axis() {
    let opts = CenterFitOptions::default();

    let exact = fit_center_of_rotation(&hinge_traces(120), &opts).unwrap();
    assert_eq!(exact.method, CenterFitMethod::LeastSquares);
    let d = distance_to_axis(&exact.center);
    assert!(d < 1e-6, "noise-free hinge center {} m off axis", d);

    let noisy = fit_center_of_rotation(&add_noise(&hinge_traces(200), 1e-3, 5), &opts).unwrap();
    let d = distance_to_axis(&noisy.center);
    assert!(d < 1e-3, "noisy hinge center {} m off axis", d);
}

#[test]
fn ball_center_is_recovered_exactly_without_noise() {
    let traces = ball_traces();
    let fit = fit_center_of_rotation(&traces, &CenterFitOptions::default()).unwrap();
    let err = (fit.center - center()).norm();
    assert!(err < 1e-6, "center error {}", err);

    let single = fit_sphere_center(&traces[0]).unwrap();
    assert!((single - center()).norm() < 1e-6);
    let concentric = fit_concentric_sphere_center(&traces).unwrap();
    assert!((concentric - center()).norm() < 1e-6);
}

#[test]
fn ball_center_is_recovered_under_noise() {
    let traces = add_noise(&ball_traces(), 1e-3, 3);
    let fit = fit_center_of_rotation(&traces, &CenterFitOptions::default()).unwrap();
    assert_eq!(fit.method, CenterFitMethod::ChangPollard);
    let err = (fit.center - center()).norm();
    assert!(err < 1e-3, "center error {}", err);
}

#[test]
fn too_few_samples_is_an_error() {
    let traces = vec![vec![center(); 3]];
    assert!(fit_center_of_rotation(&traces, &CenterFitOptions::default()).is_err());
    assert!(fit_axis_gamage_lasenby(&[]).is_err());
}
