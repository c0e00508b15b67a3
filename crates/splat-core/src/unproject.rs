//! NDC to metric space.

use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3, Vector4};
use tracing::{debug, warn};

use crate::camera::{Extrinsics, Intrinsics, Resolution};
use crate::error::{Result, SplatError};
use crate::gaussians::{Gaussian3D, Gaussians3D, GaussianNdc};

/// Depth substituted for non-finite or non-positive predictions.
pub const DEFAULT_DEPTH_EPSILON: f32 = 1e-4;

/// Lift a predicted NDC batch into metric space.
///
/// `intrinsics` must already be scaled to `internal`, the resolution the
/// predictor saw. The output has the same length and order as `batch`;
/// degenerate depths are clamped to `depth_epsilon` rather than dropped.
///
/// Each covariance goes through the same per-axis map as its position:
/// NDC x spans `depth·W/(2fx)` metres, NDC y spans `depth·H/(2fy)` and NDC z
/// takes the mean of the two. When both lateral spans agree and the
/// extrinsics carry no rotation the map is a uniform scale, so log-scales
/// shift by its log and rotations pass through untouched. Otherwise the
/// covariance is rebuilt, mapped and decomposed back into scales and a
/// rotation.
pub fn unproject(
    batch: &[GaussianNdc],
    intrinsics: &Intrinsics,
    extrinsics: &Extrinsics,
    internal: Resolution,
    depth_epsilon: f32,
) -> Result<Gaussians3D> {
    let internal = internal.validate()?;
    if !depth_epsilon.is_finite() || depth_epsilon <= 0.0 {
        return Err(SplatError::processing(format!(
            "depth epsilon must be a positive number, got {depth_epsilon}"
        )));
    }

    let fx = intrinsics.fx();
    let fy = intrinsics.fy();
    if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
        return Err(SplatError::processing(format!(
            "intrinsics focal lengths must be positive, got fx={fx} fy={fy}"
        )));
    }
    let (cx, cy) = (intrinsics.cx(), intrinsics.cy());
    let width = internal.width as f32;
    let height = internal.height as f32;

    let disparity_factor = fx / width;
    let span_x = width / (2.0 * fx);
    let span_y = height / (2.0 * fy);
    let spans = Vector3::new(span_x, span_y, 0.5 * (span_x + span_y)).cast::<f64>();

    let world_from_camera = extrinsics
        .matrix()
        .try_inverse()
        .ok_or_else(|| SplatError::processing("extrinsics matrix is not invertible"))?;
    let linear = world_from_camera.fixed_view::<3, 3>(0, 0).into_owned();
    let uniform = span_x == span_y && linear == Matrix3::identity();
    let linear = linear.cast::<f64>();

    let mut clamped = 0usize;
    let gaussians = batch
        .iter()
        .map(|g| {
            let [x, y, z] = g.position;
            let mut depth = disparity_factor / z;
            if !depth.is_finite() || depth <= 0.0 {
                depth = depth_epsilon;
                clamped += 1;
            }

            let u = (x + 1.0) * 0.5 * width;
            let v = (y + 1.0) * 0.5 * height;
            let camera = Vector4::new(
                (u - cx) / fx * depth,
                (v - cy) / fy * depth,
                depth,
                1.0,
            );
            let world = world_from_camera * camera;

            let (log_scale, rotation) = if uniform {
                let log_k = (depth * span_x).ln();
                (g.log_scale.map(|s| s + log_k), g.rotation)
            } else {
                let map = linear * Matrix3::from_diagonal(&(spans * f64::from(depth)));
                let sigma = map * covariance(g.rotation, g.log_scale) * map.transpose();
                decompose(&sigma)
            };

            Gaussian3D {
                position: [world.x, world.y, world.z],
                log_scale,
                rotation,
                opacity: g.opacity,
                color: g.color,
            }
        })
        .collect::<Gaussians3D>();

    if clamped > 0 {
        warn!(
            "Clamped {clamped} of {} primitives with degenerate depth to {depth_epsilon}",
            batch.len()
        );
    }
    debug!(
        "Unprojected {} primitives (disparity factor {disparity_factor:.4}, anisotropic {})",
        gaussians.len(),
        !uniform
    );
    Ok(gaussians)
}

/// `R·diag(exp(2s))·Rᵀ` for a `w, x, y, z` quaternion and log-scales `s`.
/// A zero quaternion is read as the identity.
fn covariance(wxyz: [f32; 4], log_scale: [f32; 3]) -> Matrix3<f64> {
    let [w, x, y, z] = wxyz.map(f64::from);
    let rotation = UnitQuaternion::try_new(Quaternion::new(w, x, y, z), f64::EPSILON)
        .map(|q| q.to_rotation_matrix().into_inner())
        .unwrap_or_else(Matrix3::identity);
    let variances = Vector3::from(log_scale.map(|s| (2.0 * f64::from(s)).exp()));
    rotation * Matrix3::from_diagonal(&variances) * rotation.transpose()
}

/// Log-scales and a `w, x, y, z` rotation whose covariance is `sigma`.
fn decompose(sigma: &Matrix3<f64>) -> ([f32; 3], [f32; 4]) {
    let eigen = sigma.symmetric_eigen();
    let mut axes = eigen.eigenvectors;
    if axes.determinant() < 0.0 {
        let flipped = -axes.column(2).into_owned();
        axes.set_column(2, &flipped);
    }
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(axes));
    let log_scale =
        [0usize, 1, 2].map(|i| (0.5 * eigen.eigenvalues[i].max(f64::MIN_POSITIVE).ln()) as f32);
    (log_scale, [q.w as f32, q.i as f32, q.j as f32, q.k as f32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::INTERNAL_RESOLUTION;
    use approx::assert_relative_eq;
    use nalgebra::Matrix4;

    fn ndc(position: [f32; 3]) -> GaussianNdc {
        GaussianNdc {
            position,
            log_scale: [-1.0, -2.0, -3.0],
            rotation: [0.5, 0.5, 0.5, 0.5],
            opacity: 0.8,
            color: [0.1, 0.2, 0.3],
        }
    }

    fn scaled_intrinsics(f_px: f32, original: Resolution) -> Intrinsics {
        Intrinsics::from_focal(f_px, original)
            .unwrap()
            .scaled_to(original, INTERNAL_RESOLUTION)
            .unwrap()
    }

    #[test]
    fn centre_pixel_lands_on_the_optical_axis() {
        let k = scaled_intrinsics(700.0, Resolution::new(768, 768));
        let out = unproject(
            &[ndc([0.0, 0.0, 0.5])],
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        let g = out.gaussians[0];
        // disparity factor 1400 / 1536, depth = factor / 0.5
        let depth = 1400.0 / 1536.0 / 0.5;
        assert_relative_eq!(g.position[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(g.position[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(g.position[2], depth, epsilon = 1e-6);
    }

    #[test]
    fn image_corner_back_projects_through_the_pinhole() {
        let k = scaled_intrinsics(700.0, Resolution::new(768, 768));
        let out = unproject(
            &[ndc([1.0, -1.0, 1.0])],
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        let g = out.gaussians[0];
        let depth = 1400.0 / 1536.0;
        assert_relative_eq!(g.position[0], 768.0 / 1400.0 * depth, epsilon = 1e-5);
        assert_relative_eq!(g.position[1], -768.0 / 1400.0 * depth, epsilon = 1e-5);
        assert_relative_eq!(g.position[2], depth, epsilon = 1e-6);
    }

    #[test]
    fn scales_grow_with_depth_and_other_fields_pass_through() {
        let k = scaled_intrinsics(700.0, Resolution::new(768, 768));
        let near = ndc([0.0, 0.0, 1.0]);
        let far = ndc([0.0, 0.0, 0.25]);
        let out = unproject(
            &[near, far],
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        let (a, b) = (out.gaussians[0], out.gaussians[1]);
        for axis in 0..3 {
            assert_relative_eq!(b.log_scale[axis] - a.log_scale[axis], 4f32.ln(), epsilon = 1e-5);
        }
        assert_eq!(a.rotation, near.rotation);
        assert_eq!(a.opacity, near.opacity);
        assert_eq!(a.color, near.color);
    }

    fn assert_covariance(g: &Gaussian3D, diagonal: [f64; 3]) {
        let sigma = covariance(g.rotation, g.log_scale);
        let expected = Matrix3::from_diagonal(&Vector3::from(diagonal));
        assert_relative_eq!(sigma, expected, epsilon = 1e-5);
    }

    #[test]
    fn non_square_photos_scale_each_axis_by_its_own_span() {
        // 1024x512 at f=800 scales to fx=1200, fy=2400 on the 1536 grid.
        // At z=0.5 the depth is 1.5625, so one NDC unit spans 1.0m in x,
        // 0.5m in y and their mean, 0.75m, in z.
        let k = scaled_intrinsics(800.0, Resolution::new(1024, 512));
        let unit = GaussianNdc {
            log_scale: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
            ..ndc([0.0, 0.0, 0.5])
        };
        let out = unproject(
            &[unit],
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        let g = out.gaussians[0];
        assert_relative_eq!(g.position[2], 1.5625, epsilon = 1e-6);
        assert_covariance(&g, [1.0, 0.25, 0.5625]);

        let mut scales: Vec<f32> = g.log_scale.iter().map(|s| s.exp()).collect();
        scales.sort_by(f32::total_cmp);
        assert_relative_eq!(scales[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(scales[1], 0.75, epsilon = 1e-5);
        assert_relative_eq!(scales[2], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn rotated_primitives_are_stretched_along_image_axes() {
        // Long axis turned from x onto y, where the map halves it.
        let k = scaled_intrinsics(800.0, Resolution::new(1024, 512));
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let turned = GaussianNdc {
            log_scale: [2f32.ln(), 0.0, 0.0],
            rotation: [half, 0.0, 0.0, half],
            ..ndc([0.0, 0.0, 0.5])
        };
        let out = unproject(
            &[turned],
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        assert_covariance(&out.gaussians[0], [1.0, 1.0, 0.5625]);
        let norm: f32 = out.gaussians[0].rotation.iter().map(|c| c * c).sum();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn rotating_extrinsics_turn_the_covariance_with_the_points() {
        // Camera yawed 90 degrees about z: world x is camera y.
        let k = scaled_intrinsics(700.0, Resolution::new(768, 768));
        let mut m = Matrix4::identity();
        m[(0, 0)] = 0.0;
        m[(0, 1)] = 1.0;
        m[(1, 0)] = -1.0;
        m[(1, 1)] = 0.0;
        let stretched = GaussianNdc {
            log_scale: [2f32.ln(), 0.0, 0.0],
            rotation: [1.0, 0.0, 0.0, 0.0],
            ..ndc([0.0, 0.0, 1.0])
        };
        let out = unproject(
            &[stretched],
            &k,
            &Extrinsics::from_matrix(m),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        let span = f64::from(1400.0f32 / 1536.0 * 768.0 / 1400.0);
        let s2 = span * span;
        assert_covariance(&out.gaussians[0], [s2, 4.0 * s2, s2]);
    }

    #[test]
    fn degenerate_depths_are_clamped_not_dropped() {
        let k = scaled_intrinsics(500.0, Resolution::new(640, 480));
        let batch = [
            ndc([0.0, 0.0, 0.0]),
            ndc([0.1, 0.2, -0.5]),
            ndc([0.0, 0.0, f32::NAN]),
            ndc([0.3, 0.3, 0.9]),
        ];
        let out = unproject(
            &batch,
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            1e-3,
        )
        .unwrap();
        assert_eq!(out.len(), batch.len());
        for g in &out.gaussians[..3] {
            assert_relative_eq!(g.position[2], 1e-3);
        }
        assert!(out.gaussians[3].position[2] > 1e-3);
    }

    #[test]
    fn order_is_preserved() {
        let k = scaled_intrinsics(500.0, Resolution::new(640, 480));
        let batch: Vec<_> = (1..=5).map(|i| ndc([0.0, 0.0, i as f32 * 0.1])).collect();
        let out = unproject(
            &batch,
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        let depths: Vec<f32> = out.iter().map(|g| g.position[2]).collect();
        assert!(depths.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn translation_in_extrinsics_moves_points_into_world_frame() {
        let k = scaled_intrinsics(700.0, Resolution::new(768, 768));
        let mut m = Matrix4::identity();
        m[(0, 3)] = 2.0;
        let out = unproject(
            &[ndc([0.0, 0.0, 1.0])],
            &k,
            &Extrinsics::from_matrix(m),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        assert_relative_eq!(out.gaussians[0].position[0], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn singular_extrinsics_fail() {
        let k = scaled_intrinsics(700.0, Resolution::new(768, 768));
        let err = unproject(
            &[ndc([0.0, 0.0, 1.0])],
            &k,
            &Extrinsics::from_matrix(Matrix4::zeros()),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap_err();
        assert!(matches!(err, SplatError::ProcessingFailed { .. }));
    }

    #[test]
    fn empty_batches_stay_empty() {
        let k = scaled_intrinsics(700.0, Resolution::new(768, 768));
        let out = unproject(
            &[],
            &k,
            &Extrinsics::identity(),
            INTERNAL_RESOLUTION,
            DEFAULT_DEPTH_EPSILON,
        )
        .unwrap();
        assert!(out.is_empty());
    }
}
