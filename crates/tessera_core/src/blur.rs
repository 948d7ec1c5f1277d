//! Adaptive gaussian blur math
//!
//! Large sigmas are handled by halving the source region `pass_level + 1`
//! times and running a fixed-size separable kernel at the reduced
//! resolution. Everything here is pure; the renderer turns a [`BlurPlan`]
//! into draw commands.

use smallvec::SmallVec;

use crate::math::IRect;

/// Taps of the full separable kernel
pub const BLUR_SIZE: usize = 7;
/// Distinct weights of the symmetric kernel (center plus one side)
pub const BLUR_NUM_WEIGHTS: usize = (BLUR_SIZE + 1) / 2;
/// Upper bound for the downscale level
pub const MAX_NUM_PASSES: u32 = 10;
/// Largest sigma the fixed kernel handles in a single pass
pub const MAX_SINGLE_PASS_SIGMA: f32 = 3.0;

/// Downscale level and reduced per-pass sigma for a desired sigma
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlurParameters {
    pub pass_level: u32,
    pub sigma: f32,
}

/// Split `desired_sigma` into a downscale level and the sigma left for the kernel
///
/// `pass_level = clamp(floor(log2(int(sigma * 2/3))), 0, 10)` with `log2(0) = 0`.
pub fn sigma_to_parameters(desired_sigma: f32) -> BlurParameters {
    let scaled = (desired_sigma * (2.0 / 3.0)) as i32;
    let pass_level = (if scaled > 0 { scaled.ilog2() } else { 0 }).min(MAX_NUM_PASSES);
    let sigma = (desired_sigma / (1u32 << pass_level) as f32).clamp(0.0, MAX_SINGLE_PASS_SIGMA);
    BlurParameters { pass_level, sigma }
}

/// Normalized one-sided gaussian weights
///
/// `w[0] + 2 * (w[1] + .. + w[N-1]) == 1`. A sigma below 0.1 puts all weight
/// on the center tap.
pub fn blur_weights(sigma: f32) -> [f32; BLUR_NUM_WEIGHTS] {
    let mut weights = [0.0f32; BLUR_NUM_WEIGHTS];
    let mut normalization = 0.0f32;
    for (i, weight) in weights.iter_mut().enumerate() {
        *weight = if sigma.abs() < 0.1 {
            if i == 0 {
                1.0
            } else {
                0.0
            }
        } else {
            let x = i as f32;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
                / ((2.0 * std::f32::consts::PI).sqrt() * sigma)
        };
        normalization += if i == 0 { 1.0 } else { 2.0 } * *weight;
    }
    for weight in &mut weights {
        *weight /= normalization;
    }
    weights
}

/// UV scale that keeps half-resolution fetches on texel boundaries for odd sizes
pub fn uv_scaling(width: u32, height: u32) -> [f32; 2] {
    let axis = |size: u32| {
        if size % 2 == 1 {
            1.0 - 1.0 / size as f32
        } else {
            1.0
        }
    };
    [axis(width), axis(height)]
}

/// Region covered after one half-scale step
pub fn downscale_rect(rect: IRect) -> IRect {
    let min = [(rect.min[0] + 1) / 2, (rect.min[1] + 1) / 2];
    let max = [(rect.max[0] / 2).max(min[0]), (rect.max[1] / 2).max(min[1])];
    IRect::from_min_max(min, max)
}

/// Full description of one blur invocation
#[derive(Clone, Debug, PartialEq)]
pub struct BlurPlan {
    pub parameters: BlurParameters,
    /// Original region being blurred
    pub window: IRect,
    /// Scissor of each downscale draw; even passes write temp, odd passes write the source
    pub downscale_scissors: SmallVec<[IRect; 12]>,
    /// Region of the reduced image the kernel runs over
    pub scissor: IRect,
    /// Reduced image landed in the source buffer and must be moved to temp
    pub transfer_to_temp: bool,
    pub weights: [f32; BLUR_NUM_WEIGHTS],
    pub uv_scaling: [f32; 2],
    pub tex_coord_min: [f32; 2],
    pub tex_coord_max: [f32; 2],
    /// Exact power-of-two upscale of `scissor`
    pub aligned_target: IRect,
}

impl BlurPlan {
    pub fn new(sigma: f32, window: IRect, size: (u32, u32)) -> Self {
        let parameters = sigma_to_parameters(sigma);
        let passes = parameters.pass_level + 1;

        let mut scissor = window;
        let mut downscale_scissors = SmallVec::new();
        for _ in 0..passes {
            scissor = downscale_rect(scissor);
            downscale_scissors.push(scissor);
        }

        let w = size.0.max(1) as f32;
        let h = size.1.max(1) as f32;
        let tex_coord_min = [
            (scissor.min[0] as f32 + 0.5) / w,
            (scissor.min[1] as f32 + 0.5) / h,
        ];
        let tex_coord_max = [
            (scissor.max[0] as f32 - 0.5) / w,
            (scissor.max[1] as f32 - 0.5) / h,
        ];

        Self {
            parameters,
            window,
            downscale_scissors,
            scissor,
            transfer_to_temp: passes % 2 == 0,
            weights: blur_weights(parameters.sigma),
            uv_scaling: uv_scaling(size.0, size.1),
            tex_coord_min,
            tex_coord_max,
            aligned_target: scissor.scale(1 << passes),
        }
    }

    /// Number of half-scale passes
    pub fn downscale_passes(&self) -> u32 {
        self.parameters.pass_level + 1
    }

    /// Whether the power-of-two upscale differs from the plain window blit
    pub fn needs_aligned_blit(&self) -> bool {
        self.aligned_target != self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_sum(weights: &[f32; BLUR_NUM_WEIGHTS]) -> f32 {
        weights[0] + 2.0 * weights[1..].iter().sum::<f32>()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn small_sigma_needs_no_downscale_level() {
        let p = sigma_to_parameters(2.0);
        assert_eq!(p.pass_level, 0);
        assert_eq!(p.sigma, 2.0);
    }

    #[test]
    fn large_sigma_is_split_across_levels() {
        // int(30 * 2/3) = 20, floor(log2(20)) = 4
        let p = sigma_to_parameters(30.0);
        assert_eq!(p.pass_level, 4);
        assert!((p.sigma - 30.0 / 16.0).abs() < 1e-6);
    }

    #[test]
    fn pass_level_and_sigma_are_clamped() {
        let p = sigma_to_parameters(1.0e7);
        assert_eq!(p.pass_level, MAX_NUM_PASSES);
        assert_eq!(p.sigma, MAX_SINGLE_PASS_SIGMA);

        let p = sigma_to_parameters(-4.0);
        assert_eq!(p.pass_level, 0);
        assert_eq!(p.sigma, 0.0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Weights
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn weights_sum_to_one() {
        let mut sigma = 0.0f32;
        while sigma <= 3.0 {
            let weights = blur_weights(sigma);
            assert!(
                (kernel_sum(&weights) - 1.0).abs() < 1e-5,
                "sigma {sigma} sums to {}",
                kernel_sum(&weights)
            );
            sigma += 0.05;
        }
    }

    #[test]
    fn degenerate_sigma_is_identity_kernel() {
        assert_eq!(blur_weights(0.0), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(blur_weights(0.05), [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn weights_fall_off_from_center() {
        let weights = blur_weights(1.5);
        assert!(weights.windows(2).all(|w| w[0] > w[1]));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Plan
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn uv_scaling_only_for_odd_sizes() {
        assert_eq!(uv_scaling(800, 600), [1.0, 1.0]);
        let s = uv_scaling(801, 600);
        assert!((s[0] - (1.0 - 1.0 / 801.0)).abs() < 1e-7);
        assert_eq!(s[1], 1.0);
    }

    #[test]
    fn downscale_halves_region() {
        let r = downscale_rect(IRect::from_min_max([11, 20], [101, 60]));
        assert_eq!(r, IRect::from_min_max([6, 10], [50, 30]));

        // Degenerate regions never invert
        let r = downscale_rect(IRect::from_min_max([5, 5], [5, 5]));
        assert_eq!(r.min, [3, 3]);
        assert_eq!(r.max, [3, 3]);
    }

    #[test]
    fn single_pass_plan_lands_in_temp() {
        let plan = BlurPlan::new(2.0, IRect::from_min_max([0, 0], [800, 600]), (800, 600));
        assert_eq!(plan.downscale_passes(), 1);
        assert!(!plan.transfer_to_temp);
        assert_eq!(plan.scissor, IRect::from_min_max([0, 0], [400, 300]));
        assert_eq!(plan.aligned_target, plan.window);
        assert!(!plan.needs_aligned_blit());
        assert!((plan.tex_coord_min[0] - 0.5 / 800.0).abs() < 1e-7);
        assert!((plan.tex_coord_max[1] - 299.5 / 600.0).abs() < 1e-7);
    }

    #[test]
    fn two_pass_plan_transfers_and_realigns() {
        let window = IRect::from_min_max([13, 7], [413, 307]);
        let plan = BlurPlan::new(4.0, window, (800, 600));
        assert_eq!(plan.parameters.pass_level, 1);
        assert_eq!(plan.downscale_passes(), 2);
        assert!(plan.transfer_to_temp);
        assert_eq!(plan.downscale_scissors.len(), 2);
        assert_eq!(plan.aligned_target, plan.scissor.scale(4));
        assert!(plan.needs_aligned_blit());
    }
}
