//! Gradient and procedural shader compilation

use smallvec::SmallVec;
use tracing::warn;

use crate::math::{Color, Vec2};
use crate::params::Parameters;
use crate::slot::Recycle;

/// Maximum color stops uploaded per gradient
pub const MAX_NUM_STOPS: usize = 16;

/// Gradient evaluation function, matching the `function` uniform in WGSL
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GradientFunction {
    Linear = 0,
    Radial = 1,
    Conic = 2,
    RepeatingLinear = 3,
    RepeatingRadial = 4,
    RepeatingConic = 5,
}

impl GradientFunction {
    fn select(base: GradientFunction, repeating: bool) -> GradientFunction {
        match (base, repeating) {
            (GradientFunction::Linear, true) => GradientFunction::RepeatingLinear,
            (GradientFunction::Radial, true) => GradientFunction::RepeatingRadial,
            (GradientFunction::Conic, true) => GradientFunction::RepeatingConic,
            (base, _) => base,
        }
    }

    pub fn is_repeating(self) -> bool {
        (self as u32) >= GradientFunction::RepeatingLinear as u32
    }
}

/// Compiled gradient
///
/// `p` is the start / center point and `v` is the direction vector (linear),
/// inverse radius (radial) or `(cos, sin)` of the start angle (conic).
#[derive(Clone, Debug, PartialEq)]
pub struct Gradient {
    pub function: GradientFunction,
    pub p: Vec2,
    pub v: Vec2,
    pub stop_positions: SmallVec<[f32; MAX_NUM_STOPS]>,
    pub stop_colors: SmallVec<[[f32; 4]; MAX_NUM_STOPS]>,
}

impl Gradient {
    pub fn num_stops(&self) -> u32 {
        self.stop_positions.len() as u32
    }
}

/// A compiled shader stored in a shader slot
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CompiledShader {
    #[default]
    Invalid,
    Gradient(Gradient),
    /// Procedural animated effect sized to `dimensions`
    Creation { dimensions: Vec2 },
}

impl Recycle for CompiledShader {
    fn recycle(&mut self) {
        *self = CompiledShader::Invalid;
    }
}

/// Parse a named shader; unknown names and malformed gradients yield `None`
pub fn compile_shader(name: &str, params: &Parameters) -> Option<CompiledShader> {
    let repeating = params.bool_or("repeating", false);
    let (function, p, v) = match name {
        "linear-gradient" => {
            let p0 = params.vec2_or("p0", Vec2::ZERO);
            let p1 = params.vec2_or("p1", Vec2::ZERO);
            (GradientFunction::Linear, p0, p1 - p0)
        }
        "radial-gradient" => {
            let radius = params.vec2_or("radius", Vec2::ONE);
            let inv = |r: f32| if r != 0.0 { 1.0 / r } else { 0.0 };
            (
                GradientFunction::Radial,
                params.vec2_or("center", Vec2::ZERO),
                Vec2::new(inv(radius.x), inv(radius.y)),
            )
        }
        "conic-gradient" => {
            let (s, c) = params.f32_or("angle", 0.0).sin_cos();
            (
                GradientFunction::Conic,
                params.vec2_or("center", Vec2::ZERO),
                Vec2::new(c, s),
            )
        }
        "shader" => {
            if params.str("value") == Some("creation") {
                return Some(CompiledShader::Creation {
                    dimensions: params.vec2_or("dimensions", Vec2::ZERO),
                });
            }
            warn!(
                "Unsupported shader value '{}'",
                params.str("value").unwrap_or_default()
            );
            return None;
        }
        _ => {
            warn!("Unsupported shader type '{}'", name);
            return None;
        }
    };

    let Some(stops) = params.color_stops("color_stop_list") else {
        warn!("Shader '{}' is missing its color_stop_list", name);
        return None;
    };
    let stops = &stops[..stops.len().min(MAX_NUM_STOPS)];

    Some(CompiledShader::Gradient(Gradient {
        function: GradientFunction::select(function, repeating),
        p,
        v,
        stop_positions: stops.iter().map(|s| s.position).collect(),
        stop_colors: stops.iter().map(|s| Color::from(s.color).to_array()).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Rgba8;
    use crate::params::ColorStop;

    fn stops(n: usize) -> Vec<ColorStop> {
        (0..n)
            .map(|i| ColorStop {
                position: i as f32 / n.max(1) as f32,
                color: Rgba8::new(255, 0, 0, 255),
            })
            .collect()
    }

    #[test]
    fn linear_gradient_direction() {
        let params = Parameters::new()
            .with("p0", Vec2::new(10.0, 10.0))
            .with("p1", Vec2::new(110.0, 10.0))
            .with("color_stop_list", stops(2));
        let Some(CompiledShader::Gradient(g)) = compile_shader("linear-gradient", &params) else {
            panic!("expected gradient");
        };
        assert_eq!(g.function, GradientFunction::Linear);
        assert_eq!(g.p, Vec2::new(10.0, 10.0));
        assert_eq!(g.v, Vec2::new(100.0, 0.0));
        assert_eq!(g.num_stops(), 2);
    }

    #[test]
    fn repeating_selects_repeating_function() {
        let params = Parameters::new()
            .with("repeating", true)
            .with("radius", Vec2::new(2.0, 4.0))
            .with("color_stop_list", stops(3));
        let Some(CompiledShader::Gradient(g)) = compile_shader("radial-gradient", &params) else {
            panic!("expected gradient");
        };
        assert_eq!(g.function, GradientFunction::RepeatingRadial);
        assert!(g.function.is_repeating());
        assert_eq!(g.v, Vec2::new(0.5, 0.25));
    }

    #[test]
    fn stops_are_capped() {
        let params = Parameters::new().with("color_stop_list", stops(40));
        let Some(CompiledShader::Gradient(g)) = compile_shader("conic-gradient", &params) else {
            panic!("expected gradient");
        };
        assert_eq!(g.stop_positions.len(), MAX_NUM_STOPS);
        assert_eq!(g.stop_colors.len(), MAX_NUM_STOPS);
        assert_eq!(g.v, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn creation_shader_and_rejections() {
        let params = Parameters::new()
            .with("value", "creation")
            .with("dimensions", Vec2::new(64.0, 32.0));
        assert_eq!(
            compile_shader("shader", &params),
            Some(CompiledShader::Creation {
                dimensions: Vec2::new(64.0, 32.0)
            })
        );
        assert_eq!(compile_shader("shader", &Parameters::new()), None);
        assert_eq!(compile_shader("linear-gradient", &Parameters::new()), None);
        assert_eq!(compile_shader("plasma", &Parameters::new()), None);
    }
}
