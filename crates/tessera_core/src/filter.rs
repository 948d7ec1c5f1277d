//! Filter compilation
//!
//! Filter names and parameters from the UI library are parsed into a
//! [`CompiledFilter`]. Color-matrix filters are built by the pure functions
//! in this module; matrices act on premultiplied `(r, g, b, a)` column
//! vectors.

use tracing::warn;

use crate::math::{Color, Mat4, Rgba8, Vec2};
use crate::params::Parameters;
use crate::slot::Recycle;

/// A compiled filter stored in a filter slot
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum CompiledFilter {
    /// Released or never compiled; renders nothing
    #[default]
    Invalid,
    /// Opacity: scale the layer by `blend_factor`
    Passthrough { blend_factor: f32 },
    Blur { sigma: f32 },
    DropShadow {
        sigma: f32,
        /// Pixel offset of the shadow
        offset: Vec2,
        /// Premultiplied shadow color
        color: Color,
    },
    ColorMatrix(Mat4),
    /// Multiply by the saved blend mask
    MaskImage,
}

impl Recycle for CompiledFilter {
    fn recycle(&mut self) {
        *self = CompiledFilter::Invalid;
    }
}

/// Parse a named filter; unknown names yield `None` with a warning
pub fn compile_filter(name: &str, params: &Parameters) -> Option<CompiledFilter> {
    let value = params.f32_or("value", 1.0);
    let filter = match name {
        "opacity" => CompiledFilter::Passthrough {
            blend_factor: value,
        },
        "blur" => {
            let sigma = params.f32_or("sigma", params.f32_or("radius", 1.0));
            CompiledFilter::Blur { sigma: 0.5 * sigma }
        }
        "drop-shadow" => {
            let color = params.color_or("color", Rgba8::default()).premultiplied();
            CompiledFilter::DropShadow {
                sigma: params.f32_or("sigma", 0.0),
                offset: params.vec2_or("offset", Vec2::ZERO),
                color: Color::from(color),
            }
        }
        "brightness" => CompiledFilter::ColorMatrix(brightness(value)),
        "contrast" => CompiledFilter::ColorMatrix(contrast(value)),
        "invert" => CompiledFilter::ColorMatrix(invert(value)),
        "grayscale" => CompiledFilter::ColorMatrix(grayscale(value)),
        "sepia" => CompiledFilter::ColorMatrix(sepia(value)),
        "hue-rotate" => CompiledFilter::ColorMatrix(hue_rotate(value)),
        "saturate" => CompiledFilter::ColorMatrix(saturate(value)),
        _ => {
            warn!("Unsupported filter type '{}'", name);
            return None;
        }
    };
    Some(filter)
}

// ─────────────────────────────────────────────────────────────────────────────
// Color matrices
// ─────────────────────────────────────────────────────────────────────────────

pub fn brightness(value: f32) -> Mat4 {
    Mat4::diagonal(value, value, value, 1.0)
}

pub fn contrast(value: f32) -> Mat4 {
    let g = 0.5 - 0.5 * value;
    Mat4::from_rows([
        [value, 0.0, 0.0, g],
        [0.0, value, 0.0, g],
        [0.0, 0.0, value, g],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

pub fn invert(value: f32) -> Mat4 {
    let v = value.clamp(0.0, 1.0);
    let inverted = 1.0 - 2.0 * v;
    Mat4::from_rows([
        [inverted, 0.0, 0.0, v],
        [0.0, inverted, 0.0, v],
        [0.0, 0.0, inverted, v],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

pub fn grayscale(value: f32) -> Mat4 {
    let rev = 1.0 - value;
    let [r, g, b] = [0.2126 * value, 0.7152 * value, 0.0722 * value];
    Mat4::from_rows([
        [r + rev, g, b, 0.0],
        [r, g + rev, b, 0.0],
        [r, g, b + rev, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

pub fn sepia(value: f32) -> Mat4 {
    let rev = 1.0 - value;
    let mix = |row: [f32; 3]| [row[0] * value, row[1] * value, row[2] * value];
    let r = mix([0.393, 0.769, 0.189]);
    let g = mix([0.349, 0.686, 0.168]);
    let b = mix([0.272, 0.534, 0.131]);
    Mat4::from_rows([
        [r[0] + rev, r[1], r[2], 0.0],
        [g[0], g[1] + rev, g[2], 0.0],
        [b[0], b[1], b[2] + rev, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

/// Hue rotation by `radians` (W3C filter-effects matrix)
pub fn hue_rotate(radians: f32) -> Mat4 {
    let (s, c) = radians.sin_cos();
    Mat4::from_rows([
        [
            0.213 + 0.787 * c - 0.213 * s,
            0.715 - 0.715 * c - 0.715 * s,
            0.072 - 0.072 * c + 0.928 * s,
            0.0,
        ],
        [
            0.213 - 0.213 * c + 0.143 * s,
            0.715 + 0.285 * c + 0.140 * s,
            0.072 - 0.072 * c - 0.283 * s,
            0.0,
        ],
        [
            0.213 - 0.213 * c - 0.787 * s,
            0.715 - 0.715 * c + 0.715 * s,
            0.072 + 0.928 * c + 0.072 * s,
            0.0,
        ],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

pub fn saturate(value: f32) -> Mat4 {
    Mat4::from_rows([
        [
            0.213 + 0.787 * value,
            0.715 - 0.715 * value,
            0.072 - 0.072 * value,
            0.0,
        ],
        [
            0.213 - 0.213 * value,
            0.715 + 0.285 * value,
            0.072 - 0.072 * value,
            0.0,
        ],
        [
            0.213 - 0.213 * value,
            0.715 - 0.715 * value,
            0.072 + 0.928 * value,
            0.0,
        ],
        [0.0, 0.0, 0.0, 1.0],
    ])
}
