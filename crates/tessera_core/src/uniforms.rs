//! Uniform block layouts shared with the WGSL programs
//!
//! Every struct here mirrors a `struct Uniforms` in one of the backend's
//! shader programs and must keep WGSL alignment (16-byte struct size,
//! `vec2` on 8-byte, `vec4`/`mat4x4` on 16-byte boundaries).

use crate::math::Mat4;

/// Uniforms for geometry draws (`basic` program)
///
/// Memory layout (144 bytes total):
/// - view_projection: `mat4x4<f32>` (64 bytes)
/// - transform: `mat4x4<f32>` (64 bytes)
/// - offset: `vec2<f32>` (8 bytes) - translation in pixels
/// - _pad: `vec2<f32>` (8 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GeometryUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub transform: [[f32; 4]; 4],
    pub offset: [f32; 2],
    pub _pad: [f32; 2],
}

impl GeometryUniforms {
    pub fn new(view_projection: &Mat4, transform: &Mat4, offset: [f32; 2]) -> Self {
        Self {
            view_projection: view_projection.cols,
            transform: transform.cols,
            offset,
            _pad: [0.0; 2],
        }
    }
}

/// Uniforms for fullscreen filter passes (`filters` program)
///
/// Memory layout (112 bytes total):
/// - color_matrix: `mat4x4<f32>` (64 bytes)
/// - color: `vec4<f32>` (16 bytes) - drop shadow color, premultiplied
/// - uv_offset: `vec2<f32>` (8 bytes)
/// - uv_scale: `vec2<f32>` (8 bytes)
/// - tex_coord_min: `vec2<f32>` (8 bytes)
/// - tex_coord_max: `vec2<f32>` (8 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FilterUniforms {
    pub color_matrix: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub uv_offset: [f32; 2],
    pub uv_scale: [f32; 2],
    pub tex_coord_min: [f32; 2],
    pub tex_coord_max: [f32; 2],
}

impl Default for FilterUniforms {
    fn default() -> Self {
        Self {
            color_matrix: Mat4::IDENTITY.cols,
            color: [0.0; 4],
            uv_offset: [0.0; 2],
            uv_scale: [1.0; 2],
            tex_coord_min: [0.0; 2],
            tex_coord_max: [1.0; 2],
        }
    }
}

/// Uniforms for one separable blur pass (`blur` program)
///
/// Memory layout (32 bytes total):
/// - texel_offset: `vec2<f32>` (8 bytes) - one texel along the blur axis
/// - _pad: `vec2<f32>` (8 bytes)
/// - tex_coord_min: `vec2<f32>` (8 bytes)
/// - tex_coord_max: `vec2<f32>` (8 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurUniforms {
    pub texel_offset: [f32; 2],
    pub _pad: [f32; 2],
    pub tex_coord_min: [f32; 2],
    pub tex_coord_max: [f32; 2],
}

/// Uniforms for texture region copies (`blit` program)
///
/// Both rects are `[min_u, min_v, max_u, max_v]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlitUniforms {
    pub source_rect: [f32; 4],
    pub target_rect: [f32; 4],
}

impl Default for BlitUniforms {
    fn default() -> Self {
        Self {
            source_rect: [0.0, 0.0, 1.0, 1.0],
            target_rect: [0.0, 0.0, 1.0, 1.0],
        }
    }
}

/// Uniforms for gradient draws (`gradient` program, `fs_gradient`)
///
/// Memory layout (160 bytes total):
/// - view_projection: `mat4x4<f32>` (64 bytes)
/// - transform: `mat4x4<f32>` (64 bytes)
/// - offset: `vec2<f32>` (8 bytes)
/// - p: `vec2<f32>` (8 bytes)
/// - v: `vec2<f32>` (8 bytes)
/// - function: `u32` (4 bytes)
/// - num_stops: `u32` (4 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GradientUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub transform: [[f32; 4]; 4],
    pub offset: [f32; 2],
    pub p: [f32; 2],
    pub v: [f32; 2],
    pub function: u32,
    pub num_stops: u32,
}

/// Uniforms for the procedural creation effect (`gradient` program, `fs_creation`)
///
/// Shares the gradient block: `dimensions` overlays `p` and `time` the first
/// component of `v` (160 bytes total).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CreationUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub transform: [[f32; 4]; 4],
    pub offset: [f32; 2],
    pub dimensions: [f32; 2],
    pub time: f32,
    pub _pad: [f32; 3],
}
