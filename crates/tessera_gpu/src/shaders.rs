//! WGSL shader programs
//!
//! One source per [`ShaderProgram`]. Every program binds the same group
//! layout so a single pipeline layout serves all of them:
//!
//! | binding | resource |
//! |---------|----------|
//! | 0 | uniform block (dynamic offset) |
//! | 1 | texture 0 |
//! | 2 | texture 1 |
//! | 3 | linear clamp sampler |
//! | 4 | read-only storage 0 |
//! | 5 | read-only storage 1 |
//!
//! Sources are validated with naga before a module is created from them, so
//! a broken hot-reloaded file never reaches the device.

use tessera_core::ShaderProgram;

use crate::error::{BackendError, Result};

/// Geometry program: color, image, font and stencil fragment stages
pub const BASIC_SHADER: &str = r#"
// ============================================================================
// Tessera Basic Geometry Shader
// ============================================================================

struct Uniforms {
    view_projection: mat4x4<f32>,
    transform: mat4x4<f32>,
    offset: vec2<f32>,
    _pad: vec2<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var texture0: texture_2d<f32>;
@group(0) @binding(3) var linear_sampler: sampler;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) color: vec4<f32>,
    @location(3) clip_origin: vec2<f32>,
    @location(4) clip_extents: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
    @location(1) color: vec4<f32>,
    // Position in clip-region space; inside when both components lie in [0, 1]
    @location(2) clip: vec2<f32>,
}

fn clip_coords(p: vec2<f32>, origin: vec2<f32>, extents: vec4<f32>) -> vec2<f32> {
    let ex = extents.xy;
    let ey = extents.zw;
    let det = ex.x * ey.y - ey.x * ex.y;
    if (abs(det) < 1e-6) {
        return vec2<f32>(0.5, 0.5);
    }
    let d = p - origin;
    return vec2<f32>(
        (d.x * ey.y - ey.x * d.y) / det,
        (ex.x * d.y - d.x * ex.y) / det
    );
}

fn outside_clip(clip: vec2<f32>) -> bool {
    return any(clip < vec2<f32>(0.0)) || any(clip > vec2<f32>(1.0));
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let world = uniforms.transform * vec4<f32>(in.position + uniforms.offset, 0.0, 1.0);

    var out: VertexOutput;
    out.position = uniforms.view_projection * world;
    out.tex_coord = in.tex_coord;
    // Vertex colors arrive with straight alpha
    out.color = vec4<f32>(in.color.rgb * in.color.a, in.color.a);
    out.clip = clip_coords(world.xy / world.w, in.clip_origin, in.clip_extents);
    return out;
}

@fragment
fn fs_color(in: VertexOutput) -> @location(0) vec4<f32> {
    if (outside_clip(in.clip)) {
        discard;
    }
    return in.color;
}

@fragment
fn fs_image(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = textureSampleLevel(texture0, linear_sampler, in.tex_coord, 0.0);
    if (outside_clip(in.clip)) {
        discard;
    }
    return texel * in.color;
}

@fragment
fn fs_font(in: VertexOutput) -> @location(0) vec4<f32> {
    let coverage = textureSampleLevel(texture0, linear_sampler, in.tex_coord, 0.0).a;
    if (outside_clip(in.clip)) {
        discard;
    }
    return in.color * coverage;
}

@fragment
fn fs_stencil(in: VertexOutput) -> @location(0) vec4<f32> {
    if (outside_clip(in.clip)) {
        discard;
    }
    return vec4<f32>(0.0);
}
"#;

/// Fullscreen filter passes: passthrough, drop shadow, color matrix and mask
pub const FILTERS_SHADER: &str = r#"
// ============================================================================
// Tessera Filter Shader
// ============================================================================

struct Uniforms {
    color_matrix: mat4x4<f32>,
    color: vec4<f32>,
    uv_offset: vec2<f32>,
    uv_scale: vec2<f32>,
    tex_coord_min: vec2<f32>,
    tex_coord_max: vec2<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var texture0: texture_2d<f32>;
@group(0) @binding(2) var texture1: texture_2d<f32>;
@group(0) @binding(3) var linear_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    // Top-left origin across the viewport
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));

    var out: VertexOutput;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_passthrough(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(texture0, linear_sampler, in.uv * uniforms.uv_scale, 0.0);
}

@fragment
fn fs_drop_shadow(in: VertexOutput) -> @location(0) vec4<f32> {
    // The offset is expressed with y pointing up
    let up = vec2<f32>(in.uv.x, 1.0 - in.uv.y) + uniforms.uv_offset;
    let uv = vec2<f32>(up.x, 1.0 - up.y) * uniforms.uv_scale;
    let alpha = textureSampleLevel(texture0, linear_sampler, uv, 0.0).a;
    let inside = all(uv >= uniforms.tex_coord_min) && all(uv <= uniforms.tex_coord_max);
    return select(vec4<f32>(0.0), uniforms.color * alpha, inside);
}

@fragment
fn fs_color_matrix(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSampleLevel(texture0, linear_sampler, in.uv, 0.0);
    return clamp(uniforms.color_matrix * color, vec4<f32>(0.0), vec4<f32>(1.0));
}

@fragment
fn fs_mask_image(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSampleLevel(texture0, linear_sampler, in.uv, 0.0);
    let mask = textureSampleLevel(texture1, linear_sampler, in.uv, 0.0).a;
    return color * mask;
}

@fragment
fn fs_stencil(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}
"#;

/// Separable gaussian blur; weights live in storage slot 0
pub const BLUR_SHADER: &str = r#"
// ============================================================================
// Tessera Blur Shader
// ============================================================================

const NUM_WEIGHTS: i32 = 4;

struct Uniforms {
    texel_offset: vec2<f32>,
    _pad: vec2<f32>,
    tex_coord_min: vec2<f32>,
    tex_coord_max: vec2<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var texture0: texture_2d<f32>;
@group(0) @binding(3) var linear_sampler: sampler;
@group(0) @binding(4) var<storage, read> weights: array<f32, 4>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));

    var out: VertexOutput;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

fn fetch(uv: vec2<f32>) -> vec4<f32> {
    let clamped = clamp(uv, uniforms.tex_coord_min, uniforms.tex_coord_max);
    return textureSampleLevel(texture0, linear_sampler, clamped, 0.0);
}

@fragment
fn fs_blur(in: VertexOutput) -> @location(0) vec4<f32> {
    var color = fetch(in.uv) * weights[0];
    for (var i = 1; i < NUM_WEIGHTS; i++) {
        let delta = uniforms.texel_offset * f32(i);
        color += (fetch(in.uv + delta) + fetch(in.uv - delta)) * weights[i];
    }
    return color;
}
"#;

/// Region copy between textures of possibly different sizes
pub const BLIT_SHADER: &str = r#"
// ============================================================================
// Tessera Blit Shader
// ============================================================================

struct Uniforms {
    // [min_u, min_v, max_u, max_v]
    source_rect: vec4<f32>,
    target_rect: vec4<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var texture0: texture_2d<f32>;
@group(0) @binding(3) var linear_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));

    var out: VertexOutput;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_blit(in: VertexOutput) -> @location(0) vec4<f32> {
    let dst_min = uniforms.target_rect.xy;
    let dst_size = max(uniforms.target_rect.zw - dst_min, vec2<f32>(1e-6));
    let t = (in.uv - dst_min) / dst_size;
    let uv = mix(uniforms.source_rect.xy, uniforms.source_rect.zw, t);
    return textureSampleLevel(texture0, linear_sampler, uv, 0.0);
}
"#;

/// Gradients and the procedural creation effect
///
/// Stop colors are bound to storage slot 0 and stop positions to slot 1.
pub const GRADIENT_SHADER: &str = r#"
// ============================================================================
// Tessera Gradient Shader
// ============================================================================

const PI: f32 = 3.14159265;
const MAX_NUM_STOPS: u32 = 16u;

const LINEAR: u32 = 0u;
const RADIAL: u32 = 1u;
const CONIC: u32 = 2u;
const REPEATING_LINEAR: u32 = 3u;
const REPEATING_RADIAL: u32 = 4u;
const REPEATING_CONIC: u32 = 5u;

struct Uniforms {
    view_projection: mat4x4<f32>,
    transform: mat4x4<f32>,
    offset: vec2<f32>,
    // Gradients: start / center point. Creation: element dimensions
    p: vec2<f32>,
    // Gradients: direction, inverse radius or rotation. Creation: time in x
    v: vec2<f32>,
    gradient_kind: u32,
    num_stops: u32,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(4) var<storage, read> stop_colors: array<vec4<f32>, 16>;
@group(0) @binding(5) var<storage, read> stop_positions: array<f32, 16>;

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
    @location(2) color: vec4<f32>,
    @location(3) clip_origin: vec2<f32>,
    @location(4) clip_extents: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let world = uniforms.transform * vec4<f32>(in.position + uniforms.offset, 0.0, 1.0);

    var out: VertexOutput;
    out.position = uniforms.view_projection * world;
    out.tex_coord = in.tex_coord;
    out.color = vec4<f32>(in.color.rgb * in.color.a, in.color.a);
    return out;
}

fn mix_stop_colors(t: f32) -> vec4<f32> {
    let count = min(uniforms.num_stops, MAX_NUM_STOPS);
    var color = stop_colors[0];
    for (var i = 1u; i < count; i++) {
        let edge = smoothstep(stop_positions[i - 1u], stop_positions[i], t);
        color = mix(color, stop_colors[i], edge);
    }
    return color;
}

@fragment
fn fs_gradient(in: VertexOutput) -> @location(0) vec4<f32> {
    let kind = uniforms.gradient_kind;
    let d = in.tex_coord - uniforms.p;
    let v = uniforms.v;

    var t = 0.0;
    if (kind == LINEAR || kind == REPEATING_LINEAR) {
        t = dot(d, v) / max(dot(v, v), 1e-6);
    } else if (kind == RADIAL || kind == REPEATING_RADIAL) {
        t = length(d * v);
    } else {
        let rotated = vec2<f32>(v.x * d.x + v.y * d.y, -v.y * d.x + v.x * d.y);
        t = 0.5 + atan2(-rotated.x, rotated.y) / (2.0 * PI);
    }

    if (kind >= REPEATING_LINEAR && uniforms.num_stops > 1u) {
        let first = stop_positions[0];
        let last = stop_positions[min(uniforms.num_stops, MAX_NUM_STOPS) - 1u];
        let span = last - first;
        if (span > 0.0) {
            t = first + fract((t - first) / span) * span;
        }
    }

    return in.color * mix_stop_colors(t);
}

@fragment
fn fs_creation(in: VertexOutput) -> @location(0) vec4<f32> {
    let dimensions = max(uniforms.p, vec2<f32>(1.0));
    let time = uniforms.v.x;

    var c = vec3<f32>(0.0);
    var l = 0.0;
    var z = time;
    for (var i = 0; i < 3; i++) {
        var p = in.tex_coord - vec2<f32>(0.5);
        p.x *= dimensions.x / dimensions.y;
        z += 0.07;
        l = max(length(p), 1e-4);
        let uv = in.tex_coord + p / l * (sin(z) + 1.0) * abs(sin(l * 9.0 - z - z));
        c[i] = 0.01 / length(fract(uv) - vec2<f32>(0.5));
    }

    let alpha = in.color.a;
    return vec4<f32>(clamp(c / l, vec3<f32>(0.0), vec3<f32>(1.0)) * alpha, alpha);
}
"#;

/// Built-in source of a program
pub fn builtin_source(program: ShaderProgram) -> &'static str {
    match program {
        ShaderProgram::Basic => BASIC_SHADER,
        ShaderProgram::Filters => FILTERS_SHADER,
        ShaderProgram::Blur => BLUR_SHADER,
        ShaderProgram::Blit => BLIT_SHADER,
        ShaderProgram::Gradient => GRADIENT_SHADER,
    }
}

/// Entry points the compositor's pipelines expect from each program
pub fn required_entry_points(program: ShaderProgram) -> &'static [&'static str] {
    match program {
        ShaderProgram::Basic => &["vs_main", "fs_color", "fs_image", "fs_font", "fs_stencil"],
        ShaderProgram::Filters => &[
            "vs_fullscreen",
            "fs_passthrough",
            "fs_drop_shadow",
            "fs_color_matrix",
            "fs_mask_image",
            "fs_stencil",
        ],
        ShaderProgram::Blur => &["vs_fullscreen", "fs_blur"],
        ShaderProgram::Blit => &["vs_fullscreen", "fs_blit"],
        ShaderProgram::Gradient => &["vs_main", "fs_gradient", "fs_creation"],
    }
}

/// Parse and validate WGSL for `program`
///
/// Also checks that every entry point the pipelines reference is present.
pub fn validate(program: ShaderProgram, source: &str) -> Result<naga::Module> {
    let invalid = |message: String| BackendError::ShaderValidation {
        program: program.name(),
        message,
    };

    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| invalid(e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    validator
        .validate(&module)
        .map_err(|e| invalid(e.emit_to_string(source)))?;

    for entry in required_entry_points(program) {
        if !module.entry_points.iter().any(|ep| ep.name == *entry) {
            return Err(invalid(format!("missing entry point '{}'", entry)));
        }
    }
    Ok(module)
}
