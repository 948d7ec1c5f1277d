//! UI library render contract
//!
//! [`RenderInterface`] is the full set of calls a retained-mode UI library
//! issues between `begin` and `end`. Every operation reports failure through
//! a sentinel (zero handle or no-op) plus a log line, never an error value.

use crate::geometry::Vertex;
use crate::handle::{FilterHandle, GeometryHandle, LayerHandle, ShaderHandle, TextureHandle};
use crate::math::{IRect, Mat4, Vec2};
use crate::params::Parameters;

/// How geometry drawn by `render_to_clip_mask` combines with the current mask
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClipMaskOperation {
    /// Replace the mask with the geometry
    Set,
    /// Replace the mask with everything outside the geometry
    SetInverse,
    /// Keep only the overlap of the mask and the geometry
    Intersect,
}

/// How a composited layer lands in its destination
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LayerBlend {
    /// Premultiplied alpha over the destination
    #[default]
    Blend,
    /// Overwrite the destination
    Replace,
}

pub trait RenderInterface {
    // ─────────────────────────────────────────────────────────────────────────
    // Geometry
    // ─────────────────────────────────────────────────────────────────────────

    fn compile_geometry(&mut self, vertices: &[Vertex], indices: &[i32]) -> GeometryHandle;

    /// Draw compiled geometry; `TextureHandle::INVALID` selects solid color
    fn render_geometry(
        &mut self,
        geometry: GeometryHandle,
        translation: Vec2,
        texture: TextureHandle,
    );

    fn release_geometry(&mut self, geometry: GeometryHandle);

    // ─────────────────────────────────────────────────────────────────────────
    // Textures
    // ─────────────────────────────────────────────────────────────────────────

    fn load_texture(&mut self, source: &str) -> (TextureHandle, (u32, u32));

    /// Allocate a texture from tightly packed RGBA8 `data` (empty leaves it uninitialized)
    fn generate_texture(&mut self, data: &[u8], dimensions: (u32, u32)) -> TextureHandle;

    fn release_texture(&mut self, texture: TextureHandle);

    // ─────────────────────────────────────────────────────────────────────────
    // Clipping and transform
    // ─────────────────────────────────────────────────────────────────────────

    fn enable_scissor_region(&mut self, enable: bool);

    fn set_scissor_region(&mut self, region: IRect);

    fn enable_clip_mask(&mut self, enable: bool);

    fn render_to_clip_mask(
        &mut self,
        operation: ClipMaskOperation,
        geometry: GeometryHandle,
        translation: Vec2,
    );

    /// `None` resets to identity
    fn set_transform(&mut self, transform: Option<&Mat4>);

    // ─────────────────────────────────────────────────────────────────────────
    // Layers
    // ─────────────────────────────────────────────────────────────────────────

    fn push_layer(&mut self) -> LayerHandle;

    /// Run `filters` over `source` and draw the result into `destination`
    fn composite_layers(
        &mut self,
        source: LayerHandle,
        destination: LayerHandle,
        blend: LayerBlend,
        filters: &[FilterHandle],
    );

    fn pop_layer(&mut self);

    /// Copy the scissor region of the top layer into a new texture
    fn save_layer_as_texture(&mut self) -> TextureHandle;

    /// Capture the top layer as the mask read by the returned filter
    fn save_layer_as_mask_image(&mut self) -> FilterHandle;

    // ─────────────────────────────────────────────────────────────────────────
    // Filters and shaders
    // ─────────────────────────────────────────────────────────────────────────

    fn compile_filter(&mut self, name: &str, parameters: &Parameters) -> FilterHandle;

    fn release_filter(&mut self, filter: FilterHandle);

    fn compile_shader(&mut self, name: &str, parameters: &Parameters) -> ShaderHandle;

    fn render_shader(
        &mut self,
        shader: ShaderHandle,
        geometry: GeometryHandle,
        translation: Vec2,
        texture: TextureHandle,
    );

    fn release_shader(&mut self, shader: ShaderHandle);
}

/// Font engine hook run at the end of every frame
///
/// Glyph atlases rasterized during the frame are uploaded here.
pub trait FontAtlasFlush {
    fn flush_font_atlases(&mut self);
}
