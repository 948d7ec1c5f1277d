//! Draw sequences recorded into the frame's command list
//!
//! [`Passes`] borrows the device, layer stack and frame state at the same
//! time and records the multi-step sequences: layer compositing, the filter
//! chain, the adaptive blur, clip masks and texture copies.

use tracing::{trace, warn};

use crate::blur::BlurPlan;
use crate::command::GpuCommand;
use crate::config::RendererConfig;
use crate::device::{BufferId, GpuDevice, TextureId};
use crate::filter::CompiledFilter;
use crate::frame::RenderFrameState;
use crate::geometry::GeometryBuffers;
use crate::handle::LayerHandle;
use crate::interface::{ClipMaskOperation, LayerBlend};
use crate::layer::{Framebuffer, PostprocessTarget, RenderLayerStack};
use crate::math::{Color, IRect, Vec2, Viewport};
use crate::pipeline::{PipelineKind, ReadyPipelines};
use crate::uniforms::{BlitUniforms, BlurUniforms, FilterUniforms, GeometryUniforms};

/// Sigma below which a drop shadow is left sharp
const MIN_SHADOW_BLUR_SIGMA: f32 = 0.5;

/// Highest value an 8-bit stencil buffer holds
const MAX_STENCIL_VALUE: u32 = 255;

pub(crate) struct Passes<'a, D: GpuDevice> {
    pub device: &'a mut D,
    pub layers: &'a mut RenderLayerStack,
    pub frame: &'a mut RenderFrameState,
    pub pipelines: ReadyPipelines,
    pub config: &'a RendererConfig,
}

fn full_rect(width: u32, height: u32) -> IRect {
    IRect::from_position_size(0, 0, width as i32, height as i32)
}

impl<D: GpuDevice> Passes<'_, D> {
    // ─────────────────────────────────────────────────────────────────────────
    // State helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn set_target(&mut self, color: TextureId, depth_stencil: Option<TextureId>) {
        self.frame.commands.push(GpuCommand::SetRenderTarget {
            color,
            depth_stencil,
        });
    }

    fn use_pipeline(&mut self, kind: PipelineKind) {
        let pipeline = self.pipelines.get(kind);
        self.frame.commands.push(GpuCommand::SetPipeline(pipeline));
        self.frame.commands.push(GpuCommand::ResetBindings);
    }

    fn bind_textures(&mut self, textures: &[TextureId]) {
        for (slot, &texture) in textures.iter().enumerate() {
            self.frame.commands.push(GpuCommand::BindTexture {
                slot: slot as u32,
                texture,
            });
        }
    }

    fn bind_storage(&mut self, slot: u32, buffer: BufferId) {
        self.frame.commands.push(GpuCommand::BindStorage { slot, buffer });
    }

    /// Bind a layer with its depth/stencil and the frame's dynamic state
    fn bind_layer(&mut self, layer: &Framebuffer) -> bool {
        if !layer.is_valid() {
            return false;
        }
        self.set_target(layer.color, layer.depth_stencil);
        self.frame.restore_viewport_and_scissor();
        let reference = self.frame.stencil_reference();
        self.frame.apply_stencil_reference(reference);
        true
    }

    fn top_layer(&self) -> Option<Framebuffer> {
        self.layers.top_layer().copied().filter(Framebuffer::is_valid)
    }

    fn postprocess(&mut self, target: PostprocessTarget) -> Option<Framebuffer> {
        let framebuffer = self.layers.postprocess(&mut *self.device, target);
        framebuffer.is_valid().then_some(framebuffer)
    }

    /// Fullscreen draw into a scratch buffer under the frame viewport and scissor
    fn fullscreen(
        &mut self,
        kind: PipelineKind,
        target: &Framebuffer,
        uniforms: &FilterUniforms,
        textures: &[TextureId],
    ) {
        self.set_target(target.color, None);
        self.frame.restore_viewport_and_scissor();
        self.use_pipeline(kind);
        self.frame.commands.set_uniforms(uniforms);
        self.bind_textures(textures);
        self.frame.commands.push(GpuCommand::DrawFullscreen);
    }

    fn draw_indexed(&mut self, buffers: GeometryBuffers) {
        self.frame.commands.push(GpuCommand::DrawIndexed {
            vertex_buffer: buffers.vertex_buffer,
            index_buffer: buffers.index_buffer,
            index_count: buffers.index_count,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Geometry
    // ─────────────────────────────────────────────────────────────────────────

    pub fn geometry_uniforms(&self, translation: Vec2) -> GeometryUniforms {
        GeometryUniforms::new(
            &self.frame.view_projection,
            &self.frame.transform,
            translation.to_array(),
        )
    }

    /// Indexed draw into the top layer with `uniforms` and bound resources
    pub fn draw_geometry<U: bytemuck::Pod>(
        &mut self,
        kind: PipelineKind,
        buffers: GeometryBuffers,
        uniforms: &U,
        textures: &[TextureId],
        storage: &[BufferId],
    ) {
        let Some(top) = self.top_layer() else {
            return;
        };
        self.bind_layer(&top);
        self.use_pipeline(kind);
        self.frame.commands.set_uniforms(uniforms);
        self.bind_textures(textures);
        for (slot, &buffer) in storage.iter().enumerate() {
            self.bind_storage(slot as u32, buffer);
        }
        self.draw_indexed(buffers);
        trace!("{:?} draw of {} indices", kind, buffers.index_count);
    }

    pub fn render_to_clip_mask(
        &mut self,
        operation: ClipMaskOperation,
        buffers: Option<GeometryBuffers>,
        translation: Vec2,
    ) {
        let Some(top) = self.top_layer() else {
            return;
        };
        if top.depth_stencil.is_none() {
            warn!("clip mask requested on a layer without stencil");
            return;
        }
        self.set_target(top.color, top.depth_stencil);
        self.frame.restore_viewport_and_scissor();

        let test_value = self.frame.stencil_test_value;
        let (kind, reference, next_test_value) = match operation {
            ClipMaskOperation::Set => (PipelineKind::SetStencil, 1, 1),
            ClipMaskOperation::SetInverse => (PipelineKind::SetStencil, 0, 1),
            ClipMaskOperation::Intersect => (
                PipelineKind::IntersectStencil,
                test_value,
                (test_value + 1).min(MAX_STENCIL_VALUE),
            ),
        };

        if operation != ClipMaskOperation::Intersect {
            let fill = if operation == ClipMaskOperation::Set { 0 } else { 1 };
            self.frame.apply_stencil_reference(fill);
            self.use_pipeline(PipelineKind::SetStencilFullscreen);
            self.frame.commands.set_uniforms(&FilterUniforms::default());
            self.frame.commands.push(GpuCommand::DrawFullscreen);
        }

        if let Some(buffers) = buffers {
            self.frame.apply_stencil_reference(reference);
            self.use_pipeline(kind);
            let uniforms = self.geometry_uniforms(translation);
            self.frame.commands.set_uniforms(&uniforms);
            self.draw_indexed(buffers);
        }

        self.frame.stencil_test_value = next_test_value;
        let reference = self.frame.stencil_reference();
        self.frame.apply_stencil_reference(reference);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Copies
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy `source_rect` of one texture onto `target_rect` of another
    fn blit(
        &mut self,
        source: TextureId,
        source_size: (u32, u32),
        source_rect: IRect,
        target: TextureId,
        target_size: (u32, u32),
        target_rect: IRect,
    ) {
        self.set_target(target, None);
        self.frame.apply_viewport(Viewport::from_size(target_size.0, target_size.1));
        self.frame.apply_scissor_rect(target_rect);
        self.use_pipeline(PipelineKind::Blit);
        self.frame.commands.set_uniforms(&BlitUniforms {
            source_rect: source_rect.to_uv(source_size.0, source_size.1),
            target_rect: target_rect.to_uv(target_size.0, target_size.1),
        });
        self.bind_textures(&[source]);
        self.frame.commands.push(GpuCommand::DrawFullscreen);
    }

    /// Whole-buffer copy, ignoring the frame scissor
    fn blit_framebuffer(&mut self, source: &Framebuffer, target: &Framebuffer) {
        self.blit(
            source.color,
            (source.width, source.height),
            full_rect(source.width, source.height),
            target.color,
            (target.width, target.height),
            full_rect(target.width, target.height),
        );
        self.frame.restore_viewport_and_scissor();
    }

    /// Copy `bounds` of the top layer into `texture` (sized to `bounds`)
    pub fn save_top_layer(&mut self, texture: TextureId, bounds: IRect) -> bool {
        let (Some(top), Some(primary)) = (
            self.top_layer(),
            self.postprocess(PostprocessTarget::Primary),
        ) else {
            return false;
        };

        self.frame.commands.clear_target(primary.color, Color::TRANSPARENT);
        self.blit_framebuffer(&top, &primary);

        let size = (bounds.width() as u32, bounds.height() as u32);
        self.blit(
            primary.color,
            (primary.width, primary.height),
            bounds,
            texture,
            size,
            full_rect(size.0, size.1),
        );
        self.frame.restore_viewport_and_scissor();
        true
    }

    /// Capture the top layer into the blend mask buffer
    pub fn save_top_layer_as_mask(&mut self) -> bool {
        let Some(top) = self.top_layer() else {
            return false;
        };
        let (Some(primary), Some(blend_mask)) = (
            self.postprocess(PostprocessTarget::Primary),
            self.postprocess(PostprocessTarget::BlendMask),
        ) else {
            return false;
        };

        self.blit_framebuffer(&top, &primary);
        self.blit_framebuffer(&primary, &blend_mask);
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Compositing
    // ─────────────────────────────────────────────────────────────────────────

    pub fn composite(
        &mut self,
        source: LayerHandle,
        destination: LayerHandle,
        blend: LayerBlend,
        filters: &[CompiledFilter],
    ) {
        let (Some(source_layer), Some(destination_layer)) = (
            self.layers.get_layer(source).copied(),
            self.layers.get_layer(destination).copied(),
        ) else {
            warn!(
                "composite of {:?} onto {:?} references a closed layer",
                source, destination
            );
            return;
        };
        if !source_layer.is_valid() || !destination_layer.is_valid() {
            return;
        }

        let (Some(primary), Some(secondary)) = (
            self.postprocess(PostprocessTarget::Primary),
            self.postprocess(PostprocessTarget::Secondary),
        ) else {
            return;
        };
        self.frame.commands.clear_target(primary.color, Color::TRANSPARENT);
        self.frame.commands.clear_target(secondary.color, Color::TRANSPARENT);
        self.blit_framebuffer(&source_layer, &primary);

        self.render_filters(filters);

        // The chain may have swapped primary and secondary
        let Some(result) = self.postprocess(PostprocessTarget::Primary) else {
            return;
        };
        self.bind_layer(&destination_layer);
        self.use_pipeline(match blend {
            LayerBlend::Blend => PipelineKind::PassThroughBlend,
            LayerBlend::Replace => PipelineKind::PassThrough,
        });
        self.frame.commands.set_uniforms(&FilterUniforms::default());
        self.bind_textures(&[result.color]);
        self.frame.commands.push(GpuCommand::DrawFullscreen);
    }

    /// Run `filters` in order over primary; the result is left in primary
    pub fn render_filters(&mut self, filters: &[CompiledFilter]) {
        for filter in filters {
            let (Some(primary), Some(secondary)) = (
                self.postprocess(PostprocessTarget::Primary),
                self.postprocess(PostprocessTarget::Secondary),
            ) else {
                return;
            };

            match *filter {
                CompiledFilter::Passthrough { blend_factor } => {
                    self.frame.commands.push(GpuCommand::SetBlendFactor(blend_factor));
                    self.fullscreen(
                        PipelineKind::PassThroughOpacity,
                        &secondary,
                        &FilterUniforms::default(),
                        &[primary.color],
                    );
                    self.layers.swap_postprocess_primary_secondary();
                }
                CompiledFilter::Blur { sigma } => {
                    let window = self.frame.effective_scissor();
                    self.render_blur(sigma, &primary, &secondary, window);
                }
                CompiledFilter::DropShadow {
                    sigma,
                    offset,
                    color,
                } => {
                    self.render_drop_shadow(sigma, offset, color, &primary, &secondary);
                    self.layers.swap_postprocess_primary_secondary();
                }
                CompiledFilter::ColorMatrix(matrix) => {
                    // Mat4 stores columns, the layout WGSL expects
                    let uniforms = FilterUniforms {
                        color_matrix: matrix.cols,
                        ..FilterUniforms::default()
                    };
                    self.fullscreen(
                        PipelineKind::ColorMatrix,
                        &secondary,
                        &uniforms,
                        &[primary.color],
                    );
                    self.layers.swap_postprocess_primary_secondary();
                }
                CompiledFilter::MaskImage => {
                    let Some(blend_mask) = self.postprocess(PostprocessTarget::BlendMask) else {
                        continue;
                    };
                    self.fullscreen(
                        PipelineKind::MaskImage,
                        &secondary,
                        &FilterUniforms::default(),
                        &[primary.color, blend_mask.color],
                    );
                    self.layers.swap_postprocess_primary_secondary();
                }
                CompiledFilter::Invalid => {
                    warn!("skipping invalid filter in chain");
                }
            }
        }
    }

    fn render_drop_shadow(
        &mut self,
        sigma: f32,
        offset: Vec2,
        color: Color,
        primary: &Framebuffer,
        secondary: &Framebuffer,
    ) {
        let window = self.frame.effective_scissor();
        let (w, h) = (primary.width.max(1) as f32, primary.height.max(1) as f32);
        let viewport = self.frame.viewport;
        let uniforms = FilterUniforms {
            color: color.to_array(),
            // Texture space is flipped vertically relative to the screen
            uv_offset: [offset.x / -viewport.width, offset.y / viewport.height],
            tex_coord_min: [
                (window.min[0] as f32 + 0.5) / w,
                (window.min[1] as f32 + 0.5) / h,
            ],
            tex_coord_max: [
                (window.max[0] as f32 - 0.5) / w,
                (window.max[1] as f32 - 0.5) / h,
            ],
            ..FilterUniforms::default()
        };
        self.fullscreen(
            PipelineKind::DropShadow,
            secondary,
            &uniforms,
            &[primary.color],
        );

        if sigma >= MIN_SHADOW_BLUR_SIGMA {
            if let Some(tertiary) = self.postprocess(PostprocessTarget::Tertiary) {
                self.render_blur(sigma, secondary, &tertiary, window);
            }
        }

        self.fullscreen(
            PipelineKind::PassThroughBlend,
            secondary,
            &FilterUniforms::default(),
            &[primary.color],
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Blur
    // ─────────────────────────────────────────────────────────────────────────

    /// Blur `window` of `source_destination` in place, using `temp` as scratch
    pub fn render_blur(
        &mut self,
        sigma: f32,
        source_destination: &Framebuffer,
        temp: &Framebuffer,
        window: IRect,
    ) {
        if window.is_empty() {
            return;
        }
        let size = (source_destination.width, source_destination.height);
        let plan = BlurPlan::new(sigma, window, size);
        trace!(
            "blur sigma {} over {:?}: {} downscale passes",
            sigma,
            window,
            plan.downscale_passes()
        );

        // Downscale, ping-ponging between the two buffers
        let half = Viewport::from_size(size.0 / 2, size.1 / 2);
        let downscale = FilterUniforms {
            uv_scale: plan.uv_scaling,
            ..FilterUniforms::default()
        };
        for (i, &scissor) in plan.downscale_scissors.iter().enumerate() {
            let (source, target) = if i % 2 == 0 {
                (source_destination, temp)
            } else {
                (temp, source_destination)
            };
            self.frame.commands.clear_target(target.color, Color::TRANSPARENT);
            self.set_target(target.color, None);
            self.frame.apply_viewport(half);
            self.frame.apply_scissor_rect(scissor);
            self.use_pipeline(PipelineKind::PassThrough);
            self.frame.commands.set_uniforms(&downscale);
            self.bind_textures(&[source.color]);
            self.frame.commands.push(GpuCommand::DrawFullscreen);
        }

        self.frame.apply_viewport(Viewport::from_size(size.0, size.1));
        self.frame.apply_scissor_rect(plan.scissor);

        if plan.transfer_to_temp {
            self.frame.commands.clear_target(temp.color, Color::TRANSPARENT);
            self.set_target(temp.color, None);
            self.use_pipeline(PipelineKind::PassThrough);
            self.frame.commands.set_uniforms(&FilterUniforms::default());
            self.bind_textures(&[source_destination.color]);
            self.frame.commands.push(GpuCommand::DrawFullscreen);
        }

        // Separable kernel: vertical into the source, horizontal back into temp
        let weights = self.pipelines.buffers.blur_weights;
        self.frame.commands.update_buffer(weights, &plan.weights);
        let mut uniforms = BlurUniforms {
            texel_offset: [0.0, 1.0 / temp.height.max(1) as f32],
            tex_coord_min: plan.tex_coord_min,
            tex_coord_max: plan.tex_coord_max,
            ..BlurUniforms::default()
        };
        self.set_target(source_destination.color, None);
        self.use_pipeline(PipelineKind::Blur);
        self.frame.commands.set_uniforms(&uniforms);
        self.bind_textures(&[temp.color]);
        self.bind_storage(0, weights);
        self.frame.commands.push(GpuCommand::DrawFullscreen);

        if self.config.blur_edge_clear {
            // A whole-target clear also covers the 1px border the upscale samples
            self.frame.commands.clear_target(temp.color, Color::TRANSPARENT);
        }

        uniforms.texel_offset = [1.0 / source_destination.width.max(1) as f32, 0.0];
        self.set_target(temp.color, None);
        self.use_pipeline(PipelineKind::Blur);
        self.frame.commands.set_uniforms(&uniforms);
        self.bind_textures(&[source_destination.color]);
        self.bind_storage(0, weights);
        self.frame.commands.push(GpuCommand::DrawFullscreen);

        // Upscale: the plain window first, then the power-of-two aligned region
        self.blit(
            temp.color,
            size,
            plan.scissor,
            source_destination.color,
            size,
            plan.window,
        );
        if plan.needs_aligned_blit() {
            self.blit(
                temp.color,
                size,
                plan.scissor,
                source_destination.color,
                size,
                plan.aligned_target,
            );
        }

        self.frame.restore_viewport_and_scissor();
    }
}
