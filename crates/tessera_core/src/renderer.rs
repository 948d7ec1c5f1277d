//! Frame orchestrator
//!
//! [`Renderer`] owns every resource pool and implements [`RenderInterface`].
//! A frame is opened with [`Renderer::begin`], filled by the UI library and
//! closed with [`Renderer::end`], which hands back the recorded
//! [`CommandList`] for the backend to execute.
//!
//! Pipelines are built lazily by [`Renderer::init_shaders`] on the first draw
//! of a frame. While a shader program is still loading every draw is skipped;
//! nothing is cached as failed, so the next frame simply tries again.
//!
//! The list returned by `end` must be executed before the next `begin`.
//! Resources released while a frame is open stay alive until then.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::command::{CommandList, GpuCommand};
use crate::config::RendererConfig;
use crate::device::{GpuDevice, ShaderProgram, TextureId};
use crate::filter::{compile_filter, CompiledFilter};
use crate::frame::RenderFrameState;
use crate::geometry::{CompiledGeometry, GeometryBuffers, Vertex};
use crate::handle::{FilterHandle, GeometryHandle, LayerHandle, ShaderHandle, TextureHandle};
use crate::interface::{ClipMaskOperation, FontAtlasFlush, LayerBlend, RenderInterface};
use crate::layer::RenderLayerStack;
use crate::math::{IRect, Mat4, Vec2, Viewport};
use crate::params::Parameters;
use crate::passes::Passes;
use crate::pipeline::{PipelineKind, PipelineSet, ReadyPipelines};
use crate::reload::{ReloadSubscription, ShaderReloadSource};
use crate::retire::{DeferredDestroy, RetiredResources};
use crate::shader::{compile_shader, CompiledShader};
use crate::slot::SlotTable;
use crate::texture::{content_path, TextureRegistry};
use crate::uniforms::{CreationUniforms, GradientUniforms};

fn program_bit(program: ShaderProgram) -> u32 {
    1 << program as u32
}

pub struct Renderer<D: GpuDevice> {
    device: D,
    config: RendererConfig,
    geometries: SlotTable<GeometryHandle, CompiledGeometry>,
    filters: SlotTable<FilterHandle, CompiledFilter>,
    shaders: SlotTable<ShaderHandle, CompiledShader>,
    textures: TextureRegistry,
    layers: RenderLayerStack,
    pipelines: PipelineSet,
    /// Released during the open frame, destroyed at the next `begin`
    retired: RetiredResources,
    frame: Option<RenderFrameState>,
    /// Viewport of the last frame, used by compiles issued between frames
    viewport: Viewport,
    time: f32,
    font_flusher: Option<Box<dyn FontAtlasFlush>>,
    /// One bit per [`ShaderProgram`] reloaded since the last `init_shaders`
    stale_programs: Arc<AtomicU32>,
    _reload: Option<ReloadSubscription>,
}

impl<D: GpuDevice> Renderer<D> {
    pub fn new(device: D, config: RendererConfig) -> Self {
        Self {
            device,
            config,
            geometries: SlotTable::new(),
            filters: SlotTable::new(),
            shaders: SlotTable::new(),
            textures: TextureRegistry::new(),
            layers: RenderLayerStack::new(),
            pipelines: PipelineSet::new(),
            retired: RetiredResources::new(),
            frame: None,
            viewport: Viewport::default(),
            time: 0.0,
            font_flusher: None,
            stale_programs: Arc::new(AtomicU32::new(0)),
            _reload: None,
        }
    }

    /// Renderer whose pipelines are rebuilt whenever `source` reports a reload
    ///
    /// The subscription is dropped together with the renderer.
    pub fn with_shader_reload(
        device: D,
        config: RendererConfig,
        source: Arc<dyn ShaderReloadSource>,
    ) -> Self {
        let mut renderer = Self::new(device, config);
        let stale = Arc::clone(&renderer.stale_programs);
        renderer._reload = Some(ReloadSubscription::new(
            source,
            Arc::new(move |program| {
                stale.fetch_or(program_bit(program), Ordering::AcqRel);
            }),
        ));
        renderer
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frame lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Build missing pipelines, rebuilding those whose program was reloaded
    ///
    /// Returns `false` while any shader program is unavailable.
    pub fn init_shaders(&mut self) -> bool {
        let stale = self.stale_programs.swap(0, Ordering::AcqRel);
        let mut device =
            DeferredDestroy::new(&mut self.device, &mut self.retired, self.frame.is_some());
        if stale != 0 {
            for program in ShaderProgram::ALL {
                if stale & program_bit(program) != 0 {
                    debug!("rebuilding pipelines of reloaded program '{}'", program.name());
                    self.pipelines.invalidate_program(&mut device, program);
                }
            }
        }
        self.pipelines.ensure(&mut device)
    }

    /// Open a frame rendering into `output`
    ///
    /// # Panics
    ///
    /// Panics if a frame is already open.
    pub fn begin(&mut self, output: TextureId, viewport: Viewport) {
        assert!(self.frame.is_none(), "begin called while a frame is open");

        if !self.retired.is_empty() {
            trace!("destroying {} retired resources", self.retired.len());
            self.retired.release(&mut self.device);
        }
        self.viewport = viewport;
        let mut frame = RenderFrameState::new(viewport);
        let (width, height) = viewport.pixel_size();
        self.layers.begin_frame(&mut self.device, &mut frame.commands, width, height, output);
        frame.restore_viewport_and_scissor();
        frame.apply_stencil_reference(0);

        debug!("frame begin {}x{}", width, height);
        self.frame = Some(frame);
    }

    /// Close the frame and return its commands
    ///
    /// # Panics
    ///
    /// Panics without a matching `begin` or when layers are left pushed.
    pub fn end(&mut self) -> CommandList {
        let Some(mut frame) = self.frame.take() else {
            panic!("end called without a matching begin");
        };

        if let Some(root) = self.layers.top_layer().copied() {
            frame.commands.push(GpuCommand::SetRenderTarget {
                color: root.color,
                depth_stencil: root.depth_stencil,
            });
        }
        self.layers.end_frame();

        if self.config.warn_unconsumed_override {
            if let Some(handle) = self.textures.pending_override() {
                warn!("texture override {:?} was not consumed this frame", handle);
            }
        }
        if let Some(flusher) = self.font_flusher.as_mut() {
            flusher.flush_font_atlases();
        }

        debug!(
            "frame end: {} commands, {} draws",
            frame.commands.len(),
            frame.commands.draw_count()
        );
        frame.commands
    }

    /// Clock driving procedural shaders, in seconds
    pub fn set_time(&mut self, time: f32) {
        self.time = time;
    }

    pub fn set_font_flusher(&mut self, flusher: Box<dyn FontAtlasFlush>) {
        self.font_flusher = Some(flusher);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Textures
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a font atlas owned by the font engine
    pub fn register_font_texture(
        &mut self,
        texture: TextureId,
        dimensions: (u32, u32),
    ) -> TextureHandle {
        self.textures.register(texture, dimensions, true)
    }

    /// Register an externally owned texture drawn with the image pipeline
    pub fn register_texture(
        &mut self,
        texture: TextureId,
        dimensions: (u32, u32),
    ) -> TextureHandle {
        self.textures.register(texture, dimensions, false)
    }

    pub fn texture_handle(&self, texture: TextureId) -> TextureHandle {
        self.textures.handle_of(texture)
    }

    /// Hand `handle` to the next `generate_texture` call with empty data
    pub fn hook_generate_override(&mut self, handle: TextureHandle) {
        self.textures.hook_generate_override(handle);
    }

    /// Release every texture and geometry buffer
    ///
    /// Inside a frame the GPU objects are destroyed at the next `begin`.
    pub fn release_resources(&mut self) {
        let deferring = self.frame.is_some();
        if !deferring {
            self.retired.release(&mut self.device);
        }
        let mut device = DeferredDestroy::new(&mut self.device, &mut self.retired, deferring);
        self.textures.release_all(&mut device);
        for mut geometry in self.geometries.drain() {
            geometry.dispose(&mut device);
        }
        debug!("released renderer resources");
    }

    /// Destroy every GPU resource the renderer owns; also run on drop
    pub fn shutdown(&mut self) {
        if self.frame.take().is_some() {
            warn!("renderer shut down inside an open frame");
        }
        self.layers.abandon_frame();
        self.release_resources();
        self.layers.destroy_framebuffers(&mut self.device);
        self.pipelines.destroy(&mut self.device);
    }

    /// Destroy resources released during the last frame
    ///
    /// Call once the frame's command list has executed to free them before
    /// the next `begin`. Ignored while a frame is open.
    pub fn release_retired(&mut self) {
        if self.frame.is_none() {
            self.retired.release(&mut self.device);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// State of the open frame
    pub fn state(&self) -> Option<&RenderFrameState> {
        self.frame.as_ref()
    }

    pub fn layers(&self) -> &RenderLayerStack {
        &self.layers
    }

    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&CompiledGeometry> {
        self.geometries.get(handle)
    }

    pub fn filter(&self, handle: FilterHandle) -> Option<&CompiledFilter> {
        self.filters.get(handle)
    }

    pub fn shader(&self, handle: ShaderHandle) -> Option<&CompiledShader> {
        self.shaders.get(handle)
    }

    /// Physical filter slots, reserved or free
    pub fn filter_capacity(&self) -> usize {
        self.filters.capacity()
    }

    pub fn pipelines_ready(&self) -> bool {
        self.pipelines.is_ready()
    }

    /// Resources waiting for the recorded frame to execute
    pub fn retired(&self) -> &RetiredResources {
        &self.retired
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Pipelines for a draw, or `None` when the draw must be skipped
    fn prepare(&mut self) -> Option<ReadyPipelines> {
        if self.frame.is_none() {
            warn!("draw issued outside of begin/end ignored");
            return None;
        }
        if !self.init_shaders() {
            trace!("shaders not ready, skipping draw");
            return None;
        }
        self.pipelines.ready()
    }

    fn passes(&mut self, pipelines: ReadyPipelines) -> Option<Passes<'_, D>> {
        Some(Passes {
            device: &mut self.device,
            layers: &mut self.layers,
            frame: self.frame.as_mut()?,
            pipelines,
            config: &self.config,
        })
    }

    fn flush_geometry(&mut self, handle: GeometryHandle) -> Option<GeometryBuffers> {
        let frame = self.frame.as_mut()?;
        let mut device = DeferredDestroy::new(&mut self.device, &mut self.retired, true);
        self.geometries
            .get_mut(handle)?
            .flush(&mut device, &mut frame.commands)
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: GpuDevice> RenderInterface for Renderer<D> {
    fn compile_geometry(&mut self, vertices: &[Vertex], indices: &[i32]) -> GeometryHandle {
        let viewport = self.frame.as_ref().map_or(self.viewport, |f| f.viewport);
        let (handle, geometry) = self.geometries.reserve();
        geometry.compile(vertices, indices, &viewport);
        handle
    }

    fn render_geometry(
        &mut self,
        geometry: GeometryHandle,
        translation: Vec2,
        texture: TextureHandle,
    ) {
        let Some(pipelines) = self.prepare() else {
            return;
        };
        let (kind, texture) = if texture.is_valid() {
            match self.textures.get(texture) {
                Some(entry) if entry.is_font => (PipelineKind::Font, Some(entry.texture)),
                Some(entry) => (PipelineKind::Image, Some(entry.texture)),
                None => {
                    trace!("skipping draw with released texture {:?}", texture);
                    return;
                }
            }
        } else {
            (PipelineKind::Color, None)
        };
        let Some(buffers) = self.flush_geometry(geometry) else {
            return;
        };
        if let Some(mut passes) = self.passes(pipelines) {
            let uniforms = passes.geometry_uniforms(translation);
            passes.draw_geometry(kind, buffers, &uniforms, texture.as_slice(), &[]);
        }
    }

    fn release_geometry(&mut self, geometry: GeometryHandle) {
        self.geometries.release(geometry);
    }

    fn load_texture(&mut self, source: &str) -> (TextureHandle, (u32, u32)) {
        let path = content_path(source, self.config.asset_extension.as_deref());
        self.textures.load(&mut self.device, &path)
    }

    fn generate_texture(&mut self, data: &[u8], dimensions: (u32, u32)) -> TextureHandle {
        self.textures.generate(&mut self.device, data, dimensions)
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        let mut device =
            DeferredDestroy::new(&mut self.device, &mut self.retired, self.frame.is_some());
        self.textures.release(&mut device, texture);
    }

    fn enable_scissor_region(&mut self, enable: bool) {
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        frame.use_scissor = enable;
        let rect = frame.effective_scissor();
        frame.apply_scissor_rect(rect);
    }

    fn set_scissor_region(&mut self, region: IRect) {
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        if frame.use_scissor && frame.scissor == region {
            return;
        }
        frame.scissor = region;
        frame.use_scissor = true;
        frame.apply_scissor_rect(region);
    }

    fn enable_clip_mask(&mut self, enable: bool) {
        let Some(frame) = self.frame.as_mut() else {
            return;
        };
        frame.use_stencil = enable;
        let reference = frame.stencil_reference();
        frame.apply_stencil_reference(reference);
    }

    fn render_to_clip_mask(
        &mut self,
        operation: ClipMaskOperation,
        geometry: GeometryHandle,
        translation: Vec2,
    ) {
        let Some(pipelines) = self.prepare() else {
            return;
        };
        let buffers = self.flush_geometry(geometry);
        if let Some(mut passes) = self.passes(pipelines) {
            passes.render_to_clip_mask(operation, buffers, translation);
        }
    }

    fn set_transform(&mut self, transform: Option<&Mat4>) {
        if let Some(frame) = self.frame.as_mut() {
            frame.set_transform(transform);
        }
    }

    fn push_layer(&mut self) -> LayerHandle {
        let Some(frame) = self.frame.as_mut() else {
            panic!("push_layer called outside of a frame");
        };
        self.layers.push_layer(&mut self.device, &mut frame.commands, None)
    }

    fn composite_layers(
        &mut self,
        source: LayerHandle,
        destination: LayerHandle,
        blend: LayerBlend,
        filters: &[FilterHandle],
    ) {
        let Some(pipelines) = self.prepare() else {
            return;
        };
        // Released handles run as invalid filters and are skipped with a warning
        let chain: SmallVec<[CompiledFilter; 8]> = filters
            .iter()
            .map(|&handle| self.filters.get(handle).copied().unwrap_or_default())
            .collect();
        if let Some(mut passes) = self.passes(pipelines) {
            passes.composite(source, destination, blend, &chain);
        }
    }

    fn pop_layer(&mut self) {
        self.layers.pop_layer();
    }

    fn save_layer_as_texture(&mut self) -> TextureHandle {
        let Some(pipelines) = self.prepare() else {
            return TextureHandle::INVALID;
        };
        let (width, height) = self.layers.dimensions();
        let Some(bounds) = self
            .frame
            .as_ref()
            .map(|f| f.effective_scissor().clamp_to(width, height))
        else {
            return TextureHandle::INVALID;
        };
        if bounds.is_empty() {
            warn!("save_layer_as_texture with empty bounds {:?}", bounds);
            return TextureHandle::INVALID;
        }

        let size = (bounds.width() as u32, bounds.height() as u32);
        let handle = self.textures.allocate(&mut self.device, size);
        let Some(texture) = self.textures.get(handle).map(|e| e.texture) else {
            return TextureHandle::INVALID;
        };
        let saved = self
            .passes(pipelines)
            .is_some_and(|mut passes| passes.save_top_layer(texture, bounds));
        if saved {
            handle
        } else {
            TextureHandle::INVALID
        }
    }

    fn save_layer_as_mask_image(&mut self) -> FilterHandle {
        let Some(pipelines) = self.prepare() else {
            return FilterHandle::INVALID;
        };
        let saved = self
            .passes(pipelines)
            .is_some_and(|mut passes| passes.save_top_layer_as_mask());
        if !saved {
            return FilterHandle::INVALID;
        }
        self.filters.insert(CompiledFilter::MaskImage)
    }

    fn compile_filter(&mut self, name: &str, parameters: &Parameters) -> FilterHandle {
        match compile_filter(name, parameters) {
            Some(filter) => self.filters.insert(filter),
            None => FilterHandle::INVALID,
        }
    }

    fn release_filter(&mut self, filter: FilterHandle) {
        self.filters.release(filter);
    }

    fn compile_shader(&mut self, name: &str, parameters: &Parameters) -> ShaderHandle {
        match compile_shader(name, parameters) {
            Some(shader) => self.shaders.insert(shader),
            None => ShaderHandle::INVALID,
        }
    }

    fn render_shader(
        &mut self,
        shader: ShaderHandle,
        geometry: GeometryHandle,
        translation: Vec2,
        _texture: TextureHandle,
    ) {
        let Some(pipelines) = self.prepare() else {
            return;
        };
        if self.shaders.get(shader).is_none() {
            return;
        }
        let Some(buffers) = self.flush_geometry(geometry) else {
            return;
        };
        let (Some(compiled), Some(frame)) = (self.shaders.get(shader), self.frame.as_mut()) else {
            return;
        };
        let view_projection = frame.view_projection.cols;
        let transform = frame.transform.cols;
        let mut passes = Passes {
            device: &mut self.device,
            layers: &mut self.layers,
            frame,
            pipelines,
            config: &self.config,
        };

        match compiled {
            CompiledShader::Gradient(gradient) => {
                let stops = pipelines.buffers;
                let commands = &mut passes.frame.commands;
                commands.update_buffer(stops.stop_positions, gradient.stop_positions.as_slice());
                commands.update_buffer(stops.stop_colors, gradient.stop_colors.as_slice());
                let uniforms = GradientUniforms {
                    view_projection,
                    transform,
                    function: gradient.function as u32,
                    num_stops: gradient.num_stops(),
                    p: gradient.p.to_array(),
                    v: gradient.v.to_array(),
                    offset: translation.to_array(),
                };
                passes.draw_geometry(
                    PipelineKind::Gradient,
                    buffers,
                    &uniforms,
                    &[],
                    &[stops.stop_colors, stops.stop_positions],
                );
            }
            CompiledShader::Creation { dimensions } => {
                let uniforms = CreationUniforms {
                    view_projection,
                    transform,
                    offset: translation.to_array(),
                    dimensions: dimensions.to_array(),
                    time: self.time,
                    _pad: [0.0; 3],
                };
                passes.draw_geometry(PipelineKind::Creation, buffers, &uniforms, &[], &[]);
            }
            CompiledShader::Invalid => {}
        }
    }

    fn release_shader(&mut self, shader: ShaderHandle) {
        self.shaders.release(shader);
    }
}
