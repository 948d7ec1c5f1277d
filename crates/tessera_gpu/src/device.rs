//! wgpu implementation of [`GpuDevice`]
//!
//! [`WgpuDevice`] owns every GPU resource the compositor asks for and
//! executes recorded [`CommandList`]s. All pipelines share one bind group
//! layout:
//!
//! | binding | resource                         |
//! |---------|----------------------------------|
//! | 0       | uniform block (dynamic offset)   |
//! | 1, 2    | texture slots 0 and 1            |
//! | 3       | linear clamp sampler             |
//! | 4, 5    | read-only storage slots 0 and 1  |
//!
//! Unbound slots fall back to a 1x1 transparent texture and a zeroed
//! storage buffer, so every program can use the same layout.

use std::borrow::Cow;
use std::num::NonZeroU64;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use tessera_core::command::CommandList;
use tessera_core::device::{
    AssetId, BlendMode, BufferDesc, BufferId, BufferKind, GpuDevice, GpuError, LoadedTexture,
    PipelineDesc, PipelineId, ShaderProgram, StencilMode, TextureDesc, TextureId, TextureKind,
    VertexInput,
};
use tessera_core::geometry::GpuVertex;
use tessera_core::ShaderReloadHub;
use tracing::{debug, info, trace, warn};
use wgpu::util::DeviceExt;

use crate::assets;
use crate::config::WgpuDeviceConfig;
use crate::error::{BackendError, Result};
use crate::executor::{Bindings, DrawKind, FramePlan, PlannedOp, PlannedPass, UNIFORM_STRIDE};
use crate::hot_reload::{source_path, ShaderWatcher};
use crate::shaders;

const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;
const INITIAL_UNIFORM_CAPACITY: u64 = 64 * 1024;
const DUMMY_STORAGE_SIZE: u64 = 256;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x2,
    1 => Float32x2,
    2 => Float32x4,
    3 => Float32x2,
    4 => Float32x4,
];

new_key_type! {
    struct TextureKey;
    struct BufferKey;
    struct PipelineKey;
}

fn texture_key(id: TextureId) -> TextureKey {
    KeyData::from_ffi(id.0).into()
}

fn buffer_key(id: BufferId) -> BufferKey {
    KeyData::from_ffi(id.0).into()
}

fn pipeline_key(id: PipelineId) -> PipelineKey {
    KeyData::from_ffi(id.0).into()
}

struct TextureEntry {
    /// `None` for externally owned views
    texture: Option<wgpu::Texture>,
    view: wgpu::TextureView,
    size: (u32, u32),
}

struct BufferEntry {
    buffer: wgpu::Buffer,
    size: u64,
}

struct PipelineEntry {
    with_depth_stencil: wgpu::RenderPipeline,
    color_only: wgpu::RenderPipeline,
}

struct Program {
    module: wgpu::ShaderModule,
    entry_points: Vec<String>,
}

struct AssetEntry {
    path: String,
    texture: TextureId,
    dimensions: (u32, u32),
    refs: u32,
}

/// Counts from one [`WgpuDevice::execute`] call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub passes: usize,
    pub draws: usize,
    pub skipped_draws: usize,
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: WgpuDeviceConfig,
    format: wgpu::TextureFormat,

    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    dummy_view: wgpu::TextureView,
    dummy_storage: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniform_capacity: u64,
    bind_groups: FxHashMap<Bindings, wgpu::BindGroup>,

    programs: FxHashMap<ShaderProgram, Program>,
    textures: SlotMap<TextureKey, TextureEntry>,
    buffers: SlotMap<BufferKey, BufferEntry>,
    pipelines: SlotMap<PipelineKey, PipelineEntry>,

    assets: FxHashMap<AssetId, AssetEntry>,
    asset_paths: FxHashMap<String, AssetId>,
    next_asset: u64,

    reload_hub: Arc<ShaderReloadHub>,
    watcher: Option<ShaderWatcher>,
}

impl WgpuDevice {
    /// Create a headless device on the best available adapter
    pub async fn new(config: WgpuDeviceConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: Self::preferred_backends(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(BackendError::AdapterNotFound)?;

        let required_limits = wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits());
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Tessera GPU Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await?;

        info!("using adapter {:?}", adapter.get_info().name);
        Self::from_device(Arc::new(device), Arc::new(queue), config)
    }

    fn preferred_backends() -> wgpu::Backends {
        #[cfg(target_os = "macos")]
        {
            wgpu::Backends::METAL
        }
        #[cfg(target_os = "windows")]
        {
            wgpu::Backends::DX12
        }
        #[cfg(target_os = "linux")]
        {
            wgpu::Backends::VULKAN | wgpu::Backends::GL
        }
        #[cfg(target_arch = "wasm32")]
        {
            wgpu::Backends::BROWSER_WEBGPU | wgpu::Backends::GL
        }
        #[cfg(not(any(
            target_os = "macos",
            target_os = "windows",
            target_os = "linux",
            target_arch = "wasm32"
        )))]
        {
            wgpu::Backends::all()
        }
    }

    /// Share a device owned by the host engine
    pub fn from_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: WgpuDeviceConfig,
    ) -> Result<Self> {
        let format = config.target_format.to_wgpu();
        let bind_group_layout = create_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tessera pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tessera linear sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let dummy_texture = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("tessera dummy texture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[0, 0, 0, 0],
        );
        let dummy_view = dummy_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let dummy_storage = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera dummy storage"),
            size: DUMMY_STORAGE_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let uniform_buffer = create_uniform_buffer(&device, INITIAL_UNIFORM_CAPACITY);

        let watcher = match (&config.shader_dir, config.hot_reload) {
            (Some(dir), true) => Some(ShaderWatcher::new(dir)?),
            _ => None,
        };

        let mut this = Self {
            device,
            queue,
            format,
            bind_group_layout,
            pipeline_layout,
            sampler,
            dummy_view,
            dummy_storage,
            uniform_buffer,
            uniform_capacity: INITIAL_UNIFORM_CAPACITY,
            bind_groups: FxHashMap::default(),
            programs: FxHashMap::default(),
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            assets: FxHashMap::default(),
            asset_paths: FxHashMap::default(),
            next_asset: 1,
            reload_hub: Arc::new(ShaderReloadHub::new()),
            watcher,
            config,
        };
        this.load_programs()?;
        Ok(this)
    }

    fn load_programs(&mut self) -> Result<()> {
        for program in ShaderProgram::ALL {
            let overridden = self.config.shader_dir.clone().and_then(|dir| {
                let path = source_path(&dir, program);
                if !path.exists() {
                    return None;
                }
                match read_source(&path).and_then(|source| self.install_program(program, &source))
                {
                    Ok(()) => Some(()),
                    Err(e) => {
                        warn!("using built-in '{}' shader: {}", program.name(), e);
                        None
                    }
                }
            });
            if overridden.is_none() {
                self.install_program(program, shaders::builtin_source(program))?;
            }
        }
        Ok(())
    }

    fn install_program(&mut self, program: ShaderProgram, source: &str) -> Result<()> {
        let module = shaders::validate(program, source)?;
        let entry_points = module.entry_points.iter().map(|e| e.name.clone()).collect();
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(program.name()),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
            });
        self.programs.insert(
            program,
            Program {
                module,
                entry_points,
            },
        );
        debug!("installed shader program '{}'", program.name());
        Ok(())
    }

    /// Replace a program's source and notify reload subscribers
    ///
    /// The previous module stays in place when `source` fails validation.
    pub fn reload_shader(&mut self, program: ShaderProgram, source: &str) -> Result<()> {
        self.install_program(program, source)?;
        self.reload_hub.notify(program);
        Ok(())
    }

    /// Apply shader files changed since the last poll; returns the reloaded programs
    pub fn poll_shader_reloads(&mut self) -> Vec<ShaderProgram> {
        let Some(watcher) = self.watcher.as_ref() else {
            return Vec::new();
        };
        let dir = watcher.dir().to_path_buf();
        let changed = watcher.drain();

        let mut reloaded = Vec::new();
        for program in changed {
            let result = read_source(&source_path(&dir, program))
                .and_then(|source| self.reload_shader(program, &source));
            match result {
                Ok(()) => {
                    info!("reloaded shader program '{}'", program.name());
                    reloaded.push(program);
                }
                Err(e) => warn!("keeping previous '{}' shader: {}", program.name(), e),
            }
        }
        reloaded
    }

    /// Source of reload events for [`Renderer::with_shader_reload`](tessera_core::Renderer::with_shader_reload)
    pub fn reload_hub(&self) -> Arc<ShaderReloadHub> {
        Arc::clone(&self.reload_hub)
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn config(&self) -> &WgpuDeviceConfig {
        &self.config
    }

    /// Color format of every target; host output textures must match it
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    // ─────────────────────────────────────────────────────────────────────────
    // External textures
    // ─────────────────────────────────────────────────────────────────────────

    /// Make a host-owned view (swapchain image, offscreen target) addressable
    pub fn register_external_texture(
        &mut self,
        view: wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> TextureId {
        let key = self.textures.insert(TextureEntry {
            texture: None,
            view,
            size: (width, height),
        });
        TextureId(key.data().as_ffi())
    }

    pub fn unregister_external_texture(&mut self, texture: TextureId) {
        self.destroy_texture(texture);
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(texture_key(texture)).map(|entry| entry.size)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────────

    /// Encode and submit one frame's commands
    pub fn execute(&mut self, commands: &CommandList) -> FrameStats {
        let plan = FramePlan::build(commands, |id| self.texture_size(id));
        let mut stats = FrameStats {
            skipped_draws: plan.skipped_draws,
            ..Default::default()
        };

        self.ensure_uniform_capacity(plan.uniforms.len() as u64);
        if !plan.uniforms.is_empty() {
            self.queue.write_buffer(&self.uniform_buffer, 0, &plan.uniforms);
        }
        let staging = (!plan.staging.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("tessera staging"),
                    contents: &plan.staging,
                    usage: wgpu::BufferUsages::COPY_SRC,
                })
        });

        for pass in plan.passes() {
            for draw in &pass.draws {
                self.ensure_bind_group(&draw.bindings);
            }
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tessera frame"),
            });

        for op in &plan.ops {
            match op {
                PlannedOp::Clear { target, color } => {
                    let Some(entry) = self.textures.get(texture_key(*target)) else {
                        warn!("clear of unknown texture {:?} skipped", target);
                        continue;
                    };
                    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("tessera clear"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &entry.view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color {
                                    r: color.r as f64,
                                    g: color.g as f64,
                                    b: color.b as f64,
                                    a: color.a as f64,
                                }),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                }
                PlannedOp::Upload {
                    buffer,
                    staging_offset,
                    size,
                } => {
                    let (Some(staging), Some(entry)) =
                        (staging.as_ref(), self.buffers.get(buffer_key(*buffer)))
                    else {
                        warn!("upload into unknown buffer {:?} skipped", buffer);
                        continue;
                    };
                    if *size > entry.size {
                        warn!(
                            "upload of {} bytes exceeds buffer {:?} ({} bytes)",
                            size, buffer, entry.size
                        );
                        continue;
                    }
                    encoder.copy_buffer_to_buffer(staging, *staging_offset, &entry.buffer, 0, *size);
                }
                PlannedOp::Pass(pass) => {
                    stats.passes += 1;
                    stats.draws += self.encode_pass(&mut encoder, pass, &mut stats.skipped_draws);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        trace!("executed frame: {:?}", stats);
        stats
    }

    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PlannedPass,
        skipped: &mut usize,
    ) -> usize {
        let Some(color) = self.textures.get(texture_key(pass.color)) else {
            *skipped += pass.draws.len();
            return 0;
        };
        let depth_stencil = pass.depth_stencil.and_then(|id| {
            let entry = self.textures.get(texture_key(id));
            if entry.is_none() {
                warn!("depth/stencil {:?} missing, drawing without it", id);
            }
            entry
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("tessera pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &color.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth_stencil.map(|entry| {
                wgpu::RenderPassDepthStencilAttachment {
                    view: &entry.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let mut drawn = 0;
        for draw in &pass.draws {
            let (Some(pipeline), Some(bind_group)) = (
                self.pipelines.get(pipeline_key(draw.pipeline)),
                self.bind_groups.get(&draw.bindings),
            ) else {
                *skipped += 1;
                continue;
            };
            let pipeline = if depth_stencil.is_some() {
                &pipeline.with_depth_stencil
            } else {
                &pipeline.color_only
            };

            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, bind_group, &[draw.uniform_offset]);
            let [x, y, width, height] = draw.viewport;
            render_pass.set_viewport(x, y, width, height, 0.0, 1.0);
            render_pass.set_scissor_rect(
                draw.scissor.x,
                draw.scissor.y,
                draw.scissor.width,
                draw.scissor.height,
            );
            render_pass.set_stencil_reference(draw.stencil_reference);
            let factor = draw.blend_factor as f64;
            render_pass.set_blend_constant(wgpu::Color {
                r: factor,
                g: factor,
                b: factor,
                a: factor,
            });

            match draw.kind {
                DrawKind::Indexed {
                    vertex_buffer,
                    index_buffer,
                    index_count,
                } => {
                    let (Some(vertices), Some(indices)) = (
                        self.buffers.get(buffer_key(vertex_buffer)),
                        self.buffers.get(buffer_key(index_buffer)),
                    ) else {
                        *skipped += 1;
                        continue;
                    };
                    render_pass.set_vertex_buffer(0, vertices.buffer.slice(..));
                    render_pass.set_index_buffer(indices.buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..index_count, 0, 0..1);
                }
                DrawKind::Fullscreen => render_pass.draw(0..3, 0..1),
            }
            drawn += 1;
        }
        drawn
    }

    fn ensure_uniform_capacity(&mut self, required: u64) {
        if required <= self.uniform_capacity {
            return;
        }
        let capacity = required.next_power_of_two();
        debug!("growing uniform buffer to {} bytes", capacity);
        self.uniform_buffer = create_uniform_buffer(&self.device, capacity);
        self.uniform_capacity = capacity;
        self.bind_groups.clear();
    }

    fn ensure_bind_group(&mut self, bindings: &Bindings) {
        if self.bind_groups.contains_key(bindings) {
            return;
        }

        let mut views = [&self.dummy_view; 2];
        for (view, texture) in views.iter_mut().zip(bindings.textures) {
            if let Some(texture) = texture {
                match self.textures.get(texture_key(texture)) {
                    Some(entry) => *view = &entry.view,
                    None => {
                        warn!("draw binds unknown texture {:?}", texture);
                        return;
                    }
                }
            }
        }
        let mut storage = [&self.dummy_storage; 2];
        for (slot, buffer) in storage.iter_mut().zip(bindings.storage) {
            if let Some(buffer) = buffer {
                match self.buffers.get(buffer_key(buffer)) {
                    Some(entry) => *slot = &entry.buffer,
                    None => {
                        warn!("draw binds unknown buffer {:?}", buffer);
                        return;
                    }
                }
            }
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tessera bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniform_buffer,
                        offset: 0,
                        size: NonZeroU64::new(UNIFORM_STRIDE as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(views[1]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: storage[0].as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: storage[1].as_entire_binding(),
                },
            ],
        });
        self.bind_groups.insert(*bindings, bind_group);
    }

    fn forget_texture_bindings(&mut self, texture: TextureId) {
        self.bind_groups
            .retain(|bindings, _| !bindings.textures.contains(&Some(texture)));
    }

    fn forget_buffer_bindings(&mut self, buffer: BufferId) {
        self.bind_groups
            .retain(|bindings, _| !bindings.storage.contains(&Some(buffer)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Readback
    // ─────────────────────────────────────────────────────────────────────────

    /// Copy a texture back to tightly packed RGBA8, blocking until done
    pub fn read_texture_rgba(&self, texture: TextureId) -> tessera_core::Result<Vec<u8>> {
        let entry = self
            .textures
            .get(texture_key(texture))
            .ok_or_else(|| GpuError::UnknownResource(format!("{:?}", texture)))?;
        let Some(source) = entry.texture.as_ref() else {
            return Err(GpuError::UnknownResource(format!(
                "{:?} is an external view",
                texture
            )));
        };

        let (width, height) = entry.size;
        let unpadded = width * 4;
        let bytes_per_row = unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera readback"),
            size: (bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tessera readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        let mapped = receiver
            .recv()
            .map_err(|e| e.to_string())
            .and_then(|result| result.map_err(|e| e.to_string()));
        if let Err(reason) = mapped {
            return Err(GpuError::ResourceCreation {
                kind: "readback",
                reason,
            });
        }

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        for row in data.chunks(bytes_per_row as usize).take(height as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(data);
        buffer.unmap();

        if self.config.target_format.swaps_red_blue() {
            assets::swap_red_blue(&mut pixels);
        }
        Ok(pixels)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipelines
    // ─────────────────────────────────────────────────────────────────────────

    fn build_pipeline(
        &self,
        desc: &PipelineDesc,
        module: &wgpu::ShaderModule,
        with_depth_stencil: bool,
    ) -> wgpu::RenderPipeline {
        let geometry_layout = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GpuVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        }];
        let buffers: &[wgpu::VertexBufferLayout] = match desc.vertex_input {
            VertexInput::Geometry => &geometry_layout,
            VertexInput::Fullscreen => &[],
        };

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some(desc.vertex_entry),
                    buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(desc.fragment_entry),
                    targets: &[Some(color_target(self.format, desc.blend))],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: with_depth_stencil.then(|| depth_stencil_state(desc.stencil)),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
    }

    fn create_wgpu_texture(&self, desc: &TextureDesc) -> TextureEntry {
        let (format, usage) = match desc.kind {
            TextureKind::DepthStencil => {
                (DEPTH_STENCIL_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT)
            }
            TextureKind::Sampled | TextureKind::RenderTarget => (
                self.format,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
            ),
        };
        let size = (desc.width.max(1), desc.height.max(1));
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        TextureEntry {
            texture: Some(texture),
            view,
            size,
        }
    }

    fn load_asset_texture(&mut self, path: &str) -> tessera_core::Result<(TextureId, (u32, u32))> {
        let resolved = assets::resolve(&self.config.asset_root, path)
            .filter(|p| p.is_file())
            .ok_or_else(|| GpuError::AssetNotFound(path.to_string()))?;
        let image = assets::decode(&resolved).map_err(|e| GpuError::ResourceCreation {
            kind: "texture asset",
            reason: e.to_string(),
        })?;

        let texture = self.create_texture(&TextureDesc {
            label: "texture_asset",
            width: image.width,
            height: image.height,
            kind: TextureKind::Sampled,
        })?;
        if let Err(e) = self.upload_texture(texture, &image.pixels, image.dimensions()) {
            self.destroy_texture(texture);
            return Err(e);
        }
        Ok((texture, image.dimensions()))
    }
}

impl GpuDevice for WgpuDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> tessera_core::Result<TextureId> {
        let entry = self.create_wgpu_texture(desc);
        trace!(
            "created texture '{}' {}x{} ({:?})",
            desc.label,
            entry.size.0,
            entry.size.1,
            desc.kind
        );
        let key = self.textures.insert(entry);
        Ok(TextureId(key.data().as_ffi()))
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        data: &[u8],
        dimensions: (u32, u32),
    ) -> tessera_core::Result<()> {
        let entry = self
            .textures
            .get(texture_key(texture))
            .ok_or_else(|| GpuError::UnknownResource(format!("{:?}", texture)))?;
        let Some(target) = entry.texture.as_ref() else {
            return Err(GpuError::UnknownResource(format!(
                "{:?} is an external view",
                texture
            )));
        };

        let expected = entry.size.0 as usize * entry.size.1 as usize * 4;
        if dimensions != entry.size || data.len() != expected {
            return Err(GpuError::UploadSize {
                expected,
                got: data.len(),
            });
        }

        let swizzled;
        let data = if self.config.target_format.swaps_red_blue() {
            let mut copy = data.to_vec();
            assets::swap_red_blue(&mut copy);
            swizzled = copy;
            swizzled.as_slice()
        } else {
            data
        };

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * dimensions.0),
                rows_per_image: Some(dimensions.1),
            },
            wgpu::Extent3d {
                width: dimensions.0,
                height: dimensions.1,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture_key(texture)).is_some() {
            self.forget_texture_bindings(texture);
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> tessera_core::Result<BufferId> {
        let usage = match desc.kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Storage => wgpu::BufferUsages::STORAGE,
        } | wgpu::BufferUsages::COPY_DST;
        let size = desc
            .size
            .max(wgpu::COPY_BUFFER_ALIGNMENT)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage,
            mapped_at_creation: false,
        });
        trace!("created buffer '{}' ({} bytes)", desc.label, size);
        let key = self.buffers.insert(BufferEntry { buffer, size });
        Ok(BufferId(key.data().as_ffi()))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(entry) = self.buffers.remove(buffer_key(buffer)) {
            entry.buffer.destroy();
            self.forget_buffer_bindings(buffer);
        }
    }

    fn shader_ready(&self, program: ShaderProgram) -> bool {
        self.programs.contains_key(&program)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> tessera_core::Result<PipelineId> {
        let program = self
            .programs
            .get(&desc.program)
            .ok_or(GpuError::ShaderNotReady(desc.program))?;
        for entry in [desc.vertex_entry, desc.fragment_entry] {
            if !program.entry_points.iter().any(|e| e == entry) {
                return Err(GpuError::ResourceCreation {
                    kind: "pipeline",
                    reason: format!(
                        "'{}' has no entry point '{}'",
                        desc.program.name(),
                        entry
                    ),
                });
            }
        }

        let entry = PipelineEntry {
            with_depth_stencil: self.build_pipeline(desc, &program.module, true),
            color_only: self.build_pipeline(desc, &program.module, false),
        };
        debug!("created pipeline '{}'", desc.label);
        let key = self.pipelines.insert(entry);
        Ok(PipelineId(key.data().as_ffi()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(pipeline_key(pipeline));
    }

    fn load_texture_asset(&mut self, path: &str) -> tessera_core::Result<LoadedTexture> {
        if let Some(&asset) = self.asset_paths.get(path) {
            if let Some(entry) = self.assets.get_mut(&asset) {
                entry.refs += 1;
                return Ok(LoadedTexture {
                    asset,
                    texture: entry.texture,
                    dimensions: entry.dimensions,
                });
            }
        }

        let (texture, dimensions) = self.load_asset_texture(path)?;
        let asset = AssetId(self.next_asset);
        self.next_asset += 1;
        self.assets.insert(
            asset,
            AssetEntry {
                path: path.to_string(),
                texture,
                dimensions,
                refs: 1,
            },
        );
        self.asset_paths.insert(path.to_string(), asset);
        debug!("loaded texture asset '{}' ({}x{})", path, dimensions.0, dimensions.1);
        Ok(LoadedTexture {
            asset,
            texture,
            dimensions,
        })
    }

    fn release_asset(&mut self, asset: AssetId) {
        let Some(entry) = self.assets.get_mut(&asset) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return;
        }
        if let Some(entry) = self.assets.remove(&asset) {
            self.asset_paths.remove(&entry.path);
            self.destroy_texture(entry.texture);
            debug!("released texture asset '{}'", entry.path);
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| BackendError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn create_uniform_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tessera uniforms"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let texture = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    let storage = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("tessera bind group layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(UNIFORM_STRIDE as u64),
                },
                count: None,
            },
            texture(1),
            texture(2),
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            storage(4),
            storage(5),
        ],
    })
}

fn color_target(format: wgpu::TextureFormat, blend: BlendMode) -> wgpu::ColorTargetState {
    let constant_scale = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Constant,
        dst_factor: wgpu::BlendFactor::Zero,
        operation: wgpu::BlendOperation::Add,
    };
    let (blend, write_mask) = match blend {
        BlendMode::Opaque => (None, wgpu::ColorWrites::ALL),
        BlendMode::Premultiplied => (
            Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            wgpu::ColorWrites::ALL,
        ),
        BlendMode::ConstantScale => (
            Some(wgpu::BlendState {
                color: constant_scale,
                alpha: constant_scale,
            }),
            wgpu::ColorWrites::ALL,
        ),
        BlendMode::NoColorWrites => (None, wgpu::ColorWrites::empty()),
    };
    wgpu::ColorTargetState {
        format,
        blend,
        write_mask,
    }
}

fn depth_stencil_state(mode: StencilMode) -> wgpu::DepthStencilState {
    let (compare, pass_op, write_mask) = match mode {
        StencilMode::Test => (wgpu::CompareFunction::LessEqual, wgpu::StencilOperation::Keep, 0),
        StencilMode::Replace => (wgpu::CompareFunction::Always, wgpu::StencilOperation::Replace, 0xff),
        StencilMode::Increment => (
            wgpu::CompareFunction::Equal,
            wgpu::StencilOperation::IncrementClamp,
            0xff,
        ),
    };
    let face = wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    };
    wgpu::DepthStencilState {
        format: DEPTH_STENCIL_FORMAT,
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Always,
        stencil: wgpu::StencilState {
            front: face,
            back: face,
            read_mask: 0xff,
            write_mask,
        },
        bias: wgpu::DepthBiasState::default(),
    }
}
