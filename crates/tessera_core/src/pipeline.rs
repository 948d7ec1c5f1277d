//! Pipeline state objects
//!
//! Pipelines are created lazily the first time a frame needs them and
//! rebuilt after a shader reload. Missing shader programs are not cached as
//! a failure: [`PipelineSet::ensure`] simply returns `false` and is retried
//! on the next call.

use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::blur::BLUR_NUM_WEIGHTS;
use crate::device::{
    BlendMode, BufferDesc, BufferId, BufferKind, GpuDevice, PipelineDesc, PipelineId,
    ShaderProgram, StencilMode, VertexInput,
};
use crate::shader::MAX_NUM_STOPS;

/// Every pipeline the compositor draws with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Color,
    Image,
    Font,
    /// Geometry writes the stencil reference
    SetStencil,
    /// Geometry increments matching stencil values
    IntersectStencil,
    /// Fullscreen stencil fill
    SetStencilFullscreen,
    /// Fullscreen copy overwriting the destination
    PassThrough,
    /// Fullscreen premultiplied-alpha composite
    PassThroughBlend,
    /// Fullscreen copy scaled by the blend factor
    PassThroughOpacity,
    Blur,
    DropShadow,
    ColorMatrix,
    MaskImage,
    Gradient,
    Creation,
    Blit,
}

/// Number of [`PipelineKind`] variants
pub const NUM_PIPELINES: usize = 16;

impl PipelineKind {
    pub const ALL: [PipelineKind; NUM_PIPELINES] = [
        PipelineKind::Color,
        PipelineKind::Image,
        PipelineKind::Font,
        PipelineKind::SetStencil,
        PipelineKind::IntersectStencil,
        PipelineKind::SetStencilFullscreen,
        PipelineKind::PassThrough,
        PipelineKind::PassThroughBlend,
        PipelineKind::PassThroughOpacity,
        PipelineKind::Blur,
        PipelineKind::DropShadow,
        PipelineKind::ColorMatrix,
        PipelineKind::MaskImage,
        PipelineKind::Gradient,
        PipelineKind::Creation,
        PipelineKind::Blit,
    ];

    /// Position in [`PipelineKind::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn desc(self) -> PipelineDesc {
        use PipelineKind as K;

        let geometry = |label, program, fragment_entry, blend, stencil| PipelineDesc {
            label,
            program,
            vertex_entry: "vs_main",
            fragment_entry,
            vertex_input: VertexInput::Geometry,
            blend,
            stencil,
        };
        let fullscreen = |label, program, fragment_entry, blend, stencil| PipelineDesc {
            label,
            program,
            vertex_entry: "vs_fullscreen",
            fragment_entry,
            vertex_input: VertexInput::Fullscreen,
            blend,
            stencil,
        };

        let premul = BlendMode::Premultiplied;
        let test = StencilMode::Test;
        match self {
            K::Color => geometry("color", ShaderProgram::Basic, "fs_color", premul, test),
            K::Image => geometry("image", ShaderProgram::Basic, "fs_image", premul, test),
            K::Font => geometry("font", ShaderProgram::Basic, "fs_font", premul, test),
            K::SetStencil => geometry(
                "set_stencil",
                ShaderProgram::Basic,
                "fs_stencil",
                BlendMode::NoColorWrites,
                StencilMode::Replace,
            ),
            K::IntersectStencil => geometry(
                "intersect_stencil",
                ShaderProgram::Basic,
                "fs_stencil",
                BlendMode::NoColorWrites,
                StencilMode::Increment,
            ),
            K::SetStencilFullscreen => fullscreen(
                "set_stencil_fullscreen",
                ShaderProgram::Filters,
                "fs_stencil",
                BlendMode::NoColorWrites,
                StencilMode::Replace,
            ),
            K::PassThrough => fullscreen(
                "passthrough",
                ShaderProgram::Filters,
                "fs_passthrough",
                BlendMode::Opaque,
                test,
            ),
            K::PassThroughBlend => fullscreen(
                "passthrough_blend",
                ShaderProgram::Filters,
                "fs_passthrough",
                premul,
                test,
            ),
            K::PassThroughOpacity => fullscreen(
                "passthrough_opacity",
                ShaderProgram::Filters,
                "fs_passthrough",
                BlendMode::ConstantScale,
                test,
            ),
            K::Blur => fullscreen("blur", ShaderProgram::Blur, "fs_blur", BlendMode::Opaque, test),
            K::DropShadow => fullscreen(
                "drop_shadow",
                ShaderProgram::Filters,
                "fs_drop_shadow",
                BlendMode::Opaque,
                test,
            ),
            K::ColorMatrix => fullscreen(
                "color_matrix",
                ShaderProgram::Filters,
                "fs_color_matrix",
                BlendMode::Opaque,
                test,
            ),
            K::MaskImage => fullscreen(
                "mask_image",
                ShaderProgram::Filters,
                "fs_mask_image",
                BlendMode::Opaque,
                test,
            ),
            K::Gradient => geometry(
                "gradient",
                ShaderProgram::Gradient,
                "fs_gradient",
                premul,
                test,
            ),
            K::Creation => geometry(
                "creation",
                ShaderProgram::Gradient,
                "fs_creation",
                premul,
                test,
            ),
            K::Blit => fullscreen("blit", ShaderProgram::Blit, "fs_blit", BlendMode::Opaque, test),
        }
    }
}

/// Storage buffers shared by every frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SharedBuffers {
    /// `array<f32, BLUR_NUM_WEIGHTS>`
    pub blur_weights: BufferId,
    /// `array<f32, MAX_NUM_STOPS>`
    pub stop_positions: BufferId,
    /// `array<vec4<f32>, MAX_NUM_STOPS>`
    pub stop_colors: BufferId,
}

/// Snapshot of a fully built [`PipelineSet`], valid until the next invalidation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReadyPipelines {
    ids: [PipelineId; NUM_PIPELINES],
    pub buffers: SharedBuffers,
}

impl ReadyPipelines {
    pub fn get(&self, kind: PipelineKind) -> PipelineId {
        self.ids[kind.index()]
    }
}

/// Lazily created pipelines plus the storage buffers they read
#[derive(Debug, Default)]
pub struct PipelineSet {
    pipelines: FxHashMap<PipelineKind, PipelineId>,
    buffers: Option<SharedBuffers>,
}

impl PipelineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create whatever is missing; `false` means draws must be skipped this frame
    pub fn ensure<D: GpuDevice>(&mut self, device: &mut D) -> bool {
        if self.is_ready() {
            return true;
        }

        if let Some(program) = ShaderProgram::ALL
            .into_iter()
            .find(|&p| !device.shader_ready(p))
        {
            debug!("shader program '{}' not loaded yet", program.name());
            return false;
        }

        if self.buffers.is_none() {
            match create_shared_buffers(device) {
                Ok(buffers) => self.buffers = Some(buffers),
                Err(e) => {
                    error!("failed to create shared shader buffers: {}", e);
                    return false;
                }
            }
        }

        for kind in PipelineKind::ALL {
            if self.pipelines.contains_key(&kind) {
                continue;
            }
            match device.create_pipeline(&kind.desc()) {
                Ok(pipeline) => {
                    self.pipelines.insert(kind, pipeline);
                }
                Err(e) => {
                    error!("failed to create pipeline {:?}: {}", kind, e);
                    return false;
                }
            }
        }

        debug!("{} pipelines ready", self.pipelines.len());
        true
    }

    pub fn is_ready(&self) -> bool {
        self.buffers.is_some() && self.pipelines.len() == PipelineKind::ALL.len()
    }

    pub fn get(&self, kind: PipelineKind) -> Option<PipelineId> {
        self.pipelines.get(&kind).copied()
    }

    pub fn buffers(&self) -> Option<SharedBuffers> {
        self.buffers
    }

    /// Every pipeline id, or `None` while anything is missing
    pub fn ready(&self) -> Option<ReadyPipelines> {
        let buffers = self.buffers?;
        let mut ids = [PipelineId::default(); NUM_PIPELINES];
        for kind in PipelineKind::ALL {
            ids[kind.index()] = self.get(kind)?;
        }
        Some(ReadyPipelines { ids, buffers })
    }

    /// Destroy the pipelines built from `program`; they are rebuilt by the next `ensure`
    pub fn invalidate_program<D: GpuDevice>(&mut self, device: &mut D, program: ShaderProgram) {
        self.pipelines.retain(|kind, pipeline| {
            if kind.desc().program == program {
                device.destroy_pipeline(*pipeline);
                false
            } else {
                true
            }
        });
    }

    /// Destroy every pipeline
    pub fn invalidate<D: GpuDevice>(&mut self, device: &mut D) {
        for (_, pipeline) in self.pipelines.drain() {
            device.destroy_pipeline(pipeline);
        }
    }

    /// Destroy pipelines and shared buffers
    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        self.invalidate(device);
        if let Some(buffers) = self.buffers.take() {
            device.destroy_buffer(buffers.blur_weights);
            device.destroy_buffer(buffers.stop_positions);
            device.destroy_buffer(buffers.stop_colors);
        }
    }
}

fn create_shared_buffers<D: GpuDevice>(device: &mut D) -> crate::device::Result<SharedBuffers> {
    let storage = |label, size: usize| BufferDesc {
        label,
        kind: BufferKind::Storage,
        size: size as u64,
    };

    let blur_weights =
        device.create_buffer(&storage("blur_weights", BLUR_NUM_WEIGHTS * 4))?;
    let stop_positions = match device.create_buffer(&storage("stop_positions", MAX_NUM_STOPS * 4))
    {
        Ok(buffer) => buffer,
        Err(e) => {
            device.destroy_buffer(blur_weights);
            return Err(e);
        }
    };
    let stop_colors = match device.create_buffer(&storage("stop_colors", MAX_NUM_STOPS * 16)) {
        Ok(buffer) => buffer,
        Err(e) => {
            device.destroy_buffer(blur_weights);
            device.destroy_buffer(stop_positions);
            return Err(e);
        }
    };

    Ok(SharedBuffers {
        blur_weights,
        stop_positions,
        stop_colors,
    })
}
