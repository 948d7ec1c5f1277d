//! Recorded GPU work
//!
//! A frame records [`GpuCommand`]s in submission order. State commands
//! (target, viewport, scissor, pipeline, bindings, uniforms) persist until
//! overwritten; `ResetBindings` drops bound textures and storage buffers
//! only. Draw commands consume the current state.

use smallvec::SmallVec;

use crate::device::{BufferId, PipelineId, TextureId};
use crate::math::{Color, IRect, Viewport};

/// Inline storage for one uniform block
pub type UniformBytes = SmallVec<[u8; 256]>;

#[derive(Clone, Debug, PartialEq)]
pub enum GpuCommand {
    /// Clear the whole color target; scissor does not apply
    Clear { target: TextureId, color: Color },
    SetRenderTarget {
        color: TextureId,
        depth_stencil: Option<TextureId>,
    },
    SetViewport(Viewport),
    SetScissor(IRect),
    SetPipeline(PipelineId),
    /// Blend constant used by `ConstantScale` pipelines
    SetBlendFactor(f32),
    SetStencilReference(u32),
    BindTexture { slot: u32, texture: TextureId },
    BindStorage { slot: u32, buffer: BufferId },
    ResetBindings,
    SetUniforms(UniformBytes),
    UpdateBuffer { buffer: BufferId, data: Vec<u8> },
    DrawIndexed {
        vertex_buffer: BufferId,
        index_buffer: BufferId,
        index_count: u32,
    },
    /// Single fullscreen triangle over the current viewport
    DrawFullscreen,
}

impl GpuCommand {
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            GpuCommand::DrawIndexed { .. } | GpuCommand::DrawFullscreen
        )
    }
}

/// Ordered list of commands recorded during one frame
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    commands: Vec<GpuCommand>,
}

impl CommandList {
    pub fn new() -> Self {
        Self {
            commands: Vec::with_capacity(256),
        }
    }

    pub fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }

    pub fn clear_target(&mut self, target: TextureId, color: Color) {
        self.push(GpuCommand::Clear { target, color });
    }

    pub fn set_uniforms<T: bytemuck::Pod>(&mut self, uniforms: &T) {
        let bytes = bytemuck::bytes_of(uniforms);
        self.push(GpuCommand::SetUniforms(SmallVec::from_slice(bytes)));
    }

    pub fn update_buffer<T: bytemuck::Pod>(&mut self, buffer: BufferId, data: &[T]) {
        self.push(GpuCommand::UpdateBuffer {
            buffer,
            data: bytemuck::cast_slice(data).to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GpuCommand> {
        self.commands.iter()
    }

    pub fn as_slice(&self) -> &[GpuCommand] {
        &self.commands
    }

    /// Number of draw commands recorded so far
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    pub fn into_vec(self) -> Vec<GpuCommand> {
        self.commands
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a GpuCommand;
    type IntoIter = std::slice::Iter<'a, GpuCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
