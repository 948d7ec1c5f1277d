//! Frame planning
//!
//! A [`CommandList`] is resolved into a [`FramePlan`] before anything is
//! encoded. Planning folds the persistent state commands into self-contained
//! draws, packs every uniform block into one buffer and every buffer update
//! into one staging buffer, and groups consecutive draws on the same target
//! into a single render pass. Buffer updates and clears split passes so they
//! land in command order.

use tessera_core::command::{CommandList, GpuCommand};
use tessera_core::device::{BufferId, PipelineId, TextureId};
use tessera_core::math::{Color, IRect, Viewport};
use tracing::{trace, warn};

/// Dynamic-offset stride of the packed uniform buffer
pub const UNIFORM_STRIDE: usize = 256;

/// Alignment of buffer copies out of the staging buffer
pub const COPY_ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

/// Texture and storage bindings of one draw
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bindings {
    pub textures: [Option<TextureId>; 2],
    pub storage: [Option<BufferId>; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawKind {
    Indexed {
        vertex_buffer: BufferId,
        index_buffer: BufferId,
        index_count: u32,
    },
    Fullscreen,
}

/// Pixel rectangle clamped to its target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedDraw {
    pub pipeline: PipelineId,
    pub bindings: Bindings,
    /// Byte offset into [`FramePlan::uniforms`]
    pub uniform_offset: u32,
    /// Viewport in target pixels, already clamped
    pub viewport: [f32; 4],
    pub scissor: PixelRect,
    pub stencil_reference: u32,
    pub blend_factor: f32,
    pub kind: DrawKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedPass {
    pub color: TextureId,
    pub depth_stencil: Option<TextureId>,
    pub draws: Vec<PlannedDraw>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlannedOp {
    Clear { target: TextureId, color: Color },
    /// Copy `size` bytes at `staging_offset` into `buffer`
    Upload {
        buffer: BufferId,
        staging_offset: u64,
        size: u64,
    },
    Pass(PlannedPass),
}

/// Encodable form of one frame's commands
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramePlan {
    pub uniforms: Vec<u8>,
    pub staging: Vec<u8>,
    pub ops: Vec<PlannedOp>,
    /// Draws dropped for missing state (no pipeline, target or extent)
    pub skipped_draws: usize,
}

#[derive(Default)]
struct PlanState {
    target: Option<(TextureId, Option<TextureId>)>,
    viewport: Option<Viewport>,
    scissor: Option<IRect>,
    pipeline: Option<PipelineId>,
    blend_factor: f32,
    stencil_reference: u32,
    bindings: Bindings,
    uniform_offset: Option<u32>,
}

impl FramePlan {
    /// Plan `commands`; `extent` reports the pixel size of a color target
    pub fn build<F>(commands: &CommandList, mut extent: F) -> Self
    where
        F: FnMut(TextureId) -> Option<(u32, u32)>,
    {
        let mut plan = FramePlan::default();
        let mut state = PlanState {
            blend_factor: 1.0,
            ..Default::default()
        };

        for command in commands {
            match command {
                GpuCommand::Clear { target, color } => {
                    plan.ops.push(PlannedOp::Clear {
                        target: *target,
                        color: *color,
                    });
                }
                GpuCommand::SetRenderTarget {
                    color,
                    depth_stencil,
                } => state.target = Some((*color, *depth_stencil)),
                GpuCommand::SetViewport(viewport) => state.viewport = Some(*viewport),
                GpuCommand::SetScissor(scissor) => state.scissor = Some(*scissor),
                GpuCommand::SetPipeline(pipeline) => state.pipeline = Some(*pipeline),
                GpuCommand::SetBlendFactor(factor) => state.blend_factor = *factor,
                GpuCommand::SetStencilReference(reference) => {
                    state.stencil_reference = *reference
                }
                GpuCommand::BindTexture { slot, texture } => {
                    match state.bindings.textures.get_mut(*slot as usize) {
                        Some(binding) => *binding = Some(*texture),
                        None => warn!("texture slot {} out of range", slot),
                    }
                }
                GpuCommand::BindStorage { slot, buffer } => {
                    match state.bindings.storage.get_mut(*slot as usize) {
                        Some(binding) => *binding = Some(*buffer),
                        None => warn!("storage slot {} out of range", slot),
                    }
                }
                GpuCommand::ResetBindings => state.bindings = Bindings::default(),
                GpuCommand::SetUniforms(bytes) => {
                    state.uniform_offset = Some(plan.push_uniforms(bytes));
                }
                GpuCommand::UpdateBuffer { buffer, data } => plan.push_upload(*buffer, data),
                GpuCommand::DrawIndexed {
                    vertex_buffer,
                    index_buffer,
                    index_count,
                } => {
                    let kind = DrawKind::Indexed {
                        vertex_buffer: *vertex_buffer,
                        index_buffer: *index_buffer,
                        index_count: *index_count,
                    };
                    plan.push_draw(&mut state, kind, &mut extent);
                }
                GpuCommand::DrawFullscreen => {
                    plan.push_draw(&mut state, DrawKind::Fullscreen, &mut extent)
                }
            }
        }

        trace!(
            "planned {} ops, {} uniform bytes, {} staged bytes",
            plan.ops.len(),
            plan.uniforms.len(),
            plan.staging.len()
        );
        plan
    }

    fn push_uniforms(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.uniforms.len();
        let len = if bytes.len() > UNIFORM_STRIDE {
            warn!(
                "uniform block of {} bytes truncated to {}",
                bytes.len(),
                UNIFORM_STRIDE
            );
            UNIFORM_STRIDE
        } else {
            bytes.len()
        };
        self.uniforms.extend_from_slice(&bytes[..len]);
        self.uniforms.resize(offset + UNIFORM_STRIDE, 0);
        offset as u32
    }

    fn push_upload(&mut self, buffer: BufferId, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let offset = self.staging.len();
        self.staging.extend_from_slice(data);
        let padded = data.len().next_multiple_of(COPY_ALIGNMENT);
        self.staging.resize(offset + padded, 0);
        self.ops.push(PlannedOp::Upload {
            buffer,
            staging_offset: offset as u64,
            size: padded as u64,
        });
    }

    fn push_draw<F>(&mut self, state: &mut PlanState, kind: DrawKind, extent: &mut F)
    where
        F: FnMut(TextureId) -> Option<(u32, u32)>,
    {
        let (Some(pipeline), Some((color, depth_stencil))) = (state.pipeline, state.target) else {
            self.skipped_draws += 1;
            warn!("draw without pipeline or render target skipped");
            return;
        };
        let Some(size) = extent(color) else {
            self.skipped_draws += 1;
            warn!("draw into unknown target {:?} skipped", color);
            return;
        };

        let viewport = state
            .viewport
            .unwrap_or_else(|| Viewport::from_size(size.0, size.1));
        let viewport = clamp_viewport(&viewport, size);
        let scissor = state
            .scissor
            .and_then(|s| clamp_rect(&s, size))
            .or_else(|| state.scissor.is_none().then(|| full_rect(size)));
        let (Some(viewport), Some(scissor)) = (viewport, scissor) else {
            trace!("draw outside of target {:?} skipped", color);
            return;
        };

        let uniform_offset = match state.uniform_offset {
            Some(offset) => offset,
            None => {
                let offset = self.push_uniforms(&[]);
                state.uniform_offset = Some(offset);
                offset
            }
        };

        let draw = PlannedDraw {
            pipeline,
            bindings: state.bindings,
            uniform_offset,
            viewport,
            scissor,
            stencil_reference: state.stencil_reference,
            blend_factor: state.blend_factor,
            kind,
        };

        match self.ops.last_mut() {
            Some(PlannedOp::Pass(pass))
                if pass.color == color && pass.depth_stencil == depth_stencil =>
            {
                pass.draws.push(draw)
            }
            _ => self.ops.push(PlannedOp::Pass(PlannedPass {
                color,
                depth_stencil,
                draws: vec![draw],
            })),
        }
    }

    pub fn passes(&self) -> impl Iterator<Item = &PlannedPass> {
        self.ops.iter().filter_map(|op| match op {
            PlannedOp::Pass(pass) => Some(pass),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.passes().map(|pass| pass.draws.len()).sum()
    }
}

fn full_rect(size: (u32, u32)) -> PixelRect {
    PixelRect {
        x: 0,
        y: 0,
        width: size.0,
        height: size.1,
    }
}

fn clamp_rect(rect: &IRect, size: (u32, u32)) -> Option<PixelRect> {
    let x0 = rect.min[0].clamp(0, size.0 as i32);
    let y0 = rect.min[1].clamp(0, size.1 as i32);
    let x1 = rect.max[0].clamp(0, size.0 as i32);
    let y1 = rect.max[1].clamp(0, size.1 as i32);
    (x1 > x0 && y1 > y0).then(|| PixelRect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

fn clamp_viewport(viewport: &Viewport, size: (u32, u32)) -> Option<[f32; 4]> {
    let x0 = viewport.x.clamp(0.0, size.0 as f32);
    let y0 = viewport.y.clamp(0.0, size.1 as f32);
    let x1 = (viewport.x + viewport.width).clamp(0.0, size.0 as f32);
    let y1 = (viewport.y + viewport.height).clamp(0.0, size.1 as f32);
    (x1 > x0 && y1 > y0).then_some([x0, y0, x1 - x0, y1 - y0])
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: TextureId = TextureId(1);
    const OTHER: TextureId = TextureId(2);
    const PIPELINE: PipelineId = PipelineId(10);

    fn extent(_: TextureId) -> Option<(u32, u32)> {
        Some((100, 50))
    }

    fn target(commands: &mut CommandList, color: TextureId) {
        commands.push(GpuCommand::SetRenderTarget {
            color,
            depth_stencil: None,
        });
    }

    #[test]
    fn consecutive_draws_share_a_pass() {
        let mut commands = CommandList::new();
        target(&mut commands, TARGET);
        commands.push(GpuCommand::SetPipeline(PIPELINE));
        commands.push(GpuCommand::DrawFullscreen);
        commands.push(GpuCommand::DrawFullscreen);
        target(&mut commands, OTHER);
        commands.push(GpuCommand::DrawFullscreen);

        let plan = FramePlan::build(&commands, extent);
        let passes: Vec<_> = plan.passes().collect();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].color, TARGET);
        assert_eq!(passes[0].draws.len(), 2);
        assert_eq!(passes[1].color, OTHER);
    }

    #[test]
    fn uploads_and_clears_split_passes_in_order() {
        let mut commands = CommandList::new();
        target(&mut commands, TARGET);
        commands.push(GpuCommand::SetPipeline(PIPELINE));
        commands.push(GpuCommand::DrawFullscreen);
        commands.update_buffer(BufferId(5), &[1.0f32, 2.0]);
        commands.push(GpuCommand::DrawFullscreen);
        commands.clear_target(TARGET, Color::TRANSPARENT);
        commands.push(GpuCommand::DrawFullscreen);

        let plan = FramePlan::build(&commands, extent);
        let shape: Vec<&str> = plan
            .ops
            .iter()
            .map(|op| match op {
                PlannedOp::Clear { .. } => "clear",
                PlannedOp::Upload { .. } => "upload",
                PlannedOp::Pass(_) => "pass",
            })
            .collect();
        assert_eq!(shape, ["pass", "upload", "pass", "clear", "pass"]);
    }

    #[test]
    fn uniform_blocks_use_fixed_stride() {
        let mut commands = CommandList::new();
        target(&mut commands, TARGET);
        commands.push(GpuCommand::SetPipeline(PIPELINE));
        commands.set_uniforms(&[1.0f32; 8]);
        commands.push(GpuCommand::DrawFullscreen);
        commands.set_uniforms(&[2.0f32; 4]);
        commands.push(GpuCommand::DrawFullscreen);
        commands.push(GpuCommand::DrawFullscreen);

        let plan = FramePlan::build(&commands, extent);
        assert_eq!(plan.uniforms.len(), 2 * UNIFORM_STRIDE);
        let offsets: Vec<u32> = plan
            .passes()
            .flat_map(|pass| pass.draws.iter().map(|d| d.uniform_offset))
            .collect();
        assert_eq!(offsets, [0, 256, 256]);
        assert_eq!(&plan.uniforms[256..260], &2.0f32.to_ne_bytes());
        assert!(plan.uniforms[32..256].iter().all(|&b| b == 0));
    }

    #[test]
    fn uploads_are_aligned() {
        let mut commands = CommandList::new();
        commands.push(GpuCommand::UpdateBuffer {
            buffer: BufferId(3),
            data: vec![1, 2, 3, 4, 5, 6],
        });
        commands.update_buffer(BufferId(4), &[7u32]);

        let plan = FramePlan::build(&commands, extent);
        assert_eq!(plan.staging.len(), 12);
        assert_eq!(
            plan.ops[1],
            PlannedOp::Upload {
                buffer: BufferId(4),
                staging_offset: 8,
                size: 4
            }
        );
    }

    #[test]
    fn draws_without_state_are_skipped() {
        let mut commands = CommandList::new();
        commands.push(GpuCommand::DrawFullscreen);
        target(&mut commands, TARGET);
        commands.push(GpuCommand::DrawFullscreen);

        let plan = FramePlan::build(&commands, extent);
        assert_eq!(plan.skipped_draws, 2);
        assert_eq!(plan.draw_count(), 0);
    }

    #[test]
    fn scissor_and_viewport_clamp_to_target() {
        let mut commands = CommandList::new();
        target(&mut commands, TARGET);
        commands.push(GpuCommand::SetPipeline(PIPELINE));
        commands.push(GpuCommand::SetViewport(Viewport::new(0.0, 0.0, 400.0, 300.0)));
        commands.push(GpuCommand::SetScissor(IRect::from_min_max([-5, 10], [80, 90])));
        commands.push(GpuCommand::DrawFullscreen);
        commands.push(GpuCommand::SetScissor(IRect::from_min_max([120, 0], [130, 10])));
        commands.push(GpuCommand::DrawFullscreen);

        let plan = FramePlan::build(&commands, extent);
        assert_eq!(plan.draw_count(), 1);
        let draw = plan.passes().next().unwrap().draws[0];
        assert_eq!(draw.viewport, [0.0, 0.0, 100.0, 50.0]);
        assert_eq!(
            draw.scissor,
            PixelRect {
                x: 0,
                y: 10,
                width: 80,
                height: 40
            }
        );
    }

    #[test]
    fn reset_drops_bindings_only() {
        let mut commands = CommandList::new();
        target(&mut commands, TARGET);
        commands.push(GpuCommand::SetPipeline(PIPELINE));
        commands.push(GpuCommand::SetStencilReference(3));
        commands.push(GpuCommand::BindTexture {
            slot: 0,
            texture: OTHER,
        });
        commands.push(GpuCommand::BindStorage {
            slot: 1,
            buffer: BufferId(8),
        });
        commands.push(GpuCommand::DrawFullscreen);
        commands.push(GpuCommand::ResetBindings);
        commands.push(GpuCommand::DrawFullscreen);

        let plan = FramePlan::build(&commands, extent);
        let draws = &plan.passes().next().unwrap().draws;
        assert_eq!(draws[0].bindings.textures[0], Some(OTHER));
        assert_eq!(draws[0].bindings.storage[1], Some(BufferId(8)));
        assert_eq!(draws[1].bindings, Bindings::default());
        assert_eq!(draws[1].stencil_reference, 3);
        assert_eq!(draws[1].pipeline, PIPELINE);
    }
}
