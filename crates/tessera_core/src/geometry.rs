//! Geometry compiler
//!
//! UI vertex/index spans are converted into [`GpuVertex`] data on compile and
//! kept in CPU staging vectors. The GPU copy is created or refreshed lazily by
//! [`CompiledGeometry::flush`] on the first draw that references the handle.

use tracing::{error, warn};

use crate::command::CommandList;
use crate::device::{BufferDesc, BufferId, BufferKind, GpuDevice};
use crate::math::{Color, Rect, Rgba8, Vec2, Viewport};
use crate::slot::Recycle;

const INITIAL_VERTEX_CAPACITY: usize = 512;
const INITIAL_INDEX_CAPACITY: usize = 64;

/// Vertex as supplied by the UI library
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub position: Vec2,
    pub tex_coord: Vec2,
    /// Straight alpha
    pub color: Rgba8,
}

/// Vertex layout consumed by the `basic` and `gradient` programs
///
/// Memory layout (56 bytes total):
/// - position: `vec2<f32>` (location 0)
/// - tex_coord: `vec2<f32>` (location 1)
/// - color: `vec4<f32>` (location 2)
/// - clip_origin: `vec2<f32>` (location 3)
/// - clip_extents: `vec4<f32>` (location 4) - x axis (xy) and y axis (zw)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub color: [f32; 4],
    pub clip_origin: [f32; 2],
    pub clip_extents: [f32; 4],
}

/// Per-vertex clip region, a possibly rotated rectangle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipRegion {
    pub origin: [f32; 2],
    pub extents: [f32; 4],
}

impl ClipRegion {
    /// Axis-aligned clip covering `rect`
    pub fn from_rect(rect: Rect) -> Self {
        Self {
            origin: [rect.x, rect.y],
            extents: [rect.width, 0.0, 0.0, rect.height],
        }
    }
}

/// GPU side of a compiled geometry
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryBuffers {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub index_count: u32,
}

#[derive(Clone, Copy, Debug)]
struct GpuBuffer {
    id: BufferId,
    capacity: usize,
}

/// A pooled geometry batch with CPU staging and lazily created GPU buffers
#[derive(Debug)]
pub struct CompiledGeometry {
    vertices: Vec<GpuVertex>,
    indices: Vec<u32>,
    vertex_buffer: Option<GpuBuffer>,
    index_buffer: Option<GpuBuffer>,
    dirty: bool,
}

impl Default for CompiledGeometry {
    fn default() -> Self {
        Self {
            vertices: Vec::with_capacity(INITIAL_VERTEX_CAPACITY),
            indices: Vec::with_capacity(INITIAL_INDEX_CAPACITY),
            vertex_buffer: None,
            index_buffer: None,
            dirty: false,
        }
    }
}

impl CompiledGeometry {
    /// Replace the staged data with `vertices`/`indices`
    ///
    /// The baseline clip is the viewport at compile time; render-time scissor
    /// and clip mask can only narrow it further. A batch with an index outside
    /// `0..vertices.len()` is rejected and compiles to empty geometry.
    pub fn compile(&mut self, vertices: &[Vertex], indices: &[i32], viewport: &Viewport) {
        let clip = ClipRegion::from_rect(viewport.rect());

        self.vertices.clear();
        self.indices.clear();
        self.dirty = true;
        if let Some(bad) = indices
            .iter()
            .find(|&&i| usize::try_from(i).map_or(true, |i| i >= vertices.len()))
        {
            warn!(
                "geometry rejected: index {} outside {} vertices",
                bad,
                vertices.len()
            );
            return;
        }

        self.vertices.extend(vertices.iter().map(|v| GpuVertex {
            position: v.position.to_array(),
            tex_coord: v.tex_coord.to_array(),
            color: Color::from(v.color).to_array(),
            clip_origin: clip.origin,
            clip_extents: clip.extents,
        }));
        self.indices.extend(indices.iter().map(|&i| i as u32));
    }

    pub fn vertices(&self) -> &[GpuVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Whether staged data still has to reach the GPU
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Upload staged data if needed and return the buffers to draw with
    ///
    /// Returns `None` for empty geometry or when buffer creation fails.
    pub fn flush<D: GpuDevice>(
        &mut self,
        device: &mut D,
        commands: &mut CommandList,
    ) -> Option<GeometryBuffers> {
        if self.indices.is_empty() || self.vertices.is_empty() {
            return None;
        }

        if self.dirty {
            let vertex_bytes = std::mem::size_of_val(self.vertices.as_slice());
            let index_bytes = std::mem::size_of_val(self.indices.as_slice());
            let vb = ensure_buffer(
                device,
                &mut self.vertex_buffer,
                BufferKind::Vertex,
                "geometry_vertices",
                vertex_bytes,
            )?;
            let ib = ensure_buffer(
                device,
                &mut self.index_buffer,
                BufferKind::Index,
                "geometry_indices",
                index_bytes,
            )?;
            commands.update_buffer(vb, &self.vertices);
            commands.update_buffer(ib, &self.indices);
            self.dirty = false;
        }

        Some(GeometryBuffers {
            vertex_buffer: self.vertex_buffer?.id,
            index_buffer: self.index_buffer?.id,
            index_count: self.index_count(),
        })
    }

    /// Free the GPU buffers and the staging storage
    pub fn dispose<D: GpuDevice>(&mut self, device: &mut D) {
        if let Some(buffer) = self.vertex_buffer.take() {
            device.destroy_buffer(buffer.id);
        }
        if let Some(buffer) = self.index_buffer.take() {
            device.destroy_buffer(buffer.id);
        }
        self.vertices = Vec::new();
        self.indices = Vec::new();
        self.dirty = false;
    }
}

impl Recycle for CompiledGeometry {
    /// Clear staged data but keep both CPU storage and GPU buffers for reuse
    fn recycle(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.dirty = false;
    }
}

fn ensure_buffer<D: GpuDevice>(
    device: &mut D,
    slot: &mut Option<GpuBuffer>,
    kind: BufferKind,
    label: &'static str,
    required: usize,
) -> Option<BufferId> {
    if let Some(buffer) = slot {
        if buffer.capacity >= required {
            return Some(buffer.id);
        }
        device.destroy_buffer(buffer.id);
        *slot = None;
    }

    let capacity = required.next_power_of_two();
    match device.create_buffer(&BufferDesc {
        label,
        kind,
        size: capacity as u64,
    }) {
        Ok(id) => {
            *slot = Some(GpuBuffer { id, capacity });
            Some(id)
        }
        Err(e) => {
            error!("geometry buffer allocation failed: {}", e);
            None
        }
    }
}
