//! Tessera Core
//!
//! Layered compositing, filter chains and pooled GPU resources for
//! retained-mode UI render backends. GPU work is recorded into a
//! [`CommandList`] against the [`GpuDevice`] trait; `tessera_gpu` executes it
//! with wgpu and [`HeadlessDevice`] stands in for tests.

pub mod blur;
pub mod command;
pub mod config;
pub mod device;
pub mod file;
pub mod filter;
pub mod frame;
pub mod geometry;
pub mod handle;
pub mod headless;
pub mod interface;
pub mod layer;
pub mod math;
pub mod params;
mod passes;
pub mod pipeline;
pub mod reload;
pub mod renderer;
pub mod retire;
pub mod shader;
pub mod slot;
pub mod texture;
pub mod uniforms;

pub use command::{CommandList, GpuCommand};
pub use config::RendererConfig;
pub use device::{GpuDevice, GpuError, Result, ShaderProgram, TextureId};
pub use file::{FileError, FileInterface, PackagedFileInterface, SeekOrigin};
pub use filter::CompiledFilter;
pub use geometry::Vertex;
pub use handle::{
    FileHandle, FilterHandle, GeometryHandle, LayerHandle, ShaderHandle, TextureHandle,
};
pub use headless::HeadlessDevice;
pub use interface::{ClipMaskOperation, FontAtlasFlush, LayerBlend, RenderInterface};
pub use math::{Color, IRect, Mat4, Rgba8, Vec2, Viewport};
pub use params::{ColorStop, Parameters, Variant};
pub use reload::{ReloadSubscription, ShaderReloadHub, ShaderReloadSource};
pub use renderer::Renderer;
pub use retire::RetiredResources;
pub use shader::CompiledShader;
