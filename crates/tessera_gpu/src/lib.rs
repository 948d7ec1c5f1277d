//! Tessera GPU
//!
//! wgpu backend for `tessera_core`. [`WgpuDevice`] implements
//! [`GpuDevice`](tessera_core::GpuDevice), turns recorded command lists into
//! render passes, decodes texture assets and hot-reloads WGSL programs.
//!
//! ```ignore
//! let device = pollster::block_on(WgpuDevice::new(WgpuDeviceConfig::from_env()))?;
//! let hub = device.reload_hub();
//! let mut renderer = Renderer::with_shader_reload(device, RendererConfig::from_env(), hub);
//!
//! renderer.begin(output, viewport);
//! // ... UI library draws through RenderInterface ...
//! let commands = renderer.end();
//! renderer.device_mut().execute(&commands);
//! ```

pub mod assets;
pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod hot_reload;
pub mod shaders;

pub use config::{TargetFormat, WgpuDeviceConfig};
pub use device::{FrameStats, WgpuDevice};
pub use error::{BackendError, Result};
pub use executor::FramePlan;
