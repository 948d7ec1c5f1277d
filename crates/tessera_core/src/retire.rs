//! Deferred resource destruction
//!
//! Commands recorded during a frame only run once the backend executes the
//! returned [`CommandList`](crate::command::CommandList). A resource released
//! mid-frame may still be referenced by a command recorded earlier, so the
//! renderer routes destruction through [`DeferredDestroy`] while a frame is
//! open and frees the queue at the next `begin`.

use crate::device::{
    AssetId, BufferDesc, BufferId, GpuDevice, LoadedTexture, PipelineDesc, PipelineId, Result,
    ShaderProgram, TextureDesc, TextureId,
};

/// Resources waiting for the recorded frame to execute
#[derive(Debug, Default)]
pub struct RetiredResources {
    textures: Vec<TextureId>,
    buffers: Vec<BufferId>,
    pipelines: Vec<PipelineId>,
    assets: Vec<AssetId>,
}

impl RetiredResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.textures.len() + self.buffers.len() + self.pipelines.len() + self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_buffer(&self, buffer: BufferId) -> bool {
        self.buffers.contains(&buffer)
    }

    pub fn contains_pipeline(&self, pipeline: PipelineId) -> bool {
        self.pipelines.contains(&pipeline)
    }

    /// Destroy everything queued
    pub fn release<D: GpuDevice>(&mut self, device: &mut D) {
        for asset in self.assets.drain(..) {
            device.release_asset(asset);
        }
        for texture in self.textures.drain(..) {
            device.destroy_texture(texture);
        }
        for buffer in self.buffers.drain(..) {
            device.destroy_buffer(buffer);
        }
        for pipeline in self.pipelines.drain(..) {
            device.destroy_pipeline(pipeline);
        }
    }
}

/// [`GpuDevice`] view that creates immediately and queues destroys
///
/// With `deferring` off every call goes straight to the device.
pub struct DeferredDestroy<'a, D: GpuDevice> {
    device: &'a mut D,
    retired: &'a mut RetiredResources,
    deferring: bool,
}

impl<'a, D: GpuDevice> DeferredDestroy<'a, D> {
    pub fn new(device: &'a mut D, retired: &'a mut RetiredResources, deferring: bool) -> Self {
        Self {
            device,
            retired,
            deferring,
        }
    }
}

impl<D: GpuDevice> GpuDevice for DeferredDestroy<'_, D> {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        self.device.create_texture(desc)
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        data: &[u8],
        dimensions: (u32, u32),
    ) -> Result<()> {
        self.device.upload_texture(texture, data, dimensions)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.deferring {
            self.retired.textures.push(texture);
        } else {
            self.device.destroy_texture(texture);
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        self.device.create_buffer(desc)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.deferring {
            self.retired.buffers.push(buffer);
        } else {
            self.device.destroy_buffer(buffer);
        }
    }

    fn shader_ready(&self, program: ShaderProgram) -> bool {
        self.device.shader_ready(program)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId> {
        self.device.create_pipeline(desc)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        if self.deferring {
            self.retired.pipelines.push(pipeline);
        } else {
            self.device.destroy_pipeline(pipeline);
        }
    }

    fn load_texture_asset(&mut self, path: &str) -> Result<LoadedTexture> {
        self.device.load_texture_asset(path)
    }

    fn release_asset(&mut self, asset: AssetId) {
        if self.deferring {
            self.retired.assets.push(asset);
        } else {
            self.device.release_asset(asset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferKind;
    use crate::headless::HeadlessDevice;

    #[test]
    fn destroys_wait_for_release() {
        let mut device = HeadlessDevice::new();
        device.add_asset("logo.tex", (8, 8));
        let mut retired = RetiredResources::new();

        let mut deferred = DeferredDestroy::new(&mut device, &mut retired, true);
        let buffer = deferred
            .create_buffer(&BufferDesc {
                label: "vertices",
                kind: BufferKind::Vertex,
                size: 64,
            })
            .unwrap();
        let asset = deferred.load_texture_asset("logo.tex").unwrap();
        deferred.destroy_buffer(buffer);
        deferred.release_asset(asset.asset);

        assert_eq!(device.live_buffer_count(), 1);
        assert_eq!(device.live_asset_count(), 1);
        assert!(retired.contains_buffer(buffer));
        assert_eq!(retired.len(), 2);

        retired.release(&mut device);
        assert!(retired.is_empty());
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_asset_count(), 0);
    }

    #[test]
    fn destroys_pass_through_when_not_deferring() {
        let mut device = HeadlessDevice::new();
        let mut retired = RetiredResources::new();

        let mut direct = DeferredDestroy::new(&mut device, &mut retired, false);
        let buffer = direct
            .create_buffer(&BufferDesc {
                label: "indices",
                kind: BufferKind::Index,
                size: 16,
            })
            .unwrap();
        direct.destroy_buffer(buffer);

        assert!(retired.is_empty());
        assert_eq!(device.live_buffer_count(), 0);
    }
}
