//! GPU-less device
//!
//! [`HeadlessDevice`] hands out ids and tracks live resources without touching
//! a graphics API. It backs the test-suite and tools that only need the
//! recorded command stream.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::device::{
    AssetId, BufferDesc, BufferId, GpuDevice, GpuError, LoadedTexture, PipelineDesc, PipelineId,
    Result, ShaderProgram, TextureDesc, TextureId,
};

/// Recorded texture upload
#[derive(Clone, Debug, PartialEq)]
pub struct TextureUpload {
    pub texture: TextureId,
    pub bytes: usize,
    pub dimensions: (u32, u32),
}

/// In-memory [`GpuDevice`]
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: u64,
    textures: FxHashMap<TextureId, TextureDesc>,
    buffers: FxHashMap<BufferId, BufferDesc>,
    pipelines: FxHashMap<PipelineId, PipelineDesc>,
    assets: FxHashMap<String, (u32, u32)>,
    loaded_assets: FxHashMap<AssetId, TextureId>,
    unready_programs: FxHashSet<ShaderProgram>,
    failing_labels: FxHashSet<&'static str>,
    uploads: Vec<TextureUpload>,
    textures_created: usize,
    pipelines_created: usize,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    /// Make `path` resolvable by [`GpuDevice::load_texture_asset`]
    pub fn add_asset(&mut self, path: impl Into<String>, dimensions: (u32, u32)) {
        self.assets.insert(path.into(), dimensions);
    }

    /// Mark a shader program as still loading
    pub fn set_shader_ready(&mut self, program: ShaderProgram, ready: bool) {
        if ready {
            self.unready_programs.remove(&program);
        } else {
            self.unready_programs.insert(program);
        }
    }

    /// Make every creation call with this label fail
    pub fn fail_label(&mut self, label: &'static str) {
        self.failing_labels.insert(label);
    }

    pub fn clear_failures(&mut self) {
        self.failing_labels.clear();
    }

    fn check_label(&self, kind: &'static str, label: &'static str) -> Result<()> {
        if self.failing_labels.contains(label) {
            return Err(GpuError::ResourceCreation {
                kind,
                reason: format!("injected failure for '{}'", label),
            });
        }
        Ok(())
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&texture)
    }

    pub fn buffer_desc(&self, buffer: BufferId) -> Option<&BufferDesc> {
        self.buffers.get(&buffer)
    }

    pub fn pipeline_desc(&self, pipeline: PipelineId) -> Option<&PipelineDesc> {
        self.pipelines.get(&pipeline)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn live_asset_count(&self) -> usize {
        self.loaded_assets.len()
    }

    /// Total textures ever created
    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    /// Total pipelines ever created
    pub fn pipelines_created(&self) -> usize {
        self.pipelines_created
    }

    pub fn uploads(&self) -> &[TextureUpload] {
        &self.uploads
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        self.check_label("texture", desc.label)?;
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::ResourceCreation {
                kind: "texture",
                reason: format!("zero-sized texture {}x{}", desc.width, desc.height),
            });
        }
        let id = TextureId(self.allocate_id());
        self.textures.insert(id, desc.clone());
        self.textures_created += 1;
        Ok(id)
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        data: &[u8],
        dimensions: (u32, u32),
    ) -> Result<()> {
        if !self.textures.contains_key(&texture) {
            return Err(GpuError::UnknownResource(format!("{:?}", texture)));
        }
        let expected = dimensions.0 as usize * dimensions.1 as usize * 4;
        if data.len() < expected {
            return Err(GpuError::UploadSize {
                expected,
                got: data.len(),
            });
        }
        self.uploads.push(TextureUpload {
            texture,
            bytes: data.len(),
            dimensions,
        });
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        self.check_label("buffer", desc.label)?;
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id, desc.clone());
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn shader_ready(&self, program: ShaderProgram) -> bool {
        !self.unready_programs.contains(&program)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId> {
        self.check_label("pipeline", desc.label)?;
        if !self.shader_ready(desc.program) {
            return Err(GpuError::ShaderNotReady(desc.program));
        }
        let id = PipelineId(self.allocate_id());
        self.pipelines.insert(id, desc.clone());
        self.pipelines_created += 1;
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(&pipeline);
    }

    fn load_texture_asset(&mut self, path: &str) -> Result<LoadedTexture> {
        let dimensions = *self
            .assets
            .get(path)
            .ok_or_else(|| GpuError::AssetNotFound(path.to_string()))?;
        let texture = TextureId(self.allocate_id());
        self.textures.insert(
            texture,
            TextureDesc {
                label: "asset_texture",
                width: dimensions.0,
                height: dimensions.1,
                kind: crate::device::TextureKind::Sampled,
            },
        );
        let asset = AssetId(self.allocate_id());
        self.loaded_assets.insert(asset, texture);
        Ok(LoadedTexture {
            asset,
            texture,
            dimensions,
        })
    }

    fn release_asset(&mut self, asset: AssetId) {
        if let Some(texture) = self.loaded_assets.remove(&asset) {
            self.textures.remove(&texture);
        }
    }
}
