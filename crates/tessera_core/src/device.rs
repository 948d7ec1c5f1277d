//! Host GPU device abstraction
//!
//! The compositing core never talks to a graphics API directly. Resource
//! creation goes through [`GpuDevice`]; everything that happens inside a frame
//! is recorded into a [`CommandList`](crate::command::CommandList) that the
//! backend executes afterwards.

use thiserror::Error;

/// GPU texture id issued by the backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// GPU buffer id issued by the backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Pipeline state object id issued by the backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u64);

/// Loaded content asset owning a texture
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AssetId(pub u64);

/// Errors reported by a [`GpuDevice`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    /// The backend could not allocate the resource
    #[error("Failed to create {kind}: {reason}")]
    ResourceCreation { kind: &'static str, reason: String },

    /// An id that the backend does not know about
    #[error("Unknown GPU resource: {0}")]
    UnknownResource(String),

    /// Content asset missing from the host's asset store
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Shader program has not finished loading
    #[error("Shader program not ready: {0:?}")]
    ShaderNotReady(ShaderProgram),

    /// Pixel data does not match the texture dimensions
    #[error("Upload of {got} bytes does not fit texture expecting {expected} bytes")]
    UploadSize { expected: usize, got: usize },
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, GpuError>;

// ─────────────────────────────────────────────────────────────────────────────
// Resource descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Intended use of a texture
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Sampled texture that can also be rendered into (generated textures)
    Sampled,
    /// Layer / postprocess color target
    RenderTarget,
    /// Combined depth + stencil attachment
    DepthStencil,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    /// Read-only storage (blur weights, gradient stops)
    Storage,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub kind: BufferKind,
    /// Size in bytes
    pub size: u64,
}

/// Shader programs a backend must provide
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderProgram {
    /// Geometry: color, image and font fragment stages
    Basic,
    /// Fullscreen filter passes
    Filters,
    /// Separable gaussian blur
    Blur,
    /// Texture region copy
    Blit,
    /// Gradients and procedural shaders
    Gradient,
}

impl ShaderProgram {
    pub const ALL: [ShaderProgram; 5] = [
        ShaderProgram::Basic,
        ShaderProgram::Filters,
        ShaderProgram::Blur,
        ShaderProgram::Blit,
        ShaderProgram::Gradient,
    ];

    /// File stem used for shader assets on disk
    pub fn name(self) -> &'static str {
        match self {
            ShaderProgram::Basic => "basic",
            ShaderProgram::Filters => "filters",
            ShaderProgram::Blur => "blur",
            ShaderProgram::Blit => "blit",
            ShaderProgram::Gradient => "gradient",
        }
    }

    pub fn from_name(name: &str) -> Option<ShaderProgram> {
        ShaderProgram::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// Vertex input of a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexInput {
    /// [`GpuVertex`](crate::geometry::GpuVertex) buffer
    Geometry,
    /// Fullscreen triangle generated from the vertex index
    Fullscreen,
}

/// Color blending of a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Overwrite the destination
    Opaque,
    /// Premultiplied alpha: `src + dst * (1 - src.a)`
    Premultiplied,
    /// Scale the source by the blend constant, ignore the destination
    ConstantScale,
    /// Color writes disabled
    NoColorWrites,
}

/// Stencil behaviour of a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StencilMode {
    /// Pass where `reference <= stored`; reference 0 always passes
    Test,
    /// Always pass, replace stored with the reference
    Replace,
    /// Pass where `reference == stored`, then increment (clamped)
    Increment,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub label: &'static str,
    pub program: ShaderProgram,
    pub vertex_entry: &'static str,
    pub fragment_entry: &'static str,
    pub vertex_input: VertexInput,
    pub blend: BlendMode,
    pub stencil: StencilMode,
}

/// Texture produced by the host asset loader
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadedTexture {
    pub asset: AssetId,
    pub texture: TextureId,
    pub dimensions: (u32, u32),
}

// ─────────────────────────────────────────────────────────────────────────────
// Device trait
// ─────────────────────────────────────────────────────────────────────────────

/// Resource services a host engine provides to the compositor
pub trait GpuDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;

    /// Upload tightly packed RGBA8 data; may complete asynchronously
    fn upload_texture(
        &mut self,
        texture: TextureId,
        data: &[u8],
        dimensions: (u32, u32),
    ) -> Result<()>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Whether the program's source is loaded and usable
    fn shader_ready(&self, program: ShaderProgram) -> bool;

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId>;

    fn destroy_pipeline(&mut self, pipeline: PipelineId);

    /// Resolve a content path to a loaded texture asset
    fn load_texture_asset(&mut self, path: &str) -> Result<LoadedTexture>;

    /// Drop the reference to a loaded asset
    fn release_asset(&mut self, asset: AssetId);
}
