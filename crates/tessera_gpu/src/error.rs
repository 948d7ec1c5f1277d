//! Backend error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up or feeding the wgpu backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("No suitable GPU adapter found")]
    AdapterNotFound,

    #[error("Failed to request GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    /// WGSL that naga rejected, with the rendered diagnostic
    #[error("Shader program '{program}' failed validation:\n{message}")]
    ShaderValidation {
        program: &'static str,
        message: String,
    },

    #[error("Failed to decode texture asset '{path}': {source}")]
    AssetDecode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid device configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Shader watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;
