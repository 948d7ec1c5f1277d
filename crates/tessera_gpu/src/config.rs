//! Backend configuration
//!
//! Loaded from a `tessera.toml`-style file or built in code, then adjusted by
//! `TESSERA_*` environment overrides:
//!
//! ```toml
//! target_format = "bgra8_unorm"
//! asset_root = "assets"
//! shader_dir = "shaders"
//! hot_reload = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BackendError, Result};

/// Color format of every layer, scratch buffer and generated texture
///
/// The host's output texture must use the same format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
}

impl TargetFormat {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TargetFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TargetFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        }
    }

    /// Whether RGBA uploads must be swizzled into this format
    pub fn swaps_red_blue(self) -> bool {
        self == TargetFormat::Bgra8Unorm
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WgpuDeviceConfig {
    pub target_format: TargetFormat,
    /// Directory texture content paths are resolved against
    pub asset_root: PathBuf,
    /// Directory with `<program>.wgsl` overrides; built-in sources otherwise
    pub shader_dir: Option<PathBuf>,
    /// Watch `shader_dir` and rebuild pipelines when a program changes
    pub hot_reload: bool,
}

impl Default for WgpuDeviceConfig {
    fn default() -> Self {
        Self {
            target_format: TargetFormat::default(),
            asset_root: PathBuf::from("."),
            shader_dir: None,
            hot_reload: false,
        }
    }
}

impl WgpuDeviceConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a config file; relative directories are resolved against its parent
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| BackendError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            if config.asset_root.is_relative() {
                config.asset_root = base.join(&config.asset_root);
            }
            if let Some(dir) = config.shader_dir.as_mut().filter(|d| d.is_relative()) {
                *dir = base.join(&*dir);
            }
        }
        debug!("loaded device config from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides
    ///
    /// - `TESSERA_ASSET_ROOT`: texture asset directory
    /// - `TESSERA_SHADER_DIR`: WGSL override directory
    /// - `TESSERA_SHADER_HOT_RELOAD`: `0`/`1`, `false`/`true`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(root) = env_string("TESSERA_ASSET_ROOT") {
            self.asset_root = PathBuf::from(root);
        }
        if let Some(dir) = env_string("TESSERA_SHADER_DIR") {
            self.shader_dir = Some(PathBuf::from(dir));
        }
        if let Some(hot_reload) = env_bool("TESSERA_SHADER_HOT_RELOAD") {
            self.hot_reload = hot_reload;
        }
        debug!("device config: {:?}", self);
        self
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    parse_bool(&env_string(name)?)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
