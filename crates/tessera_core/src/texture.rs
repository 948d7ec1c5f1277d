//! Texture registry
//!
//! Maps [`TextureHandle`]s to GPU textures. Handles may be backed by a loaded
//! content asset (released individually) or by a texture the registry
//! allocated itself (freed in bulk by [`TextureRegistry::release_all`]).

use tracing::{debug, error, warn};

use crate::device::{AssetId, GpuDevice, TextureDesc, TextureId, TextureKind};
use crate::handle::TextureHandle;

/// One registered texture
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureEntry {
    pub texture: TextureId,
    pub dimensions: (u32, u32),
    /// Owning content asset, if the texture was loaded from disk
    pub asset: Option<AssetId>,
    /// Font atlas textures take the font pipeline
    pub is_font: bool,
}

#[derive(Debug, Default)]
pub struct TextureRegistry {
    /// Index 0 is the reserved "no texture" slot
    entries: Vec<Option<TextureEntry>>,
    /// Textures allocated by the registry, destroyed at teardown
    allocated: Vec<TextureId>,
    generate_override: Option<TextureHandle>,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self {
            entries: vec![None],
            allocated: Vec::new(),
            generate_override: None,
        }
    }

    /// Store `entry` in the first free slot after the reserved one
    fn insert(&mut self, entry: TextureEntry) -> TextureHandle {
        if self.entries.is_empty() {
            self.entries.push(None);
        }
        if let Some(index) = self.entries.iter().skip(1).position(Option::is_none) {
            self.entries[index + 1] = Some(entry);
            return TextureHandle(index as u32 + 1);
        }
        self.entries.push(Some(entry));
        TextureHandle((self.entries.len() - 1) as u32)
    }

    /// Register an externally owned texture (font atlases, host render targets)
    pub fn register(
        &mut self,
        texture: TextureId,
        dimensions: (u32, u32),
        is_font: bool,
    ) -> TextureHandle {
        self.insert(TextureEntry {
            texture,
            dimensions,
            asset: None,
            is_font,
        })
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&TextureEntry> {
        if !handle.is_valid() {
            return None;
        }
        self.entries.get(handle.0 as usize)?.as_ref()
    }

    /// Find the handle registered for a GPU texture (0 when unknown)
    pub fn handle_of(&self, texture: TextureId) -> TextureHandle {
        self.entries
            .iter()
            .position(|e| e.is_some_and(|e| e.texture == texture))
            .map(|i| TextureHandle(i as u32))
            .unwrap_or(TextureHandle::INVALID)
    }

    /// Load a content asset; returns the zero handle when it cannot be resolved
    pub fn load<D: GpuDevice>(
        &mut self,
        device: &mut D,
        content_path: &str,
    ) -> (TextureHandle, (u32, u32)) {
        match device.load_texture_asset(content_path) {
            Ok(loaded) => {
                let handle = self.insert(TextureEntry {
                    texture: loaded.texture,
                    dimensions: loaded.dimensions,
                    asset: Some(loaded.asset),
                    is_font: false,
                });
                debug!(
                    "loaded texture '{}' as {:?} ({}x{})",
                    content_path, handle, loaded.dimensions.0, loaded.dimensions.1
                );
                (handle, loaded.dimensions)
            }
            Err(e) => {
                warn!("failed to load texture '{}': {}", content_path, e);
                (TextureHandle::INVALID, (0, 0))
            }
        }
    }

    /// Arm the one-shot override consumed by the next empty `generate` call
    pub fn hook_generate_override(&mut self, handle: TextureHandle) {
        if let Some(previous) = self.generate_override.replace(handle) {
            warn!(
                "texture override {:?} replaced {:?} before it was consumed",
                handle, previous
            );
        }
    }

    /// Override that has been armed but not consumed yet
    pub fn pending_override(&self) -> Option<TextureHandle> {
        self.generate_override
    }

    /// Allocate a texture and start uploading `data` (empty data leaves it uninitialized)
    ///
    /// An armed override is returned instead of allocating when `data` is empty.
    pub fn generate<D: GpuDevice>(
        &mut self,
        device: &mut D,
        data: &[u8],
        dimensions: (u32, u32),
    ) -> TextureHandle {
        if data.is_empty() {
            if let Some(handle) = self.generate_override.take() {
                return handle;
            }
        }

        let handle = self.allocate(device, dimensions);
        let Some(texture) = self.get(handle).map(|e| e.texture) else {
            return handle;
        };

        if !data.is_empty() {
            let expected = dimensions.0 as usize * dimensions.1 as usize * 4;
            if data.len() < expected {
                warn!(
                    "texture upload for {:?} skipped: {} bytes for {}x{} pixels",
                    handle,
                    data.len(),
                    dimensions.0,
                    dimensions.1
                );
            } else if let Err(e) = device.upload_texture(texture, data, dimensions) {
                warn!("texture upload for {:?} skipped: {}", handle, e);
            }
        }
        handle
    }

    /// Allocate an uninitialized texture; never consumes the override
    pub fn allocate<D: GpuDevice>(
        &mut self,
        device: &mut D,
        dimensions: (u32, u32),
    ) -> TextureHandle {
        let texture = match device.create_texture(&TextureDesc {
            label: "generated_texture",
            width: dimensions.0,
            height: dimensions.1,
            kind: TextureKind::Sampled,
        }) {
            Ok(texture) => texture,
            Err(e) => {
                error!(
                    "failed to generate {}x{} texture: {}",
                    dimensions.0, dimensions.1, e
                );
                return TextureHandle::INVALID;
            }
        };

        self.allocated.push(texture);
        self.insert(TextureEntry {
            texture,
            dimensions,
            asset: None,
            is_font: false,
        })
    }

    /// Drop the asset reference of an asset-backed texture
    ///
    /// Registry-allocated textures stay alive until [`release_all`](Self::release_all).
    pub fn release<D: GpuDevice>(&mut self, device: &mut D, handle: TextureHandle) {
        if !handle.is_valid() {
            return;
        }
        let Some(slot) = self.entries.get_mut(handle.0 as usize) else {
            return;
        };
        if let Some(asset) = slot.and_then(|e| e.asset) {
            device.release_asset(asset);
            *slot = None;
        }
    }

    /// Release every asset and destroy every registry-allocated texture
    pub fn release_all<D: GpuDevice>(&mut self, device: &mut D) {
        for entry in self.entries.iter().flatten() {
            if let Some(asset) = entry.asset {
                device.release_asset(asset);
            }
        }
        for texture in self.allocated.drain(..) {
            device.destroy_texture(texture);
        }
        self.entries.clear();
        self.entries.push(None);
        self.generate_override = None;
    }

    /// Registered handles, including asset, generated and external textures
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }
}

/// Map a UI source path onto the host's content path
///
/// The extension is replaced by `asset_extension`; without one the path is
/// used as-is.
pub fn content_path(source: &str, asset_extension: Option<&str>) -> String {
    let Some(extension) = asset_extension else {
        return source.to_string();
    };
    let file_start = source.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let stem_end = source[file_start..]
        .rfind('.')
        .filter(|&i| i > 0)
        .map_or(source.len(), |i| file_start + i);
    format!("{}.{}", &source[..stem_end], extension.trim_start_matches('.'))
}
