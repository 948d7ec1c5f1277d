//! Texture asset decoding
//!
//! Content paths are resolved below the configured asset root and decoded
//! with the `image` crate. Pixels are premultiplied on load so every texture
//! the compositor samples holds premultiplied alpha.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{BackendError, Result};

/// Decoded RGBA8 pixels, premultiplied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Resolve a content path below `root`; `None` when it would escape the root
pub fn resolve(root: &Path, content_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(content_path.trim_start_matches(['/', '\\'])).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

/// Decode the image file at `path`
pub fn decode(path: &Path) -> Result<DecodedImage> {
    let image = image::open(path).map_err(|source| BackendError::AssetDecode {
        path: path.display().to_string(),
        source,
    })?;
    let mut rgba = image.into_rgba8();
    premultiply(&mut rgba);

    let (width, height) = rgba.dimensions();
    debug!("decoded '{}' ({}x{})", path.display(), width, height);
    Ok(DecodedImage {
        pixels: rgba.into_raw(),
        width,
        height,
    })
}

fn premultiply(image: &mut image::RgbaImage) {
    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as u16;
        for channel in &mut pixel.0[..3] {
            *channel = ((*channel as u16 * alpha + 127) / 255) as u8;
        }
    }
}

/// Swap red and blue in tightly packed 4-byte pixels
pub fn swap_red_blue(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_stays_below_root() {
        let root = Path::new("/content");
        assert_eq!(
            resolve(root, "/ui/panel.png"),
            Some(PathBuf::from("/content/ui/panel.png"))
        );
        assert_eq!(resolve(root, "./a.png"), Some(PathBuf::from("/content/a.png")));
        assert_eq!(resolve(root, "../secret.png"), None);
    }

    #[test]
    fn decode_premultiplies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("half.png");
        let mut source = image::RgbaImage::new(2, 1);
        source.put_pixel(0, 0, image::Rgba([255, 255, 255, 128]));
        source.put_pixel(1, 0, image::Rgba([200, 100, 50, 255]));
        source.save(&path).unwrap();

        let decoded = decode(&path).unwrap();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(&decoded.pixels[..4], &[128, 128, 128, 128]);
        assert_eq!(&decoded.pixels[4..], &[200, 100, 50, 255]);
    }

    #[test]
    fn decode_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = decode(&dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, BackendError::AssetDecode { .. }));
    }

    #[test]
    fn swizzle() {
        let mut pixels = [1, 2, 3, 4, 5, 6, 7, 8];
        swap_red_blue(&mut pixels);
        assert_eq!(pixels, [3, 2, 1, 4, 7, 6, 5, 8]);
    }
}
