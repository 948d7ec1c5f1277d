//! Geometry and color primitives shared by the compositing pipeline
//!
//! Matrices are column-major (`cols[i]` is column `i`) and act on column
//! vectors, matching the WGSL `mat4x4<f32>` layout the GPU backend uploads.

// ─────────────────────────────────────────────────────────────────────────────
// Vectors and rectangles
// ─────────────────────────────────────────────────────────────────────────────

/// 2D vector
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };
    pub const ONE: Vec2 = Vec2 { x: 1.0, y: 1.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Floating point rectangle (origin + size)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }
}

/// Integer pixel rectangle stored as half-open `[min, max)` corners
///
/// Scissor regions and blur windows are tracked in whole pixels so that the
/// repeated halving during blur downscaling stays exact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IRect {
    pub min: [i32; 2],
    pub max: [i32; 2],
}

impl IRect {
    pub const fn from_min_max(min: [i32; 2], max: [i32; 2]) -> Self {
        Self { min, max }
    }

    pub const fn from_position_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            min: [x, y],
            max: [x + width, y + height],
        }
    }

    pub fn width(&self) -> i32 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> i32 {
        self.max[1] - self.min[1]
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Grow the rectangle by `amount` pixels on every side
    pub fn extend(&self, amount: i32) -> IRect {
        IRect {
            min: [self.min[0] - amount, self.min[1] - amount],
            max: [self.max[0] + amount, self.max[1] + amount],
        }
    }

    /// Scale both corners by `factor` (used to map a downscaled region back up)
    pub fn scale(&self, factor: i32) -> IRect {
        IRect {
            min: [self.min[0] * factor, self.min[1] * factor],
            max: [self.max[0] * factor, self.max[1] * factor],
        }
    }

    /// Clamp both corners into `[0, width] x [0, height]`
    pub fn clamp_to(&self, width: u32, height: u32) -> IRect {
        let w = width as i32;
        let h = height as i32;
        IRect {
            min: [self.min[0].clamp(0, w), self.min[1].clamp(0, h)],
            max: [self.max[0].clamp(0, w), self.max[1].clamp(0, h)],
        }
    }

    /// Normalized `[min_u, min_v, max_u, max_v]` coordinates inside a texture
    pub fn to_uv(&self, width: u32, height: u32) -> [f32; 4] {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        [
            self.min[0] as f32 / w,
            self.min[1] as f32 / h,
            self.max[0] as f32 / w,
            self.max[1] as f32 / h,
        ]
    }
}

/// Render viewport in pixels
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Pixel bounds of the viewport, used as the scissor when clipping is off
    pub fn bounds(&self) -> IRect {
        IRect::from_position_size(
            self.x as i32,
            self.y as i32,
            self.width as i32,
            self.height as i32,
        )
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Target size in whole pixels
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width.max(0.0) as u32, self.height.max(0.0) as u32)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Colors
// ─────────────────────────────────────────────────────────────────────────────

/// RGBA color with f32 components
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl From<Rgba8> for Color {
    fn from(c: Rgba8) -> Self {
        Color::rgba(
            c.r as f32 / 255.0,
            c.g as f32 / 255.0,
            c.b as f32 / 255.0,
            c.a as f32 / 255.0,
        )
    }
}

/// 8-bit straight-alpha color as supplied by the UI library
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Multiply the color channels by alpha
    pub fn premultiplied(self) -> Rgba8 {
        let scale = |c: u8| ((c as u16 * self.a as u16) / 255) as u8;
        Rgba8::new(scale(self.r), scale(self.g), scale(self.b), self.a)
    }
}

impl Default for Rgba8 {
    fn default() -> Self {
        Rgba8::new(0, 0, 0, 255)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Matrices
// ─────────────────────────────────────────────────────────────────────────────

/// 4x4 column-major matrix
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Build from rows as they are written on paper
    pub const fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        Self {
            cols: [
                [rows[0][0], rows[1][0], rows[2][0], rows[3][0]],
                [rows[0][1], rows[1][1], rows[2][1], rows[3][1]],
                [rows[0][2], rows[1][2], rows[2][2], rows[3][2]],
                [rows[0][3], rows[1][3], rows[2][3], rows[3][3]],
            ],
        }
    }

    pub fn diagonal(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self {
            cols: [
                [x, 0.0, 0.0, 0.0],
                [0.0, y, 0.0, 0.0],
                [0.0, 0.0, z, 0.0],
                [0.0, 0.0, 0.0, w],
            ],
        }
    }

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [x, y, z, 1.0],
            ],
        }
    }

    /// Off-center orthographic projection mapping depth `[near, far]` to `[0, 1]`
    pub fn ortho_off_center(
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let rl = 1.0 / (right - left);
        let tb = 1.0 / (top - bottom);
        let fnr = 1.0 / (far - near);
        Self {
            cols: [
                [2.0 * rl, 0.0, 0.0, 0.0],
                [0.0, 2.0 * tb, 0.0, 0.0],
                [0.0, 0.0, fnr, 0.0],
                [-(left + right) * rl, -(top + bottom) * tb, -near * fnr, 1.0],
            ],
        }
    }

    /// Multiply two matrices (`self * other`)
    pub fn mul(&self, other: &Mat4) -> Mat4 {
        let mut result = [[0.0f32; 4]; 4];
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    result[i][j] += self.cols[k][j] * other.cols[i][k];
                }
            }
        }
        Mat4 { cols: result }
    }

    pub fn transpose(&self) -> Mat4 {
        let c = &self.cols;
        Mat4 {
            cols: [
                [c[0][0], c[1][0], c[2][0], c[3][0]],
                [c[0][1], c[1][1], c[2][1], c[3][1]],
                [c[0][2], c[1][2], c[2][2], c[3][2]],
                [c[0][3], c[1][3], c[2][3], c[3][3]],
            ],
        }
    }

    /// Element at `row`, `col`
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.cols[col][row]
    }

    pub fn transform_point(&self, p: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (row, value) in out.iter_mut().enumerate() {
            *value = (0..4).map(|k| self.cols[k][row] * p[k]).sum();
        }
        out
    }

    /// Linear blend between two matrices
    pub fn lerp(&self, other: &Mat4, t: f32) -> Mat4 {
        let mut cols = [[0.0f32; 4]; 4];
        for (i, col) in cols.iter_mut().enumerate() {
            for (j, v) in col.iter_mut().enumerate() {
                *v = self.cols[i][j] + (other.cols[i][j] - self.cols[i][j]) * t;
            }
        }
        Mat4 { cols }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn from_rows_reads_like_paper() {
        let m = Mat4::from_rows([
            [1.0, 2.0, 3.0, 4.0],
            [5.0, 6.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, 16.0],
        ]);
        assert_eq!(m.get(0, 3), 4.0);
        assert_eq!(m.get(3, 0), 13.0);
        assert_eq!(m.transpose().get(0, 3), 13.0);
    }

    #[test]
    fn ui_projection_maps_top_left_to_ndc_corner() {
        let (w, h) = (800.0f32, 600.0f32);
        let view = Mat4::translation(-w / 2.0, -h / 2.0, 0.0);
        let proj = Mat4::ortho_off_center(-w / 2.0, w / 2.0, h / 2.0, -h / 2.0, 0.0, 1.0);
        let vp = proj.mul(&view);

        let top_left = vp.transform_point([0.0, 0.0, 0.0, 1.0]);
        assert!(approx(top_left[0], -1.0));
        assert!(approx(top_left[1], 1.0));

        let bottom_right = vp.transform_point([w, h, 0.0, 1.0]);
        assert!(approx(bottom_right[0], 1.0));
        assert!(approx(bottom_right[1], -1.0));
    }

    #[test]
    fn irect_helpers() {
        let r = IRect::from_position_size(10, 20, 30, 40);
        assert_eq!(r.max, [40, 60]);
        assert_eq!(r.extend(1), IRect::from_min_max([9, 19], [41, 61]));
        assert_eq!(r.scale(2).min, [20, 40]);
        assert!(IRect::from_min_max([5, 5], [5, 9]).is_empty());
    }

    #[test]
    fn premultiply_scales_channels() {
        let c = Rgba8::new(255, 128, 0, 128).premultiplied();
        assert_eq!(c, Rgba8::new(128, 64, 0, 128));
    }
}
