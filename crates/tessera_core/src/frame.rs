//! Per-frame render state
//!
//! Everything that used to be ambient (viewport, transform, scissor, stencil
//! state) lives in a [`RenderFrameState`] created by `begin` and consumed by
//! `end`. Dynamic state commands are only recorded when the value changes.

use crate::command::{CommandList, GpuCommand};
use crate::math::{IRect, Mat4, Viewport};

/// View-projection for UI coordinates: origin top-left, y down, pixel units
pub fn ui_projection(viewport: &Viewport) -> Mat4 {
    let (w, h) = (viewport.width, viewport.height);
    let view = Mat4::translation(-w / 2.0, -h / 2.0, 0.0);
    let projection = Mat4::ortho_off_center(-w / 2.0, w / 2.0, h / 2.0, -h / 2.0, 0.0, 1.0);
    projection.mul(&view)
}

#[derive(Debug)]
pub struct RenderFrameState {
    pub viewport: Viewport,
    pub view_projection: Mat4,
    pub transform: Mat4,
    /// Stored scissor region, applied while `use_scissor` is set
    pub scissor: IRect,
    pub use_scissor: bool,
    pub use_stencil: bool,
    /// Stencil value a fragment must reach to pass the clip mask
    pub stencil_test_value: u32,
    pub commands: CommandList,
    applied_viewport: Option<Viewport>,
    applied_scissor: Option<IRect>,
    applied_stencil_reference: Option<u32>,
}

impl RenderFrameState {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            view_projection: ui_projection(&viewport),
            transform: Mat4::IDENTITY,
            scissor: viewport.bounds(),
            use_scissor: false,
            use_stencil: false,
            stencil_test_value: 0,
            commands: CommandList::new(),
            applied_viewport: None,
            applied_scissor: None,
            applied_stencil_reference: None,
        }
    }

    /// `None` resets to identity
    pub fn set_transform(&mut self, transform: Option<&Mat4>) {
        self.transform = transform.copied().unwrap_or(Mat4::IDENTITY);
    }

    /// Scissor draws are clipped to right now
    pub fn effective_scissor(&self) -> IRect {
        if self.use_scissor {
            self.scissor
        } else {
            self.viewport.bounds()
        }
    }

    /// Reference value for stencil-tested draws; 0 always passes
    pub fn stencil_reference(&self) -> u32 {
        if self.use_stencil {
            self.stencil_test_value
        } else {
            0
        }
    }

    pub fn apply_viewport(&mut self, viewport: Viewport) {
        if self.applied_viewport != Some(viewport) {
            self.commands.push(GpuCommand::SetViewport(viewport));
            self.applied_viewport = Some(viewport);
        }
    }

    pub fn apply_scissor_rect(&mut self, rect: IRect) {
        if self.applied_scissor != Some(rect) {
            self.commands.push(GpuCommand::SetScissor(rect));
            self.applied_scissor = Some(rect);
        }
    }

    /// Re-apply the frame viewport and the effective scissor after internal passes
    pub fn restore_viewport_and_scissor(&mut self) {
        self.apply_viewport(self.viewport);
        self.apply_scissor_rect(self.effective_scissor());
    }

    pub fn apply_stencil_reference(&mut self, reference: u32) {
        if self.applied_stencil_reference != Some(reference) {
            self.commands.push(GpuCommand::SetStencilReference(reference));
            self.applied_stencil_reference = Some(reference);
        }
    }

    /// Number of `SetScissor` commands recorded so far
    pub fn scissor_commands(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, GpuCommand::SetScissor(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_maps_pixels_to_ndc() {
        let vp = Viewport::from_size(800, 600);
        let m = ui_projection(&vp);
        let tl = m.transform_point([0.0, 0.0, 0.0, 1.0]);
        let br = m.transform_point([800.0, 600.0, 0.0, 1.0]);
        assert!((tl[0] + 1.0).abs() < 1e-5 && (tl[1] - 1.0).abs() < 1e-5);
        assert!((br[0] - 1.0).abs() < 1e-5 && (br[1] + 1.0).abs() < 1e-5);
    }

    #[test]
    fn dynamic_state_is_deduplicated() {
        let mut frame = RenderFrameState::new(Viewport::from_size(100, 100));
        let rect = IRect::from_position_size(10, 10, 20, 20);
        frame.apply_scissor_rect(rect);
        frame.apply_scissor_rect(rect);
        frame.apply_stencil_reference(0);
        frame.apply_stencil_reference(0);
        assert_eq!(frame.commands.len(), 2);
    }

    #[test]
    fn disabled_scissor_covers_viewport() {
        let mut frame = RenderFrameState::new(Viewport::from_size(64, 32));
        frame.scissor = IRect::from_position_size(1, 1, 2, 2);
        assert_eq!(frame.effective_scissor(), IRect::from_min_max([0, 0], [64, 32]));
        frame.use_scissor = true;
        assert_eq!(frame.effective_scissor(), frame.scissor);
    }
}
