//! Render layer stack
//!
//! Nested offscreen framebuffers for isolated compositing, plus four
//! postprocess scratch buffers used as ping-pong targets by filter chains.
//!
//! The stack keeps a logical depth separate from the physical framebuffer
//! count: framebuffers are allocated once, kept warm across pushes and
//! frames, and only destroyed when the frame size changes or at teardown.

use tracing::{debug, error};

use crate::command::CommandList;
use crate::device::{GpuDevice, TextureDesc, TextureId, TextureKind};
use crate::handle::LayerHandle;
use crate::math::Color;

/// Number of postprocess scratch buffers
pub const NUM_POSTPROCESS_TARGETS: usize = 4;

/// Offscreen color target with an optional (shared) depth/stencil attachment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Framebuffer {
    pub width: u32,
    pub height: u32,
    pub color: TextureId,
    pub depth_stencil: Option<TextureId>,
    /// Color target allocated by the stack (false when aliasing a host output)
    pub owns_color: bool,
    pub owns_depth_stencil: bool,
    valid: bool,
}

impl Framebuffer {
    /// Stand-in left behind when creation fails; draws into it are skipped
    fn placeholder(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            color: TextureId::default(),
            depth_stencil: None,
            owns_color: false,
            owns_depth_stencil: false,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    fn destroy<D: GpuDevice>(&self, device: &mut D) {
        if self.owns_color {
            device.destroy_texture(self.color);
        }
        if self.owns_depth_stencil {
            if let Some(depth_stencil) = self.depth_stencil {
                device.destroy_texture(depth_stencil);
            }
        }
    }
}

/// Postprocess scratch buffer selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PostprocessTarget {
    Primary,
    Secondary,
    Tertiary,
    BlendMask,
}

impl PostprocessTarget {
    fn index(self) -> usize {
        match self {
            PostprocessTarget::Primary => 0,
            PostprocessTarget::Secondary => 1,
            PostprocessTarget::Tertiary => 2,
            PostprocessTarget::BlendMask => 3,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PostprocessTarget::Primary => "postprocess_primary",
            PostprocessTarget::Secondary => "postprocess_secondary",
            PostprocessTarget::Tertiary => "postprocess_tertiary",
            PostprocessTarget::BlendMask => "postprocess_blend_mask",
        }
    }
}

#[derive(Debug, Default)]
pub struct RenderLayerStack {
    width: u32,
    height: u32,
    layers_size: usize,
    fb_layers: Vec<Framebuffer>,
    postprocess: [Option<Framebuffer>; NUM_POSTPROCESS_TARGETS],
}

impl RenderLayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a frame and push the root layer bound to `output`
    ///
    /// # Panics
    ///
    /// Panics if a frame is already open.
    pub fn begin_frame<D: GpuDevice>(
        &mut self,
        device: &mut D,
        commands: &mut CommandList,
        width: u32,
        height: u32,
        output: TextureId,
    ) -> LayerHandle {
        assert_eq!(
            self.layers_size, 0,
            "begin_frame called while {} layers are open",
            self.layers_size
        );

        if (width, height) != (self.width, self.height) {
            if !self.fb_layers.is_empty() || self.postprocess.iter().any(Option::is_some) {
                debug!(
                    "layer stack resized {}x{} -> {}x{}",
                    self.width, self.height, width, height
                );
            }
            self.destroy_framebuffers(device);
            self.width = width;
            self.height = height;
        }

        self.push(device, commands, Some(output))
    }

    /// Push a layer; new layers without an explicit output start transparent
    ///
    /// # Panics
    ///
    /// Panics outside of a frame.
    pub fn push_layer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        commands: &mut CommandList,
        output: Option<TextureId>,
    ) -> LayerHandle {
        assert!(self.layers_size > 0, "push_layer called outside of a frame");
        self.push(device, commands, output)
    }

    fn push<D: GpuDevice>(
        &mut self,
        device: &mut D,
        commands: &mut CommandList,
        output: Option<TextureId>,
    ) -> LayerHandle {
        let index = self.layers_size;
        if index == self.fb_layers.len() {
            let framebuffer = self.create_layer(device, output);
            self.fb_layers.push(framebuffer);
        } else if self.fb_layers[index].is_valid() {
            self.rebind(device, index, output);
        } else {
            let framebuffer = self.create_layer(device, output);
            self.fb_layers[index] = framebuffer;
        }

        let framebuffer = self.fb_layers[index];
        if output.is_none() && framebuffer.is_valid() {
            commands.clear_target(framebuffer.color, Color::TRANSPARENT);
        }

        self.layers_size += 1;
        LayerHandle(index as u32)
    }

    fn create_layer<D: GpuDevice>(
        &self,
        device: &mut D,
        output: Option<TextureId>,
    ) -> Framebuffer {
        let mut framebuffer = Framebuffer::placeholder(self.width, self.height);

        let color_desc = self.desc("layer_color", TextureKind::RenderTarget);
        match output {
            Some(output) => framebuffer.color = output,
            None => match device.create_texture(&color_desc) {
                Ok(color) => {
                    framebuffer.color = color;
                    framebuffer.owns_color = true;
                }
                Err(e) => {
                    error!("failed to create layer framebuffer: {}", e);
                    return framebuffer;
                }
            },
        }

        let depth_desc = self.desc("layer_depth_stencil", TextureKind::DepthStencil);
        match self.fb_layers.first().and_then(|root| root.depth_stencil) {
            Some(shared) => framebuffer.depth_stencil = Some(shared),
            None => match device.create_texture(&depth_desc) {
                Ok(depth_stencil) => {
                    framebuffer.depth_stencil = Some(depth_stencil);
                    framebuffer.owns_depth_stencil = true;
                }
                Err(e) => {
                    error!("failed to create layer depth/stencil: {}", e);
                    framebuffer.destroy(device);
                    return Framebuffer::placeholder(self.width, self.height);
                }
            },
        }

        framebuffer.valid = true;
        framebuffer
    }

    /// Point a warm framebuffer at `output`, or back at a stack-owned target
    fn rebind<D: GpuDevice>(&mut self, device: &mut D, index: usize, output: Option<TextureId>) {
        let desc = self.desc("layer_color", TextureKind::RenderTarget);
        let framebuffer = &mut self.fb_layers[index];
        match output {
            Some(output) => {
                if framebuffer.owns_color && framebuffer.color != output {
                    device.destroy_texture(framebuffer.color);
                }
                framebuffer.color = output;
                framebuffer.owns_color = false;
            }
            None if !framebuffer.owns_color => match device.create_texture(&desc) {
                Ok(color) => {
                    framebuffer.color = color;
                    framebuffer.owns_color = true;
                }
                Err(e) => {
                    error!("failed to create layer framebuffer: {}", e);
                    framebuffer.valid = false;
                }
            },
            None => {}
        }
    }

    fn desc(&self, label: &'static str, kind: TextureKind) -> TextureDesc {
        TextureDesc {
            label,
            width: self.width,
            height: self.height,
            kind,
        }
    }

    /// Pop the top layer; its framebuffer stays allocated for the next push
    ///
    /// # Panics
    ///
    /// Panics when the stack is empty.
    pub fn pop_layer(&mut self) {
        assert!(self.layers_size > 0, "pop_layer called on an empty layer stack");
        self.layers_size -= 1;
    }

    /// Close the frame, popping the root layer
    ///
    /// # Panics
    ///
    /// Panics unless exactly the root layer is left.
    pub fn end_frame(&mut self) {
        assert_eq!(
            self.layers_size, 1,
            "end_frame with unbalanced layer stack (depth {})",
            self.layers_size
        );
        self.layers_size = 0;
    }

    /// Framebuffer of an open layer; popped layers resolve to `None`
    pub fn get_layer(&self, layer: LayerHandle) -> Option<&Framebuffer> {
        if layer.index() >= self.layers_size {
            return None;
        }
        self.fb_layers.get(layer.index())
    }

    pub fn top_layer_handle(&self) -> Option<LayerHandle> {
        self.layers_size
            .checked_sub(1)
            .map(|index| LayerHandle(index as u32))
    }

    pub fn top_layer(&self) -> Option<&Framebuffer> {
        self.get_layer(self.top_layer_handle()?)
    }

    /// Scratch buffer, created on first access at the stack dimensions
    pub fn postprocess<D: GpuDevice>(
        &mut self,
        device: &mut D,
        target: PostprocessTarget,
    ) -> Framebuffer {
        if let Some(framebuffer) = self.postprocess[target.index()] {
            return framebuffer;
        }

        match device.create_texture(&self.desc(target.label(), TextureKind::RenderTarget)) {
            Ok(color) => {
                let framebuffer = Framebuffer {
                    width: self.width,
                    height: self.height,
                    color,
                    depth_stencil: None,
                    owns_color: true,
                    owns_depth_stencil: false,
                    valid: true,
                };
                self.postprocess[target.index()] = Some(framebuffer);
                framebuffer
            }
            Err(e) => {
                error!("failed to create {}: {}", target.label(), e);
                Framebuffer::placeholder(self.width, self.height)
            }
        }
    }

    /// Exchange primary and secondary without touching GPU memory
    pub fn swap_postprocess_primary_secondary(&mut self) {
        self.postprocess.swap(0, 1);
    }

    /// Drop the logical stack of an interrupted frame
    pub(crate) fn abandon_frame(&mut self) {
        if self.layers_size > 0 {
            debug!("abandoning frame with {} open layers", self.layers_size);
        }
        self.layers_size = 0;
    }

    /// Destroy every framebuffer and scratch buffer
    ///
    /// # Panics
    ///
    /// Panics while a frame is open.
    pub fn destroy_framebuffers<D: GpuDevice>(&mut self, device: &mut D) {
        assert_eq!(
            self.layers_size, 0,
            "destroy_framebuffers called with {} open layers",
            self.layers_size
        );
        for framebuffer in self.fb_layers.drain(..) {
            framebuffer.destroy(device);
        }
        for framebuffer in self.postprocess.iter_mut().filter_map(Option::take) {
            framebuffer.destroy(device);
        }
    }

    /// Logical stack depth
    pub fn depth(&self) -> usize {
        self.layers_size
    }

    /// Physical framebuffer count
    pub fn capacity(&self) -> usize {
        self.fb_layers.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::GpuCommand;
    use crate::headless::HeadlessDevice;

    const OUTPUT: TextureId = TextureId(9000);

    fn clears(commands: &CommandList) -> Vec<TextureId> {
        commands
            .iter()
            .filter_map(|c| match c {
                GpuCommand::Clear { target, .. } => Some(*target),
                _ => None,
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stack discipline
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn root_aliases_output_and_is_not_cleared() {
        let mut device = HeadlessDevice::new();
        let mut commands = CommandList::new();
        let mut stack = RenderLayerStack::new();

        let root = stack.begin_frame(&mut device, &mut commands, 800, 600, OUTPUT);
        assert_eq!(root, LayerHandle::ROOT);
        let fb = stack.get_layer(root).unwrap();
        assert_eq!(fb.color, OUTPUT);
        assert!(!fb.owns_color);
        assert!(fb.owns_depth_stencil);
        assert!(commands.is_empty());

        stack.end_frame();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn pushed_layer_shares_depth_stencil_and_clears() {
        let mut device = HeadlessDevice::new();
        let mut commands = CommandList::new();
        let mut stack = RenderLayerStack::new();
        stack.begin_frame(&mut device, &mut commands, 800, 600, OUTPUT);

        let layer = stack.push_layer(&mut device, &mut commands, None);
        let root_ds = stack.get_layer(LayerHandle::ROOT).unwrap().depth_stencil;
        let fb = *stack.get_layer(layer).unwrap();
        assert_eq!(fb.depth_stencil, root_ds);
        assert!(!fb.owns_depth_stencil);
        assert_eq!(clears(&commands), vec![fb.color]);

        stack.pop_layer();
        assert!(stack.get_layer(layer).is_none());
        assert_eq!(stack.capacity(), 2);
        stack.end_frame();
    }

    #[test]
    fn growth_allocates_exactly_one_framebuffer() {
        let mut device = HeadlessDevice::new();
        let mut commands = CommandList::new();
        let mut stack = RenderLayerStack::new();
        stack.begin_frame(&mut device, &mut commands, 320, 240, OUTPUT);

        let first = stack.push_layer(&mut device, &mut commands, None);
        let first_color = stack.get_layer(first).unwrap().color;
        let created = device.textures_created();

        stack.push_layer(&mut device, &mut commands, None);
        assert_eq!(device.textures_created(), created + 1);
        assert_eq!(stack.get_layer(first).unwrap().color, first_color);

        stack.pop_layer();
        stack.pop_layer();
        stack.end_frame();

        // The next frame reuses the warm pool
        stack.begin_frame(&mut device, &mut commands, 320, 240, OUTPUT);
        stack.push_layer(&mut device, &mut commands, None);
        stack.push_layer(&mut device, &mut commands, None);
        assert_eq!(device.textures_created(), created + 1);
        stack.pop_layer();
        stack.pop_layer();
        stack.end_frame();
    }

    #[test]
    fn resize_recreates_everything() {
        let mut device = HeadlessDevice::new();
        let mut commands = CommandList::new();
        let mut stack = RenderLayerStack::new();
        stack.begin_frame(&mut device, &mut commands, 320, 240, OUTPUT);
        stack.push_layer(&mut device, &mut commands, None);
        stack.postprocess(&mut device, PostprocessTarget::Primary);
        stack.pop_layer();
        stack.end_frame();

        stack.begin_frame(&mut device, &mut commands, 640, 480, OUTPUT);
        assert_eq!(stack.capacity(), 1);
        // Only the root depth/stencil is live
        assert_eq!(device.live_texture_count(), 1);
        let primary = stack.postprocess(&mut device, PostprocessTarget::Primary);
        assert_eq!((primary.width, primary.height), (640, 480));
        stack.end_frame();
    }

    #[test]
    #[should_panic(expected = "unbalanced")]
    fn end_frame_with_open_layer_panics() {
        let mut device = HeadlessDevice::new();
        let mut commands = CommandList::new();
        let mut stack = RenderLayerStack::new();
        stack.begin_frame(&mut device, &mut commands, 100, 100, OUTPUT);
        stack.push_layer(&mut device, &mut commands, None);
        stack.end_frame();
    }

    #[test]
    #[should_panic(expected = "empty layer stack")]
    fn over_pop_panics() {
        let mut stack = RenderLayerStack::new();
        stack.pop_layer();
    }

    #[test]
    fn failed_creation_leaves_placeholder() {
        let mut device = HeadlessDevice::new();
        let mut commands = CommandList::new();
        let mut stack = RenderLayerStack::new();
        stack.begin_frame(&mut device, &mut commands, 100, 100, OUTPUT);

        device.fail_label("layer_color");
        let layer = stack.push_layer(&mut device, &mut commands, None);
        assert!(!stack.get_layer(layer).unwrap().is_valid());
        assert!(commands.is_empty());
        stack.pop_layer();

        device.clear_failures();
        let layer = stack.push_layer(&mut device, &mut commands, None);
        assert!(stack.get_layer(layer).unwrap().is_valid());
        stack.pop_layer();
        stack.end_frame();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Postprocess buffers
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn postprocess_is_lazy_and_swappable() {
        let mut device = HeadlessDevice::new();
        let mut commands = CommandList::new();
        let mut stack = RenderLayerStack::new();
        stack.begin_frame(&mut device, &mut commands, 200, 100, OUTPUT);
        let before = device.textures_created();

        let primary = stack.postprocess(&mut device, PostprocessTarget::Primary);
        let secondary = stack.postprocess(&mut device, PostprocessTarget::Secondary);
        assert_eq!(device.textures_created(), before + 2);
        assert_eq!(
            stack.postprocess(&mut device, PostprocessTarget::Primary),
            primary
        );

        stack.swap_postprocess_primary_secondary();
        assert_eq!(
            stack.postprocess(&mut device, PostprocessTarget::Primary),
            secondary
        );
        assert_eq!(
            stack.postprocess(&mut device, PostprocessTarget::Secondary),
            primary
        );
        assert_eq!(device.textures_created(), before + 2);
        stack.end_frame();

        stack.destroy_framebuffers(&mut device);
        assert_eq!(device.live_texture_count(), 0);
    }
}
