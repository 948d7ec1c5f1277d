//! Whole-frame scenarios recorded against the headless device

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_core::device::BufferId;
use tessera_core::uniforms::FilterUniforms;
use tessera_core::*;

const OUTPUT: TextureId = TextureId(90_000);

fn renderer() -> Renderer<HeadlessDevice> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Renderer::new(HeadlessDevice::new(), RendererConfig::default())
}

fn quad(r: &mut Renderer<HeadlessDevice>, x: f32, y: f32, size: f32) -> GeometryHandle {
    let vertex = |px, py| Vertex {
        position: Vec2::new(px, py),
        tex_coord: Vec2::ZERO,
        color: Rgba8::new(255, 0, 0, 255),
    };
    let vertices = [
        vertex(x, y),
        vertex(x + size, y),
        vertex(x + size, y + size),
        vertex(x, y + size),
    ];
    r.compile_geometry(&vertices, &[0, 1, 2, 0, 2, 3])
}

/// Pipeline label of every draw, in submission order
fn draw_labels(r: &Renderer<HeadlessDevice>, commands: &[GpuCommand]) -> Vec<&'static str> {
    let mut current = None;
    let mut labels = Vec::new();
    for command in commands {
        match command {
            GpuCommand::SetPipeline(id) => current = Some(*id),
            c if c.is_draw() => {
                let label = current
                    .and_then(|id| r.device().pipeline_desc(id))
                    .map_or("<none>", |desc| desc.label);
                labels.push(label);
            }
            _ => {}
        }
    }
    labels
}

fn clears(commands: &[GpuCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, GpuCommand::Clear { .. }))
        .count()
}

fn stencil_references(commands: &[GpuCommand]) -> Vec<u32> {
    commands
        .iter()
        .filter_map(|c| match c {
            GpuCommand::SetStencilReference(reference) => Some(*reference),
            _ => None,
        })
        .collect()
}

/// Uniforms bound for the first fullscreen draw using `label`
fn filter_uniforms_of(
    r: &Renderer<HeadlessDevice>,
    commands: &[GpuCommand],
    label: &str,
) -> FilterUniforms {
    let mut current = None;
    let mut uniforms = None;
    for command in commands {
        match command {
            GpuCommand::SetPipeline(id) => current = r.device().pipeline_desc(*id).map(|d| d.label),
            GpuCommand::SetUniforms(bytes) => uniforms = Some(bytes.clone()),
            GpuCommand::DrawFullscreen if current == Some(label) => {
                let bytes = uniforms.expect("draw without uniforms");
                return bytemuck::pod_read_unaligned(&bytes);
            }
            _ => {}
        }
    }
    panic!("no {} draw recorded", label)
}

// ─────────────────────────────────────────────────────────────────────────────
// Layer stack
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn push_composite_pop_frame() {
    let mut r = renderer();

    r.begin(OUTPUT, Viewport::from_size(800, 600));
    assert_eq!(r.layers().depth(), 1);
    let layer = r.push_layer();
    assert_eq!(layer, LayerHandle(1));
    assert_eq!(r.layers().depth(), 2);

    let geometry = quad(&mut r, 10.0, 10.0, 100.0);
    r.render_geometry(geometry, Vec2::new(5.0, 5.0), TextureHandle::INVALID);
    r.composite_layers(layer, LayerHandle::ROOT, LayerBlend::Blend, &[]);
    r.pop_layer();
    let commands = r.end().into_vec();
    assert_eq!(r.layers().depth(), 0);

    assert_eq!(
        draw_labels(&r, &commands),
        ["color", "blit", "passthrough_blend"]
    );
    // New layer plus primary and secondary scratch buffers
    assert_eq!(clears(&commands), 3);

    // Nothing leaks into the next frame: the warm layer is cleared again
    let textures_created = r.device().textures_created();
    r.begin(OUTPUT, Viewport::from_size(800, 600));
    r.push_layer();
    r.pop_layer();
    let commands = r.end().into_vec();
    assert_eq!(clears(&commands), 1);
    assert_eq!(r.device().textures_created(), textures_created);
}

#[test]
fn root_layer_aliases_output() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    assert_eq!(r.layers().get_layer(LayerHandle::ROOT).unwrap().color, OUTPUT);
    let commands = r.end().into_vec();
    assert_eq!(clears(&commands), 0);
    assert!(matches!(
        commands.last(),
        Some(GpuCommand::SetRenderTarget { color, .. }) if *color == OUTPUT
    ));
}

#[test]
fn capacity_grows_by_one_and_keeps_existing_layers() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(128, 128));
    let first = r.push_layer();
    let first_color = r.layers().get_layer(first).unwrap().color;
    assert_eq!(r.layers().capacity(), 2);

    r.push_layer();
    assert_eq!(r.layers().capacity(), 3);
    assert_eq!(r.layers().get_layer(first).unwrap().color, first_color);

    r.pop_layer();
    r.pop_layer();
    // Popped layers are out of bounds even though their memory is kept
    assert!(r.layers().get_layer(first).is_none());
    r.push_layer();
    assert_eq!(r.layers().capacity(), 3);
    r.pop_layer();
    r.end();
}

#[test]
fn resize_recreates_framebuffers() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(100, 100));
    r.push_layer();
    r.pop_layer();
    r.end();
    let live = r.device().live_texture_count();

    r.begin(OUTPUT, Viewport::from_size(200, 100));
    assert_eq!(r.layers().dimensions(), (200, 100));
    let layer = r.push_layer();
    let color = r.layers().get_layer(layer).unwrap().color;
    assert_eq!(r.device().texture_desc(color).unwrap().width, 200);
    r.pop_layer();
    r.end();
    assert_eq!(r.device().live_texture_count(), live);
}

#[test]
#[should_panic(expected = "end_frame with unbalanced layer stack")]
fn unbalanced_end_panics() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    r.push_layer();
    r.end();
}

#[test]
#[should_panic(expected = "pop_layer called on an empty layer stack")]
fn over_pop_panics() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    r.pop_layer();
    r.pop_layer();
}

// ─────────────────────────────────────────────────────────────────────────────
// Resources
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn generated_texture_keeps_dimensions() {
    let mut r = renderer();
    let pixels = vec![128u8; 20 * 10 * 4];
    let handle = r.generate_texture(&pixels, (20, 10));
    assert_eq!(r.textures().get(handle).unwrap().dimensions, (20, 10));
}

#[test]
fn bogus_filter_leaves_slots_untouched() {
    let mut r = renderer();
    let opacity = r.compile_filter("opacity", &Parameters::new().with("value", 0.5f32));
    assert_eq!(
        r.filter(opacity),
        Some(&CompiledFilter::Passthrough { blend_factor: 0.5 })
    );

    let bogus = r.compile_filter("bogus-name", &Parameters::new());
    assert_eq!(bogus, FilterHandle::INVALID);
    assert_eq!(r.filter_capacity(), 1);
    assert_eq!(
        r.filter(opacity),
        Some(&CompiledFilter::Passthrough { blend_factor: 0.5 })
    );
}

#[test]
fn released_filter_slot_is_reused_clean() {
    let mut r = renderer();
    let blur = r.compile_filter("blur", &Parameters::new().with("sigma", 4.0f32));
    r.release_filter(blur);
    assert!(r.filter(blur).is_none());

    let invert = r.compile_filter("invert", &Parameters::new().with("value", 1.0f32));
    assert_eq!(invert, blur);
    assert!(matches!(r.filter(invert), Some(CompiledFilter::ColorMatrix(_))));
}

#[test]
fn texture_paths_use_configured_extension() {
    let config = RendererConfig::default().with_asset_extension("tex");
    let mut device = HeadlessDevice::new();
    device.add_asset("ui/panel.tex", (32, 16));
    let mut r = Renderer::new(device, config);

    let (handle, dimensions) = r.load_texture("ui/panel.png");
    assert!(handle.is_valid());
    assert_eq!(dimensions, (32, 16));

    let (missing, _) = r.load_texture("ui/missing.png");
    assert_eq!(missing, TextureHandle::INVALID);
}

#[test]
fn release_resources_frees_textures_and_geometry() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let geometry = quad(&mut r, 0.0, 0.0, 8.0);
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    r.end();

    let textures_before = r.device().live_texture_count();
    let buffers_before = r.device().live_buffer_count();
    r.generate_texture(&[], (16, 16));
    r.generate_texture(&[0u8; 4], (1, 1));
    assert_eq!(r.device().live_texture_count(), textures_before + 2);

    r.release_resources();
    assert_eq!(r.device().live_texture_count(), textures_before);
    // The geometry's vertex and index buffers are gone
    assert_eq!(r.device().live_buffer_count(), buffers_before - 2);
    assert!(r.geometry(geometry).is_none());
    assert!(r.textures().is_empty());
}

#[test]
fn generate_override_hands_out_font_atlas_once() {
    let mut r = renderer();
    let atlas = r.register_font_texture(TextureId(777), (256, 256));
    r.hook_generate_override(atlas);

    assert_eq!(r.generate_texture(&[], (256, 256)), atlas);
    assert_ne!(r.generate_texture(&[], (256, 256)), atlas);
    assert_eq!(r.texture_handle(TextureId(777)), atlas);
}

// ─────────────────────────────────────────────────────────────────────────────
// Drawing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn texture_kind_selects_pipeline() {
    let mut r = renderer();
    let font = r.register_font_texture(TextureId(501), (64, 64));
    let image = r.register_texture(TextureId(502), (64, 64));

    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let geometry = quad(&mut r, 0.0, 0.0, 16.0);
    r.render_geometry(geometry, Vec2::ZERO, font);
    r.render_geometry(geometry, Vec2::ZERO, image);
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle(9999));
    r.release_geometry(geometry);
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end().into_vec();

    assert_eq!(draw_labels(&r, &commands), ["font", "image"]);
}

/// Vertex and index buffers of every indexed draw
fn drawn_buffers(commands: &[GpuCommand]) -> Vec<BufferId> {
    commands
        .iter()
        .filter_map(|c| match c {
            GpuCommand::DrawIndexed {
                vertex_buffer,
                index_buffer,
                ..
            } => Some([*vertex_buffer, *index_buffer]),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn slot_reused_mid_frame_keeps_earlier_draw_buffers() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let small = quad(&mut r, 0.0, 0.0, 8.0);
    r.render_geometry(small, Vec2::ZERO, TextureHandle::INVALID);
    r.release_geometry(small);

    // Larger than the first batch, so the recycled slot grows its buffers
    let vertices: Vec<Vertex> = (0..64)
        .map(|i| Vertex {
            position: Vec2::new(i as f32, 0.0),
            ..Vertex::default()
        })
        .collect();
    let indices: Vec<i32> = (0..64).collect();
    let large = r.compile_geometry(&vertices, &indices);
    assert_eq!(large, small);
    r.render_geometry(large, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end().into_vec();

    let buffers = drawn_buffers(&commands);
    assert_eq!(buffers.len(), 4);
    assert_ne!(buffers[0], buffers[2]);
    for buffer in &buffers {
        assert!(
            r.device().buffer_desc(*buffer).is_some(),
            "{buffer:?} destroyed before the frame executed"
        );
    }

    r.begin(OUTPUT, Viewport::from_size(64, 64));
    assert!(r.device().buffer_desc(buffers[0]).is_none());
    assert!(r.device().buffer_desc(buffers[2]).is_some());
    r.end();
}

#[test]
fn asset_released_mid_frame_outlives_the_frame() {
    let mut r = renderer();
    r.device_mut().add_asset("ui/icon.png", (16, 16));
    let (icon, _) = r.load_texture("ui/icon.png");
    let texture = r.textures().get(icon).unwrap().texture;

    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let geometry = quad(&mut r, 0.0, 0.0, 16.0);
    r.render_geometry(geometry, Vec2::ZERO, icon);
    r.release_texture(icon);
    let commands = r.end().into_vec();

    assert_eq!(draw_labels(&r, &commands), ["image"]);
    assert!(commands
        .iter()
        .any(|c| matches!(c, GpuCommand::BindTexture { texture: t, .. } if *t == texture)));
    assert!(r.device().texture_desc(texture).is_some());
    assert_eq!(r.device().live_asset_count(), 1);

    r.release_retired();
    assert!(r.device().texture_desc(texture).is_none());
    assert_eq!(r.device().live_asset_count(), 0);
}

#[test]
fn unloaded_shaders_skip_draws_until_ready() {
    let mut r = renderer();
    r.device_mut().set_shader_ready(ShaderProgram::Gradient, false);

    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let geometry = quad(&mut r, 0.0, 0.0, 16.0);
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end();
    assert_eq!(commands.draw_count(), 0);
    assert!(!r.pipelines_ready());

    r.device_mut().set_shader_ready(ShaderProgram::Gradient, true);
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end();
    assert_eq!(commands.draw_count(), 1);
}

#[test]
fn shader_reload_rebuilds_program_pipelines() {
    let hub = Arc::new(ShaderReloadHub::new());
    let mut r = Renderer::with_shader_reload(
        HeadlessDevice::new(),
        RendererConfig::default(),
        hub.clone(),
    );
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let geometry = quad(&mut r, 0.0, 0.0, 16.0);
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    r.end();
    let created = r.device().pipelines_created();

    hub.notify(ShaderProgram::Basic);
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end().into_vec();

    // color, image, font and both stencil pipelines
    assert_eq!(r.device().pipelines_created(), created + 5);
    assert_eq!(draw_labels(&r, &commands), ["color"]);
}

#[test]
fn reload_during_a_frame_keeps_recorded_pipelines() {
    let hub = Arc::new(ShaderReloadHub::new());
    let mut r = Renderer::with_shader_reload(
        HeadlessDevice::new(),
        RendererConfig::default(),
        hub.clone(),
    );
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let geometry = quad(&mut r, 0.0, 0.0, 16.0);
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    hub.notify(ShaderProgram::Basic);
    r.render_geometry(geometry, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end().into_vec();

    assert_eq!(draw_labels(&r, &commands), ["color", "color"]);
    for command in &commands {
        if let GpuCommand::SetPipeline(id) = command {
            assert!(r.device().pipeline_desc(*id).is_some(), "{id:?} destroyed");
        }
    }
}

#[test]
fn gradient_uploads_stops_and_binds_storage() {
    let mut r = renderer();
    let stops = vec![
        ColorStop {
            position: 0.0,
            color: Rgba8::new(255, 0, 0, 255),
        },
        ColorStop {
            position: 1.0,
            color: Rgba8::new(0, 0, 255, 255),
        },
    ];
    let shader = r.compile_shader(
        "linear-gradient",
        &Parameters::new()
            .with("p0", Vec2::new(0.0, 0.0))
            .with("p1", Vec2::new(100.0, 0.0))
            .with("color_stop_list", stops),
    );
    assert!(shader.is_valid());

    r.begin(OUTPUT, Viewport::from_size(128, 128));
    let geometry = quad(&mut r, 0.0, 0.0, 100.0);
    r.render_shader(shader, geometry, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end().into_vec();

    assert_eq!(draw_labels(&r, &commands), ["gradient"]);
    let stop_updates: Vec<usize> = commands
        .iter()
        .filter_map(|c| match c {
            GpuCommand::UpdateBuffer { buffer, data } => r
                .device()
                .buffer_desc(*buffer)
                .filter(|d| d.label.starts_with("stop_"))
                .map(|_| data.len()),
            _ => None,
        })
        .collect();
    // Two positions and two colors
    assert_eq!(stop_updates, [8, 32]);
    let storage: Vec<BufferId> = commands
        .iter()
        .filter_map(|c| match c {
            GpuCommand::BindStorage { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .collect();
    assert_eq!(storage.len(), 2);
}

#[test]
fn creation_shader_draws_with_clock() {
    let mut r = renderer();
    let shader = r.compile_shader(
        "shader",
        &Parameters::new()
            .with("value", "creation")
            .with("dimensions", Vec2::new(64.0, 64.0)),
    );
    r.set_time(2.5);
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let geometry = quad(&mut r, 0.0, 0.0, 64.0);
    r.render_shader(shader, geometry, Vec2::ZERO, TextureHandle::INVALID);
    let commands = r.end().into_vec();
    assert_eq!(draw_labels(&r, &commands), ["creation"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Clip mask and scissor
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn clip_mask_tracks_test_value() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(256, 256));
    let mask = quad(&mut r, 10.0, 10.0, 50.0);
    r.enable_clip_mask(true);

    let start = r.state().unwrap().commands.len();
    r.render_to_clip_mask(ClipMaskOperation::Set, mask, Vec2::ZERO);
    assert_eq!(r.state().unwrap().stencil_test_value, 1);
    let set_commands = r.state().unwrap().commands.as_slice()[start..].to_vec();
    assert_eq!(
        draw_labels(&r, &set_commands),
        ["set_stencil_fullscreen", "set_stencil"]
    );
    assert_eq!(stencil_references(&set_commands), [1]);

    let start = r.state().unwrap().commands.len();
    r.render_to_clip_mask(ClipMaskOperation::Intersect, mask, Vec2::ZERO);
    assert_eq!(r.state().unwrap().stencil_test_value, 2);
    let intersect_commands = r.state().unwrap().commands.as_slice()[start..].to_vec();
    assert_eq!(draw_labels(&r, &intersect_commands), ["intersect_stencil"]);
    assert_eq!(stencil_references(&intersect_commands), [2]);

    let start = r.state().unwrap().commands.len();
    r.render_to_clip_mask(ClipMaskOperation::SetInverse, mask, Vec2::ZERO);
    assert_eq!(r.state().unwrap().stencil_test_value, 1);
    let inverse_commands = r.state().unwrap().commands.as_slice()[start..].to_vec();
    // Fill with 1, geometry writes 0, then draws test against 1
    assert_eq!(stencil_references(&inverse_commands), [1, 0, 1]);

    r.enable_clip_mask(false);
    assert_eq!(r.state().unwrap().stencil_reference(), 0);
    r.end();
}

#[test]
fn repeated_scissor_is_a_no_op() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(800, 600));
    let a = IRect::from_position_size(50, 40, 200, 100);
    r.set_scissor_region(a);
    let count = r.state().unwrap().scissor_commands();
    r.set_scissor_region(a);
    r.set_scissor_region(a);
    assert_eq!(r.state().unwrap().scissor_commands(), count);

    r.set_scissor_region(IRect::from_position_size(0, 0, 10, 10));
    assert_eq!(r.state().unwrap().scissor_commands(), count + 1);
    r.end();
}

// ─────────────────────────────────────────────────────────────────────────────
// Filters
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn blur_over_full_viewport() {
    let mut r = renderer();
    // sigma 8 compiles to 4: two downscale passes landing in the source buffer
    let blur = r.compile_filter("blur", &Parameters::new().with("sigma", 8.0f32));

    r.begin(OUTPUT, Viewport::from_size(800, 600));
    let layer = r.push_layer();
    r.composite_layers(layer, LayerHandle::ROOT, LayerBlend::Blend, &[blur]);
    r.pop_layer();
    let commands = r.end().into_vec();

    assert_eq!(
        draw_labels(&r, &commands),
        [
            "blit",
            "passthrough",
            "passthrough",
            "passthrough",
            "blur",
            "blur",
            "blit",
            "passthrough_blend",
        ]
    );
    let weight_uploads = commands
        .iter()
        .filter(|c| match c {
            GpuCommand::UpdateBuffer { buffer, data } => {
                data.len() == 16
                    && r.device().buffer_desc(*buffer).map(|d| d.label) == Some("blur_weights")
            }
            _ => false,
        })
        .count();
    assert_eq!(weight_uploads, 1);
    assert!(commands
        .iter()
        .any(|c| matches!(c, GpuCommand::SetViewport(v) if v.width == 400.0 && v.height == 300.0)));
}

#[test]
fn unaligned_blur_window_adds_aligned_blit() {
    let mut r = renderer();
    let blur = r.compile_filter("blur", &Parameters::new().with("sigma", 8.0f32));

    r.begin(OUTPUT, Viewport::from_size(800, 600));
    let layer = r.push_layer();
    r.set_scissor_region(IRect::from_position_size(10, 10, 101, 77));
    r.composite_layers(layer, LayerHandle::ROOT, LayerBlend::Blend, &[blur]);
    r.pop_layer();
    let commands = r.end().into_vec();

    let labels = draw_labels(&r, &commands);
    assert_eq!(labels[labels.len() - 3..], ["blit", "blit", "passthrough_blend"]);
    // Scissor is back on the window after the blur
    let last_scissor = commands
        .iter()
        .rev()
        .find_map(|c| match c {
            GpuCommand::SetScissor(rect) => Some(*rect),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_scissor, IRect::from_position_size(10, 10, 101, 77));
}

#[test]
fn opacity_sets_blend_factor() {
    let mut r = renderer();
    let opacity = r.compile_filter("opacity", &Parameters::new().with("value", 0.25f32));

    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let layer = r.push_layer();
    r.composite_layers(layer, LayerHandle::ROOT, LayerBlend::Replace, &[opacity]);
    r.pop_layer();
    let commands = r.end().into_vec();

    assert!(commands.contains(&GpuCommand::SetBlendFactor(0.25)));
    assert_eq!(
        draw_labels(&r, &commands),
        ["blit", "passthrough_opacity", "passthrough"]
    );
}

#[test]
fn drop_shadow_offsets_and_blurs() {
    let mut r = renderer();
    let shadow = r.compile_filter(
        "drop-shadow",
        &Parameters::new()
            .with("sigma", 2.0f32)
            .with("offset", Vec2::new(4.0, 6.0))
            .with("color", Rgba8::new(0, 0, 0, 255)),
    );

    r.begin(OUTPUT, Viewport::from_size(800, 600));
    let layer = r.push_layer();
    r.composite_layers(layer, LayerHandle::ROOT, LayerBlend::Blend, &[shadow]);
    r.pop_layer();
    let commands = r.end().into_vec();

    let labels = draw_labels(&r, &commands);
    assert_eq!(labels[..2], ["blit", "drop_shadow"]);
    assert!(labels.contains(&"blur"));
    assert_eq!(
        labels[labels.len() - 2..],
        ["passthrough_blend", "passthrough_blend"]
    );

    let uniforms = filter_uniforms_of(&r, &commands, "drop_shadow");
    assert_eq!(uniforms.uv_offset, [4.0 / -800.0, 6.0 / 600.0]);
    assert_eq!(uniforms.color, [0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn sharp_drop_shadow_skips_blur() {
    let mut r = renderer();
    let shadow = r.compile_filter(
        "drop-shadow",
        &Parameters::new().with("offset", Vec2::new(2.0, 2.0)),
    );

    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let layer = r.push_layer();
    r.composite_layers(layer, LayerHandle::ROOT, LayerBlend::Blend, &[shadow]);
    r.pop_layer();
    let commands = r.end().into_vec();
    assert!(!draw_labels(&r, &commands).contains(&"blur"));
}

#[test]
fn color_matrix_chain_ping_pongs() {
    let mut r = renderer();
    let grayscale = r.compile_filter("grayscale", &Parameters::new().with("value", 1.0f32));
    let sepia = r.compile_filter("sepia", &Parameters::new().with("value", 0.5f32));
    let released = r.compile_filter("invert", &Parameters::new());
    r.release_filter(released);

    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let layer = r.push_layer();
    r.composite_layers(
        layer,
        LayerHandle::ROOT,
        LayerBlend::Blend,
        &[grayscale, released, sepia],
    );
    r.pop_layer();
    let commands = r.end().into_vec();

    assert_eq!(
        draw_labels(&r, &commands),
        ["blit", "color_matrix", "color_matrix", "passthrough_blend"]
    );

    // Each draw reads what the previous one wrote
    let mut target = None;
    let mut source = None;
    let mut chain = Vec::new();
    for command in &commands {
        match command {
            GpuCommand::SetRenderTarget { color, .. } => target = Some(*color),
            GpuCommand::BindTexture { slot: 0, texture } => source = Some(*texture),
            c if c.is_draw() => chain.push((source, target)),
            _ => {}
        }
    }
    for pair in chain.windows(2) {
        assert_eq!(pair[1].0, pair[0].1);
    }
}

#[test]
fn mask_image_reads_saved_mask() {
    let mut r = renderer();
    r.begin(OUTPUT, Viewport::from_size(64, 64));
    let mask_layer = r.push_layer();
    let mask = r.save_layer_as_mask_image();
    assert!(mask.is_valid());
    assert_eq!(r.filter(mask), Some(&CompiledFilter::MaskImage));
    r.pop_layer();
    assert_eq!(mask_layer, LayerHandle(1));

    let layer = r.push_layer();
    r.composite_layers(layer, LayerHandle::ROOT, LayerBlend::Blend, &[mask]);
    r.pop_layer();
    let commands = r.end().into_vec();

    assert_eq!(
        draw_labels(&r, &commands),
        ["blit", "blit", "blit", "mask_image", "passthrough_blend"]
    );
}

#[test]
fn save_layer_as_texture_uses_scissor_bounds() {
    let mut r = renderer();
    let atlas = r.register_font_texture(TextureId(800), (32, 32));
    r.hook_generate_override(atlas);

    r.begin(OUTPUT, Viewport::from_size(256, 256));
    r.push_layer();
    r.set_scissor_region(IRect::from_position_size(16, 16, 64, 32));
    let texture = r.save_layer_as_texture();
    r.pop_layer();
    let commands = r.end().into_vec();

    assert!(texture.is_valid());
    assert_ne!(texture, atlas);
    assert_eq!(r.textures().get(texture).unwrap().dimensions, (64, 32));
    // The override is left for the font engine
    assert_eq!(r.textures().pending_override(), Some(atlas));
    assert_eq!(draw_labels(&r, &commands), ["blit", "blit"]);
}

#[test]
fn font_atlases_flush_at_end() {
    struct Counter(Arc<AtomicUsize>);

    impl FontAtlasFlush for Counter {
        fn flush_font_atlases(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let flushes = Arc::new(AtomicUsize::new(0));
    let mut r = renderer();
    r.set_font_flusher(Box::new(Counter(flushes.clone())));
    for _ in 0..3 {
        r.begin(OUTPUT, Viewport::from_size(16, 16));
        r.end();
    }
    assert_eq!(flushes.load(Ordering::SeqCst), 3);
}
