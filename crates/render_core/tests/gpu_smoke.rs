//! End-to-end checks against a real Vulkan device
//!
//! These need a GPU, a display and the compiled demo shaders in
//! `target/shaders`. Run them with
//! `cargo test -p render_core --test gpu_smoke -- --ignored --test-threads=1`.

use ash::vk;
use render_core::prelude::*;
use render_core::render::vulkan::{
    BufferKind, FrameBegin, FrameSlotState, GpuBuffer, ImageLayoutState, ImageResource,
    PipelineStateObject, PresentOutcome, ShaderStage,
};

fn shader_config() -> ShaderConfig {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../target/shaders");
    ShaderConfig::new(
        format!("{dir}/shader.vert.spv"),
        format!("{dir}/shader.frag.spv"),
    )
}

fn test_config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig::new("render_core gpu smoke")
        .with_window("gpu smoke", 800, 600)
        .with_shaders(shader_config())
        .with_max_frames_in_flight(frames_in_flight)
}

fn open_window(config: &RendererConfig) -> Window {
    Window::new(&config.window.title, config.window.width, config.window.height)
        .expect("window creation needs a display")
}

fn quad_pipeline() -> PipelineConfiguration {
    PipelineConfiguration::default()
        .with_topology(PrimitiveTopology::TriangleList)
        .with_polygon_mode(PolygonMode::Fill)
        .with_cull_mode(CullMode::Back)
}

/// Reports a zero-sized framebuffer for a few event waits, then restores the
/// real window at a new size
struct MinimizedWindow<'a> {
    inner: &'a mut Window,
    zero_polls: usize,
    restored_size: (u32, u32),
}

impl SurfaceWindow for MinimizedWindow<'_> {
    fn framebuffer_size(&self) -> (u32, u32) {
        if self.zero_polls > 0 {
            (0, 0)
        } else {
            self.inner.framebuffer_size()
        }
    }

    fn wait_events(&mut self) {
        self.zero_polls = self.zero_polls.saturating_sub(1);
        if self.zero_polls == 0 {
            self.inner.set_size(self.restored_size.0, self.restored_size.1);
        }
        self.inner.poll_events();
    }

    fn required_instance_extensions(&self) -> Result<Vec<String>, WindowError> {
        self.inner.required_instance_extensions()
    }

    fn create_surface(&mut self, instance: vk::Instance) -> Result<vk::SurfaceKHR, WindowError> {
        self.inner.create_surface(instance)
    }
}

fn run_frames(renderer: &mut Renderer, window: &mut Window, count: usize) -> usize {
    let mut presented = 0;
    for _ in 0..count {
        window.poll_events();
        let token = match renderer.begin_frame().expect("begin_frame") {
            FrameBegin::Ready(token) => token,
            FrameBegin::SwapchainStale => {
                renderer.recreate_swapchain(window).expect("recreate");
                continue;
            }
        };
        renderer
            .update_uniform(token.slot(), &UniformBufferObject::identity())
            .expect("update_uniform");
        renderer.record_frame(&token).expect("record_frame");
        if renderer.end_frame(token).expect("end_frame") == PresentOutcome::NeedsRecreate {
            renderer.recreate_swapchain(window).expect("recreate");
        }
        presented += 1;

        let tracker = renderer.frame_tracker();
        assert!(tracker.submitted_count() <= tracker.max_submitted());
    }
    presented
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_pipeline_can_be_rebuilt_after_destroy() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();

    let device = renderer.context().device();
    let stages = ShaderStage::from_config(device, &config.shaders).unwrap();
    let format = renderer.swapchain_format();

    let first = PipelineStateObject::build(device, &quad_pipeline(), &stages, format).unwrap();
    drop(first);
    renderer.context().wait_idle().unwrap();

    let same = PipelineStateObject::build(device, &quad_pipeline(), &stages, format).unwrap();
    let wireframe =
        PipelineStateObject::build(device, &PipelineConfiguration::wireframe_lines(), &stages, format).unwrap();
    assert_ne!(same.handle(), vk::Pipeline::null());
    assert_ne!(wireframe.handle(), same.handle());
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_renderer_swaps_pipeline_configuration() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let mut renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
    renderer.upload_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES).unwrap();

    assert_eq!(run_frames(&mut renderer, &mut window, 4), 4);
    renderer
        .rebuild_pipeline(&PipelineConfiguration::wireframe_lines().with_blend_mode(BlendMode::AdditiveRgb))
        .unwrap();
    assert_eq!(renderer.pipeline().configuration().polygon_mode, PolygonMode::Wireframe);
    assert_eq!(run_frames(&mut renderer, &mut window, 4), 4);
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_staged_upload_reads_back_identically() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
    let context = renderer.context();

    for size in [1usize, 4, 255, 4099, 1 << 20] {
        let payload: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
        for kind in [BufferKind::Vertex, BufferKind::Index] {
            let buffer = GpuBuffer::upload_staged(context, kind, &payload).unwrap();
            assert_eq!(buffer.size(), size as u64);
            assert_eq!(buffer.read_back(context).unwrap(), payload, "{kind:?} of {size} bytes");
        }
    }
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_recreate_swapchain_is_idempotent() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let mut renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();

    renderer.recreate_swapchain(&mut window).unwrap();
    let first = (renderer.swapchain_extent(), renderer.swapchain_format());
    renderer.recreate_swapchain(&mut window).unwrap();
    let second = (renderer.swapchain_extent(), renderer.swapchain_format());

    assert_eq!(first.0.width, second.0.width);
    assert_eq!(first.0.height, second.0.height);
    assert_eq!(first.1, second.1);
    assert_eq!(renderer.swapchain_generation(), 2);
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_quad_runs_120_frames() {
    for frames_in_flight in [1, 2, 3] {
        let config = test_config(frames_in_flight);
        let mut window = open_window(&config);
        let mut renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
        renderer.upload_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES).unwrap();

        let presented = run_frames(&mut renderer, &mut window, 120);

        assert_eq!(presented, 120);
        assert_eq!(renderer.frames_rendered(), 120);
        assert_eq!(renderer.current_frame(), 120 % frames_in_flight);
    }
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_draw_frame_with_default_pipeline() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let mut renderer = Renderer::new(&mut window, &config, &PipelineConfiguration::default()).unwrap();
    renderer.upload_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES).unwrap();

    let mut rendered = 0;
    for _ in 0..30 {
        window.poll_events();
        if renderer
            .draw_frame(&mut window, &UniformBufferObject::identity())
            .unwrap()
            .is_rendered()
        {
            rendered += 1;
        }
    }
    assert!(rendered > 0);
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_zero_size_window_blocks_recreate_until_restored() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let mut renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
    renderer.upload_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES).unwrap();
    assert_eq!(run_frames(&mut renderer, &mut window, 10), 10);

    renderer.notify_resized();
    {
        let mut minimized = MinimizedWindow {
            inner: &mut window,
            zero_polls: 5,
            restored_size: (640, 480),
        };
        renderer.recreate_swapchain(&mut minimized).unwrap();
        assert_eq!(minimized.zero_polls, 0);
    }
    assert!(!renderer.resize_requested());

    let (width, height) = window.framebuffer_size();
    let extent = renderer.swapchain_extent();
    assert_eq!((extent.width, extent.height), (width, height));

    assert_eq!(run_frames(&mut renderer, &mut window, 10), 10);
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_dropped_and_abandoned_frames_release_their_images() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let mut renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
    renderer.upload_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES).unwrap();

    // More interruptions than swapchain images: a leaked image would starve acquire.
    for _ in 0..8 {
        if let FrameBegin::Ready(token) = renderer.begin_frame().unwrap() {
            let slot = token.slot();
            assert_eq!(renderer.frame_tracker().state(slot), Some(FrameSlotState::Recording));
            drop(token);
        }
        if let FrameBegin::Ready(token) = renderer.begin_frame().unwrap() {
            renderer.abandon_frame(token).unwrap();
        }
    }
    assert_eq!(renderer.frame_tracker().interrupted_recording(), None);
    assert_eq!(run_frames(&mut renderer, &mut window, 10), 10);
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_unsupported_transition_keeps_layout() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
    let context = renderer.context();
    let extent = vk::Extent2D { width: 4, height: 4 };

    let mut image = ImageResource::new_sampled(context, extent, vk::Format::R8G8B8A8_SRGB).unwrap();
    image.transition_layout(context, ImageLayoutState::TransferDst).unwrap();
    image.transition_layout(context, ImageLayoutState::ShaderReadOnly).unwrap();

    let error = image
        .transition_layout(context, ImageLayoutState::TransferDst)
        .unwrap_err();
    assert!(matches!(
        error,
        VulkanError::UnsupportedLayoutTransition {
            from: ImageLayoutState::ShaderReadOnly,
            to: ImageLayoutState::TransferDst,
        }
    ));
    assert_eq!(error.kind(), ErrorKind::ContractViolation);
    assert_eq!(image.layout(), ImageLayoutState::ShaderReadOnly);
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_depth_image_starts_in_attachment_layout() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
    let context = renderer.context();

    let depth = ImageResource::new_depth(context, vk::Extent2D { width: 64, height: 32 }).unwrap();
    assert_eq!(depth.layout(), ImageLayoutState::DepthStencilAttachment);
    assert_eq!(depth.layout().vk_layout(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    assert_eq!(depth.format(), ImageResource::find_depth_format(context).unwrap());
    assert_ne!(depth.view(), vk::ImageView::null());
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_recreated_framebuffers_target_current_render_pass() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let mut renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();

    renderer.recreate_swapchain(&mut window).unwrap();
    let swapchain = renderer.swapchain();
    assert_eq!(swapchain.render_pass(), renderer.pipeline().render_pass().handle());
    assert_eq!(swapchain.framebuffer_count(), swapchain.swapchain().image_count());

    renderer.rebuild_pipeline(&PipelineConfiguration::wireframe_lines()).unwrap();
    renderer.recreate_swapchain(&mut window).unwrap();
    let swapchain = renderer.swapchain();
    assert_eq!(swapchain.render_pass(), renderer.pipeline().render_pass().handle());
    assert_eq!(
        renderer.pipeline().render_pass().color_format(),
        renderer.swapchain_format()
    );
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn test_uniform_payload_lands_in_mapping() {
    let config = test_config(2);
    let mut window = open_window(&config);
    let renderer = Renderer::new(&mut window, &config, &quad_pipeline()).unwrap();
    let context = renderer.context();

    let ubo = UniformBufferObject::identity();
    let size = std::mem::size_of::<UniformBufferObject>();
    let mut buffer = GpuBuffer::new(context, BufferKind::Uniform, size as u64).unwrap();
    {
        let mut mapped = buffer.map().unwrap();
        mapped.write_pod(std::slice::from_ref(&ubo)).unwrap();
        assert_eq!(mapped.read(), bytemuck::bytes_of(&ubo));
        assert!(mapped.write_pod(&[ubo, ubo]).is_err());
    }
}
