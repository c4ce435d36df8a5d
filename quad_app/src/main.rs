//! Quad demo application
//!
//! Draws a textured quad spinning about the Z axis. An optional renderer
//! config file (`.toml` or `.ron`) can be given as the first argument and a
//! pipeline config file as the second.

use std::f32::consts::FRAC_PI_2;

use glfw::{Action, Key, WindowEvent};
use nalgebra::{Matrix4, Point3, Vector3};
use render_core::foundation::logging;
use render_core::prelude::*;

const WINDOW_WIDTH: u32 = 800;
const WINDOW_HEIGHT: u32 = 600;

fn load_configs() -> Result<(RendererConfig, PipelineConfiguration), ConfigError> {
    let mut args = std::env::args().skip(1);

    let config = match args.next() {
        Some(path) => RendererConfig::load_from_file(&path)?,
        None => RendererConfig::new("Quad Demo").with_window("Render Core - Quad", WINDOW_WIDTH, WINDOW_HEIGHT),
    };
    config.validate().map_err(ConfigError::Invalid)?;

    let pipeline = match args.next() {
        Some(path) => PipelineConfiguration::load_from_file(&path)?,
        // The projection flips Y, which reverses on-screen winding.
        None => PipelineConfiguration::default()
            .with_topology(PrimitiveTopology::TriangleList)
            .with_polygon_mode(PolygonMode::Fill)
            .with_cull_mode(CullMode::Back)
            .with_front_face(FrontFace::CounterClockwise),
    };

    Ok((config, pipeline))
}

/// Model, view and projection for `elapsed` seconds at the given aspect ratio
fn quad_transforms(elapsed: f32, aspect: f32) -> UniformBufferObject {
    let model = Matrix4::from_axis_angle(&Vector3::z_axis(), elapsed * FRAC_PI_2);
    let view = Matrix4::look_at_rh(
        &Point3::new(2.0, 2.0, 2.0),
        &Point3::origin(),
        &Vector3::z(),
    );
    let mut proj = Matrix4::new_perspective(aspect, 45f32.to_radians(), 0.1, 10.0);
    // Vulkan clip space has Y pointing down.
    proj[(1, 1)] *= -1.0;

    UniformBufferObject {
        model: model.into(),
        view: view.into(),
        proj: proj.into(),
    }
}

fn aspect_ratio(renderer: &Renderer) -> f32 {
    let extent = renderer.swapchain_extent();
    extent.width as f32 / extent.height.max(1) as f32
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (config, pipeline) = load_configs()?;
    logging::init_with_level(&config.log_level);
    log::info!("Starting {}", config.application_name);

    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let mut renderer = Renderer::new(&mut window, &config, &pipeline)?;
    renderer.upload_mesh(&Vertex::unit_quad(), &Vertex::QUAD_INDICES)?;

    let start = window.time();
    while !window.should_close() {
        window.poll_events();

        let events: Vec<_> = window.flush_events().map(|(_, event)| event).collect();
        for event in events {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) => window.set_should_close(true),
                WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("Framebuffer resized to {width}x{height}");
                    renderer.notify_resized();
                }
                _ => {}
            }
        }

        let elapsed = (window.time() - start) as f32;
        let ubo = quad_transforms(elapsed, aspect_ratio(&renderer));
        match renderer.draw_frame(&mut window, &ubo) {
            Ok(FrameStatus::Dropped) => log::debug!("Dropped frame while the swapchain was rebuilt"),
            Ok(_) => {}
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => log::warn!("Frame failed: {e}"),
        }
    }

    renderer.wait_idle()?;
    log::info!("Rendered {} frames", renderer.frames_rendered());
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("Quad demo failed: {e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
