//! Window management using GLFW
//!
//! The renderer only talks to windows through [`SurfaceWindow`], so the GLFW
//! wrapper here is one implementation among possible others.

use ash::vk;
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The OS window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// What the renderer needs from a window
pub trait SurfaceWindow {
    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the window system delivers at least one event
    fn wait_events(&mut self);

    /// Instance extensions required to present to this window
    fn required_instance_extensions(&self) -> WindowResult<Vec<String>>;

    /// Create a presentation surface for `instance`
    fn create_surface(&mut self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR>;
}

/// Block until the window has a drawable (non-zero) framebuffer
///
/// A minimized window reports 0x0; swapchain creation with a zero extent is
/// invalid, so recreation waits here, yielding to the event loop.
pub fn wait_for_drawable_size<W: SurfaceWindow + ?Sized>(window: &mut W) -> (u32, u32) {
    let mut size = window.framebuffer_size();
    if size.0 == 0 || size.1 == 0 {
        log::info!("Framebuffer is {}x{}, waiting for the window to be restored", size.0, size.1);
    }
    while size.0 == 0 || size.1 == 0 {
        window.wait_events();
        size = window.framebuffer_size();
    }
    size
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a resizable window without a client API
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan is not supported by GLFW on this system".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self {
            glfw,
            window,
            events,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request the window to close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Process pending events without blocking
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Drain the events received since the last call
    pub fn flush_events(&self) -> glfw::FlushedMessages<'_, (f64, glfw::WindowEvent)> {
        glfw::flush_messages(&self.events)
    }

    /// Resize the window (screen coordinates)
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.window.set_size(width as i32, height as i32);
    }

    /// Seconds since GLFW was initialized
    pub fn time(&self) -> f64 {
        self.glfw.get_time()
    }
}

impl SurfaceWindow for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    fn create_surface(&mut self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedWindow {
        sizes: VecDeque<(u32, u32)>,
        waits: usize,
    }

    impl SurfaceWindow for ScriptedWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            *self.sizes.front().unwrap()
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if self.sizes.len() > 1 {
                self.sizes.pop_front();
            }
        }

        fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
            Ok(Vec::new())
        }

        fn create_surface(&mut self, _instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
            Err(WindowError::CreationFailed)
        }
    }

    #[test]
    fn test_drawable_size_returns_immediately_when_visible() {
        let mut window = ScriptedWindow {
            sizes: VecDeque::from([(800, 600)]),
            waits: 0,
        };
        assert_eq!(wait_for_drawable_size(&mut window), (800, 600));
        assert_eq!(window.waits, 0);
    }

    #[test]
    fn test_drawable_size_blocks_while_minimized() {
        let mut window = ScriptedWindow {
            sizes: VecDeque::from([(0, 0), (0, 0), (1024, 0), (1024, 768)]),
            waits: 0,
        };
        assert_eq!(wait_for_drawable_size(&mut window), (1024, 768));
        assert_eq!(window.waits, 3);
    }
}
