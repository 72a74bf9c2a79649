// =============================================================================
// VULKAN TRIANGLE BOOTSTRAP
// =============================================================================
//
// Picks a GPU, negotiates a swapchain for the window and draws one
// triangle per frame with explicit fence/semaphore synchronization.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input)                               │
// │    └── Renderer                                                 │
// │          ├── Instance -> Surface -> Device -> Swapchain         │
// │          ├── GraphicsPipeline (dynamic rendering)               │
// │          └── FrameResources (command buffers, fences, sems)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for this frame slot's fence, reset it
// 2. Acquire swapchain image
// 3. Re-record the command buffer (layout transitions + draw)
// 4. Submit to the graphics queue
// 5. Present on the present queue
//
// =============================================================================

mod backend;
mod config;

use anyhow::{Context, Result};
use backend::{Renderer, RendererSettings};
use config::Config;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    init_logging();
    log::info!("Starting Vulkan triangle bootstrap");

    let config = Config::load();
    log::info!(
        "Window: {}x{}, present mode: {}, frames in flight: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode,
        config.graphics.frames_in_flight
    );

    match run(config) {
        Ok(shutdown) => shutdown.exit_code(),
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(3)
        }
    }
}

fn init_logging() {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
}

fn run(config: Config) -> Result<Shutdown> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config);
    event_loop
        .run_app(&mut app)
        .context("Event loop terminated abnormally")?;
    Ok(app.shutdown)
}

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Clean,
    InitializationFailed,
    FrameFailed,
}

impl Shutdown {
    /// Process status: 0 clean, 1 setup failed, 2 a frame failed.
    /// Event-loop failures exit with 3 from `main`.
    fn code(self) -> u8 {
        match self {
            Shutdown::Clean => 0,
            Shutdown::InitializationFailed => 1,
            Shutdown::FrameFailed => 2,
        }
    }

    fn exit_code(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer owns the surface,
/// which must be gone before the window it was created from.
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    settings: RendererSettings,
    config: Config,
    shutdown: Shutdown,
    fps: FpsCounter,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            renderer: None,
            window: None,
            settings: config.renderer_settings(),
            config,
            shutdown: Shutdown::Clean,
            fps: FpsCounter::new(),
        }
    }

    fn init_renderer(&self, window: &Window) -> Result<Renderer, backend::InitializationError> {
        let size = window.inner_size();
        Renderer::new(
            &self.settings,
            window.raw_display_handle(),
            window.raw_window_handle(),
            (size.width, size.height),
        )
    }

    /// Stop the loop after waiting for the GPU to drain.
    fn stop(&mut self, event_loop: &ActiveEventLoop, shutdown: Shutdown) {
        if self.shutdown == Shutdown::Clean {
            self.shutdown = shutdown;
        }
        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::error!("{}", e);
            }
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Not resizable: the swapchain is never recreated
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.stop(event_loop, Shutdown::InitializationFailed);
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => {
                log::info!(
                    "Rendering at {}x{}",
                    renderer.extent().width,
                    renderer.extent().height
                );
                self.renderer = Some(renderer);
            }
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {}", e);
                self.stop(event_loop, Shutdown::InitializationFailed);
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.stop(event_loop, Shutdown::Clean);
            }

            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(_) => {
                        if self.config.debug.show_fps {
                            if let Some(window) = &self.window {
                                self.fps.tick(window, &self.config.window.title);
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("Render error: {}", e);
                        self.stop(event_loop, Shutdown::FrameFailed);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.stop(event_loop, Shutdown::Clean);
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing continuously.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if event_loop.exiting() {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Renderer::drop waits for the device to go idle first
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}

// =============================================================================
// FPS TRACKING
// =============================================================================

struct FpsCounter {
    frame_count: u32,
    last_update: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frame_count: 0,
            last_update: now,
            last_frame: now,
        }
    }

    /// Update the window title once per second.
    fn tick(&mut self, window: &Window, title: &str) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms)",
                title,
                fps,
                frame_time * 1000.0
            ));
            self.frame_count = 0;
            self.last_update = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_failures() {
        assert_eq!(Shutdown::Clean.code(), 0);
        assert_eq!(Shutdown::InitializationFailed.code(), 1);
        assert_eq!(Shutdown::FrameFailed.code(), 2);
    }
}
