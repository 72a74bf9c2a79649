// Backend module - Vulkan bootstrap and frame loop
//
// Design: Thin owning wrappers around ash, each releasing its own handles
// Flow: instance -> surface -> device -> swapchain -> pipeline -> frames

pub mod commands;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use error::{InitializationError, RuntimeError};
pub use instance::Diagnostics;
pub use renderer::{Renderer, RendererSettings};
