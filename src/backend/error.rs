// Backend error taxonomy
//
// Setup stages fail with InitializationError, the frame loop with
// RuntimeError. Nothing here is retried; callers propagate with `?`.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while bringing the renderer up.
#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("failed to load the Vulkan library: {0}")]
    LoaderUnavailable(#[from] ash::LoadingError),

    #[error("diagnostics requested but not available: {}", .missing.join(", "))]
    DiagnosticsUnavailable { missing: Vec<String> },

    #[error("could not find a suitable GPU")]
    NoSuitableDevice,

    #[error("logical device creation rejected by the driver: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("could not create window surface: {0}")]
    SurfaceCreationFailed(vk::Result),

    #[error("surface unsupported: {0}")]
    SurfaceUnsupported(String),

    #[error("failed to load shader {path:?}: {source}")]
    ShaderLoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
}

/// Failures raised by the per-frame cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Out-of-date or lost surfaces land here; recreation is not handled.
    #[error("swapchain acquire/present failed: {0}")]
    AcquireOrPresentFailure(vk::Result),

    #[error("acquired image index {0} has no swapchain image")]
    UnknownImage(u32),

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
}

/// Map a raw driver result into an `InitializationError::Vulkan` naming the call.
pub(crate) fn init_call(call: &'static str) -> impl FnOnce(vk::Result) -> InitializationError {
    move |result| InitializationError::Vulkan { call, result }
}

/// Map a raw driver result into a `RuntimeError::Vulkan` naming the call.
pub(crate) fn frame_call(call: &'static str) -> impl FnOnce(vk::Result) -> RuntimeError {
    move |result| RuntimeError::Vulkan { call, result }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_message_lists_missing_layers() {
        let err = InitializationError::DiagnosticsUnavailable {
            missing: vec!["VK_LAYER_A".into(), "VK_LAYER_B".into()],
        };
        assert_eq!(
            err.to_string(),
            "diagnostics requested but not available: VK_LAYER_A, VK_LAYER_B"
        );
    }

    #[test]
    fn call_helpers_keep_the_driver_result() {
        let err = frame_call("vkQueueSubmit")(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(
            err,
            RuntimeError::Vulkan {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        );
        assert!(matches!(
            init_call("vkCreateInstance")(vk::Result::ERROR_INCOMPATIBLE_DRIVER),
            InitializationError::Vulkan { call: "vkCreateInstance", .. }
        ));
    }
}
