// Window surface - presentable target bound to the platform window

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

use super::error::{init_call, InitializationError};
use super::instance::Instance;

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    _instance: Arc<Instance>,
}

impl Surface {
    pub fn new(
        instance: Arc<Instance>,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>, InitializationError> {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .map_err(InitializationError::SurfaceCreationFailed)?;

        let loader = khr::Surface::new(&instance.entry, &instance.instance);

        Ok(Arc::new(Self {
            surface,
            loader,
            _instance: instance,
        }))
    }

    /// Whether `queue_family` on `physical_device` can present to this surface.
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool, InitializationError> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
        }
        .map_err(init_call("vkGetPhysicalDeviceSurfaceSupportKHR"))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface");
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}

/// Instance extensions the windowing system needs for presentation.
pub fn required_extensions(
    display_handle: RawDisplayHandle,
) -> Result<&'static [*const c_char], InitializationError> {
    ash_window::enumerate_required_extensions(display_handle)
        .map_err(init_call("vkEnumerateInstanceExtensionProperties"))
}
