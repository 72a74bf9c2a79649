// Swapchain - Window presentation
//
// Negotiates format, present mode, extent and image count against the
// surface, then owns the chain of images we render to and their views.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::device::{Device, QueueFamilies};
use super::error::{init_call, InitializationError, RuntimeError};
use super::surface::Surface;

/// What a surface supports on a given physical device.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self, InitializationError> {
        unsafe {
            Ok(Self {
                capabilities: surface
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, surface.surface)
                    .map_err(init_call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?,
                formats: surface
                    .loader
                    .get_physical_device_surface_formats(physical_device, surface.surface)
                    .map_err(init_call("vkGetPhysicalDeviceSurfaceFormatsKHR"))?,
                present_modes: surface
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, surface.surface)
                    .map_err(init_call("vkGetPhysicalDeviceSurfacePresentModesKHR"))?,
            })
        }
    }

    /// A swapchain can only be built with at least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Prefer 8-bit BGRA sRGB, otherwise the first format the surface lists.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Pick a present mode.
///
/// MAILBOX: No vsync, no tearing, triple buffered
/// FIFO: Vsync enabled, guaranteed available
///
/// `preferred` is tried first, then MAILBOX; FIFO is the unconditional fallback.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's current extent when defined, otherwise clamp the
/// framebuffer size into the allowed range per axis.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    // max/min rather than clamp: a driver reporting min > max must not panic
    vk::Extent2D {
        width: width
            .max(capabilities.min_image_extent.width)
            .min(capabilities.max_image_extent.width),
        height: height
            .max(capabilities.min_image_extent.height)
            .min(capabilities.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Images are shared concurrently when graphics and present use different families.
pub fn choose_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// Parameters fixed at swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainConfiguration {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainConfiguration {
    pub fn negotiate(
        support: &SwapchainSupportDetails,
        families: QueueFamilies,
        framebuffer_size: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, InitializationError> {
        // Device selection already rejected surfaces like this one.
        if support.present_modes.is_empty() {
            return Err(InitializationError::SurfaceUnsupported(
                "no present modes reported".into(),
            ));
        }
        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            InitializationError::SurfaceUnsupported("no surface formats reported".into())
        })?;
        let caps = &support.capabilities;
        if caps.min_image_count == 0 {
            return Err(InitializationError::SurfaceUnsupported(
                "surface reports a minimum image count of zero".into(),
            ));
        }

        let (sharing_mode, queue_family_indices) = choose_sharing(families);

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(caps, framebuffer_size),
            image_count: choose_image_count(caps),
            sharing_mode,
            queue_family_indices,
            pre_transform: caps.current_transform,
        })
    }
}

pub struct Swapchain {
    pub image_views: Vec<vk::ImageView>,
    pub images: Vec<vk::Image>,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub config: SwapchainConfiguration,
    device: Arc<Device>,
    _surface: Arc<Surface>,
}

impl Swapchain {
    pub fn new(
        device: Arc<Device>,
        surface: Arc<Surface>,
        framebuffer_size: (u32, u32),
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, InitializationError> {
        // Re-query: the surface may have changed since device selection.
        let support = SwapchainSupportDetails::query(&surface, device.physical_device)?;
        let config = SwapchainConfiguration::negotiate(
            &support,
            device.queue_families,
            framebuffer_size,
            preferred_present_mode,
        )?;

        log::info!(
            "Swapchain: {:?}/{:?}, {:?}, {}x{}, {} images, {:?}",
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            config.extent.width,
            config.extent.height,
            config.image_count,
            config.sharing_mode,
        );

        let swapchain_loader = khr::Swapchain::new(&device.instance().instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(config.sharing_mode)
            .queue_family_indices(&config.queue_family_indices)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(init_call("vkCreateSwapchainKHR"))?;

        // From here on, dropping `this` releases whatever has been created.
        let mut this = Self {
            image_views: Vec::new(),
            images: Vec::new(),
            swapchain,
            swapchain_loader,
            config,
            device,
            _surface: surface,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(init_call("vkGetSwapchainImagesKHR"))?;

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(this.config.surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.device.device.create_image_view(&create_info, None) }
                .map_err(init_call("vkCreateImageView"))?;
            this.image_views.push(view);
        }

        log::info!("Created swapchain with {} images", this.images.len());

        Ok(this)
    }

    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    /// Acquire next image for rendering; `semaphore` is signaled once it is usable.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<u32, RuntimeError> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(RuntimeError::AcquireOrPresentFailure)?;

        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Present rendered image to screen once `wait_semaphores` are signaled.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<(), RuntimeError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .map(|_suboptimal| ())
            .map_err(RuntimeError::AcquireOrPresentFailure)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        log::debug!("Destroying swapchain");
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
