// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device scoring and selection (prefer discrete GPU)
// - Queue family discovery (graphics + present, possibly the same family)
// - Logical device + queue creation with dynamic rendering enabled

use ash::extensions::khr;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use super::error::{init_call, InitializationError};
use super::instance::Instance;
use super::surface::Surface;
use super::swapchain::SwapchainSupportDetails;

/// Device extensions every selected GPU must expose.
pub fn required_device_extensions() -> [&'static CStr; 2] {
    [khr::Swapchain::name(), khr::DynamicRendering::name()]
}

/// Graphics/present family indices as discovered; either may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan families in enumeration order. The last family with each
    /// capability wins, matching how the driver list is walked.
    pub fn discover<I>(families: I) -> Self
    where
        I: IntoIterator<Item = (vk::QueueFlags, bool)>,
    {
        let mut indices = Self::default();
        for (i, (flags, can_present)) in families.into_iter().enumerate() {
            let i = i as u32;
            if flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }
            if can_present {
                indices.present = Some(i);
            }
        }
        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Resolved queue families of the chosen device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Graphics and present alias the same family.
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families to request queues from, ascending.
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Everything device selection knows about one physical device.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: QueueFamilyIndices,
    pub extensions_supported: bool,
    /// Only queried when the required extensions are present.
    pub swapchain_support: Option<SwapchainSupportDetails>,
}

impl PhysicalDeviceCandidate {
    /// Gather properties, queue families, extension and surface support.
    pub fn probe(
        instance: &ash::Instance,
        surface: &Surface,
        handle: vk::PhysicalDevice,
    ) -> Result<Self, InitializationError> {
        let props = unsafe { instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let family_props = unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let mut families = Vec::with_capacity(family_props.len());
        for (i, family) in family_props.iter().enumerate() {
            families.push((family.queue_flags, surface.supports_present(handle, i as u32)?));
        }
        let queue_families = QueueFamilyIndices::discover(families);

        let available = unsafe { instance.enumerate_device_extension_properties(handle) }
            .map_err(init_call("vkEnumerateDeviceExtensionProperties"))?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect::<Vec<_>>();
        let extensions_supported = supports_extensions(&available, &required_device_extensions());

        let swapchain_support = if extensions_supported {
            Some(SwapchainSupportDetails::query(surface, handle)?)
        } else {
            None
        };

        Ok(Self {
            handle,
            name,
            device_type: props.device_type,
            queue_families,
            extensions_supported,
            swapchain_support,
        })
    }

    /// Suitability score; 0 means the device can never be selected.
    pub fn score(&self) -> u32 {
        let base = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 10000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1000,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
            vk::PhysicalDeviceType::CPU => 10,
            _ => 1,
        };

        if !self.queue_families.is_complete() || !self.extensions_supported {
            return 0;
        }

        match &self.swapchain_support {
            Some(support) if support.is_adequate() => base,
            _ => 0,
        }
    }
}

/// True when every name in `required` appears in `available`.
pub fn supports_extensions<S: AsRef<CStr>>(available: &[S], required: &[&CStr]) -> bool {
    required
        .iter()
        .all(|req| available.iter().any(|ext| ext.as_ref() == *req))
}

/// Pick the highest-scoring candidate; the earliest one wins ties.
pub fn select_best(
    candidates: Vec<PhysicalDeviceCandidate>,
) -> Result<PhysicalDeviceCandidate, InitializationError> {
    let mut best: Option<(u32, PhysicalDeviceCandidate)> = None;

    for candidate in candidates {
        let score = candidate.score();
        log::info!(
            "GPU candidate '{}' ({:?}) scored {}",
            candidate.name,
            candidate.device_type,
            score
        );
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, candidate));
        }
    }

    match best {
        Some((score, candidate)) if score > 0 => Ok(candidate),
        _ => Err(InitializationError::NoSuitableDevice),
    }
}

/// Enumerate, probe and select the physical device to render with.
pub fn pick_physical_device(
    instance: &Instance,
    surface: &Surface,
) -> Result<PhysicalDeviceCandidate, InitializationError> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }
        .map_err(init_call("vkEnumeratePhysicalDevices"))?;

    let candidates = devices
        .into_iter()
        .map(|handle| PhysicalDeviceCandidate::probe(&instance.instance, surface, handle))
        .collect::<Result<Vec<_>, _>>()?;

    let selected = select_best(candidates)?;
    log::info!("Selected GPU: {}", selected.name);
    Ok(selected)
}

/// Logical device plus its graphics and present queues.
pub struct Device {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    instance: Arc<Instance>,
}

impl Device {
    pub fn new(
        instance: Arc<Instance>,
        candidate: &PhysicalDeviceCandidate,
    ) -> Result<Arc<Self>, InitializationError> {
        let queue_families = candidate
            .queue_families
            .resolve()
            .ok_or(InitializationError::NoSuitableDevice)?;
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        let queue_priorities = [1.0];
        let queue_create_infos = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect::<Vec<_>>();

        let extensions: Vec<*const c_char> = required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let mut dynamic_rendering =
            vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(true);
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut dynamic_rendering);

        let device = unsafe {
            instance
                .instance
                .create_device(candidate.handle, &create_info, None)
        }
        .map_err(InitializationError::DeviceCreationFailed)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok(Arc::new(Self {
            device,
            physical_device: candidate.handle,
            queue_families,
            graphics_queue,
            present_queue,
            instance,
        }))
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::debug!("Destroying logical device");
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn support(formats: usize, modes: usize) -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                };
                formats
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO; modes],
        }
    }

    fn candidate(raw: u64, device_type: vk::PhysicalDeviceType) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: format!("gpu-{}", raw),
            device_type,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions_supported: true,
            swapchain_support: Some(support(1, 1)),
        }
    }

    #[test]
    fn base_score_follows_device_class() {
        let cases = [
            (vk::PhysicalDeviceType::DISCRETE_GPU, 10000),
            (vk::PhysicalDeviceType::INTEGRATED_GPU, 1000),
            (vk::PhysicalDeviceType::VIRTUAL_GPU, 100),
            (vk::PhysicalDeviceType::CPU, 10),
            (vk::PhysicalDeviceType::OTHER, 1),
        ];
        for (device_type, expected) in cases {
            assert_eq!(candidate(1, device_type).score(), expected, "{:?}", device_type);
        }
    }

    #[test]
    fn unsuitable_candidates_score_zero_regardless_of_class() {
        let mut no_graphics = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_graphics.queue_families.graphics = None;
        assert_eq!(no_graphics.score(), 0);

        let mut no_present = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.queue_families.present = None;
        assert_eq!(no_present.score(), 0);

        let mut no_extensions = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_extensions.extensions_supported = false;
        no_extensions.swapchain_support = None;
        assert_eq!(no_extensions.score(), 0);

        let mut no_formats = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        no_formats.swapchain_support = Some(support(0, 1));
        assert_eq!(no_formats.score(), 0);

        let mut no_modes = candidate(1, vk::PhysicalDeviceType::INTEGRATED_GPU);
        no_modes.swapchain_support = Some(support(2, 0));
        assert_eq!(no_modes.score(), 0);
    }

    #[test]
    fn discrete_gpu_is_selected_over_integrated() {
        let integrated = candidate(1, vk::PhysicalDeviceType::INTEGRATED_GPU);
        let discrete = candidate(2, vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(discrete.score(), 10000);
        assert_eq!(integrated.score(), 1000);

        let selected = select_best(vec![integrated, discrete]).expect("a device is selected");
        assert_eq!(selected.handle, vk::PhysicalDevice::from_raw(2));
    }

    #[test]
    fn unsuitable_discrete_loses_to_suitable_cpu() {
        let mut discrete = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        discrete.extensions_supported = false;
        let cpu = candidate(2, vk::PhysicalDeviceType::CPU);

        let selected = select_best(vec![discrete, cpu]).expect("a device is selected");
        assert_eq!(selected.handle, vk::PhysicalDevice::from_raw(2));
    }

    #[test]
    fn ties_keep_enumeration_order() {
        let first = candidate(7, vk::PhysicalDeviceType::INTEGRATED_GPU);
        let second = candidate(8, vk::PhysicalDeviceType::INTEGRATED_GPU);
        let selected = select_best(vec![first, second]).expect("a device is selected");
        assert_eq!(selected.handle, vk::PhysicalDevice::from_raw(7));
    }

    #[test]
    fn zero_maximum_fails_selection() {
        let mut only = candidate(1, vk::PhysicalDeviceType::DISCRETE_GPU);
        only.queue_families = QueueFamilyIndices::default();
        assert!(matches!(
            select_best(vec![only]),
            Err(InitializationError::NoSuitableDevice)
        ));
        assert!(matches!(
            select_best(Vec::new()),
            Err(InitializationError::NoSuitableDevice)
        ));
    }

    #[test]
    fn queue_discovery_is_last_match_wins() {
        let compute = vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let graphics = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
        let indices = QueueFamilyIndices::discover([
            (graphics, true),
            (compute, false),
            (graphics, false),
            (compute, true),
        ]);
        assert_eq!(indices.graphics, Some(2));
        assert_eq!(indices.present, Some(3));
        assert!(indices.is_complete());
        assert_eq!(
            indices.resolve(),
            Some(QueueFamilies {
                graphics: 2,
                present: 3
            })
        );
    }

    #[test]
    fn queue_discovery_leaves_missing_capabilities_unset() {
        let indices = QueueFamilyIndices::discover([(vk::QueueFlags::COMPUTE, true)]);
        assert_eq!(indices.graphics, None);
        assert_eq!(indices.present, Some(0));
        assert!(!indices.is_complete());
        assert_eq!(indices.resolve(), None);
    }

    #[test]
    fn unique_families_deduplicate() {
        let shared = QueueFamilies {
            graphics: 1,
            present: 1,
        };
        assert!(shared.is_shared());
        assert_eq!(shared.unique(), vec![1]);

        let split = QueueFamilies {
            graphics: 3,
            present: 0,
        };
        assert!(!split.is_shared());
        assert_eq!(split.unique(), vec![0, 3]);
    }

    #[test]
    fn extension_check_needs_every_required_name() {
        let required = required_device_extensions();
        let all = vec![
            c"VK_KHR_swapchain".to_owned(),
            c"VK_EXT_debug_marker".to_owned(),
            c"VK_KHR_dynamic_rendering".to_owned(),
        ];
        assert!(supports_extensions(&all, &required));

        let partial = vec![c"VK_KHR_swapchain".to_owned()];
        assert!(!supports_extensions(&partial, &required));
    }
}
