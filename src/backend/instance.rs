// Vulkan instance - API entry point
//
// Responsibilities:
// - Load the Vulkan library
// - Verify requested diagnostic layers and the debug_utils extension exist
//   before enabling them
// - Create the instance with the platform surface extensions
// - Route validation output into `log` through a debug messenger

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::error::{init_call, InitializationError};

/// Diagnostic layer settings handed to instance creation.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub enabled: bool,
    pub layers: Vec<String>,
}

/// Owns the loaded library, the instance and (optionally) the debug messenger.
pub struct Instance {
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl Instance {
    /// Create the API instance.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `platform_extensions` - Extensions the windowing layer needs to present
    /// * `diagnostics` - Layers to enable; checked against the system list first
    pub fn new(
        app_name: &str,
        platform_extensions: &[*const c_char],
        diagnostics: &Diagnostics,
    ) -> Result<Arc<Self>, InitializationError> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let layer_names = if diagnostics.enabled {
            let available = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(init_call("vkEnumerateInstanceLayerProperties"))?
                .iter()
                .map(layer_name)
                .collect::<Vec<_>>();

            let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
                .map_err(init_call("vkEnumerateInstanceExtensionProperties"))?
                .iter()
                .map(extension_name)
                .collect::<Vec<_>>();

            let missing = missing_diagnostics(&diagnostics.layers, &available, &extensions);
            if !missing.is_empty() {
                return Err(InitializationError::DiagnosticsUnavailable { missing });
            }

            log::info!("Enabling diagnostic layers: {:?}", diagnostics.layers);
            diagnostics
                .layers
                .iter()
                .map(|name| CString::new(name.as_str()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| InitializationError::DiagnosticsUnavailable {
                    missing: diagnostics.layers.clone(),
                })?
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|l| l.as_ptr()).collect();

        let mut extensions = platform_extensions.to_vec();
        if diagnostics.enabled {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"triangle-bootstrap";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(init_call("vkCreateInstance"))?;

        let debug_utils = if diagnostics.enabled {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            debug_utils,
            instance,
            entry,
        }))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT), InitializationError> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(init_call("vkCreateDebugUtilsMessengerEXT"))?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::debug!("Destroying Vulkan instance");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn layer_name(props: &vk::LayerProperties) -> String {
    unsafe { CStr::from_ptr(props.layer_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn extension_name(props: &vk::ExtensionProperties) -> String {
    unsafe { CStr::from_ptr(props.extension_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Everything diagnostics need that the loader does not offer: missing
/// layers in request order, then the debug messenger extension.
pub fn missing_diagnostics(
    requested_layers: &[String],
    available_layers: &[String],
    available_extensions: &[String],
) -> Vec<String> {
    let mut missing = missing_layers(requested_layers, available_layers);
    let debug_utils = DebugUtils::name().to_string_lossy().into_owned();
    if !available_extensions.contains(&debug_utils) {
        missing.push(debug_utils);
    }
    missing
}

/// Requested layers that are absent from the enumerated list, in request order.
pub fn missing_layers(requested: &[String], available: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|layer| !available.contains(layer))
        .cloned()
        .collect()
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
