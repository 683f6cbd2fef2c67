//! Vulkan instance, validation layer and debug messenger.
//!
//! # Overview
//!
//! - [`Instance`] loads the Vulkan library and creates the `VkInstance`
//! - [`DebugMessenger`] forwards validation messages into `tracing`
//!
//! The two are separate values so their owner can destroy the messenger
//! before the surface and the instance.
//!
//! # Example
//!
//! ```no_run
//! use frameloop_rhi::instance::{DebugMessenger, Instance};
//!
//! # fn example() -> Result<(), frameloop_rhi::RhiError> {
//! let instance = Instance::new(true, Vec::new())?;
//! let messenger = if instance.has_validation() {
//!     Some(DebugMessenger::new(&instance)?)
//! } else {
//!     None
//! };
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Whether the validation layer was enabled
    validation: bool,
}

impl Instance {
    /// Loads Vulkan and creates an instance.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - Request the Khronos validation layer. If the
    ///   layer is missing, a warning is logged and creation continues.
    /// * `extensions` - Instance extensions needed by the surface provider.
    ///   `VK_EXT_debug_utils` is appended when validation is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Loading`] if the library cannot be loaded and
    /// [`RhiError::Setup`] if instance creation fails.
    pub fn new(enable_validation: bool, mut extensions: Vec<*const c_char>) -> RhiResult<Self> {
        // SAFETY: loading the system Vulkan library has no preconditions here.
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"frameloop")
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // SAFETY: every pointer in create_info outlives this call.
        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| RhiError::setup("vkCreateInstance", e))?;

        info!(
            "Vulkan instance created (validation {})",
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            validation,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.validation
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        // SAFETY: plain enumeration on a loaded entry.
        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(|e| RhiError::setup("vkEnumerateInstanceLayerProperties", e))?;

        Ok(available_layers.iter().any(|layer| {
            layer.layer_name_as_c_str().ok() == Some(VALIDATION_LAYER_NAME)
        }))
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // SAFETY: all child objects are destroyed by the owner before this.
        unsafe {
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Debug messenger that logs validation messages through `tracing`.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Registers a messenger for WARNING and ERROR messages.
    pub fn new(instance: &Instance) -> RhiResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(instance.entry(), instance.handle());

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
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

        // SAFETY: the callback is a plain function with 'static lifetime.
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| RhiError::setup("vkCreateDebugUtilsMessengerEXT", e))?;

        debug!("Debug messenger created");

        Ok(Self { loader, messenger })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        // SAFETY: the messenger was created by this loader and the instance
        // is still alive.
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
        debug!("Debug messenger destroyed");
    }
}

/// Forwards validation layer messages to `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid or null callback data pointer.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: non-null and valid for the duration of the callback.
    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        // SAFETY: p_message is a null-terminated string owned by the loader.
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            debug!("[Vulkan {}] {}", type_str, message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_creation_without_validation() {
        // Needs a Vulkan loader; skipped where none is installed.
        match Instance::new(false, Vec::new()) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(RhiError::Loading(_)) | Err(RhiError::Setup { .. }) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }
}
