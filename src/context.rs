use std::collections::HashSet;

use winit::window::Window;
use vulkanalia::{
    prelude::v1_0::*,
    window as vk_window,
    loader::{LibloadingLoader, LIBRARY},
    Version,
    vk::ExtDebugUtilsExtension,
    vk::KhrSurfaceExtension,
};
use anyhow::{anyhow, Result};
use log::*;
use thiserror::Error;

pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const VALIDATION_LAYER: vk::ExtensionName = vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");
pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

// The portability subset extension is still provisional, so
// its name is spelled out rather than taken from the vk
// constants.
pub const PORTABILITY_SUBSET_EXTENSION: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_KHR_portability_subset");

// The macro will create an error type with a Display impl that
// prints the given string.
#[derive(Error, Debug)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

/// The indices of the graphics and presentation queue
/// families. A physical device is only usable once both have
/// been found ("complete" indices); every dependent resource
/// creation assumes this.
#[derive(Copy, Clone, Debug)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        // Almost every operation in Vulkan requires commands to
        // be submitted to a queue. There are different types of
        // queues, that originate from different queue families,
        // and each family of queues allows only a subset of
        // commands. The get_physical_device_queue... function
        // contains details about the queue families supported
        // by the device.
        let queues = instance
            .get_physical_device_queue_family_properties(physical_device);

        // We can then find the first family that supports
        // graphics operations and retrieve its index.
        let graphics = queues
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        // Then do the same for presentation, that is, that
        // there is a queue family in the device that supports
        // presenting images to a Vulkan surface (in other
        // words, rendering to a window).
        let mut present = None;
        for (index, _) in queues.iter().enumerate() {
            if instance.get_physical_device_surface_support_khr(
                physical_device,
                index as u32,
                surface,
            )? {
                present = Some(index as u32);
                break;
            }
        }

        if let (Some(graphics), Some(present)) = (graphics, present) {
            Ok(Self { graphics, present })
        } else {
            Err(anyhow!(SuitabilityError("required queue families")))
        }
    }
}

/// The device/queue context: the Vulkan entry point, instance,
/// surface, physical and logical devices, and queue handles.
/// Created once at startup and passed by reference to every
/// other component; immutable thereafter; destroyed at
/// shutdown after all dependents are destroyed.
pub struct Context {
    pub entry: Entry,
    pub instance: Instance,
    pub debug_messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub indices: QueueFamilyIndices,
}

impl Context {
    pub unsafe fn create(window: &Window) -> Result<Self> {
        // To create a Vulkan instance, we first need a special
        // function loader to load the initial commands from the
        // Vulkan DLL. Next we create an entry point using this
        // loader, and finally use the entry point and window
        // handle to create the Vulkan instance.
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;
        let (instance, debug_messenger) = create_instance(window, &entry)?;

        // Since Vulkan is a platform agnostic API, it does not
        // interface directly with the window system on its own;
        // instead, it exposes surface objects, abstract
        // representations of native window objects to render
        // images on. Vulkanalia provides a convenient function
        // to handle the platform differences for us and return
        // a proper Vulkan surface.
        let surface = vk_window::create_surface(&instance, window, window)?;
        info!("Surface created.");

        // The next step involves choosing a physical device to
        // use on the system (the graphics card, for example),
        // and then creating a logical device to interface it
        // with the application.
        let (physical_device, indices) = pick_physical_device(&instance, surface)?;
        let (device, graphics_queue, present_queue) =
            create_logical_device(&entry, &instance, physical_device, indices)?;

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            surface,
            physical_device,
            device,
            graphics_queue,
            present_queue,
            indices,
        })
    }

    /// Destroys the device, surface and instance. Every object
    /// created from the device must have been destroyed before
    /// this is called.
    pub unsafe fn destroy(&mut self) {
        self.device.destroy_device(None);
        self.instance.destroy_surface_khr(self.surface, None);

        if VALIDATION_ENABLED {
            self.instance.destroy_debug_utils_messenger_ext(self.debug_messenger, None);
        }

        self.instance.destroy_instance(None);
        info!("Destroyed the Vulkan instance.");
    }
}

unsafe fn create_instance(
    window: &Window,
    entry: &Entry,
) -> Result<(Instance, vk::DebugUtilsMessengerEXT)> {
    // Validation layers: because the Vulkan API is designed
    // around the idea of minimal driver overhead, there is very
    // little default error checking. Instead, Vulkan provides
    // "validation layers", which are optional components that
    // hook into Vulkan function calls to apply additional
    // checks and debug operations. Validation layers can only
    // be used if they have been installed onto the system, for
    // example as part of the LunarG Vulkan SDK. We first need
    // to get the list of available layers...
    let available_layers = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    // ...then check if validation layers are available...
    if VALIDATION_ENABLED && !available_layers.contains(&VALIDATION_LAYER) {
        return Err(anyhow!("Validation layer not available."));
    }

    // ...and finally put in our layers list, which we will give
    // to Vulkan later.
    let layers = if VALIDATION_ENABLED {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    // Application info: application name and version, engine
    // name and version, and Vulkan API version. The Vulkan API
    // version is required and must be set to 1.0.0 or greater.
    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"miranda-app\0")
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"miranda\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 0, 0));

    // Extensions: enumerate the required extensions for window
    // integration and convert them to C strings.
    let mut extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    // If the validation layers are enabled, we add the debug
    // utils extension to set up a callback for the validation
    // layer messages.
    if VALIDATION_ENABLED {
        extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
    }

    // Some platforms have not a fully compliant Vulkan
    // implementation, and need since v1.3.216 of the Vulkan API
    // to enable special portability extensions. One of those
    // platforms is none other than macOS, so we check the
    // target OS and the Vulkan API version to enable those
    // extensions if needed.
    let flags = if
        cfg!(target_os = "macos") &&
        entry.version()? >= PORTABILITY_MACOS_VERSION
    {
        info!("Enabling extensions for macOS portability.");
        extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
        extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());

        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    }
    else {
        vk::InstanceCreateFlags::empty()
    };

    // Instance info: combines the application and extensions
    // info, and enables the given layers
    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);

    // Debug info: set up a debug messenger for the validation
    // layers, that calls our debug callback function to print
    // messages for all severity levels and types of events.
    let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(vk::DebugUtilsMessageTypeFlagsEXT::all())
        .user_callback(Some(debug_callback));

    if VALIDATION_ENABLED {
        // Vulkan structs, like the instance info, have the
        // ability to be extended with other structs; here we
        // extend the instance info with the debug info, so that
        // instance creation itself is covered by the messenger.
        info = info.push_next(&mut debug_info);
    }

    // We can give a custom allocator to the instance, but we
    // set it here to None.
    let instance = entry.create_instance(&info, None)?;

    let debug_messenger = if VALIDATION_ENABLED {
        // Create the debug messenger in the instance with our
        // debug info.
        instance.create_debug_utils_messenger_ext(&debug_info, None)?
    } else {
        vk::DebugUtilsMessengerEXT::null()
    };

    info!("Vulkan instance created.");
    Ok((instance, debug_messenger))
}

unsafe fn check_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    // Each device has a number of associated queue families
    // that represent the supported functionalities (graphics,
    // compute shaders, transfer operations, etc). We need both
    // a graphics-capable and a present-capable family before
    // anything else can be built on the device.
    let indices = QueueFamilyIndices::get(instance, surface, physical_device)?;

    // The device also has to support the extensions we are
    // going to use, most importantly the swapchain extension.
    let extensions = instance
        .enumerate_device_extension_properties(physical_device, None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();

    if !DEVICE_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        return Err(anyhow!(SuitabilityError("required device extensions")));
    }

    // Finally, textures are sampled with anisotropic filtering,
    // which is an optional device feature.
    let features = instance.get_physical_device_features(physical_device);
    if features.sampler_anisotropy != vk::TRUE {
        return Err(anyhow!(SuitabilityError("sampler anisotropy feature")));
    }

    Ok(indices)
}

unsafe fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    // There can be more than one graphics device on the system
    // (one dedicated and one integrated graphics card at the
    // same time, for example), and in fact a Vulkan instance
    // can set up and use any number of them simultaneously, but
    // we will stick here to listing the available physical
    // devices and picking the first suitable one.
    for device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(device);

        match check_physical_device(instance, surface, device) {
            Err(error) => warn!("Skipping physical device ({}): {}", properties.device_name, error),
            Ok(indices) => {
                info!("Selected physical device: {}", properties.device_name);
                return Ok((device, indices));
            }
        }
    }

    Err(anyhow!(SuitabilityError("suitable physical device")))
}

unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    indices: QueueFamilyIndices,
) -> Result<(Device, vk::Queue, vk::Queue)> {
    // The logical device is created with one queue per unique
    // queue family; if the graphics and present families are
    // the same (which is the common case), a single queue is
    // requested. Queue priorities order the scheduling of
    // command buffer execution between queues of the same
    // family; with a single queue per family, 1.0 will do.
    let mut unique_indices = HashSet::new();
    unique_indices.insert(indices.graphics);
    unique_indices.insert(indices.present);

    let queue_priorities = &[1.0];
    let queue_infos = unique_indices
        .iter()
        .map(|&i| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(i)
                .queue_priorities(queue_priorities)
        })
        .collect::<Vec<_>>();

    // The validation layers to enable on the device: recent
    // Vulkan implementations ignore this field (layers are
    // instance-wide), but setting it keeps compatibility with
    // older ones.
    let layers = if VALIDATION_ENABLED {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    // The device extensions (the swapchain extension, and the
    // portability subset on macOS-like platforms where it is
    // required).
    let mut extensions = DEVICE_EXTENSIONS
        .iter()
        .map(|n| n.as_ptr())
        .collect::<Vec<_>>();

    if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        extensions.push(PORTABILITY_SUBSET_EXTENSION.as_ptr());
    }

    // The device features to enable; anisotropic filtering has
    // been checked for during device selection.
    let features = vk::PhysicalDeviceFeatures::builder()
        .sampler_anisotropy(true);

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = instance.create_device(physical_device, &info, None)?;

    // Queues are created along with the logical device, we only
    // have to retrieve their handles (index 0 within each
    // family, since we requested a single queue per family).
    let graphics_queue = device.get_device_queue(indices.graphics, 0);
    let present_queue = device.get_device_queue(indices.present, 0);

    info!("Logical device created.");
    Ok((device, graphics_queue, present_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portability_subset_name_is_well_formed() {
        // The name is spelled out by hand, so pin it to the
        // registry spelling.
        assert_eq!(
            format!("{}", PORTABILITY_SUBSET_EXTENSION),
            "VK_KHR_portability_subset",
        );
    }
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // The debug callback function ensures that we print
    // messages with our own log system instead of the standard
    // output. The 'extern "system"' bit links the function to
    // the system ABI, instead of the Rust one, which is
    // required for Vulkan to use it directly; furthermore, the
    // function prototype needs to match that of
    // vk::PFN_vkDebugUtilsMessengerCallbackEXT.
    let data = unsafe { *data };
    let message = unsafe { std::ffi::CStr::from_ptr(data.message) }.to_string_lossy();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({type_:?}) {message}");
    } else {
        trace!("({type_:?}) {message}");
    }

    // If the callback returns true, the call is aborted with a
    // VALIDATION_FAILED error code; it should then only return
    // true when testing the validation layers themselves.
    vk::FALSE
}
