use crate::error::{device_error, Error, Result};
use erupt::{
    utils::{
        allocator::{Allocation, Allocator, AllocatorCreateInfo, MemoryTypeFinder},
        loading::DefaultEntryLoader,
    },
    vk1_0 as vk, DeviceLoader, EntryLoader, InstanceLoader,
};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Vulkan device, allocator and the single in-order queue every matrix operation runs on
pub struct Context {
    submission: Mutex<Submission>,
    allocator: Mutex<Allocator>,
    device_name: String,
    limits: WorkgroupLimits,
    live_bytes: AtomicUsize,
    live_kernels: AtomicUsize,
    pub(crate) device: DeviceLoader,
    instance: InstanceLoader,
    _entry: DefaultEntryLoader,
}

pub type SharedContext = Arc<Context>;

/// Compute dispatch limits reported by the device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkgroupLimits {
    pub max_size: [u32; 3],
    pub max_invocations: u32,
}

/// Command recording state, locked for the duration of one pass
pub(crate) struct Submission {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub queue: vk::Queue,
}

impl Context {
    /// Open the first device exposing a compute queue
    pub fn new() -> Result<SharedContext> {
        let entry = EntryLoader::new().map_err(|e| Error::Setup(e.to_string()))?;

        // Instance
        let name = CString::new("vk-mlp").map_err(|e| Error::Setup(e.to_string()))?;
        let app_info = vk::ApplicationInfoBuilder::new()
            .application_name(&name)
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(&name)
            .engine_version(vk::make_version(1, 0, 0))
            .api_version(vk::make_version(1, 1, 0));

        let create_info = vk::InstanceCreateInfoBuilder::new().application_info(&app_info);
        let instance = InstanceLoader::new(&entry, &create_info, None)
            .map_err(|e| Error::Setup(e.to_string()))?;

        // Hardware selection
        let (queue_family_index, physical_device) = select_device(&instance)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device, None) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let limits = WorkgroupLimits {
            max_size: properties.limits.max_compute_work_group_size,
            max_invocations: properties.limits.max_compute_work_group_invocations,
        };
        log::debug!("using \"{}\" (queue family {})", device_name, queue_family_index);

        // Logical device and queue
        let create_info = [vk::DeviceQueueCreateInfoBuilder::new()
            .queue_family_index(queue_family_index)
            .queue_priorities(&[1.0])];

        let physical_device_features = vk::PhysicalDeviceFeaturesBuilder::new();
        let create_info = vk::DeviceCreateInfoBuilder::new()
            .queue_create_infos(&create_info)
            .enabled_features(&physical_device_features);

        let device = DeviceLoader::new(&instance, physical_device, &create_info, None)
            .map_err(|e| Error::Setup(e.to_string()))?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0, None) };

        let allocator = Allocator::new(&instance, physical_device, AllocatorCreateInfo::default())
            .result()
            .map_err(device_error("allocator creation"))?;

        let create_info = vk::CommandPoolCreateInfoBuilder::new()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&create_info, None, None) }
            .result()
            .map_err(device_error("command pool creation"))?;

        let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.allocate_command_buffers(&allocate_info) }
            .result()
        {
            Ok(buffers) => buffers[0],
            Err(status) => {
                unsafe { device.destroy_command_pool(Some(command_pool), None) };
                return Err(device_error("command buffer allocation")(status));
            }
        };

        Ok(Arc::new(Self {
            submission: Mutex::new(Submission {
                command_pool,
                command_buffer,
                queue,
            }),
            allocator: Mutex::new(allocator),
            device_name,
            limits,
            live_bytes: AtomicUsize::new(0),
            live_kernels: AtomicUsize::new(0),
            device,
            instance,
            _entry: entry,
        }))
    }

    /// Driver-reported name of the device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn workgroup_limits(&self) -> WorkgroupLimits {
        self.limits
    }

    /// Bytes currently held by live matrix buffers
    pub fn live_buffer_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    /// Compute pipelines currently alive across all catalogs
    pub fn live_kernels(&self) -> usize {
        self.live_kernels.load(Ordering::SeqCst)
    }

    pub(crate) fn submission(&self) -> Result<MutexGuard<Submission>> {
        self.submission.lock().map_err(|_| Error::Poisoned("queue"))
    }

    fn allocator(&self) -> Result<MutexGuard<Allocator>> {
        self.allocator.lock().map_err(|_| Error::Poisoned("allocator"))
    }

    /// Create a host-visible storage buffer of `size` bytes
    pub(crate) fn allocate_buffer(&self, size: usize) -> Result<Allocation<vk::Buffer>> {
        let create_info = vk::BufferCreateInfoBuilder::new()
            .usage(
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .size(size as u64);

        // TODO: device-local memory plus a staging buffer for uploads; everything is host
        // visible for now so reads and writes are plain mappings
        let mut allocator = self.allocator()?;
        let buffer = unsafe { self.device.create_buffer(&create_info, None, None) }
            .result()
            .map_err(device_error("buffer creation"))?;
        let allocation = allocator
            .allocate(&self.device, buffer, MemoryTypeFinder::dynamic())
            .result();
        match allocation {
            Ok(allocation) => {
                self.live_bytes.fetch_add(size, Ordering::SeqCst);
                Ok(allocation)
            }
            Err(status) => {
                unsafe { self.device.destroy_buffer(Some(buffer), None) };
                Err(device_error("buffer allocation")(status))
            }
        }
    }

    /// Release a buffer; runs from `Drop`, so a poisoned allocator is still used
    pub(crate) fn free_buffer(&self, allocation: Allocation<vk::Buffer>, size: usize) {
        let mut allocator = self.allocator.lock().unwrap_or_else(PoisonError::into_inner);
        allocator.free(&self.device, allocation);
        self.live_bytes.fetch_sub(size, Ordering::SeqCst);
    }

    pub(crate) fn kernel_created(&self) {
        self.live_kernels.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn kernel_destroyed(&self) {
        self.live_kernels.fetch_sub(1, Ordering::SeqCst);
    }
}

fn select_device(instance: &InstanceLoader) -> Result<(u32, vk::PhysicalDevice)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices(None) }
        .result()
        .map_err(device_error("device enumeration"))?;
    for device in physical_devices {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(device, None) };
        for (family, properties) in families.iter().enumerate() {
            if properties.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                return Ok((family as u32, device));
            }
        }
    }
    Err(Error::Setup("no device with a compute queue".into()))
}

impl Drop for Context {
    fn drop(&mut self) {
        let command_pool = match self.submission.get_mut() {
            Ok(submission) => submission.command_pool,
            Err(poisoned) => poisoned.into_inner().command_pool,
        };
        unsafe {
            self.device.device_wait_idle().result().ok();
            self.device.destroy_command_pool(Some(command_pool), None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn poisoned_allocator_still_frees() {
        let context = match crate::tests::context() {
            Some(context) => context,
            None => return,
        };
        let allocation = context.allocate_buffer(256).unwrap();
        assert_eq!(context.live_buffer_bytes(), 256);

        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            let _allocator = context.allocator.lock();
            panic!("poison the allocator");
        }));
        assert!(context.allocator.is_poisoned());
        assert_eq!(
            context.allocate_buffer(4).err().map(|e| e.kind()),
            Some(ErrorKind::Poisoned)
        );

        context.free_buffer(allocation, 256);
        assert_eq!(context.live_buffer_bytes(), 0);
    }
}
