use std::ptr::copy_nonoverlapping as memcpy;
use std::sync::atomic::{AtomicUsize, Ordering};

use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};

use crate::{commands, context::Context};

// Running count of live device memory allocations (buffers and
// images both report here), used to catch leaks at shutdown.
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

pub fn note_alloc() {
    ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn note_free() {
    ALLOCATIONS.fetch_sub(1, Ordering::Relaxed);
}

pub fn live_allocations() -> usize {
    ALLOCATIONS.load(Ordering::Relaxed)
}

/// Finds a memory type index that is allowed by the type filter
/// (a bitmask over the device's memory types, typically coming
/// from the memory requirements of a buffer or image) and whose
/// property flags are a superset of the requested ones. The
/// first match wins, so the result is deterministic for a given
/// device.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory.memory_type_count)
        .find(|&i| {
            let allowed = (type_filter & (1 << i)) != 0;
            let flags = memory.memory_types[i as usize].property_flags;
            allowed && flags.contains(properties)
        })
        .ok_or_else(|| anyhow!("Failed to find a suitable memory type."))
}

/// A GPU buffer with its backing memory allocation. The buffer
/// remembers its usage and memory property flags at
/// construction, and is actually allocated later with a size;
/// this lets buffer objects be declared next to the data they
/// will hold before that data's size is known.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
}

impl GpuBuffer {
    pub fn new(usage: vk::BufferUsageFlags, properties: vk::MemoryPropertyFlags) -> Self {
        Self {
            buffer: vk::Buffer::null(),
            memory: vk::DeviceMemory::null(),
            size: 0,
            usage,
            properties,
        }
    }

    /// Creates the buffer handle and allocates its memory. The
    /// buffer must not already be allocated.
    pub unsafe fn allocate(&mut self, ctx: &Context, size: vk::DeviceSize) -> Result<()> {
        if !self.buffer.is_null() {
            return Err(anyhow!("Buffer is already allocated."));
        }

        // The buffer object itself is only a description: a
        // size, a usage (vertex buffer, index buffer, transfer
        // source, and so on) and a sharing mode between queue
        // families. All our buffers are used from the graphics
        // queue only, so they can stay exclusive.
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        self.buffer = ctx.device.create_buffer(&info, None)?;

        // The memory requirements of the buffer tell us the
        // actual allocation size (which may be larger than the
        // requested size because of alignment), the alignment,
        // and a bitmask of the memory types the buffer can live
        // in; we then pick a type that also has the properties
        // the buffer was declared with.
        let requirements = ctx.device.get_buffer_memory_requirements(self.buffer);
        let memory = ctx.instance.get_physical_device_memory_properties(ctx.physical_device);

        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(find_memory_type(
                &memory,
                requirements.memory_type_bits,
                self.properties,
            )?);

        self.memory = ctx.device.allocate_memory(&info, None)?;
        ctx.device.bind_buffer_memory(self.buffer, self.memory, 0)?;
        self.size = size;
        note_alloc();

        Ok(())
    }

    /// Maps the buffer memory and copies `data` into it. Only
    /// valid for host-visible buffers; the memory is unmapped
    /// before returning.
    pub unsafe fn upload<T>(&self, ctx: &Context, data: &[T]) -> Result<()> {
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(anyhow!("Cannot map memory that is not host-visible."));
        }

        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        if size > self.size {
            return Err(anyhow!("Upload of {} bytes into a buffer of {} bytes.", size, self.size));
        }

        let mapped = ctx.device.map_memory(
            self.memory,
            0,
            size,
            vk::MemoryMapFlags::empty(),
        )?;

        memcpy(data.as_ptr(), mapped.cast(), data.len());
        ctx.device.unmap_memory(self.memory);

        Ok(())
    }

    pub unsafe fn bind_as_vertex_buffer(&self, ctx: &Context, command_buffer: vk::CommandBuffer) {
        ctx.device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.buffer], &[0]);
    }

    pub unsafe fn bind_as_index_buffer(&self, ctx: &Context, command_buffer: vk::CommandBuffer) {
        ctx.device.cmd_bind_index_buffer(command_buffer, self.buffer, 0, vk::IndexType::UINT32);
    }

    /// Destroys the buffer and frees its memory. Destroying an
    /// unallocated buffer is a no-op, so buffers may be
    /// destroyed unconditionally at teardown.
    pub unsafe fn destroy(&mut self, ctx: &Context) {
        if self.buffer.is_null() {
            return;
        }

        ctx.device.destroy_buffer(self.buffer, None);
        ctx.device.free_memory(self.memory, None);
        note_free();

        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
        self.size = 0;
    }
}

/// Creates a device-local buffer filled with `data`, going
/// through a host-visible staging buffer: the data is first
/// mapped and copied into the staging buffer, then transferred
/// on the graphics queue into the final buffer. The transfer is
/// waited on before the staging buffer is freed.
pub unsafe fn create_device_local_buffer<T>(
    ctx: &Context,
    command_pool: vk::CommandPool,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<GpuBuffer> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;

    let mut staging = GpuBuffer::new(
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    );
    staging.allocate(ctx, size)?;
    staging.upload(ctx, data)?;

    let mut buffer = GpuBuffer::new(
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    );
    buffer.allocate(ctx, size)?;

    copy_buffer(ctx, command_pool, staging.buffer, buffer.buffer, size)?;
    staging.destroy(ctx);

    Ok(buffer)
}

unsafe fn copy_buffer(
    ctx: &Context,
    command_pool: vk::CommandPool,
    source: vk::Buffer,
    destination: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    // Memory transfer operations are executed using command
    // buffers, just like drawing commands, so we have to record
    // a one-shot command buffer with the copy command and
    // submit it to the graphics queue (any queue with graphics
    // capability also supports transfers).
    let command_buffer = commands::begin_single_command(ctx, command_pool)?;

    let regions = vk::BufferCopy::builder().size(size);
    ctx.device.cmd_copy_buffer(command_buffer, source, destination, &[*regions]);

    commands::end_single_command(ctx, command_pool, command_buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_type_count = types.len() as u32;
        for (i, &flags) in types.iter().enumerate() {
            memory.memory_types[i].property_flags = flags;
        }
        memory
    }

    #[test]
    fn memory_type_first_match_wins() {
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = find_memory_type(
            &memory,
            0b111,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ).unwrap();

        assert_eq!(index, 1);
    }

    #[test]
    fn memory_type_respects_filter() {
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        // Type 0 has the right flags but is masked out by the
        // filter, so type 1 must be chosen.
        let index = find_memory_type(
            &memory,
            0b10,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ).unwrap();

        assert_eq!(index, 1);
    }

    #[test]
    fn memory_type_superset_matches() {
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let index = find_memory_type(
            &memory,
            0b1,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ).unwrap();

        assert_eq!(index, 0);
    }

    #[test]
    fn memory_type_not_found_is_an_error() {
        let memory = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let result = find_memory_type(
            &memory,
            0b1,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        );

        assert!(result.is_err());
    }

    #[test]
    fn allocation_counter_balances() {
        let before = live_allocations();
        note_alloc();
        note_alloc();
        note_free();
        note_free();
        assert_eq!(live_allocations(), before);
    }
}
