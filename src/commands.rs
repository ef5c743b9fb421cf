use vulkanalia::prelude::v1_0::*;
use anyhow::{anyhow, Result};
use log::*;

use crate::context::Context;

/// The lifecycle state of a recorded command buffer. The
/// recorder only allows the Vulkan-legal transitions between
/// states; any other call order is reported as an error rather
/// than handed to the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordState {
    /// Freshly allocated or reset; ready to begin recording.
    Initial,
    /// Between begin and end; draw commands may be recorded.
    Recording,
    /// Recording ended; the buffer may be submitted.
    Executable,
}

impl RecordState {
    /// Returns the state after a reset, which is legal from any
    /// state once the GPU is done with the buffer.
    pub fn reset(self) -> RecordState {
        RecordState::Initial
    }

    pub fn begin(self) -> Result<RecordState> {
        match self {
            RecordState::Initial => Ok(RecordState::Recording),
            other => Err(anyhow!("Cannot begin recording a command buffer in state {:?}.", other)),
        }
    }

    pub fn end(self) -> Result<RecordState> {
        match self {
            RecordState::Recording => Ok(RecordState::Executable),
            other => Err(anyhow!("Cannot end recording a command buffer in state {:?}.", other)),
        }
    }

    pub fn submit(self) -> Result<RecordState> {
        match self {
            // The buffer stays executable after submission,
            // since it was allocated from a pool with the reset
            // flag; the caller resets it before re-recording.
            RecordState::Executable => Ok(RecordState::Executable),
            other => Err(anyhow!("Cannot submit a command buffer in state {:?}.", other)),
        }
    }
}

/// A primary command buffer together with its pool and recorder
/// state. Each in-flight frame owns one, so that a frame's
/// commands can be reset and re-recorded without touching the
/// other frames'.
pub struct FrameCommands {
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
    state: RecordState,
}

impl FrameCommands {
    pub unsafe fn create(ctx: &Context) -> Result<Self> {
        // Command pools are allocators for the memory backing
        // command buffers. The RESET_COMMAND_BUFFER flag lets
        // individual buffers from the pool be reset, which is
        // what the per-frame re-record requires; the pool is
        // tied to the graphics queue family, since that is
        // where the buffers will be submitted.
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.indices.graphics);

        let pool = ctx.device.create_command_pool(&info, None)?;

        // A single primary command buffer per frame: primary
        // buffers are the ones actually submitted to queues
        // (secondary buffers can only be called from primary
        // ones, and we have no use for them here).
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = ctx.device.allocate_command_buffers(&info)?[0];

        Ok(Self {
            pool,
            buffer,
            state: RecordState::Initial,
        })
    }

    /// Resets the command buffer, releasing its recorded
    /// commands back to the pool. The caller must have waited
    /// on the frame's fence first.
    pub unsafe fn reset(&mut self, ctx: &Context) -> Result<()> {
        ctx.device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        self.state = self.state.reset();
        Ok(())
    }

    pub unsafe fn begin(&mut self, ctx: &Context) -> Result<vk::CommandBuffer> {
        self.state = self.state.begin()?;

        let info = vk::CommandBufferBeginInfo::builder();
        ctx.device.begin_command_buffer(self.buffer, &info)?;

        Ok(self.buffer)
    }

    pub unsafe fn end(&mut self, ctx: &Context) -> Result<()> {
        self.state = self.state.end()?;
        ctx.device.end_command_buffer(self.buffer)?;
        Ok(())
    }

    /// Submits the recorded buffer to the graphics queue: wait
    /// on `wait` at the color attachment output stage (so the
    /// pipeline may start before the swapchain image is
    /// actually available, as long as it does not write to it),
    /// signal `signal` when execution finishes, and signal
    /// `fence` for the CPU to wait on.
    pub unsafe fn submit(
        &mut self,
        ctx: &Context,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        self.state = self.state.submit()?;

        let wait_semaphores = &[wait];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[self.buffer];
        let signal_semaphores = &[signal];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        ctx.device.queue_submit(ctx.graphics_queue, &[*submit_info], fence)?;

        Ok(())
    }

    pub unsafe fn destroy(&mut self, ctx: &Context) {
        // Destroying the pool frees the buffers allocated from
        // it.
        ctx.device.destroy_command_pool(self.pool, None);
        info!("Destroyed the command pool.");
    }
}

/// Allocates and begins a one-shot command buffer from `pool`,
/// for short transfer work like buffer copies and image layout
/// transitions.
pub unsafe fn begin_single_command(
    ctx: &Context,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(pool)
        .command_buffer_count(1);

    let command_buffer = ctx.device.allocate_command_buffers(&info)?[0];

    // ONE_TIME_SUBMIT tells the driver the buffer will be
    // submitted exactly once and may be optimised accordingly.
    let info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    ctx.device.begin_command_buffer(command_buffer, &info)?;

    Ok(command_buffer)
}

/// Ends, submits and frees a one-shot command buffer. The
/// graphics queue is waited idle before the buffer is freed, so
/// on return the commands are guaranteed to have executed; this
/// is a blocking transfer path, acceptable for load-time work.
pub unsafe fn end_single_command(
    ctx: &Context,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
) -> Result<()> {
    ctx.device.end_command_buffer(command_buffer)?;

    let command_buffers = &[command_buffer];
    let info = vk::SubmitInfo::builder()
        .command_buffers(command_buffers);

    ctx.device.queue_submit(ctx.graphics_queue, &[*info], vk::Fence::null())?;
    ctx.device.queue_wait_idle(ctx.graphics_queue)?;

    ctx.device.free_command_buffers(pool, command_buffers);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_record_cycle() {
        let state = RecordState::Initial;
        let state = state.begin().unwrap();
        assert_eq!(state, RecordState::Recording);
        let state = state.end().unwrap();
        assert_eq!(state, RecordState::Executable);
        let state = state.submit().unwrap();
        assert_eq!(state, RecordState::Executable);
        assert_eq!(state.reset(), RecordState::Initial);
    }

    #[test]
    fn begin_twice_is_an_error() {
        let state = RecordState::Initial.begin().unwrap();
        assert!(state.begin().is_err());
    }

    #[test]
    fn end_without_begin_is_an_error() {
        assert!(RecordState::Initial.end().is_err());
    }

    #[test]
    fn submit_while_recording_is_an_error() {
        let state = RecordState::Initial.begin().unwrap();
        assert!(state.submit().is_err());
    }

    #[test]
    fn submit_without_recording_is_an_error() {
        assert!(RecordState::Initial.submit().is_err());
    }

    #[test]
    fn reset_is_legal_from_any_state() {
        assert_eq!(RecordState::Initial.reset(), RecordState::Initial);
        let recording = RecordState::Initial.begin().unwrap();
        assert_eq!(recording.reset(), RecordState::Initial);
        let executable = recording.end().unwrap();
        assert_eq!(executable.reset(), RecordState::Initial);
    }
}
