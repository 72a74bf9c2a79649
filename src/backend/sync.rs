// Synchronization primitives and the per-frame cycle
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync. Each frame in
// flight owns one command buffer, its image-available semaphore and its
// fence; the frame counter walks them in a ring. Render-finished
// semaphores belong to swapchain images: presentation of an image holds
// its semaphore until that image is acquired again.
//
// FRAME CYCLE:
//   Idle -> Acquired -> Recording -> Submitted -> Presented -> Idle
//
//   wait+reset fence, acquire image (signals image_available)
//   reset + record command buffer
//   submit (waits image_available at COLOR_ATTACHMENT_OUTPUT,
//           signals render_finished[image] + in_flight fence)
//   present (waits render_finished[image])

use ash::vk;
use std::sync::Arc;

use super::commands::{CommandRecorder, RenderTarget};
use super::device::Device;
use super::error::{frame_call, init_call, InitializationError, RuntimeError};
use super::swapchain::Swapchain;

/// Submission waits for the acquired image only where color is written.
pub const IMAGE_AVAILABLE_WAIT_STAGE: vk::PipelineStageFlags =
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

/// Objects used by one frame in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

/// Where the current frame is in its cycle. Each phase is entered before
/// the step it names runs, so a failure reports the step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquired,
    Recording,
    Submitted,
    Presented,
}

/// The GPU-facing half of a frame. Implemented over Vulkan for rendering
/// and by fakes in tests.
pub trait FrameBackend {
    /// Block until `fence` is signaled (no timeout).
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<(), RuntimeError>;

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), RuntimeError>;

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<u32, RuntimeError>;

    /// Reset `cmd` and record the frame for `image_index` into it.
    fn record(&mut self, cmd: vk::CommandBuffer, image_index: u32) -> Result<(), RuntimeError>;

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), RuntimeError>;

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<(), RuntimeError>;
}

/// Drives acquire -> record -> submit -> present over a ring of frames.
pub struct FrameSynchronizer {
    frames: Vec<FrameState>,
    /// Indexed by swapchain image
    render_finished: Vec<vk::Semaphore>,
    current_frame: usize,
    phase: FramePhase,
}

impl FrameSynchronizer {
    pub fn new(frames: Vec<FrameState>, render_finished: Vec<vk::Semaphore>) -> Self {
        assert!(!frames.is_empty(), "at least one frame in flight is required");
        assert!(
            !render_finished.is_empty(),
            "at least one render-finished semaphore is required"
        );
        Self {
            frames,
            render_finished,
            current_frame: 0,
            phase: FramePhase::Idle,
        }
    }

    pub fn frames(&self) -> &[FrameState] {
        &self.frames
    }

    pub fn render_finished(&self) -> &[vk::Semaphore] {
        &self.render_finished
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Run one full frame cycle and return the presented image index.
    ///
    /// Errors leave the phase where the cycle stopped; nothing is retried.
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<u32, RuntimeError> {
        let frame = self.frames[self.current_frame];
        self.phase = FramePhase::Idle;

        // Throttle: the GPU must be done with this slot's command buffer
        backend.wait_for_fence(frame.in_flight_fence)?;
        backend.reset_fence(frame.in_flight_fence)?;

        let image_index = backend.acquire_next_image(frame.image_available)?;
        self.phase = FramePhase::Acquired;

        let render_finished = self
            .render_finished
            .get(image_index as usize)
            .copied()
            .ok_or(RuntimeError::UnknownImage(image_index))?;

        self.phase = FramePhase::Recording;
        backend.record(frame.command_buffer, image_index)?;

        self.phase = FramePhase::Submitted;
        backend.submit(
            frame.command_buffer,
            frame.image_available,
            IMAGE_AVAILABLE_WAIT_STAGE,
            render_finished,
            frame.in_flight_fence,
        )?;

        self.phase = FramePhase::Presented;
        backend.present(image_index, render_finished)?;

        // No CPU wait here; the next use of this slot waits on its fence
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        self.phase = FramePhase::Idle;

        Ok(image_index)
    }
}

/// Command pool and sync objects, destroyed together.
pub struct FrameResources {
    pub sync: FrameSynchronizer,
    command_pool: vk::CommandPool,
    device: Arc<Device>,
}

impl FrameResources {
    pub fn new(
        device: Arc<Device>,
        frames_in_flight: usize,
        image_count: usize,
    ) -> Result<Self, InitializationError> {
        let frames_in_flight = frames_in_flight.max(1);
        if image_count == 0 {
            return Err(InitializationError::SurfaceUnsupported(
                "swapchain has no images".to_string(),
            ));
        }

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            // RESET: each frame re-records its own buffer
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .map_err(init_call("vkCreateCommandPool"))?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);

        let command_buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(result) => {
                unsafe { device.device.destroy_command_pool(command_pool, None) };
                return Err(InitializationError::Vulkan {
                    call: "vkAllocateCommandBuffers",
                    result,
                });
            }
        };

        let mut frames = Vec::with_capacity(frames_in_flight);
        let mut render_finished = Vec::with_capacity(image_count);
        if let Err(e) = create_sync_objects(
            &device.device,
            command_buffers,
            image_count,
            &mut frames,
            &mut render_finished,
        ) {
            unsafe {
                destroy_sync_objects(&device.device, &frames, &render_finished);
                device.device.destroy_command_pool(command_pool, None);
            }
            return Err(e);
        }

        let sync = FrameSynchronizer::new(frames, render_finished);
        log::info!(
            "Created {} frame(s) in flight for {} swapchain image(s)",
            sync.frames_in_flight(),
            sync.render_finished().len()
        );

        Ok(Self {
            sync,
            command_pool,
            device,
        })
    }
}

impl Drop for FrameResources {
    fn drop(&mut self) {
        log::debug!("Destroying frame resources");
        unsafe {
            destroy_sync_objects(
                &self.device.device,
                self.sync.frames(),
                self.sync.render_finished(),
            );
            // Also frees the command buffers
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore, InitializationError> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.create_semaphore(&semaphore_info, None) }
        .map_err(init_call("vkCreateSemaphore"))
}

/// Fills `frames` and `render_finished`; on error they hold what was created.
fn create_sync_objects(
    device: &ash::Device,
    command_buffers: Vec<vk::CommandBuffer>,
    image_count: usize,
    frames: &mut Vec<FrameState>,
    render_finished: &mut Vec<vk::Semaphore>,
) -> Result<(), InitializationError> {
    for command_buffer in command_buffers {
        frames.push(create_frame(device, command_buffer)?);
    }
    for _ in 0..image_count {
        render_finished.push(create_semaphore(device)?);
    }
    Ok(())
}

fn create_frame(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
) -> Result<FrameState, InitializationError> {
    // Start signaled so the first wait returns immediately
    let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

    let image_available = create_semaphore(device)?;

    let in_flight_fence = match unsafe { device.create_fence(&fence_info, None) } {
        Ok(fence) => fence,
        Err(result) => {
            unsafe { device.destroy_semaphore(image_available, None) };
            return Err(init_call("vkCreateFence")(result));
        }
    };

    Ok(FrameState {
        command_buffer,
        image_available,
        in_flight_fence,
    })
}

unsafe fn destroy_sync_objects(
    device: &ash::Device,
    frames: &[FrameState],
    render_finished: &[vk::Semaphore],
) {
    for frame in frames {
        device.destroy_semaphore(frame.image_available, None);
        device.destroy_fence(frame.in_flight_fence, None);
    }
    for &semaphore in render_finished {
        device.destroy_semaphore(semaphore, None);
    }
}

/// `FrameBackend` over the real device, swapchain and recorder.
pub struct VulkanFrameBackend<'a> {
    device: &'a Device,
    swapchain: &'a Swapchain,
    recorder: CommandRecorder<'a>,
}

impl<'a> VulkanFrameBackend<'a> {
    pub fn new(device: &'a Device, swapchain: &'a Swapchain, pipeline: vk::Pipeline) -> Self {
        Self {
            device,
            swapchain,
            recorder: CommandRecorder::new(&device.device, pipeline),
        }
    }
}

impl FrameBackend for VulkanFrameBackend<'_> {
    fn wait_for_fence(&mut self, fence: vk::Fence) -> Result<(), RuntimeError> {
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(frame_call("vkWaitForFences"))
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> Result<(), RuntimeError> {
        unsafe { self.device.device.reset_fences(&[fence]) }.map_err(frame_call("vkResetFences"))
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> Result<u32, RuntimeError> {
        self.swapchain.acquire_next_image(u64::MAX, signal)
    }

    fn record(&mut self, cmd: vk::CommandBuffer, image_index: u32) -> Result<(), RuntimeError> {
        let i = image_index as usize;
        let (image, view) = match (self.swapchain.images.get(i), self.swapchain.image_views.get(i)) {
            (Some(&image), Some(&view)) => (image, view),
            _ => return Err(RuntimeError::UnknownImage(image_index)),
        };

        unsafe {
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(frame_call("vkResetCommandBuffer"))?;

        self.recorder.record(
            cmd,
            RenderTarget {
                image,
                view,
                extent: self.swapchain.extent(),
            },
        )
    }

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(), RuntimeError> {
        let wait_semaphores = [wait];
        let wait_stages = [wait_stage];
        let signal_semaphores = [signal];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info.build()], fence)
        }
        .map_err(frame_call("vkQueueSubmit"))
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<(), RuntimeError> {
        self.swapchain
            .present(self.device.present_queue, image_index, &[wait])
    }
}
