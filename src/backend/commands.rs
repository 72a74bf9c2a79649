// Per-frame command recording
//
// Each frame re-records one command buffer: transition the swapchain image
// to COLOR_ATTACHMENT_OPTIMAL, draw the triangle with dynamic rendering,
// then transition to PRESENT_SRC_KHR.

use ash::vk;

use super::error::{frame_call, RuntimeError};

/// Access and stage masks for one image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Look up the barrier for `old -> new`. Only the two transitions the
    /// frame uses are known; anything else is an error.
    pub fn resolve(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<Self, RuntimeError> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            ),
            _ => return Err(RuntimeError::UnsupportedLayoutTransition { old, new }),
        };

        Ok(Self {
            old_layout: old,
            new_layout: new,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }

    pub fn image_barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(COLOR_SUBRESOURCE)
            .build()
    }
}

const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// What gets drawn into one swapchain image.
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// Records the triangle pass into a command buffer.
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    pipeline: vk::Pipeline,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(device: &'a ash::Device, pipeline: vk::Pipeline) -> Self {
        Self { device, pipeline }
    }

    pub fn record(&self, cmd: vk::CommandBuffer, target: RenderTarget) -> Result<(), RuntimeError> {
        let to_attachment = LayoutTransition::resolve(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;
        let to_present = LayoutTransition::resolve(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;

        let color_attachments = [vk::RenderingAttachmentInfo::builder()
            .image_view(target.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .build()];

        let rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(frame_call("vkBeginCommandBuffer"))?;

            self.transition(cmd, target.image, &to_attachment);

            self.device.cmd_begin_rendering(cmd, &rendering_info);
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            self.device.cmd_draw(cmd, 3, 1, 0, 0);
            self.device.cmd_end_rendering(cmd);

            self.transition(cmd, target.image, &to_present);

            self.device
                .end_command_buffer(cmd)
                .map_err(frame_call("vkEndCommandBuffer"))?;
        }

        Ok(())
    }

    unsafe fn transition(&self, cmd: vk::CommandBuffer, image: vk::Image, t: &LayoutTransition) {
        self.device.cmd_pipeline_barrier(
            cmd,
            t.src_stage,
            t.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[t.image_barrier(image)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn undefined_to_color_attachment() {
        let t = LayoutTransition::resolve(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
        .expect("defined transition");

        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(t.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn color_attachment_to_present() {
        let t = LayoutTransition::resolve(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .expect("defined transition");

        assert_eq!(t.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::empty());
        assert_eq!(t.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn other_pairs_are_rejected() {
        let pairs = [
            (vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        ];
        for (old, new) in pairs {
            assert_eq!(
                LayoutTransition::resolve(old, new),
                Err(RuntimeError::UnsupportedLayoutTransition { old, new })
            );
        }
    }

    #[test]
    fn barrier_covers_single_color_subresource() {
        let t = LayoutTransition::resolve(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
        .expect("defined transition");
        let image = vk::Image::from_raw(42);
        let barrier = t.image_barrier(image);

        assert_eq!(barrier.image, image);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(barrier.subresource_range.level_count, 1);
        assert_eq!(barrier.subresource_range.layer_count, 1);
    }
}
