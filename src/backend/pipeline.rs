// Graphics pipeline creation
//
// Minimal state for drawing a triangle with dynamic rendering: no render
// pass, no vertex input, fixed viewport, opaque output.

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::device::Device;
use super::error::{init_call, InitializationError};
use super::shader::ShaderModule;

pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<Device>,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<Device>,
        color_format: vk::Format,
        extent: vk::Extent2D,
        vertex_shader: &Path,
        fragment_shader: &Path,
    ) -> Result<Self, InitializationError> {
        let vert = ShaderModule::load(&device, vertex_shader)?;
        let frag = ShaderModule::load(&device, fragment_shader)?;

        let entry_point = c"main";
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert.module)
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag.module)
                .name(entry_point)
                .build(),
        ];

        // Vertices come from gl_VertexIndex in the shader
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .map_err(init_call("vkCreatePipelineLayout"))?;

        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .push_next(&mut rendering_info)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(InitializationError::Vulkan {
                    call: "vkCreateGraphicsPipelines",
                    result,
                });
            }
        };

        // Shader modules are released here; the pipeline no longer needs them
        drop(vert);
        drop(frag);

        log::info!("Created graphics pipeline for {:?}", color_format);

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        log::debug!("Destroying graphics pipeline");
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
