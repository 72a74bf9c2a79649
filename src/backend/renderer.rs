// Renderer - one-time setup plus the per-frame entry point
//
// Setup order: instance -> surface -> physical device -> logical device ->
// swapchain -> pipeline -> frame resources. Every stage returns a typed
// error; whatever was created before a failing stage is released by its
// owner's Drop, newest first, as the `?` unwinds the locals.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::path::PathBuf;
use std::sync::Arc;

use super::device::{pick_physical_device, Device};
use super::error::{frame_call, InitializationError, RuntimeError};
use super::instance::{Diagnostics, Instance};
use super::pipeline::GraphicsPipeline;
use super::surface::{self, Surface};
use super::swapchain::Swapchain;
use super::sync::{FrameResources, VulkanFrameBackend};

/// Inputs to renderer setup, resolved from configuration by the caller.
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub app_name: String,
    pub diagnostics: Diagnostics,
    pub preferred_present_mode: vk::PresentModeKHR,
    pub frames_in_flight: usize,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

/// The setup sequence, one method per stage in creation order. Each stage
/// receives the owners it depends on.
pub trait SetupStages {
    type Instance;
    type Surface;
    type Device;
    type Swapchain;
    type Pipeline;
    type Frames;
    type Error;

    fn instance(&mut self) -> Result<Self::Instance, Self::Error>;

    fn surface(&mut self, instance: &Self::Instance) -> Result<Self::Surface, Self::Error>;

    fn device(
        &mut self,
        instance: &Self::Instance,
        surface: &Self::Surface,
    ) -> Result<Self::Device, Self::Error>;

    fn swapchain(
        &mut self,
        device: &Self::Device,
        surface: &Self::Surface,
    ) -> Result<Self::Swapchain, Self::Error>;

    fn pipeline(
        &mut self,
        device: &Self::Device,
        swapchain: &Self::Swapchain,
    ) -> Result<Self::Pipeline, Self::Error>;

    fn frames(
        &mut self,
        device: &Self::Device,
        swapchain: &Self::Swapchain,
    ) -> Result<Self::Frames, Self::Error>;
}

/// The owner produced by every setup stage.
///
/// IMPORTANT: Field order matters for Drop! Fields drop top to bottom, so
/// per-frame objects go first and the instance last.
pub struct RendererStages<S: SetupStages> {
    pub frames: S::Frames,
    pub pipeline: S::Pipeline,
    pub swapchain: S::Swapchain,
    pub device: S::Device,
    pub surface: S::Surface,
    pub instance: S::Instance,
}

impl<S: SetupStages> RendererStages<S> {
    /// Run every stage in order, stopping at the first error. Locals drop in
    /// reverse declaration order, so a failure at stage k releases stages
    /// k-1..0 and nothing else.
    pub fn build(setup: &mut S) -> Result<Self, S::Error> {
        let instance = setup.instance()?;
        let surface = setup.surface(&instance)?;
        let device = setup.device(&instance, &surface)?;
        let swapchain = setup.swapchain(&device, &surface)?;
        let pipeline = setup.pipeline(&device, &swapchain)?;
        let frames = setup.frames(&device, &swapchain)?;

        Ok(Self {
            frames,
            pipeline,
            swapchain,
            device,
            surface,
            instance,
        })
    }
}

/// Setup stages over the real Vulkan wrappers.
struct VulkanSetup {
    settings: RendererSettings,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
    framebuffer_size: (u32, u32),
}

impl SetupStages for VulkanSetup {
    type Instance = Arc<Instance>;
    type Surface = Arc<Surface>;
    type Device = Arc<Device>;
    type Swapchain = Swapchain;
    type Pipeline = GraphicsPipeline;
    type Frames = FrameResources;
    type Error = InitializationError;

    fn instance(&mut self) -> Result<Arc<Instance>, InitializationError> {
        let platform_extensions = surface::required_extensions(self.display_handle)?;
        Instance::new(
            &self.settings.app_name,
            platform_extensions,
            &self.settings.diagnostics,
        )
    }

    fn surface(&mut self, instance: &Arc<Instance>) -> Result<Arc<Surface>, InitializationError> {
        Surface::new(instance.clone(), self.display_handle, self.window_handle)
    }

    fn device(
        &mut self,
        instance: &Arc<Instance>,
        surface: &Arc<Surface>,
    ) -> Result<Arc<Device>, InitializationError> {
        let candidate = pick_physical_device(instance, surface)?;
        Device::new(instance.clone(), &candidate)
    }

    fn swapchain(
        &mut self,
        device: &Arc<Device>,
        surface: &Arc<Surface>,
    ) -> Result<Swapchain, InitializationError> {
        Swapchain::new(
            device.clone(),
            surface.clone(),
            self.framebuffer_size,
            self.settings.preferred_present_mode,
        )
    }

    fn pipeline(
        &mut self,
        device: &Arc<Device>,
        swapchain: &Swapchain,
    ) -> Result<GraphicsPipeline, InitializationError> {
        GraphicsPipeline::new(
            device.clone(),
            swapchain.format(),
            swapchain.extent(),
            &self.settings.vertex_shader,
            &self.settings.fragment_shader,
        )
    }

    fn frames(
        &mut self,
        device: &Arc<Device>,
        swapchain: &Swapchain,
    ) -> Result<FrameResources, InitializationError> {
        FrameResources::new(
            device.clone(),
            self.settings.frames_in_flight,
            swapchain.images.len(),
        )
    }
}

/// Owns every graphics object.
pub struct Renderer {
    stages: RendererStages<VulkanSetup>,
}

impl Renderer {
    pub fn new(
        settings: &RendererSettings,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        framebuffer_size: (u32, u32),
    ) -> Result<Self, InitializationError> {
        log::info!("Initializing Vulkan...");

        let mut setup = VulkanSetup {
            settings: settings.clone(),
            display_handle,
            window_handle,
            framebuffer_size,
        };
        let stages = RendererStages::build(&mut setup)?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self { stages })
    }

    /// Acquire, record, submit and present one frame.
    pub fn draw_frame(&mut self) -> Result<u32, RuntimeError> {
        let stages = &mut self.stages;
        let mut backend = VulkanFrameBackend::new(
            &stages.device,
            &stages.swapchain,
            stages.pipeline.pipeline,
        );
        let sync = &mut stages.frames.sync;
        log::trace!("Drawing with frame slot {}", sync.current_frame());

        sync.draw_frame(&mut backend).map_err(|e| {
            log::debug!("Frame stopped in phase {:?}", sync.phase());
            e
        })
    }

    /// Block until all submitted GPU work has finished.
    pub fn wait_idle(&self) -> Result<(), RuntimeError> {
        self.stages
            .device
            .wait_idle()
            .map_err(frame_call("vkDeviceWaitIdle"))
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.stages.swapchain.extent()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.wait_idle() {
            log::error!("Device did not go idle before cleanup: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const STAGES: [&str; 6] = ["instance", "surface", "device", "swapchain", "pipeline", "frames"];

    type Log = Rc<RefCell<Vec<String>>>;

    /// Stage owner that records its release.
    struct Owner {
        name: &'static str,
        log: Log,
    }

    impl Drop for Owner {
        fn drop(&mut self) {
            self.log.borrow_mut().push(format!("release {}", self.name));
        }
    }

    struct RecordingSetup {
        log: Log,
        fail_at: Option<&'static str>,
    }

    impl RecordingSetup {
        fn new(fail_at: Option<&'static str>) -> Self {
            Self {
                log: Rc::new(RefCell::new(Vec::new())),
                fail_at,
            }
        }

        fn create(&mut self, name: &'static str, deps: &[(&Owner, &str)]) -> Result<Owner, String> {
            for (owner, expected) in deps {
                assert_eq!(owner.name, *expected, "{} got the wrong dependency", name);
            }
            if self.fail_at == Some(name) {
                self.log.borrow_mut().push(format!("fail {}", name));
                return Err(format!("{} failed", name));
            }
            self.log.borrow_mut().push(format!("create {}", name));
            Ok(Owner {
                name,
                log: self.log.clone(),
            })
        }

        fn entries(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    impl SetupStages for RecordingSetup {
        type Instance = Owner;
        type Surface = Owner;
        type Device = Owner;
        type Swapchain = Owner;
        type Pipeline = Owner;
        type Frames = Owner;
        type Error = String;

        fn instance(&mut self) -> Result<Owner, String> {
            self.create("instance", &[])
        }

        fn surface(&mut self, instance: &Owner) -> Result<Owner, String> {
            self.create("surface", &[(instance, "instance")])
        }

        fn device(&mut self, instance: &Owner, surface: &Owner) -> Result<Owner, String> {
            self.create("device", &[(instance, "instance"), (surface, "surface")])
        }

        fn swapchain(&mut self, device: &Owner, surface: &Owner) -> Result<Owner, String> {
            self.create("swapchain", &[(device, "device"), (surface, "surface")])
        }

        fn pipeline(&mut self, device: &Owner, swapchain: &Owner) -> Result<Owner, String> {
            self.create("pipeline", &[(device, "device"), (swapchain, "swapchain")])
        }

        fn frames(&mut self, device: &Owner, swapchain: &Owner) -> Result<Owner, String> {
            self.create("frames", &[(device, "device"), (swapchain, "swapchain")])
        }
    }

    #[test]
    fn failure_releases_earlier_stages_newest_first() {
        for (k, failing) in STAGES.iter().enumerate() {
            let mut setup = RecordingSetup::new(Some(*failing));

            let result = RendererStages::build(&mut setup);
            assert_eq!(result.err(), Some(format!("{} failed", failing)));

            let mut expected: Vec<String> =
                STAGES[..k].iter().map(|s| format!("create {}", s)).collect();
            expected.push(format!("fail {}", failing));
            expected.extend(STAGES[..k].iter().rev().map(|s| format!("release {}", s)));
            assert_eq!(setup.entries(), expected, "failure at {}", failing);
        }
    }

    #[test]
    fn built_stages_create_in_order_and_release_in_reverse() {
        let mut setup = RecordingSetup::new(None);

        let stages = RendererStages::build(&mut setup)
            .unwrap_or_else(|e| panic!("setup failed: {}", e));
        let created: Vec<String> = STAGES.iter().map(|s| format!("create {}", s)).collect();
        assert_eq!(setup.entries(), created);

        drop(stages);
        let released: Vec<String> = setup.entries().split_off(STAGES.len());
        assert_eq!(
            released,
            vec![
                "release frames",
                "release pipeline",
                "release swapchain",
                "release device",
                "release surface",
                "release instance",
            ]
        );
    }

    #[test]
    fn nothing_is_released_when_the_first_stage_fails() {
        let mut setup = RecordingSetup::new(Some("instance"));
        assert!(RendererStages::build(&mut setup).is_err());
        assert_eq!(setup.entries(), vec!["fail instance"]);
    }
}
