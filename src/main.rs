// =============================================================================
// ROTOR - a small Vulkan renderer
// =============================================================================
//
// Three cubes in a row; drag to rotate the selected one, scroll to zoom,
// +/- to change the selection.
//
// FRAME FLOW:
// 1. Wait on the current frame slot's fence (only CPU block in the loop)
// 2. Acquire a swapchain image
// 3. Write uniforms, re-record the slot's command buffer
// 4. Submit, signaling the image's render-finished semaphore and the fence
// 5. Present, then advance the frame slot
//
// Resize (or a stale swapchain) funnels into one recreation path that
// waits for device idle before touching the chain.
//
// =============================================================================

mod backend;
mod config;
mod mesh;
mod scene;

use anyhow::{Context, Result};
use ash::vk;
use backend::{
    buffer::MeshBuffer, pipeline, shader, BackendError, FrameCycle, FrameOutcome, FrameSlots,
    RenderContent, Swapchain, SyncObjects, VulkanDevice,
};
use config::Config;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use scene::{Scene, ShaderData, INSTANCE_COUNT};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    let exit_code = app.exit_code;
    // Run the teardown before exiting the process
    drop(app);

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Session object owning the device and every GPU resource. Teardown is
/// explicit and ordered: sync objects, then the swapchain, then the frame
/// slots, then pipeline/descriptor objects, the mesh, and the surface,
/// all before the device itself goes away.
pub struct App {
    config: Config,

    // Window & surface
    window: Option<Arc<Window>>,
    surface: vk::SurfaceKHR,
    surface_loader: Option<ash::khr::surface::Instance>,
    is_fullscreen: bool,

    // Vulkan core
    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<Swapchain>,
    sync: Option<SyncObjects>,
    frames: Option<FrameSlots>,

    // Render content
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    mesh: Option<MeshBuffer>,

    // Frame cycle & scene
    cycle: FrameCycle,
    scene: Scene,

    // State flags
    needs_resize: bool,
    is_minimized: bool,
    exit_code: i32,

    // Input
    last_cursor: Option<(f64, f64)>,
    dragging: bool,

    // Timing
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
    last_frame_ms: f32,
}

impl App {
    pub fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let scene = Scene::new(config.controls.rotate_speed, config.controls.zoom_speed);
        let cycle = FrameCycle::new(config.frames_in_flight());
        let now = Instant::now();
        Self {
            config,
            window: None,
            surface: vk::SurfaceKHR::null(),
            surface_loader: None,
            is_fullscreen,
            device: None,
            swapchain: None,
            sync: None,
            frames: None,
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            mesh: None,
            cycle,
            scene,
            needs_resize: false,
            is_minimized: false,
            exit_code: 0,
            last_cursor: None,
            dragging: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
            last_frame_ms: 0.0,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device =
            VulkanDevice::new(&self.config.window.title, enable_validation, display_handle)?;

        let surface_loader = ash::khr::surface::Instance::new(device.entry(), &device.instance);
        let surface = unsafe {
            ash_window::create_surface(
                device.entry(),
                &device.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .context("Failed to create window surface")?;

        // Presentation chain + depth target (presentation support for the
        // graphics queue family is verified inside)
        let swapchain = Swapchain::create(
            &device,
            surface,
            &surface_loader,
            self.config.get_present_mode(),
        )?;

        let frames_in_flight = self.config.frames_in_flight();

        // Fences/acquire semaphores per slot, render-finished per image
        let sync = SyncObjects::create(&device, frames_in_flight, swapchain.image_count() as usize)?;

        // Command buffers and mapped uniforms, one per slot, fixed for the
        // session
        let frames = FrameSlots::create(
            &device,
            frames_in_flight,
            std::mem::size_of::<ShaderData>() as vk::DeviceSize,
        )?;

        let descriptor_set_layout = pipeline::create_descriptor_set_layout(&device)?;
        let (descriptor_pool, descriptor_sets) = pipeline::create_descriptor_sets(
            &device,
            descriptor_set_layout,
            &frames.uniform_buffers(),
            frames.uniform_size(),
        )?;

        let vert_shader = shader::load_shader(&device, "shaders/scene.vert.spv")?;
        let frag_shader = shader::load_shader(&device, "shaders/scene.frag.spv")?;
        let pipeline_result = pipeline::create_graphics_pipeline(
            &device,
            swapchain.format(),
            swapchain.depth_format(),
            descriptor_set_layout,
            vert_shader,
            frag_shader,
        );
        // Modules are baked into the pipeline and no longer needed
        unsafe {
            device.device.destroy_shader_module(vert_shader, None);
            device.device.destroy_shader_module(frag_shader, None);
        }
        let (gfx_pipeline, pipeline_layout) = pipeline_result?;

        let (vertices, indices) = mesh::cube();
        let mesh = MeshBuffer::create(
            &device,
            bytemuck::cast_slice(&vertices),
            bytemuck::cast_slice(&indices),
            indices.len() as u32,
        )?;

        self.device = Some(device);
        self.surface = surface;
        self.surface_loader = Some(surface_loader);
        self.swapchain = Some(swapchain);
        self.sync = Some(sync);
        self.frames = Some(frames);
        self.descriptor_set_layout = descriptor_set_layout;
        self.descriptor_pool = descriptor_pool;
        self.descriptor_sets = descriptor_sets;
        self.pipeline = gfx_pipeline;
        self.pipeline_layout = pipeline_layout;
        self.mesh = Some(mesh);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    fn render_frame(&mut self) -> Result<()> {
        if self.is_minimized {
            return Ok(());
        }

        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized || self.needs_resize {
                return Ok(());
            }
        }

        let (Some(device), Some(swapchain), Some(sync), Some(frames), Some(mesh)) = (
            self.device.as_ref(),
            self.swapchain.as_ref(),
            self.sync.as_ref(),
            self.frames.as_mut(),
            self.mesh.as_ref(),
        ) else {
            return Ok(());
        };

        let extent = swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let shader_data = self.scene.shader_data(aspect);

        let content = RenderContent {
            pipeline: self.pipeline,
            pipeline_layout: self.pipeline_layout,
            descriptor_sets: &self.descriptor_sets,
            vertex_buffer: mesh.buffer,
            vertex_bytes: mesh.vertex_bytes,
            index_count: mesh.index_count,
            instance_count: INSTANCE_COUNT as u32,
            clear_color: self.config.graphics.clear_color,
        };

        let outcome = self.cycle.draw_frame(
            device,
            swapchain,
            sync,
            frames,
            &content,
            bytemuck::bytes_of(&shader_data),
        )?;

        if outcome == FrameOutcome::SwapchainStale {
            self.needs_resize = true;
        }

        Ok(())
    }

    /// Rebuild the swapchain for the current window size. Skipped entirely
    /// while minimized (zero-sized surfaces cannot back a chain).
    fn recreate_swapchain(&mut self) -> Result<()> {
        let Some(window) = self.window.clone() else {
            return Ok(());
        };

        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        let (Some(device), Some(swapchain), Some(sync), Some(surface_loader)) = (
            self.device.as_ref(),
            self.swapchain.as_mut(),
            self.sync.as_mut(),
            self.surface_loader.as_ref(),
        ) else {
            return Ok(());
        };

        self.cycle.recreate_swapchain(
            device,
            swapchain,
            sync,
            self.surface,
            surface_loader,
            self.config.get_present_mode(),
        )?;

        self.needs_resize = false;
        Ok(())
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen {
                    "fullscreen"
                } else {
                    "windowed"
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title, fps, self.last_frame_ms, mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.exit_code = 1;
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            self.exit_code = fatal_exit_code(&e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                self.last_frame_ms =
                    now.duration_since(self.last_frame_time).as_secs_f32() * 1000.0;
                self.last_frame_time = now;

                match self.render_frame() {
                    Ok(()) => self.update_fps(),
                    Err(e) => {
                        // The GPU/CPU state can no longer be trusted
                        log::error!("Fatal render error: {:?}", e);
                        self.exit_code = fatal_exit_code(&e);
                        event_loop.exit();
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                if let Some(ref device) = self.device {
                                    let _ = device.wait_idle();
                                }
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            KeyCode::NumpadAdd | KeyCode::Equal => {
                                self.scene.select_next();
                            }
                            KeyCode::NumpadSubtract | KeyCode::Minus => {
                                self.scene.select_prev();
                            }
                            _ => {}
                        }
                    }
                }
            }

            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.dragging = state == ElementState::Pressed;
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                if let Some((last_x, last_y)) = self.last_cursor {
                    if self.dragging {
                        let dx = (position.x - last_x) as f32;
                        let dy = (position.y - last_y) as f32;
                        self.scene.rotate_selected(dx, dy, self.last_frame_ms);
                    }
                }
                self.last_cursor = Some((position.x, position.y));
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                };
                self.scene.zoom(steps, self.last_frame_ms);
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

/// Map a fatal error to the process exit code: backend errors carry their
/// Vulkan result code, anything else exits 1.
fn fatal_exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<BackendError>()
        .map(BackendError::exit_code)
        .unwrap_or(1)
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        let Some(device) = self.device.take() else {
            return;
        };

        // Nothing may still be executing against the resources below
        let _ = device.wait_idle();

        // Sync objects first: the render-finished group is sized by the
        // chain's image count and must go before/with the chain
        if let Some(mut sync) = self.sync.take() {
            sync.destroy(&device);
        }
        if let Some(mut swapchain) = self.swapchain.take() {
            swapchain.destroy(&device);
        }
        if let Some(mut frames) = self.frames.take() {
            frames.destroy(&device);
        }

        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.device.destroy_pipeline_layout(self.pipeline_layout, None);
                self.pipeline_layout = vk::PipelineLayout::null();
            }
            if self.descriptor_pool != vk::DescriptorPool::null() {
                device.device.destroy_descriptor_pool(self.descriptor_pool, None);
                self.descriptor_pool = vk::DescriptorPool::null();
            }
            if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                device
                    .device
                    .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
                self.descriptor_set_layout = vk::DescriptorSetLayout::null();
            }
        }
        self.descriptor_sets.clear();

        if let Some(mut mesh) = self.mesh.take() {
            mesh.destroy(&device);
        }

        if self.surface != vk::SurfaceKHR::null() {
            if let Some(ref loader) = self.surface_loader {
                unsafe { loader.destroy_surface(self.surface, None) };
            }
            self.surface = vk::SurfaceKHR::null();
        }

        // Device (and its allocator) drop last
        drop(device);

        log::info!("Cleanup complete");
    }
}
