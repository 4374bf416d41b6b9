//! Interactive viewer for the multi-pass renderer
//!
//! Run with:
//!   cargo run --example viewer
//!   cargo run --example viewer -- --viewport --msaa 1
//!   cargo run --example viewer -- --config viewer.toml
//!
//! Controls:
//!   Left click - Pick the object under the cursor
//!   F2         - Toggle wireframe stage
//!   Escape     - Exit

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use glam::{Mat4, Vec2, Vec3};
use multipass_renderer::backend::FrameBackend;
use multipass_renderer::picking::NO_OBJECT;
use multipass_renderer::vulkan::{cube, EguiOverlay, GpuMesh, VulkanBackend};
use multipass_renderer::{
    CameraUniform, Context, FrameListener, FrameOutcome, ObjectPushConstants, PassContext,
    PipelineKind, RenderStage, RendererConfig, RendererError, RendererEvent, RendererResult,
    ViewportBounds, Window,
};
use winit::{
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
};

#[derive(Parser, Debug)]
#[command(about = "Multi-pass renderer viewer")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Render the scene into an egui panel
    #[arg(long)]
    viewport: bool,
    /// Disable vertical sync
    #[arg(long)]
    no_vsync: bool,
    /// MSAA sample count for the swapchain pass
    #[arg(long)]
    msaa: Option<u32>,
    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,
}

struct SceneObject {
    id: u64,
    name: &'static str,
    model: Mat4,
}

/// Scene content handed to the frame coordinator.
struct Scene {
    cube: GpuMesh,
    sky: GpuMesh,
    objects: Vec<SceneObject>,
    overlay: Option<EguiOverlay>,
    selected: u64,
    wireframe: bool,
}

impl Scene {
    fn draw(&self, stage: RenderStage, pass: &PassContext<'_, VulkanBackend>) -> RendererResult<()> {
        let backend = pass.backend;
        let cmd = pass.commands;

        let kind = match stage {
            RenderStage::Picking => PipelineKind::Picking,
            RenderStage::Default => {
                backend.draw_skybox(cmd, pass.slot, &self.sky)?;
                PipelineKind::Mesh
            }
            // No line pipeline; the wireframe stage drops the sky only.
            RenderStage::Wireframe => PipelineKind::Mesh,
        };

        let pipeline = backend.bind_pipeline(cmd, kind, pass.slot)?;
        for object in &self.objects {
            backend.draw_mesh(
                cmd,
                pipeline,
                &self.cube,
                &ObjectPushConstants::new(object.model, object.id),
            );
        }
        Ok(())
    }

    fn selected_name(&self) -> &'static str {
        self.objects
            .iter()
            .find(|object| object.id == self.selected)
            .map_or("nothing", |object| object.name)
    }

    fn release(self, backend: &mut VulkanBackend) {
        backend.destroy_mesh(self.cube);
        backend.destroy_mesh(self.sky);
    }
}

impl FrameListener<VulkanBackend> for Scene {
    fn on_render(
        &mut self,
        stage: RenderStage,
        pass: &PassContext<'_, VulkanBackend>,
    ) -> RendererResult<()> {
        self.draw(stage, pass)
    }

    fn on_overlay(&mut self, pass: &PassContext<'_, VulkanBackend>) -> RendererResult<()> {
        pass.backend.draw_grid(pass.commands, pass.slot)
    }

    fn on_draw_ui(&mut self, pass: &PassContext<'_, VulkanBackend>) -> RendererResult<()> {
        match self.overlay.as_mut() {
            Some(overlay) => overlay.draw(pass),
            None => Ok(()),
        }
    }
}

fn main() {
    multipass_renderer::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        log::error!("Viewer failed: {e}");
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> RendererResult<RendererConfig> {
    let mut config = match &args.config {
        Some(path) => RendererConfig::load(path)?,
        None => RendererConfig::default(),
    };
    config.viewport |= args.viewport;
    config.validation |= args.validation;
    if args.no_vsync {
        config.vsync = false;
    }
    if let Some(samples) = args.msaa {
        config.msaa_samples = samples;
    }
    // The viewport is only visible through the UI.
    if config.viewport {
        config.ui = true;
    }
    Ok(config)
}

fn build_scene(backend: &VulkanBackend, overlay: Option<EguiOverlay>) -> RendererResult<Scene> {
    let (vertices, indices) = cube(0.5, [1.0, 1.0, 1.0, 1.0]);
    let cube_mesh = backend.upload_mesh(&vertices, &indices)?;
    let (vertices, indices) = cube(1.0, [1.0, 1.0, 1.0, 1.0]);
    let sky = backend.upload_mesh(&vertices, &indices)?;

    let objects = vec![
        SceneObject {
            id: 1,
            name: "left cube",
            model: Mat4::from_translation(Vec3::new(-1.5, 0.5, 0.0)),
        },
        SceneObject {
            id: 2,
            name: "center cube",
            model: Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)),
        },
        SceneObject {
            id: 0xABCD_1234_0000_0003,
            name: "right cube",
            model: Mat4::from_translation(Vec3::new(1.5, 0.5, 0.0)) * Mat4::from_scale(Vec3::splat(0.75)),
        },
    ];

    Ok(Scene {
        cube: cube_mesh,
        sky,
        objects,
        overlay,
        selected: NO_OBJECT,
        wireframe: false,
    })
}

/// Camera slowly orbiting the origin.
fn orbit_camera(elapsed: f32, aspect_ratio: f32) -> CameraUniform {
    let angle = elapsed * 0.3;
    let position = Vec3::new(angle.cos() * 6.0, 3.0, angle.sin() * 6.0);
    let view = Mat4::look_at_rh(position, Vec3::ZERO, Vec3::Y);
    let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect_ratio, 0.1, 200.0);
    // Vulkan clip space points y down.
    projection.y_axis.y *= -1.0;
    CameraUniform::new(view, projection, position, Vec2::ZERO)
}

fn run(args: Args) -> RendererResult<()> {
    let config = load_config(&args)?;
    log::info!("Starting viewer with {config:?}");

    let event_loop = EventLoop::new()
        .map_err(|e| RendererError::InitializationFailed(format!("event loop: {e}")))?;
    let mut window = Window::new(&event_loop, &config.title, config.width, config.height)?;

    let backend = VulkanBackend::new(window.window(), &config)?;
    let overlay = if config.ui {
        Some(EguiOverlay::new(&backend, window.window())?)
    } else {
        None
    };
    let mut scene = Some(build_scene(&backend, overlay)?);
    let mut context = Context::new(backend);
    let started = Instant::now();
    let winit_window = window.window_arc();

    event_loop
        .run(move |event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    let Some(current) = scene.as_mut() else {
                        return;
                    };
                    let egui_consumed = current
                        .overlay
                        .as_mut()
                        .is_some_and(|overlay| overlay.on_window_event(&winit_window, &event));
                    window.handle_event(&event);

                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::KeyboardInput {
                            event:
                                KeyEvent {
                                    physical_key: PhysicalKey::Code(code),
                                    state: ElementState::Pressed,
                                    ..
                                },
                            ..
                        } if !egui_consumed => match code {
                            KeyCode::Escape => elwt.exit(),
                            KeyCode::F2 => {
                                current.wireframe = !current.wireframe;
                                context.set_wireframe(current.wireframe);
                            }
                            _ => {}
                        },
                        WindowEvent::RedrawRequested => {
                            let elapsed = started.elapsed().as_secs_f32();
                            if let Err(e) = render_frame(&mut context, current, &mut window, elapsed) {
                                log::error!("Frame failed: {e}");
                                elwt.exit();
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => window.request_redraw(),
                Event::LoopExiting => {
                    if let Err(e) = context.backend_mut().wait_idle() {
                        log::error!("Failed to wait for the device: {e}");
                    }
                    if let Some(scene) = scene.take() {
                        scene.release(context.backend_mut());
                    }
                }
                _ => {}
            }
        })
        .map_err(|e| RendererError::CommandFailed(format!("event loop: {e}")))
}

fn render_frame(
    context: &mut Context<VulkanBackend>,
    scene: &mut Scene,
    window: &mut Window,
    elapsed: f32,
) -> RendererResult<()> {
    build_ui(context, scene, window);

    let input = window.frame_input(orbit_camera(elapsed, context.aspect_ratio()));
    window.clear_resize_flag();
    let outcome = context.on_update(scene, &input)?;

    for event in context.drain_events() {
        match event {
            RendererEvent::Resized { image_count, .. } => {
                if let Some(overlay) = scene.overlay.as_mut() {
                    log::debug!("Re-registering {image_count} viewport images with egui");
                    overlay.set_image_count(context.backend());
                }
            }
        }
    }

    // After a recreation the picking target is empty; the click waits for
    // the next frame.
    if let FrameOutcome::Presented {
        recreated: false, ..
    } = outcome
    {
        if let Some(click) = window.take_click() {
            let over_ui = context.backend().viewport().is_none()
                && scene
                    .overlay
                    .as_ref()
                    .is_some_and(EguiOverlay::wants_pointer_input);
            if !over_ui && context.viewport_bounds().contains(click) {
                scene.selected = context.pick(click)?;
                log::info!("Picked {} (id {:#x})", scene.selected_name(), scene.selected);
            }
        }
    }
    Ok(())
}

fn build_ui(context: &mut Context<VulkanBackend>, scene: &mut Scene, window: &Window) {
    let selected = scene.selected_name();
    let Some(overlay) = scene.overlay.as_mut() else {
        return;
    };
    overlay.begin_frame(window.window());
    let ctx = overlay.context().clone();

    egui::Window::new("Renderer")
        .default_pos([10.0, 10.0])
        .show(&ctx, |ui| {
            let extent = context.backend().extent();
            ui.label(format!("Backend: {}", context.backend().name()));
            ui.label(format!("Surface: {}x{}", extent.width, extent.height));
            ui.label(format!("Images: {}", context.backend().image_count()));
            ui.label(format!("Frames: {}", context.frames_submitted()));
            ui.separator();
            ui.label(format!("Selected: {selected}"));
            if ui.checkbox(&mut scene.wireframe, "Wireframe (F2)").changed() {
                context.set_wireframe(scene.wireframe);
            }
        });

    if let Some(texture) = overlay.viewport_texture() {
        let extent = context.backend().extent();
        let pixels_per_point = ctx.pixels_per_point();
        egui::CentralPanel::default().show(&ctx, |ui| {
            let size = egui::vec2(extent.width as f32, extent.height as f32) / pixels_per_point;
            let visible = ui.available_rect_before_wrap();
            let response = ui.add(egui::Image::new((texture, size)));

            // Picking works in viewport texels, so the image is shown unscaled.
            let min = response.rect.min;
            let max = response.rect.max.min(visible.max);
            let position = Vec2::new(min.x, min.y) * pixels_per_point;
            context.set_viewport_bounds(ViewportBounds {
                position,
                size: Vec2::new(extent.width as f32, extent.height as f32),
                min: position,
                max: Vec2::new(max.x, max.y) * pixels_per_point,
            });
        });
    }

    overlay.end_frame(window.window());
}
