mod buffers;
mod camera;
mod commands;
mod context;
mod depth;
mod descriptors;
mod frame;
mod image;
mod mesh;
mod model;
mod pipeline;
mod render_targets;
mod renderer;
mod scene;
mod shaders;
mod swapchain;
mod texture;
mod vertex;

use std::path::Path;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::Window,
};
use anyhow::Result;
use glam::{vec2, vec3, Mat4};
use log::*;
use vulkanalia::prelude::v1_0::*;

use crate::{
    context::Context,
    descriptors::TextureSlot,
    renderer::Renderer,
};

fn main() -> Result<()> {
    std::env::set_var("RUST_LOG", "info");
    pretty_env_logger::init();

    let event_loop = EventLoop::new()?;
    let mut app = App::default();
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[derive(Default)]
struct App {
    window: Option<Window>,
    context: Option<Context>,
    renderer: Option<Renderer>,
    cube: usize,
    started: Option<Instant>,
    minimised: bool,
}

impl App {
    unsafe fn init(&mut self, window: Window) -> Result<()> {
        let size = window.inner_size();
        let context = Context::create(&window)?;
        let mut renderer = Renderer::create(&context, size.width, size.height)?;

        // The demo scene: a spinning cube in the middle, and
        // two colored quads in the overlay corners. If a
        // texture is present on disk, it becomes the cube's
        // albedo map; otherwise the default white texture
        // stays.
        self.cube = renderer.add_cube(&context, 1.0)?;

        let albedo = Path::new("assets/albedo.png");
        if albedo.exists() {
            renderer.set_mesh_texture(&context, self.cube, TextureSlot::Albedo, albedo)?;
        }

        // An OBJ model dropped into assets/ joins the scene
        // next to the cube.
        let model = Path::new("assets/model.obj");
        if model.exists() {
            let mesh = renderer.add_model(&context, model)?;
            renderer.scene.set_mesh_model(mesh, Mat4::from_translation(vec3(1.5, 0.0, 0.0)));
        }

        renderer.add_quad(
            &context,
            vec2(-0.95, -0.95),
            vec2(0.25, 0.25),
            vec3(0.8, 0.2, 0.2),
        )?;
        renderer.add_quad(
            &context,
            vec2(0.7, 0.7),
            vec2(0.25, 0.25),
            vec3(0.2, 0.8, 0.2),
        )?;

        self.window = Some(window);
        self.context = Some(context);
        self.renderer = Some(renderer);
        self.started = Some(Instant::now());

        Ok(())
    }

    unsafe fn render(&mut self) -> Result<()> {
        let (Some(window), Some(context), Some(renderer)) =
            (&self.window, &self.context, &mut self.renderer)
        else {
            return Ok(());
        };

        // Spin the cube around the Y axis, one turn every six
        // seconds or so.
        let elapsed = self.started.map_or(0.0, |s| s.elapsed().as_secs_f32());
        renderer.scene.set_mesh_model(self.cube, Mat4::from_rotation_y(elapsed));

        let size = window.inner_size();
        renderer.render(context, size.width, size.height)
    }

    unsafe fn destroy(&mut self) {
        if let (Some(context), Some(renderer)) = (&self.context, &mut self.renderer) {
            context.device.device_wait_idle().unwrap();
            renderer.destroy(context);
        }

        if let Some(context) = &mut self.context {
            context.destroy();
        }

        self.renderer = None;
        self.context = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let window_attr = Window::default_attributes()
            .with_title("miranda")
            .with_inner_size(LogicalSize::new(1024, 576));

        let window = event_loop.create_window(window_attr).unwrap();
        if self.window.is_none() {
            unsafe { self.init(window) }.unwrap();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                // Rendering is asynchronous: the device must be
                // idle before anything is destroyed, which the
                // destroy function takes care of.
                unsafe { self.destroy() };
                info!("Destroyed the app.");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    self.minimised = true;
                } else {
                    self.minimised = false;
                    if let Some(renderer) = &mut self.renderer {
                        renderer.resized = true;
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if !self.minimised {
                    unsafe { self.render() }.unwrap();
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _: &ActiveEventLoop) {
        // Keep redrawing continuously.
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
