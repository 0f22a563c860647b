use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

// Import from the library crate
use spinning_cube::{
    controller::{CubeError, FrameTimer, RotatingCube},
    logging,
    settings::Settings,
    view::{GpuError, WgpuContext},
};

struct App {
    settings: Settings,
    window: Option<Arc<Window>>,
    cube: Option<RotatingCube<WgpuContext>>,
    timer: FrameTimer,
    failed: bool,
}

impl App {
    fn new(settings: Settings) -> Self {
        let timer = FrameTimer::new(settings.ticks_per_second, Instant::now());
        Self {
            settings,
            window: None,
            cube: None,
            timer,
            failed: false,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: &dyn std::error::Error) {
        tracing::error!("{err}");
        self.failed = true;
        self.cube = None;
        event_loop.exit();
    }

    fn load(&self, event_loop: &ActiveEventLoop) -> Result<(Arc<Window>, RotatingCube<WgpuContext>), Box<dyn std::error::Error>> {
        let window_attributes = Window::default_attributes()
            .with_title(self.settings.title.as_str())
            .with_inner_size(winit::dpi::LogicalSize::new(self.settings.width, self.settings.height));
        let window = Arc::new(event_loop.create_window(window_attributes)?);

        let ctx = pollster::block_on(WgpuContext::new(window.clone()))?;
        let cube = RotatingCube::load(ctx, &self.settings)?;
        Ok((window, cube))
    }

    fn tick(&mut self, event_loop: &ActiveEventLoop) {
        let Some(cube) = self.cube.as_mut() else { return };

        let dt = self.timer.tick(Instant::now());
        cube.update(dt);

        match cube.render() {
            Ok(()) => {}
            Err(CubeError::Gpu(GpuError::Surface(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated))) => {
                let ctx = cube.context_mut();
                let (width, height) = ctx.size();
                ctx.resize(width, height);
                tracing::warn!("surface lost, reconfigured and skipped frame");
            }
            Err(CubeError::Gpu(GpuError::Surface(wgpu::SurfaceError::Timeout))) => {
                tracing::warn!("surface timed out, skipped frame");
            }
            Err(e) => self.fail(event_loop, &e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match self.load(event_loop) {
            Ok((window, cube)) => {
                self.window = Some(window);
                self.cube = Some(cube);
                self.timer = FrameTimer::new(self.settings.ticks_per_second, Instant::now());
                event_loop.set_control_flow(ControlFlow::WaitUntil(self.timer.next_deadline()));
            }
            Err(e) => self.fail(event_loop, e.as_ref()),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.cube = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(cube) = self.cube.as_mut() {
                    cube.context_mut().resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.tick(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            if self.timer.is_due(Instant::now()) {
                window.request_redraw();
            }
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.timer.next_deadline()));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // unload while the window and device are still alive
        self.cube = None;
    }
}

fn main() -> ExitCode {
    logging::init();

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            tracing::error!("failed to create event loop: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut app = App::new(Settings::default());
    if let Err(e) = event_loop.run_app(&mut app) {
        tracing::error!("event loop error: {e}");
        return ExitCode::FAILURE;
    }

    if app.failed {
        ExitCode::FAILURE
    } else {
        tracing::info!(ticks = app.timer.number_of_ticks(), "window closed");
        ExitCode::SUCCESS
    }
}
