//! Glue between the UI and one [`GpuSurface`].
//!
//! [`OrchestratorCore`] is the synchronous state machine: whoever owns it
//! must call it from the thread that owns the backend. [`Orchestrator`]
//! runs a core on a dedicated render thread and turns UI calls into
//! commands on a channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{select, Receiver, Sender};
use filterconfig::{EngineSettings, FilterParameters};
use tracing::{debug, error, info, trace, warn};

use crate::backend::GraphicsBackend;
use crate::error::BackendError;
use crate::fallback::{FallbackFrame, FallbackRenderer};
use crate::source::ImageSource;
use crate::surface::{GpuSurface, LoadOutcome, SurfaceOptions, SurfaceState};

/// What the host should show right now.
#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    /// The surface owns the pixels; `frames` have been presented so far.
    Gpu { frames: u64 },
    Fallback(Option<FallbackFrame>),
}

pub struct OrchestratorCore<B: GraphicsBackend> {
    surface: Option<GpuSurface<B>>,
    fallback: FallbackRenderer,
    source: Arc<dyn ImageSource>,
    options: SurfaceOptions,
    params: FilterParameters,
    gpu_disabled: bool,
}

impl<B: GraphicsBackend> OrchestratorCore<B> {
    pub fn new(source: Arc<dyn ImageSource>, options: SurfaceOptions) -> Self {
        Self {
            surface: None,
            fallback: FallbackRenderer::new(),
            source,
            options,
            params: FilterParameters::default(),
            gpu_disabled: false,
        }
    }

    pub fn state(&self) -> SurfaceState {
        match &self.surface {
            Some(surface) => surface.state(),
            None if self.gpu_disabled => SurfaceState::Failed,
            None => SurfaceState::Uninitialized,
        }
    }

    pub fn surface(&self) -> Option<&GpuSurface<B>> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut GpuSurface<B>> {
        self.surface.as_mut()
    }

    pub fn fallback(&self) -> &FallbackRenderer {
        &self.fallback
    }

    /// Creates and initializes the surface. A previously mounted surface is
    /// disposed first.
    pub fn mount(&mut self, backend: B) -> SurfaceState {
        if let Some(mut previous) = self.surface.take() {
            warn!("mount while already mounted; disposing previous surface");
            previous.dispose();
        }

        let mut surface = GpuSurface::new(backend, Arc::clone(&self.source), self.options.clone());
        let state = surface.initialize();
        surface.set_parameters(self.params);
        self.gpu_disabled = state == SurfaceState::Failed;
        if self.gpu_disabled {
            warn!("gpu surface unavailable; using fallback renderer");
        } else if let Some(uri) = self.fallback.source() {
            surface.load_image(uri);
        }
        self.surface = Some(surface);
        info!(state = ?self.state(), "mounted");
        self.state()
    }

    /// Records that no backend could be created at all.
    pub fn mount_unavailable(&mut self, err: &BackendError) {
        error!(error = %err, "failed to create rendering backend; using fallback renderer");
        self.gpu_disabled = true;
    }

    pub fn image_changed(&mut self, uri: &str) {
        self.fallback.set_source(Some(uri.to_string()));
        if self.gpu_disabled {
            return;
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.load_image(uri);
        }
    }

    /// Stores the parameters without drawing.
    pub fn set_parameters(&mut self, params: FilterParameters) {
        self.params = params.clamped();
        self.fallback.set_parameters(self.params);
        if let Some(surface) = self.surface.as_mut() {
            surface.set_parameters(self.params);
        }
    }

    /// Forwards to surface and fallback, then renders if drawable.
    pub fn parameters_changed(&mut self, params: FilterParameters) -> bool {
        self.set_parameters(params);
        self.render()
    }

    pub fn render(&mut self) -> bool {
        match self.surface.as_mut() {
            Some(surface) if !self.gpu_disabled => surface.render(),
            _ => false,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(surface) = self.surface.as_mut() {
            surface.resize(width, height);
        }
    }

    pub fn is_drawable(&self) -> bool {
        !self.gpu_disabled && self.state().is_drawable()
    }

    pub fn load_events(&self) -> Option<Receiver<LoadOutcome>> {
        self.surface.as_ref().and_then(GpuSurface::load_events)
    }

    /// Applies a load result and renders straight away if it made the
    /// texture ready.
    pub fn handle_load(&mut self, outcome: LoadOutcome) -> bool {
        let Some(surface) = self.surface.as_mut() else {
            return false;
        };
        let state = surface.finish_load(outcome);
        state == SurfaceState::TextureReady && surface.render()
    }

    /// Non-blocking: applies a completed load if there is one.
    pub fn pump_loads(&mut self) -> bool {
        let Some(surface) = self.surface.as_mut() else {
            return false;
        };
        match surface.poll_load() {
            Some(SurfaceState::TextureReady) => surface.render(),
            _ => false,
        }
    }

    /// Blocks up to `timeout` for the in-flight load.
    pub fn wait_for_load(&mut self, timeout: Duration) -> bool {
        let Some(surface) = self.surface.as_mut() else {
            return false;
        };
        match surface.wait_for_load(timeout) {
            Some(SurfaceState::TextureReady) => surface.render(),
            _ => false,
        }
    }

    pub fn unmount(&mut self) {
        if let Some(mut surface) = self.surface.take() {
            surface.dispose();
            info!("unmounted");
        }
    }

    pub fn presentation(&self) -> Presentation {
        match &self.surface {
            Some(surface) if !self.gpu_disabled && surface.state().is_drawable() => {
                Presentation::Gpu {
                    frames: surface.frames_presented(),
                }
            }
            _ => Presentation::Fallback(self.fallback.frame()),
        }
    }
}

/// Published by the render thread after every batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: SurfaceState,
    pub presentation: Presentation,
}

impl Snapshot {
    fn of<B: GraphicsBackend>(core: &OrchestratorCore<B>) -> Self {
        Self {
            state: core.state(),
            presentation: core.presentation(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Image(String),
    Parameters(FilterParameters),
    Resize(u32, u32),
    Unmount,
}

/// Commands drained together, collapsed to their net effect.
#[derive(Debug, Default)]
struct Batch {
    image: Option<String>,
    parameters: Option<FilterParameters>,
    resize: Option<(u32, u32)>,
    unmount: bool,
}

impl Batch {
    fn push(&mut self, command: Command) {
        match command {
            Command::Image(uri) => self.image = Some(uri),
            Command::Parameters(params) => self.parameters = Some(params),
            Command::Resize(width, height) => self.resize = Some((width, height)),
            Command::Unmount => self.unmount = true,
        }
    }

    fn wants_frame(&self) -> bool {
        self.parameters.is_some() || self.resize.is_some()
    }
}

/// Handle to a render thread driving one [`OrchestratorCore`].
pub struct Orchestrator {
    commands: Sender<Command>,
    snapshot: Arc<Mutex<Snapshot>>,
    worker: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Spawns the render thread. `factory` runs on that thread, so the
    /// backend itself never has to be `Send`.
    pub fn mount<B, F>(
        factory: F,
        source: Arc<dyn ImageSource>,
        settings: &EngineSettings,
    ) -> Result<Self>
    where
        B: GraphicsBackend + 'static,
        F: FnOnce() -> Result<B, BackendError> + Send + 'static,
    {
        let (commands, receiver) = crossbeam_channel::unbounded();
        let snapshot = Arc::new(Mutex::new(Snapshot {
            state: SurfaceState::Uninitialized,
            presentation: Presentation::Fallback(None),
        }));
        let options = SurfaceOptions::from(settings);
        let frame_interval = settings.frame_interval;
        let shared = Arc::clone(&snapshot);

        let worker = thread::Builder::new()
            .name("tonerender-render".into())
            .spawn(move || {
                let mut core = OrchestratorCore::new(source, options);
                match factory() {
                    Ok(backend) => {
                        core.mount(backend);
                    }
                    Err(err) => core.mount_unavailable(&err),
                }
                publish(&shared, &core);
                run(core, receiver, shared, frame_interval);
            })
            .context("spawning render thread")?;

        Ok(Self {
            commands,
            snapshot,
            worker: Some(worker),
        })
    }

    pub fn image_changed(&self, uri: impl Into<String>) {
        self.send(Command::Image(uri.into()));
    }

    pub fn parameters_changed(&self, params: FilterParameters) {
        self.send(Command::Parameters(params));
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.send(Command::Resize(width, height));
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> SurfaceState {
        self.snapshot().state
    }

    pub fn presentation(&self) -> Presentation {
        self.snapshot().presentation
    }

    /// Disposes the surface on the render thread and waits for it to exit.
    pub fn unmount(mut self) {
        self.shutdown();
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("render thread has exited; dropping command");
        }
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.commands.send(Command::Unmount);
        if let Err(panic) = worker.join() {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(%message, "render thread panicked");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish<B: GraphicsBackend>(shared: &Mutex<Snapshot>, core: &OrchestratorCore<B>) {
    let snapshot = Snapshot::of(core);
    *shared.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
}

fn run<B: GraphicsBackend>(
    mut core: OrchestratorCore<B>,
    commands: Receiver<Command>,
    shared: Arc<Mutex<Snapshot>>,
    frame_interval: Duration,
) {
    let mut last_frame: Option<Instant> = None;

    // Dispose runs on this thread even if a batch panics.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| loop {
        let load_events = core.load_events().unwrap_or_else(crossbeam_channel::never);
        let mut batch = Batch::default();

        select! {
            recv(commands) -> command => match command {
                Ok(command) => batch.push(command),
                Err(_) => batch.unmount = true,
            },
            recv(load_events) -> outcome => {
                match outcome {
                    Ok(outcome) => {
                        if core.handle_load(outcome) {
                            last_frame = Some(Instant::now());
                        }
                    }
                    // Worker died without reporting; let the surface notice.
                    Err(_) => {
                        core.pump_loads();
                    }
                }
                publish(&shared, &core);
                continue;
            },
        }

        for command in commands.try_iter() {
            batch.push(command);
        }

        if !batch.unmount && batch.wants_frame() && core.is_drawable() {
            if let Some(wait) = pacing_delay(last_frame, frame_interval) {
                trace!(?wait, "pacing frame");
                thread::sleep(wait);
                for command in commands.try_iter() {
                    batch.push(command);
                }
            }
        }

        if batch.unmount {
            core.unmount();
            publish(&shared, &core);
            break;
        }
        apply(&mut core, batch, &mut last_frame);
        publish(&shared, &core);
    }));

    if let Err(payload) = outcome {
        core.unmount();
        publish(&shared, &core);
        panic::resume_unwind(payload);
    }
}

fn apply<B: GraphicsBackend>(
    core: &mut OrchestratorCore<B>,
    batch: Batch,
    last_frame: &mut Option<Instant>,
) {
    if let Some(uri) = &batch.image {
        core.image_changed(uri);
    }
    if let Some((width, height)) = batch.resize {
        core.resize(width, height);
    }
    if let Some(params) = batch.parameters {
        core.set_parameters(params);
    }
    if batch.wants_frame() && core.render() {
        *last_frame = Some(Instant::now());
    }
}

fn pacing_delay(last_frame: Option<Instant>, interval: Duration) -> Option<Duration> {
    if interval.is_zero() {
        return None;
    }
    let elapsed = last_frame?.elapsed();
    interval.checked_sub(elapsed).filter(|wait| !wait.is_zero())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use filterconfig::Field;
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::backend::fake::{draws, FakeBackend, Faults, Log};
    use crate::source::MemorySource;

    const WAIT: Duration = Duration::from_secs(5);

    fn png(pixel: [u8; 4]) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(2, 2, Rgba(pixel))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn source() -> Arc<dyn ImageSource> {
        Arc::new(
            MemorySource::new()
                .with("mem://a", png([200, 100, 50, 255]))
                .with("mem://b", png([10, 20, 30, 255])),
        )
    }

    fn core() -> OrchestratorCore<FakeBackend> {
        OrchestratorCore::new(source(), SurfaceOptions::default())
    }

    fn log_of(core: &OrchestratorCore<FakeBackend>) -> Arc<Mutex<Log>> {
        core.surface().unwrap().backend().log()
    }

    #[test]
    fn fallback_is_authoritative_until_texture_ready() {
        let mut core = core();
        assert_eq!(core.presentation(), Presentation::Fallback(None));

        core.mount(FakeBackend::new());
        core.image_changed("mem://a");
        assert_eq!(
            core.presentation(),
            Presentation::Fallback(Some(FallbackFrame {
                uri: "mem://a".into(),
                opacity: 1.0,
            }))
        );

        assert!(core.wait_for_load(WAIT), "load completion renders immediately");
        assert_eq!(core.state(), SurfaceState::Rendering);
        assert_eq!(core.presentation(), Presentation::Gpu { frames: 1 });
    }

    #[test]
    fn parameters_render_only_when_drawable() {
        let mut core = core();
        core.mount(FakeBackend::new());
        let log = log_of(&core);

        let dim = FilterParameters::new().with(Field::Brightness, 0.5);
        assert!(!core.parameters_changed(dim));
        assert!(draws(&log).is_empty());

        core.image_changed("mem://b");
        core.wait_for_load(WAIT);
        assert_eq!(draws(&log), vec![dim]);

        let vivid = dim.with(Field::Saturation, 1.8);
        assert!(core.parameters_changed(vivid));
        assert_eq!(draws(&log), vec![dim, vivid]);
    }

    #[test]
    fn image_chosen_before_mount_is_loaded_on_mount() {
        let mut core = core();
        core.image_changed("mem://a");
        core.mount(FakeBackend::new());
        assert_eq!(core.state(), SurfaceState::TextureLoading);
        assert!(core.wait_for_load(WAIT));
    }

    #[test]
    fn failed_surface_stays_on_fallback() {
        let mut core = core();
        let state = core.mount(FakeBackend::with_faults(Faults {
            compile: true,
            ..Faults::default()
        }));
        assert_eq!(state, SurfaceState::Failed);
        let log = log_of(&core);

        core.image_changed("mem://a");
        assert!(core.load_events().is_none());
        assert!(!core.parameters_changed(FilterParameters::new().with(Field::Brightness, 0.3)));
        assert!(draws(&log).is_empty());
        assert_eq!(
            core.presentation(),
            Presentation::Fallback(Some(FallbackFrame {
                uri: "mem://a".into(),
                opacity: 0.3,
            }))
        );
    }

    #[test]
    fn unmount_before_load_resolves_is_clean() {
        let mut core = core();
        core.mount(FakeBackend::new());
        let log = log_of(&core);
        core.image_changed("mem://a");
        core.unmount();

        assert_eq!(core.state(), SurfaceState::Uninitialized);
        assert!(!core.pump_loads());
        assert_eq!(log.lock().unwrap().live, 0);
        assert!(draws(&log).is_empty());
    }

    #[test]
    fn remount_disposes_previous_surface() {
        let mut core = core();
        core.mount(FakeBackend::new());
        let first = log_of(&core);
        core.mount(FakeBackend::new());
        assert_eq!(first.lock().unwrap().live, 0);
        assert_eq!(core.state(), SurfaceState::ContextReady);
    }

    #[test]
    fn batches_coalesce_to_last_values() {
        let mut batch = Batch::default();
        batch.push(Command::Image("mem://a".into()));
        batch.push(Command::Parameters(FilterParameters::new().with(Field::Hue, 1.0)));
        batch.push(Command::Image("mem://b".into()));
        batch.push(Command::Parameters(FilterParameters::new().with(Field::Hue, 2.0)));

        assert_eq!(batch.image.as_deref(), Some("mem://b"));
        assert_eq!(batch.parameters.unwrap().hue, 2.0);
        assert!(batch.wants_frame());
        assert!(!batch.unmount);
    }

    #[test]
    fn pacing_waits_out_the_interval() {
        assert_eq!(pacing_delay(None, Duration::from_millis(10)), None);
        assert_eq!(pacing_delay(Some(Instant::now()), Duration::ZERO), None);
        let wait = pacing_delay(Some(Instant::now()), Duration::from_secs(10)).unwrap();
        assert!(wait > Duration::from_secs(9));
        let old = Instant::now() - Duration::from_millis(50);
        assert_eq!(pacing_delay(Some(old), Duration::from_millis(10)), None);
    }

    fn wait_until(orchestrator: &Orchestrator, predicate: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let deadline = Instant::now() + WAIT;
        loop {
            let snapshot = orchestrator.snapshot();
            if predicate(&snapshot) || Instant::now() > deadline {
                return snapshot;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn threaded_orchestrator_renders_and_unmounts() {
        let log = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&log);
        let orchestrator = Orchestrator::mount(
            move || {
                let backend = FakeBackend::new();
                *captured.lock().unwrap() = Some(backend.log());
                Ok(backend)
            },
            source(),
            &EngineSettings::default(),
        )
        .unwrap();

        orchestrator.image_changed("mem://a");
        let snapshot = wait_until(&orchestrator, |s| s.state == SurfaceState::Rendering);
        assert_eq!(snapshot.presentation, Presentation::Gpu { frames: 1 });

        orchestrator.parameters_changed(FilterParameters::new().with(Field::Contrast, 1.5));
        let snapshot = wait_until(&orchestrator, |s| {
            s.presentation == Presentation::Gpu { frames: 2 }
        });
        assert_eq!(snapshot.presentation, Presentation::Gpu { frames: 2 });

        orchestrator.unmount();
        let log = log.lock().unwrap().take().unwrap();
        assert_eq!(log.lock().unwrap().live, 0);
        assert_eq!(
            draws(&log).last().copied(),
            Some(FilterParameters::new().with(Field::Contrast, 1.5))
        );
    }

    #[test]
    fn threaded_orchestrator_survives_missing_backend() {
        let orchestrator = Orchestrator::mount(
            || -> Result<FakeBackend, BackendError> {
                Err(BackendError::Device("no adapter".into()))
            },
            source(),
            &EngineSettings::default(),
        )
        .unwrap();
        orchestrator.image_changed("mem://a");
        let snapshot = wait_until(&orchestrator, |s| {
            matches!(s.presentation, Presentation::Fallback(Some(_)))
        });
        assert_eq!(snapshot.state, SurfaceState::Failed);
        drop(orchestrator);
    }
}
