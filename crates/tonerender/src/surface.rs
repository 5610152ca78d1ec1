//! One visible image on one rendering context.
//!
//! `GpuSurface` owns the backend together with the program, quad and
//! texture handles it created, and drives them through [`SurfaceState`].
//! Image loads run on a worker thread that only fetches and decodes; the
//! decoded pixels come back over a channel and are uploaded by whoever owns
//! the surface, on the rendering thread.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use filterconfig::{EngineSettings, FilterParameters, DEFAULT_PLACEHOLDER};
use image::{ImageReader, Rgba, RgbaImage};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{DrawCall, GeometryId, GraphicsBackend, ProgramId, TextureId};
use crate::error::{BackendError, TextureLoadError};
use crate::shaders::{ProgramSource, FULLSCREEN_QUAD};
use crate::source::ImageSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceState {
    Uninitialized,
    /// Program, quad and placeholder texture exist; nothing drawable yet.
    ContextReady,
    TextureLoading,
    TextureReady,
    /// Texture ready and at least one frame presented.
    Rendering,
    /// Shader program unusable. Terminal.
    Failed,
}

impl SurfaceState {
    pub fn is_drawable(self) -> bool {
        matches!(self, SurfaceState::TextureReady | SurfaceState::Rendering)
    }

    fn accepts_loads(self) -> bool {
        matches!(
            self,
            SurfaceState::ContextReady
                | SurfaceState::TextureLoading
                | SurfaceState::TextureReady
                | SurfaceState::Rendering
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceOptions {
    pub program: ProgramSource,
    pub placeholder: [u8; 4],
    /// Decoded images wider or taller than this fail with
    /// [`TextureLoadError::TooLarge`].
    pub max_texture_size: u32,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            program: ProgramSource::color_adjust(),
            placeholder: DEFAULT_PLACEHOLDER,
            max_texture_size: EngineSettings::default().max_texture_size,
        }
    }
}

impl From<&EngineSettings> for SurfaceOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            program: ProgramSource::color_adjust(),
            placeholder: settings.placeholder,
            max_texture_size: settings.max_texture_size,
        }
    }
}

/// Result of one `load_image` request, tagged with its generation.
#[derive(Debug)]
pub struct LoadOutcome {
    pub generation: u64,
    pub uri: String,
    pub result: Result<RgbaImage, TextureLoadError>,
}

#[derive(Debug, Clone, Copy)]
struct Resources {
    program: ProgramId,
    geometry: GeometryId,
    texture: TextureId,
}

struct PendingLoad {
    generation: u64,
    uri: String,
    cancel: Arc<AtomicBool>,
    receiver: Receiver<LoadOutcome>,
}

impl PendingLoad {
    fn cancel(self) {
        self.cancel.store(true, Ordering::Release);
        debug!(uri = %self.uri, generation = self.generation, "cancelled texture load");
    }
}

pub struct GpuSurface<B: GraphicsBackend> {
    backend: B,
    source: Arc<dyn ImageSource>,
    options: SurfaceOptions,
    state: SurfaceState,
    resources: Option<Resources>,
    params: FilterParameters,
    pending: Option<PendingLoad>,
    generation: u64,
    frames: u64,
    failure: Option<BackendError>,
}

impl<B: GraphicsBackend> GpuSurface<B> {
    pub fn new(backend: B, source: Arc<dyn ImageSource>, options: SurfaceOptions) -> Self {
        Self {
            backend,
            source,
            options,
            state: SurfaceState::Uninitialized,
            resources: None,
            params: FilterParameters::default(),
            pending: None,
            generation: 0,
            frames: 0,
            failure: None,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn parameters(&self) -> FilterParameters {
        self.params
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Why the surface entered [`SurfaceState::Failed`].
    pub fn failure(&self) -> Option<&BackendError> {
        self.failure.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// URI of the load currently in flight.
    pub fn pending_uri(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.uri.as_str())
    }

    /// Compiles the program, uploads the quad and a 1x1 placeholder texture.
    pub fn initialize(&mut self) -> SurfaceState {
        if self.state != SurfaceState::Uninitialized {
            debug!(state = ?self.state, "surface already initialized");
            return self.state;
        }

        match self.create_resources() {
            Ok(resources) => {
                self.resources = Some(resources);
                self.state = SurfaceState::ContextReady;
                info!(program = resources.program.raw(), "surface ready");
            }
            Err(err) => {
                error!(error = %err, "failed to build shader program; surface disabled");
                self.failure = Some(err);
                self.state = SurfaceState::Failed;
            }
        }
        self.state
    }

    fn create_resources(&mut self) -> Result<Resources, BackendError> {
        let program = self.backend.compile_program(&self.options.program)?;
        let geometry = match self.backend.create_geometry(&FULLSCREEN_QUAD) {
            Ok(geometry) => geometry,
            Err(err) => {
                self.backend.release_program(program);
                return Err(err);
            }
        };
        let texture = match self.backend.create_texture(&self.placeholder()) {
            Ok(texture) => texture,
            Err(err) => {
                self.backend.release_geometry(geometry);
                self.backend.release_program(program);
                return Err(err);
            }
        };
        Ok(Resources {
            program,
            geometry,
            texture,
        })
    }

    fn placeholder(&self) -> RgbaImage {
        RgbaImage::from_pixel(1, 1, Rgba(self.options.placeholder))
    }

    /// Starts fetching and decoding `uri` on a worker thread. Any load
    /// already in flight is cancelled and its result will be ignored.
    pub fn load_image(&mut self, uri: &str) {
        if !self.state.accepts_loads() {
            warn!(%uri, state = ?self.state, "ignoring image load on a surface that cannot draw");
            return;
        }

        if let Some(previous) = self.pending.take() {
            previous.cancel();
        }

        self.generation += 1;
        let generation = self.generation;
        let cancel = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = crossbeam_channel::bounded(1);

        let worker_source = Arc::clone(&self.source);
        let worker_cancel = Arc::clone(&cancel);
        let worker_uri = uri.to_string();
        let limit = self.options.max_texture_size;
        let spawned = thread::Builder::new()
            .name("tonerender-load".into())
            .spawn(move || {
                let result = fetch_and_decode(
                    worker_source.as_ref(),
                    &worker_uri,
                    limit,
                    &worker_cancel,
                );
                let _ = sender.send(LoadOutcome {
                    generation,
                    uri: worker_uri,
                    result,
                });
            });

        self.state = SurfaceState::TextureLoading;
        match spawned {
            Ok(_) => {
                debug!(%uri, generation, "loading texture");
                self.pending = Some(PendingLoad {
                    generation,
                    uri: uri.to_string(),
                    cancel,
                    receiver,
                });
            }
            Err(err) => {
                self.apply_failure(
                    uri,
                    TextureLoadError::Fetch {
                        uri: uri.to_string(),
                        message: format!("failed to spawn load worker: {err}"),
                    },
                );
            }
        }
    }

    /// Receiver for the in-flight load, for hosts that wait on several
    /// channels at once. Hand whatever arrives to [`finish_load`](Self::finish_load).
    pub fn load_events(&self) -> Option<Receiver<LoadOutcome>> {
        self.pending.as_ref().map(|pending| pending.receiver.clone())
    }

    /// Applies a finished load if one is waiting. Returns the new state when
    /// something was applied.
    pub fn poll_load(&mut self) -> Option<SurfaceState> {
        let received = self.pending.as_ref()?.receiver.try_recv();
        match received {
            Ok(outcome) => Some(self.finish_load(outcome)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.worker_vanished()),
        }
    }

    /// Blocking variant of [`poll_load`](Self::poll_load).
    pub fn wait_for_load(&mut self, timeout: Duration) -> Option<SurfaceState> {
        let received = self.pending.as_ref()?.receiver.recv_timeout(timeout);
        match received {
            Ok(outcome) => Some(self.finish_load(outcome)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.worker_vanished()),
        }
    }

    fn worker_vanished(&mut self) -> SurfaceState {
        let Some(pending) = self.pending.take() else {
            return self.state;
        };
        let uri = pending.uri.clone();
        self.apply_failure(
            &uri,
            TextureLoadError::Fetch {
                uri: uri.clone(),
                message: "load worker exited without a result".into(),
            },
        );
        self.state
    }

    /// Uploads a successful load or falls back to the placeholder. Outcomes
    /// from superseded or cancelled loads are dropped.
    pub fn finish_load(&mut self, outcome: LoadOutcome) -> SurfaceState {
        let current = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == outcome.generation);
        if !current {
            trace!(
                uri = %outcome.uri,
                generation = outcome.generation,
                "dropping stale load result"
            );
            return self.state;
        }
        self.pending = None;

        match outcome.result {
            Ok(image) => {
                let Some(resources) = self.resources else {
                    return self.state;
                };
                match self.backend.replace_texture(resources.texture, &image) {
                    Ok(()) => {
                        self.state = SurfaceState::TextureReady;
                        info!(
                            uri = %outcome.uri,
                            width = image.width(),
                            height = image.height(),
                            "texture ready"
                        );
                    }
                    Err(err) => {
                        self.apply_failure(
                            &outcome.uri,
                            TextureLoadError::Decode {
                                uri: outcome.uri.clone(),
                                message: format!("upload rejected: {err}"),
                            },
                        );
                    }
                }
            }
            Err(err) => self.apply_failure(&outcome.uri, err),
        }
        self.state
    }

    fn apply_failure(&mut self, uri: &str, err: TextureLoadError) {
        match &err {
            TextureLoadError::Cancelled { .. } => debug!(%uri, "texture load cancelled"),
            _ => warn!(%uri, error = %err, "texture load failed; showing placeholder"),
        }
        if let Some(resources) = self.resources {
            let placeholder = self.placeholder();
            if let Err(err) = self.backend.replace_texture(resources.texture, &placeholder) {
                warn!(error = %err, "failed to restore placeholder texture");
            }
        }
        self.state = SurfaceState::ContextReady;
    }

    /// Stores the parameters, clamped. Never draws.
    pub fn set_parameters(&mut self, params: FilterParameters) {
        self.params = params.clamped();
        trace!(params = ?self.params, "parameters updated");
    }

    /// Draws and presents one frame. Returns `false` without touching the
    /// backend unless the texture is ready.
    pub fn render(&mut self) -> bool {
        if !self.state.is_drawable() {
            trace!(state = ?self.state, "skipping render");
            return false;
        }
        let Some(resources) = self.resources else {
            return false;
        };

        let call = DrawCall {
            program: resources.program,
            geometry: resources.geometry,
            texture: resources.texture,
            params: self.params,
        };
        let presented = self
            .backend
            .draw(&call)
            .and_then(|()| self.backend.present());
        match presented {
            Ok(()) => {
                self.frames += 1;
                if self.state == SurfaceState::TextureReady {
                    debug!("first frame presented");
                }
                self.state = SurfaceState::Rendering;
                true
            }
            Err(err) => {
                warn!(error = %err, "frame dropped");
                false
            }
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            trace!(width, height, "ignoring empty resize");
            return;
        }
        self.backend.resize(width, height);
    }

    /// Cancels any in-flight load and releases every backend resource.
    /// Safe to call repeatedly; a failed surface stays failed.
    pub fn dispose(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
        if let Some(resources) = self.resources.take() {
            self.backend.release_texture(resources.texture);
            self.backend.release_geometry(resources.geometry);
            self.backend.release_program(resources.program);
            debug!("surface resources released");
        }
        if self.state != SurfaceState::Failed {
            self.state = SurfaceState::Uninitialized;
        }
    }
}

impl<B: GraphicsBackend> Drop for GpuSurface<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn fetch_and_decode(
    source: &dyn ImageSource,
    uri: &str,
    limit: u32,
    cancel: &AtomicBool,
) -> Result<RgbaImage, TextureLoadError> {
    let cancelled = || TextureLoadError::Cancelled {
        uri: uri.to_string(),
    };

    if cancel.load(Ordering::Acquire) {
        return Err(cancelled());
    }
    let bytes = source.fetch(uri).map_err(|err| TextureLoadError::Fetch {
        uri: uri.to_string(),
        message: format!("{err:#}"),
    })?;
    if cancel.load(Ordering::Acquire) {
        return Err(cancelled());
    }
    let image = decode_image(uri, &bytes, limit)?;
    if cancel.load(Ordering::Acquire) {
        return Err(cancelled());
    }
    Ok(image)
}

/// Decodes to RGBA8, checking the header dimensions before the full decode.
pub fn decode_image(uri: &str, bytes: &[u8], limit: u32) -> Result<RgbaImage, TextureLoadError> {
    let decode_error = |message: String| TextureLoadError::Decode {
        uri: uri.to_string(),
        message,
    };

    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| decode_error(err.to_string()))?
        .into_dimensions()
        .map_err(|err| decode_error(err.to_string()))?;
    if width > limit || height > limit {
        return Err(TextureLoadError::TooLarge {
            uri: uri.to_string(),
            width,
            height,
            limit,
        });
    }

    let image = image::load_from_memory(bytes).map_err(|err| decode_error(err.to_string()))?;
    Ok(image.to_rgba8())
}
