//! Real-time color adjustment for a single image.
//!
//! A source image and five [`FilterParameters`] go in; a corrected frame
//! comes out every time a parameter changes. The flow is:
//!
//! ```text
//!   UI thread                        render thread
//!   ─────────                        ─────────────
//!   Orchestrator::parameters_changed ──▶ OrchestratorCore ──▶ GpuSurface::set_parameters
//!   Orchestrator::image_changed      ──▶      │               GpuSurface::render
//!                                             │                      │
//!                                             │                      ▼
//!                                             │               GraphicsBackend
//!                                             ▼
//!                                    GpuSurface::load_image ──▶ load worker (fetch + decode)
//!                                             ▲                        │
//!                                             └──── LoadOutcome ◀──────┘
//! ```
//!
//! [`GpuSurface`] drives any [`GraphicsBackend`]: [`WgpuBackend`] renders
//! the GLSL program in [`shaders`] on a device, [`CpuBackend`] runs the
//! same math from [`color`] in software. Until a texture is ready, the
//! [`FallbackRenderer`] describes what to show instead.

pub mod backend;
pub mod color;
pub mod cpu;
mod error;
pub mod fallback;
pub mod gpu;
pub mod orchestrator;
pub mod shaders;
pub mod source;
pub mod surface;

pub use backend::{DrawCall, GeometryId, GraphicsBackend, ProgramId, TextureId};
pub use cpu::CpuBackend;
pub use error::{BackendError, ShaderError, TextureLoadError};
pub use fallback::{FallbackFrame, FallbackRenderer};
pub use filterconfig::{EngineConfig, EngineSettings, Field, FilterParameters, Presets};
pub use gpu::WgpuBackend;
pub use orchestrator::{Orchestrator, OrchestratorCore, Presentation, Snapshot};
pub use shaders::{ProgramSource, ShaderStage};
pub use source::{FileSource, HttpSource, ImageSource, MemorySource, SchemeRouter};
pub use surface::{GpuSurface, LoadOutcome, SurfaceOptions, SurfaceState};
