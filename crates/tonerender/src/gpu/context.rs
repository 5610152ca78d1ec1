use std::sync::Arc;

use filterconfig::{EngineSettings, PowerPreference};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};

use crate::error::BackendError;

/// Offscreen frames use a plain unorm format so readback matches the CPU
/// reference byte for byte.
pub(crate) const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub(crate) enum RenderTarget {
    Window {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        texture: wgpu::Texture,
        width: u32,
        height: u32,
    },
}

/// Texture a frame is drawn into. Window frames also carry the swapchain
/// image that must be presented.
pub(crate) struct Frame {
    pub view: wgpu::TextureView,
    pub surface_texture: Option<wgpu::SurfaceTexture>,
}

pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub target: RenderTarget,
    pub format: wgpu::TextureFormat,
    pub max_texture_dimension: u32,
}

impl GpuContext {
    pub(crate) fn headless(
        width: u32,
        height: u32,
        settings: &EngineSettings,
    ) -> Result<Self, BackendError> {
        let instance = create_instance();
        let adapter = request_adapter(&instance, None, settings.power)?;
        let (device, queue, max_texture_dimension) = request_device(&adapter)?;
        let (width, height) = checked_size(width, height, max_texture_dimension)?;
        let texture = create_offscreen_texture(&device, width, height);

        Ok(Self {
            _instance: instance,
            device,
            queue,
            target: RenderTarget::Offscreen {
                texture,
                width,
                height,
            },
            format: OFFSCREEN_FORMAT,
            max_texture_dimension,
        })
    }

    pub(crate) fn for_window<W>(
        window: Arc<W>,
        width: u32,
        height: u32,
        settings: &EngineSettings,
    ) -> Result<Self, BackendError>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = create_instance();
        let surface = instance.create_surface(window).map_err(|err| {
            BackendError::Surface(format!("failed to create rendering surface: {err}"))
        })?;
        let adapter = request_adapter(&instance, Some(&surface), settings.power)?;
        let (device, queue, max_texture_dimension) = request_device(&adapter)?;
        let (width, height) = checked_size(width, height, max_texture_dimension)?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| BackendError::Surface("surface reports no supported formats".into()))?;
        if format.is_srgb() {
            warn!(
                ?format,
                "no linear (non-sRGB) surface format available; colors will be re-encoded"
            );
        }

        let present_mode = caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .or_else(|| caps.present_modes.first().copied())
            .unwrap_or(wgpu::PresentMode::Fifo);
        debug!(?format, ?present_mode, "configuring window surface");

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            device,
            queue,
            target: RenderTarget::Window { surface, config },
            format,
            max_texture_dimension,
        })
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        match &self.target {
            RenderTarget::Window { config, .. } => (config.width, config.height),
            RenderTarget::Offscreen { width, height, .. } => (*width, *height),
        }
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let width = width.min(self.max_texture_dimension);
        let height = height.min(self.max_texture_dimension);
        match &mut self.target {
            RenderTarget::Window { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            RenderTarget::Offscreen {
                texture,
                width: current_width,
                height: current_height,
            } => {
                if (*current_width, *current_height) == (width, height) {
                    return;
                }
                texture.destroy();
                *texture = create_offscreen_texture(&self.device, width, height);
                *current_width = width;
                *current_height = height;
            }
        }
        debug!(width, height, "render target resized");
    }

    pub(crate) fn acquire(&mut self) -> Result<Frame, BackendError> {
        match &self.target {
            RenderTarget::Window { surface, config } => {
                let surface_texture = match surface.get_current_texture() {
                    Ok(texture) => texture,
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        surface.configure(&self.device, config);
                        return Err(BackendError::Surface(
                            "surface lost or outdated; reconfigured".into(),
                        ));
                    }
                    Err(err) => return Err(BackendError::Surface(err.to_string())),
                };
                let view = surface_texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(Frame {
                    view,
                    surface_texture: Some(surface_texture),
                })
            }
            RenderTarget::Offscreen { texture, .. } => Ok(Frame {
                view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
                surface_texture: None,
            }),
        }
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn request_adapter(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
    power: PowerPreference,
) -> Result<wgpu::Adapter, BackendError> {
    let power_preference = match power {
        PowerPreference::Low => wgpu::PowerPreference::LowPower,
        PowerPreference::High => wgpu::PowerPreference::HighPerformance,
    };
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference,
        compatible_surface: surface,
        force_fallback_adapter: false,
    }))
    .map_err(|err| BackendError::Device(format!("failed to find a suitable GPU adapter: {err}")))?;

    let info = adapter.get_info();
    debug!(
        name = %info.name,
        backend = ?info.backend,
        device_type = ?info.device_type,
        "selected GPU adapter"
    );
    Ok(adapter)
}

fn request_device(
    adapter: &wgpu::Adapter,
) -> Result<(wgpu::Device, wgpu::Queue, u32), BackendError> {
    let limits = adapter.limits();
    let max_texture_dimension = limits.max_texture_dimension_2d;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("tonerender device"),
        required_features: wgpu::Features::empty(),
        required_limits: limits,
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .map_err(|err| BackendError::Device(format!("failed to create GPU device: {err}")))?;
    Ok((device, queue, max_texture_dimension))
}

fn checked_size(width: u32, height: u32, max_dimension: u32) -> Result<(u32, u32), BackendError> {
    let width = width.max(1);
    let height = height.max(1);
    if width > max_dimension || height > max_dimension {
        return Err(BackendError::Surface(format!(
            "GPU max texture dimension is {max_dimension}, requested target is {width}x{height}"
        )));
    }
    Ok((width, height))
}

fn create_offscreen_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("tonerender offscreen target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}
