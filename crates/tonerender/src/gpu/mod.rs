//! wgpu implementation of [`GraphicsBackend`].
//!
//! - `context` owns the instance, device, queue and the render target
//!   (a window surface or an offscreen texture) and rebuilds it on resize.
//! - `pipeline` turns a [`ProgramSource`] into a render pipeline, reporting
//!   device-side failures through error scopes.
//! - `texture` holds the sampled source image and its bind group.
//! - `uniforms` is the byte image of the fragment stage's parameter block.

mod context;
mod pipeline;
mod texture;
mod uniforms;

use std::sync::Arc;

use filterconfig::{EngineSettings, TextureFilter};
use image::RgbaImage;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use crate::backend::{DrawCall, GeometryId, GraphicsBackend, ProgramId, ResourceTable, TextureId};
use crate::error::BackendError;
use crate::shaders::{ProgramSource, QuadVertex};

use context::{GpuContext, RenderTarget};
use pipeline::PipelineLayouts;
use texture::SourceTexture;
use uniforms::FilterUniforms;

struct Geometry {
    buffer: wgpu::Buffer,
    vertex_count: u32,
}

pub struct WgpuBackend {
    context: GpuContext,
    layouts: PipelineLayouts,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    programs: ResourceTable<ProgramId, wgpu::RenderPipeline>,
    geometries: ResourceTable<GeometryId, Geometry>,
    textures: ResourceTable<TextureId, SourceTexture>,
    pending_frame: Option<wgpu::SurfaceTexture>,
}

impl WgpuBackend {
    /// Renders into an offscreen texture that can be read back with
    /// [`read_frame`](Self::read_frame).
    pub fn headless(
        width: u32,
        height: u32,
        settings: &EngineSettings,
    ) -> Result<Self, BackendError> {
        let context = GpuContext::headless(width, height, settings)?;
        Ok(Self::from_context(context, settings.filter))
    }

    /// Renders into a window. The surface keeps `window` alive.
    pub fn for_window<W>(
        window: Arc<W>,
        width: u32,
        height: u32,
        settings: &EngineSettings,
    ) -> Result<Self, BackendError>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let context = GpuContext::for_window(window, width, height, settings)?;
        Ok(Self::from_context(context, settings.filter))
    }

    fn from_context(context: GpuContext, filter: TextureFilter) -> Self {
        let device = &context.device;
        let layouts = PipelineLayouts::new(device);
        let sampler = texture::create_sampler(device, filter);
        let initial = FilterUniforms::from(&filterconfig::FilterParameters::default());
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("filter uniforms"),
            contents: bytemuck::bytes_of(&initial),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter uniform bind group"),
            layout: &layouts.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        Self {
            context,
            layouts,
            sampler,
            uniform_buffer,
            uniform_bind_group,
            programs: ResourceTable::default(),
            geometries: ResourceTable::default(),
            textures: ResourceTable::default(),
            pending_frame: None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.context.size()
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.context.format
    }

    /// Copies the last offscreen frame back to the CPU. Window targets are
    /// not readable.
    pub fn read_frame(&self) -> Result<RgbaImage, BackendError> {
        let RenderTarget::Offscreen {
            texture,
            width,
            height,
        } = &self.context.target
        else {
            return Err(BackendError::Surface("window targets cannot be read back".into()));
        };
        let (width, height) = (*width, *height);
        let device = &self.context.device;

        let bytes_per_row = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = bytes_per_row.div_ceil(align) * align;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            texture::extent(width, height),
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| BackendError::Device(format!("waiting for readback: {err}")))?;
        receiver
            .recv()
            .map_err(|_| BackendError::Device("readback callback dropped".into()))?
            .map_err(|err| BackendError::Device(format!("mapping readback buffer: {err}")))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((bytes_per_row * height) as usize);
        for row in data.chunks(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..bytes_per_row as usize]);
        }
        drop(data);
        buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| BackendError::Device("readback returned a short buffer".into()))
    }

    fn check_texture_size(&self, image: &RgbaImage) -> Result<(), BackendError> {
        let (width, height) = image.dimensions();
        let limit = self.context.max_texture_dimension;
        if width == 0 || height == 0 {
            return Err(BackendError::Texture("texture has no pixels".into()));
        }
        if width > limit || height > limit {
            return Err(BackendError::Texture(format!(
                "{width}x{height} exceeds the device limit of {limit}px"
            )));
        }
        Ok(())
    }
}

impl GraphicsBackend for WgpuBackend {
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, BackendError> {
        let pipeline = pipeline::build_pipeline(
            &self.context.device,
            &self.layouts,
            self.context.format,
            source,
        )?;
        let id = self.programs.insert(pipeline);
        debug!(program = id.raw(), format = ?self.context.format, "compiled render pipeline");
        Ok(id)
    }

    fn create_geometry(&mut self, vertices: &[QuadVertex]) -> Result<GeometryId, BackendError> {
        let vertex_count = u32::try_from(vertices.len())
            .map_err(|_| BackendError::Device("too many vertices".into()))?;
        let buffer = self
            .context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad vertices"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        Ok(self.geometries.insert(Geometry {
            buffer,
            vertex_count,
        }))
    }

    fn create_texture(&mut self, image: &RgbaImage) -> Result<TextureId, BackendError> {
        self.check_texture_size(image)?;
        let texture = SourceTexture::new(
            &self.context.device,
            &self.context.queue,
            &self.layouts.texture_layout,
            &self.sampler,
            image,
        );
        Ok(self.textures.insert(texture))
    }

    fn replace_texture(
        &mut self,
        texture: TextureId,
        image: &RgbaImage,
    ) -> Result<(), BackendError> {
        self.check_texture_size(image)?;
        let slot = self.textures.get_mut(texture)?;
        if slot.matches(image) {
            slot.write(&self.context.queue, image);
            return Ok(());
        }
        let replacement = SourceTexture::new(
            &self.context.device,
            &self.context.queue,
            &self.layouts.texture_layout,
            &self.sampler,
            image,
        );
        let previous = std::mem::replace(slot, replacement);
        previous.texture.destroy();
        trace!(width = image.width(), height = image.height(), "reallocated source texture");
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), BackendError> {
        let pipeline = self.programs.get(call.program)?;
        let geometry = self.geometries.get(call.geometry)?;
        let texture = self.textures.get(call.texture)?;

        let uniforms = FilterUniforms::from(&call.params);
        self.context
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let frame = self.context.acquire()?;
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("color adjust encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("color adjust pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            pass.set_bind_group(1, &texture.bind_group, &[]);
            pass.set_vertex_buffer(0, geometry.buffer.slice(..));
            pass.draw(0..geometry.vertex_count, 0..1);
        }
        self.context.queue.submit(Some(encoder.finish()));
        self.pending_frame = frame.surface_texture;
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        if let Some(frame) = self.pending_frame.take() {
            frame.present();
        }
        Ok(())
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
    }

    fn release_geometry(&mut self, geometry: GeometryId) {
        if let Some(geometry) = self.geometries.remove(geometry) {
            geometry.buffer.destroy();
        }
    }

    fn release_texture(&mut self, texture: TextureId) {
        if let Some(texture) = self.textures.remove(texture) {
            texture.texture.destroy();
        }
    }
}
