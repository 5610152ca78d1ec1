//! Software reference backend.
//!
//! Runs [`crate::color::process_image`] over the bound texture instead of a
//! fragment shader. Shader sources are still parsed and validated with naga
//! so a broken program fails here exactly as it would on a device.

use filterconfig::TextureFilter;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::{debug, trace};

use crate::backend::{DrawCall, GeometryId, GraphicsBackend, ProgramId, ResourceTable, TextureId};
use crate::color;
use crate::error::BackendError;
use crate::shaders::{self, ProgramSource, QuadVertex};

#[derive(Debug)]
pub struct CpuBackend {
    programs: ResourceTable<ProgramId, ()>,
    geometries: ResourceTable<GeometryId, usize>,
    textures: ResourceTable<TextureId, RgbaImage>,
    target: Option<(u32, u32)>,
    filter: TextureFilter,
    max_texture_size: u32,
    drawn: Option<RgbaImage>,
    presented: Option<RgbaImage>,
    frames: u64,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    /// Frames are produced at the resolution of the bound texture until
    /// [`GraphicsBackend::resize`] sets a target size.
    pub fn new() -> Self {
        Self {
            programs: ResourceTable::default(),
            geometries: ResourceTable::default(),
            textures: ResourceTable::default(),
            target: None,
            filter: TextureFilter::Linear,
            max_texture_size: u32::MAX,
            drawn: None,
            presented: None,
            frames: 0,
        }
    }

    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_max_texture_size(mut self, limit: u32) -> Self {
        self.max_texture_size = limit;
        self
    }

    /// Last presented frame.
    pub fn frame(&self) -> Option<&RgbaImage> {
        self.presented.as_ref()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Programs, geometries and textures currently alive.
    pub fn live_resources(&self) -> usize {
        self.programs.len() + self.geometries.len() + self.textures.len()
    }

    fn check_size(&self, image: &RgbaImage) -> Result<(), BackendError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BackendError::Texture("texture has no pixels".into()));
        }
        if width > self.max_texture_size || height > self.max_texture_size {
            return Err(BackendError::Texture(format!(
                "{width}x{height} exceeds the {}px texture limit",
                self.max_texture_size
            )));
        }
        Ok(())
    }

    fn sample(&self, texture: &RgbaImage) -> RgbaImage {
        match self.target {
            Some((width, height)) if (width, height) != texture.dimensions() => {
                let filter = match self.filter {
                    TextureFilter::Linear => FilterType::Triangle,
                    TextureFilter::Nearest => FilterType::Nearest,
                };
                imageops::resize(texture, width, height, filter)
            }
            _ => texture.clone(),
        }
    }
}

impl GraphicsBackend for CpuBackend {
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, BackendError> {
        shaders::validate_program(source)?;
        let id = self.programs.insert(());
        debug!(program = id.raw(), "validated shader program");
        Ok(id)
    }

    fn create_geometry(&mut self, vertices: &[QuadVertex]) -> Result<GeometryId, BackendError> {
        if vertices.len() < 3 || vertices.len() % 3 != 0 {
            return Err(BackendError::Device(format!(
                "geometry needs whole triangles, got {} vertices",
                vertices.len()
            )));
        }
        Ok(self.geometries.insert(vertices.len()))
    }

    fn create_texture(&mut self, image: &RgbaImage) -> Result<TextureId, BackendError> {
        self.check_size(image)?;
        Ok(self.textures.insert(image.clone()))
    }

    fn replace_texture(
        &mut self,
        texture: TextureId,
        image: &RgbaImage,
    ) -> Result<(), BackendError> {
        self.check_size(image)?;
        *self.textures.get_mut(texture)? = image.clone();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.target = Some((width, height));
    }

    fn draw(&mut self, call: &DrawCall) -> Result<(), BackendError> {
        self.programs.get(call.program)?;
        self.geometries.get(call.geometry)?;
        let texture = self.textures.get(call.texture)?;

        let sampled = self.sample(texture);
        let frame = color::process_image(&sampled, &call.params);
        trace!(width = frame.width(), height = frame.height(), "drew frame");
        self.drawn = Some(frame);
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        let frame = self
            .drawn
            .take()
            .ok_or_else(|| BackendError::Surface("present without a drawn frame".into()))?;
        self.presented = Some(frame);
        self.frames += 1;
        Ok(())
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(program);
    }

    fn release_geometry(&mut self, geometry: GeometryId) {
        self.geometries.remove(geometry);
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.textures.remove(texture);
    }
}

#[cfg(test)]
mod tests {
    use filterconfig::{Field, FilterParameters};
    use image::Rgba;

    use super::*;
    use crate::shaders::FULLSCREEN_QUAD;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 37 % 256) as u8, (y * 53 % 256) as u8, ((x + y) * 11 % 256) as u8, 200])
        })
    }

    fn setup(backend: &mut CpuBackend, image: &RgbaImage) -> (ProgramId, GeometryId, TextureId) {
        let program = backend.compile_program(&ProgramSource::color_adjust()).unwrap();
        let geometry = backend.create_geometry(&FULLSCREEN_QUAD).unwrap();
        let texture = backend.create_texture(image).unwrap();
        (program, geometry, texture)
    }

    #[test]
    fn draw_matches_process_image() {
        let mut backend = CpuBackend::new();
        let image = gradient(9, 7);
        let (program, geometry, texture) = setup(&mut backend, &image);
        let params = FilterParameters::new()
            .with(Field::Saturation, 1.4)
            .with(Field::Hue, 2.0)
            .with(Field::Exposure, -0.5);

        backend
            .draw(&DrawCall {
                program,
                geometry,
                texture,
                params,
            })
            .unwrap();
        assert!(backend.frame().is_none(), "not visible before present");
        backend.present().unwrap();

        assert_eq!(backend.frame(), Some(&color::process_image(&image, &params)));
        assert_eq!(backend.frames_presented(), 1);
    }

    #[test]
    fn resize_scales_the_sampled_texture() {
        let mut backend = CpuBackend::new().with_filter(TextureFilter::Nearest);
        let image = RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255]));
        let (program, geometry, texture) = setup(&mut backend, &image);
        backend.resize(6, 4);
        backend
            .draw(&DrawCall {
                program,
                geometry,
                texture,
                params: FilterParameters::default(),
            })
            .unwrap();
        backend.present().unwrap();

        let frame = backend.frame().unwrap();
        assert_eq!(frame.dimensions(), (6, 4));
        assert_eq!(frame.get_pixel(5, 3).0, [10, 20, 30, 255]);
    }

    #[test]
    fn rejects_invalid_program() {
        let mut backend = CpuBackend::new();
        let source = ProgramSource::new(crate::shaders::VERTEX_SHADER, "not glsl");
        let err = backend.compile_program(&source).unwrap_err();
        assert!(matches!(err, BackendError::Shader(_)));
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn enforces_texture_limit() {
        let mut backend = CpuBackend::new().with_max_texture_size(4);
        let err = backend.create_texture(&gradient(5, 2)).unwrap_err();
        assert!(matches!(err, BackendError::Texture(_)));
    }

    #[test]
    fn released_handles_are_unknown() {
        let mut backend = CpuBackend::new();
        let image = gradient(2, 2);
        let (program, geometry, texture) = setup(&mut backend, &image);
        assert_eq!(backend.live_resources(), 3);

        backend.release_texture(texture);
        let err = backend
            .draw(&DrawCall {
                program,
                geometry,
                texture,
                params: FilterParameters::default(),
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::UnknownHandle { kind: "texture", .. }));

        backend.release_geometry(geometry);
        backend.release_program(program);
        assert_eq!(backend.live_resources(), 0);
    }

    #[test]
    fn present_requires_a_draw() {
        let mut backend = CpuBackend::new();
        assert!(backend.present().is_err());
    }
}
