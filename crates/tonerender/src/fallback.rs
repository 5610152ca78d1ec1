//! Degraded preview shown whenever the GPU surface cannot draw: the plain
//! image with its opacity tied to brightness.

use filterconfig::FilterParameters;
use image::RgbaImage;

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackFrame {
    pub uri: String,
    /// `clamp(brightness, 0, 1)`.
    pub opacity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct FallbackRenderer {
    source: Option<String>,
    params: FilterParameters,
}

impl FallbackRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&mut self, uri: Option<String>) {
        self.source = uri;
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn set_parameters(&mut self, params: FilterParameters) {
        self.params = params.clamped();
    }

    pub fn opacity(&self) -> f32 {
        self.params.brightness.clamp(0.0, 1.0)
    }

    /// `None` without a source; nothing is shown rather than a blank frame.
    pub fn frame(&self) -> Option<FallbackFrame> {
        self.source.as_ref().map(|uri| FallbackFrame {
            uri: uri.clone(),
            opacity: self.opacity(),
        })
    }

    /// Scales alpha by the current opacity; color channels pass through.
    pub fn compose(&self, image: &RgbaImage) -> RgbaImage {
        let opacity = self.opacity();
        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            pixel[3] = (f32::from(pixel[3]) * opacity).round() as u8;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use filterconfig::Field;
    use image::Rgba;

    use super::*;

    #[test]
    fn no_source_means_no_frame() {
        let renderer = FallbackRenderer::new();
        assert_eq!(renderer.frame(), None);
    }

    #[test]
    fn opacity_follows_brightness() {
        let mut renderer = FallbackRenderer::new();
        renderer.set_source(Some("file:///a.png".into()));

        renderer.set_parameters(FilterParameters::new().with(Field::Brightness, 0.25));
        assert_eq!(renderer.frame().unwrap().opacity, 0.25);

        renderer.set_parameters(FilterParameters::new().with(Field::Brightness, 3.0));
        assert_eq!(renderer.frame().unwrap().opacity, 1.0);

        renderer.set_parameters(FilterParameters::new().with(Field::Brightness, -1.0));
        assert_eq!(renderer.frame().unwrap().opacity, 0.0);
    }

    #[test]
    fn compose_scales_alpha_only() {
        let mut renderer = FallbackRenderer::new();
        renderer.set_parameters(FilterParameters::new().with(Field::Brightness, 0.5));
        let image = RgbaImage::from_pixel(2, 1, Rgba([10, 200, 30, 200]));

        let composed = renderer.compose(&image);
        assert_eq!(composed.get_pixel(1, 0).0, [10, 200, 30, 100]);
    }
}
