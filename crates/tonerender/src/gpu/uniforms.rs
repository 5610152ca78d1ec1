use bytemuck::{Pod, Zeroable};
use filterconfig::FilterParameters;

/// std140 image of the `FilterParams` block: five floats padded to a
/// 16-byte multiple.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct FilterUniforms {
    pub saturation: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub hue: f32,
    pub exposure: f32,
    pub _padding: [f32; 3],
}

impl From<&FilterParameters> for FilterUniforms {
    fn from(params: &FilterParameters) -> Self {
        let [saturation, brightness, contrast, hue, exposure] = params.as_array();
        Self {
            saturation,
            brightness,
            contrast,
            hue,
            exposure,
            _padding: [0.0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use filterconfig::Field;

    use super::*;

    #[test]
    fn layout_matches_std140_block() {
        assert_eq!(std::mem::size_of::<FilterUniforms>(), 32);
        assert_eq!(std::mem::offset_of!(FilterUniforms, saturation), 0);
        assert_eq!(std::mem::offset_of!(FilterUniforms, exposure), 16);
    }

    #[test]
    fn fields_land_in_block_order() {
        let params = FilterParameters::new()
            .with(Field::Saturation, 0.5)
            .with(Field::Hue, 3.0)
            .with(Field::Exposure, -1.0);
        let uniforms = FilterUniforms::from(&params);
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&uniforms));
        assert_eq!(&floats[..5], &[0.5, 1.0, 1.0, 3.0, -1.0]);
        assert_eq!(&floats[5..], &[0.0; 3]);
    }
}
