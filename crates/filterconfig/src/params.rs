use std::f32::consts::TAU;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The five adjustment values fed to the color pipeline.
///
/// Producers (sliders, gestures, presets) are expected to stay inside the
/// ranges published in [`DESCRIPTORS`]; the engine still calls
/// [`FilterParameters::clamped`] at its boundary and never rejects a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParameters {
    /// 0 = grayscale, 1 = unchanged, >1 = boosted.
    pub saturation: f32,
    /// Multiplicative scale on linear color.
    pub brightness: f32,
    /// Multiplicative scale around mid-gray.
    pub contrast: f32,
    /// Hue rotation in radians.
    pub hue: f32,
    /// Exposure in stops.
    pub exposure: f32,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            saturation: Field::Saturation.descriptor().default,
            brightness: Field::Brightness.descriptor().default,
            contrast: Field::Contrast.descriptor().default,
            hue: Field::Hue.descriptor().default,
            exposure: Field::Exposure.descriptor().default,
        }
    }
}

impl FilterParameters {
    /// Identity parameters; rendering with these reproduces the source.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> f32 {
        match field {
            Field::Saturation => self.saturation,
            Field::Brightness => self.brightness,
            Field::Contrast => self.contrast,
            Field::Hue => self.hue,
            Field::Exposure => self.exposure,
        }
    }

    pub fn set(&mut self, field: Field, value: f32) {
        let slot = match field {
            Field::Saturation => &mut self.saturation,
            Field::Brightness => &mut self.brightness,
            Field::Contrast => &mut self.contrast,
            Field::Hue => &mut self.hue,
            Field::Exposure => &mut self.exposure,
        };
        *slot = value;
    }

    /// Builder-style setter, mostly useful in tests and presets.
    pub fn with(mut self, field: Field, value: f32) -> Self {
        self.set(field, value);
        self
    }

    /// Returns a copy with every field forced into its declared range.
    ///
    /// A NaN field is replaced by that field's default.
    pub fn clamped(&self) -> Self {
        let mut out = *self;
        for field in Field::ALL {
            out.set(field, field.descriptor().clamp(self.get(field)));
        }
        out
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Fields in the fixed order they are applied by the pipeline.
    pub fn as_array(&self) -> [f32; 5] {
        [
            self.saturation,
            self.brightness,
            self.contrast,
            self.hue,
            self.exposure,
        ]
    }
}

/// Names one of the five adjustable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Saturation,
    Brightness,
    Contrast,
    Hue,
    Exposure,
}

impl Field {
    /// Pipeline order.
    pub const ALL: [Field; 5] = [
        Field::Saturation,
        Field::Brightness,
        Field::Contrast,
        Field::Hue,
        Field::Exposure,
    ];

    pub fn descriptor(self) -> &'static ParameterDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Saturation => "saturation",
            Field::Brightness => "brightness",
            Field::Contrast => "contrast",
            Field::Hue => "hue",
            Field::Exposure => "exposure",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Slider-facing description of one parameter: range, default, step and
/// the copy shown next to the control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterDescriptor {
    pub field: Field,
    pub label: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub step: f32,
    pub description: &'static str,
}

impl ParameterDescriptor {
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Indexed by `Field as usize`.
pub static DESCRIPTORS: [ParameterDescriptor; 5] = [
    ParameterDescriptor {
        field: Field::Saturation,
        label: "Saturation",
        min: 0.0,
        max: 2.0,
        default: 1.0,
        step: 0.01,
        description: "Adjusts the intensity of all colors.",
    },
    ParameterDescriptor {
        field: Field::Brightness,
        label: "Brightness",
        min: 0.0,
        max: 5.0,
        default: 1.0,
        step: 0.01,
        description: "Scales every channel uniformly.",
    },
    ParameterDescriptor {
        field: Field::Contrast,
        label: "Contrast",
        min: -10.0,
        max: 10.0,
        default: 1.0,
        step: 0.01,
        description: "Adjusts the difference between light and dark areas.",
    },
    ParameterDescriptor {
        field: Field::Hue,
        label: "Hue",
        min: 0.0,
        max: TAU,
        default: 0.0,
        step: 0.01,
        description: "Rotates every hue around the color wheel.",
    },
    ParameterDescriptor {
        field: Field::Exposure,
        label: "Exposure",
        min: -2.0,
        max: 2.0,
        default: 0.0,
        step: 0.01,
        description: "Adjusts the overall brightness in photographic stops.",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_indexed_by_field() {
        for field in Field::ALL {
            assert_eq!(field.descriptor().field, field);
        }
    }

    #[test]
    fn defaults_lie_inside_their_ranges() {
        for descriptor in &DESCRIPTORS {
            assert!(descriptor.contains(descriptor.default), "{}", descriptor.label);
        }
        assert!(FilterParameters::default().is_identity());
    }

    #[test]
    fn clamps_out_of_range_values() {
        let params = FilterParameters {
            saturation: -1.0,
            brightness: 9.0,
            contrast: -40.0,
            hue: 7.5,
            exposure: 3.0,
        }
        .clamped();

        assert_eq!(params.saturation, 0.0);
        assert_eq!(params.brightness, 5.0);
        assert_eq!(params.contrast, -10.0);
        assert_eq!(params.hue, TAU);
        assert_eq!(params.exposure, 2.0);
    }

    #[test]
    fn nan_falls_back_to_default() {
        let params = FilterParameters::new()
            .with(Field::Exposure, f32::NAN)
            .with(Field::Saturation, f32::NAN)
            .clamped();
        assert_eq!(params, FilterParameters::default());
    }

    #[test]
    fn in_range_values_pass_through() {
        let params = FilterParameters::new()
            .with(Field::Contrast, -3.25)
            .with(Field::Hue, 1.0);
        assert_eq!(params.clamped(), params);
    }
}
