//! Reference color math.
//!
//! Every function here mirrors a function in the fragment shader
//! (`shaders::FRAGMENT_SHADER`) line for line, in `f32`, so the CPU backend
//! and the GPU backend agree to within texture quantisation.

use std::f32::consts::TAU;

use filterconfig::FilterParameters;
use image::RgbaImage;

/// Linear RGB triple; channels are nominally in `[0, 1]` but intermediate
/// stages may leave that range.
pub type Rgb = [f32; 3];

/// Hue (in turns, `[0, 1)`), saturation, lightness.
pub type Hsl = [f32; 3];

/// Rec. 601 luma weights.
pub const LUMA_WEIGHTS: Rgb = [0.299, 0.587, 0.114];

/// GLSL `fract`: `x - floor(x)`, always non-negative.
#[inline]
pub fn fract(x: f32) -> f32 {
    x - x.floor()
}

#[inline]
pub fn luminance(c: Rgb) -> f32 {
    c[0] * LUMA_WEIGHTS[0] + c[1] * LUMA_WEIGHTS[1] + c[2] * LUMA_WEIGHTS[2]
}

/// Divisor of the HSL saturation term. Zero for chromatic colors whose
/// lightness is exactly 0 or 1, which only happens outside `[0, 1]`.
#[inline]
fn saturation_denominator(max: f32, min: f32) -> f32 {
    if (max + min) / 2.0 > 0.5 {
        2.0 - max - min
    } else {
        max + min
    }
}

/// Chromatic colors with no finite HSL saturation; see [`rgb_to_hsl`].
pub fn is_hsl_singular(c: Rgb) -> bool {
    let [r, g, b] = c;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    max != min && saturation_denominator(max, min) == 0.0
}

/// Achromatic input (`max == min`) reports hue 0 and saturation 0.
///
/// Out-of-range input round-trips through [`hsl_to_rgb`] as long as the
/// saturation denominator is non-zero; callers check [`is_hsl_singular`]
/// first, otherwise the saturation is infinite.
pub fn rgb_to_hsl(c: Rgb) -> Hsl {
    let [r, g, b] = c;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if max == min {
        return [0.0, 0.0, l];
    }

    let d = max - min;
    let s = d / saturation_denominator(max, min);
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    [h / 6.0, s, l]
}

pub fn hue_to_rgb(p: f32, q: f32, t: f32) -> f32 {
    let mut t = t;
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

pub fn hsl_to_rgb(hsl: Hsl) -> Rgb {
    let [h, s, l] = hsl;
    if s == 0.0 {
        return [l, l, l];
    }
    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;
    [
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    ]
}

pub fn apply_saturation(c: Rgb, saturation: f32) -> Rgb {
    let gray = luminance(c);
    c.map(|channel| gray + (channel - gray) * saturation)
}

pub fn apply_brightness(c: Rgb, brightness: f32) -> Rgb {
    c.map(|channel| channel * brightness)
}

pub fn apply_contrast(c: Rgb, contrast: f32) -> Rgb {
    c.map(|channel| (channel - 0.5) * contrast + 0.5)
}

/// Rotates the hue by `shift` radians.
///
/// Whole turns leave the color untouched, as do colors on the HSL
/// singularity (brightness or contrast can push lightness to exactly 0 or 1
/// while the channels still differ).
pub fn apply_hue(c: Rgb, shift: f32) -> Rgb {
    let turns = fract(shift / TAU);
    if turns == 0.0 || is_hsl_singular(c) {
        return c;
    }
    let [h, s, l] = rgb_to_hsl(c);
    hsl_to_rgb([fract(h + turns), s, l])
}

/// Scales by `2^exposure`.
pub fn apply_exposure(c: Rgb, exposure: f32) -> Rgb {
    let scale = exposure.exp2();
    c.map(|channel| channel * scale)
}

/// Final clamp into `[0, 1]`; NaN maps to 0.
#[inline]
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// All five operators up to, but not including, the final clamp.
pub fn apply_unclamped(c: Rgb, params: &FilterParameters) -> Rgb {
    let c = apply_saturation(c, params.saturation);
    let c = apply_brightness(c, params.brightness);
    let c = apply_contrast(c, params.contrast);
    let c = apply_hue(c, params.hue);
    apply_exposure(c, params.exposure)
}

/// saturation → brightness → contrast → hue → exposure → clamp.
///
/// The operators do not commute; the order is part of the contract.
pub fn apply_pipeline(c: Rgb, params: &FilterParameters) -> Rgb {
    apply_unclamped(c, params).map(clamp_unit)
}

#[inline]
pub fn unorm8_to_f32(v: u8) -> f32 {
    f32::from(v) / 255.0
}

#[inline]
pub fn f32_to_unorm8(v: f32) -> u8 {
    (clamp_unit(v) * 255.0).round() as u8
}

/// Runs the pipeline over every pixel; alpha passes through untouched.
pub fn process_image(source: &RgbaImage, params: &FilterParameters) -> RgbaImage {
    let params = params.clamped();
    let mut output = source.clone();
    for pixel in output.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let rgb = apply_pipeline(
            [unorm8_to_f32(r), unorm8_to_f32(g), unorm8_to_f32(b)],
            &params,
        );
        pixel.0 = [
            f32_to_unorm8(rgb[0]),
            f32_to_unorm8(rgb[1]),
            f32_to_unorm8(rgb[2]),
            a,
        ];
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use filterconfig::Field;

    const EPSILON: f32 = 1e-4;
    const SAMPLE: Rgb = [0.8, 0.4, 0.2];

    fn assert_close(actual: Rgb, expected: Rgb) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!(
                (a - e).abs() <= EPSILON,
                "expected {expected:?}, got {actual:?}"
            );
        }
    }

    fn sample_colors() -> Vec<Rgb> {
        let steps = [0.0, 0.1, 0.25, 0.5, 0.66, 0.9, 1.0];
        let mut colors = Vec::new();
        for &r in &steps {
            for &g in &steps {
                for &b in &steps {
                    colors.push([r, g, b]);
                }
            }
        }
        colors
    }

    #[test]
    fn default_parameters_are_identity() {
        let params = FilterParameters::default();
        for color in sample_colors() {
            assert_close(apply_pipeline(color, &params), color);
        }
    }

    #[test]
    fn hsl_round_trip_for_chromatic_colors() {
        for color in sample_colors() {
            let max = color[0].max(color[1]).max(color[2]);
            let min = color[0].min(color[1]).min(color[2]);
            if max == min {
                continue;
            }
            assert_close(hsl_to_rgb(rgb_to_hsl(color)), color);
        }
    }

    #[test]
    fn achromatic_colors_keep_their_gray() {
        for gray in [0.0, 0.2, 0.5, 0.75, 1.0] {
            let hsl = rgb_to_hsl([gray, gray, gray]);
            assert_eq!(hsl, [0.0, 0.0, gray]);
            assert_eq!(hsl_to_rgb(hsl), [gray, gray, gray]);
            // The hue is meaningless for a gray; any value reproduces it.
            assert_eq!(hsl_to_rgb([0.37, 0.0, gray]), [gray, gray, gray]);
        }
    }

    #[test]
    fn primary_hues() {
        assert_close(rgb_to_hsl([1.0, 0.0, 0.0]), [0.0, 1.0, 0.5]);
        assert_close(rgb_to_hsl([0.0, 1.0, 0.0]), [1.0 / 3.0, 1.0, 0.5]);
        assert_close(rgb_to_hsl([0.0, 0.0, 1.0]), [2.0 / 3.0, 1.0, 0.5]);
        // Magenta wraps through the `g < b` branch.
        assert_close(rgb_to_hsl([1.0, 0.0, 1.0]), [5.0 / 6.0, 1.0, 0.5]);
    }

    #[test]
    fn zero_saturation_collapses_to_luminance() {
        for color in sample_colors() {
            let gray = 0.299 * color[0] + 0.587 * color[1] + 0.114 * color[2];
            assert_close(apply_saturation(color, 0.0), [gray, gray, gray]);
        }
    }

    #[test]
    fn saturation_boost_scenario() {
        let gray: f32 = 0.299 * 0.8 + 0.587 * 0.4 + 0.114 * 0.2;
        assert!((gray - 0.4968).abs() < EPSILON);
        let boosted = apply_saturation(SAMPLE, 1.5);
        assert_close(boosted, [0.9516, 0.3516, 0.0516]);
    }

    #[test]
    fn exposure_halving_scenario() {
        assert_close(apply_exposure(SAMPLE, -1.0), [0.4, 0.2, 0.1]);
    }

    #[test]
    fn exposure_is_monotonic() {
        let exposures = [-2.0, -1.5, -0.25, 0.0, 0.3, 1.0, 2.0];
        for color in sample_colors() {
            for pair in exposures.windows(2) {
                let low = apply_exposure(color, pair[0]);
                let high = apply_exposure(color, pair[1]);
                for channel in 0..3 {
                    assert!(low[channel] <= high[channel]);
                }
            }
        }
    }

    #[test]
    fn full_hue_rotation_is_identity() {
        for color in sample_colors() {
            assert_close(apply_hue(color, TAU), color);
        }
    }

    // Brightness and contrast run before hue, so its input can leave [0, 1].
    const OVERDRIVEN: [Rgb; 5] = [
        [2.0, 1.0, 0.0],
        [4.0, 2.0, 1.0],
        // contrast 3 applied to (0.1, 0.5, 0.9)
        [-0.7, 0.5, 1.7],
        [-0.5, 0.2, 0.5],
        [1.5, -0.25, 0.75],
    ];

    #[test]
    fn full_hue_rotation_is_identity_outside_unit_range() {
        for color in OVERDRIVEN {
            assert_eq!(apply_hue(color, 0.0), color);
            assert_close(apply_hue(color, TAU), color);
            assert_close(apply_hue(color, -TAU), color);
        }
    }

    #[test]
    fn lightness_extremes_are_singular() {
        assert!(is_hsl_singular([2.0, 1.0, 0.0]));
        assert!(is_hsl_singular([-0.5, 0.2, 0.5]));
        assert!(!is_hsl_singular([4.0, 2.0, 1.0]));
        assert!(!is_hsl_singular([1.0, 1.0, 1.0]));
        assert!(!is_hsl_singular(SAMPLE));

        // No finite HSL form exists, so any rotation leaves them alone.
        assert_eq!(apply_hue([2.0, 1.0, 0.0], 1.0), [2.0, 1.0, 0.0]);
        assert_eq!(apply_hue([-0.5, 0.2, 0.5], 2.5), [-0.5, 0.2, 0.5]);
    }

    #[test]
    fn rotation_round_trips_outside_unit_range() {
        for color in [[4.0, 2.0, 1.0], [-0.7, 0.5, 1.7], [1.5, -0.25, 0.75]] {
            assert_close(hsl_to_rgb(rgb_to_hsl(color)), color);
            let rotated = apply_hue(color, 2.0);
            assert!(rotated.iter().all(|v| v.is_finite()), "{rotated:?}");
            let back = apply_hue(rotated, TAU - 2.0);
            for (a, e) in back.iter().zip(color.iter()) {
                assert!((a - e).abs() <= 1e-3, "expected {color:?}, got {back:?}");
            }
        }
    }

    #[test]
    fn brightness_alone_is_a_clamped_product() {
        for brightness in [1.5, 2.0, 3.3, 5.0] {
            let params = FilterParameters::new().with(Field::Brightness, brightness);
            for color in sample_colors() {
                let expected = color.map(|v| (v * brightness).min(1.0));
                assert_close(apply_pipeline(color, &params), expected);
            }
        }
    }

    #[test]
    fn brightened_orange_turns_yellow() {
        let params = FilterParameters::new().with(Field::Brightness, 2.0);
        assert_close(apply_pipeline([1.0, 0.5, 0.0], &params), [1.0, 1.0, 0.0]);

        let source = RgbaImage::from_pixel(1, 1, image::Rgba([255, 128, 0, 255]));
        let output = process_image(&source, &params);
        assert_eq!(output.get_pixel(0, 0).0, [255, 255, 0, 255]);
    }

    #[test]
    fn half_hue_rotation_swaps_to_complement() {
        assert_close(apply_hue([1.0, 0.0, 0.0], TAU / 2.0), [0.0, 1.0, 1.0]);
    }

    #[test]
    fn fract_matches_glsl_for_negative_inputs() {
        assert!((fract(-0.25) - 0.75).abs() < EPSILON);
        assert_eq!(fract(1.0), 0.0);
    }

    #[test]
    fn final_clamp_caps_bright_values() {
        let params = FilterParameters::new().with(Field::Brightness, 5.0);
        assert_close(apply_brightness(SAMPLE, 5.0), [4.0, 2.0, 1.0]);
        assert_eq!(apply_pipeline(SAMPLE, &params), [1.0, 1.0, 1.0]);
    }

    #[test]
    fn contrast_pivots_on_mid_gray() {
        assert_close(apply_contrast([0.5, 0.5, 0.5], 7.0), [0.5, 0.5, 0.5]);
        assert_close(apply_contrast([0.6, 0.4, 0.5], 2.0), [0.7, 0.3, 0.5]);
        assert_close(apply_contrast([0.6, 0.4, 0.5], -1.0), [0.4, 0.6, 0.5]);
    }

    #[test]
    fn operator_order_is_load_bearing() {
        let params = FilterParameters {
            saturation: 1.4,
            brightness: 1.8,
            contrast: 1.6,
            hue: 1.1,
            exposure: -0.7,
        };
        let color = [0.3, 0.5, 0.2];
        let expected = apply_pipeline(color, &params);

        // Contrast before brightness pivots around a different mid-gray.
        let swapped = {
            let c = apply_saturation(color, params.saturation);
            let c = apply_contrast(c, params.contrast);
            let c = apply_brightness(c, params.brightness);
            let c = apply_hue(c, params.hue);
            apply_exposure(c, params.exposure).map(clamp_unit)
        };
        // Exposure before contrast moves the signal relative to the pivot.
        let exposure_first = {
            let c = apply_saturation(color, params.saturation);
            let c = apply_brightness(c, params.brightness);
            let c = apply_exposure(c, params.exposure);
            let c = apply_contrast(c, params.contrast);
            apply_hue(c, params.hue).map(clamp_unit)
        };

        let differs = |other: Rgb| {
            expected
                .iter()
                .zip(other.iter())
                .any(|(a, b)| (a - b).abs() > 0.01)
        };
        assert!(differs(swapped), "{expected:?} vs {swapped:?}");
        assert!(differs(exposure_first), "{expected:?} vs {exposure_first:?}");
    }

    #[test]
    fn clamp_unit_handles_nan() {
        assert_eq!(clamp_unit(f32::NAN), 0.0);
        assert_eq!(clamp_unit(f32::INFINITY), 1.0);
        assert_eq!(clamp_unit(-3.0), 0.0);
    }

    #[test]
    fn process_image_preserves_alpha_and_applies_pipeline() {
        let mut source = RgbaImage::new(2, 1);
        source.put_pixel(0, 0, image::Rgba([204, 102, 52, 77]));
        source.put_pixel(1, 0, image::Rgba([10, 200, 30, 255]));
        let params = FilterParameters::new().with(Field::Exposure, -1.0);

        let output = process_image(&source, &params);
        assert_eq!(output.dimensions(), (2, 1));
        assert_eq!(output.get_pixel(0, 0).0, [102, 51, 26, 77]);
        assert_eq!(output.get_pixel(1, 0).0[3], 255);
    }

    #[test]
    fn process_image_identity_is_lossless() {
        let mut source = RgbaImage::new(16, 16);
        for (x, y, pixel) in source.enumerate_pixels_mut() {
            pixel.0 = [(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8, 255];
        }
        let output = process_image(&source, &FilterParameters::default());
        assert_eq!(output, source);
    }
}
