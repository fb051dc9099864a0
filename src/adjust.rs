//! Camera-level image adjustments. Every control is a 0..100 scalar where 50
//! leaves the frame untouched.

use serde::{Deserialize, Serialize};

use crate::types::Frame;

pub const NEUTRAL: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraAdjustments {
    pub brightness: f32,
    pub contrast: f32,
    pub exposure: f32,
    pub saturation: f32,
}

impl Default for CameraAdjustments {
    fn default() -> Self {
        Self {
            brightness: NEUTRAL,
            contrast: NEUTRAL,
            exposure: NEUTRAL,
            saturation: NEUTRAL,
        }
    }
}

impl CameraAdjustments {
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    /// Brightness/contrast, then exposure, then saturation.
    pub fn apply(&self, frame: &mut Frame) {
        adjust_brightness_contrast(frame, self.brightness, self.contrast);
        adjust_exposure(frame, self.exposure);
        adjust_saturation(frame, self.saturation);
    }
}

/// `out = in * alpha + beta` with alpha = contrast/50, beta = (brightness-50)*2.55.
pub fn adjust_brightness_contrast(frame: &mut Frame, brightness: f32, contrast: f32) {
    let alpha = (contrast / 50.0).max(0.0);
    let beta = (brightness - 50.0) * 2.55;
    scale_add(frame, alpha, beta);
}

pub fn adjust_exposure(frame: &mut Frame, exposure: f32) {
    let alpha = (exposure / 50.0).max(0.0);
    scale_add(frame, alpha, 0.0);
}

/// Scales the HSV saturation channel by `saturation / 50`.
pub fn adjust_saturation(frame: &mut Frame, saturation: f32) {
    let scale = saturation / 50.0;
    if scale == 1.0 {
        return;
    }
    scale_saturation(frame, scale);
}

fn scale_add(frame: &mut Frame, alpha: f32, beta: f32) {
    if alpha == 1.0 && beta == 0.0 {
        return;
    }
    for px in frame.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = saturate(*c as f32 * alpha + beta);
        }
    }
}

pub(crate) fn scale_saturation(frame: &mut Frame, scale: f32) {
    for px in frame.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(px.0);
        let s = (s * scale).clamp(0.0, 1.0);
        px.0 = hsv_to_rgb(h, s, v);
    }
}

fn saturate(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Returns hue in degrees [0, 360), saturation and value in [0, 1].
fn rgb_to_hsv(rgb: [u8; 3]) -> (f32, f32, f32) {
    let r = rgb[0] as f32 / 255.0;
    let g = rgb[1] as f32 / 255.0;
    let b = rgb[2] as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };

    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp.rem_euclid(2.0) - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [
        saturate((r + m) * 255.0),
        saturate((g + m) * 255.0),
        saturate((b + m) * 255.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient() -> Frame {
        Frame::from_fn(32, 16, |x, y| {
            Rgb([(x * 8) as u8, (y * 16) as u8, ((x * 7 + y * 3) % 256) as u8])
        })
    }

    #[test]
    fn test_neutral_settings_are_identity() {
        let original = gradient();
        let mut frame = original.clone();
        CameraAdjustments::default().apply(&mut frame);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_hsv_roundtrip_is_identity() {
        // Forces the full HSV path with a unit scale
        let original = gradient();
        let mut frame = original.clone();
        scale_saturation(&mut frame, 1.0);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_brightness_offsets_and_saturates() {
        let mut frame = Frame::from_pixel(2, 2, Rgb([10, 128, 250]));
        adjust_brightness_contrast(&mut frame, 70.0, 50.0);
        // beta = 20 * 2.55 = 51
        assert_eq!(frame.get_pixel(0, 0).0, [61, 179, 255]);

        let mut frame = Frame::from_pixel(1, 1, Rgb([10, 128, 250]));
        adjust_brightness_contrast(&mut frame, 30.0, 50.0);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 77, 199]);
    }

    #[test]
    fn test_contrast_and_exposure_scale() {
        let mut frame = Frame::from_pixel(1, 1, Rgb([10, 100, 200]));
        adjust_brightness_contrast(&mut frame, 50.0, 25.0);
        assert_eq!(frame.get_pixel(0, 0).0, [5, 50, 100]);

        let mut frame = Frame::from_pixel(1, 1, Rgb([10, 100, 200]));
        adjust_exposure(&mut frame, 100.0);
        assert_eq!(frame.get_pixel(0, 0).0, [20, 200, 255]);

        let mut frame = Frame::from_pixel(1, 1, Rgb([10, 100, 200]));
        adjust_exposure(&mut frame, 0.0);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_zero_saturation_is_grey() {
        let mut frame = Frame::from_pixel(1, 1, Rgb([200, 40, 90]));
        adjust_saturation(&mut frame, 0.0);
        let [r, g, b] = frame.get_pixel(0, 0).0;
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(r, 200, "value channel is preserved");
    }

    #[test]
    fn test_saturation_boost_clamps() {
        let mut frame = Frame::from_pixel(1, 1, Rgb([200, 100, 100]));
        adjust_saturation(&mut frame, 100.0);
        // s = 0.5 -> 1.0, hue and value unchanged
        assert_eq!(frame.get_pixel(0, 0).0, [200, 0, 0]);

        let mut frame = Frame::from_pixel(1, 1, Rgb([200, 0, 0]));
        adjust_saturation(&mut frame, 100.0);
        assert_eq!(frame.get_pixel(0, 0).0, [200, 0, 0]);
    }
}
