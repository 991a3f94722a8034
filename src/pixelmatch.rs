//! Perceptual pixel comparison.
//!
//! Pixels are compared in YIQ colour space; a pixel counts as mismatched when
//! its weighted colour delta exceeds `35215 * threshold^2` (35215 being the
//! largest possible delta). Pixels that look like anti-aliasing on either
//! image are reported separately and, by default, are not counted.

use crate::{Error, Result};

/// Largest possible YIQ delta between two pixels.
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Tuning knobs for [`compare`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOptions {
    /// Matching threshold in `0.0..=1.0`; smaller is more sensitive.
    pub threshold: f64,
    /// Count anti-aliased pixels as mismatches instead of ignoring them.
    pub include_aa: bool,
    /// Opacity of unchanged pixels drawn into the diff output.
    pub alpha: f64,
    /// Colour used for anti-aliased pixels in the diff output.
    pub aa_color: [u8; 3],
    /// Colour used for mismatched pixels in the diff output.
    pub diff_color: [u8; 3],
    /// When set, mismatches where the rendered pixel is darker use this colour.
    pub diff_color_alt: Option<[u8; 3]>,
    /// Draw only the mismatches on a transparent background.
    pub diff_mask: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            include_aa: false,
            alpha: 0.1,
            aa_color: [255, 255, 0],
            diff_color: [255, 0, 0],
            diff_color_alt: None,
            diff_mask: false,
        }
    }
}

/// Compare two RGBA buffers of `width x height` pixels and return the number
/// of mismatched pixels. When `output` is given it receives the visual diff.
pub fn compare(
    img1: &[u8],
    img2: &[u8],
    mut output: Option<&mut [u8]>,
    width: u32,
    height: u32,
    options: &MatchOptions,
) -> Result<usize> {
    let len = width as usize * height as usize * 4;
    if img1.len() != img2.len() || output.as_ref().is_some_and(|o| o.len() != img1.len()) {
        return Err(Error::Other("Image sizes do not match.".into()));
    }
    if img1.len() != len {
        return Err(Error::Other(
            "Image data size does not match width/height.".into(),
        ));
    }
    if !(0.0..=1.0).contains(&options.threshold) {
        return Err(Error::ConfigError(format!(
            "threshold must be within 0..=1, got {}",
            options.threshold
        )));
    }

    let w = width as usize;
    let h = height as usize;

    if img1 == img2 {
        if let Some(out) = output.as_deref_mut() {
            if !options.diff_mask {
                for pos in (0..len).step_by(4) {
                    draw_gray_pixel(img1, pos, options.alpha, out);
                }
            }
        }
        return Ok(0);
    }

    let max_delta = MAX_YIQ_DELTA * options.threshold * options.threshold;
    let mut diff = 0usize;

    for y in 0..h {
        for x in 0..w {
            let pos = (y * w + x) * 4;
            let delta = color_delta(img1, img2, pos, pos, false);

            if delta.abs() > max_delta {
                if !options.include_aa
                    && (antialiased(img1, x, y, w, h, img2) || antialiased(img2, x, y, w, h, img1))
                {
                    if let Some(out) = output.as_deref_mut() {
                        if !options.diff_mask {
                            draw_pixel(out, pos, options.aa_color);
                        }
                    }
                } else {
                    if let Some(out) = output.as_deref_mut() {
                        let color = match options.diff_color_alt {
                            Some(alt) if delta < 0.0 => alt,
                            _ => options.diff_color,
                        };
                        draw_pixel(out, pos, color);
                    }
                    diff += 1;
                }
            } else if let Some(out) = output.as_deref_mut() {
                if !options.diff_mask {
                    draw_gray_pixel(img1, pos, options.alpha, out);
                }
            }
        }
    }

    Ok(diff)
}

/// Whether the pixel at `(x1, y1)` is likely part of an anti-aliased edge:
/// it has both a darker and a brighter neighbour, and either extreme sits in
/// a flat region on both images.
fn antialiased(img: &[u8], x1: usize, y1: usize, w: usize, h: usize, img2: &[u8]) -> bool {
    let x0 = x1.saturating_sub(1);
    let y0 = y1.saturating_sub(1);
    let x2 = (x1 + 1).min(w - 1);
    let y2 = (y1 + 1).min(h - 1);
    let pos = (y1 * w + x1) * 4;

    let mut zeroes = usize::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);
    let mut min = 0.0f64;
    let mut max = 0.0f64;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0, 0, 0, 0);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }

            let delta = color_delta(img, img, pos, (y * w + x) * 4, true);

            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_x = x;
                min_y = y;
            } else if delta > max {
                max = delta;
                max_x = x;
                max_y = y;
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_x, min_y, w, h) && has_many_siblings(img2, min_x, min_y, w, h))
        || (has_many_siblings(img, max_x, max_y, w, h)
            && has_many_siblings(img2, max_x, max_y, w, h))
}

/// Whether at least three neighbours share the exact colour of `(x1, y1)`.
fn has_many_siblings(img: &[u8], x1: usize, y1: usize, w: usize, h: usize) -> bool {
    let x0 = x1.saturating_sub(1);
    let y0 = y1.saturating_sub(1);
    let x2 = (x1 + 1).min(w - 1);
    let y2 = (y1 + 1).min(h - 1);
    let pos = (y1 * w + x1) * 4;

    let mut zeroes = usize::from(x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let pos2 = (y * w + x) * 4;
            if img[pos..pos + 4] == img[pos2..pos2 + 4] {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }

    false
}

/// Squared YIQ distance between two pixels, negative when the second is
/// brighter. With `y_only` only the brightness difference is returned.
fn color_delta(img1: &[u8], img2: &[u8], k: usize, m: usize, y_only: bool) -> f64 {
    let a = &img1[k..k + 4];
    let b = &img2[m..m + 4];
    if a == b {
        return 0.0;
    }

    let [r1, g1, b1] = blend_over_white(a);
    let [r2, g2, b2] = blend_over_white(b);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;

    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);

    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;

    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

fn blend_over_white(px: &[u8]) -> [f64; 3] {
    let (r, g, b, a) = (px[0] as f64, px[1] as f64, px[2] as f64, px[3]);
    if a < 255 {
        let a = a as f64 / 255.0;
        [blend(r, a), blend(g, a), blend(b, a)]
    } else {
        [r, g, b]
    }
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}

fn blend(c: f64, a: f64) -> f64 {
    255.0 + (c - 255.0) * a
}

fn draw_pixel(output: &mut [u8], pos: usize, [r, g, b]: [u8; 3]) {
    output[pos] = r;
    output[pos + 1] = g;
    output[pos + 2] = b;
    output[pos + 3] = 255;
}

fn draw_gray_pixel(img: &[u8], pos: usize, alpha: f64, output: &mut [u8]) {
    let y = rgb2y(img[pos] as f64, img[pos + 1] as f64, img[pos + 2] as f64);
    let val = blend(y, alpha * img[pos + 3] as f64 / 255.0).round().clamp(0.0, 255.0) as u8;
    draw_pixel(output, pos, [val, val, val]);
}
