//! The image transforms the preprocessing pipeline is built from.
//!
//! Every operator takes a [`GreyImage`] and returns a new one; the pipeline
//! decides ordering and enablement. Kernel sides must be odd so each kernel
//! has a centre pixel. Borders are handled by replication throughout.

use rayon::prelude::*;

use super::GreyImage;
use crate::error::{Error, Result};

/// Shape of a morphological structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphShape {
    /// Every cell of the kernel participates.
    Rect,
    /// Only the centre row and centre column participate.
    Cross,
    /// The inscribed ellipse participates.
    Ellipse,
}

/// The morphological operators exposed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphKind {
    /// Erode then dilate; removes foreground noise.
    Open,
    /// Dilate then erode; closes small foreground holes.
    Close,
    /// Difference between the dilation and the erosion.
    Gradient,
    /// Difference between the image and its opening.
    InnerGradient,
    /// Difference between the closing and the image.
    OuterGradient,
}

fn require_odd(name: &str, value: u32) -> Result<()> {
    if value == 0 || value % 2 == 0 {
        return Err(Error::validation(
            name,
            format!("kernel side must be odd and at least 1, got {value}"),
        ));
    }
    Ok(())
}

fn require_positive(name: &str, value: u32) -> Result<()> {
    if value == 0 {
        return Err(Error::validation(name, "must be at least 1"));
    }
    Ok(())
}

#[inline]
fn clamp_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[inline]
fn clamp_coord(value: i64, limit: u32) -> u32 {
    value.clamp(0, limit as i64 - 1) as u32
}

/// Convolution with border replication. The kernel is row-major `kh` x `kw`.
fn convolve(img: &GreyImage, kernel: &[f64], kw: u32, kh: u32) -> Vec<f64> {
    let (width, height) = img.size();
    let (ox, oy) = (kw as i64 / 2, kh as i64 / 2);
    let mut out = vec![0.0f64; (width * height) as usize];
    out.par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, cell) in row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for ky in 0..kh as i64 {
                    let sy = clamp_coord(y as i64 + ky - oy, height);
                    for kx in 0..kw as i64 {
                        let sx = clamp_coord(x as i64 + kx - ox, width);
                        acc += img.get(sx, sy) as f64 * kernel[(ky * kw as i64 + kx) as usize];
                    }
                }
                *cell = acc;
            }
        });
    out
}

fn from_f64(width: u32, height: u32, data: Vec<f64>) -> GreyImage {
    let bytes = data.into_iter().map(clamp_u8).collect();
    GreyImage::from_raw(width, height, bytes).expect("buffer sized by construction")
}

/// Box blur with an `height` x `width` kernel.
pub fn blur(img: &GreyImage, height: u32, width: u32) -> Result<GreyImage> {
    require_odd("blur height", height)?;
    require_odd("blur width", width)?;
    let kernel = vec![1.0 / (height * width) as f64; (height * width) as usize];
    let data = convolve(img, &kernel, width, height);
    Ok(from_f64(img.width(), img.height(), data))
}

/// Derives a Gaussian sigma from a kernel side when the caller passes zero.
fn derived_sigma(side: u32, sigma: f64) -> f64 {
    if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((side as f64 - 1.0) * 0.5 - 1.0) + 0.8
    }
}

fn gaussian_kernel_1d(side: u32, sigma: f64) -> Vec<f64> {
    let centre = (side as f64 - 1.0) / 2.0;
    let mut kernel: Vec<f64> = (0..side)
        .map(|i| {
            let d = i as f64 - centre;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= total;
    }
    kernel
}

/// Gaussian blur. A zero sigma is derived from the kernel size.
pub fn gaussian_blur(
    img: &GreyImage,
    height: u32,
    width: u32,
    sigma_x: f64,
    sigma_y: f64,
) -> Result<GreyImage> {
    require_odd("gss_blur height", height)?;
    require_odd("gss_blur width", width)?;
    let gx = gaussian_kernel_1d(width, derived_sigma(width, sigma_x));
    let gy = gaussian_kernel_1d(height, derived_sigma(height, sigma_y));
    let mut kernel = Vec::with_capacity((height * width) as usize);
    for y in &gy {
        for x in &gx {
            kernel.push(y * x);
        }
    }
    let data = convolve(img, &kernel, width, height);
    Ok(from_f64(img.width(), img.height(), data))
}

/// Laplacian sharpening: the high-pass residual against a `size` x `size`
/// smoothing kernel is scaled and added back.
pub fn sharpen(img: &GreyImage, size: u32, scale: f64, delta: f64) -> Result<GreyImage> {
    require_odd("sharpen size", size)?;
    if scale < 0.0 {
        return Err(Error::validation("sharpen scale", "must not be negative"));
    }
    let kernel = vec![1.0 / (size * size) as f64; (size * size) as usize];
    let smoothed = convolve(img, &kernel, size, size);
    let data = img
        .data()
        .iter()
        .zip(smoothed)
        .map(|(&v, s)| v as f64 + scale * (v as f64 - s) + delta)
        .collect();
    Ok(from_f64(img.width(), img.height(), data))
}

/// Median filter with a square `size` x `size` window.
pub fn median(img: &GreyImage, size: u32) -> Result<GreyImage> {
    require_odd("median size", size)?;
    let (width, height) = img.size();
    let offset = size as i64 / 2;
    let mut out = vec![0u8; (width * height) as usize];
    out.par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let mut window = Vec::with_capacity((size * size) as usize);
            for (x, cell) in row.iter_mut().enumerate() {
                window.clear();
                for ky in -offset..=offset {
                    let sy = clamp_coord(y as i64 + ky, height);
                    for kx in -offset..=offset {
                        let sx = clamp_coord(x as i64 + kx, width);
                        window.push(img.get(sx, sy));
                    }
                }
                window.sort_unstable();
                *cell = window[window.len() / 2];
            }
        });
    GreyImage::from_raw(width, height, out)
}

/// Range threshold: pixels inside `[minima, maxima]` become black, everything
/// else white. `invert` swaps the two outputs.
pub fn threshold(img: &GreyImage, minima: u8, maxima: u8, invert: bool) -> GreyImage {
    let (inside, outside) = if invert { (255, 0) } else { (0, 255) };
    let data = img
        .data()
        .iter()
        .map(|&v| if v >= minima && v <= maxima { inside } else { outside })
        .collect();
    GreyImage::from_raw(img.width(), img.height(), data).expect("buffer sized by construction")
}

const SOBEL_X: [f64; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const SOBEL_Y: [f64; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

/// Canny edge detection. The aperture `size` controls the pre-smoothing;
/// `minima` and `maxima` are the hysteresis thresholds shared with the range
/// threshold operator. Edges come out white.
pub fn edge(img: &GreyImage, size: u32, minima: u8, maxima: u8, invert: bool) -> Result<GreyImage> {
    require_odd("edge size", size)?;
    let (width, height) = img.size();
    let smoothed = gaussian_blur(img, size, size, 0.0, 0.0)?;
    let gx = convolve(&smoothed, &SOBEL_X, 3, 3);
    let gy = convolve(&smoothed, &SOBEL_Y, 3, 3);
    let magnitude: Vec<f64> = gx
        .iter()
        .zip(&gy)
        .map(|(x, y)| x.hypot(*y))
        .collect();

    // Non-maximum suppression along the quantized gradient direction.
    let at = |x: i64, y: i64| -> f64 {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            0.0
        } else {
            magnitude[(y * width as i64 + x) as usize]
        }
    };
    let mut thin = vec![0.0f64; magnitude.len()];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let i = (y * width as i64 + x) as usize;
            let m = magnitude[i];
            if m == 0.0 {
                continue;
            }
            let angle = gy[i].atan2(gx[i]).to_degrees();
            let angle = if angle < 0.0 { angle + 180.0 } else { angle };
            let (da, db) = if !(22.5..157.5).contains(&angle) {
                ((1, 0), (-1, 0))
            } else if angle < 67.5 {
                ((1, 1), (-1, -1))
            } else if angle < 112.5 {
                ((0, 1), (0, -1))
            } else {
                ((1, -1), (-1, 1))
            };
            if m >= at(x + da.0, y + da.1) && m >= at(x + db.0, y + db.1) {
                thin[i] = m;
            }
        }
    }

    // Hysteresis: strong edges seed a flood through connected weak edges.
    let strong = maxima as f64;
    let weak = minima as f64;
    let mut out = GreyImage::blank(width, height);
    let mut stack: Vec<(u32, u32)> = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if thin[(y * width + x) as usize] >= strong && out.get(x, y) == 0 {
                out.set(x, y, 255);
                stack.push((x, y));
                while let Some((cx, cy)) = stack.pop() {
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let (nx, ny) = (cx as i64 + dx, cy as i64 + dy);
                            if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                                continue;
                            }
                            let (nx, ny) = (nx as u32, ny as u32);
                            if out.get(nx, ny) == 0
                                && thin[(ny * width + nx) as usize] >= weak
                            {
                                out.set(nx, ny, 255);
                                stack.push((nx, ny));
                            }
                        }
                    }
                }
            }
        }
    }
    if invert {
        out.invert();
    }
    Ok(out)
}

struct Element {
    width: u32,
    height: u32,
    mask: Vec<bool>,
}

impl Element {
    fn build(height: u32, width: u32, shape: MorphShape, multiplier: u32) -> Element {
        // Keeps the side odd for any multiplier: radius scales, centre stays.
        let eh = (height - 1) * multiplier + 1;
        let ew = (width - 1) * multiplier + 1;
        let (cy, cx) = (eh / 2, ew / 2);
        let mut mask = vec![false; (eh * ew) as usize];
        for y in 0..eh {
            for x in 0..ew {
                let on = match shape {
                    MorphShape::Rect => true,
                    MorphShape::Cross => x == cx || y == cy,
                    MorphShape::Ellipse => {
                        let rx = (ew as f64 - 1.0) / 2.0;
                        let ry = (eh as f64 - 1.0) / 2.0;
                        let dx = if rx > 0.0 { (x as f64 - cx as f64) / rx } else { 0.0 };
                        let dy = if ry > 0.0 { (y as f64 - cy as f64) / ry } else { 0.0 };
                        dx * dx + dy * dy <= 1.0
                    }
                };
                mask[(y * ew + x) as usize] = on;
            }
        }
        Element {
            width: ew,
            height: eh,
            mask,
        }
    }
}

fn rank_filter(img: &GreyImage, element: &Element, maximum: bool) -> GreyImage {
    let (width, height) = img.size();
    let (ox, oy) = (element.width as i64 / 2, element.height as i64 / 2);
    let mut out = vec![0u8; (width * height) as usize];
    out.par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, cell) in row.iter_mut().enumerate() {
                let mut best = if maximum { u8::MIN } else { u8::MAX };
                for ky in 0..element.height as i64 {
                    let sy = clamp_coord(y as i64 + ky - oy, height);
                    for kx in 0..element.width as i64 {
                        if !element.mask[(ky * element.width as i64 + kx) as usize] {
                            continue;
                        }
                        let sx = clamp_coord(x as i64 + kx - ox, width);
                        let v = img.get(sx, sy);
                        best = if maximum { best.max(v) } else { best.min(v) };
                    }
                }
                *cell = best;
            }
        });
    GreyImage::from_raw(width, height, out).expect("buffer sized by construction")
}

fn difference(a: &GreyImage, b: &GreyImage) -> GreyImage {
    let data = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| x.saturating_sub(y))
        .collect();
    GreyImage::from_raw(a.width(), a.height(), data).expect("matching buffers")
}

/// Morphological transform with an `height` x `width` structuring element of
/// the given shape. `multiplier` scales the element's radius and `repeats`
/// applies the whole transform again on its own output.
pub fn morphology(
    img: &GreyImage,
    kind: MorphKind,
    height: u32,
    width: u32,
    shape: MorphShape,
    multiplier: u32,
    repeats: u32,
) -> Result<GreyImage> {
    require_odd("morphology height", height)?;
    require_odd("morphology width", width)?;
    require_positive("morphology multiplier", multiplier)?;
    require_positive("morphology repeats", repeats)?;
    let element = Element::build(height, width, shape, multiplier);
    let mut current = img.clone();
    for _ in 0..repeats {
        let eroded = rank_filter(&current, &element, false);
        let dilated = rank_filter(&current, &element, true);
        current = match kind {
            MorphKind::Open => rank_filter(&eroded, &element, true),
            MorphKind::Close => rank_filter(&dilated, &element, false),
            MorphKind::Gradient => difference(&dilated, &eroded),
            MorphKind::InnerGradient => {
                let opened = rank_filter(&eroded, &element, true);
                difference(&current, &opened)
            }
            MorphKind::OuterGradient => {
                let closed = rank_filter(&dilated, &element, false);
                difference(&closed, &current)
            }
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: u8) -> GreyImage {
        GreyImage::from_raw(8, 8, vec![value; 64]).unwrap()
    }

    #[test]
    fn kernels_must_be_odd() {
        let img = uniform(10);
        assert!(blur(&img, 4, 3).is_err());
        assert!(blur(&img, 3, 0).is_err());
        assert!(median(&img, 2).is_err());
        assert!(gaussian_blur(&img, 3, 6, 0.0, 0.0).is_err());
    }

    #[test]
    fn blur_preserves_uniform_images() {
        let img = uniform(90);
        assert_eq!(blur(&img, 3, 3).unwrap(), img);
        assert_eq!(gaussian_blur(&img, 5, 5, 0.0, 0.0).unwrap(), img);
    }

    #[test]
    fn median_removes_salt_noise() {
        let mut img = uniform(0);
        img.set(4, 4, 255);
        let cleaned = median(&img, 3).unwrap();
        assert_eq!(cleaned.get(4, 4), 0);
    }

    #[test]
    fn threshold_maps_range_to_black() {
        let img = GreyImage::from_raw(2, 2, vec![20, 45, 61, 200]).unwrap();
        let out = threshold(&img, 30, 60, false);
        assert_eq!(out.data(), &[255, 0, 255, 255]);
        let inverted = threshold(&img, 30, 60, true);
        assert_eq!(inverted.data(), &[0, 255, 0, 0]);
        assert!(out.is_binary());
    }

    #[test]
    fn edge_of_constant_image_is_empty() {
        let img = uniform(120);
        let out = edge(&img, 3, 30, 60, false).unwrap();
        assert_eq!(out.count_nonzero(), 0);
    }

    #[test]
    fn edge_finds_a_step() {
        let mut img = GreyImage::blank(16, 16);
        for y in 0..16 {
            for x in 8..16 {
                img.set(x, y, 255);
            }
        }
        let out = edge(&img, 3, 30, 60, false).unwrap();
        assert!(out.count_nonzero() > 0);
        assert!(out.is_binary());
        // Every edge pixel sits near the step.
        for (x, _) in out.foreground() {
            assert!((6..=9).contains(&x));
        }
    }

    #[test]
    fn open_removes_specks_close_fills_holes() {
        let mut img = GreyImage::blank(16, 16);
        img.draw_square((4, 4), 7, 255, true);
        img.set(14, 14, 255);
        let opened = morphology(&img, MorphKind::Open, 3, 3, MorphShape::Rect, 1, 1).unwrap();
        assert_eq!(opened.get(14, 14), 0);
        assert_eq!(opened.get(7, 7), 255);

        let mut holed = GreyImage::blank(16, 16);
        holed.draw_square((4, 4), 7, 255, true);
        holed.set(7, 7, 0);
        let closed = morphology(&holed, MorphKind::Close, 3, 3, MorphShape::Rect, 1, 1).unwrap();
        assert_eq!(closed.get(7, 7), 255);
    }

    #[test]
    fn gradient_outlines_a_blob() {
        let mut img = GreyImage::blank(16, 16);
        img.draw_square((4, 4), 7, 255, true);
        let grad = morphology(&img, MorphKind::Gradient, 3, 3, MorphShape::Rect, 1, 1).unwrap();
        assert_eq!(grad.get(7, 7), 0);
        assert_eq!(grad.get(4, 4), 255);
        assert_eq!(grad.get(0, 0), 0);
    }

    #[test]
    fn element_multiplier_scales_the_radius() {
        let element = Element::build(3, 3, MorphShape::Rect, 2);
        assert_eq!((element.width, element.height), (5, 5));
        let cross = Element::build(3, 3, MorphShape::Cross, 1);
        assert_eq!(cross.mask.iter().filter(|&&m| m).count(), 5);
    }

    #[test]
    fn sharpen_boosts_contrast_at_edges() {
        let mut img = GreyImage::blank(8, 8);
        for y in 0..8 {
            for x in 4..8 {
                img.set(x, y, 200);
            }
        }
        let sharp = sharpen(&img, 3, 1.0, 0.0).unwrap();
        assert!(sharp.get(4, 4) >= img.get(4, 4));
        assert!(sharp.get(3, 4) <= img.get(3, 4));
    }
}
