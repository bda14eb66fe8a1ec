//! Stage-drift correction: phase correlation between a stored reference scan
//! and a fresh scan of the same survey rectangle.
//!
//! The shift is measured at an upscaled resolution for signal-to-noise,
//! scaled back into survey pixels, and pushed through a fractional
//! accumulator so sub-pixel drift is carried between runs instead of being
//! rounded away.

use nalgebra::Vector2;
use num_complex::Complex;
use rustfft::FftPlanner;

use log::debug;

use super::{Correction, CorrectionCounter, CorrectionOutcome};
use crate::error::{Error, Result};
use crate::hardware::{with_detector_inserted, with_scan_area, ScanArea, SharedMicroscope};
use crate::image::GreyImage;
use crate::regions::ScanRegion;
use crate::Match;

/// The window transforms applied before correlation, in user order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Separable Hann taper, smoothing the frame edges to zero.
    Hanning,
    /// Sobel gradient magnitude, correlating on structure edges.
    Sobel,
    /// A 3x3 median, knocking out shot noise.
    Median,
}

/// Parameters of the drift engine.
#[derive(Debug, Clone)]
pub struct DriftConfig {
    /// Scans between corrections.
    pub scans: f64,
    /// Window transforms, applied in order to both images.
    pub windows: Vec<Window>,
    /// The upscaled resolution reference and fresh scans are taken at.
    pub resolution: u32,
    /// Zero-padding (in pixels, each side) applied before the FFT.
    pub padding: usize,
    /// Whether each run adopts the fresh scan as the next reference.
    pub update_reference: bool,
}

impl Default for DriftConfig {
    fn default() -> Self {
        DriftConfig {
            scans: 10.0,
            windows: vec![Window::Hanning],
            resolution: 4096,
            padding: 256,
            update_reference: true,
        }
    }
}

/// The drift-correction engine.
///
/// Owns the reference image, the survey rectangle it covers and the
/// fractional accumulator carrying sub-pixel residue between applications.
pub struct DriftCorrector {
    config: DriftConfig,
    survey_size: u32,
    counter: CorrectionCounter,
    reference: Option<GreyImage>,
    region: Option<ScanRegion>,
    accumulator: Vector2<f64>,
}

impl DriftCorrector {
    /// Creates an engine with no reference stored yet.
    pub fn new(config: DriftConfig, survey_size: u32) -> DriftCorrector {
        let scans = config.scans;
        DriftCorrector {
            config,
            survey_size,
            counter: CorrectionCounter::new(scans, Match::NoHigher, 0.0),
            reference: None,
            region: None,
            accumulator: Vector2::zeros(),
        }
    }

    /// The stored reference image, if one was exported.
    pub fn reference(&self) -> Option<&GreyImage> {
        self.reference.as_ref()
    }

    /// The sub-pixel residue carried to the next run, as `(x, y)`.
    pub fn residue(&self) -> (f64, f64) {
        (self.accumulator.x, self.accumulator.y)
    }

    /// Stores the survey rectangle `[tl, br)` as the drift reference and
    /// scans it at the configured resolution.
    pub fn set_reference(
        &mut self,
        mic: &SharedMicroscope,
        tl: (u32, u32),
        br: (u32, u32),
    ) -> Result<()> {
        if br.0 <= tl.0 || br.1 <= tl.1 {
            return Err(Error::validation(
                "drift region",
                "bottom-right corner must be below and right of top-left",
            ));
        }
        let region = ScanRegion::new((tl.0 as i32, tl.1 as i32), br.0 - tl.0, self.survey_size);
        let reference = self.scan_region(mic, &region)?;
        self.region = Some(region);
        self.reference = Some(reference);
        self.counter.set_current(0.0);
        Ok(())
    }

    fn scan_region(&self, mic: &SharedMicroscope, region: &ScanRegion) -> Result<GreyImage> {
        let scaled = region.at_resolution(self.config.resolution);
        let (left, top) = scaled.top_left();
        let area = ScanArea::area(
            (self.config.resolution, self.config.resolution),
            (scaled.size(), scaled.size()),
            (left.max(0) as u32, top.max(0) as u32),
        );
        mic.with(|m| {
            with_detector_inserted(m, true, |m| {
                with_scan_area(m, area, |m| m.scan(true))
            })
        })
        .map(|img| img.norm())
    }

    /// Applies the configured windows in order and removes the mean.
    fn windowed(&self, img: &GreyImage) -> Vec<f64> {
        let (width, height) = img.size();
        let mut data: Vec<f64> = img.convert();
        for window in &self.config.windows {
            data = match window {
                Window::Hanning => hanning(&data, width as usize, height as usize),
                Window::Sobel => sobel(&data, width as usize, height as usize),
                Window::Median => median3(&data, width as usize, height as usize),
            };
        }
        let mean = data.iter().sum::<f64>() / data.len() as f64;
        for v in &mut data {
            *v -= mean;
        }
        data
    }

    /// Measures the integer shift of `new` relative to `reference`, in
    /// pixels of the reference resolution.
    pub fn measure(&self, reference: &GreyImage, new: &GreyImage) -> Result<(f64, f64)> {
        if reference.size() != new.size() {
            return Err(Error::validation(
                "drift images",
                format!(
                    "reference is {:?} but the fresh scan is {:?}",
                    reference.size(),
                    new.size()
                ),
            ));
        }
        let (width, height) = (reference.size().0 as usize, reference.size().1 as usize);
        let mut a = self.windowed(reference);
        let mut b = self.windowed(new);
        // Shift both to non-negative, then pad with each image's mean so the
        // borders do not correlate.
        for data in [&mut a, &mut b] {
            let minimum = data.iter().cloned().fold(f64::INFINITY, f64::min);
            for v in data.iter_mut() {
                *v -= minimum;
            }
        }
        let pad = self.config.padding;
        let padded_a = pad_with_mean(&a, width, height, pad);
        let padded_b = pad_with_mean(&b, width, height, pad);
        let (dx, dy) = phase_correlate(
            &padded_a,
            &padded_b,
            width + 2 * pad,
            height + 2 * pad,
        );
        Ok((dx as f64, dy as f64))
    }

    /// Pushes a scaled drift into the accumulator and takes out the integer
    /// part, leaving the sub-pixel residue for the next run.
    pub fn accumulate(&mut self, scaled: (f64, f64)) -> (i32, i32) {
        self.accumulator += Vector2::new(scaled.0, scaled.1);
        let applied = (
            self.accumulator.x.floor() as i32,
            self.accumulator.y.floor() as i32,
        );
        self.accumulator -= Vector2::new(applied.0 as f64, applied.1 as f64);
        applied
    }
}

impl Correction for DriftCorrector {
    fn name(&self) -> &'static str {
        "drift"
    }

    fn query(&mut self) -> bool {
        self.counter.needs_reset()
    }

    fn run(&mut self, mic: &SharedMicroscope) -> Result<CorrectionOutcome> {
        let region = self.region.ok_or(Error::Staging {
            operation: "drift correction",
            requires: "exporting drift region",
        })?;
        let reference = self.reference.clone().ok_or(Error::Staging {
            operation: "drift correction",
            requires: "exporting drift region",
        })?;
        let new = self.scan_region(mic, &region)?;
        let step = self.measure(&reference, &new)?;
        let scale = self.survey_size as f64 / self.config.resolution as f64;
        let scaled = (step.0 * scale, step.1 * scale);
        let applied = self.accumulate(scaled);
        debug!(
            "drift step {:?} at 1:{:.3} -> applied {:?}, residue {:?}",
            step,
            scale,
            applied,
            self.residue()
        );
        self.counter.set_current(0.0);
        if self.config.update_reference {
            self.reference = Some(new);
        }
        Ok(CorrectionOutcome::Shift {
            dx: applied.0,
            dy: applied.1,
        })
    }

    fn scan_performed(&mut self) {
        self.counter.increase(1.0);
    }
}

fn hann_weight(i: usize, n: usize) -> f64 {
    if n < 2 {
        return 1.0;
    }
    let phase = std::f64::consts::TAU * i as f64 / (n as f64 - 1.0);
    0.5 - 0.5 * phase.cos()
}

fn hanning(data: &[f64], width: usize, height: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(data.len());
    for y in 0..height {
        let wy = hann_weight(y, height);
        for x in 0..width {
            out.push(data[y * width + x] * wy * hann_weight(x, width));
        }
    }
    out
}

fn conv3_zero(data: &[f64], width: usize, height: usize, kernel: &[f64; 9]) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut acc = 0.0;
            for ky in -1..=1i64 {
                for kx in -1..=1i64 {
                    let (sx, sy) = (x + kx, y + ky);
                    if sx < 0 || sy < 0 || sx >= width as i64 || sy >= height as i64 {
                        continue;
                    }
                    acc += data[(sy * width as i64 + sx) as usize]
                        * kernel[((ky + 1) * 3 + (kx + 1)) as usize];
                }
            }
            out[(y * width as i64 + x) as usize] = acc;
        }
    }
    out
}

fn sobel(data: &[f64], width: usize, height: usize) -> Vec<f64> {
    const KX: [f64; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
    const KY: [f64; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];
    let gx = conv3_zero(data, width, height, &KX);
    let gy = conv3_zero(data, width, height, &KY);
    gx.iter().zip(&gy).map(|(x, y)| x.hypot(*y)).collect()
}

fn median3(data: &[f64], width: usize, height: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    let mut window = [0.0f64; 9];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let mut n = 0;
            for ky in -1..=1i64 {
                for kx in -1..=1i64 {
                    let sx = (x + kx).clamp(0, width as i64 - 1);
                    let sy = (y + ky).clamp(0, height as i64 - 1);
                    window[n] = data[(sy * width as i64 + sx) as usize];
                    n += 1;
                }
            }
            window.sort_by(|a, b| a.partial_cmp(b).expect("finite samples"));
            out[(y * width as i64 + x) as usize] = window[4];
        }
    }
    out
}

fn pad_with_mean(data: &[f64], width: usize, height: usize, pad: usize) -> Vec<f64> {
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let (pw, ph) = (width + 2 * pad, height + 2 * pad);
    let mut out = vec![mean; pw * ph];
    for y in 0..height {
        let src = y * width;
        let dst = (y + pad) * pw + pad;
        out[dst..dst + width].copy_from_slice(&data[src..src + width]);
    }
    out
}

fn fft2(data: &mut [Complex<f64>], width: usize, height: usize, inverse: bool) {
    let mut planner = FftPlanner::new();
    let rows = if inverse {
        planner.plan_fft_inverse(width)
    } else {
        planner.plan_fft_forward(width)
    };
    for row in data.chunks_exact_mut(width) {
        rows.process(row);
    }
    let cols = if inverse {
        planner.plan_fft_inverse(height)
    } else {
        planner.plan_fft_forward(height)
    };
    let mut column = vec![Complex::new(0.0, 0.0); height];
    for x in 0..width {
        for y in 0..height {
            column[y] = data[y * width + x];
        }
        cols.process(&mut column);
        for y in 0..height {
            data[y * width + x] = column[y];
        }
    }
}

/// Integer phase correlation: the translation of `b` relative to `a`.
///
/// The cross-power spectrum is normalised to unit magnitude, inverted and
/// the peak position read off with wrap-around sign resolution.
pub(crate) fn phase_correlate(a: &[f64], b: &[f64], width: usize, height: usize) -> (i32, i32) {
    let mut fa: Vec<Complex<f64>> = a.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let mut fb: Vec<Complex<f64>> = b.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft2(&mut fa, width, height, false);
    fft2(&mut fb, width, height, false);
    let mut cross: Vec<Complex<f64>> = fa
        .iter()
        .zip(&fb)
        .map(|(x, y)| {
            let r = x * y.conj();
            let norm = r.norm();
            if norm > 1e-12 {
                r / norm
            } else {
                Complex::new(0.0, 0.0)
            }
        })
        .collect();
    fft2(&mut cross, width, height, true);

    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, value) in cross.iter().enumerate() {
        if value.re > best_value {
            best_value = value.re;
            best = i;
        }
    }
    let px = (best % width) as i64;
    let py = (best / width) as i64;
    let sx = if px > width as i64 / 2 {
        px - width as i64
    } else {
        px
    };
    let sy = if py > height as i64 / 2 {
        py - height as i64
    } else {
        py
    };
    ((-sx) as i32, (-sy) as i32)
}
