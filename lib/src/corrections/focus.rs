//! Objective-lens autofocus: a robust multiresolution sweep maximising the
//! normalized variance of the survey image.
//!
//! A coarse pass brackets the peak, a fine pass samples around it reusing
//! anything already measured, a parabola through the top three fine points
//! refines the vertex, and a safety check rolls the lens back to its base
//! value unless the peak is a real improvement.

use nalgebra::{Matrix3, Vector3};

use log::{debug, warn};

use super::{Correction, CorrectionCounter, CorrectionOutcome};
use crate::error::Result;
use crate::hardware::{with_scan_area, Lens, Microscope, ScanArea, SharedMicroscope};
use crate::image::GreyImage;
use crate::Match;

/// Parameters of the autofocus engine. There is no cross-call state; every
/// run is self-contained.
#[derive(Debug, Clone, Copy)]
pub struct FocusConfig {
    /// Scans between corrections.
    pub scans: f64,
    /// Half-width of the coarse sweep around the current lens value.
    pub coarse_limit: i32,
    /// Step of the fine sweep.
    pub fine_step: i32,
    /// Smallest lens change worth applying; changes below it are treated as
    /// already in focus.
    pub tolerance: i32,
}

impl Default for FocusConfig {
    fn default() -> Self {
        FocusConfig {
            scans: 20.0,
            coarse_limit: 160,
            fine_step: 8,
            tolerance: 2,
        }
    }
}

/// What a sweep did to the lens.
#[derive(Debug, Clone, Copy)]
pub struct FocusOutcome {
    /// The lens value left on the column.
    pub applied: i32,
    /// Figure of merit at the starting value.
    pub start_merit: f64,
    /// Best figure of merit the sweep found.
    pub peak_merit: f64,
    /// Whether the safety check restored the base value.
    pub rolled_back: bool,
}

/// Normalized variance, `var(image) / mean(image)²`. Higher is sharper.
pub fn merit(image: &GreyImage) -> f64 {
    let data: Vec<f64> = image.convert();
    if data.is_empty() {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / data.len() as f64;
    variance / (mean * mean)
}

fn sample(m: &mut dyn Microscope, value: i32) -> Result<f64> {
    m.set_lens_value(Lens::OlFine, value)?;
    let image = m.scan(true)?;
    Ok(merit(&image))
}

fn lookup(seen: &[(i32, f64)], value: i32) -> Option<f64> {
    seen.iter()
        .find(|(v, _)| *v == value)
        .map(|&(_, merit)| merit)
}

/// Fits `y = ax² + bx + c` through three points and returns the vertex, or
/// `None` when the fit is not a peak (convex-up, flat or degenerate).
fn parabola_vertex(points: &[(i32, f64)]) -> Option<(f64, f64)> {
    if points.len() < 3 {
        return None;
    }
    let (x0, x1, x2) = (points[0].0 as f64, points[1].0 as f64, points[2].0 as f64);
    let design = Matrix3::new(
        x0 * x0,
        x0,
        1.0,
        x1 * x1,
        x1,
        1.0,
        x2 * x2,
        x2,
        1.0,
    );
    let values = Vector3::new(points[0].1, points[1].1, points[2].1);
    let coeffs = design.lu().solve(&values)?;
    let (a, b, c) = (coeffs[0], coeffs[1], coeffs[2]);
    if a >= 0.0 {
        return None;
    }
    let vertex = -b / (2.0 * a);
    Some((vertex, a * vertex * vertex + b * vertex + c))
}

/// The autofocus engine.
pub struct AutoFocus {
    config: FocusConfig,
    counter: CorrectionCounter,
    survey_size: (u32, u32),
}

impl AutoFocus {
    /// Creates an engine scanning the full survey frame for its merit
    /// measurements.
    pub fn new(config: FocusConfig, survey_size: (u32, u32)) -> AutoFocus {
        let scans = config.scans;
        AutoFocus {
            config,
            counter: CorrectionCounter::new(scans, Match::NoHigher, 0.0),
            survey_size,
        }
    }

    /// Runs one sweep. The lens ends at the refined peak, or back at its
    /// base value when no sampled merit beat `1.01 x` the starting merit.
    pub fn run_sweep(&self, mic: &SharedMicroscope) -> Result<FocusOutcome> {
        let config = self.config;
        let area = ScanArea::full(self.survey_size);
        mic.with(|m| {
            with_scan_area(m, area, |m| {
                let base = m.lens_value(Lens::OlFine);
                // Detector warm-up: the first frame reads low and is
                // discarded.
                let _ = sample(m, base)?;
                let start = sample(m, base)?;
                let mut seen: Vec<(i32, f64)> = vec![(base, start)];

                // Coarse pass, sized to put roughly eight points across the
                // bracket.
                let coarse_step = (config.fine_step * 2).max(config.coarse_limit / 4).max(1);
                let mut coarse: Vec<(i32, f64)> = Vec::new();
                let mut offset = -config.coarse_limit;
                while offset <= config.coarse_limit {
                    let value = base + offset;
                    let figure = match lookup(&seen, value) {
                        Some(figure) => figure,
                        None => {
                            let figure = sample(m, value)?;
                            seen.push((value, figure));
                            figure
                        }
                    };
                    debug!("coarse {value:#06X} -> {figure:.5}");
                    coarse.push((value, figure));
                    offset += coarse_step;
                }
                let &(best_coarse, _) = coarse
                    .iter()
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .expect("coarse sweep is never empty");

                // Fine pass around the coarse winner, reusing anything the
                // coarse pass already measured.
                let fine_window = coarse_step * 2;
                let mut fine: Vec<(i32, f64)> = Vec::new();
                let mut value = best_coarse - fine_window / 2;
                while value <= best_coarse + fine_window / 2 {
                    let figure = match lookup(&seen, value) {
                        Some(figure) => figure,
                        None => {
                            let figure = sample(m, value)?;
                            seen.push((value, figure));
                            figure
                        }
                    };
                    debug!("fine {value:#06X} -> {figure:.5}");
                    fine.push((value, figure));
                    value += config.fine_step.max(1);
                }

                let &(discrete_value, discrete_merit) = fine
                    .iter()
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .expect("fine sweep is never empty");

                // Parabolic refinement over the three best fine points.
                let mut top: Vec<(i32, f64)> = fine.clone();
                top.sort_by(|a, b| b.1.total_cmp(&a.1));
                top.truncate(3);
                top.sort_by_key(|&(v, _)| v);
                let (mut peak_value, mut peak_merit) = match parabola_vertex(&top) {
                    Some((vertex, merit)) => (vertex.round() as i32, merit),
                    None => (discrete_value, discrete_merit),
                };
                if (peak_value - discrete_value).abs() > fine_window {
                    debug!("parabolic fit unstable, using the discrete maximum");
                    peak_value = discrete_value;
                    peak_merit = discrete_merit;
                }

                if peak_merit < start * 1.01 {
                    warn!(
                        "focus improvement negligible ({peak_merit:.5} vs {start:.5}), rolling back"
                    );
                    m.set_lens_value(Lens::OlFine, base)?;
                    return Ok(FocusOutcome {
                        applied: base,
                        start_merit: start,
                        peak_merit,
                        rolled_back: true,
                    });
                }
                m.set_lens_value(Lens::OlFine, peak_value)?;
                Ok(FocusOutcome {
                    applied: peak_value,
                    start_merit: start,
                    peak_merit,
                    rolled_back: false,
                })
            })
        })
    }
}

impl Correction for AutoFocus {
    fn name(&self) -> &'static str {
        "focus"
    }

    fn query(&mut self) -> bool {
        self.counter.needs_reset()
    }

    fn run(&mut self, mic: &SharedMicroscope) -> Result<CorrectionOutcome> {
        self.run_sweep(mic)?;
        self.counter.set_current(0.0);
        Ok(CorrectionOutcome::Ran)
    }

    fn scan_performed(&mut self) {
        self.counter.increase(1.0);
    }
}
