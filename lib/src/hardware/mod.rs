//! The trait surface the acquisition core drives the microscope through.
//!
//! Hardware failures are values, never aborts: every mutation returns a
//! [`Result`] whose error names the line that failed. Drivers are
//! process-wide, so the one instance lives behind [`SharedMicroscope`], an
//! interior-mutable handle that also serialises access (at most one scan in
//! flight, at most one lens change in flight).

pub mod merlin;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};
use crate::image::GreyImage;

/// The rectangle a scan acquires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanArea {
    /// The whole frame at the given size.
    Full {
        /// Frame size in pixels.
        size: (u32, u32),
    },
    /// A sub-rectangle of a frame.
    Area {
        /// The full frame resolution the rectangle lives in.
        full: (u32, u32),
        /// Size of the acquired rectangle.
        size: (u32, u32),
        /// Top-left corner of the rectangle inside the frame.
        offset: (u32, u32),
    },
}

impl ScanArea {
    /// A full-frame scan.
    pub fn full(size: (u32, u32)) -> ScanArea {
        ScanArea::Full { size }
    }

    /// A sub-rectangle scan.
    pub fn area(full: (u32, u32), size: (u32, u32), offset: (u32, u32)) -> ScanArea {
        ScanArea::Area { full, size, offset }
    }

    /// Builds a sub-rectangle scan from two corners.
    pub fn from_corners(full: (u32, u32), tl: (u32, u32), br: (u32, u32)) -> ScanArea {
        ScanArea::Area {
            full,
            size: (br.0 - tl.0, br.1 - tl.1),
            offset: tl,
        }
    }

    /// Size of the image a scan of this area produces.
    pub fn size(&self) -> (u32, u32) {
        match *self {
            ScanArea::Full { size } => size,
            ScanArea::Area { size, .. } => size,
        }
    }

    /// The frame resolution the area is defined against.
    pub fn frame(&self) -> (u32, u32) {
        match *self {
            ScanArea::Full { size } => size,
            ScanArea::Area { full, .. } => full,
        }
    }

    /// The acquired rectangle as `(left, top, width, height)` in frame
    /// coordinates.
    pub fn bounds(&self) -> (u32, u32, u32, u32) {
        match *self {
            ScanArea::Full { size } => (0, 0, size.0, size.1),
            ScanArea::Area { size, offset, .. } => (offset.0, offset.1, size.0, size.1),
        }
    }
}

/// The lenses the column exposes. The autofocus routine drives
/// [`Lens::OlFine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Lens {
    Cl1,
    Cl2,
    Cl3,
    Cm,
    OlCoarse,
    OlFine,
    Om1,
    Om2,
    Il1,
    Il2,
    Il3,
    Il4,
    Pl1,
    Pl2,
    Pl3,
    FlCoarse,
    FlFine,
    FlRatio,
}

/// The detectors that can be inserted into the beam path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DetectorKind {
    Adf1,
    Adf2,
    Bf,
    Abf,
}

/// Activation mode of a TTL line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlMode {
    /// Permanently asserted.
    On,
    /// Asserted while the source is active.
    SourceTimed,
    /// Asserted a delay after the source goes active.
    SourceTimedDelay,
    /// A pulse train for the duration of the active window.
    PulseTrain,
    /// A pulse train gated by the source.
    SourceTrain,
}

/// Which signal edge a clocked line triggers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    /// Low-to-high transitions.
    Rising,
    /// High-to-low transitions.
    Falling,
}

/// The timing source a TTL line follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlSource {
    /// One trigger per scanned pixel.
    PixelClock(EdgeType),
    /// One trigger per scanned line.
    LineClock(EdgeType),
    /// One trigger per frame.
    FrameClock(EdgeType),
}

/// Full configuration for one digital I/O line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlConfig {
    /// Activation mode.
    pub mode: TtlMode,
    /// Timing source.
    pub source: TtlSource,
    /// How long the line stays asserted, in seconds.
    pub active: f64,
    /// Delay before assertion, in seconds; meaningful for the delayed mode.
    pub delay: f64,
}

/// Minimal surface of the microscope and scan generator the core consumes.
///
/// Every operation may fail; failures are returned, never thrown across the
/// scheduler. Implementations must be safe to hand to the background
/// emission monitor, hence `Send`.
pub trait Microscope: Send {
    /// Blocks until a scan of the configured area completes. With
    /// `want_image` false the frame is driven but not returned, which is the
    /// Merlin path where the external camera collects the data.
    fn scan(&mut self, want_image: bool) -> Result<GreyImage>;

    /// The configured scan area.
    fn scan_area(&self) -> ScanArea;
    /// Reconfigures the scan area.
    fn set_scan_area(&mut self, area: ScanArea) -> Result<()>;

    /// Per-pixel dwell time.
    fn dwell_time(&self) -> Duration;
    /// Sets the per-pixel dwell time.
    fn set_dwell_time(&mut self, dwell: Duration) -> Result<()>;

    /// The end-of-line flyback time.
    fn flyback(&self) -> Duration;
    /// Sets the end-of-line flyback time. Must stay below the dwell.
    fn set_flyback(&mut self, flyback: Duration) -> Result<()>;

    /// Whether the detector is inserted into the beam path.
    fn detector_inserted(&self) -> bool;
    /// Inserts or retracts the detector.
    fn set_detector_inserted(&mut self, inserted: bool) -> Result<()>;

    /// Whether the beam is blanked.
    fn beam_blanked(&self) -> bool;
    /// Blanks or unblanks the beam.
    fn set_beam_blanked(&mut self, blanked: bool) -> Result<()>;

    /// Reads a lens value.
    fn lens_value(&self, lens: Lens) -> i32;
    /// Writes a lens value.
    fn set_lens_value(&mut self, lens: Lens, value: i32) -> Result<()>;

    /// Reads the gun emission, in microamps.
    fn emission(&mut self) -> Result<f64>;

    /// Configures a digital I/O line. The line stays configured until
    /// disconnected.
    fn connect_ttl(&mut self, line: u8, config: TtlConfig) -> Result<()>;
    /// Releases a digital I/O line.
    fn disconnect_ttl(&mut self, line: u8) -> Result<()>;

    /// Uploads a custom scan pattern mask. Hardware without pattern support
    /// scans normally.
    fn set_scan_pattern(&mut self, _mask: &GreyImage) -> Result<()> {
        Ok(())
    }
}

/// Runs `body` with the scan area switched, restoring the previous area on
/// the way out.
pub fn with_scan_area<M, R>(
    mic: &mut M,
    area: ScanArea,
    body: impl FnOnce(&mut M) -> Result<R>,
) -> Result<R>
where
    M: Microscope + ?Sized,
{
    let previous = mic.scan_area();
    mic.set_scan_area(area)?;
    let out = body(mic);
    restore(out, mic.set_scan_area(previous), "scan area")
}

/// Runs `body` with the detector inserted or retracted, restoring the
/// previous state on the way out.
pub fn with_detector_inserted<M, R>(
    mic: &mut M,
    inserted: bool,
    body: impl FnOnce(&mut M) -> Result<R>,
) -> Result<R>
where
    M: Microscope + ?Sized,
{
    let previous = mic.detector_inserted();
    mic.set_detector_inserted(inserted)?;
    let out = body(mic);
    restore(out, mic.set_detector_inserted(previous), "detector")
}

/// Runs `body` with the beam blanked or unblanked, restoring the previous
/// state on the way out.
pub fn with_blanked<M, R>(
    mic: &mut M,
    blanked: bool,
    body: impl FnOnce(&mut M) -> Result<R>,
) -> Result<R>
where
    M: Microscope + ?Sized,
{
    let previous = mic.beam_blanked();
    mic.set_beam_blanked(blanked)?;
    let out = body(mic);
    restore(out, mic.set_beam_blanked(previous), "deflector")
}

/// Runs `body` with a lens moved to `value`, restoring the previous value on
/// the way out.
pub fn with_lens<M, R>(
    mic: &mut M,
    lens: Lens,
    value: i32,
    body: impl FnOnce(&mut M) -> Result<R>,
) -> Result<R>
where
    M: Microscope + ?Sized,
{
    let previous = mic.lens_value(lens);
    mic.set_lens_value(lens, value)?;
    let out = body(mic);
    restore(out, mic.set_lens_value(lens, previous), "lens")
}

/// Runs `body` with a TTL line connected, disconnecting it on the way out.
pub fn with_ttl<M, R>(
    mic: &mut M,
    line: u8,
    config: TtlConfig,
    body: impl FnOnce(&mut M) -> Result<R>,
) -> Result<R>
where
    M: Microscope + ?Sized,
{
    mic.connect_ttl(line, config)?;
    let out = body(mic);
    restore(out, mic.disconnect_ttl(line), "ttl")
}

fn restore<R>(out: Result<R>, restored: Result<()>, line: &str) -> Result<R> {
    match (out, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(err), Ok(())) => Err(err),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(restore_err)) => {
            warn!("failed to restore {line} after an error: {restore_err}");
            Err(err)
        }
    }
}

/// The process-wide microscope handle: a single owner guarded by a mutex,
/// cloned into every component that needs hardware access.
#[derive(Clone)]
pub struct SharedMicroscope {
    inner: Arc<Mutex<dyn Microscope>>,
}

impl SharedMicroscope {
    /// Wraps a driver in the shared handle.
    pub fn new(microscope: impl Microscope + 'static) -> SharedMicroscope {
        SharedMicroscope {
            inner: Arc::new(Mutex::new(microscope)),
        }
    }

    /// Acquires exclusive hardware access for the duration of the guard.
    pub fn lock(&self) -> MutexGuard<'_, dyn Microscope + 'static> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one operation under the hardware lock.
    pub fn with<R>(&self, body: impl FnOnce(&mut dyn Microscope) -> R) -> R {
        body(&mut *self.lock())
    }
}

/// External control over the simulated stage of an [`OfflineMicroscope`],
/// usable after the microscope has been moved behind the shared handle.
#[derive(Clone, Default)]
pub struct StageHandle {
    offset: Arc<Mutex<(i32, i32)>>,
}

impl StageHandle {
    /// Moves the simulated stage to an absolute offset.
    pub fn shift_to(&self, offset: (i32, i32)) {
        *self
            .offset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = offset;
    }

    fn offset(&self) -> (i32, i32) {
        *self
            .offset
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A file-backed simulator standing in for the real column.
///
/// Scans crop the configured area out of a survey bitmap, resampled
/// nearest-neighbour to the requested size, with a programmable stage-drift
/// offset. The emission reading decays by a fixed factor per sample so the
/// monitor's threshold logic can be exercised offline.
pub struct OfflineMicroscope {
    survey: GreyImage,
    scan_area: ScanArea,
    dwell: Duration,
    flyback: Duration,
    detector: bool,
    blanked: bool,
    lenses: HashMap<Lens, i32>,
    emission: f64,
    emission_decay: f64,
    stage: StageHandle,
    ttl: HashMap<u8, TtlConfig>,
}

impl OfflineMicroscope {
    /// Creates a simulator backed by a survey image.
    pub fn new(survey: GreyImage) -> OfflineMicroscope {
        let size = survey.size();
        OfflineMicroscope {
            survey,
            scan_area: ScanArea::full(size),
            dwell: Duration::from_micros(1),
            flyback: Duration::from_nanos(100),
            detector: false,
            blanked: true,
            lenses: HashMap::new(),
            emission: 4.5,
            emission_decay: 1.0,
            stage: StageHandle::default(),
            ttl: HashMap::new(),
        }
    }

    /// Loads the backing survey from an image file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<OfflineMicroscope> {
        Ok(OfflineMicroscope::new(GreyImage::open(path)?))
    }

    /// Simulates stage drift: subsequent scans read from a shifted survey.
    pub fn set_stage_offset(&mut self, offset: (i32, i32)) {
        self.stage.shift_to(offset);
    }

    /// A handle that keeps steering the simulated stage after the
    /// microscope moves behind [`SharedMicroscope`].
    pub fn stage_handle(&self) -> StageHandle {
        self.stage.clone()
    }

    /// Sets the emission reading and its per-sample decay factor.
    pub fn set_emission(&mut self, emission: f64, decay: f64) {
        self.emission = emission;
        self.emission_decay = decay;
    }
}

impl Microscope for OfflineMicroscope {
    fn scan(&mut self, want_image: bool) -> Result<GreyImage> {
        let (out_w, out_h) = self.scan_area.size();
        if !want_image {
            return Ok(GreyImage::blank(0, 0));
        }
        let (frame_w, frame_h) = self.scan_area.frame();
        let (left, top, rect_w, rect_h) = self.scan_area.bounds();
        let (survey_w, survey_h) = self.survey.size();
        // Frame coordinates map onto the survey by the resolution ratio.
        let sx = survey_w as f64 / frame_w as f64;
        let sy = survey_h as f64 / frame_h as f64;
        let stage = self.stage.offset();
        let mut out = GreyImage::blank(out_w, out_h);
        for y in 0..out_h {
            for x in 0..out_w {
                let fx = left as f64 + x as f64 * rect_w as f64 / out_w as f64;
                let fy = top as f64 + y as f64 * rect_h as f64 / out_h as f64;
                let px = (fx * sx) as i64 + stage.0 as i64;
                let py = (fy * sy) as i64 + stage.1 as i64;
                let value = if px >= 0
                    && py >= 0
                    && (px as u32) < survey_w
                    && (py as u32) < survey_h
                {
                    self.survey.get(px as u32, py as u32)
                } else {
                    0
                };
                out.set(x, y, value);
            }
        }
        Ok(out)
    }

    fn scan_area(&self) -> ScanArea {
        self.scan_area
    }

    fn set_scan_area(&mut self, area: ScanArea) -> Result<()> {
        let (left, top, w, h) = area.bounds();
        let (frame_w, frame_h) = area.frame();
        if w == 0 || h == 0 {
            return Err(Error::hardware("scan", "scan area must not be empty"));
        }
        if left + w > frame_w || top + h > frame_h {
            return Err(Error::hardware(
                "scan",
                format!("area {}x{}+{}+{} leaves the {}x{} frame", w, h, left, top, frame_w, frame_h),
            ));
        }
        self.scan_area = area;
        Ok(())
    }

    fn dwell_time(&self) -> Duration {
        self.dwell
    }

    fn set_dwell_time(&mut self, dwell: Duration) -> Result<()> {
        if dwell.is_zero() {
            return Err(Error::hardware("scan", "dwell time must be positive"));
        }
        self.dwell = dwell;
        Ok(())
    }

    fn flyback(&self) -> Duration {
        self.flyback
    }

    fn set_flyback(&mut self, flyback: Duration) -> Result<()> {
        if flyback >= self.dwell {
            return Err(Error::hardware(
                "scan",
                "flyback must stay below the dwell time",
            ));
        }
        self.flyback = flyback;
        Ok(())
    }

    fn detector_inserted(&self) -> bool {
        self.detector
    }

    fn set_detector_inserted(&mut self, inserted: bool) -> Result<()> {
        self.detector = inserted;
        Ok(())
    }

    fn beam_blanked(&self) -> bool {
        self.blanked
    }

    fn set_beam_blanked(&mut self, blanked: bool) -> Result<()> {
        self.blanked = blanked;
        Ok(())
    }

    fn lens_value(&self, lens: Lens) -> i32 {
        self.lenses.get(&lens).copied().unwrap_or(0x8000)
    }

    fn set_lens_value(&mut self, lens: Lens, value: i32) -> Result<()> {
        if !(0..=0xFFFF).contains(&value) {
            return Err(Error::hardware(
                "lens",
                format!("value {value:#x} outside the 16-bit DAC range"),
            ));
        }
        self.lenses.insert(lens, value);
        Ok(())
    }

    fn emission(&mut self) -> Result<f64> {
        self.emission *= self.emission_decay;
        Ok(self.emission)
    }

    fn connect_ttl(&mut self, line: u8, config: TtlConfig) -> Result<()> {
        if self.ttl.contains_key(&line) {
            return Err(Error::hardware(
                format!("ttl {line}"),
                "line already connected",
            ));
        }
        self.ttl.insert(line, config);
        Ok(())
    }

    fn disconnect_ttl(&mut self, line: u8) -> Result<()> {
        self.ttl
            .remove(&line)
            .map(|_| ())
            .ok_or_else(|| Error::hardware(format!("ttl {line}"), "line not connected"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_survey() -> GreyImage {
        let mut img = GreyImage::blank(64, 64);
        for y in 0..64 {
            for x in 0..64 {
                img.set(x, y, ((x * 2 + y) % 256) as u8);
            }
        }
        img
    }

    #[test]
    fn full_scan_reproduces_the_survey() {
        let survey = gradient_survey();
        let mut mic = OfflineMicroscope::new(survey.clone());
        let scanned = mic.scan(true).unwrap();
        assert_eq!(scanned, survey);
    }

    #[test]
    fn area_scan_crops_and_upsamples() {
        let survey = gradient_survey();
        let mut mic = OfflineMicroscope::new(survey.clone());
        // The same survey rectangle, addressed at 4x the resolution.
        mic.set_scan_area(ScanArea::area((256, 256), (64, 64), (32, 32)))
            .unwrap();
        let scanned = mic.scan(true).unwrap();
        assert_eq!(scanned.size(), (64, 64));
        assert_eq!(scanned.get(0, 0), survey.get(8, 8));
        assert_eq!(scanned.get(4, 0), survey.get(9, 8));
    }

    #[test]
    fn scan_areas_must_fit_the_frame() {
        let mut mic = OfflineMicroscope::new(gradient_survey());
        assert!(mic
            .set_scan_area(ScanArea::area((128, 128), (64, 64), (96, 0)))
            .is_err());
        assert!(mic
            .set_scan_area(ScanArea::area((128, 128), (0, 4), (0, 0)))
            .is_err());
    }

    #[test]
    fn stage_offset_shifts_the_image() {
        let mut survey = GreyImage::blank(64, 64);
        survey.set(30, 30, 255);
        let mut mic = OfflineMicroscope::new(survey);
        mic.set_stage_offset((1, 0));
        let scanned = mic.scan(true).unwrap();
        assert_eq!(scanned.get(29, 30), 255);
        assert_eq!(scanned.get(30, 30), 0);
    }

    #[test]
    fn scoped_guards_restore_on_success() {
        let mut mic = OfflineMicroscope::new(gradient_survey());
        mic.set_detector_inserted(false).unwrap();
        let out = with_detector_inserted(&mut mic, true, |m| {
            assert!(m.detector_inserted());
            Ok(7)
        })
        .unwrap();
        assert_eq!(out, 7);
        assert!(!mic.detector_inserted());

        let base = mic.lens_value(Lens::OlFine);
        with_lens(&mut mic, Lens::OlFine, 0x1234, |m| {
            assert_eq!(m.lens_value(Lens::OlFine), 0x1234);
            Ok(())
        })
        .unwrap();
        assert_eq!(mic.lens_value(Lens::OlFine), base);
    }

    #[test]
    fn scoped_guards_restore_on_error() {
        let mut mic = OfflineMicroscope::new(gradient_survey());
        let err = with_blanked(&mut mic, false, |_| -> Result<()> {
            Err(Error::hardware("scan", "simulated fault"))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Hardware { .. }));
        assert!(mic.beam_blanked());
    }

    #[test]
    fn ttl_lines_connect_once() {
        let config = TtlConfig {
            mode: TtlMode::SourceTimed,
            source: TtlSource::PixelClock(EdgeType::Rising),
            active: 1e-5,
            delay: 0.0,
        };
        let mut mic = OfflineMicroscope::new(gradient_survey());
        mic.connect_ttl(6, config).unwrap();
        assert!(mic.connect_ttl(6, config).is_err());
        mic.disconnect_ttl(6).unwrap();
        assert!(mic.disconnect_ttl(6).is_err());

        with_ttl(&mut mic, 6, config, |m| {
            assert!(m.connect_ttl(6, config).is_err());
            Ok(())
        })
        .unwrap();
        // The scoped connection released the line.
        mic.connect_ttl(6, config).unwrap();
    }

    #[test]
    fn emission_decays_per_sample() {
        let mut mic = OfflineMicroscope::new(gradient_survey());
        mic.set_emission(4.0, 0.5);
        assert_eq!(mic.emission().unwrap(), 2.0);
        assert_eq!(mic.emission().unwrap(), 1.0);
    }

    #[test]
    fn shared_handle_serialises_access() {
        let shared = SharedMicroscope::new(OfflineMicroscope::new(gradient_survey()));
        let clone = shared.clone();
        shared.with(|m| m.set_detector_inserted(true)).unwrap();
        assert!(clone.with(|m| m.detector_inserted()));
    }
}
