//! The scan scheduler: pauseable, stoppable iteration over the exported
//! regions, interleaving the correction routines and driving the hardware.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};

use crate::corrections::{Correction, CorrectionOutcome};
use crate::error::{Error, Result};
use crate::hardware::merlin::{BitDepth, FourDCamera, MerlinAcquisition};
use crate::hardware::{
    with_blanked, with_detector_inserted, with_ttl, EdgeType, ScanArea, SharedMicroscope,
    TtlConfig, TtlMode, TtlSource,
};
use crate::image::{Rgb, RgbImage};
use crate::job::{JobHandle, Status};
use crate::output::{self, StageImages, Stages};
use crate::regions::ScanRegion;

/// The TTL line the Merlin trigger rides on.
const MERLIN_TTL_LINE: u8 = 6;

/// Parameters of one search run.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Pixel size of each acquired square.
    pub scan_size: u32,
    /// Per-pixel dwell.
    pub dwell: Duration,
    /// Counter depth for 4D acquisitions.
    pub bit_depth: BitDepth,
    /// Directory the region files are written into.
    pub save_path: PathBuf,
    /// Which pipeline stages are saved alongside each region.
    pub stages: Stages,
    /// Whether to record 4D datasets through the Merlin server.
    pub merlin: bool,
    /// The full acquisition resolution regions are rescaled to.
    pub resolution: u32,
    /// The survey resolution the regions were exported in.
    pub survey_size: u32,
    /// Fill colour for the live region marker.
    pub marker_colour: Rgb,
}

/// The scheduler. Owns the exported region list for the duration of a run,
/// its progress counter and the marker canvas.
pub struct Scheduler {
    config: SearchConfig,
    regions: Vec<ScanRegion>,
    progress: usize,
    handle: JobHandle,
    corrections: Vec<Box<dyn Correction>>,
    camera: Option<Box<dyn FourDCamera>>,
    base_canvas: RgbImage,
    canvas: RgbImage,
}

impl Scheduler {
    /// Creates a scheduler drawing its markers over the given survey canvas.
    pub fn new(config: SearchConfig, survey_canvas: RgbImage) -> Scheduler {
        Scheduler {
            config,
            regions: Vec::new(),
            progress: 0,
            handle: JobHandle::new(),
            corrections: Vec::new(),
            camera: None,
            canvas: survey_canvas.clone(),
            base_canvas: survey_canvas,
        }
    }

    /// The status handle callers pause, resume and stop the run through.
    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    /// Registers a correction queried before every scan.
    pub fn add_correction(&mut self, correction: Box<dyn Correction>) {
        self.corrections.push(correction);
    }

    /// Attaches the 4D camera server used when `merlin` is set.
    pub fn set_camera(&mut self, camera: Box<dyn FourDCamera>) {
        self.camera = Some(camera);
    }

    /// Loads the exported region list and resets progress.
    pub fn load(&mut self, regions: &[ScanRegion]) -> Result<()> {
        if regions.is_empty() {
            return Err(Error::Staging {
                operation: "grid search",
                requires: "exporting tightened grids",
            });
        }
        self.regions = regions.to_vec();
        self.progress = 0;
        self.canvas = self.base_canvas.clone();
        Ok(())
    }

    /// The regions of the current run, including any drift shifts applied.
    pub fn regions(&self) -> &[ScanRegion] {
        &self.regions
    }

    /// Index of the next region to scan.
    #[inline]
    pub fn progress(&self) -> usize {
        self.progress
    }

    /// The marker canvas as of the last step.
    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    /// Shifts every pending region and disables any that leave the survey.
    fn apply_shift(&mut self, from: usize, dx: i32, dy: i32) {
        debug!("shifting all pending squares by ({dx}, {dy})");
        let limit = self.config.survey_size;
        for region in &mut self.regions[from..] {
            region.shift((dx, dy));
            if !region.in_bounds(limit) {
                region.set_disabled(true);
            }
        }
    }

    /// Runs the search from the saved progress point.
    ///
    /// Returns the status the run ended in: `Paused` preserves progress for
    /// a later call, `Dead` discards it and restores the canvas, `Finished`
    /// means every region was visited. A hardware or output error kills the
    /// run and surfaces to the caller.
    pub fn run(&mut self, mic: &SharedMicroscope, images: &StageImages) -> Result<Status> {
        if self.regions.is_empty() {
            return Err(Error::Staging {
                operation: "grid search",
                requires: "exporting tightened grids",
            });
        }
        if self.handle.status() == Status::Finished {
            self.handle.resume();
        }
        while self.progress < self.regions.len() {
            let index = self.progress;
            match self.handle.status() {
                Status::Paused => {
                    info!("search paused at region {index}");
                    return Ok(Status::Paused);
                }
                Status::Dead => {
                    self.progress = 0;
                    self.canvas = self.base_canvas.clone();
                    return Ok(Status::Dead);
                }
                _ => {}
            }
            if self.regions[index].disabled() {
                self.progress += 1;
                continue;
            }

            // Corrections run serialized with scanning; a drift report moves
            // every pending region before it is scanned.
            for c in 0..self.corrections.len() {
                if !self.corrections[c].query() {
                    continue;
                }
                debug!("running the {} correction", self.corrections[c].name());
                match self.corrections[c].run(mic) {
                    Ok(CorrectionOutcome::Shift { dx, dy }) => self.apply_shift(index, dx, dy),
                    Ok(_) => {}
                    Err(err) => {
                        self.handle.stop();
                        self.canvas = self.base_canvas.clone();
                        return Err(err);
                    }
                }
            }
            let region = self.regions[index];
            if region.disabled() {
                self.progress += 1;
                continue;
            }

            // The live canvas shows the current square filled; the base
            // keeps an outline of everything already scanned.
            self.canvas = self.base_canvas.clone();
            region.draw(&mut self.canvas, self.config.marker_colour, true);
            region.draw(&mut self.base_canvas, self.config.marker_colour, false);

            if let Err(err) = self.scan_step(mic, &region, images) {
                self.handle.stop();
                self.canvas = self.base_canvas.clone();
                return Err(err);
            }

            for correction in &mut self.corrections {
                correction.scan_performed();
            }
            self.progress += 1;
        }
        self.canvas = self.base_canvas.clone();
        self.progress = 0;
        self.handle.finish();
        Ok(Status::Finished)
    }

    fn scan_step(
        &mut self,
        mic: &SharedMicroscope,
        region: &ScanRegion,
        images: &StageImages,
    ) -> Result<()> {
        let config = self.config.clone();
        let scaled = region.at_resolution(config.resolution);
        let (left, top) = scaled.top_left();
        let area = ScanArea::area(
            (config.resolution, config.resolution),
            (config.scan_size, config.scan_size),
            (left.max(0) as u32, top.max(0) as u32),
        );
        std::fs::create_dir_all(&config.save_path)?;
        let stamp = output::stamp();
        // Time stamps only resolve to the second; keep regions scanned
        // within the same second apart.
        let mut path = config.save_path.join(format!("{stamp}.hdf5"));
        let mut sequence = 1;
        while path.exists() {
            path = config.save_path.join(format!("{stamp}_{sequence:03}.hdf5"));
            sequence += 1;
        }
        info!("scanning {region} -> {}", path.display());

        if config.merlin {
            let camera = self.camera.as_mut().ok_or(Error::Staging {
                operation: "merlin scan",
                requires: "connecting the camera server",
            })?;
            let acquisition = MerlinAcquisition {
                dwell_usec: config.dwell.as_secs_f64() * 1e6,
                scan_px: config.scan_size,
                bit_depth: config.bit_depth,
                directory: config.save_path.clone(),
                stem: stamp,
            };
            camera.configure(&acquisition)?;
            let trigger = TtlConfig {
                mode: TtlMode::SourceTimed,
                source: TtlSource::PixelClock(EdgeType::Rising),
                active: 1e-5,
                delay: 0.0,
            };
            mic.with(|m| {
                m.set_scan_area(area)?;
                m.set_dwell_time(config.dwell)?;
                with_ttl(m, MERLIN_TTL_LINE, trigger, |m| {
                    with_blanked(m, false, |m| {
                        camera.start_record()?;
                        m.scan(false)
                    })
                })
            })?;
            // The raw 4D data lands on the Merlin server; the local file
            // carries the coordinates and acquisition parameters.
            output::save_region(
                &path,
                region,
                None,
                config.stages,
                images,
                Some(&acquisition),
            )
        } else {
            let captured = mic.with(|m| {
                m.set_scan_area(area)?;
                m.set_dwell_time(config.dwell)?;
                with_blanked(m, false, |m| {
                    with_detector_inserted(m, true, |m| m.scan(true))
                })
            })?;
            output::save_region(&path, &scaled, Some(&captured), config.stages, images, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::CorrectionCounter;
    use crate::error::Result;
    use crate::hardware::{Lens, Microscope};
    use crate::image::GreyImage;
    use crate::Match;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A column that logs every scan and can pause a job after a set count.
    struct LoggingColumn {
        log: Arc<Mutex<Vec<usize>>>,
        scans: Arc<AtomicUsize>,
        pause_after: Option<(usize, Arc<Mutex<Option<JobHandle>>>)>,
        fail_on: Option<usize>,
        area: ScanArea,
        dwell: Duration,
        flyback: Duration,
        detector: bool,
        blanked: bool,
    }

    impl LoggingColumn {
        fn new(log: Arc<Mutex<Vec<usize>>>) -> LoggingColumn {
            LoggingColumn {
                log,
                scans: Arc::new(AtomicUsize::new(0)),
                pause_after: None,
                fail_on: None,
                area: ScanArea::full((64, 64)),
                dwell: Duration::from_micros(1),
                flyback: Duration::from_nanos(1),
                detector: false,
                blanked: true,
            }
        }
    }

    impl Microscope for LoggingColumn {
        fn scan(&mut self, want_image: bool) -> Result<GreyImage> {
            let count = self.scans.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_on) = self.fail_on {
                if count == fail_on {
                    return Err(Error::hardware("scan", "simulated fault"));
                }
            }
            self.log.lock().unwrap().push(count);
            if let Some((after, handle)) = &self.pause_after {
                if count + 1 == *after {
                    if let Some(handle) = handle.lock().unwrap().as_ref() {
                        handle.pause();
                    }
                }
            }
            let (w, h) = self.area.size();
            Ok(if want_image {
                GreyImage::blank(w, h)
            } else {
                GreyImage::blank(0, 0)
            })
        }

        fn scan_area(&self) -> ScanArea {
            self.area
        }

        fn set_scan_area(&mut self, area: ScanArea) -> Result<()> {
            self.area = area;
            Ok(())
        }

        fn dwell_time(&self) -> Duration {
            self.dwell
        }

        fn set_dwell_time(&mut self, dwell: Duration) -> Result<()> {
            self.dwell = dwell;
            Ok(())
        }

        fn flyback(&self) -> Duration {
            self.flyback
        }

        fn set_flyback(&mut self, flyback: Duration) -> Result<()> {
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

        fn lens_value(&self, _lens: Lens) -> i32 {
            0x8000
        }

        fn set_lens_value(&mut self, _lens: Lens, _value: i32) -> Result<()> {
            Ok(())
        }

        fn emission(&mut self) -> Result<f64> {
            Ok(4.5)
        }

        fn connect_ttl(&mut self, _line: u8, _config: TtlConfig) -> Result<()> {
            Ok(())
        }

        fn disconnect_ttl(&mut self, _line: u8) -> Result<()> {
            Ok(())
        }
    }

    fn five_regions() -> Vec<ScanRegion> {
        (0..5)
            .map(|i| ScanRegion::new((i * 32, 0), 32, 512))
            .collect()
    }

    fn test_config(dir: &std::path::Path) -> SearchConfig {
        SearchConfig {
            scan_size: 64,
            dwell: Duration::from_micros(2),
            bit_depth: BitDepth::Twelve,
            save_path: dir.to_path_buf(),
            stages: Stages::NONE,
            merlin: false,
            resolution: 4096,
            survey_size: 512,
            marker_colour: Rgb::new(255, 0, 255),
        }
    }

    fn scheduler_with_column(
        dir: &std::path::Path,
        column: LoggingColumn,
    ) -> (Scheduler, SharedMicroscope) {
        let mut scheduler = Scheduler::new(test_config(dir), RgbImage::blank(512, 512));
        scheduler.load(&five_regions()).unwrap();
        (scheduler, SharedMicroscope::new(column))
    }

    #[test]
    fn running_without_regions_is_a_staging_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = Scheduler::new(test_config(dir.path()), RgbImage::blank(512, 512));
        assert!(scheduler.load(&[]).is_err());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mic = SharedMicroscope::new(LoggingColumn::new(log));
        assert!(matches!(
            scheduler.run(&mic, &StageImages::default()),
            Err(Error::Staging { .. })
        ));
    }

    #[test]
    fn a_full_run_scans_every_region_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut scheduler, mic) =
            scheduler_with_column(dir.path(), LoggingColumn::new(log.clone()));
        let status = scheduler.run(&mic, &StageImages::default()).unwrap();
        assert_eq!(status, Status::Finished);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        // One file per region landed on disk.
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 5);
    }

    #[test]
    fn pause_preserves_progress_and_resume_completes() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle_cell = Arc::new(Mutex::new(None));
        let mut column = LoggingColumn::new(log.clone());
        column.pause_after = Some((3, handle_cell.clone()));
        let (mut scheduler, mic) = scheduler_with_column(dir.path(), column);
        *handle_cell.lock().unwrap() = Some(scheduler.handle());

        let status = scheduler.run(&mic, &StageImages::default()).unwrap();
        assert_eq!(status, Status::Paused);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(scheduler.progress(), 3);

        scheduler.handle().resume();
        let status = scheduler.run(&mic, &StageImages::default()).unwrap();
        assert_eq!(status, Status::Finished);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn stopping_discards_progress_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut scheduler, mic) =
            scheduler_with_column(dir.path(), LoggingColumn::new(log.clone()));
        let handle = scheduler.handle();
        handle.stop();
        assert_eq!(
            scheduler.run(&mic, &StageImages::default()).unwrap(),
            Status::Dead
        );
        assert_eq!(scheduler.progress(), 0);
        assert!(log.lock().unwrap().is_empty());
        handle.stop();
        assert_eq!(
            scheduler.run(&mic, &StageImages::default()).unwrap(),
            Status::Dead
        );
        assert_eq!(scheduler.progress(), 0);
    }

    #[test]
    fn disabled_regions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(test_config(dir.path()), RgbImage::blank(512, 512));
        let mut regions = five_regions();
        regions[1].set_disabled(true);
        regions[3].set_disabled(true);
        scheduler.load(&regions).unwrap();
        let mic = SharedMicroscope::new(LoggingColumn::new(log.clone()));
        let status = scheduler.run(&mic, &StageImages::default()).unwrap();
        assert_eq!(status, Status::Finished);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn a_failing_scan_kills_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut column = LoggingColumn::new(log.clone());
        column.fail_on = Some(2);
        let (mut scheduler, mic) = scheduler_with_column(dir.path(), column);
        let handle = scheduler.handle();
        let err = scheduler.run(&mic, &StageImages::default()).unwrap_err();
        assert!(matches!(err, Error::Hardware { .. }));
        assert_eq!(handle.status(), Status::Dead);
    }

    /// A correction that reports a fixed shift on its first query.
    struct ShiftOnce {
        counter: CorrectionCounter,
        shift: (i32, i32),
        fired: bool,
    }

    impl Correction for ShiftOnce {
        fn name(&self) -> &'static str {
            "test-shift"
        }

        fn query(&mut self) -> bool {
            !self.fired && self.counter.needs_reset()
        }

        fn run(&mut self, _mic: &SharedMicroscope) -> Result<CorrectionOutcome> {
            self.fired = true;
            Ok(CorrectionOutcome::Shift {
                dx: self.shift.0,
                dy: self.shift.1,
            })
        }

        fn scan_performed(&mut self) {
            self.counter.increase(1.0);
        }
    }

    #[test]
    fn drift_shifts_move_pending_regions_and_disable_strays() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut scheduler, mic) =
            scheduler_with_column(dir.path(), LoggingColumn::new(log.clone()));
        // Fires before the third region and pushes everything right far
        // enough that the last region leaves the survey.
        scheduler.add_correction(Box::new(ShiftOnce {
            counter: CorrectionCounter::new(1.0, Match::NoHigher, 0.0),
            shift: (360, 0),
            fired: false,
        }));
        let status = scheduler.run(&mic, &StageImages::default()).unwrap();
        assert_eq!(status, Status::Finished);
        // Regions 0 and 1 scanned before the shift; 2 and 3 were moved but
        // stayed inside; 4 landed outside the survey and was dropped.
        assert_eq!(log.lock().unwrap().len(), 4);
        assert!(scheduler.regions()[4].disabled());
        assert_eq!(scheduler.regions()[2].top_left(), (424, 0));
    }

    #[test]
    fn merlin_runs_need_a_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.merlin = true;
        let mut scheduler = Scheduler::new(config, RgbImage::blank(512, 512));
        scheduler.load(&five_regions()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mic = SharedMicroscope::new(LoggingColumn::new(log));
        assert!(matches!(
            scheduler.run(&mic, &StageImages::default()),
            Err(Error::Staging { .. })
        ));
    }

    /// A camera server that records the calls it receives.
    struct RecordingCamera {
        configured: Arc<AtomicUsize>,
        armed: Arc<AtomicUsize>,
    }

    impl FourDCamera for RecordingCamera {
        fn configure(&mut self, acquisition: &MerlinAcquisition) -> Result<()> {
            assert_eq!(acquisition.scan_px, 64);
            self.configured.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn start_record(&mut self) -> Result<()> {
            self.armed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn merlin_runs_arm_the_camera_for_every_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.merlin = true;
        let mut scheduler = Scheduler::new(config, RgbImage::blank(512, 512));
        scheduler.load(&five_regions()).unwrap();
        let configured = Arc::new(AtomicUsize::new(0));
        let armed = Arc::new(AtomicUsize::new(0));
        scheduler.set_camera(Box::new(RecordingCamera {
            configured: configured.clone(),
            armed: armed.clone(),
        }));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mic = SharedMicroscope::new(LoggingColumn::new(log));
        let status = scheduler.run(&mic, &StageImages::default()).unwrap();
        assert_eq!(status, Status::Finished);
        assert_eq!(configured.load(Ordering::SeqCst), 5);
        assert_eq!(armed.load(Ordering::SeqCst), 5);
    }
}
