//! The headless automation surface: the keyword entry points the embedded
//! script interface binds to, wrapped around one acquisition session.
//!
//! The scripting language itself lives outside the core; what it needs from
//! us is a fixed set of keywords (`Scan`, `Cluster`, `Mark`, `Tighten`,
//! `Search`) mapped onto scheduler-visible operations, and named variables
//! (`minima`, `epsilon`, `scan_size`, ...) bound to the same validated
//! setters the configuration file uses.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::info;
use serde::Serialize;
use serde_json::Value;

use crate::cluster::{extract_clusters, filter_by_size, render_clusters, Metric};
use crate::config::{Config, PatternKind, Setting};
use crate::corrections::drift::DriftCorrector;
use crate::corrections::emission::EmissionMonitor;
use crate::corrections::focus::AutoFocus;
use crate::error::{Error, Result};
use crate::hardware::merlin::{BitDepth, FourDCamera};
use crate::hardware::{ScanArea, SharedMicroscope};
use crate::image::{GreyImage, RgbImage};
use crate::job::{JobHandle, Status};
use crate::manager::{ClusterSource, RegionManager};
use crate::output::{self, StageImages};
use crate::pattern::{
    Corner, Design, GridDesign, GridOrder, Orientation, Raster, RandomDesign, RandomKind, Snake,
    Spiral, Traversal, Winding,
};
use crate::pipeline::{Operator, Pipeline};
use crate::scheduler::{Scheduler, SearchConfig};

/// The control keywords of the automation interface. Parsing is
/// case-sensitive: the keywords are compile-time strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// Acquire a fresh survey image.
    Scan,
    /// Run the pipeline and segment the result into clusters.
    Cluster,
    /// Mark every cluster with a grid.
    Mark,
    /// Tighten every grid and export the region list.
    Tighten,
    /// Scan every exported region at full resolution.
    Search,
}

impl FromStr for Keyword {
    type Err = Error;

    fn from_str(word: &str) -> Result<Keyword> {
        match word {
            "Scan" => Ok(Keyword::Scan),
            "Cluster" => Ok(Keyword::Cluster),
            "Mark" => Ok(Keyword::Mark),
            "Tighten" => Ok(Keyword::Tighten),
            "Search" => Ok(Keyword::Search),
            other => Err(Error::validation(
                "keyword",
                format!("unknown keyword {other:?}"),
            )),
        }
    }
}

/// What one `Search` run did, serialisable for script output.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// How many regions were loaded.
    pub regions: usize,
    /// How many regions were actually scanned.
    pub scanned: usize,
    /// The status the run ended in.
    pub status: String,
    /// Where the region files landed.
    pub save_path: String,
}

/// Builds the configured per-square scan pattern.
fn build_design(
    kind: PatternKind,
    size: u32,
    skip: u32,
    coverage: f64,
) -> Result<Box<dyn Design>> {
    let square = (size, size);
    let coverage = (coverage, coverage);
    Ok(match kind {
        PatternKind::Raster => Box::new(Raster::new(
            square,
            skip,
            Corner::TopLeft,
            Orientation::AlongX,
            coverage,
        )?),
        PatternKind::Snake => Box::new(Snake::new(
            square,
            skip,
            Corner::TopLeft,
            Orientation::AlongX,
            coverage,
        )?),
        PatternKind::Spiral => Box::new(Spiral::new(
            square,
            skip,
            Corner::TopLeft,
            Winding::OutsideIn,
            coverage,
        )?),
        PatternKind::Grid => Box::new(GridDesign::new(
            square,
            (skip + 1, skip + 1),
            (0, 0),
            GridOrder {
                major: Traversal::RowMajor,
                start: Corner::TopLeft,
            },
            coverage,
        )?),
        PatternKind::Random => Box::new(RandomDesign::new(
            square,
            RandomKind::Uniform {
                low: 0.0,
                high: size as f64,
            },
            (size as usize * size as usize) / 10,
            coverage,
            size as u64,
        )?),
    })
}

/// One acquisition session: the survey image, the processing pipeline, the
/// cluster manager and the search scheduler, driven by keywords.
pub struct Session {
    config: Config,
    mic: SharedMicroscope,
    pipeline: Pipeline,
    manager: RegionManager,
    survey: Option<GreyImage>,
    processed: Option<GreyImage>,
    clusters_image: Option<RgbImage>,
    drift: Option<DriftCorrector>,
    focus: Option<AutoFocus>,
    emission: Option<EmissionMonitor>,
    camera: Option<Box<dyn FourDCamera>>,
    last_search: Option<RunSummary>,
}

impl Session {
    /// Creates a session from a validated configuration and the shared
    /// hardware handle.
    pub fn new(config: Config, mic: SharedMicroscope) -> Result<Session> {
        config.validate()?;
        let pipeline = Session::build_pipeline(&config)?;
        let manager = RegionManager::new(config.manager_config())?;
        Ok(Session {
            config,
            mic,
            pipeline,
            manager,
            survey: None,
            processed: None,
            clusters_image: None,
            drift: None,
            focus: None,
            emission: None,
            camera: None,
            last_search: None,
        })
    }

    fn build_pipeline(config: &Config) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(config.minima, config.maxima)?;
        pipeline.set_inverted(config.threshold_inversion);
        pipeline.push(Operator::Threshold);
        Ok(pipeline)
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The processing pipeline; stages can be added or reordered before the
    /// next `Cluster`.
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// The cluster manager.
    pub fn manager(&self) -> &RegionManager {
        &self.manager
    }

    /// The most recent survey scan.
    pub fn survey(&self) -> Option<&GreyImage> {
        self.survey.as_ref()
    }

    /// The most recent pipeline output.
    pub fn processed(&self) -> Option<&GreyImage> {
        self.processed.as_ref()
    }

    /// The summary of the last `Search`, if one completed.
    pub fn last_search(&self) -> Option<&RunSummary> {
        self.last_search.as_ref()
    }

    /// Applies one named setting, the `settings_changed` event path. The
    /// change is validated against the whole configuration and rejected
    /// wholesale when it does not fit, leaving the last valid value.
    pub fn set(&mut self, name: &str, value: &Value) -> Result<()> {
        let setting: Setting = name.parse()?;
        let mut next = self.config.clone();
        setting.apply(&mut next, value)?;
        next.validate()?;
        self.config = next;
        self.pipeline.set_bounds(self.config.minima, self.config.maxima)?;
        self.pipeline.set_inverted(self.config.threshold_inversion);
        self.manager.set_config(self.config.manager_config())?;
        Ok(())
    }

    /// Enables the autofocus correction for subsequent searches.
    pub fn enable_autofocus(&mut self) {
        self.focus = Some(AutoFocus::new(
            self.config.focus_config(),
            (self.config.size, self.config.size),
        ));
    }

    /// Starts the background emission monitor and registers it with
    /// subsequent searches.
    pub fn monitor_emission(&mut self) {
        self.emission = Some(EmissionMonitor::spawn(
            self.mic.clone(),
            self.config.emission_config(),
        ));
    }

    /// Exports the drift reference region `[tl, br)` and enables the drift
    /// correction for subsequent searches.
    pub fn set_drift_reference(&mut self, tl: (u32, u32), br: (u32, u32)) -> Result<()> {
        let mut drift = DriftCorrector::new(self.config.drift_config(), self.config.size);
        drift.set_reference(&self.mic, tl, br)?;
        self.drift = Some(drift);
        Ok(())
    }

    /// Attaches the 4D camera server used when `merlin` is configured.
    pub fn set_camera(&mut self, camera: Box<dyn FourDCamera>) {
        self.camera = Some(camera);
    }

    /// Dispatches one keyword.
    pub fn run_keyword(&mut self, keyword: Keyword) -> Result<()> {
        info!("keyword {keyword:?}");
        match keyword {
            Keyword::Scan => self.scan(),
            Keyword::Cluster => self.cluster(),
            Keyword::Mark => self.mark(),
            Keyword::Tighten => self.tighten(),
            Keyword::Search => self.search(),
        }
    }

    /// Acquires a fresh survey image and invalidates everything downstream.
    pub fn scan(&mut self) -> Result<()> {
        let size = self.config.size;
        let dwell = Duration::from_secs_f64(self.config.init_dwell);
        let survey = self.mic.with(|m| {
            m.set_scan_area(ScanArea::full((size, size)))?;
            m.set_dwell_time(dwell)?;
            m.scan(true)
        })?;
        self.survey = Some(survey.norm());
        self.processed = None;
        self.clusters_image = None;
        Ok(())
    }

    /// Runs the pipeline over the survey and segments the binary result.
    pub fn cluster(&mut self) -> Result<()> {
        let survey = self.survey.as_ref().ok_or(Error::Staging {
            operation: "segmentation",
            requires: "scanning survey image",
        })?;
        let processed = self.pipeline.run(survey)?;
        let clusters = extract_clusters(
            &processed,
            self.config.epsilon,
            self.config.minimum_samples,
            Metric::Euclidean,
        )?;
        let clusters = filter_by_size(clusters, self.config.cluster_size, self.config.size_match);
        self.clusters_image = Some(render_clusters(&clusters, processed.size()));
        self.manager
            .choose_source(ClusterSource::Segmented, clusters);
        self.processed = Some(processed);
        Ok(())
    }

    /// Marks every cluster that divides cleanly.
    pub fn mark(&mut self) -> Result<()> {
        let marked = self.manager.mark_all()?;
        info!("marked {marked} clusters");
        Ok(())
    }

    /// Tightens every grid and exports the flattened region list.
    pub fn tighten(&mut self) -> Result<()> {
        let handle = JobHandle::new();
        self.manager
            .tighten_all(self.config.match_fraction, &handle)?;
        let exported = self.manager.export()?.len();
        info!("exported {exported} regions");
        Ok(())
    }

    /// Scans every exported region at the acquisition resolution.
    pub fn search(&mut self) -> Result<()> {
        let survey = self.survey.as_ref().ok_or(Error::Staging {
            operation: "grid search",
            requires: "scanning survey image",
        })?;
        let regions = self.manager.exported().to_vec();
        let search = SearchConfig {
            scan_size: self.config.scan_size,
            dwell: Duration::from_secs_f64(self.config.init_dwell),
            bit_depth: BitDepth::from_bits(self.config.bit_depth)?,
            save_path: PathBuf::from(&self.config.save_path),
            stages: self.config.checkpoints,
            merlin: self.config.merlin,
            resolution: self.config.resolution,
            survey_size: self.config.size,
            marker_colour: self.config.marker_colour,
        };
        let save_path = search.save_path.display().to_string();

        // The per-square pattern rides along as a mask upload; generators
        // without pattern support scan normally.
        let design = build_design(
            self.config.pattern.kind,
            self.config.scan_size,
            self.config.pattern.skip,
            self.config.pattern.coverage,
        )?;
        self.mic.with(|m| m.set_scan_pattern(&design.draw()))?;

        let mut marker = survey.promote();
        for region in &regions {
            region.draw(&mut marker, self.config.marker_colour, false);
        }
        std::fs::create_dir_all(&search.save_path)?;
        output::write_region_manifest(&search.save_path.join("regions.csv"), &regions)?;
        let mut scheduler = Scheduler::new(search, survey.promote());
        scheduler.load(&regions)?;
        if let Some(drift) = self.drift.take() {
            scheduler.add_correction(Box::new(drift));
        }
        if let Some(focus) = self.focus.take() {
            scheduler.add_correction(Box::new(focus));
        }
        if let Some(emission) = self.emission.take() {
            scheduler.add_correction(Box::new(emission));
        }
        if let Some(camera) = self.camera.take() {
            scheduler.set_camera(camera);
        }

        let images = StageImages {
            survey: self.survey.as_ref(),
            processed: self.processed.as_ref(),
            clusters: self.clusters_image.as_ref(),
            marker: Some(&marker),
        };
        let status = scheduler.run(&self.mic, &images)?;
        let scanned = match status {
            Status::Finished => scheduler
                .regions()
                .iter()
                .filter(|region| !region.disabled())
                .count(),
            _ => scheduler.progress(),
        };
        self.last_search = Some(RunSummary {
            regions: regions.len(),
            scanned,
            status: format!("{status:?}"),
            save_path,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::OfflineMicroscope;
    use crate::output::Stages;

    fn asset(name: &str) -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("assets")
            .join(name)
    }

    fn offline_session(config: Config) -> Session {
        let mic = OfflineMicroscope::from_file(asset("img_3.bmp")).unwrap();
        Session::new(config, SharedMicroscope::new(mic)).unwrap()
    }

    #[test]
    fn keywords_parse_exactly() {
        assert_eq!("Scan".parse::<Keyword>().unwrap(), Keyword::Scan);
        assert_eq!("Cluster".parse::<Keyword>().unwrap(), Keyword::Cluster);
        assert_eq!("Mark".parse::<Keyword>().unwrap(), Keyword::Mark);
        assert_eq!("Tighten".parse::<Keyword>().unwrap(), Keyword::Tighten);
        assert_eq!("Search".parse::<Keyword>().unwrap(), Keyword::Search);
        assert!("scan".parse::<Keyword>().is_err());
        assert!("Flash".parse::<Keyword>().is_err());
    }

    #[test]
    fn keywords_enforce_staging_order() {
        let mut session = offline_session(Config::default());
        assert!(matches!(
            session.run_keyword(Keyword::Cluster),
            Err(Error::Staging { .. })
        ));
        assert!(matches!(
            session.run_keyword(Keyword::Mark),
            Err(Error::Staging { .. })
        ));
        assert!(matches!(
            session.run_keyword(Keyword::Search),
            Err(Error::Staging { .. })
        ));
    }

    #[test]
    fn settings_bind_by_name_and_revert_on_failure() {
        let mut session = offline_session(Config::default());
        session.set("minima", &serde_json::json!(25)).unwrap();
        assert_eq!(session.config().minima, 25);
        assert_eq!(session.pipeline_mut().minima(), 25);
        // 90 would cross the maxima; the last valid value stays.
        assert!(session.set("minima", &serde_json::json!(90)).is_err());
        assert_eq!(session.config().minima, 25);
        assert!(session.set("not_a_setting", &serde_json::json!(1)).is_err());
    }

    #[test]
    fn survey_to_export_pipeline_finds_regions() {
        let mut session = offline_session(Config::default());
        session.run_keyword(Keyword::Scan).unwrap();
        assert_eq!(session.survey().unwrap().size(), (512, 512));
        session.run_keyword(Keyword::Cluster).unwrap();
        assert!(!session.manager().clusters().is_empty());
        session.run_keyword(Keyword::Mark).unwrap();
        session.run_keyword(Keyword::Tighten).unwrap();
        let exported = session.manager().exported();
        assert!(!exported.is_empty());
        for region in exported {
            let (left, top) = region.top_left();
            let (right, bottom) = region.bottom_right();
            assert!(left >= 0 && top >= 0);
            assert!(right <= 512 && bottom <= 512);
            assert_eq!(region.size(), 32);
        }
    }

    #[test]
    fn a_full_session_scans_and_saves_every_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.save_path = dir.path().display().to_string();
        config.checkpoints = Stages::SURVEY | Stages::MARKER;
        let mut session = offline_session(config);
        for keyword in ["Scan", "Cluster", "Mark", "Tighten", "Search"] {
            session.run_keyword(keyword.parse().unwrap()).unwrap();
        }
        let summary = session.last_search().unwrap();
        assert_eq!(summary.status, "Finished");
        assert!(summary.scanned > 0);
        assert_eq!(summary.regions, summary.scanned);
        // One file per region plus the manifest.
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, summary.scanned + 1);
        assert!(dir.path().join("regions.csv").exists());
    }
}
