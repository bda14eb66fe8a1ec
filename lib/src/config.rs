//! JSON configuration: one file at a known path, every key validated,
//! unknown keys dropped, invalid values fatal at start-up.
//!
//! Runtime `settings_changed` events reuse the same path: a `(name, value)`
//! pair resolves to a [`Setting`] and is applied through the same validated
//! setter, so there is exactly one way a value gets into the system.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::corrections::drift::{DriftConfig, Window};
use crate::corrections::emission::EmissionConfig;
use crate::corrections::focus::FocusConfig;
use crate::error::{Error, Result};
use crate::hardware::merlin::BitDepth;
use crate::image::Rgb;
use crate::manager::{pitch_for, ManagerConfig};
use crate::output::Stages;
use crate::Match;

/// The survey sizes the scan generator supports.
pub const SURVEY_SIZES: [u32; 4] = [256, 512, 1024, 2048];
/// The per-square acquisition sizes.
pub const SCAN_SIZES: [u32; 4] = [64, 128, 256, 512];
/// The upscaled resolutions available for acquisition and drift references.
pub const RESOLUTIONS: [u32; 5] = [1024, 2048, 4096, 8192, 16384];

/// The scan pattern applied inside each acquired square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Parallel lines with diagonal flyback.
    Raster,
    /// Alternating-direction lines.
    Snake,
    /// A square spiral.
    Spiral,
    /// Discrete lattice points.
    Grid,
    /// Random sparse sampling.
    Random,
}

impl FromStr for PatternKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<PatternKind> {
        match name {
            "raster" => Ok(PatternKind::Raster),
            "snake" => Ok(PatternKind::Snake),
            "spiral" => Ok(PatternKind::Spiral),
            "grid" => Ok(PatternKind::Grid),
            "random" => Ok(PatternKind::Random),
            other => Err(Error::validation(
                "pattern",
                format!("unknown pattern kind {other:?}"),
            )),
        }
    }
}

/// Defaults for the scan pattern inside each square.
#[derive(Debug, Clone, Copy)]
pub struct PatternDefaults {
    /// The pattern shape.
    pub kind: PatternKind,
    /// Flyback rows or shrink step, depending on the shape.
    pub skip: u32,
    /// Per-axis coverage fraction.
    pub coverage: f64,
}

/// Every tunable of the acquisition engine, with validated defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Survey resolution.
    pub size: u32,
    /// Initial dwell time, seconds.
    pub init_dwell: f64,
    /// Whether searches record 4D datasets through the Merlin server.
    pub merlin: bool,
    /// Colour clusters are rendered in once filtered.
    pub cluster_colour: Rgb,
    /// Colour of the live region marker.
    pub marker_colour: Rgb,
    /// Lower threshold bound.
    pub minima: u8,
    /// Upper threshold bound.
    pub maxima: u8,
    /// Whether thresholding is inverted.
    pub threshold_inversion: bool,
    /// DBSCAN epsilon.
    pub epsilon: f64,
    /// DBSCAN minimum samples.
    pub minimum_samples: usize,
    /// Bounding-box extents clusters are compared against.
    pub cluster_size: (u32, u32),
    /// How cluster extents are compared against `cluster_size`.
    pub size_match: Match,
    /// Scan-pattern defaults.
    pub pattern: PatternDefaults,
    /// Scans between drift corrections.
    pub drift_scans: f64,
    /// Enabled window transforms: Hanning, Sobel, Median.
    pub windowing: [bool; 3],
    /// Order the enabled windows are applied in.
    pub window_order: Vec<Window>,
    /// Resolution drift references are scanned at.
    pub drift_resolution: u32,
    /// Scans between focus corrections.
    pub focus_scans: f64,
    /// Fine step of the focus sweep.
    pub focus_change: i32,
    /// Smallest lens change worth applying.
    pub focus_tolerance: i32,
    /// Half-range of the coarse focus sweep.
    pub focus_limit: i32,
    /// Emission floor before a reset is flagged.
    pub min_emission: f64,
    /// Emission sampling interval, seconds.
    pub emission_delay: f64,
    /// Fraction of a grid square that must overlap its cluster.
    pub match_fraction: f64,
    /// Overlap fraction between neighbouring grids.
    pub overlap: f64,
    /// Enabled overlap directions: x, y, combined.
    pub overlap_directions: [bool; 3],
    /// Pixel size of each acquired square.
    pub scan_size: u32,
    /// Merlin counter depth.
    pub bit_depth: u32,
    /// Directory pattern the region files are written into.
    pub save_path: String,
    /// Stage images saved with every region.
    pub checkpoints: Stages,
    /// Full acquisition resolution.
    pub resolution: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            size: 512,
            init_dwell: 1e-3,
            merlin: false,
            cluster_colour: Rgb::from_packed(0x00_FF_00),
            marker_colour: Rgb::from_packed(0xFF_00_FF),
            minima: 30,
            maxima: 60,
            threshold_inversion: false,
            epsilon: 4.2,
            minimum_samples: 50,
            cluster_size: (15, 15),
            size_match: Match::NoLower,
            pattern: PatternDefaults {
                kind: PatternKind::Snake,
                skip: 0,
                coverage: 1.0,
            },
            drift_scans: 10.0,
            windowing: [true, false, false],
            window_order: vec![Window::Hanning, Window::Sobel, Window::Median],
            drift_resolution: 4096,
            focus_scans: 20.0,
            focus_change: 8,
            focus_tolerance: 2,
            focus_limit: 160,
            min_emission: 3.5,
            emission_delay: 4.0,
            match_fraction: 0.6,
            overlap: 0.0,
            overlap_directions: [false, false, false],
            scan_size: 256,
            bit_depth: 12,
            save_path: String::from("./data"),
            checkpoints: Stages::ALL,
            resolution: 4096,
        }
    }
}

/// The dwell limits the hardware and the Merlin chips impose.
pub fn validate_dwell(dwell: Duration, depth: BitDepth, merlin: bool) -> Result<()> {
    let seconds = dwell.as_secs_f64();
    if merlin {
        let usec = seconds * 1e6;
        let floor = depth.minimum_dwell_usec();
        if !(floor..=5000.0).contains(&usec) {
            return Err(Error::validation(
                "init_dwell",
                format!(
                    "{usec:.1}us outside [{floor:.0}us, 5ms] for {}-bit Merlin scans",
                    depth.bits()
                ),
            ));
        }
    } else if !(40e-9..=70.0).contains(&seconds) {
        return Err(Error::validation(
            "init_dwell",
            format!("{seconds:e}s outside [40ns, 70s]"),
        ));
    }
    Ok(())
}

impl Config {
    /// Cross-key validation, run after every key has been applied.
    pub fn validate(&self) -> Result<()> {
        if self.minima >= self.maxima {
            return Err(Error::validation(
                "minima",
                format!("{} must be below maxima {}", self.minima, self.maxima),
            ));
        }
        if self.scan_size >= self.size {
            return Err(Error::validation(
                "scan_size",
                format!("{} must be below the survey size {}", self.scan_size, self.size),
            ));
        }
        if self.drift_resolution <= self.size {
            return Err(Error::validation(
                "drift_resolution",
                format!(
                    "{} must upscale beyond the survey size {}",
                    self.drift_resolution, self.size
                ),
            ));
        }
        if self.resolution <= self.size {
            return Err(Error::validation(
                "resolution",
                format!("{} must upscale beyond the survey size {}", self.resolution, self.size),
            ));
        }
        if self.focus_tolerance >= self.focus_change {
            return Err(Error::validation(
                "focus_tolerance",
                format!(
                    "{} must stay below the fine step {}",
                    self.focus_tolerance, self.focus_change
                ),
            ));
        }
        validate_dwell(
            Duration::from_secs_f64(self.init_dwell),
            BitDepth::from_bits(self.bit_depth)?,
            self.merlin,
        )
    }

    /// The drift engine parameters this configuration selects.
    pub fn drift_config(&self) -> DriftConfig {
        const NAMES: [Window; 3] = [Window::Hanning, Window::Sobel, Window::Median];
        let windows = self
            .window_order
            .iter()
            .copied()
            .filter(|window| {
                let index = NAMES.iter().position(|n| n == window).expect("known window");
                self.windowing[index]
            })
            .collect();
        DriftConfig {
            scans: self.drift_scans,
            windows,
            resolution: self.drift_resolution,
            padding: 256,
            update_reference: true,
        }
    }

    /// The autofocus parameters this configuration selects.
    pub fn focus_config(&self) -> FocusConfig {
        FocusConfig {
            scans: self.focus_scans,
            coarse_limit: self.focus_limit,
            fine_step: self.focus_change,
            tolerance: self.focus_tolerance,
        }
    }

    /// The emission-monitor parameters this configuration selects.
    pub fn emission_config(&self) -> EmissionConfig {
        EmissionConfig {
            min_emission: self.min_emission,
            interval: Duration::from_secs_f64(self.emission_delay),
        }
    }

    /// The gridding parameters this configuration selects. The pitch ties
    /// one acquired square to one survey grid square.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            pitch: pitch_for(self.size, self.scan_size, self.resolution),
            overlap: self.overlap,
            overlap_directions: self.overlap_directions,
            resolution: self.size,
        }
    }
}

/// The closed set of setting names. Widget events and configuration keys
/// both resolve here; anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Setting {
    Size,
    InitDwell,
    Merlin,
    ClusterColour,
    MarkerColour,
    Minima,
    Maxima,
    ThresholdInversion,
    Epsilon,
    MinimumSamples,
    ClusterSize,
    SizeMatch,
    Pattern,
    PatternSkip,
    PatternCoverage,
    DriftScans,
    Windowing,
    WindowOrder,
    DriftResolution,
    FocusScans,
    FocusChange,
    FocusTolerance,
    FocusLimit,
    MinEmission,
    EmissionDelay,
    MatchFraction,
    Overlap,
    OverlapDirections,
    ScanSize,
    BitDepth,
    SavePath,
    Checkpoints,
    Resolution,
}

impl FromStr for Setting {
    type Err = Error;

    fn from_str(name: &str) -> Result<Setting> {
        match name {
            "size" => Ok(Setting::Size),
            "init_dwell" => Ok(Setting::InitDwell),
            "merlin" => Ok(Setting::Merlin),
            "cluster_colour" => Ok(Setting::ClusterColour),
            "marker_colour" => Ok(Setting::MarkerColour),
            "minima" => Ok(Setting::Minima),
            "maxima" => Ok(Setting::Maxima),
            "threshold_inversion" => Ok(Setting::ThresholdInversion),
            "epsilon" => Ok(Setting::Epsilon),
            "minimum_samples" => Ok(Setting::MinimumSamples),
            "cluster_size" => Ok(Setting::ClusterSize),
            "size_match" => Ok(Setting::SizeMatch),
            "pattern" => Ok(Setting::Pattern),
            "pattern_skip" => Ok(Setting::PatternSkip),
            "pattern_coverage" => Ok(Setting::PatternCoverage),
            "drift_scans" => Ok(Setting::DriftScans),
            "windowing" => Ok(Setting::Windowing),
            "window_order" => Ok(Setting::WindowOrder),
            "drift_resolution" => Ok(Setting::DriftResolution),
            "focus_scans" => Ok(Setting::FocusScans),
            "focus_change" => Ok(Setting::FocusChange),
            "focus_tolerance" => Ok(Setting::FocusTolerance),
            "focus_limit" => Ok(Setting::FocusLimit),
            "min_emission" => Ok(Setting::MinEmission),
            "emission_delay" => Ok(Setting::EmissionDelay),
            "match" => Ok(Setting::MatchFraction),
            "overlap" => Ok(Setting::Overlap),
            "overlap_directions" => Ok(Setting::OverlapDirections),
            "scan_size" => Ok(Setting::ScanSize),
            "bit_depth" => Ok(Setting::BitDepth),
            "save_path" => Ok(Setting::SavePath),
            "checkpoints" => Ok(Setting::Checkpoints),
            "resolution" => Ok(Setting::Resolution),
            other => Err(Error::validation(
                "setting",
                format!("unknown setting {other:?}"),
            )),
        }
    }
}

fn as_f64(name: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::validation(name, format!("expected a number, got {value}")))
}

fn as_u64(name: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::validation(name, format!("expected a positive integer, got {value}")))
}

fn as_bool(name: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::validation(name, format!("expected a boolean, got {value}")))
}

fn as_str<'v>(name: &str, value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| Error::validation(name, format!("expected a string, got {value}")))
}

fn as_bool3(name: &str, value: &Value) -> Result<[bool; 3]> {
    let list = value
        .as_array()
        .ok_or_else(|| Error::validation(name, format!("expected three booleans, got {value}")))?;
    if list.len() != 3 {
        return Err(Error::validation(
            name,
            format!("expected three booleans, got {}", list.len()),
        ));
    }
    Ok([
        as_bool(name, &list[0])?,
        as_bool(name, &list[1])?,
        as_bool(name, &list[2])?,
    ])
}

fn as_colour(name: &str, value: &Value) -> Result<Rgb> {
    let packed = as_u64(name, value)?;
    if packed > 0xFF_FF_FF {
        return Err(Error::validation(
            name,
            format!("{packed:#x} does not fit 24 bits"),
        ));
    }
    Ok(Rgb::from_packed(packed as u32))
}

fn one_of(name: &str, value: u32, allowed: &[u32]) -> Result<u32> {
    if allowed.contains(&value) {
        Ok(value)
    } else {
        Err(Error::validation(
            name,
            format!("{value} is not one of {allowed:?}"),
        ))
    }
}

fn positive(name: &str, value: f64) -> Result<f64> {
    if value > 0.0 {
        Ok(value)
    } else {
        Err(Error::validation(name, format!("{value} must be positive")))
    }
}

fn fraction(name: &str, value: f64) -> Result<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(Error::validation(
            name,
            format!("{value} is not a fraction in [0, 1]"),
        ))
    }
}

fn window_from_name(name: &str) -> Result<Window> {
    match name {
        "Hanning" => Ok(Window::Hanning),
        "Sobel" => Ok(Window::Sobel),
        "Median" => Ok(Window::Median),
        other => Err(Error::validation(
            "window_order",
            format!("unknown window {other:?}"),
        )),
    }
}

impl Setting {
    /// Validates and applies one value onto the configuration.
    pub fn apply(self, config: &mut Config, value: &Value) -> Result<()> {
        match self {
            Setting::Size => {
                config.size = one_of("size", as_u64("size", value)? as u32, &SURVEY_SIZES)?;
            }
            Setting::InitDwell => {
                config.init_dwell = positive("init_dwell", as_f64("init_dwell", value)?)?;
            }
            Setting::Merlin => config.merlin = as_bool("merlin", value)?,
            Setting::ClusterColour => {
                config.cluster_colour = as_colour("cluster_colour", value)?;
            }
            Setting::MarkerColour => config.marker_colour = as_colour("marker_colour", value)?,
            Setting::Minima => {
                let raw = as_u64("minima", value)?;
                if raw > 255 {
                    return Err(Error::validation("minima", "must fit a grey level"));
                }
                config.minima = raw as u8;
            }
            Setting::Maxima => {
                let raw = as_u64("maxima", value)?;
                if raw > 255 {
                    return Err(Error::validation("maxima", "must fit a grey level"));
                }
                config.maxima = raw as u8;
            }
            Setting::ThresholdInversion => {
                config.threshold_inversion = as_bool("threshold_inversion", value)?;
            }
            Setting::Epsilon => config.epsilon = positive("epsilon", as_f64("epsilon", value)?)?,
            Setting::MinimumSamples => {
                let raw = as_u64("minimum_samples", value)?;
                if raw == 0 {
                    return Err(Error::validation("minimum_samples", "must be at least 1"));
                }
                config.minimum_samples = raw as usize;
            }
            Setting::ClusterSize => {
                let list = value.as_array().ok_or_else(|| {
                    Error::validation("cluster_size", "expected a [width, height] pair")
                })?;
                if list.len() != 2 {
                    return Err(Error::validation(
                        "cluster_size",
                        format!("expected two extents, got {}", list.len()),
                    ));
                }
                config.cluster_size = (
                    as_u64("cluster_size", &list[0])? as u32,
                    as_u64("cluster_size", &list[1])? as u32,
                );
            }
            Setting::SizeMatch => {
                config.size_match = match as_str("size_match", value)? {
                    "no_lower" => Match::NoLower,
                    "exact" => Match::Exact,
                    "no_higher" => Match::NoHigher,
                    other => {
                        return Err(Error::validation(
                            "size_match",
                            format!("unknown match mode {other:?}"),
                        ))
                    }
                };
            }
            Setting::Pattern => {
                config.pattern.kind = as_str("pattern", value)?.parse()?;
            }
            Setting::PatternSkip => config.pattern.skip = as_u64("pattern_skip", value)? as u32,
            Setting::PatternCoverage => {
                config.pattern.coverage =
                    fraction("pattern_coverage", as_f64("pattern_coverage", value)?)?;
            }
            Setting::DriftScans => {
                config.drift_scans = positive("drift_scans", as_f64("drift_scans", value)?)?;
            }
            Setting::Windowing => config.windowing = as_bool3("windowing", value)?,
            Setting::WindowOrder => {
                let list = value.as_array().ok_or_else(|| {
                    Error::validation("window_order", "expected a list of window names")
                })?;
                config.window_order = list
                    .iter()
                    .map(|v| window_from_name(as_str("window_order", v)?))
                    .collect::<Result<Vec<Window>>>()?;
            }
            Setting::DriftResolution => {
                config.drift_resolution = one_of(
                    "drift_resolution",
                    as_u64("drift_resolution", value)? as u32,
                    &RESOLUTIONS,
                )?;
            }
            Setting::FocusScans => {
                config.focus_scans = positive("focus_scans", as_f64("focus_scans", value)?)?;
            }
            Setting::FocusChange => {
                config.focus_change = positive("focus_change", as_f64("focus_change", value)?)? as i32;
            }
            Setting::FocusTolerance => {
                config.focus_tolerance =
                    positive("focus_tolerance", as_f64("focus_tolerance", value)?)? as i32;
            }
            Setting::FocusLimit => {
                config.focus_limit = positive("focus_limit", as_f64("focus_limit", value)?)? as i32;
            }
            Setting::MinEmission => {
                config.min_emission = positive("min_emission", as_f64("min_emission", value)?)?;
            }
            Setting::EmissionDelay => {
                config.emission_delay =
                    positive("emission_delay", as_f64("emission_delay", value)?)?;
            }
            Setting::MatchFraction => {
                config.match_fraction = fraction("match", as_f64("match", value)?)?;
            }
            Setting::Overlap => config.overlap = fraction("overlap", as_f64("overlap", value)?)?,
            Setting::OverlapDirections => {
                config.overlap_directions = as_bool3("overlap_directions", value)?;
            }
            Setting::ScanSize => {
                config.scan_size =
                    one_of("scan_size", as_u64("scan_size", value)? as u32, &SCAN_SIZES)?;
            }
            Setting::BitDepth => {
                config.bit_depth = BitDepth::from_bits(as_u64("bit_depth", value)? as u32)?.bits();
            }
            Setting::SavePath => {
                let path = as_str("save_path", value)?;
                if path.is_empty() {
                    return Err(Error::validation("save_path", "must not be empty"));
                }
                config.save_path = path.to_owned();
            }
            Setting::Checkpoints => {
                let raw = as_u64("checkpoints", value)?;
                if raw > Stages::ALL.bits() as u64 {
                    return Err(Error::validation(
                        "checkpoints",
                        format!("{raw} has bits outside the stage mask"),
                    ));
                }
                config.checkpoints = Stages::from_bits(raw as u8);
            }
            Setting::Resolution => {
                config.resolution =
                    one_of("resolution", as_u64("resolution", value)? as u32, &RESOLUTIONS)?;
            }
        }
        Ok(())
    }
}

/// Loads and validates the configuration file. Unknown keys are dropped
/// with a note in the log; any invalid value aborts start-up.
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let text = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|err| Error::validation("configuration file", err.to_string()))?;
    let map = value
        .as_object()
        .ok_or_else(|| Error::validation("configuration file", "expected a JSON object"))?;
    let mut config = Config::default();
    for (key, value) in map {
        match key.parse::<Setting>() {
            Ok(setting) => setting.apply(&mut config, value)?,
            Err(_) => debug!("dropping unknown configuration key {key:?}"),
        }
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn a_valid_file_loads() {
        let file = write_config(
            r#"{
                "size": 512,
                "init_dwell": 1e-3,
                "cluster_colour": 65280,
                "marker_colour": 16711935,
                "epsilon": 4.2,
                "minimum_samples": 50,
                "match": 0.6,
                "scan_size": 256,
                "window_order": ["Hanning", "Sobel"]
            }"#,
        );
        let config = load(file.path()).unwrap();
        assert_eq!(config.size, 512);
        assert_eq!(config.cluster_colour, Rgb::from_packed(0x00FF00));
        assert_eq!(config.window_order, vec![Window::Hanning, Window::Sobel]);
        assert_eq!(config.match_fraction, 0.6);
    }

    #[test]
    fn cluster_filter_keys_parse() {
        let file = write_config(r#"{"cluster_size": [20, 30], "size_match": "no_higher"}"#);
        let config = load(file.path()).unwrap();
        assert_eq!(config.cluster_size, (20, 30));
        assert_eq!(config.size_match, Match::NoHigher);
        for json in [
            r#"{"size_match": "bigger"}"#,
            r#"{"cluster_size": [20]}"#,
            r#"{"cluster_size": 20}"#,
        ] {
            let file = write_config(json);
            assert!(load(file.path()).is_err(), "{json} should be rejected");
        }
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let file = write_config(r#"{"size": 512, "widget_theme": "dark"}"#);
        let config = load(file.path()).unwrap();
        assert_eq!(config.size, 512);
    }

    #[test]
    fn invalid_values_abort() {
        for json in [
            r#"{"size": 500}"#,
            r#"{"epsilon": -1.0}"#,
            r#"{"match": 1.5}"#,
            r#"{"bit_depth": 8}"#,
            r#"{"cluster_colour": 16777216}"#,
            r#"{"minima": 90, "maxima": 60}"#,
            r#"{"scan_size": 512, "size": 512}"#,
            r#"{"window_order": ["Hamming"]}"#,
            r#"{"checkpoints": 16}"#,
            r#"not json"#,
        ] {
            let file = write_config(json);
            assert!(load(file.path()).is_err(), "{json} should be rejected");
        }
    }

    #[test]
    fn merlin_dwell_limits_follow_the_depth() {
        let ms = Duration::from_micros(700);
        assert!(validate_dwell(ms, BitDepth::Six, true).is_ok());
        assert!(validate_dwell(ms, BitDepth::Twelve, true).is_err());
        assert!(validate_dwell(Duration::from_millis(6), BitDepth::One, true).is_err());
        assert!(validate_dwell(Duration::from_nanos(10), BitDepth::One, false).is_err());
        assert!(validate_dwell(Duration::from_micros(1), BitDepth::One, false).is_ok());
    }

    #[test]
    fn settings_resolve_and_apply() {
        let mut config = Config::default();
        "minima".parse::<Setting>().unwrap().apply(
            &mut config,
            &serde_json::json!(40),
        ).unwrap();
        assert_eq!(config.minima, 40);
        assert!("frobnicate".parse::<Setting>().is_err());
        assert!("windowing"
            .parse::<Setting>()
            .unwrap()
            .apply(&mut config, &serde_json::json!([true, false]))
            .is_err());
    }

    #[test]
    fn drift_config_honours_enablement_and_order() {
        let mut config = Config::default();
        config.windowing = [true, true, false];
        config.window_order = vec![Window::Sobel, Window::Median, Window::Hanning];
        let drift = config.drift_config();
        assert_eq!(drift.windows, vec![Window::Sobel, Window::Hanning]);
    }

    #[test]
    fn manager_pitch_matches_the_resolution_ratio() {
        let config = Config::default();
        assert_eq!(config.manager_config().pitch, 32);
    }
}
