//! Output files: one HDF5 file per scanned region, optional pipeline-stage
//! images behind a bitmask, and a CSV manifest of the exported region list.
//!
//! Dataset names and coordinate attributes follow the layout the analysis
//! notebooks downstream already read.

use std::path::Path;

use hdf5::types::VarLenUnicode;
use hdf5::{File, Location};
use ndarray::{arr1, Array2, Array3};

use crate::error::{Error, Result};
use crate::hardware::merlin::MerlinAcquisition;
use crate::image::{GreyImage, RgbImage};
use crate::regions::ScanRegion;

/// Bitmask of the optional pipeline-stage images saved next to a captured
/// square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages(u8);

impl Stages {
    /// Save nothing extra.
    pub const NONE: Stages = Stages(0);
    /// The raw survey scan.
    pub const SURVEY: Stages = Stages(1);
    /// The binary image the pipeline produced.
    pub const PROCESSED: Stages = Stages(2);
    /// The colour-coded cluster image.
    pub const CLUSTERS: Stages = Stages(4);
    /// The survey with the grid markers drawn on.
    pub const MARKER: Stages = Stages(8);
    /// Every stage.
    pub const ALL: Stages = Stages(15);

    /// Builds a mask from its raw bits; out-of-range bits are dropped.
    pub fn from_bits(bits: u8) -> Stages {
        Stages(bits & Stages::ALL.0)
    }

    /// The raw bits of the mask.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set in this mask.
    pub fn contains(self, other: Stages) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Stages {
    type Output = Stages;

    fn bitor(self, rhs: Stages) -> Stages {
        Stages(self.0 | rhs.0)
    }
}

/// The stage images available for saving. Absent images are skipped even
/// when their bit is set.
#[derive(Default)]
pub struct StageImages<'a> {
    /// The raw survey scan.
    pub survey: Option<&'a GreyImage>,
    /// The binary pipeline output.
    pub processed: Option<&'a GreyImage>,
    /// The colour-coded cluster image.
    pub clusters: Option<&'a RgbImage>,
    /// The survey with grid markers drawn on.
    pub marker: Option<&'a RgbImage>,
}

/// Local-time stamp used for output file names, `YYYYMMDD_HHMMSS`.
pub fn stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn create_str_attr(location: &Location, name: &str, value: &str) -> Result<()> {
    let attr = location.new_attr::<VarLenUnicode>().create(name)?;
    let value: VarLenUnicode = value
        .parse()
        .map_err(|_| Error::validation("attribute", format!("{name} is not valid unicode")))?;
    attr.write_scalar(&value)?;
    Ok(())
}

fn grey_array(image: &GreyImage) -> Result<Array2<u8>> {
    let (width, height) = image.size();
    Array2::from_shape_vec((height as usize, width as usize), image.data().to_vec())
        .map_err(|err| Error::validation("dataset shape", err.to_string()))
}

fn rgb_array(image: &RgbImage) -> Result<Array3<u8>> {
    let (width, height) = image.size();
    Array3::from_shape_vec((height as usize, width as usize, 3), image.data().to_vec())
        .map_err(|err| Error::validation("dataset shape", err.to_string()))
}

fn write_grey(file: &File, name: &str, image: &GreyImage) -> Result<()> {
    file.new_dataset_builder()
        .with_data(&grey_array(image)?)
        .create(name)?;
    Ok(())
}

fn write_rgb(file: &File, name: &str, image: &RgbImage) -> Result<()> {
    file.new_dataset_builder()
        .with_data(&rgb_array(image)?)
        .create(name)?;
    Ok(())
}

/// Saves one scanned region.
///
/// The captured square and the cartesian-coordinate group are mandatory for
/// standard scans; a Merlin acquisition has no local image, stores the
/// non-scaled survey coordinates instead and gains a parameter group for the
/// external server's dataset. Disabled regions save nothing.
pub fn save_region(
    path: &Path,
    region: &ScanRegion,
    captured: Option<&GreyImage>,
    stages: Stages,
    images: &StageImages,
    merlin: Option<&MerlinAcquisition>,
) -> Result<()> {
    if region.disabled() {
        return Ok(());
    }
    let file = File::create(path)?;
    if let Some(captured) = captured {
        write_grey(&file, "Captured Square", captured)?;
    }

    let coords = if merlin.is_some() {
        file.create_group("Co-ordinates (cartesian, non-scaled)")?
    } else {
        file.create_group("Co-ordinates (cartesian)")?
    };
    let (left, top) = region.top_left();
    let (right, bottom) = region.bottom_right();
    let attr = coords.new_attr::<i32>().shape(2).create("top left")?;
    attr.write(&arr1(&[left, top]))?;
    let attr = coords.new_attr::<i32>().shape(2).create("bottom right")?;
    attr.write(&arr1(&[right, bottom]))?;

    if stages.contains(Stages::SURVEY) {
        if let Some(survey) = images.survey {
            write_grey(&file, "Survey Scan", survey)?;
        }
    }
    if stages.contains(Stages::PROCESSED) {
        if let Some(processed) = images.processed {
            write_grey(&file, "Thresholded Image", processed)?;
        }
    }
    if stages.contains(Stages::CLUSTERS) {
        if let Some(clusters) = images.clusters {
            write_rgb(&file, "Clusters Found", clusters)?;
        }
    }
    if stages.contains(Stages::MARKER) {
        if let Some(marker) = images.marker {
            write_rgb(&file, "Grid Marker", marker)?;
        }
    }

    if let Some(acquisition) = merlin {
        let group = file.create_group("Merlin Parameters")?;
        let attr = group.new_attr::<f64>().create("set_dwell_time(usec)")?;
        attr.write_scalar(&acquisition.dwell_usec)?;
        let attr = group.new_attr::<u32>().create("set_scan_px")?;
        attr.write_scalar(&acquisition.scan_px)?;
        let attr = group.new_attr::<u32>().create("set_bit_depth")?;
        attr.write_scalar(&acquisition.bit_depth.bits())?;
        create_str_attr(&group, "data directory", &acquisition.directory.display().to_string())?;
    }
    Ok(())
}

/// Writes the exported region list as a CSV manifest next to the data files.
pub fn write_region_manifest(path: &Path, regions: &[ScanRegion]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["index", "left", "top", "right", "bottom", "resolution", "disabled"])?;
    for (index, region) in regions.iter().enumerate() {
        let (left, top) = region.top_left();
        let (right, bottom) = region.bottom_right();
        writer.write_record([
            index.to_string(),
            left.to_string(),
            top.to_string(),
            right.to_string(),
            bottom.to_string(),
            region.scan_resolution().to_string(),
            region.disabled().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
