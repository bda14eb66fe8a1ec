#![warn(missing_docs)]

//! This library automates the acquisition of high-resolution 4D-STEM
//! datasets: a low-resolution survey scan is thresholded and segmented into
//! clusters of features, each cluster is tiled with a grid of square scan
//! regions, and a pauseable scheduler drives the microscope through every
//! region while drift, focus and emission corrections run interleaved with
//! the acquisitions.
//!
//! # Example
//!
//! ```no_run
//! use stem4d_rs::automate::{Keyword, Session};
//! use stem4d_rs::config;
//! use stem4d_rs::hardware::{OfflineMicroscope, SharedMicroscope};
//!
//! fn main() -> stem4d_rs::Result<()> {
//!     let settings = config::load("assets/config.json")?;
//!     let mic = OfflineMicroscope::from_file("assets/img_3.bmp")?;
//!     let mut session = Session::new(settings, SharedMicroscope::new(mic))?;
//!     for keyword in ["Scan", "Cluster", "Mark", "Tighten", "Search"] {
//!         session.run_keyword(keyword.parse::<Keyword>()?)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod automate;
pub mod cluster;
pub mod config;
pub mod corrections;
mod error;
pub mod hardware;
pub mod image;
pub mod job;
pub mod manager;
pub mod output;
pub mod pattern;
pub mod pipeline;
pub mod regions;
pub mod scheduler;

pub use self::error::{Error, Result};
pub use self::image::{GreyImage, Rgb, RgbImage};
pub use self::job::{JobHandle, Status};
pub use self::regions::{Grid, Overlap, ScanRegion};

/// The numerical matching modes used by counters and the cluster size
/// filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    /// `a >= b`: the value must not sag below the limit.
    NoLower,
    /// `a == b`: the value must match the limit exactly.
    Exact,
    /// `a <= b`: the value must not climb above the limit.
    NoHigher,
}

impl Match {
    /// Applies the comparison.
    pub fn compare(self, a: f64, b: f64) -> bool {
        match self {
            Match::NoLower => a >= b,
            Match::Exact => a == b,
            Match::NoHigher => a <= b,
        }
    }

    /// The mathematical operator this match represents.
    pub fn sign(self) -> &'static str {
        match self {
            Match::NoLower => ">=",
            Match::Exact => "==",
            Match::NoHigher => "<=",
        }
    }
}
