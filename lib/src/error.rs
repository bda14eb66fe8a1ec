use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
/// Describes what has gone wrong while preparing or running an acquisition
pub enum Error {
    /// An I/O error occurred
    #[error("An I/O error occured")]
    Io {
        #[from]
        /// The original error that was raised.
        source: io::Error,
    },
    /// The survey image could not be decoded
    #[error("An error occured when decoding an image: {source}")]
    Image {
        /// The original error that was raised
        #[from]
        source: image::ImageError,
    },
    /// Writing an output dataset failed
    #[error("An error occured when writing HDF5 output: {source}")]
    Hdf5 {
        /// The original error that was raised
        #[from]
        source: hdf5::Error,
    },
    /// Writing the region manifest failed
    #[error("An error occured when writing the region manifest: {source}")]
    Manifest {
        /// The original error that was raised
        #[from]
        source: csv::Error,
    },
    /// A parameter or configuration value failed validation
    #[error("invalid {what}: {why}")]
    Validation {
        /// Name of the offending parameter
        what: String,
        /// Why the value was rejected
        why: String,
    },
    /// An operation was requested before its prerequisite completed
    #[error("cannot run `{operation}` before `{requires}`")]
    Staging {
        /// The operation that was requested
        operation: &'static str,
        /// The stage that must complete first
        requires: &'static str,
    },
    /// Two long-running operations tried to hold the hardware at once
    #[error("`{operation}` is already running")]
    Concurrent {
        /// The operation that was requested a second time
        operation: &'static str,
    },
    /// The microscope or scan generator reported a fault
    #[error("hardware fault on `{line}`: {cause}")]
    Hardware {
        /// The subsystem or signal line that failed
        line: String,
        /// Description of the failure
        cause: String,
    },
    /// The cluster extractor was handed a non-binary image
    #[error("expected a binary image, found {levels} distinct grey levels")]
    NotBinary {
        /// Number of distinct grey levels in the offending image
        levels: usize,
    },
    /// More clusters were found than the colour space downstream can encode
    #[error("found {found} clusters, which overflows the colour space (expected 765 or less)")]
    TooManyClusters {
        /// Number of clusters found
        found: usize,
    },
    /// Tightening removed every region of a cluster's grids
    #[error("cluster {label} has no grids remaining after tightening")]
    NoGridsRemaining {
        /// Label of the cluster that tightened to nothing
        label: u32,
    },
    /// A cluster's bounding box cannot be padded to a pitch multiple
    #[error("cluster {label} cannot be padded to a pitch multiple inside the survey")]
    ClusterTooLarge {
        /// Label of the offending cluster
        label: u32,
    },
    /// A cluster was marked twice
    #[error("cannot mark cluster at ({x}, {y}) multiple times")]
    AlreadyMarked {
        /// x coordinate of the mark
        x: u32,
        /// y coordinate of the mark
        y: u32,
    },
    /// An unmarked cluster was updated
    #[error("cannot update unmarked cluster at ({x}, {y})")]
    NotMarked {
        /// x coordinate of the update
        x: u32,
        /// y coordinate of the update
        y: u32,
    },
    /// No cluster exists at the requested position
    #[error("no cluster recorded at ({x}, {y})")]
    MissingCluster {
        /// x coordinate of the request
        x: u32,
        /// y coordinate of the request
        y: u32,
    },
}

impl Error {
    /// Shorthand for a [`Error::Validation`] with owned text.
    pub fn validation(what: impl Into<String>, why: impl Into<String>) -> Self {
        Error::Validation {
            what: what.into(),
            why: why.into(),
        }
    }

    /// Shorthand for a [`Error::Hardware`] with owned text.
    pub fn hardware(line: impl Into<String>, cause: impl Into<String>) -> Self {
        Error::Hardware {
            line: line.into(),
            cause: cause.into(),
        }
    }
}
