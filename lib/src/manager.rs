//! The manager that owns clusters, overlays grids on them and exports the
//! flattened region list the scheduler consumes.

use std::collections::HashMap;

use log::debug;

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::image::{Rgb, RgbImage};
use crate::job::{JobHandle, Status};
use crate::regions::{Grid, Overlap, ScanRegion};

/// Where the managed clusters came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterSource {
    /// Clusters drawn by the operator on the survey image.
    Survey,
    /// Clusters found by the segmentation pipeline.
    Segmented,
}

/// Gridding parameters shared by every divide call.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Side length of each grid square, in survey pixels.
    pub pitch: u32,
    /// Fraction of a square covered by the overlapping grids, in `[0, 1]`.
    pub overlap: f64,
    /// Which overlap grids to build: horizontal, vertical, combined.
    pub overlap_directions: [bool; 3],
    /// The survey resolution the grids are built in.
    pub resolution: u32,
}

impl ManagerConfig {
    fn validate(&self) -> Result<()> {
        if self.pitch == 0 {
            return Err(Error::validation("pitch", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.overlap) {
            return Err(Error::validation(
                "overlap",
                format!("expected a fraction in [0, 1], got {}", self.overlap),
            ));
        }
        Ok(())
    }

    /// The per-grid offset: `(1 - overlap) * pitch`.
    fn offset(&self) -> u32 {
        ((1.0 - self.overlap) * self.pitch as f64) as u32
    }

    fn overlaps(&self) -> Vec<Overlap> {
        let mut list = vec![Overlap::None];
        if self.overlap_directions[0] {
            list.push(Overlap::X);
        }
        if self.overlap_directions[1] {
            list.push(Overlap::Y);
        }
        if self.overlap_directions[2] {
            list.push(Overlap::XY);
        }
        list
    }
}

/// Derives the grid pitch from the survey size, the acquisition resolution
/// and the per-square scan size, so one acquired square maps onto one grid
/// square of the survey.
pub fn pitch_for(survey_size: u32, scan_size: u32, resolution: u32) -> u32 {
    ((survey_size as u64 * scan_size as u64) / resolution as u64).max(1) as u32
}

/// Owns the clusters of the chosen source and their grids, and accumulates
/// the exported region list across sources.
#[derive(Debug)]
pub struct RegionManager {
    config: ManagerConfig,
    source: Option<ClusterSource>,
    clusters: Vec<Cluster>,
    order: Vec<usize>,
    grids: HashMap<u32, Vec<Grid>>,
    exported: Vec<ScanRegion>,
    tighten_progress: usize,
}

impl RegionManager {
    /// Creates a manager with no source chosen.
    pub fn new(config: ManagerConfig) -> Result<RegionManager> {
        config.validate()?;
        Ok(RegionManager {
            config,
            source: None,
            clusters: Vec::new(),
            order: Vec::new(),
            grids: HashMap::new(),
            exported: Vec::new(),
            tighten_progress: 0,
        })
    }

    /// Replaces the gridding parameters. Existing grids are invalidated and
    /// every locked cluster is re-divided.
    pub fn set_config(&mut self, config: ManagerConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.regrid()
    }

    /// Returns the active gridding parameters.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Chooses a cluster source, resetting all grid state.
    pub fn choose_source(&mut self, source: ClusterSource, mut clusters: Vec<Cluster>) {
        for cluster in &mut clusters {
            cluster.set_locked(false);
        }
        self.order = (0..clusters.len()).collect();
        self.clusters = clusters;
        self.grids.clear();
        self.tighten_progress = 0;
        self.source = Some(source);
    }

    /// The source currently selected, if any.
    pub fn source(&self) -> Option<ClusterSource> {
        self.source
    }

    /// The managed clusters, in their original labelling order.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// The regions exported so far, in scan order.
    pub fn exported(&self) -> &[ScanRegion] {
        &self.exported
    }

    fn require_source(&self) -> Result<()> {
        if self.source.is_none() {
            return Err(Error::Staging {
                operation: "marking clusters",
                requires: "choosing cluster source",
            });
        }
        Ok(())
    }

    fn cluster_at(&self, x: u32, y: u32) -> Option<usize> {
        self.order
            .iter()
            .copied()
            .find(|&idx| self.clusters[idx].contains(x, y))
    }

    fn divide(&self, cluster: &Cluster) -> Result<Vec<Grid>> {
        let offset = self.config.offset();
        self.config
            .overlaps()
            .into_iter()
            .map(|dir| cluster.divide(self.config.pitch, offset, dir, self.config.resolution))
            .collect()
    }

    /// Marks the cluster enclosing `(x, y)`: divides it into grids and locks
    /// it against repeat marks.
    pub fn mark(&mut self, x: u32, y: u32) -> Result<()> {
        self.require_source()?;
        let idx = self
            .cluster_at(x, y)
            .ok_or(Error::MissingCluster { x, y })?;
        if self.clusters[idx].locked() {
            return Err(Error::AlreadyMarked { x, y });
        }
        let grids = self.divide(&self.clusters[idx])?;
        self.grids.insert(self.clusters[idx].label(), grids);
        self.clusters[idx].set_locked(true);
        Ok(())
    }

    /// Re-divides an already-marked cluster, e.g. after a parameter change.
    pub fn update(&mut self, x: u32, y: u32) -> Result<()> {
        self.require_source()?;
        let idx = self
            .cluster_at(x, y)
            .ok_or(Error::MissingCluster { x, y })?;
        if !self.clusters[idx].locked() {
            return Err(Error::NotMarked { x, y });
        }
        let grids = self.divide(&self.clusters[idx])?;
        self.grids.insert(self.clusters[idx].label(), grids);
        Ok(())
    }

    /// Marks every cluster that divides cleanly, skipping the rest. The
    /// automation `Mark` keyword lands here.
    pub fn mark_all(&mut self) -> Result<usize> {
        self.require_source()?;
        let mut marked = 0;
        for idx in self.order.clone() {
            if self.clusters[idx].locked() {
                continue;
            }
            match self.divide(&self.clusters[idx]) {
                Ok(grids) => {
                    self.grids.insert(self.clusters[idx].label(), grids);
                    self.clusters[idx].set_locked(true);
                    marked += 1;
                }
                Err(err) => {
                    debug!("skipping {}: {err}", self.clusters[idx]);
                }
            }
        }
        Ok(marked)
    }

    /// Re-divides every locked cluster with the current parameters. Grids
    /// lose any tightening they had.
    pub fn regrid(&mut self) -> Result<()> {
        for idx in 0..self.clusters.len() {
            if !self.clusters[idx].locked() {
                continue;
            }
            let grids = self.divide(&self.clusters[idx])?;
            self.grids.insert(self.clusters[idx].label(), grids);
        }
        self.tighten_progress = 0;
        Ok(())
    }

    /// Tightens the grids of every locked cluster, in scan order.
    ///
    /// Pauseable: the handle is checked between clusters, and a paused run
    /// resumes from the cluster it stopped at. A cluster whose grids all
    /// tighten to nothing fails the run.
    pub fn tighten_all(&mut self, match_fraction: f64, handle: &JobHandle) -> Result<Status> {
        let locked: Vec<usize> = self
            .order
            .iter()
            .copied()
            .filter(|&idx| self.clusters[idx].locked())
            .collect();
        for (i, idx) in locked.into_iter().enumerate() {
            if i < self.tighten_progress {
                continue;
            }
            match handle.status() {
                Status::Paused => {
                    self.tighten_progress = i;
                    return Ok(Status::Paused);
                }
                Status::Dead => {
                    self.tighten_progress = 0;
                    return Ok(Status::Dead);
                }
                _ => {}
            }
            let cluster = &self.clusters[idx];
            let label = cluster.label();
            if let Some(grids) = self.grids.get_mut(&label) {
                let mut remaining = 0;
                for grid in grids.iter_mut() {
                    grid.tighten(cluster, match_fraction)?;
                    remaining += grid.regions().len();
                }
                if remaining == 0 {
                    return Err(Error::NoGridsRemaining { label });
                }
            }
            self.tighten_progress = i + 1;
        }
        self.tighten_progress = 0;
        Ok(Status::Finished)
    }

    /// Appends every tightened region, in cluster scan order, to the
    /// persistent exported list and returns the whole list.
    ///
    /// Every grid must be tight; a loose grid means tightening was skipped.
    pub fn export(&mut self) -> Result<&[ScanRegion]> {
        for grids in self.grids.values() {
            if grids.iter().any(|grid| !grid.is_tight()) {
                return Err(Error::Staging {
                    operation: "exporting grids",
                    requires: "tightening all grids",
                });
            }
        }
        for &idx in &self.order {
            let label = self.clusters[idx].label();
            if let Some(grids) = self.grids.get(&label) {
                for grid in grids {
                    self.exported.extend_from_slice(grid.regions());
                }
            }
        }
        self.grids.clear();
        Ok(&self.exported)
    }

    /// Swaps two cluster positions in the scan order.
    pub fn reorder(&mut self, a: usize, b: usize) -> Result<()> {
        if a >= self.order.len() || b >= self.order.len() {
            return Err(Error::validation(
                "cluster order",
                format!("cannot swap {a} and {b} in {} clusters", self.order.len()),
            ));
        }
        self.order.swap(a, b);
        Ok(())
    }

    /// Draws every grid onto a canvas with the given marker colour. This is
    /// the `Grid Marker` save stage.
    pub fn draw_markers(&self, onto: &mut RgbImage, colour: Rgb) {
        for grids in self.grids.values() {
            for grid in grids {
                grid.draw(onto, colour, false);
            }
        }
    }
}
