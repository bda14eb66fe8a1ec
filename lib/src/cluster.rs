//! Cluster extraction: binary image in, labelled clusters out.
//!
//! Foreground pixels are treated as a 2D point set and grouped with DBSCAN
//! under a configurable distance metric. Each cluster caches a binary mask
//! for fast point-in-cluster queries plus its tight bounding box.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::image::{GreyImage, Rgb, RgbImage};
use crate::regions::{Grid, Overlap};
use crate::Match;

/// Distance metric used by the density scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    /// `|dx| + |dy|`.
    Manhattan,
    /// `sqrt(dx² + dy²)`.
    Euclidean,
    /// `dx² + dy²`; epsilon is compared in the squared space.
    SquaredEuclidean,
    /// `(|dx|^p + |dy|^p)^(1/p)`.
    Minkowski(f64),
}

impl Metric {
    /// Distance between two pixel coordinates under this metric.
    pub fn distance(&self, a: (u32, u32), b: (u32, u32)) -> f64 {
        let dx = (a.0 as f64 - b.0 as f64).abs();
        let dy = (a.1 as f64 - b.1 as f64).abs();
        match *self {
            Metric::Manhattan => dx + dy,
            Metric::Euclidean => dx.hypot(dy),
            Metric::SquaredEuclidean => dx * dx + dy * dy,
            Metric::Minkowski(p) => (dx.powf(p) + dy.powf(p)).powf(1.0 / p),
        }
    }

    /// Largest per-axis offset a point within `epsilon` can have. Bounds the
    /// neighbourhood search to adjacent buckets.
    fn chebyshev_radius(&self, epsilon: f64) -> f64 {
        match *self {
            Metric::SquaredEuclidean => epsilon.max(0.0).sqrt(),
            _ => epsilon,
        }
    }
}

/// One connected (density-reachable) set of foreground pixels.
#[derive(Debug, Clone)]
pub struct Cluster {
    label: u32,
    mask: GreyImage,
    min: (u32, u32),
    max: (u32, u32),
    locked: bool,
}

impl Cluster {
    /// Builds a cluster from a binary mask, deriving the bounding box from
    /// the first and last non-zero row and column sums.
    pub(crate) fn from_mask(label: u32, mask: GreyImage) -> Result<Cluster> {
        let (width, height) = mask.size();
        let mut col_sums = vec![0u32; width as usize];
        let mut row_sums = vec![0u32; height as usize];
        for y in 0..height {
            for x in 0..width {
                if mask.get(x, y) != 0 {
                    col_sums[x as usize] += 1;
                    row_sums[y as usize] += 1;
                }
            }
        }
        let first = |sums: &[u32]| sums.iter().position(|&s| s > 0);
        let last = |sums: &[u32]| sums.iter().rposition(|&s| s > 0);
        match (
            first(&col_sums),
            last(&col_sums),
            first(&row_sums),
            last(&row_sums),
        ) {
            (Some(min_x), Some(max_x), Some(min_y), Some(max_y)) => Ok(Cluster {
                label,
                mask,
                min: (min_x as u32, min_y as u32),
                max: (max_x as u32, max_y as u32),
                locked: false,
            }),
            _ => Err(Error::validation(
                "cluster mask",
                format!("cluster {label} has no foreground pixels"),
            )),
        }
    }

    /// Builds a cluster from a user-supplied polygon drawn into a blank
    /// mask, the survey-made cluster source.
    pub fn from_polygon(
        label: u32,
        vertices: &[(i32, i32)],
        image_size: (u32, u32),
    ) -> Result<Cluster> {
        if vertices.len() < 3 {
            return Err(Error::validation(
                "cluster polygon",
                format!("need at least 3 vertices, got {}", vertices.len()),
            ));
        }
        let mut mask = GreyImage::blank(image_size.0, image_size.1);
        mask.fill_polygon(vertices, 255);
        Cluster::from_mask(label, mask)
    }

    /// Returns the unique positive label of the cluster.
    #[inline]
    pub fn label(&self) -> u32 {
        self.label
    }

    /// Returns the colour this cluster renders as.
    #[inline]
    pub fn colour(&self) -> Rgb {
        Rgb::from_label(self.label)
    }

    /// Returns the binary mask (foreground pixels are 255).
    #[inline]
    pub fn mask(&self) -> &GreyImage {
        &self.mask
    }

    /// Top-left corner of the tight bounding box.
    #[inline]
    pub fn min_xy(&self) -> (u32, u32) {
        self.min
    }

    /// Bottom-right corner (inclusive) of the tight bounding box.
    #[inline]
    pub fn max_xy(&self) -> (u32, u32) {
        self.max
    }

    /// Bounding-box width in pixels.
    #[inline]
    pub fn size_x(&self) -> u32 {
        self.max.0 - self.min.0
    }

    /// Bounding-box height in pixels.
    #[inline]
    pub fn size_y(&self) -> u32 {
        self.max.1 - self.min.1
    }

    /// Whether the manager has marked this cluster with a grid.
    #[inline]
    pub fn locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Fast collision detection using the underlying mask.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        let (width, height) = self.mask.size();
        x < width && y < height && self.mask.get(x, y) != 0
    }

    /// Divides the bounding box into a single grid with the given overlap
    /// direction applied.
    pub fn divide(
        &self,
        pitch: u32,
        overlap_offset: u32,
        direction: Overlap,
        resolution: u32,
    ) -> Result<Grid> {
        Grid::build(self, pitch, direction.offsets(overlap_offset), resolution)
    }
}

impl std::fmt::Display for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Cluster {}", self.label)
    }
}

/// The downstream colour encoding holds at most this many labels.
pub const MAX_CLUSTERS: usize = 765;

struct Buckets {
    cell: f64,
    map: HashMap<(i64, i64), Vec<usize>>,
}

impl Buckets {
    fn build(points: &[(u32, u32)], radius: f64) -> Buckets {
        let cell = radius.ceil().max(1.0);
        let mut map: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, &(x, y)) in points.iter().enumerate() {
            let key = ((x as f64 / cell) as i64, (y as f64 / cell) as i64);
            map.entry(key).or_default().push(i);
        }
        Buckets { cell, map }
    }

    fn neighbours(
        &self,
        points: &[(u32, u32)],
        index: usize,
        metric: Metric,
        epsilon: f64,
        out: &mut Vec<usize>,
    ) {
        out.clear();
        let (x, y) = points[index];
        let key = ((x as f64 / self.cell) as i64, (y as f64 / self.cell) as i64);
        for cy in key.1 - 1..=key.1 + 1 {
            for cx in key.0 - 1..=key.0 + 1 {
                if let Some(bucket) = self.map.get(&(cx, cy)) {
                    for &j in bucket {
                        if metric.distance(points[index], points[j]) <= epsilon {
                            out.push(j);
                        }
                    }
                }
            }
        }
    }
}

/// Runs DBSCAN over the foreground of a binary image.
///
/// Labels are dense `1..=N`; noise points are dropped. Fails with
/// [`Error::NotBinary`] when the image holds grey levels other than 0 and
/// 255, and with [`Error::TooManyClusters`] past the colour-encoding limit.
/// An image with no foreground succeeds with an empty vector.
pub fn extract_clusters(
    img: &GreyImage,
    epsilon: f64,
    min_samples: usize,
    metric: Metric,
) -> Result<Vec<Cluster>> {
    if epsilon <= 0.0 {
        return Err(Error::validation("epsilon", "must be positive"));
    }
    if min_samples == 0 {
        return Err(Error::validation("minimum samples", "must be at least 1"));
    }
    if !img.is_binary() {
        return Err(Error::NotBinary {
            levels: img.distinct_levels(),
        });
    }
    let points = img.foreground();
    if points.is_empty() {
        return Ok(Vec::new());
    }

    let buckets = Buckets::build(&points, metric.chebyshev_radius(epsilon));
    const UNVISITED: i64 = 0;
    const NOISE: i64 = -1;
    let mut labels = vec![UNVISITED; points.len()];
    let mut current = 0i64;
    let mut neighbours = Vec::new();
    let mut reachable = Vec::new();

    for i in 0..points.len() {
        if labels[i] != UNVISITED {
            continue;
        }
        buckets.neighbours(&points, i, metric, epsilon, &mut neighbours);
        if neighbours.len() < min_samples {
            labels[i] = NOISE;
            continue;
        }
        current += 1;
        labels[i] = current;
        let mut seeds: VecDeque<usize> = neighbours.iter().copied().collect();
        while let Some(j) = seeds.pop_front() {
            if labels[j] == NOISE {
                labels[j] = current;
            }
            if labels[j] != UNVISITED {
                continue;
            }
            labels[j] = current;
            buckets.neighbours(&points, j, metric, epsilon, &mut reachable);
            if reachable.len() >= min_samples {
                seeds.extend(reachable.iter().copied());
            }
        }
    }

    let found = current as usize;
    if found > MAX_CLUSTERS {
        return Err(Error::TooManyClusters { found });
    }

    let (width, height) = img.size();
    let mut masks: Vec<GreyImage> = (0..found)
        .map(|_| GreyImage::blank(width, height))
        .collect();
    for (i, &label) in labels.iter().enumerate() {
        if label > 0 {
            let (x, y) = points[i];
            masks[label as usize - 1].set(x, y, 255);
        }
    }
    masks
        .into_iter()
        .enumerate()
        .map(|(i, mask)| Cluster::from_mask(i as u32 + 1, mask))
        .collect()
}

/// Keeps only the clusters whose bounding-box extents satisfy the comparison
/// against `size` on both axes.
pub fn filter_by_size(clusters: Vec<Cluster>, size: (u32, u32), mode: Match) -> Vec<Cluster> {
    clusters
        .into_iter()
        .filter(|cluster| {
            mode.compare(cluster.size_x() as f64, size.0 as f64)
                && mode.compare(cluster.size_y() as f64, size.1 as f64)
        })
        .collect()
}

/// Renders every cluster into one colour-coded image, each label using its
/// spill-encoded colour. This is the `Clusters Found` save stage.
pub fn render_clusters(clusters: &[Cluster], size: (u32, u32)) -> RgbImage {
    let mut out = RgbImage::blank(size.0, size.1);
    for cluster in clusters {
        let colour = cluster.colour();
        let (min, max) = (cluster.min_xy(), cluster.max_xy());
        for y in min.1..=max.1 {
            for x in min.0..=max.0 {
                if cluster.contains(x, y) {
                    out.set(x, y, colour);
                }
            }
        }
    }
    out
}
