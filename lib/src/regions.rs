//! Scan regions and the grids that tile a cluster's bounding box with them.

use std::fmt;

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::image::{GreyImage, Rgb, RgbImage};

/// Overlap directions a grid can be built with. The combined direction
/// applies both axis offsets at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// No offset; the base grid.
    None,
    /// Horizontal offset only.
    X,
    /// Vertical offset only.
    Y,
    /// Both offsets simultaneously.
    XY,
}

impl Overlap {
    /// Turns an offset magnitude into the per-axis shift for this direction.
    pub fn offsets(self, offset: u32) -> (u32, u32) {
        match self {
            Overlap::None => (0, 0),
            Overlap::X => (offset, 0),
            Overlap::Y => (0, offset),
            Overlap::XY => (offset, offset),
        }
    }
}

/// A single square to scan.
///
/// Coordinates are in the space of `scan_resolution` (the survey size the
/// rectangle was built in); `at_resolution` rescales into acquisition space.
/// A region can be disabled, after which the scheduler skips it and drawing
/// and saving become no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRegion {
    left: i32,
    top: i32,
    size: u32,
    scan_resolution: u32,
    disabled: bool,
}

impl ScanRegion {
    /// Creates a region from its top-left corner, square side and the
    /// resolution the coordinates live in.
    pub fn new(top_left: (i32, i32), size: u32, scan_resolution: u32) -> ScanRegion {
        ScanRegion {
            left: top_left.0,
            top: top_left.1,
            size,
            scan_resolution,
            disabled: false,
        }
    }

    /// Top-left corner.
    #[inline]
    pub fn top_left(&self) -> (i32, i32) {
        (self.left, self.top)
    }

    /// Bottom-right corner (exclusive).
    #[inline]
    pub fn bottom_right(&self) -> (i32, i32) {
        (self.left + self.size as i32, self.top + self.size as i32)
    }

    /// Side length of the square.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The resolution the coordinates are expressed in.
    #[inline]
    pub fn scan_resolution(&self) -> u32 {
        self.scan_resolution
    }

    /// Whether the scheduler should skip this region.
    #[inline]
    pub fn disabled(&self) -> bool {
        self.disabled
    }

    /// Enables or disables the region.
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Returns a copy rescaled to a new resolution. The corner and side are
    /// multiplied by the ratio of the resolutions and truncated, so a round
    /// trip through a non-integer ratio may be off by a pixel.
    pub fn at_resolution(&self, resolution: u32) -> ScanRegion {
        let ratio = resolution as f64 / self.scan_resolution as f64;
        ScanRegion {
            left: (self.left as f64 * ratio) as i32,
            top: (self.top as f64 * ratio) as i32,
            size: (self.size as f64 * ratio) as u32,
            scan_resolution: resolution,
            disabled: self.disabled,
        }
    }

    /// Translates the region in place.
    pub fn shift(&mut self, by: (i32, i32)) {
        self.left += by.0;
        self.top += by.1;
    }

    /// Whether the region lies fully inside `[0, limit)` on both axes.
    pub fn in_bounds(&self, limit: u32) -> bool {
        let (right, bottom) = self.bottom_right();
        self.left >= 0 && self.top >= 0 && right <= limit as i32 && bottom <= limit as i32
    }

    /// Counts the foreground pixels of `mask` inside this region, clamped to
    /// the mask bounds.
    pub fn overlap_count(&self, mask: &GreyImage) -> usize {
        let (width, height) = mask.size();
        let (right, bottom) = self.bottom_right();
        let x0 = self.left.max(0) as u32;
        let y0 = self.top.max(0) as u32;
        let x1 = (right.max(0) as u32).min(width);
        let y1 = (bottom.max(0) as u32).min(height);
        if x1 <= x0 || y1 <= y0 {
            return 0;
        }
        let mut count = 0;
        for y in y0..y1 {
            for x in x0..x1 {
                if mask.get(x, y) != 0 {
                    count += 1;
                }
            }
        }
        count
    }

    /// Draws the region outline (or fill) onto a canvas. Disabled regions
    /// draw nothing.
    pub fn draw(&self, onto: &mut RgbImage, colour: Rgb, filled: bool) {
        if self.disabled {
            return;
        }
        onto.draw_square((self.left, self.top), self.size, colour, filled);
    }
}

impl fmt::Display for ScanRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (right, bottom) = self.bottom_right();
        write!(
            f,
            "Region ({}, {}) -> ({}, {}) @ {}x{}",
            self.left, self.top, right, bottom, self.scan_resolution, self.scan_resolution
        )
    }
}

/// Pads `[lo, hi)` out to a multiple of `pitch`, alternating between the two
/// ends and clamping at `[0, limit)`.
fn pad(lo: u32, hi: u32, pitch: u32, limit: u32, label: u32) -> Result<(u32, u32)> {
    let mut lo = lo as i64;
    let mut hi = hi as i64;
    let limit = limit as i64;
    let mut grow_lo = true;
    let mut grow_hi = true;
    while (hi - lo) % pitch as i64 != 0 {
        if !grow_lo && !grow_hi {
            return Err(Error::ClusterTooLarge { label });
        }
        if grow_lo {
            lo -= 1;
            if lo < 0 {
                lo = 0;
                grow_lo = false;
            }
        }
        if (hi - lo) % pitch as i64 == 0 {
            break;
        }
        if grow_hi {
            hi += 1;
            if hi > limit {
                hi = limit;
                grow_hi = false;
            }
        }
    }
    Ok((lo as u32, hi as u32))
}

/// A grid of scan regions overlaid on one cluster so its bounding box is
/// captured.
///
/// The regions built by division are the loose set; tightening filters them
/// against the cluster mask and the grid then iterates the tight set.
#[derive(Debug, Clone)]
pub struct Grid {
    cluster_label: u32,
    pitch: u32,
    offset: (u32, u32),
    resolution: u32,
    loose: Vec<ScanRegion>,
    tight: Vec<ScanRegion>,
    is_tight: bool,
}

impl Grid {
    /// Builds the loose grid over a cluster's padded bounding box.
    pub(crate) fn build(
        cluster: &Cluster,
        pitch: u32,
        offset: (u32, u32),
        resolution: u32,
    ) -> Result<Grid> {
        if pitch == 0 {
            return Err(Error::validation("pitch", "must be at least 1"));
        }
        let label = cluster.label();
        let (min, max) = (cluster.min_xy(), cluster.max_xy());
        // The padded interval is exclusive at the top so the extreme pixel
        // itself stays covered.
        let (left, right) = pad(min.0, max.0 + 1, pitch, resolution, label)?;
        let (top, bottom) = pad(min.1, max.1 + 1, pitch, resolution, label)?;
        let mut loose = Vec::new();
        let mut y = top + offset.1;
        while y + pitch <= bottom {
            let mut x = left + offset.0;
            while x + pitch <= right {
                loose.push(ScanRegion::new((x as i32, y as i32), pitch, resolution));
                x += pitch;
            }
            y += pitch;
        }
        Ok(Grid {
            cluster_label: label,
            pitch,
            offset,
            resolution,
            loose,
            tight: Vec::new(),
            is_tight: false,
        })
    }

    /// Label of the cluster this grid belongs to.
    #[inline]
    pub fn cluster_label(&self) -> u32 {
        self.cluster_label
    }

    /// Side length of each region in the grid.
    #[inline]
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    /// The offset this grid has from the padded top-left corner.
    #[inline]
    pub fn offset(&self) -> (u32, u32) {
        self.offset
    }

    /// Whether the grid has been tightened.
    #[inline]
    pub fn is_tight(&self) -> bool {
        self.is_tight
    }

    /// The most suitable regions: tight if the grid was tightened, loose
    /// otherwise.
    pub fn regions(&self) -> &[ScanRegion] {
        if self.is_tight {
            &self.tight
        } else {
            &self.loose
        }
    }

    /// Keeps only the regions with at least `match_fraction` of their area
    /// inside the cluster mask. Clears the loose set.
    pub fn tighten(&mut self, cluster: &Cluster, match_fraction: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&match_fraction) {
            return Err(Error::validation(
                "match fraction",
                format!("expected a value in [0, 1], got {match_fraction}"),
            ));
        }
        let minimum = (match_fraction * (self.pitch * self.pitch) as f64) as usize;
        self.tight = self
            .loose
            .drain(..)
            .filter(|region| region.overlap_count(cluster.mask()) >= minimum)
            .collect();
        self.is_tight = true;
        Ok(())
    }

    /// Draws every region of the grid onto a canvas.
    pub fn draw(&self, onto: &mut RgbImage, colour: Rgb, filled: bool) {
        for region in self.regions() {
            region.draw(onto, colour, filled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_cluster(tl: (i32, i32), side: u32, canvas: u32) -> Cluster {
        let mut mask = GreyImage::blank(canvas, canvas);
        mask.draw_square(tl, side, 255, true);
        Cluster::from_mask(1, mask).unwrap()
    }

    #[test]
    fn scaling_composes_within_a_pixel() {
        let region = ScanRegion::new((96, 32), 32, 512);
        let direct = region.at_resolution(4096);
        let via = region.at_resolution(1024).at_resolution(4096);
        let (dx, dy) = direct.top_left();
        let (vx, vy) = via.top_left();
        assert!((dx - vx).abs() <= 1);
        assert!((dy - vy).abs() <= 1);
        assert!((direct.size() as i64 - via.size() as i64).abs() <= 1);
        assert_eq!(direct.top_left(), (768, 256));
        assert_eq!(direct.size(), 256);
    }

    #[test]
    fn shifted_regions_report_bounds() {
        let mut region = ScanRegion::new((0, 0), 32, 512);
        assert!(region.in_bounds(512));
        region.shift((-4, 0));
        assert!(!region.in_bounds(512));
        region.shift((4, 490));
        assert!(!region.in_bounds(512));
    }

    #[test]
    fn overlap_count_clamps_to_the_mask() {
        let mut mask = GreyImage::blank(64, 64);
        mask.draw_square((0, 0), 8, 255, true);
        let inside = ScanRegion::new((0, 0), 8, 64);
        assert_eq!(inside.overlap_count(&mask), 64);
        let hanging = ScanRegion::new((-4, -4), 8, 64);
        assert_eq!(hanging.overlap_count(&mask), 16);
        let outside = ScanRegion::new((32, 32), 8, 64);
        assert_eq!(outside.overlap_count(&mask), 0);
    }

    #[test]
    fn grid_covers_the_bounding_box() {
        let cluster = blob_cluster((10, 20), 50, 512);
        let grid = cluster.divide(32, 0, Overlap::None, 512).unwrap();
        assert!(!grid.regions().is_empty());
        let (min, max) = (cluster.min_xy(), cluster.max_xy());
        for y in min.1..=max.1 {
            for x in min.0..=max.0 {
                let covered = grid.regions().iter().any(|r| {
                    let (l, t) = r.top_left();
                    let (rt, b) = r.bottom_right();
                    (x as i32) >= l && (x as i32) < rt && (y as i32) >= t && (y as i32) < b
                });
                assert!(covered, "({x}, {y}) not covered");
            }
        }
    }

    #[test]
    fn grid_regions_step_by_pitch() {
        let cluster = blob_cluster((0, 0), 64, 512);
        let grid = cluster.divide(32, 0, Overlap::None, 512).unwrap();
        assert_eq!(grid.regions().len(), 4);
        for region in grid.regions() {
            assert_eq!(region.size(), 32);
            let (l, t) = region.top_left();
            assert_eq!(l.rem_euclid(32), 0);
            assert_eq!(t.rem_euclid(32), 0);
        }
    }

    #[test]
    fn overlap_directions_shift_the_grid() {
        let cluster = blob_cluster((32, 32), 64, 512);
        let base = cluster.divide(32, 8, Overlap::None, 512).unwrap();
        let shifted = cluster.divide(32, 8, Overlap::X, 512).unwrap();
        let both = cluster.divide(32, 8, Overlap::XY, 512).unwrap();
        let bx = base.regions()[0].top_left();
        let sx = shifted.regions()[0].top_left();
        let bo = both.regions()[0].top_left();
        assert_eq!(sx.0 - bx.0, 8);
        assert_eq!(sx.1, bx.1);
        assert_eq!(bo.0 - bx.0, 8);
        assert_eq!(bo.1 - bx.1, 8);
    }

    #[test]
    fn oversized_clusters_cannot_be_padded() {
        // A cluster spanning the full survey leaves no room to pad out to a
        // pitch multiple.
        let cluster = blob_cluster((0, 0), 512, 512);
        let err = cluster.divide(31, 0, Overlap::None, 512).unwrap_err();
        assert!(matches!(err, Error::ClusterTooLarge { label: 1 }));
    }

    #[test]
    fn tightening_is_monotonic_in_the_match_fraction() {
        let mut mask = GreyImage::blank(256, 256);
        mask.fill_polygon(&[(20, 20), (120, 30), (90, 110)], 255);
        let cluster = Cluster::from_mask(1, mask).unwrap();
        let mut counts = Vec::new();
        for fraction in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
            let mut grid = cluster.divide(16, 0, Overlap::None, 256).unwrap();
            grid.tighten(&cluster, fraction).unwrap();
            counts.push(grid.regions().len());
        }
        for pair in counts.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert!(counts[0] > 0);
    }

    #[test]
    fn tighten_rejects_bad_fractions() {
        let cluster = blob_cluster((0, 0), 32, 512);
        let mut grid = cluster.divide(32, 0, Overlap::None, 512).unwrap();
        assert!(grid.tighten(&cluster, 1.5).is_err());
        assert!(grid.tighten(&cluster, -0.1).is_err());
        assert!(!grid.is_tight());
        grid.tighten(&cluster, 0.5).unwrap();
        assert!(grid.is_tight());
    }

    #[test]
    fn disabled_regions_do_not_draw() {
        let mut canvas = RgbImage::blank(64, 64);
        let mut region = ScanRegion::new((4, 4), 8, 64);
        region.set_disabled(true);
        region.draw(&mut canvas, Rgb::WHITE, true);
        assert_eq!(canvas.get(5, 5), Rgb::BLACK);
    }
}
