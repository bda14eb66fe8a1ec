//! Scan-pattern designs: lazy objects that expand into ordered pixel
//! sequences for the scan generator, plus a binary mask for visualisation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal, Poisson, Uniform};

use crate::error::{Error, Result};
use crate::image::GreyImage;

/// A corner of the scan square a continuous design starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    /// Origin corner.
    TopLeft,
    /// Right edge, top row.
    TopRight,
    /// Left edge, bottom row.
    BottomLeft,
    /// The far corner.
    BottomRight,
}

impl Corner {
    /// Whether the corner sits on the left edge.
    #[inline]
    pub fn is_left(self) -> bool {
        matches!(self, Corner::TopLeft | Corner::BottomLeft)
    }

    /// Whether the corner sits on the top edge.
    #[inline]
    pub fn is_top(self) -> bool {
        matches!(self, Corner::TopLeft | Corner::TopRight)
    }
}

/// Stroke direction for raster and snake designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Strokes run horizontally.
    AlongX,
    /// Strokes run vertically.
    AlongY,
}

/// Winding direction for spiral designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    /// Start on the outer edge and wind inwards.
    OutsideIn,
    /// Start at the centre and wind outwards.
    InsideOut,
}

/// Major axis for lattice designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Scan in rows; the resetting axis is x.
    RowMajor,
    /// Scan in columns; the resetting axis is y.
    ColumnMajor,
}

/// Encoding order of a lattice design: the major axis plus the corner the
/// count starts from (the four sign combinations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridOrder {
    /// Row- or column-major traversal.
    pub major: Traversal,
    /// Which corner counts as the origin.
    pub start: Corner,
}

/// One element of an encoded design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// A singular dwell point.
    Point {
        /// Coordinate of the point.
        position: (u32, u32),
    },
    /// A line of points.
    Stroke {
        /// Starting coordinate.
        start: (u32, u32),
        /// Ending coordinate.
        end: (u32, u32),
        /// Whether the end point itself is emitted.
        inclusive: bool,
    },
}

/// Integer line interpolation between two points.
fn line(start: (u32, u32), end: (u32, u32), inclusive: bool) -> Vec<(u32, u32)> {
    let (x1, y1) = (start.0 as i64, start.1 as i64);
    let (x2, y2) = (end.0 as i64, end.1 as i64);
    let dx = x2 - x1;
    let dy = y2 - y1;
    let steps = dx.abs().max(dy.abs());
    if steps == 0 {
        return if inclusive {
            vec![(start.0, start.1)]
        } else {
            Vec::new()
        };
    }
    let count = if inclusive { steps + 1 } else { steps };
    (0..count)
        .map(|i| {
            let t = i as f64 / steps as f64;
            let x = (x1 as f64 + dx as f64 * t).round() as i64;
            let y = (y1 as f64 + dy as f64 * t).round() as i64;
            (x as u32, y as u32)
        })
        .collect()
}

impl Pattern {
    /// Expands the pattern into its ordered pixel list.
    pub fn decode(&self) -> Vec<(u32, u32)> {
        match *self {
            Pattern::Point { position } => vec![position],
            Pattern::Stroke {
                start,
                end,
                inclusive,
            } => line(start, end, inclusive),
        }
    }

    /// Whether the pattern passes through a point.
    pub fn contains(&self, point: (u32, u32)) -> bool {
        self.decode().contains(&point)
    }

    /// Reverses a stroke in place; points are unchanged.
    pub fn reverse(&mut self) {
        if let Pattern::Stroke { start, end, .. } = self {
            std::mem::swap(start, end);
        }
    }
}

/// A lazy object producing an ordered sequence of patterns and a binary
/// visualisation mask.
pub trait Design {
    /// Converts the design to its ordered pattern list.
    fn encode(&self) -> Vec<Pattern>;

    /// The size of the scan square the design covers.
    fn size(&self) -> (u32, u32);

    /// Renders the binary mask of the design, sized to the scan square.
    fn draw(&self) -> GreyImage {
        let (width, height) = self.size();
        let mut mask = GreyImage::blank(width, height);
        for pattern in self.encode() {
            for (x, y) in pattern.decode() {
                if x < width && y < height {
                    mask.set(x, y, 255);
                }
            }
        }
        mask
    }
}

/// Per-axis setup: first coordinate, last coordinate (inclusive) and step
/// sign, honouring the start corner and the coverage fraction.
fn axis_setup(extent: u32, coverage: f64, from_low: bool) -> (i64, i64, i64) {
    if from_low {
        (0, (coverage * extent as f64) as i64 - 1, 1)
    } else {
        (
            extent as i64 - 1,
            ((1.0 - coverage) * extent as f64) as i64,
            -1,
        )
    }
}

fn signed_steps(from: i64, to: i64, step: i64) -> Vec<i64> {
    let mut out = Vec::new();
    let mut current = from;
    while (step > 0 && current <= to) || (step < 0 && current >= to) {
        out.push(current);
        current += step;
    }
    out
}

fn check_coverage(coverage: (f64, f64)) -> Result<()> {
    for c in [coverage.0, coverage.1] {
        if !(0.0..=1.0).contains(&c) {
            return Err(Error::validation(
                "coverage",
                format!("expected fractions in [0, 1], got {c}"),
            ));
        }
    }
    Ok(())
}

/// Parallel strokes with implicit flyback between them.
#[derive(Debug, Clone)]
pub struct Raster {
    size: (u32, u32),
    skip: u32,
    start: Corner,
    orientation: Orientation,
    coverage: (f64, f64),
}

impl Raster {
    /// Creates a raster design over a scan square.
    pub fn new(
        size: (u32, u32),
        skip: u32,
        start: Corner,
        orientation: Orientation,
        coverage: (f64, f64),
    ) -> Result<Raster> {
        check_coverage(coverage)?;
        Ok(Raster {
            size,
            skip,
            start,
            orientation,
            coverage,
        })
    }
}

impl Design for Raster {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn encode(&self) -> Vec<Pattern> {
        let skip = (self.skip + 1) as i64;
        let (sx, ex, x_sign) = axis_setup(self.size.0, self.coverage.0, self.start.is_left());
        let (sy, ey, y_sign) = axis_setup(self.size.1, self.coverage.1, self.start.is_top());
        match self.orientation {
            Orientation::AlongX => signed_steps(sy, ey, skip * y_sign)
                .into_iter()
                .map(|y| Pattern::Stroke {
                    start: (sx as u32, y as u32),
                    end: (ex as u32, y as u32),
                    inclusive: true,
                })
                .collect(),
            Orientation::AlongY => signed_steps(sx, ex, skip * x_sign)
                .into_iter()
                .map(|x| Pattern::Stroke {
                    start: (x as u32, sy as u32),
                    end: (x as u32, ey as u32),
                    inclusive: true,
                })
                .collect(),
        }
    }
}

/// Alternating-direction strokes with perpendicular flyback.
#[derive(Debug, Clone)]
pub struct Snake {
    size: (u32, u32),
    skip: u32,
    start: Corner,
    orientation: Orientation,
    coverage: (f64, f64),
}

impl Snake {
    /// Creates a snake design over a scan square.
    pub fn new(
        size: (u32, u32),
        skip: u32,
        start: Corner,
        orientation: Orientation,
        coverage: (f64, f64),
    ) -> Result<Snake> {
        check_coverage(coverage)?;
        Ok(Snake {
            size,
            skip,
            start,
            orientation,
            coverage,
        })
    }
}

impl Design for Snake {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn encode(&self) -> Vec<Pattern> {
        let skip = (self.skip + 1) as i64;
        let (mut sx, mut ex, x_sign) = axis_setup(self.size.0, self.coverage.0, self.start.is_left());
        let (mut sy, mut ey, y_sign) = axis_setup(self.size.1, self.coverage.1, self.start.is_top());
        let mut out = Vec::new();
        match self.orientation {
            Orientation::AlongX => {
                for y in signed_steps(sy, ey, skip * y_sign) {
                    out.push(Pattern::Stroke {
                        start: (sx as u32, y as u32),
                        end: (ex as u32, y as u32),
                        inclusive: true,
                    });
                    std::mem::swap(&mut sx, &mut ex);
                }
            }
            Orientation::AlongY => {
                for x in signed_steps(sx, ex, skip * x_sign) {
                    out.push(Pattern::Stroke {
                        start: (x as u32, sy as u32),
                        end: (x as u32, ey as u32),
                        inclusive: true,
                    });
                    std::mem::swap(&mut sy, &mut ey);
                }
            }
        }
        out
    }
}

/// A square spiral of strokes, shrinking (or growing) by `skip` each turn.
#[derive(Debug, Clone)]
pub struct Spiral {
    size: (u32, u32),
    skip: u32,
    start: Corner,
    winding: Winding,
    coverage: (f64, f64),
}

impl Spiral {
    /// Creates a spiral design over a scan square.
    pub fn new(
        size: (u32, u32),
        skip: u32,
        start: Corner,
        winding: Winding,
        coverage: (f64, f64),
    ) -> Result<Spiral> {
        check_coverage(coverage)?;
        Ok(Spiral {
            size,
            skip,
            start,
            winding,
            coverage,
        })
    }
}

impl Design for Spiral {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn encode(&self) -> Vec<Pattern> {
        let skip = (self.skip + 1) as i64;
        let (mut left, mut right, h_sign) =
            axis_setup(self.size.0, self.coverage.0, self.start.is_left());
        let (mut top, mut bottom, v_sign) =
            axis_setup(self.size.1, self.coverage.1, self.start.is_top());

        fn valid(minimum: i64, maximum: i64, sign: i64) -> bool {
            if sign == 1 {
                minimum < maximum
            } else {
                minimum > maximum
            }
        }

        let stroke = |a: (i64, i64), b: (i64, i64)| Pattern::Stroke {
            start: (a.0 as u32, a.1 as u32),
            end: (b.0 as u32, b.1 as u32),
            inclusive: false,
        };

        let mut out = Vec::new();
        let mut complete = false;
        while valid(left + skip * h_sign, right - skip * h_sign, h_sign)
            && valid(top + skip * v_sign, bottom - skip * v_sign, v_sign)
        {
            out.push(stroke((left, top), (right, top)));
            if complete {
                bottom -= skip * v_sign;
                if !valid(top, bottom, v_sign) {
                    break;
                }
            }
            out.push(stroke((right, top), (right, bottom)));
            if complete {
                left += skip * h_sign;
                if !valid(left, right, h_sign) {
                    break;
                }
            }
            out.push(stroke((right, bottom), (left, bottom)));
            top += skip * v_sign;
            if !valid(top, bottom, v_sign) {
                break;
            }
            out.push(stroke((left, bottom), (left, top)));
            right -= skip * h_sign;
            if !valid(left, right, h_sign) {
                break;
            }
            complete = true;
        }
        if self.winding == Winding::InsideOut {
            out.reverse();
            for pattern in &mut out {
                pattern.reverse();
            }
        }
        out
    }
}

/// Discrete points on a lattice.
#[derive(Debug, Clone)]
pub struct GridDesign {
    size: (u32, u32),
    gap: (u32, u32),
    shift: (u32, u32),
    order: GridOrder,
    coverage: (f64, f64),
}

impl GridDesign {
    /// Creates a lattice design over a scan square.
    pub fn new(
        size: (u32, u32),
        gap: (u32, u32),
        shift: (u32, u32),
        order: GridOrder,
        coverage: (f64, f64),
    ) -> Result<GridDesign> {
        check_coverage(coverage)?;
        if gap.0 == 0 || gap.1 == 0 {
            return Err(Error::validation("grid gap", "must be at least 1"));
        }
        Ok(GridDesign {
            size,
            gap,
            shift,
            order,
            coverage,
        })
    }

    fn lattice(&self) -> (Vec<u32>, Vec<u32>) {
        let covered = (
            (self.size.0 as f64 * self.coverage.0) as u32,
            (self.size.1 as f64 * self.coverage.1) as u32,
        );
        let end_x = (covered.0 + self.shift.0).min(self.size.0);
        let end_y = (covered.1 + self.shift.1).min(self.size.1);
        let xs = (self.shift.0..end_x).step_by(self.gap.0 as usize).collect();
        let ys = (self.shift.1..end_y).step_by(self.gap.1 as usize).collect();
        (xs, ys)
    }
}

impl Design for GridDesign {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn encode(&self) -> Vec<Pattern> {
        let (mut xs, mut ys) = self.lattice();
        if !self.order.start.is_left() {
            xs.reverse();
        }
        if !self.order.start.is_top() {
            ys.reverse();
        }
        let mut out = Vec::with_capacity(xs.len() * ys.len());
        match self.order.major {
            Traversal::RowMajor => {
                for &y in &ys {
                    for &x in &xs {
                        out.push(Pattern::Point { position: (x, y) });
                    }
                }
            }
            Traversal::ColumnMajor => {
                for &x in &xs {
                    for &y in &ys {
                        out.push(Pattern::Point { position: (x, y) });
                    }
                }
            }
        }
        out
    }
}

/// The random distributions a sparse design can sample from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandomKind {
    /// Exponential with the given scale.
    Exp {
        /// Mean of the distribution.
        scale: f64,
    },
    /// Laplace around `loc`.
    Laplace {
        /// Centre of the distribution.
        loc: f64,
        /// Diversity parameter.
        scale: f64,
    },
    /// Logistic around `loc`.
    Logistic {
        /// Centre of the distribution.
        loc: f64,
        /// Scale parameter.
        scale: f64,
    },
    /// Normal around `loc`.
    Normal {
        /// Mean of the distribution.
        loc: f64,
        /// Standard deviation.
        scale: f64,
    },
    /// Poisson with the given rate.
    Poisson {
        /// Expected value.
        lambda: f64,
    },
    /// Uniform over `[low, high)`.
    Uniform {
        /// Inclusive lower bound.
        low: f64,
        /// Exclusive upper bound.
        high: f64,
    },
}

/// `n` samples from a distribution, filtered to the covered rectangle,
/// integer-rounded and deduplicated in draw order.
#[derive(Debug, Clone)]
pub struct RandomDesign {
    size: (u32, u32),
    kind: RandomKind,
    n: usize,
    coverage: (f64, f64),
    seed: u64,
}

impl RandomDesign {
    /// Creates a random design over a scan square. The seed makes encodes
    /// repeatable between the mask and the scan.
    pub fn new(
        size: (u32, u32),
        kind: RandomKind,
        n: usize,
        coverage: (f64, f64),
        seed: u64,
    ) -> Result<RandomDesign> {
        check_coverage(coverage)?;
        if n == 0 {
            return Err(Error::validation("sample count", "must be at least 1"));
        }
        if let RandomKind::Uniform { low, high } = kind {
            if low >= high {
                return Err(Error::validation(
                    "uniform bounds",
                    format!("low {low} must be below high {high}"),
                ));
            }
        }
        Ok(RandomDesign {
            size,
            kind,
            n,
            coverage,
            seed,
        })
    }

    fn samples(&self) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let count = self.n * 2;
        match self.kind {
            RandomKind::Exp { scale } => {
                let dist = Exp::new(1.0 / scale.max(f64::MIN_POSITIVE)).expect("positive rate");
                (0..count).map(|_| dist.sample(&mut rng)).collect()
            }
            RandomKind::Laplace { loc, scale } => (0..count)
                .map(|_| {
                    let u: f64 = rng.gen_range(-0.5..0.5);
                    loc - scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
                })
                .collect(),
            RandomKind::Logistic { loc, scale } => (0..count)
                .map(|_| {
                    let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                    loc + scale * (u / (1.0 - u)).ln()
                })
                .collect(),
            RandomKind::Normal { loc, scale } => {
                let dist = Normal::new(loc, scale.abs()).expect("finite parameters");
                (0..count).map(|_| dist.sample(&mut rng)).collect()
            }
            RandomKind::Poisson { lambda } => {
                let dist = Poisson::new(lambda.max(f64::MIN_POSITIVE)).expect("positive rate");
                (0..count).map(|_| dist.sample(&mut rng)).collect()
            }
            RandomKind::Uniform { low, high } => {
                let dist = Uniform::new(low, high);
                (0..count).map(|_| dist.sample(&mut rng)).collect()
            }
        }
    }
}

impl Design for RandomDesign {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn encode(&self) -> Vec<Pattern> {
        let covered = (
            (self.size.0 as f64 * self.coverage.0) as i64,
            (self.size.1 as f64 * self.coverage.1) as i64,
        );
        let samples = self.samples();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for pair in samples.chunks_exact(2) {
            let y = pair[0].round() as i64;
            let x = pair[1].round() as i64;
            if x < 0 || y < 0 || x >= covered.0 || y >= covered.1 {
                continue;
            }
            if seen.insert((x, y)) {
                out.push(Pattern::Point {
                    position: (x as u32, y as u32),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stroke_decoding_is_ordered() {
        let stroke = Pattern::Stroke {
            start: (0, 0),
            end: (4, 0),
            inclusive: true,
        };
        assert_eq!(
            stroke.decode(),
            vec![(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]
        );
        let exclusive = Pattern::Stroke {
            start: (4, 0),
            end: (0, 0),
            inclusive: false,
        };
        assert_eq!(exclusive.decode(), vec![(4, 0), (3, 0), (2, 0), (1, 0)]);
        let vertical = Pattern::Stroke {
            start: (2, 5),
            end: (2, 2),
            inclusive: true,
        };
        assert_eq!(vertical.decode(), vec![(2, 5), (2, 4), (2, 3), (2, 2)]);
    }

    #[test]
    fn snake_alternates_direction() {
        let snake = Snake::new(
            (10, 10),
            0,
            Corner::TopLeft,
            Orientation::AlongX,
            (1.0, 1.0),
        )
        .unwrap();
        let strokes = snake.encode();
        assert_eq!(strokes.len(), 10);
        let points: Vec<(u32, u32)> = strokes.iter().flat_map(Pattern::decode).collect();
        assert_eq!(points.len(), 100);
        assert_eq!(points[0], (0, 0));
        assert_eq!(points[9], (9, 0));
        assert_eq!(points[10], (9, 1));
        // Ten rows is an even count, so the final row runs right to left.
        assert_eq!(*points.last().unwrap(), (0, 9));
    }

    #[test]
    fn raster_always_runs_the_same_way() {
        let raster = Raster::new(
            (6, 6),
            0,
            Corner::TopLeft,
            Orientation::AlongX,
            (1.0, 1.0),
        )
        .unwrap();
        for stroke in raster.encode() {
            let points = stroke.decode();
            assert_eq!(points.first().unwrap().0, 0);
            assert_eq!(points.last().unwrap().0, 5);
        }
    }

    #[test]
    fn raster_skip_leaves_gaps() {
        let raster = Raster::new(
            (6, 6),
            1,
            Corner::TopLeft,
            Orientation::AlongX,
            (1.0, 1.0),
        )
        .unwrap();
        let mask = raster.draw();
        assert_eq!(mask.get(0, 0), 255);
        assert_eq!(mask.get(0, 1), 0);
        assert_eq!(mask.get(0, 2), 255);
    }

    #[test]
    fn raster_from_bottom_right_descends() {
        let raster = Raster::new(
            (6, 6),
            0,
            Corner::BottomRight,
            Orientation::AlongX,
            (1.0, 1.0),
        )
        .unwrap();
        let strokes = raster.encode();
        let first = strokes[0].decode();
        assert_eq!(first[0], (5, 5));
        assert_eq!(*first.last().unwrap(), (0, 5));
    }

    #[test]
    fn coverage_limits_the_extent() {
        let snake = Snake::new(
            (10, 10),
            0,
            Corner::TopLeft,
            Orientation::AlongX,
            (0.5, 1.0),
        )
        .unwrap();
        let points: Vec<(u32, u32)> = snake.encode().iter().flat_map(Pattern::decode).collect();
        assert!(points.iter().all(|&(x, _)| x < 5));
        assert_eq!(points.len(), 50);
    }

    #[test]
    fn spiral_stays_inside_and_is_reversible() {
        let spiral = Spiral::new(
            (12, 12),
            0,
            Corner::TopLeft,
            Winding::OutsideIn,
            (1.0, 1.0),
        )
        .unwrap();
        let outward = Spiral::new(
            (12, 12),
            0,
            Corner::TopLeft,
            Winding::InsideOut,
            (1.0, 1.0),
        )
        .unwrap();
        let strokes = spiral.encode();
        assert!(!strokes.is_empty());
        let points: Vec<(u32, u32)> = strokes.iter().flat_map(Pattern::decode).collect();
        assert!(points.iter().all(|&(x, y)| x < 12 && y < 12));
        // The outward spiral walks the same strokes backwards.
        let inner: Vec<(u32, u32)> = outward.encode().iter().flat_map(Pattern::decode).collect();
        assert_eq!(points.first().unwrap(), &(0, 0));
        assert_eq!(inner.len(), points.len());
    }

    #[test]
    fn grid_orders_start_from_their_corner() {
        let base = |order| {
            GridDesign::new((8, 8), (2, 2), (0, 0), order, (1.0, 1.0))
                .unwrap()
                .encode()
        };
        let tl = base(GridOrder {
            major: Traversal::RowMajor,
            start: Corner::TopLeft,
        });
        assert_eq!(tl.len(), 16);
        assert_eq!(tl[0], Pattern::Point { position: (0, 0) });
        assert_eq!(tl[1], Pattern::Point { position: (2, 0) });
        let br = base(GridOrder {
            major: Traversal::RowMajor,
            start: Corner::BottomRight,
        });
        assert_eq!(br[0], Pattern::Point { position: (6, 6) });
        let col = base(GridOrder {
            major: Traversal::ColumnMajor,
            start: Corner::TopLeft,
        });
        assert_eq!(col[1], Pattern::Point { position: (0, 2) });
    }

    #[test]
    fn grid_shift_moves_the_lattice() {
        let design = GridDesign::new(
            (8, 8),
            (4, 4),
            (1, 1),
            GridOrder {
                major: Traversal::RowMajor,
                start: Corner::TopLeft,
            },
            (1.0, 1.0),
        )
        .unwrap();
        let mask = design.draw();
        assert_eq!(mask.get(1, 1), 255);
        assert_eq!(mask.get(0, 0), 0);
        assert_eq!(mask.get(5, 5), 255);
    }

    #[test]
    fn random_points_are_unique_and_covered() {
        let design = RandomDesign::new(
            (32, 32),
            RandomKind::Uniform {
                low: 0.0,
                high: 32.0,
            },
            64,
            (0.5, 1.0),
            7,
        )
        .unwrap();
        let points: Vec<(u32, u32)> = design.encode().iter().flat_map(Pattern::decode).collect();
        assert!(!points.is_empty());
        let unique: std::collections::HashSet<_> = points.iter().collect();
        assert_eq!(unique.len(), points.len());
        assert!(points.iter().all(|&(x, y)| x < 16 && y < 32));
    }

    #[test]
    fn random_encoding_is_repeatable_for_a_seed() {
        let make = || {
            RandomDesign::new(
                (32, 32),
                RandomKind::Normal {
                    loc: 16.0,
                    scale: 6.0,
                },
                64,
                (1.0, 1.0),
                42,
            )
            .unwrap()
            .encode()
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn random_rejects_bad_parameters() {
        assert!(RandomDesign::new(
            (8, 8),
            RandomKind::Uniform {
                low: 5.0,
                high: 5.0
            },
            4,
            (1.0, 1.0),
            0
        )
        .is_err());
        assert!(RandomDesign::new(
            (8, 8),
            RandomKind::Poisson { lambda: 4.0 },
            0,
            (1.0, 1.0),
            0
        )
        .is_err());
    }

    #[test]
    fn draw_matches_encode() {
        let snake = Snake::new(
            (10, 10),
            0,
            Corner::TopLeft,
            Orientation::AlongX,
            (1.0, 1.0),
        )
        .unwrap();
        let mask = snake.draw();
        assert_eq!(mask.count_nonzero(), 100);
    }
}
