//! The ordered preprocessing pipeline that turns a survey scan into the
//! binary image the cluster extractor consumes.
//!
//! Stages can be enabled, disabled and reordered freely; the operators are
//! independent of each other. The range-threshold bounds are shared between
//! the `threshold` and `edge` stages, mirroring how the thresholding page of
//! the original instrument software exposed a single minima/maxima pair.

use crate::error::{Error, Result};
use crate::image::ops::{self, MorphKind, MorphShape};
use crate::image::GreyImage;

/// Parameters common to every morphological stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphParams {
    /// Kernel rows (odd).
    pub height: u32,
    /// Kernel columns (odd).
    pub width: u32,
    /// Structuring element shape.
    pub shape: MorphShape,
    /// Radius multiplier for the structuring element.
    pub multiplier: u32,
    /// Number of times the transform is applied.
    pub repeats: u32,
}

impl Default for MorphParams {
    fn default() -> Self {
        MorphParams {
            height: 5,
            width: 5,
            shape: MorphShape::Rect,
            multiplier: 1,
            repeats: 1,
        }
    }
}

/// A single parameterized transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    /// Box blur.
    Blur {
        /// Kernel rows (odd).
        height: u32,
        /// Kernel columns (odd).
        width: u32,
    },
    /// Gaussian blur; zero sigmas are derived from the kernel size.
    GaussianBlur {
        /// Kernel rows (odd).
        height: u32,
        /// Kernel columns (odd).
        width: u32,
        /// Horizontal standard deviation.
        sigma_x: f64,
        /// Vertical standard deviation.
        sigma_y: f64,
    },
    /// Laplacian sharpening.
    Sharpen {
        /// Kernel side (odd).
        size: u32,
        /// Scaling factor for the high-pass residual.
        scale: f64,
        /// Constant added to every output pixel.
        delta: f64,
    },
    /// Median filter.
    Median {
        /// Kernel side (odd).
        size: u32,
    },
    /// Canny edge detection using the pipeline's threshold bounds.
    Edge {
        /// Aperture side (odd).
        size: u32,
    },
    /// Range threshold using the pipeline's threshold bounds.
    Threshold,
    /// Morphological transform.
    Morph {
        /// Which compound transform to run.
        kind: MorphKind,
        /// Kernel and repetition parameters.
        params: MorphParams,
    },
}

impl Operator {
    /// Whether the operator guarantees a binary output, which is what the
    /// cluster extractor downstream requires.
    pub fn is_binarising(&self) -> bool {
        matches!(self, Operator::Threshold | Operator::Edge { .. })
    }
}

/// One slot in the pipeline: an operator plus its enablement.
#[derive(Debug, Clone)]
pub struct Stage {
    operator: Operator,
    enabled: bool,
}

impl Stage {
    /// Returns the operator held by this stage.
    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Returns whether the stage participates in a run.
    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

/// An ordered, enable/disable-able list of operators.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
    minima: u8,
    maxima: u8,
    invert: bool,
}

impl Pipeline {
    /// Creates an empty pipeline with the given threshold bounds.
    pub fn new(minima: u8, maxima: u8) -> Result<Pipeline> {
        if minima >= maxima {
            return Err(Error::validation(
                "threshold bounds",
                format!("minima {minima} must be below maxima {maxima}"),
            ));
        }
        Ok(Pipeline {
            stages: Vec::new(),
            minima,
            maxima,
            invert: false,
        })
    }

    /// The default survey pipeline: a lone threshold stage.
    pub fn survey_default() -> Pipeline {
        let mut pipeline = Pipeline::new(30, 60).expect("static bounds are ordered");
        pipeline.push(Operator::Threshold);
        pipeline
    }

    /// Appends an enabled stage.
    pub fn push(&mut self, operator: Operator) {
        self.stages.push(Stage {
            operator,
            enabled: true,
        });
    }

    /// Returns the stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Lower threshold bound.
    #[inline]
    pub fn minima(&self) -> u8 {
        self.minima
    }

    /// Upper threshold bound.
    #[inline]
    pub fn maxima(&self) -> u8 {
        self.maxima
    }

    /// Whether threshold and edge outputs are inverted.
    #[inline]
    pub fn inverted(&self) -> bool {
        self.invert
    }

    /// Replaces the shared threshold bounds.
    pub fn set_bounds(&mut self, minima: u8, maxima: u8) -> Result<()> {
        if minima >= maxima {
            return Err(Error::validation(
                "threshold bounds",
                format!("minima {minima} must be below maxima {maxima}"),
            ));
        }
        self.minima = minima;
        self.maxima = maxima;
        Ok(())
    }

    /// Sets whether threshold and edge outputs are inverted.
    pub fn set_inverted(&mut self, invert: bool) {
        self.invert = invert;
    }

    /// Enables or disables the stage at `index`.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<()> {
        let stage = self.stages.get_mut(index).ok_or_else(|| {
            Error::validation("stage index", format!("no stage at position {index}"))
        })?;
        stage.enabled = enabled;
        Ok(())
    }

    /// Swaps the order of two stages. Operators are independent, so any
    /// ordering is legal.
    pub fn reorder(&mut self, a: usize, b: usize) -> Result<()> {
        if a >= self.stages.len() || b >= self.stages.len() {
            return Err(Error::validation(
                "stage index",
                format!("cannot swap {a} and {b} in {} stages", self.stages.len()),
            ));
        }
        self.stages.swap(a, b);
        Ok(())
    }

    /// Runs every enabled stage in order, returning the transformed image.
    ///
    /// With zero enabled stages the input is returned byte-for-byte. Any
    /// operator failure is terminal for the run; the caller keeps its last
    /// successful image.
    pub fn run(&self, input: &GreyImage) -> Result<GreyImage> {
        let mut current = input.clone();
        for stage in self.stages.iter().filter(|s| s.enabled) {
            current = self.apply(&stage.operator, &current)?;
        }
        Ok(current)
    }

    fn apply(&self, operator: &Operator, img: &GreyImage) -> Result<GreyImage> {
        match *operator {
            Operator::Blur { height, width } => ops::blur(img, height, width),
            Operator::GaussianBlur {
                height,
                width,
                sigma_x,
                sigma_y,
            } => ops::gaussian_blur(img, height, width, sigma_x, sigma_y),
            Operator::Sharpen { size, scale, delta } => ops::sharpen(img, size, scale, delta),
            Operator::Median { size } => ops::median(img, size),
            Operator::Edge { size } => ops::edge(img, size, self.minima, self.maxima, self.invert),
            Operator::Threshold => Ok(ops::threshold(img, self.minima, self.maxima, self.invert)),
            Operator::Morph { kind, params } => ops::morphology(
                img,
                kind,
                params.height,
                params.width,
                params.shape,
                params.multiplier,
                params.repeats,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image() -> GreyImage {
        let data = (0..64).map(|i| (i * 4) as u8).collect();
        GreyImage::from_raw(8, 8, data).unwrap()
    }

    #[test]
    fn bounds_must_be_ordered() {
        assert!(Pipeline::new(60, 30).is_err());
        assert!(Pipeline::new(60, 60).is_err());
        let mut pipeline = Pipeline::new(30, 60).unwrap();
        assert!(pipeline.set_bounds(100, 90).is_err());
        assert!(pipeline.set_bounds(10, 90).is_ok());
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let pipeline = Pipeline::new(30, 60).unwrap();
        let input = gradient_image();
        assert_eq!(pipeline.run(&input).unwrap(), input);
    }

    #[test]
    fn disabled_stages_are_identity_too() {
        let mut pipeline = Pipeline::new(30, 60).unwrap();
        pipeline.push(Operator::Blur {
            height: 3,
            width: 3,
        });
        pipeline.push(Operator::Threshold);
        pipeline.set_enabled(0, false).unwrap();
        pipeline.set_enabled(1, false).unwrap();
        let input = gradient_image();
        assert_eq!(pipeline.run(&input).unwrap(), input);
    }

    #[test]
    fn threshold_stage_leaves_a_binary_image() {
        let mut pipeline = Pipeline::new(30, 60).unwrap();
        pipeline.push(Operator::Blur {
            height: 3,
            width: 3,
        });
        pipeline.push(Operator::Threshold);
        let out = pipeline.run(&gradient_image()).unwrap();
        assert!(out.is_binary());
    }

    #[test]
    fn invalid_operator_parameters_fail_the_run() {
        let mut pipeline = Pipeline::new(30, 60).unwrap();
        pipeline.push(Operator::Blur {
            height: 2,
            width: 2,
        });
        assert!(pipeline.run(&gradient_image()).is_err());
    }

    #[test]
    fn reorder_swaps_stages() {
        let mut pipeline = Pipeline::new(30, 60).unwrap();
        pipeline.push(Operator::Threshold);
        pipeline.push(Operator::Median { size: 3 });
        pipeline.reorder(0, 1).unwrap();
        assert!(matches!(
            pipeline.stages()[0].operator(),
            Operator::Median { .. }
        ));
        assert!(pipeline.reorder(0, 5).is_err());
    }

    #[test]
    fn inverted_threshold_flips_foreground() {
        let mut pipeline = Pipeline::new(30, 60).unwrap();
        pipeline.push(Operator::Threshold);
        let input = GreyImage::from_raw(2, 1, vec![45, 200]).unwrap();
        let plain = pipeline.run(&input).unwrap();
        pipeline.set_inverted(true);
        let flipped = pipeline.run(&input).unwrap();
        assert_eq!(plain.get(0, 0), 0);
        assert_eq!(flipped.get(0, 0), 255);
        assert_eq!(plain.get(1, 0), 255);
        assert_eq!(flipped.get(1, 0), 0);
    }
}
