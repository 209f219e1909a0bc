//! Face detection over an image pyramid.
//!
//! The detector runs the MediaPipe short-range face detection network ("BlazeFace") over several
//! centered views of the frame, each one shrunk by a constant scale factor relative to the
//! previous one. Raw detections from all levels are clustered with non-maximum suppression, and a
//! cluster only counts as a face when enough raw detections support it.

use anyhow::ensure;
use once_cell::sync::Lazy;

use crate::detection::{
    ssd::{self, AnchorParams, Anchors, LayerInfo},
    Detection, Detector, Network,
};
use crate::image::{AsImageView, ImageView, Rect};
use crate::models::{self, ModelDir};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};
use crate::timer::Timer;

/// Eyes, nose, mouth and ears.
const NUM_KEYPOINTS: usize = 6;

static ANCHORS: Lazy<Anchors> = Lazy::new(|| {
    Anchors::calculate(&AnchorParams {
        layers: &[LayerInfo::new(2, 16, 16), LayerInfo::new(6, 8, 8)],
    })
});

/// The short-range face detection network, for faces within ~2 meters of the camera.
pub struct ShortRangeNetwork {
    cnn: Cnn,
}

impl ShortRangeNetwork {
    pub fn load(models: &ModelDir) -> anyhow::Result<Self> {
        let nn = NeuralNetwork::from_path(models.path(models::FACE_DETECTION)?)?.load()?;
        let cnn = Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(-1.0..=1.0))?;
        Ok(Self { cnn })
    }
}

impl Network for ShortRangeNetwork {
    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()> {
        ssd::decode(
            self.cnn.input_resolution(),
            &ANCHORS,
            outputs.view(0)?,
            outputs.view(1)?,
            NUM_KEYPOINTS,
            threshold,
            detections,
        )
    }
}

/// Tuning parameters of a [`FaceDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceDetectorOptions {
    scale_factor: f32,
    min_neighbors: usize,
    pyramid_levels: u32,
    threshold: f32,
}

impl Default for FaceDetectorOptions {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            pyramid_levels: 3,
            threshold: 0.5,
        }
    }
}

impl FaceDetectorOptions {
    /// Sets how much each pyramid level shrinks the frame compared to the previous one.
    ///
    /// Must be greater than 1.0. The default is 1.1.
    pub fn scale_factor(self, scale_factor: f32) -> Self {
        Self {
            scale_factor,
            ..self
        }
    }

    /// Sets the number of raw detections a face needs to be reported.
    ///
    /// The default is 5. Values of 0 and 1 report every cluster.
    pub fn min_neighbors(self, min_neighbors: usize) -> Self {
        Self {
            min_neighbors,
            ..self
        }
    }

    /// Sets the number of pyramid levels to run the network on. Must be at least 1.
    pub fn pyramid_levels(self, pyramid_levels: u32) -> Self {
        Self {
            pyramid_levels,
            ..self
        }
    }

    /// Sets the minimum confidence of a raw detection.
    pub fn threshold(self, threshold: f32) -> Self {
        Self { threshold, ..self }
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.scale_factor > 1.0,
            "face detector scale factor must be greater than 1.0, got {}",
            self.scale_factor
        );
        ensure!(
            self.pyramid_levels >= 1,
            "face detector needs at least one pyramid level"
        );
        ensure!(
            (0.0..=1.0).contains(&self.threshold),
            "face detection threshold must be in range 0.0 to 1.0, got {}",
            self.threshold
        );
        Ok(())
    }

    /// Returns the rectangles the network runs on, one per pyramid level, for an image covering
    /// `full`.
    fn pyramid(&self, full: Rect) -> impl Iterator<Item = Rect> + '_ {
        (0..self.pyramid_levels).map(move |level| {
            let shrink = self.scale_factor.powi(level as i32);
            full.scale(1.0 / shrink)
        })
    }
}

/// Detects faces in an image.
pub struct FaceDetector<N: Network = ShortRangeNetwork> {
    detector: Detector<N>,
    options: FaceDetectorOptions,
    raw: Vec<Detection>,
    t_pyramid: Timer,
}

impl FaceDetector {
    /// Loads the short-range face detection network from `models` and uses default options.
    pub fn new(models: &ModelDir) -> anyhow::Result<Self> {
        Self::with_options(models, FaceDetectorOptions::default())
    }

    pub fn with_options(models: &ModelDir, options: FaceDetectorOptions) -> anyhow::Result<Self> {
        Self::from_network(ShortRangeNetwork::load(models)?, options)
    }
}

impl<N: Network> FaceDetector<N> {
    /// Creates a face detector running `network`.
    ///
    /// Returns an error if `options` are invalid.
    pub fn from_network(network: N, options: FaceDetectorOptions) -> anyhow::Result<Self> {
        options.validate()?;

        let mut detector = Detector::new(network);
        detector.set_threshold(options.threshold);
        detector.nms_mut().set_min_neighbors(options.min_neighbors);
        Ok(Self {
            detector,
            options,
            raw: Vec::new(),
            t_pyramid: Timer::new("pyramid"),
        })
    }

    /// Detects faces in `image`, returning their bounding boxes in `image`'s coordinates.
    ///
    /// Boxes are clamped to `image`; boxes entirely outside of it are dropped.
    pub fn detect<V: AsImageView>(&mut self, image: &V) -> anyhow::Result<Vec<Rect>> {
        self.detect_impl(image.as_view())
    }

    fn detect_impl(&mut self, image: ImageView<'_>) -> anyhow::Result<Vec<Rect>> {
        let full = image.rect();
        self.raw.clear();

        let _guard = self.t_pyramid.start();
        for level in self.options.pyramid(full) {
            let start = self.raw.len();
            self.detector.detect_raw(&image.view(level), &mut self.raw)?;
            let (dx, dy) = view_origin(level);
            for det in &mut self.raw[start..] {
                det.map_coords(1.0, dx, dy);
            }
        }

        let faces = self
            .detector
            .nms_mut()
            .process(&mut self.raw)
            .filter_map(|det| clamp_to(det.bounding_rect(), &full))
            .collect::<Vec<_>>();
        log::trace!("{} faces from {} raw detections", faces.len(), self.raw.len());
        Ok(faces)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        std::iter::once(&self.t_pyramid).chain(self.detector.timers())
    }
}

/// Returns the top-left pixel of the view created for `level`.
///
/// Views start at whole pixels, so detections must be shifted by the rounded origin.
fn view_origin(level: Rect) -> (f32, f32) {
    let (x, y, _, _) = level.to_pixels();
    (x as f32, y as f32)
}

fn clamp_to(rect: Rect, bounds: &Rect) -> Option<Rect> {
    rect.intersection(bounds).filter(|rect| !rect.is_empty())
}
