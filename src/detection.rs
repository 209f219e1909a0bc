//! Common functionality for object detection.
//!
//! The face and palm detectors are both Single-Shot MultiBox Detectors that share anchor
//! generation, output decoding, and non-maximum suppression, implemented here.

pub mod nms;
pub mod ssd;

use crate::image::{AsImageView, ImageView, Rect, Resolution};
use crate::nn::{Cnn, Outputs};
use crate::timer::Timer;

use self::nms::NonMaxSuppression;

/// Trait implemented by neural networks that detect objects in an input image.
pub trait Network {
    /// Returns the [`Cnn`] to use for detection.
    fn cnn(&self) -> &Cnn;

    /// Extracts all detections with confidence above `threshold` from the network's output.
    ///
    /// Keypoint and detection positions are expected to be in the coordinate system of the
    /// network's input.
    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()>;
}

/// A generic single-class object detector.
///
/// This type wraps a [`Network`] for object detection.
pub struct Detector<N: Network> {
    network: N,
    detections: Vec<Detection>,
    t_infer: Timer,
    t_extract: Timer,
    t_nms: Timer,
    thresh: f32,
    nms: NonMaxSuppression,
}

impl<N: Network> Detector<N> {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new(network: N) -> Self {
        Self {
            network,
            detections: Vec::new(),
            t_infer: Timer::new("infer"),
            t_extract: Timer::new("extract"),
            t_nms: Timer::new("nms"),
            thresh: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
        }
    }

    pub fn input_resolution(&self) -> Resolution {
        self.network.cnn().input_resolution()
    }

    #[inline]
    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    pub fn nms_mut(&mut self) -> &mut NonMaxSuppression {
        &mut self.nms
    }

    /// Runs the network on `image` and appends all raw detections to `out`.
    ///
    /// No non-maximum suppression is performed. Coordinates are mapped back into `image`'s
    /// coordinate system.
    pub fn detect_raw<V: AsImageView>(
        &mut self,
        image: &V,
        out: &mut Vec<Detection>,
    ) -> anyhow::Result<()> {
        self.detect_raw_impl(image.as_view(), out)
    }

    fn detect_raw_impl(
        &mut self,
        image: ImageView<'_>,
        out: &mut Vec<Detection>,
    ) -> anyhow::Result<()> {
        let cnn = self.network.cnn();
        let input_res = cnn.input_resolution();
        let Some(input_aspect) = input_res.aspect_ratio() else {
            anyhow::bail!("network input resolution {input_res} is empty");
        };

        // If the input image's aspect ratio doesn't match the CNN's input, create an oversized view
        // that does.
        let rect = image.rect().grow_to_fit_aspect(input_aspect);
        let view = image.view(rect);
        let outputs = self.t_infer.time(|| cnn.estimate(&view))?;

        let start = out.len();
        self.t_extract
            .time(|| self.network.extract(&outputs, self.thresh, out))?;

        // Map all coordinates from the network's input coordinate system to `rect`'s system, then
        // remove the offset added by the oversized rectangle.
        let scale = rect.width() / input_res.width() as f32;
        for det in &mut out[start..] {
            det.map_coords(scale, rect.x(), rect.y());
        }

        Ok(())
    }

    /// Runs the network on `image` and returns the deduplicated detections.
    pub fn detect<V: AsImageView>(&mut self, image: &V) -> anyhow::Result<&[Detection]> {
        let mut raw = std::mem::take(&mut self.detections);
        raw.clear();
        self.detect_raw(image, &mut raw)?;

        let nms = &mut self.nms;
        self.detections = self.t_nms.time(|| nms.process(&mut raw).collect());
        Ok(&self.detections)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract, &self.t_nms].into_iter()
    }
}

/// A detected object.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the detected object, a confidence value, and a
/// possibly empty set of located keypoints.
///
/// The confidence value lies between 0.0 and 1.0 (the raw network output is passed through
/// [`crate::num::sigmoid`]). It is used as the weight when averaging overlapping detections.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    confidence: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self {
            confidence,
            rect,
            keypoints: Vec::new(),
        }
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the axis-aligned bounding rectangle containing the detected object.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// Scales all coordinates by `scale`, then translates them by `(dx, dy)`.
    pub fn map_coords(&mut self, scale: f32, dx: f32, dy: f32) {
        let rect = self.rect;
        self.rect = Rect::from_center(
            rect.x_center() * scale + dx,
            rect.y_center() * scale + dy,
            rect.width() * scale,
            rect.height() * scale,
        );
        for kp in &mut self.keypoints {
            kp.x = kp.x * scale + dx;
            kp.y = kp.y * scale + dy;
        }
    }
}

/// A 2D keypoint produced by a detector, like the position of an eye or a knuckle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.y
    }
}
