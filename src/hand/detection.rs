//! Palm detection.

use nalgebra::Vector2;
use once_cell::sync::Lazy;

use crate::detection::{
    ssd::{self, AnchorParams, Anchors, LayerInfo},
    Detection, Detector, Network,
};
use crate::image::{AsImageView, AspectRatio, Rect};
use crate::models::{self, ModelDir};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};
use crate::timer::Timer;

/// A keypoint of a palm [`Detection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

const NUM_KEYPOINTS: usize = 7;

static ANCHORS: Lazy<Anchors> = Lazy::new(|| {
    Anchors::calculate(&AnchorParams {
        layers: &[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)],
    })
});

/// The full-range palm detection network.
pub struct PalmNetwork {
    cnn: Cnn,
}

impl PalmNetwork {
    pub fn load(models: &ModelDir) -> anyhow::Result<Self> {
        let nn = NeuralNetwork::from_path(models.path(models::PALM_DETECTION)?)?.load()?;
        let cnn = Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?;
        Ok(Self { cnn })
    }
}

impl Network for PalmNetwork {
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

/// Detects palms and keeps the most confident ones.
pub struct PalmDetector<N: Network = PalmNetwork> {
    detector: Detector<N>,
}

/// Minimum confidence of a palm detection.
const THRESHOLD: f32 = 0.7;
/// Number of palms reported per frame.
const MAX_PALMS: usize = 2;

impl PalmDetector {
    pub fn new(models: &ModelDir) -> anyhow::Result<Self> {
        Ok(Self::from_network(PalmNetwork::load(models)?))
    }
}

impl<N: Network> PalmDetector<N> {
    pub fn from_network(network: N) -> Self {
        let mut detector = Detector::new(network);
        detector.set_threshold(THRESHOLD);
        Self { detector }
    }

    /// Returns the two most confident palm detections, most confident first.
    pub fn detect<V: AsImageView>(&mut self, image: &V) -> anyhow::Result<Vec<Detection>> {
        let mut palms = self.detector.detect(image)?.to_vec();
        keep_most_confident(&mut palms, MAX_PALMS);
        Ok(palms)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        self.detector.timers()
    }
}

/// Sorts `palms` by descending confidence and drops all but the first `max`.
fn keep_most_confident(palms: &mut Vec<Detection>, max: usize) {
    palms.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
    palms.truncate(max);
}

/// Factor by which the palm box is enlarged to cover the whole hand.
const PALM_TO_HAND: f32 = 2.6;
/// Shift of the hand region toward the fingers, relative to the palm box height.
const FINGER_SHIFT: f32 = 0.5;

/// Computes the square region around the whole hand that belongs to a palm detection.
///
/// The region is shifted along the wrist to middle finger direction, so it covers the fingers. If
/// the detection has no keypoints, the region is shifted upwards.
pub fn hand_region(palm: &Detection) -> Rect {
    let rect = palm.bounding_rect();
    let kps = palm.keypoints();
    let direction = match (
        kps.get(Keypoint::Wrist as usize),
        kps.get(Keypoint::MiddleFingerMcp as usize),
    ) {
        (Some(wrist), Some(finger)) => {
            let dir = Vector2::new(finger.x() - wrist.x(), finger.y() - wrist.y());
            dir.try_normalize(f32::EPSILON)
                .unwrap_or_else(|| Vector2::new(0.0, -1.0))
        }
        _ => Vector2::new(0.0, -1.0),
    };

    let shift = direction * rect.height() * FINGER_SHIFT;
    rect.move_by(shift.x, shift.y)
        .scale(PALM_TO_HAND)
        .grow_to_fit_aspect(AspectRatio::SQUARE)
}
