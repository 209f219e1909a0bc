//! Hand landmark detection and gesture recognition.
//!
//! [`HandTracker`] finds palms in a frame, crops the region around each palm and estimates the 21
//! hand landmarks in it. [`HandPipeline`] turns each set of landmarks into a [`FingerVector`] and a
//! [`Gesture`].

pub mod detection;
pub mod gesture;
pub mod landmark;

use std::fmt;

use anyhow::ensure;

use crate::image::{AsImageView, ImageView, Resolution};
use crate::landmark::{Confidence, Estimator, Landmark, Landmarks};
use crate::models::ModelDir;
use crate::timer::Timer;

use self::detection::{hand_region, PalmDetector};
use self::landmark::{FullNetwork, NUM_LANDMARKS};

pub use self::gesture::{FingerVector, Gesture};
pub use self::landmark::{LandmarkIdx, CONNECTIVITY};

/// The 21 landmarks of a hand, in normalized frame coordinates.
///
/// X and Y are relative to the frame's width and height, so that `(0.0, 0.0)` is the top left
/// corner and `(1.0, 1.0)` the bottom right corner of the frame. Z is scaled like X.
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    landmarks: Landmarks,
}

impl HandLandmarks {
    /// Wraps normalized `landmarks`, which must contain exactly 21 entries.
    pub fn new(landmarks: Landmarks) -> anyhow::Result<Self> {
        ensure!(
            landmarks.len() == NUM_LANDMARKS,
            "a hand has {NUM_LANDMARKS} landmarks, got {}",
            landmarks.len()
        );
        Ok(Self { landmarks })
    }

    pub fn from_positions(positions: [[f32; 3]; NUM_LANDMARKS]) -> Self {
        let mut landmarks = Landmarks::new(NUM_LANDMARKS);
        landmarks.positions_mut().copy_from_slice(&positions);
        Self { landmarks }
    }

    /// Normalizes landmarks given in pixel coordinates of a frame with resolution `frame`.
    pub fn from_pixels(mut landmarks: Landmarks, frame: Resolution) -> anyhow::Result<Self> {
        ensure!(
            frame.num_pixels() > 0,
            "cannot normalize landmarks for empty frame {frame}"
        );
        let (w, h) = (frame.width() as f32, frame.height() as f32);
        landmarks.map_positions(|[x, y, z]| [x / w, y / h, z / w]);
        Self::new(landmarks)
    }

    pub fn get(&self, idx: LandmarkIdx) -> Landmark {
        self.landmarks.get(idx as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.landmarks.iter()
    }

    /// Returns the pixel position of landmark `idx` in a frame of resolution `frame`.
    ///
    /// Fractional pixel coordinates are truncated.
    pub fn pixel_position(&self, idx: LandmarkIdx, frame: Resolution) -> (i32, i32) {
        let lm = self.get(idx);
        (
            (lm.x() * frame.width() as f32) as i32,
            (lm.y() * frame.height() as f32) as i32,
        )
    }
}

/// A detected hand with its finger states and gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct HandAnnotation {
    pub landmarks: HandLandmarks,
    pub fingers: FingerVector,
    pub gesture: Gesture,
}

impl HandAnnotation {
    pub fn new(landmarks: HandLandmarks) -> Self {
        let fingers = FingerVector::from_landmarks(&landmarks);
        Self {
            landmarks,
            fingers,
            gesture: fingers.gesture(),
        }
    }

    /// Returns the number of extended fingers.
    pub fn finger_count(&self) -> usize {
        self.fingers.count()
    }

    /// Returns the text drawn next to the hand.
    pub fn label(&self) -> Label<'_> {
        Label(self)
    }
}

/// [`fmt::Display`] adapter returned by [`HandAnnotation::label`].
pub struct Label<'a>(&'a HandAnnotation);

impl fmt::Display for Label<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fingers: {} | {}",
            self.0.finger_count(),
            self.0.gesture
        )
    }
}

/// Trait for sources of hand landmarks usable by [`HandPipeline`].
pub trait HandLandmarker {
    /// Returns the landmarks of every hand found in `frame`.
    fn detect_hands(&mut self, frame: ImageView<'_>) -> anyhow::Result<Vec<HandLandmarks>>;

    /// Returns the profiling timers of this landmarker.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// Hands with a presence score below this are discarded.
const PRESENCE_THRESHOLD: f32 = 0.5;

/// Finds hands with the palm detection network and estimates their landmarks.
pub struct HandTracker {
    palms: PalmDetector,
    estimator: Estimator<FullNetwork>,
}

impl HandTracker {
    pub fn new(models: &ModelDir) -> anyhow::Result<Self> {
        Ok(Self {
            palms: PalmDetector::new(models)?,
            estimator: Estimator::new(FullNetwork::load(models)?),
        })
    }
}

impl HandLandmarker for HandTracker {
    fn detect_hands(&mut self, frame: ImageView<'_>) -> anyhow::Result<Vec<HandLandmarks>> {
        let palms = self.palms.detect(&frame)?;

        let mut hands = Vec::with_capacity(palms.len());
        for palm in &palms {
            let roi = hand_region(palm);
            let (x, y, _, _) = roi.to_pixels();
            let estimate = self.estimator.estimate(&frame.view(roi))?;
            if estimate.confidence() < PRESENCE_THRESHOLD {
                log::trace!(
                    "dropping hand with presence {:.2} at {roi:?}",
                    estimate.confidence()
                );
                continue;
            }

            let mut landmarks = estimate.landmarks().clone();
            landmarks.map_positions(|[lx, ly, lz]| [lx + x as f32, ly + y as f32, lz]);
            hands.push(HandLandmarks::from_pixels(landmarks, frame.resolution())?);
        }

        Ok(hands)
    }

    fn timers(&self) -> Vec<&Timer> {
        self.palms.timers().chain(self.estimator.timers()).collect()
    }
}

/// Finds hands in a frame and recognizes their gestures.
pub struct HandPipeline {
    landmarker: Box<dyn HandLandmarker>,
    t_hands: Timer,
}

impl HandPipeline {
    pub fn new(landmarker: Box<dyn HandLandmarker>) -> Self {
        Self {
            landmarker,
            t_hands: Timer::new("hands"),
        }
    }

    /// Returns one [`HandAnnotation`] for each hand in `frame`.
    ///
    /// A failing landmarker is logged and yields no hands.
    pub fn process<V: AsImageView>(&mut self, frame: &V) -> Vec<HandAnnotation> {
        let frame = frame.as_view();
        match self.t_hands.time(|| self.landmarker.detect_hands(frame)) {
            Ok(hands) => hands.into_iter().map(HandAnnotation::new).collect(),
            Err(e) => {
                log::warn!("hand detection failed: {e:#}");
                Vec::new()
            }
        }
    }

    /// Returns the pipeline's timer, followed by those of its landmarker.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        std::iter::once(&self.t_hands).chain(self.landmarker.timers())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::image::Image;

    /// A hand with every landmark in the same spot, so no finger counts as extended.
    fn closed_hand() -> [[f32; 3]; NUM_LANDMARKS] {
        [[0.5, 0.5, 0.0]; NUM_LANDMARKS]
    }

    fn extend(hand: &mut [[f32; 3]; NUM_LANDMARKS], tip: LandmarkIdx) {
        hand[tip as usize][1] = 0.2;
    }

    struct FixedHands(Vec<HandLandmarks>);

    impl HandLandmarker for FixedHands {
        fn detect_hands(&mut self, _: ImageView<'_>) -> anyhow::Result<Vec<HandLandmarks>> {
            Ok(self.0.clone())
        }
    }

    struct TimedLandmarker(Timer);

    impl HandLandmarker for TimedLandmarker {
        fn detect_hands(&mut self, _: ImageView<'_>) -> anyhow::Result<Vec<HandLandmarks>> {
            self.0.time(|| Ok(Vec::new()))
        }

        fn timers(&self) -> Vec<&Timer> {
            vec![&self.0]
        }
    }

    struct BrokenLandmarker;

    impl HandLandmarker for BrokenLandmarker {
        fn detect_hands(&mut self, _: ImageView<'_>) -> anyhow::Result<Vec<HandLandmarks>> {
            bail!("no palm network")
        }
    }

    #[test]
    fn peace_sign() {
        let mut hand = closed_hand();
        extend(&mut hand, LandmarkIdx::IndexFingerTip);
        extend(&mut hand, LandmarkIdx::MiddleFingerTip);
        let annotation = HandAnnotation::new(HandLandmarks::from_positions(hand));
        assert_eq!(annotation.fingers, FingerVector::from_flags([0, 1, 1, 0, 0]));
        assert_eq!(annotation.gesture, Gesture::Peace);
        assert_eq!(annotation.label().to_string(), "Fingers: 2 | Peace");
    }

    #[test]
    fn thumb_uses_horizontal_test_only() {
        let mut hand = closed_hand();
        // Moving the thumb tip up does not extend it.
        hand[LandmarkIdx::ThumbTip as usize][1] = 0.1;
        let fingers = FingerVector::from_landmarks(&HandLandmarks::from_positions(hand));
        assert_eq!(fingers.count(), 0);

        // Moving it left of the IP joint does.
        hand[LandmarkIdx::ThumbTip as usize][0] = 0.3;
        let fingers = FingerVector::from_landmarks(&HandLandmarks::from_positions(hand));
        assert_eq!(fingers, FingerVector::from_flags([1, 0, 0, 0, 0]));
    }

    #[test]
    fn fingers_use_vertical_test_only() {
        let mut hand = closed_hand();
        hand[LandmarkIdx::RingFingerTip as usize][0] = 0.1;
        let fingers = FingerVector::from_landmarks(&HandLandmarks::from_positions(hand));
        assert_eq!(fingers.count(), 0);

        // Compared against the PIP joint, two positions back.
        hand[LandmarkIdx::RingFingerPip as usize][1] = 0.8;
        let fingers = FingerVector::from_landmarks(&HandLandmarks::from_positions(hand));
        assert_eq!(fingers, FingerVector::from_flags([0, 0, 0, 1, 0]));
    }

    #[test]
    fn random_hands_follow_joint_comparisons() {
        use LandmarkIdx::*;

        let mut rng = fastrand::Rng::with_seed(0x5eed_f1a9);
        for _ in 0..200 {
            let mut hand = [[0.0; 3]; NUM_LANDMARKS];
            for pos in &mut hand {
                *pos = [rng.f32(), rng.f32(), rng.f32() - 0.5];
            }
            let fingers = FingerVector::from_landmarks(&HandLandmarks::from_positions(hand));
            let expected = [
                hand[ThumbTip as usize][0] < hand[ThumbIp as usize][0],
                hand[IndexFingerTip as usize][1] < hand[IndexFingerPip as usize][1],
                hand[MiddleFingerTip as usize][1] < hand[MiddleFingerPip as usize][1],
                hand[RingFingerTip as usize][1] < hand[RingFingerPip as usize][1],
                hand[PinkyTip as usize][1] < hand[PinkyPip as usize][1],
            ];
            assert_eq!(fingers.extended(), expected);

            // Moving the thumb tip vertically never changes the result.
            hand[ThumbTip as usize][1] = rng.f32();
            let moved = FingerVector::from_landmarks(&HandLandmarks::from_positions(hand));
            assert_eq!(moved, fingers);
        }
    }

    #[test]
    fn normalizes_pixel_coordinates() {
        let mut landmarks = Landmarks::new(NUM_LANDMARKS);
        landmarks.positions_mut()[0] = [320.0, 120.0, 64.0];
        let hand = HandLandmarks::from_pixels(landmarks, Resolution::new(640, 480)).unwrap();
        assert_eq!(hand.get(LandmarkIdx::Wrist).position(), [0.5, 0.25, 0.1]);
        assert_eq!(
            hand.pixel_position(LandmarkIdx::Wrist, Resolution::new(640, 480)),
            (320, 120)
        );
    }

    #[test]
    fn rejects_wrong_landmark_count() {
        assert!(HandLandmarks::new(Landmarks::new(20)).is_err());
        assert!(HandLandmarks::from_pixels(Landmarks::new(21), Resolution::new(0, 0)).is_err());
    }

    #[test]
    fn pipeline_annotates_each_hand() {
        let mut open = closed_hand();
        for (i, pos) in open.iter_mut().enumerate() {
            // Fingertips are every fourth landmark, starting at the thumb tip.
            if i % 4 == 0 && i > 0 {
                pos[1] = 0.1;
            }
        }
        open[LandmarkIdx::ThumbTip as usize][0] = 0.1;

        let hands = vec![
            HandLandmarks::from_positions(open),
            HandLandmarks::from_positions(closed_hand()),
        ];
        let mut pipeline = HandPipeline::new(Box::new(FixedHands(hands)));
        let annotations = pipeline.process(&Image::new(8, 8));
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].gesture, Gesture::OpenPalm);
        assert_eq!(annotations[0].finger_count(), 5);
        assert_eq!(annotations[1].label().to_string(), "Fingers: 0 | Fist");
    }

    #[test]
    fn timers_include_the_landmarker() {
        let mut pipeline = HandPipeline::new(Box::new(TimedLandmarker(Timer::new("palms"))));
        pipeline.process(&Image::new(8, 8));

        let summaries = pipeline.timers().map(|t| t.to_string()).collect::<Vec<_>>();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].starts_with("hands: 1x"));
        assert!(summaries[1].starts_with("palms: 1x"));
    }

    #[test]
    fn landmarker_failure_yields_no_hands() {
        let mut pipeline = HandPipeline::new(Box::new(BrokenLandmarker));
        assert!(pipeline.process(&Image::new(8, 8)).is_empty());
    }
}
