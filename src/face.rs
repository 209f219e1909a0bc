//! Face detection and emotion classification.
//!
//! [`FacePipeline`] finds face boxes in a frame with a [`FaceDetect`] implementation and asks an
//! optional [`EmotionClassifier`] for the dominant emotion of each face. Classifier failures are
//! never propagated: the face is reported with [`EmotionLabel::Unknown`] instead.

pub mod detection;
pub mod emotion;

use crate::image::{AsImageView, ImageView, Rect};
use crate::timer::Timer;

pub use self::detection::{FaceDetector, FaceDetectorOptions};
pub use self::emotion::{Emotion, EmotionClassifier, EmotionLabel, FerPlusClassifier};

/// Trait for face detectors usable by [`FacePipeline`].
pub trait FaceDetect {
    /// Returns the bounding boxes of all faces in `frame`, in pixel coordinates of `frame`.
    fn detect_faces(&mut self, frame: ImageView<'_>) -> anyhow::Result<Vec<Rect>>;

    /// Returns the profiling timers of this detector.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// A detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    /// Bounding box of the face in frame coordinates.
    pub rect: Rect,
    /// The dominant emotion, or [`None`] if emotion classification is disabled.
    pub emotion: Option<EmotionLabel>,
}

/// Detects faces and classifies their emotion.
pub struct FacePipeline {
    detector: Box<dyn FaceDetect>,
    classifier: Option<Box<dyn EmotionClassifier>>,
    t_detect: Timer,
    t_classify: Timer,
}

impl FacePipeline {
    /// Creates a pipeline from a detector and an optional emotion classifier.
    ///
    /// If `classifier` is [`None`], faces are still detected but carry no emotion label.
    pub fn new(
        detector: Box<dyn FaceDetect>,
        classifier: Option<Box<dyn EmotionClassifier>>,
    ) -> Self {
        Self {
            detector,
            classifier,
            t_detect: Timer::new("face"),
            t_classify: Timer::new("emotion"),
        }
    }

    /// Detects all faces in `frame` and classifies each face's emotion.
    ///
    /// A failing detector is logged and yields no faces.
    pub fn process<V: AsImageView>(&mut self, frame: &V) -> Vec<FaceAnnotation> {
        self.process_impl(frame.as_view())
    }

    fn process_impl(&mut self, frame: ImageView<'_>) -> Vec<FaceAnnotation> {
        let rects = match self.t_detect.time(|| self.detector.detect_faces(frame)) {
            Ok(rects) => rects,
            Err(e) => {
                log::warn!("face detection failed: {e:#}");
                return Vec::new();
            }
        };

        rects
            .into_iter()
            .map(|rect| {
                let emotion = self.classifier.as_mut().map(|classifier| {
                    let crop = frame.view(rect);
                    let result = self.t_classify.time(|| classifier.classify(crop));
                    EmotionLabel::from_result(result)
                });
                FaceAnnotation { rect, emotion }
            })
            .collect()
    }

    /// Returns the pipeline's timers, followed by those of its detector.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_detect, &self.t_classify]
            .into_iter()
            .chain(self.detector.timers())
    }
}

impl FaceDetect for FaceDetector {
    fn detect_faces(&mut self, frame: ImageView<'_>) -> anyhow::Result<Vec<Rect>> {
        self.detect(&frame)
    }

    fn timers(&self) -> Vec<&Timer> {
        FaceDetector::timers(self).collect()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::image::{Color, Image};

    struct FixedFaces(Vec<Rect>);

    impl FaceDetect for FixedFaces {
        fn detect_faces(&mut self, _: ImageView<'_>) -> anyhow::Result<Vec<Rect>> {
            Ok(self.0.clone())
        }
    }

    /// Reports no faces, but times every call.
    struct TimedDetector(Timer);

    impl FaceDetect for TimedDetector {
        fn detect_faces(&mut self, _: ImageView<'_>) -> anyhow::Result<Vec<Rect>> {
            let _guard = self.0.start();
            Ok(Vec::new())
        }

        fn timers(&self) -> Vec<&Timer> {
            vec![&self.0]
        }
    }

    struct BrokenDetector;

    impl FaceDetect for BrokenDetector {
        fn detect_faces(&mut self, _: ImageView<'_>) -> anyhow::Result<Vec<Rect>> {
            bail!("network exploded")
        }
    }

    struct Always(Emotion);

    impl EmotionClassifier for Always {
        fn classify(&mut self, _: ImageView<'_>) -> anyhow::Result<Emotion> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl EmotionClassifier for Failing {
        fn classify(&mut self, _: ImageView<'_>) -> anyhow::Result<Emotion> {
            bail!("classifier unavailable")
        }
    }

    /// Reports `Happy` only for crops whose top-left pixel is white.
    struct WhiteIsHappy;

    impl EmotionClassifier for WhiteIsHappy {
        fn classify(&mut self, face: ImageView<'_>) -> anyhow::Result<Emotion> {
            if face.get(0, 0) == Color::WHITE {
                Ok(Emotion::Happy)
            } else {
                bail!("not a happy crop")
            }
        }
    }

    fn two_faces() -> Vec<Rect> {
        vec![
            Rect::from_top_left(0.0, 0.0, 4.0, 4.0),
            Rect::from_top_left(8.0, 8.0, 4.0, 4.0),
        ]
    }

    #[test]
    fn labels_every_face() {
        let mut pipeline = FacePipeline::new(
            Box::new(FixedFaces(two_faces())),
            Some(Box::new(Always(Emotion::Surprise))),
        );
        let faces = pipeline.process(&Image::new(16, 16));
        assert_eq!(faces.len(), 2);
        for face in &faces {
            assert_eq!(face.emotion, Some(EmotionLabel::Detected(Emotion::Surprise)));
        }
        assert_eq!(faces[1].rect, two_faces()[1]);
    }

    #[test]
    fn classifier_failure_yields_unknown() {
        let mut pipeline =
            FacePipeline::new(Box::new(FixedFaces(two_faces())), Some(Box::new(Failing)));
        let faces = pipeline.process(&Image::new(16, 16));
        assert_eq!(faces.len(), 2);
        for face in &faces {
            assert_eq!(face.emotion, Some(EmotionLabel::Unknown));
            assert_eq!(face.emotion.unwrap().to_string(), "Unknown");
        }
    }

    #[test]
    fn classifier_sees_the_face_crop() {
        let mut frame = Image::new(16, 16);
        frame.set(8, 8, Color::WHITE);
        let mut pipeline = FacePipeline::new(
            Box::new(FixedFaces(two_faces())),
            Some(Box::new(WhiteIsHappy)),
        );
        let faces = pipeline.process(&frame);
        assert_eq!(faces[0].emotion, Some(EmotionLabel::Unknown));
        assert_eq!(faces[1].emotion, Some(EmotionLabel::Detected(Emotion::Happy)));
    }

    #[test]
    fn disabled_emotion_leaves_faces_unlabeled() {
        let mut pipeline = FacePipeline::new(Box::new(FixedFaces(two_faces())), None);
        let faces = pipeline.process(&Image::new(16, 16));
        assert_eq!(faces.len(), 2);
        assert!(faces.iter().all(|face| face.emotion.is_none()));
    }

    #[test]
    fn timers_include_the_detector() {
        let mut pipeline = FacePipeline::new(Box::new(TimedDetector(Timer::new("net"))), None);
        pipeline.process(&Image::new(16, 16));

        let summaries = pipeline.timers().map(|t| t.to_string()).collect::<Vec<_>>();
        assert_eq!(summaries.len(), 3);
        assert!(summaries[0].starts_with("face: 1x"));
        assert!(summaries[1].starts_with("emotion: 0x"));
        assert!(summaries[2].starts_with("net: 1x"));
    }

    #[test]
    fn detector_failure_yields_no_faces() {
        let mut pipeline = FacePipeline::new(Box::new(BrokenDetector), Some(Box::new(Failing)));
        assert!(pipeline.process(&Image::new(16, 16)).is_empty());
    }
}
