//! Facial emotion classification with the FER+ network.

use std::fmt;

use anyhow::{anyhow, ensure};

use crate::image::ImageView;
use crate::models::{self, ModelDir};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork};
use crate::num::argmax;

/// The emotions distinguished by the classifier, in the order of the network's output scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emotion {
    Neutral,
    Happy,
    Surprise,
    Sad,
    Angry,
    Disgust,
    Fear,
    Contempt,
}

impl Emotion {
    pub const ALL: [Emotion; 8] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Surprise,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Contempt,
    ];

    /// Returns the lowercase label shown next to a face.
    pub fn name(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Surprise => "surprise",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Contempt => "contempt",
        }
    }

    /// Picks the dominant emotion from the network's raw scores.
    pub fn from_scores(scores: &[f32]) -> anyhow::Result<Self> {
        ensure!(
            scores.len() == Self::ALL.len(),
            "expected {} emotion scores, got {}",
            Self::ALL.len(),
            scores.len()
        );
        let index = argmax(scores).ok_or_else(|| anyhow!("emotion scores contain NaN"))?;
        Ok(Self::ALL[index])
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The emotion label attached to a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmotionLabel {
    Detected(Emotion),
    /// Classification failed for this face.
    Unknown,
}

impl EmotionLabel {
    /// Converts a classification result, logging and discarding the error of a failure.
    pub fn from_result(result: anyhow::Result<Emotion>) -> Self {
        match result {
            Ok(emotion) => EmotionLabel::Detected(emotion),
            Err(e) => {
                log::debug!("emotion classification failed: {e:#}");
                EmotionLabel::Unknown
            }
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmotionLabel::Detected(emotion) => emotion.fmt(f),
            EmotionLabel::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Trait for classifiers that determine the dominant emotion of a face crop.
pub trait EmotionClassifier {
    fn classify(&mut self, face: ImageView<'_>) -> anyhow::Result<Emotion>;
}

/// Emotion classifier running the FER+ network on a 64x64 grayscale version of the face.
pub struct FerPlusClassifier {
    cnn: Cnn,
}

impl FerPlusClassifier {
    pub fn load(models: &ModelDir) -> anyhow::Result<Self> {
        let nn = NeuralNetwork::from_path(models.path(models::EMOTION_FERPLUS)?)?.load()?;
        // FER+ takes unnormalized pixel intensities.
        let cnn = Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::grayscale(0.0..=255.0))?;
        Ok(Self { cnn })
    }
}

impl EmotionClassifier for FerPlusClassifier {
    fn classify(&mut self, face: ImageView<'_>) -> anyhow::Result<Emotion> {
        ensure!(
            face.width() > 0 && face.height() > 0,
            "cannot classify empty face crop"
        );

        let outputs = self.cnn.estimate(&face)?;
        let scores = outputs.view(0)?.iter().copied().collect::<Vec<f32>>();
        Emotion::from_scores(&scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        let names = Emotion::ALL.map(|e| e.to_string());
        assert_eq!(
            names,
            ["neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt"]
        );
        assert_eq!(EmotionLabel::Detected(Emotion::Sad).to_string(), "sad");
        assert_eq!(EmotionLabel::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn dominant_score_wins() {
        let mut scores = [0.1; 8];
        scores[1] = 5.0;
        assert_eq!(Emotion::from_scores(&scores).unwrap(), Emotion::Happy);
        scores[7] = 9.0;
        assert_eq!(Emotion::from_scores(&scores).unwrap(), Emotion::Contempt);
    }

    #[test]
    fn malformed_scores_are_errors() {
        assert!(Emotion::from_scores(&[1.0; 7]).is_err());
        assert!(Emotion::from_scores(&[]).is_err());
        let mut scores = [0.0; 8];
        scores[3] = f32::NAN;
        assert!(Emotion::from_scores(&scores).is_err());
    }

    #[test]
    fn failures_become_unknown() {
        let label = EmotionLabel::from_result(Err(anyhow!("boom")));
        assert_eq!(label, EmotionLabel::Unknown);
        let label = EmotionLabel::from_result(Ok(Emotion::Fear));
        assert_eq!(label, EmotionLabel::Detected(Emotion::Fear));
    }
}
