//! Hand landmark prediction.

use anyhow::ensure;

use crate::iter::zip_exact;
use crate::landmark::{Confidence, Estimate, Landmarks, Network};
use crate::models::{self, ModelDir};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};

/// Number of landmarks predicted for each hand.
pub const NUM_LANDMARKS: usize = 21;

/// Landmark results estimated by [`FullNetwork`].
#[derive(Debug, Clone)]
pub struct LandmarkResult {
    landmarks: Landmarks,
    presence: f32,
}

impl Default for LandmarkResult {
    fn default() -> Self {
        Self {
            landmarks: Landmarks::new(NUM_LANDMARKS),
            presence: 0.0,
        }
    }
}

impl LandmarkResult {
    /// Returns the landmarks in the input image's coordinate system.
    pub fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }
}

impl Estimate for LandmarkResult {
    #[inline]
    fn landmarks_mut(&mut self) -> &mut Landmarks {
        &mut self.landmarks
    }
}

impl Confidence for LandmarkResult {
    #[inline]
    fn confidence(&self) -> f32 {
        self.presence
    }
}

/// Names for the hand pose landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// The edges of the hand skeleton.
pub const CONNECTIVITY: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Surround the palm:
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Thumb:
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index:
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle:
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring:
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky:
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// The full hand landmark network.
pub struct FullNetwork {
    cnn: Cnn,
}

impl FullNetwork {
    pub fn load(models: &ModelDir) -> anyhow::Result<Self> {
        // Screen landmarks, presence flag. The handedness and world landmark outputs are unused.
        let nn = NeuralNetwork::from_path(models.path(models::HAND_LANDMARK)?)?
            .with_output_selection([0, 1])
            .load()?;
        let cnn = Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?;
        Ok(Self { cnn })
    }
}

impl Network for FullNetwork {
    type Output = LandmarkResult;

    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(&self, outputs: &Outputs, estimate: &mut LandmarkResult) -> anyhow::Result<()> {
        let screen_landmarks = outputs.view(0)?;
        let presence_flag = outputs.view(1)?;

        ensure!(
            screen_landmarks.shape() == [1, NUM_LANDMARKS * 3],
            "unexpected hand landmark output shape {:?}",
            screen_landmarks.shape()
        );
        ensure!(
            presence_flag.shape() == [1, 1],
            "unexpected hand presence output shape {:?}",
            presence_flag.shape()
        );

        estimate.presence = presence_flag[&[0, 0][..]];
        let coords = screen_landmarks.iter().copied().collect::<Vec<f32>>();
        for (coord, out) in zip_exact(coords.chunks_exact(3), estimate.landmarks.positions_mut()) {
            out.copy_from_slice(coord);
        }
        Ok(())
    }
}
