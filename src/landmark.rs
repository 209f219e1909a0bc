//! Common code for visual landmark estimation.

use crate::image::{AsImageView, ImageView, Resolution};
use crate::nn::{Cnn, Outputs};
use crate::timer::Timer;

type Position = [f32; 3];

/// A fixed-size list of 3D landmark positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    positions: Box<[Position]>,
}

impl Landmarks {
    /// Creates a new [`Landmarks`] collection containing `len` preallocated landmarks.
    ///
    /// All landmarks will start with all coordinates at `0.0`.
    pub fn new(len: usize) -> Self {
        Self {
            positions: vec![[0.0, 0.0, 0.0]; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Landmark {
        Landmark::new(self.positions[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.positions.iter().map(|&pos| Landmark::new(pos))
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    pub fn map_positions(&mut self, mut f: impl FnMut(Position) -> Position) {
        for pos in self.positions_mut() {
            *pos = f(*pos);
        }
    }
}

/// A landmark in 3D space.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Landmark {
    pos: Position,
}

impl Landmark {
    pub fn new(position: Position) -> Self {
        Self { pos: position }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos[2]
    }
}

/// Trait for landmark estimation results returned by [`Estimator::estimate`].
pub trait Estimate {
    /// Returns the predicted [`Landmarks`].
    fn landmarks_mut(&mut self) -> &mut Landmarks;
}

/// Trait for network inference results that contain a confidence value.
///
/// By convention, this is in range 0.0 to 1.0, with anything above 0.5 indicating that the object
/// is probably present in the input.
pub trait Confidence {
    fn confidence(&self) -> f32;
}

/// Trait implemented by wrapper types around neural networks that estimate landmarks.
pub trait Network {
    /// Type representing the predicted landmarks.
    type Output: Estimate + Default;

    /// Returns the [`Cnn`] to use for landmark estimation.
    fn cnn(&self) -> &Cnn;

    /// Extracts the network outputs and writes them to `estimate`.
    ///
    /// The landmark positions are expected to be in the coordinate system of the network's input.
    fn extract(&self, outputs: &Outputs, estimate: &mut Self::Output) -> anyhow::Result<()>;
}

/// Neural-network based landmark estimator.
///
/// This estimator processes an input image and yields an [`Estimate`] containing the derived
/// [`Landmarks`] and other data (depending on the network).
pub struct Estimator<N: Network> {
    network: N,
    estimate: N::Output,
    t_infer: Timer,
    t_extract: Timer,
}

impl<N: Network> Estimator<N> {
    pub fn new(network: N) -> Self {
        Self {
            network,
            estimate: N::Output::default(),
            t_infer: Timer::new("infer"),
            t_extract: Timer::new("extract"),
        }
    }

    /// Returns the expected input resolution of the internal neural network.
    ///
    /// If an image is passed that has a different resolution, it will be sampled to match the input
    /// resolution.
    pub fn input_resolution(&self) -> Resolution {
        self.network.cnn().input_resolution()
    }

    /// Returns profiling timers for this landmark estimator.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract].into_iter()
    }

    /// Performs landmark estimation on `image`, returning the [`Estimate`].
    ///
    /// If the aspect ratio of `image` does not match the aspect ratio of the network's input, an
    /// enlarged [`ImageView`] of the right aspect ratio is created first. Landmark positions are
    /// returned in the coordinate system of `image`.
    pub fn estimate<V: AsImageView>(&mut self, image: &V) -> anyhow::Result<&mut N::Output> {
        self.estimate_impl(image.as_view())
    }

    fn estimate_impl(&mut self, image: ImageView<'_>) -> anyhow::Result<&mut N::Output> {
        let cnn = self.network.cnn();
        let input_res = cnn.input_resolution();
        let Some(input_aspect) = input_res.aspect_ratio() else {
            anyhow::bail!("network input resolution {input_res} is empty");
        };

        let rect = image.rect().grow_to_fit_aspect(input_aspect);
        let view = image.view(rect);
        let outputs = self.t_infer.time(|| cnn.estimate(&view))?;

        self.t_extract
            .time(|| self.network.extract(&outputs, &mut self.estimate))?;

        let scale = rect.width() / input_res.width() as f32;
        self.estimate.landmarks_mut().map_positions(|pos| {
            let [x, y, z] = pos.map(|t| t * scale);
            [x + rect.x(), y + rect.y(), z]
        });

        Ok(&mut self.estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmarks_start_at_origin() {
        let landmarks = Landmarks::new(21);
        assert_eq!(landmarks.len(), 21);
        assert!(landmarks.iter().all(|lm| lm.position() == [0.0; 3]));
    }

    #[test]
    fn map_positions() {
        let mut landmarks = Landmarks::new(2);
        landmarks.positions_mut()[1] = [1.0, 2.0, 3.0];
        landmarks.map_positions(|[x, y, z]| [x * 2.0, y + 1.0, z]);
        assert_eq!(landmarks.get(0).position(), [0.0, 1.0, 0.0]);
        let lm = landmarks.get(1);
        assert_eq!((lm.x(), lm.y(), lm.z()), (2.0, 3.0, 3.0));
    }
}
