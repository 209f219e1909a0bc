//! Non-Maximum Suppression and Averaging.
//!
//! Single-Shot MultiBox Detectors produce duplicate detections for individual objects, and running
//! a detector on several scaled views of the same frame multiplies them further. Non-Maximum
//! Suppression (NMS) groups overlapping detections into clusters and keeps a single detection per
//! cluster.
//!
//! Two variants are implemented, selected with [`SuppressionMode`]: classic suppression, which
//! keeps the most confident detection of a cluster ([`SuppressionMode::Remove`]), and Non-Maximum
//! Averaging ([`SuppressionMode::Average`]), which computes a confidence-weighted average of the
//! cluster. Averaging reduces jitter between frames and is the default.
//!
//! Clusters can additionally be required to contain a minimum number of detections (see
//! [`NonMaxSuppression::set_min_neighbors`]), which rejects spurious one-off detections.

use crate::{image::Rect, iter::zip_exact, num::TotalF32};

use super::{Detection, Keypoint};

/// A non-maximum suppression algorithm.
pub struct NonMaxSuppression {
    iou_thresh: f32,
    min_neighbors: usize,
    cluster: Vec<Detection>,
    out_buf: Vec<Detection>,
    mode: SuppressionMode,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a new non-maximum suppressor.
    ///
    /// The returned suppression algorithm will use [`SuppressionMode::Average`], a default IOU
    /// threshold, and keeps every cluster regardless of its size.
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            min_neighbors: 0,
            cluster: Vec::new(),
            out_buf: Vec::new(),
            mode: SuppressionMode::Average,
        }
    }

    /// Sets the intersection-over-union threshold to consider two detections as overlapping.
    ///
    /// By default, [`Self::DEFAULT_IOU_THRESH`] is used.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    /// Sets the number of overlapping detections a cluster needs in order to be kept.
    ///
    /// The count includes the cluster's most confident detection, so values of 0 and 1 keep every
    /// cluster.
    pub fn set_min_neighbors(&mut self, min_neighbors: usize) {
        self.min_neighbors = min_neighbors;
    }

    /// Sets the suppression mode.
    pub fn set_mode(&mut self, mode: SuppressionMode) {
        self.mode = mode;
    }

    /// Performs non-maximum suppression on `detections`.
    ///
    /// `detections` will be drained in the process. The filtered detections are returned as an
    /// iterator, in order of descending confidence of each cluster's seed.
    pub fn process(
        &mut self,
        detections: &mut Vec<Detection>,
    ) -> impl Iterator<Item = Detection> + '_ {
        self.out_buf.clear();

        // Sort by ascending confidence, process highest confidence first by starting at the back.
        detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

        while let Some(seed) = detections.pop() {
            self.cluster.clear();
            let seed_rect = seed.bounding_rect();
            let iou_thresh = self.iou_thresh;
            let cluster = &mut self.cluster;
            detections.retain(|other| {
                if seed_rect.iou(&other.bounding_rect()) >= iou_thresh {
                    cluster.push(other.clone());
                    false
                } else {
                    true
                }
            });
            self.cluster.insert(0, seed);

            if self.cluster.len() < self.min_neighbors {
                log::trace!(
                    "dropping cluster of {} detections (need {})",
                    self.cluster.len(),
                    self.min_neighbors
                );
                continue;
            }

            let kept = match self.mode {
                SuppressionMode::Remove => self.cluster.swap_remove(0),
                SuppressionMode::Average => average(&self.cluster),
            };
            self.out_buf.push(kept);
        }

        self.cluster.clear();
        self.out_buf.drain(..)
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the confidence-weighted average of a cluster whose first element is its seed.
///
/// The result keeps the seed's confidence.
fn average(cluster: &[Detection]) -> Detection {
    let seed = &cluster[0];
    let mut keypoints = vec![Keypoint::new(0.0, 0.0); seed.keypoints.len()];
    let (mut x, mut y, mut w, mut h) = (0.0, 0.0, 0.0, 0.0);
    let mut divisor = 0.0;

    for det in cluster {
        let factor = det.confidence;
        divisor += factor;
        for (acc, kp) in zip_exact(keypoints.iter_mut(), &det.keypoints) {
            acc.x += kp.x * factor;
            acc.y += kp.y * factor;
        }
        let rect = det.bounding_rect();
        x += rect.x_center() * factor;
        y += rect.y_center() * factor;
        w += rect.width() * factor;
        h += rect.height() * factor;
    }

    if divisor <= 0.0 {
        return seed.clone();
    }

    for kp in &mut keypoints {
        kp.x /= divisor;
        kp.y /= divisor;
    }
    Detection::with_keypoints(
        seed.confidence,
        Rect::from_center(x / divisor, y / divisor, w / divisor, h / divisor),
        keypoints,
    )
}

/// Describes how [`NonMaxSuppression`] should deal with overlapping detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SuppressionMode {
    /// Remove overlapping detections, only retain the detection with highest confidence score.
    Remove,

    /// Compute a confidence-weighted average of overlapping detections.
    Average,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_suppresses_non_maximum() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        let a = Detection::new(0.6, rect);
        let b = Detection::new(0.55, rect.scale(1.5));
        let detections = nms.process(&mut vec![b, a]).collect::<Vec<_>>();
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.confidence(), 0.6);
        assert_eq!(d.bounding_rect(), rect);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let a = Detection::new(1.0, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(1.0, Rect::from_center(5.0, 0.0, 1.0, 1.0));

        let detections = nms.process(&mut vec![a, b]).collect::<Vec<_>>();
        assert_eq!(detections.len(), 2);
    }

    #[test]
    fn nma_averages_detections() {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.0);

        let rect = Rect::from_center(-1.0, 3.0, 1.0, 1.0);
        let a = Detection::new(1.0, rect);
        let b = Detection::new(0.5, rect.scale(4.0));
        let detections = nms.process(&mut vec![a, b]).collect::<Vec<_>>();
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.confidence(), 1.0);
        assert_eq!(d.bounding_rect(), Rect::from_center(-1.0, 3.0, 2.0, 2.0));
    }

    #[test]
    fn nma_averages_keypoints() {
        let mut nms = NonMaxSuppression::new();

        let rect = Rect::from_center(0.0, 0.0, 4.0, 4.0);
        let a = Detection::with_keypoints(1.0, rect, vec![Keypoint::new(0.0, 0.0)]);
        let b = Detection::with_keypoints(1.0, rect, vec![Keypoint::new(2.0, -2.0)]);
        let detections = nms.process(&mut vec![a, b]).collect::<Vec<_>>();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].keypoints(), &[Keypoint::new(1.0, -1.0)]);
    }

    #[test]
    fn min_neighbors_drops_small_clusters() {
        let mut nms = NonMaxSuppression::new();
        nms.set_min_neighbors(3);

        let face = Rect::from_center(10.0, 10.0, 8.0, 8.0);
        let mut detections = vec![
            Detection::new(0.9, face),
            Detection::new(0.8, face.move_by(0.5, 0.0)),
            Detection::new(0.7, face.move_by(0.0, 0.5)),
            // lone detection far away
            Detection::new(0.95, Rect::from_center(100.0, 100.0, 8.0, 8.0)),
        ];
        let kept = nms.process(&mut detections).collect::<Vec<_>>();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence(), 0.9);
        assert!(kept[0].bounding_rect().iou(&face) > 0.9);
        assert!(detections.is_empty());
    }

    #[test]
    fn min_neighbors_of_one_keeps_everything() {
        for min in [0, 1] {
            let mut nms = NonMaxSuppression::new();
            nms.set_min_neighbors(min);
            let mut detections = vec![
                Detection::new(0.5, Rect::from_center(0.0, 0.0, 1.0, 1.0)),
                Detection::new(0.5, Rect::from_center(9.0, 9.0, 1.0, 1.0)),
            ];
            assert_eq!(nms.process(&mut detections).count(), 2);
        }
    }
}
