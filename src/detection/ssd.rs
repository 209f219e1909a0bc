//! Anchor/Prior generation and output decoding for Single Shot MultiBox Detectors (SSDs).
//!
//! Note that the implementation in this module is limited and only meant to work for the
//! MediaPipe-style face and palm detectors, not more general networks.

use std::ops::Index;

use anyhow::bail;
use tract_onnx::prelude::tract_ndarray::ArrayViewD;

use crate::image::{Rect, Resolution};
use crate::num::sigmoid;

use super::{Detection, Keypoint};

/// An anchor of an SSD network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    // values range from 0 to 1
    x_center: f32,
    y_center: f32,
}

impl Anchor {
    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }
}

/// Describes an output layer of an SSD network.
pub struct LayerInfo {
    /// Number of anchors per feature map cell. Must be non-zero.
    boxes_per_cell: u32,
    /// Feature map resolution of this layer.
    resolution: Resolution,
}

impl LayerInfo {
    /// Creates a new SSD layer description.
    ///
    /// # Parameters
    ///
    /// - `boxes_per_cell`: the number of boxes associated with each cell in this feature map.
    /// - `width`/`height`: size of this layer's feature map, in output cells.
    pub const fn new(boxes_per_cell: u32, width: u32, height: u32) -> Self {
        assert!(boxes_per_cell != 0);
        Self {
            boxes_per_cell,
            resolution: Resolution::new(width, height),
        }
    }
}

pub struct AnchorParams<'a> {
    /// List of output layers.
    pub layers: &'a [LayerInfo],
}

pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    pub fn calculate(params: &AnchorParams<'_>) -> Self {
        let mut anchors = Vec::new();

        for layer in params.layers {
            let height = layer.resolution.height();
            let width = layer.resolution.width();

            for y in 0..height {
                for x in 0..width {
                    // All boxes of a cell share its center; the networks use fixed anchor sizes.
                    for _ in 0..layer.boxes_per_cell {
                        let x_center = (x as f32 + 0.5) / width as f32;
                        let y_center = (y as f32 + 0.5) / height as f32;

                        anchors.push(Anchor { x_center, y_center });
                    }
                }
            }
        }

        Self { anchors }
    }

    /// Returns the total number of SSD anchors/priors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}

/// Decodes the regressor and classifier outputs of an SSD network.
///
/// `regressors` must have shape `[1, anchors, 4 + 2 * num_keypoints]` and `scores` must have shape
/// `[1, anchors, 1]`. Every anchor whose sigmoid-activated score reaches `thresh` yields a
/// [`Detection`] in the network's input coordinate system.
pub fn decode(
    input_res: Resolution,
    anchors: &Anchors,
    regressors: ArrayViewD<'_, f32>,
    scores: ArrayViewD<'_, f32>,
    num_keypoints: usize,
    thresh: f32,
    detections: &mut Vec<Detection>,
) -> anyhow::Result<()> {
    let num_anchors = anchors.anchor_count();
    let params_per_box = 4 + 2 * num_keypoints;
    if regressors.shape() != &[1, num_anchors, params_per_box] {
        bail!(
            "unexpected SSD regressor shape {:?}, expected [1, {num_anchors}, {params_per_box}]",
            regressors.shape()
        );
    }
    if scores.shape() != &[1, num_anchors, 1] {
        bail!(
            "unexpected SSD score shape {:?}, expected [1, {num_anchors}, 1]",
            scores.shape()
        );
    }

    let input_w = input_res.width() as f32;
    let input_h = input_res.height() as f32;
    for index in 0..num_anchors {
        let conf = sigmoid(scores[&[0, index, 0][..]]);
        if conf < thresh {
            continue;
        }

        let anchor = anchors[index];
        let param = |i: usize| regressors[&[0, index, i][..]];
        let offset_x = anchor.x_center() * input_w;
        let offset_y = anchor.y_center() * input_h;

        let rect = Rect::from_center(param(0) + offset_x, param(1) + offset_y, param(2), param(3));
        let keypoints = (0..num_keypoints)
            .map(|k| Keypoint::new(param(4 + 2 * k) + offset_x, param(5 + 2 * k) + offset_y))
            .collect();
        detections.push(Detection::with_keypoints(conf, rect, keypoints));
    }

    Ok(())
}
