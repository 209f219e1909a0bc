//! Axis-aligned rectangles.
//!
//! Used for face boxes, palm detections, crop regions, and network input views.

use std::fmt;

use nalgebra::{vector, Vector2};

use super::AspectRatio;

/// An axis-aligned rectangle with `f32` coordinates.
///
/// Rectangles are allowed to have zero height and/or width. Negative dimensions are not allowed.
#[derive(Clone, Copy, PartialEq)]
pub struct Rect {
    center: Vector2<f32>,
    size: Vector2<f32>,
}

impl Rect {
    /// Creates a rectangle extending outwards from a center point.
    #[inline]
    pub fn from_center(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            center: vector![x_center, y_center],
            size: vector![width, height],
        }
    }

    /// Creates a rectangle extending downwards and right from a point.
    #[inline]
    pub fn from_top_left(top_left_x: f32, top_left_y: f32, width: f32, height: f32) -> Self {
        Self::from_center(
            top_left_x + width * 0.5,
            top_left_y + height * 0.5,
            width,
            height,
        )
    }

    /// Creates the rectangle spanning from `(x_min, y_min)` to `(x_max, y_max)`.
    ///
    /// The corners are swapped as needed, so the result never has negative dimensions.
    pub fn span(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        let (x_min, x_max) = (x_min.min(x_max), x_min.max(x_max));
        let (y_min, y_max) = (y_min.min(y_max), y_min.max(y_max));
        Self::from_top_left(x_min, y_min, x_max - x_min, y_max - y_min)
    }

    /// Scales the width and height of this [`Rect`] by the given amount.
    ///
    /// The center position of the [`Rect`] remains the same.
    #[must_use]
    pub fn scale(&self, scale: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * scale,
        }
    }

    /// Grows this rectangle by adding a margin relative to width and height.
    ///
    /// `amount` is the relative amount of the rectangle's width and height to add to each side.
    #[must_use]
    pub fn grow_rel(&self, amount: f32) -> Self {
        Self {
            center: self.center,
            size: self.size * (1.0 + 2.0 * amount),
        }
    }

    /// Symmetrically extends one dimension of `self` so that the resulting rectangle has the given
    /// aspect ratio.
    #[must_use]
    pub fn grow_to_fit_aspect(&self, target_aspect: AspectRatio) -> Self {
        let mut res = *self;
        let target_width = self.height() * target_aspect.as_f32();
        if target_width >= self.width() {
            res.size.x = target_width;
        } else {
            res.size.y = self.width() / target_aspect.as_f32();
        }

        res
    }

    /// Returns the X coordinate of the left side of the rectangle.
    #[inline]
    pub fn x(&self) -> f32 {
        self.center.x - self.size.x * 0.5
    }

    /// Returns the Y coordinate of the top side of the rectangle.
    #[inline]
    pub fn y(&self) -> f32 {
        self.center.y - self.size.y * 0.5
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.size.x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.size.y
    }

    #[inline]
    pub fn x_center(&self) -> f32 {
        self.center.x
    }

    #[inline]
    pub fn y_center(&self) -> f32 {
        self.center.y
    }

    #[inline]
    pub fn center(&self) -> Vector2<f32> {
        self.center
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.area() <= 0.0
    }

    #[must_use]
    pub fn move_by(&self, dx: f32, dy: f32) -> Self {
        Self {
            center: self.center + vector![dx, dy],
            ..*self
        }
    }

    /// Computes the intersection of `self` and `other`.
    ///
    /// Returns [`None`] when the rectangles do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x_min = self.x().max(other.x());
        let y_min = self.y().max(other.y());
        let x_max = (self.x() + self.width()).min(other.x() + other.width());
        let y_max = (self.y() + self.height()).min(other.y() + other.height());
        if x_min > x_max || y_min > y_max {
            return None;
        }

        Some(Rect::span(x_min, y_min, x_max, y_max))
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let intersection = self.intersection(other).map_or(0.0, |rect| rect.area());
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Rounds this rectangle to whole pixels, returning `(x, y, width, height)`.
    pub fn to_pixels(&self) -> (i32, i32, u32, u32) {
        let x = self.x().round() as i32;
        let y = self.y().round() as i32;
        let w = self.width().round().max(0.0) as u32;
        let h = self.height().round().max(0.0) as u32;
        (x, y, w, h)
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect @ ({},{})/{}x{}",
            self.x(),
            self.y(),
            self.width(),
            self.height()
        )
    }
}
