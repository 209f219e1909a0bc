//! Image manipulation.
//!
//! This module provides:
//!
//! - The [`Image`] type, an owned RGBA video frame.
//! - [`ImageView`] and [`ImageViewMut`], borrowed rectangular views into an underlying [`Image`].
//! - The [`AsImageView`] and [`AsImageViewMut`] traits to abstract over images and views.
//! - A handful of [`draw`] functions used to annotate frames.
//! - [`Rect`], the rectangle type used for face boxes and crop regions.

pub mod draw;
mod jpeg;
mod rect;
mod resolution;

use std::{fmt, ops::Index};

use embedded_graphics::{pixelcolor::raw::RawU32, prelude::PixelColor};
use image::{imageops, ImageBuffer, Rgba, RgbaImage};

pub use jpeg::JpegBackend;
pub use rect::Rect;
pub use resolution::{AspectRatio, Resolution};

/// An 8-bit sRGB image with alpha channel.
///
/// Camera frames are fully opaque. The RGBA layout matches what the display window and the
/// networks' color mappers consume, so no channel reordering happens between capture and
/// inference.
#[derive(Clone, PartialEq)]
pub struct Image {
    pub(crate) buf: RgbaImage,
}

impl Image {
    /// Creates an empty image of a specified size.
    ///
    /// The image will start out black and fully transparent.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Creates an image from raw RGBA8 data.
    ///
    /// Returns an error if `data` does not contain exactly `width * height * 4` bytes.
    pub fn from_rgba8(res: Resolution, data: Vec<u8>) -> anyhow::Result<Self> {
        let len = data.len();
        match ImageBuffer::from_raw(res.width(), res.height(), data) {
            Some(buf) => Ok(Self { buf }),
            None => anyhow::bail!("incorrect buffer size {len} for {res} image"),
        }
    }

    /// Decodes a JFIF JPEG or Motion JPEG frame from a byte slice.
    pub fn decode_jpeg(data: &[u8], backend: JpegBackend) -> anyhow::Result<Self> {
        jpeg::decode_jpeg(data, backend)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns a [`Rect`] at `(0, 0)` covering this image.
    #[inline]
    pub fn rect(&self) -> Rect {
        self.resolution().rect()
    }

    /// Gets the image color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color(self.buf[(x, y)].0)
    }

    /// Sets the image color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        self.buf[(x, y)] = Rgba(color.0);
    }

    /// Fills the whole image with `color`.
    pub fn clear(&mut self, color: Color) {
        for pixel in self.buf.pixels_mut() {
            *pixel = Rgba(color.0);
        }
    }

    /// Mirrors the image along the vertical axis.
    pub fn flip_horizontal_in_place(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.buf);
    }

    /// Creates an immutable view into an area of this image, specified by `rect`.
    ///
    /// If `rect` lies partially outside of `self`, the pixels that are outside of `self` will have
    /// the value [`Color::NONE`]. The returned view always has the (rounded) size of `rect`.
    pub fn view(&self, rect: Rect) -> ImageView<'_> {
        ImageView {
            image: self,
            data: ViewData::full(self).view(rect),
        }
    }

    /// Creates a mutable view into an area of this image, specified by `rect`.
    ///
    /// Writes to pixels outside of `self` are ignored.
    pub fn view_mut(&mut self, rect: Rect) -> ImageViewMut<'_> {
        ImageViewMut {
            data: ViewData::full(self).view(rect),
            image: self,
        }
    }

    /// Returns the raw RGBA8 pixel data, row by row.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_raw()
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} Image", self.width(), self.height())
    }
}

/// Pixel-aligned rectangle of a view, in the root image's coordinates.
#[derive(Debug, Clone, Copy)]
struct ViewData {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

impl ViewData {
    fn full(image: &Image) -> Self {
        Self {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
        }
    }

    /// Creates a sub-view; `rect` is relative to `self`.
    fn view(&self, rect: Rect) -> Self {
        let (x, y, width, height) = rect.to_pixels();
        Self {
            x: self.x + x,
            y: self.y + y,
            width,
            height,
        }
    }

    fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width as f32, self.height as f32)
    }

    fn image_coord(&self, x: u32, y: u32, image: &Image) -> Option<(u32, u32)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let x = u32::try_from(i64::from(self.x) + i64::from(x)).ok()?;
        let y = u32::try_from(i64::from(self.y) + i64::from(y)).ok()?;
        if x >= image.width() || y >= image.height() {
            return None;
        }
        Some((x, y))
    }

    fn get(&self, x: u32, y: u32, image: &Image) -> Color {
        match self.image_coord(x, y, image) {
            Some((x, y)) => image.get(x, y),
            None => Color::NONE,
        }
    }
}

/// An immutable view of a rectangular section of an [`Image`].
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    image: &'a Image,
    data: ViewData,
}

impl<'a> ImageView<'a> {
    #[inline]
    pub fn width(&self) -> u32 {
        self.data.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.data.height
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns a [`Rect`] at `(0, 0)` covering this view.
    #[inline]
    pub fn rect(&self) -> Rect {
        self.data.rect()
    }

    /// Returns the color at `(x, y)` relative to this view.
    ///
    /// Pixels outside of the underlying image read as [`Color::NONE`].
    pub fn get(&self, x: u32, y: u32) -> Color {
        self.data.get(x, y, self.image)
    }

    /// Creates a view of an area of this view. `rect` is relative to `self`.
    pub fn view(&self, rect: Rect) -> ImageView<'a> {
        ImageView {
            image: self.image,
            data: self.data.view(rect),
        }
    }

    /// Copies the contents of this view into a new [`Image`].
    pub fn to_image(&self) -> Image {
        Image {
            buf: ImageBuffer::from_fn(self.width(), self.height(), |x, y| {
                Rgba(self.get(x, y).0)
            }),
        }
    }
}

impl fmt::Debug for ImageView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} view of {:?}", self.data, self.image)
    }
}

/// A mutable view of a rectangular section of an [`Image`].
pub struct ImageViewMut<'a> {
    image: &'a mut Image,
    data: ViewData,
}

impl<'a> ImageViewMut<'a> {
    #[inline]
    pub fn width(&self) -> u32 {
        self.data.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.data.height
    }

    /// Sets the color at `(x, y)` relative to this view.
    ///
    /// Writes outside of the underlying image are ignored.
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        if let Some((x, y)) = self.data.image_coord(x, y, self.image) {
            self.image.set(x, y, color);
        }
    }

    /// Borrows `self` as a shorter-lived [`ImageViewMut`].
    pub fn reborrow(&mut self) -> ImageViewMut<'_> {
        ImageViewMut {
            image: self.image,
            data: self.data,
        }
    }
}

/// An 8-bit RGBA color.
///
/// Colors are always in the non-linear sRGB color space and use non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    /// Fully transparent black (all components are 0).
    pub const NONE: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const WHITE: Self = Self([255, 255, 255, 255]);
    pub const RED: Self = Self([255, 0, 0, 255]);
    pub const GREEN: Self = Self([0, 255, 0, 255]);
    pub const BLUE: Self = Self([0, 0, 255, 255]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }

    /// Packs the color into the `0RGB` format used by the display window.
    #[inline]
    pub fn to_0rgb(&self) -> u32 {
        u32::from(self.r()) << 16 | u32::from(self.g()) << 8 | u32::from(self.b())
    }

    /// Computes the BT.601 luma of this color, in range 0.0 to 255.0.
    pub fn luma(&self) -> f32 {
        0.299 * f32::from(self.r()) + 0.587 * f32::from(self.g()) + 0.114 * f32::from(self.b())
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r(),
            self.g(),
            self.b(),
            self.a(),
        )
    }
}

impl Index<usize> for Color {
    type Output = u8;

    #[inline]
    fn index(&self, index: usize) -> &u8 {
        &self.0[index]
    }
}

impl PixelColor for Color {
    type Raw = RawU32;
}

/// Trait for types that can be treated as read-only views of image data.
pub trait AsImageView {
    fn as_view(&self) -> ImageView<'_>;
}

/// Trait for types that can be treated as mutable views of image data.
pub trait AsImageViewMut {
    fn as_view_mut(&mut self) -> ImageViewMut<'_>;
}

impl AsImageView for Image {
    fn as_view(&self) -> ImageView<'_> {
        ImageView {
            image: self,
            data: ViewData::full(self),
        }
    }
}

impl AsImageView for ImageView<'_> {
    fn as_view(&self) -> ImageView<'_> {
        *self
    }
}

impl AsImageViewMut for Image {
    fn as_view_mut(&mut self) -> ImageViewMut<'_> {
        ImageViewMut {
            data: ViewData::full(self),
            image: self,
        }
    }
}

impl AsImageViewMut for ImageViewMut<'_> {
    fn as_view_mut(&mut self) -> ImageViewMut<'_> {
        self.reborrow()
    }
}

impl<V: AsImageView> AsImageView for &V {
    fn as_view(&self) -> ImageView<'_> {
        (**self).as_view()
    }
}

impl<V: AsImageViewMut> AsImageViewMut for &mut V {
    fn as_view_mut(&mut self) -> ImageViewMut<'_> {
        (**self).as_view_mut()
    }
}
