//! Image buffer handles.
//!
//! A [`Mat`] is an owned handle to a pixel buffer. Several handles may
//! point at the same buffer ([`Mat::share`]); the buffer is freed when the
//! last one is released. [`Clone`] is a deep copy and always allocates a
//! fresh buffer, so a cloned handle never observes later writes to, or the
//! release of, the original.
//!
//! The pipeline relies on this split: the working image is handed from
//! stage to stage by sharing, while every cached result keeps its own
//! deep copy.

use std::fmt;
use std::sync::{Arc, Weak};

use image::{DynamicImage, Rgb, RgbImage};

/// Owned handle to an image buffer, possibly empty.
#[derive(Default)]
pub struct Mat {
    buffer: Option<Arc<DynamicImage>>,
}

impl Mat {
    /// Wrap a decoded image in a new buffer.
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self {
            buffer: Some(Arc::new(image)),
        }
    }

    /// A handle that holds no buffer.
    #[must_use]
    pub const fn empty() -> Self {
        Self { buffer: None }
    }

    /// `true` if there is no buffer, or the buffer has no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer
            .as_deref()
            .is_none_or(|image| image.width() == 0 || image.height() == 0)
    }

    /// Width in pixels, zero when empty.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.buffer.as_deref().map_or(0, DynamicImage::width)
    }

    /// Height in pixels, zero when empty.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.buffer.as_deref().map_or(0, DynamicImage::height)
    }

    /// Borrow the pixels.
    #[must_use]
    pub fn image(&self) -> Option<&DynamicImage> {
        self.buffer.as_deref()
    }

    /// Copy the pixels out into an independent image.
    #[must_use]
    pub fn to_image(&self) -> Option<DynamicImage> {
        self.buffer.as_deref().cloned()
    }

    /// A second handle to the same buffer.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
        }
    }

    /// Whether both handles point at the very same buffer.
    ///
    /// Two empty handles are not considered the same.
    #[must_use]
    pub fn same_handle(&self, other: &Self) -> bool {
        match (&self.buffer, &other.buffer) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Byte-wise pixel comparison (dimensions and layout included).
    #[must_use]
    pub fn pixels_eq(&self, other: &Self) -> bool {
        match (self.image(), other.image()) {
            (Some(a), Some(b)) => {
                a.width() == b.width()
                    && a.height() == b.height()
                    && a.color() == b.color()
                    && a.as_bytes() == b.as_bytes()
            }
            (None, None) => true,
            _ => false,
        }
    }

    /// Drop this handle's reference to the buffer. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.buffer = None;
    }

    /// Observe the buffer without keeping it alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakMat {
        WeakMat {
            buffer: self.buffer.as_ref().map(Arc::downgrade),
        }
    }
}

impl Clone for Mat {
    fn clone(&self) -> Self {
        Self {
            buffer: self
                .buffer
                .as_deref()
                .map(|image| Arc::new(image.clone())),
        }
    }
}

impl fmt::Debug for Mat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.image() {
            Some(image) => write!(
                f,
                "Mat({}x{} {:?})",
                image.width(),
                image.height(),
                image.color()
            ),
            None => f.write_str("Mat(empty)"),
        }
    }
}

impl From<DynamicImage> for Mat {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Non-owning observer of a [`Mat`] buffer.
#[derive(Debug, Clone, Default)]
pub struct WeakMat {
    buffer: Option<Weak<DynamicImage>>,
}

impl WeakMat {
    /// `true` once every handle to the buffer has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.buffer
            .as_ref()
            .is_none_or(|weak| weak.strong_count() == 0)
    }
}

/// The synthetic working image shown before any stage produced one.
///
/// A black canvas crossed by two red diagonals. Pixels are laid out in
/// BGR order, so callers must tag it with [`ColorSpace::Bgr`](crate::ColorSpace::Bgr).
#[must_use]
pub fn placeholder(width: u32, height: u32) -> Mat {
    let mut canvas = RgbImage::new(width, height);
    #[allow(clippy::cast_precision_loss)]
    let (w, h) = (width as f32, height as f32);
    let red = Rgb([0, 0, 255]);
    imageproc::drawing::draw_line_segment_mut(&mut canvas, (0.0, 0.0), (w, h), red);
    imageproc::drawing::draw_line_segment_mut(&mut canvas, (w, 0.0), (0.0, h), red);
    Mat::new(DynamicImage::ImageRgb8(canvas))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32, value: u8) -> Mat {
        Mat::new(DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            width,
            height,
            image::Luma([value]),
        )))
    }

    #[test]
    fn empty_handle() {
        let mat = Mat::empty();
        assert!(mat.is_empty());
        assert_eq!(mat.width(), 0);
        assert!(mat.image().is_none());
    }

    #[test]
    fn zero_sized_buffer_counts_as_empty() {
        assert!(gray(0, 0, 0).is_empty());
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let a = gray(4, 3, 7);
        let b = a.clone();
        assert!(!a.same_handle(&b));
        assert!(a.pixels_eq(&b));
    }

    #[test]
    fn share_points_at_same_buffer() {
        let a = gray(2, 2, 1);
        let b = a.share();
        assert!(a.same_handle(&b));
    }

    #[test]
    fn buffer_freed_after_last_release() {
        let mut a = gray(2, 2, 1);
        let mut b = a.share();
        let weak = a.downgrade();

        a.release();
        assert!(!weak.is_released(), "b still holds the buffer");
        b.release();
        assert!(weak.is_released());
    }

    #[test]
    fn release_is_idempotent() {
        let mut a = gray(2, 2, 1);
        a.release();
        a.release();
        assert!(a.is_empty());
    }

    #[test]
    fn clone_survives_release_of_original() {
        let mut a = gray(3, 3, 9);
        let b = a.clone();
        a.release();
        assert_eq!(b.image().unwrap().to_luma8().get_pixel(1, 1).0[0], 9);
    }

    #[test]
    fn pixels_eq_detects_difference() {
        assert!(!gray(2, 2, 1).pixels_eq(&gray(2, 2, 2)));
        assert!(!gray(2, 2, 1).pixels_eq(&gray(2, 3, 1)));
        assert!(Mat::empty().pixels_eq(&Mat::empty()));
    }

    #[test]
    fn placeholder_has_red_diagonals() {
        let mat = placeholder(640, 480);
        assert_eq!((mat.width(), mat.height()), (640, 480));
        let rgb = mat.image().unwrap().to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(rgb.get_pixel(320, 10).0, [0, 0, 0]);
    }
}
