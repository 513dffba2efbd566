//! The working image / model / color-space triple threaded through a run.

use crate::mat::{self, Mat};
use crate::types::{ColorSpace, Model};

/// The one rule for carrying a value forward: a stage that produces nothing
/// leaves the previous value in place.
#[must_use]
pub fn merge<T>(prior: Option<T>, incoming: Option<T>) -> Option<T> {
    incoming.or(prior)
}

/// Mutable state owned by the pipeline while it runs.
///
/// Holds at most one working image handle. Replacing it releases the
/// previous handle unless the new one points at the same buffer.
#[derive(Debug, Default)]
pub struct WorkingState {
    image: Mat,
    model: Option<Model>,
    color_space: Option<ColorSpace>,
}

impl WorkingState {
    /// The current working image, possibly empty.
    #[must_use]
    pub const fn image(&self) -> &Mat {
        &self.image
    }

    /// The current working image, substituting the synthetic placeholder
    /// when no stage has produced one yet.
    pub fn image_or_placeholder(&mut self, width: u32, height: u32) -> &Mat {
        if self.image.is_empty() {
            self.image = mat::placeholder(width, height);
            self.color_space = Some(ColorSpace::Bgr);
        }
        &self.image
    }

    /// The most recent model any stage produced.
    #[must_use]
    pub const fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// The most recent color space any stage declared.
    #[must_use]
    pub const fn color_space(&self) -> Option<ColorSpace> {
        self.color_space
    }

    /// Overwrite the color space tag.
    pub const fn set_color_space(&mut self, color_space: Option<ColorSpace>) {
        self.color_space = color_space;
    }

    /// Fold a stage's model and color space into the working state.
    pub fn absorb(&mut self, model: Option<&Model>, color_space: Option<ColorSpace>) {
        self.model = merge(self.model.take(), model.cloned());
        self.color_space = merge(self.color_space, color_space);
    }

    /// Make `image` the working image and return a private copy of it.
    pub fn adopt_image(&mut self, image: Mat) -> Mat {
        if !self.image.same_handle(&image) {
            self.image.release();
        }
        self.image = image;
        self.image.clone()
    }

    /// A private copy of the working image (empty if there is none).
    #[must_use]
    pub fn snapshot_image(&self) -> Mat {
        self.image.clone()
    }

    /// Free the working image and forget the model.
    ///
    /// The color space tag is kept; it describes how the next image should
    /// be read until a stage says otherwise.
    pub fn release(&mut self) {
        self.image.release();
        self.model = None;
    }
}
