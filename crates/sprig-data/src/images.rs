// LabeledImages: a fixed collection of fixed-point images with class labels
//
// Every image shares one CHW shape and one exponent. The collection is
// produced elsewhere (baked into firmware, or read from a model bundle);
// here it is only validated and iterated.

use serde::{Deserialize, Serialize};

use sprig_core::{Error, QFormat, Result, Shape};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledImages {
    shape: Shape,
    q: QFormat,
    images: Vec<Vec<i8>>,
    labels: Vec<usize>,
}

impl LabeledImages {
    pub fn new(
        shape: impl Into<Shape>,
        q: QFormat,
        images: Vec<Vec<i8>>,
        labels: Vec<usize>,
    ) -> Result<Self> {
        let set = LabeledImages {
            shape: shape.into(),
            q,
            images,
            labels,
        };
        set.validate()?;
        Ok(set)
    }

    /// Check image sizes and label count. Deserialized collections skip
    /// `new`, so loaders call this explicitly.
    pub fn validate(&self) -> Result<()> {
        if self.labels.len() != self.images.len() {
            return Err(Error::msg(format!(
                "{} images but {} labels",
                self.images.len(),
                self.labels.len()
            )));
        }
        let expected = self.shape.elem_count();
        for image in &self.images {
            if image.len() != expected {
                return Err(Error::ElementCountMismatch {
                    shape: self.shape.clone(),
                    expected,
                    got: image.len(),
                });
            }
        }
        Ok(())
    }

    /// Every label must name one of `classes` classes.
    pub fn check_labels(&self, classes: usize) -> Result<()> {
        match self.labels.iter().find(|&&l| l >= classes) {
            Some(&label) => Err(Error::LabelOutOfRange { label, classes }),
            None => Ok(()),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn q(&self) -> QFormat {
        self.q
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn image(&self, i: usize) -> &[i8] {
        &self.images[i]
    }

    pub fn label(&self, i: usize) -> usize {
        self.labels[i]
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// `(image, label)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&[i8], usize)> + '_ {
        self.images
            .iter()
            .map(Vec::as_slice)
            .zip(self.labels.iter().copied())
    }
}
