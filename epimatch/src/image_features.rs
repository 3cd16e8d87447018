use crate::descriptor_buffer::{Descriptor, DescriptorBuffer};
use crate::error::MatchError;
use crate::geometry::ImageRect;
use crate::keypoint::Keypoint;

/// Everything the matcher needs to know about one image: its dimensions, its
/// keypoints and the parallel descriptor buffer.
///
/// Keypoints are assumed to be ordered by detector strength, strongest first,
/// which is what the top-percent selection of the global matching stage relies
/// on. The struct is immutable after construction; wrap it in an `Arc` or
/// borrow it to share one image across many pairwise matchers.
#[derive(Debug, Clone)]
pub struct ImageFeatures {
    /// Image width in pixels.
    width: u32,
    /// Image height in pixels.
    height: u32,
    /// Keypoints, index-aligned with `descriptors`.
    keypoints: Vec<Keypoint>,
    /// One descriptor per keypoint.
    descriptors: DescriptorBuffer,
}

impl ImageFeatures {
    /// # Errors
    /// [`MatchError::FeatureCountMismatch`] when the keypoint and descriptor
    /// counts differ.
    pub fn new(
        width: u32,
        height: u32,
        keypoints: Vec<Keypoint>,
        descriptors: DescriptorBuffer,
    ) -> Result<Self, MatchError> {
        if keypoints.len() != descriptors.len() {
            return Err(MatchError::FeatureCountMismatch {
                keypoints: keypoints.len(),
                descriptors: descriptors.len(),
            });
        }
        Ok(ImageFeatures {
            width,
            height,
            keypoints,
            descriptors,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of features in the image.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &DescriptorBuffer {
        &self.descriptors
    }

    /// Pixel position of feature `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn position(&self, index: usize) -> (f64, f64) {
        self.keypoints[index].position()
    }

    /// Descriptor of feature `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn descriptor(&self, index: usize) -> &Descriptor {
        &self.descriptors[index]
    }

    /// The image boundary as four homogeneous lines.
    pub fn rect(&self) -> ImageRect {
        ImageRect::new(self.width as f64, self.height as f64)
    }
}
