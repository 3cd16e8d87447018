/// A detected local feature: its position in the image plus the scale and
/// orientation reported by the detector.
///
/// Keypoints are never copied into match structures; everything downstream of
/// loading refers to them by their index in the owning
/// [`ImageFeatures`](crate::image_features::ImageFeatures).
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Column coordinate in pixels, growing to the right.
    pub x: f32,

    /// Row coordinate in pixels, growing downwards.
    pub y: f32,

    /// Detector scale (for SIFT, the sigma of the Gaussian level).
    pub scale: f32,

    /// Dominant gradient orientation in radians.
    pub orientation: f32,
}

impl Keypoint {
    /// Creates a keypoint at `(x, y)` with zero scale and orientation.
    ///
    /// # Examples
    /// ```
    /// use epimatch::keypoint::Keypoint;
    /// let kp = Keypoint::new(10.0, 20.0);
    /// assert_eq!(kp.position(), (10.0, 20.0));
    /// ```
    pub fn new(x: f32, y: f32) -> Self {
        Keypoint {
            x,
            y,
            ..Default::default()
        }
    }

    /// Returns the pixel position in double precision, ready for the
    /// homogeneous algebra in [`geometry`](crate::geometry).
    pub fn position(&self) -> (f64, f64) {
        (self.x as f64, self.y as f64)
    }
}
