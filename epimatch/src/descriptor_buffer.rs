use crate::error::MatchError;
use std::ops::Index;

/// Number of bytes in one SIFT-style descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

/// One fixed-length descriptor.
pub type Descriptor = [u8; DESCRIPTOR_LEN];

/// Contiguous storage for all descriptors of one image.
///
/// Descriptor `i` occupies bytes `i * 128 .. (i + 1) * 128`. The buffer is
/// immutable once built so it can be shared read-only between every matcher
/// that involves the image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorBuffer {
    data: Vec<u8>,
}

impl DescriptorBuffer {
    /// Wraps a raw byte buffer.
    ///
    /// # Errors
    /// [`MatchError::DescriptorLength`] if `data.len()` is not a multiple of
    /// [`DESCRIPTOR_LEN`].
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, MatchError> {
        if data.len() % DESCRIPTOR_LEN != 0 {
            return Err(MatchError::DescriptorLength(data.len()));
        }
        Ok(DescriptorBuffer { data })
    }

    /// Builds a buffer from individual descriptors.
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = Descriptor>,
    {
        let data = descriptors.into_iter().flatten().collect();
        DescriptorBuffer { data }
    }

    /// Number of descriptors stored.
    pub fn len(&self) -> usize {
        self.data.len() / DESCRIPTOR_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns descriptor `index`, or `None` when it is out of range.
    ///
    /// # Examples
    /// ```
    /// use epimatch::descriptor_buffer::DescriptorBuffer;
    /// let buffer = DescriptorBuffer::from_descriptors([[1u8; 128], [2u8; 128]]);
    /// assert_eq!(buffer.get(1).map(|d| d[0]), Some(2));
    /// assert!(buffer.get(2).is_none());
    /// ```
    pub fn get(&self, index: usize) -> Option<&Descriptor> {
        let start = index.checked_mul(DESCRIPTOR_LEN)?;
        let bytes = self.data.get(start..start + DESCRIPTOR_LEN)?;
        bytes.try_into().ok()
    }

    /// Iterates over the descriptors in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> + '_ {
        self.data
            .chunks_exact(DESCRIPTOR_LEN)
            .filter_map(|chunk| <&Descriptor>::try_from(chunk).ok())
    }

    /// Copies the first `count` descriptors, used to build search indices over
    /// the top-ranked subset of an image.
    pub fn leading(&self, count: usize) -> Vec<Descriptor> {
        self.iter().take(count).copied().collect()
    }

    /// Copies the descriptors at the given indices, in order.
    pub fn gather(&self, indices: &[usize]) -> Vec<Descriptor> {
        indices.iter().map(|&i| self[i]).collect()
    }

    /// Raw bytes of the whole buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Index<usize> for DescriptorBuffer {
    type Output = Descriptor;

    /// # Panics
    /// Panics if `index >= self.len()`.
    fn index(&self, index: usize) -> &Descriptor {
        match self.get(index) {
            Some(descriptor) => descriptor,
            None => panic!(
                "descriptor index {index} out of range for buffer of {} descriptors",
                self.len()
            ),
        }
    }
}

/// Squared Euclidean distance between two descriptors.
///
/// The result always fits in a `u32`: the worst case is `128 * 255²`.
pub fn squared_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}
