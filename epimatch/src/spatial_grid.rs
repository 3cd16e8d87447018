use crate::image_features::ImageFeatures;
use crate::keypoint::Keypoint;

/// Number of overlapping tilings: unshifted, shifted by half a cell in x, in
/// y, and in both.
const TILINGS: usize = 4;

/// An approximate locality index over the keypoints of one image.
///
/// The plane is covered by four tilings of square cells of side `cell_size`:
/// the base tiling and three copies shifted by half a cell in x, in y and in
/// both. Every keypoint that is at least one cell away from every border is
/// stored in the one cell it falls into in each tiling, so each point belongs
/// to exactly four buckets. A query picks the single tiling whose cell centre
/// is closest to the query point and returns that bucket: a cheap stand-in for
/// a radius search that trades some recall for speed.
///
/// All buckets live in one vector; tiling `t` owns the index range starting at
/// `offsets[t]`. The grid is immutable after construction, so one grid per
/// image can serve every image pair concurrently.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    /// Side of a cell in pixels, always even.
    cell_size: usize,
    /// Image width in pixels.
    width: usize,
    /// Image height in pixels.
    height: usize,
    /// Columns and rows of each tiling.
    dims: [(usize, usize); TILINGS],
    /// First global bucket index of each tiling.
    offsets: [usize; TILINGS],
    /// Point indices per global bucket index.
    buckets: Vec<Vec<usize>>,
}

impl SpatialGrid {
    /// Builds the grid for an image of `width x height` pixels.
    ///
    /// An odd `cell_size` is rounded up to the next even number so that half
    /// a cell is a whole number of pixels.
    ///
    /// # Examples
    /// ```
    /// use epimatch::keypoint::Keypoint;
    /// use epimatch::spatial_grid::SpatialGrid;
    ///
    /// let grid = SpatialGrid::new(15, 160, 160, &[Keypoint::new(40.0, 40.0)]);
    /// assert_eq!(grid.cell_size(), 16);
    /// assert_eq!(grid.points_near(40.0, 40.0), &[0]);
    /// ```
    pub fn new(cell_size: usize, width: usize, height: usize, keypoints: &[Keypoint]) -> Self {
        let cell_size = (cell_size + cell_size % 2).max(2);
        let half = cell_size / 2;

        let cols = width / cell_size;
        let rows = height / cell_size;
        let shifted_cols = width.saturating_sub(half) / cell_size;
        let shifted_rows = height.saturating_sub(half) / cell_size;

        let dims = [
            (cols, rows),
            (shifted_cols, rows),
            (cols, shifted_rows),
            (shifted_cols, shifted_rows),
        ];
        let mut offsets = [0usize; TILINGS];
        for t in 1..TILINGS {
            offsets[t] = offsets[t - 1] + dims[t - 1].0 * dims[t - 1].1;
        }
        let total = offsets[TILINGS - 1] + dims[TILINGS - 1].0 * dims[TILINGS - 1].1;

        let mut grid = SpatialGrid {
            cell_size,
            width,
            height,
            dims,
            offsets,
            buckets: vec![Vec::new(); total],
        };

        let mut inserted = 0usize;
        for (index, keypoint) in keypoints.iter().enumerate() {
            let (x, y) = keypoint.position();
            if !grid.is_interior(x, y) {
                continue;
            }
            for cell in grid.cells_at(x, y) {
                if let Some(bucket) = cell.bucket {
                    grid.buckets[bucket].push(index);
                }
            }
            inserted += 1;
        }
        log::debug!(
            "SpatialGrid: {inserted} of {} keypoints indexed in {total} buckets \
             (cell {cell_size}px)",
            keypoints.len()
        );

        grid
    }

    /// Builds the grid over the keypoints of `image`.
    pub fn for_image(image: &ImageFeatures, cell_size: usize) -> Self {
        Self::new(
            cell_size,
            image.width() as usize,
            image.height() as usize,
            image.keypoints(),
        )
    }

    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Total number of buckets over all four tilings.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Members of bucket `index`, empty when out of range.
    pub fn bucket(&self, index: usize) -> &[usize] {
        self.buckets.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Global index of the bucket whose cell centre is closest to `(x, y)`.
    ///
    /// Only the cell that contains `(x, y)` in each tiling is considered; on a
    /// tie the earlier tiling wins. Returns `None` when the winning cell falls
    /// outside its tiling, which only happens near the image border where no
    /// point is ever stored.
    pub fn closest_bucket(&self, x: f64, y: f64) -> Option<usize> {
        let mut closest: Option<Cell> = None;
        for cell in self.cells_at(x, y) {
            if closest.map_or(true, |best| cell.distance < best.distance) {
                closest = Some(cell);
            }
        }
        closest.and_then(|cell| cell.bucket)
    }

    /// Points stored in the bucket chosen by [`closest_bucket`](Self::closest_bucket).
    pub fn points_near(&self, x: f64, y: f64) -> &[usize] {
        match self.closest_bucket(x, y) {
            Some(bucket) => &self.buckets[bucket],
            None => &[],
        }
    }

    /// Deduplicated union of [`points_near`](Self::points_near) over all
    /// sample points, in ascending index order.
    pub fn points_near_polyline(&self, samples: &[(f64, f64)]) -> Vec<usize> {
        let mut points: Vec<usize> = samples
            .iter()
            .flat_map(|&(x, y)| self.points_near(x, y).iter().copied())
            .collect();
        points.sort_unstable();
        points.dedup();
        points
    }

    /// Union of the buckets containing `(x, y)` in all four tilings, in
    /// ascending index order. Slower and larger than [`points_near`](Self::points_near)
    /// but never misses a stored point within half a cell.
    pub fn points_near_all_tilings(&self, x: f64, y: f64) -> Vec<usize> {
        let mut points: Vec<usize> = self
            .cells_at(x, y)
            .iter()
            .filter_map(|cell| cell.bucket)
            .flat_map(|bucket| self.buckets[bucket].iter().copied())
            .collect();
        points.sort_unstable();
        points.dedup();
        points
    }

    /// True when `(x, y)` is at least one cell away from every border.
    fn is_interior(&self, x: f64, y: f64) -> bool {
        let g = self.cell_size as f64;
        x >= g && y >= g && x <= self.width as f64 - g && y <= self.height as f64 - g
    }

    /// The cell containing `(x, y)` in each tiling, with its squared distance
    /// from the cell centre and its global bucket index when in range.
    fn cells_at(&self, x: f64, y: f64) -> [Cell; TILINGS] {
        let g = self.cell_size as f64;
        let half = g / 2.0;

        let col = (x / g).floor();
        let row = (y / g).floor();
        let shifted_col = (x / g - 0.5).floor();
        let shifted_row = (y / g - 0.5).floor();

        let centre_x = col * g + half;
        let centre_y = row * g + half;
        let shifted_centre_x = shifted_col * g + g;
        let shifted_centre_y = shifted_row * g + g;

        let dx = (centre_x - x).powi(2);
        let dy = (centre_y - y).powi(2);
        let shifted_dx = (shifted_centre_x - x).powi(2);
        let shifted_dy = (shifted_centre_y - y).powi(2);

        [
            self.cell(0, col, row, dx + dy),
            self.cell(1, shifted_col, row, shifted_dx + dy),
            self.cell(2, col, shifted_row, dx + shifted_dy),
            self.cell(3, shifted_col, shifted_row, shifted_dx + shifted_dy),
        ]
    }

    fn cell(&self, tiling: usize, col: f64, row: f64, distance: f64) -> Cell {
        let (cols, rows) = self.dims[tiling];
        let in_range = col >= 0.0 && row >= 0.0 && col < cols as f64 && row < rows as f64;
        let bucket = in_range.then(|| self.offsets[tiling] + row as usize * cols + col as usize);
        Cell { bucket, distance }
    }
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    bucket: Option<usize>,
    distance: f64,
}
