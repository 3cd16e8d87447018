//! Line and rectangle algebra in homogeneous coordinates, plus the epipolar
//! helpers the matcher builds on.
//!
//! A [`Line`] `(a, b, c)` is the set of points with `a*x + b*y + c = 0`. Image
//! coordinates have the origin in the top-left corner, `x` to the right and
//! `y` downwards.

use nalgebra::{Matrix3, Vector3};

/// A homogeneous 2D line `a*x + b*y + c = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Line {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Line { a, b, c }
    }

    /// The line through two distinct points.
    ///
    /// # Examples
    /// ```
    /// # use epimatch::geometry::Line;
    /// let l = Line::through((0.0, 0.0), (4.0, 2.0));
    /// assert!(l.evaluate(2.0, 1.0).abs() < 1e-12);
    /// ```
    pub fn through(p: (f64, f64), q: (f64, f64)) -> Self {
        Line {
            a: p.1 - q.1,
            b: q.0 - p.0,
            c: p.0 * q.1 - q.0 * p.1,
        }
    }

    /// Signed, unnormalised residual `a*x + b*y + c`.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.c
    }
}

/// The two points where a line enters and leaves an image rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFootprint {
    pub start: (f64, f64),
    pub end: (f64, f64),
}

impl LineFootprint {
    pub fn new(start: (f64, f64), end: (f64, f64)) -> Self {
        LineFootprint { start, end }
    }

    /// Euclidean length of the chord.
    pub fn length(&self) -> f64 {
        let dx = self.start.0 - self.end.0;
        let dy = self.start.1 - self.end.1;
        (dx * dx + dy * dy).sqrt()
    }

    /// Both endpoints rounded to whole pixels.
    pub fn rounded(&self) -> LineFootprint {
        LineFootprint {
            start: (self.start.0.round(), self.start.1.round()),
            end: (self.end.0.round(), self.end.1.round()),
        }
    }
}

/// The axis-aligned box `[0, width] x [0, height]` together with its four
/// boundary lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageRect {
    width: f64,
    height: f64,
    edges: [Line; 4],
}

impl ImageRect {
    pub fn new(width: f64, height: f64) -> Self {
        ImageRect {
            width,
            height,
            edges: rectangle_edges(width, height),
        }
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn edges(&self) -> &[Line; 4] {
        &self.edges
    }

    /// True when `(x, y)` lies inside the box, borders included.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }
}

/// A fundamental matrix `F` with `x_refᵀ F x_src = 0`, normalised so that
/// `F[(2, 2)] == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundamentalMatrix(Matrix3<f64>);

impl FundamentalMatrix {
    /// Scales `m` so that its last element is one.
    ///
    /// Returns `None` when the last element is zero or not finite, since the
    /// normalisation is then undefined.
    pub fn from_matrix(m: Matrix3<f64>) -> Option<Self> {
        let last = m[(2, 2)];
        if last == 0.0 || !last.is_finite() {
            return None;
        }
        let normalised = m / last;
        if normalised.iter().all(|v| v.is_finite()) {
            Some(FundamentalMatrix(normalised))
        } else {
            None
        }
    }

    /// Builds the matrix from nine row-major values.
    pub fn from_row_slice(values: &[f64; 9]) -> Option<Self> {
        Self::from_matrix(Matrix3::from_row_slice(values))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Row-major copy of the nine entries.
    #[rustfmt::skip]
    pub fn to_row_major(&self) -> [f64; 9] {
        let m = &self.0;
        [
            m[(0, 0)], m[(0, 1)], m[(0, 2)],
            m[(1, 0)], m[(1, 1)], m[(1, 2)],
            m[(2, 0)], m[(2, 1)], m[(2, 2)],
        ]
    }
}

/// The four boundary lines of `[0, width] x [0, height]`, in the order left,
/// top, bottom, right. Each line passes through the two corners of its side.
///
/// # Examples
/// ```
/// # use epimatch::geometry::rectangle_edges;
/// let [left, top, bottom, right] = rectangle_edges(100.0, 50.0);
/// assert_eq!(left.evaluate(0.0, 50.0), 0.0);
/// assert_eq!(top.evaluate(100.0, 0.0), 0.0);
/// assert_eq!(bottom.evaluate(0.0, 50.0), 0.0);
/// assert_eq!(right.evaluate(100.0, 0.0), 0.0);
/// ```
pub fn rectangle_edges(width: f64, height: f64) -> [Line; 4] {
    let top_left = (0.0, 0.0);
    let top_right = (width, 0.0);
    let bottom_left = (0.0, height);
    let bottom_right = (width, height);

    [
        Line::through(top_left, bottom_left),
        Line::through(top_left, top_right),
        Line::through(bottom_left, bottom_right),
        Line::through(bottom_right, top_right),
    ]
}

/// Intersection of two lines, or `None` when the determinant of the 2x2
/// system is exactly zero (parallel or coincident lines).
pub fn line_line_intersect(l1: &Line, l2: &Line) -> Option<(f64, f64)> {
    let den = l1.a * l2.b - l2.a * l1.b;
    if den == 0.0 {
        return None;
    }
    let num_x = l1.b * l2.c - l1.c * l2.b;
    let num_y = l1.c * l2.a - l1.a * l2.c;
    Some((num_x / den, num_y / den))
}

/// The chord `line` cuts through `rect`.
///
/// Intersects the line with all four edges and keeps the points inside the
/// box. Succeeds only when exactly two points survive; a line that misses or
/// grazes the rectangle (0 or 1 points) fails, as does a line through a corner
/// that produces 3 or 4 points. Endpoints are returned in edge order (left,
/// top, bottom, right).
///
/// The coordinate fixed by each edge is snapped onto it, so a rounding error
/// of one ulp past the right or bottom border does not drop the point.
pub fn rect_line_intersect(line: &Line, rect: &ImageRect) -> Option<LineFootprint> {
    let mut valid = [(0.0, 0.0); 4];
    let mut count = 0;
    for (side, edge) in rect.edges().iter().enumerate() {
        if let Some((x, y)) = line_line_intersect(line, edge) {
            let (x, y) = match side {
                0 => (0.0, y),
                1 => (x, 0.0),
                2 => (x, rect.height()),
                _ => (rect.width(), y),
            };
            if rect.contains(x, y) {
                valid[count] = (x, y);
                count += 1;
            }
        }
    }
    if count == 2 {
        Some(LineFootprint::new(valid[0], valid[1]))
    } else {
        None
    }
}

/// Epipolar line of `point`.
///
/// With `transpose == false` this is `F·x`, the line in the reference image on
/// which the match of a source point must lie. With `transpose == true` it is
/// `Fᵀ·x`, mapping a reference point back into the source image.
pub fn epipolar_line(point: (f64, f64), f: &FundamentalMatrix, transpose: bool) -> Line {
    let x = Vector3::new(point.0, point.1, 1.0);
    let l = if transpose {
        f.matrix().transpose() * x
    } else {
        f.matrix() * x
    };
    Line::new(l.x, l.y, l.z)
}

/// Perpendicular distance of `point` from `line`.
pub fn distance_from_line(point: (f64, f64), line: &Line) -> f64 {
    line.evaluate(point.0, point.1).abs() / (line.a * line.a + line.b * line.b).sqrt()
}

/// Distance of `reference` from the epipolar line of `source`.
pub fn epipolar_distance(source: (f64, f64), reference: (f64, f64), f: &FundamentalMatrix) -> f64 {
    distance_from_line(reference, &epipolar_line(source, f, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-6;

    #[test]
    fn intersection_satisfies_both_lines() {
        let pairs = [
            (Line::new(1.0, 2.0, -3.0), Line::new(-4.0, 0.5, 7.0)),
            (Line::new(0.3, -1.7, 250.0), Line::new(2.2, 0.9, -10.0)),
            (Line::new(1e-3, 1.0, -40.0), Line::new(1.0, 1e-3, -60.0)),
        ];
        for (l1, l2) in pairs {
            let (x, y) = line_line_intersect(&l1, &l2).expect("lines are not parallel");
            assert!(l1.evaluate(x, y).abs() < TOL);
            assert!(l2.evaluate(x, y).abs() < TOL);
        }
    }

    #[test]
    fn parallel_lines_do_not_intersect() {
        let l1 = Line::new(1.0, 2.0, 3.0);
        let l2 = Line::new(2.0, 4.0, -1.0);
        assert_eq!(line_line_intersect(&l1, &l2), None);
        assert_eq!(line_line_intersect(&l1, &l1), None);
    }

    #[test]
    fn rectangle_edges_pass_through_their_corners() {
        let (w, h) = (100.0, 50.0);
        let corners = [
            ((0.0, 0.0), (0.0, h)),
            ((0.0, 0.0), (w, 0.0)),
            ((0.0, h), (w, h)),
            ((w, h), (w, 0.0)),
        ];
        for (edge, (p, q)) in rectangle_edges(w, h).iter().zip(corners) {
            assert!(edge.evaluate(p.0, p.1).abs() < TOL);
            assert!(edge.evaluate(q.0, q.1).abs() < TOL);
            // The opposite side of the box is not on the edge.
            assert!(edge.evaluate(w / 2.0, h / 2.0).abs() > 1.0);
        }
    }

    #[test]
    fn interior_line_yields_two_endpoints_in_bounds() {
        let rect = ImageRect::new(100.0, 50.0);
        let line = Line::through((10.0, 5.0), (90.0, 40.0));
        let chord = rect_line_intersect(&line, &rect).expect("line crosses the box");
        for (x, y) in [chord.start, chord.end] {
            assert!(rect.contains(x, y));
            assert!(line.evaluate(x, y).abs() < TOL);
        }
        assert!(chord.length() > 80.0);
    }

    #[test]
    fn lines_leaving_through_right_and_bottom_edges_keep_both_endpoints() {
        let rect = ImageRect::new(640.0, 480.0);
        let right = Line::through((0.0, 205.47), (640.0, 245.89));
        let chord = rect_line_intersect(&right, &rect).expect("line crosses the box");
        assert_eq!(chord.end.0, 640.0);
        assert!((chord.end.1 - 245.89).abs() < TOL);

        let bottom = Line::through((123.456, 0.0), (401.7, 480.0));
        let chord = rect_line_intersect(&bottom, &rect).expect("line crosses the box");
        assert_eq!(chord.end.1, 480.0);
        assert!((chord.end.0 - 401.7).abs() < TOL);

        // Slopes drawn from real epipolar lines, which rarely hit the border
        // on a representable coordinate.
        for k in 1..200 {
            let y0 = 0.37 * k as f64 + 100.0;
            let y1 = y0 + 0.1913 * k as f64 - 7.3;
            let line = Line::through((0.0, y0), (640.0, y1));
            assert!(rect_line_intersect(&line, &rect).is_some(), "line {k}");
            let x1 = 3.17 * k as f64 + 1.3;
            let line = Line::through((x1 - 11.9, 0.0), (x1, 480.0));
            assert!(rect_line_intersect(&line, &rect).is_some(), "line {k}");
        }
    }

    #[test]
    fn missing_and_corner_lines_fail() {
        let rect = ImageRect::new(100.0, 50.0);
        // Entirely outside.
        let outside = Line::through((-10.0, 200.0), (300.0, 210.0));
        assert!(rect_line_intersect(&outside, &rect).is_none());
        // Through the top-left corner and the middle of the right edge: the
        // corner is reported by both the left and top edges.
        let corner = Line::through((0.0, 0.0), (100.0, 25.0));
        assert!(rect_line_intersect(&corner, &rect).is_none());
    }

    #[test]
    fn epipolar_line_and_transpose() {
        let f = FundamentalMatrix::from_row_slice(&[
            0.0, -1e-4, 0.02, 1e-4, 0.0, -0.03, -0.02, 0.03, 1.0,
        ])
        .unwrap();
        let p = (120.0, 80.0);
        let forward = epipolar_line(p, &f, false);
        let backward = epipolar_line(p, &f, true);
        let m = f.matrix();
        assert!((forward.a - (m[(0, 0)] * p.0 + m[(0, 1)] * p.1 + m[(0, 2)])).abs() < TOL);
        assert!((backward.a - (m[(0, 0)] * p.0 + m[(1, 0)] * p.1 + m[(2, 0)])).abs() < TOL);
    }

    #[test]
    fn distance_from_line_is_perpendicular() {
        let horizontal = Line::new(0.0, 2.0, -20.0); // y = 10
        assert!((distance_from_line((5.0, 13.0), &horizontal) - 3.0).abs() < TOL);
        assert!((distance_from_line((5.0, 7.0), &horizontal) - 3.0).abs() < TOL);
    }

    #[test]
    fn fundamental_is_normalised() {
        let f = FundamentalMatrix::from_row_slice(&[2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 4.0])
            .unwrap();
        assert_eq!(f.to_row_major()[8], 1.0);
        assert_eq!(f.to_row_major()[0], 0.5);
        assert!(FundamentalMatrix::from_row_slice(&[0.0; 9]).is_none());
    }
}
