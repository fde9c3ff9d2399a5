//! Axis-aligned n-d rectangles over integer coordinates.

use std::fmt;

use smallvec::SmallVec;

use crate::error::GridError;
use crate::id::Point;

/// A half-open n-d box `[origin, origin + size)`.
///
/// Rectangles describe partition bounds, halo regions, storage shapes and
/// pack/unpack sub-regions. All extents are non-negative; a rectangle with
/// any zero extent is empty and contains no points.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    origin: Point,
    size: Point,
}

impl Rect {
    /// Build a rectangle from its origin and per-axis extent.
    ///
    /// Fails if the two slices disagree on dimensionality, if the
    /// rectangle is zero-dimensional, or if any extent is negative.
    pub fn new(origin: &[i32], size: &[i32]) -> Result<Self, GridError> {
        if origin.len() != size.len() {
            return Err(GridError::DimensionMismatch {
                expected: origin.len(),
                found: size.len(),
            });
        }
        if origin.is_empty() {
            return Err(GridError::InvalidRegion {
                reason: "rectangle must have at least one dimension".into(),
            });
        }
        if let Some(axis) = size.iter().position(|&s| s < 0) {
            return Err(GridError::InvalidRegion {
                reason: format!("negative extent {} on axis {axis}", size[axis]),
            });
        }
        Ok(Self {
            origin: SmallVec::from_slice(origin),
            size: SmallVec::from_slice(size),
        })
    }

    /// Build a rectangle anchored at the origin with the given shape.
    pub fn from_shape(shape: &[i32]) -> Result<Self, GridError> {
        let origin: Point = SmallVec::from_elem(0, shape.len());
        Self::new(&origin, shape)
    }

    /// Build a rectangle from an inclusive minimum and exclusive maximum.
    pub fn from_corners(min: &[i32], max: &[i32]) -> Result<Self, GridError> {
        if min.len() != max.len() {
            return Err(GridError::DimensionMismatch {
                expected: min.len(),
                found: max.len(),
            });
        }
        let size: Point = min.iter().zip(max).map(|(lo, hi)| hi - lo).collect();
        Self::new(min, &size)
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.origin.len()
    }

    /// Inclusive lower corner.
    pub fn origin(&self) -> &[i32] {
        &self.origin
    }

    /// Per-axis extent.
    pub fn size(&self) -> &[i32] {
        &self.size
    }

    /// Exclusive upper corner.
    pub fn max(&self) -> Point {
        self.origin
            .iter()
            .zip(&self.size)
            .map(|(o, s)| o + s)
            .collect()
    }

    /// Number of points in the rectangle.
    pub fn area(&self) -> usize {
        self.size.iter().map(|&s| s as usize).product()
    }

    /// Whether the rectangle contains no points.
    pub fn is_empty(&self) -> bool {
        self.size.iter().any(|&s| s == 0)
    }

    /// Whether `point` lies inside the rectangle.
    ///
    /// A point of the wrong dimensionality is never contained.
    pub fn contains(&self, point: &[i32]) -> bool {
        point.len() == self.ndim()
            && point
                .iter()
                .zip(self.origin.iter().zip(&self.size))
                .all(|(&p, (&o, &s))| p >= o && p < o + s)
    }

    /// Whether `other` lies entirely inside this rectangle.
    ///
    /// Empty rectangles of matching dimensionality are always contained.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        if other.ndim() != self.ndim() {
            return false;
        }
        if other.is_empty() {
            return true;
        }
        let other_max = other.max();
        let self_max = self.max();
        (0..self.ndim())
            .all(|d| other.origin[d] >= self.origin[d] && other_max[d] <= self_max[d])
    }

    /// Intersection with another rectangle, or `None` if they are
    /// disjoint (or of different dimensionality).
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        if other.ndim() != self.ndim() {
            return None;
        }
        let a_max = self.max();
        let b_max = other.max();
        let mut origin = Point::with_capacity(self.ndim());
        let mut size = Point::with_capacity(self.ndim());
        for d in 0..self.ndim() {
            let lo = self.origin[d].max(other.origin[d]);
            let hi = a_max[d].min(b_max[d]);
            if hi <= lo {
                return None;
            }
            origin.push(lo);
            size.push(hi - lo);
        }
        Some(Rect { origin, size })
    }

    /// Grow the rectangle by `margin[d]` cells on both sides of axis `d`.
    pub fn expand(&self, margin: &[i32]) -> Rect {
        let origin = self
            .origin
            .iter()
            .zip(margin)
            .map(|(o, m)| o - m)
            .collect();
        let size = self
            .size
            .iter()
            .zip(margin)
            .map(|(s, m)| s + 2 * m)
            .collect();
        Rect { origin, size }
    }

    /// Translate the rectangle so that `anchor` becomes the new origin of
    /// the coordinate system (i.e. subtract `anchor` from the origin).
    pub fn relative_to(&self, anchor: &[i32]) -> Rect {
        let origin = self
            .origin
            .iter()
            .zip(anchor)
            .map(|(o, a)| o - a)
            .collect();
        Rect {
            origin,
            size: self.size.clone(),
        }
    }

    /// Translate the rectangle by `offset`.
    pub fn translate(&self, offset: &[i32]) -> Rect {
        let origin = self
            .origin
            .iter()
            .zip(offset)
            .map(|(o, d)| o + d)
            .collect();
        Rect {
            origin,
            size: self.size.clone(),
        }
    }

    /// Iterate the points of the rectangle in row-major order (the last
    /// axis varies fastest).
    pub fn points(&self) -> RectPoints<'_> {
        RectPoints {
            rect: self,
            next: if self.is_empty() {
                None
            } else {
                Some(self.origin.clone())
            },
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max = self.max();
        write!(f, "[")?;
        for d in 0..self.ndim() {
            if d > 0 {
                write!(f, " x ")?;
            }
            write!(f, "{}..{}", self.origin[d], max[d])?;
        }
        write!(f, "]")
    }
}

/// Row-major iterator over the points of a [`Rect`].
pub struct RectPoints<'a> {
    rect: &'a Rect,
    next: Option<Point>,
}

impl Iterator for RectPoints<'_> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        let current = self.next.take()?;
        let mut following = current.clone();
        let mut axis = self.rect.ndim();
        while axis > 0 {
            axis -= 1;
            following[axis] += 1;
            if following[axis] < self.rect.origin[axis] + self.rect.size[axis] {
                self.next = Some(following);
                return Some(current);
            }
            following[axis] = self.rect.origin[axis];
        }
        Some(current)
    }
}
