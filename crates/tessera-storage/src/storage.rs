//! Dense row-major grid storage.

use std::fmt;

use smallvec::SmallVec;
use tessera_core::{Element, GridError, Rect};

use crate::region::Region;
use crate::snapshot::StorageSnapshot;

/// Dense storage of `E` over an n-d shape anchored at the origin.
///
/// The element count always equals `shape.area()`; nothing in this type
/// can change the length after construction. Storage is not internally
/// synchronized; its owner decides how it is shared.
#[derive(Clone, PartialEq)]
pub struct GridStorage<E: Element> {
    shape: Rect,
    strides: SmallVec<[usize; 4]>,
    data: Vec<E>,
}

impl<E: Element> GridStorage<E> {
    /// Allocate storage of the given shape filled with
    /// [`Element::default_value`].
    pub fn allocate(shape: &[i32]) -> Result<Self, GridError> {
        Self::filled(shape, E::default_value())
    }

    /// Allocate storage of the given shape filled with `fill`.
    pub fn filled(shape: &[i32], fill: E) -> Result<Self, GridError> {
        let shape = Rect::from_shape(shape)?;
        let strides = row_major_strides(shape.size());
        let data = vec![fill; shape.area()];
        Ok(Self {
            shape,
            strides,
            data,
        })
    }

    /// Fresh storage of the same element kind with a different shape.
    ///
    /// Used after a geometry change; `self` is left untouched.
    pub fn new_of_shape(&self, shape: &[i32], fill: E) -> Result<Self, GridError> {
        Self::filled(shape, fill)
    }

    /// The storage shape as a rectangle anchored at the origin.
    pub fn shape(&self) -> &Rect {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the storage holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major offset of a storage-local point.
    pub fn flat_index(&self, point: &[i32]) -> Result<usize, GridError> {
        if point.len() != self.shape.ndim() {
            return Err(GridError::DimensionMismatch {
                expected: self.shape.ndim(),
                found: point.len(),
            });
        }
        if !self.shape.contains(point) {
            return Err(GridError::OutOfBounds {
                point: SmallVec::from_slice(point),
                bounds: self.shape.to_string(),
            });
        }
        Ok(self.offset_unchecked(point))
    }

    /// Read one element.
    pub fn get(&self, point: &[i32]) -> Result<E, GridError> {
        Ok(self.data[self.flat_index(point)?])
    }

    /// Overwrite one element.
    pub fn set(&mut self, point: &[i32], value: E) -> Result<(), GridError> {
        let idx = self.flat_index(point)?;
        self.data[idx] = value;
        Ok(())
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: E) {
        self.data.fill(value);
    }

    /// The backing array in row-major order.
    pub fn as_slice(&self) -> &[E] {
        &self.data
    }

    /// Mutable access to the backing array in row-major order.
    pub fn as_mut_slice(&mut self) -> &mut [E] {
        &mut self.data
    }

    /// Serialize `region` into a flat buffer.
    ///
    /// The buffer holds `region.len() * E::WIDTH` bytes: the region's
    /// elements in row-major order, fixed-width little-endian.
    pub fn pack(&self, region: &Region) -> Result<Vec<u8>, GridError> {
        region.check_within(&self.shape)?;
        let mut out = Vec::with_capacity(region.len() * E::WIDTH);
        for (start, run) in self.runs(region) {
            for &v in &self.data[start..start + run] {
                v.encode(&mut out);
            }
        }
        Ok(out)
    }

    /// Write a flat buffer produced by [`pack`](Self::pack) into `region`.
    ///
    /// Fails with [`GridError::SerializationMismatch`] if the buffer does
    /// not hold exactly `region.len()` elements; in that case storage is
    /// left untouched. Returns the number of elements written.
    pub fn unpack(&mut self, region: &Region, buf: &[u8]) -> Result<usize, GridError> {
        region.check_within(&self.shape)?;
        let expected = region.len() * E::WIDTH;
        if buf.len() != expected {
            return Err(GridError::SerializationMismatch {
                expected,
                actual: buf.len(),
            });
        }
        let runs = self.runs(region);
        let mut chunks = buf.chunks_exact(E::WIDTH);
        for (start, run) in runs {
            for (slot, bytes) in self.data[start..start + run].iter_mut().zip(&mut chunks) {
                *slot = E::decode(bytes);
            }
        }
        Ok(region.len())
    }

    /// Deep, detached copy tagged with the element kind.
    pub fn to_snapshot(&self) -> StorageSnapshot {
        let mut bytes = Vec::with_capacity(self.data.len() * E::WIDTH);
        for &v in &self.data {
            v.encode(&mut bytes);
        }
        StorageSnapshot::new(E::KIND, self.shape.clone(), bytes)
    }

    fn offset_unchecked(&self, point: &[i32]) -> usize {
        point
            .iter()
            .zip(&self.strides)
            .map(|(&p, &s)| p as usize * s)
            .sum()
    }

    /// Contiguous `(start, len)` runs covering `region`, one per row of
    /// the last axis, in row-major order.
    fn runs(&self, region: &Region) -> Vec<(usize, usize)> {
        let rect = region.rect();
        if rect.is_empty() {
            return Vec::new();
        }
        let last = rect.ndim() - 1;
        let run = rect.size()[last] as usize;
        let mut rows_size: SmallVec<[i32; 4]> = SmallVec::from_slice(rect.size());
        rows_size[last] = 1;
        match Rect::new(rect.origin(), &rows_size) {
            Ok(rows) => rows
                .points()
                .map(|p| (self.offset_unchecked(&p), run))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn row_major_strides(size: &[i32]) -> SmallVec<[usize; 4]> {
    let mut strides: SmallVec<[usize; 4]> = SmallVec::from_elem(1, size.len());
    for d in (0..size.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * size[d + 1] as usize;
    }
    strides
}

impl<E: Element> fmt::Debug for GridStorage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridStorage")
            .field("kind", &E::KIND)
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Human-readable dump: a header line, then one line per row for 2-D
/// storages. Other dimensionalities print the header only.
impl<E: Element> fmt::Display for GridStorage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GridStorage<{}>-{}", E::KIND, self.shape)?;
        if self.shape.ndim() == 2 {
            let cols = self.shape.size()[1] as usize;
            if cols == 0 {
                return Ok(());
            }
            for row in self.data.chunks(cols) {
                for v in row {
                    write!(f, " {v:>4} ")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
