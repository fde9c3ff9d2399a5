//! Sub-rectangle descriptors for pack/unpack.

use tessera_core::{GridError, Rect};

/// A sub-rectangle of a storage, in storage-local coordinates.
///
/// A region is only meaningful relative to a storage shape; it is
/// re-validated against the target storage on every pack and unpack, so
/// one descriptor can be reused across identically shaped storages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    rect: Rect,
}

impl Region {
    /// Describe `rect` as a region of a storage with shape `shape`.
    ///
    /// Fails if `rect` is not entirely inside `shape`.
    pub fn within(rect: Rect, shape: &Rect) -> Result<Self, GridError> {
        let region = Self { rect };
        region.check_within(shape)?;
        Ok(region)
    }

    /// The covered rectangle.
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Number of elements covered.
    pub fn len(&self) -> usize {
        self.rect.area()
    }

    /// Whether the region covers no elements.
    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }

    pub(crate) fn check_within(&self, shape: &Rect) -> Result<(), GridError> {
        if self.rect.ndim() != shape.ndim() {
            return Err(GridError::DimensionMismatch {
                expected: shape.ndim(),
                found: self.rect.ndim(),
            });
        }
        if !shape.contains_rect(&self.rect) {
            return Err(GridError::InvalidRegion {
                reason: format!("region {} exceeds storage shape {}", self.rect, shape),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_accepts_contained_rect() {
        let shape = Rect::from_shape(&[4, 4]).unwrap();
        let region = Region::within(Rect::new(&[1, 1], &[2, 3]).unwrap(), &shape).unwrap();
        assert_eq!(region.len(), 6);
    }

    #[test]
    fn within_rejects_overhang() {
        let shape = Rect::from_shape(&[4, 4]).unwrap();
        let err = Region::within(Rect::new(&[3, 0], &[2, 1]).unwrap(), &shape).unwrap_err();
        assert!(matches!(err, GridError::InvalidRegion { .. }));
    }

    #[test]
    fn within_rejects_wrong_dimensionality() {
        let shape = Rect::from_shape(&[4, 4]).unwrap();
        let err = Region::within(Rect::from_shape(&[1, 1, 1]).unwrap(), &shape).unwrap_err();
        assert!(matches!(
            err,
            GridError::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));
    }
}
