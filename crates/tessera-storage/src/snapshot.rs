//! Detached, kind-tagged storage images for external observers.

use tessera_core::{Element, ElementKind, GridError, Rect};

use crate::storage::GridStorage;

/// A deep copy of a [`GridStorage`], independent of its element type.
///
/// Observers receive snapshots over the wire without knowing the element
/// kind at compile time; [`decode`](Self::decode) recovers a typed storage
/// once the caller has checked [`kind`](Self::kind).
#[derive(Clone, Debug, PartialEq)]
pub struct StorageSnapshot {
    kind: ElementKind,
    shape: Rect,
    bytes: Vec<u8>,
}

impl StorageSnapshot {
    /// Assemble a snapshot from its parts. No validation is performed;
    /// [`decode`](Self::decode) checks consistency.
    pub fn new(kind: ElementKind, shape: Rect, bytes: Vec<u8>) -> Self {
        Self { kind, shape, bytes }
    }

    /// Element kind of the captured storage.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Shape of the captured storage.
    pub fn shape(&self) -> &Rect {
        &self.shape
    }

    /// Raw little-endian element bytes in row-major order.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of captured elements.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.width()
    }

    /// Whether the snapshot holds no elements.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Rebuild a typed storage from the snapshot.
    ///
    /// Fails with [`GridError::ElementKindMismatch`] if `E` is not the
    /// captured kind, or [`GridError::SerializationMismatch`] if the byte
    /// count does not match the shape.
    pub fn decode<E: Element>(&self) -> Result<GridStorage<E>, GridError> {
        if self.kind != E::KIND {
            return Err(GridError::ElementKindMismatch {
                expected: E::KIND,
                found: self.kind.tag(),
            });
        }
        let expected = self.shape.area() * E::WIDTH;
        if self.bytes.len() != expected {
            return Err(GridError::SerializationMismatch {
                expected,
                actual: self.bytes.len(),
            });
        }
        let mut storage = GridStorage::<E>::allocate(self.shape.size())?;
        for (slot, chunk) in storage
            .as_mut_slice()
            .iter_mut()
            .zip(self.bytes.chunks_exact(E::WIDTH))
        {
            *slot = E::decode(chunk);
        }
        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_detached() {
        let mut s = GridStorage::<f64>::allocate(&[2, 3]).unwrap();
        s.set(&[1, 2], 4.5).unwrap();
        let snap = s.to_snapshot();
        s.set(&[1, 2], -1.0).unwrap();

        assert_eq!(snap.kind(), ElementKind::F64);
        assert_eq!(snap.len(), 6);
        let restored = snap.decode::<f64>().unwrap();
        assert_eq!(restored.get(&[1, 2]).unwrap(), 4.5);
    }

    #[test]
    fn decode_rejects_wrong_kind() {
        let s = GridStorage::<i32>::allocate(&[2, 2]).unwrap();
        let snap = s.to_snapshot();
        assert!(matches!(
            snap.decode::<f64>(),
            Err(GridError::ElementKindMismatch {
                expected: ElementKind::F64,
                ..
            })
        ));
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        let snap = StorageSnapshot::new(
            ElementKind::I32,
            Rect::from_shape(&[2, 2]).unwrap(),
            vec![0u8; 12],
        );
        assert!(matches!(
            snap.decode::<i32>(),
            Err(GridError::SerializationMismatch {
                expected: 16,
                actual: 12
            })
        ));
    }
}
