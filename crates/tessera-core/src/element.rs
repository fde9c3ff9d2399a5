//! Element kinds stored in dense grids.
//!
//! The [`Element`] trait is the capability set a grid needs from its cell
//! type: a default value, a fixed-width wire encoding for pack/unpack, and
//! scalar scaling. Grids are generic over `E: Element`, so every element
//! kind gets its own monomorphized storage with no boxing on the hot path.

use std::fmt;

/// Wire tag for an element kind.
///
/// Carried in RPC values and storage snapshots so that a receiver can
/// reject a payload of the wrong kind instead of reinterpreting bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// 64-bit IEEE float.
    F64,
    /// 32-bit IEEE float.
    F32,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
}

impl ElementKind {
    /// Encoded width of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::F64 | Self::I64 => 8,
            Self::F32 | Self::I32 => 4,
        }
    }

    /// Single-byte wire tag.
    pub fn tag(self) -> u8 {
        match self {
            Self::F64 => 0,
            Self::F32 => 1,
            Self::I32 => 2,
            Self::I64 => 3,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::F64),
            1 => Some(Self::F32),
            2 => Some(Self::I32),
            3 => Some(Self::I64),
            _ => None,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F64 => write!(f, "f64"),
            Self::F32 => write!(f, "f32"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
        }
    }
}

/// Capability set for a grid cell type.
///
/// Encoding is fixed-width little-endian with no per-element framing;
/// a packed buffer of `n` elements is exactly `n * WIDTH` bytes.
pub trait Element: Copy + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Wire tag for this kind.
    const KIND: ElementKind;

    /// Encoded width in bytes. Always equals `KIND.width()`.
    const WIDTH: usize;

    /// Value a freshly allocated storage is filled with when the caller
    /// does not supply one.
    fn default_value() -> Self;

    /// Append the little-endian encoding of `self` to `out`.
    fn encode(self, out: &mut Vec<u8>);

    /// Decode one element from exactly [`WIDTH`](Self::WIDTH) bytes.
    ///
    /// Callers slice the input by `WIDTH`; shorter input is a caller bug
    /// and panics.
    fn decode(bytes: &[u8]) -> Self;

    /// Multiply by a scalar factor. Integer kinds round to nearest and
    /// saturate at the type bounds.
    fn scaled(self, factor: f64) -> Self;
}

macro_rules! impl_float_element {
    ($ty:ty, $kind:expr, $width:expr) => {
        impl Element for $ty {
            const KIND: ElementKind = $kind;
            const WIDTH: usize = $width;

            fn default_value() -> Self {
                0.0
            }

            fn encode(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(&bytes[..$width]);
                <$ty>::from_le_bytes(buf)
            }

            fn scaled(self, factor: f64) -> Self {
                (self as f64 * factor) as $ty
            }
        }
    };
}

macro_rules! impl_int_element {
    ($ty:ty, $kind:expr, $width:expr) => {
        impl Element for $ty {
            const KIND: ElementKind = $kind;
            const WIDTH: usize = $width;

            fn default_value() -> Self {
                0
            }

            fn encode(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn decode(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(&bytes[..$width]);
                <$ty>::from_le_bytes(buf)
            }

            fn scaled(self, factor: f64) -> Self {
                // Integral factors multiply exactly, even above 2^53.
                if factor.fract() == 0.0
                    && factor >= <$ty>::MIN as f64
                    && factor <= <$ty>::MAX as f64
                {
                    return self.saturating_mul(factor as $ty);
                }
                // `as` from f64 saturates and maps NaN to 0.
                (self as f64 * factor).round() as $ty
            }
        }
    };
}

impl_float_element!(f64, ElementKind::F64, 8);
impl_float_element!(f32, ElementKind::F32, 4);
impl_int_element!(i32, ElementKind::I32, 4);
impl_int_element!(i64, ElementKind::I64, 8);
