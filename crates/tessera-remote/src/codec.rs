//! Binary encode/decode for the remote access protocol.
//!
//! All integers are little-endian. Strings and byte arrays are
//! length-prefixed with a `u32` length. Every message travels in a frame:
//! a `u32` body length followed by the body. Only the frame functions
//! touch a stream; bodies are assembled by a [`BodyWriter`] and taken
//! apart by a [`BodyReader`], so a malformed body never leaves a stream
//! half-read.

use std::io::{Read, Write};

use smallvec::SmallVec;
use tessera_core::{Element, ElementKind, FieldId, GridError, Pid, Point, Rect, StorageId};
use tessera_storage::StorageSnapshot;

use crate::error::CodecError;

// ── Frames ─────────────────────────────────────────────────────────

const FRAME_HEADER: usize = 4;

/// Write one frame: `u32` body length, then the body.
pub fn write_frame(w: &mut impl Write, body: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(body)?;
    w.flush()?;
    Ok(())
}

/// Read one frame body, refusing bodies longer than `max_len`.
///
/// A clean end of stream before the length prefix is reported as
/// [`CodecError::Io`] with kind `UnexpectedEof`.
pub fn read_frame(r: &mut impl Read, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let mut header = [0u8; FRAME_HEADER];
    r.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(CodecError::FrameTooLarge { len, max: max_len });
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Ok(body)
}

// ── Body assembly ──────────────────────────────────────────────────

/// Builds one frame body in memory.
#[derive(Debug, Default)]
pub struct BodyWriter {
    buf: Vec<u8>,
}

/// Cursor over one received frame body.
///
/// Every `take_*` names the field it reads, so a short body reports
/// which field ran out.
#[derive(Debug)]
pub struct BodyReader<'a> {
    rest: &'a [u8],
}

macro_rules! le_scalars {
    ($($put:ident / $take:ident : $ty:ty),* $(,)?) => {
        impl BodyWriter {
            $(
                #[doc = concat!("Append a little-endian `", stringify!($ty), "`.")]
                pub fn $put(&mut self, v: $ty) {
                    self.buf.extend_from_slice(&v.to_le_bytes());
                }
            )*
        }

        impl BodyReader<'_> {
            $(
                #[doc = concat!("Take a little-endian `", stringify!($ty), "`.")]
                pub fn $take(&mut self, what: &'static str) -> Result<$ty, CodecError> {
                    Ok(<$ty>::from_le_bytes(self.take(what)?))
                }
            )*
        }
    };
}

le_scalars! {
    put_u8 / take_u8: u8,
    put_u32 / take_u32: u32,
    put_u64 / take_u64: u64,
    put_i32 / take_i32: i32,
    put_f64 / take_f64: f64,
}

impl BodyWriter {
    /// An empty body with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// The assembled body.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Append a `u32` count of `what`.
    pub fn put_count(&mut self, n: usize, what: &'static str) -> Result<(), CodecError> {
        let n = u32::try_from(n)
            .map_err(|_| CodecError::malformed(format!("{n} {what} exceed a u32 count")))?;
        self.put_u32(n);
        Ok(())
    }

    /// Append a `u32` length, then the bytes.
    pub fn put_bytes(&mut self, b: &[u8]) -> Result<(), CodecError> {
        self.put_count(b.len(), "bytes")?;
        self.buf.extend_from_slice(b);
        Ok(())
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, s: &str) -> Result<(), CodecError> {
        self.put_bytes(s.as_bytes())
    }

    fn put_ndim(&mut self, ndim: usize) -> Result<(), CodecError> {
        let n = u8::try_from(ndim)
            .map_err(|_| CodecError::malformed(format!("{ndim} dimensions exceed u8")))?;
        self.put_u8(n);
        Ok(())
    }

    /// Append a point: `u8` ndim, then ndim × `i32`.
    pub fn put_point(&mut self, p: &[i32]) -> Result<(), CodecError> {
        self.put_ndim(p.len())?;
        p.iter().for_each(|&c| self.put_i32(c));
        Ok(())
    }

    /// Append a rectangle: `u8` ndim, ndim × `i32` origin, ndim × `i32`
    /// extent.
    pub fn put_rect(&mut self, rect: &Rect) -> Result<(), CodecError> {
        self.put_ndim(rect.ndim())?;
        rect.origin().iter().for_each(|&o| self.put_i32(o));
        rect.size().iter().for_each(|&s| self.put_i32(s));
        Ok(())
    }

    /// Append a value: `u8` element kind, then `WIDTH` bytes.
    pub fn put_value(&mut self, v: &WireValue) {
        self.put_u8(v.kind.tag());
        self.buf.extend_from_slice(&v.bytes);
    }

    /// Append a snapshot: `u8` kind, rect, `u32` byte length, bytes.
    pub fn put_snapshot(&mut self, s: &StorageSnapshot) -> Result<(), CodecError> {
        self.put_u8(s.kind().tag());
        self.put_rect(s.shape())?;
        self.put_bytes(s.bytes())
    }
}

impl<'a> BodyReader<'a> {
    /// Start reading `body` from its first byte.
    pub fn new(body: &'a [u8]) -> Self {
        Self { rest: body }
    }

    /// Bytes not yet taken.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    /// Fail if the body has bytes left over.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(CodecError::malformed(format!(
                "{} trailing bytes after message",
                self.rest.len()
            )))
        }
    }

    fn take_slice(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.rest.len() < n {
            return Err(CodecError::Truncated {
                what,
                needed: n,
                remaining: self.rest.len(),
            });
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn take<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take_slice(N, what)?);
        Ok(out)
    }

    /// Take a `u32` count.
    pub fn take_count(&mut self, what: &'static str) -> Result<usize, CodecError> {
        Ok(self.take_u32(what)? as usize)
    }

    /// Take a length-prefixed byte array.
    pub fn take_bytes(&mut self, what: &'static str) -> Result<Vec<u8>, CodecError> {
        let len = self.take_count(what)?;
        Ok(self.take_slice(len, what)?.to_vec())
    }

    /// Take a length-prefixed UTF-8 string.
    pub fn take_string(&mut self, what: &'static str) -> Result<String, CodecError> {
        String::from_utf8(self.take_bytes(what)?)
            .map_err(|e| CodecError::malformed(format!("{what} is not UTF-8: {e}")))
    }

    fn take_coords(&mut self, ndim: usize, what: &'static str) -> Result<Point, CodecError> {
        (0..ndim).map(|_| self.take_i32(what)).collect()
    }

    /// Take a point.
    pub fn take_point(&mut self) -> Result<Point, CodecError> {
        let ndim = self.take_u8("point ndim")? as usize;
        self.take_coords(ndim, "point coordinate")
    }

    /// Take a rectangle, rejecting negative extents.
    pub fn take_rect(&mut self) -> Result<Rect, CodecError> {
        let ndim = self.take_u8("rect ndim")? as usize;
        let origin = self.take_coords(ndim, "rect origin")?;
        let size = self.take_coords(ndim, "rect extent")?;
        Rect::new(&origin, &size).map_err(|e| CodecError::malformed(format!("bad rect: {e}")))
    }

    fn take_kind(&mut self) -> Result<ElementKind, CodecError> {
        let tag = self.take_u8("element kind")?;
        ElementKind::from_tag(tag)
            .ok_or_else(|| CodecError::malformed(format!("unknown element kind {tag}")))
    }

    /// Take a value.
    pub fn take_value(&mut self) -> Result<WireValue, CodecError> {
        let kind = self.take_kind()?;
        let bytes = self.take_slice(kind.width(), "value")?;
        Ok(WireValue {
            kind,
            bytes: SmallVec::from_slice(bytes),
        })
    }

    /// Take a snapshot, checking the byte count against the shape.
    pub fn take_snapshot(&mut self) -> Result<StorageSnapshot, CodecError> {
        let kind = self.take_kind()?;
        let shape = self.take_rect()?;
        let bytes = self.take_bytes("snapshot bytes")?;
        if bytes.len() != shape.area() * kind.width() {
            return Err(CodecError::malformed(format!(
                "snapshot of {shape} {kind} carries {} bytes",
                bytes.len()
            )));
        }
        Ok(StorageSnapshot::new(kind, shape, bytes))
    }
}

// ── Values ─────────────────────────────────────────────────────────

/// A cell value whose element kind is only known at run time.
#[derive(Clone, Debug, PartialEq)]
pub struct WireValue {
    kind: ElementKind,
    bytes: SmallVec<[u8; 8]>,
}

impl WireValue {
    /// Encode a typed value.
    pub fn from_element<E: Element>(value: E) -> Self {
        let mut buf = Vec::with_capacity(E::WIDTH);
        value.encode(&mut buf);
        Self {
            kind: E::KIND,
            bytes: SmallVec::from_vec(buf),
        }
    }

    /// The carried element kind.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Decode as `E`, failing if the kinds differ.
    pub fn to_element<E: Element>(&self) -> Result<E, GridError> {
        if self.kind != E::KIND {
            return Err(GridError::ElementKindMismatch {
                expected: E::KIND,
                found: self.kind.tag(),
            });
        }
        Ok(E::decode(&self.bytes))
    }
}

// ── Errors ─────────────────────────────────────────────────────────

const ERR_OUT_OF_BOUNDS: u8 = 0;
const ERR_NO_OWNER: u8 = 1;
const ERR_DIMENSION_MISMATCH: u8 = 2;
const ERR_INVALID_REGION: u8 = 3;
const ERR_SERIALIZATION_MISMATCH: u8 = 4;
const ERR_ELEMENT_KIND_MISMATCH: u8 = 5;
const ERR_COMMUNICATION: u8 = 6;
const ERR_HALO_CORRUPT: u8 = 7;
const ERR_PROTOCOL_VIOLATION: u8 = 8;
const ERR_UNKNOWN_FIELD: u8 = 9;
const ERR_UNKNOWN_STORAGE: u8 = 10;

impl BodyWriter {
    /// Append a [`GridError`]: `u8` error kind, then the variant's fields.
    pub fn put_error(&mut self, e: &GridError) -> Result<(), CodecError> {
        match e {
            GridError::OutOfBounds { point, bounds } => {
                self.put_u8(ERR_OUT_OF_BOUNDS);
                self.put_point(point)?;
                self.put_str(bounds)
            }
            GridError::NoOwner { point } => {
                self.put_u8(ERR_NO_OWNER);
                self.put_point(point)
            }
            GridError::DimensionMismatch { expected, found } => {
                self.put_u8(ERR_DIMENSION_MISMATCH);
                self.put_count(*expected, "dimensions")?;
                self.put_count(*found, "dimensions")
            }
            GridError::InvalidRegion { reason } => {
                self.put_u8(ERR_INVALID_REGION);
                self.put_str(reason)
            }
            GridError::SerializationMismatch { expected, actual } => {
                self.put_u8(ERR_SERIALIZATION_MISMATCH);
                self.put_count(*expected, "bytes")?;
                self.put_count(*actual, "bytes")
            }
            GridError::ElementKindMismatch { expected, found } => {
                self.put_u8(ERR_ELEMENT_KIND_MISMATCH);
                self.put_u8(expected.tag());
                self.put_u8(*found);
                Ok(())
            }
            GridError::Communication { pid, detail } => {
                self.put_u8(ERR_COMMUNICATION);
                match pid {
                    Some(p) => {
                        self.put_u8(1);
                        self.put_u32(p.0);
                    }
                    None => self.put_u8(0),
                }
                self.put_str(detail)
            }
            GridError::HaloCorrupt { failed } => {
                self.put_u8(ERR_HALO_CORRUPT);
                self.put_count(failed.len(), "failed peers")?;
                failed.iter().for_each(|p| self.put_u32(p.0));
                Ok(())
            }
            GridError::ProtocolViolation { detail } => {
                self.put_u8(ERR_PROTOCOL_VIOLATION);
                self.put_str(detail)
            }
            GridError::UnknownField { field } => {
                self.put_u8(ERR_UNKNOWN_FIELD);
                self.put_u32(field.0);
                Ok(())
            }
            GridError::UnknownStorage { storage } => {
                self.put_u8(ERR_UNKNOWN_STORAGE);
                self.put_u32(storage.0);
                Ok(())
            }
        }
    }
}

impl BodyReader<'_> {
    /// Take a [`GridError`].
    pub fn take_error(&mut self) -> Result<GridError, CodecError> {
        Ok(match self.take_u8("error kind")? {
            ERR_OUT_OF_BOUNDS => GridError::OutOfBounds {
                point: self.take_point()?,
                bounds: self.take_string("bounds")?,
            },
            ERR_NO_OWNER => GridError::NoOwner {
                point: self.take_point()?,
            },
            ERR_DIMENSION_MISMATCH => GridError::DimensionMismatch {
                expected: self.take_count("expected dimensions")?,
                found: self.take_count("found dimensions")?,
            },
            ERR_INVALID_REGION => GridError::InvalidRegion {
                reason: self.take_string("reason")?,
            },
            ERR_SERIALIZATION_MISMATCH => GridError::SerializationMismatch {
                expected: self.take_count("expected bytes")?,
                actual: self.take_count("actual bytes")?,
            },
            ERR_ELEMENT_KIND_MISMATCH => GridError::ElementKindMismatch {
                expected: self.take_kind()?,
                found: self.take_u8("found kind")?,
            },
            ERR_COMMUNICATION => {
                let pid = match self.take_u8("pid flag")? {
                    0 => None,
                    _ => Some(Pid(self.take_u32("pid")?)),
                };
                GridError::Communication {
                    pid,
                    detail: self.take_string("detail")?,
                }
            }
            ERR_HALO_CORRUPT => {
                let n = self.take_count("failed peer count")?;
                // Each pid needs four bytes; cap the allocation by what is left.
                let mut failed = Vec::with_capacity(n.min(self.remaining() / 4));
                for _ in 0..n {
                    failed.push(Pid(self.take_u32("failed pid")?));
                }
                GridError::HaloCorrupt { failed }
            }
            ERR_PROTOCOL_VIOLATION => GridError::ProtocolViolation {
                detail: self.take_string("detail")?,
            },
            ERR_UNKNOWN_FIELD => GridError::UnknownField {
                field: FieldId(self.take_u32("field id")?),
            },
            ERR_UNKNOWN_STORAGE => GridError::UnknownStorage {
                storage: StorageId(self.take_u32("storage id")?),
            },
            other => return Err(CodecError::malformed(format!("unknown error kind {other}"))),
        })
    }
}
