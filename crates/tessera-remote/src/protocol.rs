//! Request and response messages.
//!
//! ```text
//! request  := u8 opcode, u32 target, payload
//! response := u8 status (0 = ok, 1 = error), u8 payload kind, payload
//!           | u8 status = 1, error
//! ```
//!
//! `target` is the field id for cell operations, the storage id for
//! `Snapshot`, and zero otherwise.

use tessera_core::{FieldId, GridError, Point, Rect, StorageId};
use tessera_storage::StorageSnapshot;

use crate::codec::{BodyReader, BodyWriter, WireValue};
use crate::error::CodecError;

// ── Opcodes ────────────────────────────────────────────────────────

const OP_READ_CELL: u8 = 1;
const OP_WRITE_CELL: u8 = 2;
const OP_MOVE_CELL: u8 = 3;
const OP_LOCK: u8 = 16;
const OP_UNLOCK: u8 = 17;
const OP_BOUNDS: u8 = 18;
const OP_WORLD_BOUNDS: u8 = 19;
const OP_SNAPSHOT: u8 = 20;
const OP_STEPS: u8 = 21;
const OP_TIME: u8 = 22;
const OP_PROCESSOR_COUNT: u8 = 23;
const OP_ALL_LOCAL_BOUNDS: u8 = 24;

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

const PAYLOAD_UNIT: u8 = 0;
const PAYLOAD_VALUE: u8 = 1;
const PAYLOAD_FLAG: u8 = 2;
const PAYLOAD_RECT: u8 = 3;
const PAYLOAD_RECTS: u8 = 4;
const PAYLOAD_SNAPSHOT: u8 = 5;
const PAYLOAD_U64: u8 = 6;
const PAYLOAD_F64: u8 = 7;

// ── Request ────────────────────────────────────────────────────────

/// A call from a client to a partition server.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Read one owned cell of a field.
    ReadCell {
        /// Target field.
        field: FieldId,
        /// Global point.
        point: Point,
    },
    /// Overwrite one owned cell of a field.
    WriteCell {
        /// Target field.
        field: FieldId,
        /// Global point.
        point: Point,
        /// New value.
        value: WireValue,
    },
    /// Reset `from` and write `value` at `to`.
    MoveCell {
        /// Target field.
        field: FieldId,
        /// Source point.
        from: Point,
        /// Destination point.
        to: Point,
        /// Value written at the destination.
        value: WireValue,
    },
    /// Hold the partition at its next quiescent point.
    Lock,
    /// Release a held lock.
    Unlock,
    /// Owned bounds of the serving partition.
    Bounds,
    /// Bounds of the whole world.
    WorldBounds,
    /// Deep copy of a registered storage. Requires the lock.
    Snapshot {
        /// Target storage.
        storage: StorageId,
    },
    /// Completed simulation steps.
    Steps,
    /// Current simulation time.
    Time,
    /// Number of partitions.
    ProcessorCount,
    /// Owned bounds of every partition, indexed by pid.
    AllLocalBounds,
}

impl Request {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadCell { .. } => "read_cell",
            Self::WriteCell { .. } => "write_cell",
            Self::MoveCell { .. } => "move_cell",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Bounds => "bounds",
            Self::WorldBounds => "world_bounds",
            Self::Snapshot { .. } => "snapshot",
            Self::Steps => "steps",
            Self::Time => "time",
            Self::ProcessorCount => "processor_count",
            Self::AllLocalBounds => "all_local_bounds",
        }
    }

    fn opcode(&self) -> u8 {
        match self {
            Self::ReadCell { .. } => OP_READ_CELL,
            Self::WriteCell { .. } => OP_WRITE_CELL,
            Self::MoveCell { .. } => OP_MOVE_CELL,
            Self::Lock => OP_LOCK,
            Self::Unlock => OP_UNLOCK,
            Self::Bounds => OP_BOUNDS,
            Self::WorldBounds => OP_WORLD_BOUNDS,
            Self::Snapshot { .. } => OP_SNAPSHOT,
            Self::Steps => OP_STEPS,
            Self::Time => OP_TIME,
            Self::ProcessorCount => OP_PROCESSOR_COUNT,
            Self::AllLocalBounds => OP_ALL_LOCAL_BOUNDS,
        }
    }

    fn target(&self) -> u32 {
        match self {
            Self::ReadCell { field, .. }
            | Self::WriteCell { field, .. }
            | Self::MoveCell { field, .. } => field.0,
            Self::Snapshot { storage } => storage.0,
            _ => 0,
        }
    }

    /// Serialize into a frame body.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = BodyWriter::with_capacity(32);
        w.put_u8(self.opcode());
        w.put_u32(self.target());
        match self {
            Self::ReadCell { point, .. } => w.put_point(point)?,
            Self::WriteCell { point, value, .. } => {
                w.put_point(point)?;
                w.put_value(value);
            }
            Self::MoveCell {
                from, to, value, ..
            } => {
                w.put_point(from)?;
                w.put_point(to)?;
                w.put_value(value);
            }
            _ => {}
        }
        Ok(w.finish())
    }

    /// Parse a frame body.
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        let op = r.take_u8("opcode")?;
        let target = r.take_u32("target")?;
        let req = match op {
            OP_READ_CELL => Self::ReadCell {
                field: FieldId(target),
                point: r.take_point()?,
            },
            OP_WRITE_CELL => Self::WriteCell {
                field: FieldId(target),
                point: r.take_point()?,
                value: r.take_value()?,
            },
            OP_MOVE_CELL => Self::MoveCell {
                field: FieldId(target),
                from: r.take_point()?,
                to: r.take_point()?,
                value: r.take_value()?,
            },
            OP_LOCK => Self::Lock,
            OP_UNLOCK => Self::Unlock,
            OP_BOUNDS => Self::Bounds,
            OP_WORLD_BOUNDS => Self::WorldBounds,
            OP_SNAPSHOT => Self::Snapshot {
                storage: StorageId(target),
            },
            OP_STEPS => Self::Steps,
            OP_TIME => Self::Time,
            OP_PROCESSOR_COUNT => Self::ProcessorCount,
            OP_ALL_LOCAL_BOUNDS => Self::AllLocalBounds,
            tag => return Err(CodecError::UnknownOpcode { tag }),
        };
        r.finish()?;
        Ok(req)
    }
}

// ── Response ───────────────────────────────────────────────────────

/// A server's answer to one [`Request`].
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// Success with nothing to report.
    Unit,
    /// A cell value.
    Value(WireValue),
    /// A yes/no outcome (e.g. whether `unlock` released a lock).
    Flag(bool),
    /// One rectangle.
    Rect(Rect),
    /// Rectangles indexed by pid.
    Rects(Vec<Rect>),
    /// A storage image.
    Snapshot(StorageSnapshot),
    /// A counter.
    U64(u64),
    /// A scalar.
    F64(f64),
    /// The call failed at the server.
    Error(GridError),
}

impl Response {
    /// Serialize into a frame body.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = BodyWriter::with_capacity(16);
        if let Self::Error(e) = self {
            w.put_u8(STATUS_ERR);
            w.put_error(e)?;
            return Ok(w.finish());
        }
        w.put_u8(STATUS_OK);
        match self {
            Self::Error(_) => {}
            Self::Unit => w.put_u8(PAYLOAD_UNIT),
            Self::Value(v) => {
                w.put_u8(PAYLOAD_VALUE);
                w.put_value(v);
            }
            Self::Flag(b) => {
                w.put_u8(PAYLOAD_FLAG);
                w.put_u8(u8::from(*b));
            }
            Self::Rect(rect) => {
                w.put_u8(PAYLOAD_RECT);
                w.put_rect(rect)?;
            }
            Self::Rects(rects) => {
                w.put_u8(PAYLOAD_RECTS);
                w.put_count(rects.len(), "rectangles")?;
                for rect in rects {
                    w.put_rect(rect)?;
                }
            }
            Self::Snapshot(s) => {
                w.put_u8(PAYLOAD_SNAPSHOT);
                w.put_snapshot(s)?;
            }
            Self::U64(v) => {
                w.put_u8(PAYLOAD_U64);
                w.put_u64(*v);
            }
            Self::F64(v) => {
                w.put_u8(PAYLOAD_F64);
                w.put_f64(*v);
            }
        }
        Ok(w.finish())
    }

    /// Parse a frame body.
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut r = BodyReader::new(body);
        let resp = match r.take_u8("status")? {
            STATUS_OK => match r.take_u8("payload kind")? {
                PAYLOAD_UNIT => Self::Unit,
                PAYLOAD_VALUE => Self::Value(r.take_value()?),
                PAYLOAD_FLAG => Self::Flag(r.take_u8("flag")? != 0),
                PAYLOAD_RECT => Self::Rect(r.take_rect()?),
                PAYLOAD_RECTS => {
                    let n = r.take_count("rectangle count")?;
                    let mut rects = Vec::with_capacity(n.min(r.remaining()));
                    for _ in 0..n {
                        rects.push(r.take_rect()?);
                    }
                    Self::Rects(rects)
                }
                PAYLOAD_SNAPSHOT => Self::Snapshot(r.take_snapshot()?),
                PAYLOAD_U64 => Self::U64(r.take_u64("counter")?),
                PAYLOAD_F64 => Self::F64(r.take_f64("scalar")?),
                other => {
                    return Err(CodecError::malformed(format!("unknown payload kind {other}")))
                }
            },
            STATUS_ERR => Self::Error(r.take_error()?),
            other => return Err(CodecError::malformed(format!("unknown status {other}"))),
        };
        r.finish()?;
        Ok(resp)
    }

    /// Split into the success payload or the server's error.
    pub fn into_result(self) -> Result<Self, GridError> {
        match self {
            Self::Error(e) => Err(e),
            ok => Ok(ok),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tessera_core::{ElementKind, Pid};

    fn p(c: &[i32]) -> Point {
        Point::from_slice(c)
    }

    #[test]
    fn cell_requests_survive_the_wire() {
        let reqs = vec![
            Request::ReadCell {
                field: FieldId(3),
                point: p(&[1, 2]),
            },
            Request::WriteCell {
                field: FieldId(0),
                point: p(&[9]),
                value: WireValue::from_element(2.5f32),
            },
            Request::MoveCell {
                field: FieldId(1),
                from: p(&[0, 0]),
                to: p(&[0, 1]),
                value: WireValue::from_element(4i32),
            },
        ];
        for req in reqs {
            assert_eq!(Request::decode(&req.encode().unwrap()).unwrap(), req);
        }
    }

    #[test]
    fn observer_requests_carry_no_payload() {
        for req in [
            Request::Lock,
            Request::Unlock,
            Request::Bounds,
            Request::WorldBounds,
            Request::Steps,
            Request::Time,
            Request::ProcessorCount,
            Request::AllLocalBounds,
        ] {
            let body = req.encode().unwrap();
            assert_eq!(body.len(), 5, "{}", req.name());
            assert_eq!(Request::decode(&body).unwrap(), req);
        }
        let snap = Request::Snapshot {
            storage: StorageId(6),
        };
        assert_eq!(snap.encode().unwrap(), vec![OP_SNAPSHOT, 6, 0, 0, 0]);
    }

    #[test]
    fn unknown_opcode_is_reported() {
        assert!(matches!(
            Request::decode(&[99, 0, 0, 0, 0]),
            Err(CodecError::UnknownOpcode { tag: 99 })
        ));
    }

    #[test]
    fn short_request_reports_the_truncated_field() {
        let body = [OP_READ_CELL, 3, 0, 0, 0, 2, 1, 0, 0, 0];
        assert!(matches!(
            Request::decode(&body),
            Err(CodecError::Truncated {
                what: "point coordinate",
                ..
            })
        ));
    }

    #[test]
    fn trailing_request_bytes_are_rejected() {
        assert!(Request::decode(&[OP_LOCK, 0, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn responses_survive_the_wire() {
        let shape = Rect::from_shape(&[1, 2]).unwrap();
        let resps = vec![
            Response::Unit,
            Response::Value(WireValue::from_element(1.0f64)),
            Response::Flag(false),
            Response::Rect(shape.clone()),
            Response::Rects(vec![shape.clone(), Rect::new(&[1, 0], &[1, 2]).unwrap()]),
            Response::Snapshot(StorageSnapshot::new(ElementKind::F32, shape, vec![0; 8])),
            Response::U64(17),
            Response::F64(0.25),
            Response::Error(GridError::HaloCorrupt {
                failed: vec![Pid(2)],
            }),
        ];
        for resp in resps {
            assert_eq!(Response::decode(&resp.encode().unwrap()).unwrap(), resp);
        }
    }

    #[test]
    fn error_response_becomes_err() {
        let resp = Response::Error(GridError::protocol("nope"));
        assert_eq!(resp.into_result(), Err(GridError::protocol("nope")));
        assert_eq!(Response::Unit.into_result(), Ok(Response::Unit));
    }

    fn arb_point() -> impl Strategy<Value = Point> {
        prop::collection::vec(any::<i32>(), 1..=4).prop_map(|c| Point::from_slice(&c))
    }

    fn arb_value() -> impl Strategy<Value = WireValue> {
        prop_oneof![
            any::<i32>().prop_map(WireValue::from_element),
            any::<i64>().prop_map(WireValue::from_element),
            any::<f32>().prop_map(WireValue::from_element),
            any::<f64>().prop_map(WireValue::from_element),
        ]
    }

    fn arb_rect() -> impl Strategy<Value = Rect> {
        prop::collection::vec((-1000i32..1000, 1i32..1000), 1..=4).prop_map(|dims| {
            let (origin, size): (Vec<i32>, Vec<i32>) = dims.into_iter().unzip();
            Rect::new(&origin, &size).unwrap()
        })
    }

    fn arb_request() -> impl Strategy<Value = Request> {
        prop_oneof![
            (any::<u32>(), arb_point()).prop_map(|(f, point)| Request::ReadCell {
                field: FieldId(f),
                point,
            }),
            (any::<u32>(), arb_point(), arb_value()).prop_map(|(f, point, value)| {
                Request::WriteCell {
                    field: FieldId(f),
                    point,
                    value,
                }
            }),
            (any::<u32>(), arb_point(), arb_point(), arb_value()).prop_map(
                |(f, from, to, value)| Request::MoveCell {
                    field: FieldId(f),
                    from,
                    to,
                    value,
                }
            ),
            any::<u32>().prop_map(|s| Request::Snapshot {
                storage: StorageId(s),
            }),
            Just(Request::Lock),
            Just(Request::Unlock),
            Just(Request::AllLocalBounds),
        ]
    }

    fn arb_response() -> impl Strategy<Value = Response> {
        prop_oneof![
            Just(Response::Unit),
            arb_value().prop_map(Response::Value),
            any::<bool>().prop_map(Response::Flag),
            arb_rect().prop_map(Response::Rect),
            prop::collection::vec(arb_rect(), 0..6).prop_map(Response::Rects),
            any::<u64>().prop_map(Response::U64),
            (-1e12f64..1e12).prop_map(Response::F64),
            (any::<Option<u32>>(), ".{0,40}").prop_map(|(pid, detail)| {
                Response::Error(GridError::Communication {
                    pid: pid.map(Pid),
                    detail,
                })
            }),
        ]
    }

    proptest! {
        #[test]
        fn any_request_survives_the_wire(req in arb_request()) {
            let body = req.encode().unwrap();
            prop_assert_eq!(Request::decode(&body).unwrap(), req);
        }

        #[test]
        fn any_response_survives_the_wire(resp in arb_response()) {
            let body = resp.encode().unwrap();
            prop_assert_eq!(Response::decode(&body).unwrap(), resp);
        }

        #[test]
        fn truncated_responses_are_rejected(
            resp in arb_response(),
            cut in any::<prop::sample::Index>(),
        ) {
            let body = resp.encode().unwrap();
            let cut = cut.index(body.len());
            prop_assert!(Response::decode(&body[..cut]).is_err());
        }
    }
}
