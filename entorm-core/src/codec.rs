//! Tagged, length-prefixed binary codec for entity values (spec §4.2).
//!
//! Each column is emitted as `(tag, wire_value)` with `tag = (column_id << 3) | wire_kind`,
//! mirroring the protobuf wire format closely enough to reuse its varint/zigzag machinery, but
//! scoped to exactly the wire kinds the spec names.

use std::collections::HashMap;

use crate::error::Error;
use crate::value::{ScalarKind, Value};

/// The shape `decode` needs for one column: its id, and whether it's a scalar leaf or a nested
/// message with its own field list. A thin, codec-local mirror of `entorm-schema::Column` — this
/// crate is the workspace's leaf and does not depend on the schema crate; `entorm-schema`
/// converts its richer `Column` into this shape when it needs to decode.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub id: u32,
    pub shape: FieldShape,
}

#[derive(Debug, Clone)]
pub enum FieldShape {
    Scalar(ScalarKind),
    Nested(Vec<FieldSchema>),
}

impl FieldSchema {
    pub fn scalar(id: u32, kind: ScalarKind) -> Self { FieldSchema { id, shape: FieldShape::Scalar(kind) } }
    pub fn nested(id: u32, fields: Vec<FieldSchema>) -> Self { FieldSchema { id, shape: FieldShape::Nested(fields) } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum WireKind {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
}

impl WireKind {
    fn from_u8(b: u8) -> Result<Self, Error> {
        match b {
            0 => Ok(WireKind::Varint),
            1 => Ok(WireKind::Fixed64),
            2 => Ok(WireKind::LengthDelimited),
            other => Err(Error::Runtime(format!("unknown wire kind {other}"))),
        }
    }
}

fn tag(column_id: u32, kind: WireKind) -> u64 { ((column_id as u64) << 3) | (kind as u64) }

fn encode_varint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn decode_varint(buf: &[u8]) -> Result<(u64, usize), Error> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::Runtime("varint too long".into()));
        }
    }
    Err(Error::Runtime("truncated varint".into()))
}

fn zigzag_encode(v: i64) -> u64 { ((v << 1) ^ (v >> 63)) as u64 }
fn zigzag_decode(v: u64) -> i64 { ((v >> 1) as i64) ^ -((v & 1) as i64) }

/// Wrap a raw byte string in the single-field (`id = 1`, length-delimited) inner submessage
/// string/byte-array columns are sent through on the wire (verified against the S2 seed vector:
/// `name = "testing"` round-trips as `0a 09 [0a 07 "testing"]`, not a bare length-delimited run).
fn wrap_bytes(raw: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(raw.len() + 2);
    encode_varint(tag(1, WireKind::LengthDelimited), &mut inner);
    encode_varint(raw.len() as u64, &mut inner);
    inner.extend_from_slice(raw);
    inner
}

fn unwrap_bytes(buf: &[u8]) -> Result<Vec<u8>, Error> {
    let mut pos = 0;
    let (inner_tag, n) = decode_varint(&buf[pos..])?;
    pos += n;
    let inner_column = (inner_tag >> 3) as u32;
    let inner_kind = WireKind::from_u8((inner_tag & 0x7) as u8)?;
    if inner_column != 1 || inner_kind != WireKind::LengthDelimited {
        return Err(Error::Runtime("malformed string/bytes wrapper submessage".into()));
    }
    let (len, n) = decode_varint(&buf[pos..])?;
    pos += n;
    let len = len as usize;
    if pos + len != buf.len() {
        return Err(Error::Runtime("string/bytes wrapper length mismatch".into()));
    }
    Ok(buf[pos..pos + len].to_vec())
}

fn encode_field(out: &mut Vec<u8>, column_id: u32, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            encode_varint(tag(column_id, WireKind::Varint), out);
            encode_varint(if *b { 1 } else { 0 }, out);
        }
        Value::I8(i) => encode_varint_field(out, column_id, zigzag_encode(*i as i64)),
        Value::I16(i) => encode_varint_field(out, column_id, zigzag_encode(*i as i64)),
        Value::I32(i) => encode_varint_field(out, column_id, zigzag_encode(*i as i64)),
        Value::I64(i) => encode_varint_field(out, column_id, zigzag_encode(*i)),
        Value::EnumOrdinal(i) => encode_varint_field(out, column_id, *i as u64),
        Value::Char(c) => encode_varint_field(out, column_id, *c as u64),
        Value::F32(f) => encode_fixed64_field(out, column_id, (f.to_bits() as u64)),
        Value::F64(f) => encode_fixed64_field(out, column_id, f.to_bits()),
        Value::Timestamp(ms) => encode_fixed64_field(out, column_id, *ms as u64),
        Value::String(s) => encode_length_delimited_field(out, column_id, &wrap_bytes(s.as_bytes())),
        Value::Bytes(b) => encode_length_delimited_field(out, column_id, &wrap_bytes(b)),
        Value::Nested(fields) => {
            let mut inner = Vec::new();
            for (id, v) in fields {
                encode_field(&mut inner, *id, v);
            }
            encode_length_delimited_field(out, column_id, &inner);
        }
        Value::Repeated(items) => {
            for item in items {
                encode_field(out, column_id, item);
            }
        }
    }
}

fn encode_varint_field(out: &mut Vec<u8>, column_id: u32, v: u64) {
    encode_varint(tag(column_id, WireKind::Varint), out);
    encode_varint(v, out);
}

fn encode_fixed64_field(out: &mut Vec<u8>, column_id: u32, bits: u64) {
    encode_varint(tag(column_id, WireKind::Fixed64), out);
    out.extend_from_slice(&bits.to_le_bytes());
}

fn encode_length_delimited_field(out: &mut Vec<u8>, column_id: u32, payload: &[u8]) {
    encode_varint(tag(column_id, WireKind::LengthDelimited), out);
    encode_varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

/// Encode a column-id-tagged value tree. Fields are expected to already be in strictly
/// ascending column-id order (callers build the tree from a `Relation`'s declared column order).
pub fn encode(fields: &[(u32, Value)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, value) in fields {
        encode_field(&mut out, *id, value);
    }
    out
}

/// Prefix the encoded message with its length as a varint, so a single message can be read off
/// a stream without over-consuming trailing bytes.
pub fn encode_with_size(fields: &[(u32, Value)]) -> Vec<u8> {
    let body = encode(fields);
    let mut out = Vec::with_capacity(body.len() + 5);
    encode_varint(body.len() as u64, &mut out);
    out.extend_from_slice(&body);
    out
}

/// The exact wire size `encode(fields)` would produce, without allocating the buffer.
pub fn sizeof(fields: &[(u32, Value)]) -> usize { encode(fields).len() }

fn skip_field(wire_kind: WireKind, buf: &[u8]) -> Result<usize, Error> {
    match wire_kind {
        WireKind::Varint => {
            let (_, n) = decode_varint(buf)?;
            Ok(n)
        }
        WireKind::Fixed64 => {
            if buf.len() < 8 {
                return Err(Error::Runtime("truncated fixed64".into()));
            }
            Ok(8)
        }
        WireKind::LengthDelimited => {
            let (len, n) = decode_varint(buf)?;
            let len = len as usize;
            if buf.len() < n + len {
                return Err(Error::Runtime("truncated length-delimited field".into()));
            }
            Ok(n + len)
        }
    }
}

fn decode_scalar(kind: ScalarKind, wire_kind: WireKind, buf: &[u8]) -> Result<(Value, usize), Error> {
    match (kind, wire_kind) {
        (ScalarKind::Bool, WireKind::Varint) => {
            let (v, n) = decode_varint(buf)?;
            Ok((Value::Bool(v != 0), n))
        }
        (ScalarKind::I8, WireKind::Varint) => {
            let (v, n) = decode_varint(buf)?;
            Ok((Value::I8(zigzag_decode(v) as i8), n))
        }
        (ScalarKind::I16, WireKind::Varint) => {
            let (v, n) = decode_varint(buf)?;
            Ok((Value::I16(zigzag_decode(v) as i16), n))
        }
        (ScalarKind::I32, WireKind::Varint) => {
            let (v, n) = decode_varint(buf)?;
            Ok((Value::I32(zigzag_decode(v) as i32), n))
        }
        (ScalarKind::I64, WireKind::Varint) => {
            let (v, n) = decode_varint(buf)?;
            Ok((Value::I64(zigzag_decode(v)), n))
        }
        (ScalarKind::EnumOrdinal, WireKind::Varint) => {
            let (v, n) = decode_varint(buf)?;
            Ok((Value::EnumOrdinal(v as i64), n))
        }
        (ScalarKind::Char, WireKind::Varint) => {
            let (v, n) = decode_varint(buf)?;
            let c = char::from_u32(v as u32).ok_or_else(|| Error::Runtime("invalid char codepoint".into()))?;
            Ok((Value::Char(c), n))
        }
        (ScalarKind::F32, WireKind::Fixed64) => {
            let bits = u64::from_le_bytes(buf[..8].try_into().unwrap());
            Ok((Value::F32(f32::from_bits(bits as u32)), 8))
        }
        (ScalarKind::F64, WireKind::Fixed64) => {
            let bits = u64::from_le_bytes(buf[..8].try_into().unwrap());
            Ok((Value::F64(f64::from_bits(bits)), 8))
        }
        (ScalarKind::Timestamp, WireKind::Fixed64) => {
            let bits = u64::from_le_bytes(buf[..8].try_into().unwrap());
            Ok((Value::Timestamp(bits as i64), 8))
        }
        (ScalarKind::String, WireKind::LengthDelimited) => {
            let (len, n) = decode_varint(buf)?;
            let len = len as usize;
            let payload = &buf[n..n + len];
            let raw = unwrap_bytes(payload)?;
            let s = String::from_utf8(raw).map_err(|e| Error::Runtime(format!("invalid utf-8: {e}")))?;
            Ok((Value::String(s), n + len))
        }
        (ScalarKind::Bytes, WireKind::LengthDelimited) => {
            let (len, n) = decode_varint(buf)?;
            let len = len as usize;
            let payload = &buf[n..n + len];
            let raw = unwrap_bytes(payload)?;
            Ok((Value::Bytes(raw), n + len))
        }
        (kind, wire) => Err(Error::Runtime(format!("column kind {kind:?} incompatible with wire kind {wire:?}"))),
    }
}

/// Decode a column-id-tagged value tree against `schema` (the field list at this nesting level:
/// a relation's top-level columns, or a nested column's field list, both converted to
/// [`FieldSchema`]).
///
/// Unknown tags are skipped. A column repeated more than once on the wire is folded into a
/// [`Value::Repeated`]. Absent columns are simply missing from the returned vector; callers
/// apply column defaults/nullability.
pub fn decode(bytes: &[u8], schema: &[FieldSchema]) -> Result<Vec<(u32, Value)>, Error> {
    let mut pos = 0usize;
    let mut ordered_ids: Vec<u32> = Vec::new();
    let mut values: HashMap<u32, Value> = HashMap::new();

    while pos < bytes.len() {
        let (raw_tag, n) = decode_varint(&bytes[pos..])?;
        pos += n;
        let column_id = (raw_tag >> 3) as u32;
        let wire_kind = WireKind::from_u8((raw_tag & 0x7) as u8)?;

        let field = schema.iter().find(|f| f.id == column_id);
        let Some(field) = field else {
            pos += skip_field(wire_kind, &bytes[pos..])?;
            continue;
        };

        let (value, consumed) = match &field.shape {
            FieldShape::Scalar(kind) => decode_scalar(*kind, wire_kind, &bytes[pos..])?,
            FieldShape::Nested(fields) => {
                if wire_kind != WireKind::LengthDelimited {
                    return Err(Error::Runtime(format!("nested column {column_id} has non-length-delimited wire kind")));
                }
                let (len, n) = decode_varint(&bytes[pos..])?;
                let len = len as usize;
                let inner_bytes = &bytes[pos + n..pos + n + len];
                let inner = decode(inner_bytes, fields)?;
                (Value::Nested(inner), n + len)
            }
        };
        pos += consumed;

        match values.remove(&column_id) {
            None => {
                ordered_ids.push(column_id);
                values.insert(column_id, value);
            }
            Some(Value::Repeated(mut items)) => {
                items.push(value);
                values.insert(column_id, Value::Repeated(items));
            }
            Some(prior) => {
                values.insert(column_id, Value::Repeated(vec![prior, value]));
            }
        }
    }

    Ok(ordered_ids.into_iter().map(|id| (id, values.remove(&id).unwrap())).collect())
}

/// Decode exactly one `encodeWithSize`-framed message from the front of `bytes`, returning the
/// decoded fields and the number of bytes consumed (so trailing bytes in the stream are left
/// untouched).
pub fn decode_with_size(bytes: &[u8], schema: &[FieldSchema]) -> Result<(Vec<(u32, Value)>, usize), Error> {
    let (len, n) = decode_varint(bytes)?;
    let len = len as usize;
    if bytes.len() < n + len {
        return Err(Error::Runtime("truncated framed message".into()));
    }
    let fields = decode(&bytes[n..n + len], schema)?;
    Ok((fields, n + len))
}
