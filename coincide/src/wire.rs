//! Binary encoding of a `TimeWindowRequest`, big-endian throughout.
//!
//! Layout: target mode `u8` (0 key, 1 field/value), the target string(s),
//! `min_match` as `i32`, `time_interval` as `i64`, field count `u32` followed
//! by (name, `f32` boost) pairs, query boost `f32`, name flag `u8` plus the
//! optional name, match mode `u8`. Strings are a `u32` byte length followed
//! by UTF-8.

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::criteria::{FieldBoost, MatchCriteria, MatchMode};
use crate::interface::{CoincideError, CoincideResult, TargetIdentifier, TimeWindowRequest};

const TARGET_KEY: u8 = 0;
const TARGET_FIELD_VALUE: u8 = 1;

const MODE_PER_FIELD: u8 = 0;
const MODE_DISTINCT_FIELDS: u8 = 1;

fn write_string<W: Write>(out: &mut W, s: &str) -> CoincideResult<()> {
    let len = u32::try_from(s.len()).map_err(|_| CoincideError::config("string too long to encode"))?;
    out.write_u32::<BigEndian>(len)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(input: &mut R) -> CoincideResult<String> {
    let len = input.read_u32::<BigEndian>()? as u64;
    let mut buf = Vec::new();
    input.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "string body truncated").into());
    }
    String::from_utf8(buf).map_err(|e| CoincideError::Decode(format!("invalid UTF-8 in string: {e}")))
}

/// Write `request` to `out`.
pub fn write_request<W: Write>(out: &mut W, request: &TimeWindowRequest) -> CoincideResult<()> {
    match &request.target {
        TargetIdentifier::Key(key) => {
            out.write_u8(TARGET_KEY)?;
            write_string(out, key)?;
        }
        TargetIdentifier::FieldValue { field, value } => {
            out.write_u8(TARGET_FIELD_VALUE)?;
            write_string(out, field)?;
            write_string(out, value)?;
        }
    }

    let criteria = &request.criteria;
    let min_match = i32::try_from(criteria.min_match())
        .map_err(|_| CoincideError::config("[min_match] does not fit the wire format"))?;
    out.write_i32::<BigEndian>(min_match)?;
    out.write_i64::<BigEndian>(criteria.time_interval())?;

    let count = u32::try_from(criteria.fields().len()).map_err(|_| CoincideError::config("too many fields"))?;
    out.write_u32::<BigEndian>(count)?;
    for field in criteria.fields() {
        write_string(out, &field.name)?;
        out.write_f32::<BigEndian>(field.boost)?;
    }

    out.write_f32::<BigEndian>(request.boost)?;
    match &request.name {
        Some(name) => {
            out.write_u8(1)?;
            write_string(out, name)?;
        }
        None => out.write_u8(0)?,
    }
    out.write_u8(match criteria.mode() {
        MatchMode::PerField => MODE_PER_FIELD,
        MatchMode::DistinctFields => MODE_DISTINCT_FIELDS,
    })?;
    Ok(())
}

/// Read one request from `input`, validating it like any other entry point.
pub fn read_request<R: Read>(input: &mut R) -> CoincideResult<TimeWindowRequest> {
    let target = match input.read_u8()? {
        TARGET_KEY => TargetIdentifier::Key(read_string(input)?),
        TARGET_FIELD_VALUE => {
            let field = read_string(input)?;
            let value = read_string(input)?;
            TargetIdentifier::FieldValue { field, value }
        }
        other => return Err(CoincideError::Decode(format!("unknown target mode [{other}]"))),
    };

    let min_match = input.read_i32::<BigEndian>()?;
    let time_interval = input.read_i64::<BigEndian>()?;

    let count = input.read_u32::<BigEndian>()?;
    let mut fields = Vec::new();
    for _ in 0..count {
        let name = read_string(input)?;
        let boost = input.read_f32::<BigEndian>()?;
        fields.push(FieldBoost::new(name, boost)?);
    }

    let boost = input.read_f32::<BigEndian>()?;
    let name = match input.read_u8()? {
        0 => None,
        1 => Some(read_string(input)?),
        other => return Err(CoincideError::Decode(format!("invalid name flag [{other}]"))),
    };
    let mode = match input.read_u8()? {
        MODE_PER_FIELD => MatchMode::PerField,
        MODE_DISTINCT_FIELDS => MatchMode::DistinctFields,
        other => return Err(CoincideError::Decode(format!("unknown match mode [{other}]"))),
    };

    let criteria = MatchCriteria::with_mode(fields, i64::from(min_match), time_interval, mode)?;
    let request = TimeWindowRequest::new(target, criteria)?.with_boost(boost)?;
    Ok(match name {
        Some(name) => request.with_name(name),
        None => request,
    })
}

pub fn encode(request: &TimeWindowRequest) -> CoincideResult<Vec<u8>> {
    let mut buf = Vec::new();
    write_request(&mut buf, request)?;
    Ok(buf)
}

/// Decode exactly one request; leftover bytes are an error.
pub fn decode(bytes: &[u8]) -> CoincideResult<TimeWindowRequest> {
    let mut cursor = Cursor::new(bytes);
    let request = read_request(&mut cursor)?;
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(CoincideError::Decode(format!(
            "{} trailing bytes after request",
            bytes.len() - consumed
        )));
    }
    Ok(request)
}
