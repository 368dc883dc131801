// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Data-section decoding. Values are type-tagged with a control byte
//! (three type bits, five size bits), sizes 29..=31 spill into trailing
//! bytes, and pointers splice previously written values into maps and
//! arrays. Offsets are relative to the start of the section.

use crate::error::MmdbError;
use crate::path::{PathSegment, render_path};
use crate::value::Value;

const TYPE_EXTENDED: u8 = 0;
const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Pointers must not chain; a small bound catches corrupt files without
/// recursing forever.
const MAX_POINTER_HOPS: usize = 16;

enum Ctrl {
    /// A pointer entry: the target offset it resolves to and the offset of
    /// whatever follows the pointer bytes in the enclosing container.
    Pointer { target: usize, next: usize },
    /// An immediate entry: type code, size field, and payload offset.
    Data { ty: u8, size: usize, payload: usize },
}

/// Decoder over one data section.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn byte(&self, offset: usize) -> Result<u8, MmdbError> {
        self.data
            .get(offset)
            .copied()
            .ok_or(MmdbError::Truncated(offset))
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], MmdbError> {
        self.data
            .get(offset..offset + len)
            .ok_or(MmdbError::Truncated(offset))
    }

    fn control(&self, offset: usize) -> Result<Ctrl, MmdbError> {
        let ctrl = self.byte(offset)?;
        let mut ty = ctrl >> 5;
        let size_bits = usize::from(ctrl & 0x1f);
        let mut cursor = offset + 1;

        if ty == TYPE_POINTER {
            let ss = (ctrl >> 3) & 0x3;
            let low = usize::from(ctrl & 0x7);
            let (target, width) = match ss {
                0 => ((low << 8) | usize::from(self.byte(cursor)?), 1),
                1 => {
                    let raw = self.bytes(cursor, 2)?;
                    (
                        (low << 16) | (usize::from(raw[0]) << 8) | usize::from(raw[1]),
                        2,
                    )
                }
                2 => {
                    let raw = self.bytes(cursor, 3)?;
                    (
                        (low << 24)
                            | (usize::from(raw[0]) << 16)
                            | (usize::from(raw[1]) << 8)
                            | usize::from(raw[2]),
                        3,
                    )
                }
                _ => {
                    let raw = self.bytes(cursor, 4)?;
                    (
                        (usize::from(raw[0]) << 24)
                            | (usize::from(raw[1]) << 16)
                            | (usize::from(raw[2]) << 8)
                            | usize::from(raw[3]),
                        4,
                    )
                }
            };
            let bias = match ss {
                0 => 0,
                1 => 2048,
                2 => 526_336,
                _ => 0,
            };
            return Ok(Ctrl::Pointer {
                target: target + bias,
                next: cursor + width,
            });
        }

        if ty == TYPE_EXTENDED {
            ty = 7u8
                .checked_add(self.byte(cursor)?)
                .ok_or_else(|| MmdbError::Malformed("extended type overflow".to_string()))?;
            cursor += 1;
        }

        let size = match size_bits {
            0..=28 => size_bits,
            29 => {
                let s = 29 + usize::from(self.byte(cursor)?);
                cursor += 1;
                s
            }
            30 => {
                let raw = self.bytes(cursor, 2)?;
                cursor += 2;
                285 + ((usize::from(raw[0]) << 8) | usize::from(raw[1]))
            }
            _ => {
                let raw = self.bytes(cursor, 3)?;
                cursor += 3;
                65_821
                    + ((usize::from(raw[0]) << 16)
                        | (usize::from(raw[1]) << 8)
                        | usize::from(raw[2]))
            }
        };

        Ok(Ctrl::Data {
            ty,
            size,
            payload: cursor,
        })
    }

    /// Resolve a (possibly pointer) entry down to its immediate control.
    fn control_resolved(&self, offset: usize) -> Result<(u8, usize, usize), MmdbError> {
        let mut at = offset;
        for _ in 0..MAX_POINTER_HOPS {
            match self.control(at)? {
                Ctrl::Pointer { target, .. } => at = target,
                Ctrl::Data { ty, size, payload } => return Ok((ty, size, payload)),
            }
        }
        Err(MmdbError::PointerChain(offset))
    }

    /// Decode the full value rooted at `offset`.
    pub fn decode(&self, offset: usize) -> Result<Value, MmdbError> {
        self.decode_one(offset, 0).map(|(value, _)| value)
    }

    fn decode_one(&self, offset: usize, hops: usize) -> Result<(Value, usize), MmdbError> {
        if hops > MAX_POINTER_HOPS {
            return Err(MmdbError::PointerChain(offset));
        }
        match self.control(offset)? {
            Ctrl::Pointer { target, next } => {
                let (value, _) = self.decode_one(target, hops + 1)?;
                Ok((value, next))
            }
            Ctrl::Data { ty, size, payload } => self.decode_data(ty, size, payload, hops),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn decode_data(
        &self,
        ty: u8,
        size: usize,
        payload: usize,
        hops: usize,
    ) -> Result<(Value, usize), MmdbError> {
        match ty {
            TYPE_STRING => {
                let raw = self.bytes(payload, size)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| MmdbError::Malformed(format!("bad utf-8 string: {e}")))?;
                Ok((Value::String(s.to_string()), payload + size))
            }
            TYPE_DOUBLE => {
                if size != 8 {
                    return Err(MmdbError::Malformed(format!("double of size {size}")));
                }
                let raw = self.bytes(payload, 8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Ok((Value::Double(f64::from_be_bytes(buf)), payload + 8))
            }
            TYPE_BYTES => {
                let raw = self.bytes(payload, size)?;
                Ok((Value::Bytes(raw.to_vec()), payload + size))
            }
            TYPE_UINT16 => {
                if size > 2 {
                    return Err(MmdbError::Malformed(format!("uint16 of size {size}")));
                }
                let v = self.unsigned(payload, size)?;
                #[allow(clippy::cast_possible_truncation)]
                Ok((Value::Uint16(v as u16), payload + size))
            }
            TYPE_UINT32 => {
                if size > 4 {
                    return Err(MmdbError::Malformed(format!("uint32 of size {size}")));
                }
                let v = self.unsigned(payload, size)?;
                #[allow(clippy::cast_possible_truncation)]
                Ok((Value::Uint32(v as u32), payload + size))
            }
            TYPE_MAP => {
                let mut pairs = Vec::with_capacity(size);
                let mut at = payload;
                for _ in 0..size {
                    let (key, after_key) = self.decode_key(at, hops)?;
                    let (value, after_value) = self.decode_one(after_key, hops)?;
                    pairs.push((key, value));
                    at = after_value;
                }
                Ok((Value::Map(pairs), at))
            }
            TYPE_INT32 => {
                if size > 4 {
                    return Err(MmdbError::Malformed(format!("int32 of size {size}")));
                }
                let raw = self.bytes(payload, size)?;
                let value = if size == 4 {
                    let mut buf = [0u8; 4];
                    buf.copy_from_slice(raw);
                    i32::from_be_bytes(buf)
                } else {
                    // Short encodings are non-negative.
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    {
                        self.unsigned(payload, size)? as i32
                    }
                };
                Ok((Value::Int32(value), payload + size))
            }
            TYPE_UINT64 => {
                if size > 8 {
                    return Err(MmdbError::Malformed(format!("uint64 of size {size}")));
                }
                let raw = self.bytes(payload, size)?;
                let mut v = 0u64;
                for b in raw {
                    v = (v << 8) | u64::from(*b);
                }
                Ok((Value::Uint64(v), payload + size))
            }
            TYPE_UINT128 => {
                if size > 16 {
                    return Err(MmdbError::Malformed(format!("uint128 of size {size}")));
                }
                let raw = self.bytes(payload, size)?;
                let mut v = 0u128;
                for b in raw {
                    v = (v << 8) | u128::from(*b);
                }
                Ok((Value::Uint128(v), payload + size))
            }
            TYPE_ARRAY => {
                let mut items = Vec::with_capacity(size);
                let mut at = payload;
                for _ in 0..size {
                    let (value, after) = self.decode_one(at, hops)?;
                    items.push(value);
                    at = after;
                }
                Ok((Value::Array(items), at))
            }
            TYPE_BOOL => match size {
                0 => Ok((Value::Bool(false), payload)),
                1 => Ok((Value::Bool(true), payload)),
                _ => Err(MmdbError::Malformed(format!("bool of size {size}"))),
            },
            TYPE_FLOAT => {
                if size != 4 {
                    return Err(MmdbError::Malformed(format!("float of size {size}")));
                }
                let raw = self.bytes(payload, 4)?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(raw);
                Ok((Value::Float(f32::from_be_bytes(buf)), payload + 4))
            }
            other => Err(MmdbError::UnknownType(other)),
        }
    }

    fn unsigned(&self, payload: usize, size: usize) -> Result<u64, MmdbError> {
        let raw = self.bytes(payload, size)?;
        let mut v = 0u64;
        for b in raw {
            v = (v << 8) | u64::from(*b);
        }
        Ok(v)
    }

    fn decode_key(&self, offset: usize, hops: usize) -> Result<(String, usize), MmdbError> {
        match self.decode_one(offset, hops)? {
            (Value::String(s), next) => Ok((s, next)),
            (other, _) => Err(MmdbError::Malformed(format!(
                "map key is a {}, not a string",
                other.kind()
            ))),
        }
    }

    /// Offset of the value following the one at `offset`, without
    /// materializing it.
    pub fn skip(&self, offset: usize) -> Result<usize, MmdbError> {
        match self.control(offset)? {
            Ctrl::Pointer { next, .. } => Ok(next),
            Ctrl::Data { ty, size, payload } => match ty {
                TYPE_MAP => {
                    let mut at = payload;
                    for _ in 0..size {
                        at = self.skip(at)?;
                        at = self.skip(at)?;
                    }
                    Ok(at)
                }
                TYPE_ARRAY => {
                    let mut at = payload;
                    for _ in 0..size {
                        at = self.skip(at)?;
                    }
                    Ok(at)
                }
                TYPE_BOOL => Ok(payload),
                _ => Ok(payload + size),
            },
        }
    }

    /// Decode only the value addressed by `path`, skipping siblings.
    ///
    /// A missing map key or out-of-range array index yields `Ok(None)`;
    /// walking a key into a non-map (or an index into a non-array) is a
    /// structural failure.
    pub fn decode_path(
        &self,
        offset: usize,
        path: &[PathSegment],
    ) -> Result<Option<Value>, MmdbError> {
        let mut at = offset;
        for (walked, segment) in path.iter().enumerate() {
            let (ty, size, payload) = self.control_resolved(at)?;
            match segment {
                PathSegment::Key(wanted) => {
                    if ty != TYPE_MAP {
                        return Err(MmdbError::PathType {
                            path: render_path(path, walked + 1),
                            found: type_kind(ty),
                        });
                    }
                    let mut cursor = payload;
                    let mut hit = None;
                    for _ in 0..size {
                        let (key, after_key) = self.decode_key(cursor, 0)?;
                        if key == *wanted {
                            hit = Some(after_key);
                            break;
                        }
                        cursor = self.skip(after_key)?;
                    }
                    match hit {
                        Some(value_at) => at = value_at,
                        None => return Ok(None),
                    }
                }
                PathSegment::Index(index) => {
                    if ty != TYPE_ARRAY {
                        return Err(MmdbError::PathType {
                            path: render_path(path, walked + 1),
                            found: type_kind(ty),
                        });
                    }
                    let len = i64::try_from(size)
                        .map_err(|_| MmdbError::Malformed("array too large".to_string()))?;
                    let rebased = if *index < 0 { len + index } else { *index };
                    if rebased < 0 || rebased >= len {
                        return Ok(None);
                    }
                    let mut cursor = payload;
                    for _ in 0..rebased {
                        cursor = self.skip(cursor)?;
                    }
                    at = cursor;
                }
            }
        }
        self.decode(at).map(Some)
    }
}

fn type_kind(ty: u8) -> &'static str {
    match ty {
        TYPE_STRING => "string",
        TYPE_DOUBLE => "double",
        TYPE_BYTES => "bytes",
        TYPE_UINT16 => "uint16",
        TYPE_UINT32 => "uint32",
        TYPE_MAP => "map",
        TYPE_INT32 => "int32",
        TYPE_UINT64 => "uint64",
        TYPE_UINT128 => "uint128",
        TYPE_ARRAY => "array",
        TYPE_BOOL => "bool",
        TYPE_FLOAT => "float",
        _ => "unknown",
    }
}
