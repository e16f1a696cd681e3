//! NVList decoding
//!
//! ZFS labels and object metadata (pool configuration, the vdev tree,
//! dataset properties) are packed using the native (non-XDR) `nvlist`
//! encoding: a 4-byte header, a version/flags pair, then a sequence of
//! length-prefixed name/value pairs terminated by a zero-length pair.

use super::{Result, ZfsError};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

const DATA_TYPE_BOOLEAN: i32 = 1;
const DATA_TYPE_BYTE: i32 = 2;
const DATA_TYPE_INT16: i32 = 3;
const DATA_TYPE_UINT16: i32 = 4;
const DATA_TYPE_INT32: i32 = 5;
const DATA_TYPE_UINT32: i32 = 6;
const DATA_TYPE_INT64: i32 = 7;
const DATA_TYPE_UINT64: i32 = 8;
const DATA_TYPE_STRING: i32 = 9;
const DATA_TYPE_BYTE_ARRAY: i32 = 10;
const DATA_TYPE_UINT64_ARRAY: i32 = 16;
const DATA_TYPE_STRING_ARRAY: i32 = 17;
const DATA_TYPE_NVLIST: i32 = 19;
const DATA_TYPE_NVLIST_ARRAY: i32 = 20;
const DATA_TYPE_BOOLEAN_VALUE: i32 = 21;

/// A decoded nvlist value.
#[derive(Debug, Clone)]
pub enum Value {
    Boolean,
    BooleanValue(bool),
    Byte(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    String(String),
    ByteArray(Vec<u8>),
    Uint64Array(Vec<u64>),
    StringArray(Vec<String>),
    NvList(NvList),
    NvListArray(Vec<NvList>),
}

/// A parsed nvlist: an ordered map of name to [`Value`].
#[derive(Debug, Clone, Default)]
pub struct NvList {
    pairs: Vec<(String, Value)>,
}

impl NvList {
    /// Parses a packed nvlist, native encoding, from its 4-byte header on.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let encoding = cursor.read_u8()?;
        let _endian = cursor.read_u8()?;
        cursor.skip(2)?;

        if encoding != 1 {
            return Err(ZfsError::InvalidNvList(format!(
                "unsupported nvlist encoding {} (only native=1 is supported)",
                encoding
            )));
        }

        Self::parse_body(&mut cursor)
    }

    fn parse_body(cursor: &mut Cursor) -> Result<Self> {
        let _version = cursor.read_i32()?;
        let _nvflag = cursor.read_u32()?;

        let mut pairs = Vec::new();

        loop {
            let pair_start = cursor.pos;
            let encoded_size = cursor.read_u32()?;
            if encoded_size == 0 {
                break;
            }
            let _decoded_size = cursor.read_u32()?;

            let name_len = cursor.read_u32()? as usize;
            let name_bytes = cursor.read_bytes(name_len)?;
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            cursor.align4()?;

            let data_type = cursor.read_i32()?;
            let num_elements = cursor.read_u32()? as usize;

            let value = Self::parse_value(cursor, data_type, num_elements)?;
            pairs.push((name, value));

            // Resynchronize using the pair's own declared size, which is
            // authoritative over our own field-by-field accounting.
            cursor.pos = pair_start + encoded_size as usize;
        }

        Ok(Self { pairs })
    }

    fn parse_value(cursor: &mut Cursor, data_type: i32, num_elements: usize) -> Result<Value> {
        let value = match data_type {
            DATA_TYPE_BOOLEAN => Value::Boolean,
            DATA_TYPE_BOOLEAN_VALUE => Value::BooleanValue(cursor.read_u32()? != 0),
            DATA_TYPE_BYTE => Value::Byte(cursor.read_u8()?),
            DATA_TYPE_INT16 => Value::Int16(cursor.read_u32()? as i16),
            DATA_TYPE_UINT16 => Value::Uint16(cursor.read_u32()? as u16),
            DATA_TYPE_INT32 => Value::Int32(cursor.read_i32()?),
            DATA_TYPE_UINT32 => Value::Uint32(cursor.read_u32()?),
            DATA_TYPE_INT64 => Value::Int64(cursor.read_i64()?),
            DATA_TYPE_UINT64 => Value::Uint64(cursor.read_u64()?),
            DATA_TYPE_STRING => {
                let len = num_elements;
                let bytes = cursor.read_bytes(len)?;
                let s = String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string();
                cursor.align4()?;
                Value::String(s)
            }
            DATA_TYPE_BYTE_ARRAY => {
                let bytes = cursor.read_bytes(num_elements)?.to_vec();
                cursor.align4()?;
                Value::ByteArray(bytes)
            }
            DATA_TYPE_UINT64_ARRAY => {
                let mut values = Vec::with_capacity(num_elements);
                for _ in 0..num_elements {
                    values.push(cursor.read_u64()?);
                }
                Value::Uint64Array(values)
            }
            DATA_TYPE_STRING_ARRAY => {
                let mut values = Vec::with_capacity(num_elements);
                for _ in 0..num_elements {
                    let len = cursor.read_u32()? as usize;
                    let bytes = cursor.read_bytes(len)?;
                    values.push(String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string());
                    cursor.align4()?;
                }
                Value::StringArray(values)
            }
            DATA_TYPE_NVLIST => {
                let nested = Self::parse_body(cursor)?;
                Value::NvList(nested)
            }
            DATA_TYPE_NVLIST_ARRAY => {
                let mut values = Vec::with_capacity(num_elements);
                for _ in 0..num_elements {
                    values.push(Self::parse_body(cursor)?);
                }
                Value::NvListArray(values)
            }
            other => {
                return Err(ZfsError::InvalidNvList(format!(
                    "unsupported nvlist data type {}",
                    other
                )))
            }
        };
        Ok(value)
    }

    /// Returns the raw value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_uint64(&self, name: &str) -> Result<u64> {
        match self.get(name) {
            Some(Value::Uint64(v)) => Ok(*v),
            Some(Value::Int64(v)) => Ok(*v as u64),
            _ => Err(ZfsError::NvListKeyNotFound(name.to_string())),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(Value::String(s)) => Ok(s.as_str()),
            _ => Err(ZfsError::NvListKeyNotFound(name.to_string())),
        }
    }

    pub fn get_bool(&self, name: &str) -> bool {
        matches!(
            self.get(name),
            Some(Value::Boolean) | Some(Value::BooleanValue(true))
        )
    }

    pub fn get_nvlist(&self, name: &str) -> Result<&NvList> {
        match self.get(name) {
            Some(Value::NvList(nv)) => Ok(nv),
            _ => Err(ZfsError::NvListKeyNotFound(name.to_string())),
        }
    }

    pub fn get_nvlist_array(&self, name: &str) -> Result<&[NvList]> {
        match self.get(name) {
            Some(Value::NvListArray(v)) => Ok(v.as_slice()),
            _ => Err(ZfsError::NvListKeyNotFound(name.to_string())),
        }
    }

    /// Iterates over all pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.pairs.iter()
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() {
            return Err(ZfsError::InvalidNvList("unexpected end of nvlist data".to_string()));
        }
        Ok(())
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn align4(&mut self) -> Result<()> {
        let rem = self.pos % 4;
        if rem != 0 {
            self.skip(4 - rem)?;
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = self.read_bytes(1)?;
        Ok(b[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(LittleEndian::read_u32(b))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(LittleEndian::read_u64(b))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }
}
