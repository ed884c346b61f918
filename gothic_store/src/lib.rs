//! Save-file record for script state.
//!
//! Scripts keep an opaque string-keyed store. The save layer persists it as a
//! little-endian entry count followed by that many length-prefixed key/value
//! pairs. This crate owns the framing so the save writer and the script host
//! agree on it without sharing a Lua dependency.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the count and length prefixes in bytes.
pub const PREFIX_LEN: usize = 4;

/// String-keyed script state exchanged with the save layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptData {
    pub global_data: BTreeMap<String, String>,
}

impl ScriptData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(global_data: BTreeMap<String, String>) -> Self {
        Self { global_data }
    }

    pub fn is_empty(&self) -> bool {
        self.global_data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.global_data.len()
    }

    /// Size of the encoded record in bytes.
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN
            + self
                .global_data
                .iter()
                .map(|(key, value)| 2 * PREFIX_LEN + key.len() + value.len())
                .sum::<usize>()
    }

    /// Encode the record. Entries are written in key order.
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.put_u32_le(prefix(self.global_data.len())?);
        for (key, value) in &self.global_data {
            put_string(&mut out, key)?;
            put_string(&mut out, value)?;
        }
        Ok(out)
    }

    /// Decode a record produced by [`ScriptData::encode`].
    pub fn decode(input: &[u8]) -> Result<Self, StoreError> {
        let mut buf = input;
        let count = take_u32(&mut buf)? as usize;
        let mut global_data = BTreeMap::new();
        for _ in 0..count {
            let key = take_string(&mut buf)?;
            let value = take_string(&mut buf)?;
            if global_data.contains_key(&key) {
                return Err(StoreError::DuplicateKey(key));
            }
            global_data.insert(key, value);
        }
        if buf.has_remaining() {
            return Err(StoreError::TrailingBytes(buf.remaining()));
        }
        Ok(Self { global_data })
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), StoreError> {
        let bytes = self.encode()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, StoreError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::decode(&bytes)
    }

    /// Pretty JSON view used by debugging tools.
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("record field is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("duplicate key {0:?} in record")]
    DuplicateKey(String),
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
    #[error("field of {0} bytes does not fit a length prefix")]
    Oversize(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn prefix(len: usize) -> Result<u32, StoreError> {
    u32::try_from(len).map_err(|_| StoreError::Oversize(len))
}

fn put_string(out: &mut Vec<u8>, text: &str) -> Result<(), StoreError> {
    out.put_u32_le(prefix(text.len())?);
    out.put_slice(text.as_bytes());
    Ok(())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, StoreError> {
    if buf.remaining() < PREFIX_LEN {
        return Err(StoreError::Truncated {
            needed: PREFIX_LEN,
            remaining: buf.remaining(),
        });
    }
    Ok(buf.get_u32_le())
}

fn take_string(buf: &mut &[u8]) -> Result<String, StoreError> {
    let len = take_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(StoreError::Truncated {
            needed: len,
            remaining: buf.remaining(),
        });
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(String::from_utf8(bytes)?)
}
