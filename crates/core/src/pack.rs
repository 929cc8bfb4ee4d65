//! Little-endian binary packing used by the record codec and the persisted cache.
//!
//! Layout conventions: integers are little-endian, `bool` is one byte,
//! byte strings and UTF-8 strings carry a `u32` length prefix, and
//! collections (maps and id sets) carry an `i64` element count.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{Error, Result};

/// Values with a stable binary form.
pub trait Packable: Sized {
    fn pack(&self, packer: &mut Packer);
    fn unpack(unpacker: &mut Unpacker<'_>) -> Result<Self>;
}

/// Keyed values stored in a map whose key is part of the value itself.
pub trait PackKey {
    fn pack_key(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn pack_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn pack_bool(&mut self, value: bool) -> bool {
        self.buf.push(u8::from(value));
        value
    }

    pub fn pack_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn pack_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn pack_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn pack_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn pack_bytes(&mut self, bytes: &[u8]) {
        // Payloads are bounded by the ledger far below 4 GiB.
        self.pack_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn pack_str(&mut self, value: &str) {
        self.pack_bytes(value.as_bytes());
    }

    pub fn pack_option<T: Packable>(&mut self, value: Option<&T>) {
        if let Some(value) = value {
            self.pack_bool(true);
            value.pack(self);
        } else {
            self.pack_bool(false);
        }
    }

    pub fn pack_id_set(&mut self, ids: &BTreeSet<i64>) {
        self.pack_i64(ids.len() as i64);
        for id in ids {
            self.pack_i64(*id);
        }
    }

    pub fn pack_map<T: Packable>(&mut self, map: &BTreeMap<i64, T>) {
        self.pack_i64(map.len() as i64);
        for value in map.values() {
            value.pack(self);
        }
    }
}

#[derive(Debug)]
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                Error::malformed(format!(
                    "truncated input: wanted {} bytes at offset {}, have {}",
                    len,
                    self.pos,
                    self.data.len().saturating_sub(self.pos)
                ))
            })?;
        let data = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn unpack_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn unpack_bool(&mut self) -> Result<bool> {
        match self.unpack_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::malformed(format!("invalid bool byte {}", other))),
        }
    }

    pub fn unpack_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn unpack_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn unpack_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn unpack_raw<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.take_array()
    }

    pub fn unpack_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.unpack_u32()? as usize;
        self.take(len)
    }

    pub fn unpack_string(&mut self) -> Result<String> {
        let bytes = self.unpack_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::malformed(format!("invalid utf-8 string: {}", e)))
    }

    pub fn unpack_option<T: Packable>(&mut self) -> Result<Option<T>> {
        if self.unpack_bool()? {
            Ok(Some(T::unpack(self)?))
        } else {
            Ok(None)
        }
    }

    fn unpack_count(&mut self) -> Result<usize> {
        let count = self.unpack_i64()?;
        if count < 0 {
            return Err(Error::malformed(format!(
                "negative collection count {}",
                count
            )));
        }
        Ok(count as usize)
    }

    pub fn unpack_id_set(&mut self) -> Result<BTreeSet<i64>> {
        let count = self.unpack_count()?;
        let mut ids = BTreeSet::new();
        for _ in 0..count {
            ids.insert(self.unpack_i64()?);
        }
        Ok(ids)
    }

    pub fn unpack_map<T: Packable + PackKey>(&mut self) -> Result<BTreeMap<i64, T>> {
        let count = self.unpack_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let value = T::unpack(self)?;
            map.insert(value.pack_key(), value);
        }
        Ok(map)
    }
}
