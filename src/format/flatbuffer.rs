//! Minimal FlatBuffers reader and builder.
//!
//! Only the pieces the TFLite schema needs are covered: tables, strings,
//! vectors of scalars and vectors of tables. Every read is bounds checked so a
//! truncated or corrupted file surfaces as [`CompatError::MalformedModel`]
//! rather than a panic.

use crate::utils::error::{CompatError, Result};

const SIZE_UOFFSET: usize = 4;
const FILE_IDENTIFIER_LENGTH: usize = 4;

fn read_bytes<const N: usize>(buf: &[u8], pos: usize) -> Result<[u8; N]> {
    let end = pos
        .checked_add(N)
        .ok_or_else(|| CompatError::malformed("offset overflow"))?;
    let slice = buf.get(pos..end).ok_or_else(|| {
        CompatError::malformed(format!(
            "read of {} bytes at {} past end of buffer ({} bytes)",
            N,
            pos,
            buf.len()
        ))
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

pub fn read_u8(buf: &[u8], pos: usize) -> Result<u8> {
    Ok(read_bytes::<1>(buf, pos)?[0])
}

pub fn read_u16(buf: &[u8], pos: usize) -> Result<u16> {
    Ok(u16::from_le_bytes(read_bytes(buf, pos)?))
}

pub fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_bytes(buf, pos)?))
}

pub fn read_i32(buf: &[u8], pos: usize) -> Result<i32> {
    Ok(i32::from_le_bytes(read_bytes(buf, pos)?))
}

pub fn read_i64(buf: &[u8], pos: usize) -> Result<i64> {
    Ok(i64::from_le_bytes(read_bytes(buf, pos)?))
}

pub fn read_f32(buf: &[u8], pos: usize) -> Result<f32> {
    Ok(f32::from_le_bytes(read_bytes(buf, pos)?))
}

/// Follows a `uoffset_t` stored at `pos`.
fn follow(buf: &[u8], pos: usize) -> Result<usize> {
    let offset = read_u32(buf, pos)? as usize;
    let target = pos
        .checked_add(offset)
        .ok_or_else(|| CompatError::malformed("offset overflow"))?;
    if target >= buf.len() {
        return Err(CompatError::malformed(format!(
            "offset at {} points outside the buffer",
            pos
        )));
    }
    Ok(target)
}

/// Returns the 4-byte file identifier, if the buffer is long enough to carry one.
pub fn file_identifier(buf: &[u8]) -> Option<&[u8]> {
    buf.get(SIZE_UOFFSET..SIZE_UOFFSET + FILE_IDENTIFIER_LENGTH)
}

/// Element location of a vector: `(first element position, length)`.
#[derive(Debug, Clone, Copy)]
struct VectorRef {
    start: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
    vtable: usize,
    vtable_len: usize,
}

impl<'a> Table<'a> {
    /// Resolves the root table of a finished buffer.
    pub fn root(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < SIZE_UOFFSET + FILE_IDENTIFIER_LENGTH {
            return Err(CompatError::malformed(format!(
                "buffer too small ({} bytes)",
                buf.len()
            )));
        }
        let pos = follow(buf, 0)?;
        Self::at(buf, pos)
    }

    fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        let soffset = read_i32(buf, pos)? as i64;
        let vtable = pos as i64 - soffset;
        if vtable < 0 || vtable as usize >= buf.len() {
            return Err(CompatError::malformed(format!(
                "table at {} has a vtable outside the buffer",
                pos
            )));
        }
        let vtable = vtable as usize;
        let vtable_len = read_u16(buf, vtable)? as usize;
        if vtable_len < 4 || vtable + vtable_len > buf.len() {
            return Err(CompatError::malformed(format!(
                "vtable at {} has invalid length {}",
                vtable, vtable_len
            )));
        }
        Ok(Self {
            buf,
            pos,
            vtable,
            vtable_len,
        })
    }

    /// Absolute position of field `id`, or `None` when the field is absent.
    fn field(&self, id: usize) -> Result<Option<usize>> {
        let entry = 4 + id * 2;
        if entry + 2 > self.vtable_len {
            return Ok(None);
        }
        let offset = read_u16(self.buf, self.vtable + entry)? as usize;
        if offset == 0 {
            return Ok(None);
        }
        Ok(Some(self.pos + offset))
    }

    pub fn get_u8(&self, id: usize, default: u8) -> Result<u8> {
        match self.field(id)? {
            Some(pos) => read_u8(self.buf, pos),
            None => Ok(default),
        }
    }

    pub fn get_i8(&self, id: usize, default: i8) -> Result<i8> {
        Ok(self.get_u8(id, default as u8)? as i8)
    }

    pub fn get_bool(&self, id: usize, default: bool) -> Result<bool> {
        Ok(self.get_u8(id, default as u8)? != 0)
    }

    pub fn get_u32(&self, id: usize, default: u32) -> Result<u32> {
        match self.field(id)? {
            Some(pos) => read_u32(self.buf, pos),
            None => Ok(default),
        }
    }

    pub fn get_i32(&self, id: usize, default: i32) -> Result<i32> {
        match self.field(id)? {
            Some(pos) => read_i32(self.buf, pos),
            None => Ok(default),
        }
    }

    pub fn get_f32(&self, id: usize, default: f32) -> Result<f32> {
        match self.field(id)? {
            Some(pos) => read_f32(self.buf, pos),
            None => Ok(default),
        }
    }

    pub fn get_table(&self, id: usize) -> Result<Option<Table<'a>>> {
        match self.field(id)? {
            Some(pos) => Ok(Some(Table::at(self.buf, follow(self.buf, pos)?)?)),
            None => Ok(None),
        }
    }

    fn vector(&self, id: usize, elem_size: usize) -> Result<Option<VectorRef>> {
        let Some(pos) = self.field(id)? else {
            return Ok(None);
        };
        let vec_pos = follow(self.buf, pos)?;
        let len = read_u32(self.buf, vec_pos)? as usize;
        let start = vec_pos + SIZE_UOFFSET;
        let bytes = len
            .checked_mul(elem_size)
            .ok_or_else(|| CompatError::malformed("vector length overflow"))?;
        if start + bytes > self.buf.len() {
            return Err(CompatError::malformed(format!(
                "vector at {} with {} elements runs past the buffer",
                vec_pos, len
            )));
        }
        Ok(Some(VectorRef { start, len }))
    }

    pub fn get_str(&self, id: usize) -> Result<Option<&'a str>> {
        match self.get_bytes(id)? {
            Some(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|e| CompatError::malformed(format!("string is not UTF-8: {}", e))),
            None => Ok(None),
        }
    }

    pub fn get_bytes(&self, id: usize) -> Result<Option<&'a [u8]>> {
        let buf: &'a [u8] = self.buf;
        Ok(self.vector(id, 1)?.map(|v| &buf[v.start..v.start + v.len]))
    }

    pub fn get_vec_i32(&self, id: usize) -> Result<Option<Vec<i32>>> {
        let Some(v) = self.vector(id, 4)? else {
            return Ok(None);
        };
        (0..v.len)
            .map(|i| read_i32(self.buf, v.start + i * 4))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn get_vec_f32(&self, id: usize) -> Result<Option<Vec<f32>>> {
        let Some(v) = self.vector(id, 4)? else {
            return Ok(None);
        };
        (0..v.len)
            .map(|i| read_f32(self.buf, v.start + i * 4))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    pub fn get_vec_i64(&self, id: usize) -> Result<Option<Vec<i64>>> {
        let Some(v) = self.vector(id, 8)? else {
            return Ok(None);
        };
        (0..v.len)
            .map(|i| read_i64(self.buf, v.start + i * 8))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Vector of tables; an absent vector reads as empty.
    pub fn get_vec_tables(&self, id: usize) -> Result<Vec<Table<'a>>> {
        let Some(v) = self.vector(id, 4)? else {
            return Ok(Vec::new());
        };
        (0..v.len)
            .map(|i| Table::at(self.buf, follow(self.buf, v.start + i * 4)?))
            .collect()
    }
}

/// Position of a finished object, counted from the end of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WIPOffset(usize);

/// Back-to-front builder.
///
/// Bytes are kept reversed so that prepending is a push; `finish` flips the
/// storage once. Offsets are distances from the end of the final buffer,
/// which stay valid while more data is prepended.
#[derive(Debug, Default)]
pub struct Builder {
    rev: Vec<u8>,
    min_align: usize,
    table_start: Option<usize>,
    fields: Vec<(usize, usize)>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            rev: Vec::with_capacity(1024),
            min_align: 1,
            table_start: None,
            fields: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.rev.len()
    }

    fn pad(&mut self, n: usize) {
        self.rev.extend(std::iter::repeat(0u8).take(n));
    }

    /// Aligns so that after writing `additional` bytes the head sits on a
    /// `size` boundary.
    fn prep(&mut self, size: usize, additional: usize) {
        self.min_align = self.min_align.max(size);
        let pad = (size - (self.len() + additional) % size) % size;
        self.pad(pad);
    }

    fn push_le(&mut self, le: &[u8]) {
        self.rev.extend(le.iter().rev());
    }

    pub fn push_u8(&mut self, v: u8) {
        self.prep(1, 0);
        self.rev.push(v);
    }

    pub fn push_u16(&mut self, v: u16) {
        self.prep(2, 0);
        self.push_le(&v.to_le_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.prep(4, 0);
        self.push_le(&v.to_le_bytes());
    }

    pub fn push_i32(&mut self, v: i32) {
        self.prep(4, 0);
        self.push_le(&v.to_le_bytes());
    }

    fn push_uoffset(&mut self, target: WIPOffset) {
        self.prep(4, 0);
        let rel = (self.len() + SIZE_UOFFSET - target.0) as u32;
        self.push_le(&rel.to_le_bytes());
    }

    pub fn create_string(&mut self, s: &str) -> WIPOffset {
        self.assert_not_nested();
        self.prep(SIZE_UOFFSET, s.len() + 1);
        self.rev.push(0);
        self.rev.extend(s.as_bytes().iter().rev());
        self.push_u32(s.len() as u32);
        WIPOffset(self.len())
    }

    /// Byte vector aligned to `alignment` (TFLite buffers use 16).
    pub fn create_byte_vector(&mut self, data: &[u8], alignment: usize) -> WIPOffset {
        self.assert_not_nested();
        self.prep(SIZE_UOFFSET, data.len());
        self.prep(alignment, data.len());
        self.rev.extend(data.iter().rev());
        self.push_u32(data.len() as u32);
        WIPOffset(self.len())
    }

    pub fn create_vector_i32(&mut self, items: &[i32]) -> WIPOffset {
        self.assert_not_nested();
        self.prep(SIZE_UOFFSET, items.len() * 4);
        for &item in items.iter().rev() {
            self.push_i32(item);
        }
        self.push_u32(items.len() as u32);
        WIPOffset(self.len())
    }

    pub fn create_vector_f32(&mut self, items: &[f32]) -> WIPOffset {
        let bytes: &[u8] = bytemuck::cast_slice(items);
        self.create_scalar_bytes(bytes, items.len(), 4)
    }

    pub fn create_vector_i64(&mut self, items: &[i64]) -> WIPOffset {
        let bytes: &[u8] = bytemuck::cast_slice(items);
        self.create_scalar_bytes(bytes, items.len(), 8)
    }

    /// `bytes` is the little-endian image of `count` scalars of `elem_size`.
    fn create_scalar_bytes(&mut self, bytes: &[u8], count: usize, elem_size: usize) -> WIPOffset {
        self.assert_not_nested();
        self.prep(SIZE_UOFFSET, bytes.len());
        self.prep(elem_size, bytes.len());
        if cfg!(target_endian = "little") {
            self.rev.extend(bytes.iter().rev());
        } else {
            for chunk in bytes.chunks(elem_size).rev() {
                self.rev.extend(chunk.iter());
            }
        }
        self.push_u32(count as u32);
        WIPOffset(self.len())
    }

    pub fn create_vector_offsets(&mut self, items: &[WIPOffset]) -> WIPOffset {
        self.assert_not_nested();
        self.prep(SIZE_UOFFSET, items.len() * SIZE_UOFFSET);
        for &item in items.iter().rev() {
            self.push_uoffset(item);
        }
        self.push_u32(items.len() as u32);
        WIPOffset(self.len())
    }

    fn assert_not_nested(&self) {
        debug_assert!(
            self.table_start.is_none(),
            "objects cannot be created while a table is open"
        );
    }

    pub fn start_table(&mut self) {
        self.assert_not_nested();
        self.table_start = Some(self.len());
        self.fields.clear();
    }

    fn track_field(&mut self, id: usize) {
        self.fields.push((id, self.len()));
    }

    pub fn add_u8(&mut self, id: usize, v: u8) {
        self.push_u8(v);
        self.track_field(id);
    }

    pub fn add_i8(&mut self, id: usize, v: i8) {
        self.add_u8(id, v as u8);
    }

    pub fn add_bool(&mut self, id: usize, v: bool) {
        self.add_u8(id, v as u8);
    }

    pub fn add_u32(&mut self, id: usize, v: u32) {
        self.push_u32(v);
        self.track_field(id);
    }

    pub fn add_i32(&mut self, id: usize, v: i32) {
        self.push_i32(v);
        self.track_field(id);
    }

    pub fn add_f32(&mut self, id: usize, v: f32) {
        self.prep(4, 0);
        self.push_le(&v.to_le_bytes());
        self.track_field(id);
    }

    pub fn add_offset(&mut self, id: usize, target: WIPOffset) {
        self.push_uoffset(target);
        self.track_field(id);
    }

    pub fn end_table(&mut self) -> WIPOffset {
        let start = self
            .table_start
            .take()
            .unwrap_or_else(|| unreachable!("end_table without start_table"));

        // soffset placeholder, patched once the vtable position is known
        self.push_i32(0);
        let object = self.len();

        let field_count = self.fields.iter().map(|&(id, _)| id + 1).max().unwrap_or(0);
        let mut slots = vec![0u16; field_count];
        for &(id, at) in &self.fields {
            slots[id] = (object - at) as u16;
        }
        for &slot in slots.iter().rev() {
            self.push_u16(slot);
        }
        self.push_u16((object - start) as u16);
        self.push_u16(((field_count + 2) * 2) as u16);
        let vtable = self.len();

        let soffset = ((vtable - object) as i32).to_le_bytes();
        for (k, byte) in soffset.iter().enumerate() {
            self.rev[object - 1 - k] = *byte;
        }
        self.fields.clear();
        WIPOffset(object)
    }

    /// Finishes the buffer with `root` as the root table and returns it in
    /// file order.
    pub fn finish(mut self, root: WIPOffset, file_identifier: &[u8; 4]) -> Vec<u8> {
        self.prep(self.min_align.max(4), SIZE_UOFFSET + FILE_IDENTIFIER_LENGTH);
        self.rev.extend(file_identifier.iter().rev());
        self.push_uoffset(root);
        self.rev.reverse();
        self.rev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_with_string_and_vectors() {
        let mut b = Builder::new();
        let name = b.create_string("dense1");
        let shape = b.create_vector_i32(&[1, 32000, 1]);
        let scales = b.create_vector_f32(&[0.5, 0.25]);
        b.start_table();
        b.add_offset(3, name);
        b.add_offset(0, shape);
        b.add_offset(2, scales);
        b.add_u8(1, 9);
        let root = b.end_table();
        let buf = b.finish(root, b"TFL3");

        assert_eq!(file_identifier(&buf), Some(&b"TFL3"[..]));
        let table = Table::root(&buf).unwrap();
        assert_eq!(table.get_str(3).unwrap(), Some("dense1"));
        assert_eq!(table.get_vec_i32(0).unwrap(), Some(vec![1, 32000, 1]));
        assert_eq!(table.get_vec_f32(2).unwrap(), Some(vec![0.5, 0.25]));
        assert_eq!(table.get_u8(1, 0).unwrap(), 9);
        // 不存在的欄位回傳預設值
        assert_eq!(table.get_i32(7, 42).unwrap(), 42);
        assert!(table.get_str(5).unwrap().is_none());
    }

    #[test]
    fn test_nested_tables() {
        let mut b = Builder::new();
        let mut children = Vec::new();
        for version in [1, 11, 12] {
            b.start_table();
            b.add_i32(2, version);
            children.push(b.end_table());
        }
        let codes = b.create_vector_offsets(&children);
        b.start_table();
        b.add_u32(0, 3);
        b.add_offset(1, codes);
        let root = b.end_table();
        let buf = b.finish(root, b"TFL3");

        let model = Table::root(&buf).unwrap();
        assert_eq!(model.get_u32(0, 0).unwrap(), 3);
        let versions: Vec<i32> = model
            .get_vec_tables(1)
            .unwrap()
            .iter()
            .map(|t| t.get_i32(2, 1).unwrap())
            .collect();
        assert_eq!(versions, vec![1, 11, 12]);
    }

    #[test]
    fn test_byte_vector_alignment() {
        let mut b = Builder::new();
        let data = b.create_byte_vector(&[1, 2, 3, 4, 5], 16);
        b.start_table();
        b.add_offset(0, data);
        let root = b.end_table();
        let buf = b.finish(root, b"TFL3");

        assert_eq!(buf.len() % 16, 0);
        let table = Table::root(&buf).unwrap();
        let bytes = table.get_bytes(0).unwrap().unwrap();
        assert_eq!(bytes, &[1, 2, 3, 4, 5]);
        let start = bytes.as_ptr() as usize - buf.as_ptr() as usize;
        assert_eq!(start % 16, 0);
    }

    #[test]
    fn test_truncated_buffer_is_malformed() {
        assert!(matches!(
            Table::root(&[1, 2, 3]),
            Err(CompatError::MalformedModel { .. })
        ));

        let mut b = Builder::new();
        b.start_table();
        b.add_u32(0, 3);
        let root = b.end_table();
        let buf = b.finish(root, b"TFL3");
        let cut = &buf[..buf.len() - 6];
        assert!(Table::root(cut).is_err() || Table::root(cut).unwrap().get_u32(0, 0).is_err());
    }
}
