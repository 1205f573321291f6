//! A byte-granularity cursor over a borrowed buffer (`spec.md` §4.8),
//! generalized from the root `src/bit_reader.rs::BitReader` idiom — same
//! stateful-cursor shape (`data`, a position field, read methods that
//! advance it) but at byte rather than bit granularity, since this format
//! has no bit-level packing (`spec.md` Non-goals).

use crate::document::path_to_string;
use crate::document::Path;
use crate::errors::DecodeError;
use crate::schema::Endianness;

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endianness,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], endian: Endianness) -> Self {
        Reader { data, pos: 0, endian }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize, path: &Path) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEnd { field: path_to_string(path) });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn ordered(&self, bytes: &[u8]) -> Vec<u8> {
        let mut v = bytes.to_vec();
        if self.endian == Endianness::Big {
            v.reverse();
        }
        v
    }

    pub fn read_u8(&mut self, path: &Path) -> Result<u8, DecodeError> {
        Ok(self.take(1, path)?[0])
    }

    pub fn read_i8(&mut self, path: &Path) -> Result<i8, DecodeError> {
        Ok(self.take(1, path)?[0] as i8)
    }

    pub fn read_u16(&mut self, path: &Path) -> Result<u16, DecodeError> {
        let bytes = self.take(2, path)?;
        let ordered = self.ordered(bytes);
        Ok(u16::from_le_bytes([ordered[0], ordered[1]]))
    }

    pub fn read_i16(&mut self, path: &Path) -> Result<i16, DecodeError> {
        Ok(self.read_u16(path)? as i16)
    }

    pub fn read_u24(&mut self, path: &Path) -> Result<u32, DecodeError> {
        let bytes = self.take(3, path)?;
        let ordered = self.ordered(bytes);
        Ok(u32::from_le_bytes([ordered[0], ordered[1], ordered[2], 0]))
    }

    pub fn read_i24(&mut self, path: &Path) -> Result<i32, DecodeError> {
        let u = self.read_u24(path)?;
        Ok(sign_extend_24(u))
    }

    pub fn read_u32(&mut self, path: &Path) -> Result<u32, DecodeError> {
        let bytes = self.take(4, path)?;
        let ordered = self.ordered(bytes);
        Ok(u32::from_le_bytes([ordered[0], ordered[1], ordered[2], ordered[3]]))
    }

    pub fn read_i32(&mut self, path: &Path) -> Result<i32, DecodeError> {
        Ok(self.read_u32(path)? as i32)
    }

    pub fn read_u64(&mut self, path: &Path) -> Result<u64, DecodeError> {
        let bytes = self.take(8, path)?;
        let ordered = self.ordered(bytes);
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&ordered);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_i64(&mut self, path: &Path) -> Result<i64, DecodeError> {
        Ok(self.read_u64(path)? as i64)
    }

    pub fn read_f32(&mut self, path: &Path) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32(path)?))
    }

    pub fn read_f64(&mut self, path: &Path) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_u64(path)?))
    }

    pub fn read_bytes(&mut self, n: usize, path: &Path) -> Result<&'a [u8], DecodeError> {
        self.take(n, path)
    }

    pub fn peek_bytes(&self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        Some(&self.data[self.pos..self.pos + n])
    }

    /// Moves the cursor back by `n` bytes, used by the union resolver to
    /// rewind after peeking a discriminator tag (`spec.md` §4.7).
    pub fn rewind(&mut self, n: usize) {
        self.pos -= n;
    }
}

fn sign_extend_24(value: u32) -> i32 {
    if value & 0x0080_0000 != 0 {
        (value | 0xFF00_0000) as i32
    } else {
        value as i32
    }
}
