//! Cursor helpers for the manual byte-stream format.
//!
//! Grounded on `machine-c64::snapshot`'s `pos`-tracking `to_bytes`/`from_bytes`
//! pair: push primitives onto a plain `Vec<u8>` on encode, walk a cursor with
//! explicit bounds checks on decode. No serialization crate is involved,
//! matching this workspace's `Result<T, String>` loader convention.

/// A read cursor over an immutable byte slice.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.data.len() {
            return Err(format!(
                "snapshot truncated: need {n} more byte(s) at offset {}, have {}",
                self.pos,
                self.data.len()
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn bool(&mut self) -> Result<bool, String> {
        Ok(self.u8()? != 0)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn i32(&mut self) -> Result<i32, String> {
        Ok(self.u32()? as i32)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, String> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub(crate) fn usize(&mut self) -> Result<usize, String> {
        Ok(self.u64()? as usize)
    }

    pub(crate) fn option_u64(&mut self) -> Result<Option<u64>, String> {
        if self.bool()? {
            Ok(Some(self.u64()?))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn bytes(&mut self) -> Result<Vec<u8>, String> {
        let len = self.usize()?;
        Ok(self.take(len)?.to_vec())
    }
}

pub(crate) fn push_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(u8::from(v));
}

pub(crate) fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn push_i32(buf: &mut Vec<u8>, v: i32) {
    push_u32(buf, v as u32);
}

pub(crate) fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn push_usize(buf: &mut Vec<u8>, v: usize) {
    push_u64(buf, v as u64);
}

pub(crate) fn push_option_u64(buf: &mut Vec<u8>, v: Option<u64>) {
    match v {
        Some(x) => {
            push_bool(buf, true);
            push_u64(buf, x);
        }
        None => push_bool(buf, false),
    }
}

pub(crate) fn push_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    push_usize(buf, data.len());
    buf.extend_from_slice(data);
}
