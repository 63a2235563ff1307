//! Bounds-checked little-endian cursor over an untrusted byte slice.

use super::CodecError;

pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn malformed(&self, reason: &'static str) -> CodecError {
        CodecError::MalformedData {
            offset: self.pos,
            reason,
        }
    }

    pub(crate) fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(self.malformed(what));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], CodecError> {
        let slice = self.take(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    pub(crate) fn u8(&mut self, what: &'static str) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>(what)?[0])
    }

    pub(crate) fn u16(&mut self, what: &'static str) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take_array(what)?))
    }

    pub(crate) fn u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array(what)?))
    }

    /// Presence byte: 0 = absent, 1 = present, anything else is corruption.
    pub(crate) fn presence(&mut self, what: &'static str) -> Result<bool, CodecError> {
        match self.u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => {
                self.pos -= 1;
                Err(self.malformed("presence byte must be 0 or 1"))
            }
        }
    }

    pub(crate) fn opt_u16(&mut self, what: &'static str) -> Result<Option<u16>, CodecError> {
        if self.presence(what)? {
            self.u16(what).map(Some)
        } else {
            Ok(None)
        }
    }

    pub(crate) fn opt_u32(&mut self, what: &'static str) -> Result<Option<u32>, CodecError> {
        if self.presence(what)? {
            self.u32(what).map(Some)
        } else {
            Ok(None)
        }
    }
}
