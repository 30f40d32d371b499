//! Pass-through decoder: a window over the stored bytes.

use std::io::SeekFrom;

use super::{resolve_target, DecompError, Decompressor};

pub(crate) struct RawDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RawDecoder<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl Decompressor for RawDecoder<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecompError> {
        let remaining = self.data.len() - self.pos;
        let len = buf.len().min(remaining);
        buf[..len].copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        Ok(len)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, DecompError> {
        self.pos = resolve_target(self.pos as u64, self.data.len() as u64, pos) as usize;
        Ok(self.pos as u64)
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }
}
