//! zlib-wrapped DEFLATE decoder.
//!
//! A stateful inflater pumps the stored bytes straight into the caller's
//! buffer; the 32 KiB sliding window lives inside the inflater. Backwards
//! seeks reset the inflater in place and replay from the start of the
//! stored stream.

use std::io::SeekFrom;

use flate2::{Decompress, FlushDecompress, Status};

use super::{discard, resolve_target, DecompError, Decompressor};

pub(crate) struct DeflateDecoder<'a> {
    data: &'a [u8],
    in_pos: usize,
    inflater: Decompress,
    out_pos: u64,
    real_size: u64,
    finished: bool,
}

impl<'a> DeflateDecoder<'a> {
    pub(crate) fn new(data: &'a [u8], real_size: u64) -> Self {
        Self {
            data,
            in_pos: 0,
            inflater: Decompress::new(true),
            out_pos: 0,
            real_size,
            finished: false,
        }
    }

    fn reset(&mut self) {
        self.inflater.reset(true);
        self.in_pos = 0;
        self.out_pos = 0;
        self.finished = false;
    }
}

impl Decompressor for DeflateDecoder<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecompError> {
        let mut written = 0usize;

        while written < buf.len() && self.out_pos < self.real_size {
            if self.finished {
                // The zlib stream ended early in an earlier call.
                return Err(DecompError::Truncated);
            }

            // Never produce past the declared size, even if the stream has
            // more to give.
            let space = (buf.len() - written).min((self.real_size - self.out_pos) as usize);
            let out = &mut buf[written..written + space];

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(&self.data[self.in_pos..], out, FlushDecompress::None)
                .map_err(|e| DecompError::Input(e.to_string()))?;
            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            self.in_pos += consumed;
            self.out_pos += produced as u64;
            written += produced;

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    if self.out_pos < self.real_size {
                        return Err(DecompError::Truncated);
                    }
                }
                Status::Ok | Status::BufError => {
                    if produced == 0 {
                        if written > 0 {
                            break; // short read; the rest comes next call
                        }
                        if self.in_pos >= self.data.len() {
                            return Err(DecompError::Truncated);
                        }
                        if consumed == 0 {
                            return Err(DecompError::Input(
                                "inflater made no progress".into(),
                            ));
                        }
                    }
                }
            }
        }

        Ok(written)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, DecompError> {
        let target = resolve_target(self.out_pos, self.real_size, pos);
        if target < self.out_pos {
            self.reset();
        }
        if target > self.out_pos {
            if let Err(e) = discard(self, target - self.out_pos) {
                // Leave a consistent stream rather than a half-replayed one.
                self.reset();
                return Err(e);
            }
        }
        Ok(self.out_pos)
    }

    fn tell(&self) -> u64 {
        self.out_pos
    }
}
