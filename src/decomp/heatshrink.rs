//! Heatshrink LZSS decoder.
//!
//! The stored stream is a bit stream, most significant bit first. A set
//! tag bit announces an 8-bit literal; a clear one a back-reference of
//! `window_bits` distance bits and `lookahead_bits` count bits, both biased
//! by one. Decoded bytes pass through a `2^window_bits` ring buffer that
//! back-references copy out of. The window and lookahead sizes come from
//! the object's options byte: window bits in the low nibble, lookahead bits
//! in the high nibble.

use std::io::SeekFrom;

use super::{discard, resolve_target, DecompError, Decompressor};

const MIN_WINDOW_BITS: u8 = 4;
const MAX_WINDOW_BITS: u8 = 15;
const MIN_LOOKAHEAD_BITS: u8 = 3;

pub(crate) struct HeatshrinkDecoder<'a> {
    data: &'a [u8],
    real_size: u64,
    window_bits: u8,
    lookahead_bits: u8,

    window: Vec<u8>,
    mask: usize,
    /// Total bytes decoded; `head & mask` is the ring write position.
    head: usize,

    in_pos: usize,
    current_byte: u8,
    /// Bit about to be read from `current_byte`; zero means refill.
    bit_mask: u8,

    /// Back-reference in progress, surviving short reads.
    pending_dist: usize,
    pending_count: usize,

    out_pos: u64,
}

impl<'a> HeatshrinkDecoder<'a> {
    pub(crate) fn new(data: &'a [u8], real_size: u64, opts: u8) -> Result<Self, DecompError> {
        let window_bits = opts & 0x0F;
        let lookahead_bits = opts >> 4;
        if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&window_bits) {
            return Err(DecompError::Init("window bits out of range"));
        }
        if lookahead_bits < MIN_LOOKAHEAD_BITS || lookahead_bits >= window_bits {
            return Err(DecompError::Init("lookahead bits out of range"));
        }
        let size = 1usize << window_bits;
        Ok(Self {
            data,
            real_size,
            window_bits,
            lookahead_bits,
            window: vec![0; size],
            mask: size - 1,
            head: 0,
            in_pos: 0,
            current_byte: 0,
            bit_mask: 0,
            pending_dist: 0,
            pending_count: 0,
            out_pos: 0,
        })
    }

    fn reset(&mut self) {
        self.head = 0;
        self.in_pos = 0;
        self.current_byte = 0;
        self.bit_mask = 0;
        self.pending_dist = 0;
        self.pending_count = 0;
        self.out_pos = 0;
    }

    /// Pull `count` bits MSB-first, or `None` when the input is exhausted.
    fn get_bits(&mut self, count: u8) -> Option<u16> {
        let mut accum = 0u16;
        for _ in 0..count {
            if self.bit_mask == 0 {
                if self.in_pos >= self.data.len() {
                    return None;
                }
                self.current_byte = self.data[self.in_pos];
                self.in_pos += 1;
                self.bit_mask = 0x80;
            }
            accum <<= 1;
            if self.current_byte & self.bit_mask != 0 {
                accum |= 1;
            }
            self.bit_mask >>= 1;
        }
        Some(accum)
    }

    fn push(&mut self, byte: u8) {
        self.window[self.head & self.mask] = byte;
        self.head += 1;
        self.out_pos += 1;
    }
}

impl Decompressor for HeatshrinkDecoder<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecompError> {
        let mut written = 0usize;

        while written < buf.len() && self.out_pos < self.real_size {
            if self.pending_count > 0 {
                // The source position slides with the head; an overlapping
                // copy repeats recent output.
                let byte = self.window[(self.head - self.pending_dist) & self.mask];
                self.push(byte);
                buf[written] = byte;
                written += 1;
                self.pending_count -= 1;
                continue;
            }

            match self.get_bits(1) {
                None => return Err(DecompError::Truncated),
                Some(1) => {
                    let Some(lit) = self.get_bits(8) else {
                        return Err(DecompError::Truncated);
                    };
                    self.push(lit as u8);
                    buf[written] = lit as u8;
                    written += 1;
                }
                Some(_) => {
                    let Some(idx) = self.get_bits(self.window_bits) else {
                        return Err(DecompError::Truncated);
                    };
                    let Some(cnt) = self.get_bits(self.lookahead_bits) else {
                        return Err(DecompError::Truncated);
                    };
                    let dist = idx as usize + 1;
                    if dist > self.head {
                        return Err(DecompError::Input(
                            "back-reference before the start of the stream".into(),
                        ));
                    }
                    self.pending_dist = dist;
                    self.pending_count = cnt as usize + 1;
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
