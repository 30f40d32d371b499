//! Streaming decompressors.
//!
//! A closed set of decoders behind one capability set: read, seek, tell
//! (open is the factory keyed by algorithm id, close is drop). Each file
//! handle owns one decoder instance; decoder state is never shared.
//!
//! # Seeking on one-way decoders
//! DEFLATE and heatshrink only run forward. Seeks resolve the target
//! against the expanded size with saturation; a backwards seek resets the
//! decoder in place and rewinds its input, a forward seek decodes into a
//! small scratch buffer until the target is reached. Backwards seeks
//! therefore cost up to a full re-decode of the prefix — callers that seek
//! backwards a lot should prefer uncompressed storage.
//!
//! # Read contract
//! `read` returns the bytes produced, `Ok(0)` at end of stream, and an
//! error on malformed input. Short reads are normal; callers loop.

mod raw;
mod deflate;
mod heatshrink;

pub(crate) use deflate::DeflateDecoder;
pub(crate) use heatshrink::HeatshrinkDecoder;
pub(crate) use raw::RawDecoder;

use std::io::SeekFrom;

use thiserror::Error;

use crate::object::{Compression, FileRecord};

/// Scratch buffer length for forward seek replay.
pub(crate) const SEEK_CHUNK: usize = 16;

#[derive(Error, Debug)]
pub enum DecompError {
    /// The object's compression options are unusable.
    #[error("decompressor setup failed: {0}")]
    Init(&'static str),
    /// The stored stream is malformed.
    #[error("malformed compressed stream: {0}")]
    Input(String),
    /// The stored stream ended before producing the declared size.
    #[error("compressed stream ended before the declared size")]
    Truncated,
    /// The image names an algorithm this build does not provide.
    #[error("unknown compression algorithm id {0}")]
    UnknownAlgo(u8),
}

/// One open decode stream over a file's stored bytes.
pub trait Decompressor: Send {
    /// Decode up to `buf.len()` bytes. Returns the count produced; zero
    /// means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecompError>;

    /// Move the stream position, saturating to `[0, size]`. Returns the new
    /// position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, DecompError>;

    /// Current stream position.
    fn tell(&self) -> u64;
}

/// Resolve a seek request to an absolute position, saturating to
/// `[0, size]` in every mode.
pub(crate) fn resolve_target(cur: u64, size: u64, pos: SeekFrom) -> u64 {
    match pos {
        SeekFrom::Start(n) => n.min(size),
        SeekFrom::Current(d) => cur.saturating_add_signed(d).min(size),
        SeekFrom::End(d) => size.saturating_add_signed(d).min(size),
    }
}

/// Decode-and-discard `n` bytes for forward seek replay.
pub(crate) fn discard<D: Decompressor + ?Sized>(d: &mut D, mut n: u64) -> Result<(), DecompError> {
    let mut scratch = [0u8; SEEK_CHUNK];
    while n > 0 {
        let want = n.min(SEEK_CHUNK as u64) as usize;
        let got = d.read(&mut scratch[..want])?;
        if got == 0 {
            return Err(DecompError::Truncated);
        }
        n -= got as u64;
    }
    Ok(())
}

/// Instantiate the decoder for a file.
///
/// `raw` forces the pass-through decoder regardless of the stored
/// algorithm, exposing the compressed bytes as the stream.
pub(crate) fn open<'fs>(
    record: &FileRecord<'fs>,
    raw: bool,
) -> Result<Box<dyn Decompressor + 'fs>, DecompError> {
    let algo = if raw {
        Compression::None
    } else {
        record.compression
    };
    match algo {
        Compression::None => Ok(Box::new(RawDecoder::new(record.data))),
        Compression::Deflate => Ok(Box::new(DeflateDecoder::new(
            record.data,
            record.real_size as u64,
        ))),
        Compression::Heatshrink => Ok(Box::new(HeatshrinkDecoder::new(
            record.data,
            record.real_size as u64,
            record.opts,
        )?)),
        Compression::Other(id) => Err(DecompError::UnknownAlgo(id)),
    }
}
