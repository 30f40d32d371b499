//! File handles: an object, a decompressor, and a stream position.

use std::io::SeekFrom;

use bitflags::bitflags;
use log::trace;
use thiserror::Error;

use crate::decomp::{self, DecompError, Decompressor};
use crate::image::ImageError;
use crate::object::{FileRecord, FrogStat, Object};

bitflags! {
    /// Open flags.
    ///
    /// The image layer honors only `RAW`; the write-intent bits exist for
    /// the mount layer, which maps them onto the overlay and rejects them
    /// against the immutable image.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        /// Bypass decompression and stream the stored bytes verbatim.
        /// Useful for handing compressed content to an HTTP client with a
        /// matching `Content-Encoding`.
        const RAW      = 1 << 0;
        const WRITE    = 1 << 1;
        const CREATE   = 1 << 2;
        const TRUNCATE = 1 << 3;
        const APPEND   = 1 << 4;
    }
}

/// Failure to open a handle: either the record projection or the decoder
/// setup went wrong.
#[derive(Error, Debug)]
pub enum FileError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Decomp(#[from] DecompError),
}

/// An open read stream over one file object.
///
/// The handle owns its decompressor state; dropping it releases that
/// state. Handles never share mutable state, so distinct files can be read
/// from distinct threads without synchronization.
pub struct FileHandle<'fs> {
    object: Object<'fs>,
    record: FileRecord<'fs>,
    decomp: Box<dyn Decompressor + 'fs>,
    flags: OpenFlags,
}

impl<'fs> FileHandle<'fs> {
    /// Open `object`, which must be a file.
    pub fn open(object: Object<'fs>, flags: OpenFlags) -> Result<Self, FileError> {
        let record = object.file_record()?;
        let decomp = decomp::open(&record, flags.contains(OpenFlags::RAW))?;
        trace!(
            "open {:?} ({} stored, {} real)",
            object.segment(),
            record.data_size,
            record.real_size
        );
        Ok(Self {
            object,
            record,
            decomp,
            flags,
        })
    }

    /// Bytes a full read of this handle yields: the stored size in `RAW`
    /// mode, the expanded size otherwise.
    pub fn size(&self) -> u64 {
        if self.flags.contains(OpenFlags::RAW) {
            self.record.data_size as u64
        } else {
            self.record.real_size as u64
        }
    }

    /// Read up to `buf.len()` bytes at the current position. Returns the
    /// count produced; zero means end of file. Short reads are normal.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, DecompError> {
        if self.size() == 0 {
            return Ok(0);
        }
        self.decomp.read(buf)
    }

    /// Move the stream position, saturating to `[0, size]`; returns the new
    /// position. Backwards seeks on compressed files re-decode the prefix.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, DecompError> {
        self.decomp.seek(pos)
    }

    /// Current stream position.
    pub fn tell(&self) -> u64 {
        self.decomp.tell()
    }

    /// The stored bytes, bypassing the stream entirely (compressed files
    /// yield the compressed representation).
    pub fn access(&self) -> &'fs [u8] {
        self.record.data
    }

    /// Stat of the underlying object.
    pub fn stat(&self) -> FrogStat {
        FrogStat {
            kind: crate::object::ObjectKind::File,
            size: self.record.real_size as u64,
            size_compressed: self
                .object
                .is_compressed()
                .then_some(self.record.data_size as u64),
            compression: self.record.compression,
        }
    }

    pub fn object(&self) -> Object<'fs> {
        self.object
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Switch this handle to `RAW` mode in place: the decompressor is
    /// replaced by the pass-through decoder and the position resets to
    /// zero.
    pub fn reopen_raw(&mut self) -> Result<(), DecompError> {
        self.decomp = decomp::open(&self.record, true)?;
        self.flags.insert(OpenFlags::RAW);
        Ok(())
    }
}
