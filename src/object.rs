//! Object records — directories and files inside the image.
//!
//! # On-disk layout (all fields little-endian)
//!
//! Every object starts on an alignment boundary with a common 8-byte
//! prefix, followed by its path segment and a kind-specific body (each
//! aligned up):
//!
//! ```text
//! Offset  Size  Field
//!    0      4   parent_offset   0 marks the root
//!    4      2   child_count_or_comp   discriminant, see below
//!    6      1   path_seg_len
//!    7      1   opts            compression options
//!    8      n   path_segment    relative, UTF-8, no terminator
//!   ...    ...  padding to the alignment boundary
//!          directory body: child_offsets u32[child_count]
//!          file body:      data_offset u32, data_size u32
//!                          compressed adds: compressed_size u32, real_size u32
//! ```
//!
//! `child_count_or_comp` packs both discriminants into one 16-bit slot:
//! values below 0xFF00 are directory child counts; exactly 0xFF00 is an
//! uncompressed file; anything above carries the compression algorithm id
//! in the low byte.

use byteorder::{ByteOrder, LittleEndian};

use crate::image::{align_up, FrogFs, ImageError};

/// Common object prefix length in bytes.
pub const ENTRY_LEN: usize = 8;

/// `child_count_or_comp` values at or above this mark a file.
pub const FILE_SENTINEL: u16 = 0xFF00;

/// Compression algorithm of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Stored verbatim.
    None,
    /// zlib-wrapped DEFLATE.
    Deflate,
    /// Heatshrink LZSS; window/lookahead bits live in the object's `opts`.
    Heatshrink,
    /// An algorithm id this build does not provide.
    Other(u8),
}

impl Compression {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Compression::None,
            1 => Compression::Deflate,
            2 => Compression::Heatshrink,
            other => Compression::Other(other),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Deflate => 1,
            Compression::Heatshrink => 2,
            Compression::Other(id) => id,
        }
    }

    /// Human-readable name (for diagnostics only — never parsed).
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Deflate => "deflate",
            Compression::Heatshrink => "heatshrink",
            Compression::Other(_) => "unknown",
        }
    }
}

/// Object kind as surfaced by stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Dir,
}

/// Stat result for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrogStat {
    pub kind: ObjectKind,
    /// Bytes a full read yields (uncompressed length for compressed files).
    pub size: u64,
    /// Stored length, present only for compressed files.
    pub size_compressed: Option<u64>,
    pub compression: Compression,
}

/// Parsed file body.
#[derive(Debug, Clone, Copy)]
pub struct FileRecord<'fs> {
    pub compression: Compression,
    /// Compression options byte; heatshrink keeps window bits in the low
    /// nibble and lookahead bits in the high nibble.
    pub opts: u8,
    pub data_offset: u32,
    /// Stored length, before alignment padding.
    pub data_size: u32,
    /// Expanded length; equals `data_size` for uncompressed files.
    pub real_size: u32,
    /// The stored bytes.
    pub data: &'fs [u8],
}

/// A validated view of one object record.
///
/// Copyable; holds only the image borrow and the common prefix fields.
/// Bodies are projected on demand.
#[derive(Clone, Copy)]
pub struct Object<'fs> {
    fs: &'fs FrogFs<'fs>,
    offset: u32,
    parent: u32,
    word: u16,
    seg: &'fs str,
    opts: u8,
}

impl<'fs> Object<'fs> {
    pub(crate) fn parse(fs: &'fs FrogFs<'fs>, offset: u32) -> Result<Self, ImageError> {
        let off = offset as usize;
        if off < fs.objects_off() {
            return Err(ImageError::Invalid("object offset points before the object area"));
        }
        if off % fs.alignment() != 0 {
            return Err(ImageError::Invalid("misaligned object offset"));
        }

        let prefix = fs.slice(off, ENTRY_LEN)?;
        let parent = LittleEndian::read_u32(&prefix[0..4]);
        let word = LittleEndian::read_u16(&prefix[4..6]);
        let seg_len = prefix[6] as usize;
        let opts = prefix[7];

        let seg_bytes = fs.slice(off + ENTRY_LEN, seg_len)?;
        let seg = std::str::from_utf8(seg_bytes)
            .map_err(|_| ImageError::Invalid("path segment is not UTF-8"))?;

        let obj = Self {
            fs,
            offset,
            parent,
            word,
            seg,
            opts,
        };

        // The body must fit inside the image as well.
        let body_len = if obj.is_dir() {
            obj.child_count() as usize * 4
        } else if obj.is_compressed() {
            16
        } else {
            8
        };
        fs.slice(obj.body_off(), body_len)?;

        Ok(obj)
    }

    fn body_off(&self) -> usize {
        align_up(self.offset as usize + ENTRY_LEN + self.seg.len(), self.fs.alignment())
    }

    // ── Prefix fields ───────────────────────────────────────────────────────

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn parent_offset(&self) -> u32 {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent == 0
    }

    /// This object's own path component, without separators. Empty for the
    /// root.
    pub fn segment(&self) -> &'fs str {
        self.seg
    }

    pub fn is_dir(&self) -> bool {
        self.word < FILE_SENTINEL
    }

    pub fn is_file(&self) -> bool {
        self.word >= FILE_SENTINEL
    }

    pub fn is_compressed(&self) -> bool {
        self.word > FILE_SENTINEL
    }

    pub fn kind(&self) -> ObjectKind {
        if self.is_dir() {
            ObjectKind::Dir
        } else {
            ObjectKind::File
        }
    }

    /// Compression of a file object; `None` for directories and plain files.
    pub fn compression(&self) -> Compression {
        if self.is_compressed() {
            Compression::from_id((self.word & 0x00FF) as u8)
        } else {
            Compression::None
        }
    }

    // ── Directory body ──────────────────────────────────────────────────────

    /// Number of children; zero for files.
    pub fn child_count(&self) -> u16 {
        if self.is_dir() {
            self.word
        } else {
            0
        }
    }

    /// Child `i` of a directory, in stored (lexicographic) order.
    pub fn child(&self, i: u16) -> Result<Object<'fs>, ImageError> {
        if !self.is_dir() {
            return Err(ImageError::Invalid("not a directory"));
        }
        if i >= self.word {
            return Err(ImageError::Invalid("child index out of range"));
        }
        let slot = self.fs.slice(self.body_off() + i as usize * 4, 4)?;
        self.fs.object_at(LittleEndian::read_u32(slot))
    }

    // ── File body ───────────────────────────────────────────────────────────

    /// Parse the file body of this object.
    pub fn file_record(&self) -> Result<FileRecord<'fs>, ImageError> {
        if !self.is_file() {
            return Err(ImageError::Invalid("not a file"));
        }
        let body = self.body_off();
        let compression = self.compression();

        let head = self.fs.slice(body, 8)?;
        let data_offset = LittleEndian::read_u32(&head[0..4]);
        let data_size = LittleEndian::read_u32(&head[4..8]);
        let real_size = if self.is_compressed() {
            // compressed_size repeats data_size; the expanded length follows.
            let tail = self.fs.slice(body + 8, 8)?;
            LittleEndian::read_u32(&tail[4..8])
        } else {
            data_size
        };

        let data = self.fs.slice(data_offset as usize, data_size as usize)?;
        Ok(FileRecord {
            compression,
            opts: self.opts,
            data_offset,
            data_size,
            real_size,
            data,
        })
    }

    // ── Derived ─────────────────────────────────────────────────────────────

    /// Stat without opening a handle.
    pub fn stat(&self) -> Result<FrogStat, ImageError> {
        if self.is_dir() {
            return Ok(FrogStat {
                kind: ObjectKind::Dir,
                size: 0,
                size_compressed: None,
                compression: Compression::None,
            });
        }
        let rec = self.file_record()?;
        Ok(FrogStat {
            kind: ObjectKind::File,
            size: rec.real_size as u64,
            size_compressed: self
                .is_compressed()
                .then_some(rec.data_size as u64),
            compression: rec.compression,
        })
    }

    /// Reconstruct the full path by climbing parent offsets; segments are
    /// stored per-object, so this is the only place whole paths exist.
    pub fn full_path(&self) -> Result<String, ImageError> {
        let mut parts: Vec<&str> = Vec::new();
        let mut cur = *self;
        let mut depth = 0usize;
        while !cur.is_root() {
            parts.push(cur.segment());
            depth += 1;
            if depth > self.fs.header().num_entries as usize {
                return Err(ImageError::Invalid("parent chain does not terminate"));
            }
            cur = self.fs.object_at(cur.parent_offset())?;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }
}

impl std::fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("offset", &self.offset)
            .field("parent", &self.parent)
            .field("kind", &self.kind())
            .field("segment", &self.seg)
            .finish()
    }
}
