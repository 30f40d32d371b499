//! Image reader — format anchor over a caller-provided blob.
//!
//! # On-disk layout (all fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic        = 0x474F5246  ("FROG", LE u32)
//!    4      1   ver_major    = 1
//!    5      1   ver_minor
//!    6      2   num_entries  object count, including the root
//!    8      4   bin_size     total image size in bytes, footer included
//!   12      1   header_len   = 14 for this layout
//!   13      1   align_exp    object/data alignment is 2^align_exp bytes
//!   ...    ...  zero padding to the alignment boundary
//! ```
//!
//! The hash table follows at `align_up(header_len)`: `num_entries` rows of
//! `{ hash: u32, offset: u32 }`, sorted ascending by hash. Object records
//! are packed after it (see [`crate::object`]); the last four bytes of the
//! image are a CRC-32 of everything before them.
//!
//! # Validation
//! Construction checks magic, major version, bounds, alignment sanity and
//! hash-table ordering, and optionally the footer CRC-32. Failure leaves no
//! partial state. Every accessor afterwards is a bounds-checked slice
//! projection — nothing is copied out of the blob.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};
use thiserror::Error;

use crate::object::Object;

/// On-disk magic. "FROG" as a LE u32.
pub const FROGFS_MAGIC: u32 = 0x474F_5246;

/// Major format version this build reads.
pub const VER_MAJOR: u8 = 1;

/// Minor format version this build was written against.
pub const VER_MINOR: u8 = 0;

/// Fixed byte size of the image header, before alignment padding.
pub const HEADER_LEN: usize = 14;

/// Byte size of one hash table row.
pub const HASH_ENTRY_LEN: usize = 8;

/// Largest accepted alignment exponent (64 KiB boundaries).
const MAX_ALIGN_EXP: u8 = 16;

#[derive(Error, Debug)]
pub enum ImageError {
    /// The blob is not a frogfs image, or its structure is inconsistent.
    #[error("invalid image: {0}")]
    Invalid(&'static str),
    /// The image was produced by a major version this build does not read.
    #[error("unsupported image version {found_major}.{found_minor} (this build reads v{VER_MAJOR}.x)")]
    Version { found_major: u8, found_minor: u8 },
    /// A projection would run past the end of the image.
    #[error("image truncated: {0}")]
    Truncated(&'static str),
}

/// Yields the contiguous read-only byte region holding an image.
///
/// The in-memory case is a plain slice; a platform that memory-maps a flash
/// partition implements this on its mapping guard and releases the range on
/// drop.
pub trait BlobProvider {
    fn blob(&self) -> &[u8];
}

impl BlobProvider for [u8] {
    fn blob(&self) -> &[u8] {
        self
    }
}

impl BlobProvider for Vec<u8> {
    fn blob(&self) -> &[u8] {
        self
    }
}

impl BlobProvider for Box<[u8]> {
    fn blob(&self) -> &[u8] {
        self
    }
}

/// Load-time options.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsConfig {
    /// Verify the footer CRC-32 over the whole image during construction.
    pub verify_checksum: bool,
}

/// Parsed image header.
#[derive(Debug, Clone)]
pub struct Header {
    pub magic: u32,
    pub ver_major: u8,
    pub ver_minor: u8,
    pub num_entries: u16,
    pub bin_size: u32,
    pub header_len: u8,
    pub align_exp: u8,
}

/// One row of the sorted hash table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub hash: u32,
    pub offset: u32,
}

/// A validated, immutable filesystem image.
///
/// Borrows the blob for `'a`; all objects, handles and mounts derived from
/// it are views tied to that borrow.
pub struct FrogFs<'a> {
    image: &'a [u8],
    header: Header,
    align: usize,
    hash_off: usize,
    objects_off: usize,
}

// Returns the current or next highest multiple of the power-of-two `align`.
pub(crate) fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

#[inline]
fn djb2_step(hash: u32, byte: u8) -> u32 {
    // hash = hash * 33 ^ byte
    hash.wrapping_shl(5).wrapping_add(hash) ^ byte as u32
}

/// Path components of `path`, empty segments dropped.
///
/// Skipping empty segments strips leading slashes and collapses duplicate
/// and trailing ones, so `"//a/b/"` and `"a/b"` walk identically.
pub(crate) fn segments(path: &str) -> impl DoubleEndedIterator<Item = &str> + Clone {
    path.split('/').filter(|s| !s.is_empty())
}

/// djb2 hash of a path after normalization, as stored in the hash table.
///
/// The hash folds over the canonical spelling (segments joined by single
/// slashes, no leading slash) without materializing it.
pub fn hash_path(path: &str) -> u32 {
    let mut hash: u32 = 5381;
    let mut first = true;
    for seg in segments(path) {
        if !first {
            hash = djb2_step(hash, b'/');
        }
        first = false;
        for &b in seg.as_bytes() {
            hash = djb2_step(hash, b);
        }
    }
    hash
}

impl<'a> FrogFs<'a> {
    /// Validate `blob` as a frogfs image with default options.
    pub fn new(blob: &'a [u8]) -> Result<Self, ImageError> {
        Self::with_config(blob, FsConfig::default())
    }

    /// Validate `blob` from a provider with default options.
    pub fn from_provider<P: BlobProvider + ?Sized>(provider: &'a P) -> Result<Self, ImageError> {
        Self::new(provider.blob())
    }

    /// Validate `blob` as a frogfs image.
    ///
    /// Checks, in order: header presence, magic, major version, declared
    /// size against the blob, alignment sanity, hash-table bounds and
    /// ordering, and (when [`FsConfig::verify_checksum`] is set) the footer
    /// CRC-32. Any failure aborts construction.
    pub fn with_config(blob: &'a [u8], config: FsConfig) -> Result<Self, ImageError> {
        if blob.len() < HEADER_LEN {
            return Err(ImageError::Truncated("blob shorter than the header"));
        }

        let magic = LittleEndian::read_u32(&blob[0..4]);
        if magic != FROGFS_MAGIC {
            return Err(ImageError::Invalid("magic not found"));
        }

        let ver_major = blob[4];
        let ver_minor = blob[5];
        if ver_major != VER_MAJOR {
            return Err(ImageError::Version {
                found_major: ver_major,
                found_minor: ver_minor,
            });
        }

        let num_entries = LittleEndian::read_u16(&blob[6..8]);
        let bin_size = LittleEndian::read_u32(&blob[8..12]);
        let header_len = blob[12];
        let align_exp = blob[13];

        if (header_len as usize) < HEADER_LEN {
            return Err(ImageError::Invalid("declared header length too small"));
        }
        if align_exp > MAX_ALIGN_EXP {
            return Err(ImageError::Invalid("alignment exponent out of range"));
        }
        let align = 1usize << align_exp;

        let bin_size_us = bin_size as usize;
        if bin_size_us > blob.len() {
            return Err(ImageError::Truncated("declared size exceeds the blob"));
        }
        if bin_size_us < HEADER_LEN + 4 {
            return Err(ImageError::Truncated("declared size smaller than header and footer"));
        }
        let image = &blob[..bin_size_us];

        let hash_off = align_up(header_len as usize, align);
        let table_len = num_entries as usize * HASH_ENTRY_LEN;
        let table_end = hash_off
            .checked_add(table_len)
            .ok_or(ImageError::Truncated("hash table overflows the image"))?;
        // The footer must still fit behind the table.
        if table_end + 4 > image.len() {
            return Err(ImageError::Truncated("hash table overflows the image"));
        }
        let objects_off = align_up(table_end, align);

        if config.verify_checksum {
            let stored = LittleEndian::read_u32(&image[image.len() - 4..]);
            let actual = crc32fast::hash(&image[..image.len() - 4]);
            if stored != actual {
                debug!("footer CRC-32 mismatch: stored {stored:#010x}, computed {actual:#010x}");
                return Err(ImageError::Invalid("footer CRC-32 mismatch"));
            }
        }

        let fs = Self {
            image,
            header: Header {
                magic,
                ver_major,
                ver_minor,
                num_entries,
                bin_size,
                header_len,
                align_exp,
            },
            align,
            hash_off,
            objects_off,
        };

        // Ordering is what makes binary search valid; reject early.
        for i in 1..num_entries as usize {
            if fs.hash_entry_at(i - 1).hash > fs.hash_entry_at(i).hash {
                return Err(ImageError::Invalid("hash table is not sorted"));
            }
        }

        debug!(
            "image v{ver_major}.{ver_minor}: {num_entries} entries, {bin_size} bytes, align {align}"
        );
        Ok(fs)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Object/data alignment in bytes (`2^align_exp`).
    pub fn alignment(&self) -> usize {
        self.align
    }

    /// The validated image bytes (footer included).
    pub fn as_bytes(&self) -> &'a [u8] {
        self.image
    }

    pub(crate) fn objects_off(&self) -> usize {
        self.objects_off
    }

    /// Bounds-checked projection of `len` bytes at `off`.
    pub(crate) fn slice(&self, off: usize, len: usize) -> Result<&'a [u8], ImageError> {
        let end = off
            .checked_add(len)
            .ok_or(ImageError::Truncated("range overflows the image"))?;
        if end > self.image.len() {
            return Err(ImageError::Truncated("range overflows the image"));
        }
        Ok(&self.image[off..end])
    }

    fn hash_entry_at(&self, i: usize) -> HashEntry {
        let off = self.hash_off + i * HASH_ENTRY_LEN;
        HashEntry {
            hash: LittleEndian::read_u32(&self.image[off..off + 4]),
            offset: LittleEndian::read_u32(&self.image[off + 4..off + 8]),
        }
    }

    /// Row `i` of the hash table, or `None` past the end.
    pub fn hash_entry(&self, i: usize) -> Option<HashEntry> {
        (i < self.header.num_entries as usize).then(|| self.hash_entry_at(i))
    }

    /// Iterator over the sorted hash table.
    pub fn hash_entries(&self) -> impl Iterator<Item = HashEntry> + '_ {
        (0..self.header.num_entries as usize).map(|i| self.hash_entry_at(i))
    }

    /// Parse the object record at `offset`.
    pub fn object_at(&self, offset: u32) -> Result<Object<'_>, ImageError> {
        Object::parse(self, offset)
    }

    /// The root directory: the first object after the hash table, whose
    /// parent offset is zero.
    pub fn root(&self) -> Result<Object<'_>, ImageError> {
        let root = self.object_at(self.objects_off as u32)?;
        if !root.is_root() {
            return Err(ImageError::Invalid("root object has a nonzero parent"));
        }
        Ok(root)
    }

    /// The stored bytes of a file object (compressed files yield the
    /// compressed representation).
    pub fn data_range<'s>(&self, object: Object<'s>) -> Result<&'s [u8], ImageError> {
        Ok(object.file_record()?.data)
    }

    // ── Path resolution ─────────────────────────────────────────────────────

    /// Resolve a path to its object.
    ///
    /// `path` is normalized first (leading, duplicate and trailing slashes
    /// are ignored); the empty path resolves to the root directory. Lookup
    /// is a binary search on the hash table followed by an exact comparison
    /// of each same-hash candidate, and performs no heap allocation.
    pub fn lookup(&self, path: &str) -> Result<Option<Object<'_>>, ImageError> {
        let hash = hash_path(path);
        trace!("lookup {path:?} hash {hash:08x}");

        let n = self.header.num_entries as usize;
        let (mut lo, mut hi) = (0usize, n);
        let mut found = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let e = self.hash_entry_at(mid);
            if e.hash < hash {
                lo = mid + 1;
            } else if e.hash > hash {
                hi = mid;
            } else {
                found = Some(mid);
                break;
            }
        }
        let Some(mut i) = found else {
            trace!("no hash match");
            return Ok(None);
        };

        // Rewind to the leftmost entry with this hash, then compare each
        // candidate until the run ends.
        while i > 0 && self.hash_entry_at(i - 1).hash == hash {
            i -= 1;
        }
        let mut collisions = 0;
        while i < n {
            let e = self.hash_entry_at(i);
            if e.hash != hash {
                break;
            }
            let obj = self.object_at(e.offset)?;
            if self.path_matches(obj, path)? {
                if collisions > 0 {
                    debug!("hash collision resolved after {collisions} candidates");
                }
                return Ok(Some(obj));
            }
            collisions += 1;
            i += 1;
        }

        trace!("no object match");
        Ok(None)
    }

    /// Exact comparison of an object's full path against a query, without
    /// materializing either: climbs the parent chain while consuming the
    /// query's segments from the right.
    fn path_matches<'s>(&'s self, obj: Object<'s>, path: &str) -> Result<bool, ImageError> {
        let mut segs = segments(path).rev();
        let mut cur = obj;
        let mut depth = 0usize;
        while !cur.is_root() {
            match segs.next() {
                Some(seg) if seg == cur.segment() => {}
                _ => return Ok(false),
            }
            depth += 1;
            if depth > self.header.num_entries as usize {
                return Err(ImageError::Invalid("parent chain does not terminate"));
            }
            cur = self.object_at(cur.parent_offset())?;
        }
        Ok(segs.next().is_none())
    }
}
