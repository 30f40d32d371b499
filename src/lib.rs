//! # frogfs — read-only memory-resident archive filesystem
//!
//! Format guarantees (frozen for major version 1):
//! - All numeric fields are little-endian; offsets are relative to the blob
//! - The hash table is sorted ascending by djb2 hash of the full path
//! - Objects and file data are aligned to `2^align_exp` byte boundaries
//! - A directory/file discriminant shares one 16-bit slot: values below
//!   0xFF00 are child counts, 0xFF00 is an uncompressed file, and larger
//!   values carry the compression algorithm id in the low byte
//! - The footer is a CRC-32 of the whole image; verification is opt-in
//! - The image is never written to; mutation happens only in the optional
//!   overlay directory, which shadows image paths transparently
//!
//! The typical flow: hand a blob to [`FrogFs`], resolve a path to an
//! [`Object`], open a [`FileHandle`] (which picks a decompressor from the
//! object's algorithm id), then read/seek/tell. [`Mount`] layers a
//! POSIX-shaped surface with a bounded handle table and the overlay on top.

pub mod image;
pub mod object;
pub mod dir;
pub mod decomp;
pub mod file;
pub mod vfs;

// Flat re-exports for the most common types.
pub use image::{BlobProvider, FrogFs, FsConfig, Header, HashEntry, ImageError,
                hash_path, FROGFS_MAGIC, VER_MAJOR, VER_MINOR};
pub use object::{Compression, FrogStat, Object, ObjectKind};
pub use dir::{DirHandle, MAX_FLAT_DEPTH};
pub use decomp::{DecompError, Decompressor};
pub use file::{FileError, FileHandle, OpenFlags};
pub use vfs::{DirEntry, Fd, Mount, MountConfig, MountDir, VfsError, VfsStat,
              Whence};
