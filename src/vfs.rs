//! Overlay-aware mount layer.
//!
//! A [`Mount`] exposes a POSIX-shaped surface over one image plus an
//! optional overlay directory on the host filesystem. The overlay is
//! consulted first on every path operation, so a mutable file shadows its
//! immutable counterpart transparently; mutating operations require the
//! overlay and never touch the image. Open handles live in a fixed-size
//! slot table — resource usage is bounded at mount time, nothing grows.
//!
//! A mount is a first-class value owned by the caller; operations take
//! `&mut self`, so shared use behind a mutex serializes the slot table the
//! way the design requires.

use std::cmp::Ordering;
use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, trace};
use thiserror::Error;

use crate::decomp::DecompError;
use crate::dir::DirHandle;
use crate::file::{FileError, FileHandle, OpenFlags};
use crate::image::{segments, FrogFs, ImageError, FROGFS_MAGIC};
use crate::object::{Compression, Object, ObjectKind};

/// Handle index into a mount's slot table.
pub type Fd = usize;

/// Seek origin for [`Mount::lseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Copy buffer for overlay materialization.
const COPY_CHUNK: usize = 512;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,
    /// Mutation against the immutable image, or an overlay-only operation
    /// on a mount without an overlay.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    #[error("no free file handle slots")]
    TooManyOpenFiles,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Decomp(#[from] DecompError),
    /// Overlay I/O passthrough.
    #[error("overlay I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FileError> for VfsError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Image(e) => VfsError::Image(e),
            FileError::Decomp(e) => VfsError::Decomp(e),
        }
    }
}

/// Maps overlay errors, turning missing-file into the common taxonomy
/// entry instead of an I/O passthrough.
fn io_err(e: io::Error) -> VfsError {
    if e.kind() == io::ErrorKind::NotFound {
        VfsError::NotFound
    } else {
        VfsError::Io(e)
    }
}

/// Mount-time configuration.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Mount point label; operation paths are relative to the mount.
    pub base_path: String,
    /// Host directory that shadows the image when set.
    pub overlay_path: Option<PathBuf>,
    /// Slot table size; fixed for the mount's lifetime.
    pub max_files: usize,
    /// Flattened directory view: only the root opens as a directory and
    /// enumerates every file in the image.
    pub flat: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            base_path: "/".into(),
            overlay_path: None,
            max_files: 8,
            flat: false,
        }
    }
}

/// Stat result surfaced by the mount.
///
/// `magic` is [`FROGFS_MAGIC`] for image-backed entries and zero for
/// overlay entries, so clients can tell compressed image payloads apart
/// and stream them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsStat {
    pub kind: ObjectKind,
    pub size: u64,
    pub magic: u32,
    pub compression: Compression,
    pub size_compressed: Option<u64>,
}

enum Slot<'fs> {
    Empty,
    Overlay(File),
    Image(FileHandle<'fs>),
}

/// One mounted filesystem: image, optional overlay, slot table.
pub struct Mount<'fs> {
    fs: &'fs FrogFs<'fs>,
    base_path: String,
    overlay: Option<PathBuf>,
    flat: bool,
    slots: Vec<Slot<'fs>>,
}

impl<'fs> Mount<'fs> {
    pub fn new(fs: &'fs FrogFs<'fs>, config: MountConfig) -> Self {
        debug!(
            "mount {} ({} slots, overlay {:?}, flat {})",
            config.base_path, config.max_files, config.overlay_path, config.flat
        );
        Self {
            fs,
            base_path: config.base_path,
            overlay: config.overlay_path,
            flat: config.flat,
            slots: (0..config.max_files).map(|_| Slot::Empty).collect(),
        }
    }

    pub fn fs(&self) -> &'fs FrogFs<'fs> {
        self.fs
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn overlay_path(&self) -> Option<&PathBuf> {
        self.overlay.as_ref()
    }

    pub fn max_files(&self) -> usize {
        self.slots.len()
    }

    pub fn is_flat(&self) -> bool {
        self.flat
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// The overlay location of `path`, normalized segment by segment.
    fn overlay_join(&self, path: &str) -> Option<PathBuf> {
        self.overlay.as_ref().map(|root| {
            let mut joined = root.clone();
            for seg in segments(path) {
                joined.push(seg);
            }
            joined
        })
    }

    fn slot_mut(&mut self, fd: Fd) -> Result<&mut Slot<'fs>, VfsError> {
        self.slots
            .get_mut(fd)
            .ok_or(VfsError::InvalidArgument("bad file descriptor"))
    }

    fn require_overlay(&self, path: &str) -> Result<PathBuf, VfsError> {
        self.overlay_join(path)
            .ok_or(VfsError::NotSupported("no overlay configured"))
    }

    fn lookup_file(&self, path: &str) -> Result<Object<'fs>, VfsError> {
        let obj = self.fs.lookup(path)?.ok_or(VfsError::NotFound)?;
        if obj.is_dir() {
            return Err(VfsError::InvalidArgument("is a directory"));
        }
        Ok(obj)
    }

    /// Copy the first `limit` decompressed bytes of `obj` into a newly
    /// created overlay file, then size it to exactly `limit`. Partial files
    /// are removed on failure.
    fn materialize(&self, obj: Object<'fs>, dest: &Path, limit: u64) -> Result<File, VfsError> {
        let result = (|| -> Result<File, VfsError> {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(dest)?;
            let mut handle = FileHandle::open(obj, OpenFlags::empty())?;
            let mut remaining = limit.min(handle.size());
            let mut buf = [0u8; COPY_CHUNK];
            while remaining > 0 {
                let want = remaining.min(COPY_CHUNK as u64) as usize;
                let got = handle.read(&mut buf[..want])?;
                if got == 0 {
                    break;
                }
                out.write_all(&buf[..got])?;
                remaining -= got as u64;
            }
            out.set_len(limit)?;
            Ok(out)
        })();
        if result.is_err() {
            let _ = fs::remove_file(dest);
        }
        result
    }

    // ── Handle operations ────────────────────────────────────────────────────

    /// Open `path`. The overlay wins when it can satisfy the request; write
    /// intent that the overlay cannot satisfy fails rather than falling
    /// through to the immutable image.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<Fd, VfsError> {
        let fd = self
            .slots
            .iter()
            .position(|s| matches!(s, Slot::Empty))
            .ok_or(VfsError::TooManyOpenFiles)?;

        let write_intent = flags.intersects(
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::APPEND,
        );

        if let Some(opath) = self.overlay_join(path) {
            let mut opts = OpenOptions::new();
            opts.read(true);
            if write_intent {
                opts.write(true);
            }
            if flags.contains(OpenFlags::CREATE) {
                opts.create(true);
            }
            if flags.contains(OpenFlags::TRUNCATE) {
                opts.truncate(true);
            }
            if flags.contains(OpenFlags::APPEND) {
                opts.append(true);
            }
            match opts.open(&opath) {
                Ok(file) => {
                    trace!("open {path:?} -> overlay fd {fd}");
                    self.slots[fd] = Slot::Overlay(file);
                    return Ok(fd);
                }
                Err(e) if write_intent => return Err(io_err(e)),
                Err(_) => {}
            }
        } else if write_intent {
            return Err(VfsError::NotSupported("image is read-only"));
        }

        let obj = self.lookup_file(path)?;
        let handle = FileHandle::open(obj, flags)?;
        trace!("open {path:?} -> image fd {fd}");
        self.slots[fd] = Slot::Image(handle);
        Ok(fd)
    }

    pub fn close(&mut self, fd: Fd) -> Result<(), VfsError> {
        let slot = self.slot_mut(fd)?;
        if matches!(slot, Slot::Empty) {
            return Err(VfsError::InvalidArgument("bad file descriptor"));
        }
        *slot = Slot::Empty;
        Ok(())
    }

    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize, VfsError> {
        match self.slot_mut(fd)? {
            Slot::Empty => Err(VfsError::InvalidArgument("bad file descriptor")),
            Slot::Overlay(file) => Ok(file.read(buf)?),
            Slot::Image(handle) => Ok(handle.read(buf)?),
        }
    }

    /// Write to an overlay-backed handle; the image is never writable.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, VfsError> {
        match self.slot_mut(fd)? {
            Slot::Empty => Err(VfsError::InvalidArgument("bad file descriptor")),
            Slot::Overlay(file) => Ok(file.write(buf)?),
            Slot::Image(_) => Err(VfsError::NotSupported("image is read-only")),
        }
    }

    pub fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> Result<u64, VfsError> {
        let pos = match whence {
            Whence::Set => {
                if offset < 0 {
                    return Err(VfsError::InvalidArgument("negative absolute offset"));
                }
                SeekFrom::Start(offset as u64)
            }
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        match self.slot_mut(fd)? {
            Slot::Empty => Err(VfsError::InvalidArgument("bad file descriptor")),
            Slot::Overlay(file) => Ok(file.seek(pos)?),
            Slot::Image(handle) => Ok(handle.seek(pos)?),
        }
    }

    pub fn fstat(&mut self, fd: Fd) -> Result<VfsStat, VfsError> {
        match self.slot_mut(fd)? {
            Slot::Empty => Err(VfsError::InvalidArgument("bad file descriptor")),
            Slot::Overlay(file) => {
                let md = file.metadata()?;
                Ok(VfsStat {
                    kind: if md.is_dir() {
                        ObjectKind::Dir
                    } else {
                        ObjectKind::File
                    },
                    size: md.len(),
                    magic: 0,
                    compression: Compression::None,
                    size_compressed: None,
                })
            }
            Slot::Image(handle) => {
                let st = handle.stat();
                Ok(VfsStat {
                    kind: st.kind,
                    // RAW handles stream the stored bytes, so report those.
                    size: handle.size(),
                    magic: FROGFS_MAGIC,
                    compression: st.compression,
                    size_compressed: st.size_compressed,
                })
            }
        }
    }

    /// Reopen a compressed image handle in `RAW` mode in place; the stream
    /// position resets to zero.
    pub fn reopen_raw(&mut self, fd: Fd) -> Result<(), VfsError> {
        match self.slot_mut(fd)? {
            Slot::Image(handle) => Ok(handle.reopen_raw()?),
            _ => Err(VfsError::InvalidArgument("not an image handle")),
        }
    }

    // ── Path operations ──────────────────────────────────────────────────────

    pub fn stat(&self, path: &str) -> Result<VfsStat, VfsError> {
        if let Some(opath) = self.overlay_join(path) {
            match fs::metadata(&opath) {
                Ok(md) => {
                    return Ok(VfsStat {
                        kind: if md.is_dir() {
                            ObjectKind::Dir
                        } else {
                            ObjectKind::File
                        },
                        size: md.len(),
                        magic: 0,
                        compression: Compression::None,
                        size_compressed: None,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(VfsError::Io(e)),
            }
        }

        let obj = self.fs.lookup(path)?.ok_or(VfsError::NotFound)?;
        let st = obj.stat()?;
        Ok(VfsStat {
            kind: st.kind,
            size: st.size,
            magic: FROGFS_MAGIC,
            compression: st.compression,
            size_compressed: st.size_compressed,
        })
    }

    // ── Overlay-required mutations ───────────────────────────────────────────

    pub fn mkdir(&self, path: &str) -> Result<(), VfsError> {
        let opath = self.require_overlay(path)?;
        fs::create_dir(opath).map_err(io_err)
    }

    pub fn rmdir(&self, path: &str) -> Result<(), VfsError> {
        let opath = self.require_overlay(path)?;
        fs::remove_dir(opath).map_err(io_err)
    }

    pub fn unlink(&self, path: &str) -> Result<(), VfsError> {
        let opath = self.require_overlay(path)?;
        fs::remove_file(opath).map_err(io_err)
    }

    pub fn link(&self, existing: &str, new: &str) -> Result<(), VfsError> {
        let oexisting = self.require_overlay(existing)?;
        let onew = self.require_overlay(new)?;
        fs::hard_link(oexisting, onew).map_err(io_err)
    }

    /// Rename inside the overlay. An image-only source is copied out to the
    /// overlay destination instead (the image itself cannot change).
    pub fn rename(&self, src: &str, dst: &str) -> Result<(), VfsError> {
        let osrc = self.require_overlay(src)?;
        let odst = self.require_overlay(dst)?;

        if osrc.symlink_metadata().is_ok() {
            return fs::rename(osrc, odst).map_err(io_err);
        }

        let obj = self.lookup_file(src)?;
        let size = obj.stat()?.size;
        self.materialize(obj, &odst, size)?;
        Ok(())
    }

    /// Truncate `path` to `length` bytes.
    ///
    /// An image-backed path is first materialized copy-on-write into the
    /// overlay; the image stays untouched and subsequent operations see the
    /// overlay copy.
    pub fn truncate(&self, path: &str, length: u64) -> Result<(), VfsError> {
        let opath = self.require_overlay(path)?;

        match fs::metadata(&opath) {
            Ok(_) => {
                let file = OpenOptions::new().write(true).open(&opath)?;
                file.set_len(length)?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let obj = self.lookup_file(path)?;
                debug!("copy-on-write truncate of {path:?} to {length} bytes");
                self.materialize(obj, &opath, length)?;
                Ok(())
            }
            Err(e) => Err(VfsError::Io(e)),
        }
    }

    /// Truncate an open handle to `length` bytes.
    ///
    /// An image-backed handle is materialized into the overlay and the
    /// handle switches to the overlay descriptor mid-life, keeping its
    /// stream position.
    pub fn ftruncate(&mut self, fd: Fd, length: u64) -> Result<(), VfsError> {
        if fd >= self.slots.len() {
            return Err(VfsError::InvalidArgument("bad file descriptor"));
        }
        // Take the slot out so the handle can be consumed or put back
        // depending on how materialization goes.
        match std::mem::replace(&mut self.slots[fd], Slot::Empty) {
            Slot::Empty => Err(VfsError::InvalidArgument("bad file descriptor")),
            Slot::Overlay(file) => {
                let result = file.set_len(length);
                self.slots[fd] = Slot::Overlay(file);
                Ok(result?)
            }
            Slot::Image(mut handle) => {
                let result = self.ftruncate_image(&mut handle, length);
                match result {
                    Ok(out) => {
                        self.slots[fd] = Slot::Overlay(out);
                        Ok(())
                    }
                    Err(e) => {
                        self.slots[fd] = Slot::Image(handle);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Materialize an image handle's first `length` bytes into the overlay
    /// and return the overlay descriptor positioned where the handle was.
    fn ftruncate_image(
        &self,
        handle: &mut FileHandle<'fs>,
        length: u64,
    ) -> Result<File, VfsError> {
        if self.overlay.is_none() {
            return Err(VfsError::NotSupported("no overlay configured"));
        }
        let path = handle.object().full_path()?;
        let dest = self.overlay_join(&path).expect("overlay checked above");
        let old_pos = handle.tell();
        debug!("copy-on-write ftruncate of {path:?} to {length} bytes");

        let result = (|| -> Result<File, VfsError> {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)?;
            handle.seek(SeekFrom::Start(0))?;
            let mut remaining = length.min(handle.size());
            let mut buf = [0u8; COPY_CHUNK];
            while remaining > 0 {
                let want = remaining.min(COPY_CHUNK as u64) as usize;
                let got = handle.read(&mut buf[..want])?;
                if got == 0 {
                    break;
                }
                out.write_all(&buf[..got])?;
                remaining -= got as u64;
            }
            out.set_len(length)?;
            out.seek(SeekFrom::Start(old_pos))?;
            Ok(out)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&dest);
            let _ = handle.seek(SeekFrom::Start(old_pos));
        }
        result
    }

    /// Set access and modification times on an overlay file.
    pub fn utime(
        &self,
        path: &str,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> Result<(), VfsError> {
        let opath = self.require_overlay(path)?;
        let file = OpenOptions::new().write(true).open(&opath).map_err(io_err)?;
        file.set_times(
            FileTimes::new()
                .set_accessed(accessed)
                .set_modified(modified),
        )
        .map_err(io_err)
    }

    // ── Directory operations ─────────────────────────────────────────────────

    /// Open a directory for enumeration; entries from the overlay and the
    /// image are merged lexicographically with overlay names shadowing
    /// image names. Closing is dropping the returned handle.
    pub fn opendir(&self, path: &str) -> Result<MountDir<'fs>, VfsError> {
        let overlay = match self.overlay_join(path) {
            Some(opath) => match fs::read_dir(&opath) {
                Ok(iter) => {
                    let mut entries = Vec::new();
                    for entry in iter {
                        let entry = entry?;
                        let kind = if entry.file_type()?.is_dir() {
                            ObjectKind::Dir
                        } else {
                            ObjectKind::File
                        };
                        entries.push(DirEntry {
                            name: entry.file_name().to_string_lossy().into_owned(),
                            kind,
                        });
                    }
                    entries.sort_by(|a, b| a.name.cmp(&b.name));
                    Some(entries)
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) if e.kind() == io::ErrorKind::NotADirectory => None,
                Err(e) => return Err(VfsError::Io(e)),
            },
            None => None,
        };

        let image = if self.flat {
            if segments(path).next().is_some() {
                return Err(VfsError::NotSupported(
                    "only the root opens as a directory on a flat mount",
                ));
            }
            Some(DirHandle::new(self.fs.root()?, true)?)
        } else {
            match self.fs.lookup(path)? {
                Some(obj) if obj.is_dir() => Some(DirHandle::new(obj, false)?),
                Some(_) if overlay.is_none() => {
                    return Err(VfsError::InvalidArgument("not a directory"));
                }
                Some(_) => None,
                None if overlay.is_none() => return Err(VfsError::NotFound),
                None => None,
            }
        };

        Ok(MountDir {
            overlay,
            ov_pos: 0,
            image,
            flat: self.flat,
            pending_image: None,
            offset: 0,
        })
    }
}

/// One directory entry as surfaced by [`MountDir::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name: one path component, or the full path on flat mounts.
    pub name: String,
    pub kind: ObjectKind,
}

/// An open directory stream over the merged overlay and image views.
pub struct MountDir<'fs> {
    overlay: Option<Vec<DirEntry>>,
    ov_pos: usize,
    image: Option<DirHandle<'fs>>,
    flat: bool,
    pending_image: Option<DirEntry>,
    offset: u64,
}

impl MountDir<'_> {
    /// The next entry in lexicographic order, or `None` at the end.
    /// Overlay entries shadow image entries of the same name.
    pub fn readdir(&mut self) -> Result<Option<DirEntry>, VfsError> {
        if self.pending_image.is_none() {
            if let Some(handle) = &mut self.image {
                if let Some(obj) = handle.next()? {
                    let name = if self.flat {
                        obj.full_path()?
                    } else {
                        obj.segment().to_string()
                    };
                    self.pending_image = Some(DirEntry {
                        name,
                        kind: obj.kind(),
                    });
                }
            }
        }

        let ov_entry = self
            .overlay
            .as_ref()
            .and_then(|v| v.get(self.ov_pos))
            .cloned();

        let out = match (ov_entry, self.pending_image.as_ref()) {
            (None, None) => return Ok(None),
            (Some(o), None) => {
                self.ov_pos += 1;
                o
            }
            (None, Some(_)) => self.pending_image.take().expect("pending entry present"),
            (Some(o), Some(i)) => match o.name.cmp(&i.name) {
                Ordering::Less => {
                    self.ov_pos += 1;
                    o
                }
                Ordering::Greater => self.pending_image.take().expect("pending entry present"),
                Ordering::Equal => {
                    // Overlay shadows the image entry of the same name.
                    self.ov_pos += 1;
                    self.pending_image = None;
                    o
                }
            },
        };

        self.offset += 1;
        Ok(Some(out))
    }

    /// Entries emitted so far.
    pub fn telldir(&self) -> u64 {
        self.offset
    }

    /// Restart the merged enumeration.
    pub fn rewinddir(&mut self) {
        self.ov_pos = 0;
        self.pending_image = None;
        self.offset = 0;
        if let Some(handle) = &mut self.image {
            handle.rewind();
        }
    }

    /// Position so the next entry is number `pos`, replaying the merge.
    pub fn seekdir(&mut self, pos: u64) -> Result<(), VfsError> {
        self.rewinddir();
        while self.offset < pos {
            if self.readdir()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}
