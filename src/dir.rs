//! Directory enumeration.
//!
//! A [`DirHandle`] is a cursor over one directory's dense child array, with
//! tell/seek/rewind. In flat mode it instead walks the whole subtree
//! depth-first through a bounded stack of cursors and yields only files —
//! the view a single-level asset listing wants.

use log::warn;

use crate::image::ImageError;
use crate::object::Object;

/// Maximum directory nesting a flat traversal descends into.
pub const MAX_FLAT_DEPTH: usize = 8;

/// Cursor over a directory's children.
pub struct DirHandle<'fs> {
    dir: Object<'fs>,
    flat: bool,
    /// Child index, plain mode.
    index: u16,
    /// Descent stack of `(directory, next child index)`, flat mode.
    stack: Vec<(Object<'fs>, u16)>,
    /// Files yielded so far, flat mode.
    emitted: u16,
}

impl<'fs> DirHandle<'fs> {
    /// Open an enumerator over `dir`.
    ///
    /// With `flat` set, iteration descends into subdirectories (up to
    /// [`MAX_FLAT_DEPTH`] levels) and yields only file objects.
    pub fn new(dir: Object<'fs>, flat: bool) -> Result<Self, ImageError> {
        if !dir.is_dir() {
            return Err(ImageError::Invalid("not a directory"));
        }
        let mut handle = Self {
            dir,
            flat,
            index: 0,
            stack: Vec::new(),
            emitted: 0,
        };
        if flat {
            handle.stack.push((dir, 0));
        }
        Ok(handle)
    }

    /// The next entry, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<Object<'fs>>, ImageError> {
        if self.flat {
            return self.next_flat();
        }
        if self.index >= self.dir.child_count() {
            return Ok(None);
        }
        let child = self.dir.child(self.index)?;
        self.index += 1;
        Ok(Some(child))
    }

    fn next_flat(&mut self) -> Result<Option<Object<'fs>>, ImageError> {
        loop {
            let Some((dir, index)) = self.stack.last_mut() else {
                return Ok(None);
            };
            if *index >= dir.child_count() {
                self.stack.pop();
                continue;
            }
            let child = dir.child(*index)?;
            *index += 1;

            if child.is_dir() {
                if self.stack.len() < MAX_FLAT_DEPTH {
                    self.stack.push((child, 0));
                } else {
                    warn!(
                        "flat traversal depth limit {MAX_FLAT_DEPTH} reached, skipping {:?}",
                        child.segment()
                    );
                }
                continue;
            }

            self.emitted += 1;
            return Ok(Some(child));
        }
    }

    /// Restart from the first entry.
    pub fn rewind(&mut self) {
        self.index = 0;
        self.emitted = 0;
        if self.flat {
            self.stack.clear();
            self.stack.push((self.dir, 0));
        }
    }

    /// Current position: entries yielded so far.
    pub fn tell(&self) -> u16 {
        if self.flat {
            self.emitted
        } else {
            self.index
        }
    }

    /// Position the cursor so the next entry is number `pos`.
    ///
    /// In plain mode `pos` must not exceed the child count. Flat mode
    /// replays the traversal; seeking past the end stops there.
    pub fn seek(&mut self, pos: u16) -> Result<(), ImageError> {
        if !self.flat {
            if pos > self.dir.child_count() {
                return Err(ImageError::Invalid("child index out of range"));
            }
            self.index = pos;
            return Ok(());
        }
        self.rewind();
        while self.emitted < pos {
            if self.next_flat()?.is_none() {
                break;
            }
        }
        Ok(())
    }
}
