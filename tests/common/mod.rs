//! Shared test fixtures: an in-memory image builder and bit-stream helpers
//! for crafting stored payloads.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;

pub const COMP_NONE: u8 = 0;
pub const COMP_DEFLATE: u8 = 1;
pub const COMP_HEATSHRINK: u8 = 2;

/// Independent reference implementation of the path hash, used both to lay
/// out images and to cross-check the crate's own hashing.
pub fn djb2(path: &str) -> u32 {
    let mut hash: u32 = 5381;
    for &b in path.as_bytes() {
        hash = hash.wrapping_shl(5).wrapping_add(hash) ^ b as u32;
    }
    hash
}

/// zlib-compress a payload the way an image generator stores DEFLATE files.
pub fn zlib_compress(plain: &[u8]) -> Vec<u8> {
    let mut enc =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(plain).unwrap();
    enc.finish().unwrap()
}

// ── Heatshrink stream construction ──────────────────────────────────────────

/// MSB-first bit packer for hand-built heatshrink streams.
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            current: 0,
            used: 0,
        }
    }

    /// Append the low `count` bits of `value`, most significant first.
    pub fn push_bits(&mut self, count: u8, value: u16) {
        for i in (0..count).rev() {
            let bit = (value >> i) & 1;
            self.current = (self.current << 1) | bit as u8;
            self.used += 1;
            if self.used == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.used = 0;
            }
        }
    }

    /// Flush, zero-padding the final partial byte.
    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.current <<= 8 - self.used;
            self.bytes.push(self.current);
        }
        self.bytes
    }
}

/// Encode a payload as an all-literals heatshrink stream (valid for any
/// window/lookahead configuration).
pub fn hs_literals(data: &[u8]) -> Vec<u8> {
    let mut w = BitWriter::new();
    for &b in data {
        w.push_bits(1, 1);
        w.push_bits(8, b as u16);
    }
    w.finish()
}

/// Pack window and lookahead bits into a compression options byte.
pub fn hs_opts(window: u8, lookahead: u8) -> u8 {
    (lookahead << 4) | window
}

// ── Image builder ───────────────────────────────────────────────────────────

const MAGIC: u32 = 0x474F_5246;
const HEADER_LEN: usize = 14;
const FILE_SENTINEL: u16 = 0xFF00;

#[derive(Clone)]
struct FileSpec {
    comp_id: u8,
    opts: u8,
    stored: Vec<u8>,
    real_size: u32,
}

#[derive(Clone)]
enum Node {
    Dir(BTreeMap<String, Node>),
    File(FileSpec),
}

/// Builds byte-exact images: header, sorted hash table, aligned object
/// records, data area, CRC-32 footer.
pub struct ImageBuilder {
    align_exp: u8,
    root: BTreeMap<String, Node>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            align_exp: 2,
            root: BTreeMap::new(),
        }
    }

    pub fn align_exp(mut self, exp: u8) -> Self {
        self.align_exp = exp;
        self
    }

    /// Add an uncompressed file, creating intermediate directories.
    pub fn file(self, path: &str, data: &[u8]) -> Self {
        let spec = FileSpec {
            comp_id: COMP_NONE,
            opts: 0,
            stored: data.to_vec(),
            real_size: data.len() as u32,
        };
        self.insert(path, Node::File(spec))
    }

    /// Add a file with pre-compressed contents.
    pub fn compressed_file(
        self,
        path: &str,
        stored: Vec<u8>,
        real_size: u32,
        comp_id: u8,
        opts: u8,
    ) -> Self {
        let spec = FileSpec {
            comp_id,
            opts,
            stored,
            real_size,
        };
        self.insert(path, Node::File(spec))
    }

    /// Add a DEFLATE-compressed file from its plaintext.
    pub fn deflate_file(self, path: &str, plain: &[u8]) -> Self {
        let stored = zlib_compress(plain);
        self.compressed_file(path, stored, plain.len() as u32, COMP_DEFLATE, 0)
    }

    /// Add a heatshrink-compressed file from its plaintext (stored as an
    /// all-literals stream).
    pub fn heatshrink_file(self, path: &str, plain: &[u8], window: u8, lookahead: u8) -> Self {
        let stored = hs_literals(plain);
        self.compressed_file(
            path,
            stored,
            plain.len() as u32,
            COMP_HEATSHRINK,
            hs_opts(window, lookahead),
        )
    }

    /// Add an (empty) directory explicitly.
    pub fn dir(self, path: &str) -> Self {
        self.insert(path, Node::Dir(BTreeMap::new()))
    }

    fn insert(mut self, path: &str, node: Node) -> Self {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        assert!(!segs.is_empty(), "cannot replace the root");
        let mut cur = &mut self.root;
        for seg in &segs[..segs.len() - 1] {
            let entry = cur
                .entry(seg.to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            match entry {
                Node::Dir(children) => cur = children,
                Node::File(_) => panic!("{seg} is a file, not a directory"),
            }
        }
        cur.insert(segs[segs.len() - 1].to_string(), node);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let align = 1usize << self.align_exp;
        let up = |n: usize| (n + align - 1) & !(align - 1);

        // Flatten breadth-first; BTreeMap iteration keeps each directory's
        // children lexicographic, as generated images are.
        struct Flat {
            path: String,
            seg: String,
            parent: Option<usize>,
            children: Vec<usize>,
            file: Option<FileSpec>,
            offset: usize,
            data_offset: usize,
        }

        let mut objs: Vec<Flat> = vec![Flat {
            path: String::new(),
            seg: String::new(),
            parent: None,
            children: Vec::new(),
            file: None,
            offset: 0,
            data_offset: 0,
        }];
        // Work queue of (object index, directory contents).
        let mut queue: Vec<(usize, BTreeMap<String, Node>)> = vec![(0, self.root)];
        while !queue.is_empty() {
            let (parent_idx, children) = queue.remove(0);
            for (seg, node) in children {
                assert!(seg.len() <= u8::MAX as usize, "path segment too long");
                let idx = objs.len();
                let path = if objs[parent_idx].path.is_empty() {
                    seg.clone()
                } else {
                    format!("{}/{}", objs[parent_idx].path, seg)
                };
                let file = match node {
                    Node::File(spec) => Some(spec),
                    Node::Dir(grand) => {
                        queue.push((idx, grand));
                        None
                    }
                };
                objs.push(Flat {
                    path,
                    seg,
                    parent: Some(parent_idx),
                    children: Vec::new(),
                    file,
                    offset: 0,
                    data_offset: 0,
                });
                objs[parent_idx].children.push(idx);
            }
        }

        let num_entries = objs.len();
        assert!(num_entries < usize::from(u16::MAX), "too many objects");

        // Lay out object records.
        let hash_off = up(HEADER_LEN);
        let mut cursor = up(hash_off + num_entries * 8);
        for obj in objs.iter_mut() {
            obj.offset = cursor;
            let body_off = cursor + up(8 + obj.seg.len());
            let body_len = match &obj.file {
                None => obj.children.len() * 4,
                Some(spec) if spec.comp_id == COMP_NONE => 8,
                Some(_) => 16,
            };
            cursor = up(body_off + body_len);
        }

        // Lay out the data area.
        for obj in objs.iter_mut() {
            if let Some(spec) = &obj.file {
                obj.data_offset = cursor;
                cursor = up(cursor + spec.stored.len());
            }
        }

        let bin_size = cursor + 4;
        let mut image = vec![0u8; bin_size];

        // Header.
        image[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        image[4] = 1;
        image[5] = 0;
        image[6..8].copy_from_slice(&(num_entries as u16).to_le_bytes());
        image[8..12].copy_from_slice(&(bin_size as u32).to_le_bytes());
        image[12] = HEADER_LEN as u8;
        image[13] = self.align_exp;

        // Hash table, sorted ascending.
        let mut table: Vec<(u32, u32)> = objs
            .iter()
            .map(|o| (djb2(&o.path), o.offset as u32))
            .collect();
        table.sort_by_key(|&(hash, offset)| (hash, offset));
        for (i, (hash, offset)) in table.iter().enumerate() {
            let at = hash_off + i * 8;
            image[at..at + 4].copy_from_slice(&hash.to_le_bytes());
            image[at + 4..at + 8].copy_from_slice(&offset.to_le_bytes());
        }

        // Object records.
        for obj in &objs {
            let parent_offset = obj.parent.map_or(0u32, |p| objs[p].offset as u32);
            let word = match &obj.file {
                None => {
                    assert!((obj.children.len() as u16) < FILE_SENTINEL);
                    obj.children.len() as u16
                }
                Some(spec) => FILE_SENTINEL | spec.comp_id as u16,
            };
            let opts = obj.file.as_ref().map_or(0, |s| s.opts);

            let at = obj.offset;
            image[at..at + 4].copy_from_slice(&parent_offset.to_le_bytes());
            image[at + 4..at + 6].copy_from_slice(&word.to_le_bytes());
            image[at + 6] = obj.seg.len() as u8;
            image[at + 7] = opts;
            image[at + 8..at + 8 + obj.seg.len()].copy_from_slice(obj.seg.as_bytes());

            let mut body = at + up(8 + obj.seg.len());
            match &obj.file {
                None => {
                    for &child in &obj.children {
                        let off = objs[child].offset as u32;
                        image[body..body + 4].copy_from_slice(&off.to_le_bytes());
                        body += 4;
                    }
                }
                Some(spec) => {
                    let data_size = spec.stored.len() as u32;
                    image[body..body + 4]
                        .copy_from_slice(&(obj.data_offset as u32).to_le_bytes());
                    image[body + 4..body + 8].copy_from_slice(&data_size.to_le_bytes());
                    if spec.comp_id != COMP_NONE {
                        image[body + 8..body + 12].copy_from_slice(&data_size.to_le_bytes());
                        image[body + 12..body + 16]
                            .copy_from_slice(&spec.real_size.to_le_bytes());
                    }
                }
            }
        }

        // Data area.
        for obj in &objs {
            if let Some(spec) = &obj.file {
                image[obj.data_offset..obj.data_offset + spec.stored.len()]
                    .copy_from_slice(&spec.stored);
            }
        }

        // Footer.
        let crc = crc32fast::hash(&image[..bin_size - 4]);
        image[bin_size - 4..].copy_from_slice(&crc.to_le_bytes());
        image
    }
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
