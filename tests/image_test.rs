mod common;

use common::{djb2, ImageBuilder};
use frogfs::{DirHandle, FrogFs, FsConfig, ImageError, ObjectKind};

fn sample_image() -> Vec<u8> {
    ImageBuilder::new()
        .file("index.html", b"<html>hi</html>")
        .file("a.txt", b"hi\n")
        .file("sub/inner.txt", b"inner")
        .file("sub/deep/leaf.bin", &[1, 2, 3, 4, 5])
        .dir("empty")
        .build()
}

#[test]
fn loads_and_exposes_header() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let h = fs.header();
    assert_eq!(h.ver_major, 1);
    // root, index.html, a.txt, sub, sub/inner.txt, sub/deep,
    // sub/deep/leaf.bin, empty
    assert_eq!(h.num_entries, 8);
    assert_eq!(h.bin_size as usize, image.len());
    assert_eq!(fs.alignment(), 4);
}

#[test]
fn rejects_bad_magic() {
    let mut image = sample_image();
    image[0] ^= 0xFF;
    assert!(matches!(
        FrogFs::new(&image),
        Err(ImageError::Invalid(_))
    ));
}

#[test]
fn rejects_unsupported_major_version() {
    let mut image = sample_image();
    image[4] = 9;
    assert!(matches!(
        FrogFs::new(&image),
        Err(ImageError::Version { found_major: 9, .. })
    ));
}

#[test]
fn rejects_short_blob() {
    let image = sample_image();
    assert!(matches!(
        FrogFs::new(&image[..8]),
        Err(ImageError::Truncated(_))
    ));
    // A blob shorter than the declared size is truncated too.
    assert!(matches!(
        FrogFs::new(&image[..image.len() - 1]),
        Err(ImageError::Truncated(_))
    ));
}

#[test]
fn checksum_verification_is_optional() {
    let mut image = sample_image();
    let config = FsConfig {
        verify_checksum: true,
    };
    assert!(FrogFs::with_config(&image, config).is_ok());

    // Corrupt one data byte: load succeeds without verification, fails
    // with it.
    let last = image.len() - 5;
    image[last] ^= 0xFF;
    assert!(FrogFs::new(&image).is_ok());
    assert!(matches!(
        FrogFs::with_config(&image, config),
        Err(ImageError::Invalid(_))
    ));
}

#[test]
fn empty_path_resolves_to_root() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let root = fs.lookup("").unwrap().unwrap();
    assert!(root.is_root());
    assert_eq!(root.kind(), ObjectKind::Dir);
    assert_eq!(root.offset(), fs.root().unwrap().offset());
}

#[test]
fn resolves_nested_paths() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    for path in ["index.html", "a.txt", "sub", "sub/inner.txt", "sub/deep/leaf.bin"] {
        let obj = fs.lookup(path).unwrap().unwrap_or_else(|| panic!("missing {path}"));
        assert_eq!(obj.full_path().unwrap(), path);
    }
    assert!(fs.lookup("nope").unwrap().is_none());
    assert!(fs.lookup("sub/nope").unwrap().is_none());
    // A prefix of a real path is not a match.
    assert!(fs.lookup("sub/inner").unwrap().is_none());
    // Nor is a same-segment path under the wrong parent.
    assert!(fs.lookup("empty/inner.txt").unwrap().is_none());
}

#[test]
fn normalization_ignores_redundant_slashes() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let canonical = fs.lookup("sub/inner.txt").unwrap().unwrap();
    for variant in [
        "/sub/inner.txt",
        "//sub//inner.txt",
        "sub/inner.txt/",
        "///sub/inner.txt//",
    ] {
        let obj = fs.lookup(variant).unwrap().unwrap_or_else(|| panic!("missing {variant}"));
        assert_eq!(obj.offset(), canonical.offset());
    }
}

#[test]
fn resolves_colliding_hashes() {
    // Brute-force two distinct names with the same djb2 hash; with four
    // alphanumeric characters the birthday bound makes one near-certain.
    let mut seen = std::collections::HashMap::new();
    let mut pair = None;
    'outer: for a in b'a'..=b'z' {
        for b in b'a'..=b'z' {
            for c in b'a'..=b'z' {
                for d in b'a'..=b'z' {
                    let name = String::from_utf8(vec![a, b, c, d]).unwrap();
                    if let Some(prev) = seen.insert(djb2(&name), name.clone()) {
                        pair = Some((prev, name));
                        break 'outer;
                    }
                }
            }
        }
    }
    let (first, second) = pair.expect("no collision in the search space");
    assert_eq!(djb2(&first), djb2(&second));

    let image = ImageBuilder::new()
        .file(&first, b"first contents")
        .file(&second, b"second contents")
        .build();
    let fs = FrogFs::new(&image).unwrap();

    let a = fs.lookup(&first).unwrap().unwrap();
    let b = fs.lookup(&second).unwrap().unwrap();
    assert_eq!(a.full_path().unwrap(), first);
    assert_eq!(b.full_path().unwrap(), second);
    assert_ne!(a.offset(), b.offset());
}

#[test]
fn hash_table_invariants_hold() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();

    let entries: Vec<_> = fs.hash_entries().collect();
    assert_eq!(entries.len(), fs.header().num_entries as usize);

    // Sorted ascending, and every entry points at an object whose
    // reconstructed path hashes back to the entry.
    for pair in entries.windows(2) {
        assert!(pair[0].hash <= pair[1].hash);
    }
    for entry in &entries {
        let obj = fs.object_at(entry.offset).unwrap();
        let path = obj.full_path().unwrap();
        assert_eq!(djb2(&path), entry.hash, "entry for {path:?}");
        assert_eq!(frogfs::hash_path(&path), entry.hash);
    }
}

#[test]
fn hash_entry_accessor_is_bounds_checked() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let n = fs.header().num_entries as usize;

    // Single-row access agrees with the iterator for every row.
    let entries: Vec<_> = fs.hash_entries().collect();
    for (i, expected) in entries.iter().enumerate() {
        assert_eq!(fs.hash_entry(i), Some(*expected));
    }

    // The row holding the root ("" hashes to 5381) resolves back to it.
    let root_offset = fs.root().unwrap().offset();
    let root_row = (0..n)
        .find(|&i| fs.hash_entry(i).unwrap().offset == root_offset)
        .expect("root must be indexed");
    assert_eq!(fs.hash_entry(root_row).unwrap().hash, djb2(""));

    // One past the last row is out of range.
    assert_eq!(fs.hash_entry(n), None);
}

#[test]
fn directory_enumeration_is_ordered_and_deterministic() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let root = fs.root().unwrap();
    assert_eq!(root.child_count(), 4);

    let mut handle = DirHandle::new(root, false).unwrap();
    let mut first_pass = Vec::new();
    while let Some(obj) = handle.next().unwrap() {
        first_pass.push(obj.offset());
    }
    let names: Vec<_> = first_pass
        .iter()
        .map(|&off| fs.object_at(off).unwrap().segment().to_string())
        .collect();
    assert_eq!(names, ["a.txt", "empty", "index.html", "sub"]);

    handle.rewind();
    let mut second_pass = Vec::new();
    while let Some(obj) = handle.next().unwrap() {
        second_pass.push(obj.offset());
    }
    assert_eq!(first_pass, second_pass);
}

#[test]
fn enumerator_tell_and_seek() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let mut handle = DirHandle::new(fs.root().unwrap(), false).unwrap();

    assert_eq!(handle.tell(), 0);
    handle.next().unwrap().unwrap();
    handle.next().unwrap().unwrap();
    assert_eq!(handle.tell(), 2);

    handle.seek(1).unwrap();
    assert_eq!(handle.tell(), 1);
    let obj = handle.next().unwrap().unwrap();
    assert_eq!(obj.segment(), "empty");

    // Seeking to the end leaves an exhausted cursor; past it is an error.
    handle.seek(4).unwrap();
    assert!(handle.next().unwrap().is_none());
    assert!(matches!(handle.seek(5), Err(ImageError::Invalid(_))));
    assert_eq!(handle.tell(), 4);
}

#[test]
fn flat_enumeration_yields_only_files() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let mut handle = DirHandle::new(fs.root().unwrap(), true).unwrap();

    let mut paths = Vec::new();
    while let Some(obj) = handle.next().unwrap() {
        assert_eq!(obj.kind(), ObjectKind::File);
        paths.push(obj.full_path().unwrap());
    }
    paths.sort();
    assert_eq!(
        paths,
        ["a.txt", "index.html", "sub/deep/leaf.bin", "sub/inner.txt"]
    );

    // Replay through seek matches a fresh traversal.
    handle.seek(2).unwrap();
    assert_eq!(handle.tell(), 2);
    let rest = handle.next().unwrap();
    assert!(rest.is_some());
}

#[test]
fn end_to_end_root_listing_contains_index_html() {
    let image = sample_image();
    let fs = FrogFs::new(&image).unwrap();
    let root = fs.lookup("").unwrap().unwrap();
    let mut handle = DirHandle::new(root, false).unwrap();
    let mut found = false;
    while let Some(obj) = handle.next().unwrap() {
        if obj.segment() == "index.html" {
            found = true;
        }
    }
    assert!(found);
}
