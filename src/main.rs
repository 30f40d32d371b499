use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::{self, SeekFrom, Write};
use std::path::{Path, PathBuf};

use frogfs::{DirHandle, FileHandle, FrogFs, FsConfig, ObjectKind, OpenFlags};

#[derive(Parser)]
#[command(name = "frogfs", version = "1.0.0", about = "Inspect and extract frogfs images")]
struct Cli {
    /// Verify the footer CRC-32 while loading the image
    #[arg(long, global = true)]
    verify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show image header information
    Info {
        image: PathBuf,
    },
    /// List every file in the image
    Ls {
        image: PathBuf,
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one object's metadata
    Stat {
        image: PathBuf,
        path: String,
    },
    /// Write a file's contents to stdout
    Cat {
        image: PathBuf,
        path: String,
        /// Emit the stored (compressed) bytes instead of decoding them
        #[arg(short, long)]
        raw: bool,
    },
    /// Extract all files into a directory
    Extract {
        image: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(Serialize)]
struct ListEntry {
    path: String,
    size: u64,
    compression: &'static str,
    size_compressed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let config = FsConfig {
        verify_checksum: cli.verify,
    };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { image } => {
            let blob = fs::read(&image)?;
            let fsys = FrogFs::with_config(&blob, config)?;
            let h = fsys.header();
            println!("version:     {}.{}", h.ver_major, h.ver_minor);
            println!("entries:     {}", h.num_entries);
            println!("size:        {} bytes", h.bin_size);
            println!("alignment:   {} bytes", fsys.alignment());
            let bytes = fsys.as_bytes();
            let stored = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into()?);
            let computed = crc32fast::hash(&bytes[..bytes.len() - 4]);
            println!(
                "crc32:       {:08x} ({})",
                stored,
                if stored == computed { "ok" } else { "MISMATCH" }
            );
        }

        // ── Ls ───────────────────────────────────────────────────────────────
        Commands::Ls { image, json } => {
            let blob = fs::read(&image)?;
            let fsys = FrogFs::with_config(&blob, config)?;
            let entries = collect_files(&fsys)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in &entries {
                    match e.size_compressed {
                        Some(stored) => println!(
                            "{:>10}  {:>10}  {:<10}  {}",
                            e.size, stored, e.compression, e.path
                        ),
                        None => println!("{:>10}  {:>10}  {:<10}  {}", e.size, "-", "-", e.path),
                    }
                }
            }
        }

        // ── Stat ─────────────────────────────────────────────────────────────
        Commands::Stat { image, path } => {
            let blob = fs::read(&image)?;
            let fsys = FrogFs::with_config(&blob, config)?;
            let obj = fsys
                .lookup(&path)?
                .ok_or_else(|| format!("no such object: {path}"))?;
            let st = obj.stat()?;
            println!(
                "kind:        {}",
                match st.kind {
                    ObjectKind::File => "file",
                    ObjectKind::Dir => "directory",
                }
            );
            println!("size:        {}", st.size);
            if let Some(stored) = st.size_compressed {
                println!("stored:      {}", stored);
                println!("compression: {}", st.compression.name());
            }
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { image, path, raw } => {
            let blob = fs::read(&image)?;
            let fsys = FrogFs::with_config(&blob, config)?;
            let obj = fsys
                .lookup(&path)?
                .ok_or_else(|| format!("no such object: {path}"))?;
            let flags = if raw {
                OpenFlags::RAW
            } else {
                OpenFlags::empty()
            };
            let mut handle = FileHandle::open(obj, flags)?;
            copy_stream(&mut handle, &mut io::stdout().lock())?;
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { image, output_dir } => {
            let blob = fs::read(&image)?;
            let fsys = FrogFs::with_config(&blob, config)?;
            let mut count = 0usize;
            let mut walker = DirHandle::new(fsys.root()?, true)?;
            while let Some(obj) = walker.next()? {
                let path = obj.full_path()?;
                let dest = join_under(&output_dir, &path);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut handle = FileHandle::open(obj, OpenFlags::empty())?;
                let mut out = fs::File::create(&dest)?;
                copy_stream(&mut handle, &mut out)?;
                count += 1;
            }
            println!("extracted {count} files");
        }
    }

    Ok(())
}

fn collect_files(fsys: &FrogFs) -> Result<Vec<ListEntry>, Box<dyn std::error::Error>> {
    let mut entries = Vec::new();
    let mut walker = DirHandle::new(fsys.root()?, true)?;
    while let Some(obj) = walker.next()? {
        let st = obj.stat()?;
        entries.push(ListEntry {
            path: obj.full_path()?,
            size: st.size,
            compression: st.compression.name(),
            size_compressed: st.size_compressed,
        });
    }
    Ok(entries)
}

fn copy_stream<W: Write>(
    handle: &mut FileHandle<'_>,
    out: &mut W,
) -> Result<(), Box<dyn std::error::Error>> {
    handle.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 4096];
    loop {
        let got = handle.read(&mut buf)?;
        if got == 0 {
            break;
        }
        out.write_all(&buf[..got])?;
    }
    Ok(())
}

/// Join an image path under `root`, component by component.
fn join_under(root: &Path, path: &str) -> PathBuf {
    let mut joined = root.to_path_buf();
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        joined.push(seg);
    }
    joined
}
