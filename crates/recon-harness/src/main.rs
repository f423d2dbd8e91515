#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use recon_block::FileByteDevice;
use recon_harness::{
    extract_region, extract_superblock_fixture, validate_chunk_fixture,
    validate_superblock_fixture,
};
use recon_types::SuperblockMirror;
use std::env;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("check-fixtures") => {
            let plain = Path::new("conformance/fixtures/btrfs_superblock_sparse.json");
            let chunked = Path::new("conformance/fixtures/btrfs_superblock_with_chunks.json");
            let sb = validate_superblock_fixture(plain)?;
            let (chunk_sb, chunks) = validate_chunk_fixture(chunked)?;

            println!(
                "superblock: generation={} label={}",
                sb.generation,
                sb.label.to_string_lossy()
            );
            println!(
                "chunks: label={} entries={}",
                chunk_sb.label.to_string_lossy(),
                chunks.len()
            );
            Ok(())
        }
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn generate_fixture(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: recon-harness generate-fixture <image> [superblock [mirror]|region <offset> <len>]");
    }

    let dev = FileByteDevice::open(&args[0])?;
    let kind = args.get(1).map_or("superblock", String::as_str);

    let fixture = match kind {
        "superblock" => {
            let index: usize = match args.get(2) {
                Some(raw) => raw.parse().context("invalid mirror index")?,
                None => 0,
            };
            let mirror = SuperblockMirror::from_index(index)
                .with_context(|| format!("mirror index {index} out of range (0-2)"))?;
            extract_superblock_fixture(&dev, mirror)?
        }
        "region" => {
            let offset: u64 = args
                .get(2)
                .context("region requires <offset>")?
                .parse()
                .context("invalid offset")?;
            let len: usize = args
                .get(3)
                .context("region requires <len>")?
                .parse()
                .context("invalid len")?;
            extract_region(&dev, offset, len)?
        }
        _ => bail!("unknown fixture kind: {kind}"),
    };

    println!("{}", serde_json::to_string_pretty(&fixture)?);
    Ok(())
}

fn print_usage() {
    println!("recon-harness — btrfs-recon fixture management");
    println!();
    println!("USAGE:");
    println!("  recon-harness check-fixtures");
    println!("  recon-harness generate-fixture <image> [superblock [mirror]|region <offset> <len>]");
    println!();
    println!("FIXTURE GENERATION:");
    println!("  Extracts sparse JSON fixtures from btrfs images. The default mode");
    println!("  extracts the primary superblock region; pass a mirror index (0-2)");
    println!("  for a backup copy. Use 'region' mode for arbitrary byte ranges.");
    println!();
    println!("EXAMPLES:");
    println!(
        "  recon-harness generate-fixture my_btrfs.img > conformance/fixtures/my_btrfs.json"
    );
    println!(
        "  recon-harness generate-fixture my_btrfs.img superblock 1 > conformance/fixtures/mirror1.json"
    );
}
