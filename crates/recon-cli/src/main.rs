#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use recon_block::{
    ByteDevice, FileByteDevice, ProbeOptions, probe_superblocks, read_superblock,
};
use recon_error::ReconError;
use recon_ondisk::{
    BlockGroupFlags, DecodeOptions, Superblock, SuperblockFlags, SysChunk, map_logical,
};
use recon_types::{BTRFS_MAGIC, ByteOrder, SuperblockMirror};
use serde::Serialize;
use std::path::{Path, PathBuf};

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "btrfs-recon",
    about = "Read-only btrfs superblock and chunk map inspector"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode and print a superblock.
    Inspect {
        #[command(flatten)]
        source: Source,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// List the system chunk array entries of a superblock.
    Chunks {
        #[command(flatten)]
        source: Source,
        /// Also map this logical address through the chunks.
        #[arg(long, value_parser = parse_u64)]
        map: Option<u64>,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Probe every superblock mirror.
    Mirrors {
        /// Path to the device or image.
        image: PathBuf,
        /// Byte offset of the filesystem within the image.
        #[arg(long, default_value = "0", value_parser = parse_u64)]
        offset: u64,
        /// Decode multi-byte fields as big-endian.
        #[arg(long)]
        big_endian: bool,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct Source {
    /// Path to the device or image.
    image: PathBuf,
    /// Superblock copy to read (0-2 or primary/secondary/tertiary).
    /// Without it the newest copy with a valid magic is used.
    #[arg(long, value_parser = parse_mirror)]
    mirror: Option<SuperblockMirror>,
    /// Byte offset of the filesystem within the image.
    #[arg(long, default_value = "0", value_parser = parse_u64)]
    offset: u64,
    /// Decode multi-byte fields as big-endian.
    #[arg(long)]
    big_endian: bool,
}

fn parse_u64(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("invalid number `{text}`: {err}"))
}

fn parse_mirror(text: &str) -> Result<SuperblockMirror, String> {
    match text.to_ascii_lowercase().as_str() {
        "0" | "primary" => Ok(SuperblockMirror::Primary),
        "1" | "secondary" => Ok(SuperblockMirror::Secondary),
        "2" | "tertiary" => Ok(SuperblockMirror::Tertiary),
        _ => Err(format!("unknown mirror `{text}`, expected 0, 1 or 2")),
    }
}

fn byte_order(big_endian: bool) -> ByteOrder {
    if big_endian {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    }
}

fn open_device(image: &Path, offset: u64) -> Result<FileByteDevice> {
    FileByteDevice::open(image)
        .and_then(|dev| dev.with_base(offset))
        .with_context(|| format!("failed to open {}", image.display()))
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput<'a> {
    mirror: SuperblockMirror,
    mirror_offset: u64,
    magic_ok: bool,
    checksum_type: String,
    flags: Vec<&'static str>,
    superblock: &'a Superblock,
}

#[derive(Debug, Serialize)]
struct ChunkOutput<'a> {
    logical: u64,
    length: u64,
    chunk_type: Vec<&'static str>,
    profile: &'static str,
    #[serde(flatten)]
    entry: &'a SysChunk,
}

#[derive(Debug, Serialize)]
struct ChunksOutput<'a> {
    mirror: SuperblockMirror,
    chunks: Vec<ChunkOutput<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mapping: Option<MappingOutput>,
}

#[derive(Debug, Serialize)]
struct MappingOutput {
    logical: u64,
    devid: Option<u64>,
    physical: Option<u64>,
}

#[derive(Debug, Serialize)]
struct MirrorOutput {
    mirror: SuperblockMirror,
    offset: u64,
    generation: u64,
    bytenr: u64,
    magic_ok: bool,
    fsid: String,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        let code = error
            .downcast_ref::<ReconError>()
            .map_or(1, ReconError::exit_code);
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { source, json } => inspect(&source, json),
        Command::Chunks { source, map, json } => chunks(&source, map, json),
        Command::Mirrors {
            image,
            offset,
            big_endian,
            json,
        } => mirrors(&image, offset, big_endian, json),
    }
}

/// Pick the superblock named by `source`: an explicit mirror as-is, or the
/// newest copy with a valid magic.
fn load(source: &Source) -> Result<(SuperblockMirror, Superblock)> {
    let dev = open_device(&source.image, source.offset)?;
    let decode = DecodeOptions {
        byte_order: byte_order(source.big_endian),
    };

    if let Some(mirror) = source.mirror {
        let sb = read_superblock(&dev, mirror, &decode)
            .with_context(|| format!("failed to read {mirror} of {}", source.image.display()))?;
        if !sb.has_valid_magic() {
            eprintln!(
                "warning: {mirror} magic is {:?}, expected {:?}",
                String::from_utf8_lossy(&sb.magic),
                String::from_utf8_lossy(&BTRFS_MAGIC)
            );
        }
        return Ok((mirror, sb));
    }

    let options = ProbeOptions {
        decode,
        ..ProbeOptions::default()
    };
    let mut found = probe_superblocks(&dev, &options)
        .with_context(|| format!("no btrfs superblock in {}", source.image.display()))?;
    let newest = found.swap_remove(0);
    Ok((newest.mirror, newest.superblock))
}

fn flag_names(flags: SuperblockFlags) -> Vec<&'static str> {
    flags.iter_names().map(|(name, _)| name).collect()
}

fn block_group_names(flags: BlockGroupFlags) -> Vec<&'static str> {
    flags.iter_names().map(|(name, _)| name).collect()
}

fn inspect(source: &Source, json: bool) -> Result<()> {
    let (mirror, sb) = load(source)?;
    let output = InspectOutput {
        mirror,
        mirror_offset: mirror.byte_offset(),
        magic_ok: sb.has_valid_magic(),
        checksum_type: sb
            .checksum_type()
            .map_or_else(|| format!("unknown({})", sb.csum_type), |ty| ty.to_string()),
        flags: flag_names(sb.flags()),
        superblock: &sb,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
        return Ok(());
    }

    println!("superblock: {mirror}");
    println!("csum_type\t\t{} ({})", output.checksum_type, sb.csum_type);
    println!("csum\t\t\t0x{}", hex::encode(sb.checksum_bytes()));
    println!("bytenr\t\t\t{}", sb.bytenr);
    println!("flags\t\t\t{:#x} [{}]", sb.flags, output.flags.join(" | "));
    println!(
        "magic\t\t\t{} [{}]",
        String::from_utf8_lossy(&sb.magic),
        if output.magic_ok { "match" } else { "DON'T MATCH" }
    );
    println!("fsid\t\t\t{}", sb.fsid);
    println!("metadata_uuid\t\t{}", sb.metadata_uuid);
    println!("label\t\t\t{}", sb.label);
    println!("generation\t\t{}", sb.generation);
    println!("root\t\t\t{}", sb.root);
    println!("sys_array_size\t\t{}", sb.sys_chunk_array_size);
    println!("chunk_root_generation\t{}", sb.chunk_root_generation);
    println!("root_level\t\t{}", sb.root_level);
    println!("chunk_root\t\t{}", sb.chunk_root);
    println!("chunk_root_level\t{}", sb.chunk_root_level);
    println!("log_root\t\t{}", sb.log_root);
    println!("log_root_transid\t{}", sb.log_root_transid);
    println!("log_root_level\t\t{}", sb.log_root_level);
    println!("total_bytes\t\t{}", sb.total_bytes);
    println!("bytes_used\t\t{}", sb.bytes_used);
    println!("sectorsize\t\t{}", sb.sector_size);
    println!("nodesize\t\t{}", sb.node_size);
    println!("leafsize\t\t{}", sb.leafsize);
    println!("stripesize\t\t{}", sb.stripesize);
    println!("root_dir\t\t{}", sb.root_dir_objectid);
    println!("num_devices\t\t{}", sb.num_devices);
    println!("compat_flags\t\t{:#x}", sb.compat_flags);
    println!("compat_ro_flags\t\t{:#x}", sb.compat_ro_flags);
    println!("incompat_flags\t\t{:#x}", sb.incompat_flags);
    println!("cache_generation\t{}", sb.cache_generation);
    println!("uuid_tree_generation\t{}", sb.uuid_tree_generation);
    println!("dev_item.uuid\t\t{}", sb.dev_item.uuid);
    println!("dev_item.fsid\t\t{}", sb.dev_item.fsid);
    println!("dev_item.devid\t\t{}", sb.dev_item.devid);
    println!("dev_item.total_bytes\t{}", sb.dev_item.total_bytes);
    println!("dev_item.bytes_used\t{}", sb.dev_item.bytes_used);
    println!("dev_item.generation\t{}", sb.dev_item.generation);
    Ok(())
}

fn chunks(source: &Source, map: Option<u64>, json: bool) -> Result<()> {
    let (mirror, sb) = load(source)?;
    let entries = sb
        .sys_chunks(byte_order(source.big_endian))
        .map_err(ReconError::from)
        .context("failed to decode the system chunk array")?;

    let mapping = map.map(|logical| {
        let hit = map_logical(&entries, logical);
        MappingOutput {
            logical,
            devid: hit.map(|m| m.devid),
            physical: hit.map(|m| m.physical),
        }
    });

    let output = ChunksOutput {
        mirror,
        chunks: entries
            .iter()
            .map(|entry| ChunkOutput {
                logical: entry.logical_start(),
                length: entry.chunk.length,
                chunk_type: block_group_names(entry.chunk.flags()),
                profile: entry.chunk.flags().profile(),
                entry,
            })
            .collect(),
        mapping,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
        return Ok(());
    }

    println!("sys_chunk_array: {} entries ({mirror})", output.chunks.len());
    for (index, chunk) in output.chunks.iter().enumerate() {
        println!(
            "item {index} key {} length {} type {}|{} num_stripes {} sub_stripes {}",
            chunk.entry.key,
            chunk.length,
            chunk.chunk_type.join("|"),
            chunk.profile,
            chunk.entry.chunk.num_stripes,
            chunk.entry.chunk.sub_stripes,
        );
        for (stripe_index, stripe) in chunk.entry.chunk.stripes.iter().enumerate() {
            println!(
                "\tstripe {stripe_index} devid {} offset {}",
                stripe.devid, stripe.offset
            );
            println!("\tdev_uuid {}", stripe.dev_uuid);
        }
    }
    if let Some(mapping) = &output.mapping {
        match (mapping.devid, mapping.physical) {
            (Some(devid), Some(physical)) => println!(
                "logical {} -> devid {devid} physical {physical}",
                mapping.logical
            ),
            _ => println!("logical {} is not covered by a system chunk", mapping.logical),
        }
    }
    Ok(())
}

fn mirrors(image: &Path, offset: u64, big_endian: bool, json: bool) -> Result<()> {
    let (output, probed_len) = probe_mirrors(image, offset, big_endian)?;

    // Bad-magic copies are still shown before the failure is reported.
    println!("{}", render_mirrors(&output, json)?);

    if !output.iter().any(|m| m.magic_ok) {
        bail!(
            "{} has no superblock copy with a valid magic ({probed_len} bytes probed)",
            image.display()
        );
    }
    Ok(())
}

/// Decode every mirror without requiring the magic.
fn probe_mirrors(image: &Path, offset: u64, big_endian: bool) -> Result<(Vec<MirrorOutput>, u64)> {
    let dev = open_device(image, offset)?;
    let options = ProbeOptions {
        require_magic: false,
        decode: DecodeOptions {
            byte_order: byte_order(big_endian),
        },
        ..ProbeOptions::default()
    };
    let found = probe_superblocks(&dev, &options)
        .with_context(|| format!("no decodable superblock in {}", image.display()))?;

    let output = found
        .iter()
        .map(|probed| MirrorOutput {
            mirror: probed.mirror,
            offset: probed.mirror.byte_offset(),
            generation: probed.superblock.generation,
            bytenr: probed.superblock.bytenr,
            magic_ok: probed.superblock.has_valid_magic(),
            fsid: probed.superblock.fsid.to_string(),
        })
        .collect();
    Ok((output, dev.len_bytes()))
}

fn render_mirrors(output: &[MirrorOutput], json: bool) -> Result<String> {
    if json {
        return serde_json::to_string_pretty(output).context("serialize output");
    }

    let lines: Vec<String> = output
        .iter()
        .map(|m| {
            format!(
                "{}\tgeneration {}\tbytenr {}\tmagic {}\tfsid {}",
                m.mirror,
                m.generation,
                m.bytenr,
                if m.magic_ok { "ok" } else { "bad" },
                m.fsid
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_numbers_and_mirrors() {
        assert_eq!(parse_u64("65536"), Ok(65536));
        assert_eq!(parse_u64("0x10000"), Ok(65536));
        assert!(parse_u64("ten").is_err());
        assert_eq!(parse_mirror("1"), Ok(SuperblockMirror::Secondary));
        assert_eq!(parse_mirror("Tertiary"), Ok(SuperblockMirror::Tertiary));
        assert!(parse_mirror("3").is_err());
    }

    #[test]
    fn inspect_args_parse() {
        let cli = Cli::try_parse_from([
            "btrfs-recon",
            "inspect",
            "disk.img",
            "--mirror",
            "secondary",
            "--offset",
            "0x100000",
            "--json",
        ])
        .expect("parse");
        let Command::Inspect { source, json } = cli.command else {
            panic!("expected inspect command");
        };
        assert!(json);
        assert_eq!(source.mirror, Some(SuperblockMirror::Secondary));
        assert_eq!(source.offset, 0x10_0000);
        assert!(!source.big_endian);
    }

    fn image_with_primary(magic: &[u8; 8], generation: u64) -> tempfile::NamedTempFile {
        let mut image = vec![0_u8; 0x1_1000];
        image[0x1_0040..0x1_0048].copy_from_slice(magic);
        image[0x1_0048..0x1_0050].copy_from_slice(&generation.to_le_bytes());
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(file.path(), &image).expect("write image");
        file
    }

    #[test]
    fn bad_magic_copies_are_listed_before_failing() {
        let file = image_with_primary(b"NOTBTRFS", 42);

        let (output, probed_len) = probe_mirrors(file.path(), 0, false).expect("probe");
        assert_eq!(probed_len, 0x1_1000);
        assert_eq!(output.len(), 1);
        assert!(!output[0].magic_ok);
        assert_eq!(output[0].generation, 42);

        let text = render_mirrors(&output, false).expect("render");
        assert!(text.contains("generation 42"), "{text}");
        assert!(text.contains("magic bad"), "{text}");
        let json = render_mirrors(&output, true).expect("render json");
        assert!(json.contains("\"magic_ok\": false"), "{json}");

        let err = mirrors(file.path(), 0, false, false).unwrap_err();
        assert!(
            err.to_string().contains("no superblock copy with a valid magic"),
            "{err:#}"
        );
    }

    #[test]
    fn valid_primary_is_reported_ok() {
        let file = image_with_primary(&BTRFS_MAGIC, 7);
        let (output, _) = probe_mirrors(file.path(), 0, false).expect("probe");
        assert!(output[0].magic_ok);
        mirrors(file.path(), 0, false, true).expect("mirrors");
    }
}
