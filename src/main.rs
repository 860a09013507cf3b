use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use reslice::checksum::{container_crc32, crc16, crc32};
use reslice::crypto::{crypt_layer, KEYRING_CTB, KEYRING_PHZ};
use reslice::pipeline::{
    decode_layers, encode_layers, CancelToken, LayerManifest, LayerTableEntry, PipelineOptions,
    ProgressCounter,
};
use reslice::{FormatKind, LayerBitmap};

#[derive(Parser)]
#[command(name = "reslice", about = "Layer codec toolbox for resin slice files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode raw greymaps into a layer blob file plus a JSON manifest
    Pack {
        /// Format: ctb, cbddlp, phz, pws, pw0, goo, ctb-encrypted, cxdlp
        #[arg(short, long, default_value = "ctb")]
        format: String,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// Antialias level for bitplane formats
        #[arg(short, long, default_value = "1")]
        antialias: u8,
        /// Cipher seed (0 = cipher disabled)
        #[arg(short, long, default_value = "0")]
        seed: u32,
        /// Output blob file; the manifest lands next to it as <output>.json
        #[arg(short, long)]
        output: PathBuf,
        /// Raw 8-bit greymap files of exactly width×height bytes, one per layer
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Decode a layer blob file back into raw greymaps
    Unpack {
        /// The blob file produced by pack (manifest expected at <input>.json)
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// XOR-transform a file with the per-layer keystream cipher
    Cipher {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        seed: u32,
        #[arg(short, long, default_value = "0")]
        layer: u32,
        /// Constant set: ctb or phz
        #[arg(short, long, default_value = "ctb")]
        profile: String,
    },
    /// Print checksums of a file
    Crc {
        input: PathBuf,
    },
    /// List the supported container formats
    Formats,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { format, width, height, antialias, seed, output, input } => {
            let kind = parse_format(&format)?;
            let descriptor = kind.descriptor();

            let mut bitmaps = Vec::with_capacity(input.len());
            for path in &input {
                let data = std::fs::read(path)?;
                let bitmap = LayerBitmap::from_raw(width, height, data).ok_or_else(|| {
                    format!(
                        "{}: expected exactly {} bytes of raw greymap",
                        path.display(),
                        width as usize * height as usize
                    )
                })?;
                bitmaps.push(bitmap);
            }

            let opts = PipelineOptions { seed, antialias, ..Default::default() };
            let outcome = encode_layers(
                &bitmaps,
                descriptor,
                &opts,
                0,
                true,
                &CancelToken::new(),
                &ProgressCounter::new(),
            )?;

            let mut blob_file = File::create(&output)?;
            let mut entries = Vec::with_capacity(outcome.layers.len());
            for layer in &outcome.layers {
                if let Some(data) = &layer.data {
                    blob_file.write_all(data)?;
                } else {
                    println!("  layer {:4}  deduplicated -> offset {}", layer.index, layer.offset);
                }
                entries.push(LayerTableEntry {
                    offset: layer.offset,
                    length: layer.length,
                    params: Default::default(),
                    encrypted_window: None,
                });
            }

            let manifest = LayerManifest {
                format: kind,
                resolution: (width, height),
                antialias,
                seed,
                layers: entries,
            };
            std::fs::write(manifest_path(&output), manifest.to_bytes()?)?;

            println!(
                "Packed {} layer(s), {} blob byte(s) stored: {}",
                outcome.layers.len(),
                outcome.stored_bytes,
                output.display()
            );
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let manifest = LayerManifest::from_bytes(&std::fs::read(manifest_path(&input))?)?;
            let descriptor = manifest.format.descriptor();

            let opts = PipelineOptions {
                seed: manifest.seed,
                antialias: manifest.antialias,
                ..Default::default()
            };
            let mut blob_file = File::open(&input)?;
            let outcome = decode_layers(
                &mut blob_file,
                &manifest.layers,
                descriptor,
                manifest.resolution,
                &opts,
                &CancelToken::new(),
                &ProgressCounter::new(),
            )?;

            if !output_dir.exists() {
                std::fs::create_dir_all(&output_dir)?;
            }
            for layer in &outcome.layers {
                if let Some(bitmap) = &layer.bitmap {
                    let name = format!("layer_{:05}.gray", layer.index);
                    std::fs::write(output_dir.join(name), bitmap.samples())?;
                }
            }
            for layer in outcome.layers.iter().filter(|l| l.recovered) {
                let fields: Vec<String> = reslice::format::LAYER_PARAM_FIELDS
                    .iter()
                    .map(|f| format!("{}={}", f.name, (f.get)(&layer.params)))
                    .collect();
                println!("  cloned layer {:4} from a neighbour ({})", layer.index, fields.join(", "));
            }
            println!(
                "Unpacked {} layer(s) to {} ({})",
                outcome.layers.len(),
                output_dir.display(),
                outcome.recovery.summary()
            );
        }

        // ── Cipher ───────────────────────────────────────────────────────────
        Commands::Cipher { input, output, seed, layer, profile } => {
            let profile = match profile.to_lowercase().as_str() {
                "ctb" => &KEYRING_CTB,
                "phz" => &KEYRING_PHZ,
                other => return Err(format!("unknown cipher profile '{other}'").into()),
            };
            let mut data = std::fs::read(&input)?;
            crypt_layer(profile, seed, layer, &mut data);
            std::fs::write(&output, data)?;
            println!("Transformed {} -> {}", input.display(), output.display());
        }

        // ── Crc ──────────────────────────────────────────────────────────────
        Commands::Crc { input } => {
            let data = std::fs::read(&input)?;
            println!("File:            {}", input.display());
            println!("Size:            {} B", data.len());
            println!("CRC-32:          {:08x}", crc32(&data));
            match container_crc32(&data) {
                Some(crc) => println!("CRC-32 (sealed): {crc:08x}"),
                None => println!("CRC-32 (sealed): file too short"),
            }
            println!("CRC-16:          {:04x}", crc16(&data));
        }

        // ── Formats ──────────────────────────────────────────────────────────
        Commands::Formats => {
            println!(
                "{:<14} {:<10} {:<9} {:<8} {:<13} Previews",
                "Name", "Codec", "Cipher", "Encrypt", "Checksum"
            );
            for d in reslice::format::DESCRIPTORS {
                let cipher = match d.cipher {
                    Some(p) if *p == KEYRING_CTB => "ctb",
                    Some(_) => "phz",
                    None => "—",
                };
                println!(
                    "{:<14} {:<10} {:<9} {:<8} {:<13?} {}x{} / {}x{}",
                    d.name,
                    d.codec.name(),
                    cipher,
                    d.encrypted_layers,
                    d.container_checksum,
                    d.preview_large.0,
                    d.preview_large.1,
                    d.preview_small.0,
                    d.preview_small.1,
                );
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_format(s: &str) -> Result<FormatKind, String> {
    FormatKind::from_name(s).ok_or_else(|| format!("unknown format '{s}'"))
}

fn manifest_path(blob: &std::path::Path) -> PathBuf {
    let mut path = blob.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}
