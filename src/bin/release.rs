//! FlashWave release tool - host-side entry point
//!
//! Encrypts a firmware image into a release artifact and writes the
//! matching release descriptor record, ready for upload to the blob
//! store the devices poll.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flashwave::ota::descriptor::ReleaseDescriptor;
use flashwave::ota::envelope::{self, OtaKey};
use flashwave::ota::version::FirmwareVersion;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "flashwave-release")]
#[command(version)]
#[command(about = "Encrypt and publish FlashWave firmware releases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a firmware image and write the release descriptor
    Encrypt {
        /// Input firmware binary
        input: PathBuf,

        /// Firmware version being released (e.g. 1.2.3)
        #[arg(short, long)]
        version: FirmwareVersion,

        /// Hex-encoded 32-byte update key file
        #[arg(short, long)]
        key_file: PathBuf,

        /// Output directory for artifact and descriptor
        #[arg(short, long, default_value = "ota_releases")]
        output_dir: PathBuf,

        /// Blob identifier to publish (defaults to "<version>.enc")
        #[arg(long)]
        blob_id: Option<String>,
    },

    /// Decrypt a release artifact (for release verification)
    Decrypt {
        /// Input artifact (.enc)
        input: PathBuf,

        /// Hex-encoded 32-byte update key file
        #[arg(short, long)]
        key_file: PathBuf,

        /// Output file (defaults to the input with a .bin extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a fresh random update key for provisioning
    GenerateKey {
        /// Where to write the hex-encoded key
        #[arg(short, long, default_value = "update.key")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Encrypt {
            input,
            version,
            key_file,
            output_dir,
            blob_id,
        } => cmd_encrypt(&input, version, &key_file, &output_dir, blob_id),
        Commands::Decrypt {
            input,
            key_file,
            output,
        } => cmd_decrypt(&input, &key_file, output),
        Commands::GenerateKey { output } => cmd_generate_key(&output),
    }
}

fn load_key(path: &Path) -> Result<OtaKey> {
    let hex = fs::read_to_string(path)
        .with_context(|| format!("reading key file {}", path.display()))?;
    let key = OtaKey::from_hex(&hex)?;
    // Refuse to cut a release under a placeholder key.
    key.ensure_strong()?;
    Ok(key)
}

fn cmd_encrypt(
    input: &Path,
    version: FirmwareVersion,
    key_file: &Path,
    output_dir: &Path,
    blob_id: Option<String>,
) -> Result<()> {
    let key = load_key(key_file)?;
    let plaintext = fs::read(input)
        .with_context(|| format!("reading firmware image {}", input.display()))?;

    let blob_id = blob_id.unwrap_or_else(|| format!("{version}.enc"));
    let descriptor = ReleaseDescriptor::new(version, blob_id)?;

    fs::create_dir_all(output_dir)?;
    let artifact = envelope::encrypt(&plaintext, &key);
    let artifact_path = output_dir.join(format!("{version}.enc"));
    fs::write(&artifact_path, &artifact)?;

    let descriptor_path = output_dir.join("latest.txt");
    fs::write(&descriptor_path, format!("{}\n", descriptor.to_record()))?;

    println!("Encrypted {} ({} bytes -> {} bytes)", input.display(), plaintext.len(), artifact.len());
    println!("  artifact:   {}", artifact_path.display());
    println!("  descriptor: {}", descriptor_path.display());
    println!();
    println!("Upload both blobs, keeping the identifiers {:?} and \"latest.txt\".", descriptor.blob_id);
    Ok(())
}

fn cmd_decrypt(input: &Path, key_file: &Path, output: Option<PathBuf>) -> Result<()> {
    let key = load_key(key_file)?;
    let artifact = fs::read(input)
        .with_context(|| format!("reading artifact {}", input.display()))?;
    let plaintext = envelope::decrypt(&artifact, &key)
        .with_context(|| format!("decrypting {}", input.display()))?;

    let output = output.unwrap_or_else(|| input.with_extension("bin"));
    fs::write(&output, &plaintext)?;
    println!("Decrypted {} bytes to {}", plaintext.len(), output.display());
    Ok(())
}

fn cmd_generate_key(output: &Path) -> Result<()> {
    if output.exists() {
        bail!(
            "{} already exists; refusing to overwrite a provisioned key",
            output.display()
        );
    }
    let key = OtaKey::generate();
    fs::write(output, format!("{}\n", key.to_hex()))?;
    println!("Wrote new update key to {}", output.display());
    println!("Provision the same key file on every device before releasing.");
    Ok(())
}
