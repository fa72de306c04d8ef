use std::convert::TryInto;
use std::fs;
use std::path::Path;

use anyhow::Context;
use log::debug;
use structopt::StructOpt;

use cryptboot::image::{Image, ImageBuilder};

mod cli;

/// Reads a fixed-size secret from `path`, failing when the file size does
/// not match exactly.
fn read_exact_file<P: AsRef<Path>, const N: usize>(path: P) -> Result<[u8; N], anyhow::Error> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))?;

    bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("'{}' is {} bytes, expected {}", path.display(), bytes.len(), N))
}

fn pack(opts: cli::PackOpts) -> Result<(), anyhow::Error> {
    let body = fs::read(&opts.input)
        .with_context(|| format!("Failed to read '{}'", opts.input.display()))?;

    let mut builder = ImageBuilder::default();
    builder
        .key(read_exact_file(&opts.key)?)
        .time_stamp(opts.time_stamp)
        .cipher_rounds(opts.cipher_rounds)
        .mac_rounds(opts.mac_rounds);

    if let Some(iv) = &opts.iv {
        builder.iv(read_exact_file(iv)?);
    }
    if let Some(new_key) = &opts.new_key {
        builder.new_key(read_exact_file(new_key)?);
    }
    if opts.plain {
        builder.plain_body();
    }

    let image = builder.build(&body)?;
    debug!("packed {} body bytes into {} image bytes", body.len(), image.len());

    fs::write(&opts.output, &image)
        .with_context(|| format!("Failed to write '{}'", opts.output.display()))?;
    println!("Wrote {} ({} bytes)", opts.output.display(), image.len());

    Ok(())
}

fn info<P: AsRef<Path>>(path: P) -> Result<(), anyhow::Error> {
    let bytes = fs::read(&path)
        .with_context(|| format!("Failed to read '{}'", path.as_ref().display()))?;
    let image = Image::parse(&bytes)?;
    let descriptor = &image.descriptor;

    println!("version:       {}", descriptor.version);
    println!("mode:          {:#04x}", descriptor.mode);
    println!("cipher rounds: {}", descriptor.cipher_rounds);
    println!("mac rounds:    {}", descriptor.mac_rounds);
    println!("timestamp:     {}", descriptor.time_stamp);
    println!("body size:     {}", descriptor.firmware_size);
    println!("body cipher:   {:?}", descriptor.body_cipher());
    println!("key update:    {:?}", descriptor.key_update());
    println!("mac:           {:02x?}", &descriptor.firmware_mac[..8]);
    println!("iv:            {:02x?}", descriptor.body_iv());

    Ok(())
}

fn verify<P: AsRef<Path>>(path: P, key: &Path) -> Result<(), anyhow::Error> {
    let bytes = fs::read(&path)
        .with_context(|| format!("Failed to read '{}'", path.as_ref().display()))?;
    let image = Image::parse(&bytes)?;

    image
        .verify(&read_exact_file(key)?)
        .with_context(|| format!("Verification of '{}' failed", path.as_ref().display()))?;
    println!("MAC ok, timestamp {}", image.descriptor.time_stamp);

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    pretty_env_logger::init();

    let opts = cli::Opts::from_args();

    match opts.command {
        cli::Command::Pack(opts) => pack(opts),
        cli::Command::Info { image } => info(&image),
        cli::Command::Verify { image, key } => verify(&image, &key),
    }
}
