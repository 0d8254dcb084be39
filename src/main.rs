use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::flux::{BitOrder, FluxTrack};
use crate::formats::hfe::{self, TrackImage};

mod disk_formats;
mod error;
mod flux;
mod formats;
mod mfm;

trait FormatHandler {
    fn display(&self) -> Result<String>;
    /// Head tracks in (cylinder, head) order.
    fn tracks(&self) -> Result<Vec<FluxTrack>>;
    fn data(&self) -> &[u8];
}

fn load_handler(file_path: &Path) -> Result<Box<dyn FormatHandler>> {
    let ext = file_path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| anyhow!("No file extension: {}", file_path.display()))?;

    let mut file = File::open(file_path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    debug!("Read {} bytes from {}", data.len(), file_path.display());

    match ext.as_str() {
        "udi" => Ok(Box::new(formats::udi::UDIHandler::new(data))),
        "fdi" => Ok(Box::new(formats::fdi::FDIHandler::new(data))),
        "trd" => Ok(Box::new(formats::trd::TRDHandler::new(data))),
        "hfe" => Ok(Box::new(hfe::HFEHandler::new(data))),
        _ => Err(anyhow!("Unsupported format: {}", ext)),
    }
}

#[derive(Parser)]
#[command(about = "Converts UDI, FDI and TRD floppy images to HFE", version)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a .udi, .fdi or .trd image into an .hfe image
    Convert {
        source: PathBuf,
        destination: PathBuf,
        /// Bit packing order of the MFM stream
        #[arg(long, value_enum, default_value_t = BitOrder::Msb)]
        bit_order: BitOrder,
        /// Re-read the written image and check its track table
        #[arg(long)]
        validate: bool,
    },
    /// Show the layout of an image
    Info { source: PathBuf },
}

fn convert(source: &Path, destination: &Path, bit_order: BitOrder, validate: bool) -> Result<()> {
    let handler = load_handler(source)?;
    let tracks = handler.tracks()?;
    let head_tracks = tracks.len();
    let images: Vec<TrackImage> = hfe::pair_sides(tracks, bit_order).collect();
    info!(
        "{}: {} bytes, {} head tracks, {} cylinders",
        source.display(), handler.data().len(), head_tracks, images.len()
    );

    let mut file = BufWriter::new(File::create(destination)?);
    let entries = hfe::write_hfe(&mut file, &images)?;
    file.flush()?;
    let written: usize = entries.iter().map(|e| e.length as usize).sum();
    info!("Wrote {} tracks, {} bytes of track data", entries.len(), written);

    if validate {
        let mut data = Vec::new();
        File::open(destination)?.read_to_end(&mut data)?;
        let count = hfe::HFEHandler::new(data).validate()?;
        if count != images.len() {
            return Err(anyhow!("Validation failed: {} tracks in file, {} written", count, images.len()));
        }
        println!("Validation passed: {} tracks", count);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Convert { source, destination, bit_order, validate } => {
            convert(&source, &destination, bit_order, validate)?;
            println!("Converted to {}", destination.display());
        }
        Commands::Info { source } => println!("{}", load_handler(&source)?.display()?),
    }
    Ok(())
}
