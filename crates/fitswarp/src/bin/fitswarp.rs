//! Reproject a FITS image: north up, galactic north up, rotated, or onto
//! the grid of another image.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use fitswarp::reproject::orient;
use fitswarp::{parse_fits, read_raster, AnyRaster, ImageHeader, ReprojectOptions, Resampling};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reproject a FITS image onto a new sky grid")]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["north_up", "galactic", "rotate", "reference"])
))]
struct Args {
    /// Input FITS file
    input: PathBuf,

    /// Output FITS file
    output: PathBuf,

    /// Equatorial north up, east left
    #[arg(long)]
    north_up: bool,

    /// Galactic north up
    #[arg(long)]
    galactic: bool,

    /// Rotate by this many degrees
    #[arg(long, value_name = "DEG", allow_negative_numbers = true)]
    rotate: Option<f64>,

    /// Match the grid of this FITS image
    #[arg(long = "match", value_name = "REF")]
    reference: Option<PathBuf>,

    /// With --match, keep a coarse input at a whole multiple of the reference scale
    #[arg(long, requires = "reference")]
    scale: bool,

    /// Bilinear instead of nearest-neighbour sampling
    #[arg(long)]
    bilinear: bool,

    /// HDU index (default: first image HDU)
    #[arg(long)]
    hdu: Option<usize>,

    /// Zero-based plane of a cube
    #[arg(long, default_value_t = 0)]
    plane: usize,
}

fn read_fits(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn first_image_header(path: &Path) -> Result<ImageHeader> {
    let bytes = read_fits(path)?;
    let file = parse_fits(&bytes)?;
    let (_, hdu) = file
        .first_image()
        .with_context(|| format!("{} holds no image", path.display()))?;
    Ok(hdu.image_header()?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let bytes = read_fits(&args.input)?;
    let file = parse_fits(&bytes)?;
    let (index, hdu) = match args.hdu {
        Some(i) => (i, file.get(i).with_context(|| format!("no HDU {i}"))?),
        None => file.first_image().context("no image HDU")?,
    };
    let header = hdu.image_header()?.with_plane(args.plane);
    let planes = read_raster(&bytes, hdu)?.planes();
    let plane = planes
        .get(args.plane)
        .with_context(|| format!("HDU {index} has {} plane(s)", planes.len()))?;

    let opts = ReprojectOptions {
        resampling: if args.bilinear {
            Resampling::bilinear()
        } else {
            Resampling::Nearest
        },
        ..ReprojectOptions::default()
    };

    let out = if args.north_up {
        orient::north_up(plane, &header, &opts)?
    } else if args.galactic {
        orient::north_up_galactic(plane, &header, &opts)?
    } else if let Some(angle) = args.rotate {
        orient::rotate(plane, &header, angle, &opts)?
    } else {
        let path = args.reference.as_deref().context("no reprojection target")?;
        let reference = first_image_header(path)?;
        orient::match_reference(plane, &header, &reference, args.scale, &opts)?
    };

    let cards = out.header.apply_to_cards(&hdu.cards);
    let raster = AnyRaster::from(out.raster);
    let hdu_bytes = fitswarp::fits::write_image_hdu(&cards, &raster, true);
    fs::write(&args.output, fitswarp::fits::write_fits(&[hdu_bytes]))
        .with_context(|| format!("writing {}", args.output.display()))?;

    tracing::info!(
        width = raster.width(),
        height = raster.height(),
        scale_factor = ?out.scale_factor,
        "wrote {}",
        args.output.display()
    );
    Ok(())
}
