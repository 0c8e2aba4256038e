//! Stretch one plane of a FITS image to an 8-bit PGM.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use fitswarp::{
    parse_fits, read_raster, stretch_any, CutMode, RangeValues, StretchAlgorithm, StretchOptions,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Percentage,
    Maxmin,
    Absolute,
    Zscale,
    Sigma,
}

impl From<Mode> for CutMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Percentage => CutMode::Percentage,
            Mode::Maxmin => CutMode::MaxMin,
            Mode::Absolute => CutMode::Absolute,
            Mode::Zscale => CutMode::Zscale,
            Mode::Sigma => CutMode::Sigma,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algorithm {
    Linear,
    Log,
    Loglog,
    Equal,
    Squared,
    Sqrt,
    Asinh,
    Gamma,
}

impl From<Algorithm> for StretchAlgorithm {
    fn from(a: Algorithm) -> Self {
        match a {
            Algorithm::Linear => StretchAlgorithm::Linear,
            Algorithm::Log => StretchAlgorithm::Log,
            Algorithm::Loglog => StretchAlgorithm::LogLog,
            Algorithm::Equal => StretchAlgorithm::Equal,
            Algorithm::Squared => StretchAlgorithm::Squared,
            Algorithm::Sqrt => StretchAlgorithm::Sqrt,
            Algorithm::Asinh => StretchAlgorithm::Asinh,
            Algorithm::Gamma => StretchAlgorithm::PowerLawGamma,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stretch a FITS image plane to an 8-bit PGM")]
struct Args {
    /// Input FITS file
    input: PathBuf,

    /// Output PGM file
    output: PathBuf,

    /// How the low cut level is chosen
    #[arg(long, value_enum, default_value_t = Mode::Percentage)]
    lower_mode: Mode,

    /// Low cut value, interpreted by the lower mode
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    lower: f64,

    /// How the high cut level is chosen
    #[arg(long, value_enum, default_value_t = Mode::Percentage)]
    upper_mode: Mode,

    /// High cut value, interpreted by the upper mode
    #[arg(long, default_value_t = 99.0, allow_negative_numbers = true)]
    upper: f64,

    /// Stretch curve
    #[arg(long, value_enum, default_value_t = Algorithm::Linear)]
    algorithm: Algorithm,

    /// Full range string (`88,1,88,99,44,...`); overrides the flags above
    #[arg(long)]
    range: Option<RangeValues>,

    /// HDU index (default: first image HDU)
    #[arg(long)]
    hdu: Option<usize>,

    /// Zero-based plane of a cube
    #[arg(long, default_value_t = 0)]
    plane: usize,

    /// Write blank pixels as 0 instead of 255
    #[arg(long, default_value_t = false)]
    zero_blank: bool,
}

impl Args {
    fn range_values(&self) -> RangeValues {
        if let Some(rv) = self.range {
            return rv;
        }
        RangeValues {
            lower_mode: self.lower_mode.into(),
            lower_value: self.lower,
            upper_mode: self.upper_mode.into(),
            upper_value: self.upper,
            algorithm: self.algorithm.into(),
            ..RangeValues::default()
        }
    }
}

// Binary PGM, top row first. FITS rows run bottom up.
fn write_pgm(path: &Path, width: usize, height: usize, pixels: &[u8]) -> Result<()> {
    let mut buf = format!("P5\n{width} {height}\n255\n").into_bytes();
    for row in pixels.chunks(width.max(1)).rev() {
        buf.extend_from_slice(row);
    }
    fs::write(path, buf).with_context(|| format!("writing {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let bytes =
        fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
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

    let range = args.range_values();
    let opts = StretchOptions {
        map_blank_to_zero: args.zero_blank,
    };
    let out = stretch_any(plane, &header, &range, &opts);
    write_pgm(&args.output, plane.width(), plane.height(), &out.pixels)?;

    tracing::info!(
        hdu = index,
        plane = args.plane,
        low = out.low,
        high = out.high,
        range = %range,
        "wrote {}",
        args.output.display()
    );
    Ok(())
}
