//! Crop the image HDUs of a FITS file to a pixel box or a sky circle.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use fitswarp::crop::sky_circle_box;
use fitswarp::{crop_fits, parse_fits, CoordSys, PixelBox, WorldPt};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
struct Circle {
    ra: f64,
    dec: f64,
    radius: f64,
}

fn numbers<const N: usize>(s: &str) -> std::result::Result<[f64; N], String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| e.to_string())?;
    parts
        .try_into()
        .map_err(|_| format!("expected {N} comma-separated numbers"))
}

fn parse_box(s: &str) -> std::result::Result<PixelBox, String> {
    let [x0, y0, x1, y1] = numbers::<4>(s)?;
    Ok(PixelBox::new(x0 as i64, y0 as i64, x1 as i64, y1 as i64))
}

fn parse_circle(s: &str) -> std::result::Result<Circle, String> {
    let [ra, dec, radius] = numbers::<3>(s)?;
    if radius <= 0.0 {
        return Err("radius must be positive".into());
    }
    Ok(Circle { ra, dec, radius })
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Crop FITS images to a pixel box or sky circle")]
#[command(group(ArgGroup::new("region").required(true).args(["pixel_box", "circle"])))]
struct Args {
    /// Input FITS file
    input: PathBuf,

    /// Output FITS file
    output: PathBuf,

    /// Zero-based inclusive pixel box
    #[arg(long = "box", value_name = "X0,Y0,X1,Y1", value_parser = parse_box, allow_hyphen_values = true)]
    pixel_box: Option<PixelBox>,

    /// J2000 circle, all in degrees
    #[arg(long, value_name = "RA,DEC,RADIUS", value_parser = parse_circle, allow_hyphen_values = true)]
    circle: Option<Circle>,

    /// Crop this HDU only (default: every image HDU)
    #[arg(long)]
    hdu: Option<usize>,
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

    let bx = match (args.pixel_box, args.circle) {
        (Some(bx), _) => bx,
        (None, Some(c)) => {
            let file = parse_fits(&bytes)?;
            let hdu = match args.hdu {
                Some(i) => file.get(i).with_context(|| format!("no HDU {i}"))?,
                None => file.first_image().context("no image HDU")?.1,
            };
            let center = WorldPt::new(c.ra, c.dec, CoordSys::EquatorialJ2000);
            sky_circle_box(&hdu.image_header()?, center, c.radius)?
        }
        (None, None) => anyhow::bail!("no crop region"),
    };

    let out = crop_fits(&bytes, args.hdu, bx)?;
    fs::write(&args.output, &out)
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!(?bx, bytes = out.len(), "wrote {}", args.output.display());
    Ok(())
}
