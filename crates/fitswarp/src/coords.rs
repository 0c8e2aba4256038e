//! Sky coordinate systems, point types and the conversions between systems.
//!
//! Conversions go through unit vectors and fixed 3×3 rotation matrices.
//! Equatorial J2000 is the hub: every system converts to it and from it.
//! FK4 B1950 ↔ FK5 J2000 uses the classical frame matrix without E-terms or
//! proper motion.

use std::fmt;

/// Celestial reference frame of a world coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoordSys {
    EquatorialJ2000,
    EquatorialB1950,
    Galactic,
    EclipticJ2000,
    EclipticB1950,
}

impl CoordSys {
    /// Whether longitudes in this system are right ascensions.
    pub fn is_equatorial(self) -> bool {
        matches!(self, CoordSys::EquatorialJ2000 | CoordSys::EquatorialB1950)
    }

    /// Nominal equinox year used when writing EQUINOX for this system.
    pub fn equinox(self) -> f64 {
        match self {
            CoordSys::EquatorialB1950 | CoordSys::EclipticB1950 => 1950.0,
            _ => 2000.0,
        }
    }

    /// CTYPE1/CTYPE2 prefixes for a tangent-plane header in this system.
    pub fn tan_ctypes(self) -> (&'static str, &'static str) {
        match self {
            CoordSys::EquatorialJ2000 | CoordSys::EquatorialB1950 => ("RA---TAN", "DEC--TAN"),
            CoordSys::Galactic => ("GLON-TAN", "GLAT-TAN"),
            CoordSys::EclipticJ2000 | CoordSys::EclipticB1950 => ("ELON-TAN", "ELAT-TAN"),
        }
    }
}

impl fmt::Display for CoordSys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordSys::EquatorialJ2000 => "EQ_J2000",
            CoordSys::EquatorialB1950 => "EQ_B1950",
            CoordSys::Galactic => "GALACTIC",
            CoordSys::EclipticJ2000 => "EC_J2000",
            CoordSys::EclipticB1950 => "EC_B1950",
        };
        f.write_str(s)
    }
}

/// A position on the sky, in degrees, tagged with its frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPt {
    pub lon: f64,
    pub lat: f64,
    pub sys: CoordSys,
}

impl WorldPt {
    pub fn new(lon: f64, lat: f64, sys: CoordSys) -> Self {
        WorldPt { lon, lat, sys }
    }
}

/// A FITS image pixel position. Pixel (1, 1) is the center of the first sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePt {
    pub x: f64,
    pub y: f64,
}

impl ImagePt {
    pub fn new(x: f64, y: f64) -> Self {
        ImagePt { x, y }
    }
}

/// A position on a zoomed display of the image, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPt {
    pub x: f64,
    pub y: f64,
}

/// Any point the engine accepts, carrying its own coordinate tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Point {
    Image(ImagePt),
    Screen(ScreenPt),
    World(WorldPt),
}

/// Zoom and height of a display, for screen ↔ image conversion.
///
/// Screen y grows downwards while FITS rows grow upwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenTransform {
    pub zoom: f64,
    pub image_height: usize,
}

impl ScreenTransform {
    pub fn to_image(&self, pt: ScreenPt) -> ImagePt {
        ImagePt {
            x: pt.x / self.zoom + 0.5,
            y: self.image_height as f64 + 0.5 - pt.y / self.zoom,
        }
    }

    pub fn to_screen(&self, pt: ImagePt) -> ScreenPt {
        ScreenPt {
            x: (pt.x - 0.5) * self.zoom,
            y: (self.image_height as f64 + 0.5 - pt.y) * self.zoom,
        }
    }
}

// ---- Rotation matrices ----

type Mat3 = [[f64; 3]; 3];

/// Equatorial J2000 → Galactic (IAU).
const EQ_J2000_TO_GAL: Mat3 = [
    [-0.0548755604, -0.8734370902, -0.4838350155],
    [0.4941094279, -0.4448296300, 0.7469822445],
    [-0.8676661490, -0.1980763734, 0.4559837762],
];

/// FK4 B1950 → FK5 J2000.
const B1950_TO_J2000: Mat3 = [
    [0.9999256782, -0.0111820611, -0.0048579477],
    [0.0111820610, 0.9999374784, -0.0000271765],
    [0.0048579479, -0.0000271474, 0.9999881997],
];

const OBLIQUITY_J2000_DEG: f64 = 23.439_291_1;
const OBLIQUITY_B1950_DEG: f64 = 23.445_788_9;

fn to_vector(lon_deg: f64, lat_deg: f64) -> [f64; 3] {
    let (lon, lat) = (lon_deg.to_radians(), lat_deg.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

fn from_vector(v: [f64; 3]) -> (f64, f64) {
    let lon = v[1].atan2(v[0]).to_degrees();
    let lat = v[2].clamp(-1.0, 1.0).asin().to_degrees();
    (lon.rem_euclid(360.0), lat)
}

fn mul(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

fn mul_transposed(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[1][0] * v[1] + m[2][0] * v[2],
        m[0][1] * v[0] + m[1][1] * v[1] + m[2][1] * v[2],
        m[0][2] * v[0] + m[1][2] * v[1] + m[2][2] * v[2],
    ]
}

/// Equatorial → ecliptic is a rotation about x by the obliquity.
fn ecliptic_matrix(obliquity_deg: f64) -> Mat3 {
    let (s, c) = obliquity_deg.to_radians().sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, s], [0.0, -s, c]]
}

fn to_j2000(v: [f64; 3], from: CoordSys) -> [f64; 3] {
    match from {
        CoordSys::EquatorialJ2000 => v,
        CoordSys::EquatorialB1950 => mul(&B1950_TO_J2000, v),
        CoordSys::Galactic => mul_transposed(&EQ_J2000_TO_GAL, v),
        CoordSys::EclipticJ2000 => mul_transposed(&ecliptic_matrix(OBLIQUITY_J2000_DEG), v),
        CoordSys::EclipticB1950 => {
            let eq1950 = mul_transposed(&ecliptic_matrix(OBLIQUITY_B1950_DEG), v);
            mul(&B1950_TO_J2000, eq1950)
        }
    }
}

fn from_j2000(v: [f64; 3], to: CoordSys) -> [f64; 3] {
    match to {
        CoordSys::EquatorialJ2000 => v,
        CoordSys::EquatorialB1950 => mul_transposed(&B1950_TO_J2000, v),
        CoordSys::Galactic => mul(&EQ_J2000_TO_GAL, v),
        CoordSys::EclipticJ2000 => mul(&ecliptic_matrix(OBLIQUITY_J2000_DEG), v),
        CoordSys::EclipticB1950 => {
            let eq1950 = mul_transposed(&B1950_TO_J2000, v);
            mul(&ecliptic_matrix(OBLIQUITY_B1950_DEG), eq1950)
        }
    }
}

/// Re-express `pt` in the `to` frame.
pub fn convert(pt: WorldPt, to: CoordSys) -> WorldPt {
    if pt.sys == to {
        return pt;
    }
    let v = from_j2000(to_j2000(to_vector(pt.lon, pt.lat), pt.sys), to);
    let (lon, lat) = from_vector(v);
    WorldPt { lon, lat, sys: to }
}

/// Great-circle distance between two points, in degrees.
///
/// `b` is converted into the frame of `a` first.
pub fn angular_distance(a: WorldPt, b: WorldPt) -> f64 {
    let b = convert(b, a.sys);
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    (2.0 * h.sqrt().clamp(0.0, 1.0).asin()).to_degrees()
}

/// Position angle of `to` as seen from `from`, east of north, in degrees.
pub fn position_angle(from: WorldPt, to: WorldPt) -> f64 {
    let to = convert(to, from.sys);
    let (dec1, dec2) = (from.lat.to_radians(), to.lat.to_radians());
    let dra = (to.lon - from.lon).to_radians();
    let y = dra.sin() * dec2.cos();
    let x = dec1.cos() * dec2.sin() - dec1.sin() * dec2.cos() * dra.cos();
    y.atan2(x).to_degrees()
}
