//! Typed image astrometry header.
//!
//! [`ImageHeader`] is parsed once from a card list and then treated as an
//! immutable value: every adjustment made during reprojection or cropping
//! goes through a `with_*` method that returns a new header.
//! [`ImageHeader::apply_to_cards`] writes the astrometry back into a card list
//! for output HDUs.

use crate::card::{self, Card, Value};
use crate::coords::{angular_distance, CoordSys, ImagePt};
use crate::error::{Error, Result};
use crate::projection::Projection;

/// Largest SIP polynomial dimension kept per axis (orders up to 9).
pub const MAX_SIP_LENGTH: usize = 10;

/// Sky projection named by the CTYPE suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProjectionKind {
    Gnomonic,
    Orthographic,
    ZenithalEquidistant,
    Ncp,
    Aitoff,
    Cartesian,
    CylindricalEqualArea,
    SansonFlamsteed,
    Linear,
    Plate,
    Unrecognized,
    Unspecified,
}

impl ProjectionKind {
    /// Classify a CTYPE1 value.
    pub fn from_ctype(ctype1: &str) -> ProjectionKind {
        let trimmed = ctype1.trim();
        let padded = format!("{ctype1:<8}");
        let tail = padded.get(4..8).unwrap_or("");

        if trimmed.contains("-TAN") {
            ProjectionKind::Gnomonic
        } else if trimmed.contains("-SIN") {
            ProjectionKind::Orthographic
        } else if trimmed.ends_with("-NCP") {
            ProjectionKind::Ncp
        } else if trimmed.ends_with("-ARC") {
            ProjectionKind::ZenithalEquidistant
        } else if trimmed.ends_with("-AIT") || trimmed.ends_with("-ATF") {
            ProjectionKind::Aitoff
        } else if trimmed.ends_with("-CAR") {
            ProjectionKind::Cartesian
        } else if trimmed.ends_with("-CEA") {
            ProjectionKind::CylindricalEqualArea
        } else if trimmed.ends_with("-SFL") || trimmed.ends_with("-GLS") {
            ProjectionKind::SansonFlamsteed
        } else if tail == "----" || tail.trim().is_empty() {
            ProjectionKind::Linear
        } else {
            ProjectionKind::Unrecognized
        }
    }

    /// Four-character CTYPE suffix for this kind, if it has one.
    pub fn ctype_code(self) -> Option<&'static str> {
        match self {
            ProjectionKind::Gnomonic => Some("TAN"),
            ProjectionKind::Orthographic => Some("SIN"),
            ProjectionKind::ZenithalEquidistant => Some("ARC"),
            ProjectionKind::Ncp => Some("NCP"),
            ProjectionKind::Aitoff => Some("AIT"),
            ProjectionKind::Cartesian => Some("CAR"),
            ProjectionKind::CylindricalEqualArea => Some("CEA"),
            ProjectionKind::SansonFlamsteed => Some("SFL"),
            _ => None,
        }
    }
}

/// Linear pixel → intermediate-world transform, degrees per pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CdMatrix {
    pub cd1_1: f64,
    pub cd1_2: f64,
    pub cd2_1: f64,
    pub cd2_2: f64,
}

impl CdMatrix {
    pub fn new(cd1_1: f64, cd1_2: f64, cd2_1: f64, cd2_2: f64) -> Self {
        CdMatrix {
            cd1_1,
            cd1_2,
            cd2_1,
            cd2_2,
        }
    }

    /// Equivalent matrix for CDELT scales and a CROTA2 rotation in degrees.
    pub fn from_cdelt(cdelt1: f64, cdelt2: f64, crota2: f64) -> Self {
        let (s, c) = crota2.to_radians().sin_cos();
        CdMatrix {
            cd1_1: cdelt1 * c,
            cd1_2: -cdelt2 * s,
            cd2_1: cdelt1 * s,
            cd2_2: cdelt2 * c,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.cd1_1 * self.cd2_2 - self.cd1_2 * self.cd2_1
    }

    pub fn scaled(&self, factor: f64) -> Self {
        CdMatrix {
            cd1_1: self.cd1_1 * factor,
            cd1_2: self.cd1_2 * factor,
            cd2_1: self.cd2_1 * factor,
            cd2_2: self.cd2_2 * factor,
        }
    }

    /// Rotation angle in degrees implied by the matrix.
    pub fn rotation(&self) -> f64 {
        (-self.cd1_2).atan2(self.cd2_2).to_degrees()
    }

    // Header order for a header whose first axis is latitude.
    fn reversed(&self) -> Self {
        CdMatrix {
            cd1_1: self.cd2_1,
            cd1_2: self.cd1_1,
            cd2_1: self.cd2_2,
            cd2_2: self.cd1_2,
        }
    }

    fn unreversed(&self) -> Self {
        CdMatrix {
            cd1_1: self.cd1_2,
            cd1_2: self.cd2_2,
            cd2_1: self.cd1_1,
            cd2_2: self.cd2_1,
        }
    }
}

/// One SIP polynomial: `coeffs[i][j]` multiplies `u^i v^j` for `i + j <= order`.
#[derive(Debug, Clone, PartialEq)]
pub struct SipPolynomial {
    pub order: usize,
    pub coeffs: [[f64; MAX_SIP_LENGTH]; MAX_SIP_LENGTH],
}

impl SipPolynomial {
    pub fn zero(order: usize) -> Self {
        SipPolynomial {
            order: order.min(MAX_SIP_LENGTH - 1),
            coeffs: [[0.0; MAX_SIP_LENGTH]; MAX_SIP_LENGTH],
        }
    }

    pub fn eval(&self, u: f64, v: f64) -> f64 {
        let mut sum = 0.0;
        let mut up = 1.0;
        for i in 0..=self.order {
            let mut vp = 1.0;
            for j in 0..=(self.order - i) {
                sum += self.coeffs[i][j] * up * vp;
                vp *= v;
            }
            up *= u;
        }
        sum
    }

    fn read(cards: &[Card], prefix: &str) -> Option<Self> {
        let order = card::find_int(cards, &format!("{prefix}_ORDER"))?;
        if order < 0 {
            return None;
        }
        let mut poly = SipPolynomial::zero(order as usize);
        for i in 0..=poly.order {
            for j in 0..=(poly.order - i) {
                poly.coeffs[i][j] =
                    card::find_float(cards, &format!("{prefix}_{i}_{j}")).unwrap_or(0.0);
            }
        }
        Some(poly)
    }

    fn write(&self, cards: &mut Vec<Card>, prefix: &str) {
        card::set_value(
            cards,
            &format!("{prefix}_ORDER"),
            Value::Integer(self.order as i64),
        );
        for i in 0..=self.order {
            for j in 0..=(self.order - i) {
                let c = self.coeffs[i][j];
                let key = format!("{prefix}_{i}_{j}");
                if c != 0.0 {
                    card::set_value(cards, &key, Value::Float(c));
                } else {
                    card::remove_keyword(cards, &key);
                }
            }
        }
    }

    fn remove(cards: &mut Vec<Card>, prefix: &str) {
        card::remove_keyword(cards, &format!("{prefix}_ORDER"));
        for i in 0..MAX_SIP_LENGTH {
            for j in 0..MAX_SIP_LENGTH - i {
                card::remove_keyword(cards, &format!("{prefix}_{i}_{j}"));
            }
        }
    }
}

/// Simple Imaging Polynomial distortion: forward A/B and optional inverse AP/BP.
#[derive(Debug, Clone, PartialEq)]
pub struct SipCoefficients {
    pub a: SipPolynomial,
    pub b: SipPolynomial,
    pub ap: Option<SipPolynomial>,
    pub bp: Option<SipPolynomial>,
}

/// Digitized Sky Survey plate solution.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateSolution {
    /// PLTRAH, PLTRAM, PLTRAS.
    pub ra_hms: [f64; 3],
    /// PLTDECSN is '-'.
    pub dec_negative: bool,
    /// PLTDECD, PLTDECM, PLTDECS.
    pub dec_dms: [f64; 3],
    /// CNPIX1, CNPIX2: plate pixel of the first image pixel.
    pub cnpix: [f64; 2],
    /// PLTSCALE in arcsec/mm.
    pub plate_scale: f64,
    /// XPIXELSZ, YPIXELSZ in microns.
    pub pixel_size: [f64; 2],
    pub ppo: [f64; 6],
    pub amdx: [f64; 20],
    pub amdy: [f64; 20],
}

const PLATE_SCALAR_KEYS: [&str; 12] = [
    "PLTRAH", "PLTRAM", "PLTRAS", "PLTDECSN", "PLTDECD", "PLTDECM", "PLTDECS", "CNPIX1",
    "CNPIX2", "PLTSCALE", "XPIXELSZ", "YPIXELSZ",
];

impl PlateSolution {
    /// Plate center right ascension in radians.
    pub fn plate_ra(&self) -> f64 {
        let [h, m, s] = self.ra_hms;
        ((h + m / 60.0 + s / 3600.0) * 15.0).to_radians()
    }

    /// Plate center declination in radians.
    pub fn plate_dec(&self) -> f64 {
        let [d, m, s] = self.dec_dms;
        let sign = if self.dec_negative { -1.0 } else { 1.0 };
        (sign * (d + m / 60.0 + s / 3600.0)).to_radians()
    }

    fn read(cards: &[Card]) -> Self {
        let f = |k: &str| card::find_float(cards, k).unwrap_or(0.0);
        let dec_negative = card::find_string(cards, "PLTDECSN")
            .map(|s| s.starts_with('-'))
            .unwrap_or(false);
        let mut ppo = [0.0; 6];
        for (i, p) in ppo.iter_mut().enumerate() {
            *p = f(&format!("PPO{}", i + 1));
        }
        let mut amdx = [0.0; 20];
        let mut amdy = [0.0; 20];
        for i in 0..20 {
            amdx[i] = f(&format!("AMDX{}", i + 1));
            amdy[i] = f(&format!("AMDY{}", i + 1));
        }
        PlateSolution {
            ra_hms: [f("PLTRAH"), f("PLTRAM"), f("PLTRAS")],
            dec_negative,
            dec_dms: [f("PLTDECD"), f("PLTDECM"), f("PLTDECS")],
            cnpix: [f("CNPIX1"), f("CNPIX2")],
            plate_scale: f("PLTSCALE"),
            pixel_size: [f("XPIXELSZ"), f("YPIXELSZ")],
            ppo,
            amdx,
            amdy,
        }
    }

    fn write(&self, cards: &mut Vec<Card>) {
        let sign = if self.dec_negative { "-" } else { "+" };
        let scalars = [
            ("PLTRAH", self.ra_hms[0]),
            ("PLTRAM", self.ra_hms[1]),
            ("PLTRAS", self.ra_hms[2]),
            ("PLTDECD", self.dec_dms[0]),
            ("PLTDECM", self.dec_dms[1]),
            ("PLTDECS", self.dec_dms[2]),
            ("CNPIX1", self.cnpix[0]),
            ("CNPIX2", self.cnpix[1]),
            ("PLTSCALE", self.plate_scale),
            ("XPIXELSZ", self.pixel_size[0]),
            ("YPIXELSZ", self.pixel_size[1]),
        ];
        for (key, v) in scalars {
            card::set_value(cards, key, Value::Float(v));
        }
        card::set_value(cards, "PLTDECSN", Value::String(sign.into()));
        for (i, v) in self.ppo.iter().enumerate() {
            card::set_value(cards, &format!("PPO{}", i + 1), Value::Float(*v));
        }
        for i in 0..20 {
            card::set_value(cards, &format!("AMDX{}", i + 1), Value::Float(self.amdx[i]));
            card::set_value(cards, &format!("AMDY{}", i + 1), Value::Float(self.amdy[i]));
        }
    }

    fn remove(cards: &mut Vec<Card>) {
        for key in PLATE_SCALAR_KEYS {
            card::remove_keyword(cards, key);
        }
        for i in 1..=6 {
            card::remove_keyword(cards, &format!("PPO{i}"));
        }
        for i in 1..=20 {
            card::remove_keyword(cards, &format!("AMDX{i}"));
            card::remove_keyword(cards, &format!("AMDY{i}"));
        }
    }
}

/// Image geometry, calibration and astrometry of one image HDU (or one
/// plane of a cube).
///
/// CRVAL and CDELT (and the CD matrix) are stored in longitude-first order
/// even when the file lists the latitude axis first; `axes_reversed`
/// remembers the file order for [`apply_to_cards`](Self::apply_to_cards).
/// When `cd` is present it is authoritative and `cdelt1/2`, `crota2` are
/// derived approximations.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHeader {
    pub bitpix: i64,
    pub naxis: usize,
    pub naxis1: usize,
    pub naxis2: usize,
    pub naxis3: usize,
    pub crpix1: f64,
    pub crpix2: f64,
    pub crval1: f64,
    pub crval2: f64,
    pub cdelt1: f64,
    pub cdelt2: f64,
    pub crota1: f64,
    pub crota2: f64,
    pub ctype1: String,
    pub ctype2: String,
    pub kind: ProjectionKind,
    pub axes_reversed: bool,
    pub cd: Option<CdMatrix>,
    pub sip: Option<SipCoefficients>,
    pub plate: Option<PlateSolution>,
    pub equinox: f64,
    pub radecsys: Option<String>,
    pub blank: Option<i64>,
    pub bscale: f64,
    pub bzero: f64,
    pub datamin: f64,
    pub datamax: f64,
    pub bunit: String,
    /// Zero-based plane of the cube this header describes.
    pub plane_number: usize,
    /// Byte offset of the data segment in its file, when known.
    pub data_offset: usize,
}

fn is_reversed_ctype(ctype1: &str) -> bool {
    let t = ctype1.trim();
    ["DEC", "MM", "GLAT", "LAT", "ELAT"]
        .iter()
        .any(|p| t.starts_with(p))
}

fn read_cd_term(cards: &[Card], i: usize, j: usize) -> Option<f64> {
    card::find_float(cards, &format!("CD{i}_{j}"))
        .or_else(|| card::find_float(cards, &format!("CD00{i}00{j}")))
}

impl ImageHeader {
    /// Parse the astrometry and calibration keywords of an image header.
    pub fn from_cards(cards: &[Card]) -> Result<Self> {
        let bitpix = card::find_int(cards, "BITPIX").ok_or(Error::MissingKeyword("BITPIX"))?;
        let naxis = card::find_int(cards, "NAXIS").ok_or(Error::MissingKeyword("NAXIS"))?;
        let axis_len = |k: &str| card::find_int(cards, k).unwrap_or(0).max(0) as usize;
        let naxis1 = axis_len("NAXIS1");
        let naxis2 = axis_len("NAXIS2");
        let naxis3 = if naxis > 2 { axis_len("NAXIS3") } else { 1 };

        let f = |k: &str, default: f64| card::find_float(cards, k).unwrap_or(default);
        let mut crpix1 = f("CRPIX1", f64::NAN);
        let mut crpix2 = f("CRPIX2", f64::NAN);
        let mut crval1 = f("CRVAL1", f64::NAN);
        let mut crval2 = f("CRVAL2", f64::NAN);
        let mut cdelt1 = f("CDELT1", 0.0);
        let mut cdelt2 = f("CDELT2", 0.0);
        let crota1 = f("CROTA1", 0.0);
        let mut crota2 = f("CROTA2", 0.0);

        let ctype1 = card::find_string(cards, "CTYPE1").map(str::to_string);
        let ctype2 = card::find_string(cards, "CTYPE2").unwrap_or("").to_string();
        let mut kind = match &ctype1 {
            _ if card::contains(cards, "DSKYGRID") => ProjectionKind::Orthographic,
            Some(c) => ProjectionKind::from_ctype(c),
            None => ProjectionKind::Unspecified,
        };
        let ctype1 = ctype1.unwrap_or_default();
        let axes_reversed = is_reversed_ctype(&ctype1);

        if kind == ProjectionKind::Cartesian && cdelt1 != 0.0 {
            let halfway = (180.0 / cdelt1).abs();
            if crpix1 > halfway {
                crpix1 -= 2.0 * halfway;
            }
            if crpix1 < -halfway {
                crpix1 += 2.0 * halfway;
            }
        }

        let cd_terms = [
            read_cd_term(cards, 1, 1),
            read_cd_term(cards, 1, 2),
            read_cd_term(cards, 2, 1),
            read_cd_term(cards, 2, 2),
        ];
        let cd_terms = if cd_terms.iter().all(Option::is_none) {
            let pc = |k: &str| card::find_float(cards, k);
            [
                pc("PC1_1").map(|v| cdelt1 * v),
                pc("PC1_2").map(|v| cdelt1 * v),
                pc("PC2_1").map(|v| cdelt2 * v),
                pc("PC2_2").map(|v| cdelt2 * v),
            ]
        } else {
            cd_terms
        };
        let mut have_cd = cd_terms.iter().any(Option::is_some);
        let telescope = card::find_string(cards, "TELESCOP").unwrap_or("");
        if telescope.starts_with("ISO") && cdelt1 != 0.0 && cdelt2 != 0.0 {
            have_cd = false;
        }

        let astrometry_present = !crval1.is_nan()
            && !crval2.is_nan()
            && !crpix1.is_nan()
            && !crpix2.is_nan()
            && kind != ProjectionKind::Unrecognized;

        let mut cd = None;
        if astrometry_present && have_cd {
            let [c11, c12, c21, c22] = cd_terms.map(|t| t.unwrap_or(0.0));
            let mut matrix = CdMatrix::new(c11, c12, c21, c22);
            if axes_reversed {
                std::mem::swap(&mut crval1, &mut crval2);
                matrix = matrix.reversed();
            }
            crota2 = matrix.rotation();
            cd = Some(matrix);
        } else if axes_reversed {
            std::mem::swap(&mut crval1, &mut crval2);
            std::mem::swap(&mut cdelt1, &mut cdelt2);
        }

        let sip = if ctype1.trim().ends_with("-SIP") {
            match (
                SipPolynomial::read(cards, "A"),
                SipPolynomial::read(cards, "B"),
            ) {
                (Some(a), Some(b)) => Some(SipCoefficients {
                    a,
                    b,
                    ap: SipPolynomial::read(cards, "AP"),
                    bp: SipPolynomial::read(cards, "BP"),
                }),
                _ => None,
            }
        } else {
            None
        };

        let plate = if card::contains(cards, "PLTRAH") {
            let p = PlateSolution::read(cards);
            kind = ProjectionKind::Plate;
            crpix1 = 0.5 - p.cnpix[0];
            crpix2 = 0.5 - p.cnpix[1];
            if cdelt1 == 0.0 {
                cdelt1 = -p.plate_scale * p.pixel_size[0] / 1000.0 / 3600.0;
                cdelt2 = p.plate_scale * p.pixel_size[1] / 1000.0 / 3600.0;
            }
            Some(p)
        } else {
            None
        };

        let equinox = match card::find_float(cards, "EQUINOX") {
            Some(e) if e != 0.0 => e,
            _ => f("EPOCH", 2000.0),
        };
        let radecsys = card::find_string(cards, "RADECSYS")
            .or_else(|| card::find_string(cards, "RADESYS"))
            .map(str::to_string);

        let mut header = ImageHeader {
            bitpix,
            naxis: naxis.max(0) as usize,
            naxis1,
            naxis2,
            naxis3,
            crpix1,
            crpix2,
            crval1,
            crval2,
            cdelt1,
            cdelt2,
            crota1,
            crota2,
            ctype1,
            ctype2,
            kind,
            axes_reversed,
            cd,
            sip,
            plate,
            equinox,
            radecsys,
            blank: card::find_int(cards, "BLANK"),
            bscale: f("BSCALE", 1.0),
            bzero: f("BZERO", 0.0),
            datamin: f("DATAMIN", f64::NAN),
            datamax: f("DATAMAX", f64::NAN),
            bunit: card::find_string(cards, "BUNIT").unwrap_or("DN").to_string(),
            plane_number: 0,
            data_offset: 0,
        };
        if header.cd.is_some() {
            header.derive_cdelt_from_cd();
        }
        Ok(header)
    }

    /// Whether the CD matrix is the authoritative linear transform.
    pub fn using_cd(&self) -> bool {
        self.cd.is_some()
    }

    /// The coordinate system of the world coordinates this header maps to.
    pub fn coord_sys(&self) -> CoordSys {
        let besselian = match self.radecsys.as_deref().map(str::trim) {
            Some(s) if s.starts_with("FK4") => true,
            Some(s) if s.starts_with("FK5") || s.starts_with("ICRS") => false,
            _ => self.equinox < 2000.0,
        };
        if self.kind == ProjectionKind::Plate {
            return if besselian {
                CoordSys::EquatorialB1950
            } else {
                CoordSys::EquatorialJ2000
            };
        }
        let prefix = self.ctype1.trim().get(..2).unwrap_or("");
        match prefix {
            "RA" | "DE" | "LL" if besselian => CoordSys::EquatorialB1950,
            "GL" | "LO" => CoordSys::Galactic,
            "EL" if besselian => CoordSys::EclipticB1950,
            "EL" => CoordSys::EclipticJ2000,
            _ => CoordSys::EquatorialJ2000,
        }
    }

    /// Center of the image in FITS pixel coordinates.
    pub fn center(&self) -> ImagePt {
        ImagePt::new(
            (self.naxis1 as f64 + 1.0) / 2.0,
            (self.naxis2 as f64 + 1.0) / 2.0,
        )
    }

    /// Number of samples in one plane.
    pub fn plane_len(&self) -> usize {
        self.naxis1 * self.naxis2
    }

    // CDELT approximations: angular size of one pixel step at CRPIX.
    fn derive_cdelt_from_cd(&mut self) {
        let steps = Projection::new(self).and_then(|proj| {
            let center = proj.image_to_world(ImagePt::new(self.crpix1, self.crpix2))?;
            let right = proj.image_to_world(ImagePt::new(self.crpix1 + 1.0, self.crpix2))?;
            let up = proj.image_to_world(ImagePt::new(self.crpix1, self.crpix2 + 1.0))?;
            Ok((
                angular_distance(center, right),
                angular_distance(center, up),
            ))
        });
        match steps {
            Ok((dx, dy)) => {
                self.cdelt1 = -dx;
                self.cdelt2 = dy;
            }
            Err(_) => {
                self.cdelt1 = 0.0;
                self.cdelt2 = 0.0;
            }
        }
    }

    // ---- value transforms ----

    pub fn with_dimensions(&self, naxis1: usize, naxis2: usize) -> Self {
        ImageHeader {
            naxis1,
            naxis2,
            ..self.clone()
        }
    }

    /// Move the reference pixel. For a plate solution CNPIX follows.
    pub fn with_crpix(&self, crpix1: f64, crpix2: f64) -> Self {
        let mut h = self.clone();
        h.crpix1 = crpix1;
        h.crpix2 = crpix2;
        if let Some(p) = h.plate.as_mut() {
            p.cnpix = [0.5 - crpix1, 0.5 - crpix2];
        }
        h
    }

    pub fn with_crval(&self, crval1: f64, crval2: f64) -> Self {
        ImageHeader {
            crval1,
            crval2,
            ..self.clone()
        }
    }

    /// Make CDELT authoritative. A CD matrix is dropped.
    pub fn with_cdelt(&self, cdelt1: f64, cdelt2: f64) -> Self {
        ImageHeader {
            cdelt1,
            cdelt2,
            cd: None,
            ..self.clone()
        }
    }

    /// Set CROTA2, making CDELT/CROTA authoritative.
    pub fn with_rotation(&self, crota2: f64) -> Self {
        ImageHeader {
            crota2,
            cd: None,
            ..self.clone()
        }
    }

    /// Make `cd` authoritative and re-derive CDELT and CROTA2 from it.
    pub fn with_cd(&self, cd: CdMatrix) -> Self {
        let mut h = self.clone();
        h.crota2 = cd.rotation();
        h.cd = Some(cd);
        h.derive_cdelt_from_cd();
        h
    }

    /// Replace both CTYPEs. The projection kind follows the new CTYPE1 and
    /// the axes are taken as longitude first.
    pub fn with_ctype(&self, ctype1: &str, ctype2: &str) -> Self {
        let mut h = self.clone();
        h.ctype1 = ctype1.to_string();
        h.ctype2 = ctype2.to_string();
        h.kind = ProjectionKind::from_ctype(ctype1);
        h.axes_reversed = false;
        h.plate = None;
        if !ctype1.trim().ends_with("-SIP") {
            h.sip = None;
        }
        h
    }

    pub fn with_equinox(&self, equinox: f64, radecsys: Option<String>) -> Self {
        ImageHeader {
            equinox,
            radecsys,
            ..self.clone()
        }
    }

    /// Header of a single plane of a cube.
    pub fn with_plane(&self, plane_number: usize) -> Self {
        ImageHeader {
            plane_number,
            naxis3: 1,
            ..self.clone()
        }
    }

    /// Header for 32-bit float physical samples: no BLANK, no scaling.
    pub fn with_float_samples(&self) -> Self {
        ImageHeader {
            bitpix: -32,
            blank: None,
            bscale: 1.0,
            bzero: 0.0,
            ..self.clone()
        }
    }

    /// Header of a sub-image whose first pixel was pixel (`dx`, `dy`)
    /// (zero-based) of this image. Sky positions are preserved.
    pub fn shifted_by(&self, dx: f64, dy: f64) -> Self {
        let mut h = self.clone();
        match h.plate.as_mut() {
            Some(p) => {
                p.cnpix[0] += dx;
                p.cnpix[1] += dy;
                h.crpix1 = 0.5 - p.cnpix[0];
                h.crpix2 = 0.5 - p.cnpix[1];
            }
            None => {
                h.crpix1 -= dx;
                h.crpix2 -= dy;
            }
        }
        h
    }

    // ---- card output ----

    /// Write this header's geometry, calibration and astrometry over `base`.
    ///
    /// Keywords the header does not model are kept from `base`. Keywords of
    /// representations the header no longer uses (CD vs CDELT, plate, SIP)
    /// are removed.
    pub fn apply_to_cards(&self, base: &[Card]) -> Vec<Card> {
        let mut cards = base.to_vec();
        card::set_value(&mut cards, "BITPIX", Value::Integer(self.bitpix));
        card::set_value(&mut cards, "NAXIS", Value::Integer(self.naxis as i64));
        card::set_value_after(&mut cards, "NAXIS", "NAXIS1", Value::Integer(self.naxis1 as i64));
        card::set_value_after(&mut cards, "NAXIS1", "NAXIS2", Value::Integer(self.naxis2 as i64));
        if self.naxis > 2 {
            card::set_value_after(
                &mut cards,
                "NAXIS2",
                "NAXIS3",
                Value::Integer(self.naxis3 as i64),
            );
        }

        match self.blank {
            Some(b) => card::set_value(&mut cards, "BLANK", Value::Integer(b)),
            None => card::remove_keyword(&mut cards, "BLANK"),
        }
        if self.bscale != 1.0 || self.bzero != 0.0 {
            card::set_value(&mut cards, "BSCALE", Value::Float(self.bscale));
            card::set_value(&mut cards, "BZERO", Value::Float(self.bzero));
        } else {
            card::remove_keyword(&mut cards, "BSCALE");
            card::remove_keyword(&mut cards, "BZERO");
        }

        if !self.ctype1.is_empty() {
            card::set_value(&mut cards, "CTYPE1", Value::String(self.ctype1.clone()));
        }
        if !self.ctype2.is_empty() {
            card::set_value(&mut cards, "CTYPE2", Value::String(self.ctype2.clone()));
        }

        let has_wcs = [self.crpix1, self.crpix2, self.crval1, self.crval2]
            .iter()
            .all(|v| v.is_finite());
        if has_wcs || self.plate.is_some() || card::contains(&cards, "EPOCH") {
            card::set_value(&mut cards, "EQUINOX", Value::Float(self.equinox));
        }
        card::remove_keyword(&mut cards, "EPOCH");
        match &self.radecsys {
            Some(sys) if card::contains(&cards, "RADECSYS") => {
                card::set_value(&mut cards, "RADECSYS", Value::String(sys.clone()))
            }
            Some(sys) => card::set_value(&mut cards, "RADESYS", Value::String(sys.clone())),
            None => {
                card::remove_keyword(&mut cards, "RADECSYS");
                card::remove_keyword(&mut cards, "RADESYS");
            }
        }

        if let Some(plate) = &self.plate {
            plate.write(&mut cards);
            for key in ["CDELT1", "CDELT2", "CROTA1", "CROTA2"] {
                card::remove_keyword(&mut cards, key);
            }
        } else {
            PlateSolution::remove(&mut cards);
            if has_wcs {
                self.write_linear(&mut cards);
            } else {
                // No sky mapping; only a reference pixel that moved is kept.
                for (key, v) in [("CRPIX1", self.crpix1), ("CRPIX2", self.crpix2)] {
                    if v.is_finite() {
                        card::set_value(&mut cards, key, Value::Float(v));
                    }
                }
            }
        }

        match &self.sip {
            Some(sip) => {
                sip.a.write(&mut cards, "A");
                sip.b.write(&mut cards, "B");
                match &sip.ap {
                    Some(ap) => ap.write(&mut cards, "AP"),
                    None => SipPolynomial::remove(&mut cards, "AP"),
                }
                match &sip.bp {
                    Some(bp) => bp.write(&mut cards, "BP"),
                    None => SipPolynomial::remove(&mut cards, "BP"),
                }
            }
            None => {
                for prefix in ["A", "B", "AP", "BP"] {
                    SipPolynomial::remove(&mut cards, prefix);
                }
            }
        }
        cards
    }

    fn write_linear(&self, cards: &mut Vec<Card>) {
        let (crval1, crval2) = if self.axes_reversed {
            (self.crval2, self.crval1)
        } else {
            (self.crval1, self.crval2)
        };
        card::set_value(cards, "CRPIX1", Value::Float(self.crpix1));
        card::set_value(cards, "CRPIX2", Value::Float(self.crpix2));
        card::set_value(cards, "CRVAL1", Value::Float(crval1));
        card::set_value(cards, "CRVAL2", Value::Float(crval2));

        for i in 1..=2 {
            for j in 1..=2 {
                card::remove_keyword(cards, &format!("CD00{i}00{j}"));
                card::remove_keyword(cards, &format!("PC{i}_{j}"));
                card::remove_keyword(cards, &format!("CD{i}_{j}"));
            }
        }
        match &self.cd {
            Some(cd) => {
                let cd = if self.axes_reversed { cd.unreversed() } else { *cd };
                card::set_value(cards, "CD1_1", Value::Float(cd.cd1_1));
                card::set_value(cards, "CD1_2", Value::Float(cd.cd1_2));
                card::set_value(cards, "CD2_1", Value::Float(cd.cd2_1));
                card::set_value(cards, "CD2_2", Value::Float(cd.cd2_2));
                for key in ["CDELT1", "CDELT2", "CROTA1", "CROTA2"] {
                    card::remove_keyword(cards, key);
                }
            }
            None => {
                let (cdelt1, cdelt2) = if self.axes_reversed {
                    (self.cdelt2, self.cdelt1)
                } else {
                    (self.cdelt1, self.cdelt2)
                };
                card::set_value(cards, "CDELT1", Value::Float(cdelt1));
                card::set_value(cards, "CDELT2", Value::Float(cdelt2));
                card::set_value(cards, "CROTA2", Value::Float(self.crota2));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn card(keyword: &str, value: Value) -> Card {
        Card::new(keyword, value)
    }

    fn tan_header() -> Vec<Card> {
        vec![
            card("SIMPLE", Value::Logical(true)),
            card("BITPIX", Value::Integer(16)),
            card("NAXIS", Value::Integer(2)),
            card("NAXIS1", Value::Integer(100)),
            card("NAXIS2", Value::Integer(80)),
            card("CTYPE1", Value::String("RA---TAN".into())),
            card("CTYPE2", Value::String("DEC--TAN".into())),
            card("CRPIX1", Value::Float(50.5)),
            card("CRPIX2", Value::Float(40.5)),
            card("CRVAL1", Value::Float(150.0)),
            card("CRVAL2", Value::Float(2.0)),
            card("CDELT1", Value::Float(-0.001)),
            card("CDELT2", Value::Float(0.001)),
            card("EQUINOX", Value::Float(2000.0)),
        ]
    }

    #[test]
    fn classify_ctypes() {
        assert_eq!(ProjectionKind::from_ctype("RA---TAN"), ProjectionKind::Gnomonic);
        assert_eq!(ProjectionKind::from_ctype("RA---TAN-SIP"), ProjectionKind::Gnomonic);
        assert_eq!(ProjectionKind::from_ctype("GLON-SIN"), ProjectionKind::Orthographic);
        assert_eq!(ProjectionKind::from_ctype("RA---NCP"), ProjectionKind::Ncp);
        assert_eq!(ProjectionKind::from_ctype("GLON-AIT"), ProjectionKind::Aitoff);
        assert_eq!(ProjectionKind::from_ctype("RA---GLS"), ProjectionKind::SansonFlamsteed);
        assert_eq!(ProjectionKind::from_ctype("RA------"), ProjectionKind::Linear);
        assert_eq!(ProjectionKind::from_ctype("RA"), ProjectionKind::Linear);
        assert_eq!(ProjectionKind::from_ctype("RA---ZPN"), ProjectionKind::Unrecognized);
    }

    #[test]
    fn parse_cdelt_header() {
        let h = ImageHeader::from_cards(&tan_header()).unwrap();
        assert_eq!(h.naxis1, 100);
        assert_eq!(h.naxis2, 80);
        assert_eq!(h.kind, ProjectionKind::Gnomonic);
        assert!(!h.using_cd());
        assert_eq!(h.coord_sys(), CoordSys::EquatorialJ2000);
        assert_eq!(h.bunit, "DN");
        assert_eq!(h.blank, None);
        assert!(h.datamin.is_nan());
        assert_eq!(h.bscale, 1.0);
    }

    #[test]
    fn missing_ctype_is_unspecified() {
        let cards: Vec<Card> = tan_header()
            .into_iter()
            .filter(|c| !c.keyword_str().starts_with("CTYPE"))
            .collect();
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert_eq!(h.kind, ProjectionKind::Unspecified);
    }

    #[test]
    fn missing_bitpix_is_error() {
        let cards = vec![card("NAXIS", Value::Integer(2))];
        assert!(matches!(
            ImageHeader::from_cards(&cards),
            Err(Error::MissingKeyword("BITPIX"))
        ));
    }

    #[test]
    fn cd_matrix_derives_rotation_and_scale() {
        let mut cards = tan_header();
        card::remove_keyword(&mut cards, "CDELT1");
        card::remove_keyword(&mut cards, "CDELT2");
        let (s, c) = 30f64.to_radians().sin_cos();
        cards.push(card("CD1_1", Value::Float(-0.001 * c)));
        cards.push(card("CD1_2", Value::Float(-0.001 * s)));
        cards.push(card("CD2_1", Value::Float(-0.001 * s)));
        cards.push(card("CD2_2", Value::Float(0.001 * c)));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert!(h.using_cd());
        assert_abs_diff_eq!(h.crota2, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(h.cdelt1, -0.001, epsilon = 1e-7);
        assert_abs_diff_eq!(h.cdelt2, 0.001, epsilon = 1e-7);
    }

    #[test]
    fn pc_matrix_scales_by_cdelt() {
        let mut cards = tan_header();
        cards.push(card("PC1_1", Value::Float(1.0)));
        cards.push(card("PC2_2", Value::Float(1.0)));
        let h = ImageHeader::from_cards(&cards).unwrap();
        let cd = h.cd.unwrap();
        assert_abs_diff_eq!(cd.cd1_1, -0.001);
        assert_abs_diff_eq!(cd.cd2_2, 0.001);
        assert_eq!(cd.cd1_2, 0.0);
    }

    #[test]
    fn iso_telescope_ignores_cd() {
        let mut cards = tan_header();
        cards.push(card("CD1_1", Value::Float(-0.002)));
        cards.push(card("CD2_2", Value::Float(0.002)));
        cards.push(card("TELESCOP", Value::String("ISO".into())));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert!(!h.using_cd());
        assert_eq!(h.cdelt1, -0.001);
    }

    #[test]
    fn reversed_axes_swap_crval_and_cdelt() {
        let mut cards = tan_header();
        card::set_value(&mut cards, "CTYPE1", Value::String("DEC--TAN".into()));
        card::set_value(&mut cards, "CTYPE2", Value::String("RA---TAN".into()));
        card::set_value(&mut cards, "CRVAL1", Value::Float(2.0));
        card::set_value(&mut cards, "CRVAL2", Value::Float(150.0));
        card::set_value(&mut cards, "CDELT1", Value::Float(0.002));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert!(h.axes_reversed);
        assert_eq!(h.crval1, 150.0);
        assert_eq!(h.crval2, 2.0);
        assert_eq!(h.cdelt1, 0.001);
        assert_eq!(h.cdelt2, 0.002);

        let written = h.apply_to_cards(&cards);
        assert_eq!(card::find_float(&written, "CRVAL1"), Some(2.0));
        assert_eq!(card::find_float(&written, "CDELT1"), Some(0.002));
    }

    #[test]
    fn car_wraps_reference_pixel() {
        let mut cards = tan_header();
        card::set_value(&mut cards, "CTYPE1", Value::String("RA---CAR".into()));
        card::set_value(&mut cards, "CDELT1", Value::Float(-1.0));
        card::set_value(&mut cards, "CRPIX1", Value::Float(200.0));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert_eq!(h.crpix1, -160.0);
    }

    #[test]
    fn equinox_falls_back_to_epoch() {
        let mut cards = tan_header();
        card::remove_keyword(&mut cards, "EQUINOX");
        cards.push(card("EPOCH", Value::Float(1950.0)));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert_eq!(h.equinox, 1950.0);
        assert_eq!(h.coord_sys(), CoordSys::EquatorialB1950);
    }

    #[test]
    fn radecsys_overrides_equinox() {
        let mut cards = tan_header();
        card::set_value(&mut cards, "EQUINOX", Value::Float(1950.0));
        cards.push(card("RADESYS", Value::String("ICRS".into())));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert_eq!(h.coord_sys(), CoordSys::EquatorialJ2000);
    }

    #[test]
    fn galactic_and_ecliptic_systems() {
        let mut cards = tan_header();
        card::set_value(&mut cards, "CTYPE1", Value::String("GLON-TAN".into()));
        assert_eq!(
            ImageHeader::from_cards(&cards).unwrap().coord_sys(),
            CoordSys::Galactic
        );
        card::set_value(&mut cards, "CTYPE1", Value::String("ELON-TAN".into()));
        assert_eq!(
            ImageHeader::from_cards(&cards).unwrap().coord_sys(),
            CoordSys::EclipticJ2000
        );
    }

    #[test]
    fn sip_coefficients_read_up_to_order() {
        let mut cards = tan_header();
        card::set_value(&mut cards, "CTYPE1", Value::String("RA---TAN-SIP".into()));
        cards.push(card("A_ORDER", Value::Integer(2)));
        cards.push(card("B_ORDER", Value::Integer(2)));
        cards.push(card("A_2_0", Value::Float(1e-5)));
        cards.push(card("B_0_2", Value::Float(-2e-5)));
        cards.push(card("A_3_0", Value::Float(9.0)));
        let h = ImageHeader::from_cards(&cards).unwrap();
        let sip = h.sip.unwrap();
        assert_eq!(sip.a.order, 2);
        assert_eq!(sip.a.coeffs[2][0], 1e-5);
        assert_eq!(sip.a.coeffs[3][0], 0.0);
        assert_eq!(sip.b.coeffs[0][2], -2e-5);
        assert!(sip.ap.is_none());
    }

    #[test]
    fn sip_eval() {
        let mut p = SipPolynomial::zero(2);
        p.coeffs[2][0] = 2.0;
        p.coeffs[1][1] = 3.0;
        p.coeffs[0][1] = 1.0;
        assert_eq!(p.eval(2.0, 5.0), 2.0 * 4.0 + 3.0 * 10.0 + 5.0);
    }

    #[test]
    fn plate_header_sets_crpix_from_cnpix() {
        let mut cards = tan_header();
        cards.push(card("PLTRAH", Value::Float(1.0)));
        cards.push(card("PLTRAM", Value::Float(30.0)));
        cards.push(card("PLTRAS", Value::Float(0.0)));
        cards.push(card("PLTDECSN", Value::String("-".into())));
        cards.push(card("PLTDECD", Value::Float(10.0)));
        cards.push(card("PLTDECM", Value::Float(30.0)));
        cards.push(card("PLTDECS", Value::Float(0.0)));
        cards.push(card("CNPIX1", Value::Float(100.0)));
        cards.push(card("CNPIX2", Value::Float(200.0)));
        cards.push(card("PLTSCALE", Value::Float(67.2)));
        cards.push(card("XPIXELSZ", Value::Float(25.0)));
        cards.push(card("YPIXELSZ", Value::Float(25.0)));
        card::remove_keyword(&mut cards, "CDELT1");
        card::remove_keyword(&mut cards, "CDELT2");
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert_eq!(h.kind, ProjectionKind::Plate);
        assert_eq!(h.crpix1, -99.5);
        assert_eq!(h.crpix2, -199.5);
        let p = h.plate.as_ref().unwrap();
        assert_abs_diff_eq!(p.plate_ra(), 22.5f64.to_radians(), epsilon = 1e-12);
        assert_abs_diff_eq!(p.plate_dec(), (-10.5f64).to_radians(), epsilon = 1e-12);
        assert_abs_diff_eq!(h.cdelt1, -67.2 * 25.0 / 1000.0 / 3600.0, epsilon = 1e-15);

        let shifted = h.shifted_by(3.0, 4.0);
        assert_eq!(shifted.plate.as_ref().unwrap().cnpix, [103.0, 204.0]);
        assert_eq!(shifted.crpix1, -102.5);
    }

    #[test]
    fn transforms_return_new_values() {
        let h = ImageHeader::from_cards(&tan_header()).unwrap();
        let moved = h.with_crpix(1.0, 2.0).with_dimensions(10, 20);
        assert_eq!(h.crpix1, 50.5);
        assert_eq!(moved.crpix1, 1.0);
        assert_eq!(moved.naxis2, 20);

        let shifted = h.shifted_by(1.0, 1.0);
        assert_eq!(shifted.crpix1, 49.5);
        assert_eq!(shifted.crpix2, 39.5);

        let gal = h.with_ctype("GLON-SIN", "GLAT-SIN");
        assert_eq!(gal.kind, ProjectionKind::Orthographic);
        assert_eq!(gal.coord_sys(), CoordSys::Galactic);
    }

    #[test]
    fn with_cd_is_authoritative_until_cdelt_set() {
        let h = ImageHeader::from_cards(&tan_header()).unwrap();
        let cd = h.with_cd(CdMatrix::new(-0.002, 0.0, 0.0, 0.002));
        assert!(cd.using_cd());
        assert_abs_diff_eq!(cd.cdelt2, 0.002, epsilon = 1e-8);
        let back = cd.with_cdelt(-0.003, 0.003);
        assert!(!back.using_cd());
    }

    #[test]
    fn apply_to_cards_float_output() {
        let mut cards = tan_header();
        cards.push(card("BLANK", Value::Integer(-32768)));
        cards.push(card("BSCALE", Value::Float(2.0)));
        cards.push(card("EPOCH", Value::Float(2000.0)));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert_eq!(h.blank, Some(-32768));

        let out = h.with_float_samples().apply_to_cards(&cards);
        assert_eq!(card::find_int(&out, "BITPIX"), Some(-32));
        assert!(!card::contains(&out, "BLANK"));
        assert!(!card::contains(&out, "BSCALE"));
        assert!(!card::contains(&out, "EPOCH"));
        assert_eq!(card::find_float(&out, "EQUINOX"), Some(2000.0));

        let reparsed = ImageHeader::from_cards(&out).unwrap();
        assert_eq!(reparsed.crpix1, h.crpix1);
        assert_eq!(reparsed.cdelt1, h.cdelt1);
    }

    #[test]
    fn apply_to_cards_switches_cd_to_cdelt() {
        let mut cards = tan_header();
        cards.push(card("CD1_1", Value::Float(-0.001)));
        cards.push(card("CD2_2", Value::Float(0.001)));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert!(h.using_cd());
        let out = h.with_cdelt(-0.002, 0.002).apply_to_cards(&cards);
        assert!(!card::contains(&out, "CD1_1"));
        assert_eq!(card::find_float(&out, "CDELT1"), Some(-0.002));

        let out = h.apply_to_cards(&cards);
        assert!(card::contains(&out, "CD1_1"));
        assert!(!card::contains(&out, "CDELT1"));
    }

    #[test]
    fn cube_plane_writes_naxis3() {
        let mut cards = tan_header();
        card::set_value(&mut cards, "NAXIS", Value::Integer(3));
        card::set_value_after(&mut cards, "NAXIS2", "NAXIS3", Value::Integer(4));
        let h = ImageHeader::from_cards(&cards).unwrap();
        assert_eq!(h.naxis3, 4);
        let plane = h.with_plane(2);
        assert_eq!(plane.plane_number, 2);
        let out = plane.apply_to_cards(&cards);
        assert_eq!(card::find_int(&out, "NAXIS3"), Some(1));
    }
}
