//! Stretch configuration.
//!
//! [`RangeValues`] picks how the low and high cut levels are found, which
//! curve maps values between them to display bytes, and the bias/contrast
//! adjustment applied afterwards. It has a compact comma-separated string
//! form using numeric codes for the modes and curves.

use core::fmt;
use core::str::FromStr;

use crate::error::{Error, Result};
use crate::zscale::ZscaleParams;

/// How a cut level is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CutMode {
    /// Percentile of the histogram.
    Percentage,
    /// Data minimum or maximum.
    MaxMin,
    /// Physical value, converted to raw with BSCALE/BZERO.
    Absolute,
    /// Zscale range.
    Zscale,
    /// Standard deviations from the median.
    Sigma,
}

impl CutMode {
    pub fn code(self) -> i32 {
        match self {
            CutMode::Percentage => 88,
            CutMode::MaxMin => 89,
            CutMode::Absolute => 90,
            CutMode::Zscale => 91,
            CutMode::Sigma => 92,
        }
    }

    pub fn from_code(code: i32) -> Option<CutMode> {
        Some(match code {
            88 => CutMode::Percentage,
            89 => CutMode::MaxMin,
            90 => CutMode::Absolute,
            91 => CutMode::Zscale,
            92 => CutMode::Sigma,
            _ => return None,
        })
    }
}

/// Curve from the cut window to display bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StretchAlgorithm {
    Linear,
    Log,
    LogLog,
    /// Histogram equalization.
    Equal,
    Squared,
    Sqrt,
    /// Lupton asinh with softening [`RangeValues::asinh_q`].
    Asinh,
    /// Power law with exponent 1/[`RangeValues::gamma`].
    PowerLawGamma,
}

impl StretchAlgorithm {
    pub fn code(self) -> i32 {
        match self {
            StretchAlgorithm::Linear => 44,
            StretchAlgorithm::Log => 45,
            StretchAlgorithm::LogLog => 46,
            StretchAlgorithm::Equal => 47,
            StretchAlgorithm::Squared => 48,
            StretchAlgorithm::Sqrt => 49,
            StretchAlgorithm::Asinh => 50,
            StretchAlgorithm::PowerLawGamma => 51,
        }
    }

    pub fn from_code(code: i32) -> Option<StretchAlgorithm> {
        Some(match code {
            44 => StretchAlgorithm::Linear,
            45 => StretchAlgorithm::Log,
            46 => StretchAlgorithm::LogLog,
            47 => StretchAlgorithm::Equal,
            48 => StretchAlgorithm::Squared,
            49 => StretchAlgorithm::Sqrt,
            50 => StretchAlgorithm::Asinh,
            51 => StretchAlgorithm::PowerLawGamma,
            _ => return None,
        })
    }
}

/// Full stretch configuration for one display pass.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeValues {
    pub lower_mode: CutMode,
    pub lower_value: f64,
    pub upper_mode: CutMode,
    pub upper_value: f64,
    pub algorithm: StretchAlgorithm,
    pub zscale: ZscaleParams,
    /// 0.5 is neutral.
    pub bias: f64,
    /// 1.0 is neutral.
    pub contrast: f64,
    pub gamma: f64,
    pub asinh_q: f64,
}

impl Default for RangeValues {
    fn default() -> Self {
        RangeValues {
            lower_mode: CutMode::Percentage,
            lower_value: 1.0,
            upper_mode: CutMode::Percentage,
            upper_value: 99.0,
            algorithm: StretchAlgorithm::Linear,
            zscale: ZscaleParams::default(),
            bias: 0.5,
            contrast: 1.0,
            gamma: 2.0,
            asinh_q: 4.0,
        }
    }
}

impl RangeValues {
    /// Cut levels from `lower`/`upper` in one mode with the default curve.
    pub fn new(mode: CutMode, lower: f64, upper: f64, algorithm: StretchAlgorithm) -> Self {
        RangeValues {
            lower_mode: mode,
            lower_value: lower,
            upper_mode: mode,
            upper_value: upper,
            algorithm,
            ..RangeValues::default()
        }
    }

    /// Zscale cut levels with the given tuning.
    pub fn with_zscale(params: ZscaleParams, algorithm: StretchAlgorithm) -> Self {
        RangeValues {
            lower_mode: CutMode::Zscale,
            upper_mode: CutMode::Zscale,
            zscale: params,
            algorithm,
            ..RangeValues::default()
        }
    }

    pub fn uses_zscale(&self) -> bool {
        self.lower_mode == CutMode::Zscale || self.upper_mode == CutMode::Zscale
    }

    /// Whether either cut needs the histogram.
    pub fn uses_histogram(&self) -> bool {
        let needs = |m: CutMode| !matches!(m, CutMode::Absolute | CutMode::Zscale);
        needs(self.lower_mode) || needs(self.upper_mode) || self.algorithm == StretchAlgorithm::Equal
    }

    /// Apply bias and contrast to a stretched byte; the result stays in
    /// 0..=254.
    pub fn bias_and_contrast(&self, value: u8) -> u8 {
        let offset = 127.0 * (self.bias - 0.5) * -4.0;
        let shift = 127.0 * (1.0 - self.contrast);
        let v = value as f64 * self.contrast + offset + shift;
        v.clamp(0.0, 254.0) as u8
    }

    /// Compact string form, see [`FromStr`].
    pub fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RangeValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            self.lower_mode.code(),
            self.lower_value,
            self.upper_mode.code(),
            self.upper_value,
            self.algorithm.code(),
            self.zscale.contrast,
            self.zscale.samples,
            self.zscale.samples_per_line,
            self.bias,
            self.contrast,
            self.gamma,
            self.asinh_q
        )
    }
}

fn field<T: FromStr>(parts: &[&str], i: usize, what: &'static str) -> Result<Option<T>> {
    match parts.get(i) {
        None => Ok(None),
        Some(s) => s.trim().parse().map(Some).map_err(|_| Error::InvalidValue(what)),
    }
}

/// Parses
/// `lowerWhich,lowerValue,upperWhich,upperValue,algorithm[,zContrast,zSamples,zSamplesPerLine[,bias,contrast[,gamma,asinhQ]]]`.
/// Missing trailing fields keep their defaults.
impl FromStr for RangeValues {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() < 5 {
            return Err(Error::InvalidValue("range values"));
        }
        let mode = |i, what| -> Result<CutMode> {
            field::<i32>(&parts, i, what)?
                .and_then(CutMode::from_code)
                .ok_or(Error::InvalidValue(what))
        };
        let required = |i, what| -> Result<f64> {
            field::<f64>(&parts, i, what)?.ok_or(Error::InvalidValue(what))
        };

        let mut rv = RangeValues {
            lower_mode: mode(0, "lower cut mode")?,
            lower_value: required(1, "lower value")?,
            upper_mode: mode(2, "upper cut mode")?,
            upper_value: required(3, "upper value")?,
            algorithm: field::<i32>(&parts, 4, "stretch algorithm")?
                .and_then(StretchAlgorithm::from_code)
                .ok_or(Error::InvalidValue("stretch algorithm"))?,
            ..RangeValues::default()
        };
        if let Some(v) = field(&parts, 5, "zscale contrast")? {
            rv.zscale.contrast = v;
        }
        if let Some(v) = field(&parts, 6, "zscale samples")? {
            rv.zscale.samples = v;
        }
        if let Some(v) = field(&parts, 7, "zscale samples per line")? {
            rv.zscale.samples_per_line = v;
        }
        if let Some(v) = field(&parts, 8, "bias")? {
            rv.bias = v;
        }
        if let Some(v) = field(&parts, 9, "contrast")? {
            rv.contrast = v;
        }
        if let Some(v) = field(&parts, 10, "gamma")? {
            rv.gamma = v;
        }
        if let Some(v) = field(&parts, 11, "asinh q")? {
            rv.asinh_q = v;
        }
        Ok(rv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_string_form() {
        let rv = RangeValues::default();
        assert_eq!(rv.serialize(), "88,1,88,99,44,25,600,120,0.5,1,2,4");
        assert_eq!(rv.serialize().parse::<RangeValues>().unwrap(), rv);
    }

    #[test]
    fn short_form_keeps_defaults() {
        let rv: RangeValues = "90, -3.5, 92, 2, 45".parse().unwrap();
        assert_eq!(rv.lower_mode, CutMode::Absolute);
        assert_eq!(rv.lower_value, -3.5);
        assert_eq!(rv.upper_mode, CutMode::Sigma);
        assert_eq!(rv.algorithm, StretchAlgorithm::Log);
        assert_eq!(rv.zscale, ZscaleParams::default());
        assert_eq!(rv.bias, 0.5);
    }

    #[test]
    fn bad_strings_are_rejected() {
        assert!("88,1,88".parse::<RangeValues>().is_err());
        assert!("87,1,88,99,44".parse::<RangeValues>().is_err());
        assert!("88,1,88,99,43".parse::<RangeValues>().is_err());
        assert!("88,x,88,99,44".parse::<RangeValues>().is_err());
        assert!("88,1,88,99,44,25,many".parse::<RangeValues>().is_err());
    }

    #[test]
    fn codes_round_trip() {
        for code in 88..=92 {
            assert_eq!(CutMode::from_code(code).unwrap().code(), code);
        }
        for code in 44..=51 {
            assert_eq!(StretchAlgorithm::from_code(code).unwrap().code(), code);
        }
    }

    #[test]
    fn neutral_bias_and_contrast_is_identity() {
        let rv = RangeValues::default();
        for v in [0u8, 1, 100, 254] {
            assert_eq!(rv.bias_and_contrast(v), v);
        }
    }

    #[test]
    fn bias_and_contrast_shift_and_clamp() {
        let rv = RangeValues {
            bias: 0.4,
            ..RangeValues::default()
        };
        // offset = 127 * -0.1 * -4 = 50.8
        assert_eq!(rv.bias_and_contrast(10), 60);
        assert_eq!(rv.bias_and_contrast(250), 254);

        let rv = RangeValues {
            contrast: 2.0,
            ..RangeValues::default()
        };
        // 2v - 127
        assert_eq!(rv.bias_and_contrast(100), 73);
        assert_eq!(rv.bias_and_contrast(10), 0);
    }

    #[test]
    fn histogram_need() {
        assert!(RangeValues::default().uses_histogram());
        let abs = RangeValues::new(CutMode::Absolute, 0.0, 1.0, StretchAlgorithm::Linear);
        assert!(!abs.uses_histogram());
        let eq = RangeValues::new(CutMode::Absolute, 0.0, 1.0, StretchAlgorithm::Equal);
        assert!(eq.uses_histogram());
        let z = RangeValues::with_zscale(ZscaleParams::default(), StretchAlgorithm::Linear);
        assert!(z.uses_zscale() && !z.uses_histogram());
    }
}
