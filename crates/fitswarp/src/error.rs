use thiserror::Error;

/// Broad category of an [`Error`], used by callers that only need to know
/// whether a failure came from the header, a single projected point, the
/// output geometry, or an unsupported input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required astrometry keywords missing, contradictory or malformed.
    Header,
    /// A point has no solution under the projection.
    Projection,
    /// Computed output geometry is degenerate or too large.
    Reprojection,
    /// Sample type, NAXIS or projection outside what the engine handles.
    UnsupportedFormat,
    /// Failure from the byte source.
    Io,
}

/// All errors raised by header parsing, projection, reprojection, cropping
/// and stretching.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed FITS header block or contradictory keyword values.
    #[error("invalid FITS header: {0}")]
    InvalidHeader(String),
    /// Premature end of data while reading.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// Malformed keyword name in a header card.
    #[error("invalid keyword name")]
    InvalidKeyword,
    /// A header value could not be parsed or has the wrong type.
    #[error("invalid value for keyword {0}")]
    InvalidValue(&'static str),
    /// A required keyword was not found in the header.
    #[error("missing required keyword: {0}")]
    MissingKeyword(&'static str),
    /// A point falls outside the domain of the projection.
    #[error("projection failed at ({x}, {y}): {reason}")]
    Projection {
        reason: &'static str,
        x: f64,
        y: f64,
    },
    /// The output geometry of a reprojection is unusable.
    #[error("reprojection failed: {reason} (computed {width}x{height}, limit {limit_width}x{limit_height})")]
    Reprojection {
        reason: &'static str,
        width: i64,
        height: i64,
        limit_width: i64,
        limit_height: i64,
    },
    /// BITPIX outside the five supported sample kinds.
    #[error("unsupported BITPIX value: {0}")]
    UnsupportedBitpix(i64),
    /// NAXIS outside 2..=3 once trailing unit axes are dropped.
    #[error("unsupported NAXIS value: {0} (expected 2 or 3)")]
    UnsupportedNaxis(usize),
    /// CTYPE names a projection the engine does not implement.
    #[error("unsupported projection: {0}")]
    UnsupportedProjection(String),
    /// Pixel box entirely outside the image.
    #[error("crop box ({min_x}, {min_y})-({max_x}, {max_y}) outside image bounds 0..{width}, 0..{height}")]
    CropOutOfBounds {
        min_x: i64,
        min_y: i64,
        max_x: i64,
        max_y: i64,
        width: usize,
        height: usize,
    },
    /// An I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidHeader(_)
            | Error::UnexpectedEof
            | Error::InvalidKeyword
            | Error::InvalidValue(_)
            | Error::MissingKeyword(_)
            | Error::CropOutOfBounds { .. } => ErrorKind::Header,
            Error::Projection { .. } => ErrorKind::Projection,
            Error::Reprojection { .. } => ErrorKind::Reprojection,
            Error::UnsupportedBitpix(_)
            | Error::UnsupportedNaxis(_)
            | Error::UnsupportedProjection(_) => ErrorKind::UnsupportedFormat,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn projection(reason: &'static str, x: f64, y: f64) -> Self {
        Error::Projection { reason, x, y }
    }

    pub(crate) fn invalid_header(msg: impl Into<String>) -> Self {
        Error::InvalidHeader(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
