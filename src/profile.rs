//! Archive format/compression profile and its validation rules.

use crate::error::{CoreError, ErrorKind, Result};

/// One MiB, used throughout the segment-size bounds below.
pub const MIB: u64 = 1024 * 1024;
/// One GiB.
pub const GIB: u64 = 1024 * MIB;
/// One TiB.
pub const TIB: u64 = 1024 * GIB;

pub const MIN_SEGMENT_SIZE: u64 = MIB;
/// `i32::MAX`, the segment-size ceiling for every format except Encase6/EwfX.
pub const SEGMENT_SIZE_CEILING_32: u64 = i32::MAX as u64;
/// `i64::MAX`, the segment-size ceiling for Encase6/EwfX.
pub const SEGMENT_SIZE_CEILING_64: u64 = i64::MAX as u64;
/// Default segment size when the requested one is out of bounds: 1.4 GiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = GIB + (4 * GIB) / 10;

/// Container format. Determines segment-extension family (§6) and
/// segment-size ceiling (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Ewf,
    Smart,
    Ftk,
    Encase1,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    Linen5,
    Linen6,
    EwfX,
}

impl ArchiveFormat {
    /// Whether this format allows the wide (`i64::MAX`) segment-size
    /// ceiling, and is the only family allowed for acquisitions over 2 TiB.
    pub fn allows_large_segments(self) -> bool {
        matches!(self, ArchiveFormat::Encase6 | ArchiveFormat::EwfX)
    }

    /// The filename extension family a format uses.
    pub fn extension_family(self) -> ExtensionFamily {
        match self {
            ArchiveFormat::Smart => ExtensionFamily::Smart,
            ArchiveFormat::Ewf | ArchiveFormat::EwfX => ExtensionFamily::Ewf,
            _ => ExtensionFamily::OtherEwf,
        }
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ewf" => Ok(ArchiveFormat::Ewf),
            "smart" => Ok(ArchiveFormat::Smart),
            "ftk" => Ok(ArchiveFormat::Ftk),
            "encase1" => Ok(ArchiveFormat::Encase1),
            "encase2" => Ok(ArchiveFormat::Encase2),
            "encase3" => Ok(ArchiveFormat::Encase3),
            "encase4" => Ok(ArchiveFormat::Encase4),
            "encase5" => Ok(ArchiveFormat::Encase5),
            "encase6" => Ok(ArchiveFormat::Encase6),
            "linen5" => Ok(ArchiveFormat::Linen5),
            "linen6" => Ok(ArchiveFormat::Linen6),
            "ewfx" => Ok(ArchiveFormat::EwfX),
            other => Err(CoreError::new(
                ErrorKind::UnsupportedFormat,
                format!("unknown archive format '{}'", other),
            )),
        }
    }
}

/// Which segment-filename family a format uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionFamily {
    /// `.s01`, `.s02`, ...
    Smart,
    /// `.e01`, `.e02`, ...
    Ewf,
    /// `.E01`, `.E02`, ...
    OtherEwf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Fast,
    Best,
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel::None
    }
}

impl std::str::FromStr for CompressionLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionLevel::None),
            "fast" => Ok(CompressionLevel::Fast),
            "best" => Ok(CompressionLevel::Best),
            // "empty-block" is a modifier (compress_empty_block), not a
            // level of its own; callers who pass it alongside `none` set
            // compress_empty_block=true instead.
            "empty-block" => Ok(CompressionLevel::None),
            other => Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("unknown compression level '{}'", other),
            )),
        }
    }
}

impl CompressionLevel {
    pub fn to_flate2(self) -> Option<flate2::Compression> {
        match self {
            CompressionLevel::None => None,
            CompressionLevel::Fast => Some(flate2::Compression::fast()),
            CompressionLevel::Best => Some(flate2::Compression::best()),
        }
    }
}

/// Archive profile: format, compression, and segment-size bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveProfile {
    pub format: ArchiveFormat,
    pub compression_level: CompressionLevel,
    pub compress_empty_block: bool,
    pub segment_size_max: u64,
}

impl ArchiveProfile {
    /// Validates the full profile against an (optional) planned acquiry
    /// size:
    /// - segment size >= 1 MiB,
    /// - < `i32::MAX` for all formats except Encase6/EwfX,
    /// - < `i64::MAX` for Encase6/EwfX,
    /// - acquiry_size > 2 TiB requires Encase6 or EwfX.
    pub fn validate(&self, acquiry_size: Option<u64>) -> Result<()> {
        if self.segment_size_max < MIN_SEGMENT_SIZE {
            return Err(CoreError::new(
                ErrorKind::SizeOutOfBounds,
                format!(
                    "segment size {} is below the 1 MiB minimum",
                    self.segment_size_max
                ),
            ));
        }
        let ceiling = if self.format.allows_large_segments() {
            SEGMENT_SIZE_CEILING_64
        } else {
            SEGMENT_SIZE_CEILING_32
        };
        if self.segment_size_max >= ceiling {
            return Err(CoreError::new(
                ErrorKind::SizeOutOfBounds,
                format!(
                    "segment size {} meets or exceeds the {:?} ceiling of {}",
                    self.segment_size_max, self.format, ceiling
                ),
            ));
        }
        if let Some(size) = acquiry_size {
            if size > 2 * TIB && !self.format.allows_large_segments() {
                return Err(CoreError::new(
                    ErrorKind::SizeOutOfBounds,
                    "acquiry size exceeds 2 TiB: only Encase6 or EwfX are allowed",
                ));
            }
        }
        Ok(())
    }

    /// Returns a copy with the segment size defaulted to 1.4 GiB, used when
    /// `SessionController` downgrades an out-of-bounds request to a warning
    /// rather than a hard error.
    pub fn with_default_segment_size(mut self) -> Self {
        self.segment_size_max = DEFAULT_SEGMENT_SIZE;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(format: ArchiveFormat, segment_size_max: u64) -> ArchiveProfile {
        ArchiveProfile {
            format,
            compression_level: CompressionLevel::None,
            compress_empty_block: false,
            segment_size_max,
        }
    }

    #[test]
    fn default_segment_size_is_1_point_4_gib() {
        assert_eq!(DEFAULT_SEGMENT_SIZE, 1_503_238_553);
    }

    #[test]
    fn rejects_segment_size_below_1mib() {
        let p = profile(ArchiveFormat::Encase6, 512 * 1024);
        assert!(p.validate(None).is_err());
    }

    #[test]
    fn rejects_segment_size_at_or_above_2gib_for_encase5() {
        let p = profile(ArchiveFormat::Encase5, i32::MAX as u64);
        assert!(p.validate(None).is_err());
    }

    #[test]
    fn encase6_allows_segment_sizes_above_2gib() {
        let p = profile(ArchiveFormat::Encase6, (i32::MAX as u64) + 1024);
        assert!(p.validate(None).is_ok());
    }

    #[test]
    fn oversized_acquiry_requires_encase6_or_ewfx() {
        let p = profile(ArchiveFormat::Encase5, GIB);
        let err = p.validate(Some(3 * TIB)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SizeOutOfBounds);

        let p = profile(ArchiveFormat::Encase6, GIB);
        assert!(p.validate(Some(3 * TIB)).is_ok());
    }

    #[test]
    fn oversized_segment_rejected_before_io() {
        let p = profile(ArchiveFormat::Encase5, 3 * GIB);
        let err = p.validate(None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SizeOutOfBounds);
    }
}
