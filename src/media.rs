//! Media descriptor and case-data value objects.

use crate::error::{CoreError, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Fixed,
    Removable,
    Optical,
    Memory,
}

impl Default for MediaType {
    fn default() -> Self {
        MediaType::Fixed
    }
}

impl std::str::FromStr for MediaType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(MediaType::Fixed),
            "removable" => Ok(MediaType::Removable),
            "optical" => Ok(MediaType::Optical),
            "memory" => Ok(MediaType::Memory),
            other => Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("unknown media type '{}'", other),
            )),
        }
    }
}

/// A small hand-rolled bit set: four fixed, named bits with one validity
/// rule (Physical/Logical mutual exclusion) — not worth a `bitflags`
/// dependency (none of the retrieval pack's crates pull one in either), so
/// plain `u8` constants with `BitOr`/`contains` match the corpus's general
/// preference for small hand-rolled types over a crate for something this
/// narrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaFlags(u8);

impl MediaFlags {
    pub const PHYSICAL: MediaFlags = MediaFlags(0b0001);
    pub const LOGICAL: MediaFlags = MediaFlags(0b0010);
    pub const FASTBLOC: MediaFlags = MediaFlags(0b0100);
    pub const TABLEAU: MediaFlags = MediaFlags(0b1000);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: MediaFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn empty() -> Self {
        MediaFlags(0)
    }

    pub fn validate(self) -> Result<Self> {
        let both = MediaFlags::PHYSICAL | MediaFlags::LOGICAL;
        if self.0 & both.0 == both.0 {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "media flags Physical and Logical are mutually exclusive",
            ));
        }
        Ok(self)
    }
}

impl std::ops::BitOr for MediaFlags {
    type Output = MediaFlags;
    fn bitor(self, rhs: MediaFlags) -> MediaFlags {
        MediaFlags(self.0 | rhs.0)
    }
}

impl Default for MediaFlags {
    fn default() -> Self {
        MediaFlags::PHYSICAL
    }
}

/// Descriptor of the physical/logical source being acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub media_size: u64,
    pub media_type: MediaType,
    pub media_flags: MediaFlags,
    pub model: Option<String>,
    pub serial_number: Option<String>,
}

impl MediaDescriptor {
    pub fn new(media_size: u64, media_type: MediaType, media_flags: MediaFlags) -> Result<Self> {
        Ok(MediaDescriptor {
            media_size,
            media_type,
            media_flags: media_flags.validate()?,
            model: None,
            serial_number: None,
        })
    }
}

/// Free-text case data: case number, description, evidence number,
/// examiner name, and notes, as set by the `-C -D -E -e -N` switches.
///
/// Deliberately four independent `Option<String>` fields — resolving
/// Design Note 9's Open Question #2, which flags a known bug in prior art
/// of swapping the `examiner_name`/`evidence_number` buffer allocations.
/// This struct keeps them distinct so the swap cannot recur.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseData {
    pub case_number: Option<String>,
    pub description: Option<String>,
    pub evidence_number: Option<String>,
    pub examiner_name: Option<String>,
    pub notes: Option<String>,
    pub header_codepage: HeaderCodepage,
}

/// Closed set of header codepages the `-A` switch accepts. Only ASCII
/// encode/decode is actually implemented — case-data fields are always
/// stored as UTF-8 regardless of this value — so the other variants exist
/// to validate and record the operator's intent, not to transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCodepage {
    Ascii,
    Windows874,
    Windows932,
    Windows936,
    Windows949,
    Windows950,
    Windows1250,
    Windows1251,
    Windows1252,
    Windows1253,
    Windows1254,
    Windows1255,
    Windows1256,
    Windows1257,
    Windows1258,
}

impl Default for HeaderCodepage {
    fn default() -> Self {
        HeaderCodepage::Ascii
    }
}

impl std::str::FromStr for HeaderCodepage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Ok(HeaderCodepage::Ascii),
            "windows-874" => Ok(HeaderCodepage::Windows874),
            "windows-932" => Ok(HeaderCodepage::Windows932),
            "windows-936" => Ok(HeaderCodepage::Windows936),
            "windows-949" => Ok(HeaderCodepage::Windows949),
            "windows-950" => Ok(HeaderCodepage::Windows950),
            "windows-1250" => Ok(HeaderCodepage::Windows1250),
            "windows-1251" => Ok(HeaderCodepage::Windows1251),
            "windows-1252" => Ok(HeaderCodepage::Windows1252),
            "windows-1253" => Ok(HeaderCodepage::Windows1253),
            "windows-1254" => Ok(HeaderCodepage::Windows1254),
            "windows-1255" => Ok(HeaderCodepage::Windows1255),
            "windows-1256" => Ok(HeaderCodepage::Windows1256),
            "windows-1257" => Ok(HeaderCodepage::Windows1257),
            "windows-1258" => Ok(HeaderCodepage::Windows1258),
            other => Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("unknown header codepage '{}'", other),
            )),
        }
    }
}

impl HeaderCodepage {
    pub fn to_u8(self) -> u8 {
        match self {
            HeaderCodepage::Ascii => 0,
            HeaderCodepage::Windows874 => 1,
            HeaderCodepage::Windows932 => 2,
            HeaderCodepage::Windows936 => 3,
            HeaderCodepage::Windows949 => 4,
            HeaderCodepage::Windows950 => 5,
            HeaderCodepage::Windows1250 => 6,
            HeaderCodepage::Windows1251 => 7,
            HeaderCodepage::Windows1252 => 8,
            HeaderCodepage::Windows1253 => 9,
            HeaderCodepage::Windows1254 => 10,
            HeaderCodepage::Windows1255 => 11,
            HeaderCodepage::Windows1256 => 12,
            HeaderCodepage::Windows1257 => 13,
            HeaderCodepage::Windows1258 => 14,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => HeaderCodepage::Ascii,
            1 => HeaderCodepage::Windows874,
            2 => HeaderCodepage::Windows932,
            3 => HeaderCodepage::Windows936,
            4 => HeaderCodepage::Windows949,
            5 => HeaderCodepage::Windows950,
            6 => HeaderCodepage::Windows1250,
            7 => HeaderCodepage::Windows1251,
            8 => HeaderCodepage::Windows1252,
            9 => HeaderCodepage::Windows1253,
            10 => HeaderCodepage::Windows1254,
            11 => HeaderCodepage::Windows1255,
            12 => HeaderCodepage::Windows1256,
            13 => HeaderCodepage::Windows1257,
            14 => HeaderCodepage::Windows1258,
            other => {
                return Err(CoreError::new(
                    ErrorKind::ChecksumError,
                    format!("unrecognized header codepage discriminant {}", other),
                ))
            }
        })
    }
}
