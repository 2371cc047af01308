//! Segmented, chunked archive backend.
//!
//! Grounded on `ewf::{EwfSectionDescriptor, EwfVolumeSection, Chunk,
//! ChunkCache, parse_table, parse_segment, read_chunk, ewf_seek,
//! find_files}`: the section-loop parsing structure and chunk-table/offset
//! bookkeeping are the same shape, generalized so the backend can also
//! *write* those sections (the reference code only ever reads). The on-disk
//! byte layout itself is this crate's own — what's preserved is the
//! interface contract ("chunks written in ascending order", "a chunk is
//! self-describing", "a segment is marked complete atomically"), not
//! libewf's literal section offsets.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::{debug, info, warn};

use crate::buffer::StorageMediaBuffer;
use crate::device::{ReadError, insert_read_error};
use crate::error::{CoreError, ErrorKind, Result};
use crate::geometry::Geometry;
use crate::media::{CaseData, MediaDescriptor, MediaType};
use crate::profile::{ArchiveFormat, ArchiveProfile, CompressionLevel, ExtensionFamily};

const MAGIC: &[u8; 8] = b"EWFCSEG1";
const TAG_HEADER: &[u8; 4] = b"HDR0";
const TAG_VOLUME: &[u8; 4] = b"VOL0";
const TAG_CHUNK: &[u8; 4] = b"CHK1";
const TAG_NEXT: &[u8; 4] = b"NEXT";
const TAG_HASH: &[u8; 4] = b"HASH";
const TAG_ERRS: &[u8; 4] = b"ERRS";
const TAG_DONE: &[u8; 4] = b"DONE";

fn media_type_to_u8(t: MediaType) -> u8 {
    match t {
        MediaType::Fixed => 0,
        MediaType::Removable => 1,
        MediaType::Optical => 2,
        MediaType::Memory => 3,
    }
}

fn media_type_from_u8(v: u8) -> Result<MediaType> {
    match v {
        0 => Ok(MediaType::Fixed),
        1 => Ok(MediaType::Removable),
        2 => Ok(MediaType::Optical),
        3 => Ok(MediaType::Memory),
        other => Err(CoreError::new(
            ErrorKind::ChecksumError,
            format!("unrecognized media type discriminant {}", other),
        )),
    }
}

fn format_to_u8(f: ArchiveFormat) -> u8 {
    match f {
        ArchiveFormat::Ewf => 0,
        ArchiveFormat::Smart => 1,
        ArchiveFormat::Ftk => 2,
        ArchiveFormat::Encase1 => 3,
        ArchiveFormat::Encase2 => 4,
        ArchiveFormat::Encase3 => 5,
        ArchiveFormat::Encase4 => 6,
        ArchiveFormat::Encase5 => 7,
        ArchiveFormat::Encase6 => 8,
        ArchiveFormat::Linen5 => 9,
        ArchiveFormat::Linen6 => 10,
        ArchiveFormat::EwfX => 11,
    }
}

fn format_from_u8(v: u8) -> Result<ArchiveFormat> {
    Ok(match v {
        0 => ArchiveFormat::Ewf,
        1 => ArchiveFormat::Smart,
        2 => ArchiveFormat::Ftk,
        3 => ArchiveFormat::Encase1,
        4 => ArchiveFormat::Encase2,
        5 => ArchiveFormat::Encase3,
        6 => ArchiveFormat::Encase4,
        7 => ArchiveFormat::Encase5,
        8 => ArchiveFormat::Encase6,
        9 => ArchiveFormat::Linen5,
        10 => ArchiveFormat::Linen6,
        11 => ArchiveFormat::EwfX,
        other => {
            return Err(CoreError::new(
                ErrorKind::ChecksumError,
                format!("unrecognized archive format discriminant {}", other),
            ))
        }
    })
}

fn compression_to_u8(c: CompressionLevel) -> u8 {
    match c {
        CompressionLevel::None => 0,
        CompressionLevel::Fast => 1,
        CompressionLevel::Best => 2,
    }
}

fn compression_from_u8(v: u8) -> Result<CompressionLevel> {
    match v {
        0 => Ok(CompressionLevel::None),
        1 => Ok(CompressionLevel::Fast),
        2 => Ok(CompressionLevel::Best),
        other => Err(CoreError::new(
            ErrorKind::ChecksumError,
            format!("unrecognized compression level discriminant {}", other),
        )),
    }
}

/// Segment filename for `stem` under `family` at 1-based `segment_number`,
/// per the `S.e01`/`S.s01`/`S.E01` naming scheme.
pub fn segment_filename(stem: &Path, family: ExtensionFamily, segment_number: u16) -> PathBuf {
    let ext = match family {
        ExtensionFamily::Smart => format!("s{:02}", segment_number),
        ExtensionFamily::Ewf => format!("e{:02}", segment_number),
        ExtensionFamily::OtherEwf => format!("E{:02}", segment_number),
    };
    stem.with_extension(ext)
}

fn glob_suffix(family: ExtensionFamily) -> &'static str {
    match family {
        ExtensionFamily::Smart => ".s??",
        ExtensionFamily::Ewf => ".e??",
        ExtensionFamily::OtherEwf => ".E??",
    }
}

/// Where one chunk's bytes live: which segment, at what byte offset past
/// the chunk-record header, how long the stored (possibly compressed)
/// payload is, and the checksum/length needed to validate it.
#[derive(Debug, Clone, Copy)]
struct ChunkLocator {
    segment_index: usize,
    payload_offset: u64,
    stored_len: u32,
    compressed: bool,
    inflated_len: u32,
    checksum: u32,
}

struct SegmentHandle {
    path: PathBuf,
    file: File,
}

/// Outcome of `read_chunk`: whether the stored checksum matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkReadStatus {
    Ok,
    ChecksumMismatch,
}

/// Returned by `open_write`: the constructed backend plus the byte offset
/// acquisition should resume from (0 for a fresh archive).
pub struct OpenWriteOutcome {
    pub backend: EwfArchiveBackend,
    pub resume_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// The one concrete `ArchiveBackend` implementation.
pub struct EwfArchiveBackend {
    stem: PathBuf,
    family: ExtensionFamily,
    profile: ArchiveProfile,
    geometry: Geometry,
    media: MediaDescriptor,
    case_data: CaseData,
    acquiry_size: u64,
    segments: Vec<SegmentHandle>,
    chunk_table: Vec<ChunkLocator>,
    checksum_errors: Vec<ReadError>,
    stored_hashes: HashMap<&'static str, String>,
    current_segment_bytes: u64,
    segment_number: u16,
    mode: Mode,
    finalized: bool,
    corrupted: bool,
}

/// Implementation-contract trait the pipelines drive; only these operations
/// reach them.
pub trait ArchiveBackend {
    fn chunk_size(&self) -> u32;
    fn bytes_per_sector(&self) -> u32;
    fn chunk_count(&self) -> u64;
    fn write_chunk(&mut self, buf: &StorageMediaBuffer) -> Result<()>;
    fn read_chunk(&mut self, buf: &mut StorageMediaBuffer, index: u64) -> Result<ChunkReadStatus>;
    fn append_checksum_error(&mut self, start_sector: u64, sector_count: u32);
    fn stored_checksum_errors(&self) -> &[ReadError];
    fn finalize(&mut self, global_hashes: &[(&'static str, String)]) -> Result<u64>;
    fn segment_files_corrupted(&self) -> bool;
    fn filename_for_offset(&self, offset: u64) -> Option<PathBuf>;
    fn stored_hashes(&self) -> &HashMap<&'static str, String>;
}

struct ScanResult {
    profile: ArchiveProfile,
    geometry: Geometry,
    media: MediaDescriptor,
    case_data: CaseData,
    acquiry_size: u64,
    chunk_table: Vec<ChunkLocator>,
    stored_hashes: HashMap<&'static str, String>,
    checksum_errors: Vec<ReadError>,
    finalized: bool,
    corrupted: bool,
    valid_len_in_last_segment: u64,
}

fn write_u8(file: &mut File, v: u8) -> Result<()> {
    Ok(file.write_all(&[v])?)
}

fn read_u8(file: &mut File) -> Result<u8> {
    let mut b = [0u8; 1];
    file.read_exact(&mut b)?;
    Ok(b[0])
}

fn write_u32(file: &mut File, v: u32) -> Result<()> {
    Ok(file.write_all(&v.to_le_bytes())?)
}

fn read_u32(file: &mut File) -> Result<u32> {
    let mut b = [0u8; 4];
    file.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn write_u64(file: &mut File, v: u64) -> Result<()> {
    Ok(file.write_all(&v.to_le_bytes())?)
}

fn read_u64(file: &mut File) -> Result<u64> {
    let mut b = [0u8; 8];
    file.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn write_opt_string(file: &mut File, value: &Option<String>) -> Result<()> {
    match value {
        None => write_u32(file, u32::MAX),
        Some(s) => {
            let bytes = s.as_bytes();
            write_u32(file, bytes.len() as u32)?;
            Ok(file.write_all(bytes)?)
        }
    }
}

fn read_opt_string(file: &mut File) -> Result<Option<String>> {
    let len = read_u32(file)?;
    if len == u32::MAX {
        return Ok(None);
    }
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| CoreError::new(ErrorKind::ChecksumError, "case data is not valid UTF-8"))
}

impl EwfArchiveBackend {
    /// Opens a fresh archive for writing, or resumes an interrupted one.
    /// `acquiry_size` is the requested acquisition size (0 meaning "to end
    /// of media"); on resume it is checked against the value recorded in
    /// the existing archive's header.
    pub fn open_write(
        stem: &Path,
        profile: ArchiveProfile,
        geometry: Geometry,
        media: MediaDescriptor,
        case_data: CaseData,
        acquiry_size: u64,
        resume: bool,
    ) -> Result<OpenWriteOutcome> {
        let family = profile.format.extension_family();

        if resume {
            let existing = discover_existing(stem, family).unwrap_or_default();
            if !existing.is_empty() {
                return Self::resume_from(
                    stem,
                    family,
                    profile,
                    geometry,
                    acquiry_size,
                    &existing,
                );
            }
            warn!("resume requested but no existing segments found; starting fresh");
        }

        let path = segment_filename(stem, family, 1);
        let mut file = File::create(&path)?;
        write_header_and_volume(
            &mut file,
            1,
            &profile,
            &geometry,
            &media,
            &case_data,
            acquiry_size,
        )?;
        let current_segment_bytes = file.stream_position()?;
        info!("opened new archive {} for writing", path.display());

        Ok(OpenWriteOutcome {
            backend: EwfArchiveBackend {
                stem: stem.to_path_buf(),
                family,
                profile,
                geometry,
                media,
                case_data,
                acquiry_size,
                segments: vec![SegmentHandle { path, file }],
                chunk_table: Vec::new(),
                checksum_errors: Vec::new(),
                stored_hashes: HashMap::new(),
                current_segment_bytes,
                segment_number: 1,
                mode: Mode::Write,
                finalized: false,
                corrupted: false,
            },
            resume_offset: 0,
        })
    }

    fn resume_from(
        stem: &Path,
        family: ExtensionFamily,
        profile: ArchiveProfile,
        geometry: Geometry,
        acquiry_size: u64,
        existing: &[PathBuf],
    ) -> Result<OpenWriteOutcome> {
        let scan = scan_segments(existing)?;
        if scan.profile != profile || scan.geometry != geometry {
            return Err(CoreError::new(
                ErrorKind::MismatchedProfile,
                "resume profile/geometry does not match the existing archive",
            ));
        }
        if scan.finalized {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "archive is already finalized; nothing to resume",
            ));
        }
        if scan.acquiry_size != 0 && scan.acquiry_size != acquiry_size {
            return Err(CoreError::new(
                ErrorKind::MismatchedProfile,
                format!(
                    "resume acquiry size {} does not match the {} recorded in the archive",
                    acquiry_size, scan.acquiry_size
                ),
            ));
        }

        let last_path = existing.last().unwrap().clone();
        let last_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&last_path)?;
        last_file.set_len(scan.valid_len_in_last_segment)?;
        let mut last_file = last_file;
        last_file.seek(SeekFrom::End(0))?;

        let mut segments = Vec::with_capacity(existing.len());
        for path in &existing[..existing.len() - 1] {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            segments.push(SegmentHandle {
                path: path.clone(),
                file,
            });
        }
        segments.push(SegmentHandle {
            path: last_path,
            file: last_file,
        });

        let chunk_size = geometry.chunk_size() as u64;
        let resume_offset = scan.chunk_table.len() as u64 * chunk_size;
        info!(
            "resuming archive at {} ({} chunks already written)",
            stem.display(),
            scan.chunk_table.len()
        );

        Ok(OpenWriteOutcome {
            backend: EwfArchiveBackend {
                stem: stem.to_path_buf(),
                family,
                profile,
                geometry,
                media: scan.media,
                case_data: scan.case_data,
                acquiry_size: scan.acquiry_size,
                segments,
                chunk_table: scan.chunk_table,
                checksum_errors: scan.checksum_errors,
                stored_hashes: scan.stored_hashes,
                current_segment_bytes: scan.valid_len_in_last_segment,
                segment_number: existing.len() as u16,
                mode: Mode::Write,
                finalized: false,
                corrupted: scan.corrupted,
            },
            resume_offset,
        })
    }

    /// Opens an existing archive read-only, from an explicit, ordered list
    /// of segment paths (or discovered via `discover_for_read`).
    pub fn open_read(segment_paths: &[PathBuf]) -> Result<Self> {
        if segment_paths.is_empty() {
            return Err(CoreError::new(
                ErrorKind::InvalidPath,
                "no segment paths given",
            ));
        }
        let scan = scan_segments(segment_paths)?;
        let mut segments = Vec::with_capacity(segment_paths.len());
        for path in segment_paths {
            let file = File::open(path).map_err(|e| crate::error::path_open_error(path, e))?;
            segments.push(SegmentHandle {
                path: path.clone(),
                file,
            });
        }
        let family = scan.profile.format.extension_family();
        Ok(EwfArchiveBackend {
            stem: segment_paths[0].clone(),
            family,
            profile: scan.profile,
            geometry: scan.geometry,
            media: scan.media,
            case_data: scan.case_data,
            acquiry_size: scan.acquiry_size,
            segments,
            chunk_table: scan.chunk_table,
            checksum_errors: scan.checksum_errors,
            stored_hashes: scan.stored_hashes,
            current_segment_bytes: scan.valid_len_in_last_segment,
            segment_number: segment_paths.len() as u16,
            mode: Mode::Read,
            finalized: scan.finalized,
            corrupted: scan.corrupted,
        })
    }

    /// Discovers an ordered segment list for a stem whose format isn't yet
    /// known, trying each extension family in turn.
    pub fn discover_for_read(stem: &Path) -> Result<Vec<PathBuf>> {
        for family in [
            ExtensionFamily::Ewf,
            ExtensionFamily::OtherEwf,
            ExtensionFamily::Smart,
        ] {
            if let Ok(found) = discover_existing(stem, family) {
                if !found.is_empty() {
                    return Ok(found);
                }
            }
        }
        Err(CoreError::not_found(stem))
    }

    pub fn media(&self) -> &MediaDescriptor {
        &self.media
    }

    pub fn case_data(&self) -> &CaseData {
        &self.case_data
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_table.len() as u64
    }

    fn roll_segment(&mut self) -> Result<()> {
        {
            let current = self.segments.last_mut().expect("at least one segment");
            current.file.write_all(TAG_NEXT)?;
        }
        self.segment_number += 1;
        let path = segment_filename(&self.stem, self.family, self.segment_number);
        let mut file = File::create(&path)?;
        file.write_all(MAGIC)?;
        write_u16(&mut file, self.segment_number)?;
        self.current_segment_bytes = file.stream_position()?;
        info!("rolled over to segment {}", path.display());
        self.segments.push(SegmentHandle { path, file });
        Ok(())
    }
}

fn write_u16(file: &mut File, v: u16) -> Result<()> {
    Ok(file.write_all(&v.to_le_bytes())?)
}

fn read_u16(file: &mut File) -> Result<u16> {
    let mut b = [0u8; 2];
    file.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn write_header_and_volume(
    file: &mut File,
    segment_number: u16,
    profile: &ArchiveProfile,
    geometry: &Geometry,
    media: &MediaDescriptor,
    case_data: &CaseData,
    acquiry_size: u64,
) -> Result<()> {
    file.write_all(MAGIC)?;
    write_u16(file, segment_number)?;

    file.write_all(TAG_HEADER)?;
    write_opt_string(file, &case_data.case_number)?;
    write_opt_string(file, &case_data.description)?;
    write_opt_string(file, &case_data.evidence_number)?;
    write_opt_string(file, &case_data.examiner_name)?;
    write_opt_string(file, &case_data.notes)?;
    write_u8(file, case_data.header_codepage.to_u8())?;
    write_u64(file, media.media_size)?;
    write_u8(file, media_type_to_u8(media.media_type))?;
    write_u8(file, media.media_flags.bits())?;
    write_opt_string(file, &media.model)?;
    write_opt_string(file, &media.serial_number)?;
    write_u8(file, format_to_u8(profile.format))?;
    write_u8(file, compression_to_u8(profile.compression_level))?;
    write_u8(file, profile.compress_empty_block as u8)?;
    write_u64(file, profile.segment_size_max)?;
    write_u64(file, acquiry_size)?;

    file.write_all(TAG_VOLUME)?;
    write_u32(file, geometry.bytes_per_sector)?;
    write_u32(file, geometry.sectors_per_chunk)?;
    write_u32(file, geometry.error_granularity_sectors)?;
    Ok(())
}

fn discover_existing(stem: &Path, family: ExtensionFamily) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}{}", stem.display(), glob_suffix(family));
    let mut found: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| CoreError::new(ErrorKind::InvalidPath, e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();
    found.sort();
    Ok(found)
}

fn scan_segments(paths: &[PathBuf]) -> Result<ScanResult> {
    let mut profile = None;
    let mut geometry = None;
    let mut media = None;
    let mut case_data = None;
    let mut acquiry_size = None;
    let mut chunk_table = Vec::new();
    let mut stored_hashes = HashMap::new();
    let mut checksum_errors = Vec::new();
    let mut finalized = false;
    let mut corrupted = false;
    let mut valid_len_in_last_segment = 0u64;

    'segments: for (seg_idx, path) in paths.iter().enumerate() {
        let mut file = File::open(path).map_err(|e| crate::error::path_open_error(path, e))?;
        let is_last = seg_idx + 1 == paths.len();

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)
            .map_err(|_| CoreError::new(ErrorKind::ChecksumError, "truncated segment header"))?;
        if &magic != MAGIC {
            return Err(CoreError::new(
                ErrorKind::UnsupportedFormat,
                format!("{}: not a recognized archive segment", path.display()),
            ));
        }
        let segment_number = read_u16(&mut file)?;

        if segment_number == 1 && profile.is_none() {
            let mut tag = [0u8; 4];
            file.read_exact(&mut tag)?;
            if &tag != TAG_HEADER {
                return Err(CoreError::new(
                    ErrorKind::ChecksumError,
                    "expected header section in first segment",
                ));
            }
            let case = CaseData {
                case_number: read_opt_string(&mut file)?,
                description: read_opt_string(&mut file)?,
                evidence_number: read_opt_string(&mut file)?,
                examiner_name: read_opt_string(&mut file)?,
                notes: read_opt_string(&mut file)?,
                header_codepage: crate::media::HeaderCodepage::from_u8(read_u8(&mut file)?)?,
            };
            let media_size = read_u64(&mut file)?;
            let media_type = media_type_from_u8(read_u8(&mut file)?)?;
            let media_flags_bits = read_u8(&mut file)?;
            let model = read_opt_string(&mut file)?;
            let serial_number = read_opt_string(&mut file)?;
            let fmt = format_from_u8(read_u8(&mut file)?)?;
            let compression_level = compression_from_u8(read_u8(&mut file)?)?;
            let compress_empty_block = read_u8(&mut file)? != 0;
            let segment_size_max = read_u64(&mut file)?;
            let acquiry_size_value = read_u64(&mut file)?;

            let mut tag = [0u8; 4];
            file.read_exact(&mut tag)?;
            if &tag != TAG_VOLUME {
                return Err(CoreError::new(
                    ErrorKind::ChecksumError,
                    "expected volume section after header",
                ));
            }
            let bytes_per_sector = read_u32(&mut file)?;
            let sectors_per_chunk = read_u32(&mut file)?;
            let error_granularity_sectors = read_u32(&mut file)?;

            let media_flags = {
                use crate::media::MediaFlags;
                let mut flags = MediaFlags::empty();
                if media_flags_bits & MediaFlags::PHYSICAL.bits() != 0 {
                    flags = flags | MediaFlags::PHYSICAL;
                }
                if media_flags_bits & MediaFlags::LOGICAL.bits() != 0 {
                    flags = flags | MediaFlags::LOGICAL;
                }
                if media_flags_bits & MediaFlags::FASTBLOC.bits() != 0 {
                    flags = flags | MediaFlags::FASTBLOC;
                }
                if media_flags_bits & MediaFlags::TABLEAU.bits() != 0 {
                    flags = flags | MediaFlags::TABLEAU;
                }
                flags
            };

            profile = Some(ArchiveProfile {
                format: fmt,
                compression_level,
                compress_empty_block,
                segment_size_max,
            });
            geometry = Some(Geometry::new(
                bytes_per_sector,
                sectors_per_chunk,
                error_granularity_sectors,
            )?);
            media = Some(MediaDescriptor {
                media_size,
                media_type,
                media_flags,
                model,
                serial_number,
            });
            case_data = Some(case);
            acquiry_size = Some(acquiry_size_value);
        }

        loop {
            let pos_before_tag = file.stream_position()?;
            let mut tag = [0u8; 4];
            match file.read_exact(&mut tag) {
                Ok(()) => {}
                Err(_) => {
                    if is_last {
                        valid_len_in_last_segment = pos_before_tag;
                        break 'segments;
                    } else {
                        corrupted = true;
                        break 'segments;
                    }
                }
            }

            if &tag == TAG_CHUNK {
                let chunk_ok = (|| -> Result<ChunkLocator> {
                    let flags = read_u8(&mut file)?;
                    let checksum = read_u32(&mut file)?;
                    let inflated_len = read_u32(&mut file)?;
                    let stored_len = read_u32(&mut file)?;
                    let payload_offset = file.stream_position()?;
                    file.seek(SeekFrom::Current(stored_len as i64))?;
                    Ok(ChunkLocator {
                        segment_index: seg_idx,
                        payload_offset,
                        stored_len,
                        compressed: flags & 1 != 0,
                        inflated_len,
                        checksum,
                    })
                })();
                match chunk_ok {
                    Ok(locator) => chunk_table.push(locator),
                    Err(_) => {
                        if is_last {
                            valid_len_in_last_segment = pos_before_tag;
                            break 'segments;
                        } else {
                            corrupted = true;
                            break 'segments;
                        }
                    }
                }
            } else if &tag == TAG_NEXT {
                valid_len_in_last_segment = file.stream_position()?;
                continue 'segments;
            } else if &tag == TAG_ERRS {
                let count = read_u32(&mut file)?;
                for _ in 0..count {
                    let start_sector = read_u64(&mut file)?;
                    let sector_count = read_u32(&mut file)?;
                    checksum_errors.push(ReadError {
                        start_sector,
                        sector_count,
                    });
                }
            } else if &tag == TAG_HASH {
                let count = read_u8(&mut file)?;
                for _ in 0..count {
                    let name_len = read_u8(&mut file)?;
                    let mut name_buf = vec![0u8; name_len as usize];
                    file.read_exact(&mut name_buf)?;
                    let name = String::from_utf8_lossy(&name_buf).to_string();
                    let hex_len = read_u8(&mut file)?;
                    let mut hex_buf = vec![0u8; hex_len as usize];
                    file.read_exact(&mut hex_buf)?;
                    let hex = String::from_utf8_lossy(&hex_buf).to_string();
                    let static_name: &'static str = match name.as_str() {
                        "md5" => "md5",
                        "sha1" => "sha1",
                        "sha256" => "sha256",
                        _ => "md5",
                    };
                    stored_hashes.insert(static_name, hex);
                }
                let mut done_tag = [0u8; 4];
                file.read_exact(&mut done_tag)?;
                if &done_tag == TAG_DONE {
                    finalized = true;
                }
                valid_len_in_last_segment = file.stream_position()?;
                break 'segments;
            } else {
                if is_last {
                    valid_len_in_last_segment = pos_before_tag;
                    break 'segments;
                } else {
                    corrupted = true;
                    break 'segments;
                }
            }
        }
    }

    let profile = profile.ok_or_else(|| {
        CoreError::new(ErrorKind::ChecksumError, "no header section found in archive")
    })?;
    let geometry = geometry.expect("geometry set alongside profile");
    let media = media.expect("media set alongside profile");
    let case_data = case_data.expect("case data set alongside profile");
    let acquiry_size = acquiry_size.expect("acquiry size set alongside profile");

    Ok(ScanResult {
        profile,
        geometry,
        media,
        case_data,
        acquiry_size,
        chunk_table,
        stored_hashes,
        checksum_errors,
        finalized,
        corrupted,
        valid_len_in_last_segment,
    })
}

impl ArchiveBackend for EwfArchiveBackend {
    fn chunk_size(&self) -> u32 {
        self.geometry.chunk_size()
    }

    fn bytes_per_sector(&self) -> u32 {
        self.geometry.bytes_per_sector
    }

    fn chunk_count(&self) -> u64 {
        self.chunk_table.len() as u64
    }

    fn write_chunk(&mut self, buf: &StorageMediaBuffer) -> Result<()> {
        if self.mode != Mode::Write {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "archive was opened read-only",
            ));
        }
        let raw = buf.as_raw().ok_or_else(|| {
            CoreError::new(
                ErrorKind::InvalidArgument,
                "write_chunk requires a raw (uncompressed) buffer",
            )
        })?;
        let checksum = crc32fast::hash(raw);
        let all_zero = raw.iter().all(|&b| b == 0);
        let should_compress = match self.profile.compression_level {
            CompressionLevel::None => self.profile.compress_empty_block && all_zero,
            _ => true,
        };

        let stored: Vec<u8> = if should_compress {
            let level = self
                .profile
                .compression_level
                .to_flate2()
                .unwrap_or_else(flate2::Compression::default);
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(raw)?;
            encoder.finish()?
        } else {
            raw.to_vec()
        };

        let record_len = 4 + 1 + 4 + 4 + 4 + stored.len() as u64;
        if self.current_segment_bytes + record_len > self.profile.segment_size_max {
            self.roll_segment()?;
        }

        let segment_index = self.segments.len() - 1;
        let current = self.segments.last_mut().expect("at least one segment");
        current.file.write_all(TAG_CHUNK)?;
        current.file.write_all(&[should_compress as u8])?;
        current.file.write_all(&checksum.to_le_bytes())?;
        current.file.write_all(&(raw.len() as u32).to_le_bytes())?;
        current.file.write_all(&(stored.len() as u32).to_le_bytes())?;
        let payload_offset = current.file.stream_position()?;
        current.file.write_all(&stored)?;

        self.current_segment_bytes += record_len;
        self.chunk_table.push(ChunkLocator {
            segment_index,
            payload_offset,
            stored_len: stored.len() as u32,
            compressed: should_compress,
            inflated_len: raw.len() as u32,
            checksum,
        });
        debug!(
            "wrote chunk {} ({} bytes, compressed={})",
            self.chunk_table.len() - 1,
            raw.len(),
            should_compress
        );
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut StorageMediaBuffer, index: u64) -> Result<ChunkReadStatus> {
        let locator = *self.chunk_table.get(index as usize).ok_or_else(|| {
            CoreError::new(
                ErrorKind::OffsetOutOfRange,
                format!("chunk index {} does not exist", index),
            )
        })?;
        let segment = &mut self.segments[locator.segment_index];
        segment.file.seek(SeekFrom::Start(locator.payload_offset))?;
        let mut stored = vec![0u8; locator.stored_len as usize];
        segment.file.read_exact(&mut stored)?;

        let raw = if locator.compressed {
            let mut decoder = ZlibDecoder::new(&stored[..]);
            let mut out = Vec::with_capacity(locator.inflated_len as usize);
            decoder.read_to_end(&mut out).map_err(|_| {
                CoreError::new(ErrorKind::ChecksumError, "failed to inflate chunk")
            })?;
            out
        } else {
            stored
        };

        let actual_checksum = crc32fast::hash(&raw);
        buf.set_raw(raw)?;
        if actual_checksum == locator.checksum {
            Ok(ChunkReadStatus::Ok)
        } else {
            Ok(ChunkReadStatus::ChecksumMismatch)
        }
    }

    fn append_checksum_error(&mut self, start_sector: u64, sector_count: u32) {
        insert_read_error(
            &mut self.checksum_errors,
            ReadError {
                start_sector,
                sector_count,
            },
        );
    }

    fn stored_checksum_errors(&self) -> &[ReadError] {
        &self.checksum_errors
    }

    fn finalize(&mut self, global_hashes: &[(&'static str, String)]) -> Result<u64> {
        if self.mode != Mode::Write {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                "cannot finalize a read-only archive",
            ));
        }
        let current = self.segments.last_mut().expect("at least one segment");
        let start = current.file.stream_position()?;

        current.file.write_all(TAG_ERRS)?;
        current
            .file
            .write_all(&(self.checksum_errors.len() as u32).to_le_bytes())?;
        for err in &self.checksum_errors {
            current.file.write_all(&err.start_sector.to_le_bytes())?;
            current.file.write_all(&err.sector_count.to_le_bytes())?;
        }

        current.file.write_all(TAG_HASH)?;
        current.file.write_all(&[global_hashes.len() as u8])?;
        for (name, hex) in global_hashes {
            current.file.write_all(&[name.len() as u8])?;
            current.file.write_all(name.as_bytes())?;
            current.file.write_all(&[hex.len() as u8])?;
            current.file.write_all(hex.as_bytes())?;
            self.stored_hashes.insert(*name, hex.clone());
        }
        current.file.write_all(TAG_DONE)?;
        let end = current.file.stream_position()?;
        self.finalized = true;
        info!("finalized archive at {}", self.stem.display());
        Ok(end - start)
    }

    fn segment_files_corrupted(&self) -> bool {
        self.corrupted
    }

    fn filename_for_offset(&self, offset: u64) -> Option<PathBuf> {
        let chunk_size = self.geometry.chunk_size() as u64;
        let index = offset / chunk_size;
        self.chunk_table
            .get(index as usize)
            .map(|locator| self.segments[locator.segment_index].path.clone())
    }

    fn stored_hashes(&self) -> &HashMap<&'static str, String> {
        &self.stored_hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaFlags;

    fn test_profile() -> ArchiveProfile {
        ArchiveProfile {
            format: ArchiveFormat::Encase6,
            compression_level: CompressionLevel::None,
            compress_empty_block: false,
            segment_size_max: 4096,
        }
    }

    fn test_media() -> MediaDescriptor {
        MediaDescriptor::new(65536, MediaType::Fixed, MediaFlags::PHYSICAL).unwrap()
    }

    #[test]
    fn write_then_read_back_chunk_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case001");
        let geometry = Geometry::new(512, 64, 64).unwrap();

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            65536,
            false,
        )
        .unwrap();
        let mut backend = outcome.backend;
        assert_eq!(outcome.resume_offset, 0);

        let mut buf = StorageMediaBuffer::new(geometry.chunk_size() as usize);
        buf.set_raw(vec![0x7Au8; geometry.chunk_size() as usize]).unwrap();
        backend.write_chunk(&buf).unwrap();
        backend.finalize(&[("md5", "deadbeef".to_string())]).unwrap();

        let segment = segment_filename(&stem, ExtensionFamily::Ewf, 1);
        let mut reader = EwfArchiveBackend::open_read(&[segment]).unwrap();
        let mut read_buf = StorageMediaBuffer::new(geometry.chunk_size() as usize);
        let status = reader.read_chunk(&mut read_buf, 0).unwrap();
        assert_eq!(status, ChunkReadStatus::Ok);
        assert_eq!(read_buf.as_raw().unwrap(), &vec![0x7Au8; geometry.chunk_size() as usize][..]);
        assert_eq!(reader.stored_hashes().get("md5"), Some(&"deadbeef".to_string()));
    }

    #[test]
    fn resume_picks_up_after_last_complete_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case002");
        let geometry = Geometry::new(512, 64, 64).unwrap();
        let chunk = vec![0x11u8; geometry.chunk_size() as usize];

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            65536,
            false,
        )
        .unwrap();
        let mut backend = outcome.backend;
        let mut buf = StorageMediaBuffer::new(geometry.chunk_size() as usize);
        buf.set_raw(chunk.clone()).unwrap();
        backend.write_chunk(&buf).unwrap();
        drop(backend);

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            65536,
            true,
        )
        .unwrap();
        assert_eq!(outcome.resume_offset, geometry.chunk_size() as u64);
        assert_eq!(outcome.backend.chunk_count(), 1);
    }

    #[test]
    fn resume_with_changed_acquiry_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case002b");
        let geometry = Geometry::new(512, 64, 64).unwrap();
        let chunk = vec![0x11u8; geometry.chunk_size() as usize];

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            65536,
            false,
        )
        .unwrap();
        let mut backend = outcome.backend;
        let mut buf = StorageMediaBuffer::new(geometry.chunk_size() as usize);
        buf.set_raw(chunk).unwrap();
        backend.write_chunk(&buf).unwrap();
        drop(backend);

        let err = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            32768,
            true,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MismatchedProfile);
    }

    #[test]
    fn resume_allows_any_size_when_recorded_as_to_end_of_media() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case002c");
        let geometry = Geometry::new(512, 64, 64).unwrap();
        let chunk = vec![0x11u8; geometry.chunk_size() as usize];

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            0,
            false,
        )
        .unwrap();
        let mut backend = outcome.backend;
        let mut buf = StorageMediaBuffer::new(geometry.chunk_size() as usize);
        buf.set_raw(chunk).unwrap();
        backend.write_chunk(&buf).unwrap();
        drop(backend);

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            12345,
            true,
        )
        .unwrap();
        assert_eq!(outcome.backend.chunk_count(), 1);
    }

    #[test]
    fn rollover_splits_across_segments() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case003");
        let geometry = Geometry::new(512, 64, 64).unwrap();
        let mut profile = test_profile();
        profile.segment_size_max = crate::profile::MIN_SEGMENT_SIZE;

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            profile,
            geometry,
            test_media(),
            CaseData::default(),
            65536,
            false,
        )
        .unwrap();
        let mut backend = outcome.backend;
        let chunk_size = geometry.chunk_size() as usize;
        for i in 0..64u8 {
            let mut buf = StorageMediaBuffer::new(chunk_size);
            buf.set_raw(vec![i; chunk_size]).unwrap();
            backend.write_chunk(&buf).unwrap();
        }
        assert!(segment_filename(&stem, ExtensionFamily::Ewf, 2).exists());
    }

    #[test]
    fn mismatched_resume_profile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("case004");
        let geometry = Geometry::new(512, 64, 64).unwrap();

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            test_profile(),
            geometry,
            test_media(),
            CaseData::default(),
            65536,
            false,
        )
        .unwrap();
        drop(outcome.backend);

        let mut other_profile = test_profile();
        other_profile.compression_level = CompressionLevel::Best;
        let err = EwfArchiveBackend::open_write(
            &stem,
            other_profile,
            geometry,
            test_media(),
            CaseData::default(),
            65536,
            true,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MismatchedProfile);
    }
}
