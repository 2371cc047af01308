//! Parameter validation/defaulting and pipeline dispatch.
//!
//! Grounded on `main.rs`, which resolves clap matches into the concrete
//! settings `process_file` then acts on; `SessionController` is that same
//! resolve-then-dispatch shape, generalized to cover both acquisition and
//! verification and to own the defaulting/rejection rules that a read-only
//! CLI never needed (it never wrote an archive).

use std::path::PathBuf;

use log::warn;

use crate::archive::{ArchiveBackend, EwfArchiveBackend};
use crate::device::{AbortFlag, DeviceReader, FileDeviceReader};
use crate::digest::{DigestSelection, MultiDigest};
use crate::error::{CoreError, ErrorKind, Result};
use crate::geometry::Geometry;
use crate::media::{CaseData, HeaderCodepage, MediaDescriptor};
use crate::pipeline::acquire::{acquire, AcquireParams, AcquireReport};
use crate::pipeline::verify::{verify, VerifyParams, VerifyReport};
use crate::profile::ArchiveProfile;
use crate::progress::ProgressSink;

/// The CLI-facing seam: gathers every parameter a session needs without
/// committing to how they were parsed.
pub trait ParameterSource {
    fn geometry(&self) -> Geometry;
    fn media(&self) -> MediaDescriptor;
    fn profile(&self) -> ArchiveProfile;
    fn case_data(&self) -> CaseData;
    fn header_codepage(&self) -> HeaderCodepage;
    fn target_stem(&self) -> PathBuf;
    fn secondary_target_stem(&self) -> Option<PathBuf>;
    fn acquiry_offset(&self) -> u64;
    fn acquiry_size(&self) -> u64;
    fn digests(&self) -> DigestSelection;
    fn max_retries(&self) -> u8;
    fn wipe_on_error(&self) -> bool;
    fn swap_byte_pairs(&self) -> bool;
    fn resume(&self) -> bool;
    fn quiet(&self) -> bool;

    /// Requested process buffer size in bytes, if the caller gave one. When
    /// present it must equal the chunk size implied by the geometry, or
    /// validation rejects the run.
    fn buffer_size(&self) -> Option<u64> {
        None
    }

    /// Source device/file path(s) to acquire from. The switch table this
    /// trait otherwise mirrors has no dedicated input flag of its own;
    /// this is added because `SessionController::run_acquire` has nowhere
    /// else to learn what to open. A single path is the common case;
    /// multiple entries model a pre-split source.
    fn source_paths(&self) -> Vec<PathBuf>;
}

/// Parameters as validated/defaulted by [`SessionController::validate`],
/// ready to hand to a pipeline.
#[derive(Debug, Clone)]
pub struct EffectiveParams {
    pub geometry: Geometry,
    pub media: MediaDescriptor,
    pub profile: ArchiveProfile,
    pub case_data: CaseData,
    pub target_stem: PathBuf,
    pub secondary_target_stem: Option<PathBuf>,
    pub acquiry_offset: u64,
    pub acquiry_size: u64,
    pub digests: DigestSelection,
    pub max_retries: u8,
    pub wipe_on_error: bool,
    pub swap_byte_pairs: bool,
    pub resume: bool,
    pub quiet: bool,
}

/// Validates and defaults a raw [`ParameterSource`] into [`EffectiveParams`],
/// applying the session's rule list: geometry checks, segment-size bounds,
/// and format-ceiling enforcement.
pub struct SessionController;

impl SessionController {
    pub fn validate(source: &dyn ParameterSource) -> Result<EffectiveParams> {
        let media = source.media();
        let geometry = source.geometry();
        let offset = source.acquiry_offset();

        if offset > media.media_size {
            return Err(CoreError::new(
                ErrorKind::OffsetOutOfRange,
                format!(
                    "acquiry offset {} exceeds media size {}",
                    offset, media.media_size
                ),
            ));
        }

        let remaining = media.media_size - offset;
        let requested = source.acquiry_size();
        let acquiry_size = if requested == 0 || requested > remaining {
            remaining
        } else {
            requested
        };
        if offset + acquiry_size > media.media_size {
            return Err(CoreError::new(
                ErrorKind::OffsetOutOfRange,
                format!(
                    "acquiry range [{}, {}) exceeds media size {}",
                    offset,
                    offset + acquiry_size,
                    media.media_size
                ),
            ));
        }

        // Geometry already rejects an out-of-range error_granularity_sectors
        // at construction time (Design Note 9, Open Question #1); nothing
        // further to check here.
        let _ = &geometry;

        if let Some(buffer_size) = source.buffer_size() {
            let chunk_size = geometry.chunk_size() as u64;
            if buffer_size != chunk_size {
                return Err(CoreError::new(
                    ErrorKind::InvalidArgument,
                    format!(
                        "process buffer size {} does not match the chunk size {} implied by the geometry",
                        buffer_size, chunk_size
                    ),
                ));
            }
        }

        let mut profile = source.profile();
        let ceiling = if profile.format.allows_large_segments() {
            crate::profile::SEGMENT_SIZE_CEILING_64
        } else {
            crate::profile::SEGMENT_SIZE_CEILING_32
        };
        if profile.segment_size_max < crate::profile::MIN_SEGMENT_SIZE
            || profile.segment_size_max >= ceiling
        {
            // Segment-size bound specifically (not the 2 TiB format rule,
            // which must still hard-fail below) gets downgraded to a
            // warning and a default.
            warn!(
                "segment size {} out of bounds for format {:?}; defaulting to 1.4 GiB",
                profile.segment_size_max, profile.format
            );
            profile = profile.with_default_segment_size();
        }
        profile.validate(Some(acquiry_size))?;

        Ok(EffectiveParams {
            geometry,
            media,
            profile,
            case_data: source.case_data(),
            target_stem: source.target_stem(),
            secondary_target_stem: source.secondary_target_stem(),
            acquiry_offset: offset,
            acquiry_size,
            digests: source.digests(),
            max_retries: source.max_retries(),
            wipe_on_error: source.wipe_on_error(),
            swap_byte_pairs: source.swap_byte_pairs(),
            resume: source.resume(),
            quiet: source.quiet(),
        })
    }

    /// Opens the device and primary/secondary archives, and drives
    /// `pipeline::acquire` to completion.
    pub fn run_acquire(
        source: &dyn ParameterSource,
        progress: &mut dyn ProgressSink,
        abort: &AbortFlag,
    ) -> Result<AcquireReport> {
        let effective = Self::validate(source)?;

        let policy = crate::device::RetryPolicy {
            max_retries: effective.max_retries,
            wipe_on_error: effective.wipe_on_error,
            error_granularity_bytes: effective.geometry.error_granularity_bytes(),
            bytes_per_sector: effective.geometry.bytes_per_sector,
        };
        let paths = source.source_paths();
        let mut device = FileDeviceReader::open_with_policy(
            &paths,
            effective.geometry.bytes_per_sector,
            policy,
        )?;

        let outcome = EwfArchiveBackend::open_write(
            &effective.target_stem,
            effective.profile,
            effective.geometry,
            effective.media.clone(),
            effective.case_data.clone(),
            effective.acquiry_size,
            effective.resume,
        )?;
        let mut primary = outcome.backend;
        let resume_offset = outcome.resume_offset;

        let mut secondary_backend = match &effective.secondary_target_stem {
            Some(stem) => Some(
                EwfArchiveBackend::open_write(
                    stem,
                    effective.profile,
                    effective.geometry,
                    effective.media.clone(),
                    effective.case_data.clone(),
                    effective.acquiry_size,
                    effective.resume,
                )?
                .backend,
            ),
            None => None,
        };

        device.seek(effective.acquiry_offset + resume_offset)?;

        let digest = MultiDigest::new(effective.digests);
        acquire(
            &mut device,
            &mut primary,
            secondary_backend.as_mut().map(|b| b as &mut dyn ArchiveBackend),
            digest,
            AcquireParams {
                swap_byte_pairs: effective.swap_byte_pairs,
                acquiry_size: effective.acquiry_size,
                resume_offset,
            },
            progress,
            abort,
        )
    }

    /// Opens an existing archive and drives `pipeline::verify` to
    /// completion.
    pub fn run_verify(
        source: &dyn ParameterSource,
        progress: &mut dyn ProgressSink,
        abort: &AbortFlag,
    ) -> Result<VerifyReport> {
        let stem = source.target_stem();
        let segment_paths = EwfArchiveBackend::discover_for_read(&stem)?;
        let mut backend = EwfArchiveBackend::open_read(&segment_paths)?;
        let digest = MultiDigest::new(source.digests());
        verify(
            &mut backend,
            digest,
            VerifyParams {
                zero_on_mismatch: false,
            },
            progress,
            abort,
        )
    }
}
