//! The acquisition producer loop.
//!
//! There is no acquisition loop in the reference crate this grew from, only
//! read paths (`ewf::EWF::read`, `vmdk::VMDK::read`) — but the loop's shape
//! (explicit cursor bookkeeping, no iterator adaptors over the chunk index)
//! follows those read loops' own style.

use std::time::Instant;

use log::{debug, info, warn};

use crate::archive::ArchiveBackend;
use crate::buffer::StorageMediaBuffer;
use crate::device::{AbortFlag, DeviceReader, ReadError};
use crate::digest::MultiDigest;
use crate::error::Result;
use crate::progress::{ProgressSink, RateLimitedReporter, TerminalStatus};

/// Per-run acquisition parameters the loop needs beyond its collaborators.
pub struct AcquireParams {
    pub swap_byte_pairs: bool,
    pub acquiry_size: u64,
    pub resume_offset: u64,
}

/// Outcome of a completed (or aborted) acquisition run.
#[derive(Debug, Clone)]
pub struct AcquireReport {
    pub bytes_written: u64,
    pub chunks_written: u64,
    pub read_errors: Vec<ReadError>,
    pub digests: Vec<(&'static str, String)>,
    pub aborted: bool,
}

/// Drives one acquisition: `device` → `primary` (and, if given, `secondary`
/// as a best-effort mirror), one chunk at a time.
pub fn acquire(
    device: &mut dyn DeviceReader,
    primary: &mut dyn ArchiveBackend,
    mut secondary: Option<&mut dyn ArchiveBackend>,
    mut digest: MultiDigest,
    params: AcquireParams,
    progress: &mut dyn ProgressSink,
    abort: &AbortFlag,
) -> Result<AcquireReport> {
    let chunk_size = primary.chunk_size() as u64;
    let mut acquiry_count: u64 = 0;
    let mut chunks_written: u64 = 0;
    let mut buf = StorageMediaBuffer::new(chunk_size as usize);
    let mut reporter = RateLimitedReporter::new(Some(params.acquiry_size), Instant::now());

    info!(
        "acquisition started: {} bytes to acquire in {}-byte chunks (resume_offset={})",
        params.acquiry_size, chunk_size, params.resume_offset
    );

    let mut aborted = false;
    while acquiry_count < params.acquiry_size {
        if abort.is_set() {
            aborted = true;
            break;
        }

        let n = chunk_size.min(params.acquiry_size - acquiry_count);
        let index = acquiry_count / chunk_size;

        if acquiry_count < params.resume_offset {
            // Already written in a prior run; feed the digest from the
            // archive instead of the device so resume reproduces the exact
            // same byte stream.
            primary.read_chunk(&mut buf, index)?;
            digest.update(buf.as_live());
            debug!("resumed chunk {} from existing archive", index);
        } else {
            let mut raw = vec![0u8; n as usize];
            device.read(&mut raw)?;
            buf.set_raw(raw)?;
            if params.swap_byte_pairs {
                buf.swap_byte_pairs()?;
            }
            digest.update(buf.as_live());
            primary.write_chunk(&buf)?;
            if let Some(sec) = secondary.as_deref_mut() {
                sec.write_chunk(&buf)?;
            }
            debug!("wrote chunk {} ({} bytes)", index, n);
        }

        acquiry_count += n;
        chunks_written += 1;

        if let Some(status) = reporter.observe(acquiry_count, Instant::now()) {
            progress.tick(&status);
        }
    }

    if aborted {
        warn!(
            "acquisition aborted after {} bytes; archive left resumable, not finalized",
            acquiry_count
        );
        progress.finished(TerminalStatus::Aborted);
        return Ok(AcquireReport {
            bytes_written: acquiry_count,
            chunks_written,
            read_errors: device.read_errors().to_vec(),
            digests: Vec::new(),
            aborted: true,
        });
    }

    for err in device.read_errors() {
        primary.append_checksum_error(err.start_sector, err.sector_count);
        if let Some(sec) = secondary.as_deref_mut() {
            sec.append_checksum_error(err.start_sector, err.sector_count);
        }
    }

    let digests = digest.finalize_hex();
    let extra = primary.finalize(&digests)?;
    if let Some(sec) = secondary.as_deref_mut() {
        sec.finalize(&digests)?;
    }

    info!(
        "acquisition completed: {} chunks, {} bytes",
        chunks_written,
        acquiry_count + extra
    );
    progress.finished(TerminalStatus::Completed);

    Ok(AcquireReport {
        bytes_written: acquiry_count + extra,
        chunks_written,
        read_errors: device.read_errors().to_vec(),
        digests,
        aborted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::EwfArchiveBackend;
    use crate::device::{FaultKind, InjectedFault, InjectedFaultDevice, RetryPolicy};
    use crate::digest::{to_hex, DigestSelection};
    use crate::geometry::Geometry;
    use crate::media::{CaseData, MediaDescriptor, MediaFlags, MediaType};
    use crate::profile::{ArchiveFormat, ArchiveProfile, CompressionLevel, ExtensionFamily};
    use crate::progress::QuietSink;
    use md5::Md5;
    use sha2::Digest as _;

    fn geometry() -> Geometry {
        Geometry::new(512, 64, 64).unwrap()
    }

    fn profile(segment_size_max: u64) -> ArchiveProfile {
        ArchiveProfile {
            format: ArchiveFormat::Encase6,
            compression_level: CompressionLevel::None,
            compress_empty_block: false,
            segment_size_max,
        }
    }

    fn media(size: u64) -> MediaDescriptor {
        MediaDescriptor::new(size, MediaType::Fixed, MediaFlags::PHYSICAL).unwrap()
    }

    /// Clean acquisition of a 10 MiB uniform device.
    #[test]
    fn clean_acquisition_of_uniform_device() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("caseA");
        let size = 10 * 1024 * 1024u64;
        let data = vec![0xA5u8; size as usize];
        let geom = geometry();

        let mut device = InjectedFaultDevice::new(data.clone(), 512, RetryPolicy::default());

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            profile(4 * 1024 * 1024),
            geom,
            media(size),
            CaseData::default(),
            size,
            false,
        )
        .unwrap();
        let mut backend = outcome.backend;

        let digest = MultiDigest::new(DigestSelection {
            md5: true,
            sha1: true,
            sha256: false,
        });

        let report = acquire(
            &mut device,
            &mut backend,
            None,
            digest,
            AcquireParams {
                swap_byte_pairs: false,
                acquiry_size: size,
                resume_offset: 0,
            },
            &mut QuietSink,
            &AbortFlag::new(),
        )
        .unwrap();

        assert_eq!(report.chunks_written, 320);
        assert!(!report.aborted);
        assert_eq!(
            backend.chunk_count(),
            320,
            "320 chunks of 32 KiB cover the 10 MiB device"
        );
        for n in 1..=3u16 {
            assert!(crate::archive::segment_filename(&stem, ExtensionFamily::Ewf, n).exists());
        }

        let mut md5 = Md5::new();
        sha2::Digest::update(&mut md5, &data);
        let expected_md5 = to_hex(&sha2::Digest::finalize(md5));
        let stored_md5 = report
            .digests
            .iter()
            .find(|(name, _)| *name == "md5")
            .map(|(_, hex)| hex.clone())
            .unwrap();
        assert_eq!(stored_md5, expected_md5);
    }

    /// A permanently failing sector is wiped and recorded, the rest of the
    /// device acquires cleanly.
    #[test]
    fn read_error_recovery_wipes_and_records_faulty_sector() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("caseB");
        let size = 128 * 1024u64;
        let data = vec![0x5Au8; size as usize];
        let geom = Geometry::new(512, 64, 8).unwrap();

        let mut device = InjectedFaultDevice::new(
            data,
            512,
            RetryPolicy {
                max_retries: 2,
                wipe_on_error: true,
                error_granularity_bytes: geom.error_granularity_bytes(),
                bytes_per_sector: 512,
            },
        );
        device.inject(InjectedFault {
            range: 65536..66048,
            kind: FaultKind::Permanent,
        });

        let outcome = EwfArchiveBackend::open_write(
            &stem,
            profile(4 * 1024 * 1024),
            geom,
            media(size),
            CaseData::default(),
            size,
            false,
        )
        .unwrap();
        let mut backend = outcome.backend;

        let digest = MultiDigest::new(DigestSelection::md5_only());
        let report = acquire(
            &mut device,
            &mut backend,
            None,
            digest,
            AcquireParams {
                swap_byte_pairs: false,
                acquiry_size: size,
                resume_offset: 0,
            },
            &mut QuietSink,
            &AbortFlag::new(),
        )
        .unwrap();

        assert_eq!(report.read_errors.len(), 1);
        assert_eq!(report.read_errors[0].start_sector, 128);
        assert_eq!(report.read_errors[0].sector_count, 8);
    }
}
