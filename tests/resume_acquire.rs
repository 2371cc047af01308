//! End-to-end resume: an acquisition interrupted partway through, resumed
//! from the same device, produces a byte-identical image and the same
//! final digests as a single uninterrupted run.

use ewfcore::archive::{segment_filename, ArchiveBackend, EwfArchiveBackend};
use ewfcore::device::{AbortFlag, DeviceReader, InjectedFaultDevice, ReadError, RetryPolicy};
use ewfcore::digest::{to_hex, DigestSelection, MultiDigest};
use ewfcore::geometry::Geometry;
use ewfcore::media::{CaseData, MediaDescriptor, MediaFlags, MediaType};
use ewfcore::pipeline::acquire::{acquire, AcquireParams};
use ewfcore::profile::{ArchiveFormat, ArchiveProfile, CompressionLevel, ExtensionFamily};
use ewfcore::progress::QuietSink;

/// Wraps a device and signals `abort` once `abort_after_bytes` have been
/// read, so a test can simulate an operator hitting Ctrl-C mid-acquisition
/// without racing a real timer.
struct AbortAfter {
    inner: InjectedFaultDevice,
    abort: AbortFlag,
    abort_after_bytes: u64,
    read_so_far: u64,
}

impl DeviceReader for AbortAfter {
    fn media_size(&self) -> u64 {
        self.inner.media_size()
    }
    fn bytes_per_sector(&self) -> u32 {
        self.inner.bytes_per_sector()
    }
    fn media_type(&self) -> ewfcore::media::MediaType {
        self.inner.media_type()
    }
    fn seek(&mut self, offset: u64) -> ewfcore::error::Result<()> {
        self.inner.seek(offset)
    }
    fn read(&mut self, buf: &mut [u8]) -> ewfcore::error::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read_so_far += n as u64;
        if self.read_so_far >= self.abort_after_bytes {
            self.abort.signal();
        }
        Ok(n)
    }
    fn read_errors(&self) -> &[ReadError] {
        self.inner.read_errors()
    }
    fn signal_abort(&self) {
        self.inner.signal_abort();
    }
}

fn geometry() -> Geometry {
    Geometry::new(512, 64, 64).unwrap() // 32 KiB chunks
}

fn profile() -> ArchiveProfile {
    ArchiveProfile {
        format: ArchiveFormat::Encase6,
        compression_level: CompressionLevel::None,
        compress_empty_block: false,
        segment_size_max: 16 * 1024 * 1024,
    }
}

fn media(size: u64) -> MediaDescriptor {
    MediaDescriptor::new(size, MediaType::Fixed, MediaFlags::PHYSICAL).unwrap()
}

fn source_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

#[test]
fn resumed_acquisition_matches_uninterrupted_one() {
    let geom = geometry();
    let size = 256 * 1024u64; // 8 chunks of 32 KiB
    let data = source_data(size as usize);

    // Reference run: one uninterrupted acquisition of the whole device.
    let ref_dir = tempfile::tempdir().unwrap();
    let ref_stem = ref_dir.path().join("reference");
    let mut ref_device = InjectedFaultDevice::new(data.clone(), 512, RetryPolicy::default());
    let ref_outcome = EwfArchiveBackend::open_write(
        &ref_stem,
        profile(),
        geom,
        media(size),
        CaseData::default(),
        size,
        false,
    )
    .unwrap();
    let mut ref_backend = ref_outcome.backend;
    let ref_digest = MultiDigest::new(DigestSelection::md5_only());
    let ref_report = acquire(
        &mut ref_device,
        &mut ref_backend,
        None,
        ref_digest,
        AcquireParams {
            swap_byte_pairs: false,
            acquiry_size: size,
            resume_offset: 0,
        },
        &mut QuietSink,
        &AbortFlag::new(),
    )
    .unwrap();
    assert!(!ref_report.aborted);

    // Interrupted run: abort after 3 of the 8 chunks have been read.
    let dir = tempfile::tempdir().unwrap();
    let stem = dir.path().join("interrupted");
    let abort = AbortFlag::new();
    let mut device = AbortAfter {
        inner: InjectedFaultDevice::new(data.clone(), 512, RetryPolicy::default()),
        abort: abort.clone(),
        abort_after_bytes: 3 * geom.chunk_size() as u64,
        read_so_far: 0,
    };
    let outcome = EwfArchiveBackend::open_write(
        &stem,
        profile(),
        geom,
        media(size),
        CaseData::default(),
        size,
        false,
    )
    .unwrap();
    let mut backend = outcome.backend;
    let digest = MultiDigest::new(DigestSelection::md5_only());
    let first_report = acquire(
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
        &abort,
    )
    .unwrap();
    assert!(first_report.aborted);
    assert_eq!(first_report.bytes_written, 3 * geom.chunk_size() as u64);
    drop(backend);

    // Resume: re-open with resume=true, seek the device past what was
    // already written, and finish the acquisition.
    let resume_outcome = EwfArchiveBackend::open_write(
        &stem,
        profile(),
        geom,
        media(size),
        CaseData::default(),
        size,
        true,
    )
    .unwrap();
    let mut resumed_backend = resume_outcome.backend;
    let resume_offset = resume_outcome.resume_offset;
    assert_eq!(resume_offset, 3 * geom.chunk_size() as u64);

    let mut resumed_device = InjectedFaultDevice::new(data.clone(), 512, RetryPolicy::default());
    resumed_device.seek(resume_offset).unwrap();
    let resume_digest = MultiDigest::new(DigestSelection::md5_only());
    let resumed_report = acquire(
        &mut resumed_device,
        &mut resumed_backend,
        None,
        resume_digest,
        AcquireParams {
            swap_byte_pairs: false,
            acquiry_size: size,
            resume_offset,
        },
        &mut QuietSink,
        &AbortFlag::new(),
    )
    .unwrap();
    assert!(!resumed_report.aborted);

    // Same chunk count, same final MD5 as the uninterrupted reference.
    assert_eq!(resumed_backend.chunk_count(), ref_backend.chunk_count());
    let resumed_md5 = resumed_report
        .digests
        .iter()
        .find(|(name, _)| *name == "md5")
        .map(|(_, hex)| hex.clone())
        .unwrap();
    let ref_md5 = ref_report
        .digests
        .iter()
        .find(|(name, _)| *name == "md5")
        .map(|(_, hex)| hex.clone())
        .unwrap();
    assert_eq!(resumed_md5, ref_md5);

    // And the stored chunk bytes are identical, segment by segment.
    for n in 1u16.. {
        let seg_path = segment_filename(&stem, ExtensionFamily::Ewf, n);
        let ref_path = segment_filename(&ref_stem, ExtensionFamily::Ewf, n);
        if !seg_path.exists() && !ref_path.exists() {
            break;
        }
        // Only the chunk payload contents need to match; case/volume
        // metadata can legitimately differ only in absent fields, which
        // neither fixture sets, so a straight file comparison holds.
        let a = std::fs::read(&seg_path).unwrap();
        let b = std::fs::read(&ref_path).unwrap();
        assert_eq!(a, b, "segment {} contents diverged after resume", n);
    }

    // Independent sanity check against a reference MD5 of the source bytes.
    use md5::Md5;
    use sha2::Digest as _;
    let mut md5 = Md5::new();
    sha2::Digest::update(&mut md5, &data);
    let expected = to_hex(&sha2::Digest::finalize(md5));
    assert_eq!(ref_md5, expected);
}
