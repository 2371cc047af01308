//! The verification loop — the dual of `pipeline::acquire`: reads every
//! chunk back out of an archive, recomputes its checksum and a fresh
//! full-stream digest, and compares both against what was stored.

use std::path::PathBuf;
use std::time::Instant;

use log::{info, warn};

use crate::archive::{ArchiveBackend, ChunkReadStatus};
use crate::buffer::StorageMediaBuffer;
use crate::device::{AbortFlag, ReadError};
use crate::digest::MultiDigest;
use crate::error::Result;
use crate::progress::{ProgressSink, RateLimitedReporter, TerminalStatus};

/// One stored-vs-computed digest comparison.
#[derive(Debug, Clone)]
pub struct DigestComparison {
    pub algorithm: &'static str,
    pub stored: Option<String>,
    pub computed: String,
    pub matches: bool,
}

/// Where a checksum mismatch was found, for operator-facing reporting.
#[derive(Debug, Clone)]
pub struct ChecksumErrorLocation {
    pub chunk_index: u64,
    pub segment_path: Option<PathBuf>,
}

/// Outcome of a completed (or aborted) verification run.
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub chunks_checked: u64,
    pub bytes_checked: u64,
    pub digest_comparisons: Vec<DigestComparison>,
    pub checksum_error_locations: Vec<ChecksumErrorLocation>,
    /// Sector ranges the archive already recorded as unreadable at
    /// acquisition time. Reported for operator visibility, not treated as a
    /// verification failure: the bytes covering them were wiped and their
    /// checksum was computed over the wipe, so they verify clean.
    pub known_read_error_ranges: Vec<ReadError>,
    pub corrupted_segments: bool,
    pub aborted: bool,
}

impl VerifyReport {
    /// True only when every digest matched, no checksum errors were found,
    /// and no segment file was structurally corrupted.
    pub fn success(&self) -> bool {
        !self.aborted
            && !self.corrupted_segments
            && self.checksum_error_locations.is_empty()
            && self.digest_comparisons.iter().all(|d| d.matches)
    }
}

/// Per-run verification parameters.
pub struct VerifyParams {
    /// Zero the live buffer past a checksum mismatch before advancing, so a
    /// caller that also wants to re-derive media content sees zeros rather
    /// than the corrupted bytes, mirroring the acquire wipe policy.
    pub zero_on_mismatch: bool,
}

/// Re-reads every chunk of `backend`, feeding `digest`, and compares the
/// result against the hashes `backend` has stored from acquisition time.
pub fn verify(
    backend: &mut dyn ArchiveBackend,
    mut digest: MultiDigest,
    params: VerifyParams,
    progress: &mut dyn ProgressSink,
    abort: &AbortFlag,
) -> Result<VerifyReport> {
    let chunk_size = backend.chunk_size() as u64;
    let total_chunks = backend.chunk_count();
    let bytes_total = total_chunks * chunk_size;
    let mut buf = StorageMediaBuffer::new(chunk_size as usize);
    let mut reporter = RateLimitedReporter::new(Some(bytes_total), Instant::now());

    info!(
        "verification started: {} chunks ({} bytes)",
        total_chunks, bytes_total
    );

    let mut checksum_error_locations = Vec::new();
    let mut bytes_checked = 0u64;
    let mut chunks_checked = 0u64;
    let mut aborted = false;

    for index in 0..total_chunks {
        if abort.is_set() {
            aborted = true;
            break;
        }

        let status = backend.read_chunk(&mut buf, index)?;
        if status == ChunkReadStatus::ChecksumMismatch {
            warn!("checksum mismatch at chunk {}", index);
            checksum_error_locations.push(ChecksumErrorLocation {
                chunk_index: index,
                segment_path: backend.filename_for_offset(index * chunk_size),
            });
            if params.zero_on_mismatch {
                let len = buf.live_len();
                buf.zero_range(0, len)?;
            }
        }

        digest.update(buf.as_live());
        bytes_checked += buf.live_len() as u64;
        chunks_checked += 1;

        if let Some(tick) = reporter.observe(bytes_checked, Instant::now()) {
            progress.tick(&tick);
        }
    }

    if aborted {
        progress.finished(TerminalStatus::Aborted);
        return Ok(VerifyReport {
            chunks_checked,
            bytes_checked,
            digest_comparisons: Vec::new(),
            checksum_error_locations,
            known_read_error_ranges: backend.stored_checksum_errors().to_vec(),
            corrupted_segments: backend.segment_files_corrupted(),
            aborted: true,
        });
    }

    let computed = digest.finalize_hex();
    let stored = backend.stored_hashes();
    let digest_comparisons = computed
        .into_iter()
        .map(|(algorithm, computed)| {
            let stored_hex = stored.get(algorithm).cloned();
            let matches = stored_hex.as_deref() == Some(computed.as_str());
            DigestComparison {
                algorithm,
                stored: stored_hex,
                computed,
                matches,
            }
        })
        .collect::<Vec<_>>();

    let corrupted_segments = backend.segment_files_corrupted();
    let all_ok = !corrupted_segments
        && checksum_error_locations.is_empty()
        && digest_comparisons.iter().all(|d| d.matches);

    info!(
        "verification completed: {} chunks, {} checksum errors, digests {}",
        chunks_checked,
        checksum_error_locations.len(),
        if all_ok { "match" } else { "mismatch" }
    );
    progress.finished(if all_ok {
        TerminalStatus::Completed
    } else {
        TerminalStatus::Failed
    });

    Ok(VerifyReport {
        chunks_checked,
        bytes_checked,
        digest_comparisons,
        checksum_error_locations,
        known_read_error_ranges: backend.stored_checksum_errors().to_vec(),
        corrupted_segments,
        aborted: false,
    })
}
