//! Sector-aware input source with a retry/wipe read-error policy.
//!
//! Grounded on `raw::RAW`/`ewf::find_files` for how a source is opened and
//! read (a plain `std::fs::File`, or a `glob`-discovered set of contiguous
//! segment files); the retry/wipe state machine itself has no prior
//! counterpart since those read paths never acquire, only read, so it is
//! modeled as an explicit `ReadState` type per Design Note 9's
//! "coroutine-style reads" resolution, to keep it unit-testable without a
//! real device.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glob::glob;

use crate::error::{CoreError, ErrorKind, Result};
use crate::media::MediaType;

/// One fused span of unreadable sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadError {
    pub start_sector: u64,
    pub sector_count: u32,
}

/// Inserts `err` into `errors`, kept sorted by `start_sector`, fusing with
/// an adjacent or overlapping neighbor rather than growing the list.
pub(crate) fn insert_read_error(errors: &mut Vec<ReadError>, err: ReadError) {
    let pos = errors
        .binary_search_by_key(&err.start_sector, |e| e.start_sector)
        .unwrap_or_else(|p| p);

    let mut merged = err;
    let mut remove_left = false;
    if pos > 0 {
        let left = errors[pos - 1];
        let left_end = left.start_sector + left.sector_count as u64;
        if left_end >= merged.start_sector {
            let new_end = merged
                .start_sector
                .saturating_add(merged.sector_count as u64)
                .max(left_end);
            merged = ReadError {
                start_sector: left.start_sector,
                sector_count: (new_end - left.start_sector) as u32,
            };
            remove_left = true;
        }
    }
    let mut insert_at = if remove_left { pos - 1 } else { pos };
    if remove_left {
        errors.remove(pos - 1);
        insert_at = pos - 1;
    }

    while insert_at < errors.len() {
        let right = errors[insert_at];
        let merged_end = merged.start_sector + merged.sector_count as u64;
        if right.start_sector <= merged_end {
            let new_end = merged_end.max(right.start_sector + right.sector_count as u64);
            merged = ReadError {
                start_sector: merged.start_sector,
                sector_count: (new_end - merged.start_sector) as u32,
            };
            errors.remove(insert_at);
        } else {
            break;
        }
    }
    errors.insert(insert_at, merged);
}

/// Cooperative abort flag, checked at chunk boundaries by the pipeline and
/// by `DeviceReader::read`/`seek`.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A sector-aware, retry/wipe input source.
pub trait DeviceReader {
    fn media_size(&self) -> u64;
    fn bytes_per_sector(&self) -> u32;
    fn media_type(&self) -> MediaType;
    fn seek(&mut self, offset: u64) -> Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn read_errors(&self) -> &[ReadError];
    fn signal_abort(&self);
}

/// Retry/wipe policy parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u8,
    pub wipe_on_error: bool,
    pub error_granularity_bytes: u32,
    pub bytes_per_sector: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            wipe_on_error: false,
            error_granularity_bytes: 64 * 512,
            bytes_per_sector: 512,
        }
    }
}

/// Abstraction over the thing a [`ReadState`] drives: something that can
/// attempt to fill a byte range and report whether it fully, partially, or
/// never succeeded. Lets the retry/wipe state machine be tested without a
/// real file or device.
pub trait FaultyRead {
    /// Attempts to read `buf.len()` bytes at device-relative byte offset
    /// `at`. Returns `Ok(n)` for the number of bytes actually placed in
    /// `buf` (n < buf.len() signals a short/failed read at byte `n`), or
    /// `Err` if the device itself is gone (unrecoverable, no wipe).
    fn attempt(&mut self, at: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Outcome of one `ReadState::step` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The chunk read is complete; `filled` bytes of `buf` hold real data
    /// (always `buf.len()` once wipe-zeroed spans are included).
    Done,
    /// More work remains; call `step` again.
    Continue,
    /// The underlying device is gone; abort with `DeviceLost`.
    DeviceLost,
}

/// Drives the retry/wipe algorithm over one chunk-sized buffer, byte-offset
/// `k` at a time.
pub struct ReadState<'a> {
    buf: &'a mut [u8],
    base_offset: u64,
    cursor: usize,
    policy: RetryPolicy,
    errors: Vec<ReadError>,
}

impl<'a> ReadState<'a> {
    pub fn new(buf: &'a mut [u8], base_offset: u64, policy: RetryPolicy) -> Self {
        ReadState {
            buf,
            base_offset,
            cursor: 0,
            policy,
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[ReadError] {
        &self.errors
    }

    /// Runs the algorithm to completion against `source`, returning the
    /// fused read-error spans recorded along the way.
    pub fn run(mut self, source: &mut dyn FaultyRead) -> Result<Vec<ReadError>> {
        loop {
            match self.step(source)? {
                StepOutcome::Done => return Ok(self.errors),
                StepOutcome::Continue => continue,
                StepOutcome::DeviceLost => {
                    return Err(CoreError::new(
                        ErrorKind::DeviceLost,
                        "device vanished during read",
                    ))
                }
            }
        }
    }

    fn step(&mut self, source: &mut dyn FaultyRead) -> Result<StepOutcome> {
        if self.cursor >= self.buf.len() {
            return Ok(StepOutcome::Done);
        }
        let remaining = &mut self.buf[self.cursor..];
        let at = self.base_offset + self.cursor as u64;

        let mut attempts = 0u8;
        loop {
            match source.attempt(at, remaining) {
                Ok(n) if n == remaining.len() => {
                    self.cursor = self.buf.len();
                    return Ok(StepOutcome::Done);
                }
                Ok(k) => {
                    if attempts < self.policy.max_retries {
                        attempts += 1;
                        continue;
                    }
                    return self.handle_failure(k);
                }
                Err(e) if e.kind == ErrorKind::DeviceLost => return Ok(StepOutcome::DeviceLost),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_failure(&mut self, k: usize) -> Result<StepOutcome> {
        let g = self.policy.error_granularity_bytes.max(1) as usize;
        let fail_at = self.cursor + k;

        let (zero_start, zero_end) = if self.policy.wipe_on_error {
            let granularity_offset = (fail_at / g) * g;
            (granularity_offset, (granularity_offset + g).min(self.buf.len()))
        } else {
            let rem_in_granule = g - (fail_at % g);
            (fail_at, (fail_at + rem_in_granule).min(self.buf.len()))
        };

        for b in &mut self.buf[zero_start..zero_end] {
            *b = 0;
        }

        let bps = self.policy.bytes_per_sector.max(1) as u64;
        let start_sector = self.base_offset / bps + (zero_start as u64) / bps;
        let sector_count = ((zero_end - zero_start) as u64 / bps).max(1) as u32;
        insert_read_error(
            &mut self.errors,
            ReadError {
                start_sector,
                sector_count,
            },
        );

        self.cursor = zero_end;
        if self.cursor >= self.buf.len() {
            Ok(StepOutcome::Done)
        } else {
            Ok(StepOutcome::Continue)
        }
    }
}

/// Real device/file backend: one contiguous `File`, or several opened in
/// sequence and treated as one logical address space, the way
/// `ewf::find_files` discovers split segment files via `glob`.
pub struct FileDeviceReader {
    files: Vec<(File, u64)>,
    total_size: u64,
    bytes_per_sector: u32,
    media_type: MediaType,
    position: u64,
    abort: AbortFlag,
    policy: RetryPolicy,
    read_errors: Vec<ReadError>,
}

impl FileDeviceReader {
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        Self::open_with_policy(paths, 512, RetryPolicy::default())
    }

    pub fn open_with_policy(
        paths: &[PathBuf],
        bytes_per_sector: u32,
        policy: RetryPolicy,
    ) -> Result<Self> {
        if paths.is_empty() {
            return Err(CoreError::new(
                ErrorKind::InvalidPath,
                "no source paths given",
            ));
        }
        let mut files = Vec::with_capacity(paths.len());
        let mut total_size = 0u64;
        for path in paths {
            let file = File::open(path).map_err(|e| crate::error::path_open_error(path, e))?;
            let len = file.metadata()?.len();
            files.push((file, len));
            total_size += len;
        }
        Ok(FileDeviceReader {
            files,
            total_size,
            bytes_per_sector,
            media_type: MediaType::Fixed,
            position: 0,
            abort: AbortFlag::new(),
            policy: RetryPolicy {
                bytes_per_sector,
                ..policy
            },
            read_errors: Vec::new(),
        })
    }

    /// Discovers a contiguous set of split files by glob pattern, the way
    /// `ewf::find_files` resolves `case.E01`, `case.E02`, ... from a stem.
    pub fn discover_segments(stem: &Path, pattern_suffix: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!("{}{}", stem.display(), pattern_suffix);
        let mut found: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| CoreError::new(ErrorKind::InvalidPath, e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        found.sort();
        if found.is_empty() {
            return Err(CoreError::not_found(stem));
        }
        Ok(found)
    }

}

impl DeviceReader for FileDeviceReader {
    fn media_size(&self) -> u64 {
        self.total_size
    }

    fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if self.abort.is_set() {
            return Err(CoreError::new(ErrorKind::Aborted, "acquisition aborted"));
        }
        if offset > self.total_size {
            return Err(CoreError::new(
                ErrorKind::OffsetOutOfRange,
                format!("offset {} exceeds media size {}", offset, self.total_size),
            ));
        }
        self.position = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.abort.is_set() {
            return Err(CoreError::new(ErrorKind::Aborted, "acquisition aborted"));
        }
        let base_offset = self.position;
        let policy = self.policy;
        let files = &mut self.files;
        let mut source = FileBackedFault { files };
        let state = ReadState::new(buf, base_offset, policy);
        let errors = state.run(&mut source)?;
        for e in errors {
            insert_read_error(&mut self.read_errors, e);
        }
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn read_errors(&self) -> &[ReadError] {
        &self.read_errors
    }

    fn signal_abort(&self) {
        self.abort.signal();
    }
}

struct FileBackedFault<'a> {
    files: &'a mut Vec<(File, u64)>,
}

impl<'a> FaultyRead for FileBackedFault<'a> {
    fn attempt(&mut self, at: u64, buf: &mut [u8]) -> Result<usize> {
        let mut remaining = at;
        for (file, len) in self.files.iter_mut() {
            if remaining >= *len {
                remaining -= *len;
                continue;
            }
            file.seek(SeekFrom::Start(remaining))?;
            return Ok(file.read(buf)?);
        }
        Ok(0)
    }
}

/// Test double: an in-memory device with a caller-programmed table of byte
/// ranges that fail, permanently or transiently, without touching real
/// device I/O.
pub struct InjectedFaultDevice {
    data: Vec<u8>,
    bytes_per_sector: u32,
    media_type: MediaType,
    position: u64,
    abort: AbortFlag,
    policy: RetryPolicy,
    read_errors: Vec<ReadError>,
    faults: Vec<InjectedFault>,
}

#[derive(Debug, Clone, Copy)]
pub enum FaultKind {
    /// Fails every attempt within the range until `succeeds_after` retries
    /// have been consumed, then returns good data.
    Transient { succeeds_after: u8 },
    /// Always fails within the range.
    Permanent,
    /// The device itself is gone; no wipe is attempted.
    DeviceVanished,
}

#[derive(Debug, Clone, Copy)]
pub struct InjectedFault {
    pub range: std::ops::Range<u64>,
    pub kind: FaultKind,
}

impl InjectedFaultDevice {
    pub fn new(data: Vec<u8>, bytes_per_sector: u32, policy: RetryPolicy) -> Self {
        InjectedFaultDevice {
            data,
            bytes_per_sector,
            media_type: MediaType::Fixed,
            position: 0,
            abort: AbortFlag::new(),
            policy: RetryPolicy {
                bytes_per_sector,
                ..policy
            },
            read_errors: Vec::new(),
            faults: Vec::new(),
        }
    }

    pub fn inject(&mut self, fault: InjectedFault) {
        self.faults.push(fault);
    }
}

impl DeviceReader for InjectedFaultDevice {
    fn media_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    fn media_type(&self) -> MediaType {
        self.media_type
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if self.abort.is_set() {
            return Err(CoreError::new(ErrorKind::Aborted, "acquisition aborted"));
        }
        if offset > self.data.len() as u64 {
            return Err(CoreError::new(ErrorKind::OffsetOutOfRange, offset.to_string()));
        }
        self.position = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.abort.is_set() {
            return Err(CoreError::new(ErrorKind::Aborted, "acquisition aborted"));
        }
        let base_offset = self.position;
        let policy = self.policy;
        let mut source = InjectedFaultSource {
            faults: &mut self.faults,
            data: &self.data,
        };
        let state = ReadState::new(buf, base_offset, policy);
        let errors = state.run(&mut source)?;
        for e in errors {
            insert_read_error(&mut self.read_errors, e);
        }
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn read_errors(&self) -> &[ReadError] {
        &self.read_errors
    }

    fn signal_abort(&self) {
        self.abort.signal();
    }
}

struct InjectedFaultSource<'a> {
    faults: &'a mut Vec<InjectedFault>,
    data: &'a [u8],
}

impl<'a> FaultyRead for InjectedFaultSource<'a> {
    fn attempt(&mut self, at: u64, buf: &mut [u8]) -> Result<usize> {
        if let Some(idx) = self.faults.iter().position(|f| f.range.contains(&at)) {
            let fault = self.faults[idx];
            match fault.kind {
                FaultKind::DeviceVanished => {
                    return Err(CoreError::new(ErrorKind::DeviceLost, "injected fault"))
                }
                FaultKind::Permanent => return Ok(0),
                FaultKind::Transient { succeeds_after } => {
                    if succeeds_after > 0 {
                        self.faults[idx].kind = FaultKind::Transient {
                            succeeds_after: succeeds_after - 1,
                        };
                        return Ok(0);
                    }
                }
            }
        }
        let end = (at as usize + buf.len()).min(self.data.len());
        let start = (at as usize).min(end);
        let n = end - start;
        buf[..n].copy_from_slice(&self.data[start..end]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u8, wipe_on_error: bool, granularity: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            wipe_on_error,
            error_granularity_bytes: granularity,
            bytes_per_sector: 512,
        }
    }

    #[test]
    fn clean_read_produces_no_errors() {
        let data = vec![0xABu8; 4096];
        let mut device = InjectedFaultDevice::new(data, 512, policy(2, false, 512));
        let mut buf = vec![0u8; 4096];
        let n = device.read(&mut buf).unwrap();
        assert_eq!(n, 4096);
        assert!(device.read_errors().is_empty());
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn transient_fault_recovers_within_retry_budget() {
        let data = vec![0x11u8; 4096];
        let mut device = InjectedFaultDevice::new(data, 512, policy(2, false, 512));
        device.inject(InjectedFault {
            range: 0..512,
            kind: FaultKind::Transient { succeeds_after: 1 },
        });
        let mut buf = vec![0u8; 4096];
        device.read(&mut buf).unwrap();
        assert!(device.read_errors().is_empty());
        assert!(buf.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn permanent_fault_wipes_its_granule_and_records_error() {
        let data = vec![0x22u8; 4096];
        let mut device = InjectedFaultDevice::new(data, 512, policy(1, false, 512));
        device.inject(InjectedFault {
            range: 0..512,
            kind: FaultKind::Permanent,
        });
        let mut buf = vec![0xFFu8; 4096];
        device.read(&mut buf).unwrap();
        assert_eq!(device.read_errors().len(), 1);
        assert_eq!(device.read_errors()[0].start_sector, 0);
        assert!(buf[0..512].iter().all(|&b| b == 0));
        assert!(buf[512..].iter().all(|&b| b == 0x22));
    }

    #[test]
    fn device_vanished_aborts_without_wipe() {
        let data = vec![0x33u8; 4096];
        let mut device = InjectedFaultDevice::new(data, 512, policy(1, false, 512));
        device.inject(InjectedFault {
            range: 0..512,
            kind: FaultKind::DeviceVanished,
        });
        let mut buf = vec![0u8; 4096];
        let err = device.read(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeviceLost);
    }

    #[test]
    fn adjacent_read_errors_fuse() {
        let mut errors = Vec::new();
        insert_read_error(
            &mut errors,
            ReadError {
                start_sector: 0,
                sector_count: 4,
            },
        );
        insert_read_error(
            &mut errors,
            ReadError {
                start_sector: 4,
                sector_count: 4,
            },
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].start_sector, 0);
        assert_eq!(errors[0].sector_count, 8);
    }

    #[test]
    fn non_adjacent_read_errors_stay_separate() {
        let mut errors = Vec::new();
        insert_read_error(
            &mut errors,
            ReadError {
                start_sector: 0,
                sector_count: 2,
            },
        );
        insert_read_error(
            &mut errors,
            ReadError {
                start_sector: 100,
                sector_count: 2,
            },
        );
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn signal_abort_causes_subsequent_read_to_fail() {
        let mut device = InjectedFaultDevice::new(vec![0u8; 1024], 512, policy(2, false, 512));
        device.signal_abort();
        let mut buf = vec![0u8; 512];
        let err = device.read(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Aborted);
    }

    #[test]
    fn wipe_on_error_zeroes_full_granule_from_its_start() {
        let data = vec![0x44u8; 4096];
        let mut device = InjectedFaultDevice::new(data, 512, policy(0, true, 1024));
        device.inject(InjectedFault {
            range: 100..101,
            kind: FaultKind::Permanent,
        });
        let mut buf = vec![0xFFu8; 4096];
        device.read(&mut buf).unwrap();
        assert!(buf[0..1024].iter().all(|&b| b == 0));
        assert!(buf[1024..].iter().all(|&b| b == 0x44));
    }
}
