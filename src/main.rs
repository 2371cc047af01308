//! `ewfcore`: the CLI binary driving `session::SessionController`. All EWF
//! parsing, hashing, and archive I/O lives in the library; this binary only
//! gathers parameters (clap), renders progress, and wires `Ctrl-C` to an
//! `AbortFlag` — the signal handler lives here and nowhere else in the
//! crate, per Design Note 9.

use std::path::PathBuf;
use std::sync::OnceLock;

use clap::{Args, Parser, Subcommand};
use ewfcore::device::AbortFlag;
use ewfcore::digest::DigestSelection;
use ewfcore::error::{CoreError, ErrorKind, Result};
use ewfcore::geometry::Geometry;
use ewfcore::media::{CaseData, HeaderCodepage, MediaDescriptor, MediaFlags, MediaType};
use ewfcore::profile::{ArchiveFormat, ArchiveProfile, CompressionLevel};
use ewfcore::progress::{ProcessStatus, ProgressSink, QuietSink, TerminalStatus};
use ewfcore::session::{ParameterSource, SessionController};
use log::{error, info};

/// Bounds `-r` to `0..=255` at parse time the way clap-num's callers
/// elsewhere in the retrieval pack bound small numeric switches.
fn retries_in_range(s: &str) -> std::result::Result<u8, String> {
    clap_num::number_range(s, 0, 255)
}

#[derive(Parser)]
#[command(name = "ewfcore", version, about = "Forensic disk image acquisition and verification")]
struct Cli {
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Acquire a device or file into a segmented, checksummed archive.
    Acquire {
        /// Source device or file path(s) to read from, in order.
        source: Vec<PathBuf>,
        #[command(flatten)]
        switches: Switches,
    },
    /// Re-read an existing archive and compare its stored hashes/checksums.
    Verify {
        #[command(flatten)]
        switches: Switches,
    },
}

/// The full switch table, shared by both subcommands (not every switch
/// matters to `verify`, but clap only requires the ones the code path
/// actually reads).
#[derive(Args, Clone)]
struct Switches {
    /// Header codepage. Only validated, never re-encoded: case-data fields
    /// are always stored as UTF-8 regardless of this value.
    #[arg(short = 'A', long, default_value = "ascii")]
    codepage: String,

    #[arg(short = 'b', long = "sectors-per-chunk", default_value_t = 64)]
    sectors_per_chunk: u32,

    #[arg(short = 'B', long = "bytes", default_value_t = 0)]
    acquiry_size: u64,

    #[arg(short = 'c', long = "compression", default_value = "none")]
    compression: String,

    #[arg(short = 'C', long = "case-number")]
    case_number: Option<String>,
    #[arg(short = 'D', long = "description")]
    description: Option<String>,
    #[arg(short = 'E', long = "evidence-number")]
    evidence_number: Option<String>,
    #[arg(short = 'e', long = "examiner")]
    examiner_name: Option<String>,
    #[arg(short = 'N', long = "notes")]
    notes: Option<String>,

    /// Comma-separated additional digests beyond MD5: `sha1`, `sha256`.
    #[arg(short = 'd', long = "digests")]
    digests: Option<String>,

    #[arg(short = 'f', long = "format", default_value = "encase6")]
    format: String,

    #[arg(short = 'g', long = "error-granularity", default_value_t = 64)]
    error_granularity_sectors: u32,

    #[arg(short = 'l', long = "log-file")]
    log_file: Option<PathBuf>,

    #[arg(short = 'm', long = "media-type", default_value = "fixed")]
    media_type: String,

    #[arg(short = 'M', long = "media-flags", default_value = "physical")]
    media_flags: String,

    #[arg(short = 'o', long = "offset", default_value_t = 0)]
    acquiry_offset: u64,

    /// Process buffer size, as a byte-size string; must equal the chunk size
    /// implied by `-b`/`-P` if given, or acquisition is rejected.
    #[arg(short = 'p', long = "buffer-size")]
    buffer_size: Option<String>,

    #[arg(short = 'P', long = "bytes-per-sector")]
    bytes_per_sector: Option<u32>,

    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,

    #[arg(short = 'r', long = "retries", default_value_t = 2, value_parser = retries_in_range)]
    retries: u8,

    #[arg(short = 'R', long = "resume", default_value_t = false)]
    resume: bool,

    #[arg(short = 's', long = "swap-byte-pairs", default_value_t = false)]
    swap_byte_pairs: bool,

    #[arg(short = 'S', long = "segment-size")]
    segment_size: Option<String>,

    #[arg(short = 't', long = "target", default_value = "image")]
    target: PathBuf,

    #[arg(short = '2', long = "secondary-target")]
    secondary_target: Option<PathBuf>,

    #[arg(short = 'u', long = "unattended", default_value_t = false)]
    unattended: bool,

    #[arg(short = 'v', long = "verbose", default_value_t = false)]
    verbose: bool,

    #[arg(short = 'w', long = "wipe-on-error", default_value_t = false)]
    wipe_on_error: bool,
}

/// Resolves raw `Switches` into the typed values `ParameterSource` hands to
/// `SessionController`, entirely independent of how media size is known
/// (acquire learns it from the opened device; verify has no media size of
/// its own and reports zero, which `ParameterSource` consumers ignore).
struct CliParameterSource {
    switches: Switches,
    source_paths: Vec<PathBuf>,
    media_size: u64,
}

impl CliParameterSource {
    fn digest_selection(&self) -> Result<DigestSelection> {
        let mut selection = DigestSelection {
            md5: true,
            sha1: false,
            sha256: false,
        };
        if let Some(list) = &self.switches.digests {
            for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match name {
                    "sha1" => selection.sha1 = true,
                    "sha256" => selection.sha256 = true,
                    other => {
                        return Err(CoreError::new(
                            ErrorKind::InvalidArgument,
                            format!("unknown digest '{}'", other),
                        ))
                    }
                }
            }
        }
        Ok(selection)
    }

    fn compression(&self) -> Result<(CompressionLevel, bool)> {
        let raw = self.switches.compression.to_ascii_lowercase();
        if raw == "empty-block" {
            return Ok((CompressionLevel::None, true));
        }
        Ok((raw.parse::<CompressionLevel>()?, false))
    }

    fn media_flags(&self) -> Result<MediaFlags> {
        match self.switches.media_flags.to_ascii_lowercase().as_str() {
            "physical" => Ok(MediaFlags::PHYSICAL),
            "logical" => Ok(MediaFlags::LOGICAL),
            other => Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("unknown media flag '{}'", other),
            )),
        }
    }

    fn parsed_codepage(&self) -> Result<HeaderCodepage> {
        self.switches.codepage.parse::<HeaderCodepage>()
    }
}

impl ParameterSource for CliParameterSource {
    fn geometry(&self) -> Geometry {
        let bytes_per_sector = self.switches.bytes_per_sector.unwrap_or(512);
        Geometry::new(
            bytes_per_sector,
            self.switches.sectors_per_chunk,
            self.switches.error_granularity_sectors,
        )
        .unwrap_or_else(|e| {
            error!("invalid geometry: {}", e);
            std::process::exit(1);
        })
    }

    fn media(&self) -> MediaDescriptor {
        let flags = self.media_flags().unwrap_or(MediaFlags::PHYSICAL);
        let media_type = self
            .switches
            .media_type
            .parse::<MediaType>()
            .unwrap_or(MediaType::Fixed);
        MediaDescriptor::new(self.media_size, media_type, flags).unwrap_or_else(|e| {
            error!("invalid media descriptor: {}", e);
            std::process::exit(1);
        })
    }

    fn profile(&self) -> ArchiveProfile {
        let format = self
            .switches
            .format
            .parse::<ArchiveFormat>()
            .unwrap_or_else(|e| {
                error!("{}", e);
                std::process::exit(1);
            });
        let (compression_level, compress_empty_block) =
            self.compression().unwrap_or_else(|e| {
                error!("{}", e);
                std::process::exit(1);
            });
        let segment_size_max = match &self.switches.segment_size {
            Some(s) => ewfcore::byte_size::parse_bytes(s, '.').unwrap_or_else(|e| {
                error!("{}", e);
                std::process::exit(1);
            }),
            None => ewfcore::profile::DEFAULT_SEGMENT_SIZE,
        };
        ArchiveProfile {
            format,
            compression_level,
            compress_empty_block,
            segment_size_max,
        }
    }

    fn case_data(&self) -> CaseData {
        CaseData {
            case_number: self.switches.case_number.clone(),
            description: self.switches.description.clone(),
            evidence_number: self.switches.evidence_number.clone(),
            examiner_name: self.switches.examiner_name.clone(),
            notes: self.switches.notes.clone(),
            header_codepage: self.header_codepage(),
        }
    }

    fn header_codepage(&self) -> HeaderCodepage {
        self.parsed_codepage().unwrap_or_else(|e| {
            error!("{}", e);
            std::process::exit(1);
        })
    }

    fn target_stem(&self) -> PathBuf {
        self.switches.target.clone()
    }

    fn secondary_target_stem(&self) -> Option<PathBuf> {
        self.switches.secondary_target.clone()
    }

    fn acquiry_offset(&self) -> u64 {
        self.switches.acquiry_offset
    }

    fn acquiry_size(&self) -> u64 {
        self.switches.acquiry_size
    }

    fn digests(&self) -> DigestSelection {
        self.digest_selection().unwrap_or_else(|e| {
            error!("{}", e);
            std::process::exit(1);
        })
    }

    fn max_retries(&self) -> u8 {
        self.switches.retries
    }

    fn wipe_on_error(&self) -> bool {
        self.switches.wipe_on_error
    }

    fn swap_byte_pairs(&self) -> bool {
        self.switches.swap_byte_pairs
    }

    fn resume(&self) -> bool {
        self.switches.resume
    }

    fn quiet(&self) -> bool {
        self.switches.quiet
    }

    fn source_paths(&self) -> Vec<PathBuf> {
        self.source_paths.clone()
    }

    fn buffer_size(&self) -> Option<u64> {
        self.switches.buffer_size.as_ref().map(|s| {
            ewfcore::byte_size::parse_bytes(s, '.').unwrap_or_else(|e| {
                error!("{}", e);
                std::process::exit(1);
            })
        })
    }
}

/// Renders ticks to stderr, the way `print_info` writes human-facing output
/// directly rather than through `log`.
struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn tick(&mut self, status: &ProcessStatus) {
        eprintln!("\r{}", status.render());
    }

    fn finished(&mut self, status: TerminalStatus) {
        eprintln!();
        match status {
            TerminalStatus::Completed => eprintln!("done."),
            TerminalStatus::Aborted => eprintln!("aborted."),
            TerminalStatus::Failed => eprintln!("failed."),
        }
    }
}

/// The module-level flag the signal handler flips, per Design Note 9: only
/// the handler-to-flag wiring lives here, confined to the binary.
static SIGINT_TARGET: OnceLock<AbortFlag> = OnceLock::new();

extern "C" fn on_sigint(_: i32) {
    if let Some(flag) = SIGINT_TARGET.get() {
        flag.signal();
    }
}

fn install_sigint_handler() -> AbortFlag {
    let abort = AbortFlag::new();
    let _ = SIGINT_TARGET.set(abort.clone());
    unsafe {
        libc_signal(2 /* SIGINT */, on_sigint as usize);
    }
    abort
}

#[cfg(unix)]
unsafe fn libc_signal(signum: i32, handler: usize) {
    extern "C" {
        fn signal(signum: i32, handler: usize) -> usize;
    }
    signal(signum, handler);
}

#[cfg(not(unix))]
unsafe fn libc_signal(_signum: i32, _handler: usize) {}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let abort = install_sigint_handler();
    let mut progress: Box<dyn ProgressSink> = Box::new(StderrProgress);
    let mut quiet_sink = QuietSink;

    let result = match cli.command {
        SubCommand::Acquire { source, switches } => {
            if source.is_empty() {
                error!("acquire requires at least one source path");
                std::process::exit(1);
            }
            let media_size = source
                .iter()
                .map(|p| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0))
                .sum();
            let quiet = switches.quiet;
            let params = CliParameterSource {
                switches,
                source_paths: source,
                media_size,
            };
            let sink: &mut dyn ProgressSink = if quiet {
                &mut quiet_sink
            } else {
                progress.as_mut()
            };
            SessionController::run_acquire(&params, sink, &abort).map(|report| {
                info!(
                    "acquired {} bytes in {} chunks ({} read errors)",
                    report.bytes_written,
                    report.chunks_written,
                    report.read_errors.len()
                );
                !report.aborted
            })
        }
        SubCommand::Verify { switches } => {
            let quiet = switches.quiet;
            let params = CliParameterSource {
                switches,
                source_paths: Vec::new(),
                media_size: 0,
            };
            let sink: &mut dyn ProgressSink = if quiet {
                &mut quiet_sink
            } else {
                progress.as_mut()
            };
            SessionController::run_verify(&params, sink, &abort).map(|report| {
                for comparison in &report.digest_comparisons {
                    info!(
                        "{}: stored={:?} computed={} match={}",
                        comparison.algorithm, comparison.stored, comparison.computed, comparison.matches
                    );
                }
                if !report.known_read_error_ranges.is_empty() {
                    info!(
                        "{} sector range(s) were recorded as unreadable during acquisition",
                        report.known_read_error_ranges.len()
                    );
                }
                report.success()
            })
        }
    };

    match result {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
