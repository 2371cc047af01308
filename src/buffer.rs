//! Fixed-geometry chunk buffer with dual raw/compressed views (Design Note 9).
//!
//! The C source backing this format keeps one struct with raw and
//! compression pointers plus a boolean "data in compression buffer" flag.
//! Rust's enum makes the "exactly one live view" invariant structurally true
//! instead of an informally-kept contract, so this uses the tagged-variant
//! shape Design Note 9 calls out as the alternative.

use crate::error::{CoreError, ErrorKind, Result};

/// Which view of a chunk currently holds live data.
#[derive(Debug, Clone)]
pub enum ChunkBytes {
    /// Uncompressed bytes, as read from the device or decompressed from an
    /// archive.
    Raw(Vec<u8>),
    /// Compressed bytes plus the length they inflate to, as produced by
    /// `ArchiveBackend::write_chunk`'s compression step.
    Compressed { data: Vec<u8>, inflated_len: usize },
}

/// Per-chunk checksum plumbing alongside the data.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkChecksum {
    pub value: u32,
    pub present: bool,
}

/// A single chunk's worth of storage-media bytes, allocated once per
/// pipeline and reused for every chunk.
#[derive(Debug, Clone)]
pub struct StorageMediaBuffer {
    chunk_size: usize,
    bytes: ChunkBytes,
    checksum: ChunkChecksum,
}

impl StorageMediaBuffer {
    /// Allocates a buffer sized for `chunk_size` raw bytes, starting empty.
    pub fn new(chunk_size: usize) -> Self {
        StorageMediaBuffer {
            chunk_size,
            bytes: ChunkBytes::Raw(Vec::with_capacity(chunk_size)),
            checksum: ChunkChecksum::default(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Replaces the live view with `data` as the raw (uncompressed) side.
    /// `data.len()` must not exceed `chunk_size`.
    pub fn set_raw(&mut self, data: Vec<u8>) -> Result<()> {
        if data.len() > self.chunk_size {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "raw chunk length {} exceeds chunk size {}",
                    data.len(),
                    self.chunk_size
                ),
            ));
        }
        self.bytes = ChunkBytes::Raw(data);
        self.checksum = ChunkChecksum::default();
        Ok(())
    }

    /// Replaces the live view with a compressed payload, recording the
    /// length it inflates to.
    pub fn set_compressed(&mut self, data: Vec<u8>, inflated_len: usize) -> Result<()> {
        if inflated_len > self.chunk_size {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!(
                    "inflated length {} exceeds chunk size {}",
                    inflated_len, self.chunk_size
                ),
            ));
        }
        self.bytes = ChunkBytes::Compressed { data, inflated_len };
        Ok(())
    }

    /// The raw (uncompressed) bytes, if that is the live view. `None` when
    /// the buffer currently holds a compressed payload.
    pub fn as_raw(&self) -> Option<&[u8]> {
        match &self.bytes {
            ChunkBytes::Raw(v) => Some(v),
            ChunkBytes::Compressed { .. } => None,
        }
    }

    /// Whichever side holds the current data, as raw logical bytes: for the
    /// `Raw` variant this is just the stored bytes; callers working with a
    /// `Compressed` buffer must decompress first via `ArchiveBackend`
    /// before calling this (it returns the placeholder empty slice in that
    /// case since there is no logical-byte view to hand back without
    /// inflating).
    pub fn as_live(&self) -> &[u8] {
        match &self.bytes {
            ChunkBytes::Raw(v) => v,
            ChunkBytes::Compressed { .. } => &[],
        }
    }

    pub fn live_len(&self) -> usize {
        match &self.bytes {
            ChunkBytes::Raw(v) => v.len(),
            ChunkBytes::Compressed { inflated_len, .. } => *inflated_len,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.bytes, ChunkBytes::Compressed { .. })
    }

    pub fn compressed_bytes(&self) -> Option<&[u8]> {
        match &self.bytes {
            ChunkBytes::Compressed { data, .. } => Some(data),
            ChunkBytes::Raw(_) => None,
        }
    }

    pub fn checksum(&self) -> ChunkChecksum {
        self.checksum
    }

    pub fn set_checksum(&mut self, value: u32) {
        self.checksum = ChunkChecksum {
            value,
            present: true,
        };
    }

    /// Swaps adjacent byte pairs in place on the live (raw) buffer. Errors
    /// with `InvalidArgument` if the live length is odd.
    pub fn swap_byte_pairs(&mut self) -> Result<()> {
        let buf = match &mut self.bytes {
            ChunkBytes::Raw(v) => v,
            ChunkBytes::Compressed { .. } => {
                return Err(CoreError::new(
                    ErrorKind::InvalidArgument,
                    "cannot swap byte pairs on a compressed buffer",
                ))
            }
        };
        if buf.len() % 2 != 0 {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("live buffer length {} is odd", buf.len()),
            ));
        }
        let mut i = 0;
        while i + 1 < buf.len() {
            buf.swap(i, i + 1);
            i += 2;
        }
        Ok(())
    }

    /// Zeroes the byte range `[start, end)` within the live raw buffer,
    /// growing it with zeros first if necessary. Used by the device
    /// read-error wipe policy.
    pub fn zero_range(&mut self, start: usize, end: usize) -> Result<()> {
        let buf = match &mut self.bytes {
            ChunkBytes::Raw(v) => v,
            ChunkBytes::Compressed { .. } => {
                return Err(CoreError::new(
                    ErrorKind::InvalidArgument,
                    "cannot zero a range of a compressed buffer",
                ))
            }
        };
        if end > self.chunk_size {
            return Err(CoreError::new(
                ErrorKind::InvalidArgument,
                format!("zero range end {} exceeds chunk size {}", end, self.chunk_size),
            ));
        }
        if buf.len() < end {
            buf.resize(end, 0);
        }
        for b in &mut buf[start..end] {
            *b = 0;
        }
        Ok(())
    }
}
