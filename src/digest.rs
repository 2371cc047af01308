//! Streaming MD5/SHA1/SHA256 digests and the composite that drives all three
//! from one `update` call site, preserving a "same byte stream, same order"
//! guarantee across every enabled algorithm.
//!
//! Grounded on `adaptive_pipeline_domain::services::checksum_service`'s use
//! of the RustCrypto `Digest` trait for incremental, chunk-at-a-time
//! hashing; the acquisition/verification core otherwise never hashes
//! anything, so the algorithms themselves (`md-5`, `sha1`, `sha2`) are an
//! enrichment pulled from the wider reference set.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// A single streaming digest: initialize once, `update` any number of
/// times, `finalize` once.
pub trait DigestStream: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
    fn algorithm_name(&self) -> &'static str;
}

macro_rules! digest_stream_impl {
    ($name:ident, $inner:ty, $label:literal) => {
        #[derive(Default)]
        pub struct $name {
            inner: $inner,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    inner: <$inner>::default(),
                }
            }
        }

        impl DigestStream for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn algorithm_name(&self) -> &'static str {
                $label
            }
        }
    };
}

digest_stream_impl!(Md5Stream, Md5, "md5");
digest_stream_impl!(Sha1Stream, Sha1, "sha1");
digest_stream_impl!(Sha256Stream, Sha256, "sha256");

/// Renders a digest as lowercase hex, as required before handing hashes to
/// `ArchiveBackend::finalize`.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Which of the three algorithms are active for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestSelection {
    pub md5: bool,
    pub sha1: bool,
    pub sha256: bool,
}

impl DigestSelection {
    pub fn md5_only() -> Self {
        DigestSelection {
            md5: true,
            ..Default::default()
        }
    }
}

/// Owns zero or more named digest streams and applies `update` to each in a
/// fixed order (md5, sha1, sha256), so that every enabled digest observes
/// exactly the same byte stream in exactly the same order.
#[derive(Default)]
pub struct MultiDigest {
    md5: Option<Box<Md5Stream>>,
    sha1: Option<Box<Sha1Stream>>,
    sha256: Option<Box<Sha256Stream>>,
}

impl MultiDigest {
    pub fn new(selection: DigestSelection) -> Self {
        MultiDigest {
            md5: selection.md5.then(|| Box::new(Md5Stream::new())),
            sha1: selection.sha1.then(|| Box::new(Sha1Stream::new())),
            sha256: selection.sha256.then(|| Box::new(Sha256Stream::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(s) = self.md5.as_mut() {
            s.update(data);
        }
        if let Some(s) = self.sha1.as_mut() {
            s.update(data);
        }
        if let Some(s) = self.sha256.as_mut() {
            s.update(data);
        }
    }

    /// Finalizes every enabled digest to lowercase hex, in (name, hex)
    /// pairs ready for `ArchiveBackend::finalize`.
    pub fn finalize_hex(self) -> Vec<(&'static str, String)> {
        let mut out = Vec::with_capacity(3);
        if let Some(s) = self.md5 {
            out.push(("md5", to_hex(&s.finalize())));
        }
        if let Some(s) = self.sha1 {
            out.push(("sha1", to_hex(&s.finalize())));
        }
        if let Some(s) = self.sha256 {
            out.push(("sha256", to_hex(&s.finalize())));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_known_string() {
        let mut stream = Md5Stream::new();
        stream.update(b"abc");
        let digest = Box::new(stream).finalize();
        assert_eq!(to_hex(&digest), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sha1_of_known_string() {
        let mut stream = Sha1Stream::new();
        stream.update(b"abc");
        let digest = Box::new(stream).finalize();
        assert_eq!(to_hex(&digest), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn sha256_of_known_string() {
        let mut stream = Sha256Stream::new();
        stream.update(b"abc");
        let digest = Box::new(stream).finalize();
        assert_eq!(
            to_hex(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn multi_digest_updates_all_enabled_streams_in_order() {
        let selection = DigestSelection {
            md5: true,
            sha1: true,
            sha256: true,
        };
        let mut multi = MultiDigest::new(selection);
        multi.update(b"abc");
        let hashes = multi.finalize_hex();
        assert_eq!(hashes.len(), 3);
        assert_eq!(hashes[0].0, "md5");
        assert_eq!(hashes[0].1, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(hashes[1].0, "sha1");
        assert_eq!(hashes[2].0, "sha256");
    }

    #[test]
    fn disabled_digests_are_absent_from_output() {
        let multi = MultiDigest::new(DigestSelection::md5_only());
        let hashes = multi.finalize_hex();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].0, "md5");
    }

    #[test]
    fn chunked_updates_match_single_update() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut whole = Md5Stream::new();
        whole.update(data);
        let whole_digest = Box::new(whole).finalize();

        let mut chunked = Md5Stream::new();
        for chunk in data.chunks(3) {
            chunked.update(chunk);
        }
        let chunked_digest = Box::new(chunked).finalize();
        assert_eq!(whole_digest, chunked_digest);
    }
}
