//! Multi-hash streaming support.
//!
//! A [`MultiHashReader`] is a read-through wrapper: every byte delivered to
//! the consumer is also fed to the attached hash accumulators and a byte
//! counter in a single pass. All hashes of a file therefore come from one
//! byte sequence; the source is never read twice.

use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use md5::{Digest, Md5};
use sha1::Sha1;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{Error, Result};

/// Hash algorithms understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-1 over a git blob header followed by the content.
    GitHash,
    /// Byte count standing in for a hash.
    FileSize,
}

impl HashKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Md5 => "md5",
            HashKind::Sha1 => "sha1",
            HashKind::GitHash => "gitHash",
            HashKind::FileSize => "fileSize",
        }
    }
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "md5" => Ok(HashKind::Md5),
            "sha1" => Ok(HashKind::Sha1),
            "gitHash" => Ok(HashKind::GitHash),
            "fileSize" => Ok(HashKind::FileSize),
            other => Err(Error::UnsupportedHash(other.to_string())),
        }
    }
}

/// A single hash accumulator.
///
/// `digest` is non-consuming and stable once the source is exhausted, so
/// callers may read it repeatedly.
#[derive(Debug, Clone)]
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Git(Sha1),
    Size(u64),
}

impl Hasher {
    /// Create an accumulator for `kind`.
    ///
    /// `expected_size` is only consulted by `gitHash`, whose digest covers
    /// the literal header `blob <decimal-size>\0` before the content.
    pub fn new(kind: HashKind, expected_size: u64) -> Self {
        match kind {
            HashKind::Md5 => Hasher::Md5(Md5::new()),
            HashKind::Sha1 => Hasher::Sha1(Sha1::new()),
            HashKind::GitHash => {
                let mut inner = Sha1::new();
                inner.update(format!("blob {expected_size}\0").as_bytes());
                Hasher::Git(inner)
            }
            HashKind::FileSize => Hasher::Size(0),
        }
    }

    /// Parse `kind` and create an accumulator for it.
    pub fn for_kind(kind: &str, expected_size: u64) -> Result<Self> {
        Ok(Self::new(kind.parse()?, expected_size))
    }

    /// Feed bytes into the accumulator.
    pub fn update(&mut self, buf: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(buf),
            Hasher::Sha1(h) | Hasher::Git(h) => h.update(buf),
            Hasher::Size(n) => *n += buf.len() as u64,
        }
    }

    /// Current digest: lowercase hex for real hashes, decimal for `fileSize`.
    pub fn digest(&self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.clone().finalize()),
            Hasher::Sha1(h) | Hasher::Git(h) => hex::encode(h.clone().finalize()),
            Hasher::Size(n) => n.to_string(),
        }
    }
}

/// Read-through wrapper updating hash accumulators and a byte counter.
pub struct MultiHashReader<R> {
    inner: R,
    hashers: Vec<Hasher>,
    bytes_seen: u64,
}

impl<R> MultiHashReader<R> {
    /// Wrap `inner`, attaching `hashers`.
    ///
    /// The accumulator order is fixed for the lifetime of the reader;
    /// digests are retrieved by the same index.
    pub fn new(inner: R, hashers: Vec<Hasher>) -> Self {
        Self {
            inner,
            hashers,
            bytes_seen: 0,
        }
    }

    /// Digest of the accumulator at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of range of the attached accumulators.
    pub fn digest(&self, index: usize) -> String {
        self.hashers[index].digest()
    }

    /// Total bytes delivered to the consumer so far.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for MultiHashReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let new = &buf.filled()[before..];
                if !new.is_empty() {
                    for hasher in &mut me.hashers {
                        hasher.update(new);
                    }
                    me.bytes_seen += new.len() as u64;
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn kind_parse_roundtrip() {
        for kind in [
            HashKind::Md5,
            HashKind::Sha1,
            HashKind::GitHash,
            HashKind::FileSize,
        ] {
            assert_eq!(kind.as_str().parse::<HashKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = "crc32".parse::<HashKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedHash(k) if k == "crc32"));
    }

    #[test]
    fn md5_digest() {
        let mut h = Hasher::new(HashKind::Md5, 0);
        h.update(b"hello");
        assert_eq!(h.digest(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn sha1_digest() {
        let mut h = Hasher::new(HashKind::Sha1, 0);
        h.update(b"hello");
        assert_eq!(h.digest(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn git_hash_law() {
        // gitHash(B) = SHA1("blob " + decimal(|B|) + "\0" + B)
        let mut git = Hasher::new(HashKind::GitHash, 5);
        git.update(b"hello");
        assert_eq!(git.digest(), "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0");

        let mut plain = Hasher::new(HashKind::Sha1, 0);
        plain.update(b"blob 5\0hello");
        assert_eq!(git.digest(), plain.digest());
    }

    #[test]
    fn file_size_digest_is_decimal() {
        let mut h = Hasher::new(HashKind::FileSize, 0);
        h.update(b"hello");
        h.update(b" world");
        assert_eq!(h.digest(), "11");
    }

    #[test]
    fn digest_is_idempotent() {
        let mut h = Hasher::new(HashKind::Md5, 0);
        h.update(b"hello");
        assert_eq!(h.digest(), h.digest());
    }

    #[tokio::test]
    async fn multi_hash_single_pass() {
        let data = b"the quick brown fox".as_slice();
        let hashers = vec![
            Hasher::new(HashKind::Md5, 0),
            Hasher::new(HashKind::Sha1, 0),
            Hasher::new(HashKind::GitHash, data.len() as u64),
        ];
        let mut reader = MultiHashReader::new(data, hashers);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.bytes_seen(), data.len() as u64);

        let mut md5 = Hasher::new(HashKind::Md5, 0);
        md5.update(data);
        assert_eq!(reader.digest(0), md5.digest());

        let mut sha1 = Hasher::new(HashKind::Sha1, 0);
        sha1.update(data);
        assert_eq!(reader.digest(1), sha1.digest());
    }

    #[tokio::test]
    async fn empty_source() {
        let mut reader = MultiHashReader::new(b"".as_slice(), vec![Hasher::new(HashKind::Md5, 0)]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(reader.bytes_seen(), 0);
        assert_eq!(reader.digest(0), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
