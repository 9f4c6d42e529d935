//! Content identity of uploaded payloads.

use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, Result};

const HASH_HEX_LEN: usize = 64;

/// SHA-256 digest of a blob, as 64 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Parse a stored hash string, rejecting anything that is not a SHA-256 hex digest.
    pub fn parse(value: &str) -> Result<Self> {
        let valid = value.len() == HASH_HEX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(CoreError::invalid(format!("malformed content hash {value:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentity {
    pub hash: ContentHash,
    pub size: u64,
    /// Raster format detected from the payload's magic bytes.
    pub format: ImageFormat,
}

impl ContentIdentity {
    /// Byte size as stored in the catalog.
    pub fn size_bytes(&self) -> Result<i64> {
        i64::try_from(self.size)
            .map_err(|_| CoreError::invalid(format!("payload of {} bytes is too large", self.size)))
    }
}

/// Derive the content identity of a payload.
///
/// Empty payloads and payloads that are not a recognized image format are
/// rejected instead of producing a hash.
pub fn derive(payload: &[u8]) -> Result<ContentIdentity> {
    if payload.is_empty() {
        return Err(CoreError::invalid("payload is empty"));
    }

    let format = image::guess_format(payload).map_err(|e| {
        CoreError::invalid(format!(
            "payload of {} bytes is not a recognized image: {e}",
            payload.len()
        ))
    })?;

    Ok(ContentIdentity {
        hash: ContentHash::of(payload),
        size: payload.len() as u64,
        format,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    /// A payload that sniffs as PNG, distinct per `tag`.
    pub(crate) fn png(tag: &str) -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(tag.as_bytes());
        bytes
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = derive(&png("sunset")).unwrap();
        let b = derive(&png("sunset")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size, PNG_MAGIC.len() as u64 + 6);
        assert_eq!(a.format, ImageFormat::Png);
        assert_eq!(a.hash.as_str().len(), 64);
    }

    #[test]
    fn test_different_bytes_different_hash() {
        let a = derive(&png("one")).unwrap();
        let b = derive(&png("two")).unwrap();
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        assert_eq!(
            ContentHash::of(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        let err = derive(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = derive(b"definitely not an image").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("not a recognized image"));
    }

    #[test]
    fn test_jpeg_is_accepted() {
        let identity = derive(b"\xff\xd8\xff\xe0rest-of-jpeg").unwrap();
        assert_eq!(identity.format, ImageFormat::Jpeg);
    }

    #[test]
    fn test_parse_hash() {
        let hash = ContentHash::of(b"x");
        assert_eq!(ContentHash::parse(hash.as_str()).unwrap(), hash);
        assert!(ContentHash::parse("abc").is_err());
        assert!(ContentHash::parse(&"G".repeat(64)).is_err());
        assert!(ContentHash::parse(&hash.as_str().to_uppercase()).is_err());
    }
}
