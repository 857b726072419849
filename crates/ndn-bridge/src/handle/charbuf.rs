//! Native byte buffers
//!
//! `CharBuf` is the pointee of every buffer-kind handle (names, interests,
//! content objects, ...). `SigningParams` is the pointee of SigningParams handles.

use crate::error::{BridgeError, BridgeResult};
use std::fmt;

/// Growable byte buffer handed to the native engine
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CharBuf {
    buf: Vec<u8>,
}

impl CharBuf {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Copy `bytes` into a new buffer, reporting allocation failure
    pub fn from_slice(bytes: &[u8]) -> BridgeResult<Self> {
        let mut charbuf = Self::new();
        charbuf.append(bytes)?;
        Ok(charbuf)
    }

    /// Append `bytes`, reporting allocation failure
    pub fn append(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        self.buf
            .try_reserve(bytes.len())
            .map_err(|_| BridgeError::out_of_memory("charbuf"))?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl fmt::Debug for CharBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CharBuf(\"{}\")", crate::util::dump_charbuf(&self.buf))
    }
}

/// Parameters for signing a content object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningParams {
    /// Signed-info template, if any
    pub template: Option<CharBuf>,
    /// Content type code
    pub content_type: i32,
    /// Freshness in seconds, -1 for none
    pub freshness: i32,
    /// Signing flags
    pub sign_flags: i32,
    /// Publisher key digest
    pub publisher_key_id: Option<[u8; 32]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_copies() {
        let source = vec![1u8, 2, 3];
        let buf = CharBuf::from_slice(&source).unwrap();
        drop(source);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_append_grows() {
        let mut buf = CharBuf::new();
        assert!(buf.is_empty());
        buf.append(b"/a").unwrap();
        buf.append(b"/b").unwrap();
        assert_eq!(buf.as_slice(), b"/a/b");
    }

    #[test]
    fn test_debug_escapes_binary() {
        let buf = CharBuf::from_slice(b"ok\x00").unwrap();
        assert_eq!(format!("{:?}", buf), "CharBuf(\"ok\\x00\")");
    }
}
